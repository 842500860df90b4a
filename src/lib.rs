//! # Media Squeeze Library
//!
//! Modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare dell'applicazione
//! - Espone i tipi e le funzioni principali tramite re-exports
//! - Fornisce un'interfaccia pulita per il main.rs e per i test di integrazione
//!
//! ## Architettura dei moduli:
//! - `config`: Configurazione, validazione e fingerprint
//! - `error`: Tipi di errore per task e configurazione
//! - `path_info`: Identità di file, membri di archivio e frame
//! - `timestamps`: Cache incrementale dei tempi di ottimizzazione
//! - `skipper`: Regole di skip (symlink, ignore, sidecar, cutoff)
//! - `detect`: Riconoscimento del formato dai byte
//! - `programs`: Tabella dei programmi esterni ed esecuzione
//! - `handlers`: Handler per formato, registry, cleanup e container
//! - `archive`: Codec degli archivi (zip scritto a mano, tar, 7z, rar)
//! - `optimizer`: Walker, pool di task e grafo dei nodi
//! - `report`, `json_output`, `progress`: Risultati e feedback
//!
//! ## Utilizzo:
//! ```rust,ignore
//! use media_squeeze::{Config, Context, ProgramTable, Walker};
//!
//! let config = Config::default();
//! let programs = ProgramTable::discover(&config.disabled_programs);
//! let walker = Walker::new(Context::new(config, programs))?;
//! let totals = walker.run(&[path]).await?;
//! ```

pub mod archive;
pub mod config;
pub mod detect;
pub mod error;
pub mod file_format;
pub mod handlers;
pub mod json_output;
pub mod optimizer;
pub mod path_info;
pub mod programs;
pub mod progress;
pub mod report;
pub mod skipper;
pub mod timestamps;

pub use config::Config;
pub use error::{ConfigError, OptimizeError};
pub use file_format::FileFormat;
pub use handlers::{Context, HandlerKind};
pub use optimizer::Walker;
pub use path_info::PathInfo;
pub use programs::ProgramTable;
pub use report::{ReportStats, Totals};
pub use timestamps::Timestamps;
