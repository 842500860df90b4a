//! # JSON Output Module
//!
//! Output strutturato in JSON (una riga per evento) per chi integra il tool
//! in un altro processo.
//!
//! ## Tipi di messaggi:
//! - `start`: Inizio del run con i path e la configurazione effettiva
//! - `file_complete`: Fine elaborazione di un file o membro di archivio
//! - `complete`: Fine del run con i totali
//! - `error`: Errore fatale (configurazione)

use crate::config::Config;
use crate::report::{ReportStats, Totals};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tipo di messaggio JSON
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JsonMessage {
    /// Inizio del processo di ottimizzazione
    #[serde(rename = "start")]
    Start {
        paths: Vec<PathBuf>,
        config: JsonConfig,
    },

    /// Fine elaborazione di un file specifico
    #[serde(rename = "file_complete")]
    FileComplete {
        path: String,
        original_size: u64,
        optimized_size: u64,
        reduction_percent: f64,
        saved: bool,
        converted: bool,
        error: Option<String>,
    },

    /// Processo completato
    #[serde(rename = "complete")]
    Complete {
        files_processed: usize,
        files_saved: usize,
        errors: usize,
        bytes_in: u64,
        bytes_out: u64,
        reduction_percent: f64,
        duration_seconds: f64,
    },

    /// Errore generale
    #[serde(rename = "error")]
    Error {
        message: String,
        details: Option<String>,
    },
}

/// Configurazione per output JSON
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonConfig {
    pub formats: Vec<String>,
    pub convert_to: Vec<String>,
    pub jobs: usize,
    pub bigger: bool,
    pub dry_run: bool,
    pub timestamps: bool,
}

impl JsonMessage {
    /// Emette il messaggio JSON su stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    pub fn start(paths: Vec<PathBuf>, config: &Config) -> Self {
        Self::Start {
            paths,
            config: config.into(),
        }
    }

    pub fn file_complete(report: &ReportStats) -> Self {
        Self::FileComplete {
            path: report.path.clone(),
            original_size: report.bytes_in,
            optimized_size: report.bytes_out,
            reduction_percent: report.percent_saved(),
            saved: report.saved,
            converted: report.converted,
            error: report.error.as_ref().map(|e| e.to_string()),
        }
    }

    pub fn complete(totals: &Totals, duration_seconds: f64) -> Self {
        Self::Complete {
            files_processed: totals.files,
            files_saved: totals.saved_files,
            errors: totals.errors.len(),
            bytes_in: totals.bytes_in,
            bytes_out: totals.bytes_out,
            reduction_percent: totals.percent_saved(),
            duration_seconds,
        }
    }

    pub fn error(message: String, details: Option<String>) -> Self {
        Self::Error { message, details }
    }
}

impl From<&Config> for JsonConfig {
    fn from(config: &Config) -> Self {
        Self {
            formats: config.formats.iter().cloned().collect(),
            convert_to: config.convert_to.iter().cloned().collect(),
            jobs: config.jobs,
            bigger: config.bigger,
            dry_run: config.dry_run,
            timestamps: config.timestamps,
        }
    }
}
