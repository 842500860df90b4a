//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con tutte le policy di ottimizzazione
//! - Fornisce validazione dei parametri prima che venga schedulato qualsiasi lavoro
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//! - Calcola il fingerprint usato per invalidare la cache dei timestamp
//!
//! ## Parametri di configurazione:
//! - `recurse`: Discende nelle sottodirectory (default: true)
//! - `formats`: Formati abilitati (default: PNG, JPEG, GIF, WEBP, SVG)
//! - `convert_to`: Formati target per la conversione (WEBP, PNG, JPEG, ZIP, CBZ)
//! - `keep_metadata`: Preserva i metadata e la compressione originale dei membri
//! - `bigger`: Accetta risultati più grandi dell'originale
//! - `dry_run`: Simulazione senza modifiche
//! - `list_only`: Elenca soltanto i file riconosciuti
//! - `jobs`: Numero di task concorrenti (default: numero di core)
//! - `ignore`: Glob da ignorare
//! - `symlinks`: Segue i link simbolici (default: true)
//! - `after`: Cutoff globale in secondi epoch
//! - `timestamps`: Abilita la cache incrementale (default: true)
//!
//! ## Fingerprint:
//! Solo i campi che cambiano il risultato dell'ottimizzazione entrano nel
//! fingerprint (`ConfigFingerprint`). Cambiare `jobs` o `verbose` non invalida
//! la cache, cambiare `formats` sì.
//!
//! ## Esempio:
//! ```rust,ignore
//! let config = Config {
//!     convert_to: ["WEBP".to_string()].into(),
//!     jobs: 8,
//!     ..Default::default()
//! };
//! config.validate()?;
//! ```

use crate::error::ConfigError;
use crate::file_format::{FileFormat, CONVERTIBLE_TARGETS, DEFAULT_FORMATS};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;

/// Configuration for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Descend into subdirectories
    pub recurse: bool,
    /// Enabled format identifiers
    pub formats: BTreeSet<String>,
    /// Formats files may be converted to
    pub convert_to: BTreeSet<String>,
    /// Keep metadata and member compression as found
    pub keep_metadata: bool,
    /// Accept optimized output even when it is larger
    pub bigger: bool,
    /// Don't write anything
    pub dry_run: bool,
    /// Only list the detected format of each file
    pub list_only: bool,
    /// Number of concurrent optimize tasks
    pub jobs: usize,
    /// Glob patterns of paths to ignore
    pub ignore: Vec<String>,
    /// Follow symbolic links
    pub symlinks: bool,
    /// Global cutoff: only optimize files modified after this epoch time
    pub after: Option<f64>,
    /// Record and honour timestamp sidecars
    pub timestamps: bool,
    /// Programs never to use even if installed
    pub disabled_programs: BTreeSet<String>,
    /// Emit newline delimited JSON events instead of human output
    pub json_output: bool,
    /// Verbosity level
    pub verbose: u8,
    /// Exit non-zero if any file failed
    pub fail_on_error: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recurse: true,
            formats: DEFAULT_FORMATS.iter().map(|f| f.to_string()).collect(),
            convert_to: BTreeSet::new(),
            keep_metadata: false,
            bigger: false,
            dry_run: false,
            list_only: false,
            jobs: default_jobs(),
            ignore: Vec::new(),
            symlinks: true,
            after: None,
            timestamps: true,
            disabled_programs: BTreeSet::new(),
            json_output: false,
            verbose: 0,
            fail_on_error: false,
        }
    }
}

/// Host core count, falling back to one
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// The subset of configuration a timestamp store was built with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFingerprint {
    pub bigger: bool,
    pub convert_to: Vec<String>,
    pub formats: Vec<String>,
    pub ignore: Vec<String>,
    pub keep_metadata: bool,
    pub recurse: bool,
    pub symlinks: bool,
}

impl ConfigFingerprint {
    /// Stable sha256 hex digest of the fingerprint fields
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.jobs == 0 {
            return Err(ConfigError::Validation(
                "Number of jobs must be greater than 0".to_string(),
            ));
        }

        for format in &self.formats {
            if FileFormat::canonical(format).is_none() {
                return Err(ConfigError::UnknownFormat(format.clone()));
            }
        }

        for target in &self.convert_to {
            match FileFormat::canonical(target) {
                Some(canonical) if CONVERTIBLE_TARGETS.contains(&canonical) => {}
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "Cannot convert to {}",
                        target
                    )))
                }
            }
        }

        if let Some(after) = self.after {
            if !after.is_finite() || after < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "Invalid cutoff time: {}",
                    after
                )));
            }
        }

        for glob in &self.ignore {
            crate::skipper::glob_to_regex(glob, false)?;
        }

        Ok(())
    }

    /// Rewrite user supplied format names to their canonical spelling
    pub fn normalize(&mut self) {
        let canon = |set: &BTreeSet<String>| {
            set.iter()
                .map(|f| {
                    FileFormat::canonical(f)
                        .map(str::to_string)
                        .unwrap_or_else(|| f.to_ascii_uppercase())
                })
                .collect::<BTreeSet<_>>()
        };
        self.formats = canon(&self.formats);
        self.convert_to = canon(&self.convert_to);
        // Converting to a container format implies reading it.
        for target in self.convert_to.clone() {
            if FileFormat::canonical(&target).is_some() {
                self.formats.insert(target);
            }
        }
    }

    pub fn is_enabled(&self, format: &str) -> bool {
        self.formats.contains(format)
    }

    pub fn converts_to(&self, format: &str) -> bool {
        self.convert_to.contains(format)
    }

    /// Fields that invalidate recorded timestamps when they change
    pub fn fingerprint(&self) -> ConfigFingerprint {
        let mut ignore = self.ignore.clone();
        ignore.sort();
        ignore.dedup();
        ConfigFingerprint {
            bigger: self.bigger,
            convert_to: self.convert_to.iter().cloned().collect(),
            formats: self.formats.iter().cloned().collect(),
            ignore,
            keep_metadata: self.keep_metadata,
            recurse: self.recurse,
            symlinks: self.symlinks,
        }
    }

    /// Load configuration from file
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Default location of the user config file
    pub fn default_path() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|dir| dir.join("media-squeeze").join("config.json"))
    }
}
