//! # Error Types Module
//!
//! Tipi di errore dell'applicazione, separati per il punto in cui vengono gestiti.
//!
//! ## Categorie:
//! - `OptimizeError`: fallimento di un singolo task (file, membro di archivio o repack).
//!   Non attraversa mai il confine del task: viene convertito in un `ReportStats`
//!   e mostrato nel report finale.
//! - `ConfigError`: errore fatale di configurazione, interrompe l'esecuzione
//!   prima che qualsiasi lavoro venga schedulato.
//! - `ZipError`: errori del codec zip (vedi `archive::zip`).
//!
//! ## Esempio:
//! ```rust,ignore
//! if !status.success() {
//!     return Err(OptimizeError::Program {
//!         command: "oxipng -o 2 --stdout -".to_string(),
//!         code: status.code(),
//!         stderr,
//!     });
//! }
//! ```

use crate::archive::zip::ZipError;

/// Failure of one optimize or repack task
#[derive(thiserror::Error, Debug)]
pub enum OptimizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Zip error: {0}")]
    Zip(#[from] ZipError),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Malformed image: {0}")]
    Malformed(String),

    #[error("{command} exited with {}: {stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    Program {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("No runnable stages for {0}")]
    NoStages(String),

    #[error("Repack of {path} failed: {source}")]
    Repack {
        path: String,
        #[source]
        source: Box<OptimizeError>,
    },

    #[error("Task failed to complete: {0}")]
    Task(String),
}

impl OptimizeError {
    /// External command line, when the failure came from an optimizer program
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Program { command, .. } => Some(command),
            Self::Repack { source, .. } => source.command(),
            _ => None,
        }
    }

    /// Captured stderr of a failed optimizer program
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Program { stderr, .. } => Some(stderr),
            Self::Repack { source, .. } => source.stderr(),
            _ => None,
        }
    }

    pub fn repack(path: impl Into<String>, source: OptimizeError) -> Self {
        Self::Repack {
            path: path.into(),
            source: Box::new(source),
        }
    }
}

/// Fatal configuration problems, raised before any work is scheduled
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Path does not exist: {0}")]
    MissingPath(std::path::PathBuf),

    #[error("No usable optimizers for the enabled formats: {0}")]
    NoHandlers(String),

    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    #[error("Invalid ignore glob {glob}: {reason}")]
    BadGlob { glob: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

pub type TaskResult<T> = std::result::Result<T, OptimizeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_error_carries_command_and_stderr() {
        let err = OptimizeError::Program {
            command: "oxipng -".to_string(),
            code: Some(1),
            stderr: "bad chunk".to_string(),
        };
        assert_eq!(err.command(), Some("oxipng -"));
        assert_eq!(err.stderr(), Some("bad chunk"));
        assert!(err.to_string().contains("exited with 1"));

        let wrapped = OptimizeError::repack("a.zip", err);
        assert_eq!(wrapped.command(), Some("oxipng -"));
        assert!(wrapped.to_string().starts_with("Repack of a.zip failed"));
    }

    #[test]
    fn test_signal_exit_display() {
        let err = OptimizeError::Program {
            command: "gifsicle".to_string(),
            code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("signal"));
    }
}
