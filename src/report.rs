//! # Report Module
//!
//! Statistiche per file e totali del run.
//!
//! ## Responsabilità:
//! - `ReportStats`: risultato di un singolo task (byte in/out, errore, conversione)
//! - `Totals`: somma dei byte e raccolta degli errori per il report finale
//! - Formattazione delle righe per file e del riepilogo finale
//!
//! ## Conteggio dei byte:
//! Solo i task foglia contribuiscono ai byte. Il report di repack di un
//! container contribuisce soltanto il suo eventuale errore, altrimenti i byte
//! dei membri verrebbero contati due volte.
//!
//! ## Esempio di riepilogo:
//! ```text
//! ✅ Saved a total of 1.21 MB or 23.40%
//! ```

use crate::error::OptimizeError;
use crate::json_output::JsonMessage;
use tracing::{error, info};

/// Outcome of one optimize or repack task
#[derive(Debug)]
pub struct ReportStats {
    /// Full output name, including enclosing containers
    pub path: String,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub error: Option<OptimizeError>,
    pub converted: bool,
    /// The candidate replaced the original
    pub saved: bool,
    pub dry_run: bool,
    /// Container repack report; carries no bytes of its own
    pub container: bool,
}

impl ReportStats {
    pub fn new(path: impl Into<String>, bytes_in: u64, bytes_out: u64) -> Self {
        Self {
            path: path.into(),
            bytes_in,
            bytes_out,
            error: None,
            converted: false,
            saved: false,
            dry_run: false,
            container: false,
        }
    }

    pub fn error(path: impl Into<String>, bytes_in: u64, error: OptimizeError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(path, bytes_in, bytes_in)
        }
    }

    /// Bytes saved by the candidate, negative when it grew
    pub fn saved_bytes(&self) -> i64 {
        self.bytes_in as i64 - self.bytes_out as i64
    }

    pub fn percent_saved(&self) -> f64 {
        percent(self.bytes_in, self.bytes_out)
    }

    /// Bytes the output side of the totals should count
    pub fn counted_out(&self) -> u64 {
        if self.error.is_none() && (self.saved || self.dry_run) {
            self.bytes_out
        } else {
            self.bytes_in
        }
    }

    /// Per-file line
    pub fn line(&self) -> String {
        if let Some(err) = &self.error {
            let mut line = format!("{}: {}", self.path, err);
            if let Some(command) = err.command() {
                line.push_str(&format!("\n    command: {}", command));
            }
            if let Some(stderr) = err.stderr().filter(|s| !s.is_empty()) {
                line.push_str(&format!("\n    stderr: {}", stderr));
            }
            return line;
        }

        let saved = self.saved_bytes();
        let mut line = format!(
            "{}: {:.2}% ({})",
            self.path,
            self.percent_saved(),
            format_signed_size(saved)
        );
        if self.dry_run {
            line.push_str(" would be");
        }
        if saved > 0 {
            line.push_str(if self.converted { " converted and saved" } else { " saved" });
        } else if saved < 0 {
            line.push_str(" lost");
        }
        if !self.saved && !self.dry_run {
            line.push_str(", kept original");
        }
        line
    }

    /// Log the per-file line and emit its JSON event
    pub fn report(&self, json: bool) {
        if json {
            JsonMessage::file_complete(self).emit();
            return;
        }
        if self.error.is_some() {
            error!("❌ {}", self.line());
        } else if self.saved_bytes() > 0 {
            info!("✅ {}", self.line());
        } else {
            info!("➖ {}", self.line());
        }
    }
}

/// Run-level aggregate of every report
#[derive(Debug, Default)]
pub struct Totals {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub files: usize,
    pub saved_files: usize,
    pub errors: Vec<ReportStats>,
}

impl Totals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, report: ReportStats) {
        if !report.container {
            self.files += 1;
            self.bytes_in += report.bytes_in;
            self.bytes_out += report.counted_out();
            if report.saved {
                self.saved_files += 1;
            }
        }
        if report.error.is_some() {
            self.errors.push(report);
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn percent_saved(&self) -> f64 {
        percent(self.bytes_in, self.bytes_out)
    }

    /// Final summary line
    pub fn summary(&self, dry_run: bool) -> String {
        if self.bytes_in == 0 {
            return "Didn't optimize any files.".to_string();
        }
        let saved = self.bytes_in as i64 - self.bytes_out as i64;
        let verb = match (dry_run, saved.signum()) {
            (true, 1) => "Could save",
            (true, 0) => "Could even out for",
            (true, _) => "Could lose",
            (false, 1) => "Saved",
            (false, 0) => "Evened out",
            (false, _) => "Lost",
        };
        format!(
            "{} a total of {} or {:.2}%",
            verb,
            format_signed_size(saved),
            self.percent_saved()
        )
    }

    /// Log the error list and the summary
    pub fn report(&self, dry_run: bool, json: bool, duration_seconds: f64) {
        if json {
            JsonMessage::complete(self, duration_seconds).emit();
            return;
        }
        if self.has_errors() {
            error!("❌ Errors with {} file(s):", self.errors.len());
            for report in &self.errors {
                error!("  {}", report.line());
            }
        }
        info!("📊 {}", self.summary(dry_run));
        if dry_run {
            info!("🧪 Dry run did not change any files.");
        }
    }
}

fn percent(bytes_in: u64, bytes_out: u64) -> f64 {
    if bytes_in == 0 {
        0.0
    } else {
        (1.0 - bytes_out as f64 / bytes_in as f64) * 100.0
    }
}

/// Human readable size in binary units
pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

fn format_signed_size(size: i64) -> String {
    if size < 0 {
        format!("-{}", format_size(size.unsigned_abs()))
    } else {
        format_size(size as u64)
    }
}
