//! # Progress Module
//!
//! Feedback visivo durante il walk con `indicatif`.
//!
//! Il numero di file non è noto in anticipo (gli archivi vengono aperti
//! durante il walk), quindi si usa uno spinner con il conteggio dei task
//! completati. Lo spinner è nascosto in modalità JSON e `list_only`.
//!
//! ```text
//! ⠋ [00:00:12] 150 done, 3 errors: comics/vol1.cbz:p001.png
//! ```

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Spinner driven by the control task
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    pub fn new(hidden: bool) -> Self {
        let bar = ProgressBar::new_spinner();
        if hidden {
            bar.set_draw_target(ProgressDrawTarget::hidden());
            return Self { bar };
        }

        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// Count one finished task
    pub fn update(&self, done: usize, errors: usize, name: &str) {
        self.bar.set_position(done as u64);
        self.bar
            .set_message(format!("{} done, {} errors: {}", done, errors, name));
    }

    pub fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Print a line above the spinner without garbling it
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.bar.suspend(f)
    }
}
