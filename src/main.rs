//! # Media Squeeze - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Fusione degli argomenti con il file di configurazione utente
//! - Inizializzazione del sistema di logging con `tracing`
//! - Rilevamento dei programmi esterni e avvio del walker
//!
//! ## Flusso di esecuzione:
//! 1. Parsa gli argomenti CLI (percorsi, formati, conversioni, jobs, etc.)
//! 2. Carica la configurazione salvata e applica sopra gli argomenti
//! 3. Configura il logging (livello da `-v`, sovrascrivibile con `RUST_LOG`)
//! 4. Valida la configurazione: ogni errore qui è fatale
//! 5. Cerca i programmi esterni e avvia il `Walker`
//! 6. Stampa i totali ed esce con codice diverso da zero se richiesto
//!
//! ## Esempio di utilizzo:
//! ```bash
//! media-squeeze ~/Pictures comics/ --archives --convert-to webp,cbz -j 8
//! ```

use anyhow::Result;
use chrono::{DateTime, NaiveDate};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use media_squeeze::file_format::ARCHIVE_FORMATS;
use media_squeeze::json_output::JsonMessage;
use media_squeeze::{Config, ConfigError, Context, ProgramTable, Walker};

#[derive(Parser)]
#[command(name = "media-squeeze")]
#[command(about = "Losslessly shrink images, including the ones inside comic and ebook archives")]
struct Args {
    /// Files and directories to optimize
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Only optimize the top level of each directory
    #[arg(short = 'R', long)]
    no_recurse: bool,

    /// Comma separated list of formats to optimize (replaces the defaults)
    #[arg(short, long, value_delimiter = ',')]
    formats: Option<Vec<String>>,

    /// Also optimize images inside zip, cbz, epub, rar, cbr, 7z, cb7 and tar archives
    #[arg(short = 'x', long)]
    archives: bool,

    /// Formats files may be converted to (webp, png, jpeg, zip, cbz)
    #[arg(short, long, value_delimiter = ',')]
    convert_to: Option<Vec<String>>,

    /// Keep metadata and the original compression of archive members
    #[arg(short = 'm', long)]
    keep_metadata: bool,

    /// Keep optimized files even when they come out bigger
    #[arg(short, long)]
    bigger: bool,

    /// Dry run - report savings but don't modify anything
    #[arg(short, long)]
    dry_run: bool,

    /// Only list the detected format of each file
    #[arg(short, long)]
    list: bool,

    /// Number of concurrent optimize tasks
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Glob of paths to ignore (repeatable)
    #[arg(short, long)]
    ignore: Vec<String>,

    /// Don't follow symbolic links
    #[arg(short = 'S', long)]
    no_symlinks: bool,

    /// Only optimize files modified after this time (epoch seconds, YYYY-MM-DD or RFC 3339)
    #[arg(short = 'A', long)]
    after: Option<String>,

    /// Don't read or write timestamp records
    #[arg(short = 'T', long)]
    no_timestamps: bool,

    /// External program never to use (repeatable)
    #[arg(long = "disable-program")]
    disable_program: Vec<String>,

    /// Emit newline delimited JSON events on stdout
    #[arg(long)]
    json: bool,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Exit with a non-zero status if any file failed
    #[arg(long)]
    fail_on_error: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Save the merged configuration and continue
    #[arg(long)]
    save_config: bool,
}

impl Args {
    /// Overlay the command line on a loaded configuration
    fn apply(&self, config: &mut Config) -> std::result::Result<(), ConfigError> {
        if self.no_recurse {
            config.recurse = false;
        }
        if let Some(formats) = &self.formats {
            config.formats = formats.iter().map(|f| f.trim().to_string()).collect();
        }
        if self.archives {
            config
                .formats
                .extend(ARCHIVE_FORMATS.iter().map(|f| f.to_string()));
        }
        if let Some(targets) = &self.convert_to {
            config.convert_to = targets.iter().map(|f| f.trim().to_string()).collect();
        }
        if self.keep_metadata {
            config.keep_metadata = true;
        }
        if self.bigger {
            config.bigger = true;
        }
        if self.dry_run {
            config.dry_run = true;
        }
        if self.list {
            config.list_only = true;
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        config.ignore.extend(self.ignore.iter().cloned());
        if self.no_symlinks {
            config.symlinks = false;
        }
        if let Some(after) = &self.after {
            config.after = Some(parse_after(after)?);
        }
        if self.no_timestamps {
            config.timestamps = false;
        }
        config
            .disabled_programs
            .extend(self.disable_program.iter().cloned());
        if self.json {
            config.json_output = true;
        }
        config.verbose = config.verbose.max(self.verbose);
        if self.fail_on_error {
            config.fail_on_error = true;
        }
        Ok(())
    }
}

/// Accept epoch seconds, a calendar date or an RFC 3339 timestamp
fn parse_after(value: &str) -> std::result::Result<f64, ConfigError> {
    if let Ok(epoch) = value.parse::<f64>() {
        return Ok(epoch);
    }
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.timestamp_millis() as f64 / 1000.0);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|time| time.and_utc().timestamp() as f64)
        .ok_or_else(|| ConfigError::Validation(format!("Invalid cutoff time: {}", value)))
}

fn init_logging(verbose: u8, json: bool) -> Result<()> {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // JSON events own stdout
    if json {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

fn fatal(err: &ConfigError, json: bool) -> ExitCode {
    if json {
        JsonMessage::error("Configuration error".to_string(), Some(err.to_string())).emit();
    } else {
        error!("❌ {}", err);
    }
    ExitCode::FAILURE
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(Config::default_path);
    let mut config = match &config_path {
        Some(path) => Config::from_file(path).await?,
        None => Config::default(),
    };
    let applied = args.apply(&mut config);

    init_logging(config.verbose, config.json_output)?;

    if let Err(e) = applied {
        return Ok(fatal(&e, config.json_output));
    }
    config.normalize();
    if let Err(e) = config.validate() {
        return Ok(fatal(&e, config.json_output));
    }

    if args.save_config {
        if let Some(path) = &config_path {
            config.save_to_file(path).await?;
            info!("💾 Configuration saved to {}", path.display());
        }
    }

    let programs = ProgramTable::discover(&config.disabled_programs);
    if config.verbose > 0 && !config.json_output {
        programs.log_report();
    }

    let json = config.json_output;
    let dry_run = config.dry_run;
    let fail_on_error = config.fail_on_error;

    let walker = match Walker::new(Context::new(config, programs)) {
        Ok(walker) => walker,
        Err(e) => return Ok(fatal(&e, json)),
    };

    let start = Instant::now();
    let totals = match walker.run(&args.paths).await {
        Ok(totals) => totals,
        Err(e) => match e.downcast_ref::<ConfigError>() {
            Some(config_error) => return Ok(fatal(config_error, json)),
            None => return Err(e),
        },
    };
    totals.report(dry_run, json, start.elapsed().as_secs_f64());

    if fail_on_error && totals.has_errors() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
