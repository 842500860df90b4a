//! # Program Table
//!
//! Risoluzione ed esecuzione dei programmi esterni di ottimizzazione.
//!
//! ## Responsabilità:
//! - Cerca ogni programma noto una sola volta all'avvio (directory dei tool
//!   indicata da `MEDIA_SQUEEZE_TOOLS_DIR`, poi `PATH` via `which`)
//! - Espone una tabella immutabile condivisa via `Arc` tra tutti i task
//! - Esegue un programma come trasformazione `bytes -> bytes` su stdin/stdout,
//!   oppure su file temporanei per i programmi che non leggono da stdin
//!
//! ## Stage interni:
//! `ToPng`, `PngEncode`, `MpoPrimary` e `Archive` sono sempre disponibili:
//! sono implementati nel crate (crate `image`, parser MPO e codec degli
//! archivi).

use crate::error::{OptimizeError, TaskResult};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Directory searched before `PATH`
pub const TOOLS_DIR_ENV: &str = "MEDIA_SQUEEZE_TOOLS_DIR";

pub const OXIPNG: &str = "oxipng";
pub const OPTIPNG: &str = "optipng";
pub const JPEGTRAN: &str = "jpegtran";
pub const JPEGOPTIM: &str = "jpegoptim";
pub const GIFSICLE: &str = "gifsicle";
pub const CWEBP: &str = "cwebp";
pub const IMG2WEBP: &str = "img2webp";
pub const SVGO: &str = "svgo";

pub const KNOWN_PROGRAMS: &[&str] = &[OXIPNG, OPTIPNG, JPEGTRAN, JPEGOPTIM, GIFSICLE, CWEBP, IMG2WEBP, SVGO];

/// One candidate of a handler stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    External(&'static str),
    /// Decode any raster and encode it as PNG
    ToPng,
    /// Re-encode PNG in process at maximum compression
    PngEncode,
    /// Cut the primary image out of a multi-picture JPEG
    MpoPrimary,
    /// Archive unpack and pack
    Archive,
}

impl Program {
    pub fn name(&self) -> &'static str {
        match self {
            Self::External(name) => name,
            Self::ToPng => "internal_to_png",
            Self::PngEncode => "internal_png",
            Self::MpoPrimary => "internal_mpo",
            Self::Archive => "internal_archive",
        }
    }

    pub fn is_internal(&self) -> bool {
        !matches!(self, Self::External(_))
    }
}

/// Resolved locations of the external programs, looked up once
#[derive(Debug, Clone, Default)]
pub struct ProgramTable {
    paths: BTreeMap<String, PathBuf>,
}

impl ProgramTable {
    /// Look up every known program, leaving out the disabled ones
    pub fn discover(disabled: &BTreeSet<String>) -> Self {
        let tools_dir = std::env::var_os(TOOLS_DIR_ENV).map(PathBuf::from);
        let mut paths = BTreeMap::new();

        for name in KNOWN_PROGRAMS {
            if disabled.contains(*name) {
                debug!("🚫 {} disabled by configuration", name);
                continue;
            }
            let bundled = tools_dir.as_ref().and_then(|dir| which::which_in(name, Some(dir), dir).ok());
            match bundled.or_else(|| which::which(name).ok()) {
                Some(path) => {
                    debug!("🔧 Found {} at {}", name, path.display());
                    paths.insert(name.to_string(), path);
                }
                None => debug!("❌ {} not found", name),
            }
        }

        Self { paths }
    }

    /// Table with explicit locations
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = (S, PathBuf)>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(|(name, path)| (name.into(), path)).collect(),
        }
    }

    pub fn path(&self, name: &str) -> Option<&Path> {
        self.paths.get(name).map(PathBuf::as_path)
    }

    pub fn resolves(&self, program: Program) -> bool {
        match program {
            Program::External(name) => self.paths.contains_key(name),
            _ => true,
        }
    }

    /// First runnable program of a priority group
    pub fn first_available(&self, group: &[Program]) -> Option<Program> {
        group.iter().copied().find(|p| self.resolves(*p))
    }

    /// Log which external programs will be used
    pub fn log_report(&self) {
        info!("🔧 External programs:");
        for name in KNOWN_PROGRAMS {
            let status = if self.paths.contains_key(*name) { "✅" } else { "❌" };
            info!("  {} {}", status, name);
        }
    }
}

fn command_line(path: &Path, args: &[String]) -> String {
    let mut line = path.display().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Run a program with `input` on stdin and return its stdout
pub async fn run(path: &Path, args: &[String], input: &[u8]) -> TaskResult<Vec<u8>> {
    let command = command_line(path, args);
    debug!("▶️ {}", command);
    let start_time = std::time::Instant::now();

    let mut child = Command::new(path)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| OptimizeError::Task(format!("{}: stdin unavailable", command)))?;
    let data = input.to_vec();
    let writer = async move {
        let result = stdin.write_all(&data).await;
        drop(stdin);
        result
    };
    let (written, output) = tokio::join!(writer, child.wait_with_output());
    let output = output?;

    if !output.status.success() {
        return Err(OptimizeError::Program {
            command,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    if let Err(e) = written {
        debug!("{} closed stdin early: {}", command, e);
    }
    debug!("✅ {} finished in {:?}", command, start_time.elapsed());
    Ok(output.stdout)
}

/// Run a program that only works on files: `input` is written to a temp
/// file and the bytes of the output file are returned.
pub async fn run_files<F>(
    path: &Path,
    input: &[u8],
    in_suffix: &str,
    out_suffix: &str,
    args: F,
) -> TaskResult<Vec<u8>>
where
    F: FnOnce(&Path, &Path) -> Vec<String>,
{
    let work_dir = tempfile::Builder::new().prefix("media-squeeze").tempdir()?;
    let in_path = work_dir.path().join(format!("in{}", in_suffix));
    let out_path = work_dir.path().join(format!("out{}", out_suffix));
    tokio::fs::write(&in_path, input).await?;

    let args = args(&in_path, &out_path);
    run(path, &args, &[]).await?;
    Ok(tokio::fs::read(&out_path).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_programs_always_resolve() {
        let table = ProgramTable::default();
        assert!(table.resolves(Program::ToPng));
        assert!(table.resolves(Program::Archive));
        assert!(!table.resolves(Program::External(OXIPNG)));
        assert_eq!(
            table.first_available(&[Program::External(OXIPNG), Program::PngEncode]),
            Some(Program::PngEncode)
        );
    }

    #[test]
    fn test_disabled_programs_are_left_out() {
        let disabled: BTreeSet<String> = KNOWN_PROGRAMS.iter().map(|s| s.to_string()).collect();
        let table = ProgramTable::discover(&disabled);
        assert!(KNOWN_PROGRAMS.iter().all(|p| table.path(p).is_none()));
    }

    #[test]
    fn test_from_paths() {
        let table = ProgramTable::from_paths([(OXIPNG, PathBuf::from("/opt/oxipng"))]);
        assert_eq!(table.path(OXIPNG), Some(Path::new("/opt/oxipng")));
        assert_eq!(
            table.first_available(&[Program::External(OXIPNG), Program::PngEncode]),
            Some(Program::External(OXIPNG))
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_pipes_stdin_to_stdout() {
        let out = run(Path::new("cat"), &[], b"hello").await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_failure_carries_stderr() {
        let args = vec!["-c".to_string(), "echo broken >&2; exit 3".to_string()];
        let err = run(Path::new("sh"), &args, b"").await.unwrap_err();
        match err {
            OptimizeError::Program { code, stderr, command } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
                assert!(command.starts_with("sh -c"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_files() {
        let out = run_files(Path::new("sh"), b"data", ".png", ".webp", |input, output| {
            vec![
                "-c".to_string(),
                "cp \"$0\" \"$1\"".to_string(),
                input.display().to_string(),
                output.display().to_string(),
            ]
        })
        .await
        .unwrap();
        assert_eq!(out, b"data");
    }
}
