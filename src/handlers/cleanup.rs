//! Acceptance of an optimized candidate and the write that replaces the
//! original.

use super::HandlerKind;
use crate::config::Config;
use crate::error::TaskResult;
use crate::path_info::PathInfo;
use crate::report::ReportStats;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Marks files being written; leftovers are deleted by the skipper
pub const WORKING_SUFFIX: &str = ".media-squeeze-tmp";

/// Optimized output, in memory or already on disk beside the original
pub enum Candidate {
    Bytes(Vec<u8>),
    File(NamedTempFile),
}

impl Candidate {
    fn len(&self) -> TaskResult<u64> {
        Ok(match self {
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::File(file) => file.as_file().metadata()?.len(),
        })
    }
}

/// Working file in the same directory as `path`, so the final rename stays on
/// one filesystem
pub fn working_file(path: &Path) -> TaskResult<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let prefix = path
        .file_name()
        .map(|n| format!(".{}.", n.to_string_lossy()))
        .unwrap_or_else(|| ".".to_string());
    Ok(tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(WORKING_SUFFIX)
        .tempfile_in(dir)?)
}

fn same_path(a: &Path, b: &Path, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
    }
}

/// Accept or discard `candidate`. Returns the report and whether the unit
/// changed.
///
/// A candidate is accepted outside dry runs when it is non-empty and smaller
/// than the original, or `bigger` is set. The original is never touched
/// otherwise.
pub async fn cleanup(
    path_info: &mut PathInfo,
    candidate: Candidate,
    kind: HandlerKind,
    converted: bool,
    config: &Config,
) -> TaskResult<(ReportStats, bool)> {
    let bytes_in = path_info.bytes_in();
    let bytes_out = candidate.len()?;
    let accept = !config.dry_run && bytes_out > 0 && (bytes_out < bytes_in || config.bigger);

    let final_name = kind.final_name(&path_info.name());
    if accept {
        if path_info.is_member() {
            let data = match candidate {
                Candidate::Bytes(bytes) => bytes,
                Candidate::File(file) => std::fs::read(file.path())?,
            };
            path_info.set_data(data);
            path_info.rename(final_name);
        } else if let Some(path) = path_info.path().map(Path::to_path_buf) {
            let final_path = PathBuf::from(&final_name);
            replace_on_disk(&path, &final_path, candidate, path_info.is_case_sensitive)?;
            path_info.set_path(final_path);
        }
    } else {
        debug!("Discarding candidate for {} ({} -> {} bytes)", path_info.full_output_name(), bytes_in, bytes_out);
    }

    let mut report = ReportStats::new(path_info.full_output_name(), bytes_in, bytes_out);
    report.converted = converted && accept;
    report.saved = accept;
    report.dry_run = config.dry_run;
    report.container = kind.is_archive();
    Ok((report, accept))
}

fn replace_on_disk(path: &Path, final_path: &Path, candidate: Candidate, case_sensitive: bool) -> TaskResult<()> {
    let working = match candidate {
        Candidate::File(file) => file,
        Candidate::Bytes(bytes) => {
            let mut file = working_file(final_path)?;
            file.write_all(&bytes)?;
            file.as_file().sync_all()?;
            file
        }
    };
    working.persist(final_path).map_err(|e| e.error)?;
    if !same_path(path, final_path, case_sensitive) {
        std::fs::remove_file(path)?;
        debug!("🗑️ Removed {} after conversion", path.display());
    }
    Ok(())
}
