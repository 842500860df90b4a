//! # Path Info
//!
//! Identità di una singola unità di lavoro: un file su disco, un membro di un
//! archivio (anche annidato) o un frame.
//!
//! ## Responsabilità:
//! - Conserva la catena dei container antenati (`container_parents`)
//! - Calcola nome, nome completo per il report (`a.cbz:b.zip:c.png`) e pseudo path
//!   usato da timestamp e glob di ignore
//! - Legge i byte una sola volta e li conserva fino al repack
//! - Fornisce un reader uniforme (`SourceReader`) per il rilevamento del formato
//!
//! Ogni `PathInfo` appartiene a un solo task alla volta: viene spostato nel task
//! e restituito insieme al risultato.

use crate::archive::entry::ArchiveEntry;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub(crate) const CASE_TEST_FILENAME: &str = ".media-squeeze_case_sensitive_test";
const DOUBLE_SUFFIXES: &[&str] = &[".tar.gz", ".tar.bz2", ".tar.xz"];

/// Identity, location and ancestry of one unit of work
#[derive(Debug, Clone)]
pub struct PathInfo {
    /// Root the timestamps of this path are recorded under
    pub top_path: PathBuf,
    path: Option<PathBuf>,
    /// Names of the enclosing containers, outermost first
    pub container_parents: Vec<String>,
    pub archive_entry: Option<ArchiveEntry>,
    data: Option<Vec<u8>>,
    pub frame: Option<usize>,
    /// Conversion to another format is allowed
    pub convert: bool,
    pub is_case_sensitive: bool,
    container_mtime: Option<f64>,
    original_name: Option<String>,
}

impl PathInfo {
    /// A file or directory on disk
    pub fn from_path(path: PathBuf, top_path: PathBuf, convert: bool, is_case_sensitive: bool) -> Self {
        Self {
            top_path,
            path: Some(path),
            container_parents: Vec::new(),
            archive_entry: None,
            data: None,
            frame: None,
            convert,
            is_case_sensitive,
            container_mtime: None,
            original_name: None,
        }
    }

    /// A member of the container described by `parent`
    pub fn member(parent: &PathInfo, entry: ArchiveEntry, data: Vec<u8>, convert: bool) -> Self {
        Self {
            top_path: parent.top_path.clone(),
            path: None,
            container_parents: parent.container_path_history(),
            archive_entry: Some(entry),
            data: Some(data),
            frame: None,
            convert,
            is_case_sensitive: parent.is_case_sensitive,
            container_mtime: parent.container_mtime.or_else(|| parent.mtime()),
            original_name: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Point at the file that replaced the original
    pub fn set_path(&mut self, path: PathBuf) {
        if self.path.as_ref() != Some(&path) && self.original_name.is_none() {
            self.original_name = Some(self.name());
        }
        self.path = Some(path);
    }

    pub fn is_member(&self) -> bool {
        self.archive_entry.is_some()
    }

    pub fn is_dir(&self) -> bool {
        self.path.as_ref().is_some_and(|p| p.is_dir())
    }

    pub fn is_symlink(&self) -> bool {
        self.path.as_ref().is_some_and(|p| p.is_symlink())
    }

    /// Member name, path, frame label or "Unknown"
    pub fn name(&self) -> String {
        if let Some(entry) = &self.archive_entry {
            entry.name().to_string()
        } else if let Some(path) = &self.path {
            path.to_string_lossy().into_owned()
        } else if let Some(frame) = self.frame {
            format!("frame_#{:03}.img", frame)
        } else {
            "Unknown".to_string()
        }
    }

    /// Name before any rename by a converting handler
    pub fn original_name(&self) -> String {
        self.original_name.clone().unwrap_or_else(|| self.name())
    }

    pub fn was_renamed(&self) -> bool {
        self.original_name.is_some()
    }

    /// Ancestry plus this path's own name, as handed to children
    pub fn container_path_history(&self) -> Vec<String> {
        let mut history = self.container_parents.clone();
        history.push(self.name());
        history
    }

    /// Display name including every enclosing container
    pub fn full_output_name(&self) -> String {
        self.container_path_history().join(":")
    }

    /// Path used for timestamps and ignore globs; archive members live below
    /// their container as if it were a directory
    pub fn archive_pseudo_path(&self) -> PathBuf {
        match self.container_parents.split_first() {
            None => PathBuf::from(self.name()),
            Some((outer, rest)) => {
                let mut path = PathBuf::from(outer);
                for parent in rest {
                    path.push(parent);
                }
                path.push(self.name());
                path
            }
        }
    }

    /// Lowercase suffix including the dot, treating `.tar.gz` style pairs as one
    pub fn suffix(&self) -> String {
        suffix_of(&self.name())
    }

    /// Epoch mtime; members report the mtime of the outermost on-disk container
    pub fn mtime(&self) -> Option<f64> {
        if let Some(mtime) = self.container_mtime {
            return Some(mtime);
        }
        if let Some(path) = &self.path {
            return std::fs::metadata(path).ok().and_then(|m| file_mtime(&m));
        }
        self.archive_entry.as_ref().and_then(|e| e.mtime())
    }

    pub fn bytes_in(&self) -> u64 {
        match (&self.data, &self.path) {
            (Some(data), _) => data.len() as u64,
            (None, Some(path)) => std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            (None, None) => 0,
        }
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Bytes of this unit, reading the file once if needed
    pub async fn read_data(&mut self) -> io::Result<&[u8]> {
        if self.data.is_none() {
            let path = self
                .path
                .as_ref()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no path or data"))?;
            self.data = Some(tokio::fs::read(path).await?);
        }
        Ok(self.data.as_deref().unwrap_or_default())
    }

    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = Some(data);
    }

    pub fn take_data(&mut self) -> Option<Vec<u8>> {
        self.data.take()
    }

    /// Rename an archive member, remembering its first name
    pub fn rename(&mut self, name: impl Into<String>) {
        let name = name.into();
        if let Some(entry) = &mut self.archive_entry {
            if entry.name() != name {
                if self.original_name.is_none() {
                    self.original_name = Some(entry.name().to_string());
                }
                entry.rename(name);
            }
        }
    }

    /// Uniform buffered reader over the file or the in-memory bytes
    pub fn reader(&self) -> io::Result<SourceReader<'_>> {
        match (&self.data, &self.path) {
            (Some(data), _) => Ok(SourceReader::Memory(Cursor::new(data.as_slice()))),
            (None, Some(path)) => Ok(SourceReader::File(BufReader::new(File::open(path)?))),
            (None, None) => Err(io::Error::new(io::ErrorKind::NotFound, "no path or data")),
        }
    }
}

/// Lowercase suffix of a file name, with `.tar.*` pairs kept together
pub fn suffix_of(name: &str) -> String {
    let lower = name.to_lowercase();
    if let Some(double) = DOUBLE_SUFFIXES.iter().find(|s| lower.ends_with(*s)) {
        return double.to_string();
    }
    Path::new(&lower)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Replace the (possibly double) suffix of `name`
pub fn replace_suffix(name: &str, new_suffix: &str) -> String {
    let suffix = suffix_of(name);
    let stem = &name[..name.len() - suffix.len()];
    format!("{}{}", stem, new_suffix)
}

pub fn file_mtime(metadata: &std::fs::Metadata) -> Option<f64> {
    metadata
        .modified()
        .ok()?
        .duration_since(SystemTime::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs_f64())
}

pub fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Case sensitivity of the platform's usual filesystem, for runs that
/// must not write the test file
pub fn assumed_case_sensitive() -> bool {
    !cfg!(any(target_os = "macos", target_os = "windows"))
}

/// Check whether `dir` lives on a case sensitive filesystem
pub fn is_case_sensitive(dir: &Path) -> bool {
    let lower = dir.join(CASE_TEST_FILENAME);
    let upper = dir.join(CASE_TEST_FILENAME.to_uppercase());
    if File::create(&lower).is_err() {
        return true;
    }
    let sensitive = !upper.exists();
    let _ = std::fs::remove_file(&lower);
    sensitive
}

/// Buffered reader over either a file or a byte slice
pub enum SourceReader<'a> {
    File(BufReader<File>),
    Memory(Cursor<&'a [u8]>),
}

impl Read for SourceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::File(r) => r.read(buf),
            Self::Memory(r) => r.read(buf),
        }
    }
}

impl BufRead for SourceReader<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            Self::File(r) => r.fill_buf(),
            Self::Memory(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            Self::File(r) => r.consume(amt),
            Self::Memory(r) => r.consume(amt),
        }
    }
}

impl Seek for SourceReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::File(r) => r.seek(pos),
            Self::Memory(r) => r.seek(pos),
        }
    }
}
