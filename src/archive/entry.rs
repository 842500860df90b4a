//! Native member records of each archive type and the explicit field maps
//! between them used when a container is repacked in another format.
//! Frames of an animated image are members too, carrying their delay.

use super::zip::{epoch_to_dos, ZipEntry, DEFLATED, DOS_EPOCH};

const DEFAULT_MODE: u32 = 0o644;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarEntryMeta {
    pub name: String,
    pub mtime: u64,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub username: Option<String>,
    pub groupname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SevenZipEntryMeta {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RarEntryMeta {
    pub name: String,
    /// DOS date in the high half, DOS time in the low half
    pub file_time: u32,
    pub attr: u32,
}

/// One frame of an animated image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMeta {
    pub name: String,
    pub delay_ms: u32,
}

/// Member metadata in the representation of the archive it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeEntry {
    Zip(ZipEntry),
    Tar(TarEntryMeta),
    SevenZip(SevenZipEntryMeta),
    Rar(RarEntryMeta),
    Frame(FrameMeta),
}

/// A member's metadata and its position in the source archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub index: usize,
    pub native: NativeEntry,
}

impl ArchiveEntry {
    pub fn new(index: usize, native: NativeEntry) -> Self {
        Self { index, native }
    }

    pub fn name(&self) -> &str {
        match &self.native {
            NativeEntry::Zip(e) => &e.name,
            NativeEntry::Tar(e) => &e.name,
            NativeEntry::SevenZip(e) => &e.name,
            NativeEntry::Rar(e) => &e.name,
            NativeEntry::Frame(e) => &e.name,
        }
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        let name = name.into();
        match &mut self.native {
            NativeEntry::Zip(e) => e.name = name,
            NativeEntry::Tar(e) => e.name = name,
            NativeEntry::SevenZip(e) => e.name = name,
            NativeEntry::Rar(e) => e.name = name,
            NativeEntry::Frame(e) => e.name = name,
        }
    }

    /// Member modification time in epoch seconds, when the format records one
    pub fn mtime(&self) -> Option<f64> {
        match &self.native {
            NativeEntry::Zip(e) => e.mtime().map(|t| t as f64),
            NativeEntry::Tar(e) => Some(e.mtime as f64),
            NativeEntry::SevenZip(_) | NativeEntry::Frame(_) => None,
            NativeEntry::Rar(e) => {
                super::zip::dos_to_epoch((e.file_time >> 16) as u16, e.file_time as u16)
                    .map(|t| t as f64)
            }
        }
    }

    /// Field map into a zip central directory record
    pub fn to_zip(&self) -> ZipEntry {
        match &self.native {
            NativeEntry::Zip(e) => e.clone(),
            NativeEntry::Tar(e) => {
                let mut zip = ZipEntry::new(e.name.clone());
                let (date, time) = epoch_to_dos(e.mtime as i64);
                zip.dos_date = date;
                zip.dos_time = time;
                zip.external_attr = (0o100000 | (e.mode & 0o7777)) << 16;
                zip
            }
            NativeEntry::SevenZip(e) => ZipEntry::new(e.name.clone()),
            NativeEntry::Frame(e) => ZipEntry::new(e.name.clone()),
            NativeEntry::Rar(e) => {
                let mut zip = ZipEntry::new(e.name.clone());
                zip.dos_date = (e.file_time >> 16) as u16;
                zip.dos_time = e.file_time as u16;
                if (zip.dos_date, zip.dos_time) == (0, 0) {
                    (zip.dos_date, zip.dos_time) = DOS_EPOCH;
                }
                zip
            }
        }
    }

    /// Field map into a tar header description
    pub fn to_tar(&self) -> TarEntryMeta {
        match &self.native {
            NativeEntry::Tar(e) => e.clone(),
            NativeEntry::Zip(e) => TarEntryMeta {
                name: e.name.clone(),
                mtime: e.mtime().unwrap_or(0).max(0) as u64,
                mode: e.unix_mode().unwrap_or(DEFAULT_MODE),
                ..default_tar(&e.name)
            },
            NativeEntry::SevenZip(e) => default_tar(&e.name),
            NativeEntry::Frame(e) => default_tar(&e.name),
            NativeEntry::Rar(_) => TarEntryMeta {
                mtime: self.mtime().unwrap_or(0.0).max(0.0) as u64,
                ..default_tar(self.name())
            },
        }
    }

    /// Field map into a 7z entry; only the name survives
    pub fn to_seven_zip(&self) -> SevenZipEntryMeta {
        SevenZipEntryMeta {
            name: self.name().to_string(),
        }
    }
}

fn default_tar(name: &str) -> TarEntryMeta {
    TarEntryMeta {
        name: name.to_string(),
        mtime: 0,
        mode: DEFAULT_MODE,
        uid: 0,
        gid: 0,
        username: None,
        groupname: None,
    }
}

/// New zip records are deflated unless the caller keeps the original method
pub fn zip_method(entry: &ZipEntry, keep_metadata: bool) -> u16 {
    if keep_metadata {
        entry.method
    } else {
        DEFLATED
    }
}
