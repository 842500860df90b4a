//! RAR containers. Unpack only: rar cannot be written, so repacking always
//! converts to a zip family format.

use super::entry::{ArchiveEntry, NativeEntry, RarEntryMeta};
use super::Member;
use crate::error::OptimizeError;
use std::path::Path;

const RAR4_MAGIC: &[u8] = b"Rar!\x1a\x07\x00";
const RAR5_MAGIC: &[u8] = b"Rar!\x1a\x07\x01\x00";

pub fn has_magic(head: &[u8]) -> bool {
    head.starts_with(RAR4_MAGIC) || head.starts_with(RAR5_MAGIC)
}

fn archive_error(err: impl std::fmt::Display) -> OptimizeError {
    OptimizeError::Archive(format!("rar: {}", err))
}

/// The unrar library only reads from paths, so in-memory archives are spilled
/// to a temp file first.
pub fn read_members_from_bytes(data: &[u8]) -> Result<Vec<Member>, OptimizeError> {
    let mut spill = tempfile::Builder::new().suffix(".rar").tempfile()?;
    std::io::Write::write_all(&mut spill, data)?;
    read_members(spill.path())
}

pub fn read_members(path: &Path) -> Result<Vec<Member>, OptimizeError> {
    let mut archive = unrar::Archive::new(path)
        .open_for_processing()
        .map_err(archive_error)?;
    let mut members = Vec::new();
    let mut index = 0usize;
    while let Some(header) = archive.read_header().map_err(archive_error)? {
        let entry = header.entry();
        archive = if entry.is_file() {
            let meta = RarEntryMeta {
                name: entry.filename.to_string_lossy().replace('\\', "/"),
                file_time: entry.file_time,
                attr: entry.file_attr,
            };
            let (data, rest) = header.read().map_err(archive_error)?;
            members.push(Member {
                entry: ArchiveEntry::new(index, NativeEntry::Rar(meta)),
                data,
            });
            rest
        } else {
            header.skip().map_err(archive_error)?
        };
        index += 1;
    }
    Ok(members)
}
