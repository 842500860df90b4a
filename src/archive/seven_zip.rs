//! 7z containers via `sevenz-rust`.

use super::entry::{ArchiveEntry, NativeEntry, SevenZipEntryMeta};
use super::Member;
use crate::error::OptimizeError;
use sevenz_rust::{Password, SevenZArchiveEntry, SevenZReader, SevenZWriter};
use std::io::{Cursor, Read, Seek};

pub const MAGIC: [u8; 6] = [b'7', b'z', 0xbc, 0xaf, 0x27, 0x1c];

fn archive_error(err: impl std::fmt::Display) -> OptimizeError {
    OptimizeError::Archive(format!("7z: {}", err))
}

pub fn read_members<R: Read + Seek>(reader: R, len: u64) -> Result<Vec<Member>, OptimizeError> {
    let mut archive = SevenZReader::new(reader, len, Password::empty()).map_err(archive_error)?;
    let mut members = Vec::new();
    let mut index = 0usize;
    archive
        .for_each_entries(|entry, data_reader| {
            index += 1;
            if entry.is_directory() {
                return Ok(true);
            }
            let mut data = Vec::with_capacity(entry.size() as usize);
            data_reader.read_to_end(&mut data)?;
            members.push(Member {
                entry: ArchiveEntry::new(
                    index - 1,
                    NativeEntry::SevenZip(SevenZipEntryMeta {
                        name: entry.name().to_string(),
                    }),
                ),
                data,
            });
            Ok(true)
        })
        .map_err(archive_error)?;
    Ok(members)
}

pub fn write_members(members: &[Member]) -> Result<Vec<u8>, OptimizeError> {
    let mut writer = SevenZWriter::new(Cursor::new(Vec::new())).map_err(archive_error)?;
    for member in members {
        let meta = member.entry.to_seven_zip();
        let mut entry = SevenZArchiveEntry::new();
        entry.name = meta.name;
        entry.has_stream = !member.data.is_empty();
        entry.is_directory = false;
        writer
            .push_archive_entry(entry, Some(member.data.as_slice()))
            .map_err(archive_error)?;
    }
    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let members = vec![
            Member {
                entry: ArchiveEntry::new(
                    0,
                    NativeEntry::SevenZip(SevenZipEntryMeta {
                        name: "one.png".to_string(),
                    }),
                ),
                data: b"first".to_vec(),
            },
            Member {
                entry: ArchiveEntry::new(
                    1,
                    NativeEntry::SevenZip(SevenZipEntryMeta {
                        name: "two.txt".to_string(),
                    }),
                ),
                data: vec![42u8; 4096],
            },
        ];
        let bytes = write_members(&members).unwrap();
        assert!(bytes.starts_with(&MAGIC));

        let len = bytes.len() as u64;
        let read = read_members(Cursor::new(bytes), len).unwrap();
        let names: Vec<_> = read.iter().map(|m| m.entry.name().to_string()).collect();
        assert_eq!(names, vec!["one.png", "two.txt"]);
        assert_eq!(read[1].data, vec![42u8; 4096]);
    }
}
