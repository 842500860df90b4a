//! # Archive Module
//!
//! Lettura e scrittura dei container supportati.
//!
//! ## Sottomoduli:
//! - `zip`: codec zip scritto a mano con rimozione in place dei membri
//! - `tar`: tar semplice o compresso (gzip, bzip2, xz) via `tar`
//! - `seven_zip`: 7z via `sevenz-rust`
//! - `rar`: sola lettura via `unrar`
//! - `entry`: metadata nativi dei membri e mapping tra formati

pub mod entry;
pub mod rar;
pub mod seven_zip;
pub mod tar;
pub mod zip;

use self::entry::{zip_method, ArchiveEntry, NativeEntry};
use self::tar::TarCompression;
use self::zip::{ZipFile, STORED};
use crate::error::OptimizeError;
use std::io::{Cursor, Read, Seek};

/// Deflate level used for every member written by this crate
pub const ZIP_LEVEL: u32 = 9;

/// A member's metadata and bytes
#[derive(Debug, Clone)]
pub struct Member {
    pub entry: ArchiveEntry,
    pub data: Vec<u8>,
}

/// Everything read out of one container
#[derive(Debug, Default)]
pub struct Listing {
    pub members: Vec<Member>,
    pub comment: Option<Vec<u8>>,
}

/// Physical container layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    Zip,
    Tar(TarCompression),
    SevenZip,
    Rar,
}

impl ArchiveKind {
    pub fn can_pack(&self) -> bool {
        !matches!(self, Self::Rar)
    }
}

/// Where the container bytes live
pub enum ArchiveSource<'a> {
    Path(&'a std::path::Path),
    Bytes(&'a [u8]),
}

/// Read all regular-file members of a container
pub fn unpack(kind: ArchiveKind, source: ArchiveSource<'_>) -> Result<Listing, OptimizeError> {
    match (kind, source) {
        (ArchiveKind::Rar, ArchiveSource::Path(path)) => Ok(Listing {
            members: rar::read_members(path)?,
            comment: None,
        }),
        (ArchiveKind::Rar, ArchiveSource::Bytes(data)) => Ok(Listing {
            members: rar::read_members_from_bytes(data)?,
            comment: None,
        }),
        (kind, ArchiveSource::Path(path)) => {
            let file = std::io::BufReader::new(std::fs::File::open(path)?);
            unpack_reader(kind, file)
        }
        (kind, ArchiveSource::Bytes(data)) => unpack_reader(kind, Cursor::new(data)),
    }
}

fn unpack_reader<R: Read + Seek>(kind: ArchiveKind, mut reader: R) -> Result<Listing, OptimizeError> {
    match kind {
        ArchiveKind::Zip => {
            let mut zip = ZipFile::open(reader)?;
            let entries = zip.entries().to_vec();
            let mut members = Vec::with_capacity(entries.len());
            for (index, entry) in entries.into_iter().enumerate() {
                if entry.is_dir() {
                    continue;
                }
                let data = zip.read(&entry)?;
                members.push(Member {
                    entry: ArchiveEntry::new(index, NativeEntry::Zip(entry)),
                    data,
                });
            }
            let comment = (!zip.comment().is_empty()).then(|| zip.comment().to_vec());
            Ok(Listing { members, comment })
        }
        ArchiveKind::Tar(compression) => Ok(Listing {
            members: tar::read_members(reader, compression)?,
            comment: None,
        }),
        ArchiveKind::SevenZip => {
            let len = reader.seek(std::io::SeekFrom::End(0))?;
            reader.rewind()?;
            Ok(Listing {
                members: seven_zip::read_members(reader, len)?,
                comment: None,
            })
        }
        ArchiveKind::Rar => Err(OptimizeError::Archive(
            "rar archives can only be read from a path or buffer".to_string(),
        )),
    }
}

/// Options that change how members are written
#[derive(Debug, Clone, Copy, Default)]
pub struct PackOptions {
    pub keep_metadata: bool,
    /// EPUB requires an uncompressed leading `mimetype` member
    pub epub: bool,
}

/// Build a fresh container holding `members` in the given order
pub fn pack(
    kind: ArchiveKind,
    members: &[Member],
    comment: Option<&[u8]>,
    options: PackOptions,
) -> Result<Vec<u8>, OptimizeError> {
    match kind {
        ArchiveKind::Zip => {
            let mut zip = ZipFile::create(Cursor::new(Vec::new()))?;
            for member in members {
                let entry = zip_record(member, options);
                zip.append(entry, &member.data, ZIP_LEVEL)?;
            }
            if let Some(comment) = comment {
                zip.set_comment(comment.to_vec());
            }
            let (cursor, end) = zip.finish()?;
            let mut bytes = cursor.into_inner();
            bytes.truncate(end as usize);
            Ok(bytes)
        }
        ArchiveKind::Tar(compression) => Ok(tar::write_members(members, compression)?),
        ArchiveKind::SevenZip => seven_zip::write_members(members),
        ArchiveKind::Rar => Err(OptimizeError::Archive("cannot write rar archives".to_string())),
    }
}

/// The zip record a member is written with
pub fn zip_record(member: &Member, options: PackOptions) -> zip::ZipEntry {
    let mut entry = member.entry.to_zip();
    entry.method = if options.epub && entry.name == "mimetype" {
        STORED
    } else {
        zip_method(&entry, options.keep_metadata)
    };
    if entry.method != STORED {
        entry.method = zip::DEFLATED;
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::zip::ZipEntry;

    fn zip_member(index: usize, name: &str, data: &[u8], method: u16) -> Member {
        let mut entry = ZipEntry::new(name);
        entry.method = method;
        Member {
            entry: ArchiveEntry::new(index, NativeEntry::Zip(entry)),
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_zip_pack_unpack_keeps_order_and_comment() {
        let members = vec![
            zip_member(0, "mimetype", b"application/epub+zip", STORED),
            zip_member(1, "OEBPS/a.xhtml", b"<html/>", STORED),
        ];
        let options = PackOptions {
            keep_metadata: false,
            epub: true,
        };
        let bytes = pack(ArchiveKind::Zip, &members, Some(b"note"), options).unwrap();
        let listing = unpack(ArchiveKind::Zip, ArchiveSource::Bytes(&bytes)).unwrap();
        assert_eq!(listing.comment.as_deref(), Some(&b"note"[..]));
        let names: Vec<_> = listing.members.iter().map(|m| m.entry.name()).collect();
        assert_eq!(names, vec!["mimetype", "OEBPS/a.xhtml"]);

        let NativeEntry::Zip(first) = &listing.members[0].entry.native else {
            panic!("zip member expected");
        };
        assert_eq!(first.method, STORED);
        let NativeEntry::Zip(second) = &listing.members[1].entry.native else {
            panic!("zip member expected");
        };
        assert_eq!(second.method, zip::DEFLATED);
    }

    #[test]
    fn test_directories_are_skipped() {
        let members = vec![
            zip_member(0, "dir/", b"", STORED),
            zip_member(1, "dir/file", b"x", STORED),
        ];
        let bytes = pack(ArchiveKind::Zip, &members, None, PackOptions::default()).unwrap();
        let listing = unpack(ArchiveKind::Zip, ArchiveSource::Bytes(&bytes)).unwrap();
        assert_eq!(listing.members.len(), 1);
        assert_eq!(listing.members[0].entry.index, 1);
        assert!(listing.comment.is_none());
    }

    #[test]
    fn test_zip_to_tar_conversion() {
        let members = vec![zip_member(0, "a.txt", b"hello", zip::DEFLATED)];
        let bytes = pack(
            ArchiveKind::Tar(TarCompression::Gzip),
            &members,
            None,
            PackOptions::default(),
        )
        .unwrap();
        let listing = unpack(
            ArchiveKind::Tar(TarCompression::Gzip),
            ArchiveSource::Bytes(&bytes),
        )
        .unwrap();
        assert_eq!(listing.members[0].entry.name(), "a.txt");
        assert_eq!(listing.members[0].data, b"hello");
    }
}
