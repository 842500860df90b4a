//! Tar containers, plain or wrapped in gzip, bzip2 or xz.

use super::entry::{ArchiveEntry, NativeEntry, TarEntryMeta};
use super::Member;
use std::io::{self, Read, Write};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BZIP2_MAGIC: [u8; 3] = [0x42, 0x5a, 0x68];
const XZ_MAGIC: [u8; 6] = [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];
const BLOCK: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TarCompression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

impl TarCompression {
    pub fn matches_magic(&self, head: &[u8]) -> bool {
        match self {
            Self::None => true,
            Self::Gzip => head.starts_with(&GZIP_MAGIC),
            Self::Bzip2 => head.starts_with(&BZIP2_MAGIC),
            Self::Xz => head.starts_with(&XZ_MAGIC),
        }
    }

    fn decoder<'a, R: Read + 'a>(&self, reader: R) -> Box<dyn Read + 'a> {
        match self {
            Self::None => Box::new(reader),
            Self::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
            Self::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
            Self::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
        }
    }
}

/// True if the (decompressed) stream starts with a tar header whose checksum verifies
pub fn is_tar<R: Read>(reader: R, compression: TarCompression) -> bool {
    let mut block = [0u8; BLOCK];
    let mut decoder = compression.decoder(reader);
    if decoder.read_exact(&mut block).is_err() {
        return false;
    }
    header_checksum_ok(&block)
}

fn header_checksum_ok(block: &[u8; BLOCK]) -> bool {
    if block.iter().all(|&b| b == 0) {
        return false;
    }
    let field = &block[148..156];
    let digits: String = field
        .iter()
        .map(|&b| b as char)
        .filter(|c| ('0'..='7').contains(c))
        .collect();
    let Ok(recorded) = u32::from_str_radix(&digits, 8) else {
        return false;
    };
    let computed: u32 = block
        .iter()
        .enumerate()
        .map(|(i, &b)| if (148..156).contains(&i) { 32 } else { u32::from(b) })
        .sum();
    recorded == computed
}

/// Regular file members with their metadata, in archive order
pub fn read_members<R: Read>(reader: R, compression: TarCompression) -> io::Result<Vec<Member>> {
    let mut archive = tar::Archive::new(compression.decoder(reader));
    let mut members = Vec::new();
    for (index, entry) in archive.entries()?.enumerate() {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let header = entry.header();
        let meta = TarEntryMeta {
            name: entry.path()?.to_string_lossy().into_owned(),
            mtime: header.mtime().unwrap_or(0),
            mode: header.mode().unwrap_or(0o644),
            uid: header.uid().unwrap_or(0),
            gid: header.gid().unwrap_or(0),
            username: header.username().ok().flatten().map(str::to_string),
            groupname: header.groupname().ok().flatten().map(str::to_string),
        };
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        members.push(Member {
            entry: ArchiveEntry::new(index, NativeEntry::Tar(meta)),
            data,
        });
    }
    Ok(members)
}

/// Build a tar stream of `members`, compressed as requested
pub fn write_members(members: &[Member], compression: TarCompression) -> io::Result<Vec<u8>> {
    match compression {
        TarCompression::None => append_all(Vec::new(), members),
        TarCompression::Gzip => {
            let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::best());
            append_all(encoder, members)?.finish()
        }
        TarCompression::Bzip2 => {
            let encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::best());
            append_all(encoder, members)?.finish()
        }
        TarCompression::Xz => {
            let encoder = xz2::write::XzEncoder::new(Vec::new(), 9);
            append_all(encoder, members)?.finish()
        }
    }
}

fn append_all<W: Write>(writer: W, members: &[Member]) -> io::Result<W> {
    let mut builder = tar::Builder::new(writer);
    for member in members {
        let meta = member.entry.to_tar();
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(member.data.len() as u64);
        header.set_mode(meta.mode);
        header.set_mtime(meta.mtime);
        header.set_uid(meta.uid);
        header.set_gid(meta.gid);
        if let Some(username) = &meta.username {
            header.set_username(username)?;
        }
        if let Some(groupname) = &meta.groupname {
            header.set_groupname(groupname)?;
        }
        builder.append_data(&mut header, &meta.name, member.data.as_slice())?;
    }
    builder.into_inner()
}
