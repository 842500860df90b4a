//! # Zip codec
//!
//! Minimal reader/writer for the PKWARE zip layout, with direct access to the
//! physical header offsets and the central directory start so members can be
//! removed and appended in place.
//!
//! ## Layout gestito:
//! ```text
//! [local header][data] [local header][data] ... [central directory][EOCD]
//! ```
//! - Metodi supportati: stored (0) e deflate (8) via `flate2`
//! - CRC32 via `crc32fast`
//! - Zip64 viene rifiutato con `ZipError::Zip64`
//!
//! ## Rimozione in place:
//! `ZipFile::remove_members` ordina i membri per offset fisico, sposta all'indietro
//! i byte dei superstiti a blocchi da 1 MiB e aggiorna offset e inizio della
//! central directory. I nuovi membri vengono poi accodati con `append` e
//! `finish` riscrive central directory ed EOCD.

use chrono::{DateTime, Datelike, NaiveDate, Timelike};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::debug;

pub const STORED: u16 = 0;
pub const DEFLATED: u16 = 8;

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const EOCD_SIG: u32 = 0x0605_4b50;
const ZIP64_LOCATOR_SIG: u32 = 0x0706_4b50;

const LOCAL_HEADER_LEN: usize = 30;
const CENTRAL_HEADER_LEN: usize = 46;
const EOCD_LEN: usize = 22;
const MAX_COMMENT_LEN: usize = u16::MAX as usize;

const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
const FLAG_UTF8: u16 = 0x0800;

/// Bytes moved per seek/read/seek/write cycle when shifting members
const SHIFT_CHUNK: usize = 1 << 20;

/// 1980-01-01 00:00, the earliest DOS timestamp
pub const DOS_EPOCH: (u16, u16) = ((1 << 5) | 1, 0);

#[derive(thiserror::Error, Debug)]
pub enum ZipError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("not a zip archive")]
    NotZip,

    #[error("zip64 archives are not supported")]
    Zip64,

    #[error("corrupt local header for {0}")]
    BadLocalHeader(String),

    #[error("unsupported compression method {method} for {name}")]
    UnsupportedMethod { name: String, method: u16 },

    #[error("encrypted member {0}")]
    Encrypted(String),

    #[error("crc mismatch for {0}")]
    Crc(String),

    #[error("{0} is too large for a zip without zip64")]
    TooLarge(String),
}

/// One central directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub name: String,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub dos_time: u16,
    pub dos_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub internal_attr: u16,
    pub external_attr: u32,
    pub header_offset: u64,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
}

impl ZipEntry {
    /// Regular file record with unix permissions 0644 and the DOS epoch as date
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_made_by: (3 << 8) | 20,
            version_needed: 20,
            flags: 0,
            method: DEFLATED,
            dos_time: DOS_EPOCH.1,
            dos_date: DOS_EPOCH.0,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            internal_attr: 0,
            external_attr: 0o100644 << 16,
            header_offset: 0,
            extra: Vec::new(),
            comment: Vec::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Modification time in epoch seconds, reading the DOS fields as UTC
    pub fn mtime(&self) -> Option<i64> {
        dos_to_epoch(self.dos_date, self.dos_time)
    }

    pub fn set_mtime(&mut self, epoch: i64) {
        let (date, time) = epoch_to_dos(epoch);
        self.dos_date = date;
        self.dos_time = time;
    }

    /// Unix permission bits, when the record was made on unix
    pub fn unix_mode(&self) -> Option<u32> {
        let mode = self.external_attr >> 16;
        (self.version_made_by >> 8 == 3 && mode != 0).then_some(mode & 0o7777)
    }
}

pub fn dos_to_epoch(date: u16, time: u16) -> Option<i64> {
    let year = 1980 + i32::from(date >> 9);
    let month = u32::from((date >> 5) & 0x0f);
    let day = u32::from(date & 0x1f);
    let hour = u32::from(time >> 11);
    let minute = u32::from((time >> 5) & 0x3f);
    let second = u32::from(time & 0x1f) * 2;
    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(hour, minute, second.min(59))
        .map(|dt| dt.and_utc().timestamp())
}

/// Clamp to the DOS range 1980..=2107
pub fn epoch_to_dos(epoch: i64) -> (u16, u16) {
    let Some(dt) = DateTime::from_timestamp(epoch, 0) else {
        return DOS_EPOCH;
    };
    let year = dt.year();
    if year < 1980 {
        return DOS_EPOCH;
    }
    if year > 2107 {
        return ((127 << 9) | (12 << 5) | 31, (23 << 11) | (59 << 5) | 29);
    }
    let date = (((year - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
    let time = ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
    (date, time)
}

/// A zip archive over any seekable stream
pub struct ZipFile<F> {
    inner: F,
    entries: Vec<ZipEntry>,
    name_index: HashMap<String, usize>,
    start_dir: u64,
    comment: Vec<u8>,
}

impl<F> ZipFile<F> {
    /// Members in central directory order
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Last member recorded under `name`
    pub fn by_name(&self, name: &str) -> Option<&ZipEntry> {
        self.name_index.get(name).map(|&i| &self.entries[i])
    }

    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    pub fn set_comment(&mut self, comment: Vec<u8>) {
        self.comment = comment;
    }

    /// Offset where the central directory starts, or where the next member goes
    pub fn start_dir(&self) -> u64 {
        self.start_dir
    }

    pub fn into_inner(self) -> F {
        self.inner
    }

    fn rebuild_index(&mut self) {
        self.name_index.clear();
        for (i, entry) in self.entries.iter().enumerate().rev() {
            self.name_index.entry(entry.name.clone()).or_insert(i);
        }
    }
}

impl<F: Read + Seek> ZipFile<F> {
    /// Parse the central directory of an existing archive
    pub fn open(mut inner: F) -> Result<Self, ZipError> {
        let eocd = find_eocd(&mut inner)?;
        let mut entries = Vec::with_capacity(eocd.entries as usize);

        inner.seek(SeekFrom::Start(eocd.cd_offset))?;
        let mut cd = vec![0u8; eocd.cd_size as usize];
        inner.read_exact(&mut cd)?;

        let mut pos = 0usize;
        for _ in 0..eocd.entries {
            let (entry, used) = parse_central_header(&cd[pos..])?;
            pos += used;
            entries.push(entry);
        }

        let mut zip = Self {
            inner,
            entries,
            name_index: HashMap::new(),
            start_dir: eocd.cd_offset,
            comment: eocd.comment,
        };
        zip.rebuild_index();
        Ok(zip)
    }

    /// Read and decompress one member
    pub fn read(&mut self, entry: &ZipEntry) -> Result<Vec<u8>, ZipError> {
        if entry.flags & FLAG_ENCRYPTED != 0 {
            return Err(ZipError::Encrypted(entry.name.clone()));
        }
        self.inner.seek(SeekFrom::Start(entry.header_offset))?;
        let mut header = [0u8; LOCAL_HEADER_LEN];
        self.inner.read_exact(&mut header)?;
        if le_u32(&header, 0) != LOCAL_HEADER_SIG {
            return Err(ZipError::BadLocalHeader(entry.name.clone()));
        }
        let skip = i64::from(le_u16(&header, 26)) + i64::from(le_u16(&header, 28));
        self.inner.seek(SeekFrom::Current(skip))?;

        let mut raw = vec![0u8; entry.compressed_size as usize];
        self.inner.read_exact(&mut raw)?;

        let data = match entry.method {
            STORED => raw,
            DEFLATED => {
                let mut out = Vec::with_capacity(entry.uncompressed_size as usize);
                DeflateDecoder::new(raw.as_slice()).read_to_end(&mut out)?;
                out
            }
            method => {
                return Err(ZipError::UnsupportedMethod {
                    name: entry.name.clone(),
                    method,
                })
            }
        };

        if crc32fast::hash(&data) != entry.crc32 {
            return Err(ZipError::Crc(entry.name.clone()));
        }
        Ok(data)
    }
}

impl<F: Read + Write + Seek> ZipFile<F> {
    /// Start an empty archive at the current position of `inner`
    pub fn create(mut inner: F) -> Result<Self, ZipError> {
        let start_dir = inner.stream_position()?;
        Ok(Self {
            inner,
            entries: Vec::new(),
            name_index: HashMap::new(),
            start_dir,
            comment: Vec::new(),
        })
    }

    /// Remove members physically, shifting later members back over the gap.
    ///
    /// Records are matched by their header offset, so duplicate names are
    /// removed individually. Returns the number of bytes reclaimed.
    pub fn remove_members(&mut self, members: &[ZipEntry]) -> Result<u64, ZipError> {
        if members.is_empty() {
            return Ok(0);
        }
        let doomed: HashSet<u64> = members.iter().map(|m| m.header_offset).collect();

        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by_key(|&i| self.entries[i].header_offset);

        let mut keep = vec![true; self.entries.len()];
        let mut removed = 0u64;
        for (pos, &idx) in order.iter().enumerate() {
            let offset = self.entries[idx].header_offset;
            let end = order
                .get(pos + 1)
                .map(|&next| self.entries[next].header_offset)
                .unwrap_or(self.start_dir);
            let size = end.saturating_sub(offset);

            if doomed.contains(&offset) {
                debug!("✂️  Removing {} ({} bytes at {})", self.entries[idx].name, size, offset);
                keep[idx] = false;
                removed += size;
            } else if removed > 0 {
                self.shift_back(offset, size, removed)?;
                self.entries[idx].header_offset -= removed;
            }
        }

        self.start_dir -= removed;
        let mut keep = keep.into_iter();
        self.entries.retain(|_| keep.next().unwrap_or(true));
        self.rebuild_index();
        self.inner.seek(SeekFrom::Start(self.start_dir))?;
        Ok(removed)
    }

    fn shift_back(&mut self, offset: u64, len: u64, by: u64) -> Result<(), ZipError> {
        let mut buf = vec![0u8; SHIFT_CHUNK.min(len as usize)];
        let mut done = 0u64;
        while done < len {
            let n = SHIFT_CHUNK.min((len - done) as usize);
            self.inner.seek(SeekFrom::Start(offset + done))?;
            self.inner.read_exact(&mut buf[..n])?;
            self.inner.seek(SeekFrom::Start(offset + done - by))?;
            self.inner.write_all(&buf[..n])?;
            done += n as u64;
        }
        Ok(())
    }

    /// Append a member after the last one, compressing with `entry.method`
    pub fn append(&mut self, mut entry: ZipEntry, data: &[u8], level: u32) -> Result<(), ZipError> {
        let compressed: Cow<[u8]> = match entry.method {
            STORED => Cow::Borrowed(data),
            DEFLATED => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level));
                encoder.write_all(data)?;
                Cow::Owned(encoder.finish()?)
            }
            method => {
                return Err(ZipError::UnsupportedMethod {
                    name: entry.name,
                    method,
                })
            }
        };
        if compressed.len() as u64 >= u64::from(u32::MAX)
            || data.len() as u64 >= u64::from(u32::MAX)
            || self.start_dir >= u64::from(u32::MAX)
        {
            return Err(ZipError::TooLarge(entry.name));
        }

        entry.crc32 = crc32fast::hash(data);
        entry.compressed_size = compressed.len() as u64;
        entry.uncompressed_size = data.len() as u64;
        entry.flags &= !(FLAG_DATA_DESCRIPTOR | FLAG_ENCRYPTED);
        if !entry.name.is_ascii() {
            entry.flags |= FLAG_UTF8;
        }
        entry.version_needed = entry.version_needed.max(20);
        entry.header_offset = self.start_dir;

        let mut header = Vec::with_capacity(LOCAL_HEADER_LEN + entry.name.len() + entry.extra.len());
        put_u32(&mut header, LOCAL_HEADER_SIG);
        put_u16(&mut header, entry.version_needed);
        put_u16(&mut header, entry.flags);
        put_u16(&mut header, entry.method);
        put_u16(&mut header, entry.dos_time);
        put_u16(&mut header, entry.dos_date);
        put_u32(&mut header, entry.crc32);
        put_u32(&mut header, entry.compressed_size as u32);
        put_u32(&mut header, entry.uncompressed_size as u32);
        put_u16(&mut header, entry.name.len() as u16);
        put_u16(&mut header, entry.extra.len() as u16);
        header.extend_from_slice(entry.name.as_bytes());
        header.extend_from_slice(&entry.extra);

        self.inner.seek(SeekFrom::Start(self.start_dir))?;
        self.inner.write_all(&header)?;
        self.inner.write_all(&compressed)?;
        self.start_dir += (header.len() + compressed.len()) as u64;

        self.name_index.insert(entry.name.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Write the central directory and EOCD; returns the stream and its final length
    pub fn finish(mut self) -> Result<(F, u64), ZipError> {
        if self.entries.len() >= usize::from(u16::MAX) {
            return Err(ZipError::TooLarge("central directory".to_string()));
        }
        let mut cd = Vec::new();
        for entry in &self.entries {
            put_u32(&mut cd, CENTRAL_HEADER_SIG);
            put_u16(&mut cd, entry.version_made_by);
            put_u16(&mut cd, entry.version_needed);
            put_u16(&mut cd, entry.flags);
            put_u16(&mut cd, entry.method);
            put_u16(&mut cd, entry.dos_time);
            put_u16(&mut cd, entry.dos_date);
            put_u32(&mut cd, entry.crc32);
            put_u32(&mut cd, entry.compressed_size as u32);
            put_u32(&mut cd, entry.uncompressed_size as u32);
            put_u16(&mut cd, entry.name.len() as u16);
            put_u16(&mut cd, entry.extra.len() as u16);
            put_u16(&mut cd, entry.comment.len() as u16);
            put_u16(&mut cd, 0);
            put_u16(&mut cd, entry.internal_attr);
            put_u32(&mut cd, entry.external_attr);
            put_u32(&mut cd, entry.header_offset as u32);
            cd.extend_from_slice(entry.name.as_bytes());
            cd.extend_from_slice(&entry.extra);
            cd.extend_from_slice(&entry.comment);
        }

        if self.start_dir + cd.len() as u64 >= u64::from(u32::MAX) {
            return Err(ZipError::TooLarge("central directory".to_string()));
        }
        let cd_size = cd.len() as u32;
        let comment = &self.comment[..self.comment.len().min(MAX_COMMENT_LEN)];
        put_u32(&mut cd, EOCD_SIG);
        put_u16(&mut cd, 0);
        put_u16(&mut cd, 0);
        put_u16(&mut cd, self.entries.len() as u16);
        put_u16(&mut cd, self.entries.len() as u16);
        put_u32(&mut cd, cd_size);
        put_u32(&mut cd, self.start_dir as u32);
        put_u16(&mut cd, comment.len() as u16);
        cd.extend_from_slice(comment);

        self.inner.seek(SeekFrom::Start(self.start_dir))?;
        self.inner.write_all(&cd)?;
        self.inner.flush()?;
        let end = self.start_dir + cd.len() as u64;
        Ok((self.inner, end))
    }
}

/// True if `reader` ends with a parsable end-of-central-directory record
pub fn is_zip<R: Read + Seek>(reader: &mut R) -> bool {
    find_eocd(reader).is_ok()
}

struct Eocd {
    entries: u16,
    cd_size: u64,
    cd_offset: u64,
    comment: Vec<u8>,
}

fn find_eocd<R: Read + Seek>(reader: &mut R) -> Result<Eocd, ZipError> {
    let len = reader.seek(SeekFrom::End(0))?;
    if len < EOCD_LEN as u64 {
        return Err(ZipError::NotZip);
    }
    let tail_len = len.min((EOCD_LEN + MAX_COMMENT_LEN) as u64);
    let tail_start = len - tail_len;
    reader.seek(SeekFrom::Start(tail_start))?;
    let mut tail = vec![0u8; tail_len as usize];
    reader.read_exact(&mut tail)?;

    let mut pos = tail.len() - EOCD_LEN;
    loop {
        if le_u32(&tail, pos) == EOCD_SIG {
            let comment_len = le_u16(&tail, pos + 20) as usize;
            if pos + EOCD_LEN + comment_len == tail.len() {
                let entries = le_u16(&tail, pos + 10);
                let cd_size = u64::from(le_u32(&tail, pos + 12));
                let cd_offset = u64::from(le_u32(&tail, pos + 16));
                let eocd_offset = tail_start + pos as u64;

                let zip64_locator = pos >= 20 && le_u32(&tail, pos - 20) == ZIP64_LOCATOR_SIG;
                if zip64_locator || entries == u16::MAX || cd_offset == u64::from(u32::MAX) {
                    return Err(ZipError::Zip64);
                }
                if cd_offset + cd_size > eocd_offset {
                    return Err(ZipError::NotZip);
                }
                return Ok(Eocd {
                    entries,
                    cd_size,
                    cd_offset,
                    comment: tail[pos + EOCD_LEN..].to_vec(),
                });
            }
        }
        if pos == 0 {
            return Err(ZipError::NotZip);
        }
        pos -= 1;
    }
}

fn parse_central_header(buf: &[u8]) -> Result<(ZipEntry, usize), ZipError> {
    if buf.len() < CENTRAL_HEADER_LEN || le_u32(buf, 0) != CENTRAL_HEADER_SIG {
        return Err(ZipError::NotZip);
    }
    let name_len = le_u16(buf, 28) as usize;
    let extra_len = le_u16(buf, 30) as usize;
    let comment_len = le_u16(buf, 32) as usize;
    let total = CENTRAL_HEADER_LEN + name_len + extra_len + comment_len;
    if buf.len() < total {
        return Err(ZipError::NotZip);
    }

    let compressed_size = le_u32(buf, 20);
    let uncompressed_size = le_u32(buf, 24);
    let header_offset = le_u32(buf, 42);
    if [compressed_size, uncompressed_size, header_offset].contains(&u32::MAX) {
        return Err(ZipError::Zip64);
    }

    let name_start = CENTRAL_HEADER_LEN;
    let extra_start = name_start + name_len;
    let comment_start = extra_start + extra_len;
    let entry = ZipEntry {
        name: String::from_utf8_lossy(&buf[name_start..extra_start]).into_owned(),
        version_made_by: le_u16(buf, 4),
        version_needed: le_u16(buf, 6),
        flags: le_u16(buf, 8),
        method: le_u16(buf, 10),
        dos_time: le_u16(buf, 12),
        dos_date: le_u16(buf, 14),
        crc32: le_u32(buf, 16),
        compressed_size: u64::from(compressed_size),
        uncompressed_size: u64::from(uncompressed_size),
        internal_attr: le_u16(buf, 36),
        external_attr: le_u32(buf, 38),
        header_offset: u64::from(header_offset),
        extra: buf[extra_start..comment_start].to_vec(),
        comment: buf[comment_start..total].to_vec(),
    };
    Ok((entry, total))
}

fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build(members: &[(&str, &[u8], u16)]) -> Vec<u8> {
        let mut zip = ZipFile::create(Cursor::new(Vec::new())).unwrap();
        for (name, data, method) in members {
            let mut entry = ZipEntry::new(*name);
            entry.method = *method;
            zip.append(entry, data, 9).unwrap();
        }
        zip.set_comment(b"comic".to_vec());
        let (cursor, end) = zip.finish().unwrap();
        let mut bytes = cursor.into_inner();
        bytes.truncate(end as usize);
        bytes
    }

    fn contents(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut zip = ZipFile::open(Cursor::new(bytes)).unwrap();
        let entries = zip.entries().to_vec();
        entries
            .iter()
            .map(|e| (e.name.clone(), zip.read(e).unwrap()))
            .collect()
    }

    #[test]
    fn test_write_then_read() {
        let bytes = build(&[
            ("a.txt", b"hello hello hello hello", DEFLATED),
            ("b/c.bin", &[0u8, 1, 2, 3], STORED),
        ]);
        let zip = ZipFile::open(Cursor::new(bytes.clone())).unwrap();
        assert_eq!(zip.comment(), b"comic");
        assert_eq!(zip.by_name("b/c.bin").unwrap().method, STORED);
        assert_eq!(
            contents(bytes),
            vec![
                ("a.txt".to_string(), b"hello hello hello hello".to_vec()),
                ("b/c.bin".to_string(), vec![0, 1, 2, 3]),
            ]
        );
    }

    #[test]
    fn test_not_zip() {
        assert!(!is_zip(&mut Cursor::new(b"PK but not really".to_vec())));
        assert!(!is_zip(&mut Cursor::new(Vec::new())));
        assert!(is_zip(&mut Cursor::new(build(&[("x", b"y", STORED)]))));
    }

    #[test]
    fn test_remove_zero_members_is_noop() {
        let bytes = build(&[("a", b"aaaa", STORED), ("b", b"bbbb", STORED)]);
        let mut zip = ZipFile::open(Cursor::new(bytes.clone())).unwrap();
        let start = zip.start_dir();
        assert_eq!(zip.remove_members(&[]).unwrap(), 0);
        assert_eq!(zip.start_dir(), start);
        assert_eq!(zip.into_inner().into_inner(), bytes);
    }

    #[test]
    fn test_surgeon_duplicates_and_shuffled_directory() {
        let bytes = build(&[
            ("page1.png", b"first page data", STORED),
            ("dup.txt", b"old duplicate", DEFLATED),
            ("page2.png", &[7u8; 3000], DEFLATED),
            ("dup.txt", b"new duplicate", STORED),
            ("page3.png", b"third page", STORED),
        ]);
        let mut zip = ZipFile::open(Cursor::new(bytes)).unwrap();
        // directory order no longer matches physical order
        zip.entries.reverse();
        zip.rebuild_index();
        assert_eq!(zip.by_name("dup.txt").unwrap().method, DEFLATED);

        let doomed: Vec<ZipEntry> = zip
            .entries()
            .iter()
            .filter(|e| e.name == "page2.png" || (e.name == "dup.txt" && e.method == DEFLATED))
            .cloned()
            .collect();
        assert_eq!(doomed.len(), 2);
        let removed = zip.remove_members(&doomed).unwrap();
        assert!(removed > 0);

        let mut replacement = ZipEntry::new("page2.png");
        replacement.set_mtime(1_700_000_000);
        zip.append(replacement, b"smaller page", 9).unwrap();
        let (cursor, end) = zip.finish().unwrap();
        let mut bytes = cursor.into_inner();
        bytes.truncate(end as usize);

        let mut reopened = ZipFile::open(Cursor::new(bytes.clone())).unwrap();
        assert_eq!(reopened.comment(), b"comic");
        let mut names: Vec<_> = reopened.entries().iter().map(|e| e.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["dup.txt", "page1.png", "page2.png", "page3.png"]);

        // local headers must be contiguous from offset zero up to the directory
        let mut offsets: Vec<_> = reopened
            .entries()
            .iter()
            .map(|e| (e.header_offset, e.name.len() + e.extra.len() + e.compressed_size as usize))
            .collect();
        offsets.sort();
        let mut expected = 0u64;
        for (offset, body) in offsets {
            assert_eq!(offset, expected);
            expected += (LOCAL_HEADER_LEN + body) as u64;
        }
        assert_eq!(expected, reopened.start_dir());

        let dup = reopened.by_name("dup.txt").unwrap().clone();
        assert_eq!(reopened.read(&dup).unwrap(), b"new duplicate");
        let page2 = reopened.by_name("page2.png").unwrap().clone();
        assert_eq!(reopened.read(&page2).unwrap(), b"smaller page");
        assert_eq!(page2.mtime(), Some(1_700_000_000 / 2 * 2));
        let page3 = reopened.by_name("page3.png").unwrap().clone();
        assert_eq!(reopened.read(&page3).unwrap(), b"third page");
    }

    #[test]
    fn test_shift_crosses_chunk_boundary() {
        let big: Vec<u8> = (0..(SHIFT_CHUNK * 2 + 17)).map(|i| (i % 251) as u8).collect();
        let bytes = build(&[("gone", &[1u8; 100], STORED), ("big", &big, STORED)]);
        let mut zip = ZipFile::open(Cursor::new(bytes)).unwrap();
        let gone = zip.by_name("gone").unwrap().clone();
        zip.remove_members(&[gone]).unwrap();
        let (cursor, end) = zip.finish().unwrap();
        let mut bytes = cursor.into_inner();
        bytes.truncate(end as usize);
        assert_eq!(contents(bytes), vec![("big".to_string(), big)]);
    }

    #[test]
    fn test_crc_mismatch_detected() {
        let mut bytes = build(&[("a", b"abcdef", STORED)]);
        bytes[LOCAL_HEADER_LEN + 1] ^= 0xff;
        let mut zip = ZipFile::open(Cursor::new(bytes)).unwrap();
        let entry = zip.entries()[0].clone();
        assert!(matches!(zip.read(&entry), Err(ZipError::Crc(_))));
    }

    #[test]
    fn test_dos_time_round_trip() {
        let (date, time) = epoch_to_dos(1_600_000_000);
        assert_eq!(dos_to_epoch(date, time), Some(1_600_000_000));
        assert_eq!(epoch_to_dos(0), DOS_EPOCH);
    }
}
