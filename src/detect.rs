//! # Format Detector
//!
//! Classifica i byte di un `PathInfo` in un `FileFormat`.
//!
//! ## Strategia:
//! 1. Immagini: il crate `image` indovina il formato dal magic e ne verifica
//!    l'header; poi controlli a livello di byte per animazione, numero di frame
//!    e compressione lossless (WebP, TIFF). Un JPEG con indice MP di più
//!    immagini è un MPO.
//! 2. Altri formati, in ordine fisso: SVG, CBZ, ZIP, CBR, RAR, EPUB, 7Z, CB7,
//!    TGZ, TBZ, TXZ, CBT, TAR. Ognuno richiede il magic e un suffisso
//!    accettato dal relativo handler.
//!
//! Un input non riconosciuto restituisce `None` e viene ignorato senza errore.

use crate::archive::rar;
use crate::archive::seven_zip;
use crate::archive::tar::{is_tar, TarCompression};
use crate::archive::zip::is_zip;
use crate::file_format::{self, FileFormat};
use crate::handlers::{mpo, HandlerKind};
use crate::path_info::PathInfo;
use image::ImageFormat;
use std::io::{self, Read, Seek, SeekFrom};
use tracing::debug;

const HEAD_LEN: usize = 4096;
/// The MPF segment follows SOI and at most a full EXIF segment
const MPO_SEARCH: usize = 2 * 65_536;
const WEBP_EXTENDED_SEARCH: usize = 128;
const TIFF_COMPRESSION_TAG: u16 = 259;
/// TIFF compression codes that don't lose information
const TIFF_LOSSLESS: &[u16] = &[
    1, 2, 3, 4, 5, 8, 32773, 32946, 34676, 34677, 32809, 34925, 50000, 32771,
];
const MAX_IFDS: usize = 100_000;

/// Result of detection, with the frame count for animated images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detected {
    pub format: FileFormat,
    pub frames: usize,
}

/// Identify the format of a file or member; `None` if unrecognized
pub fn detect(path_info: &PathInfo) -> Option<Detected> {
    let mut reader = match path_info.reader() {
        Ok(reader) => reader,
        Err(e) => {
            debug!("Cannot read {}: {}", path_info.full_output_name(), e);
            return None;
        }
    };
    if let Some(detected) = detect_image(&mut reader) {
        return Some(detected);
    }
    reader.rewind().ok()?;
    detect_other(&path_info.suffix(), &mut reader).map(|format| Detected { format, frames: 1 })
}

fn image_format_name(format: ImageFormat) -> Option<&'static str> {
    Some(match format {
        ImageFormat::Png => file_format::PNG,
        ImageFormat::Jpeg => file_format::JPEG,
        ImageFormat::Gif => file_format::GIF,
        ImageFormat::WebP => file_format::WEBP,
        ImageFormat::Tiff => file_format::TIFF,
        ImageFormat::Bmp => file_format::BMP,
        ImageFormat::Pnm => file_format::PPM,
        _ => return None,
    })
}

fn detect_image<R: io::BufRead + Seek>(reader: &mut R) -> Option<Detected> {
    let guessed = image::io::Reader::new(&mut *reader).with_guessed_format().ok()?;
    let name = image_format_name(guessed.format()?)?;
    if let Err(e) = guessed.into_dimensions() {
        debug!("Invalid {} header: {}", name, e);
        return None;
    }
    reader.rewind().ok()?;

    if name == file_format::JPEG {
        let len = reader.seek(SeekFrom::End(0)).ok()?;
        reader.rewind().ok()?;
        let images = read_head(reader, MPO_SEARCH).map_or(1, |head| mpo::image_count(&head, len));
        if images > 1 {
            return Some(Detected {
                format: FileFormat::image(file_format::MPO, false, false),
                frames: images,
            });
        }
    }

    let (lossless, frames) = match name {
        file_format::PNG => (true, png_frames(reader).unwrap_or(1)),
        file_format::GIF => (true, gif_frames(reader).unwrap_or(1)),
        file_format::WEBP => webp_info(reader).unwrap_or((false, 1)),
        file_format::TIFF => tiff_info(reader).unwrap_or((false, 1)),
        file_format::JPEG => (false, 1),
        _ => (true, 1),
    };
    Some(Detected {
        format: FileFormat::image(name, lossless, frames > 1),
        frames,
    })
}

fn read_head<R: Read>(reader: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(len);
    reader.by_ref().take(len as u64).read_to_end(&mut head)?;
    Ok(head)
}

fn read_array<const N: usize, R: Read>(reader: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Frames declared by the APNG `acTL` chunk
fn png_frames<R: Read + Seek>(reader: &mut R) -> io::Result<usize> {
    reader.seek(SeekFrom::Start(8))?;
    loop {
        let len = u32::from_be_bytes(read_array::<4, _>(reader)?);
        let kind = read_array::<4, _>(reader)?;
        match &kind {
            b"acTL" => {
                let frames = u32::from_be_bytes(read_array::<4, _>(reader)?);
                return Ok(frames.max(1) as usize);
            }
            b"IDAT" | b"IEND" => return Ok(1),
            _ => {
                reader.seek(SeekFrom::Current(i64::from(len) + 4))?;
            }
        }
    }
}

fn skip_sub_blocks<R: Read>(reader: &mut R) -> io::Result<()> {
    loop {
        let [size] = read_array::<1, _>(reader)?;
        if size == 0 {
            return Ok(());
        }
        io::copy(&mut reader.by_ref().take(u64::from(size)), &mut io::sink())?;
    }
}

/// Number of image descriptors in a GIF stream
fn gif_frames<R: Read + Seek>(reader: &mut R) -> io::Result<usize> {
    let header = read_array::<13, _>(reader)?;
    let flags = header[10];
    if flags & 0x80 != 0 {
        reader.seek(SeekFrom::Current(3 << ((flags & 0x07) + 1)))?;
    }
    let mut frames = 0;
    loop {
        match read_array::<1, _>(reader) {
            Ok([0x2c]) => {
                frames += 1;
                let descriptor = read_array::<9, _>(reader)?;
                let local = descriptor[8];
                if local & 0x80 != 0 {
                    reader.seek(SeekFrom::Current(3 << ((local & 0x07) + 1)))?;
                }
                read_array::<1, _>(reader)?;
                skip_sub_blocks(reader)?;
            }
            Ok([0x21]) => {
                read_array::<1, _>(reader)?;
                skip_sub_blocks(reader)?;
            }
            Ok(_) => break,
            // Truncated streams still count the frames seen so far
            Err(_) => break,
        }
    }
    Ok(frames.max(1))
}

/// Lossless flag and frame count of a WebP file
fn webp_info<R: Read + Seek>(reader: &mut R) -> io::Result<(bool, usize)> {
    let head = read_head(reader, 16 + 4 + 4 + WEBP_EXTENDED_SEARCH)?;
    if head.len() < 16 || &head[12..15] != b"VP8" {
        return Ok((false, 1));
    }
    match head[15] {
        b'L' => Ok((true, 1)),
        b'X' => {
            let flags = head.get(20).copied().unwrap_or(0);
            let window = &head[16..];
            let lossless = window.windows(4).any(|w| w == b"VP8L");
            let frames = if flags & 0x02 != 0 {
                webp_frames(reader)?
            } else {
                1
            };
            Ok((lossless, frames))
        }
        _ => Ok((false, 1)),
    }
}

fn webp_frames<R: Read + Seek>(reader: &mut R) -> io::Result<usize> {
    reader.seek(SeekFrom::Start(12))?;
    let mut frames = 0;
    while let Ok(kind) = read_array::<4, _>(reader) {
        let size = u32::from_le_bytes(read_array::<4, _>(reader)?);
        if &kind == b"ANMF" {
            frames += 1;
        }
        reader.seek(SeekFrom::Current(i64::from(size) + i64::from(size & 1)))?;
    }
    Ok(frames.max(1))
}

/// Lossless flag of the first IFD and the number of IFDs
fn tiff_info<R: Read + Seek>(reader: &mut R) -> io::Result<(bool, usize)> {
    let header = read_array::<8, _>(reader)?;
    let big_endian = match &header[..2] {
        b"II" => false,
        b"MM" => true,
        _ => return Ok((false, 1)),
    };
    let u16_of = |b: [u8; 2]| if big_endian { u16::from_be_bytes(b) } else { u16::from_le_bytes(b) };
    let u32_of = |b: [u8; 4]| if big_endian { u32::from_be_bytes(b) } else { u32::from_le_bytes(b) };

    let mut offset = u32_of([header[4], header[5], header[6], header[7]]);
    let mut compression = None;
    let mut frames = 0;
    while offset != 0 && frames < MAX_IFDS {
        reader.seek(SeekFrom::Start(u64::from(offset)))?;
        let count = u16_of(read_array::<2, _>(reader)?);
        for _ in 0..count {
            let entry = read_array::<12, _>(reader)?;
            if frames == 0 && u16_of([entry[0], entry[1]]) == TIFF_COMPRESSION_TAG {
                compression = Some(u16_of([entry[8], entry[9]]));
            }
        }
        frames += 1;
        offset = match read_array::<4, _>(reader) {
            Ok(next) => u32_of(next),
            Err(_) => 0,
        };
    }
    let lossless = TIFF_LOSSLESS.contains(&compression.unwrap_or(1));
    Ok((lossless, frames.max(1)))
}

fn suffix_accepted(kind: HandlerKind, suffix: &str) -> bool {
    kind.suffixes().contains(&suffix)
}

fn looks_like_tar<R: Read + Seek>(reader: &mut R, head: &[u8], compression: TarCompression) -> bool {
    if !compression.matches_magic(head) || reader.rewind().is_err() {
        return false;
    }
    is_tar(&mut *reader, compression)
}

/// Non-image identifiers, tried in a fixed order
fn detect_other<R: Read + Seek>(suffix: &str, reader: &mut R) -> Option<FileFormat> {
    let head = read_head(reader, HEAD_LEN).ok()?;

    if suffix_accepted(HandlerKind::Svg, suffix) {
        let text = String::from_utf8_lossy(&head).to_lowercase();
        if text.contains("<svg") {
            return Some(FileFormat::image(file_format::SVG, true, false));
        }
    }

    let zip = is_zip(reader);
    let rar = rar::has_magic(&head);
    let seven_zip = head.starts_with(&seven_zip::MAGIC);

    let checks: [(bool, HandlerKind); 7] = [
        (zip, HandlerKind::Cbz),
        (zip, HandlerKind::Zip),
        (rar, HandlerKind::Cbr),
        (rar, HandlerKind::Rar),
        (zip, HandlerKind::Epub),
        (seven_zip, HandlerKind::SevenZip),
        (seven_zip, HandlerKind::Cb7),
    ];
    if let Some((_, kind)) = checks
        .iter()
        .find(|(magic, kind)| *magic && suffix_accepted(*kind, suffix))
    {
        return Some(FileFormat::archive(kind.output_format()));
    }

    let tars = [
        (TarCompression::Gzip, HandlerKind::TarGz),
        (TarCompression::Bzip2, HandlerKind::TarBz),
        (TarCompression::Xz, HandlerKind::TarXz),
        (TarCompression::None, HandlerKind::Cbt),
        (TarCompression::None, HandlerKind::Tar),
    ];
    tars.iter()
        .find(|(compression, kind)| suffix_accepted(*kind, suffix) && looks_like_tar(reader, &head, *compression))
        .map(|(_, kind)| FileFormat::archive(kind.output_format()))
}
