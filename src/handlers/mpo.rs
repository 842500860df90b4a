//! # MPO
//!
//! Lettura dell'indice MP di un JPEG multi-immagine (fotocamere stereo).
//!
//! Il segmento APP2 `MPF\0` contiene un IFD in stile TIFF; il tag `0xB002`
//! elenca le immagini, 16 byte ciascuna: attributi, dimensione, offset e
//! dipendenze. Gli offset sono relativi all'header TIFF del segmento, tranne
//! quello dell'immagine primaria che vale 0 (inizio del file).

use crate::error::{OptimizeError, TaskResult};

const SOI: [u8; 2] = [0xFF, 0xD8];
const APP2: u8 = 0xE2;
const SOS: u8 = 0xDA;
const EOI: u8 = 0xD9;
const MPF_SIGNATURE: &[u8] = b"MPF\0";
const MP_ENTRY_TAG: u16 = 0xB002;
const MP_ENTRY_LEN: usize = 16;
const IFD_ENTRY_LEN: usize = 12;
const TYPE_MASK: u32 = 0x00FF_FFFF;
const BASELINE_PRIMARY: u32 = 0x03_0000;

/// One image listed in the MP index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpEntry {
    pub attribute: u32,
    pub size: u32,
    pub offset: u32,
}

impl MpEntry {
    pub fn is_primary(&self) -> bool {
        self.attribute & TYPE_MASK == BASELINE_PRIMARY
    }
}

/// Offset of the TIFF header of the MPF segment and the header onwards
fn mpf_segment(data: &[u8]) -> Option<(usize, &[u8])> {
    if !data.starts_with(&SOI) {
        return None;
    }
    let mut pos = SOI.len();
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        if marker == SOS || marker == EOI {
            return None;
        }
        let len = usize::from(u16::from_be_bytes([data[pos + 2], data[pos + 3]]));
        if len < 2 {
            return None;
        }
        let start = pos + 4;
        let end = pos + 2 + len;
        let payload = data.get(start..end)?;
        if marker == APP2 && payload.starts_with(MPF_SIGNATURE) {
            let tiff = start + MPF_SIGNATURE.len();
            return Some((tiff, &data[tiff..end]));
        }
        pos = end;
    }
    None
}

fn read_u16(bytes: &[u8], at: usize, big_endian: bool) -> Option<u16> {
    let b: [u8; 2] = bytes.get(at..at.checked_add(2)?)?.try_into().ok()?;
    Some(if big_endian { u16::from_be_bytes(b) } else { u16::from_le_bytes(b) })
}

fn read_u32(bytes: &[u8], at: usize, big_endian: bool) -> Option<u32> {
    let b: [u8; 4] = bytes.get(at..at.checked_add(4)?)?.try_into().ok()?;
    Some(if big_endian { u32::from_be_bytes(b) } else { u32::from_le_bytes(b) })
}

fn index(data: &[u8]) -> Option<(usize, Vec<MpEntry>)> {
    let (tiff_start, tiff) = mpf_segment(data)?;
    let big_endian = match tiff.get(..2)? {
        b"MM" => true,
        b"II" => false,
        _ => return None,
    };
    let ifd = read_u32(tiff, 4, big_endian)? as usize;
    let count = usize::from(read_u16(tiff, ifd, big_endian)?);
    for i in 0..count {
        let at = ifd + 2 + i * IFD_ENTRY_LEN;
        if read_u16(tiff, at, big_endian)? != MP_ENTRY_TAG {
            continue;
        }
        let len = read_u32(tiff, at + 4, big_endian)? as usize;
        let offset = read_u32(tiff, at + 8, big_endian)? as usize;
        let list = tiff.get(offset..offset.checked_add(len)?)?;
        let entries = list
            .chunks_exact(MP_ENTRY_LEN)
            .filter_map(|e| {
                Some(MpEntry {
                    attribute: read_u32(e, 0, big_endian)?,
                    size: read_u32(e, 4, big_endian)?,
                    offset: read_u32(e, 8, big_endian)?,
                })
            })
            .collect();
        return Some((tiff_start, entries));
    }
    None
}

/// Images listed in the MP index; `None` for a plain JPEG
pub fn entries(data: &[u8]) -> Option<Vec<MpEntry>> {
    index(data).map(|(_, entries)| entries)
}

/// Indexed images lying inside a file of `len` bytes whose start is `head`.
/// A primary cut out of an MPO keeps the index but not the other images.
pub fn image_count(head: &[u8], len: u64) -> usize {
    let Some((tiff_start, entries)) = index(head) else {
        return 1;
    };
    entries
        .iter()
        .filter(|e| {
            let start = match e.offset {
                0 => 0,
                offset => tiff_start as u64 + u64::from(offset),
            };
            start + u64::from(e.size) <= len
        })
        .count()
        .max(1)
}

/// A JPEG carrying more than one image
pub fn is_mpo(data: &[u8]) -> bool {
    image_count(data, data.len() as u64) > 1
}

/// Bytes of the baseline primary image, a standalone JPEG
pub fn primary_image(data: &[u8]) -> TaskResult<Vec<u8>> {
    let (tiff_start, entries) =
        index(data).ok_or_else(|| OptimizeError::Malformed("no MP index in MPO".to_string()))?;
    let primary = entries
        .iter()
        .find(|e| e.is_primary())
        .ok_or_else(|| OptimizeError::Malformed("no baseline primary image in MPO".to_string()))?;
    let start = match primary.offset {
        0 => 0,
        offset => tiff_start + offset as usize,
    };
    start
        .checked_add(primary.size as usize)
        .and_then(|end| data.get(start..end))
        .map(<[u8]>::to_vec)
        .ok_or_else(|| OptimizeError::Malformed("MPO primary image out of bounds".to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, Rgb};
    use std::io::Cursor;

    fn jpeg(shade: u8) -> Vec<u8> {
        let img = ImageBuffer::from_fn(8, 8, |x, y| Rgb([shade, x as u8 * 20, y as u8 * 20]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageOutputFormat::Jpeg(90))
            .unwrap();
        out.into_inner()
    }

    /// A two image MPO: the primary with its MPF segment, then a second JPEG
    pub(crate) fn mpo_bytes() -> (Vec<u8>, Vec<u8>) {
        let second = jpeg(200);
        let base = jpeg(10);

        // TIFF header + IFD with a single 0xB002 entry + two MP entries
        let ifd_offset = 8u32;
        let list_offset = ifd_offset + 2 + 12 + 4;
        let mut tiff = b"II*\0".to_vec();
        tiff.extend_from_slice(&ifd_offset.to_le_bytes());
        tiff.extend_from_slice(&1u16.to_le_bytes());
        tiff.extend_from_slice(&MP_ENTRY_TAG.to_le_bytes());
        tiff.extend_from_slice(&7u16.to_le_bytes());
        tiff.extend_from_slice(&32u32.to_le_bytes());
        tiff.extend_from_slice(&list_offset.to_le_bytes());
        tiff.extend_from_slice(&0u32.to_le_bytes());
        let list_at = tiff.len();
        tiff.extend_from_slice(&[0u8; 32]);

        let mut segment = vec![0xFF, APP2];
        let len = (2 + MPF_SIGNATURE.len() + tiff.len()) as u16;
        segment.extend_from_slice(&len.to_be_bytes());
        segment.extend_from_slice(MPF_SIGNATURE);
        let tiff_start = 2 + segment.len();
        segment.extend_from_slice(&tiff);

        let mut primary = base[..2].to_vec();
        primary.extend_from_slice(&segment);
        primary.extend_from_slice(&base[2..]);

        let second_offset = (primary.len() - tiff_start) as u32;
        let entries = [
            (0x2003_0000u32, primary.len() as u32, 0u32),
            (0x0002_0002u32, second.len() as u32, second_offset),
        ];
        let at = tiff_start + list_at;
        for (i, (attribute, size, offset)) in entries.iter().enumerate() {
            let e = at + i * MP_ENTRY_LEN;
            primary[e..e + 4].copy_from_slice(&attribute.to_le_bytes());
            primary[e + 4..e + 8].copy_from_slice(&size.to_le_bytes());
            primary[e + 8..e + 12].copy_from_slice(&offset.to_le_bytes());
        }

        let mut file = primary.clone();
        file.extend_from_slice(&second);
        (file, primary)
    }

    #[test]
    fn test_primary_image_is_cut_out() {
        let (file, primary) = mpo_bytes();
        assert!(is_mpo(&file));
        let entries = entries(&file).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_primary());
        assert!(!entries[1].is_primary());

        let extracted = primary_image(&file).unwrap();
        assert_eq!(extracted, primary);
        assert!(image::load_from_memory(&extracted).is_ok());
        assert!(!is_mpo(&extracted));
    }

    #[test]
    fn test_plain_and_broken_jpegs() {
        let plain = jpeg(50);
        assert!(!is_mpo(&plain));
        assert!(primary_image(&plain).is_err());

        let (mut file, primary) = mpo_bytes();
        file.truncate(primary.len() - 1);
        assert!(primary_image(&file).is_err());
        assert!(entries(b"not a jpeg").is_none());
    }
}
