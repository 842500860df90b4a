//! File format identity shared by detection, dispatch and reporting.

use std::fmt;

pub const PNG: &str = "PNG";
pub const JPEG: &str = "JPEG";
/// Multi-picture JPEG (stereo cameras)
pub const MPO: &str = "MPO";
pub const GIF: &str = "GIF";
pub const WEBP: &str = "WEBP";
pub const TIFF: &str = "TIFF";
pub const BMP: &str = "BMP";
pub const PPM: &str = "PPM";
pub const SVG: &str = "SVG";

pub const ZIP: &str = "ZIP";
pub const CBZ: &str = "CBZ";
pub const EPUB: &str = "EPUB";
pub const RAR: &str = "RAR";
pub const CBR: &str = "CBR";
pub const SEVEN_ZIP: &str = "7Z";
pub const CB7: &str = "CB7";
pub const TAR: &str = "TAR";
pub const TGZ: &str = "TGZ";
pub const TBZ: &str = "TBZ";
pub const TXZ: &str = "TXZ";
pub const CBT: &str = "CBT";

pub const IMAGE_FORMATS: &[&str] = &[PNG, JPEG, MPO, GIF, WEBP, TIFF, BMP, PPM, SVG];
pub const ARCHIVE_FORMATS: &[&str] = &[ZIP, CBZ, EPUB, RAR, CBR, SEVEN_ZIP, CB7, TAR, TGZ, TBZ, TXZ, CBT];
pub const DEFAULT_FORMATS: &[&str] = &[PNG, JPEG, GIF, WEBP, SVG];
/// Targets `convert_to` may name
pub const CONVERTIBLE_TARGETS: &[&str] = &[WEBP, PNG, JPEG, ZIP, CBZ];

/// Identity of a detected file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileFormat {
    pub format: &'static str,
    pub lossless: bool,
    pub animated: bool,
    pub archive: bool,
}

impl FileFormat {
    pub const fn image(format: &'static str, lossless: bool, animated: bool) -> Self {
        Self {
            format,
            lossless,
            animated,
            archive: false,
        }
    }

    pub const fn archive(format: &'static str) -> Self {
        Self {
            format,
            lossless: true,
            animated: false,
            archive: true,
        }
    }

    /// Map a user supplied format name onto the canonical constant
    pub fn canonical(name: &str) -> Option<&'static str> {
        let upper = name.trim().to_ascii_uppercase();
        let upper = match upper.as_str() {
            "JPG" => JPEG,
            "TIF" => TIFF,
            "SEVENZIP" => SEVEN_ZIP,
            other => other,
        }
        .to_string();
        IMAGE_FORMATS
            .iter()
            .chain(ARCHIVE_FORMATS.iter())
            .find(|f| **f == upper)
            .copied()
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format)?;
        if !self.archive && !self.lossless {
            write!(f, " lossy")?;
        }
        if self.animated {
            write!(f, " animated")?;
        }
        Ok(())
    }
}
