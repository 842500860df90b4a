//! # Handler Registry
//!
//! Associa un `FileFormat` all'handler da usare.
//!
//! ## Tabelle:
//!
//! | Input                     | convert            | native          |
//! |---------------------------|--------------------|-----------------|
//! | PNG (statico)             | WebpLossless       | Png             |
//! | GIF (statico)             | WebpLossless, Png  | Gif             |
//! | PNG/GIF animati           | WebpAnimated       | Png / Gif       |
//! | BMP, PPM, TIFF lossless   | WebpLossless, Png  | -               |
//! | JPEG                      | -                  | Jpeg            |
//! | MPO                       | Jpeg               | -               |
//! | WEBP lossless (statico)   | -                  | WebpLossless    |
//! | WEBP lossless animato     | -                  | WebpAnimated    |
//! | SVG                       | -                  | Svg             |
//! | ZIP / CBZ / EPUB          | -                  | stesso formato  |
//! | RAR / CBR, 7Z / CB7       | Zip / Cbz          | stesso formato  |
//! | TAR, TGZ, TBZ, TXZ / CBT  | Zip / Cbz          | stesso formato  |
//!
//! ## Regole:
//! - il formato di input deve essere abilitato (`formats`)
//! - un handler di conversione richiede il formato di output in `convert_to`
//!   e il flag `convert` del `PathInfo`
//! - ogni stage dell'handler deve avere un programma disponibile
//! - per gli archivi la conversione avviene solo al repack

use super::HandlerKind;
use crate::config::Config;
use crate::error::ConfigError;
use crate::file_format::{self, FileFormat};
use crate::programs::ProgramTable;
use std::collections::HashSet;
use tracing::debug;

fn convert_table(format: &FileFormat) -> &'static [HandlerKind] {
    use HandlerKind::*;
    match format.format {
        file_format::PNG if !format.animated => &[WebpLossless],
        file_format::GIF if !format.animated => &[WebpLossless, Png],
        file_format::PNG | file_format::GIF => &[WebpAnimatedLossless],
        file_format::MPO => &[Jpeg],
        file_format::BMP | file_format::PPM => &[WebpLossless, Png],
        file_format::TIFF if format.lossless && !format.animated => &[WebpLossless, Png],
        file_format::RAR | file_format::SEVEN_ZIP => &[Zip],
        file_format::TAR | file_format::TGZ | file_format::TBZ | file_format::TXZ => &[Zip],
        file_format::CBR | file_format::CB7 | file_format::CBT => &[Cbz],
        _ => &[],
    }
}

fn native_handler(format: &FileFormat) -> Option<HandlerKind> {
    use HandlerKind::*;
    let kind = match format.format {
        file_format::PNG => Png,
        file_format::GIF => Gif,
        file_format::JPEG => Jpeg,
        file_format::WEBP if format.lossless && !format.animated => WebpLossless,
        file_format::WEBP if format.lossless => WebpAnimatedLossless,
        file_format::SVG => Svg,
        file_format::ZIP => Zip,
        file_format::CBZ => Cbz,
        file_format::EPUB => Epub,
        file_format::RAR => Rar,
        file_format::CBR => Cbr,
        file_format::SEVEN_ZIP => SevenZip,
        file_format::CB7 => Cb7,
        file_format::TAR => Tar,
        file_format::TGZ => TarGz,
        file_format::TBZ => TarBz,
        file_format::TXZ => TarXz,
        file_format::CBT => Cbt,
        _ => return None,
    };
    Some(kind)
}

/// Handler selection for one run
#[derive(Debug, Clone)]
pub struct Registry {
    enabled: HashSet<String>,
    convert_to: HashSet<String>,
    available: HashSet<HandlerKind>,
}

const ALL_HANDLERS: &[HandlerKind] = &[
    HandlerKind::Png,
    HandlerKind::Jpeg,
    HandlerKind::Gif,
    HandlerKind::WebpLossless,
    HandlerKind::WebpAnimatedLossless,
    HandlerKind::Svg,
    HandlerKind::Zip,
    HandlerKind::Cbz,
    HandlerKind::Epub,
    HandlerKind::Rar,
    HandlerKind::Cbr,
    HandlerKind::SevenZip,
    HandlerKind::Cb7,
    HandlerKind::Tar,
    HandlerKind::TarGz,
    HandlerKind::TarBz,
    HandlerKind::TarXz,
    HandlerKind::Cbt,
];

impl Registry {
    /// Fails if no enabled format has any usable handler
    pub fn new(config: &Config, programs: &ProgramTable) -> Result<Self, ConfigError> {
        let registry = Self {
            enabled: config.formats.iter().cloned().collect(),
            convert_to: config.convert_to.iter().cloned().collect(),
            available: ALL_HANDLERS
                .iter()
                .copied()
                .filter(|h| h.is_available(programs))
                .collect(),
        };

        let usable = config.formats.iter().any(|format| {
            let Some(canonical) = FileFormat::canonical(format) else {
                return false;
            };
            let sample = representative(canonical);
            registry.handler_for(&sample, true).is_some()
        });
        if !usable {
            let formats: Vec<_> = config.formats.iter().cloned().collect();
            return Err(ConfigError::NoHandlers(formats.join(", ")));
        }

        for kind in ALL_HANDLERS {
            if !registry.available.contains(kind) && registry.enabled.contains(kind.output_format()) {
                debug!("{:?} handler unavailable: missing programs", kind);
            }
        }
        Ok(registry)
    }

    fn eligible(&self, kind: HandlerKind) -> bool {
        self.available.contains(&kind)
    }

    /// Handler for a detected file. Containers always get their native
    /// (unpacking) handler; conversion of the container happens at repack.
    pub fn handler_for(&self, format: &FileFormat, convert: bool) -> Option<HandlerKind> {
        if !self.enabled.contains(format.format) {
            return None;
        }
        if convert && !format.archive {
            let converting = convert_table(format)
                .iter()
                .copied()
                .find(|h| self.convert_to.contains(h.output_format()) && self.eligible(*h));
            if converting.is_some() {
                return converting;
            }
        }
        native_handler(format).filter(|h| self.eligible(*h))
    }

    /// Handler that writes the repacked container, if any can
    pub fn repack_handler(&self, source: HandlerKind, convert: bool) -> Option<HandlerKind> {
        let format = FileFormat::archive(source.output_format());
        if convert {
            let converting = convert_table(&format)
                .iter()
                .copied()
                .find(|h| self.convert_to.contains(h.output_format()) && h.can_pack() && self.eligible(*h));
            if converting.is_some() {
                return converting;
            }
        }
        (source.can_pack() && self.eligible(source)).then_some(source)
    }
}

fn representative(format: &'static str) -> FileFormat {
    if file_format::ARCHIVE_FORMATS.contains(&format) {
        FileFormat::archive(format)
    } else {
        FileFormat::image(format, true, false)
    }
}
