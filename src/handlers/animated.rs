//! # Animated Images
//!
//! Un'immagine animata viene trattata come un container di frame.
//!
//! ## Ciclo:
//! 1. `read_frames`: il crate `image` decodifica GIF, APNG o WebP animato;
//!    ogni frame, già composto sulla tela intera, diventa un membro PNG con
//!    il suo ritardo
//! 2. i frame passano dal walker come membri normali (handler PNG)
//! 3. `pack_webp`: **img2webp** ricompone i frame in un WebP lossless
//!    animato, rispettando i ritardi
//!
//! Il numero di ripetizioni non è esposto dai decoder: l'output ripete
//! all'infinito, il default di img2webp.

use super::Context;
use crate::archive::entry::{ArchiveEntry, FrameMeta, NativeEntry};
use crate::archive::{ArchiveSource, Listing, Member};
use crate::error::{OptimizeError, TaskResult};
use crate::file_format;
use crate::programs::{self, IMG2WEBP};
use image::codecs::gif::GifDecoder;
use image::codecs::png::{CompressionType, FilterType, PngDecoder, PngEncoder};
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, ColorType, Frames, ImageEncoder};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Frames without a delay are shown for this long by browsers
const DEFAULT_DELAY_MS: u32 = 100;

pub fn frame_name(index: usize) -> String {
    format!("frame_#{:03}.png", index)
}

fn decode<'a>(format: &str, data: &'a [u8]) -> TaskResult<Frames<'a>> {
    let cursor = Cursor::new(data);
    let frames = match format {
        file_format::GIF => GifDecoder::new(cursor)?.into_frames(),
        file_format::PNG => PngDecoder::new(cursor)?.apng().into_frames(),
        file_format::WEBP => WebPDecoder::new(cursor)?.into_frames(),
        other => return Err(OptimizeError::Malformed(format!("{} has no frames", other))),
    };
    Ok(frames)
}

/// Quick PNG encoding; the PNG handler compresses the frames afterwards
fn encode_frame(frame: &image::RgbaImage) -> TaskResult<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut buffer, CompressionType::Fast, FilterType::NoFilter);
    encoder.write_image(frame.as_raw(), frame.width(), frame.height(), ColorType::Rgba8)?;
    Ok(buffer)
}

/// Decode every frame of an animated `format` image into PNG members
pub fn read_frames(format: &str, source: ArchiveSource<'_>) -> TaskResult<Listing> {
    let owned;
    let data = match source {
        ArchiveSource::Bytes(bytes) => bytes,
        ArchiveSource::Path(path) => {
            owned = std::fs::read(path)?;
            owned.as_slice()
        }
    };

    let mut members = Vec::new();
    for (index, frame) in decode(format, data)?.enumerate() {
        let frame = frame?;
        let (numer, denom) = frame.delay().numer_denom_ms();
        let delay_ms = match numer.checked_div(denom) {
            Some(0) | None => DEFAULT_DELAY_MS,
            Some(ms) => ms,
        };
        let meta = FrameMeta {
            name: frame_name(index),
            delay_ms,
        };
        members.push(Member {
            entry: ArchiveEntry::new(index, NativeEntry::Frame(meta)),
            data: encode_frame(&frame.into_buffer())?,
        });
    }
    if members.is_empty() {
        return Err(OptimizeError::Malformed("animation without frames".to_string()));
    }
    Ok(Listing {
        members,
        comment: None,
    })
}

/// img2webp command line: file options, then per frame options and frames
fn img2webp_args(frames: &[(PathBuf, u32)], output: &Path) -> Vec<String> {
    let mut args: Vec<String> = ["-min_size", "-o"].iter().map(|s| s.to_string()).collect();
    args.push(output.display().to_string());
    args.extend(["-lossless", "-m", "6"].iter().map(|s| s.to_string()));
    for (path, delay_ms) in frames {
        args.push("-d".to_string());
        args.push(delay_ms.to_string());
        args.push(path.display().to_string());
    }
    args
}

/// Assemble the members, in order, into a lossless animated WebP
pub async fn pack_webp(members: Vec<Member>, ctx: &Context) -> TaskResult<Vec<u8>> {
    let program = ctx
        .programs
        .path(IMG2WEBP)
        .ok_or_else(|| OptimizeError::NoStages(IMG2WEBP.to_string()))?;
    let work_dir = tempfile::Builder::new().prefix("media-squeeze").tempdir()?;

    let mut frames = Vec::with_capacity(members.len());
    for (index, member) in members.iter().enumerate() {
        let delay_ms = match &member.entry.native {
            NativeEntry::Frame(meta) => meta.delay_ms,
            _ => DEFAULT_DELAY_MS,
        };
        let path = work_dir.path().join(format!("frame_{:05}.png", index));
        tokio::fs::write(&path, &member.data).await?;
        frames.push((path, delay_ms));
    }

    let output = work_dir.path().join("animation.webp");
    programs::run(program, &img2webp_args(&frames, &output), &[]).await?;
    debug!("🎞️ Assembled {} frames", frames.len());
    Ok(tokio::fs::read(&output).await?)
}
