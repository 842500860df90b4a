//! # Image Stages
//!
//! Esecuzione di un singolo stage di ottimizzazione su un buffer.
//!
//! ## Strategia Tool Selection
//!
//! ### PNG (priorità decrescente):
//! 1. **oxipng**: stdin/stdout, strip sicuro dei metadata
//! 2. **optipng**: lavora solo su file, strip completo
//! 3. **interno**: re-encode con il crate `image` a compressione massima
//!
//! ### JPEG:
//! 0. **interno**: un MPO viene ridotto alla sua immagine primaria
//! 1. **jpegtran**: ottimizzazione lossless, progressive
//! 2. **jpegoptim**: fallback, stdin/stdout
//!
//! ### GIF / SVG:
//! - **gifsicle** `--optimize=3`, **svgo** `--multipass`
//!
//! ### WebP lossless:
//! - **cwebp** `-lossless -z 9`, solo su file. I formati che cwebp non legge
//!   vengono prima convertiti in PNG dallo stage interno `ToPng`.
//!
//! Gli stage interni girano in `spawn_blocking`: decodifica e codifica sono
//! CPU-bound.

use super::{mpo, Context, HandlerKind};
use crate::error::{OptimizeError, TaskResult};
use crate::file_format;
use crate::programs::{self, Program, CWEBP, GIFSICLE, JPEGOPTIM, JPEGTRAN, OPTIPNG, OXIPNG, SVGO};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ColorType, DynamicImage, ImageEncoder};
use std::path::Path;

/// How an external program receives its input
enum Invocation {
    Pipe(Vec<String>),
    Files {
        in_suffix: &'static str,
        out_suffix: &'static str,
        args: fn(&Path, &Path, bool) -> Vec<String>,
    },
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn optipng_args(input: &Path, output: &Path, keep_metadata: bool) -> Vec<String> {
    let mut args = strings(&["-o2", "-quiet"]);
    if !keep_metadata {
        args.extend(strings(&["-strip", "all"]));
    }
    args.push("-out".to_string());
    args.push(output.display().to_string());
    args.push(input.display().to_string());
    args
}

fn cwebp_args(input: &Path, output: &Path, keep_metadata: bool) -> Vec<String> {
    let mut args = strings(&["-lossless", "-z", "9", "-mt", "-quiet", "-metadata"]);
    args.push(if keep_metadata { "all" } else { "none" }.to_string());
    args.push(input.display().to_string());
    args.push("-o".to_string());
    args.push(output.display().to_string());
    args
}

fn suffix_for(format: &str) -> &'static str {
    match format {
        file_format::WEBP => ".webp",
        file_format::TIFF => ".tiff",
        file_format::JPEG => ".jpg",
        file_format::GIF => ".gif",
        _ => ".png",
    }
}

fn invocation(name: &str, input_format: &str, keep_metadata: bool) -> Option<Invocation> {
    let invocation = match name {
        OXIPNG => {
            let mut args = strings(&["-o", "2"]);
            if !keep_metadata {
                args.extend(strings(&["--strip", "safe"]));
            }
            args.extend(strings(&["--stdout", "-"]));
            Invocation::Pipe(args)
        }
        OPTIPNG => Invocation::Files {
            in_suffix: ".png",
            out_suffix: ".png",
            args: optipng_args,
        },
        JPEGTRAN => Invocation::Pipe(strings(&[
            "-optimize",
            "-progressive",
            "-copy",
            if keep_metadata { "all" } else { "none" },
        ])),
        JPEGOPTIM => {
            let mut args = strings(&["--stdin", "--stdout"]);
            if !keep_metadata {
                args.push("--strip-all".to_string());
            }
            Invocation::Pipe(args)
        }
        GIFSICLE => Invocation::Pipe(strings(&["--optimize=3"])),
        CWEBP => Invocation::Files {
            in_suffix: suffix_for(input_format),
            out_suffix: ".webp",
            args: cwebp_args,
        },
        SVGO => Invocation::Pipe(strings(&["--multipass", "-i", "-", "-o", "-"])),
        _ => return None,
    };
    Some(invocation)
}

async fn run_external(name: &'static str, input_format: &str, data: Vec<u8>, ctx: &Context) -> TaskResult<Vec<u8>> {
    let path = ctx
        .programs
        .path(name)
        .ok_or_else(|| OptimizeError::NoStages(name.to_string()))?;
    let keep_metadata = ctx.config.keep_metadata;
    match invocation(name, input_format, keep_metadata) {
        Some(Invocation::Pipe(args)) => programs::run(path, &args, &data).await,
        Some(Invocation::Files {
            in_suffix,
            out_suffix,
            args,
        }) => {
            programs::run_files(path, &data, in_suffix, out_suffix, |i, o| args(i, o, keep_metadata)).await
        }
        // Programs injected under an unknown name behave like a filter
        None => programs::run(path, &[], &data).await,
    }
}

/// Encode with the best PNG compression the `image` crate offers
pub fn encode_png(image: &DynamicImage) -> TaskResult<Vec<u8>> {
    let image = match image.color() {
        ColorType::L8
        | ColorType::La8
        | ColorType::Rgb8
        | ColorType::Rgba8
        | ColorType::L16
        | ColorType::La16
        | ColorType::Rgb16
        | ColorType::Rgba16 => image.clone(),
        _ => DynamicImage::ImageRgba8(image.to_rgba8()),
    };
    let mut buffer = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut buffer, CompressionType::Best, FilterType::Adaptive);
    encoder.write_image(image.as_bytes(), image.width(), image.height(), image.color())?;
    Ok(buffer)
}

async fn blocking<F>(f: F) -> TaskResult<Vec<u8>>
where
    F: FnOnce() -> TaskResult<Vec<u8>> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| OptimizeError::Task(e.to_string()))?
}

/// Run one stage; returns the new bytes and their format
pub async fn run_stage(
    program: Program,
    kind: HandlerKind,
    input_format: &'static str,
    animated: bool,
    data: Vec<u8>,
    ctx: &Context,
) -> TaskResult<(Vec<u8>, &'static str)> {
    match program {
        Program::ToPng => {
            if kind.capabilities().native_inputs.contains(&input_format) {
                return Ok((data, input_format));
            }
            let png = blocking(move || encode_png(&image::load_from_memory(&data)?)).await?;
            Ok((png, file_format::PNG))
        }
        Program::PngEncode => {
            // The in-process encoder writes a single frame
            if animated {
                return Ok((data, input_format));
            }
            let png = blocking(move || encode_png(&image::load_from_memory(&data)?)).await?;
            Ok((png, file_format::PNG))
        }
        Program::MpoPrimary => {
            if input_format != file_format::MPO {
                return Ok((data, input_format));
            }
            let jpeg = blocking(move || mpo::primary_image(&data)).await?;
            Ok((jpeg, file_format::JPEG))
        }
        Program::External(name) => {
            let output = run_external(name, input_format, data, ctx).await?;
            Ok((output, kind.output_format()))
        }
        Program::Archive => Err(OptimizeError::NoStages(format!(
            "{:?} is a container handler",
            kind
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::programs::ProgramTable;
    use image::{ImageBuffer, Rgb, Rgba};

    fn context() -> Context {
        Context {
            config: Config::default(),
            programs: ProgramTable::default(),
        }
    }

    fn bmp_bytes() -> Vec<u8> {
        let img = ImageBuffer::from_fn(8, 8, |x, y| Rgb([(x * 30) as u8, (y * 30) as u8, 0]));
        let mut out = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageOutputFormat::Bmp)
            .unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_to_png_converts_foreign_input() {
        let ctx = context();
        let (png, format) = run_stage(Program::ToPng, HandlerKind::Png, file_format::BMP, false, bmp_bytes(), &ctx)
            .await
            .unwrap();
        assert_eq!(format, file_format::PNG);
        assert!(png.starts_with(b"\x89PNG"));
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 8));
    }

    #[tokio::test]
    async fn test_to_png_passes_native_input() {
        let ctx = context();
        let data = b"already webp".to_vec();
        let (out, format) = run_stage(
            Program::ToPng,
            HandlerKind::WebpLossless,
            file_format::WEBP,
            false,
            data.clone(),
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(out, data);
        assert_eq!(format, file_format::WEBP);
    }

    #[tokio::test]
    async fn test_png_encode_skips_animation() {
        let ctx = context();
        let data = b"apng".to_vec();
        let (out, _) = run_stage(Program::PngEncode, HandlerKind::Png, file_format::PNG, true, data.clone(), &ctx)
            .await
            .unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_mpo_stage_keeps_the_primary_image() {
        let ctx = context();
        let (file, primary) = mpo::tests::mpo_bytes();
        let (out, format) = run_stage(Program::MpoPrimary, HandlerKind::Jpeg, file_format::MPO, false, file, &ctx)
            .await
            .unwrap();
        assert_eq!(format, file_format::JPEG);
        assert_eq!(out, primary);

        let (out, format) = run_stage(
            Program::MpoPrimary,
            HandlerKind::Jpeg,
            file_format::JPEG,
            false,
            b"jpeg".to_vec(),
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!((out.as_slice(), format), (&b"jpeg"[..], file_format::JPEG));
    }

    #[test]
    fn test_encode_png_handles_alpha() {
        let img = ImageBuffer::from_pixel(4, 4, Rgba([1u8, 2, 3, 128]));
        let png = encode_png(&DynamicImage::ImageRgba8(img)).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.color(), ColorType::Rgba8);
    }

    #[test]
    fn test_program_arguments() {
        let Some(Invocation::Pipe(args)) = invocation(OXIPNG, file_format::PNG, false) else {
            panic!("oxipng reads stdin");
        };
        assert_eq!(args, strings(&["-o", "2", "--strip", "safe", "--stdout", "-"]));

        let Some(Invocation::Files { in_suffix, args, .. }) = invocation(CWEBP, file_format::TIFF, true) else {
            panic!("cwebp works on files");
        };
        assert_eq!(in_suffix, ".tiff");
        let built = args(Path::new("/t/in.tiff"), Path::new("/t/out.webp"), true);
        assert_eq!(built[6], "all");
        assert_eq!(built.last().map(String::as_str), Some("/t/out.webp"));

        assert!(invocation("mystery", file_format::PNG, false).is_none());
    }
}
