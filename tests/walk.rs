//! End to end runs of the walker over real directories, with a stand-in
//! for oxipng so results don't depend on what the host has installed.
#![cfg(unix)]

use image::codecs::gif::GifEncoder;
use image::{Delay, Frame, ImageBuffer, ImageOutputFormat, Rgb, Rgba, RgbaImage};
use media_squeeze::archive::entry::{ArchiveEntry, NativeEntry};
use media_squeeze::archive::zip::ZipEntry;
use media_squeeze::archive::tar::TarCompression;
use media_squeeze::archive::{self, ArchiveKind, ArchiveSource, Member, PackOptions};
use media_squeeze::{Config, Context, ProgramTable, Totals, Walker};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A tiny valid PNG
fn small_png() -> Vec<u8> {
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(4, 4, Rgb([200u8, 30, 30]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageOutputFormat::Png).unwrap();
    out.into_inner()
}

/// The small PNG with incompressible trailing padding up to `size` bytes
fn padded_png(size: usize) -> Vec<u8> {
    let mut png = small_png();
    assert!(png.len() < size);
    let mut state = 0x2545_f491_u32;
    while png.len() < size {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        png.push(state as u8);
    }
    png
}

/// Fake oxipng that ignores its input and prints `output`
fn fake_oxipng(tools: &TempDir, output: &[u8]) -> ProgramTable {
    let result = tools.path().join("small.png");
    std::fs::write(&result, output).unwrap();
    let script = tools.path().join("oxipng");
    std::fs::write(
        &script,
        format!("#!/bin/sh\ncat > /dev/null\ncat '{}'\n", result.display()),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    ProgramTable::from_paths([("oxipng", script)])
}

/// Fake oxipng that echoes its input back
fn echo_oxipng(tools: &TempDir) -> ProgramTable {
    let script = tools.path().join("oxipng");
    std::fs::write(&script, "#!/bin/sh\ncat\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    ProgramTable::from_paths([("oxipng", script)])
}

/// Shell script standing in for `name`
fn script(tools: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = tools.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn pack_bytes(kind: ArchiveKind, members: &[(&str, &[u8])]) -> Vec<u8> {
    let members: Vec<_> = members
        .iter()
        .enumerate()
        .map(|(index, (name, data))| Member {
            entry: ArchiveEntry::new(index, NativeEntry::Zip(ZipEntry::new(*name))),
            data: data.to_vec(),
        })
        .collect();
    archive::pack(kind, &members, None, PackOptions::default()).unwrap()
}

fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
    std::fs::write(path, pack_bytes(ArchiveKind::Zip, members)).unwrap();
}

fn members_of(kind: ArchiveKind, source: ArchiveSource<'_>) -> BTreeMap<String, Vec<u8>> {
    archive::unpack(kind, source)
        .unwrap()
        .members
        .into_iter()
        .map(|m| (m.entry.name().to_string(), m.data))
        .collect()
}

fn zip_members(path: &Path) -> Vec<(String, Vec<u8>)> {
    members_of(ArchiveKind::Zip, ArchiveSource::Path(path)).into_iter().collect()
}

fn config(formats: &[&str]) -> Config {
    let mut config = Config {
        formats: formats.iter().map(|f| f.to_string()).collect(),
        jobs: 2,
        ..Default::default()
    };
    config.normalize();
    config.validate().unwrap();
    config
}

async fn run(config: Config, programs: ProgramTable, paths: &[PathBuf]) -> Totals {
    Walker::new(Context::new(config, programs))
        .unwrap()
        .run(paths)
        .await
        .unwrap()
}

fn fixture(dir: &TempDir) {
    std::fs::write(dir.path().join("img.png"), padded_png(1000)).unwrap();
    write_zip(
        &dir.path().join("c.zip"),
        &[("x.png", &padded_png(500)), ("y.txt", b"just some words")],
    );
}

#[tokio::test]
async fn test_images_and_zip_members_are_optimized() {
    let dir = TempDir::new().unwrap();
    let tools = TempDir::new().unwrap();
    fixture(&dir);
    let programs = fake_oxipng(&tools, &small_png());

    let totals = run(config(&["png", "zip"]), programs, &[dir.path().to_path_buf()]).await;

    assert_eq!(totals.bytes_in, 1500);
    assert_eq!(totals.files, 2);
    assert!(!totals.has_errors());
    assert_eq!(std::fs::read(dir.path().join("img.png")).unwrap(), small_png());

    // Patched in place: the replaced member is appended after the rest
    let members: BTreeMap<_, _> = zip_members(&dir.path().join("c.zip")).into_iter().collect();
    assert_eq!(members.len(), 2);
    assert_eq!(members["x.png"], small_png());
    assert_eq!(members["y.txt"], b"just some words");
}

#[tokio::test]
async fn test_second_run_skips_everything() {
    let dir = TempDir::new().unwrap();
    let tools = TempDir::new().unwrap();
    fixture(&dir);
    let root = [dir.path().to_path_buf()];

    let first = run(config(&["png", "zip"]), fake_oxipng(&tools, &small_png()), &root).await;
    assert!(first.files > 0);
    assert!(dir.path().join(".media-squeeze_timestamps.json").exists());

    let second = run(config(&["png", "zip"]), fake_oxipng(&tools, &small_png()), &root).await;
    assert_eq!(second.files, 0);
    assert_eq!(second.bytes_in, 0);
}

#[tokio::test]
async fn test_changed_formats_invalidate_timestamps() {
    let dir = TempDir::new().unwrap();
    let tools = TempDir::new().unwrap();
    fixture(&dir);
    let root = [dir.path().to_path_buf()];

    let first = run(config(&["png", "zip"]), fake_oxipng(&tools, &small_png()), &root).await;
    assert_eq!(first.files, 2);

    let second = run(config(&["png", "zip", "gif"]), fake_oxipng(&tools, &small_png()), &root).await;
    assert_eq!(second.files, 2);
    // Already optimal, so nothing is rewritten
    assert_eq!(second.saved_files, 0);
}

#[tokio::test]
async fn test_unchanged_zip_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let tools = TempDir::new().unwrap();
    let zip = dir.path().join("c.zip");
    write_zip(&zip, &[("x.png", &small_png()), ("notes.txt", b"hello")]);
    let before = std::fs::read(&zip).unwrap();

    let totals = run(config(&["png", "zip"]), echo_oxipng(&tools), &[zip.clone()]).await;

    assert_eq!(totals.files, 1);
    assert_eq!(totals.saved_files, 0);
    assert_eq!(std::fs::read(&zip).unwrap(), before);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let tools = TempDir::new().unwrap();
    fixture(&dir);
    let zip_before = std::fs::read(dir.path().join("c.zip")).unwrap();
    let config = Config {
        dry_run: true,
        ..config(&["png", "zip"])
    };

    let totals = run(config, fake_oxipng(&tools, &small_png()), &[dir.path().to_path_buf()]).await;

    assert_eq!(totals.files, 2);
    assert_eq!(std::fs::read(dir.path().join("img.png")).unwrap(), padded_png(1000));
    assert_eq!(std::fs::read(dir.path().join("c.zip")).unwrap(), zip_before);
    assert!(!dir.path().join(".media-squeeze_timestamps.json").exists());
}

#[tokio::test]
async fn test_runs_without_external_programs() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("broken.png"), b"\x89PNG\r\n\x1a\nnot really").unwrap();
    std::fs::write(dir.path().join("ok.png"), padded_png(300)).unwrap();

    // No external programs: the in-process encoder is the last resort
    let totals = run(config(&["png"]), ProgramTable::default(), &[dir.path().to_path_buf()]).await;

    assert!(!totals.has_errors());
    assert_eq!(totals.files, 1);
    assert_eq!(totals.bytes_in, 300);
}

#[tokio::test]
async fn test_nested_comic_inside_zip_is_optimized() {
    let dir = TempDir::new().unwrap();
    let tools = TempDir::new().unwrap();
    let inner = pack_bytes(ArchiveKind::Zip, &[("x.png", &padded_png(500))]);
    let outer = dir.path().join("outer.zip");
    write_zip(&outer, &[("inner.cbz", &inner), ("readme.txt", b"hello")]);

    let totals = run(
        config(&["png", "zip", "cbz"]),
        fake_oxipng(&tools, &small_png()),
        &[outer.clone()],
    )
    .await;

    assert!(!totals.has_errors());
    assert_eq!(totals.files, 1);
    assert_eq!(totals.bytes_in, 500);

    let members: BTreeMap<_, _> = zip_members(&outer).into_iter().collect();
    assert_eq!(members.len(), 2);
    assert_eq!(members["readme.txt"], b"hello");
    let inner = members_of(ArchiveKind::Zip, ArchiveSource::Bytes(&members["inner.cbz"]));
    assert_eq!(inner.len(), 1);
    assert_eq!(inner["x.png"], small_png());
}

#[tokio::test]
async fn test_tgz_round_trip() {
    let dir = TempDir::new().unwrap();
    let tools = TempDir::new().unwrap();
    let tgz = dir.path().join("pics.tgz");
    let kind = ArchiveKind::Tar(TarCompression::Gzip);
    std::fs::write(
        &tgz,
        pack_bytes(kind, &[("x.png", &padded_png(800)), ("notes.txt", b"kept as is")]),
    )
    .unwrap();

    let totals = run(config(&["png", "tgz"]), fake_oxipng(&tools, &small_png()), &[tgz.clone()]).await;

    assert!(!totals.has_errors());
    assert_eq!(totals.files, 1);
    assert_eq!(totals.saved_files, 1);
    let members = members_of(kind, ArchiveSource::Path(&tgz));
    assert_eq!(members.len(), 2);
    assert_eq!(members["x.png"], small_png());
    assert_eq!(members["notes.txt"], b"kept as is");
}

#[tokio::test]
async fn test_cb7_round_trip() {
    let dir = TempDir::new().unwrap();
    let tools = TempDir::new().unwrap();
    let cb7 = dir.path().join("book.cb7");
    std::fs::write(
        &cb7,
        pack_bytes(ArchiveKind::SevenZip, &[("p1.png", &padded_png(900)), ("info.txt", b"chapter one")]),
    )
    .unwrap();

    let totals = run(config(&["png", "cb7"]), fake_oxipng(&tools, &small_png()), &[cb7.clone()]).await;

    assert!(!totals.has_errors());
    assert_eq!(totals.files, 1);
    // Still a 7z container under the same name
    assert!(cb7.exists());
    let members = members_of(ArchiveKind::SevenZip, ArchiveSource::Path(&cb7));
    assert_eq!(members.len(), 2);
    assert_eq!(members["p1.png"], small_png());
    assert_eq!(members["info.txt"], b"chapter one");
}

#[tokio::test]
async fn test_animated_gif_becomes_webp() {
    let dir = TempDir::new().unwrap();
    let tools = TempDir::new().unwrap();
    let mut gif = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut gif);
        let frames = (0..3u8).map(|i| {
            Frame::from_parts(
                RgbaImage::from_pixel(8, 8, Rgba([i * 70, 20, 90, 255])),
                0,
                0,
                Delay::from_numer_denom_ms(50, 1),
            )
        });
        encoder.encode_frames(frames).unwrap();
    }
    std::fs::write(dir.path().join("anim.gif"), &gif).unwrap();

    // Records the delays it was given as its whole output
    let img2webp = script(
        &tools,
        "img2webp",
        "out=\"\"\ndelays=\"\"\nwhile [ $# -gt 0 ]; do\n  case \"$1\" in\n    -o) out=\"$2\"; shift ;;\n    -d) delays=\"$delays $2\"; shift ;;\n  esac\n  shift\ndone\nprintf 'RIFF%s' \"$delays\" > \"$out\"\n",
    );
    let oxipng = script(&tools, "oxipng", "cat\n");
    let programs = ProgramTable::from_paths([("img2webp", img2webp), ("oxipng", oxipng)]);
    let mut config = Config {
        formats: ["GIF".to_string(), "PNG".to_string()].into_iter().collect(),
        convert_to: ["WEBP".to_string()].into_iter().collect(),
        jobs: 2,
        ..Default::default()
    };
    config.normalize();
    config.validate().unwrap();

    let totals = run(config, programs, &[dir.path().to_path_buf()]).await;

    assert!(!totals.has_errors());
    assert!(!dir.path().join("anim.gif").exists());
    assert_eq!(std::fs::read(dir.path().join("anim.webp")).unwrap(), b"RIFF 50 50 50");
}
