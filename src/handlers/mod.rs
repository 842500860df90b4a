//! # Handlers
//!
//! Strategie per formato: ottimizzazione di un file foglia oppure
//! unpack/pack di un container.
//!
//! ## Sottomoduli:
//! - `registry`: sceglie l'handler nativo o di conversione per un `FileFormat`
//! - `image`: esecuzione degli stage (programmi esterni e stage interni)
//! - `cleanup`: accetta o scarta il candidato e scrive il risultato
//! - `container`: stato di un container (archivio o animazione) tra unpack
//!   e repack
//! - `animated`: frame di GIF, APNG e WebP animati
//! - `mpo`: indice delle immagini di un JPEG multi-immagine
//!
//! ## Tabella degli handler:
//!
//! | Handler       | Output | Stage                                   |
//! |---------------|--------|-----------------------------------------|
//! | Png           | PNG    | to-png → oxipng / optipng / interno     |
//! | Jpeg          | JPEG   | mpo → jpegtran / jpegoptim              |
//! | Gif           | GIF    | gifsicle                                |
//! | WebpLossless  | WEBP   | to-png → cwebp                          |
//! | WebpAnimated  | WEBP   | frame PNG → img2webp                    |
//! | Svg           | SVG    | svgo                                    |
//! | archivi       | *      | codec interni (`archive`)               |

pub mod animated;
pub mod cleanup;
pub mod container;
pub mod image;
pub mod mpo;
pub mod registry;

use crate::archive::tar::TarCompression;
use crate::archive::ArchiveKind;
use crate::config::Config;
use crate::error::{OptimizeError, TaskResult};
use crate::file_format::{self, FileFormat};
use crate::path_info::{replace_suffix, suffix_of, PathInfo};
use crate::programs::{
    Program, ProgramTable, CWEBP, GIFSICLE, IMG2WEBP, JPEGOPTIM, JPEGTRAN, OPTIPNG, OXIPNG, SVGO,
};
use crate::report::ReportStats;
use std::sync::Arc;
use tracing::debug;

/// Immutable state shared by every task of a run
#[derive(Debug)]
pub struct Context {
    pub config: Config,
    pub programs: ProgramTable,
}

impl Context {
    pub fn new(config: Config, programs: ProgramTable) -> Arc<Self> {
        Arc::new(Self { config, programs })
    }
}

/// Static description of a handler
#[derive(Debug)]
pub struct Capabilities {
    pub output_format: &'static str,
    /// Accepted suffixes; the first one is used when renaming
    pub suffixes: &'static [&'static str],
    /// Groups run in order; each runs its first available program
    pub stages: &'static [&'static [Program]],
    pub archive: Option<ArchiveKind>,
    /// Unpacks into frames and packs them back
    pub frames: bool,
    pub packs: bool,
    /// Input formats the first external program reads directly
    pub native_inputs: &'static [&'static str],
}

const ARCHIVE_STAGES: &[&[Program]] = &[&[Program::Archive]];

const PNG: Capabilities = Capabilities {
    output_format: file_format::PNG,
    suffixes: &[".png"],
    stages: &[
        &[Program::ToPng],
        &[Program::External(OXIPNG), Program::External(OPTIPNG), Program::PngEncode],
    ],
    archive: None,
    frames: false,
    packs: false,
    native_inputs: &[file_format::PNG],
};

const JPEG: Capabilities = Capabilities {
    output_format: file_format::JPEG,
    suffixes: &[".jpg", ".jpeg"],
    stages: &[
        &[Program::MpoPrimary],
        &[Program::External(JPEGTRAN), Program::External(JPEGOPTIM)],
    ],
    archive: None,
    frames: false,
    packs: false,
    native_inputs: &[file_format::JPEG],
};

const GIF: Capabilities = Capabilities {
    output_format: file_format::GIF,
    suffixes: &[".gif"],
    stages: &[&[Program::External(GIFSICLE)]],
    archive: None,
    frames: false,
    packs: false,
    native_inputs: &[file_format::GIF],
};

const WEBP_LOSSLESS: Capabilities = Capabilities {
    output_format: file_format::WEBP,
    suffixes: &[".webp"],
    stages: &[&[Program::ToPng], &[Program::External(CWEBP)]],
    archive: None,
    frames: false,
    packs: false,
    native_inputs: &[file_format::PNG, file_format::WEBP, file_format::TIFF],
};

const WEBP_ANIMATED_LOSSLESS: Capabilities = Capabilities {
    output_format: file_format::WEBP,
    suffixes: &[".webp"],
    stages: &[&[Program::External(IMG2WEBP)]],
    archive: None,
    frames: true,
    packs: true,
    native_inputs: &[],
};

const SVG: Capabilities = Capabilities {
    output_format: file_format::SVG,
    suffixes: &[".svg"],
    stages: &[&[Program::External(SVGO)]],
    archive: None,
    frames: false,
    packs: false,
    native_inputs: &[file_format::SVG],
};

const fn archive(
    output_format: &'static str,
    suffixes: &'static [&'static str],
    kind: ArchiveKind,
    packs: bool,
) -> Capabilities {
    Capabilities {
        output_format,
        suffixes,
        stages: ARCHIVE_STAGES,
        archive: Some(kind),
        frames: false,
        packs,
        native_inputs: &[],
    }
}

const ZIP: Capabilities = archive(file_format::ZIP, &[".zip"], ArchiveKind::Zip, true);
const CBZ: Capabilities = archive(file_format::CBZ, &[".cbz"], ArchiveKind::Zip, true);
const EPUB: Capabilities = archive(file_format::EPUB, &[".epub"], ArchiveKind::Zip, true);
const RAR: Capabilities = archive(file_format::RAR, &[".rar"], ArchiveKind::Rar, false);
const CBR: Capabilities = archive(file_format::CBR, &[".cbr"], ArchiveKind::Rar, false);
const SEVEN_ZIP: Capabilities = archive(file_format::SEVEN_ZIP, &[".7z"], ArchiveKind::SevenZip, true);
const CB7: Capabilities = archive(file_format::CB7, &[".cb7"], ArchiveKind::SevenZip, true);
const TAR: Capabilities = archive(
    file_format::TAR,
    &[".tar"],
    ArchiveKind::Tar(TarCompression::None),
    true,
);
const TGZ: Capabilities = archive(
    file_format::TGZ,
    &[".tar.gz", ".tgz"],
    ArchiveKind::Tar(TarCompression::Gzip),
    true,
);
const TBZ: Capabilities = archive(
    file_format::TBZ,
    &[".tar.bz2", ".tbz", ".tbz2"],
    ArchiveKind::Tar(TarCompression::Bzip2),
    true,
);
const TXZ: Capabilities = archive(
    file_format::TXZ,
    &[".tar.xz", ".txz"],
    ArchiveKind::Tar(TarCompression::Xz),
    true,
);
const CBT: Capabilities = archive(
    file_format::CBT,
    &[".cbt"],
    ArchiveKind::Tar(TarCompression::None),
    true,
);

/// Closed set of handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Png,
    Jpeg,
    Gif,
    WebpLossless,
    WebpAnimatedLossless,
    Svg,
    Zip,
    Cbz,
    Epub,
    Rar,
    Cbr,
    SevenZip,
    Cb7,
    Tar,
    TarGz,
    TarBz,
    TarXz,
    Cbt,
}

impl HandlerKind {
    pub fn capabilities(&self) -> &'static Capabilities {
        match self {
            Self::Png => &PNG,
            Self::Jpeg => &JPEG,
            Self::Gif => &GIF,
            Self::WebpLossless => &WEBP_LOSSLESS,
            Self::WebpAnimatedLossless => &WEBP_ANIMATED_LOSSLESS,
            Self::Svg => &SVG,
            Self::Zip => &ZIP,
            Self::Cbz => &CBZ,
            Self::Epub => &EPUB,
            Self::Rar => &RAR,
            Self::Cbr => &CBR,
            Self::SevenZip => &SEVEN_ZIP,
            Self::Cb7 => &CB7,
            Self::Tar => &TAR,
            Self::TarGz => &TGZ,
            Self::TarBz => &TBZ,
            Self::TarXz => &TXZ,
            Self::Cbt => &CBT,
        }
    }

    pub fn output_format(&self) -> &'static str {
        self.capabilities().output_format
    }

    pub fn suffixes(&self) -> &'static [&'static str] {
        self.capabilities().suffixes
    }

    pub fn archive_kind(&self) -> Option<ArchiveKind> {
        self.capabilities().archive
    }

    pub fn is_archive(&self) -> bool {
        self.archive_kind().is_some()
    }

    pub fn holds_frames(&self) -> bool {
        self.capabilities().frames
    }

    /// Unpacked by the walker and repacked after its members
    pub fn is_container(&self) -> bool {
        self.is_archive() || self.holds_frames()
    }

    pub fn can_pack(&self) -> bool {
        self.capabilities().packs
    }

    /// Every stage has a runnable program
    pub fn is_available(&self, programs: &ProgramTable) -> bool {
        self.capabilities()
            .stages
            .iter()
            .all(|group| programs.first_available(group).is_some())
    }

    /// Name carrying this handler's suffix; an accepted suffix is kept as is
    pub fn final_name(&self, name: &str) -> String {
        let suffix = suffix_of(name);
        let suffixes = self.suffixes();
        if suffixes.contains(&suffix.as_str()) {
            name.to_string()
        } else {
            replace_suffix(name, suffixes[0])
        }
    }
}

/// What a pool task hands back to the control task
#[derive(Debug)]
pub struct TaskOutput {
    pub report: ReportStats,
    /// The unit of work, moved back out of the task
    pub path_info: Option<PathInfo>,
    /// Bytes or name of the unit changed
    pub changed: bool,
}

impl TaskOutput {
    pub fn failed(path_info: PathInfo, error: OptimizeError, container: bool) -> Self {
        let mut report = ReportStats::error(path_info.full_output_name(), path_info.bytes_in(), error);
        report.container = container;
        Self {
            report,
            path_info: Some(path_info),
            changed: false,
        }
    }
}

/// One handler bound to one path
#[derive(Debug)]
pub struct Handler {
    pub kind: HandlerKind,
    pub input_format: FileFormat,
    pub path_info: PathInfo,
}

impl Handler {
    pub fn new(kind: HandlerKind, input_format: FileFormat, path_info: PathInfo) -> Self {
        Self {
            kind,
            input_format,
            path_info,
        }
    }

    pub fn is_converting(&self) -> bool {
        self.kind.output_format() != self.input_format.format
    }

    /// Run every stage over the input bytes and return the candidate
    pub async fn optimize(&mut self, ctx: &Context) -> TaskResult<Vec<u8>> {
        let kind = self.kind;
        let format = self.input_format;
        let mut data = self.path_info.read_data().await?.to_vec();
        let mut current = format.format;

        for group in kind.capabilities().stages {
            let program = ctx
                .programs
                .first_available(group)
                .ok_or_else(|| OptimizeError::NoStages(format!("{:?}", kind)))?;
            debug!("🔄 {} stage {}", self.path_info.full_output_name(), program.name());
            let (output, output_format) =
                image::run_stage(program, kind, current, format.animated, data, ctx).await?;
            data = output;
            current = output_format;
        }
        Ok(data)
    }

    /// Optimize and clean up a leaf; any failure becomes the report
    pub async fn run(mut self, ctx: Arc<Context>) -> TaskOutput {
        let converting = self.is_converting();
        let candidate = match self.optimize(&ctx).await {
            Ok(candidate) => candidate,
            Err(e) => return TaskOutput::failed(self.path_info, e, false),
        };
        match cleanup::cleanup(
            &mut self.path_info,
            cleanup::Candidate::Bytes(candidate),
            self.kind,
            converting,
            &ctx.config,
        )
        .await
        {
            Ok((report, changed)) => TaskOutput {
                report,
                path_info: Some(self.path_info),
                changed,
            },
            Err(e) => TaskOutput::failed(self.path_info, e, false),
        }
    }
}
