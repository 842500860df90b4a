//! # Container Job
//!
//! Stato di un container tra unpack e repack: un archivio, oppure
//! un'immagine animata i cui membri sono i frame.
//!
//! ## Ciclo di vita:
//! 1. `unpack`: legge i membri (in `spawn_blocking`), assorbe i sidecar dei
//!    timestamp e restituisce i figli da visitare
//! 2. il walker visita i figli; quelli saltati tornano con `set_aside`
//! 3. `hydrate`: ogni `TaskOutput` di un figlio riempie il suo slot
//! 4. `repack`: task del pool che scrive il nuovo archivio e passa da `cleanup`
//!
//! ## Strategie di repack:
//! - **Patch in place** (ZIP/CBZ/EPUB su disco, senza conversione): copia di
//!   lavoro, rimozione dei membri cambiati con `ZipFile::remove_members`,
//!   append dei soli membri nuovi e nuova central directory
//! - **Pack completo**: nuovo archivio con `archive::pack`, membri
//!   nell'ordine originale
//! - **Frame**: WebP lossless animato assemblato da `animated::pack_webp`
//!
//! Se il repack fallisce l'archivio originale resta intatto.

use super::animated;
use super::cleanup::{self, working_file, Candidate};
use super::{Context, HandlerKind, TaskOutput};
use crate::archive::entry::{ArchiveEntry, NativeEntry};
use crate::archive::zip::{ZipEntry, ZipFile};
use crate::archive::{self, ArchiveKind, ArchiveSource, Listing, Member, PackOptions, ZIP_LEVEL};
use crate::error::{OptimizeError, TaskResult};
use crate::file_format::FileFormat;
use crate::path_info::PathInfo;
use crate::timestamps::{Timestamps, TIMESTAMPS_FILENAME};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// A member handed to the walker, tagged with its slot
#[derive(Debug)]
pub struct Child {
    pub slot: usize,
    pub path_info: PathInfo,
}

/// An unpacked container waiting for its members
#[derive(Debug)]
pub struct ContainerJob {
    pub kind: HandlerKind,
    pub input_format: FileFormat,
    pub path_info: PathInfo,
    /// Members in archive order; `None` while a child is out being walked
    slots: Vec<Option<Member>>,
    originals: Vec<Option<ArchiveEntry>>,
    changed: Vec<bool>,
    /// Source records that must not survive the repack
    deleted: Vec<ArchiveEntry>,
    comment: Option<Vec<u8>>,
    sidecar_consumed: bool,
    dispatched: bool,
    lost_members: usize,
}

fn is_sidecar(name: &str) -> bool {
    name.rsplit('/').next() == Some(TIMESTAMPS_FILENAME)
}

/// Unpack off the control task; the container bytes always come back
async fn read_listing<F>(path: Option<PathBuf>, data: Option<Vec<u8>>, read: F) -> (TaskResult<Listing>, Option<Vec<u8>>)
where
    F: FnOnce(ArchiveSource<'_>) -> TaskResult<Listing> + Send + 'static,
{
    let joined = tokio::task::spawn_blocking(move || {
        let listing = match (&data, &path) {
            (Some(bytes), _) => read(ArchiveSource::Bytes(bytes)),
            (None, Some(path)) => read(ArchiveSource::Path(path)),
            (None, None) => Err(OptimizeError::Archive("container has no path or data".to_string())),
        };
        (listing, data)
    })
    .await;
    match joined {
        Ok(result) => result,
        Err(e) => (Err(OptimizeError::Task(e.to_string())), None),
    }
}

impl ContainerJob {
    pub fn new(kind: HandlerKind, input_format: FileFormat, path_info: PathInfo) -> Self {
        Self {
            kind,
            input_format,
            path_info,
            slots: Vec::new(),
            originals: Vec::new(),
            changed: Vec::new(),
            deleted: Vec::new(),
            comment: None,
            sidecar_consumed: false,
            dispatched: false,
            lost_members: 0,
        }
    }

    /// Read every member. Timestamp sidecars are merged into `timestamps`
    /// and dropped; empty members stay in place without being walked.
    pub async fn unpack(&mut self, mut timestamps: Option<&mut Timestamps>) -> TaskResult<Vec<Child>> {
        if !self.kind.is_container() {
            return Err(OptimizeError::Archive(format!("{:?} is not a container", self.kind)));
        }
        let archive_kind = self.kind.archive_kind();
        let input_format = self.input_format.format;
        let data = self.path_info.take_data();
        let path = self.path_info.path().map(Path::to_path_buf);
        let (listing, data) = read_listing(path, data, move |source| match archive_kind {
            Some(kind) => archive::unpack(kind, source),
            None => animated::read_frames(input_format, source),
        })
        .await;
        if let Some(data) = data {
            self.path_info.set_data(data);
        }
        let listing = listing?;

        self.comment = listing.comment;
        let pseudo = self.path_info.archive_pseudo_path();
        let mut children = Vec::new();
        let frames = self.kind.holds_frames();
        // Members of an EPUB keep their formats, frames stay PNG
        let convert = self.path_info.convert && self.kind != HandlerKind::Epub && !frames;

        for member in listing.members {
            let slot = self.slots.len();
            self.originals.push(Some(member.entry.clone()));
            self.changed.push(false);

            if is_sidecar(member.entry.name()) {
                if let Some(store) = timestamps.as_deref_mut() {
                    let dir = Path::new(member.entry.name()).parent().unwrap_or(Path::new(""));
                    store.merge_serialized(&pseudo.join(dir), &member.data);
                    debug!("📥 Consumed timestamps from {}:{}", self.path_info.full_output_name(), member.entry.name());
                    self.deleted.push(member.entry);
                    self.sidecar_consumed = true;
                    self.slots.push(None);
                    continue;
                }
            }
            if member.data.is_empty() || is_sidecar(member.entry.name()) {
                self.slots.push(Some(member));
                continue;
            }

            let mut path_info = PathInfo::member(&self.path_info, member.entry, member.data, convert);
            if frames {
                path_info.frame = Some(slot);
            }
            self.slots.push(None);
            children.push(Child { slot, path_info });
        }
        Ok(children)
    }

    /// Put back a child that was skipped or had no handler
    pub fn set_aside(&mut self, child: Child) {
        let mut path_info = child.path_info;
        if let (Some(entry), Some(data)) = (path_info.archive_entry.take(), path_info.take_data()) {
            self.slots[child.slot] = Some(Member { entry, data });
        }
    }

    /// A child was handed to a handler
    pub fn mark_dispatched(&mut self) {
        self.dispatched = true;
    }

    /// Fill a slot from a finished child task
    pub fn hydrate(&mut self, slot: usize, output: &mut TaskOutput) {
        let Some(path_info) = output.path_info.as_mut() else {
            // The task died and took the member bytes with it
            self.lost_members += 1;
            return;
        };
        let (Some(entry), Some(data)) = (path_info.archive_entry.clone(), path_info.take_data()) else {
            self.lost_members += 1;
            return;
        };
        if output.changed {
            self.changed[slot] = true;
            if let Some(original) = self.originals[slot].take() {
                self.deleted.push(original);
            }
        }
        self.slots[slot] = Some(Member { entry, data });
    }

    /// Whether a new archive has to be written
    pub fn do_repack(&self, pack: HandlerKind) -> bool {
        if self.lost_members > 0 {
            warn!(
                "⚠️ {} member(s) of {} were lost, leaving it untouched",
                self.lost_members,
                self.path_info.full_output_name()
            );
            return false;
        }
        // Frames always go back through the assembler
        if self.kind.holds_frames() {
            return true;
        }
        let converting = pack != self.kind && self.dispatched;
        self.changed.iter().any(|c| *c) || self.sidecar_consumed || converting
    }

    /// Give back the container without repacking it
    pub fn into_path_info(self) -> PathInfo {
        self.path_info
    }

    fn patchable(&self, pack: HandlerKind) -> bool {
        pack == self.kind && self.kind.archive_kind() == Some(ArchiveKind::Zip) && !self.path_info.is_member()
    }

    /// Write the repacked container as a pool task
    pub async fn repack(mut self, pack: HandlerKind, ctx: Arc<Context>) -> TaskOutput {
        let name = self.path_info.full_output_name();
        let converting = pack.output_format() != self.input_format.format;
        let archive = self.kind.is_archive();
        let options = PackOptions {
            keep_metadata: ctx.config.keep_metadata,
            epub: pack == HandlerKind::Epub,
        };

        let candidate = if pack.holds_frames() {
            animated::pack_webp(self.take_members(), &ctx).await.map(Candidate::Bytes)
        } else if self.patchable(pack) {
            self.patch_in_place(options).await.map(Candidate::File)
        } else {
            self.pack_new(pack, options).await.map(Candidate::Bytes)
        };
        let candidate = match candidate {
            Ok(candidate) => candidate,
            Err(e) => return TaskOutput::failed(self.path_info, OptimizeError::repack(name, e), archive),
        };

        debug!("📦 Repacked {} as {}", name, pack.output_format());
        match cleanup::cleanup(&mut self.path_info, candidate, pack, converting, &ctx.config).await {
            Ok((report, changed)) => TaskOutput {
                report,
                path_info: Some(self.path_info),
                changed,
            },
            Err(e) => TaskOutput::failed(self.path_info, OptimizeError::repack(name, e), archive),
        }
    }

    fn take_members(&mut self) -> Vec<Member> {
        self.slots.drain(..).flatten().collect()
    }

    async fn pack_new(&mut self, pack: HandlerKind, options: PackOptions) -> TaskResult<Vec<u8>> {
        let kind = pack
            .archive_kind()
            .ok_or_else(|| OptimizeError::Archive(format!("{:?} cannot pack", pack)))?;
        let members = self.take_members();
        let comment = match kind {
            ArchiveKind::Zip => self.comment.take(),
            _ => None,
        };
        tokio::task::spawn_blocking(move || archive::pack(kind, &members, comment.as_deref(), options))
            .await
            .map_err(|e| OptimizeError::Task(e.to_string()))?
    }

    async fn patch_in_place(&mut self, options: PackOptions) -> TaskResult<NamedTempFile> {
        let source = self
            .path_info
            .path()
            .map(Path::to_path_buf)
            .ok_or_else(|| OptimizeError::Archive("in place patch needs a file".to_string()))?;
        let removed: Vec<ZipEntry> = self
            .deleted
            .iter()
            .filter_map(|entry| match &entry.native {
                NativeEntry::Zip(zip) => Some(zip.clone()),
                _ => None,
            })
            .collect();
        let changed: Vec<Member> = self
            .slots
            .iter_mut()
            .zip(&self.changed)
            .filter(|(_, changed)| **changed)
            .filter_map(|(slot, _)| slot.take())
            .collect();

        tokio::task::spawn_blocking(move || patch_zip(&source, &removed, &changed, options))
            .await
            .map_err(|e| OptimizeError::Task(e.to_string()))?
    }
}

/// Copy `source` beside itself, cut out `removed` and append `changed`
fn patch_zip(source: &Path, removed: &[ZipEntry], changed: &[Member], options: PackOptions) -> TaskResult<NamedTempFile> {
    let working = working_file(source)?;
    std::fs::copy(source, working.path())?;
    let file = OpenOptions::new().read(true).write(true).open(working.path())?;

    let mut zip = ZipFile::open(file)?;
    let reclaimed = zip.remove_members(removed)?;
    debug!("✂️  Reclaimed {} bytes from {}", reclaimed, source.display());
    for member in changed {
        zip.append(archive::zip_record(member, options), &member.data, ZIP_LEVEL)?;
    }
    let (file, end) = zip.finish()?;
    file.set_len(end)?;
    file.sync_all()?;
    Ok(working)
}
