//! # Walker
//!
//! Orchestratore principale: visita directory e archivi, invia il lavoro al
//! pool e raccoglie i risultati dal basso verso l'alto.
//!
//! ## Responsabilità:
//! - Per ogni path: Skipper → Format Detector → Handler Registry
//! - I file foglia diventano task del pool; i container (archivi e immagini
//!   animate) vengono aperti sul task di controllo, i loro membri visitati
//!   come file normali e il repack inviato al pool
//! - I frame di un'animazione non entrano nei totali: conta l'immagine
//!   ricomposta, i frame solo se falliscono
//! - Una directory viene finalizzata (timestamp + compattazione) solo dopo
//!   che tutti i suoi figli sono terminati, e solo se nessuno è fallito
//! - Unico proprietario di `Timestamps`, `Totals` e della progress bar
//!
//! ## Ordine di visita:
//! Sottodirectory prima, poi i file, entrambi in ordine alfabetico.

use super::pool::{TaskHandle, TaskPool};
use super::task_graph::{NodeId, NodeKind, TaskGraph};
use crate::detect::{self, Detected};
use crate::error::ConfigError;
use crate::handlers::container::{Child, ContainerJob};
use crate::handlers::registry::Registry;
use crate::handlers::{Context, Handler, TaskOutput};
use crate::json_output::JsonMessage;
use crate::path_info::{self, PathInfo};
use crate::progress::ProgressManager;
use crate::report::{ReportStats, Totals};
use crate::skipper::Skipper;
use crate::timestamps::Timestamps;
use anyhow::Result;
use futures::future::{FutureExt, LocalBoxFuture};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// What became of one path handed to `dispatch`
enum Dispatch {
    /// Skipped, unrecognized or without a handler
    Skipped(PathInfo),
    /// A container that needs no repack
    Untouched(PathInfo),
    Pending(TaskHandle),
    Done(TaskOutput),
}

/// Drives one run over a set of root paths
pub struct Walker {
    ctx: Arc<Context>,
    registry: Registry,
    skipper: Skipper,
    pool: TaskPool,
    graph: TaskGraph,
    totals: Totals,
    progress: ProgressManager,
    done: usize,
}

impl Walker {
    pub fn new(ctx: Arc<Context>) -> Result<Self, ConfigError> {
        let registry = Registry::new(&ctx.config, &ctx.programs)?;
        let skipper = Skipper::new(&ctx.config)?;
        let pool = TaskPool::new(ctx.config.jobs);
        let progress = ProgressManager::new(ctx.config.json_output || ctx.config.list_only);
        Ok(Self {
            ctx,
            registry,
            skipper,
            pool,
            graph: TaskGraph::new(),
            totals: Totals::new(),
            progress,
            done: 0,
        })
    }

    /// Walk every root and return the totals. Missing roots are fatal and
    /// are checked before anything is scheduled.
    pub async fn run(mut self, paths: &[PathBuf]) -> Result<Totals> {
        if let Some(missing) = paths.iter().find(|p| !p.exists() && !p.is_symlink()) {
            return Err(ConfigError::MissingPath(missing.clone()).into());
        }

        if self.ctx.config.json_output {
            JsonMessage::start(paths.to_vec(), &self.ctx.config).emit();
        } else {
            self.log_configuration();
        }

        for path in paths {
            self.walk_top(path).await?;
        }

        debug!("🌳 Walked {} directories and containers", self.graph.len());
        self.progress.finish(&self.totals.summary(self.ctx.config.dry_run));
        Ok(self.totals)
    }

    fn log_configuration(&self) {
        let config = &self.ctx.config;
        let formats: Vec<_> = config.formats.iter().cloned().collect();
        info!("🔎 Optimizing formats: {}", formats.join(", "));
        if !config.convert_to.is_empty() {
            let targets: Vec<_> = config.convert_to.iter().cloned().collect();
            info!("🔄 Converting to: {}", targets.join(", "));
        }
        if config.dry_run {
            info!("🧪 Dry run mode: no files will be modified");
        }
        if config.list_only {
            info!("📋 List mode: files are only identified");
        }
        debug!("🔧 {} concurrent jobs", self.pool.jobs());
    }

    async fn walk_top(&mut self, path: &Path) -> Result<()> {
        let is_dir = path.is_dir() && !(path.is_symlink() && !self.ctx.config.symlinks);
        let (root, path) = if is_dir {
            (path.to_path_buf(), path.to_path_buf())
        } else {
            let root = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let file = path.file_name().map(|n| root.join(n)).unwrap_or_else(|| path.to_path_buf());
            (root, file)
        };

        let config = &self.ctx.config;
        let mut timestamps = if config.timestamps {
            // Sidecars below the root belong to this run only when it descends into them
            let descend = is_dir && config.recurse;
            Some(Timestamps::load(&root, config, descend).await?)
        } else {
            None
        };
        let case_sensitive = if config.dry_run || config.list_only {
            path_info::assumed_case_sensitive()
        } else {
            path_info::is_case_sensitive(&root)
        };
        let info = PathInfo::from_path(path, root.clone(), true, case_sensitive);

        if is_dir {
            if self.skipper.skippable(&info).is_none() {
                self.walk_dir(info, None, &mut timestamps).await;
            }
        } else {
            let node = self.graph.add(NodeKind::Directory, root.clone(), None);
            let dispatch = self.dispatch(info, node, &mut timestamps).await;
            if let Dispatch::Pending(handle) = dispatch {
                self.graph.register(node, None, handle);
            } else {
                self.settle(dispatch, &mut timestamps);
            }
            for pending in self.graph.finalize(node) {
                let output = pending.handle.resolve().await;
                self.settle(Dispatch::Done(output), &mut timestamps);
            }
        }

        if let Some(store) = timestamps.as_mut() {
            if !self.ctx.config.dry_run && !self.ctx.config.list_only {
                match store.dump().await {
                    Ok(()) => debug!("💾 Saved {} timestamps under {}", store.len(), root.display()),
                    Err(e) => warn!("⚠️ Could not save timestamps under {}: {}", root.display(), e),
                }
            }
        }
        Ok(())
    }

    /// Walk a directory; true if every child finished without error
    fn walk_dir<'a>(
        &'a mut self,
        dir: PathInfo,
        parent: Option<NodeId>,
        timestamps: &'a mut Option<Timestamps>,
    ) -> LocalBoxFuture<'a, bool> {
        async move {
            let Some(dir_path) = dir.path().map(Path::to_path_buf) else {
                return false;
            };
            let node = self.graph.add(NodeKind::Directory, dir_path.clone(), parent);
            self.progress.set_message(&format!("📁 {}", dir_path.display()));

            let (entries, mut ok) = list_dir(&dir_path);
            // A directory entry covers its whole subtree, so a shallow walk
            // that passed over subdirectories must not record one
            let mut complete = true;
            for entry in entries {
                let info = PathInfo::from_path(entry, dir.top_path.clone(), dir.convert, dir.is_case_sensitive);
                if info.is_dir() {
                    if !self.ctx.config.recurse {
                        complete = false;
                        continue;
                    }
                    if self.skipper.skippable(&info).is_some() {
                        continue;
                    }
                    ok &= self.walk_dir(info, Some(node), timestamps).await;
                    continue;
                }
                match self.dispatch(info, node, timestamps).await {
                    Dispatch::Pending(handle) => self.graph.register(node, None, handle),
                    other => ok &= self.settle(other, timestamps),
                }
            }

            for pending in self.graph.finalize(node) {
                let output = pending.handle.resolve().await;
                ok &= self.settle(Dispatch::Done(output), timestamps);
            }

            if ok {
                if let Some(store) = timestamps.as_mut().filter(|_| complete) {
                    store.set(&dir_path, None, true);
                }
            } else {
                debug!("📁 {} had failures, not recording its timestamp", dir_path.display());
            }
            ok
        }
        .boxed_local()
    }

    /// Skip-check, detect and hand a path to its handler
    fn dispatch<'a>(
        &'a mut self,
        info: PathInfo,
        node: NodeId,
        timestamps: &'a mut Option<Timestamps>,
    ) -> LocalBoxFuture<'a, Dispatch> {
        async move {
            if self.skipper.skip(&info, timestamps.as_ref()).is_some() {
                return Dispatch::Skipped(info);
            }
            let Some(detected) = detect::detect(&info) else {
                debug!("❔ {} is not a recognized format", info.full_output_name());
                return Dispatch::Skipped(info);
            };
            let Some(kind) = self.registry.handler_for(&detected.format, info.convert) else {
                debug!("🚫 No handler for {} ({})", info.full_output_name(), detected.format);
                return Dispatch::Skipped(info);
            };

            if self.ctx.config.list_only {
                self.list(&info, &detected);
                if !kind.is_archive() {
                    return Dispatch::Skipped(info);
                }
            }

            if kind.is_container() {
                let job = ContainerJob::new(kind, detected.format, info);
                return self.walk_container(job, node, timestamps).await;
            }

            let label = info.full_output_name();
            let bytes_in = info.bytes_in();
            let handler = Handler::new(kind, detected.format, info);
            Dispatch::Pending(self.pool.submit(label, bytes_in, handler.run(self.ctx.clone())))
        }
        .boxed_local()
    }

    /// Unpack, walk the members, wait for them and schedule the repack
    fn walk_container<'a>(
        &'a mut self,
        mut job: ContainerJob,
        parent: NodeId,
        timestamps: &'a mut Option<Timestamps>,
    ) -> LocalBoxFuture<'a, Dispatch> {
        async move {
            let name = job.path_info.full_output_name();
            let node = self.graph.add(NodeKind::Container, PathBuf::from(&name), Some(parent));
            self.progress.set_message(&format!("📦 {}", name));

            let children = match job.unpack(timestamps.as_mut()).await {
                Ok(children) => children,
                Err(e) => {
                    self.graph.finalize(node);
                    let archive = job.kind.is_archive();
                    return Dispatch::Done(TaskOutput::failed(job.into_path_info(), e, archive));
                }
            };
            debug!("📦 {} has {} member(s) to walk", name, children.len());
            let frames = job.kind.holds_frames();

            for Child { slot, path_info } in children {
                match self.dispatch(path_info, node, timestamps).await {
                    Dispatch::Skipped(path_info) => job.set_aside(Child { slot, path_info }),
                    Dispatch::Untouched(path_info) => {
                        job.mark_dispatched();
                        job.set_aside(Child { slot, path_info });
                    }
                    Dispatch::Pending(handle) => {
                        job.mark_dispatched();
                        self.graph.register(node, Some(slot), handle);
                    }
                    Dispatch::Done(mut output) => {
                        job.mark_dispatched();
                        job.hydrate(slot, &mut output);
                        self.record_member(output.report, frames);
                    }
                }
            }

            for pending in self.graph.finalize(node) {
                let mut output = pending.handle.resolve().await;
                if let Some(slot) = pending.slot {
                    job.hydrate(slot, &mut output);
                }
                self.record_member(output.report, frames);
            }

            if self.ctx.config.list_only {
                return Dispatch::Untouched(job.into_path_info());
            }
            match self.registry.repack_handler(job.kind, job.path_info.convert) {
                Some(pack) if job.do_repack(pack) => {
                    debug!("📦 Repacking {} from {} to {}", name, job.input_format, pack.output_format());
                    let bytes_in = job.path_info.bytes_in();
                    Dispatch::Pending(self.pool.submit(name, bytes_in, job.repack(pack, self.ctx.clone())))
                }
                Some(_) => Dispatch::Untouched(job.into_path_info()),
                None => {
                    if job.do_repack(job.kind) {
                        info!("📦 No packer for {}, leaving it untouched", name);
                    }
                    Dispatch::Untouched(job.into_path_info())
                }
            }
        }
        .boxed_local()
    }

    /// Record a finished unit below a directory; false if it failed
    fn settle(&mut self, dispatch: Dispatch, timestamps: &mut Option<Timestamps>) -> bool {
        let (path, container) = match dispatch {
            Dispatch::Skipped(_) | Dispatch::Pending(_) => return true,
            Dispatch::Untouched(path_info) => {
                debug!("➖ {} left untouched", path_info.full_output_name());
                (path_info.path().map(Path::to_path_buf), true)
            }
            Dispatch::Done(output) => {
                let failed = output.report.error.is_some();
                let container = output.report.container;
                let path = output.path_info.as_ref().and_then(|p| p.path().map(Path::to_path_buf));
                self.record(output.report);
                if failed {
                    return false;
                }
                (path, container)
            }
        };
        if let (Some(store), Some(path)) = (timestamps.as_mut(), path) {
            store.set(&path, None, container);
        }
        true
    }

    /// Frames only surface when they fail, and then count as errors only
    fn record_member(&mut self, mut report: ReportStats, frame: bool) {
        if frame {
            if report.error.is_none() {
                debug!("🎞️ {}: {} -> {} bytes", report.path, report.bytes_in, report.bytes_out);
                return;
            }
            report.container = true;
        }
        self.record(report);
    }

    fn record(&mut self, report: ReportStats) {
        let json = self.ctx.config.json_output;
        self.progress.suspend(|| report.report(json));
        let name = report.path.clone();
        self.done += 1;
        self.totals.add(report);
        self.progress.update(self.done, self.totals.errors.len(), &name);
    }

    fn list(&self, info: &PathInfo, detected: &Detected) {
        let name = info.full_output_name();
        self.progress.suspend(|| {
            if detected.format.animated {
                info!("📋 {}: {} ({} frames)", name, detected.format, detected.frames);
            } else {
                info!("📋 {}: {}", name, detected.format);
            }
        });
    }
}

/// Entries of one directory, subdirectories first, each group sorted by
/// name. The flag is false if any entry could not be read.
fn list_dir(dir: &Path) -> (Vec<PathBuf>, bool) {
    let mut ok = true;
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        match entry {
            Ok(entry) => {
                let is_dir = entry.file_type().is_dir() || entry.path().is_dir();
                entries.push((!is_dir, entry.into_path()));
            }
            Err(e) => {
                warn!("⚠️ Could not read an entry of {}: {}", dir.display(), e);
                ok = false;
            }
        }
    }
    entries.sort();
    (entries.into_iter().map(|(_, path)| path).collect(), ok)
}
