//! # Timestamp Store
//!
//! Cache incrementale degli ultimi tempi di ottimizzazione per una root.
//!
//! ## Responsabilità:
//! - Persiste i timestamp in `<root>/.media-squeeze_timestamps.json`
//! - Invalida tutta la cache se il fingerprint della configurazione cambia
//! - Assorbe i sidecar delle sottodirectory quando la visita è ricorsiva
//!   (e quelli dentro gli archivi)
//! - Compatta le entry discendenti quando una directory è completata
//!
//! ## Semantica:
//! Un'entry su una directory copre tutto ciò che sta sotto. `get` restituisce
//! il massimo lungo la catena degli antenati, fino alla root inclusa.
//!
//! ## Esempio struttura sidecar:
//! ```json
//! {
//!   "fingerprint": "3b1f...",
//!   "config": { "bigger": false, "formats": ["GIF", "JPEG", "PNG"], ... },
//!   "timestamps": {
//!     ".": 1700000000.0,
//!     "comics/vol1.cbz": 1700000100.5
//!   }
//! }
//! ```

use crate::config::{Config, ConfigFingerprint};
use crate::path_info::now_epoch;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const TIMESTAMPS_FILENAME: &str = ".media-squeeze_timestamps.json";
const ROOT_KEY: &str = ".";

/// On-disk representation of a sidecar
#[derive(Debug, Serialize, Deserialize)]
pub struct TimestampFile {
    pub fingerprint: String,
    pub config: ConfigFingerprint,
    pub timestamps: BTreeMap<String, f64>,
}

/// Last-optimized times below one root
pub struct Timestamps {
    root: PathBuf,
    config: ConfigFingerprint,
    fingerprint: String,
    entries: BTreeMap<PathBuf, f64>,
    consumed: Vec<PathBuf>,
}

impl Timestamps {
    /// Empty store for `root`, nothing read from disk
    pub fn new(root: &Path, config: &Config) -> Self {
        let fingerprint = config.fingerprint();
        Self {
            root: root.to_path_buf(),
            fingerprint: fingerprint.digest(),
            config: fingerprint,
            entries: BTreeMap::new(),
            consumed: Vec::new(),
        }
    }

    /// Read the root sidecar. With `descend`, every sidecar found below it is
    /// consumed too; otherwise only the root's own file is read.
    pub async fn load(root: &Path, config: &Config, descend: bool) -> Result<Self> {
        let mut store = Self::new(root, config);

        let own = root.join(TIMESTAMPS_FILENAME);
        if own.is_file() {
            store.load_file(&own, Path::new("")).await;
        }

        let max_depth = if descend { usize::MAX } else { 1 };
        let children: Vec<PathBuf> = WalkDir::new(root)
            .min_depth(2)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && e.file_name() == TIMESTAMPS_FILENAME)
            .map(|e| e.into_path())
            .collect();

        for child in children {
            let Some(dir) = child.parent().and_then(|p| p.strip_prefix(root).ok()) else {
                continue;
            };
            let dir = dir.to_path_buf();
            store.load_file(&child, &dir).await;
            debug!("📥 Consumed timestamps from {}", child.display());
            store.consumed.push(child);
        }

        Ok(store)
    }

    async fn load_file(&mut self, path: &Path, relative_dir: &Path) {
        match fs::read(path).await {
            Ok(bytes) => {
                if !self.merge_bytes(relative_dir, &bytes) {
                    info!("♻️ Timestamps in {} were recorded with other settings, ignoring", path.display());
                }
            }
            Err(e) => warn!("⚠️ Could not read timestamps {}: {}", path.display(), e),
        }
    }

    /// Merge a serialized sidecar whose entries are relative to `sub_path`.
    /// Returns false if it was ignored.
    pub fn merge_serialized(&mut self, sub_path: &Path, bytes: &[u8]) -> bool {
        match self.relative(sub_path) {
            Some(relative) => self.merge_bytes(&relative, bytes),
            None => false,
        }
    }

    fn merge_bytes(&mut self, relative_dir: &Path, bytes: &[u8]) -> bool {
        let file: TimestampFile = match serde_json::from_slice(bytes) {
            Ok(file) => file,
            Err(e) => {
                warn!("⚠️ Invalid timestamps file: {}", e);
                return false;
            }
        };
        if file.fingerprint != self.fingerprint {
            return false;
        }
        for (key, ts) in file.timestamps {
            let path = if key == ROOT_KEY {
                relative_dir.to_path_buf()
            } else {
                relative_dir.join(key)
            };
            let slot = self.entries.entry(path).or_insert(ts);
            if ts > *slot {
                *slot = ts;
            }
        }
        true
    }

    /// Path relative to the root, or the root itself for its own ancestors
    fn relative(&self, path: &Path) -> Option<PathBuf> {
        if let Ok(relative) = path.strip_prefix(&self.root) {
            return Some(normalize(relative));
        }
        if self.root.starts_with(path) {
            return Some(PathBuf::new());
        }
        None
    }

    /// Maximum recorded time along the path's ancestor chain
    pub fn get(&self, path: &Path) -> Option<f64> {
        let relative = self.relative(path)?;
        relative
            .ancestors()
            .filter_map(|ancestor| self.entries.get(ancestor).copied())
            .reduce(f64::max)
    }

    /// Record `time` (default now) for `path`. An entry never moves backwards
    /// and nothing is recorded if an ancestor already covers a later time.
    /// With `compact`, older descendant entries are dropped.
    pub fn set(&mut self, path: &Path, time: Option<f64>, compact: bool) -> Option<f64> {
        let Some(relative) = self.relative(path) else {
            debug!("Timestamp {} is not below {}", path.display(), self.root.display());
            return None;
        };
        let time = time.unwrap_or_else(now_epoch);
        if self.get(path).is_some_and(|covered| covered > time) {
            return None;
        }
        self.entries.insert(relative.clone(), time);
        if compact {
            self.compact_below(&relative, time);
        }
        Some(time)
    }

    fn compact_below(&mut self, relative: &Path, time: f64) {
        let before = self.entries.len();
        self.entries
            .retain(|path, ts| path == relative || !path.starts_with(relative) || *ts >= time);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("🗜️ Compacted {} timestamps below {}", removed, relative.display());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_file(&self) -> TimestampFile {
        let timestamps = self
            .entries
            .iter()
            .map(|(path, ts)| (key_of(path), *ts))
            .collect();
        TimestampFile {
            fingerprint: self.fingerprint.clone(),
            config: self.config.clone(),
            timestamps,
        }
    }

    /// Write the sidecar and delete the child sidecars consumed at load
    pub async fn dump(&mut self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.to_file())?;
        fs::write(self.root.join(TIMESTAMPS_FILENAME), content).await?;
        for consumed in self.consumed.drain(..) {
            if let Err(e) = fs::remove_file(&consumed).await {
                debug!("Could not remove consumed timestamps {}: {}", consumed.display(), e);
            }
        }
        Ok(())
    }
}

/// `/`-separated key of a relative path; the root is "."
fn key_of(path: &Path) -> String {
    let parts: Vec<_> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        ROOT_KEY.to_string()
    } else {
        parts.join("/")
    }
}

fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(root: &Path) -> Timestamps {
        Timestamps::new(root, &Config::default())
    }

    #[test]
    fn test_get_takes_max_over_ancestors() {
        let root = PathBuf::from("/data");
        let mut ts = store(&root);
        ts.set(&root.join("a"), Some(100.0), false);
        ts.set(&root.join("a/b/c.png"), Some(50.0), false);
        assert_eq!(ts.get(&root.join("a/b/c.png")), Some(100.0));
        assert_eq!(ts.get(&root.join("a/b")), Some(100.0));
        assert_eq!(ts.get(&root.join("other.png")), None);
        assert_eq!(ts.get(Path::new("/elsewhere/x")), None);
    }

    #[test]
    fn test_set_never_moves_backwards() {
        let root = PathBuf::from("/data");
        let mut ts = store(&root);
        assert_eq!(ts.set(&root.join("x.png"), Some(200.0), false), Some(200.0));
        assert_eq!(ts.set(&root.join("x.png"), Some(100.0), false), None);
        assert_eq!(ts.get(&root.join("x.png")), Some(200.0));

        ts.set(&root, Some(300.0), false);
        assert_eq!(ts.set(&root.join("y.png"), Some(250.0), false), None);
    }

    #[test]
    fn test_compaction_drops_older_descendants() {
        let root = PathBuf::from("/data");
        let mut ts = store(&root);
        ts.set(&root.join("d/a.png"), Some(10.0), false);
        ts.set(&root.join("d/sub/b.png"), Some(20.0), false);
        ts.set(&root.join("e/c.png"), Some(5.0), false);
        ts.set(&root.join("d"), Some(30.0), true);

        let file = ts.to_file();
        assert_eq!(file.timestamps.len(), 2);
        assert_eq!(file.timestamps.get("d"), Some(&30.0));
        assert_eq!(file.timestamps.get("e/c.png"), Some(&5.0));

        ts.set(&root, Some(40.0), true);
        assert_eq!(ts.len(), 1);
        assert_eq!(ts.to_file().timestamps.get("."), Some(&40.0));
    }

    #[test]
    fn test_merge_serialized_relative_to_archive() {
        let root = PathBuf::from("/data");
        let mut inner = store(Path::new("/anywhere"));
        inner.set(Path::new("/anywhere/p.png"), Some(77.0), false);
        let bytes = serde_json::to_vec(&inner.to_file()).unwrap();

        let mut ts = store(&root);
        assert!(ts.merge_serialized(&root.join("c.zip"), &bytes));
        assert_eq!(ts.get(&root.join("c.zip/p.png")), Some(77.0));
    }

    #[test]
    fn test_merge_rejects_other_fingerprint() {
        let other = Config {
            bigger: true,
            ..Default::default()
        };
        let mut inner = Timestamps::new(Path::new("/x"), &other);
        inner.set(Path::new("/x/p.png"), Some(1.0), false);
        let bytes = serde_json::to_vec(&inner.to_file()).unwrap();

        let mut ts = store(Path::new("/data"));
        assert!(!ts.merge_serialized(Path::new("/data/c.zip"), &bytes));
        assert!(!ts.merge_serialized(Path::new("/data/c.zip"), b"not json"));
        assert!(ts.is_empty());
    }

    #[tokio::test]
    async fn test_dump_load_and_consume_children() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let sub = root.join("sub");
        std::fs::create_dir(&sub).unwrap();

        let mut child = Timestamps::load(&sub, &Config::default(), true).await.unwrap();
        child.set(&sub.join("a.png"), Some(123.0), false);
        child.dump().await.unwrap();
        assert!(sub.join(TIMESTAMPS_FILENAME).exists());

        let mut parent = Timestamps::load(root, &Config::default(), true).await.unwrap();
        assert_eq!(parent.get(&sub.join("a.png")), Some(123.0));
        parent.set(root, Some(500.0), true);
        parent.dump().await.unwrap();

        assert!(!sub.join(TIMESTAMPS_FILENAME).exists());
        let reloaded = Timestamps::load(root, &Config::default(), true).await.unwrap();
        assert_eq!(reloaded.get(&sub.join("a.png")), Some(500.0));
    }

    #[tokio::test]
    async fn test_fingerprint_change_invalidates() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let mut ts = Timestamps::load(root, &Config::default(), true).await.unwrap();
        ts.set(root, Some(10.0), true);
        ts.dump().await.unwrap();

        let mut changed = Config::default();
        changed.formats.insert("ZIP".to_string());
        let reloaded = Timestamps::load(root, &changed, true).await.unwrap();
        assert!(reloaded.is_empty());
    }

    #[tokio::test]
    async fn test_shallow_load_leaves_child_sidecars() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let sub = root.join("sub");
        std::fs::create_dir(&sub).unwrap();

        let mut child = Timestamps::load(&sub, &Config::default(), true).await.unwrap();
        child.set(&sub.join("a.png"), Some(123.0), false);
        child.dump().await.unwrap();

        let mut parent = Timestamps::load(root, &Config::default(), false).await.unwrap();
        assert_eq!(parent.get(&sub.join("a.png")), None);
        parent.set(&root.join("top.png"), Some(50.0), false);
        parent.dump().await.unwrap();

        assert!(sub.join(TIMESTAMPS_FILENAME).exists());
        let again = Timestamps::load(&sub, &Config::default(), false).await.unwrap();
        assert_eq!(again.get(&sub.join("a.png")), Some(123.0));
    }
}
