//! # Skipper
//!
//! Decide se un `PathInfo` va saltato prima del rilevamento del formato.
//!
//! ## Regole (in ordine):
//! - symlink quando `symlinks` è disabilitato
//! - sidecar dei timestamp
//! - glob di ignore (sul nome e sullo pseudo path dentro gli archivi)
//! - path top-level inesistente
//! - file di lavoro lasciati da un run interrotto (cancellati, tranne in
//!   dry run e in modalità lista)
//! - file non modificati dopo la soglia `after` o il timestamp registrato
//!
//! Saltare non è un errore: il motivo viene solo loggato a livello debug.

use crate::config::Config;
use crate::error::ConfigError;
use crate::handlers::cleanup::WORKING_SUFFIX;
use crate::path_info::PathInfo;
use crate::timestamps::{Timestamps, TIMESTAMPS_FILENAME};
use regex::{Regex, RegexBuilder};
use std::fmt;
use tracing::{debug, warn};

/// Why a path was not processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Symlink,
    Ignored,
    TimestampFile,
    WorkingFile,
    Missing,
    Older,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Symlink => "symlink",
            Self::Ignored => "ignored",
            Self::TimestampFile => "timestamp file",
            Self::WorkingFile => "leftover working file",
            Self::Missing => "not found",
            Self::Older => "older than timestamp",
        };
        f.write_str(text)
    }
}

/// Translate a shell glob into a regex matching a whole path or any trailing
/// run of its components.
///
/// `**` crosses directory separators, `*` and `?` do not.
pub fn glob_to_regex(glob: &str, case_insensitive: bool) -> Result<Regex, ConfigError> {
    let bad = |reason: &str| ConfigError::BadGlob {
        glob: glob.to_string(),
        reason: reason.to_string(),
    };
    if glob.trim().is_empty() {
        return Err(bad("empty pattern"));
    }

    let mut pattern = String::from("^(?:.*/)?");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                pattern.push_str(".*");
            }
            '*' => pattern.push_str("[^/]*"),
            '?' => pattern.push_str("[^/]"),
            '[' => {
                let mut class = String::from("[");
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if inner == '\\' || inner == '[' {
                        class.push('\\');
                    }
                    class.push(inner);
                }
                if !closed {
                    return Err(bad("unclosed character class"));
                }
                class.push(']');
                pattern.push_str(&class);
            }
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');

    RegexBuilder::new(&pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| bad(&e.to_string()))
}

/// Compiled skip rules for one run
pub struct Skipper {
    symlinks: bool,
    after: Option<f64>,
    timestamps: bool,
    /// Leftover working files may be deleted
    writes: bool,
    ignore_case: Vec<Regex>,
    ignore_nocase: Vec<Regex>,
}

impl Skipper {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let compile = |insensitive: bool| {
            config
                .ignore
                .iter()
                .map(|g| glob_to_regex(g, insensitive))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self {
            symlinks: config.symlinks,
            after: config.after,
            timestamps: config.timestamps,
            writes: !config.dry_run && !config.list_only,
            ignore_case: compile(false)?,
            ignore_nocase: compile(true)?,
        })
    }

    fn is_ignored(&self, path_info: &PathInfo) -> bool {
        let patterns = if path_info.is_case_sensitive {
            &self.ignore_case
        } else {
            &self.ignore_nocase
        };
        if patterns.is_empty() {
            return false;
        }
        let pseudo = path_info
            .archive_pseudo_path()
            .to_string_lossy()
            .replace('\\', "/");
        patterns.iter().any(|re| re.is_match(&pseudo))
    }

    /// Checks that don't depend on time: symlinks, sidecars, ignores,
    /// missing paths and working files
    pub fn skippable(&self, path_info: &PathInfo) -> Option<SkipReason> {
        let name = path_info.name();
        let file_name = name.rsplit(['/', '\\']).next().unwrap_or(&name);

        let reason = if !self.symlinks && path_info.is_symlink() {
            Some(SkipReason::Symlink)
        } else if file_name == TIMESTAMPS_FILENAME {
            Some(SkipReason::TimestampFile)
        } else if self.is_ignored(path_info) {
            Some(SkipReason::Ignored)
        } else if path_info.path().is_some_and(|p| !p.exists() && !p.is_symlink()) {
            warn!("⚠️ {} not found", path_info.full_output_name());
            Some(SkipReason::Missing)
        } else if file_name.contains(WORKING_SUFFIX) {
            if self.writes {
                remove_working_file(path_info);
            }
            Some(SkipReason::WorkingFile)
        } else {
            None
        };

        if let Some(reason) = reason {
            debug!("⏭️ Skip {}: {}", reason, path_info.full_output_name());
        }
        reason
    }

    /// Threshold a path's mtime is compared against
    pub fn walk_after(&self, path_info: &PathInfo, timestamps: Option<&Timestamps>) -> Option<f64> {
        if self.after.is_some() {
            return self.after;
        }
        if !self.timestamps {
            return None;
        }
        timestamps.and_then(|ts| ts.get(&path_info.archive_pseudo_path()))
    }

    /// True if the file was not modified after its threshold. Directories
    /// are never skipped this way.
    pub fn is_older(&self, path_info: &PathInfo, timestamps: Option<&Timestamps>) -> bool {
        if path_info.is_dir() {
            return false;
        }
        let Some(after) = self.walk_after(path_info, timestamps) else {
            return false;
        };
        let Some(mtime) = path_info.mtime() else {
            return false;
        };
        let older = mtime <= after;
        if older {
            debug!("⏭️ Skip {}: {}", SkipReason::Older, path_info.full_output_name());
        }
        older
    }

    /// Every rule, in order
    pub fn skip(&self, path_info: &PathInfo, timestamps: Option<&Timestamps>) -> Option<SkipReason> {
        self.skippable(path_info).or_else(|| {
            self.is_older(path_info, timestamps)
                .then_some(SkipReason::Older)
        })
    }
}

fn remove_working_file(path_info: &PathInfo) {
    let Some(path) = path_info.path() else {
        return;
    };
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => warn!("🧹 Deleted leftover working file {}", path.display()),
        Err(e) => warn!("⚠️ Could not delete {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn info(path: PathBuf, root: &Path) -> PathInfo {
        PathInfo::from_path(path, root.to_path_buf(), false, true)
    }

    #[test]
    fn test_glob_translation() {
        let re = glob_to_regex("*.bak", false).unwrap();
        assert!(re.is_match("a.bak"));
        assert!(re.is_match("/deep/dir/a.bak"));
        assert!(!re.is_match("a.bak.png"));

        let re = glob_to_regex("cache/**", false).unwrap();
        assert!(re.is_match("/x/cache/a/b.png"));
        assert!(!re.is_match("/x/cachex/a.png"));

        let re = glob_to_regex("img?.[!j]*", false).unwrap();
        assert!(re.is_match("img1.png"));
        assert!(!re.is_match("img1.jpg"));
        assert!(!re.is_match("img12.png"));

        let re = glob_to_regex("*.PNG", true).unwrap();
        assert!(re.is_match("a.png"));

        assert!(glob_to_regex("[abc", false).is_err());
        assert!(glob_to_regex("  ", false).is_err());
    }

    #[test]
    fn test_ignore_inside_archive() {
        let config = Config {
            ignore: vec!["__MACOSX/**".to_string()],
            ..Default::default()
        };
        let skipper = Skipper::new(&config).unwrap();
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("book.cbz");
        std::fs::write(&archive, b"x").unwrap();
        let parent = info(archive, temp_dir.path());
        let entry = crate::archive::entry::ArchiveEntry::new(
            0,
            crate::archive::entry::NativeEntry::Zip(crate::archive::zip::ZipEntry::new(
                "__MACOSX/._p.png",
            )),
        );
        let member = PathInfo::member(&parent, entry, vec![1], true);
        assert_eq!(skipper.skippable(&member), Some(SkipReason::Ignored));
        assert_eq!(skipper.skippable(&parent), None);
    }

    #[test]
    fn test_sidecar_missing_and_working_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let skipper = Skipper::new(&Config::default()).unwrap();

        let sidecar = root.join(TIMESTAMPS_FILENAME);
        std::fs::write(&sidecar, b"{}").unwrap();
        assert_eq!(skipper.skippable(&info(sidecar, root)), Some(SkipReason::TimestampFile));

        assert_eq!(
            skipper.skippable(&info(root.join("gone.png"), root)),
            Some(SkipReason::Missing)
        );

        let working = root.join(format!("a.png{}", WORKING_SUFFIX));
        std::fs::write(&working, b"partial").unwrap();
        assert_eq!(skipper.skippable(&info(working.clone(), root)), Some(SkipReason::WorkingFile));
        assert!(!working.exists());
    }

    #[test]
    fn test_working_files_survive_read_only_runs() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let working = root.join(format!("a.png{}", WORKING_SUFFIX));
        std::fs::write(&working, b"partial").unwrap();

        for config in [
            Config {
                dry_run: true,
                ..Default::default()
            },
            Config {
                list_only: true,
                ..Default::default()
            },
        ] {
            let skipper = Skipper::new(&config).unwrap();
            assert_eq!(skipper.skippable(&info(working.clone(), root)), Some(SkipReason::WorkingFile));
            assert_eq!(std::fs::read(&working).unwrap(), b"partial");
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_policy() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let target = root.join("t.png");
        std::fs::write(&target, b"x").unwrap();
        let link = root.join("l.png");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let follow = Skipper::new(&Config::default()).unwrap();
        assert_eq!(follow.skippable(&info(link.clone(), root)), None);

        let no_follow = Skipper::new(&Config {
            symlinks: false,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(no_follow.skippable(&info(link, root)), Some(SkipReason::Symlink));
    }

    #[test]
    fn test_walk_after_precedence() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let file = root.join("a.png");
        std::fs::write(&file, b"x").unwrap();
        let path_info = info(file, root);
        let mtime = path_info.mtime().unwrap();

        let mut timestamps = Timestamps::new(root, &Config::default());
        timestamps.set(root, Some(mtime + 10.0), true);

        let skipper = Skipper::new(&Config::default()).unwrap();
        assert_eq!(skipper.skip(&path_info, Some(&timestamps)), Some(SkipReason::Older));
        assert_eq!(skipper.skip(&path_info, None), None);

        let explicit = Skipper::new(&Config {
            after: Some(mtime - 10.0),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(explicit.skip(&path_info, Some(&timestamps)), None);

        let disabled = Skipper::new(&Config {
            timestamps: false,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(disabled.skip(&path_info, Some(&timestamps)), None);

        let dir_info = info(root.to_path_buf(), root);
        assert_eq!(skipper.skip(&dir_info, Some(&timestamps)), None);
    }
}
