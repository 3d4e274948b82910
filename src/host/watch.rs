use anyhow::{bail, Context, Result};
use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssemblyRole {
    Core,
    User,
}

impl AssemblyRole {
    pub fn label(self) -> &'static str {
        match self {
            AssemblyRole::Core => "core",
            AssemblyRole::User => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyChange {
    pub path: PathBuf,
    pub role: AssemblyRole,
}

/// Watches assembly files for rebuilds. Parent directories are watched so that editors and
/// build tools that replace the file rather than rewrite it are still seen.
pub struct AssemblyWatcher {
    watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    files: Vec<(PathBuf, AssemblyRole)>,
    directories: Vec<PathBuf>,
}

impl AssemblyWatcher {
    pub fn new() -> Result<Self> {
        let (tx, rx) = channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher
            .configure(
                NotifyConfig::default().with_compare_contents(false).with_poll_interval(Duration::from_millis(300)),
            )
            .context("configure assembly watcher")?;
        Ok(Self { watcher, rx, files: Vec::new(), directories: Vec::new() })
    }

    pub fn watch_assembly(&mut self, path: impl AsRef<Path>, role: AssemblyRole) -> Result<()> {
        let path = path.as_ref();
        let normalized = normalize_watch_path(path);
        let Some(directory) = normalized.parent().map(Path::to_path_buf) else {
            bail!("assembly path '{}' has no parent directory", path.display());
        };
        if !directory.is_dir() {
            bail!("directory '{}' does not exist", directory.display());
        }
        if self.files.iter().any(|(existing, _)| *existing == normalized) {
            return Ok(());
        }
        if !self.directories.contains(&directory) {
            self.watcher
                .watch(&directory, RecursiveMode::NonRecursive)
                .with_context(|| format!("watch {}", directory.display()))?;
            self.directories.push(directory);
        }
        self.files.push((normalized, role));
        Ok(())
    }

    pub fn watched_count(&self) -> usize {
        self.files.len()
    }

    /// Changes since the last drain, one entry per watched file.
    pub fn drain_changes(&mut self) -> Vec<AssemblyChange> {
        let mut changes: Vec<AssemblyChange> = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            match event {
                Ok(event) => {
                    if !is_relevant(&event.kind) {
                        continue;
                    }
                    for path in event.paths {
                        let Some(change) = self.change_for_path(&path) else {
                            continue;
                        };
                        if !changes.contains(&change) {
                            changes.push(change);
                        }
                    }
                }
                Err(err) => log::warn!("[host] assembly watcher error: {err}"),
            }
        }
        changes
    }

    fn change_for_path(&self, path: &Path) -> Option<AssemblyChange> {
        let normalized = normalize_watch_path(path);
        self.files
            .iter()
            .find(|(file, _)| *file == normalized)
            .map(|(file, role)| AssemblyChange { path: file.clone(), role: *role })
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Create(_)
    )
}

fn normalize_watch_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else if let Ok(cwd) = env::current_dir() {
        cwd.join(path)
    } else {
        path.to_path_buf()
    };
    if let Ok(canonical) = fs::canonicalize(&absolute) {
        return canonical;
    }
    // Missing files still map to a stable path under their canonical parent.
    match (absolute.parent().and_then(|parent| fs::canonicalize(parent).ok()), absolute.file_name()) {
        (Some(parent), Some(name)) => parent.join(name),
        (Some(parent), None) => parent,
        _ => absolute,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    #[test]
    fn removals_do_not_trigger_reloads() {
        assert!(is_relevant(&EventKind::Modify(ModifyKind::Data(DataChange::Content))));
        assert!(is_relevant(&EventKind::Create(CreateKind::File)));
        assert!(!is_relevant(&EventKind::Remove(RemoveKind::File)));
    }

    #[test]
    fn missing_files_normalize_under_their_parent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join("User.rhai");
        let normalized = normalize_watch_path(&missing);
        assert_eq!(normalized.file_name(), missing.file_name());
        fs::write(&missing, "").expect("write");
        assert_eq!(normalize_watch_path(&missing), normalized, "path should not change once the file exists");
    }

    #[test]
    fn watching_registers_each_file_once() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut watcher = AssemblyWatcher::new().expect("watcher");
        watcher.watch_assembly(dir.path().join("User.rhai"), AssemblyRole::User).expect("watch user");
        watcher.watch_assembly(dir.path().join("User.rhai"), AssemblyRole::User).expect("watch user again");
        watcher.watch_assembly(dir.path().join("Core.rhai"), AssemblyRole::Core).expect("watch core");
        assert_eq!(watcher.watched_count(), 2);
        assert!(watcher.watch_assembly(dir.path().join("missing/Deep.rhai"), AssemblyRole::User).is_err());
    }
}
