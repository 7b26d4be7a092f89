//! Filesystem watching: wraps the notify backend with an ignore set and a
//! debounce window, and maps flushed path batches back to owning projects.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{EventKind, RecursiveMode, Watcher as _};
use tracing::{debug, warn};

use crate::error::{Result, WorkgraphError};
use crate::workspace::Workspace;

/// Always-ignored trees: vendored modules, build outputs, VCS, caches.
/// Each directory appears twice so the entry itself and everything under
/// it both match.
pub const BASE_IGNORE: &[&str] = &[
    "**/node_modules",
    "**/node_modules/**",
    "**/dist",
    "**/dist/**",
    "**/.angular",
    "**/.angular/**",
    "**/.nx",
    "**/.nx/**",
    "**/coverage",
    "**/coverage/**",
    "**/*.log",
    "**/.git",
    "**/.git/**",
    "**/tmp",
    "**/tmp/**",
    "**/.cache",
    "**/.cache/**",
];

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub debounce: Duration,
    /// Unioned with `BASE_IGNORE` (generator output globs land here).
    pub extra_ignore: Vec<String>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            extra_ignore: Vec::new(),
        }
    }
}

/// One flushed change batch, attributed to projects.
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    pub projects: BTreeSet<String>,
    pub files_by_project: BTreeMap<String, Vec<PathBuf>>,
    /// A workspace-level config file changed: the whole workspace rebuilds.
    pub escalated: bool,
}

/// A running watcher. Debounced path batches arrive on `batches`; dropping
/// the struct stops the backend.
pub struct FsWatcher {
    pub batches: mpsc::Receiver<BTreeSet<PathBuf>>,
    _backend: notify::RecommendedWatcher,
}

impl FsWatcher {
    pub fn start(root: &Path, options: &WatchOptions) -> Result<Self> {
        let ignore = build_ignore_set(&options.extra_ignore)?;
        let (raw_tx, raw_rx) = mpsc::channel();
        let mut backend = notify::recommended_watcher(move |event| {
            let _ = raw_tx.send(event);
        })
        .map_err(|e| WorkgraphError::WatchError(format!("failed to start watcher: {}", e)))?;
        backend
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| {
                WorkgraphError::WatchError(format!("failed to watch {}: {}", root.display(), e))
            })?;

        let (batch_tx, batch_rx) = mpsc::channel();
        let root = root.to_path_buf();
        let debounce = options.debounce;
        std::thread::spawn(move || debounce_loop(raw_rx, batch_tx, ignore, root, debounce));

        Ok(Self {
            batches: batch_rx,
            _backend: backend,
        })
    }
}

pub fn build_ignore_set(extra: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in BASE_IGNORE.iter().map(|s| s.to_string()).chain(extra.iter().cloned()) {
        let glob = Glob::new(&pattern).map_err(|e| {
            WorkgraphError::WatchError(format!("invalid ignore glob '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| WorkgraphError::WatchError(format!("failed to build ignore set: {}", e)))
}

/// Collect raw events into a buffer; each event restarts the silence timer;
/// a full debounce interval without events flushes the buffer as one batch.
fn debounce_loop(
    raw_rx: mpsc::Receiver<notify::Result<notify::Event>>,
    batch_tx: mpsc::Sender<BTreeSet<PathBuf>>,
    ignore: GlobSet,
    root: PathBuf,
    debounce: Duration,
) {
    let mut pending: BTreeSet<PathBuf> = BTreeSet::new();

    loop {
        let message = if pending.is_empty() {
            match raw_rx.recv() {
                Ok(m) => Some(m),
                Err(_) => break,
            }
        } else {
            match raw_rx.recv_timeout(debounce) {
                Ok(m) => Some(m),
                Err(mpsc::RecvTimeoutError::Timeout) => None,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        };

        match message {
            Some(Ok(event)) => {
                if !is_mutation(&event.kind) {
                    continue;
                }
                for path in event.paths {
                    if is_ignored(&ignore, &root, &path) {
                        debug!("ignoring {}", path.display());
                        continue;
                    }
                    pending.insert(path);
                }
            }
            Some(Err(e)) => warn!("watch backend error: {}", e),
            None => {
                if batch_tx.send(std::mem::take(&mut pending)).is_err() {
                    break;
                }
            }
        }
    }

    // Receiver gone or backend closed: flush what is left.
    if !pending.is_empty() {
        let _ = batch_tx.send(pending);
    }
}

fn is_mutation(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn is_ignored(ignore: &GlobSet, root: &Path, path: &Path) -> bool {
    let rel = path.strip_prefix(root).unwrap_or(path);
    ignore.is_match(rel)
}

/// Map a flushed batch of paths to projects.
///
/// Top-level non-directory files (the workspace manifest, lockfiles, root
/// tsconfig variants, anything else at depth 0) escalate to a global
/// change. Everything else is attributed by longest path prefix;
/// unattributed paths are dropped.
pub fn process_batch(workspace: &Workspace, paths: &BTreeSet<PathBuf>) -> ChangeBatch {
    let mut projects = BTreeSet::new();
    let mut files_by_project: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

    for path in paths {
        if is_root_config(workspace, path) {
            debug!("root config change: {}", path.display());
            return ChangeBatch {
                projects: workspace.projects.keys().cloned().collect(),
                files_by_project: BTreeMap::new(),
                escalated: true,
            };
        }
    }

    for path in paths {
        match workspace.project_for_path(path) {
            Some(project) => {
                projects.insert(project.name.clone());
                files_by_project
                    .entry(project.name.clone())
                    .or_default()
                    .push(path.clone());
            }
            None => debug!("dropping unattributed path {}", path.display()),
        }
    }

    ChangeBatch {
        projects,
        files_by_project,
        escalated: false,
    }
}

/// Workspace-level config: any non-directory entry directly under the root
/// (the root manifest, `*-lock.*` lockfiles, tsconfig variants).
fn is_root_config(workspace: &Workspace, path: &Path) -> bool {
    path.parent() == Some(workspace.root.as_path()) && !path.is_dir()
}
