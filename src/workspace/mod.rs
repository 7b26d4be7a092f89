pub mod manifest;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use globset::GlobBuilder;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Result, WorkgraphError};
use manifest::Manifest;

pub const MANIFEST_FILENAME: &str = "package.json";

/// A workspace member: a directory with its own manifest declaring a name.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    /// Workspace-relative path.
    pub path: PathBuf,
    pub abs_path: PathBuf,
    pub manifest: Manifest,
}

/// The loaded workspace: root manifest plus all discovered projects,
/// keyed by project name.
#[derive(Debug)]
pub struct Workspace {
    pub root: PathBuf,
    pub manifest: Manifest,
    pub projects: BTreeMap<String, Project>,
}

impl Workspace {
    /// Load the root manifest and discover projects via its workspace globs.
    ///
    /// Discovery order is not part of the contract; `projects` is name-keyed
    /// and consumers sort where determinism matters.
    pub fn load(root: &Path) -> Result<Self> {
        let root = absolutize(root)?;
        let manifest_path = root.join(MANIFEST_FILENAME);
        if !manifest_path.is_file() {
            return Err(WorkgraphError::WorkspaceError(format!(
                "no {} found at workspace root {}",
                MANIFEST_FILENAME,
                root.display()
            )));
        }
        let manifest = Manifest::from_file(&manifest_path)?;

        let mut projects: BTreeMap<String, Project> = BTreeMap::new();
        for pattern in manifest.workspace_patterns() {
            for dir in expand_pattern(&root, pattern)? {
                let project_manifest_path = dir.join(MANIFEST_FILENAME);
                if !project_manifest_path.is_file() {
                    continue;
                }
                let project_manifest = Manifest::from_file(&project_manifest_path)?;
                let Some(name) = project_manifest.project_name() else {
                    debug!("skipping {} (no project name)", dir.display());
                    continue;
                };
                let name = name.to_string();
                let rel = dir
                    .strip_prefix(&root)
                    .unwrap_or(&dir)
                    .to_path_buf();
                if let Some(existing) = projects.get(&name) {
                    // The same directory matched by overlapping patterns is
                    // not a duplicate.
                    if existing.abs_path == dir {
                        continue;
                    }
                    return Err(WorkgraphError::DuplicateProject {
                        name,
                        first: existing.abs_path.display().to_string(),
                        second: dir.display().to_string(),
                    });
                }
                projects.insert(
                    name.clone(),
                    Project {
                        name,
                        path: rel,
                        abs_path: dir,
                        manifest: project_manifest,
                    },
                );
            }
        }

        debug!("workspace {}: {} projects", root.display(), projects.len());
        Ok(Self {
            root,
            manifest,
            projects,
        })
    }

    pub fn project_names(&self) -> Vec<String> {
        self.projects.keys().cloned().collect()
    }

    /// Attribute an absolute path to its owning project by longest
    /// absolute-path-prefix match.
    pub fn project_for_path(&self, path: &Path) -> Option<&Project> {
        self.projects
            .values()
            .filter(|p| path.starts_with(&p.abs_path))
            .max_by_key(|p| p.abs_path.as_os_str().len())
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(std::fs::canonicalize(&abs).unwrap_or(abs))
}

/// Expand one workspace pattern relative to the root. Literal paths are
/// probed directly; glob patterns are matched against relative directory
/// paths while pruning vendored trees.
fn expand_pattern(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    if !pattern.contains(['*', '?', '[']) {
        let dir = root.join(pattern);
        return Ok(if dir.is_dir() { vec![dir] } else { Vec::new() });
    }

    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| {
            WorkgraphError::WorkspaceError(format!("invalid workspace pattern '{}': {}", pattern, e))
        })?;
    let matcher = glob.compile_matcher();

    let mut matches = Vec::new();
    let walker = WalkDir::new(root).min_depth(1).into_iter();
    for entry in walker.filter_entry(|e| {
        e.file_type().is_dir()
            && !matches!(e.file_name().to_str(), Some("node_modules") | Some(".git"))
    }) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("workspace walk: {}", e);
                continue;
            }
        };
        let rel = match entry.path().strip_prefix(root) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if matcher.is_match(rel) {
            matches.push(entry.path().to_path_buf());
        }
    }
    Ok(matches)
}
