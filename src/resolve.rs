//! Identifier resolution for `--changed` inputs and generator deps, and the
//! `--filter` project pattern.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::warn;

use crate::error::{Result, WorkgraphError};
use crate::workspace::{Project, Workspace};

/// Resolve one identifier to a project: exact name, then workspace-relative
/// path, then `/<id>` suffix against any name (so `api` finds `@scope/api`).
pub fn resolve_identifier<'a>(workspace: &'a Workspace, id: &str) -> Option<&'a Project> {
    if let Some(project) = workspace.projects.get(id) {
        return Some(project);
    }
    let as_path = Path::new(id);
    if let Some(project) = workspace.projects.values().find(|p| p.path == as_path) {
        return Some(project);
    }
    let suffix = format!("/{}", id);
    workspace
        .projects
        .values()
        .find(|p| p.name.ends_with(&suffix))
}

/// Resolve a change set. Unresolvable identifiers are dropped with a
/// warning; if every identifier drops, that is fatal.
pub fn resolve_changed(workspace: &Workspace, ids: &[String]) -> Result<BTreeSet<String>> {
    let mut resolved = BTreeSet::new();
    let mut dropped = Vec::new();
    for id in ids {
        match resolve_identifier(workspace, id) {
            Some(project) => {
                resolved.insert(project.name.clone());
            }
            None => dropped.push(id.clone()),
        }
    }
    if !dropped.is_empty() {
        warn!("unresolved identifiers: {}", dropped.join(", "));
    }
    if resolved.is_empty() && !ids.is_empty() {
        return Err(WorkgraphError::PlanError(format!(
            "none of the given identifiers resolved to a project: {}",
            ids.join(", ")
        )));
    }
    Ok(resolved)
}

/// Glob-like pattern with `*` as the only wildcard, matched against a
/// project's workspace-relative path.
#[derive(Debug, Clone)]
pub struct FilterPattern {
    re: regex::Regex,
}

impl FilterPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let escaped: Vec<String> = pattern.split('*').map(|s| regex::escape(s)).collect();
        let re = regex::Regex::new(&format!("^{}$", escaped.join(".*"))).map_err(|e| {
            WorkgraphError::PlanError(format!("invalid filter pattern '{}': {}", pattern, e))
        })?;
        Ok(Self { re })
    }

    pub fn matches(&self, project: &Project) -> bool {
        self.re.is_match(&project.path.to_string_lossy())
    }
}
