use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, WorkgraphError};

/// A parsed `package.json`. Only the fields the orchestrator consumes are
/// modeled; unknown keys are ignored.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Manifest {
    pub name: Option<String>,
    pub version: Option<String>,
    workspaces: Option<Workspaces>,
    pub dependencies: BTreeMap<String, String>,
    pub dev_dependencies: BTreeMap<String, String>,
    pub peer_dependencies: BTreeMap<String, String>,
    pub optional_dependencies: BTreeMap<String, String>,
    pub scripts: BTreeMap<String, String>,
    pub package_manager: Option<String>,
    /// Reserved key: source generator declarations (root or per-project).
    pub sources: BTreeMap<String, GeneratorDecl>,
}

/// npm accepts both the plain list form and the object form with a
/// `packages` key.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
enum Workspaces {
    Patterns(Vec<String>),
    Detailed {
        #[serde(default)]
        packages: Vec<String>,
    },
}

/// A generator declaration: either a bare command string or the detailed
/// object form.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum GeneratorDecl {
    Command(String),
    Detailed {
        command: String,
        #[serde(default)]
        deps: Vec<String>,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        cwd: Option<String>,
    },
}

impl Manifest {
    pub fn from_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WorkgraphError::ManifestError(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            WorkgraphError::ManifestError(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// The declared project name, if present and non-empty.
    pub fn project_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }

    /// Workspace glob patterns (root manifest only).
    pub fn workspace_patterns(&self) -> &[String] {
        match &self.workspaces {
            Some(Workspaces::Patterns(p)) => p,
            Some(Workspaces::Detailed { packages }) => packages,
            None => &[],
        }
    }

    /// Union of all four dependency maps' keys. Graph construction treats
    /// the maps identically.
    pub fn dependency_names(&self) -> BTreeSet<String> {
        self.dependencies
            .keys()
            .chain(self.dev_dependencies.keys())
            .chain(self.peer_dependencies.keys())
            .chain(self.optional_dependencies.keys())
            .cloned()
            .collect()
    }

    pub fn has_script(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }
}
