//! Build-command rendering: package-manager detection and structured argv.

use crate::workspace::{Project, Workspace};

/// The workspace package manager. Detection: the root manifest's
/// `packageManager` field wins; otherwise a lockfile heuristic; npm is the
/// fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
    Bun,
}

impl PackageManager {
    pub fn detect(workspace: &Workspace) -> Self {
        if let Some(spec) = &workspace.manifest.package_manager {
            if let Some(pm) = Self::from_spec(spec) {
                return pm;
            }
        }
        let root = &workspace.root;
        if root.join("pnpm-lock.yaml").is_file() {
            Self::Pnpm
        } else if root.join("yarn.lock").is_file() {
            Self::Yarn
        } else if root.join("bun.lockb").is_file() || root.join("bun.lock").is_file() {
            Self::Bun
        } else {
            Self::Npm
        }
    }

    /// Parse a `packageManager` field value such as `pnpm@9.1.0`.
    pub fn from_spec(spec: &str) -> Option<Self> {
        let name = spec.split('@').next().unwrap_or(spec);
        match name {
            "npm" => Some(Self::Npm),
            "yarn" => Some(Self::Yarn),
            "pnpm" => Some(Self::Pnpm),
            "bun" => Some(Self::Bun),
            _ => None,
        }
    }

    pub fn program(&self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Yarn => "yarn",
            Self::Pnpm => "pnpm",
            Self::Bun => "bun",
        }
    }

    /// Argv for running a workspace project's script, dispatched per
    /// manager. No shell is involved.
    pub fn render_script(&self, project: &str, script: &str) -> Vec<String> {
        let args: Vec<&str> = match self {
            Self::Npm => vec!["npm", "run", script, "-w", project],
            Self::Yarn => vec!["yarn", "workspace", project, "run", script],
            Self::Pnpm => vec!["pnpm", "--filter", project, "run", script],
            Self::Bun => vec!["bun", "run", "--filter", project, script],
        };
        args.into_iter().map(str::to_string).collect()
    }
}

/// Source of build argv per project. `None` means the project has nothing
/// to run for this invocation and is skipped with a synthesized success.
pub trait CommandSource: Send + Sync {
    fn argv(&self, project: &Project) -> Option<Vec<String>>;
}

/// The default source: run the configured script through the detected
/// package manager, skipping projects whose manifest lacks the script.
pub struct ScriptCommands {
    pub package_manager: PackageManager,
    pub script: String,
}

impl ScriptCommands {
    pub fn new(package_manager: PackageManager, script: impl Into<String>) -> Self {
        Self {
            package_manager,
            script: script.into(),
        }
    }
}

impl CommandSource for ScriptCommands {
    fn argv(&self, project: &Project) -> Option<Vec<String>> {
        if !project.manifest.has_script(&self.script) {
            return None;
        }
        Some(
            self.package_manager
                .render_script(&project.name, &self.script),
        )
    }
}
