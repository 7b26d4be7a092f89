//! Source generator pre-pass: declarations, trigger rules, ordering, and
//! execution before the build executor runs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Result, WorkgraphError};
use crate::executor::process;
use crate::resolve::resolve_identifier;
use crate::ui::UiSink;
use crate::workspace::manifest::GeneratorDecl;
use crate::workspace::Workspace;

/// A normalized generator declaration.
#[derive(Debug, Clone)]
pub struct GeneratorSpec {
    /// Unique key; doubles as the output path (workspace-relative) when no
    /// explicit deps gate the generator.
    pub key: String,
    pub command: String,
    /// Project identifiers whose change triggers this generator.
    pub deps: Vec<String>,
    pub cwd: PathBuf,
    /// Project whose build consumes the output.
    pub target: Option<String>,
}

/// All generators declared in the workspace, in execution order.
#[derive(Debug, Default)]
pub struct GeneratorRegistry {
    pub generators: Vec<GeneratorSpec>,
}

impl GeneratorRegistry {
    /// Load declarations from the root manifest and every project manifest.
    /// Per-project declarations override root declarations sharing a key.
    pub fn load(workspace: &Workspace) -> Self {
        let mut by_key: BTreeMap<String, GeneratorSpec> = BTreeMap::new();

        for (key, decl) in &workspace.manifest.sources {
            by_key.insert(
                key.clone(),
                normalize(key, decl, &workspace.root, None),
            );
        }
        for project in workspace.projects.values() {
            for (key, decl) in &project.manifest.sources {
                by_key.insert(
                    key.clone(),
                    normalize(key, decl, &project.abs_path, Some(project.name.as_str())),
                );
            }
        }

        let generators = order_generators(workspace, by_key.into_values().collect());
        debug!("generator registry: {} generator(s)", generators.len());
        Self { generators }
    }

    /// Generators triggered by an affected set: any declared dep resolving
    /// into the set, or (with no deps) the key-as-path lying inside an
    /// affected project.
    pub fn triggered<'a>(
        &'a self,
        workspace: &Workspace,
        affected: &BTreeSet<String>,
    ) -> Vec<&'a GeneratorSpec> {
        self.generators
            .iter()
            .filter(|g| is_triggered(g, workspace, affected))
            .collect()
    }

    /// Run every triggered generator, in registry order, strictly before
    /// any build. The first failure aborts.
    pub fn run_triggered(
        &self,
        workspace: &Workspace,
        affected: &BTreeSet<String>,
        sink: &dyn UiSink,
    ) -> Result<usize> {
        let triggered = self.triggered(workspace, affected);
        for spec in &triggered {
            info!("running generator '{}'", spec.key);
            sink.log(&format!("generate {} ({})", spec.key, spec.command));
            let output =
                process::run_shell_streamed(&spec.command, &spec.cwd, |line, _is_stderr| {
                    sink.log(&format!("{} | {}", spec.key, line));
                })?;
            if !output.ok() {
                return Err(WorkgraphError::GeneratorError(format!(
                    "generator '{}' exited with code {}",
                    spec.key, output.code
                )));
            }
        }
        Ok(triggered.len())
    }

    /// Ignore globs covering every generator's output path, fed to the
    /// watcher so generated files never re-trigger a build.
    pub fn output_globs(&self) -> Vec<String> {
        let mut globs = Vec::with_capacity(self.generators.len() * 2);
        for g in &self.generators {
            let key = g.key.trim_end_matches('/');
            globs.push(format!("**/{}", key));
            globs.push(format!("**/{}/**", key));
        }
        globs
    }

    /// Output paths resolved against each generator's cwd (the workspace
    /// root for root declarations, the project directory otherwise). The
    /// scanner treats these as expected-missing on a clean checkout.
    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.generators.iter().map(|g| g.cwd.join(&g.key)).collect()
    }
}

fn normalize(
    key: &str,
    decl: &GeneratorDecl,
    base: &Path,
    owner: Option<&str>,
) -> GeneratorSpec {
    match decl {
        GeneratorDecl::Command(command) => GeneratorSpec {
            key: key.to_string(),
            command: command.clone(),
            deps: Vec::new(),
            cwd: base.to_path_buf(),
            target: owner.map(str::to_string),
        },
        GeneratorDecl::Detailed {
            command,
            deps,
            target,
            cwd,
        } => GeneratorSpec {
            key: key.to_string(),
            command: command.clone(),
            deps: deps.clone(),
            cwd: cwd
                .as_ref()
                .map(|c| base.join(c))
                .unwrap_or_else(|| base.to_path_buf()),
            target: target
                .clone()
                .or_else(|| owner.map(str::to_string)),
        },
    }
}

fn is_triggered(spec: &GeneratorSpec, workspace: &Workspace, affected: &BTreeSet<String>) -> bool {
    if !spec.deps.is_empty() {
        return spec.deps.iter().any(|id| {
            resolve_identifier(workspace, id)
                .map_or(false, |p| affected.contains(&p.name))
        });
    }
    // No deps: fall back to path containment of the key.
    let key_path = spec.cwd.join(&spec.key);
    affected
        .iter()
        .filter_map(|name| workspace.projects.get(name))
        .any(|p| key_path.starts_with(&p.abs_path))
}

/// Does `dep` (a project identifier) name the same project as `target`?
fn dep_names_target(workspace: &Workspace, dep: &str, target: &str) -> bool {
    match resolve_identifier(workspace, dep) {
        Some(project) => project.name == target,
        None => dep == target,
    }
}

/// Stable ordering pass: a generator whose deps include another generator's
/// target runs after that generator; everything else keeps sorted-key
/// declaration order. Kahn over that single edge kind, always popping the
/// first ready entry so the order never shuffles more than the rule
/// requires.
fn order_generators(workspace: &Workspace, input: Vec<GeneratorSpec>) -> Vec<GeneratorSpec> {
    let n = input.len();
    let mut placed = vec![false; n];
    let mut ordered = Vec::with_capacity(n);

    while ordered.len() < n {
        let mut progressed = false;
        for i in 0..n {
            if placed[i] {
                continue;
            }
            let blocked = (0..n).any(|j| {
                j != i
                    && !placed[j]
                    && input[j].target.as_deref().map_or(false, |target| {
                        input[i]
                            .deps
                            .iter()
                            .any(|dep| dep_names_target(workspace, dep, target))
                    })
            });
            if !blocked {
                ordered.push(input[i].clone());
                placed[i] = true;
                progressed = true;
            }
        }
        if !progressed {
            warn!("cyclic generator dependencies; keeping declaration order for the rest");
            for i in 0..n {
                if !placed[i] {
                    ordered.push(input[i].clone());
                    placed[i] = true;
                }
            }
        }
    }
    ordered
}
