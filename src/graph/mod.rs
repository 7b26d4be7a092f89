pub mod affected;
pub mod cycles;
pub mod waves;

use std::collections::{BTreeMap, BTreeSet};

use crate::workspace::Workspace;

pub type EdgeMap = BTreeMap<String, BTreeSet<String>>;

/// Forward and reverse dependency edges between workspace projects.
///
/// `B ∈ deps[A]` means A depends on B; the mirror edge `A ∈ rdeps[B]` is
/// always present. Edges exist only between known workspace projects;
/// external package names are ignored. Constructed once, immutable after.
#[derive(Debug)]
pub struct DependencyGraph {
    pub deps: EdgeMap,
    pub rdeps: EdgeMap,
}

impl DependencyGraph {
    pub fn build(workspace: &Workspace) -> Self {
        let mut deps: EdgeMap = workspace
            .projects
            .keys()
            .map(|name| (name.clone(), BTreeSet::new()))
            .collect();
        let mut rdeps = deps.clone();

        for (name, project) in &workspace.projects {
            for dep in project.manifest.dependency_names() {
                // Unknown names are external packages, not edges.
                if !workspace.projects.contains_key(&dep) {
                    continue;
                }
                deps.get_mut(name).unwrap().insert(dep.clone());
                rdeps.get_mut(&dep).unwrap().insert(name.clone());
            }
        }

        Self { deps, rdeps }
    }

    pub fn deps_of(&self, name: &str) -> impl Iterator<Item = &String> {
        self.deps.get(name).into_iter().flatten()
    }

    /// Transitive dependency closure of `targets`, excluding the targets
    /// themselves (used for pre-dev builds).
    pub fn dependency_closure(&self, targets: &[String]) -> BTreeSet<String> {
        let mut closure = BTreeSet::new();
        let mut queue: Vec<&String> = targets.iter().collect();
        while let Some(name) = queue.pop() {
            for dep in self.deps_of(name) {
                if closure.insert(dep.clone()) {
                    queue.push(dep);
                }
            }
        }
        for target in targets {
            closure.remove(target);
        }
        closure
    }
}

#[cfg(test)]
pub(crate) fn edge_map(edges: &[(&str, &[&str])]) -> EdgeMap {
    edges
        .iter()
        .map(|(name, deps)| {
            (
                name.to_string(),
                deps.iter().map(|d| d.to_string()).collect(),
            )
        })
        .collect()
}
