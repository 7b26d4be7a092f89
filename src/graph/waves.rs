//! Wave planning: induced-subgraph Kahn layering with stable ordering.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, WorkgraphError};

use super::EdgeMap;

/// The work implied by a change set: the affected projects and the
/// wavefronts they build in. Projects within a wave have no mutual
/// dependency inside the induced subgraph; wave `k` depends only on
/// waves `< k`.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub affected: BTreeSet<String>,
    pub waves: Vec<Vec<String>>,
}

impl BuildPlan {
    pub fn new(affected: BTreeSet<String>, deps: &EdgeMap) -> Result<Self> {
        let waves = plan_waves(&affected, deps)?;
        Ok(Self { affected, waves })
    }

    pub fn total_steps(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.affected.is_empty()
    }
}

/// Kahn's algorithm restricted to the induced subgraph: only edges whose
/// both endpoints are affected count. Each round emits the current
/// zero-in-degree set sorted lexicographically, so planning the same input
/// twice yields identical waves.
pub fn plan_waves(affected: &BTreeSet<String>, deps: &EdgeMap) -> Result<Vec<Vec<String>>> {
    let mut indegree: BTreeMap<&str, usize> =
        affected.iter().map(|n| (n.as_str(), 0)).collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> =
        affected.iter().map(|n| (n.as_str(), Vec::new())).collect();

    for name in affected {
        for dep in deps.get(name).into_iter().flatten() {
            if affected.contains(dep) {
                *indegree.get_mut(name.as_str()).unwrap() += 1;
                dependents.get_mut(dep.as_str()).unwrap().push(name);
            }
        }
    }

    let mut remaining: BTreeSet<&str> = affected.iter().map(String::as_str).collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        // BTreeSet iteration keeps the wave lexicographically sorted.
        let wave: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|n| indegree[n] == 0)
            .collect();
        if wave.is_empty() {
            return Err(WorkgraphError::PlanError(
                "cycle in affected subgraph".to_string(),
            ));
        }
        for name in &wave {
            remaining.remove(name);
            for dependent in &dependents[name] {
                *indegree.get_mut(*dependent).unwrap() -= 1;
            }
        }
        waves.push(wave.into_iter().map(str::to_string).collect());
    }

    Ok(waves)
}
