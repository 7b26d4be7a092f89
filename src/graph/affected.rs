//! Affected-set computation: the closure of a change set under reverse
//! dependency edges.

use std::collections::{BTreeSet, VecDeque};

use super::EdgeMap;

/// Smallest set containing `seeds` and closed under `rdeps`: whenever a
/// project is in the set, so is everything that depends on it. BFS with a
/// visited set; linear in the edges touched.
pub fn affected_set<I, S>(seeds: I, rdeps: &EdgeMap) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut visited: BTreeSet<String> = seeds.into_iter().map(Into::into).collect();
    let mut queue: VecDeque<String> = visited.iter().cloned().collect();

    while let Some(name) = queue.pop_front() {
        for dependent in rdeps.get(&name).into_iter().flatten() {
            if visited.insert(dependent.clone()) {
                queue.push_back(dependent.clone());
            }
        }
    }
    visited
}
