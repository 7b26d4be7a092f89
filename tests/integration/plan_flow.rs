use std::collections::BTreeSet;

use workgraph::graph::affected::affected_set;
use workgraph::graph::cycles::detect_cycles;
use workgraph::graph::waves::BuildPlan;
use workgraph::graph::DependencyGraph;
use workgraph::resolve::resolve_changed;
use workgraph::workspace::Workspace;

use crate::write_workspace;

#[test]
fn diamond_change_builds_bottom_up() {
    let tmp = tempfile::tempdir().unwrap();
    write_workspace(
        tmp.path(),
        &["packages/*"],
        &[
            (
                "packages/a",
                r#"{ "name": "a", "dependencies": { "b": "*", "c": "*" } }"#,
            ),
            (
                "packages/b",
                r#"{ "name": "b", "dependencies": { "d": "*" } }"#,
            ),
            (
                "packages/c",
                r#"{ "name": "c", "dependencies": { "d": "*" } }"#,
            ),
            ("packages/d", r#"{ "name": "d" }"#),
        ],
    );
    let ws = Workspace::load(tmp.path()).unwrap();
    let graph = DependencyGraph::build(&ws);
    assert!(detect_cycles(&graph.deps).is_empty());

    let seeds = resolve_changed(&ws, &["d".to_string()]).unwrap();
    let affected = affected_set(seeds, &graph.rdeps);
    assert_eq!(
        affected.iter().collect::<Vec<_>>(),
        ["a", "b", "c", "d"]
    );

    let plan = BuildPlan::new(affected, &graph.deps).unwrap();
    assert_eq!(
        plan.waves,
        vec![
            vec!["d".to_string()],
            vec!["b".to_string(), "c".to_string()],
            vec!["a".to_string()],
        ]
    );
}

#[test]
fn cycle_is_detected_and_blocks_planning() {
    let tmp = tempfile::tempdir().unwrap();
    write_workspace(
        tmp.path(),
        &["packages/*"],
        &[
            (
                "packages/a",
                r#"{ "name": "a", "dependencies": { "b": "*" } }"#,
            ),
            (
                "packages/b",
                r#"{ "name": "b", "dependencies": { "c": "*" } }"#,
            ),
            (
                "packages/c",
                r#"{ "name": "c", "dependencies": { "a": "*" } }"#,
            ),
        ],
    );
    let ws = Workspace::load(tmp.path()).unwrap();
    let graph = DependencyGraph::build(&ws);

    let cycles = detect_cycles(&graph.deps);
    assert_eq!(cycles.len(), 1);
    let cycle = &cycles[0];
    assert_eq!(cycle.len(), 4);
    assert_eq!(cycle.first(), cycle.last());

    // Planning over the cyclic set fails the defensive check too.
    let all: BTreeSet<String> = ws.projects.keys().cloned().collect();
    assert!(BuildPlan::new(all, &graph.deps).is_err());
}

#[test]
fn unrelated_change_stays_isolated() {
    let tmp = tempfile::tempdir().unwrap();
    write_workspace(
        tmp.path(),
        &["packages/*"],
        &[
            ("packages/a", r#"{ "name": "a" }"#),
            ("packages/b", r#"{ "name": "b" }"#),
            (
                "packages/c",
                r#"{ "name": "c", "dependencies": { "a": "*" } }"#,
            ),
        ],
    );
    let ws = Workspace::load(tmp.path()).unwrap();
    let graph = DependencyGraph::build(&ws);

    let affected = affected_set(["b".to_string()], &graph.rdeps);
    assert_eq!(affected.iter().collect::<Vec<_>>(), ["b"]);
    let plan = BuildPlan::new(affected, &graph.deps).unwrap();
    assert_eq!(plan.waves, vec![vec!["b".to_string()]]);
}
