use std::collections::BTreeSet;

use workgraph::executor::{self, CommandSource, ExecutorOptions, NullReporter};
use workgraph::generator::GeneratorRegistry;
use workgraph::graph::affected::affected_set;
use workgraph::graph::waves::BuildPlan;
use workgraph::graph::DependencyGraph;
use workgraph::ui::PlainSink;
use workgraph::workspace::{Project, Workspace};

use crate::write_workspace;

/// Shell snippet per project, run through `/bin/sh -c`.
struct Shell(std::collections::BTreeMap<String, String>);

impl CommandSource for Shell {
    fn argv(&self, project: &Project) -> Option<Vec<String>> {
        self.0
            .get(&project.name)
            .map(|s| vec!["/bin/sh".to_string(), "-c".to_string(), s.clone()])
    }
}

#[test]
fn generator_runs_before_the_consuming_build() {
    let tmp = tempfile::tempdir().unwrap();
    write_workspace(
        tmp.path(),
        &["packages/*"],
        &[(
            "packages/api",
            r#"{ "name": "api",
                 "sources": { "gen-schema": "touch schema.generated" } }"#,
        )],
    );
    let ws = Workspace::load(tmp.path()).unwrap();
    let graph = DependencyGraph::build(&ws);
    let registry = GeneratorRegistry::load(&ws);

    let affected = affected_set(["api".to_string()], &graph.rdeps);
    let plan = BuildPlan::new(affected.clone(), &graph.deps).unwrap();

    // Generator pre-pass, then the build, which requires the generated file.
    registry
        .run_triggered(&ws, &affected, &PlainSink)
        .unwrap();
    let api_dir = ws.projects["api"].abs_path.clone();
    let commands = Shell(
        [(
            "api".to_string(),
            format!("test -f {}/schema.generated", api_dir.display()),
        )]
        .into_iter()
        .collect(),
    );
    let run = executor::run_plan(
        &ws,
        &plan,
        &commands,
        &NullReporter,
        &ExecutorOptions::default(),
    );
    assert!(run.ok, "build should see the generated file");
}

#[test]
fn failing_generator_aborts_with_its_exit_code() {
    let tmp = tempfile::tempdir().unwrap();
    write_workspace(
        tmp.path(),
        &["packages/*"],
        &[(
            "packages/api",
            r#"{ "name": "api",
                 "sources": { "gen-bad": { "command": "exit 9", "deps": ["api"] } } }"#,
        )],
    );
    let ws = Workspace::load(tmp.path()).unwrap();
    let registry = GeneratorRegistry::load(&ws);
    let affected: BTreeSet<String> = ["api".to_string()].into();

    let err = registry
        .run_triggered(&ws, &affected, &PlainSink)
        .unwrap_err();
    assert!(err.to_string().contains('9'));
}

#[test]
fn failed_wave_reports_partial_progress() {
    let tmp = tempfile::tempdir().unwrap();
    write_workspace(
        tmp.path(),
        &["packages/*"],
        &[
            ("packages/x", r#"{ "name": "x" }"#),
            ("packages/y", r#"{ "name": "y" }"#),
            (
                "packages/z",
                r#"{ "name": "z", "dependencies": { "x": "*", "y": "*" } }"#,
            ),
        ],
    );
    let ws = Workspace::load(tmp.path()).unwrap();
    let graph = DependencyGraph::build(&ws);
    let affected = affected_set(["x".to_string(), "y".to_string()], &graph.rdeps);
    let plan = BuildPlan::new(affected, &graph.deps).unwrap();

    let commands = Shell(
        [
            ("x".to_string(), "exit 1".to_string()),
            ("y".to_string(), "true".to_string()),
            ("z".to_string(), "true".to_string()),
        ]
        .into_iter()
        .collect(),
    );
    let run = executor::run_plan(
        &ws,
        &plan,
        &commands,
        &NullReporter,
        &ExecutorOptions::default(),
    );

    assert!(!run.ok);
    let names: BTreeSet<&str> = run.results.iter().map(|r| r.project.as_str()).collect();
    assert!(names.contains("x") && names.contains("y"));
    assert!(!names.contains("z"));
}
