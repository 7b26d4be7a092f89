//! Wave-by-wave build execution under a concurrency bound.

pub mod command;
pub mod process;

use std::sync::mpsc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::graph::waves::BuildPlan;
use crate::workspace::{Project, Workspace};

pub use command::{CommandSource, PackageManager, ScriptCommands};

/// Context handed to the reporter when a project build starts.
#[derive(Debug, Clone)]
pub struct StepInfo {
    pub project: String,
    pub wave: usize,
    pub total_waves: usize,
    pub step: usize,
    pub total_steps: usize,
    pub is_parallel: bool,
}

#[derive(Debug, Clone)]
pub struct BuildResult {
    pub project: String,
    pub ok: bool,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
}

/// Aggregate of one executor run. `results` holds every project that was
/// attempted; waves after a failure are never attempted.
#[derive(Debug)]
pub struct RunResult {
    pub ok: bool,
    pub duration_ms: u64,
    pub results: Vec<BuildResult>,
}

/// Execution event sink. Test doubles implement this trivially.
pub trait Reporter: Send + Sync {
    fn on_start(&self, info: &StepInfo);
    fn on_output(&self, project: &str, line: &str, is_stderr: bool);
    fn on_complete(&self, result: &BuildResult);
}

/// Reporter that drops everything (dry planning, tests).
pub struct NullReporter;

impl Reporter for NullReporter {
    fn on_start(&self, _info: &StepInfo) {}
    fn on_output(&self, _project: &str, _line: &str, _is_stderr: bool) {}
    fn on_complete(&self, _result: &BuildResult) {}
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Maximum simultaneous child processes; clamped to at least 1.
    pub concurrency: usize,
    pub dry_run: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            dry_run: false,
        }
    }
}

/// Drive a build plan wave by wave. Within a wave, builds are admitted up
/// to the concurrency bound; a completion admits the next. Any failure
/// lets the current wave drain, then suppresses all later waves.
pub fn run_plan(
    workspace: &Workspace,
    plan: &BuildPlan,
    commands: &dyn CommandSource,
    reporter: &dyn Reporter,
    options: &ExecutorOptions,
) -> RunResult {
    let started = Instant::now();
    let total_waves = plan.waves.len();
    let total_steps = plan.total_steps();

    let mut results = Vec::with_capacity(total_steps);
    let mut ok = true;
    let mut step = 0;

    for (wave_index, wave) in plan.waves.iter().enumerate() {
        debug!(
            "wave {}/{}: {}",
            wave_index + 1,
            total_waves,
            wave.join(", ")
        );
        let wave_results = run_wave(
            workspace,
            wave,
            WaveContext {
                wave: wave_index + 1,
                total_waves,
                step_base: step,
                total_steps,
            },
            commands,
            reporter,
            options,
        );
        step += wave.len();
        ok &= wave_results.iter().all(|r| r.ok);
        results.extend(wave_results);

        if !ok {
            warn!(
                "wave {}/{} failed; skipping {} remaining wave(s)",
                wave_index + 1,
                total_waves,
                total_waves - wave_index - 1
            );
            break;
        }
    }

    RunResult {
        ok,
        duration_ms: started.elapsed().as_millis() as u64,
        results,
    }
}

struct WaveContext {
    wave: usize,
    total_waves: usize,
    step_base: usize,
    total_steps: usize,
}

fn run_wave(
    workspace: &Workspace,
    wave: &[String],
    ctx: WaveContext,
    commands: &dyn CommandSource,
    reporter: &dyn Reporter,
    options: &ExecutorOptions,
) -> Vec<BuildResult> {
    let concurrency = options.concurrency.max(1);
    let is_parallel = wave.len() > 1;
    let mut results = Vec::with_capacity(wave.len());

    let (tx, rx) = mpsc::channel::<BuildResult>();
    std::thread::scope(|scope| {
        let mut pending = wave.iter().enumerate();
        let mut in_flight = 0usize;
        loop {
            while in_flight < concurrency {
                let Some((offset, name)) = pending.next() else {
                    break;
                };
                let Some(project) = workspace.projects.get(name) else {
                    // Planner output is always a subset of the projects map.
                    continue;
                };
                reporter.on_start(&StepInfo {
                    project: name.clone(),
                    wave: ctx.wave,
                    total_waves: ctx.total_waves,
                    step: ctx.step_base + offset + 1,
                    total_steps: ctx.total_steps,
                    is_parallel,
                });
                let tx = tx.clone();
                let dry_run = options.dry_run;
                scope.spawn(move || {
                    let result = build_one(workspace, project, commands, reporter, dry_run);
                    let _ = tx.send(result);
                });
                in_flight += 1;
            }
            if in_flight == 0 {
                break;
            }
            match rx.recv() {
                Ok(result) => {
                    reporter.on_complete(&result);
                    results.push(result);
                    in_flight -= 1;
                }
                Err(_) => break,
            }
        }
    });

    results
}

fn build_one(
    workspace: &Workspace,
    project: &Project,
    commands: &dyn CommandSource,
    reporter: &dyn Reporter,
    dry_run: bool,
) -> BuildResult {
    let started = Instant::now();

    let Some(argv) = commands.argv(project) else {
        return BuildResult {
            project: project.name.clone(),
            ok: true,
            duration_ms: 0,
            stdout: format!("{}: nothing to run, skipped", project.name),
            stderr: String::new(),
        };
    };

    if dry_run {
        return BuildResult {
            project: project.name.clone(),
            ok: true,
            duration_ms: 0,
            stdout: format!("dry-run: {}", argv.join(" ")),
            stderr: String::new(),
        };
    }

    let outcome = process::run_streamed(&argv[0], &argv[1..], &workspace.root, |line, is_stderr| {
        reporter.on_output(&project.name, line, is_stderr);
    });

    match outcome {
        Ok(output) => BuildResult {
            project: project.name.clone(),
            ok: output.ok(),
            duration_ms: started.elapsed().as_millis() as u64,
            stdout: output.stdout,
            stderr: output.stderr,
        },
        Err(e) => BuildResult {
            project: project.name.clone(),
            ok: false,
            duration_ms: started.elapsed().as_millis() as u64,
            stdout: String::new(),
            stderr: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DependencyGraph;
    use crate::workspace::MANIFEST_FILENAME;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    /// Runs an explicit shell snippet per project, for exercising real
    /// child processes without a package manager.
    struct ShellPerProject(std::collections::BTreeMap<String, String>);

    impl CommandSource for ShellPerProject {
        fn argv(&self, project: &Project) -> Option<Vec<String>> {
            self.0.get(&project.name).map(|script| {
                vec!["/bin/sh".to_string(), "-c".to_string(), script.clone()]
            })
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        starts: Mutex<Vec<String>>,
        completions: Mutex<Vec<(String, bool)>>,
    }

    impl Reporter for RecordingReporter {
        fn on_start(&self, info: &StepInfo) {
            self.starts.lock().unwrap().push(info.project.clone());
        }
        fn on_output(&self, _project: &str, _line: &str, _is_stderr: bool) {}
        fn on_complete(&self, result: &BuildResult) {
            self.completions
                .lock()
                .unwrap()
                .push((result.project.clone(), result.ok));
        }
    }

    fn fixture(members: &[(&str, &str)]) -> (tempfile::TempDir, Workspace) {
        let tmp = tempfile::tempdir().unwrap();
        let patterns: Vec<String> = members
            .iter()
            .map(|(name, _)| format!("\"packages/{}\"", name))
            .collect();
        std::fs::write(
            tmp.path().join(MANIFEST_FILENAME),
            format!(
                r#"{{ "name": "root", "workspaces": [{}] }}"#,
                patterns.join(", ")
            ),
        )
        .unwrap();
        for (name, manifest) in members {
            let dir = tmp.path().join("packages").join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(MANIFEST_FILENAME), manifest).unwrap();
        }
        let ws = Workspace::load(tmp.path()).unwrap();
        (tmp, ws)
    }

    fn plan_for(workspace: &Workspace, seeds: &[&str]) -> BuildPlan {
        let graph = DependencyGraph::build(workspace);
        let affected: BTreeSet<String> = crate::graph::affected::affected_set(
            seeds.iter().map(|s| s.to_string()),
            &graph.rdeps,
        );
        BuildPlan::new(affected, &graph.deps).unwrap()
    }

    #[test]
    fn test_failure_short_circuits_after_wave() {
        // Waves [[x, y], [z]]: x fails, y still completes, z never starts.
        let (_tmp, ws) = fixture(&[
            ("x", r#"{ "name": "x" }"#),
            ("y", r#"{ "name": "y" }"#),
            (
                "z",
                r#"{ "name": "z", "dependencies": { "x": "*", "y": "*" } }"#,
            ),
        ]);
        let plan = plan_for(&ws, &["x", "y"]);
        assert_eq!(plan.waves.len(), 2);

        let commands = ShellPerProject(
            [
                ("x".to_string(), "exit 1".to_string()),
                ("y".to_string(), "true".to_string()),
                ("z".to_string(), "true".to_string()),
            ]
            .into_iter()
            .collect(),
        );
        let reporter = RecordingReporter::default();
        let run = run_plan(
            &ws,
            &plan,
            &commands,
            &reporter,
            &ExecutorOptions::default(),
        );

        assert!(!run.ok);
        let attempted: Vec<&str> = run.results.iter().map(|r| r.project.as_str()).collect();
        assert!(attempted.contains(&"x"));
        assert!(attempted.contains(&"y"));
        assert!(!attempted.contains(&"z"));
        assert!(!run.results.iter().find(|r| r.project == "x").unwrap().ok);
        assert!(run.results.iter().find(|r| r.project == "y").unwrap().ok);
    }

    #[test]
    fn test_waves_run_in_order_and_output_captured() {
        let (_tmp, ws) = fixture(&[
            ("lib", r#"{ "name": "lib" }"#),
            ("app", r#"{ "name": "app", "dependencies": { "lib": "*" } }"#),
        ]);
        let plan = plan_for(&ws, &["lib"]);

        let commands = ShellPerProject(
            [
                ("lib".to_string(), "echo built-lib".to_string()),
                ("app".to_string(), "echo built-app".to_string()),
            ]
            .into_iter()
            .collect(),
        );
        let reporter = RecordingReporter::default();
        let run = run_plan(
            &ws,
            &plan,
            &commands,
            &reporter,
            &ExecutorOptions::default(),
        );

        assert!(run.ok);
        assert_eq!(
            reporter.starts.lock().unwrap().as_slice(),
            ["lib".to_string(), "app".to_string()]
        );
        let lib = run.results.iter().find(|r| r.project == "lib").unwrap();
        assert_eq!(lib.stdout, "built-lib\n");
    }

    #[test]
    fn test_dry_run_spawns_nothing() {
        let (_tmp, ws) = fixture(&[(
            "a",
            r#"{ "name": "a", "scripts": { "build": "exit 1" } }"#,
        )]);
        let plan = plan_for(&ws, &["a"]);
        let commands = ScriptCommands::new(PackageManager::Npm, "build");
        let run = run_plan(
            &ws,
            &plan,
            &commands,
            &NullReporter,
            &ExecutorOptions {
                dry_run: true,
                ..Default::default()
            },
        );
        assert!(run.ok);
        assert!(run.results[0].stdout.starts_with("dry-run: npm run build"));
    }

    #[test]
    fn test_project_without_build_script_is_skipped() {
        let (_tmp, ws) = fixture(&[("docs", r#"{ "name": "docs" }"#)]);
        let plan = plan_for(&ws, &["docs"]);
        let commands = ScriptCommands::new(PackageManager::Npm, "build");
        let run = run_plan(
            &ws,
            &plan,
            &commands,
            &NullReporter,
            &ExecutorOptions::default(),
        );
        assert!(run.ok);
        assert!(run.results[0].stdout.contains("skipped"));
    }

    #[test]
    fn test_concurrency_bound_respected() {
        // Four parallel members, bound 2: track the peak of concurrent
        // markers on disk.
        let (tmp, ws) = fixture(&[
            ("p1", r#"{ "name": "p1" }"#),
            ("p2", r#"{ "name": "p2" }"#),
            ("p3", r#"{ "name": "p3" }"#),
            ("p4", r#"{ "name": "p4" }"#),
        ]);
        let markers = tmp.path().join("markers");
        std::fs::create_dir_all(&markers).unwrap();
        let script = format!(
            "touch {dir}/$$; count=$(ls {dir} | wc -l); echo $count; sleep 0.2; rm {dir}/$$",
            dir = markers.display()
        );
        let commands = ShellPerProject(
            ["p1", "p2", "p3", "p4"]
                .into_iter()
                .map(|n| (n.to_string(), script.clone()))
                .collect(),
        );
        let plan = plan_for(&ws, &["p1", "p2", "p3", "p4"]);
        let run = run_plan(
            &ws,
            &plan,
            &commands,
            &NullReporter,
            &ExecutorOptions {
                concurrency: 2,
                dry_run: false,
            },
        );
        assert!(run.ok);
        let peak = run
            .results
            .iter()
            .filter_map(|r| r.stdout.trim().parse::<usize>().ok())
            .max()
            .unwrap();
        assert!(peak <= 2, "peak concurrency {} exceeded bound", peak);
    }
}
