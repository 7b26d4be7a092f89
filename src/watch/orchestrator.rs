//! The watch loop: rebuilds serialized on one thread, driven by debounced
//! change batches. Batches that arrive while a build is running coalesce
//! into exactly one follow-up build.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::{Result, WorkgraphError};
use crate::executor::{self, ExecutorOptions, PackageManager, RunResult, ScriptCommands};
use crate::generator::GeneratorRegistry;
use crate::graph::affected::affected_set;
use crate::graph::waves::BuildPlan;
use crate::graph::DependencyGraph;
use crate::resolve::{resolve_changed, FilterPattern};
use crate::supervisor::TaskSupervisor;
use crate::ui::{SinkReporter, UiSink};
use crate::workspace::Workspace;

use super::watcher::{self, FsWatcher, WatchOptions};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_shutdown(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

pub fn install_signal_handlers() {
    use nix::sys::signal::{signal, SigHandler, Signal};
    unsafe {
        let _ = signal(Signal::SIGINT, SigHandler::Handler(handle_shutdown));
        let _ = signal(Signal::SIGTERM, SigHandler::Handler(handle_shutdown));
    }
}

fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

pub struct OrchestratorOptions {
    /// Projects whose dev script runs under the supervisor.
    pub dev_targets: Vec<String>,
    pub filter: Option<FilterPattern>,
    pub debounce: Duration,
    pub concurrency: usize,
    pub build_script: String,
    pub dev_script: String,
    pub extra_ignore: Vec<String>,
    pub dry_run: bool,
}

pub struct Orchestrator {
    workspace: Workspace,
    graph: DependencyGraph,
    registry: GeneratorRegistry,
    package_manager: PackageManager,
    supervisor: Arc<TaskSupervisor>,
    sink: Arc<dyn UiSink>,
    options: OrchestratorOptions,
    build_count: u64,
}

impl Orchestrator {
    pub fn new(
        workspace: Workspace,
        graph: DependencyGraph,
        registry: GeneratorRegistry,
        sink: Arc<dyn UiSink>,
        options: OrchestratorOptions,
    ) -> Self {
        let package_manager = PackageManager::detect(&workspace);
        let supervisor = TaskSupervisor::new(sink.clone());
        Self {
            workspace,
            graph,
            registry,
            package_manager,
            supervisor,
            sink,
            options,
            build_count: 0,
        }
    }

    /// Pre-build dev dependencies, start dev tasks, then watch until a
    /// shutdown signal arrives.
    pub fn run(&mut self) -> Result<()> {
        install_signal_handlers();
        self.pre_dev()?;

        // Generator outputs must be ignored before the watcher arms, or a
        // generator writing into the tree would schedule another build.
        let mut extra_ignore = self.options.extra_ignore.clone();
        extra_ignore.extend(self.registry.output_globs());
        let fs_watcher = FsWatcher::start(
            &self.workspace.root,
            &WatchOptions {
                debounce: self.options.debounce,
                extra_ignore,
            },
        )?;
        self.sink.set_status(Some("watching for changes"));
        info!("watching {}", self.workspace.root.display());

        loop {
            if shutdown_requested() {
                break;
            }
            match fs_watcher.batches.recv_timeout(Duration::from_millis(100)) {
                Ok(mut paths) => {
                    // Coalesce everything that queued while the previous
                    // build was running into this batch.
                    while let Ok(more) = fs_watcher.batches.try_recv() {
                        paths.extend(more);
                    }
                    let change = watcher::process_batch(&self.workspace, &paths);
                    if change.projects.is_empty() {
                        continue;
                    }
                    self.rebuild(&change.projects);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("watch backend stopped");
                    break;
                }
            }
        }

        info!("shutting down");
        self.supervisor.kill_all();
        self.sink.destroy();
        Ok(())
    }

    /// Build the transitive dependency closure of the dev targets, run the
    /// generators their scope triggers, then hand each target to the
    /// supervisor.
    fn pre_dev(&mut self) -> Result<()> {
        if self.options.dev_targets.is_empty() {
            return Ok(());
        }
        let targets = resolve_changed(&self.workspace, &self.options.dev_targets)?;
        let target_names: Vec<String> = targets.iter().cloned().collect();

        let closure = self.graph.dependency_closure(&target_names);
        if !closure.is_empty() {
            self.sink.set_status(Some("building dev dependencies"));
            let plan = BuildPlan::new(closure.clone(), &self.graph.deps)?;
            let run = self.execute(&plan);
            if !run.ok {
                return Err(WorkgraphError::BuildError(
                    "pre-dev dependency build failed".to_string(),
                ));
            }
        }

        let mut generator_scope = closure;
        generator_scope.extend(targets);
        self.registry
            .run_triggered(&self.workspace, &generator_scope, self.sink.as_ref())?;

        for name in &target_names {
            let project = &self.workspace.projects[name];
            if !project.manifest.has_script(&self.options.dev_script) {
                warn!(
                    "project '{}' has no '{}' script, not starting a dev task",
                    name, self.options.dev_script
                );
                continue;
            }
            let argv = self
                .package_manager
                .render_script(name, &self.options.dev_script);
            self.supervisor
                .spawn_task(name, name, &argv, &self.workspace.root)?;
        }
        Ok(())
    }

    /// One serialized rebuild for a coalesced change set. Failures log and
    /// release; the next change event gets a clean attempt.
    fn rebuild(&mut self, changed: &BTreeSet<String>) {
        self.build_count += 1;
        let affected = affected_set(changed.iter().cloned(), &self.graph.rdeps);

        let filtered: BTreeSet<String> = match &self.options.filter {
            Some(filter) => affected
                .iter()
                .filter(|name| {
                    self.workspace
                        .projects
                        .get(*name)
                        .map_or(false, |p| filter.matches(p))
                })
                .cloned()
                .collect(),
            None => affected.clone(),
        };
        if filtered.is_empty() {
            return;
        }

        self.sink.set_status(Some(&format!(
            "build #{}: {} project(s) affected",
            self.build_count,
            filtered.len()
        )));

        let plan = match BuildPlan::new(filtered, &self.graph.deps) {
            Ok(plan) => plan,
            Err(e) => {
                error!("planning failed: {}", e);
                self.sink.set_status(Some("plan failed"));
                return;
            }
        };

        if let Err(e) = self
            .registry
            .run_triggered(&self.workspace, &affected, self.sink.as_ref())
        {
            error!("generator failed: {}", e);
            self.sink.set_status(Some("generator failed"));
            return;
        }

        let run = self.execute(&plan);
        if run.ok {
            self.sink.set_status(Some(&format!(
                "build #{} ok ({} ms)",
                self.build_count, run.duration_ms
            )));
        } else {
            self.sink.set_status(Some(&format!("build #{} failed", self.build_count)));
        }
    }

    fn execute(&self, plan: &BuildPlan) -> RunResult {
        let commands =
            ScriptCommands::new(self.package_manager, self.options.build_script.clone());
        let reporter = SinkReporter {
            sink: self.sink.as_ref(),
        };
        executor::run_plan(
            &self.workspace,
            plan,
            &commands,
            &reporter,
            &ExecutorOptions {
                concurrency: self.options.concurrency,
                dry_run: self.options.dry_run,
            },
        )
    }
}
