use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use workgraph::config::GlobalConfig;
use workgraph::executor::{self, ExecutorOptions, PackageManager, ScriptCommands};
use workgraph::generator::GeneratorRegistry;
use workgraph::graph::affected::affected_set;
use workgraph::graph::cycles::detect_cycles;
use workgraph::graph::waves::BuildPlan;
use workgraph::graph::DependencyGraph;
use workgraph::resolve::{resolve_changed, FilterPattern};
use workgraph::scanner::ImportScanner;
use workgraph::ui::{PlainSink, SinkReporter, UiSink};
use workgraph::watch::orchestrator::{Orchestrator, OrchestratorOptions};
use workgraph::workspace::Workspace;

#[derive(Parser)]
#[command(name = "workgraph", about = "workspace-aware build orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace root
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the workspace, print the dependency graph, detect cycles
    Analyze,
    /// Report unresolved relative imports and configured generators
    Scan,
    /// Compute the affected set and build waves for a change set
    Plan {
        /// Changed project identifiers (name, path, or /suffix)
        #[arg(long = "changed", required = true, num_args = 1..)]
        changed: Vec<String>,
    },
    /// Run triggered generators, then build affected projects in waves
    Build {
        /// Changed project identifiers; all projects when omitted
        #[arg(long = "changed", num_args = 1..)]
        changed: Vec<String>,

        /// Max concurrent build processes
        #[arg(long)]
        concurrency: Option<usize>,

        /// Plan and report without spawning builds
        #[arg(long)]
        dry_run: bool,

        /// Restrict to projects whose path matches (glob, * wildcard)
        #[arg(long)]
        filter: Option<String>,
    },
    /// Pre-build dependencies, start dev targets, watch and rebuild
    Watch {
        /// Projects whose dev script runs under supervision
        targets: Vec<String>,

        /// Restrict rebuilds to projects whose path matches
        #[arg(long)]
        filter: Option<String>,

        /// Debounce interval in milliseconds
        #[arg(long)]
        debounce: Option<u64>,

        /// Plain line-oriented output (also the default renderer)
        #[arg(long)]
        no_ui: bool,
    },
}

fn init_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("warn")
    } else if verbose >= 2 {
        EnvFilter::new("trace")
    } else if verbose == 1 {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let workspace = Workspace::load(&cli.root).context("failed to load workspace")?;
    let config = GlobalConfig::load(cli.config.as_deref(), &workspace.root)
        .context("failed to load configuration")?;
    let graph = DependencyGraph::build(&workspace);

    match cli.command {
        Commands::Analyze => {
            println!(
                "workspace {} ({} projects)",
                workspace.root.display(),
                workspace.projects.len()
            );
            for project in workspace.projects.values() {
                let deps: Vec<&str> = graph
                    .deps_of(&project.name)
                    .map(String::as_str)
                    .collect();
                if deps.is_empty() {
                    println!("  {} ({})", project.name, project.path.display());
                } else {
                    println!(
                        "  {} ({}) -> {}",
                        project.name,
                        project.path.display(),
                        deps.join(", ")
                    );
                }
            }
            let cycles = detect_cycles(&graph.deps);
            if !cycles.is_empty() {
                for cycle in &cycles {
                    eprintln!("cycle: {}", cycle.join(" -> "));
                }
                std::process::exit(1);
            }
            println!("no cycles detected");
        }

        Commands::Scan => {
            let registry = GeneratorRegistry::load(&workspace);
            let report = ImportScanner::new().scan(&workspace, &registry);

            if !registry.generators.is_empty() {
                println!("configured generators:");
                for g in &registry.generators {
                    match &g.target {
                        Some(target) => println!("  {} -> {} ({})", g.key, target, g.command),
                        None => println!("  {} ({})", g.key, g.command),
                    }
                }
            }

            if report.is_clean() {
                println!("no unknown dependencies");
            } else {
                println!("unknown dependencies:");
                for unknown in &report.unknown {
                    println!(
                        "  [{}] {} -> {}",
                        unknown.project,
                        unknown.specifier,
                        unknown.resolved.display()
                    );
                    for importer in &unknown.importers {
                        println!("      imported by {}", importer.display());
                    }
                }
                std::process::exit(1);
            }
        }

        Commands::Plan { changed } => {
            refuse_on_cycles(&graph);
            let seeds = resolve_changed(&workspace, &changed)?;
            let affected = affected_set(seeds, &graph.rdeps);
            let plan = BuildPlan::new(affected, &graph.deps)?;
            println!(
                "affected: {}",
                plan.affected.iter().cloned().collect::<Vec<_>>().join(", ")
            );
            for (i, wave) in plan.waves.iter().enumerate() {
                println!("wave {}: [{}]", i + 1, wave.join(", "));
            }
        }

        Commands::Build {
            changed,
            concurrency,
            dry_run,
            filter,
        } => {
            refuse_on_cycles(&graph);
            let seeds: BTreeSet<String> = if changed.is_empty() {
                workspace.projects.keys().cloned().collect()
            } else {
                resolve_changed(&workspace, &changed)?
            };
            let affected = affected_set(seeds, &graph.rdeps);

            let filtered: BTreeSet<String> = match filter.as_deref() {
                Some(pattern) => {
                    let filter = FilterPattern::new(pattern)?;
                    affected
                        .iter()
                        .filter(|name| {
                            workspace
                                .projects
                                .get(*name)
                                .map_or(false, |p| filter.matches(p))
                        })
                        .cloned()
                        .collect()
                }
                None => affected.clone(),
            };
            if filtered.is_empty() {
                println!("nothing to build");
                return Ok(());
            }
            let plan = BuildPlan::new(filtered, &graph.deps)?;

            let sink = PlainSink;
            let registry = GeneratorRegistry::load(&workspace);
            registry
                .run_triggered(&workspace, &affected, &sink)
                .context("generator pre-pass failed")?;

            let package_manager = PackageManager::detect(&workspace);
            let commands = ScriptCommands::new(package_manager, config.build.build_script.clone());
            let reporter = SinkReporter { sink: &sink };
            let run = executor::run_plan(
                &workspace,
                &plan,
                &commands,
                &reporter,
                &ExecutorOptions {
                    concurrency: concurrency.unwrap_or(config.build.concurrency),
                    dry_run,
                },
            );

            let failed = run.results.iter().filter(|r| !r.ok).count();
            println!(
                "{} project(s) in {} wave(s), {} failed, {} ms",
                run.results.len(),
                plan.waves.len(),
                failed,
                run.duration_ms
            );
            if !run.ok {
                std::process::exit(1);
            }
        }

        Commands::Watch {
            targets,
            filter,
            debounce,
            no_ui,
        } => {
            refuse_on_cycles(&graph);
            let registry = GeneratorRegistry::load(&workspace);
            // The TUI renderer is pluggable behind the sink; the built-in
            // renderer is the plain one either way.
            let _ = no_ui;
            let sink: Arc<dyn UiSink> = Arc::new(PlainSink);
            let options = OrchestratorOptions {
                dev_targets: targets,
                filter: filter.as_deref().map(FilterPattern::new).transpose()?,
                debounce: Duration::from_millis(debounce.unwrap_or(config.watch.debounce_ms)),
                concurrency: config.build.concurrency,
                build_script: config.build.build_script.clone(),
                dev_script: config.watch.dev_script.clone(),
                extra_ignore: config.watch.ignore.clone(),
                dry_run: false,
            };
            let mut orchestrator = Orchestrator::new(workspace, graph, registry, sink, options);
            orchestrator.run()?;
        }
    }

    Ok(())
}

fn refuse_on_cycles(graph: &DependencyGraph) {
    let cycles = detect_cycles(&graph.deps);
    if !cycles.is_empty() {
        for cycle in &cycles {
            eprintln!("cycle: {}", cycle.join(" -> "));
        }
        eprintln!("refusing to plan with dependency cycles");
        std::process::exit(1);
    }
}
