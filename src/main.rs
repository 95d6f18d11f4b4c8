//! kiln - a task-graph build tool
//!
//! - TOML build files with included child projects
//! - Rhai build scripts, compiled once and cached next to the script
//! - Deterministic dependency ordering with DAG-neutral graph reuse
//! - `-D` switches to skip tasks
//! - File watching

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use console::style;

mod cli;

use cli::{CacheCommands, Cli, Commands, EffectiveCommand, GraphFormat, ListFormat};
use kiln::config::{Config, DEFAULT_CONFIG};
use kiln::error::{KilnError, Result};
use kiln::executor::{Executor, ExecutorConfig};
use kiln::graph::TaskGraph;
use kiln::loader::BuildLoader;
use kiln::project::BUILD_FILE;
use kiln::switches::Switches;
use kiln::watch::{self, WatchOptions};
use kiln::Build;

#[tokio::main]
async fn main() -> ExitCode {
    // Set up panic handler for nice error messages
    miette::set_panic_hook();

    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    // Handle --no-color
    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {:?}", style("error").red().bold(), miette::Report::new(e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Change working directory if specified
    if let Some(cwd) = &cli.cwd {
        std::env::set_current_dir(cwd)?;
    }

    match cli.effective_command() {
        EffectiveCommand::Subcommand(cmd) => run_command(cmd, &cli).await,
        EffectiveCommand::RunTasks(tasks) => run_tasks(tasks, false, &cli),
        EffectiveCommand::None => {
            // No command - list tasks
            let (_, build) = load_build(&cli)?;
            print_task_list(&build, ListFormat::Table, false)
        }
    }
}

async fn run_command(cmd: &Commands, cli: &Cli) -> Result<()> {
    match cmd {
        Commands::Run { tasks, dry_run } => run_tasks(tasks, *dry_run, cli),

        Commands::List { format, deps } => {
            let (_, build) = load_build(cli)?;
            print_task_list(&build, format.clone(), *deps)
        }

        Commands::Graph { tasks, format } => {
            let (_, build) = load_build(cli)?;
            let graph = if tasks.is_empty() {
                TaskGraph::for_all_tasks(&build)?
            } else {
                TaskGraph::build(&build, &cli.project_path(), tasks)?
            };
            print_graph(&build, &graph, format.clone())
        }

        Commands::Watch { tasks } => {
            let options = WatchOptions {
                config_path: cli.config.clone(),
                cwd: std::env::current_dir()?,
                cache_usage: cli.cache_usage(),
                switches: Switches::from_definitions(&cli.define),
                executor: executor_config(cli, false),
                requests: tasks.clone(),
            };
            watch::watch_and_run(options).await
        }

        Commands::Cache { command } => run_cache_command(command, cli),

        Commands::Init { force } => init_config(*force),

        Commands::Check => {
            let (path, build) = load_build(cli)?;
            let graph = TaskGraph::for_all_tasks(&build)?;

            println!(
                "{} {} is valid ({} projects, {} tasks)",
                style("✓").green(),
                path.display(),
                build.projects().count(),
                graph.len()
            );
            Ok(())
        }
    }
}

/// Load the configuration and configure every project
fn load_build(cli: &Cli) -> Result<(PathBuf, Build)> {
    let cwd = std::env::current_dir()?;
    let (config, path) = Config::load(cli.config.as_deref(), &cwd)?;
    let loader = BuildLoader::new(&config.settings, cli.cache_usage());
    let build = loader.load(&config, &path)?;

    let project = cli.project_path();
    if build.project(&project).is_none() {
        return Err(KilnError::ProjectNotFound { path: project });
    }
    Ok((path, build))
}

fn executor_config(cli: &Cli, dry_run: bool) -> ExecutorConfig {
    ExecutorConfig {
        dry_run,
        verbose: cli.verbose,
        quiet: cli.quiet,
        project: cli.project_path(),
    }
}

fn run_tasks(tasks: &[String], dry_run: bool, cli: &Cli) -> Result<()> {
    let (_, mut build) = load_build(cli)?;
    let switches = Switches::from_definitions(&cli.define);

    let executor = Executor::new(executor_config(cli, dry_run), switches);
    let report = executor.execute(&mut build, tasks)?;
    tracing::debug!(
        tasks = report.results.len(),
        graph_builds = report.graph_builds,
        "run finished"
    );

    Ok(())
}

/// Cache maintenance reads the configuration only; build scripts are not run
fn run_cache_command(cmd: &CacheCommands, cli: &Cli) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let (config, path) = Config::load(cli.config.as_deref(), &cwd)?;
    let loader = BuildLoader::new(&config.settings, cli.cache_usage());

    match cmd {
        CacheCommands::Stats => {
            let stats = loader.cache_stats(&path)?;
            println!("Cache ({}): {}", loader.cache_usage(), stats);
        }

        CacheCommands::Clean => {
            let removed = loader.clean_cache(&path)?;
            println!(
                "{} Removed {} cache director{}",
                style("✓").green(),
                removed,
                if removed == 1 { "y" } else { "ies" }
            );
        }

        CacheCommands::Path => {
            for dir in loader.cache_roots(&path)? {
                println!("{}", dir.display());
            }
        }
    }

    Ok(())
}

fn print_task_list(build: &Build, format: ListFormat, show_deps: bool) -> Result<()> {
    match format {
        ListFormat::Table => {
            println!("{}", style("Available tasks:").bold());
            println!();

            let max_path_len = build.tasks().map(|t| t.path().len()).max().unwrap_or(0);

            for task in build.tasks() {
                let desc = task.description().unwrap_or("");

                print!(
                    "  {}{}  {}",
                    style(task.path()).cyan().bold(),
                    " ".repeat(max_path_len - task.path().len()),
                    style(desc).dim()
                );

                if !task.enabled() {
                    print!(" {}", style("(disabled)").yellow());
                }

                if show_deps && !task.dependencies().is_empty() {
                    let deps: Vec<&str> = task.dependencies().iter().map(String::as_str).collect();
                    print!(
                        " {}",
                        style(format!("[deps: {}]", deps.join(", "))).yellow().dim()
                    );
                }

                println!();
            }
        }

        ListFormat::Json => {
            let mut tasks = serde_json::Map::new();
            for task in build.tasks() {
                let mut obj = serde_json::Map::new();
                if let Some(desc) = task.description() {
                    obj.insert("description".to_string(), serde_json::json!(desc));
                }
                obj.insert("enabled".to_string(), serde_json::json!(task.enabled()));
                obj.insert("dag_neutral".to_string(), serde_json::json!(task.is_dag_neutral()));
                if show_deps {
                    obj.insert("depends_on".to_string(), serde_json::json!(task.dependencies()));
                }
                tasks.insert(task.path().to_string(), serde_json::Value::Object(obj));
            }
            println!("{}", to_json(&tasks)?);
        }

        ListFormat::Plain => {
            for task in build.tasks() {
                println!("{}", task.path());
            }
        }
    }

    Ok(())
}

fn print_graph(build: &Build, graph: &TaskGraph, format: GraphFormat) -> Result<()> {
    match format {
        GraphFormat::Text => {
            println!("{}", style("Task dependency graph:").bold());
            println!();

            for path in graph.order() {
                let deps = graph.dependencies(path).unwrap_or_default();

                if deps.is_empty() {
                    println!("  {}", style(path).cyan().bold());
                } else {
                    println!(
                        "  {} {} {}",
                        style(path).cyan().bold(),
                        style("←").dim(),
                        deps.join(", ")
                    );
                }
            }
        }

        GraphFormat::Dot => {
            println!("digraph kiln {{");
            println!("  rankdir=LR;");
            println!("  node [shape=box];");

            for path in graph.order() {
                println!("  \"{}\";", path);
                for dep in graph.dependencies(path).unwrap_or_default() {
                    println!("  \"{}\" -> \"{}\";", dep, path);
                }
            }

            println!("}}");
        }

        GraphFormat::Json => {
            let mut nodes = Vec::new();
            let mut edges = Vec::new();

            for path in graph.order() {
                nodes.push(serde_json::json!({
                    "id": path,
                    "description": build.task(path).and_then(|t| t.description()),
                }));

                for dep in graph.dependencies(path).unwrap_or_default() {
                    edges.push(serde_json::json!({
                        "from": dep,
                        "to": path,
                    }));
                }
            }

            let output = serde_json::json!({
                "order": graph.order(),
                "nodes": nodes,
                "edges": edges,
            });

            println!("{}", to_json(&output)?);
        }
    }

    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| KilnError::Io(std::io::Error::other(e.to_string())))
}

fn init_config(force: bool) -> Result<()> {
    let path = Path::new(BUILD_FILE);

    if path.exists() && !force {
        return Err(KilnError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists (use --force to overwrite)", BUILD_FILE),
        )));
    }

    std::fs::write(path, DEFAULT_CONFIG)?;

    println!(
        "{} Created {}",
        style("✓").green(),
        style(BUILD_FILE).bold()
    );

    Ok(())
}
