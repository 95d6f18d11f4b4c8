//! Task execution engine
//!
//! Runs requested tasks one at a time in graph order, applying skip switches
//! and the enabled flag, and rebuilds the graph between requests when a task
//! that may have reshaped it has run.

use std::time::{Duration, Instant};

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::build::Build;
use crate::error::{KilnError, Result};
use crate::graph::TaskGraph;
use crate::project::ROOT_PATH;
use crate::switches::Switches;
use crate::task::ActionContext;

/// What happened during a task's turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Actions ran to completion
    Executed,
    /// A skip switch named by `property` was set
    Skipped { property: String },
    /// The task is disabled; its actions did not run
    Disabled,
}

/// Result of a single task's turn
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub path: String,
    pub outcome: TaskOutcome,
    pub duration: Duration,
    pub output: String,
}

/// Everything a run did
#[derive(Debug, Default)]
pub struct RunReport {
    pub results: Vec<TaskResult>,
    /// Number of graphs built, at least one for a run that got past validation
    pub graph_builds: usize,
}

impl RunReport {
    /// Paths of tasks whose actions ran, in order
    pub fn executed(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.outcome == TaskOutcome::Executed)
            .map(|r| r.path.as_str())
            .collect()
    }

    pub fn result(&self, path: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.path == path)
    }
}

/// Executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Dry run mode (don't execute, just show plan)
    pub dry_run: bool,
    /// Print task output as it is produced
    pub verbose: bool,
    /// Print nothing
    pub quiet: bool,
    /// Project requests are resolved against
    pub project: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            verbose: false,
            quiet: false,
            project: ROOT_PATH.to_string(),
        }
    }
}

/// Task executor
pub struct Executor {
    config: ExecutorConfig,
    switches: Switches,
}

impl Executor {
    /// Create a new executor
    pub fn new(config: ExecutorConfig, switches: Switches) -> Self {
        Self { config, switches }
    }

    pub fn switches(&self) -> &Switches {
        &self.switches
    }

    /// Run `requests` in order against `build`.
    ///
    /// The first graph covers every request, so an unknown task, unresolved
    /// dependency or cycle anywhere fails the run before any action.
    pub fn execute(&self, build: &mut Build, requests: &[String]) -> Result<RunReport> {
        let mut graph = TaskGraph::build(build, &self.config.project, requests)?;
        let mut report = RunReport {
            results: Vec::new(),
            graph_builds: 1,
        };

        if self.config.dry_run {
            self.print_dry_run(build, &graph, requests)?;
            return Ok(report);
        }

        let started = Instant::now();
        // Set once a task that is not DAG-neutral has run since the last build
        let mut reshaped = false;

        for (i, request) in requests.iter().enumerate() {
            if reshaped {
                tracing::debug!(request = %request, "rebuilding task graph");
                graph = TaskGraph::build(build, &self.config.project, &requests[i..])?;
                report.graph_builds += 1;
                reshaped = false;
            } else if i > 0 {
                tracing::debug!(request = %request, "reusing task graph");
            }

            let order: Vec<String> = graph
                .execution_order(request)?
                .into_iter()
                .map(str::to_string)
                .collect();

            for path in order {
                if build.task(&path).is_some_and(|t| t.executed()) {
                    tracing::debug!(task = %path, "already executed");
                    continue;
                }

                let result = self.run_task(build, &graph, &path)?;
                // Skipped and disabled tasks ran no actions, so they cannot have
                // reshaped the graph
                if result.outcome == TaskOutcome::Executed && !build[path.as_str()].is_dag_neutral() {
                    reshaped = true;
                }
                self.print_task_result(&result);
                report.results.push(result);
            }
        }

        self.print_summary(&report, started.elapsed());
        Ok(report)
    }

    /// Take one task's turn
    fn run_task(&self, build: &mut Build, graph: &TaskGraph, path: &str) -> Result<TaskResult> {
        let start = Instant::now();
        let task = build.task(path).ok_or_else(|| build.task_not_found(path))?;

        let skipped = self
            .switches
            .first_skip(task.skip_properties())
            .map(str::to_string);

        let (outcome, output) = if let Some(property) = skipped {
            tracing::info!(task = %path, property = %property, "skipped by switch");
            (TaskOutcome::Skipped { property }, String::new())
        } else if !task.enabled() {
            tracing::info!(task = %path, "disabled");
            (TaskOutcome::Disabled, String::new())
        } else {
            let actions = task.actions().to_vec();
            let spinner = self.spinner(path);

            let mut ctx = ActionContext::new(path, build, graph, &self.switches);
            for action in &actions {
                if let Err(source) = action.execute(&mut ctx) {
                    spinner.finish_and_clear();
                    let output = ctx.into_output();
                    if !self.config.quiet && !output.is_empty() {
                        print!("{}", output);
                    }
                    tracing::error!(task = %path, error = %source, "task failed");
                    return Err(KilnError::ActionFailed {
                        task: path.to_string(),
                        source,
                    });
                }
            }
            spinner.finish_and_clear();
            (TaskOutcome::Executed, ctx.into_output())
        };

        build.find_task_mut(path)?.mark_executed();

        Ok(TaskResult {
            path: path.to_string(),
            outcome,
            duration: start.elapsed(),
            output,
        })
    }

    fn spinner(&self, path: &str) -> ProgressBar {
        if self.config.quiet {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(spinner_style);
        }
        pb.set_message(format!("Running {}", path));
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Print dry-run execution plan
    fn print_dry_run(&self, build: &Build, graph: &TaskGraph, requests: &[String]) -> Result<()> {
        if self.config.quiet {
            return Ok(());
        }

        println!("{}", style("Execution plan (dry run):").bold().cyan());
        println!();

        let mut seen = std::collections::HashSet::new();
        let mut step = 0;
        for request in requests {
            for path in graph.execution_order(request)? {
                if !seen.insert(path) {
                    continue;
                }
                step += 1;
                let Some(task) = build.task(path) else {
                    continue;
                };

                let note = if let Some(property) = self.switches.first_skip(task.skip_properties()) {
                    format!(" (skipped by {})", property)
                } else if !task.enabled() {
                    " (disabled)".to_string()
                } else {
                    String::new()
                };
                println!(
                    "{} {}{}",
                    style(format!("{}.", step)).bold(),
                    style(path).cyan(),
                    style(note).dim()
                );

                for action in task.actions() {
                    println!("    {} {}", style("→").dim(), action.describe());
                }
            }
        }
        Ok(())
    }

    /// Print result of a single task
    fn print_task_result(&self, result: &TaskResult) {
        if self.config.quiet {
            return;
        }

        let status = match &result.outcome {
            TaskOutcome::Executed => style("✓".to_string()).green(),
            TaskOutcome::Skipped { property } => style(format!("- skipped ({})", property)).yellow(),
            TaskOutcome::Disabled => style("- disabled".to_string()).yellow(),
        };

        let duration = format!("{:.2}s", result.duration.as_secs_f64());
        println!(
            "{} {} {}",
            status,
            style(&result.path).bold(),
            style(duration).dim()
        );

        if self.config.verbose {
            for line in result.output.lines() {
                println!("  {}", line);
            }
        }
    }

    /// Print execution summary
    fn print_summary(&self, report: &RunReport, elapsed: Duration) {
        if self.config.quiet {
            return;
        }

        let executed = report.executed().len();
        let skipped = report.results.len() - executed;
        println!();
        println!(
            "{} {} tasks executed, {} skipped in {:.2}s",
            style("✓").green().bold(),
            executed,
            skipped,
            elapsed.as_secs_f64()
        );
    }
}
