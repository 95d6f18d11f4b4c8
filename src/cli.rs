//! CLI command definitions and handling
//!
//! Uses `clap` derive API for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use kiln::project::{PATH_SEPARATOR, ROOT_PATH};
use kiln::script::CacheUsage;
use kiln::switches::parse_definition;

/// kiln - a task-graph build tool with cached Rhai build scripts
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the root kiln.toml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Working directory
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    /// Project that bare task names are resolved against (e.g. `:core`)
    #[arg(short, long, global = true, default_value = ROOT_PATH)]
    pub project: String,

    /// Set a switch, e.g. `-D skip.test` or `-D offline=false`
    #[arg(short = 'D', value_name = "KEY[=VALUE]", global = true, value_parser = parse_definition)]
    pub define: Vec<String>,

    /// How the compiled build script cache is used
    #[arg(long, global = true, value_enum)]
    pub cache: Option<CacheMode>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Tasks to run (shorthand for `kiln run <tasks>`)
    #[arg(trailing_var_arg = true)]
    pub tasks: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one or more tasks, in the order given
    Run {
        /// Tasks to run
        #[arg(required = true)]
        tasks: Vec<String>,

        /// Show execution plan without running
        #[arg(long)]
        dry_run: bool,
    },

    /// List available tasks
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: ListFormat,

        /// Show task dependencies
        #[arg(long)]
        deps: bool,
    },

    /// Show task dependency graph
    Graph {
        /// Tasks to show the graph for (all tasks if none given)
        tasks: Vec<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: GraphFormat,
    },

    /// Watch for file changes and re-run tasks
    Watch {
        /// Tasks to run on changes
        #[arg(required = true)]
        tasks: Vec<String>,
    },

    /// Manage the compiled build script cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Initialize a new kiln.toml
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Load the build and validate the whole task graph
    Check,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show cache statistics
    Stats,

    /// Remove every project's cache directory
    Clean,

    /// Show cache directory locations
    Path,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum CacheMode {
    On,
    Rebuild,
    Off,
}

impl From<CacheMode> for CacheUsage {
    fn from(mode: CacheMode) -> Self {
        match mode {
            CacheMode::On => CacheUsage::On,
            CacheMode::Rebuild => CacheUsage::Rebuild,
            CacheMode::Off => CacheUsage::Off,
        }
    }
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ListFormat {
    #[default]
    Table,
    Json,
    Plain,
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum GraphFormat {
    #[default]
    Text,
    Dot,
    Json,
}

impl Cli {
    /// Get the effective command, treating bare task names as `run <tasks>`
    pub fn effective_command(&self) -> EffectiveCommand<'_> {
        if let Some(cmd) = &self.command {
            EffectiveCommand::Subcommand(cmd)
        } else if !self.tasks.is_empty() {
            EffectiveCommand::RunTasks(&self.tasks)
        } else {
            EffectiveCommand::None
        }
    }

    /// `--project` as a project path; `core` and `:core` are the same project
    pub fn project_path(&self) -> String {
        let project = self.project.trim();
        if project.is_empty() || project == ROOT_PATH {
            ROOT_PATH.to_string()
        } else if project.starts_with(PATH_SEPARATOR) {
            project.to_string()
        } else {
            format!("{}{}", PATH_SEPARATOR, project.replace('/', ":"))
        }
    }

    pub fn cache_usage(&self) -> Option<CacheUsage> {
        self.cache.map(CacheUsage::from)
    }
}

pub enum EffectiveCommand<'a> {
    Subcommand(&'a Commands),
    RunTasks(&'a [String]),
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_tasks_with_switches() {
        let cli = Cli::parse_from(["kiln", "-D", "skip.test", "-Doffline=false", "build", "test"]);
        assert_eq!(cli.define, vec!["skip.test", "offline=false"]);
        assert!(matches!(cli.effective_command(), EffectiveCommand::RunTasks(t) if t == ["build", "test"]));
    }

    #[test]
    fn test_run_subcommand() {
        let cli = Cli::parse_from(["kiln", "--cache", "rebuild", "run", "--dry-run", ":core:jar"]);
        assert_eq!(cli.cache_usage(), Some(CacheUsage::Rebuild));
        match cli.command {
            Some(Commands::Run { tasks, dry_run }) => {
                assert_eq!(tasks, vec![":core:jar"]);
                assert!(dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_project_path_normalized() {
        let cli = Cli::parse_from(["kiln", "-p", "libs/util", "list"]);
        assert_eq!(cli.project_path(), ":libs:util");
        let cli = Cli::parse_from(["kiln", "list"]);
        assert_eq!(cli.project_path(), ":");
    }

    #[test]
    fn test_empty_define_rejected() {
        assert!(Cli::try_parse_from(["kiln", "-D", "=x", "build"]).is_err());
    }
}
