//! kiln - a task-graph build tool
//!
//! This crate provides both a CLI tool and a library for configuring a tree of
//! projects, resolving the tasks they declare into a dependency graph, and
//! running that graph.
//!
//! # Features
//!
//! - **TOML build files** - Tasks, environment and included child projects
//! - **Rhai build scripts** - `build.rhai` reconfigures a project; compiled
//!   scripts are cached next to the script and reused until it changes
//! - **Deterministic ordering** - Ties between independent tasks break by path
//! - **DAG-neutral reuse** - The graph is only rebuilt between requests when a
//!   task that may have reshaped it has run
//! - **Skip switches** - `-D skip.<task>` skips a task's actions
//!
//! # Example
//!
//! ```toml
//! # kiln.toml
//!
//! [settings]
//! include = ["core"]
//!
//! [tasks.test]
//! desc = "Run all tests"
//! depends_on = [":core:compile"]
//! run = ["cargo test --all-targets"]
//! ```
//!
//! # Library Usage
//!
//! ```rust,ignore
//! use kiln::{BuildLoader, Config, Executor, ExecutorConfig, Switches};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (config, path) = Config::load(None, &std::env::current_dir()?)?;
//!     let mut build = BuildLoader::new(&config.settings, None).load(&config, &path)?;
//!
//!     let executor = Executor::new(ExecutorConfig::default(), Switches::new());
//!     executor.execute(&mut build, &["test".to_string()])?;
//!
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod build;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod loader;
pub mod project;
pub mod script;
pub mod switches;
pub mod task;
pub mod watch;

// Re-export main types
pub use actions::{CommandAction, ScriptAction};
pub use build::Build;
pub use config::{Config, TaskConfig};
pub use error::{KilnError, Result};
pub use executor::{Executor, ExecutorConfig, RunReport, TaskOutcome, TaskResult};
pub use graph::TaskGraph;
pub use loader::BuildLoader;
pub use project::Project;
pub use script::{CacheUsage, RhaiCompiler, Script, ScriptCompiler, ScriptProcessor, ScriptSource};
pub use switches::Switches;
pub use task::{ActionContext, ActionResult, Task, TaskAction};
