//! Error types for kiln
//!
//! Uses `miette` for pretty error reporting with help text.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for kiln operations
#[derive(Error, Diagnostic, Debug)]
pub enum KilnError {
    #[error("Build file not found")]
    #[diagnostic(
        code(kiln::config::not_found),
        help("Create a kiln.toml in your project root, or specify one with --config")
    )]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("Failed to parse build file {}", path.display())]
    #[diagnostic(code(kiln::config::parse))]
    ConfigParse {
        #[source]
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("Project '{path}' not found")]
    #[diagnostic(
        code(kiln::project::not_found),
        help("Projects are registered through `include` in the root kiln.toml")
    )]
    ProjectNotFound { path: String },

    #[error("Invalid project '{path}': {reason}")]
    #[diagnostic(code(kiln::project::invalid))]
    InvalidProject { path: String, reason: String },

    #[error("Project '{path}' is defined more than once")]
    #[diagnostic(code(kiln::project::duplicate))]
    DuplicateProject { path: String },

    #[error("Task '{path}' not found")]
    #[diagnostic(
        code(kiln::task::not_found),
        help("Run `kiln list` to see available tasks")
    )]
    TaskNotFound { path: String, available: Vec<String> },

    #[error("Task '{path}' is defined more than once")]
    #[diagnostic(code(kiln::task::duplicate))]
    DuplicateTask { path: String },

    #[error("Task '{task}' depends on '{dependency}', which does not exist")]
    #[diagnostic(
        code(kiln::task::unresolved_dependency),
        help("Relative dependencies are resolved against the project owning the task")
    )]
    UnresolvedDependency { task: String, dependency: String },

    #[error("Circular dependency detected: {cycle}")]
    #[diagnostic(
        code(kiln::task::cycle),
        help("Check the 'depends_on' entries of the tasks in the cycle")
    )]
    CyclicDependency { cycle: String },

    #[error("No tasks requested")]
    #[diagnostic(
        code(kiln::task::nothing_to_do),
        help("Name at least one task, e.g. `kiln build`")
    )]
    NothingToDo,

    #[error("Invalid task configuration for '{task}': {reason}")]
    #[diagnostic(code(kiln::config::invalid_task))]
    InvalidTask { task: String, reason: String },

    #[error("Task '{task}' failed")]
    #[diagnostic(code(kiln::exec::action_failed))]
    ActionFailed {
        task: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Command '{command}' failed with exit code {code}")]
    #[diagnostic(code(kiln::exec::command_failed))]
    CommandFailed {
        command: String,
        code: i32,
        #[help]
        stderr: Option<String>,
    },

    #[error("Command not found: {command}")]
    #[diagnostic(
        code(kiln::exec::command_not_found),
        help("Ensure the command is installed and in your PATH")
    )]
    CommandNotFound { command: String },

    #[error("Failed to compile script '{script}'")]
    #[diagnostic(code(kiln::script::compile))]
    ScriptCompile {
        script: String,
        #[source]
        source: rhai::ParseError,
    },

    #[error("Script '{script}' failed")]
    #[diagnostic(code(kiln::script::failed))]
    ScriptFailed {
        script: String,
        #[source]
        source: Box<rhai::EvalAltResult>,
    },

    #[error("Cannot read script {}", path.display())]
    #[diagnostic(code(kiln::script::source_unavailable))]
    ScriptSourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error")]
    #[diagnostic(code(kiln::io))]
    Io(#[from] std::io::Error),

    #[error("Cache error: {message}")]
    #[diagnostic(code(kiln::cache))]
    Cache { message: String },

    #[error("Watch error")]
    #[diagnostic(code(kiln::watch))]
    Watch {
        #[source]
        source: notify::Error,
    },
}

impl KilnError {
    /// Whether the error belongs to the script cache layer and may be
    /// downgraded to a cache miss.
    pub fn is_cache_error(&self) -> bool {
        matches!(self, KilnError::Cache { .. } | KilnError::Io(_))
    }
}

/// Result type alias for kiln operations
pub type Result<T> = std::result::Result<T, KilnError>;
