//! Configuration parsing for kiln.toml
//!
//! The root build file carries `[settings]`, `[env]` and `[tasks]`. Included
//! projects may carry their own `kiln.toml` with `[env]` and `[tasks]` only.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::error::{KilnError, Result};
use crate::project::{BUILD_SCRIPT, CACHE_DIR_NAME};
use crate::script::CacheUsage;

/// Default config file names to search for
pub const CONFIG_FILES: &[&str] = &["kiln.toml", "Kiln.toml"];

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Global environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Task definitions for the root project
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,

    /// Global settings
    #[serde(default)]
    pub settings: Settings,
}

/// Build-wide settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Child project directories, relative to the root
    #[serde(default)]
    pub include: Vec<String>,

    /// How the compiled-script cache is used
    #[serde(default)]
    pub cache: CacheUsage,

    /// Name of the cache directory created next to build scripts
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Build script file name looked up in every project directory
    #[serde(default = "default_script")]
    pub script: String,

    /// Run commands through the platform shell by default
    #[serde(default)]
    pub shell: bool,

    /// Glob patterns that trigger a rerun in watch mode
    #[serde(default = "default_watch")]
    pub watch: Vec<String>,

    /// Watch debounce delay in milliseconds
    #[serde(default = "default_debounce")]
    pub watch_debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            cache: CacheUsage::default(),
            cache_dir: default_cache_dir(),
            script: default_script(),
            shell: false,
            watch: default_watch(),
            watch_debounce_ms: default_debounce(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_dir() -> String {
    CACHE_DIR_NAME.to_string()
}

fn default_script() -> String {
    BUILD_SCRIPT.to_string()
}

fn default_watch() -> Vec<String> {
    vec!["**/*.rhai".to_string(), "**/kiln.toml".to_string()]
}

fn default_debounce() -> u64 {
    300
}

/// Build file of an included project
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Environment variables for this project's tasks
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Task definitions
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,
}

/// Configuration for a single task, from TOML or `task(name, #{...})`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Human-readable description
    #[serde(default)]
    pub desc: Option<String>,

    /// Commands to run, in order
    #[serde(default)]
    pub run: Vec<String>,

    /// Rhai script to execute (alternative to `run`)
    #[serde(default)]
    pub script: Option<String>,

    /// Tasks that must complete before this one, absolute or relative paths
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Running this task leaves the dependency graph unchanged
    #[serde(default)]
    pub dag_neutral: bool,

    /// Extra switch keys that skip this task
    #[serde(default)]
    pub skip_properties: Vec<String>,

    /// Task-specific environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Use shell to execute commands
    #[serde(default)]
    pub shell: Option<bool>,

    /// Working directory, relative to the project directory
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            desc: None,
            run: Vec::new(),
            script: None,
            depends_on: Vec::new(),
            enabled: true,
            dag_neutral: false,
            skip_properties: Vec::new(),
            env: HashMap::new(),
            shell: None,
            cwd: None,
        }
    }
}

impl TaskConfig {
    /// Check a task definition in isolation
    pub fn validate(&self, name: &str) -> Result<()> {
        if !self.run.is_empty() && self.script.is_some() {
            return Err(KilnError::InvalidTask {
                task: name.to_string(),
                reason: "Task cannot have both 'run' and 'script'".to_string(),
            });
        }

        if self.depends_on.iter().any(|d| d == name) {
            return Err(KilnError::InvalidTask {
                task: name.to_string(),
                reason: "Task cannot depend on itself".to_string(),
            });
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from the specified path or search upward from `cwd`
    pub fn load(path: Option<&Path>, cwd: &Path) -> Result<(Self, PathBuf)> {
        let config_path = match path {
            Some(p) => {
                let p = if p.is_absolute() { p.to_path_buf() } else { cwd.join(p) };
                if p.is_file() {
                    p
                } else {
                    return Err(KilnError::ConfigNotFound { searched: vec![p] });
                }
            }
            None => Self::find_config(cwd)?,
        };

        let config: Config = parse_file(&config_path)?;
        config.validate()?;

        tracing::debug!(path = %config_path.display(), "loaded build file");
        Ok((config, config_path))
    }

    /// Search for a config file starting from `start` and walking up
    pub fn find_config(start: &Path) -> Result<PathBuf> {
        let mut current = start.to_path_buf();
        let mut searched = Vec::new();

        loop {
            for name in CONFIG_FILES {
                let candidate = current.join(name);
                searched.push(candidate.clone());
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }

            if !current.pop() {
                break;
            }
        }

        Err(KilnError::ConfigNotFound { searched })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        for (name, task) in &self.tasks {
            task.validate(name)?;
        }

        for include in &self.settings.include {
            if include.trim().is_empty() {
                return Err(KilnError::InvalidProject {
                    path: include.clone(),
                    reason: "empty include entry".to_string(),
                });
            }
        }

        if self.settings.script.trim().is_empty() {
            return Err(KilnError::InvalidProject {
                path: ":".to_string(),
                reason: "settings.script must name a file".to_string(),
            });
        }

        Ok(())
    }

    /// List root task names
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.keys().map(|s| s.as_str()).collect()
    }
}

impl ProjectConfig {
    /// Load the build file in `dir`, if there is one
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(crate::project::BUILD_FILE);
        if !path.is_file() {
            return Ok(None);
        }

        let config: ProjectConfig = parse_file(&path)?;
        for (name, task) in &config.tasks {
            task.validate(name)?;
        }
        Ok(Some(config))
    }
}

fn parse_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| KilnError::ConfigParse {
        source: e,
        path: path.to_path_buf(),
    })
}

/// Merge environment layers, later layers winning
pub fn merge_env<'a, I>(layers: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = &'a HashMap<String, String>>,
{
    let mut env = HashMap::new();
    for layer in layers {
        env.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    env
}

/// Starter build file written by `kiln init`
pub const DEFAULT_CONFIG: &str = r#"# kiln build file

[settings]
# Child projects, e.g. include = ["core", "libs/util"]
include = []
# Compiled build script cache: "on", "rebuild" or "off"
cache = "on"

[env]
RUST_BACKTRACE = "1"

[tasks.build]
desc = "Build the project"
run = ["cargo build"]

[tasks.test]
desc = "Run tests"
depends_on = ["build"]
run = ["cargo test"]

[tasks.check]
desc = "Run all checks"
depends_on = ["test"]
script = '''
print(`checks passed for ${task_path}`);
'''
"#;
