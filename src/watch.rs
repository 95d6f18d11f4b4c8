//! Continuous mode: reload the build and re-run requests on file changes
//!
//! Uses `notify` with debouncing to watch the build root. Changes under a
//! script cache directory never trigger a run, since loading the build writes
//! there.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use console::style;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::{KilnError, Result};
use crate::executor::{Executor, ExecutorConfig, RunReport};
use crate::loader::BuildLoader;
use crate::script::CacheUsage;
use crate::switches::Switches;

/// Decides which changed paths matter
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    root: PathBuf,
    patterns: GlobSet,
    cache_dir_name: String,
}

impl ChangeFilter {
    pub fn new(root: &Path, patterns: &[String], cache_dir_name: &str) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| KilnError::Watch {
                source: notify::Error::generic(&format!("Invalid glob '{}': {}", pattern, e)),
            })?;
            builder.add(glob);
        }
        let patterns = builder.build().map_err(|e| KilnError::Watch {
            source: notify::Error::generic(&format!("Failed to build glob set: {}", e)),
        })?;

        Ok(Self {
            root: root.to_path_buf(),
            patterns,
            cache_dir_name: cache_dir_name.to_string(),
        })
    }

    /// Whether a change to `path` should trigger a run
    pub fn is_relevant(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let in_cache = relative
            .components()
            .any(|c| matches!(c, Component::Normal(name) if name == self.cache_dir_name.as_str()));

        !in_cache && self.patterns.is_match(relative)
    }
}

/// Debounced watcher over the build root
pub struct BuildWatcher {
    debouncer: Debouncer<notify::RecommendedWatcher>,
    rx: mpsc::Receiver<Vec<PathBuf>>,
    filter: ChangeFilter,
}

impl BuildWatcher {
    pub fn new(filter: ChangeFilter, debounce_ms: u64) -> Result<Self> {
        let (tx, rx) = mpsc::channel(16);

        let debouncer = new_debouncer(
            Duration::from_millis(debounce_ms),
            move |events: std::result::Result<Vec<DebouncedEvent>, notify::Error>| match events {
                Ok(events) => {
                    let paths: Vec<PathBuf> = events.into_iter().map(|e| e.path).collect();
                    let _ = tx.blocking_send(paths);
                }
                Err(e) => tracing::warn!(error = %e, "watch error"),
            },
        )
        .map_err(|e| KilnError::Watch { source: e })?;

        Ok(Self { debouncer, rx, filter })
    }

    /// Start watching `path` recursively
    pub fn watch(&mut self, path: &Path) -> Result<()> {
        self.debouncer
            .watcher()
            .watch(path, RecursiveMode::Recursive)
            .map_err(|e| KilnError::Watch { source: e })
    }

    /// Wait for the next relevant file change
    pub async fn wait_for_change(&mut self) -> Option<Vec<PathBuf>> {
        loop {
            let paths = self.rx.recv().await?;

            let matching: Vec<PathBuf> = paths
                .into_iter()
                .filter(|p| self.filter.is_relevant(p))
                .collect();

            if !matching.is_empty() {
                return Some(matching);
            }
        }
    }
}

/// Everything needed to load and run the build from scratch
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub config_path: Option<PathBuf>,
    pub cwd: PathBuf,
    pub cache_usage: Option<CacheUsage>,
    pub switches: Switches,
    pub executor: ExecutorConfig,
    pub requests: Vec<String>,
}

/// Load the build and run the requests once
pub fn run_once(options: &WatchOptions) -> Result<RunReport> {
    let (config, config_path) = Config::load(options.config_path.as_deref(), &options.cwd)?;
    let loader = BuildLoader::new(&config.settings, options.cache_usage);
    let mut build = loader.load(&config, &config_path)?;

    Executor::new(options.executor.clone(), options.switches.clone())
        .execute(&mut build, &options.requests)
}

async fn run_in_background(options: &WatchOptions) {
    let options = options.clone();
    let result = tokio::task::spawn_blocking(move || run_once(&options))
        .await
        .map_err(|e| KilnError::Io(std::io::Error::other(e.to_string())))
        .and_then(|r| r);

    if let Err(e) = result {
        eprintln!("{}: {:?}", style("error").red().bold(), miette::Report::new(e));
    }
}

/// Run the requests, then again whenever a watched file changes
pub async fn watch_and_run(options: WatchOptions) -> Result<()> {
    let (config, config_path) = Config::load(options.config_path.as_deref(), &options.cwd)?;
    let root = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let settings = &config.settings;

    println!(
        "{} Watching {} for {}",
        style("👀").cyan(),
        style(root.display()).bold(),
        style(options.requests.join(", ")).bold()
    );
    println!("   Patterns: {}", style(settings.watch.join(", ")).dim());
    println!();

    println!("{}", style("─".repeat(60)).dim());
    run_in_background(&options).await;
    println!("{}", style("─".repeat(60)).dim());

    let filter = ChangeFilter::new(&root, &settings.watch, &settings.cache_dir)?;
    let mut watcher = BuildWatcher::new(filter, settings.watch_debounce_ms)?;
    watcher.watch(&root)?;

    while let Some(changed) = watcher.wait_for_change().await {
        println!();
        println!(
            "{} Changed: {}",
            style("📝").yellow(),
            changed
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        tracing::debug!(files = changed.len(), "reloading build");

        println!("{}", style("─".repeat(60)).dim());
        run_in_background(&options).await;
        println!("{}", style("─".repeat(60)).dim());
        println!("{} Waiting for changes...", style("👀").cyan());
    }

    Ok(())
}
