//! Common test utilities

use std::fs;
use std::path::{Path, PathBuf};

use kiln::{Build, BuildLoader, CacheUsage, Config, Executor, ExecutorConfig, RunReport, Switches};
use tempfile::TempDir;

/// A build tree in a temporary directory
pub struct TestBuild {
    pub dir: TempDir,
}

impl TestBuild {
    /// Create a tree with the given root kiln.toml
    pub fn new(root_config: &str) -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("kiln.toml"), root_config).unwrap();
        Self { dir }
    }

    /// Create a tree whose tasks can append to `trace.txt` through
    /// [`tracing_task`]
    #[allow(dead_code)]
    pub fn traced(root_config: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let config = format!(
            "[env]\nTRACE = '{}'\n\n{}",
            dir.path().join("trace.txt").display(),
            root_config
        );
        fs::write(dir.path().join("kiln.toml"), config).unwrap();
        Self { dir }
    }

    /// Task paths appended to `trace.txt`, in order
    #[allow(dead_code)]
    pub fn trace(&self) -> Vec<String> {
        self.read("trace.txt")
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file relative to the root, creating parent directories
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[allow(dead_code)]
    pub fn read(&self, relative: &str) -> Option<String> {
        fs::read_to_string(self.root().join(relative)).ok()
    }

    pub fn load(&self) -> kiln::Result<Build> {
        self.load_with(None)
    }

    #[allow(dead_code)]
    pub fn load_with(&self, cache_usage: Option<CacheUsage>) -> kiln::Result<Build> {
        let (config, path) = Config::load(None, self.root())?;
        BuildLoader::new(&config.settings, cache_usage).load(&config, &path)
    }

    /// Load the build and run `requests` from the root project
    pub fn run(&self, requests: &[&str], switches: &[&str]) -> kiln::Result<RunReport> {
        let mut build = self.load()?;
        let requests: Vec<String> = requests.iter().map(|s| s.to_string()).collect();
        let config = ExecutorConfig {
            quiet: true,
            ..ExecutorConfig::default()
        };
        Executor::new(config, Switches::from_definitions(switches)).execute(&mut build, &requests)
    }
}

/// Body of a TOML task whose script appends its path to the trace file
#[allow(dead_code)]
pub fn tracing_task(depends_on: &[&str]) -> String {
    let deps: Vec<String> = depends_on.iter().map(|d| format!("\"{}\"", d)).collect();
    format!(
        "depends_on = [{}]\nscript = '''\n{}'''\n",
        deps.join(", "),
        TRACE_SCRIPT
    )
}

/// Rhai snippet appending `task_path` to the file named by `env["TRACE"]`
#[allow(dead_code)]
pub const TRACE_SCRIPT: &str = r#"let file = env["TRACE"];
let before = if file_exists(file) { read_file(file) } else { "" };
write_file(file, before + task_path + "\n");
"#;
