//! Rhai scripting engine integration
//!
//! Provides the sandboxed engine shared by build scripts and inline task
//! scripts. Both get a few file helpers whose relative paths resolve against
//! a base directory: the project directory for build scripts and the task's
//! working directory for task scripts.
//!
//! | Function | Result |
//! |----------|--------|
//! | `read_file(path)` | file contents, error if unreadable |
//! | `write_file(path, text)` | writes the file, creating parent directories |
//! | `file_exists(path)` | bool |
//! | `glob(pattern)` | sorted matching paths, relative to the base when under it |
//! | `parse_json(text)` | map/array value |

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rhai::{Array, Dynamic, Engine, EvalAltResult, ParseError, Scope, AST};

/// Script execution engine
#[derive(Debug, Clone, Default)]
pub struct ScriptEngine {
    _marker: std::marker::PhantomData<()>,
}

impl ScriptEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine whose helpers resolve relative paths against `base_dir`
    pub(crate) fn create_engine(base_dir: &Path) -> Engine {
        let mut engine = sandboxed();
        register_helpers(&mut engine, base_dir);
        engine
    }

    /// Compile a script for repeated execution
    pub fn compile(&self, script: &str) -> Result<AST, ParseError> {
        sandboxed().compile(script)
    }

    /// Execute a compiled task script in `cwd`, returning everything it
    /// printed
    pub fn execute_ast(
        &self,
        ast: &AST,
        env: &HashMap<String, String>,
        cwd: &Path,
        task_path: &str,
    ) -> Result<String, Box<EvalAltResult>> {
        let mut scope = Scope::new();

        let env_map: rhai::Map = env
            .iter()
            .map(|(k, v)| (k.clone().into(), Dynamic::from(v.clone())))
            .collect();
        scope.push("env", env_map);
        scope.push("cwd", cwd.to_string_lossy().to_string());
        scope.push("task_path", task_path.to_string());

        let mut engine = Self::create_engine(cwd);
        let output = capture_print(&mut engine);

        engine.run_ast_with_scope(&mut scope, ast)?;

        let result = lock(&output).clone();
        Ok(result)
    }
}

fn sandboxed() -> Engine {
    let mut engine = Engine::new();
    engine.set_max_expr_depths(64, 64);
    engine.set_max_operations(1_000_000);
    engine.set_max_modules(10);
    engine.set_max_string_size(1024 * 1024); // 1MB
    engine
}

fn register_helpers(engine: &mut Engine, base_dir: &Path) {
    let base = base_dir.to_path_buf();
    engine.register_fn("read_file", move |path: &str| -> Result<String, Box<EvalAltResult>> {
        let full = base.join(path);
        std::fs::read_to_string(&full)
            .map_err(|e| format!("Failed to read '{}': {}", full.display(), e).into())
    });

    let base = base_dir.to_path_buf();
    engine.register_fn(
        "write_file",
        move |path: &str, content: &str| -> Result<(), Box<EvalAltResult>> {
            let full = base.join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
            }
            std::fs::write(&full, content)
                .map_err(|e| format!("Failed to write '{}': {}", full.display(), e).into())
        },
    );

    let base = base_dir.to_path_buf();
    engine.register_fn("file_exists", move |path: &str| base.join(path).exists());

    let base = base_dir.to_path_buf();
    engine.register_fn("glob", move |pattern: &str| -> Result<Array, Box<EvalAltResult>> {
        let full = base.join(pattern);
        let matches = glob::glob(&full.to_string_lossy())
            .map_err(|e| format!("Invalid glob pattern '{}': {}", pattern, e))?;

        let mut paths: Vec<String> = matches
            .filter_map(|entry| entry.ok())
            .map(|path| relative_to(&base, path).to_string_lossy().to_string())
            .collect();
        paths.sort();
        Ok(paths.into_iter().map(Dynamic::from).collect())
    });

    engine.register_fn("parse_json", |s: &str| -> Result<Dynamic, Box<EvalAltResult>> {
        let value: serde_json::Value =
            serde_json::from_str(s).map_err(|e| format!("Failed to parse JSON: {}", e))?;
        rhai::serde::to_dynamic(value)
    });
}

fn relative_to(base: &Path, path: PathBuf) -> PathBuf {
    match path.strip_prefix(base) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) => path,
    }
}

/// Route `print` into a buffer instead of stdout
pub(crate) fn capture_print(engine: &mut Engine) -> Arc<Mutex<String>> {
    let output = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&output);
    engine.on_print(move |s| {
        let mut out = lock(&sink);
        out.push_str(s);
        out.push('\n');
    });
    output
}

/// Lock the output buffer; a panic while printing leaves text worth keeping
pub(crate) fn lock(output: &Mutex<String>) -> MutexGuard<'_, String> {
    output.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_in(dir: &Path, script: &str, env: &HashMap<String, String>) -> Result<String, Box<EvalAltResult>> {
        let engine = ScriptEngine::new();
        let ast = engine.compile(script).unwrap();
        engine.execute_ast(&ast, env, dir, ":hello")
    }

    fn run(script: &str) -> Result<String, Box<EvalAltResult>> {
        let temp = tempfile::tempdir().unwrap();
        run_in(temp.path(), script, &HashMap::new())
    }

    #[test]
    fn test_basic_script() {
        let result = run(r#"print("Hello, kiln!");"#).unwrap();
        assert_eq!(result.trim(), "Hello, kiln!");
    }

    #[test]
    fn test_env_and_task_path() {
        let temp = tempfile::tempdir().unwrap();
        let mut env = HashMap::new();
        env.insert("MY_VAR".to_string(), "test_value".to_string());

        let result = run_in(temp.path(), r#"print(env["MY_VAR"]); print(task_path);"#, &env).unwrap();
        assert_eq!(result, "test_value\n:hello\n");
    }

    #[test]
    fn test_files_resolve_against_cwd() {
        let temp = tempfile::tempdir().unwrap();
        let script = r#"
            print(file_exists("out/version.txt"));
            write_file("out/version.txt", "1.2.3");
            print(file_exists("out/version.txt"));
            print(read_file("out/version.txt"));
        "#;

        let result = run_in(temp.path(), script, &HashMap::new()).unwrap();
        assert_eq!(result, "false\ntrue\n1.2.3\n");
        assert_eq!(
            std::fs::read_to_string(temp.path().join("out/version.txt")).unwrap(),
            "1.2.3"
        );
    }

    #[test]
    fn test_read_missing_file_fails() {
        let err = run(r#"read_file("nope.txt");"#).unwrap_err();
        assert!(err.to_string().contains("nope.txt"));
    }

    #[test]
    fn test_glob_is_sorted_and_relative() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("src")).unwrap();
        for name in ["b.rs", "a.rs", "notes.txt"] {
            std::fs::write(temp.path().join("src").join(name), "").unwrap();
        }

        let result = run_in(
            temp.path(),
            r#"for path in glob("src/*.rs") { print(path); }"#,
            &HashMap::new(),
        )
        .unwrap();
        let expected: Vec<String> = ["a.rs", "b.rs"]
            .iter()
            .map(|name| Path::new("src").join(name).to_string_lossy().to_string())
            .collect();
        assert_eq!(result.lines().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_invalid_glob_fails() {
        assert!(run(r#"glob("src/[");"#).is_err());
    }

    #[test]
    fn test_parse_json() {
        let result = run(r#"let v = parse_json("{\"a\": [1, 2]}"); print(v.a[1]);"#).unwrap();
        assert_eq!(result.trim(), "2");
        assert!(run(r#"parse_json("{");"#).is_err());
    }

    #[test]
    fn test_runtime_error() {
        assert!(run(r#"throw "boom";"#).is_err());
    }
}
