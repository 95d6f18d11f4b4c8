//! Functions available to `build.rhai` scripts
//!
//! Evaluating a build script records [`Directive`]s; the loader applies them
//! to the project afterwards, in order.
//!
//! ```text
//! task("compile", #{ desc: "Compile sources", run: ["cargo build"] });
//! task("docs");
//! depends_on("docs", "compile");
//! do_last("docs", "cargo doc --no-deps");
//! dag_neutral("docs", true);
//! skip_property("docs", "offline");
//! ```

use std::sync::{Arc, Mutex};

use rhai::{Array, Dynamic, EvalAltResult, Map, Scope, AST};

use super::engine::{capture_print, lock, ScriptEngine};
use super::processor::Script;
use crate::config::TaskConfig;
use crate::error::{KilnError, Result};
use crate::project::Project;

/// One configuration step requested by a build script
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Task { name: String, config: Option<TaskConfig> },
    DependsOn { task: String, paths: Vec<String> },
    DoFirst { task: String, command: String },
    DoLast { task: String, command: String },
    Enabled { task: String, enabled: bool },
    DagNeutral { task: String, dag_neutral: bool },
    SkipProperty { task: String, key: String },
    Describe { task: String, text: String },
}

impl Directive {
    /// Name of the task the directive creates or configures
    pub fn task_name(&self) -> &str {
        match self {
            Directive::Task { name, .. } => name,
            Directive::DependsOn { task, .. }
            | Directive::DoFirst { task, .. }
            | Directive::DoLast { task, .. }
            | Directive::Enabled { task, .. }
            | Directive::DagNeutral { task, .. }
            | Directive::SkipProperty { task, .. }
            | Directive::Describe { task, .. } => task,
        }
    }
}

/// What a build script printed and asked for
#[derive(Debug, Default)]
pub struct Evaluation {
    pub directives: Vec<Directive>,
    pub output: String,
}

/// Evaluate a compiled build script against `project`
pub fn evaluate(script: &Script<AST>, project: &Project) -> Result<Evaluation> {
    let Some(ast) = script.unit() else {
        return Ok(Evaluation::default());
    };

    let directives = Arc::new(Mutex::new(Vec::new()));
    let mut engine = ScriptEngine::create_engine(project.dir());
    register(&mut engine, &directives);
    let output = capture_print(&mut engine);

    let mut scope = Scope::new();
    scope.push("project_path", project.path().to_string());
    scope.push("project_dir", project.dir().to_string_lossy().to_string());

    engine
        .run_ast_with_scope(&mut scope, ast)
        .map_err(|source| KilnError::ScriptFailed {
            script: script.source().display_name().to_string(),
            source,
        })?;

    let directives = std::mem::take(&mut *lock_directives(&directives));
    let output = lock(&output).clone();
    Ok(Evaluation { directives, output })
}

fn lock_directives(directives: &Mutex<Vec<Directive>>) -> std::sync::MutexGuard<'_, Vec<Directive>> {
    directives.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn strings(values: Array) -> std::result::Result<Vec<String>, Box<EvalAltResult>> {
    values
        .into_iter()
        .map(|v| {
            v.into_string()
                .map_err(|t| format!("expected a string, found {}", t).into())
        })
        .collect()
}

fn register(engine: &mut rhai::Engine, directives: &Arc<Mutex<Vec<Directive>>>) {
    let sink = Arc::clone(directives);
    engine.register_fn("task", move |name: &str| {
        lock_directives(&sink).push(Directive::Task {
            name: name.to_string(),
            config: None,
        });
    });

    let sink = Arc::clone(directives);
    engine.register_fn(
        "task",
        move |name: &str, config: Map| -> std::result::Result<(), Box<EvalAltResult>> {
            let config: TaskConfig = rhai::serde::from_dynamic(&Dynamic::from(config))?;
            lock_directives(&sink).push(Directive::Task {
                name: name.to_string(),
                config: Some(config),
            });
            Ok(())
        },
    );

    let sink = Arc::clone(directives);
    engine.register_fn("depends_on", move |task: &str, path: &str| {
        lock_directives(&sink).push(Directive::DependsOn {
            task: task.to_string(),
            paths: vec![path.to_string()],
        });
    });

    let sink = Arc::clone(directives);
    engine.register_fn(
        "depends_on",
        move |task: &str, paths: Array| -> std::result::Result<(), Box<EvalAltResult>> {
            let paths = strings(paths)?;
            lock_directives(&sink).push(Directive::DependsOn {
                task: task.to_string(),
                paths,
            });
            Ok(())
        },
    );

    let sink = Arc::clone(directives);
    engine.register_fn("do_first", move |task: &str, command: &str| {
        lock_directives(&sink).push(Directive::DoFirst {
            task: task.to_string(),
            command: command.to_string(),
        });
    });

    let sink = Arc::clone(directives);
    engine.register_fn("do_last", move |task: &str, command: &str| {
        lock_directives(&sink).push(Directive::DoLast {
            task: task.to_string(),
            command: command.to_string(),
        });
    });

    let sink = Arc::clone(directives);
    engine.register_fn("enabled", move |task: &str, enabled: bool| {
        lock_directives(&sink).push(Directive::Enabled {
            task: task.to_string(),
            enabled,
        });
    });

    let sink = Arc::clone(directives);
    engine.register_fn("dag_neutral", move |task: &str, dag_neutral: bool| {
        lock_directives(&sink).push(Directive::DagNeutral {
            task: task.to_string(),
            dag_neutral,
        });
    });

    let sink = Arc::clone(directives);
    engine.register_fn("skip_property", move |task: &str, key: &str| {
        lock_directives(&sink).push(Directive::SkipProperty {
            task: task.to_string(),
            key: key.to_string(),
        });
    });

    let sink = Arc::clone(directives);
    engine.register_fn("describe", move |task: &str, text: &str| {
        lock_directives(&sink).push(Directive::Describe {
            task: task.to_string(),
            text: text.to_string(),
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{ScriptBody, ScriptSource};
    use std::path::Path;

    fn eval(text: &str) -> Result<Evaluation> {
        let ast = ScriptEngine::new().compile(text).unwrap();
        let script = Script::new(ScriptBody::Compiled(ast), ScriptSource::inline("build.rhai", text));
        evaluate(&script, &Project::root(Path::new("/work/app")))
    }

    #[test]
    fn test_directives_in_order() {
        let evaluation = eval(
            r#"
            task("compile", #{ desc: "Compile", run: ["echo compiling"], dag_neutral: true });
            task("docs");
            depends_on("docs", ["compile", ":other:jar"]);
            do_first("docs", "echo first");
            do_last("docs", "echo last");
            enabled("docs", false);
            skip_property("docs", "offline");
            print(`configuring ${project_path}`);
            "#,
        )
        .unwrap();

        assert_eq!(evaluation.directives.len(), 7);
        match &evaluation.directives[0] {
            Directive::Task { name, config: Some(config) } => {
                assert_eq!(name, "compile");
                assert_eq!(config.desc.as_deref(), Some("Compile"));
                assert_eq!(config.run, vec!["echo compiling".to_string()]);
                assert!(config.dag_neutral);
                assert!(config.enabled);
            }
            other => panic!("unexpected directive: {other:?}"),
        }
        assert_eq!(
            evaluation.directives[2],
            Directive::DependsOn {
                task: "docs".to_string(),
                paths: vec!["compile".to_string(), ":other:jar".to_string()],
            }
        );
        assert_eq!(evaluation.output.trim(), "configuring :");
    }

    #[test]
    fn test_unknown_task_option_fails() {
        let err = eval(r#"task("x", #{ colour: "red" });"#).unwrap_err();
        assert!(matches!(err, KilnError::ScriptFailed { .. }));
    }

    #[test]
    fn test_empty_script_has_no_directives() {
        let script = Script::new(ScriptBody::Empty, ScriptSource::inline("build.rhai", ""));
        let evaluation = evaluate(&script, &Project::root("/work")).unwrap();
        assert!(evaluation.directives.is_empty());
    }
}
