//! Built-in task actions: external commands and inline Rhai scripts

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use rhai::AST;

use crate::error::KilnError;
use crate::script::{Script, ScriptEngine};
use crate::task::{ActionContext, ActionResult, TaskAction};

/// Runs one command line
#[derive(Debug, Clone)]
pub struct CommandAction {
    command: String,
    env: HashMap<String, String>,
    cwd: PathBuf,
    shell: bool,
}

impl CommandAction {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            env: HashMap::new(),
            cwd: cwd.into(),
            shell: false,
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Hand the whole line to `sh -c` (`cmd /C` on Windows)
    pub fn with_shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Expand `~` and `$VAR`, preferring the task environment over the
    /// process environment. Unknown variables are left as written.
    fn expand(&self, text: &str) -> String {
        let env = &self.env;
        shellexpand::full_with_context_no_errors(
            text,
            || std::env::var("HOME").ok(),
            |name| env.get(name).cloned().or_else(|| std::env::var(name).ok()),
        )
        .into_owned()
    }

    fn run(&self) -> Result<String, KilnError> {
        let mut command = if self.shell {
            let shell = if cfg!(windows) { "cmd" } else { "sh" };
            let flag = if cfg!(windows) { "/C" } else { "-c" };
            let mut c = Command::new(shell);
            c.arg(flag).arg(self.expand(&self.command));
            c
        } else {
            let parts: Vec<String> = parse_command(&self.command)
                .iter()
                .map(|p| self.expand(p))
                .collect();
            let Some((program, args)) = parts.split_first() else {
                return Ok(String::new());
            };
            let program = which::which(program).map_err(|_| KilnError::CommandNotFound {
                command: program.clone(),
            })?;
            let mut c = Command::new(program);
            c.args(args);
            c
        };

        command
            .current_dir(&self.cwd)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!(command = %self.command, cwd = %self.cwd.display(), "running command");
        let output = command.output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(KilnError::CommandFailed {
                command: self.command.clone(),
                code: output.status.code().unwrap_or(1),
                stderr: (!stderr.is_empty()).then_some(stderr),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl TaskAction for CommandAction {
    fn execute(&self, ctx: &mut ActionContext<'_>) -> ActionResult {
        let stdout = self.run()?;
        for line in stdout.lines() {
            ctx.println(line);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.command.clone()
    }
}

/// Runs a compiled Rhai snippet with `env`, `cwd` and `task_path` in scope
#[derive(Debug, Clone)]
pub struct ScriptAction {
    script: Arc<Script<AST>>,
    engine: ScriptEngine,
    env: HashMap<String, String>,
    cwd: PathBuf,
}

impl ScriptAction {
    pub fn new(script: Script<AST>, env: HashMap<String, String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            script: Arc::new(script),
            engine: ScriptEngine::new(),
            env,
            cwd: cwd.into(),
        }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }
}

impl TaskAction for ScriptAction {
    fn execute(&self, ctx: &mut ActionContext<'_>) -> ActionResult {
        let Some(ast) = self.script.unit() else {
            return Ok(());
        };

        let output = self
            .engine
            .execute_ast(ast, &self.env, &self.cwd, ctx.task_path())
            .map_err(|source| KilnError::ScriptFailed {
                script: self.script.source().display_name().to_string(),
                source,
            })?;
        if !output.is_empty() {
            ctx.println(output.trim_end());
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("<script {}>", self.script.source().display_name())
    }
}

/// Split a command line into words, honouring single and double quotes
pub fn parse_command(cmd: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quote_char = '"';

    for c in cmd.chars() {
        match c {
            '"' | '\'' if !in_quotes => {
                in_quotes = true;
                quote_char = c;
            }
            c if c == quote_char && in_quotes => {
                in_quotes = false;
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => {
                current.push(c);
            }
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::Build;
    use crate::graph::TaskGraph;
    use crate::script::{ScriptBody, ScriptSource};
    use crate::switches::Switches;

    fn run_action(action: &dyn TaskAction) -> (ActionResult, String) {
        let mut build = Build::new("/tmp");
        build.create_task(":", "t").unwrap();
        let graph = TaskGraph::for_all_tasks(&build).unwrap();
        let switches = Switches::new();
        let mut ctx = ActionContext::new(":t", &mut build, &graph, &switches);
        let result = action.execute(&mut ctx);
        (result, ctx.into_output())
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("echo hello"), vec!["echo", "hello"]);
        assert_eq!(parse_command("echo 'hello world'"), vec!["echo", "hello world"]);
        assert_eq!(parse_command(r#"git commit -m "x y""#), vec!["git", "commit", "-m", "x y"]);
        assert!(parse_command("   ").is_empty());
    }

    #[test]
    fn test_expand_prefers_task_env() {
        let env = HashMap::from([("KILN_GREETING".to_string(), "hi".to_string())]);
        let action = CommandAction::new("echo $KILN_GREETING $KILN_UNSET_VAR", "/").with_env(env);
        assert_eq!(action.expand(action.command()), "echo hi $KILN_UNSET_VAR");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_output_captured() {
        let env = HashMap::from([("WHO".to_string(), "kiln".to_string())]);
        let action = CommandAction::new("echo hello $WHO", std::env::temp_dir()).with_env(env);
        let (result, output) = run_action(&action);
        result.unwrap();
        assert_eq!(output, "hello kiln\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_failure_carries_code() {
        let action = CommandAction::new("exit 3", std::env::temp_dir()).with_shell(true);
        let (result, _) = run_action(&action);
        let err = result.unwrap_err();
        let err = err.downcast_ref::<KilnError>().unwrap();
        assert!(matches!(err, KilnError::CommandFailed { code: 3, .. }));
    }

    #[test]
    fn test_missing_command() {
        let action = CommandAction::new("kiln-no-such-binary-here --flag", std::env::temp_dir());
        let (result, _) = run_action(&action);
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<KilnError>(),
            Some(KilnError::CommandNotFound { command }) if command == "kiln-no-such-binary-here"
        ));
    }

    #[test]
    fn test_script_action_sees_task_path() {
        let text = r#"print(`running ${task_path}`);"#;
        let ast = ScriptEngine::new().compile(text).unwrap();
        let script = Script::new(ScriptBody::Compiled(ast), ScriptSource::inline("t", text));
        let action = ScriptAction::new(script, HashMap::new(), std::env::temp_dir());

        let (result, output) = run_action(&action);
        result.unwrap();
        assert_eq!(output, "running :t\n");
        assert_eq!(action.describe(), "<script t>");
    }
}
