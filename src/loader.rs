//! Configuration step: turning build files and build scripts into a [`Build`]
//!
//! Projects are configured root first, then in include order. Within a
//! project, TOML tasks are registered before the project's build script runs,
//! so scripts can reconfigure them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::actions::{CommandAction, ScriptAction};
use crate::build::Build;
use crate::config::{merge_env, Config, ProjectConfig, Settings, TaskConfig};
use crate::error::Result;
use crate::project::{task_path, Project};
use crate::script::dsl::{self, Directive};
use crate::script::{cache, CacheStats, CacheUsage, RhaiCompiler, ScriptProcessor, ScriptSource};
use crate::task::Task;

/// Loads a [`Build`] from a root build file
pub struct BuildLoader {
    settings: Settings,
    processor: ScriptProcessor<RhaiCompiler>,
}

impl BuildLoader {
    /// `cache_usage` overrides `settings.cache` when given
    pub fn new(settings: &Settings, cache_usage: Option<CacheUsage>) -> Self {
        let usage = cache_usage.unwrap_or(settings.cache);
        let processor = ScriptProcessor::new(RhaiCompiler::new(), usage)
            .with_cache_dir_name(settings.cache_dir.clone());

        Self {
            settings: settings.clone(),
            processor,
        }
    }

    pub fn cache_usage(&self) -> CacheUsage {
        self.processor.cache_usage()
    }

    /// Configure every project declared by `config`
    pub fn load(&self, config: &Config, config_path: &Path) -> Result<Build> {
        let root_dir = root_dir(config_path);

        let mut build = Build::new(&root_dir);
        let root = build.root_project().clone();
        self.configure_project(&mut build, &root, &config.env, &HashMap::new(), &config.tasks)?;

        for project in self.included_projects(&root_dir)? {
            build.add_project(project.clone())?;

            let project_config = ProjectConfig::load(project.dir())?.unwrap_or_default();
            self.configure_project(
                &mut build,
                &project,
                &config.env,
                &project_config.env,
                &project_config.tasks,
            )?;
        }

        tracing::info!(
            projects = build.projects().count(),
            tasks = build.tasks().count(),
            "build configured"
        );
        Ok(build)
    }

    fn configure_project(
        &self,
        build: &mut Build,
        project: &Project,
        global_env: &HashMap<String, String>,
        project_env: &HashMap<String, String>,
        tasks: &std::collections::BTreeMap<String, TaskConfig>,
    ) -> Result<()> {
        let env = merge_env([global_env, project_env]);

        for (name, task_config) in tasks {
            let task = build.create_task(project.path(), name)?;
            self.apply_config(task, project, task_config, &env)?;
        }

        self.run_build_script(build, project, &env)
    }

    /// Compile and evaluate the project's build script, then apply what it
    /// asked for.
    fn run_build_script(
        &self,
        build: &mut Build,
        project: &Project,
        env: &HashMap<String, String>,
    ) -> Result<()> {
        let source = ScriptSource::from_file(self.script_path(project))?;
        let script = self.processor.create_script(source)?;
        if script.is_empty() {
            return Ok(());
        }

        let evaluation = dsl::evaluate(&script, project)?;
        for line in evaluation.output.lines() {
            tracing::info!(project = project.path(), "{}", line);
        }

        tracing::debug!(
            project = project.path(),
            directives = evaluation.directives.len(),
            "evaluated build script"
        );
        for directive in evaluation.directives {
            self.apply_directive(build, project, directive, env)?;
        }
        Ok(())
    }

    fn apply_directive(
        &self,
        build: &mut Build,
        project: &Project,
        directive: Directive,
        env: &HashMap<String, String>,
    ) -> Result<()> {
        if let Directive::Task { name, config } = directive {
            let task = build.create_task(project.path(), &name)?;
            if let Some(config) = config {
                config.validate(&name)?;
                self.apply_config(task, project, &config, env)?;
            }
            return Ok(());
        }

        let task = build.find_task_mut(&task_path(project.path(), directive.task_name()))?;

        match directive {
            Directive::DependsOn { paths, .. } => {
                task.depends_on(paths);
            }
            Directive::DoFirst { command, .. } => {
                task.do_first(self.command_action(&command, project.dir(), env));
            }
            Directive::DoLast { command, .. } => {
                task.do_last(self.command_action(&command, project.dir(), env));
            }
            Directive::Enabled { enabled, .. } => {
                task.set_enabled(enabled);
            }
            Directive::DagNeutral { dag_neutral, .. } => {
                task.set_dag_neutral(dag_neutral);
            }
            Directive::SkipProperty { key, .. } => {
                task.skip_properties_mut().push(key);
            }
            Directive::Describe { text, .. } => {
                task.set_description(text);
            }
            Directive::Task { .. } => {}
        }
        Ok(())
    }

    /// Apply a task definition to a freshly created task
    fn apply_config(
        &self,
        task: &mut Task,
        project: &Project,
        config: &TaskConfig,
        project_env: &HashMap<String, String>,
    ) -> Result<()> {
        let env = merge_env([project_env, &config.env]);
        let cwd = match &config.cwd {
            Some(cwd) => project.dir().join(cwd),
            None => project.dir().to_path_buf(),
        };
        let shell = config.shell.unwrap_or(self.settings.shell);

        if let Some(desc) = &config.desc {
            task.set_description(desc.clone());
        }
        task.depends_on(config.depends_on.iter().cloned())
            .set_enabled(config.enabled)
            .set_dag_neutral(config.dag_neutral);
        task.skip_properties_mut()
            .extend(config.skip_properties.iter().cloned());

        for command in &config.run {
            task.do_last(
                CommandAction::new(command.clone(), &cwd)
                    .with_env(env.clone())
                    .with_shell(shell),
            );
        }

        if let Some(text) = &config.script {
            let source = ScriptSource::inline(task.path(), text.clone());
            let script = self.processor.create_script(source)?;
            task.do_last(ScriptAction::new(script, env, cwd));
        }

        Ok(())
    }

    fn command_action(&self, command: &str, dir: &Path, env: &HashMap<String, String>) -> CommandAction {
        CommandAction::new(command, dir)
            .with_env(env.clone())
            .with_shell(self.settings.shell)
    }

    /// Build script location for `project`
    pub fn script_path(&self, project: &Project) -> PathBuf {
        project.dir().join(&self.settings.script)
    }

    fn included_projects(&self, root_dir: &Path) -> Result<Vec<Project>> {
        self.settings
            .include
            .iter()
            .map(|include| Project::child(root_dir, include))
            .collect()
    }

    /// Cache directories of every project's build script.
    ///
    /// Derived from the settings alone, so no build script is compiled or run.
    pub fn cache_roots(&self, config_path: &Path) -> Result<Vec<PathBuf>> {
        let root_dir = root_dir(config_path);
        let mut dirs = vec![root_dir.clone()];
        dirs.extend(self.included_projects(&root_dir)?.iter().map(|p| p.dir().to_path_buf()));

        Ok(dirs
            .into_iter()
            .map(|dir| dir.join(&self.settings.cache_dir))
            .collect())
    }

    pub fn cache_stats(&self, config_path: &Path) -> Result<CacheStats> {
        cache::stats(&self.cache_roots(config_path)?)
    }

    pub fn clean_cache(&self, config_path: &Path) -> Result<usize> {
        cache::clean(&self.cache_roots(config_path)?)
    }
}

fn root_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KilnError;

    fn write(dir: &Path, file: &str, content: &str) {
        let path = dir.join(file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn load(dir: &Path) -> Result<Build> {
        let (config, path) = Config::load(None, dir)?;
        BuildLoader::new(&config.settings, None).load(&config, &path)
    }

    #[test]
    fn test_toml_and_included_projects() {
        let temp = tempfile::tempdir().unwrap();
        write(
            temp.path(),
            "kiln.toml",
            r#"
            [settings]
            include = ["core", "libs/util"]

            [tasks.build]
            desc = "Build everything"
            depends_on = [":core:compile", ":libs:util:compile"]
            "#,
        );
        write(temp.path(), "core/kiln.toml", "[tasks.compile]\nrun = [\"echo core\"]\n");
        write(temp.path(), "libs/util/kiln.toml", "[tasks.compile]\nrun = [\"echo util\"]\n");

        let build = load(temp.path()).unwrap();
        assert_eq!(
            build.task_paths(),
            vec![":build", ":core:compile", ":libs:util:compile"]
        );
        assert_eq!(build[":build"].description(), Some("Build everything"));
        assert_eq!(build[":core:compile"].actions().len(), 1);
        assert_eq!(build[":core:compile"].actions()[0].describe(), "echo core");
    }

    #[test]
    fn test_build_script_directives() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "kiln.toml", "[tasks.compile]\nrun = [\"echo compile\"]\n");
        write(
            temp.path(),
            "build.rhai",
            r#"
            task("docs", #{ desc: "Docs" });
            depends_on("docs", "compile");
            do_first("compile", "echo prepare");
            dag_neutral("docs", true);
            skip_property("docs", "offline");
            enabled("compile", true);
            "#,
        );

        let build = load(temp.path()).unwrap();
        let docs = &build[":docs"];
        assert!(docs.dependencies().contains("compile"));
        assert!(docs.is_dag_neutral());
        assert_eq!(docs.skip_properties(), ["skip.docs", "offline"]);

        let compile = &build[":compile"];
        let labels: Vec<String> = compile.actions().iter().map(|a| a.describe()).collect();
        assert_eq!(labels, vec!["echo prepare", "echo compile"]);
    }

    #[test]
    fn test_directive_for_unknown_task() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "kiln.toml", "");
        write(temp.path(), "build.rhai", r#"depends_on("ghost", "compile");"#);

        let err = load(temp.path()).unwrap_err();
        assert!(matches!(err, KilnError::TaskNotFound { path, .. } if path == ":ghost"));
    }

    #[test]
    fn test_duplicate_between_toml_and_script() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "kiln.toml", "[tasks.compile]\nrun = [\"echo\"]\n");
        write(temp.path(), "build.rhai", r#"task("compile");"#);

        let err = load(temp.path()).unwrap_err();
        assert!(matches!(err, KilnError::DuplicateTask { .. }));
    }

    #[test]
    fn test_build_script_is_cached() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "kiln.toml", "");
        write(temp.path(), "build.rhai", r#"task("hello");"#);

        load(temp.path()).unwrap();
        let (config, path) = Config::load(None, temp.path()).unwrap();
        let loader = BuildLoader::new(&config.settings, None);
        assert!(temp
            .path()
            .join(".kiln/build.rhai/build_rhai/manifest.json")
            .is_file());
        assert_eq!(loader.cache_stats(&path).unwrap().entries, 1);
        assert_eq!(loader.clean_cache(&path).unwrap(), 1);
        assert!(!temp.path().join(".kiln").exists());
    }

    #[test]
    fn test_cache_maintenance_skips_build_scripts() {
        let temp = tempfile::tempdir().unwrap();
        write(
            temp.path(),
            "kiln.toml",
            "[settings]\ninclude = [\"core\"]\ncache_dir = \".scripts\"\n",
        );
        write(temp.path(), "core/build.rhai", "this is not rhai (");
        write(temp.path(), "core/.scripts/build.rhai/build_rhai/unit.rhai", "");

        let (config, path) = Config::load(None, temp.path()).unwrap();
        let loader = BuildLoader::new(&config.settings, None);
        assert_eq!(
            loader.cache_roots(&path).unwrap(),
            vec![temp.path().join(".scripts"), temp.path().join("core/.scripts")]
        );
        assert!(load(temp.path()).is_err());

        assert_eq!(loader.clean_cache(&path).unwrap(), 1);
        assert!(!temp.path().join("core/.scripts").exists());
        assert!(!temp.path().join(".scripts").exists());
    }

    #[test]
    fn test_cache_override_off() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "kiln.toml", "");
        write(temp.path(), "build.rhai", r#"task("hello");"#);

        let (config, path) = Config::load(None, temp.path()).unwrap();
        let loader = BuildLoader::new(&config.settings, Some(CacheUsage::Off));
        let build = loader.load(&config, &path).unwrap();
        assert!(build.contains_task(":hello"));
        assert!(!temp.path().join(".kiln").exists());
    }
}
