//! The build registry: every project and task of one invocation

use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};
use std::path::{Path, PathBuf};

use crate::error::{KilnError, Result};
use crate::project::{is_ancestor_or_self, resolve_path, task_path, Project, ROOT_PATH};
use crate::task::Task;

/// All projects and tasks of a build, keyed by path
#[derive(Debug, Clone)]
pub struct Build {
    root_dir: PathBuf,
    projects: BTreeMap<String, Project>,
    tasks: BTreeMap<String, Task>,
}

impl Build {
    /// Create a build whose root project lives in `root_dir`
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        let root = Project::root(root_dir);
        let root_dir = root.dir().to_path_buf();
        let mut projects = BTreeMap::new();
        projects.insert(root.path().to_string(), root);

        Self {
            root_dir,
            projects,
            tasks: BTreeMap::new(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Register a project
    pub fn add_project(&mut self, project: Project) -> Result<()> {
        if self.projects.contains_key(project.path()) {
            return Err(KilnError::DuplicateProject {
                path: project.path().to_string(),
            });
        }
        self.projects.insert(project.path().to_string(), project);
        Ok(())
    }

    pub fn project(&self, path: &str) -> Option<&Project> {
        self.projects.get(path)
    }

    pub fn root_project(&self) -> &Project {
        &self.projects[ROOT_PATH]
    }

    /// Projects in path order
    pub fn projects(&self) -> impl Iterator<Item = &Project> {
        self.projects.values()
    }

    /// Create a task named `name` in the project at `project_path`
    pub fn create_task(&mut self, project_path: &str, name: &str) -> Result<&mut Task> {
        if !self.projects.contains_key(project_path) {
            return Err(KilnError::ProjectNotFound {
                path: project_path.to_string(),
            });
        }
        if name.is_empty() || name.contains(':') || name.chars().any(char::is_whitespace) {
            return Err(KilnError::InvalidTask {
                task: task_path(project_path, name),
                reason: "Task names must be non-empty and contain neither ':' nor whitespace"
                    .to_string(),
            });
        }
        self.add_task(Task::new(project_path, name))
    }

    /// Register an already constructed task
    pub fn add_task(&mut self, task: Task) -> Result<&mut Task> {
        if !self.projects.contains_key(task.project_path()) {
            return Err(KilnError::ProjectNotFound {
                path: task.project_path().to_string(),
            });
        }
        let path = task.path().to_string();
        if self.tasks.contains_key(&path) {
            return Err(KilnError::DuplicateTask { path });
        }

        tracing::debug!(task = %path, "registered task");
        Ok(self.tasks.entry(path).or_insert(task))
    }

    pub fn task(&self, path: &str) -> Option<&Task> {
        self.tasks.get(path)
    }

    pub fn task_mut(&mut self, path: &str) -> Option<&mut Task> {
        self.tasks.get_mut(path)
    }

    /// Look a task up, failing with the list of known paths
    pub fn find_task_mut(&mut self, path: &str) -> Result<&mut Task> {
        if !self.tasks.contains_key(path) {
            return Err(self.task_not_found(path));
        }
        Ok(&mut self[path])
    }

    pub fn contains_task(&self, path: &str) -> bool {
        self.tasks.contains_key(path)
    }

    /// Tasks in path order
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn task_paths(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    /// Resolve a requested task against the project the build was invoked
    /// from.
    ///
    /// A request containing `:` names exactly one task (relative to
    /// `current_project` unless absolute). A bare name selects the task of
    /// that name in `current_project` and in every project below it.
    pub fn resolve_request(&self, current_project: &str, request: &str) -> Result<Vec<String>> {
        let request = request.trim();

        if request.contains(':') {
            let path = resolve_path(current_project, request)?;
            return if self.tasks.contains_key(&path) {
                Ok(vec![path])
            } else {
                Err(self.task_not_found(&path))
            };
        }

        let matches: Vec<String> = self
            .tasks
            .values()
            .filter(|t| t.name() == request && is_ancestor_or_self(current_project, t.project_path()))
            .map(|t| t.path().to_string())
            .collect();

        if matches.is_empty() {
            return Err(self.task_not_found(&task_path(current_project, request)));
        }
        Ok(matches)
    }

    pub(crate) fn task_not_found(&self, path: &str) -> KilnError {
        KilnError::TaskNotFound {
            path: path.to_string(),
            available: self.task_paths(),
        }
    }
}

impl Index<&str> for Build {
    type Output = Task;

    /// Panics if no task has the path `path`
    fn index(&self, path: &str) -> &Task {
        &self.tasks[path]
    }
}

impl IndexMut<&str> for Build {
    fn index_mut(&mut self, path: &str) -> &mut Task {
        match self.tasks.get_mut(path) {
            Some(task) => task,
            None => panic!("no task with path '{}'", path),
        }
    }
}
