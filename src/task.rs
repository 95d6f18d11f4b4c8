//! Tasks and the actions they run
//!
//! A [`Task`] is a named unit of work owned by one project. Its actions run in
//! insertion order when the task's turn in the graph comes; its dependencies
//! are task path references resolved when a [`TaskGraph`] is built.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::build::Build;
use crate::graph::TaskGraph;
use crate::project::{task_path, AUTOSKIP_PROPERTY_PREFIX};
use crate::switches::Switches;

/// Outcome of a single action
pub type ActionResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A step executed as part of a task
pub trait TaskAction: Send + Sync {
    fn execute(&self, ctx: &mut ActionContext<'_>) -> ActionResult;

    /// Short label used by dry runs
    fn describe(&self) -> String {
        "<action>".to_string()
    }
}

impl<F> TaskAction for F
where
    F: Fn(&mut ActionContext<'_>) -> ActionResult + Send + Sync,
{
    fn execute(&self, ctx: &mut ActionContext<'_>) -> ActionResult {
        self(ctx)
    }
}

/// What an action sees while it runs: the task, the active graph and the
/// build it may reconfigure.
pub struct ActionContext<'a> {
    task_path: &'a str,
    build: &'a mut Build,
    graph: &'a TaskGraph,
    switches: &'a Switches,
    output: String,
}

impl<'a> ActionContext<'a> {
    pub fn new(
        task_path: &'a str,
        build: &'a mut Build,
        graph: &'a TaskGraph,
        switches: &'a Switches,
    ) -> Self {
        Self {
            task_path,
            build,
            graph,
            switches,
            output: String::new(),
        }
    }

    pub fn task_path(&self) -> &str {
        self.task_path
    }

    /// The running task
    pub fn task(&self) -> &Task {
        &self.build[self.task_path]
    }

    pub fn task_mut(&mut self) -> &mut Task {
        &mut self.build[self.task_path]
    }

    pub fn build(&self) -> &Build {
        &*self.build
    }

    /// Mutable access to the build. Changing the task set or dependency edges
    /// from a task that is not DAG-neutral forces a graph rebuild before the
    /// next requested task.
    pub fn build_mut(&mut self) -> &mut Build {
        &mut *self.build
    }

    pub fn graph(&self) -> &TaskGraph {
        self.graph
    }

    pub fn switches(&self) -> &Switches {
        self.switches
    }

    /// Append a line to the task's captured output
    pub fn println(&mut self, line: impl AsRef<str>) {
        self.output.push_str(line.as_ref());
        if !self.output.ends_with('\n') {
            self.output.push('\n');
        }
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn into_output(self) -> String {
        self.output
    }
}

/// A named, project-scoped unit of work
#[derive(Clone)]
pub struct Task {
    name: String,
    project_path: String,
    path: String,
    description: Option<String>,
    actions: Vec<Arc<dyn TaskAction>>,
    depends_on: BTreeSet<String>,
    enabled: bool,
    executed: bool,
    dag_neutral: bool,
    skip_properties: Vec<String>,
}

impl Task {
    /// Create a task owned by the project at `project_path`.
    ///
    /// The task starts with the skip property `skip.<name>`.
    pub fn new(project_path: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            project_path: project_path.to_string(),
            path: task_path(project_path, name),
            description: None,
            actions: Vec::new(),
            depends_on: BTreeSet::new(),
            enabled: true,
            executed: false,
            dag_neutral: false,
            skip_properties: vec![format!("{}{}", AUTOSKIP_PROPERTY_PREFIX, name)],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the owning project
    pub fn project_path(&self) -> &str {
        &self.project_path
    }

    /// Globally unique path: project path plus name
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = Some(description.into());
        self
    }

    /// Actions in execution order
    pub fn actions(&self) -> &[Arc<dyn TaskAction>] {
        &self.actions
    }

    /// Unresolved dependency references, relative or absolute
    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.depends_on
    }

    pub fn set_dependencies(&mut self, paths: BTreeSet<String>) {
        self.depends_on = paths;
    }

    /// Add dependency references. Relative references are resolved against
    /// the owning project when the graph is built, not now.
    pub fn depends_on<I, S>(&mut self, paths: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for path in paths {
            let path = path.into();
            let path = path.trim();
            if !path.is_empty() {
                self.depends_on.insert(path.to_string());
            }
        }
        self
    }

    pub fn do_first(&mut self, action: impl TaskAction + 'static) -> &mut Self {
        self.actions.insert(0, Arc::new(action));
        self
    }

    pub fn do_last(&mut self, action: impl TaskAction + 'static) -> &mut Self {
        self.actions.push(Arc::new(action));
        self
    }

    pub fn delete_all_actions(&mut self) -> &mut Self {
        self.actions.clear();
        self
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// A disabled task runs no actions, but its dependencies and dependents
    /// still run.
    pub fn set_enabled(&mut self, enabled: bool) -> &mut Self {
        self.enabled = enabled;
        self
    }

    /// Whether this task's turn in the current run has passed
    pub fn executed(&self) -> bool {
        self.executed
    }

    pub(crate) fn mark_executed(&mut self) {
        self.executed = true;
    }

    pub fn is_dag_neutral(&self) -> bool {
        self.dag_neutral
    }

    /// Declare that running this task never changes the task graph, so a
    /// graph built before it can be reused for the next requested task.
    pub fn set_dag_neutral(&mut self, dag_neutral: bool) -> &mut Self {
        self.dag_neutral = dag_neutral;
        self
    }

    pub fn skip_properties(&self) -> &[String] {
        &self.skip_properties
    }

    /// Live list of skip keys; callers may append further keys
    pub fn skip_properties_mut(&mut self) -> &mut Vec<String> {
        &mut self.skip_properties
    }

    /// Apply a configuration closure to this task
    pub fn configure<F>(&mut self, configure: F) -> &mut Self
    where
        F: FnOnce(&mut Task),
    {
        configure(self);
        self
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("path", &self.path)
            .field("actions", &self.actions.len())
            .field("depends_on", &self.depends_on)
            .field("enabled", &self.enabled)
            .field("executed", &self.executed)
            .field("dag_neutral", &self.dag_neutral)
            .field("skip_properties", &self.skip_properties)
            .finish()
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path.cmp(&other.path)
    }
}
