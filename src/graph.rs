//! Task graph construction and dependency resolution
//!
//! Uses petgraph to hold the DAG over resolved task paths. Edges point from a
//! task to each task it depends on. Cycle detection and ordering are done by
//! hand so that both are deterministic in task path order.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::build::Build;
use crate::error::{KilnError, Result};
use crate::project::resolve_path;

/// The resolved dependency graph for a set of requested tasks
#[derive(Debug, Clone)]
pub struct TaskGraph {
    graph: DiGraph<String, ()>,
    index: BTreeMap<String, NodeIndex>,
    order: Vec<String>,
    requests: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

impl TaskGraph {
    /// Build the graph for `requests`, resolved against `current_project`.
    ///
    /// Every request and every transitive dependency is resolved here, so an
    /// unknown task, an unresolved dependency or a cycle is reported before
    /// anything runs.
    pub fn build(build: &Build, current_project: &str, requests: &[String]) -> Result<Self> {
        if requests.is_empty() {
            return Err(KilnError::NothingToDo);
        }

        let mut resolved = BTreeMap::new();
        for request in requests {
            let roots = build.resolve_request(current_project, request)?;
            resolved.insert(request.clone(), roots);
        }

        Self::from_requests(build, resolved)
    }

    /// Build the graph over every task of the build
    pub fn for_all_tasks(build: &Build) -> Result<Self> {
        let requests = build
            .tasks()
            .map(|t| (t.path().to_string(), vec![t.path().to_string()]))
            .collect::<BTreeMap<_, _>>();

        if requests.is_empty() {
            return Ok(Self {
                graph: DiGraph::new(),
                index: BTreeMap::new(),
                order: Vec::new(),
                requests,
            });
        }
        Self::from_requests(build, requests)
    }

    fn from_requests(build: &Build, requests: BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index: BTreeMap<String, NodeIndex> = BTreeMap::new();

        let mut pending: BTreeSet<String> = requests.values().flatten().cloned().collect();
        let mut edges: Vec<(String, String)> = Vec::new();

        // Resolve the transitive closure of the requested tasks
        while let Some(path) = pending.pop_first() {
            if index.contains_key(&path) {
                continue;
            }
            let task = build.task(&path).ok_or_else(|| build.task_not_found(&path))?;
            index.insert(path.clone(), graph.add_node(path.clone()));

            for reference in task.dependencies() {
                let dependency = resolve_path(task.project_path(), reference)?;
                if !build.contains_task(&dependency) {
                    return Err(KilnError::UnresolvedDependency {
                        task: path.clone(),
                        dependency,
                    });
                }
                if !index.contains_key(&dependency) {
                    pending.insert(dependency.clone());
                }
                edges.push((path.clone(), dependency));
            }
        }

        for (from, to) in edges {
            graph.update_edge(index[&from], index[&to], ());
        }

        tracing::debug!(
            tasks = graph.node_count(),
            edges = graph.edge_count(),
            "resolved task graph"
        );

        let mut task_graph = Self {
            graph,
            index,
            order: Vec::new(),
            requests,
        };
        task_graph.check_acyclic()?;
        task_graph.order = task_graph.topological_order();

        Ok(task_graph)
    }

    /// Depth-first search with in-progress/done marks; a back edge to a task
    /// still in progress is a cycle.
    ///
    /// The search keeps its own stack of `(task, remaining dependencies)`, so
    /// the depth of a dependency chain is not bounded by the thread stack.
    fn check_acyclic(&self) -> Result<()> {
        let mut marks: BTreeMap<NodeIndex, Mark> = BTreeMap::new();

        for &start in self.index.values() {
            if marks.contains_key(&start) {
                continue;
            }
            if let Some(cycle) = self.find_cycle_from(start, &mut marks) {
                let names: Vec<&str> = cycle.iter().map(|&idx| self.graph[idx].as_str()).collect();
                return Err(KilnError::CyclicDependency {
                    cycle: names.join(" -> "),
                });
            }
        }

        Ok(())
    }

    fn find_cycle_from(
        &self,
        start: NodeIndex,
        marks: &mut BTreeMap<NodeIndex, Mark>,
    ) -> Option<Vec<NodeIndex>> {
        let mut stack: Vec<(NodeIndex, std::vec::IntoIter<NodeIndex>)> = Vec::new();
        marks.insert(start, Mark::InProgress);
        stack.push((start, self.sorted_neighbors(start, Direction::Outgoing).into_iter()));

        while let Some((node, neighbors)) = stack.last_mut() {
            let node = *node;
            let Some(next) = neighbors.next() else {
                stack.pop();
                marks.insert(node, Mark::Done);
                continue;
            };

            match marks.get(&next) {
                Some(Mark::InProgress) => {
                    let from = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
                    let mut cycle: Vec<NodeIndex> = stack[from..].iter().map(|&(n, _)| n).collect();
                    cycle.push(next);
                    return Some(cycle);
                }
                Some(Mark::Done) => {}
                None => {
                    marks.insert(next, Mark::InProgress);
                    stack.push((next, self.sorted_neighbors(next, Direction::Outgoing).into_iter()));
                }
            }
        }

        None
    }

    /// Kahn's algorithm: a task becomes ready once all of its dependencies
    /// are placed. Among ready tasks the smallest path goes first.
    fn topological_order(&self) -> Vec<String> {
        let mut remaining: BTreeMap<NodeIndex, usize> = self
            .index
            .values()
            .map(|&idx| (idx, self.graph.neighbors_directed(idx, Direction::Outgoing).count()))
            .collect();

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(&idx, _)| self.graph[idx].as_str())
            .collect();

        let mut order = Vec::with_capacity(self.index.len());
        while let Some(path) = ready.pop_first() {
            order.push(path.to_string());
            let idx = self.index[path];

            for dependent in self.graph.neighbors_directed(idx, Direction::Incoming) {
                if let Some(count) = remaining.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(self.graph[dependent].as_str());
                    }
                }
            }
        }

        order
    }

    fn sorted_neighbors(&self, node: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self.graph.neighbors_directed(node, direction).collect();
        neighbors.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
        neighbors
    }

    /// Tasks required by one request (including dependencies), in execution
    /// order
    pub fn execution_order(&self, request: &str) -> Result<Vec<&str>> {
        let roots = self
            .requests
            .get(request)
            .ok_or_else(|| KilnError::TaskNotFound {
                path: request.to_string(),
                available: self.requests.keys().cloned().collect(),
            })?;

        let mut required = HashSet::new();
        let mut dfs = Dfs::empty(&self.graph);
        for root in roots {
            dfs.move_to(self.index[root]);
            while let Some(node) = dfs.next(&self.graph) {
                required.insert(node);
            }
        }

        Ok(self
            .order
            .iter()
            .filter(|path| required.contains(&self.index[path.as_str()]))
            .map(String::as_str)
            .collect())
    }

    /// Every task in the graph, in execution order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Requests this graph was built for
    pub fn requests(&self) -> impl Iterator<Item = &str> {
        self.requests.keys().map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Direct dependencies of a task
    pub fn dependencies(&self, path: &str) -> Option<Vec<&str>> {
        self.index.get(path).map(|&idx| {
            self.sorted_neighbors(idx, Direction::Outgoing)
                .into_iter()
                .map(|dep| self.graph[dep].as_str())
                .collect()
        })
    }

    /// Tasks that directly depend on the given task
    pub fn dependents(&self, path: &str) -> Option<Vec<&str>> {
        self.index.get(path).map(|&idx| {
            self.sorted_neighbors(idx, Direction::Incoming)
                .into_iter()
                .map(|dep| self.graph[dep].as_str())
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Project;
    use std::path::Path;

    fn build_with(edges: &[(&str, Vec<&str>)]) -> Build {
        let mut build = Build::new("/work");
        for (name, deps) in edges {
            build
                .create_task(":", name)
                .unwrap()
                .depends_on(deps.iter().copied());
        }
        build
    }

    fn requests(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_chain_order() {
        let build = build_with(&[("a", vec!["b"]), ("b", vec!["c"]), ("c", vec![])]);
        let graph = TaskGraph::build(&build, ":", &requests(&["a"])).unwrap();
        assert_eq!(graph.execution_order("a").unwrap(), vec![":c", ":b", ":a"]);
    }

    #[test]
    fn test_diamond_is_sound_and_deterministic() {
        let build = build_with(&[
            ("d", vec!["c", "b"]),
            ("b", vec!["a"]),
            ("c", vec!["a"]),
            ("a", vec![]),
            ("unrelated", vec![]),
        ]);

        let graph = TaskGraph::build(&build, ":", &requests(&["d"])).unwrap();
        let order = graph.execution_order("d").unwrap();
        assert_eq!(order, vec![":a", ":b", ":c", ":d"]);

        for _ in 0..5 {
            let again = TaskGraph::build(&build, ":", &requests(&["d"])).unwrap();
            assert_eq!(again.order(), graph.order());
        }
        assert!(!graph.contains(":unrelated"));
    }

    #[test]
    fn test_cycle_detection() {
        let build = build_with(&[("x", vec!["y"]), ("y", vec!["x"])]);
        let err = TaskGraph::build(&build, ":", &requests(&["x"])).unwrap_err();
        match err {
            KilnError::CyclicDependency { cycle } => assert_eq!(cycle, ":x -> :y -> :x"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    fn chain(len: usize) -> Build {
        let mut build = Build::new("/work");
        for i in 0..len {
            let task = build.create_task(":", &format!("t{i:06}")).unwrap();
            if i + 1 < len {
                task.depends_on([format!("t{:06}", i + 1)]);
            }
        }
        build
    }

    #[test]
    fn test_deep_chain_on_small_stack() {
        let handle = std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(|| {
                let build = chain(20_000);
                let graph = TaskGraph::build(&build, ":", &requests(&["t000000"])).unwrap();
                let order = graph.execution_order("t000000").unwrap();
                assert_eq!(order.len(), 20_000);
                assert_eq!(order.first(), Some(&":t019999"));
                assert_eq!(order.last(), Some(&":t000000"));
            })
            .unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_deep_cycle_reported() {
        let mut build = chain(10_000);
        build.task_mut(":t009999").unwrap().depends_on(["t000000"]);
        let err = TaskGraph::build(&build, ":", &requests(&["t000000"])).unwrap_err();
        match err {
            KilnError::CyclicDependency { cycle } => {
                assert!(cycle.starts_with(":t000000 -> :t000001 -> "));
                assert!(cycle.ends_with(":t009999 -> :t000000"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let build = build_with(&[("x", vec!["x"])]);
        let result = TaskGraph::build(&build, ":", &requests(&["x"]));
        assert!(matches!(result, Err(KilnError::CyclicDependency { .. })));
    }

    #[test]
    fn test_unresolved_dependency() {
        let build = build_with(&[("a", vec!["missing"])]);
        let err = TaskGraph::build(&build, ":", &requests(&["a"])).unwrap_err();
        assert!(matches!(
            err,
            KilnError::UnresolvedDependency { task, dependency }
                if task == ":a" && dependency == ":missing"
        ));
    }

    #[test]
    fn test_empty_request_set() {
        let build = build_with(&[("a", vec![])]);
        let result = TaskGraph::build(&build, ":", &[]);
        assert!(matches!(result, Err(KilnError::NothingToDo)));
    }

    #[test]
    fn test_relative_dependencies_resolve_against_owner() {
        let mut build = Build::new("/work");
        build.add_project(Project::child(Path::new("/work"), "core").unwrap()).unwrap();
        build.add_project(Project::child(Path::new("/work"), "app").unwrap()).unwrap();
        build.create_task(":core", "compile").unwrap();
        build.create_task(":app", "compile").unwrap().depends_on([":core:compile"]);
        build.create_task(":app", "jar").unwrap().depends_on(["compile"]);

        let graph = TaskGraph::build(&build, ":", &requests(&["app:jar"])).unwrap();
        assert_eq!(
            graph.execution_order("app:jar").unwrap(),
            vec![":core:compile", ":app:compile", ":app:jar"]
        );
        assert_eq!(graph.dependencies(":app:jar").unwrap(), vec![":app:compile"]);
        assert_eq!(graph.dependents(":core:compile").unwrap(), vec![":app:compile"]);
    }

    #[test]
    fn test_dependencies_declared_after_creation_are_honored() {
        let mut build = build_with(&[("a", vec![]), ("b", vec![])]);
        build.task_mut(":a").unwrap().depends_on(["b"]);
        let graph = TaskGraph::build(&build, ":", &requests(&["a"])).unwrap();
        assert_eq!(graph.execution_order("a").unwrap(), vec![":b", ":a"]);
    }

    #[test]
    fn test_all_tasks() {
        let build = build_with(&[("b", vec!["a"]), ("a", vec![]), ("c", vec![])]);
        let graph = TaskGraph::for_all_tasks(&build).unwrap();
        assert_eq!(graph.order(), [":a", ":b", ":c"]);
    }
}
