//! Builder for the project dependency graph.
//!
//! Takes project names with their `depends_on` lists and produces a
//! validated acyclic graph.

use std::collections::{HashMap, VecDeque};

use crate::errors::ConfigError;

/// Index into the project list.
pub type ProjectIndex = usize;

/// Directed graph over project names. An edge `(from, to)` means `from`
/// must run before `to`.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    names: Vec<String>,
    index_map: HashMap<String, ProjectIndex>,
    /// index -> projects that depend on it
    forward_edges: Vec<Vec<ProjectIndex>>,
    /// index -> projects it depends on
    reverse_edges: Vec<Vec<ProjectIndex>>,
}

impl DependencyGraph {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_map.contains_key(name)
    }

    pub fn get_index(&self, name: &str) -> Option<ProjectIndex> {
        self.index_map.get(name).copied()
    }

    pub fn name(&self, index: ProjectIndex) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Projects that the given project depends on.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.get_index(name)
            .map(|i| {
                self.reverse_edges[i]
                    .iter()
                    .map(|&d| self.names[d].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Projects that depend on the given project.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.get_index(name)
            .map(|i| {
                self.forward_edges[i]
                    .iter()
                    .map(|&d| self.names[d].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Kahn's algorithm, processed breadth-first. Ties between projects that
    /// become ready together break by name, so the result is the same on
    /// every call.
    pub fn stable_topological_sort(&self) -> Result<Vec<String>, ConfigError> {
        let mut in_degree: Vec<usize> = self.reverse_edges.iter().map(Vec::len).collect();

        let mut roots: Vec<ProjectIndex> = (0..self.len()).filter(|&i| in_degree[i] == 0).collect();
        roots.sort_by(|a, b| self.names[*a].cmp(&self.names[*b]));
        let mut queue: VecDeque<ProjectIndex> = roots.into();

        let mut order = Vec::with_capacity(self.len());
        while let Some(node) = queue.pop_front() {
            order.push(self.names[node].clone());

            let mut frontier = Vec::new();
            for &dependent in &self.forward_edges[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    frontier.push(dependent);
                }
            }
            frontier.sort_by(|a, b| self.names[*a].cmp(&self.names[*b]));
            queue.extend(frontier);
        }

        if order.len() != self.len() {
            let mut projects: Vec<String> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .map(|(i, _)| self.names[i].clone())
                .collect();
            projects.sort();
            return Err(ConfigError::DependencyCycle { projects });
        }
        Ok(order)
    }
}

/// Collects projects and edges, then validates them into a [`DependencyGraph`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    projects: Vec<(String, Vec<String>)>,
    edges: Vec<(String, String)>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a project with the projects it depends on.
    pub fn project(mut self, name: impl Into<String>, depends_on: Vec<String>) -> Self {
        self.projects.push((name.into(), depends_on));
        self
    }

    /// Add an explicit edge: `before` runs before `after`. Both must be added
    /// as projects.
    pub fn edge(mut self, before: impl Into<String>, after: impl Into<String>) -> Self {
        self.edges.push((before.into(), after.into()));
        self
    }

    /// Build the graph, rejecting duplicates, unknown dependencies and cycles.
    pub fn build(self) -> Result<DependencyGraph, ConfigError> {
        let mut index_map = HashMap::new();
        let mut names = Vec::with_capacity(self.projects.len());
        for (i, (name, _)) in self.projects.iter().enumerate() {
            if index_map.insert(name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateProject(name.clone()));
            }
            names.push(name.clone());
        }

        let mut forward_edges = vec![Vec::new(); names.len()];
        let mut reverse_edges = vec![Vec::new(); names.len()];

        let declared = self
            .projects
            .iter()
            .flat_map(|(name, deps)| deps.iter().map(move |d| (d.clone(), name.clone())));
        for (before, after) in declared.chain(self.edges) {
            let from = *index_map
                .get(&before)
                .ok_or_else(|| ConfigError::UnknownDependency {
                    project: after.clone(),
                    dependency: before.clone(),
                })?;
            let to = *index_map
                .get(&after)
                .ok_or_else(|| ConfigError::Invalid(format!("Unknown project '{}'", after)))?;
            if forward_edges[from].contains(&to) {
                continue;
            }
            forward_edges[from].push(to);
            reverse_edges[to].push(from);
        }

        let graph = DependencyGraph {
            names,
            index_map,
            forward_edges,
            reverse_edges,
        };
        graph.stable_topological_sort()?;
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_simple_graph() {
        let graph = GraphBuilder::new()
            .project("vpc", deps(&[]))
            .project("db", deps(&["vpc"]))
            .project("app", deps(&["vpc", "db"]))
            .build()
            .unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.dependencies("app"), vec!["vpc", "db"]);
        assert_eq!(graph.dependents("vpc"), vec!["db", "app"]);
        assert!(graph.dependencies("vpc").is_empty());
    }

    #[test]
    fn test_stable_sort_breaks_ties_by_name() {
        let graph = GraphBuilder::new()
            .project("project1", deps(&[]))
            .project("project2", deps(&[]))
            .project("project3", deps(&[]))
            .project("project4", deps(&[]))
            .edge("project2", "project1")
            .edge("project3", "project2")
            .edge("project4", "project1")
            .build()
            .unwrap();

        let expected = vec!["project3", "project4", "project2", "project1"];
        for _ in 0..10 {
            assert_eq!(graph.stable_topological_sort().unwrap(), expected);
        }
    }

    #[test]
    fn test_independent_projects_sorted_lexicographically() {
        let graph = GraphBuilder::new()
            .project("zeta", deps(&[]))
            .project("alpha", deps(&[]))
            .project("mid", deps(&[]))
            .build()
            .unwrap();
        assert_eq!(
            graph.stable_topological_sort().unwrap(),
            vec!["alpha", "mid", "zeta"]
        );
    }

    #[test]
    fn test_cycle_detection() {
        let result = GraphBuilder::new()
            .project("a", deps(&["c"]))
            .project("b", deps(&["a"]))
            .project("c", deps(&["b"]))
            .project("d", deps(&[]))
            .build();

        match result {
            Err(ConfigError::DependencyCycle { projects }) => {
                assert_eq!(projects, vec!["a", "b", "c"]);
            }
            other => panic!("Expected DependencyCycle, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_dependency() {
        let result = GraphBuilder::new()
            .project("app", deps(&["nonexistent"]))
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::UnknownDependency { ref dependency, .. }) if dependency == "nonexistent"
        ));
    }

    #[test]
    fn test_duplicate_project() {
        let result = GraphBuilder::new()
            .project("app", deps(&[]))
            .project("app", deps(&[]))
            .build();
        assert!(matches!(result, Err(ConfigError::DuplicateProject(_))));
    }

    #[test]
    fn test_duplicate_edges_counted_once() {
        let graph = GraphBuilder::new()
            .project("a", deps(&[]))
            .project("b", deps(&["a"]))
            .edge("a", "b")
            .build()
            .unwrap();
        assert_eq!(graph.stable_topological_sort().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_graph() {
        let graph = GraphBuilder::new().build().unwrap();
        assert!(graph.is_empty());
        assert!(graph.stable_topological_sort().unwrap().is_empty());
    }
}
