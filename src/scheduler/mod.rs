//! Dependency-ordered scheduling of per-project jobs.
//!
//! Jobs run sequentially in the order returned by [`DependencyScheduler::order`]:
//! every project comes after the projects it depends on, and projects that
//! become ready together are ordered by name.

mod builder;

use std::collections::HashMap;

use tracing::warn;

pub use builder::{DependencyGraph, GraphBuilder, ProjectIndex};

use crate::errors::ConfigError;
use crate::job::Job;

pub struct DependencyScheduler<'a> {
    graph: &'a DependencyGraph,
}

impl<'a> DependencyScheduler<'a> {
    pub fn new(graph: &'a DependencyGraph) -> Self {
        Self { graph }
    }

    /// Order `jobs` by the dependency graph.
    ///
    /// Jobs for the same project keep their relative order. Jobs whose project
    /// is absent from the graph have no known constraints and run last,
    /// ordered by project name.
    pub fn order(&self, jobs: Vec<Job>) -> Result<Vec<Job>, ConfigError> {
        let sorted = self.graph.stable_topological_sort()?;
        let rank: HashMap<&str, usize> = sorted
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let (mut known, mut unknown): (Vec<Job>, Vec<Job>) = jobs
            .into_iter()
            .partition(|job| rank.contains_key(job.project_name.as_str()));

        known.sort_by_key(|job| rank[job.project_name.as_str()]);

        for job in &unknown {
            warn!(project = %job.project_name, "Project not in dependency graph, scheduling last");
        }
        unknown.sort_by(|a, b| a.project_name.cmp(&b.project_name));

        known.extend(unknown);
        Ok(known)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::job;

    fn graph() -> DependencyGraph {
        GraphBuilder::new()
            .project("project1", vec!["project2".into(), "project4".into()])
            .project("project2", vec!["project3".into()])
            .project("project3", vec![])
            .project("project4", vec![])
            .build()
            .unwrap()
    }

    fn names(jobs: &[Job]) -> Vec<&str> {
        jobs.iter().map(|j| j.project_name.as_str()).collect()
    }

    #[test]
    fn test_order_is_deterministic() {
        let graph = graph();
        let scheduler = DependencyScheduler::new(&graph);
        for _ in 0..5 {
            let jobs = vec![
                job("project1"),
                job("project2"),
                job("project3"),
                job("project4"),
            ];
            let ordered = scheduler.order(jobs).unwrap();
            assert_eq!(
                names(&ordered),
                vec!["project3", "project4", "project2", "project1"]
            );
        }
    }

    #[test]
    fn test_order_ignores_input_order() {
        let graph = graph();
        let scheduler = DependencyScheduler::new(&graph);
        let ordered = scheduler
            .order(vec![job("project4"), job("project1"), job("project3")])
            .unwrap();
        assert_eq!(names(&ordered), vec!["project3", "project4", "project1"]);
    }

    #[test]
    fn test_unknown_projects_run_last_by_name() {
        let graph = graph();
        let scheduler = DependencyScheduler::new(&graph);
        let ordered = scheduler
            .order(vec![job("zz-extra"), job("project2"), job("aa-extra")])
            .unwrap();
        assert_eq!(names(&ordered), vec!["project2", "aa-extra", "zz-extra"]);
    }

    #[test]
    fn test_same_project_jobs_keep_relative_order() {
        let graph = graph();
        let scheduler = DependencyScheduler::new(&graph);
        let mut first = job("project3");
        first.workspace = "staging".to_string();
        let mut second = job("project3");
        second.workspace = "prod".to_string();

        let ordered = scheduler.order(vec![first, second]).unwrap();
        assert_eq!(ordered[0].workspace, "staging");
        assert_eq!(ordered[1].workspace, "prod");
    }
}
