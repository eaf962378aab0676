// src/resolver/traversal.rs

//! Explicit-stack depth-first traversal
//!
//! All state of one resolution lives in [`Traversal`]. The stack of
//! [`Frame`]s is the current DFS path; `visiting` mirrors it for O(1)
//! cycle checks.

use super::{DependencyLookup, InstalledState, OrderEntry, Resolution};
use crate::error::Result;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// A package on the DFS path and how far through its dependencies we are
#[derive(Debug)]
struct Frame {
    name: String,
    dependencies: Vec<String>,
    next: usize,
}

impl Frame {
    fn next_dependency(&mut self) -> Option<String> {
        let dependency = self.dependencies.get(self.next).cloned();
        self.next += 1;
        dependency
    }
}

pub struct Traversal<'a, L: DependencyLookup> {
    lookup: &'a L,
    installed: &'a InstalledState,
    deep: bool,
    visiting: HashSet<String>,
    visited: HashSet<String>,
    satisfied: BTreeSet<String>,
    order: Vec<OrderEntry>,
    cycles: Vec<Vec<String>>,
}

impl<'a, L: DependencyLookup> Traversal<'a, L> {
    pub fn new(lookup: &'a L, installed: &'a InstalledState, deep: bool) -> Self {
        Self {
            lookup,
            installed,
            deep,
            visiting: HashSet::new(),
            visited: HashSet::new(),
            satisfied: BTreeSet::new(),
            order: Vec::new(),
            cycles: Vec::new(),
        }
    }

    /// Walk everything reachable from `root` that is not yet visited
    pub fn resolve(&mut self, root: &str) -> Result<()> {
        if self.installed.is_installed(root) {
            self.satisfied.insert(root.to_string());
        }
        if self.visited.contains(root) {
            return Ok(());
        }

        let mut stack = vec![self.enter(root)?];

        while let Some(top) = stack.last_mut() {
            let Some(dependency) = top.next_dependency() else {
                if let Some(frame) = stack.pop() {
                    self.leave(frame.name)?;
                }
                continue;
            };

            if self.installed.is_satisfied(&dependency) {
                let first_time = self.satisfied.insert(dependency.clone());
                if first_time && let Some(provider) = self.installed.provider_of(&dependency) {
                    debug!("{} satisfied by installed {}", dependency, provider);
                }
                if !(self.deep && first_time) {
                    continue;
                }
            }

            if self.visiting.contains(&dependency) {
                let start = stack
                    .iter()
                    .position(|frame| frame.name == dependency)
                    .unwrap_or(0);
                let mut cycle: Vec<String> =
                    stack[start..].iter().map(|frame| frame.name.clone()).collect();
                cycle.push(dependency);
                debug!("Dependency cycle: {}", cycle.join(" -> "));
                self.cycles.push(cycle);
                continue;
            }

            if !self.visited.contains(&dependency) {
                let frame = self.enter(&dependency)?;
                stack.push(frame);
            }
        }

        Ok(())
    }

    fn enter(&mut self, name: &str) -> Result<Frame> {
        self.visiting.insert(name.to_string());
        Ok(Frame {
            name: name.to_string(),
            dependencies: self.lookup.dependencies(name)?,
            next: 0,
        })
    }

    /// Post-order: record the package once, if the store knows it
    fn leave(&mut self, name: String) -> Result<()> {
        self.visiting.remove(&name);
        if !self.visited.insert(name.clone()) {
            return Ok(());
        }

        match self.lookup.locate(&name)? {
            Some((source, version)) => self.order.push(OrderEntry {
                name,
                source,
                version,
            }),
            None => debug!("'{}' is not in the store, left out of the order", name),
        }
        Ok(())
    }

    /// Final result: installed and satisfied names are dropped from the order
    pub fn finish(self) -> Resolution {
        let Self {
            installed,
            satisfied,
            order,
            cycles,
            ..
        } = self;

        let order = order
            .into_iter()
            .filter(|entry| !installed.is_installed(&entry.name) && !satisfied.contains(&entry.name))
            .collect();

        Resolution {
            order,
            cycles,
            installed: installed.names(),
            satisfied,
            unresolved: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::tests::Graph;

    #[test]
    fn test_shared_dependency_visited_once() {
        let graph = Graph::default()
            .with("a", &["c"])
            .with("b", &["c"])
            .with("c", &[]);
        let installed = InstalledState::new();

        let mut traversal = Traversal::new(&graph, &installed, false);
        traversal.resolve("a").unwrap();
        traversal.resolve("b").unwrap();
        let resolution = traversal.finish();

        let order: Vec<&str> = resolution.order.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let graph = Graph::default().with("a", &["a"]);
        let installed = InstalledState::new();

        let mut traversal = Traversal::new(&graph, &installed, false);
        traversal.resolve("a").unwrap();
        let resolution = traversal.finish();

        assert_eq!(resolution.cycles, vec![vec!["a".to_string(), "a".to_string()]]);
        assert_eq!(resolution.order.len(), 1);
    }

    #[test]
    fn test_unknown_dependency_left_out() {
        let graph = Graph::default().with("a", &["virtual-thing"]);
        let installed = InstalledState::new();

        let mut traversal = Traversal::new(&graph, &installed, false);
        traversal.resolve("a").unwrap();
        let resolution = traversal.finish();

        let order: Vec<&str> = resolution.order.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(order, vec!["a"]);
    }

    #[test]
    fn test_deep_does_not_recurse_twice() {
        let graph = Graph::default()
            .with("a", &["lib", "b"])
            .with("b", &["lib"])
            .with("lib", &["missing"])
            .with("missing", &[]);
        let mut installed = InstalledState::new();
        installed.insert("lib", "1", &[]);

        let mut traversal = Traversal::new(&graph, &installed, true);
        traversal.resolve("a").unwrap();
        let resolution = traversal.finish();

        let order: Vec<&str> = resolution.order.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(order, vec!["missing", "b", "a"]);
    }

    #[test]
    fn test_installed_root_is_satisfied() {
        let graph = Graph::default().with("a", &[]);
        let mut installed = InstalledState::new();
        installed.insert("a", "1", &[]);

        let mut traversal = Traversal::new(&graph, &installed, false);
        traversal.resolve("a").unwrap();
        let resolution = traversal.finish();

        assert!(resolution.order.is_empty());
        assert!(resolution.satisfied.contains("a"));
    }
}
