// src/resolver/graph.rs

//! Dependency graph data structures and algorithms
//!
//! Provides graph construction, depth-first topological ordering, cycle
//! detection with the full offending path, and reverse-dependency queries.
//! Adjacency is kept in ordered maps so every traversal is deterministic.

use crate::error::{Error, Result};
use crate::recipe::{DepKind, RecipeSet};
use super::ProvidesIndex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// DFS node colour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Directed "depends-on" graph over package names
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// name -> names it depends on
    edges: BTreeMap<String, BTreeSet<String>>,
    /// name -> names that depend on it
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
    /// Nodes backed by a recipe
    with_recipe: BTreeSet<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fresh graph from the current recipe set for one dependency kind
    ///
    /// Dependencies on virtual names point at their provider.
    pub fn from_recipes(recipes: &RecipeSet, kind: DepKind) -> Self {
        Self::from_recipes_with(recipes, kind, &ProvidesIndex::from_recipes(recipes))
    }

    pub fn from_recipes_with(recipes: &RecipeSet, kind: DepKind, provides: &ProvidesIndex) -> Self {
        let mut graph = Self::new();
        for recipe in recipes.values() {
            let deps: Vec<String> = recipe
                .deps(kind)
                .iter()
                .filter_map(|dep| {
                    // A package providing a name it also depends on needs nothing
                    let real = provides.resolve_name(dep);
                    (real != recipe.name || real == dep).then_some(real)
                })
                .collect();
            graph.add_edges(&recipe.name, deps.iter().map(String::as_str));
            graph.with_recipe.insert(recipe.name.clone());
        }
        graph
    }

    /// Add a node and its outgoing edges
    ///
    /// Dependency names become nodes even if nothing else is known about them.
    pub fn add_edges<'a>(&mut self, name: &str, deps: impl IntoIterator<Item = &'a str>) {
        self.edges.entry(name.to_string()).or_default();
        self.reverse_edges.entry(name.to_string()).or_default();

        for dep in deps {
            self.edges.entry(dep.to_string()).or_default();
            self.edges
                .entry(name.to_string())
                .or_default()
                .insert(dep.to_string());
            self.reverse_edges
                .entry(dep.to_string())
                .or_default()
                .insert(name.to_string());
        }
    }

    pub fn node_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    /// Whether `name` is backed by a recipe rather than only referenced
    pub fn has_recipe(&self, name: &str) -> bool {
        self.with_recipe.contains(name)
    }

    pub fn dependencies(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(name)
    }

    /// Packages that directly depend on `name`, sorted
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.reverse_edges
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Order `target` and everything it reaches, dependencies first
    ///
    /// Depth-first traversal; nodes are emitted in finish order. Reaching a
    /// node that is still in progress closes a cycle, reported as the full
    /// path around it. No partial order is ever returned.
    pub fn resolve(&self, target: &str) -> Result<Vec<String>> {
        let mut marks = HashMap::new();
        let mut order = Vec::new();
        self.visit(target, &mut marks, &mut order)?;
        Ok(order)
    }

    /// Order several targets into one list, dependencies first
    pub fn resolve_many<'a>(&self, targets: impl IntoIterator<Item = &'a str>) -> Result<Vec<String>> {
        let mut marks = HashMap::new();
        let mut order = Vec::new();
        for target in targets {
            self.visit(target, &mut marks, &mut order)?;
        }
        Ok(order)
    }

    /// Order for tearing down `target` and its dependencies: dependents first
    pub fn removal_order(&self, target: &str) -> Result<Vec<String>> {
        let mut order = self.resolve(target)?;
        order.reverse();
        Ok(order)
    }

    fn visit<'g>(
        &'g self,
        start: &'g str,
        marks: &mut HashMap<&'g str, Mark>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if marks.get(start) == Some(&Mark::Done) {
            return Ok(());
        }

        // Explicit stack of (node, its dependencies, next dependency index)
        let mut stack: Vec<(&'g str, Vec<&'g str>, usize)> = Vec::new();
        marks.insert(start, Mark::InProgress);
        stack.push((start, self.deps_of(start), 0));

        while let Some((_, deps, next)) = stack.last_mut() {
            if *next < deps.len() {
                let dep = deps[*next];
                *next += 1;

                match marks.get(dep) {
                    Some(Mark::Done) => {}
                    Some(Mark::InProgress) => {
                        let begin = stack.iter().position(|(n, _, _)| *n == dep).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[begin..].iter().map(|(n, _, _)| n.to_string()).collect();
                        cycle.push(dep.to_string());
                        return Err(Error::CycleDetected {
                            path: canonical_cycle(cycle),
                        });
                    }
                    None => {
                        marks.insert(dep, Mark::InProgress);
                        stack.push((dep, self.deps_of(dep), 0));
                    }
                }
            } else if let Some((node, _, _)) = stack.pop() {
                marks.insert(node, Mark::Done);
                order.push(node.to_string());
            }
        }

        Ok(())
    }

    fn deps_of(&self, name: &str) -> Vec<&str> {
        self.edges
            .get(name)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Every package that depends on `name`, directly or transitively
    ///
    /// Ordered dependents-first, so removing in this order never leaves a
    /// package whose dependency is already gone. `name` itself is excluded.
    pub fn transitive_dependents(&self, name: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        self.collect_dependents(name, &mut seen, &mut order);
        order.retain(|n| n != name);
        order
    }

    fn collect_dependents<'g>(
        &'g self,
        name: &'g str,
        seen: &mut HashSet<&'g str>,
        order: &mut Vec<String>,
    ) {
        if !seen.insert(name) {
            return;
        }
        if let Some(dependents) = self.reverse_edges.get(name) {
            for dependent in dependents {
                self.collect_dependents(dependent, seen, order);
            }
        }
        order.push(name.to_string());
    }
}

/// Rotate a closed cycle so it starts at its smallest name
///
/// The same cycle is then reported identically no matter which member the
/// traversal entered it from.
fn canonical_cycle(cycle: Vec<String>) -> Vec<String> {
    // cycle is closed: first == last
    let ring = &cycle[..cycle.len().saturating_sub(1)];
    if ring.is_empty() {
        return cycle;
    }

    let start = ring
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut rotated: Vec<String> = ring[start..].iter().chain(ring[..start].iter()).cloned().collect();
    rotated.push(ring[start].clone());
    rotated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for (name, deps) in edges {
            g.add_edges(name, deps.iter().copied());
        }
        g
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_linear_dependencies() {
        let g = graph(&[("c", &["b"]), ("b", &["a"]), ("a", &[])]);
        assert_eq!(g.resolve("c").unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_diamond_dependencies() {
        let g = graph(&[
            ("top", &["left", "right"]),
            ("left", &["base"]),
            ("right", &["base"]),
            ("base", &[]),
        ]);
        let order = g.resolve("top").unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(order.first().unwrap(), "base");
        assert_eq!(order.last().unwrap(), "top");
        assert!(position(&order, "left") < position(&order, "top"));
        assert!(position(&order, "right") < position(&order, "top"));
    }

    #[test]
    fn test_only_reachable_nodes() {
        let g = graph(&[("a", &["b"]), ("b", &[]), ("unrelated", &["b"])]);
        assert_eq!(g.resolve("a").unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn test_two_node_cycle_path() {
        let g = graph(&[("x", &["y"]), ("y", &["x"])]);
        for target in ["x", "y"] {
            match g.resolve(target) {
                Err(Error::CycleDetected { path }) => assert_eq!(path, vec!["x", "y", "x"]),
                other => panic!("expected cycle, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_cycle_path_excludes_entry_tail() {
        let g = graph(&[("app", &["b"]), ("b", &["c"]), ("c", &["d"]), ("d", &["b"])]);
        match g.resolve("app") {
            Err(Error::CycleDetected { path }) => assert_eq!(path, vec!["b", "c", "d", "b"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let g = graph(&[("foo", &["foo"])]);
        match g.resolve("foo") {
            Err(Error::CycleDetected { path }) => assert_eq!(path, vec!["foo", "foo"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_deterministic_order() {
        let g = graph(&[
            ("app", &["zlib", "openssl", "pcre"]),
            ("openssl", &["zlib"]),
            ("pcre", &[]),
            ("zlib", &[]),
        ]);
        let first = g.resolve("app").unwrap();
        for _ in 0..5 {
            assert_eq!(g.resolve("app").unwrap(), first);
        }
        assert_eq!(first, vec!["zlib", "openssl", "pcre", "app"]);
    }

    #[test]
    fn test_removal_order_reverses() {
        let g = graph(&[("c", &["b"]), ("b", &["a"])]);
        assert_eq!(g.removal_order("c").unwrap(), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_dependents() {
        let g = graph(&[("app", &["lib"]), ("tool", &["lib"]), ("lib", &[])]);
        assert_eq!(g.dependents("lib"), vec!["app", "tool"]);
        assert!(g.dependents("app").is_empty());
        assert!(g.dependents("missing").is_empty());
    }

    #[test]
    fn test_transitive_dependents_order() {
        let g = graph(&[("app", &["mid"]), ("mid", &["base"]), ("tool", &["base"])]);
        let order = g.transitive_dependents("base");
        assert_eq!(order.len(), 3);
        assert!(position(&order, "app") < position(&order, "mid"));
        assert!(!order.contains(&"base".to_string()));
    }

    #[test]
    fn test_resolve_many_shares_nodes() {
        let g = graph(&[("a", &["base"]), ("b", &["base"])]);
        assert_eq!(g.resolve_many(["a", "b"]).unwrap(), vec!["base", "a", "b"]);
    }
}
