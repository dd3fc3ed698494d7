// src/resolver/mod.rs

//! Dependency resolution over the recipe store
//!
//! Graphs are built fresh from the current recipe set on every call, so a
//! recipe change is always seen by the next resolution. Cycles and missing
//! recipes are reported as distinct errors; a cycle always wins.
//!
//! Dependencies on virtual names resolve through [`ProvidesIndex`]; declared
//! conflicts are checked per batch with [`check_conflicts`].

mod graph;
mod provides;

pub use graph::DependencyGraph;
pub use provides::ProvidesIndex;

use crate::db::InstalledPackage;
use crate::error::{Error, Result};
use crate::recipe::{DepKind, DepSet, Recipe, RecipeSet, RecipeStore};
use std::collections::BTreeSet;

/// Resolve `target` against a recipe set, dependencies first
///
/// Names referenced only as dependencies stay in the order; callers that
/// need every node buildable use [`plan_install`].
///
/// A virtual `target` resolves to its provider.
pub fn resolve(recipes: &RecipeSet, target: &str, kind: DepKind) -> Result<Vec<String>> {
    let provides = ProvidesIndex::from_recipes(recipes);
    let target = provides.resolve_name(target);
    if !recipes.contains_key(&target) {
        return Err(Error::RecipeNotFound(target));
    }
    DependencyGraph::from_recipes_with(recipes, kind, &provides).resolve(&target)
}

/// Resolve for installation: every node must have a recipe or already be installed
pub fn plan_install(
    recipes: &RecipeSet,
    target: &str,
    kind: DepKind,
    is_installed: impl Fn(&str) -> bool,
) -> Result<Vec<String>> {
    let order = resolve(recipes, target, kind)?;
    if let Some(missing) = order
        .iter()
        .find(|name| !recipes.contains_key(name.as_str()) && !is_installed(name))
    {
        return Err(Error::RecipeNotFound(missing.clone()));
    }
    Ok(order)
}

/// Packages whose dependency set (any kind) includes `pkg`, sorted
///
/// A dependency on a virtual name counts for the package it resolves to.
pub fn reverse_dependents(recipes: &RecipeSet, pkg: &str) -> Vec<String> {
    let provides = ProvidesIndex::from_recipes(recipes);
    recipes
        .values()
        .filter(|r| {
            r.name != pkg
                && r.deps(DepKind::Both)
                    .iter()
                    .any(|dep| dep == pkg || provides.resolve_name(dep) == pkg)
        })
        .map(|r| r.name.clone())
        .collect()
}

/// One package that would be installed after a batch
struct Member<'a> {
    name: &'a str,
    provides: &'a DepSet,
    conflicts: &'a DepSet,
    incoming: bool,
}

/// Refuse a batch that would leave two conflicting packages installed
///
/// Installed packages the batch replaces are left out. Conflicts between
/// two packages that are both already installed are not reported here.
pub fn check_conflicts(batch: &[&Recipe], installed: &[InstalledPackage]) -> Result<()> {
    let replaced: BTreeSet<&str> = batch.iter().map(|r| r.name.as_str()).collect();
    let mut members: Vec<Member<'_>> = batch
        .iter()
        .map(|r| Member {
            name: &r.name,
            provides: &r.provides,
            conflicts: &r.conflicts,
            incoming: true,
        })
        .collect();
    members.extend(
        installed
            .iter()
            .filter(|p| !replaced.contains(p.name.as_str()))
            .map(|p| Member {
                name: &p.name,
                provides: &p.provides,
                conflicts: &p.conflicts,
                incoming: false,
            }),
    );

    let satisfies = |m: &Member<'_>, name: &str| m.name == name || m.provides.contains(name);
    for member in &members {
        for conflict in member.conflicts.iter() {
            let Some(other) = members
                .iter()
                .find(|o| o.name != member.name && satisfies(o, conflict))
            else {
                continue;
            };
            if member.incoming {
                return Err(Error::Conflict {
                    package: member.name.to_string(),
                    conflicts_with: other.name.to_string(),
                });
            }
            if other.incoming {
                return Err(Error::Conflict {
                    package: other.name.to_string(),
                    conflicts_with: member.name.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Resolver bound to a recipe store
///
/// This is the entry point used by the CLI and the transaction manager.
#[derive(Debug, Clone)]
pub struct Resolver {
    store: RecipeStore,
}

impl Resolver {
    pub fn new(store: RecipeStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RecipeStore {
        &self.store
    }

    /// `resolve(pkg, kind)` against the store's current contents
    pub fn resolve(&self, target: &str, kind: DepKind) -> Result<Vec<String>> {
        let recipes = self.store.load_all()?;
        resolve(&recipes, target, kind)
    }

    /// Reverse of [`Resolver::resolve`], for tearing a tree down
    pub fn removal_order(&self, target: &str, kind: DepKind) -> Result<Vec<String>> {
        let mut order = self.resolve(target, kind)?;
        order.reverse();
        Ok(order)
    }

    pub fn reverse_dependents(&self, pkg: &str) -> Result<Vec<String>> {
        let recipes = self.store.load_all()?;
        Ok(reverse_dependents(&recipes, pkg))
    }
}
