// src/resolver/provides.rs

//! Virtual package names
//!
//! A recipe's `provides=` list lets other recipes depend on a name no
//! recipe is called. A real package name always wins over a virtual one;
//! among several providers the highest version wins, then the name.

use crate::db::InstalledPackage;
use crate::recipe::RecipeSet;
use crate::version::compare_versions;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Virtual name -> packages providing it, with their versions
#[derive(Debug, Clone, Default)]
pub struct ProvidesIndex {
    providers: BTreeMap<String, BTreeMap<String, String>>,
    /// Real package names known to the index
    real: BTreeSet<String>,
}

impl ProvidesIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_recipes(recipes: &RecipeSet) -> Self {
        let mut index = Self::new();
        for recipe in recipes.values() {
            index.add(&recipe.name, &recipe.version, recipe.provides.iter());
        }
        index
    }

    /// Recipes plus installed records whose recipe may be gone
    pub fn with_installed(recipes: &RecipeSet, installed: &[InstalledPackage]) -> Self {
        let mut index = Self::from_recipes(recipes);
        for pkg in installed {
            if !recipes.contains_key(&pkg.name) {
                index.add(&pkg.name, &pkg.version, pkg.provides.iter());
            }
        }
        index
    }

    pub fn add<'a>(&mut self, package: &str, version: &str, provides: impl IntoIterator<Item = &'a str>) {
        self.real.insert(package.to_string());
        for name in provides {
            self.providers
                .entry(name.to_string())
                .or_default()
                .insert(package.to_string(), version.to_string());
        }
    }

    /// Packages providing `name`, sorted by name
    pub fn providers(&self, name: &str) -> Vec<String> {
        self.providers
            .get(name)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `package` satisfies `name`, directly or as a provider
    pub fn satisfies(&self, package: &str, name: &str) -> bool {
        package == name
            || self
                .providers
                .get(name)
                .is_some_and(|p| p.contains_key(package))
    }

    /// The package a dependency on `name` resolves to
    ///
    /// Unknown names come back unchanged so they still surface as missing.
    pub fn resolve_name(&self, name: &str) -> String {
        if self.real.contains(name) {
            return name.to_string();
        }
        self.providers
            .get(name)
            .and_then(|candidates| {
                candidates
                    .iter()
                    .max_by(|(a_name, a_ver), (b_name, b_ver)| {
                        match compare_versions(a_ver, b_ver) {
                            // Lower name first on a tie
                            Ordering::Equal => b_name.cmp(a_name),
                            other => other,
                        }
                    })
                    .map(|(name, _)| name.clone())
            })
            .unwrap_or_else(|| name.to_string())
    }
}
