// src/recipe/store.rs

//! On-disk recipe repository
//!
//! Layout: `<repo_dir>/[<category>/]<name>/<name>.meta`. The package
//! directory may also hold `patches/` and `hooks/`.

use super::format::Recipe;
use super::parser::parse_recipe_file;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// All recipes currently in the store, keyed by name
pub type RecipeSet = BTreeMap<String, Recipe>;

/// Extension of recipe files
pub const RECIPE_EXTENSION: &str = "meta";

/// Recipe repository reader
///
/// Every call re-reads the repository, so recipe changes made by a sync
/// are always visible to the next resolution.
#[derive(Debug, Clone)]
pub struct RecipeStore {
    repo_dir: PathBuf,
}

impl RecipeStore {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    /// Paths of every recipe file in the repository
    fn recipe_paths(&self) -> Vec<PathBuf> {
        if !self.repo_dir.is_dir() {
            return Vec::new();
        }

        WalkDir::new(&self.repo_dir)
            .min_depth(2)
            .max_depth(3)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| is_recipe_file(e.path()))
            .map(|e| e.into_path())
            .collect()
    }

    /// Load every recipe
    pub fn load_all(&self) -> Result<RecipeSet> {
        let mut recipes = RecipeSet::new();

        for path in self.recipe_paths() {
            let recipe = parse_recipe_file(&path)?;
            if let Some(existing) = recipes.get(&recipe.name) {
                return Err(Error::ParseError(format!(
                    "Duplicate recipe {}: {} and {}",
                    recipe.name,
                    existing
                        .package_dir
                        .as_deref()
                        .unwrap_or(Path::new("?"))
                        .display(),
                    path.display()
                )));
            }
            debug!("Loaded recipe {} from {}", recipe.pkg_id(), path.display());
            recipes.insert(recipe.name.clone(), recipe);
        }

        Ok(recipes)
    }

    /// Load one recipe by name
    pub fn get(&self, name: &str) -> Result<Recipe> {
        let file_name = format!("{}.{}", name, RECIPE_EXTENSION);
        self.recipe_paths()
            .into_iter()
            .find(|p| p.file_name().and_then(|f| f.to_str()) == Some(file_name.as_str()))
            .map(|p| parse_recipe_file(&p))
            .unwrap_or_else(|| Err(Error::RecipeNotFound(name.to_string())))
    }

    /// Whether a recipe exists for `name`
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }
}

/// `<dir>/<name>/<name>.meta`: the file stem must match its directory
fn is_recipe_file(path: &Path) -> bool {
    if path.extension().and_then(|e| e.to_str()) != Some(RECIPE_EXTENSION) {
        return false;
    }
    let stem = path.file_stem().and_then(|s| s.to_str());
    let dir = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str());
    stem.is_some() && stem == dir
}
