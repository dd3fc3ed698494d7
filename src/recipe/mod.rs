// src/recipe/mod.rs

//! Recipe system for building packages from source
//!
//! Recipes are plain `key=value` records describing how to build one
//! package:
//!
//! ```text
//! name=nginx
//! version=1.24.0
//! source=https://nginx.org/download/nginx-1.24.0.tar.gz
//! checksum=sha256:77a2541637b92a621e3ee76776c8b7b40cf6d707e69ba53a940283e30ff2f55d
//! builddeps=openssl pcre zlib
//! rundeps=openssl pcre zlib
//! configure=./configure --prefix=/usr --with-http_ssl_module
//! build=make
//! install=make install
//! hook_install_post=nginx -t
//! ```
//!
//! # Culinary Terminology
//!
//! - **Recipe**: The build instructions (like a recipe card)
//! - **Kitchen**: The sandboxed build environment
//! - **Cook**: Build a package from a recipe

mod format;
pub mod kitchen;
pub mod parser;
mod store;

pub use format::{
    DepKind, DepSet, HookPoint, HookSpec, Recipe, Stage, Timing, validate_name,
};
pub use kitchen::{BuildArtifact, Cook, CookResult, Kitchen, KitchenConfig};
pub use parser::{parse_recipe, parse_recipe_file};
pub use store::{RECIPE_EXTENSION, RecipeSet, RecipeStore};
