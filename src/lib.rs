// src/lib.rs

//! ibuild: source/binary package manager
//!
//! Builds packages from declarative recipes inside an isolated sandbox,
//! packages the result, and installs, upgrades or removes it on a system
//! root with transactional rollback.
//!
//! # Architecture
//!
//! - Recipes: immutable `key=value` records read fresh from the recipe store
//! - Resolver: depth-first topological ordering with full cycle paths
//! - Kitchen: the staged build pipeline, one sandbox per package, hooks
//!   around every stage
//! - Transactions: snapshot, apply, and reverse-order rollback; per-package
//!   advisory locks and a CRC-checked journal
//! - State: one installed-state record per package, the ground truth of
//!   what is on the system

pub mod config;
pub mod container;
pub mod db;
mod error;
pub mod filesystem;
pub mod hooks;
pub mod recipe;
pub mod resolver;
pub mod transaction;
pub mod version;

pub use config::Config;
pub use error::{Error, Result};
pub use recipe::{BuildArtifact, Cook, CookResult, Kitchen, KitchenConfig, Recipe, RecipeStore};
pub use resolver::{DependencyGraph, Resolver};
pub use transaction::{InstallOptions, Plan, RemoveOptions, TransactionManager};
