// src/transaction/planner.rs

//! Transaction planning
//!
//! The planner decides what a batch will do before any filesystem change:
//! which packages need a build, which are installed fresh, which are
//! upgraded and which are already current. Dry runs print the plan and stop.

use crate::version::compare_versions;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Where a requested package stands against its recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeClass {
    /// Not installed
    NeedsInstall,
    /// Installed at an older version
    NeedsUpgrade { from: String },
    /// Installed at the recipe version, or newer
    UpToDate { installed: String },
}

/// Classify one package by ordered version comparison
pub fn classify(installed: Option<&str>, recipe_version: &str) -> UpgradeClass {
    match installed {
        None => UpgradeClass::NeedsInstall,
        Some(current) => match compare_versions(current, recipe_version) {
            Ordering::Less => UpgradeClass::NeedsUpgrade {
                from: current.to_string(),
            },
            Ordering::Equal | Ordering::Greater => UpgradeClass::UpToDate {
                installed: current.to_string(),
            },
        },
    }
}

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlannedAction {
    /// Run the build pipeline
    Build { package: String, version: String },
    /// Install a package that is not present
    Install { package: String, version: String },
    /// Replace an installed version
    Upgrade {
        package: String,
        from: String,
        to: String,
    },
    /// Remove an installed package
    Remove { package: String, version: String },
    /// Nothing to do
    Skip { package: String, reason: String },
}

impl PlannedAction {
    pub fn package(&self) -> &str {
        match self {
            Self::Build { package, .. }
            | Self::Install { package, .. }
            | Self::Upgrade { package, .. }
            | Self::Remove { package, .. }
            | Self::Skip { package, .. } => package,
        }
    }

    /// Whether executing this step changes anything
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Skip { .. })
    }
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build { package, version } => write!(f, "build    {}-{}", package, version),
            Self::Install { package, version } => write!(f, "install  {}-{}", package, version),
            Self::Upgrade { package, from, to } => {
                write!(f, "upgrade  {} {} -> {}", package, from, to)
            }
            Self::Remove { package, version } => write!(f, "remove   {}-{}", package, version),
            Self::Skip { package, reason } => write!(f, "skip     {} ({})", package, reason),
        }
    }
}

/// Ordered list of actions for one operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<PlannedAction>,
    /// `(package, optional dependency)` pairs left uninstalled
    pub optional: Vec<(String, String)>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: PlannedAction) {
        self.actions.push(action);
    }

    pub fn note_optional(&mut self, package: &str, dependency: &str) {
        self.optional
            .push((package.to_string(), dependency.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// True when every action is a skip
    pub fn is_noop(&self) -> bool {
        !self.actions.iter().any(PlannedAction::is_change)
    }

    /// Packages with a change, in plan order and without repeats
    pub fn changed_packages(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for action in self.actions.iter().filter(|a| a.is_change()) {
            if !seen.iter().any(|p: &String| p == action.package()) {
                seen.push(action.package().to_string());
            }
        }
        seen
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for action in &self.actions {
            writeln!(f, "{}", action)?;
        }
        for (package, dependency) in &self.optional {
            writeln!(f, "optional {} for {}", dependency, package)?;
        }
        Ok(())
    }
}
