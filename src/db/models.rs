// src/db/models.rs

//! Installed-state record model and its text encoding
//!
//! ```text
//! name=foo
//! version=1.2
//! essential=false
//! explicit=true
//! rundeps=bar baz
//! optdeps=foo-docs
//! provides=libfoo
//! conflicts=foo-legacy
//! hooks=install_post,remove_pre
//! hook_remove_pre=rm -f /etc/foo.d/cache
//! hook_remove_pre_critical=true
//! installed_at=2026-01-01T00:00:00+00:00
//! artifact=/var/cache/ibuild/packages/foo-1.2.tar.gz
//! %files
//! usr/bin/foo
//! usr/share/man/man1/foo.1
//! ```
//!
//! Inline hook commands are copied from the recipe at install time, so
//! removal still runs them after the recipe is gone.

use crate::error::{Error, Result};
use crate::recipe::{DepSet, HookPoint, HookSpec};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

/// Separator between the header and the file manifest
const FILES_MARKER: &str = "%files";

/// One installed package: the durable ground truth of what is on the system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    /// Refuses removal without explicit force
    pub essential: bool,
    /// Requested by the user rather than pulled in as a dependency
    pub explicit: bool,
    /// Run-time dependencies at install time
    pub run_deps: DepSet,
    /// Optional run-time extras declared at install time
    pub optional_deps: DepSet,
    /// Virtual names this package satisfies
    pub provides: DepSet,
    pub conflicts: DepSet,
    /// Hook bindings active at install time, with their inline commands
    pub hooks: BTreeMap<HookPoint, HookSpec>,
    pub installed_at: DateTime<Utc>,
    /// Archive the package was installed from
    pub artifact: Option<PathBuf>,
    /// Sorted, root-relative file manifest
    pub files: Vec<String>,
}

impl InstalledPackage {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            essential: false,
            explicit: false,
            run_deps: DepSet::new(),
            optional_deps: DepSet::new(),
            provides: DepSet::new(),
            conflicts: DepSet::new(),
            hooks: BTreeMap::new(),
            installed_at: Utc::now(),
            artifact: None,
            files: Vec::new(),
        }
    }

    /// Bound hook points as `<stage>_<timing>` names
    pub fn hook_names(&self) -> Vec<String> {
        self.hooks.keys().map(HookPoint::name).collect()
    }

    fn read_hook_line(&mut self, key: &str, value: &str) -> Result<()> {
        let name = &key["hook_".len()..];
        match name.strip_suffix("_critical") {
            Some(point) => self.hooks.entry(point.parse()?).or_default().critical = value == "true",
            None => self.hooks.entry(name.parse()?).or_default().command = Some(value.to_string()),
        }
        Ok(())
    }

    /// Encode as record text
    pub fn to_record(&self) -> String {
        let mut out = String::new();
        // writeln! into a String cannot fail
        let _ = writeln!(out, "name={}", self.name);
        let _ = writeln!(out, "version={}", self.version);
        let _ = writeln!(out, "essential={}", self.essential);
        let _ = writeln!(out, "explicit={}", self.explicit);
        let _ = writeln!(out, "rundeps={}", self.run_deps);
        let _ = writeln!(out, "optdeps={}", self.optional_deps);
        let _ = writeln!(out, "provides={}", self.provides);
        let _ = writeln!(out, "conflicts={}", self.conflicts);
        let _ = writeln!(out, "hooks={}", self.hook_names().join(","));
        for (point, spec) in &self.hooks {
            if let Some(command) = &spec.command {
                let _ = writeln!(out, "hook_{}={}", point, command);
            }
            if spec.critical {
                let _ = writeln!(out, "hook_{}_critical=true", point);
            }
        }
        let _ = writeln!(out, "installed_at={}", self.installed_at.to_rfc3339());
        if let Some(artifact) = &self.artifact {
            let _ = writeln!(out, "artifact={}", artifact.display());
        }
        out.push_str(FILES_MARKER);
        out.push('\n');
        for file in &self.files {
            out.push_str(file);
            out.push('\n');
        }
        out
    }

    /// Decode record text
    pub fn from_record(content: &str) -> Result<Self> {
        let mut pkg = InstalledPackage::new("", "");
        let mut lines = content.lines();

        for line in lines.by_ref() {
            let line = line.trim();
            if line == FILES_MARKER {
                break;
            }
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::ParseError(format!("bad state record line: {}", line)))?;
            match key {
                "name" => pkg.name = value.to_string(),
                "version" => pkg.version = value.to_string(),
                "essential" => pkg.essential = value == "true",
                "explicit" => pkg.explicit = value == "true",
                "rundeps" => pkg.run_deps = DepSet::parse(value)?,
                "optdeps" => pkg.optional_deps = DepSet::parse(value)?,
                "provides" => pkg.provides = DepSet::parse(value)?,
                "conflicts" => pkg.conflicts = DepSet::parse(value)?,
                "hooks" => {
                    for name in value.split(',').filter(|h| !h.is_empty()) {
                        pkg.hooks.entry(name.parse()?).or_default();
                    }
                }
                "installed_at" => {
                    pkg.installed_at = DateTime::parse_from_rfc3339(value)
                        .map_err(|e| Error::ParseError(format!("bad installed_at: {}", e)))?
                        .with_timezone(&Utc)
                }
                "artifact" => pkg.artifact = Some(PathBuf::from(value)),
                _ if key.starts_with("hook_") => pkg.read_hook_line(key, value)?,
                _ => {}
            }
        }

        pkg.files = lines
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        if pkg.name.is_empty() || pkg.version.is_empty() {
            return Err(Error::ParseError(
                "state record missing name or version".to_string(),
            ));
        }

        Ok(pkg)
    }
}
