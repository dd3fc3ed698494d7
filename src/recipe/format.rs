// src/recipe/format.rs

//! Recipe record definitions
//!
//! A recipe is parsed once into an immutable [`Recipe`]; nothing downstream
//! reads package variables from anywhere else.

use crate::error::{Error, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

/// Pattern every package and dependency name must match
const NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9+._-]*$";

static NAME_RE: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(NAME_PATTERN));

/// Validate a package or dependency name
pub fn validate_name(name: &str) -> Result<()> {
    let re = NAME_RE
        .as_ref()
        .map_err(|e| Error::ParseError(format!("name pattern: {}", e)))?;
    if re.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

/// A set of validated dependency names, kept sorted for deterministic traversal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepSet(BTreeSet<String>);

impl DepSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma and/or whitespace separated list of names
    ///
    /// Empty items produced by doubled separators are skipped; anything else
    /// that is not a valid name is rejected.
    pub fn parse(list: &str) -> Result<Self> {
        let mut set = BTreeSet::new();
        for item in list.split(|c: char| c == ',' || c.is_whitespace()) {
            if item.is_empty() {
                continue;
            }
            validate_name(item)?;
            set.insert(item.to_string());
        }
        Ok(Self(set))
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.0.insert(name.into());
    }

    pub fn extend(&mut self, other: &DepSet) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for DepSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().collect();
        write!(f, "{}", names.join(" "))
    }
}

/// Which dependency edges a resolution follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepKind {
    Build,
    Run,
    Both,
}

impl DepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepKind::Build => "build",
            DepKind::Run => "run",
            DepKind::Both => "both",
        }
    }
}

impl FromStr for DepKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "build" => Ok(DepKind::Build),
            "run" => Ok(DepKind::Run),
            "both" | "all" => Ok(DepKind::Both),
            other => Err(Error::ParseError(format!("Unknown dependency kind: {}", other))),
        }
    }
}

/// Lifecycle stage a hook is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Fetch,
    Patch,
    Configure,
    Build,
    /// Install into the stage root inside the sandbox
    Stage,
    Package,
    /// Install onto the host root
    Install,
    Remove,
}

impl Stage {
    /// Pipeline stages in execution order
    pub const PIPELINE: [Stage; 6] = [
        Stage::Fetch,
        Stage::Patch,
        Stage::Configure,
        Stage::Build,
        Stage::Stage,
        Stage::Package,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Patch => "patch",
            Stage::Configure => "configure",
            Stage::Build => "build",
            Stage::Stage => "stage",
            Stage::Package => "package",
            Stage::Install => "install",
            Stage::Remove => "remove",
        }
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fetch" => Ok(Stage::Fetch),
            "patch" => Ok(Stage::Patch),
            "configure" => Ok(Stage::Configure),
            "build" => Ok(Stage::Build),
            "stage" => Ok(Stage::Stage),
            "package" => Ok(Stage::Package),
            "install" => Ok(Stage::Install),
            "remove" => Ok(Stage::Remove),
            other => Err(Error::ParseError(format!("Unknown hook stage: {}", other))),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a hook runs before or after its stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Timing {
    Pre,
    Post,
}

impl Timing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timing::Pre => "pre",
            Timing::Post => "post",
        }
    }
}

impl FromStr for Timing {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pre" => Ok(Timing::Pre),
            "post" => Ok(Timing::Post),
            other => Err(Error::ParseError(format!("Unknown hook timing: {}", other))),
        }
    }
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hook binding key, rendered as `<stage>_<timing>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HookPoint {
    pub stage: Stage,
    pub timing: Timing,
}

impl HookPoint {
    pub fn new(stage: Stage, timing: Timing) -> Self {
        Self { stage, timing }
    }

    /// Name used for global/local script files and the hook log
    pub fn name(&self) -> String {
        format!("{}_{}", self.stage, self.timing)
    }
}

impl FromStr for HookPoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (stage, timing) = s
            .split_once('_')
            .ok_or_else(|| Error::ParseError(format!("Invalid hook name: {}", s)))?;
        Ok(Self::new(stage.parse()?, timing.parse()?))
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.stage, self.timing)
    }
}

/// Inline hook declared in a recipe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookSpec {
    /// Inline command (`hook_<stage>_<timing>=...`)
    pub command: Option<String>,
    /// Failure aborts the surrounding step (`hook_<stage>_<timing>_critical=true`)
    pub critical: bool,
}

/// A complete, immutable package recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    pub name: String,
    pub version: String,
    /// Source location (URL or local path)
    pub source: String,
    /// Integrity digest, normalized to `sha256:<hex>`
    pub checksum: Option<String>,
    pub configure: Option<String>,
    pub build: Option<String>,
    pub install: Option<String>,
    /// Test command, failures only warn
    pub check: Option<String>,
    pub build_deps: DepSet,
    pub run_deps: DepSet,
    /// Run-time extras: recorded and reported, never pulled in
    pub optional_deps: DepSet,
    /// Virtual names this package satisfies
    pub provides: DepSet,
    /// Packages (or virtual names) that cannot be installed alongside
    pub conflicts: DepSet,
    /// Explicit ordered patch list; `None` means scan the patch directory
    pub patches: Option<Vec<String>>,
    pub essential: bool,
    /// Build needs the network (`network=true`)
    pub network: bool,
    /// Extra host paths bound read-only into the build sandbox
    pub ro_binds: Vec<PathBuf>,
    pub hooks: BTreeMap<HookPoint, HookSpec>,
    pub description: Option<String>,
    pub category: Option<String>,
    /// Directory holding the recipe, its `patches/` and `hooks/`
    pub package_dir: Option<PathBuf>,
    /// Raw record text, copied verbatim next to built artifacts
    pub raw: String,
}

impl Recipe {
    /// Recipe with only the required fields set
    pub fn new(name: &str, version: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            source: source.to_string(),
            checksum: None,
            configure: None,
            build: None,
            install: None,
            check: None,
            build_deps: DepSet::new(),
            run_deps: DepSet::new(),
            optional_deps: DepSet::new(),
            provides: DepSet::new(),
            conflicts: DepSet::new(),
            patches: None,
            essential: false,
            network: false,
            ro_binds: Vec::new(),
            hooks: BTreeMap::new(),
            description: None,
            category: None,
            package_dir: None,
            raw: String::new(),
        }
    }

    /// `<name>-<version>`, the stem of every artifact file
    pub fn pkg_id(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// Dependencies of the requested kind
    pub fn deps(&self, kind: DepKind) -> DepSet {
        match kind {
            DepKind::Build => self.build_deps.clone(),
            DepKind::Run => self.run_deps.clone(),
            DepKind::Both => {
                let mut all = self.build_deps.clone();
                all.extend(&self.run_deps);
                all
            }
        }
    }

    /// Whether the recipe declares any of configure/build/install
    pub fn has_build_commands(&self) -> bool {
        self.configure.is_some() || self.build.is_some() || self.install.is_some()
    }

    /// Command for a pipeline stage, applying conventional defaults
    ///
    /// Defaults only apply when none of the three stage commands is declared.
    pub fn stage_command(&self, stage: Stage) -> Option<String> {
        if !self.has_build_commands() {
            return match stage {
                Stage::Configure => {
                    Some("if [ -x ./configure ]; then ./configure --prefix=/usr; fi".to_string())
                }
                Stage::Build => Some("make".to_string()),
                Stage::Stage => Some("make install".to_string()),
                _ => None,
            };
        }

        match stage {
            Stage::Configure => self.configure.clone(),
            Stage::Build => self.build.clone(),
            Stage::Stage => self.install.clone(),
            _ => None,
        }
    }

    pub fn hook(&self, point: HookPoint) -> Option<&HookSpec> {
        self.hooks.get(&point)
    }
}
