// src/recipe/parser.rs

//! Parser for `key=value` recipe records

use super::format::{validate_name, DepSet, HookPoint, HookSpec, Recipe};
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Parse a recipe from record text
pub fn parse_recipe(content: &str) -> Result<Recipe> {
    let mut name = None;
    let mut version = None;
    let mut source = None;
    let mut recipe = Recipe::new("", "", "");

    for (idx, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| {
            Error::ParseError(format!("line {}: expected key=value, got {:?}", idx + 1, line))
        })?;
        let key = key.trim();
        let value = value.trim();

        match key {
            "name" => name = Some(value.to_string()),
            "version" => version = Some(value.to_string()),
            "source" => source = Some(value.to_string()),
            "checksum" | "digest" | "sha256" => {
                recipe.checksum = if value.is_empty() {
                    None
                } else {
                    Some(normalize_checksum(value)?)
                }
            }
            "configure" => recipe.configure = non_empty(value),
            "build" => recipe.build = non_empty(value),
            "install" => recipe.install = non_empty(value),
            "check" => recipe.check = non_empty(value),
            "builddeps" | "makedepends" => recipe.build_deps.extend(&DepSet::parse(value)?),
            "rundeps" => recipe.run_deps.extend(&DepSet::parse(value)?),
            "depends" => {
                let deps = DepSet::parse(value)?;
                recipe.build_deps.extend(&deps);
                recipe.run_deps.extend(&deps);
            }
            "patches" => {
                recipe.patches = Some(
                    value
                        .split(|c: char| c == ',' || c.is_whitespace())
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect(),
                )
            }
            "optdeps" | "optdepends" => recipe.optional_deps.extend(&DepSet::parse(value)?),
            "provides" => recipe.provides.extend(&DepSet::parse(value)?),
            "conflicts" => recipe.conflicts.extend(&DepSet::parse(value)?),
            "essential" => recipe.essential = parse_bool(value),
            "network" => recipe.network = parse_bool(value),
            "ro_binds" => recipe.ro_binds = parse_binds(value)?,
            "description" => recipe.description = non_empty(value),
            "category" => recipe.category = non_empty(value),
            _ => {
                if let Some(hook) = key.strip_prefix("hook_") {
                    parse_hook_key(&mut recipe, hook, value)?;
                } else {
                    debug!("Ignoring unknown recipe key: {}", key);
                }
            }
        }
    }

    let name = name.ok_or_else(|| Error::ParseError("missing required key: name".to_string()))?;
    let version =
        version.ok_or_else(|| Error::ParseError("missing required key: version".to_string()))?;
    let source =
        source.ok_or_else(|| Error::ParseError("missing required key: source".to_string()))?;

    validate_name(&name)?;
    if version.is_empty() {
        return Err(Error::ParseError(format!("{}: empty version", name)));
    }
    recipe.name = name;
    recipe.version = version;
    recipe.source = source;
    recipe.raw = content.to_string();
    Ok(recipe)
}

/// Parse a recipe file, remembering its package directory
pub fn parse_recipe_file(path: &Path) -> Result<Recipe> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::IoError(format!("Failed to read {}: {}", path.display(), e)))?;
    let mut recipe = parse_recipe(&content)
        .map_err(|e| Error::ParseError(format!("{}: {}", path.display(), e)))?;
    recipe.package_dir = path.parent().map(Path::to_path_buf);
    Ok(recipe)
}

/// `hook_<stage>_<timing>` or `hook_<stage>_<timing>_critical`
fn parse_hook_key(recipe: &mut Recipe, hook: &str, value: &str) -> Result<()> {
    if let Some(point) = hook.strip_suffix("_critical") {
        let point: HookPoint = point.parse()?;
        recipe.hooks.entry(point).or_default().critical = parse_bool(value);
        return Ok(());
    }

    let point: HookPoint = hook.parse()?;
    let spec = recipe.hooks.entry(point).or_insert_with(HookSpec::default);
    spec.command = non_empty(value);
    Ok(())
}

/// Whitespace separated absolute host paths
fn parse_binds(value: &str) -> Result<Vec<PathBuf>> {
    value
        .split_whitespace()
        .map(|p| {
            let path = PathBuf::from(p);
            if path.is_absolute() {
                Ok(path)
            } else {
                Err(Error::ParseError(format!("ro_binds: not an absolute path: {}", p)))
            }
        })
        .collect()
}

/// Accept `sha256:<hex>` or a bare 64-digit hex digest
fn normalize_checksum(value: &str) -> Result<String> {
    let (algo, hex) = match value.split_once(':') {
        Some((a, h)) => (a.to_ascii_lowercase(), h),
        None => ("sha256".to_string(), value),
    };

    if algo != "sha256" {
        return Err(Error::ParseError(format!(
            "Unsupported checksum algorithm: {} (supported: sha256)",
            algo
        )));
    }
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::ParseError(format!("Malformed sha256 digest: {}", hex)));
    }

    Ok(format!("sha256:{}", hex.to_ascii_lowercase()))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::format::{Stage, Timing};

    #[test]
    fn test_parse_minimal() {
        let recipe = parse_recipe("name=foo\nversion=1.2\nsource=foo-1.2.tar.gz\n").unwrap();
        assert_eq!(recipe.name, "foo");
        assert_eq!(recipe.version, "1.2");
        assert_eq!(recipe.source, "foo-1.2.tar.gz");
        assert!(recipe.build_deps.is_empty());
        assert!(recipe.checksum.is_none());
    }

    #[test]
    fn test_parse_full_record() {
        let content = "\
# sample
name = foo
version = 1.2
source = https://example.com/foo-1.2.tar.gz
checksum = sha256:E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855
builddeps = bar, baz
rundeps = baz
build = make all
install = make DESTDIR=$DESTDIR install
essential = yes
hook_build_pre = echo before
hook_build_pre_critical = true
hook_install_post = ldconfig
patches = 02-fix.patch 01-first.patch
";
        let recipe = parse_recipe(content).unwrap();
        assert_eq!(
            recipe.checksum.as_deref(),
            Some("sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
        );
        assert_eq!(recipe.build_deps.to_string(), "bar baz");
        assert_eq!(recipe.run_deps.to_string(), "baz");
        assert!(recipe.essential);

        let pre = recipe
            .hook(HookPoint::new(Stage::Build, Timing::Pre))
            .unwrap();
        assert_eq!(pre.command.as_deref(), Some("echo before"));
        assert!(pre.critical);

        let post = recipe
            .hook(HookPoint::new(Stage::Install, Timing::Post))
            .unwrap();
        assert!(!post.critical);

        assert_eq!(
            recipe.patches,
            Some(vec!["02-fix.patch".to_string(), "01-first.patch".to_string()])
        );
        assert_eq!(recipe.raw, content);
    }

    #[test]
    fn test_depends_feeds_both_kinds() {
        let recipe = parse_recipe("name=x\nversion=1\nsource=x.tgz\ndepends=y\n").unwrap();
        assert!(recipe.build_deps.contains("y"));
        assert!(recipe.run_deps.contains("y"));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let recipe =
            parse_recipe("name=foo\nversion=1\nsource=s\nmaintainer=someone\nurl=x\n").unwrap();
        assert_eq!(recipe.name, "foo");
    }

    #[test]
    fn test_missing_required_key() {
        let err = parse_recipe("name=foo\nsource=s\n").unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_line_without_equals() {
        let err = parse_recipe("name=foo\nversion 1\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_malformed_dependency_rejected() {
        let result = parse_recipe("name=foo\nversion=1\nsource=s\nbuilddeps=bar,$baz\n");
        assert!(matches!(result, Err(Error::InvalidName(_))));
    }

    #[test]
    fn test_bad_checksum_rejected() {
        assert!(parse_recipe("name=foo\nversion=1\nsource=s\nchecksum=md5:abc\n").is_err());
        assert!(parse_recipe("name=foo\nversion=1\nsource=s\nchecksum=sha256:xyz\n").is_err());
    }

    #[test]
    fn test_unknown_hook_stage_rejected() {
        assert!(parse_recipe("name=foo\nversion=1\nsource=s\nhook_compile_pre=true\n").is_err());
    }

    #[test]
    fn test_later_key_wins() {
        let recipe = parse_recipe("name=foo\nversion=1\nversion=2\nsource=s\n").unwrap();
        assert_eq!(recipe.version, "2");
    }

    #[test]
    fn test_relationship_and_sandbox_keys() {
        let recipe = parse_recipe(
            "name=openssl\nversion=3\nsource=s\nprovides=libssl libcrypto\n\
             conflicts=libressl\noptdeps=ca-certificates\nnetwork=true\n\
             ro_binds=/opt/toolchain /srv/mirror\n",
        )
        .unwrap();
        assert_eq!(recipe.provides.to_string(), "libcrypto libssl");
        assert!(recipe.conflicts.contains("libressl"));
        assert!(recipe.optional_deps.contains("ca-certificates"));
        assert!(!recipe.run_deps.contains("ca-certificates"));
        assert!(recipe.network);
        assert_eq!(
            recipe.ro_binds,
            vec![PathBuf::from("/opt/toolchain"), PathBuf::from("/srv/mirror")]
        );
    }

    #[test]
    fn test_relative_bind_rejected() {
        assert!(parse_recipe("name=foo\nversion=1\nsource=s\nro_binds=opt/x\n").is_err());
    }
}
