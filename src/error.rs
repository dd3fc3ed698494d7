// src/error.rs

use thiserror::Error;

/// Core error types for ibuild
#[derive(Error, Debug)]
pub enum Error {
    /// No recipe exists for a package that must be built or resolved
    #[error("Recipe not found: {0}")]
    RecipeNotFound(String),

    /// Dependency cycle, reported as the full closed path
    #[error("Dependency cycle detected: {}", .path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    /// Source digest did not match the declared one
    #[error("{package}: integrity mismatch (expected {expected}, got {actual})")]
    IntegrityMismatch {
        package: String,
        expected: String,
        actual: String,
    },

    /// A patch failed to apply
    #[error("{package}: patch {patch} failed to apply: {reason}")]
    PatchFailed {
        package: String,
        patch: String,
        reason: String,
    },

    /// A pipeline command exited non-zero
    #[error("{package}: {stage} stage failed with exit code {code}")]
    BuildCommandFailed {
        package: String,
        stage: String,
        code: i32,
    },

    /// The sandbox root could not be created or launched
    #[error("{package}: failed to create sandbox: {reason}")]
    SandboxCreateFailed { package: String, reason: String },

    /// Two packages that declare a conflict would end up installed together
    #[error("{package} conflicts with {conflicts_with}")]
    Conflict {
        package: String,
        conflicts_with: String,
    },

    /// No kept snapshot exists for a transaction
    #[error("Transaction {0} has no kept snapshot to roll back to")]
    NoSnapshot(u64),

    /// Removal refused because installed packages still depend on the target
    #[error("Cannot remove {package}: required by {}", .dependents.join(", "))]
    UnsafeRemoval {
        package: String,
        dependents: Vec<String>,
    },

    /// Rollback could not restore prior state; manual intervention required
    #[error(
        "Rollback of transaction {transaction} failed for {}: {reason} \
         (system state is inconsistent, manual intervention required)",
        .packages.join(", ")
    )]
    RollbackFailed {
        transaction: u64,
        /// Every package that could not be restored
        packages: Vec<String>,
        reason: String,
    },

    /// A hook flagged critical failed
    #[error("{package}: critical hook {hook} ({source_name}) failed: {reason}")]
    HookFailed {
        package: String,
        hook: String,
        source_name: String,
        reason: String,
    },

    /// Essential packages need an explicit force to be removed
    #[error("Refusing to remove essential package {0} without --force")]
    EssentialPackage(String),

    /// Package has no installed-state record
    #[error("Package not installed: {0}")]
    NotInstalled(String),

    /// Advisory lock could not be acquired
    #[error("Lock error: {0}")]
    LockError(String),

    /// Malformed metadata or state record
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Dependency or package name failed validation
    #[error("Invalid package name: {0:?}")]
    InvalidName(String),

    /// Path escapes its root
    #[error("Path traversal attempt: {0}")]
    PathTraversal(String),

    /// Invalid path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Source download failed
    #[error("Download error: {0}")]
    DownloadError(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O failure with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using ibuild's Error type
pub type Result<T> = std::result::Result<T, Error>;
