// src/container/mod.rs

//! Build sandboxes
//!
//! Every build runs inside a per-package sandbox root:
//!
//! ```text
//! <sandbox_dir>/<name>-<uuid>/root/
//!     bin dev etc proc tmp usr var/tmp
//!     build/     source tree          (/build)
//!     stage/     DESTDIR              (/stage)
//!     sources/   bind of the cache    (/sources)
//! ```
//!
//! With `bwrap` isolation the root becomes `/` of a fresh PID/IPC/UTS (and,
//! unless allowed, network) namespace, with the host toolchain bound
//! read-only. With `none` isolation commands run directly on the host with
//! their working directory inside the sandbox root.
//!
//! A sandbox is destroyed exactly once: explicitly through
//! [`SandboxManager::destroy`] or by dropping its [`SandboxGuard`].
//!
//! Liveness is tracked with fs2 locks so it holds across processes: a live
//! sandbox keeps `<sandbox_dir>/<name>.lock` (one per package) and
//! `<sandbox_dir>/<name>-<uuid>/.lock` locked until it is destroyed.

use crate::config::{Config, Isolation};
use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::ops::Deref;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wait_timeout::ChildExt;

/// Directories created inside every sandbox root
const SKELETON: &[&str] = &[
    "bin", "dev", "etc", "proc", "tmp", "usr", "var/tmp", "build", "stage", "sources",
];

/// Lock file held inside every live sandbox directory
const DIR_LOCK: &str = ".lock";

/// Host toolchain bound read-only when present
const HOST_TOOLCHAIN: &[&str] = &["/usr", "/bin", "/lib", "/lib64", "/sbin"];

/// Source tree inside the sandbox
pub const BUILD_DIR: &str = "/build";
/// DESTDIR inside the sandbox
pub const STAGE_DIR: &str = "/stage";
/// Source cache inside the sandbox
pub const SOURCES_DIR: &str = "/sources";

/// Default command search path inside the sandbox
pub const SANDBOX_PATH: &str = "/usr/bin:/bin:/usr/sbin:/sbin";

/// Paths to bind-mount into the sandbox (read-only by default)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Source path on host
    pub source: PathBuf,
    /// Target path in the sandbox
    pub target: PathBuf,
    /// Whether to mount read-write
    pub writable: bool,
}

impl BindMount {
    pub fn readonly(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            writable: false,
        }
    }

    pub fn writable(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            writable: true,
        }
    }
}

/// How sandboxes are launched and limited
#[derive(Debug, Clone)]
pub struct SandboxOptions {
    pub isolation: Isolation,
    /// Launcher executable, `bwrap` on PATH when unset
    pub launcher: Option<PathBuf>,
    /// Network namespace is unshared unless this is set
    pub network: bool,
    /// Read-only binds (host toolchain plus configured extras)
    pub bind_mounts: Vec<BindMount>,
    /// Shared source cache, bound read-write at `/sources`
    pub source_cache: PathBuf,
    /// Address space limit in bytes (0 = no limit)
    pub memory_limit: u64,
    /// CPU time limit in seconds (0 = no limit)
    pub cpu_time_limit: u64,
    /// Wall-clock timeout per command
    pub timeout: Duration,
}

impl SandboxOptions {
    /// Options derived from the loaded configuration
    pub fn from_config(config: &Config) -> Self {
        let mut bind_mounts = default_bind_mounts();
        for extra in &config.sandbox.read_only_binds {
            bind_mounts.push(BindMount::readonly(extra, extra));
        }

        let mut options = Self {
            isolation: config.sandbox.isolation,
            launcher: config.sandbox.launcher.clone(),
            network: false,
            bind_mounts,
            source_cache: config.paths.source_cache.clone(),
            memory_limit: config.sandbox.memory_limit,
            cpu_time_limit: config.sandbox.cpu_time_limit,
            timeout: config.build.timeout(),
        };
        if config.sandbox.allow_network {
            options.allow_network();
        }
        options
    }

    /// Allow network access in the sandbox
    ///
    /// Adds the resolver configuration so names resolve.
    pub fn allow_network(&mut self) {
        self.network = true;
        if !self
            .bind_mounts
            .iter()
            .any(|m| m.target == Path::new("/etc/resolv.conf"))
        {
            self.bind_mounts
                .push(BindMount::readonly("/etc/resolv.conf", "/etc/resolv.conf"));
        }
    }

    /// Deny network access in the sandbox
    pub fn deny_network(&mut self) {
        self.network = false;
        self.bind_mounts
            .retain(|m| m.target != Path::new("/etc/resolv.conf"));
    }
}

/// Per-build additions layered over the manager's default options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxRequest {
    /// Give this build network access even when the default denies it
    pub allow_network: bool,
    /// Extra host paths bound read-only at the same location
    pub read_only_binds: Vec<PathBuf>,
}

impl SandboxOptions {
    /// These options with a build's request applied
    ///
    /// A request only widens access; it never takes away what the
    /// defaults allow.
    pub fn layered(&self, request: &SandboxRequest) -> SandboxOptions {
        let mut options = self.clone();
        if request.allow_network {
            options.allow_network();
        }
        for path in &request.read_only_binds {
            if !options.bind_mounts.iter().any(|m| m.target == *path) {
                options.bind_mounts.push(BindMount::readonly(path, path));
            }
        }
        options
    }
}

fn default_bind_mounts() -> Vec<BindMount> {
    HOST_TOOLCHAIN
        .iter()
        .map(|dir| BindMount::readonly(dir, dir))
        .collect()
}

/// Result of one sandboxed command
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Exit code, -1 when killed by a signal or the timeout
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == 0 && !self.timed_out
    }
}

/// A prepared sandbox
///
/// Holds the package and directory locks; both are released when the
/// handle is dropped.
#[derive(Debug)]
pub struct SandboxHandle {
    package: String,
    id: Uuid,
    dir: PathBuf,
    root: PathBuf,
    /// Effective options for this sandbox
    options: SandboxOptions,
    _package_lock: File,
    _dir_lock: File,
}

impl SandboxHandle {
    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn options(&self) -> &SandboxOptions {
        &self.options
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Host path of the sandbox root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path backing an in-sandbox path
    pub fn host_path(&self, inner: &str) -> PathBuf {
        self.root.join(inner.trim_start_matches('/'))
    }

    /// The path a sandboxed command sees for an in-sandbox path
    ///
    /// Under `none` isolation commands run on the host, so this is the
    /// host path under the root.
    pub fn visible_path(&self, inner: &str) -> PathBuf {
        match self.options.isolation {
            Isolation::Bwrap => PathBuf::from(inner),
            Isolation::None => self.host_path(inner),
        }
    }
}

/// Open (creating if needed) a lock file and try to lock it without waiting
///
/// `Ok(None)` means someone else holds it.
fn try_lock_file(path: &Path) -> std::io::Result<Option<File>> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(file)),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Creates, runs and tears down sandboxes
#[derive(Debug)]
pub struct SandboxManager {
    base_dir: PathBuf,
    options: SandboxOptions,
}

impl SandboxManager {
    pub fn new(base_dir: impl Into<PathBuf>, options: SandboxOptions) -> Self {
        Self {
            base_dir: base_dir.into(),
            options,
        }
    }

    pub fn options(&self) -> &SandboxOptions {
        &self.options
    }

    fn package_lock_path(&self, package: &str) -> PathBuf {
        self.base_dir.join(format!("{}.lock", package))
    }

    /// Whether a sandbox for `package` is live in any process
    pub fn is_live(&self, package: &str) -> bool {
        let path = self.package_lock_path(package);
        if !path.exists() {
            return false;
        }
        // Taking the lock ourselves means nobody holds it; dropping releases it
        matches!(try_lock_file(&path), Ok(None))
    }

    /// Create a sandbox root for `package` with the default options
    pub fn prepare(&self, package: &str) -> Result<SandboxHandle> {
        self.prepare_with(package, &SandboxRequest::default())
    }

    /// Create a sandbox root for `package`, layering `request` over the defaults
    pub fn prepare_with(&self, package: &str, request: &SandboxRequest) -> Result<SandboxHandle> {
        let create_failed = |reason: String| Error::SandboxCreateFailed {
            package: package.to_string(),
            reason,
        };

        fs::create_dir_all(&self.base_dir)
            .map_err(|e| create_failed(format!("cannot create {}: {}", self.base_dir.display(), e)))?;
        let package_lock = try_lock_file(&self.package_lock_path(package))
            .map_err(|e| create_failed(format!("cannot lock: {}", e)))?
            .ok_or_else(|| create_failed("a sandbox is already live".to_string()))?;

        let options = self.options.layered(request);
        let id = Uuid::new_v4();
        let dir = self.base_dir.join(format!("{}-{}", package, id));
        let root = dir.join("root");

        let setup = || -> std::io::Result<File> {
            fs::create_dir_all(&dir)?;
            let dir_lock = try_lock_file(&dir.join(DIR_LOCK))?.ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::WouldBlock, "sandbox directory is locked")
            })?;
            for entry in SKELETON {
                fs::create_dir_all(root.join(entry))?;
            }
            fs::create_dir_all(&options.source_cache)?;
            Ok(dir_lock)
        };

        let dir_lock = match setup() {
            Ok(lock) => lock,
            Err(e) => {
                let _ = fs::remove_dir_all(&dir);
                return Err(create_failed(format!(
                    "cannot create {}: {}",
                    root.display(),
                    e
                )));
            }
        };

        if options.isolation == Isolation::Bwrap && launcher_for(&options).is_none() {
            let _ = fs::remove_dir_all(&dir);
            return Err(create_failed("bwrap launcher not found".to_string()));
        }

        debug!(
            "Prepared sandbox {} for {} (network: {})",
            dir.display(),
            package,
            options.network
        );
        Ok(SandboxHandle {
            package: package.to_string(),
            id,
            dir,
            root,
            options,
            _package_lock: package_lock,
            _dir_lock: dir_lock,
        })
    }

    /// Prepare and wrap in a guard that destroys on drop
    pub fn scoped(&self, package: &str, request: &SandboxRequest) -> Result<SandboxGuard<'_>> {
        let handle = self.prepare_with(package, request)?;
        Ok(SandboxGuard {
            manager: self,
            handle: Some(handle),
        })
    }

    /// Run a shell command inside the sandbox
    ///
    /// `workdir` and any paths in `env` are in-sandbox paths as returned by
    /// [`SandboxHandle::visible_path`].
    pub fn exec(
        &self,
        handle: &SandboxHandle,
        command: &str,
        workdir: &str,
        env: &[(String, String)],
    ) -> Result<ExecOutput> {
        let options = &handle.options;
        let mut cmd = match options.isolation {
            Isolation::Bwrap => bwrap_command(handle, command, workdir, env)?,
            Isolation::None => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c")
                    .arg(command)
                    .current_dir(workdir)
                    .env_clear()
                    .env("PATH", SANDBOX_PATH)
                    .env("HOME", handle.host_path("/tmp"))
                    .env("TMPDIR", handle.host_path("/tmp"));
                for (key, value) in env {
                    cmd.env(key, value);
                }
                cmd
            }
        };

        let memory = options.memory_limit;
        let cpu = options.cpu_time_limit;
        // SAFETY: setrlimit is async-signal-safe and touches no parent state
        unsafe {
            cmd.pre_exec(move || apply_resource_limits(memory, cpu));
        }

        run_with_timeout(&mut cmd, options.timeout).map_err(|e| {
            Error::SandboxCreateFailed {
                package: handle.package.clone(),
                reason: format!("failed to launch command: {}", e),
            }
        })
    }

    /// Tear down a sandbox
    ///
    /// The locks go with the handle, after the directory is gone.
    pub fn destroy(&self, handle: SandboxHandle) -> Result<()> {
        match fs::remove_dir_all(&handle.dir) {
            Ok(()) => {
                debug!("Destroyed sandbox {}", handle.dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::IoError(format!(
                "Failed to remove sandbox {}: {}",
                handle.dir.display(),
                e
            ))),
        }
    }

    /// Remove sandbox directories left behind by crashed runs
    ///
    /// Directories whose package or directory lock is held by any process
    /// are live and skipped. Returns how many were removed.
    pub fn sweep(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            // `<package>-<uuid>`; a uuid is 36 characters
            let package = name
                .len()
                .checked_sub(37)
                .and_then(|cut| name.get(..cut))
                .unwrap_or(&name);
            if self.is_live(package) {
                debug!("Skipping live sandbox {}", path.display());
                continue;
            }
            // Held until the directory is gone
            let _dir_lock = match try_lock_file(&path.join(DIR_LOCK)) {
                Ok(Some(lock)) => lock,
                Ok(None) => {
                    debug!("Skipping locked sandbox {}", path.display());
                    continue;
                }
                Err(e) => {
                    warn!("Cannot lock {}: {}", path.display(), e);
                    continue;
                }
            };
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!("Removed orphaned sandbox {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }
}

/// Scoped sandbox acquisition
///
/// Dereferences to the handle; dropping destroys the sandbox.
pub struct SandboxGuard<'a> {
    manager: &'a SandboxManager,
    handle: Option<SandboxHandle>,
}

impl SandboxGuard<'_> {
    pub fn exec(
        &self,
        command: &str,
        workdir: &str,
        env: &[(String, String)],
    ) -> Result<ExecOutput> {
        self.manager.exec(self, command, workdir, env)
    }

    /// Destroy now, surfacing teardown errors
    pub fn destroy(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => self.manager.destroy(handle),
            None => Ok(()),
        }
    }
}

impl Deref for SandboxGuard<'_> {
    type Target = SandboxHandle;

    fn deref(&self) -> &SandboxHandle {
        // Only `destroy` and `drop` take the handle, and both consume the guard
        self.handle
            .as_ref()
            .unwrap_or_else(|| unreachable!("sandbox guard used after destroy"))
    }
}

impl Drop for SandboxGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let package = handle.package.clone();
            if let Err(e) = self.manager.destroy(handle) {
                warn!("Sandbox teardown for {} failed: {}", package, e);
            }
        }
    }
}

fn launcher_for(options: &SandboxOptions) -> Option<PathBuf> {
    match &options.launcher {
        Some(path) => Some(path.clone()),
        None => which::which("bwrap").ok(),
    }
}

fn bwrap_command(
    handle: &SandboxHandle,
    command: &str,
    workdir: &str,
    env: &[(String, String)],
) -> Result<Command> {
    let launcher = launcher_for(&handle.options).ok_or_else(|| Error::SandboxCreateFailed {
        package: handle.package.clone(),
        reason: "bwrap launcher not found".to_string(),
    })?;

    let mut cmd = Command::new(launcher);
    cmd.args(bwrap_args(&handle.options, handle.root(), workdir, env));
    cmd.arg("--").arg("/bin/sh").arg("-c").arg(command);
    Ok(cmd)
}

/// Arguments passed to bwrap ahead of the command
fn bwrap_args(
    options: &SandboxOptions,
    root: &Path,
    workdir: &str,
    env: &[(String, String)],
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--bind".into(),
        root.display().to_string(),
        "/".into(),
        "--dev".into(),
        "/dev".into(),
        "--proc".into(),
        "/proc".into(),
    ];

    for mount in &options.bind_mounts {
        if !mount.source.exists() {
            continue;
        }
        args.push(if mount.writable { "--bind" } else { "--ro-bind" }.into());
        args.push(mount.source.display().to_string());
        args.push(mount.target.display().to_string());
    }

    args.extend([
        "--bind".into(),
        options.source_cache.display().to_string(),
        SOURCES_DIR.into(),
        "--unshare-pid".into(),
        "--unshare-ipc".into(),
        "--unshare-uts".into(),
    ]);
    if !options.network {
        args.push("--unshare-net".into());
    }

    args.extend(["--die-with-parent".into(), "--clearenv".into()]);
    for (key, value) in [("PATH", SANDBOX_PATH), ("HOME", "/tmp"), ("TMPDIR", "/tmp")] {
        args.extend(["--setenv".into(), key.into(), value.into()]);
    }
    for (key, value) in env {
        args.extend(["--setenv".into(), key.clone(), value.clone()]);
    }
    args.extend(["--chdir".into(), workdir.into()]);
    args
}

fn apply_resource_limits(memory: u64, cpu: u64) -> std::io::Result<()> {
    use nix::sys::resource::{Resource, setrlimit};

    if memory > 0 {
        setrlimit(Resource::RLIMIT_AS, memory, memory)?;
    }
    if cpu > 0 {
        setrlimit(Resource::RLIMIT_CPU, cpu, cpu)?;
    }
    Ok(())
}

/// Spawn with stdin closed and output captured, killing after `timeout`
///
/// Output goes to anonymous temp files so a chatty build cannot fill a pipe
/// and stall the wait.
pub(crate) fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> std::io::Result<ExecOutput> {
    let mut stdout_file = tempfile::tempfile()?;
    let mut stderr_file = tempfile::tempfile()?;

    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(stdout_file.try_clone()?))
        .stderr(Stdio::from(stderr_file.try_clone()?));

    let mut child = cmd.spawn()?;
    let (code, timed_out) = match child.wait_timeout(timeout)? {
        Some(status) => (status.code().unwrap_or(-1), false),
        None => {
            let _ = child.kill();
            let _ = child.wait();
            (-1, true)
        }
    };

    Ok(ExecOutput {
        code,
        stdout: read_back(&mut stdout_file)?,
        stderr: read_back(&mut stderr_file)?,
        timed_out,
    })
}

fn read_back(file: &mut File) -> std::io::Result<String> {
    let mut buf = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
