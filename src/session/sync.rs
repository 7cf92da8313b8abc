//! Editor state synchronization via rsync over SSH.
//!
//! Two trees are mirrored: the editor's user settings and its extensions.
//! At session start they are pushed to the remote, at session end (when asked
//! for) they are pulled back. Direction only swaps source and destination;
//! every other rsync argument is the same both ways.
//!
//! # Safety
//!
//! Unlike an additive backup sync, this one runs with `--delete` and
//! `--copy-unsafe-links`: an extension removed on one side is removed on the
//! other without needing the editor running there to clean it up.
//!
//! Failed syncs are never retried.

use std::path::{Path, PathBuf};
use std::time::Instant;

use super::command::{CommandSpec, CommandRunner, OutputMode, StdinSource};
use super::transport::Transport;
use crate::error::SessionError;

/// Settings subdirectories that are volatile or machine-local.
pub const SETTINGS_EXCLUDES: &[&str] = &["workspaceStorage", "logs", "CachedData"];

/// Remote settings directory, relative to the remote home.
pub const REMOTE_SETTINGS_DIR: &str = ".local/share/code-server/User/";

/// Remote extensions directory, relative to the remote home.
pub const REMOTE_EXTENSIONS_DIR: &str = ".local/share/code-server/extensions/";

/// Which tree a sync task mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTarget {
    Settings,
    Extensions,
}

impl std::fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Settings => write!(f, "settings"),
            Self::Extensions => write!(f, "extensions"),
        }
    }
}

/// Local to remote, or back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    Push,
    Pull,
}

impl SyncDirection {
    pub fn reversed(self) -> Self {
        match self {
            Self::Push => Self::Pull,
            Self::Pull => Self::Push,
        }
    }
}

/// One rsync run over one tree in one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTask {
    pub target: SyncTarget,
    pub local_dir: PathBuf,
    pub remote_dir: String,
    pub excludes: Vec<String>,
    pub direction: SyncDirection,
}

impl SyncTask {
    /// The settings tree, without its volatile subdirectories.
    pub fn settings(local_dir: impl Into<PathBuf>, direction: SyncDirection) -> Self {
        Self {
            target: SyncTarget::Settings,
            local_dir: local_dir.into(),
            remote_dir: REMOTE_SETTINGS_DIR.to_string(),
            excludes: SETTINGS_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            direction,
        }
    }

    /// The extensions tree, mirrored whole.
    pub fn extensions(local_dir: impl Into<PathBuf>, direction: SyncDirection) -> Self {
        Self {
            target: SyncTarget::Extensions,
            local_dir: local_dir.into(),
            remote_dir: REMOTE_EXTENSIONS_DIR.to_string(),
            excludes: Vec::new(),
            direction,
        }
    }

    /// A new task over the same tree going the other way.
    pub fn reversed(&self) -> Self {
        Self {
            direction: self.direction.reversed(),
            ..self.clone()
        }
    }

    /// `(source, destination)` as rsync sees them.
    ///
    /// Both end in `/` so rsync copies directory contents, which keeps the
    /// swap symmetric.
    pub fn endpoints(&self, host: &str) -> (String, String) {
        let local = with_trailing_slash(&self.local_dir.to_string_lossy());
        let remote = format!("{}:{}", host, with_trailing_slash(&self.remote_dir));
        match self.direction {
            SyncDirection::Push => (local, remote),
            SyncDirection::Pull => (remote, local),
        }
    }
}

fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Builds and runs rsync invocations.
#[derive(Debug, Clone)]
pub struct Synchronizer {
    program: String,
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self {
            program: "rsync".to_string(),
        }
    }
}

impl Synchronizer {
    /// Full rsync argv for `task`.
    pub fn args(&self, task: &SyncTask, transport: &Transport) -> Vec<String> {
        let (src, dest) = task.endpoints(transport.host());
        let mut args: Vec<String> = task
            .excludes
            .iter()
            .map(|path| format!("--exclude={path}"))
            .collect();
        args.extend([
            "-azvr".to_string(),
            "-e".to_string(),
            transport.rsync_shell(),
            // Only update newer files and keep times in sync.
            "-u".to_string(),
            "--times".to_string(),
            "--delete".to_string(),
            "--copy-unsafe-links".to_string(),
            src,
            dest,
        ]);
        args
    }

    pub fn command(&self, task: &SyncTask, transport: &Transport) -> CommandSpec {
        CommandSpec::new(&self.program)
            .args(self.args(task, transport))
            .stdin(StdinSource::Null)
            .stdout(OutputMode::Inherit)
            .stderr(OutputMode::Inherit)
    }

    /// Run `task` to completion.
    pub async fn sync(
        &self,
        runner: &dyn CommandRunner,
        transport: &Transport,
        task: &SyncTask,
    ) -> Result<(), SessionError> {
        let start = Instant::now();
        let fail = |source: std::io::Error| SessionError::SyncFailed {
            task: task.target,
            source,
        };

        if task.direction == SyncDirection::Pull {
            ensure_dir(&task.local_dir).map_err(fail)?;
        }

        let spec = self.command(task, transport);
        let (src, dest) = task.endpoints(transport.host());
        tracing::info!(target_tree = %task.target, direction = ?task.direction, "syncing {}", task.target);
        tracing::debug!(command = %spec.display(), "rsync command");

        let info = runner.run(&spec).await.map_err(fail)?;
        if !info.success() {
            return Err(fail(std::io::Error::other(format!(
                "{} '{}' to '{}' failed ({})",
                self.program,
                src,
                dest,
                info.describe()
            ))));
        }

        tracing::info!(
            target_tree = %task.target,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "synced {} in {:.1?}",
            task.target,
            start.elapsed()
        );
        Ok(())
    }
}

fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(path)
}
