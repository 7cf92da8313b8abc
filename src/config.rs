//! Session configuration.
//!
//! Values are layered: command-line flags win over environment variables,
//! which win over the optional config file, which wins over built-in defaults.
//! The file lives at `~/.config/codetunnel/config.toml` (platform equivalent)
//! unless `CODETUNNEL_CONFIG` points elsewhere:
//!
//! ```toml
//! ssh_flags = "-p 2222"
//! sync_back = true
//! ready_timeout_secs = 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::SessionError;
use crate::session::ports::DEFAULT_REMOTE_PORT_TIMEOUT;
use crate::session::readiness::DEFAULT_READY_TIMEOUT;
use crate::session::updater::{DEFAULT_DOWNLOAD_URL, DEFAULT_HELPER_PATH};

/// Overrides the local editor settings directory.
pub const SETTINGS_DIR_ENV: &str = "VSCODE_CONFIG_DIR";

/// Overrides the local editor extensions directory.
pub const EXTENSIONS_DIR_ENV: &str = "VSCODE_EXTENSIONS_DIR";

/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "CODETUNNEL_CONFIG";

/// Set when a graphical display is available.
pub const DISPLAY_ENV: &str = "DISPLAY";

/// Default wait for the tunnel to exit after an interrupt.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Everything a session needs, fixed before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Host argument handed to ssh.
    pub host: String,
    /// Directory on the remote to start the helper in.
    pub work_dir: String,
    /// Extra ssh flags, as typed by the user.
    pub ssh_flags: String,
    pub skip_sync: bool,
    pub sync_back: bool,
    /// Pinned local port; not checked for availability.
    pub local_port: Option<u16>,
    /// Pinned remote port; not checked for availability.
    pub remote_port: Option<u16>,
    /// Whether to open a browser once the helper is ready.
    pub open_client: bool,
    pub ready_timeout: Duration,
    pub remote_port_timeout: Duration,
    pub shutdown_grace: Duration,
    pub helper_path: String,
    pub download_url: String,
    pub settings_dir: PathBuf,
    pub extensions_dir: PathBuf,
}

impl SessionConfig {
    /// Defaults for `host`; `work_dir` falls back to the remote home.
    pub fn new(host: impl Into<String>, work_dir: Option<String>, editor: EditorDirs) -> Self {
        Self {
            host: host.into(),
            work_dir: work_dir
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| "~".to_string()),
            ssh_flags: String::new(),
            skip_sync: false,
            sync_back: false,
            local_port: None,
            remote_port: None,
            open_client: false,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            remote_port_timeout: DEFAULT_REMOTE_PORT_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            helper_path: DEFAULT_HELPER_PATH.to_string(),
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            settings_dir: editor.settings_dir,
            extensions_dir: editor.extensions_dir,
        }
    }

    /// Apply values from the config file.
    pub fn apply_file(&mut self, file: &FileConfig) {
        if let Some(flags) = &file.ssh_flags {
            self.ssh_flags = flags.clone();
        }
        if let Some(skip) = file.skip_sync {
            self.skip_sync = skip;
        }
        if let Some(back) = file.sync_back {
            self.sync_back = back;
        }
        if let Some(secs) = file.ready_timeout_secs {
            self.ready_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.remote_port_timeout_secs {
            self.remote_port_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.shutdown_grace_secs {
            self.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(path) = &file.helper_path {
            self.helper_path = path.clone();
        }
        if let Some(url) = &file.download_url {
            self.download_url = url.clone();
        }
    }

    /// Whether push/pull sync should run at all on exit.
    pub fn wants_sync_back(&self) -> bool {
        self.sync_back && !self.skip_sync
    }
}

/// Optional settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub ssh_flags: Option<String>,
    pub skip_sync: Option<bool>,
    pub sync_back: Option<bool>,
    pub ready_timeout_secs: Option<u64>,
    pub remote_port_timeout_secs: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
    pub helper_path: Option<String>,
    pub download_url: Option<String>,
}

impl FileConfig {
    /// Parse `path`; a missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(SessionError::Io(e)),
        };
        toml::from_str(&content)
            .map_err(|e| SessionError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from `CODETUNNEL_CONFIG` or the platform config dir.
    pub fn load_default() -> Result<Self, SessionError> {
        match config_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }
}

/// Where the config file is looked for.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = dotenvy::var(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    directories::ProjectDirs::from("com", "codetunnel", "codetunnel")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Local editor directories that get synchronized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorDirs {
    pub settings_dir: PathBuf,
    pub extensions_dir: PathBuf,
}

impl EditorDirs {
    /// Resolve from the environment, falling back to the editor's defaults.
    pub fn from_env() -> Result<Self, SessionError> {
        let settings_dir = match dotenvy::var(SETTINGS_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::config_dir()
                .map(|d| d.join("Code").join("User"))
                .ok_or_else(|| SessionError::Config("cannot determine config directory".into()))?,
        };
        let extensions_dir = match dotenvy::var(EXTENSIONS_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::home_dir()
                .map(|d| d.join(".vscode").join("extensions"))
                .ok_or_else(|| SessionError::Config("cannot determine home directory".into()))?,
        };
        Ok(Self {
            settings_dir,
            extensions_dir,
        })
    }
}

/// Whether a graphical display is available for the browser.
pub fn display_available() -> bool {
    dotenvy::var(DISPLAY_ENV)
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

/// Parse a user-supplied port.
pub fn parse_port(value: &str) -> Result<u16, SessionError> {
    match value.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(SessionError::Config(format!(
            "`{value}` is not a valid port (1-65535)"
        ))),
        Ok(port) => Ok(port),
    }
}
