//! Best-effort browser launch pointed at the tunnel.
//!
//! Chrome-family browsers are preferred because `--app` gives a window
//! without browser chrome. Anything that goes wrong here is logged and ignored.

use std::path::Path;

use super::command::{CommandRunner, CommandSpec};

/// Executables looked up on `PATH`, in order.
pub const BROWSER_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
];

const MAC_CHROME_PATH: &str = "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome";
const WSL_CHROME_PATH: &str = "/mnt/c/Program Files (x86)/Google/Chrome/Application/chrome.exe";

/// Flags passed to Chrome-family browsers.
pub fn chrome_options(url: &str) -> Vec<String> {
    vec![
        format!("--app={url}"),
        "--disable-extensions".to_string(),
        "--disable-plugins".to_string(),
        "--incognito".to_string(),
    ]
}

/// How [`ClientOpener`] checks for installed browsers.
pub trait BrowserLocator: Send + Sync {
    fn command_exists(&self, name: &str) -> bool;
    fn path_exists(&self, path: &str) -> bool;
}

/// Looks on the real `PATH` and filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLocator;

impl BrowserLocator for SystemLocator {
    fn command_exists(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }

    fn path_exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }
}

/// Opens the forwarded URL in a local browser.
pub struct ClientOpener {
    locator: Box<dyn BrowserLocator>,
}

impl Default for ClientOpener {
    fn default() -> Self {
        Self::new(Box::new(SystemLocator))
    }
}

impl ClientOpener {
    pub fn new(locator: Box<dyn BrowserLocator>) -> Self {
        Self { locator }
    }

    /// The command that would be used to open `url`.
    pub fn browser_command(&self, url: &str) -> CommandSpec {
        if let Some(name) = BROWSER_CANDIDATES
            .iter()
            .find(|name| self.locator.command_exists(name))
        {
            return CommandSpec::new(*name).args(chrome_options(url));
        }
        for path in [MAC_CHROME_PATH, WSL_CHROME_PATH] {
            if self.locator.path_exists(path) {
                return CommandSpec::new(path).args(chrome_options(url));
            }
        }
        default_handler(url)
    }

    /// Start the browser without waiting on it; failures are only logged.
    pub fn open(&self, runner: &dyn CommandRunner, url: &str) {
        let spec = self.browser_command(url);
        tracing::info!(url, browser = %spec.program, "opening browser");
        if let Err(e) = runner.spawn_detached(&spec) {
            tracing::error!(url, error = %e, "failed to open browser");
        }
    }
}

fn default_handler(url: &str) -> CommandSpec {
    if cfg!(target_os = "macos") {
        CommandSpec::new("open").arg(url)
    } else if cfg!(target_os = "windows") {
        CommandSpec::new("cmd").args(["/C", "start", "", url])
    } else {
        CommandSpec::new("xdg-open").arg(url)
    }
}
