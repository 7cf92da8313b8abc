//! Keeps the remote helper binary current.
//!
//! The update is a single bash script piped over ssh. It is idempotent: `wget -N`
//! only downloads when the artifact changed, and the helper path is re-linked
//! and made executable on every run regardless of what was there before.

use std::path::Path;

use super::command::CommandRunner;
use super::transport::Transport;
use crate::error::SessionError;

/// Default install location of the helper on the remote host.
pub const DEFAULT_HELPER_PATH: &str = "/tmp/codetunnel-code-server";

/// Default artifact URL for the helper.
pub const DEFAULT_DOWNLOAD_URL: &str = "https://codesrv-ci.cdr.sh/latest-linux";

/// Installs or refreshes the helper on the remote host.
#[derive(Debug, Clone)]
pub struct RemoteUpdater {
    helper_path: String,
    download_url: String,
}

impl Default for RemoteUpdater {
    fn default() -> Self {
        Self::new(DEFAULT_HELPER_PATH, DEFAULT_DOWNLOAD_URL)
    }
}

impl RemoteUpdater {
    pub fn new(helper_path: impl Into<String>, download_url: impl Into<String>) -> Self {
        Self {
            helper_path: helper_path.into(),
            download_url: download_url.into(),
        }
    }

    pub fn helper_path(&self) -> &str {
        &self.helper_path
    }

    /// The bash script that leaves an executable helper at [`Self::helper_path`].
    pub fn script(&self) -> String {
        let dir = Path::new(&self.helper_path)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| ".".to_string());
        let artifact = self
            .download_url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("latest-linux");
        let path = &self.helper_path;
        let url = &self.download_url;

        format!(
            r#"set -euxo pipefail || exit 1

mkdir -p ~/.local/share/code-server
mkdir -p {dir}
cd {dir}
wget -N {url}
rm -f {path}
ln {artifact} {path}
chmod +x {path}"#
        )
    }

    /// Run the update over `transport`, with output on the local terminal.
    pub async fn update(
        &self,
        runner: &dyn CommandRunner,
        transport: &Transport,
    ) -> Result<(), SessionError> {
        let script = self.script();
        let spec = transport.remote_script(&script);
        tracing::info!(host = %transport.host(), "ensuring code-server is updated...");
        tracing::debug!(command = %spec.display(), "update command");

        let fail = |status: String| SessionError::RemoteUpdateFailed {
            command: spec.display(),
            script: script.clone(),
            status,
        };

        let info = runner.run(&spec).await.map_err(|e| fail(e.to_string()))?;
        if !info.success() {
            return Err(fail(info.describe()));
        }
        Ok(())
    }
}
