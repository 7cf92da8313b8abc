//! Starts the remote helper behind an SSH tunnel.

use super::command::{CommandRunner, ProcessHandle};
use super::ports::PortAssignment;
use super::transport::Transport;
use crate::error::SessionError;

/// The running ssh process that carries the tunnel and the helper.
///
/// Owned by the lifecycle controller, which waits on it exactly once.
pub struct SessionProcess {
    handle: Box<dyn ProcessHandle>,
    command: String,
}

impl SessionProcess {
    /// The command line that started the process.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn id(&self) -> Option<u32> {
        self.handle.id()
    }

    pub(crate) fn into_handle(self) -> Box<dyn ProcessHandle> {
        self.handle
    }
}

impl std::fmt::Debug for SessionProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionProcess")
            .field("command", &self.command)
            .field("pid", &self.id())
            .finish()
    }
}

/// Shell line run on the remote host.
pub fn remote_command(work_dir: &str, helper_path: &str, remote_port: u16) -> String {
    format!(
        "cd {work_dir}; {helper_path} --host 127.0.0.1 --allow-http --no-auth --port={remote_port}"
    )
}

/// Spawn the tunnel. Returns once the ssh process is running; its exit is
/// reported later through the controller, not here.
pub fn launch(
    runner: &dyn CommandRunner,
    transport: &Transport,
    work_dir: &str,
    helper_path: &str,
    ports: PortAssignment,
) -> Result<SessionProcess, SessionError> {
    let remote_cmd = remote_command(work_dir, helper_path, ports.remote);
    let spec = transport.tunnel(ports.local, ports.remote, &remote_cmd);
    let command = spec.display();

    tracing::info!(
        local_port = ports.local,
        remote_port = ports.remote,
        "Tunneling local port {} to remote port {}",
        ports.local,
        ports.remote
    );

    let handle = runner
        .spawn(&spec)
        .map_err(|source| SessionError::LaunchFailed {
            command: command.clone(),
            source,
        })?;

    tracing::debug!(pid = ?handle.id(), command = %command, "tunnel started");
    Ok(SessionProcess { handle, command })
}
