//! SSH invocations used by the session.
//!
//! The custom flag string is split once with shell rules and passed verbatim
//! to every invocation, so `-p 2222 -i "~/my key"` works the same for the
//! update script, the port probe, the tunnel and rsync's `-e`.

use super::command::{CommandSpec, OutputMode, StdinSource};
use crate::error::SessionError;

/// Shell used on the remote side for piped scripts.
pub const REMOTE_SHELL: &str = "/bin/bash";

/// How to reach the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transport {
    program: String,
    host: String,
    flags: Vec<String>,
}

impl Transport {
    /// Create a transport for `host` with the user's raw ssh flag string.
    pub fn new(host: impl Into<String>, raw_flags: &str) -> Result<Self, SessionError> {
        let flags = shell_words::split(raw_flags)
            .map_err(|e| SessionError::Config(format!("cannot parse ssh flags `{raw_flags}`: {e}")))?;
        Ok(Self {
            program: "ssh".to_string(),
            host: host.into(),
            flags,
        })
    }

    /// Use a different client binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// `ssh <flags> <host> /bin/bash` with `script` on stdin.
    ///
    /// Output goes to the terminal unless the caller switches stdout to capture.
    pub fn remote_script(&self, script: &str) -> CommandSpec {
        CommandSpec::new(&self.program)
            .args(self.flags.iter().cloned())
            .arg(&self.host)
            .arg(REMOTE_SHELL)
            .stdin(StdinSource::Bytes(script.as_bytes().to_vec()))
            .stdout(OutputMode::Inherit)
            .stderr(OutputMode::Inherit)
    }

    /// `ssh -tt -q -L <local>:localhost:<remote> <flags> <host> <remote_cmd>`.
    ///
    /// The forced pseudo-terminal makes the remote process receive the
    /// terminal's signals, so Ctrl+C locally stops it remotely.
    pub fn tunnel(&self, local_port: u16, remote_port: u16, remote_cmd: &str) -> CommandSpec {
        CommandSpec::new(&self.program)
            .args(["-tt", "-q", "-L"])
            .arg(format!("{local_port}:localhost:{remote_port}"))
            .args(self.flags.iter().cloned())
            .arg(&self.host)
            .arg(remote_cmd)
            .interactive()
    }

    /// Value for rsync's `-e` option.
    pub fn rsync_shell(&self) -> String {
        if self.flags.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, shell_words::join(&self.flags))
        }
    }
}
