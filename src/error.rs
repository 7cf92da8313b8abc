//! Error types for a remote editor session.
//!
//! Every phase before the session is running propagates its failure as a
//! [`SessionError`] and aborts the session. Errors that come from the remote
//! side carry the exact command (and script, where there is one) so the user
//! can reproduce the failure by hand.

use thiserror::Error;

use crate::session::sync::SyncTarget;

/// Errors that can end a session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(
        "failed to update the remote helper ({status})\n---ssh cmd---\n{command}\n---download script---\n{script}"
    )]
    RemoteUpdateFailed {
        command: String,
        script: String,
        status: String,
    },

    #[error("failed to sync {task}")]
    SyncFailed {
        task: SyncTarget,
        #[source]
        source: std::io::Error,
    },

    #[error("no free local port found after {tries} tries")]
    PortExhausted { tries: u32 },

    #[error(
        "failed to find an available remote port: {reason}\n---ssh cmd---\n{command}\n---port script---\n{script}"
    )]
    RemotePortAllocationFailed {
        command: String,
        script: String,
        reason: String,
    },

    #[error("failed to start the tunnel `{command}`: {source}")]
    LaunchFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tunnel process exited before the remote helper became ready ({status})")]
    TunnelClosed { status: String },

    #[error("remote helper did not answer on {url} within {timeout:?}")]
    ReadinessTimeout {
        url: String,
        timeout: std::time::Duration,
    },

    #[error("interrupted while starting the session")]
    InterruptedDuringStartup,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The tunnel process exited on its own while the session was running.
    TunnelExited,
    /// An interrupt arrived while the session was running.
    Interrupted,
    /// The remote helper never answered its health probe.
    ReadinessTimeout,
    /// A push sync failed before launch.
    SyncFailed,
    /// Anything else that prevented the session from reaching the running state.
    LaunchFailed,
}

impl TerminationReason {
    /// Whether this reason counts as a clean shutdown (exit code zero).
    pub fn is_clean(self) -> bool {
        matches!(self, Self::TunnelExited | Self::Interrupted)
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TunnelExited => write!(f, "tunnel process exited"),
            Self::Interrupted => write!(f, "interrupt received"),
            Self::ReadinessTimeout => write!(f, "readiness timeout"),
            Self::SyncFailed => write!(f, "synchronization failure"),
            Self::LaunchFailed => write!(f, "launch failure"),
        }
    }
}

impl SessionError {
    /// Map a startup failure to the termination reason it causes.
    pub fn termination_reason(&self) -> TerminationReason {
        match self {
            Self::SyncFailed { .. } => TerminationReason::SyncFailed,
            Self::ReadinessTimeout { .. } => TerminationReason::ReadinessTimeout,
            _ => TerminationReason::LaunchFailed,
        }
    }
}
