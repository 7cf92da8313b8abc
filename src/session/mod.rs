//! Remote editor session over SSH.
//!
//! This module ties together everything needed to run code-server on a remote
//! host and use it from a local browser.
//!
//! # Architecture
//!
//! - **command**: the [`command::CommandRunner`] capability every subprocess goes through
//! - **transport**: ssh invocations (remote scripts, tunnel, rsync shell)
//! - **updater**: installs/refreshes the helper binary on the remote
//! - **sync**: rsync-based push/pull of editor settings and extensions
//! - **ports**: local and remote port selection
//! - **launcher**: starts the helper behind a forwarded port
//! - **readiness**: health-polls the forwarded port
//! - **opener**: best-effort browser launch
//! - **controller**: the lifecycle that sequences all of the above
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use codetunnel::session::{Session, SystemRunner};
//!
//! let session = Session::new(config, Arc::new(SystemRunner))?;
//! let report = session.run().await?;
//! println!("session ended: {}", report.reason);
//! ```

pub mod command;
pub mod controller;
pub mod launcher;
pub mod opener;
pub mod ports;
pub mod readiness;
pub mod sync;
pub mod transport;
pub mod updater;

pub use command::{
    BoxFuture, CommandRunner, CommandSpec, ExitInfo, OutputMode, ProcessHandle, StdinSource,
    SystemRunner,
};
pub use controller::{Session, SessionReport, SessionState};
pub use launcher::SessionProcess;
pub use opener::{BrowserLocator, ClientOpener, SystemLocator};
pub use ports::{PortAllocator, PortAssignment};
pub use readiness::ReadinessProber;
pub use sync::{SyncDirection, SyncTarget, SyncTask, Synchronizer};
pub use transport::Transport;
pub use updater::RemoteUpdater;
