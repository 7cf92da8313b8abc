//! Session lifecycle.
//!
//! ```text
//! Starting ──► Running ──► Terminating ──► Terminal
//!    │
//!    └──► Failed (no sync-back)
//! ```
//!
//! Starting runs update, push sync, port allocation, launch, readiness and the
//! browser, strictly in that order. Running waits for whichever comes first:
//! the tunnel process exiting or an interrupt. Terminating optionally pulls
//! editor state back, only after the tunnel process has been reaped.
//!
//! The tunnel process is owned by a watcher task that reaps it exactly once and
//! reports through a oneshot. The interrupt listener publishes into a `watch`
//! channel. The controller only ever looks at the first event to arrive.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use rand::rngs::StdRng;
use tokio::sync::{oneshot, watch};

use super::command::{CommandRunner, ExitInfo, ProcessHandle};
use super::launcher;
use super::opener::ClientOpener;
use super::ports::{PortAllocator, PortAssignment};
use super::readiness::ReadinessProber;
use super::sync::{SyncDirection, SyncTask, Synchronizer};
use super::transport::Transport;
use super::updater::RemoteUpdater;
use crate::config::SessionConfig;
use crate::error::{SessionError, TerminationReason};

/// Lifecycle phase, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Terminating,
    Terminal,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Terminating => write!(f, "terminating"),
            Self::Terminal => write!(f, "terminal"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// How a session that reached the running state ended.
#[derive(Debug)]
pub struct SessionReport {
    pub reason: TerminationReason,
    pub ports: PortAssignment,
    /// Tunnel exit status, when it could be collected.
    pub tunnel_exit: Option<ExitInfo>,
    /// Outcome of the pull sync, `None` when it did not run.
    pub sync_back: Option<Result<(), SessionError>>,
}

/// One remote editor session.
pub struct Session<R: Rng = StdRng> {
    config: SessionConfig,
    transport: Transport,
    runner: Arc<dyn CommandRunner>,
    updater: RemoteUpdater,
    synchronizer: Synchronizer,
    ports: PortAllocator<R>,
    prober: ReadinessProber,
    opener: ClientOpener,
}

impl Session<StdRng> {
    /// Session wired to real collaborators for `config`.
    pub fn new(config: SessionConfig, runner: Arc<dyn CommandRunner>) -> Result<Self, SessionError> {
        let ports = PortAllocator::from_entropy();
        Self::with_port_allocator(config, runner, ports)
    }
}

impl<R: Rng + Send + Sync> Session<R> {
    /// Session using a caller-provided port allocator (and its random source).
    pub fn with_port_allocator(
        config: SessionConfig,
        runner: Arc<dyn CommandRunner>,
        ports: PortAllocator<R>,
    ) -> Result<Self, SessionError> {
        let transport = Transport::new(&config.host, &config.ssh_flags)?;
        let updater = RemoteUpdater::new(&config.helper_path, &config.download_url);
        let ports = ports.with_remote_timeout(config.remote_port_timeout);
        Ok(Self {
            config,
            transport,
            runner,
            updater,
            synchronizer: Synchronizer::default(),
            ports,
            prober: ReadinessProber::new()?,
            opener: ClientOpener::default(),
        })
    }

    pub fn with_opener(mut self, opener: ClientOpener) -> Self {
        self.opener = opener;
        self
    }

    pub fn with_prober(mut self, prober: ReadinessProber) -> Self {
        self.prober = prober;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run the session, treating Ctrl+C as the interrupt.
    pub async fn run(self) -> Result<SessionReport, SessionError> {
        self.run_until(async {
            if tokio::signal::ctrl_c().await.is_err() {
                tracing::warn!("cannot listen for Ctrl+C; only tunnel exit ends the session");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run the session, treating completion of `interrupt` as the interrupt.
    pub async fn run_until<F>(mut self, interrupt: F) -> Result<SessionReport, SessionError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (interrupt_tx, mut interrupt_rx) = watch::channel(false);
        let listener = tokio::spawn(async move {
            interrupt.await;
            let _ = interrupt_tx.send(true);
            // Keep the channel open so receivers never see a closed sender.
            std::future::pending::<()>().await;
        });

        let result = self.drive(&mut interrupt_rx).await;
        listener.abort();

        match &result {
            Ok(report) => {
                tracing::info!(state = %SessionState::Terminal, reason = %report.reason, "shutting down");
            }
            Err(e) => {
                tracing::info!(state = %SessionState::Failed, reason = %e.termination_reason(), "session failed");
            }
        }
        result
    }

    async fn drive(
        &mut self,
        interrupt: &mut watch::Receiver<bool>,
    ) -> Result<SessionReport, SessionError> {
        tracing::info!(state = %SessionState::Starting, host = %self.config.host, "starting session");
        let runner = Arc::clone(&self.runner);

        self.updater.update(runner.as_ref(), &self.transport).await?;

        if !self.config.skip_sync {
            let start = Instant::now();
            for task in self.push_tasks() {
                self.synchronizer
                    .sync(runner.as_ref(), &self.transport, &task)
                    .await?;
            }
            tracing::debug!(elapsed_ms = start.elapsed().as_millis() as u64, "push sync done");
        }
        ensure_not_interrupted(interrupt)?;

        tracing::info!("starting code-server...");
        let ports = self
            .ports
            .resolve(
                self.config.local_port,
                self.config.remote_port,
                runner.as_ref(),
                &self.transport,
            )
            .await?;
        ensure_not_interrupted(interrupt)?;

        let process = launcher::launch(
            runner.as_ref(),
            &self.transport,
            &self.config.work_dir,
            self.updater.helper_path(),
            ports,
        )?;
        let mut tunnel = TunnelWatch::start(process.into_handle());

        let url = ports.local_url();
        let ready = tokio::select! {
            res = self.prober.wait_until_ready(&url, self.config.ready_timeout) => res.map_err(Startup::Abort),
            exit = tunnel.exited() => Err(Startup::TunnelGone(SessionError::TunnelClosed {
                status: describe_exit(&exit),
            })),
            _ = interrupted(interrupt) => Err(Startup::Abort(SessionError::InterruptedDuringStartup)),
        };
        match ready {
            Ok(()) => {}
            Err(Startup::TunnelGone(e)) => return Err(e),
            Err(Startup::Abort(e)) => {
                if let Err(kill_err) = tunnel.terminate().await {
                    tracing::warn!(error = %kill_err, "failed to stop tunnel process");
                }
                return Err(e);
            }
        }

        if self.config.open_client {
            self.opener.open(runner.as_ref(), &url);
        }

        tracing::info!(state = %SessionState::Running, url = %url, "session running");
        let (reason, exit) = tokio::select! {
            exit = tunnel.exited() => (TerminationReason::TunnelExited, Some(exit)),
            _ = interrupted(interrupt) => (TerminationReason::Interrupted, None),
        };

        let tunnel_exit = match exit {
            Some(exit) => exit,
            None => self.await_tunnel_after_interrupt(tunnel).await,
        };
        if let Err(e) = &tunnel_exit {
            tracing::warn!(error = %e, "could not collect tunnel exit status");
        }

        tracing::info!(state = %SessionState::Terminating, reason = %reason, "session ended");
        let sync_back = if self.config.wants_sync_back() {
            Some(self.pull_back().await)
        } else {
            None
        };

        Ok(SessionReport {
            reason,
            ports,
            tunnel_exit: tunnel_exit.ok(),
            sync_back,
        })
    }

    /// Settings first, then extensions.
    fn push_tasks(&self) -> [SyncTask; 2] {
        [
            SyncTask::settings(&self.config.settings_dir, SyncDirection::Push),
            SyncTask::extensions(&self.config.extensions_dir, SyncDirection::Push),
        ]
    }

    /// Extensions first, then settings, each reversed.
    async fn pull_back(&self) -> Result<(), SessionError> {
        tracing::info!("synchronizing VS Code back to local");
        let [settings, extensions] = self.push_tasks();
        for task in [extensions.reversed(), settings.reversed()] {
            if let Err(e) = self
                .synchronizer
                .sync(self.runner.as_ref(), &self.transport, &task)
                .await
            {
                tracing::error!(error = ?e, "sync back failed");
                return Err(e);
            }
        }
        Ok(())
    }

    /// The pty normally delivers the interrupt to the remote side and ssh exits
    /// by itself; give it the grace period, then stop it.
    async fn await_tunnel_after_interrupt(&self, mut tunnel: TunnelWatch) -> io::Result<ExitInfo> {
        match tokio::time::timeout(self.config.shutdown_grace, tunnel.exited()).await {
            Ok(exit) => exit,
            Err(_) => {
                tracing::info!(
                    grace_ms = self.config.shutdown_grace.as_millis() as u64,
                    "tunnel still running after interrupt, stopping it"
                );
                tunnel.terminate().await
            }
        }
    }
}

enum Startup {
    /// Startup failed while the tunnel is still up.
    Abort(SessionError),
    /// The tunnel process is already gone.
    TunnelGone(SessionError),
}

fn ensure_not_interrupted(rx: &watch::Receiver<bool>) -> Result<(), SessionError> {
    if *rx.borrow() {
        return Err(SessionError::InterruptedDuringStartup);
    }
    Ok(())
}

/// Resolves once the interrupt flag is set; never if the listener went away.
async fn interrupted(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|fired| *fired).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn describe_exit(exit: &io::Result<ExitInfo>) -> String {
    match exit {
        Ok(info) => info.describe(),
        Err(e) => e.to_string(),
    }
}

/// Owns the tunnel process through a watcher task.
struct TunnelWatch {
    kill: Option<oneshot::Sender<()>>,
    exited: oneshot::Receiver<io::Result<ExitInfo>>,
}

impl TunnelWatch {
    fn start(mut handle: Box<dyn ProcessHandle>) -> Self {
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = tokio::select! {
                res = handle.wait() => res,
                Ok(()) = kill_rx => handle.kill().await,
            };
            match &result {
                Ok(info) => tracing::debug!(status = %info.describe(), "tunnel process exited"),
                Err(e) => tracing::warn!(error = %e, "waiting on tunnel process failed"),
            }
            let _ = exit_tx.send(result);
        });

        Self {
            kill: Some(kill_tx),
            exited: exit_rx,
        }
    }

    /// Wait for the process to exit on its own. Cancel-safe.
    async fn exited(&mut self) -> io::Result<ExitInfo> {
        match (&mut self.exited).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::other("tunnel watcher stopped")),
        }
    }

    /// Stop the process and wait until it is reaped.
    async fn terminate(mut self) -> io::Result<ExitInfo> {
        if let Some(kill) = self.kill.take() {
            // The watcher may already be done; then the exit is waiting for us.
            let _ = kill.send(());
        }
        self.exited().await
    }
}
