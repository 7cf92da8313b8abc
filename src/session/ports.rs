//! Local and remote port selection.
//!
//! Local ports are found by binding random candidates from the dynamic range
//! and releasing them straight away. Remote ports are picked by a small script
//! run on the host that samples its own ephemeral range and checks `ss` for
//! listeners. Explicit ports from the configuration bypass both allocators and
//! are used as given, without any availability check.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use super::command::{CommandRunner, OutputMode};
use super::transport::Transport;
use crate::error::SessionError;

/// IANA dynamic/private port range.
pub const DYNAMIC_PORT_RANGE: RangeInclusive<u16> = 49152..=65535;

/// Bind attempts before giving up on a local port.
pub const MAX_LOCAL_TRIES: u32 = 10;

/// Default limit for the remote port script.
pub const DEFAULT_REMOTE_PORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Picks a free port inside the remote's `ip_local_port_range`.
pub const REMOTE_PORT_SCRIPT: &str = r#"
read LOWERPORT UPPERPORT < /proc/sys/net/ipv4/ip_local_port_range
while :
do
        PORT="$(shuf -i $LOWERPORT-$UPPERPORT -n 1)"
        ss -lpn | grep -q ":$PORT " || break
done
echo $PORT"#;

/// Local and remote ends of the tunnel, frozen once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAssignment {
    pub local: u16,
    pub remote: u16,
}

impl PortAssignment {
    /// URL of the forwarded helper as seen from this machine.
    pub fn local_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.local)
    }
}

/// Port allocator with its own source of randomness.
pub struct PortAllocator<R: Rng = StdRng> {
    rng: R,
    range: RangeInclusive<u16>,
    max_tries: u32,
    remote_timeout: Duration,
}

impl PortAllocator<StdRng> {
    /// Allocator seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl<R: Rng> PortAllocator<R> {
    /// Allocator drawing candidates from `rng`; seed it for reproducible runs.
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            range: DYNAMIC_PORT_RANGE,
            max_tries: MAX_LOCAL_TRIES,
            remote_timeout: DEFAULT_REMOTE_PORT_TIMEOUT,
        }
    }

    /// Restrict local candidates to `range`.
    pub fn with_range(mut self, range: RangeInclusive<u16>) -> Self {
        self.range = range;
        self
    }

    pub fn with_max_tries(mut self, tries: u32) -> Self {
        self.max_tries = tries;
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Find a local port nobody is listening on.
    ///
    /// The probe listener is closed before returning, so the port is free for
    /// the caller to bind. A port that turns out to be taken only costs a try.
    pub fn allocate_local(&mut self) -> Result<u16, SessionError> {
        for _ in 0..self.max_tries {
            let port = self.rng.gen_range(self.range.clone());
            match TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)) {
                Ok(listener) => {
                    drop(listener);
                    return Ok(port);
                }
                Err(e) => {
                    tracing::info!(port, error = %e, "port taken");
                }
            }
        }
        Err(SessionError::PortExhausted {
            tries: self.max_tries,
        })
    }

    /// Ask the remote host for an unused port in its ephemeral range.
    pub async fn allocate_remote(
        &self,
        runner: &dyn CommandRunner,
        transport: &Transport,
    ) -> Result<u16, SessionError> {
        let spec = transport
            .remote_script(REMOTE_PORT_SCRIPT)
            .stdout(OutputMode::Capture);
        let fail = |reason: String| SessionError::RemotePortAllocationFailed {
            command: spec.display(),
            script: REMOTE_PORT_SCRIPT.to_string(),
            reason,
        };

        let info = match tokio::time::timeout(self.remote_timeout, runner.run(&spec)).await {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => return Err(fail(e.to_string())),
            Err(_) => {
                return Err(fail(format!(
                    "timed out after {} seconds",
                    self.remote_timeout.as_secs()
                )));
            }
        };

        if !info.success() {
            return Err(fail(info.describe()));
        }

        parse_remote_port(&info.stdout_lossy()).map_err(fail)
    }

    /// Fill in whichever side of the assignment the user did not pin.
    pub async fn resolve(
        &mut self,
        local: Option<u16>,
        remote: Option<u16>,
        runner: &dyn CommandRunner,
        transport: &Transport,
    ) -> Result<PortAssignment, SessionError> {
        let local = match local {
            Some(port) => port,
            None => self.allocate_local()?,
        };
        let remote = match remote {
            Some(port) => port,
            None => self.allocate_remote(runner, transport).await?,
        };
        Ok(PortAssignment { local, remote })
    }
}

/// First line of the script output, as a port number.
fn parse_remote_port(output: &str) -> Result<u16, String> {
    let line = output.trim().lines().next().unwrap_or("").trim();
    match line.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("remote returned `{line}`, expected a port number")),
        Ok(port) => Ok(port),
    }
}
