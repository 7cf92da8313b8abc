pub mod config;
pub mod error;
pub mod session;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use config::{EditorDirs, FileConfig, SessionConfig};
use session::{Session, SessionReport, SystemRunner};

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "codetunnel",
    version,
    about = "Start VS Code via code-server over SSH",
    after_help = "Environment variables:\n  VSCODE_CONFIG_DIR      use special VS Code settings dir\n  VSCODE_EXTENSIONS_DIR  use special VS Code extensions dir\n  CODETUNNEL_CONFIG      config file (default: platform config dir)\n  DISPLAY                open a browser only when set"
)]
pub struct Cli {
    /// Host passed to ssh
    pub host: String,

    /// Directory on the remote host to start in (defaults to the remote home)
    pub dir: Option<String>,

    /// Skip syncing local settings and extensions to the remote host
    #[arg(long = "skipsync", default_value_t = false)]
    pub skip_sync: bool,

    /// Custom ssh flags, passed to every ssh invocation
    #[arg(long = "ssh-flags", env = "CODETUNNEL_SSH_FLAGS", allow_hyphen_values = true)]
    pub ssh_flags: Option<String>,

    /// Sync extensions and settings back on termination
    #[arg(short = 'b', default_value_t = false)]
    pub sync_back: bool,

    /// Remote port for code-server (random free port if omitted)
    #[arg(long)]
    pub remote_port: Option<String>,

    /// Local port for the tunnel (random free port if omitted)
    #[arg(long)]
    pub local_port: Option<String>,

    /// Seconds to wait for code-server to answer
    #[arg(long, value_name = "SECS")]
    pub ready_timeout: Option<u64>,

    /// Never open a browser
    #[arg(long, default_value_t = false)]
    pub no_open: bool,

    /// Debug logging
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

/// Install the stderr log subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Layer defaults, config file, environment and flags into a session config.
pub fn build_config(cli: &Cli) -> Result<SessionConfig> {
    let editor = EditorDirs::from_env().context("resolving local editor directories")?;
    let file = FileConfig::load_default().context("loading config file")?;

    let mut config = SessionConfig::new(&cli.host, cli.dir.clone(), editor);
    config.apply_file(&file);

    if let Some(flags) = &cli.ssh_flags {
        config.ssh_flags = flags.clone();
    }
    config.skip_sync |= cli.skip_sync;
    config.sync_back |= cli.sync_back;
    if let Some(port) = &cli.local_port {
        config.local_port = Some(config::parse_port(port).context("--local-port")?);
    }
    if let Some(port) = &cli.remote_port {
        config.remote_port = Some(config::parse_port(port).context("--remote-port")?);
    }
    if let Some(secs) = cli.ready_timeout {
        config.ready_timeout = std::time::Duration::from_secs(secs);
    }
    config.open_client = !cli.no_open && config::display_available();

    Ok(config)
}

/// Run a session for the parsed command line.
pub async fn run(cli: Cli) -> Result<SessionReport> {
    let config = build_config(&cli)?;
    let session = Session::new(config, Arc::new(SystemRunner))?;
    Ok(session.run().await?)
}
