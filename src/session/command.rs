//! External command capability.
//!
//! Every subprocess the session starts (ssh, rsync, the update script, the
//! browser) goes through [`CommandRunner`], so the orchestration can run
//! against recording fakes in tests. [`SystemRunner`] is the real thing,
//! built on `tokio::process`.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;

/// Boxed future returned by the capability traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Where a child's stdin comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdinSource {
    /// Share the local terminal.
    Inherit,
    /// Nothing.
    Null,
    /// Write these bytes, then close the pipe.
    Bytes(Vec<u8>),
}

/// Where a child's stdout/stderr go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Inherit,
    Capture,
    Null,
}

impl OutputMode {
    fn stdio(self) -> Stdio {
        match self {
            Self::Inherit => Stdio::inherit(),
            Self::Capture => Stdio::piped(),
            Self::Null => Stdio::null(),
        }
    }
}

/// A fully described invocation of an external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: StdinSource,
    pub stdout: OutputMode,
    pub stderr: OutputMode,
}

impl CommandSpec {
    /// A command with no stdin and both output streams on the terminal.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: StdinSource::Null,
            stdout: OutputMode::Inherit,
            stderr: OutputMode::Inherit,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, stdin: StdinSource) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn stdout(mut self, mode: OutputMode) -> Self {
        self.stdout = mode;
        self
    }

    pub fn stderr(mut self, mode: OutputMode) -> Self {
        self.stderr = mode;
        self
    }

    /// Attach stdin, stdout and stderr to the local terminal.
    pub fn interactive(self) -> Self {
        self.stdin(StdinSource::Inherit)
            .stdout(OutputMode::Inherit)
            .stderr(OutputMode::Inherit)
    }

    /// Render the invocation as a shell line the user can copy and run.
    pub fn display(&self) -> String {
        shell_words::join(std::iter::once(&self.program).chain(self.args.iter()))
    }

    fn to_tokio(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(match &self.stdin {
                StdinSource::Inherit => Stdio::inherit(),
                StdinSource::Null => Stdio::null(),
                StdinSource::Bytes(_) => Stdio::piped(),
            })
            .stdout(self.stdout.stdio())
            .stderr(self.stderr.stdio());
        cmd
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display())
    }
}

/// Structured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    /// Captured stdout (empty unless captured).
    pub stdout: Vec<u8>,
    /// Captured stderr (empty unless captured).
    pub stderr: Vec<u8>,
}

impl ExitInfo {
    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Short human description, e.g. `exit status: 255`.
    pub fn describe(&self) -> String {
        match self.code {
            Some(code) => format!("exit status: {code}"),
            None => "terminated by signal".to_string(),
        }
    }

    fn from_output(output: std::process::Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }

    fn from_status(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            ..Default::default()
        }
    }
}

/// A started process owned by whoever holds the handle.
pub trait ProcessHandle: Send {
    /// OS process id, if there is one.
    fn id(&self) -> Option<u32>;

    /// Wait for the process to exit. Dropping the future does not affect the process.
    fn wait(&mut self) -> BoxFuture<'_, io::Result<ExitInfo>>;

    /// Terminate the process and reap it.
    fn kill(&mut self) -> BoxFuture<'_, io::Result<ExitInfo>>;
}

/// Capability to run external commands.
pub trait CommandRunner: Send + Sync {
    /// Run to completion and report how it exited.
    fn run<'a>(&'a self, cmd: &'a CommandSpec) -> BoxFuture<'a, io::Result<ExitInfo>>;

    /// Start the process and return as soon as it is running.
    fn spawn(&self, cmd: &CommandSpec) -> io::Result<Box<dyn ProcessHandle>>;

    /// Start the process and forget about it.
    fn spawn_detached(&self, cmd: &CommandSpec) -> io::Result<()>;
}

/// Runs commands as real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> BoxFuture<'a, io::Result<ExitInfo>> {
        Box::pin(async move {
            let mut cmd = spec.to_tokio();
            // A caller that times out drops this future; the child must go with it.
            cmd.kill_on_drop(true);

            tracing::debug!(command = %spec.display(), "running command");
            let mut child = cmd.spawn()?;

            if let StdinSource::Bytes(bytes) = &spec.stdin
                && let Some(mut stdin) = child.stdin.take()
            {
                // The remote side may exit before reading everything; its exit
                // status is the interesting part then, not the broken pipe.
                if let Err(e) = stdin.write_all(bytes).await
                    && e.kind() != io::ErrorKind::BrokenPipe
                {
                    return Err(e);
                }
            }

            let output = child.wait_with_output().await?;
            Ok(ExitInfo::from_output(output))
        })
    }

    fn spawn(&self, spec: &CommandSpec) -> io::Result<Box<dyn ProcessHandle>> {
        tracing::debug!(command = %spec.display(), "spawning command");
        let child = spec.to_tokio().spawn()?;
        Ok(Box::new(SystemProcess { child }))
    }

    fn spawn_detached(&self, spec: &CommandSpec) -> io::Result<()> {
        spawn_reaped(spec).map(drop)
    }
}

/// Start `spec` with null stdio and reap it from a background task, so a
/// short-lived child does not linger as a zombie. Needs a Tokio runtime.
fn spawn_reaped(spec: &CommandSpec) -> io::Result<tokio::task::JoinHandle<io::Result<ExitInfo>>> {
    tracing::debug!(command = %spec.display(), "spawning detached command");
    let mut child = tokio::process::Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    let program = spec.program.clone();
    Ok(tokio::spawn(async move {
        let status = child.wait().await;
        match &status {
            Ok(status) => tracing::debug!(program = %program, %status, "detached command exited"),
            Err(e) => tracing::debug!(program = %program, error = %e, "waiting on detached command failed"),
        }
        status.map(ExitInfo::from_status)
    }))
}

struct SystemProcess {
    child: tokio::process::Child,
}

impl ProcessHandle for SystemProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn wait(&mut self) -> BoxFuture<'_, io::Result<ExitInfo>> {
        Box::pin(async move {
            let status = self.child.wait().await?;
            Ok(ExitInfo::from_status(status))
        })
    }

    fn kill(&mut self) -> BoxFuture<'_, io::Result<ExitInfo>> {
        Box::pin(async move {
            // Already exited is fine; the status below still reaps it.
            if let Err(e) = self.child.kill().await
                && e.kind() != io::ErrorKind::InvalidInput
            {
                return Err(e);
            }
            let status = self.child.wait().await?;
            Ok(ExitInfo::from_status(status))
        })
    }
}
