#![allow(dead_code)] // Test utilities may not all be used in every test
//! Shared fakes for session tests.
//!
//! [`FakeRunner`] records every command the session issues and hands out a
//! [`FakeProcess`] for the tunnel, whose exit the test controls. Together with
//! [`spawn_delayed_endpoint`] this runs the whole lifecycle without ssh, rsync
//! or a browser.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use codetunnel::config::{EditorDirs, SessionConfig};
use codetunnel::session::{
    BoxFuture, BrowserLocator, CommandRunner, CommandSpec, ExitInfo, ProcessHandle, StdinSource,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{Notify, watch};

/// Captures tracing output for tests.
pub struct TestTracing {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// What the session asked the runner to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Run(CommandSpec),
    Spawn(CommandSpec),
    Detached(CommandSpec),
    /// The tunnel process was reaped (waited or killed).
    Reaped { killed: bool },
}

type Matcher = Box<dyn Fn(&CommandSpec) -> bool + Send + Sync>;

/// Shared view of the fake tunnel process.
pub struct ProcessControl {
    exit: watch::Sender<Option<i32>>,
    pub reaped: AtomicUsize,
    pub killed: AtomicBool,
}

impl ProcessControl {
    /// Make the tunnel exit on its own with `code`.
    pub fn exit(&self, code: i32) {
        self.exit.send_replace(Some(code));
    }

    pub fn reap_count(&self) -> usize {
        self.reaped.load(Ordering::SeqCst)
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

/// Recording [`CommandRunner`].
pub struct FakeRunner {
    events: Arc<Mutex<Vec<(Instant, Event)>>>,
    replies: Mutex<Vec<(Matcher, ExitInfo)>>,
    spawn_error: AtomicBool,
    exit_after: Mutex<Option<Duration>>,
    on_spawn: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    pub control: Arc<ProcessControl>,
    pub opened: Arc<Notify>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        let (exit, _) = watch::channel(None);
        Arc::new(Self {
            events: Arc::new(Mutex::new(Vec::new())),
            replies: Mutex::new(Vec::new()),
            spawn_error: AtomicBool::new(false),
            exit_after: Mutex::new(None),
            on_spawn: Mutex::new(None),
            control: Arc::new(ProcessControl {
                exit,
                reaped: AtomicUsize::new(0),
                killed: AtomicBool::new(false),
            }),
            opened: Arc::new(Notify::new()),
        })
    }

    /// Commands matching `matcher` finish with `code` and print `stdout`.
    pub fn reply_when(
        &self,
        matcher: impl Fn(&CommandSpec) -> bool + Send + Sync + 'static,
        code: i32,
        stdout: &str,
    ) {
        self.replies.lock().unwrap().push((
            Box::new(matcher),
            ExitInfo {
                code: Some(code),
                stdout: stdout.as_bytes().to_vec(),
                stderr: Vec::new(),
            },
        ));
    }

    /// Make spawning the tunnel fail.
    pub fn fail_spawn(&self) {
        self.spawn_error.store(true, Ordering::SeqCst);
    }

    /// Let the tunnel exit with status 0 this long after it starts.
    pub fn exit_tunnel_after(&self, delay: Duration) {
        *self.exit_after.lock().unwrap() = Some(delay);
    }

    /// Run `hook` when the tunnel is spawned (inside the runtime).
    pub fn on_spawn(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_spawn.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Time of the first event matching `pred`.
    pub fn time_of(&self, pred: impl Fn(&Event) -> bool) -> Option<Instant> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|(_, e)| pred(e))
            .map(|(t, _)| *t)
    }

    pub fn runs(&self) -> Vec<CommandSpec> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Run(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    pub fn rsync_runs(&self) -> Vec<CommandSpec> {
        self.runs()
            .into_iter()
            .filter(|s| s.program == "rsync")
            .collect()
    }

    pub fn spawns(&self) -> Vec<CommandSpec> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Spawn(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    pub fn detached(&self) -> Vec<CommandSpec> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Detached(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push((Instant::now(), event));
    }
}

impl CommandRunner for FakeRunner {
    fn run<'a>(&'a self, cmd: &'a CommandSpec) -> BoxFuture<'a, io::Result<ExitInfo>> {
        self.record(Event::Run(cmd.clone()));
        let reply = self
            .replies
            .lock()
            .unwrap()
            .iter()
            .find(|(matcher, _)| matcher(cmd))
            .map(|(_, info)| info.clone())
            .unwrap_or_else(|| ExitInfo::with_code(0));
        Box::pin(async move { Ok(reply) })
    }

    fn spawn(&self, cmd: &CommandSpec) -> io::Result<Box<dyn ProcessHandle>> {
        if self.spawn_error.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "ssh: not found"));
        }
        self.record(Event::Spawn(cmd.clone()));

        if let Some(delay) = *self.exit_after.lock().unwrap() {
            let control = Arc::clone(&self.control);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                control.exit(0);
            });
        }
        if let Some(hook) = self.on_spawn.lock().unwrap().as_ref() {
            hook();
        }

        Ok(Box::new(FakeProcess {
            exit: self.control.exit.subscribe(),
            control: Arc::clone(&self.control),
            events: Arc::clone(&self.events),
        }))
    }

    fn spawn_detached(&self, cmd: &CommandSpec) -> io::Result<()> {
        self.record(Event::Detached(cmd.clone()));
        self.opened.notify_one();
        Ok(())
    }
}

/// Tunnel stand-in that exits when told to or when killed.
pub struct FakeProcess {
    exit: watch::Receiver<Option<i32>>,
    control: Arc<ProcessControl>,
    events: Arc<Mutex<Vec<(Instant, Event)>>>,
}

impl FakeProcess {
    fn reaped(&self, killed: bool) {
        self.control.reaped.fetch_add(1, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .push((Instant::now(), Event::Reaped { killed }));
    }
}

impl ProcessHandle for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    fn wait(&mut self) -> BoxFuture<'_, io::Result<ExitInfo>> {
        Box::pin(async move {
            let exited = self
                .exit
                .wait_for(|c| c.is_some())
                .await
                .map(|c| c.unwrap_or(0));
            let code = match exited {
                Ok(code) => code,
                Err(_) => std::future::pending::<i32>().await,
            };
            self.reaped(false);
            Ok(ExitInfo::with_code(code))
        })
    }

    fn kill(&mut self) -> BoxFuture<'_, io::Result<ExitInfo>> {
        Box::pin(async move {
            self.control.killed.store(true, Ordering::SeqCst);
            self.reaped(true);
            Ok(ExitInfo::default())
        })
    }
}

/// Pretends google-chrome is installed.
pub struct ChromeOnly;

impl BrowserLocator for ChromeOnly {
    fn command_exists(&self, name: &str) -> bool {
        name == "google-chrome"
    }

    fn path_exists(&self, _path: &str) -> bool {
        false
    }
}

/// A loopback port nothing is listening on right now.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().unwrap().port()
}

/// Start answering HTTP on `port` after `delay`; refused until then.
pub fn spawn_delayed_endpoint(port: u16, delay: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("bind fake endpoint");
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                    .await;
                let _ = stream.shutdown().await;
            });
        }
    })
}

/// Session config pointing at temp editor dirs, with fast timeouts.
pub struct ConfigFixture {
    pub dir: TempDir,
    pub config: SessionConfig,
}

impl ConfigFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let editor = EditorDirs {
            settings_dir: dir.path().join("settings"),
            extensions_dir: dir.path().join("extensions"),
        };
        std::fs::create_dir_all(&editor.settings_dir).unwrap();
        std::fs::create_dir_all(&editor.extensions_dir).unwrap();

        let mut config = SessionConfig::new("dev", Some("~/project".into()), editor);
        config.ssh_flags = "-p 2222".into();
        config.ready_timeout = Duration::from_secs(5);
        config.shutdown_grace = Duration::from_millis(200);
        config.remote_port_timeout = Duration::from_secs(2);
        Self { dir, config }
    }

    pub fn settings_dir(&self) -> PathBuf {
        self.config.settings_dir.clone()
    }

    pub fn extensions_dir(&self) -> PathBuf {
        self.config.extensions_dir.clone()
    }
}

/// Whether `spec` pipes a script containing `needle` to the remote shell.
pub fn script_contains(spec: &CommandSpec, needle: &str) -> bool {
    match &spec.stdin {
        StdinSource::Bytes(bytes) => String::from_utf8_lossy(bytes).contains(needle),
        _ => false,
    }
}
