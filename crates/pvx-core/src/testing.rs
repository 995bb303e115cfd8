//! In-memory collaborators for unit tests.

#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tracing_subscriber::fmt::MakeWriter;

use crate::effects::{Effects, SharedEffects};
use crate::process::{ProcessRunner, RunOutput};
use crate::venv::SharedRuntime;

type Handler = dyn Fn(&str, &[String]) -> Result<RunOutput> + Send + Sync;

/// Records every command line and answers through a handler.
pub struct FakeRunner {
    handler: Box<Handler>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeRunner {
    pub fn new(
        handler: impl Fn(&str, &[String]) -> Result<RunOutput> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn ok() -> Self {
        Self::new(|_, _| Ok(RunOutput::default()))
    }

    /// Every call as `[program, args...]`.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, program: &str, args: &[String]) -> Result<RunOutput> {
        let mut line = vec![program.to_string()];
        line.extend(args.iter().cloned());
        self.calls.lock().expect("calls lock").push(line);
        (self.handler)(program, args)
    }
}

impl ProcessRunner for FakeRunner {
    fn run_command(&self, program: &str, args: &[String]) -> Result<RunOutput> {
        self.record(program, args)
    }

    fn run_command_streaming(&self, program: &str, args: &[String]) -> Result<RunOutput> {
        self.record(program, args)
    }

    fn run_command_passthrough(&self, program: &str, args: &[String]) -> Result<RunOutput> {
        self.record(program, args)
    }
}

/// Shared runtime whose state is flipped by tests.
pub struct FakeSharedLibs {
    root: PathBuf,
    site_packages: PathBuf,
    valid: AtomicBool,
    stale: AtomicBool,
    valid_after_create: AtomicBool,
    creates: AtomicUsize,
    upgrades: AtomicUsize,
}

impl FakeSharedLibs {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            site_packages: root.join("lib").join("python3.12").join("site-packages"),
            valid: AtomicBool::new(true),
            stale: AtomicBool::new(false),
            valid_after_create: AtomicBool::new(true),
            creates: AtomicUsize::new(0),
            upgrades: AtomicUsize::new(0),
        }
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    pub fn set_stale(&self, stale: bool) {
        self.stale.store(stale, Ordering::SeqCst);
    }

    pub fn set_valid_after_create(&self, valid: bool) {
        self.valid_after_create.store(valid, Ordering::SeqCst);
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn upgrades(&self) -> usize {
        self.upgrades.load(Ordering::SeqCst)
    }
}

impl SharedRuntime for FakeSharedLibs {
    fn root(&self) -> &Path {
        &self.root
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn needs_upgrade(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    fn create(&self, _verbose: bool) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if !self.is_valid() {
            self.set_valid(self.valid_after_create.load(Ordering::SeqCst));
        }
        Ok(())
    }

    fn upgrade(&self, _verbose: bool) -> Result<()> {
        self.upgrades.fetch_add(1, Ordering::SeqCst);
        self.set_stale(false);
        Ok(())
    }

    fn site_packages(&self) -> Result<PathBuf> {
        Ok(self.site_packages.clone())
    }
}

pub struct FakeEffects {
    pub runner: Arc<FakeRunner>,
    pub shared: Arc<FakeSharedLibs>,
}

impl FakeEffects {
    pub fn new(runner: FakeRunner, shared_root: &Path) -> Arc<Self> {
        Arc::new(Self {
            runner: Arc::new(runner),
            shared: Arc::new(FakeSharedLibs::new(shared_root)),
        })
    }

    pub fn shared_effects(self: &Arc<Self>) -> SharedEffects {
        self.clone()
    }
}

impl Effects for FakeEffects {
    fn process(&self) -> &dyn ProcessRunner {
        self.runner.as_ref()
    }

    fn shared_libs(&self) -> &dyn SharedRuntime {
        self.shared.as_ref()
    }
}

/// Log lines written by the fmt subscriber installed in [`capture_logs`].
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("log lock")).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Runs `f` with debug-level logging captured on this thread.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(buffer.clone())
        .with_ansi(false)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, buffer.contents())
}
