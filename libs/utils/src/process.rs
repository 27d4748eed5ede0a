//! Child-process supervision, modeled as an external process runner
//! interface rather than raw `fork()`.
//!
//! Rust's `fork()` is unsound to call from a multi-threaded process (which
//! any tokio binary is), so the real implementation re-execs the current
//! binary with the given arguments instead of forking and branching on the
//! child pid. Tests substitute [`MockRunner`], which runs an in-process
//! async closure instead of spawning anything, to exercise the supervisor's
//! restart-with-backoff logic quickly and deterministically.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Outcome of a worker child exiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited with status 0: don't restart.
    Clean,
    /// Exited non-zero or was killed: the caller's `onCrash` policy runs and
    /// the supervisor restarts with backoff.
    Crashed,
}

/// A handle to a spawned worker child.
#[async_trait]
pub trait ChildProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Wait for the child to exit on its own.
    async fn wait(&mut self) -> std::io::Result<ExitOutcome>;

    /// Ask the child to shut down: graceful first (SIGTERM equivalent via
    /// the runner), then forced if it hasn't exited within `grace`.
    async fn stop(&mut self, grace: Duration) -> std::io::Result<()>;
}

/// Spawns worker children. The real implementation re-execs the current
/// binary; [`MockRunner`] runs a supplied async closure in-process.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn spawn(&self, args: &[String]) -> std::io::Result<Box<dyn ChildProcess>>;
}

/// Re-execs `std::env::current_exe()` with the given arguments.
pub struct ReExecRunner;

#[async_trait]
impl ProcessRunner for ReExecRunner {
    async fn spawn(&self, args: &[String]) -> std::io::Result<Box<dyn ChildProcess>> {
        let exe = std::env::current_exe()?;
        let child = Command::new(exe).args(args).kill_on_drop(true).spawn()?;
        Ok(Box::new(RealChild { child }))
    }
}

struct RealChild {
    child: tokio::process::Child,
}

#[async_trait]
impl ChildProcess for RealChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> std::io::Result<ExitOutcome> {
        let status = self.child.wait().await?;
        Ok(if status.success() {
            ExitOutcome::Clean
        } else {
            ExitOutcome::Crashed
        })
    }

    async fn stop(&mut self, grace: Duration) -> std::io::Result<()> {
        if let Some(pid) = self.child.id() {
            // SAFETY: `pid` is the live child's own pid; SIGTERM is a
            // standard, non-destructive request to exit.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
        let graceful = tokio::time::timeout(grace, self.child.wait()).await;
        if graceful.is_err() {
            self.child.start_kill()?;
            let _ = self.child.wait().await;
        }
        Ok(())
    }
}

type MockBehavior =
    Arc<dyn Fn(Vec<String>) -> Pin<Box<dyn Future<Output = ExitOutcome> + Send>> + Send + Sync>;

/// An in-process stand-in for a child process, used by supervisor tests.
/// `behavior` is invoked once per (re)spawn and its result becomes the
/// simulated exit outcome.
pub struct MockRunner {
    behavior: MockBehavior,
    spawn_count: Arc<AtomicUsize>,
}

impl MockRunner {
    pub fn new<F, Fut>(behavior: F) -> Self
    where
        F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ExitOutcome> + Send + 'static,
    {
        MockRunner {
            behavior: Arc::new(move |args| Box::pin(behavior(args))),
            spawn_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.spawn_count.load(Ordering::SeqCst)
    }

    /// A mock that crashes `crashes` times, then exits cleanly.
    pub fn crash_then_clean(crashes: usize) -> Self {
        let remaining = Arc::new(AtomicUsize::new(crashes));
        MockRunner::new(move |_args| {
            let remaining = remaining.clone();
            async move {
                if remaining.load(Ordering::SeqCst) > 0 {
                    remaining.fetch_sub(1, Ordering::SeqCst);
                    ExitOutcome::Crashed
                } else {
                    ExitOutcome::Clean
                }
            }
        })
    }
}

#[async_trait]
impl ProcessRunner for MockRunner {
    async fn spawn(&self, args: &[String]) -> std::io::Result<Box<dyn ChildProcess>> {
        self.spawn_count.fetch_add(1, Ordering::SeqCst);
        let outcome = (self.behavior)(args.to_vec()).await;
        Ok(Box::new(MockChild {
            outcome: Mutex::new(Some(outcome)),
        }))
    }
}

struct MockChild {
    outcome: Mutex<Option<ExitOutcome>>,
}

#[async_trait]
impl ChildProcess for MockChild {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> std::io::Result<ExitOutcome> {
        Ok(self.outcome.lock().await.take().unwrap_or(ExitOutcome::Clean))
    }

    async fn stop(&mut self, _grace: Duration) -> std::io::Result<()> {
        *self.outcome.lock().await = Some(ExitOutcome::Clean);
        Ok(())
    }
}
