//! The input supervisor: owns a stream's named semaphore and restarts the
//! worker process with backoff when it crashes.
//!
//! State machine: `Idle -> Locked -> Spawned -> Exited -> (Locked | Terminated)`.
//! A clean exit (status 0) terminates the stream; a crash restarts with
//! linear backoff, unbounded, for as long as the stream is active.

use std::time::Duration;

use tracing::{info, warn};
use utils::process::{ExitOutcome, ProcessRunner};
use utils::semaphore::NamedSemaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// The worker exited cleanly; the stream is done.
    Terminated,
    /// Another process already holds the stream's lock.
    AlreadyLocked,
}

pub struct BackoffPolicy {
    pub step: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            step: Duration::from_millis(1000),
        }
    }
}

impl BackoffPolicy {
    fn delay_for(&self, restart_num: u32) -> Duration {
        self.step.saturating_mul(restart_num)
    }
}

/// Run the worker under supervision until it exits cleanly. `sem_name` is
/// the stream's input lock; failing to acquire it means another input
/// process already owns the stream.
pub async fn supervise(
    runner: &dyn ProcessRunner,
    args: &[String],
    sem_name: &str,
    policy: &BackoffPolicy,
) -> std::io::Result<SupervisorOutcome> {
    let sem = NamedSemaphore::open(sem_name)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    if !sem.try_wait() {
        return Ok(SupervisorOutcome::AlreadyLocked);
    }

    let outcome = run_with_restarts(runner, args, policy).await;

    sem.post();
    sem.unlink();
    outcome
}

async fn run_with_restarts(
    runner: &dyn ProcessRunner,
    args: &[String],
    policy: &BackoffPolicy,
) -> std::io::Result<SupervisorOutcome> {
    let mut restart_num = 0;
    loop {
        let mut child = runner.spawn(args).await?;
        info!(pid = ?child.id(), restart_num, "worker spawned");
        match child.wait().await? {
            ExitOutcome::Clean => {
                info!("worker exited cleanly");
                return Ok(SupervisorOutcome::Terminated);
            }
            ExitOutcome::Crashed => {
                let delay = policy.delay_for(restart_num);
                warn!(restart_num, ?delay, "worker crashed, restarting after backoff");
                tokio::time::sleep(delay).await;
                restart_num += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utils::process::MockRunner;

    #[tokio::test]
    async fn clean_exit_terminates_without_restart() {
        let runner = MockRunner::crash_then_clean(0);
        let policy = BackoffPolicy { step: Duration::from_millis(1) };
        let outcome = run_with_restarts(&runner, &[], &policy).await.unwrap();
        assert_eq!(outcome, SupervisorOutcome::Terminated);
        assert_eq!(runner.spawn_count(), 1);
    }

    #[tokio::test]
    async fn crashes_restart_then_succeed() {
        let runner = MockRunner::crash_then_clean(2);
        let policy = BackoffPolicy { step: Duration::from_millis(1) };
        let outcome = run_with_restarts(&runner, &[], &policy).await.unwrap();
        assert_eq!(outcome, SupervisorOutcome::Terminated);
        assert_eq!(runner.spawn_count(), 3);
    }

    #[test]
    fn delay_grows_linearly_with_restart_count() {
        let policy = BackoffPolicy { step: Duration::from_millis(1000) };
        assert_eq!(policy.delay_for(0), Duration::from_millis(0));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn second_supervisor_sees_the_lock_held() {
        let runner = MockRunner::new(|_| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            ExitOutcome::Clean
        });
        let sem_name = format!("/utils-test-supervise-{}", std::process::id());
        let policy = BackoffPolicy::default();

        let held = NamedSemaphore::open(&sem_name).unwrap();
        assert!(held.try_wait());

        let outcome = supervise(&runner, &[], &sem_name, &policy).await.unwrap();
        assert_eq!(outcome, SupervisorOutcome::AlreadyLocked);

        held.post();
        held.unlink();
    }
}
