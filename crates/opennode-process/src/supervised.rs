//! Supervised long-running process
//!
//! A [`SupervisedProcess`] keeps one external command alive while its
//! desired state is "running". The desired state lives in a `watch` channel
//! shared with a single monitor task; the monitor owns the child handle and
//! is the only writer of the liveness flag.
//!
//! Restarts are immediate and unbounded: a command that keeps dying is
//! respawned each time and every exit is logged.

use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opennode_core::{NodeError, NodeResult};
use parking_lot::Mutex as SyncMutex;
use tokio::process::Child;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::command::CommandSpec;

/// Time given to a process to exit after SIGTERM before it is killed
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

/// External command kept running by a background monitor
pub struct SupervisedProcess {
    name: String,
    spec: CommandSpec,
    stop_grace: Duration,
    verbose: bool,
    desired: watch::Sender<bool>,
    alive: Arc<AtomicBool>,
    restarts: Arc<AtomicU64>,
    last_exit: Arc<SyncMutex<Option<NodeError>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl SupervisedProcess {
    pub fn new(name: impl Into<String>, spec: CommandSpec) -> Self {
        let (desired, _) = watch::channel(false);
        Self {
            name: name.into(),
            spec,
            stop_grace: DEFAULT_STOP_GRACE,
            verbose: false,
            desired,
            alive: Arc::new(AtomicBool::new(false)),
            restarts: Arc::new(AtomicU64::new(0)),
            last_exit: Arc::new(SyncMutex::new(None)),
            monitor: Mutex::new(None),
        }
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Forward the child's output to the gateway's stdout/stderr
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// Spawn the command and its monitor
    ///
    /// No-op when already running. Only a failure to spawn is reported; the
    /// process's later fate is the monitor's business.
    pub async fn start(&self) -> NodeResult<()> {
        let mut monitor = self.monitor.lock().await;

        if let Some(handle) = monitor.as_ref() {
            if !handle.is_finished() {
                debug!(process = %self.name, "Already running");
                return Ok(());
            }
        }
        // A monitor that gave up (respawn failure) is reaped before a fresh start
        if let Some(handle) = monitor.take() {
            let _ = handle.await;
        }

        let child = self.spec.spawn(self.verbose)?;
        self.desired.send_replace(true);
        self.alive.store(true, Ordering::SeqCst);

        let task = Monitor {
            name: self.name.clone(),
            spec: self.spec.clone(),
            stop_grace: self.stop_grace,
            verbose: self.verbose,
            alive: self.alive.clone(),
            restarts: self.restarts.clone(),
            last_exit: self.last_exit.clone(),
        };
        let desired = self.desired.subscribe();
        *monitor = Some(tokio::spawn(task.run(child, desired)));

        info!(process = %self.name, cmd = %self.spec, "Process started");
        Ok(())
    }

    /// Stop the process and wait for the monitor to finish
    ///
    /// Idempotent: stopping a stopped process returns immediately.
    pub async fn stop(&self) -> NodeResult<()> {
        let mut monitor = self.monitor.lock().await;
        let Some(handle) = monitor.take() else {
            debug!(process = %self.name, "Not running, nothing to stop");
            return Ok(());
        };

        self.desired.send_replace(false);
        if let Err(e) = handle.await {
            error!(process = %self.name, error = %e, "Monitor task failed");
        }
        self.alive.store(false, Ordering::SeqCst);

        info!(process = %self.name, "Process stopped");
        Ok(())
    }

    /// Liveness as last observed by the monitor
    pub fn is_running(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Number of automatic restarts since construction
    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Most recent exit that happened while the process was expected to run
    pub fn last_unexpected_exit(&self) -> Option<NodeError> {
        self.last_exit.lock().clone()
    }
}

impl Drop for SupervisedProcess {
    fn drop(&mut self) {
        // Dropping the monitor's child handle kills the process
        if let Some(handle) = self.monitor.get_mut().take() {
            handle.abort();
        }
    }
}

enum Event {
    Exited(std::io::Result<ExitStatus>),
    Desired(bool),
}

struct Monitor {
    name: String,
    spec: CommandSpec,
    stop_grace: Duration,
    verbose: bool,
    alive: Arc<AtomicBool>,
    restarts: Arc<AtomicU64>,
    last_exit: Arc<SyncMutex<Option<NodeError>>>,
}

impl Monitor {
    async fn run(self, mut child: Child, mut desired: watch::Receiver<bool>) {
        loop {
            let event = tokio::select! {
                status = child.wait() => Event::Exited(status),
                changed = desired.changed() => {
                    // Sender gone means the owner is gone: stop
                    Event::Desired(changed.is_ok() && *desired.borrow_and_update())
                }
            };

            match event {
                Event::Desired(true) => continue,
                Event::Desired(false) => {
                    self.terminate(&mut child).await;
                    self.alive.store(false, Ordering::SeqCst);
                    return;
                }
                Event::Exited(status) => {
                    self.alive.store(false, Ordering::SeqCst);
                    let status = describe(status);

                    if !*desired.borrow() {
                        debug!(process = %self.name, %status, "Process exited after stop request");
                        return;
                    }

                    let exit = NodeError::UnexpectedExit {
                        name: self.name.clone(),
                        status,
                    };
                    warn!(
                        process = %self.name,
                        error = %exit,
                        "Process exited while expected to run, restarting"
                    );
                    *self.last_exit.lock() = Some(exit);
                    self.restarts.fetch_add(1, Ordering::SeqCst);

                    match self.spec.spawn(self.verbose) {
                        Ok(new_child) => {
                            child = new_child;
                            self.alive.store(true, Ordering::SeqCst);
                        }
                        Err(e) => {
                            error!(process = %self.name, error = %e, "Restart failed, giving up");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// SIGTERM, then SIGKILL once the grace period is over
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: plain signal delivery to our own child's pid
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            match tokio::time::timeout(self.stop_grace, child.wait()).await {
                Ok(status) => {
                    debug!(process = %self.name, status = %describe(status), "Process terminated");
                    return;
                }
                Err(_) => {
                    warn!(
                        process = %self.name,
                        grace = ?self.stop_grace,
                        "Process ignored SIGTERM, killing"
                    );
                }
            }
        }

        if let Err(e) = child.kill().await {
            debug!(process = %self.name, error = %e, "Kill failed (already exited?)");
        }
    }
}

fn describe(status: std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(s) => s.to_string(),
        Err(e) => format!("wait failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opennode_core::NodeError;
    use std::time::Instant;

    async fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cond()
    }

    fn sleeper() -> SupervisedProcess {
        SupervisedProcess::new("sleeper", CommandSpec::new("sleep").arg("30"))
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let process = sleeper();
        assert!(!process.is_running());

        process.start().await.unwrap();
        assert!(process.is_running());

        process.stop().await.unwrap();
        assert!(!process.is_running());
        assert_eq!(process.restart_count(), 0);
        assert!(process.last_unexpected_exit().is_none());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let process = sleeper();
        process.start().await.unwrap();
        process.start().await.unwrap();
        assert!(process.is_running());
        process.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_twice_is_noop() {
        let process = sleeper();
        process.start().await.unwrap();
        process.stop().await.unwrap();

        let started = Instant::now();
        process.stop().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let process = sleeper();
        assert!(process.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_restart_on_unexpected_exit() {
        let process = SupervisedProcess::new(
            "short-lived",
            CommandSpec::new("sh").args(["-c", "sleep 0.2"]),
        );
        process.start().await.unwrap();

        assert!(wait_for(|| process.restart_count() >= 1, Duration::from_secs(5)).await);
        assert!(wait_for(|| process.is_running(), Duration::from_secs(5)).await);
        match process.last_unexpected_exit() {
            Some(NodeError::UnexpectedExit { name, status }) => {
                assert_eq!(name, "short-lived");
                assert!(status.contains('0'), "status: {}", status);
            }
            other => panic!("Expected unexpected exit, got {:?}", other),
        }

        process.stop().await.unwrap();
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn test_spawn_failure_reported_by_start() {
        let process = SupervisedProcess::new("ghost", CommandSpec::new("/nonexistent/bridge"));
        let err = process.start().await.unwrap_err();
        assert!(matches!(err, NodeError::Spawn { .. }));
        assert!(!process.is_running());
        assert!(process.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_kills_process_ignoring_sigterm() {
        let process = SupervisedProcess::new(
            "stubborn",
            CommandSpec::new("sh").args(["-c", "trap '' TERM; sleep 30"]),
        )
        .with_stop_grace(Duration::from_millis(200));
        process.start().await.unwrap();
        // let the shell install its trap
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        process.stop().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let process = sleeper();
        process.start().await.unwrap();
        process.stop().await.unwrap();
        process.start().await.unwrap();
        assert!(process.is_running());
        process.stop().await.unwrap();
    }
}
