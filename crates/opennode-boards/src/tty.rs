//! Device presence waits
//!
//! Powering a node off and on makes its serial device vanish and come back
//! a moment later. Opening it too early binds a stale handle, so lifecycle
//! operations first give the device a chance to vanish, then wait for it.

use std::path::Path;
use std::time::Duration;

use opennode_core::{NodeError, StepReport};
use tokio::time::Instant;
use tracing::{debug, error};

/// Poll until `cond` holds or `timeout` expires; returns the last result
async fn wait_cond<F: Fn() -> bool>(cond: F, timeout: Duration, poll: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

/// Wait for `tty` to exist
pub async fn wait_tty(tty: &Path, timeout: Duration, poll: Duration) -> StepReport {
    if wait_cond(|| tty.exists(), timeout, poll).await {
        return StepReport::ok();
    }
    error!(tty = %tty.display(), "Error open node TTY not found");
    StepReport::fail(NodeError::DeviceTimeout {
        path: tty.to_path_buf(),
        appear: true,
        waited: timeout,
    })
}

/// Wait for `tty` to disappear
///
/// The device may well never vanish, so callers usually ignore the result.
pub async fn wait_no_tty(tty: &Path, timeout: Duration, poll: Duration) -> StepReport {
    if wait_cond(|| !tty.exists(), timeout, poll).await {
        return StepReport::ok();
    }
    debug!(tty = %tty.display(), "TTY still present");
    StepReport::fail(NodeError::DeviceTimeout {
        path: tty.to_path_buf(),
        appear: false,
        waited: timeout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const POLL: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn test_wait_tty_present() {
        let dir = TempDir::new().unwrap();
        let tty = dir.path().join("ttyON");
        std::fs::write(&tty, b"").unwrap();

        assert!(wait_tty(&tty, Duration::from_millis(50), POLL).await.is_ok());
        assert_eq!(
            wait_no_tty(&tty, Duration::from_millis(50), POLL).await.count(),
            1
        );
    }

    #[tokio::test]
    async fn test_wait_tty_missing() {
        let dir = TempDir::new().unwrap();
        let tty = dir.path().join("ttyON");

        let report = wait_tty(&tty, Duration::from_millis(50), POLL).await;
        assert_eq!(report.count(), 1);
        assert!(matches!(
            report.errors()[0],
            NodeError::DeviceTimeout { appear: true, .. }
        ));
        assert!(wait_no_tty(&tty, Duration::from_millis(50), POLL)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_wait_tty_reappears() {
        let dir = TempDir::new().unwrap();
        let tty = dir.path().join("ttyON");

        let path = tty.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            std::fs::write(&path, b"").unwrap();
        });

        assert!(wait_tty(&tty, Duration::from_secs(5), POLL).await.is_ok());
    }
}
