//! Common error types for node control

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for fallible node operations
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors that can occur while driving an open node
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    /// Device path did not appear (or vanish) within the wait bound
    #[error("Device {} did not {} within {:?}", .path.display(), direction(.appear), .waited)]
    DeviceTimeout {
        path: PathBuf,
        /// `true` when waiting for the device to show up
        appear: bool,
        waited: Duration,
    },

    /// External tool exited with a non-zero status
    #[error("{tool} failed with exit code {code:?}")]
    ToolFailed {
        tool: String,
        /// Exit code, `None` when terminated by a signal
        code: Option<i32>,
    },

    /// External tool exceeded its time budget and was killed
    #[error("{tool} timed out after {timeout:?}")]
    ToolTimeout { tool: String, timeout: Duration },

    /// Process could not be spawned (missing binary, permission)
    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// Device path exists but cannot be opened
    #[error("Cannot open device {}: {reason}", .path.display())]
    DeviceOpen { path: PathBuf, reason: String },

    /// Supervised process died while it was expected to run
    #[error("{name} exited unexpectedly ({status})")]
    UnexpectedExit { name: String, status: String },

    /// Firmware rejected by a verification step
    #[error("Firmware rejected: {0}")]
    VerificationRejected(String),

    /// Local file handling failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

fn direction(appear: &bool) -> &'static str {
    if *appear {
        "appear"
    } else {
        "vanish"
    }
}

impl NodeError {
    /// Whether this error comes from an external tool invocation
    pub fn is_tool_error(&self) -> bool {
        matches!(
            self,
            NodeError::ToolFailed { .. } | NodeError::ToolTimeout { .. } | NodeError::Spawn { .. }
        )
    }
}
