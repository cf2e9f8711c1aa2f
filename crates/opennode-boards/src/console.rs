//! Serial console access outside the bridge

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use opennode_core::{NodeError, NodeResult};
use serialport::ClearBuffer;
use tracing::{debug, error};

/// Node serial console
#[async_trait]
pub trait SerialConsole: Send + Sync {
    /// Drop bytes pending in the input buffer
    async fn clear_input(&self) -> NodeResult<()>;
}

/// Console on a TTY device
#[derive(Debug, Clone)]
pub struct TtyConsole {
    tty: PathBuf,
    baudrate: u32,
}

impl TtyConsole {
    pub fn new(tty: &Path, baudrate: u32) -> Self {
        Self {
            tty: tty.to_path_buf(),
            baudrate,
        }
    }
}

#[async_trait]
impl SerialConsole for TtyConsole {
    async fn clear_input(&self) -> NodeResult<()> {
        let tty = self.tty.clone();
        let baudrate = self.baudrate;

        let result = tokio::task::spawn_blocking(move || {
            let port = serialport::new(tty.to_string_lossy(), baudrate)
                .open()
                .map_err(|e| NodeError::DeviceOpen {
                    path: tty.clone(),
                    reason: e.to_string(),
                })?;
            port.clear(ClearBuffer::Input)
                .map_err(|e| NodeError::DeviceOpen {
                    path: tty.clone(),
                    reason: e.to_string(),
                })
        })
        .await
        .map_err(|e| NodeError::Io(format!("serial clear task: {}", e)))?;

        match &result {
            Ok(()) => debug!(tty = %self.tty.display(), "Serial input cleared"),
            Err(e) => error!(tty = %self.tty.display(), error = %e, "No serial port found"),
        }
        result
    }
}
