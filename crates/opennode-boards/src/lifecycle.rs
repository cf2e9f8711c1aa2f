//! Shared lifecycle of flashable boards
//!
//! Every JTAG-flashed board runs the same sequence; only the
//! [`BoardConfig`] differs. Collaborators are trait objects so the sequence
//! can be driven against a real probe or a test double.
//!
//! ```text
//! setup(fw)    wait_no_tty ─▶ wait_tty ─▶ flash(fw) ─▶ bridge.start()
//! teardown()   wait_no_tty ─▶ wait_tty ─▶ debug_stop ─▶ bridge.stop() ─▶ flash(idle)
//! ```

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use opennode_core::{Debugger, NodeError, NodePhase, OpenNode, StepReport};
use opennode_firmware::{check_elf_target, CcfgVerdict, FirmwareVerifier};
use opennode_process::{serial_redirection, CommandSpec, SupervisedProcess};
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::{BoardConfig, Timeouts, ToolsSection};
use crate::console::{SerialConsole, TtyConsole};
use crate::openocd::OpenOcd;
use crate::tty::{wait_no_tty, wait_tty};

/// Open node flashed through a debugger, console bridged over TCP
pub struct NodeLifecycle {
    config: BoardConfig,
    timeouts: Timeouts,
    debugger: Arc<dyn Debugger>,
    console: Arc<dyn SerialConsole>,
    bridge: SupervisedProcess,
    verifier: FirmwareVerifier,
    phase: RwLock<NodePhase>,
}

impl NodeLifecycle {
    /// Node wired to the real collaborators: OpenOCD, the TTY and `socat`
    pub fn new(config: BoardConfig, timeouts: Timeouts, tools: &ToolsSection) -> Self {
        let debugger = OpenOcd::from_board(&config, timeouts.tool())
            .with_pidfile(&tools.debug_pidfile)
            .with_stop_grace(timeouts.stop_grace())
            .verbose(tools.verbose);
        let console = TtyConsole::new(&config.tty, config.baudrate);
        let bridge = serial_redirection(&config.tty, config.baudrate)
            .with_stop_grace(timeouts.stop_grace())
            .with_verbose(tools.verbose);
        let verifier = FirmwareVerifier::new()
            .with_timeout(timeouts.verify())
            .with_converter(CommandSpec::new(tools.objcopy.as_str()))
            .verbose(tools.verbose);

        Self {
            config,
            timeouts,
            debugger: Arc::new(debugger),
            console: Arc::new(console),
            bridge,
            verifier,
            phase: RwLock::new(NodePhase::Unconfigured),
        }
    }

    pub fn with_debugger(mut self, debugger: Arc<dyn Debugger>) -> Self {
        self.debugger = debugger;
        self
    }

    pub fn with_console(mut self, console: Arc<dyn SerialConsole>) -> Self {
        self.console = console;
        self
    }

    /// Replace the console bridge process
    pub fn with_bridge(mut self, bridge: SupervisedProcess) -> Self {
        self.bridge = bridge;
        self
    }

    pub fn with_verifier(mut self, verifier: FirmwareVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn bridge(&self) -> &SupervisedProcess {
        &self.bridge
    }

    fn set_phase(&self, phase: NodePhase) {
        let mut current = self.phase.write();
        if *current != phase {
            debug!(from = %*current, to = %phase, "Phase change");
            *current = phase;
        }
    }

    /// Give the device a chance to vanish, then wait for it
    ///
    /// A power cycle right before the operation makes the TTY disappear and
    /// reappear during the first seconds; only the reappearance counts.
    async fn wait_device(&self) -> StepReport {
        let tty = &self.config.tty;
        let poll = self.timeouts.tty_poll();
        let _ = wait_no_tty(tty, self.timeouts.tty_vanish(), poll).await;
        wait_tty(tty, self.timeouts.tty_appear(), poll).await
    }
}

#[async_trait]
impl OpenNode for NodeLifecycle {
    fn board_type(&self) -> &str {
        &self.config.board_type
    }

    fn phase(&self) -> NodePhase {
        *self.phase.read()
    }

    #[instrument(skip(self), fields(board = %self.config.board_type))]
    async fn setup(&self, firmware: Option<&Path>) -> StepReport {
        let mut report = self.wait_device().await;
        report += self.flash(firmware).await;

        let bridge = StepReport::from(self.bridge.start().await);
        let phase = if bridge.is_ok() {
            NodePhase::Running
        } else {
            NodePhase::Ready
        };
        report += bridge;
        self.set_phase(phase);

        info!(errors = report.count(), "Setup done");
        report
    }

    #[instrument(skip(self), fields(board = %self.config.board_type))]
    async fn teardown(&self) -> StepReport {
        let mut report = self.wait_device().await;
        // debugger holds the probe, release it before flashing
        report += self.debug_stop().await;
        report += StepReport::from(self.bridge.stop().await);
        report += self.flash(None).await;
        self.set_phase(NodePhase::Unconfigured);

        info!(errors = report.count(), "Teardown done");
        report
    }

    #[instrument(skip(self), fields(board = %self.config.board_type))]
    async fn flash(&self, firmware: Option<&Path>) -> StepReport {
        let firmware = firmware.unwrap_or(self.config.fw_idle.as_path());
        info!(firmware = %firmware.display(), "Flash firmware");

        let mut report = self.debugger.flash(firmware).await;
        if self.config.dirty_serial {
            report += StepReport::from(self.console.clear_input().await);
        }
        report
    }

    #[instrument(skip(self), fields(board = %self.config.board_type))]
    async fn reset(&self) -> StepReport {
        info!("Reset node");
        self.debugger.reset().await
    }

    async fn debug_start(&self) -> StepReport {
        info!(board = %self.config.board_type, "Node debugger start");
        self.debugger.debug_start().await
    }

    async fn debug_stop(&self) -> StepReport {
        info!(board = %self.config.board_type, "Node debugger stop");
        self.debugger.debug_stop().await
    }

    async fn status(&self) -> StepReport {
        // called while the node is powered off, nothing to check
        StepReport::ok()
    }

    #[instrument(skip(self), fields(board = %self.config.board_type))]
    async fn verify_firmware(&self, firmware: &Path) -> StepReport {
        let mut report = StepReport::ok();

        if let Some(target) = self.config.elf_target {
            report += StepReport::from(check_elf_target(firmware, target).await);
        }

        if self.config.check_ccfg {
            match self.verifier.verify(firmware).await {
                Ok(CcfgVerdict::Rejected(word)) => {
                    warn!(firmware = %firmware.display(), "Invalid CCFG bootloader configuration");
                    report.push(NodeError::VerificationRejected(format!(
                        "CCFG bootloader configuration {:02X?}",
                        word
                    )));
                }
                Ok(verdict) => debug!(?verdict, "CCFG accepted"),
                Err(e) => report.push(e),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn node() -> NodeLifecycle {
        let mut config = BoardConfig::preset("cc2650").unwrap();
        config.tty = PathBuf::from("/dev/opennode-missing-tty");
        let timeouts = Timeouts {
            tty_vanish_ms: 10,
            tty_appear_ms: 10,
            tty_poll_ms: 5,
            ..Timeouts::default()
        };
        NodeLifecycle::new(config, timeouts, &ToolsSection::default())
    }

    #[test]
    fn test_default_collaborators() {
        let node = node();
        assert_eq!(node.board_type(), "cc2650");
        assert_eq!(node.phase(), NodePhase::Unconfigured);
        assert_eq!(node.bridge().name(), "serial_redirection");
        assert!(node
            .bridge()
            .spec()
            .get_args()
            .contains(&"open:/dev/opennode-missing-tty,b115200,echo=0,raw".to_string()));
    }

    #[tokio::test]
    async fn test_status_without_hardware() {
        assert!(node().status().await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_missing_firmware() {
        let report = node()
            .verify_firmware(Path::new("/nonexistent/fw.elf"))
            .await;
        assert!(report.count() >= 1);
        assert!(matches!(report.errors()[0], NodeError::Io(_)));
    }
}
