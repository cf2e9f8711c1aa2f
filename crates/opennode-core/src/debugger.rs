//! Debugger collaborator used for flashing, resetting and debugging

use std::path::Path;

use async_trait::async_trait;

use crate::report::StepReport;

/// JTAG-style debugger attached to one node
///
/// Implementations own their idempotence: stopping a debugger that is not
/// running, or starting one that already runs, reports success.
#[async_trait]
pub trait Debugger: Send + Sync {
    /// Program `firmware` into the node's flash
    async fn flash(&self, firmware: &Path) -> StepReport;

    /// Hardware reset of the target
    async fn reset(&self) -> StepReport;

    /// Start a debug session (e.g. a GDB server)
    async fn debug_start(&self) -> StepReport;

    /// Stop the debug session, if any
    async fn debug_stop(&self) -> StepReport;
}
