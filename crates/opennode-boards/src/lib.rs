//! opennode-boards - Board variants of the open node
//!
//! Flashable boards share one [`NodeLifecycle`] parameterized by a
//! [`BoardConfig`]; the container variant is a separate [`ContainerNode`].
//! [`build_node`] picks the variant from the configured bridge kind.
//!
//! ```text
//!   GatewayConfig ──board()──▶ BoardConfig ──build_node──▶ Box<dyn OpenNode>
//!                                                   │
//!                              BridgeKind::Serial ──┼──▶ NodeLifecycle
//!                           BridgeKind::Container ──┴──▶ ContainerNode
//! ```

pub mod config;
pub mod console;
pub mod container;
pub mod lifecycle;
pub mod openocd;
pub mod tty;

pub use config::{BoardConfig, BridgeKind, ContainerConfig, GatewayConfig, Timeouts, ToolsSection};
pub use console::{SerialConsole, TtyConsole};
pub use container::ContainerNode;
pub use lifecycle::NodeLifecycle;
pub use openocd::OpenOcd;

use opennode_core::OpenNode;

/// Build the node variant described by `board`
pub fn build_node(board: BoardConfig, timeouts: Timeouts, tools: &ToolsSection) -> Box<dyn OpenNode> {
    match &board.bridge {
        BridgeKind::Container(container) => {
            Box::new(ContainerNode::new(container.clone(), &timeouts, tools))
        }
        BridgeKind::Serial => Box::new(NodeLifecycle::new(board, timeouts, tools)),
    }
}
