//! opennode-process - External processes driven by the gateway
//!
//! Two kinds of processes are involved in controlling a node:
//!
//! - one-shot tools (flasher, format converter, container control) run with
//!   a bounded time budget through [`ToolRunner`];
//! - long-running helpers (serial redirection, container shell) kept alive
//!   by a [`SupervisedProcess`] monitor task.
//!
//! ```text
//!   caller ──start()──▶ SupervisedProcess ──spawn──▶ child
//!                         │  desired: watch<bool>
//!                         ▼
//!                    monitor task ◀──wait()── child exits
//!                         │ desired == running → respawn
//!                         │ desired == stopped → SIGTERM, grace, SIGKILL
//! ```

pub mod bridge;
pub mod command;
pub mod supervised;

pub use bridge::{container_shell, serial_redirection, BRIDGE_PORT};
pub use command::{CommandSpec, ToolRunner};
pub use supervised::SupervisedProcess;
