//! opennode-core - Core traits and types for open node control
//!
//! This crate provides the abstractions shared by every board variant:
//! the [`OpenNode`] lifecycle contract, the [`Debugger`] collaborator
//! used for flashing and resetting, and the [`StepReport`] aggregate that
//! lifecycle operations return instead of failing outright.

pub mod debugger;
pub mod error;
pub mod node;
pub mod report;

pub use debugger::Debugger;
pub use error::{NodeError, NodeResult};
pub use node::{NoNode, NodePhase, OpenNode};
pub use report::StepReport;
