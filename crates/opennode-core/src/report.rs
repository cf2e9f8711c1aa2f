//! Aggregate result of a lifecycle operation
//!
//! Lifecycle operations never abort half-way: each sub-step contributes its
//! failures to a [`StepReport`] and the sequence carries on. `count()` is
//! the number of degraded sub-steps, `0` meaning full success.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use crate::error::NodeError;

/// Error count plus the failures that produced it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    errors: Vec<NodeError>,
}

impl StepReport {
    /// Successful step
    pub fn ok() -> Self {
        Self::default()
    }

    /// Step that failed with a single error
    pub fn fail(error: NodeError) -> Self {
        Self {
            errors: vec![error],
        }
    }

    /// Number of failed sub-steps
    pub fn count(&self) -> usize {
        self.errors.len()
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[NodeError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<NodeError> {
        self.errors
    }

    /// Record one more failure
    pub fn push(&mut self, error: NodeError) {
        self.errors.push(error);
    }
}

impl From<NodeError> for StepReport {
    fn from(error: NodeError) -> Self {
        Self::fail(error)
    }
}

impl<T> From<Result<T, NodeError>> for StepReport {
    fn from(result: Result<T, NodeError>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(e) => Self::fail(e),
        }
    }
}

impl AddAssign for StepReport {
    fn add_assign(&mut self, other: Self) {
        self.errors.extend(other.errors);
    }
}

impl Add for StepReport {
    type Output = StepReport;

    fn add(mut self, other: Self) -> Self {
        self += other;
        self
    }
}

impl Sum for StepReport {
    fn sum<I: Iterator<Item = StepReport>>(iter: I) -> Self {
        iter.fold(StepReport::ok(), Add::add)
    }
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "ok");
        }
        write!(f, "{} error(s)", self.errors.len())?;
        for e in &self.errors {
            write!(f, "; {}", e)?;
        }
        Ok(())
    }
}
