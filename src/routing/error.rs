//! Error types for malformed routing input

use thiserror::Error;

/// Problems found in a routing context.
///
/// These never block a stage: the context is repaired and routing proceeds
/// on the moderate path.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RoutingError {
    /// The stage did not declare a complexity
    #[error("No complexity classification for task '{task_type}'")]
    MissingComplexity { task_type: String },

    /// Remaining budget is negative or not a number
    #[error("Invalid remaining budget: {remaining}")]
    InvalidBudget { remaining: f64 },

    /// Run budget is zero, negative or not a number
    #[error("Invalid run budget: {total}")]
    InvalidTotalBudget { total: f64 },
}
