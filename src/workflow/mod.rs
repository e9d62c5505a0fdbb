//! Workflow definitions, run records and the run coordinator.

pub mod coordinator;
pub mod definition;
pub mod error;
pub mod run;

pub use coordinator::WorkflowCoordinator;
pub use definition::{StageSpec, WorkflowDefinition};
pub use error::WorkflowError;
pub use run::{StageOutcome, WorkflowRun};
