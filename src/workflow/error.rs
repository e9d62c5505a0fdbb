//! Programmer errors in workflow definitions, raised before a run exists.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow '{0}' has no stages")]
    EmptyWorkflow(String),

    #[error("workflow '{workflow}' defines stage '{stage}' more than once")]
    DuplicateStage { workflow: String, stage: String },

    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("failed to read workflow file: {0}")]
    Io(#[from] std::io::Error),
}
