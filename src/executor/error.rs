use thiserror::Error;

use crate::validator::ValidationReport;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Procedure validation failed with {} error(s)", .0.errors.len())]
    ValidationFailed(ValidationReport),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
