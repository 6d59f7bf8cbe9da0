use thiserror::Error;

/// Failures a tool invocation can surface to the engine.
///
/// The [`Tool::call`] wrapper converts every variant into a failed step
/// result, so the step's error policy applies uniformly regardless of how
/// the invocation went wrong.
///
/// [`Tool::call`]: crate::tools::Tool::call
#[derive(Error, Debug)]
pub enum ToolError {
    /// Input passed parameter conformance but violates a constraint only
    /// the tool can check, such as a malformed `where` condition list or a
    /// value outside the tool's documented shape.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The system behind the tool failed: search index unreachable, mail
    /// relay refused, model call errored.
    #[error("Tool backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),

    /// Result data could not be serialized into the declared output shape.
    #[error("Output serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run's cancellation token fired; the invocation was abandoned.
    #[error("Invocation cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ToolError::Backend(Box::new(error))
    }
}
