use thiserror::Error;

use crate::engine::TranslateError;
use crate::generator::GenerationError;
use crate::guard::GuardError;
use crate::router::RouteError;

/// Failure taxonomy of one pipeline attempt.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Destructive or stacked input. Fatal to the attempt.
    #[error(transparent)]
    UnsafeStatement(#[from] GuardError),

    /// Question intent and SQL shape disagree.
    #[error("statement does not match the question: {0}")]
    StructuralMismatch(String),

    /// The backend rejected the statement after bounded repair.
    #[error("execution failed: {0}")]
    ExecutionFailure(String),

    /// Outside the document-store subset.
    #[error(transparent)]
    TranslationUnsupported(#[from] TranslateError),

    /// Generator and fallback both produced nothing.
    #[error("no SQL could be generated: {0}")]
    GenerationUnavailable(#[from] GenerationError),

    #[error(transparent)]
    Route(#[from] RouteError),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::ExecutionFailure(_) | PipelineError::StructuralMismatch(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_execution_and_mismatch_retry() {
        assert!(PipelineError::ExecutionFailure("x".into()).is_retryable());
        assert!(PipelineError::StructuralMismatch("x".into()).is_retryable());
        assert!(!PipelineError::UnsafeStatement(GuardError::Empty).is_retryable());
        assert!(!PipelineError::GenerationUnavailable(GenerationError::Blank).is_retryable());
        assert!(
            !PipelineError::Route(RouteError::UnknownDialect("x".into())).is_retryable()
        );
    }

    #[test]
    fn test_guard_error_message_passes_through() {
        let err: PipelineError = GuardError::MultiStatement.into();
        assert_eq!(err.to_string(), "only a single statement is allowed");
    }
}
