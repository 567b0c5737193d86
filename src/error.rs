//! Error kinds surfaced to callers of the execution engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal failure classes for an execution request.
///
/// Every variant carries enough detail for the caller to act on without
/// re-running the request: the matched phrase for safety blocks, the last
/// captured output for exhausted validation, the cancellation cause.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExecutorError {
    /// The request or generated code violates safety policy. No retry.
    #[error("blocked by safety policy: {0}")]
    BlockedBySafety(String),

    /// The policy oracle could not be reached. The gate fails closed.
    #[error("safety infrastructure unavailable: {0}")]
    SafetyInfrastructureUnavailable(String),

    /// A recent identical invocation was observed; no side effects occurred.
    #[error("duplicate invocation suppressed: {0}")]
    LoopDetected(String),

    /// The model call failed or its response contained no usable code.
    #[error("code generation failed: {0}")]
    CodeGenerationFailure(String),

    /// The retry budget was exhausted; carries the last output or error.
    #[error("validation failed after retries: {0}")]
    ValidationFailure(String),

    /// Both sandbox transports were unreachable.
    #[error("docker executor unavailable: {0}")]
    SandboxUnavailable(String),

    /// Cancellation was observed at an I/O boundary. Validation steps
    /// appended before the cancellation are preserved on the result.
    #[error("execution cancelled: {0}")]
    Cancelled(String),

    /// The chained-program request itself could not be parsed into programs.
    /// Individual program failures inside a chain do not use this variant.
    #[error("chained execution failed: {0}")]
    ChainedProgramFailure(String),
}

impl ExecutorError {
    /// Whether the failure came from the safety gate (either layer).
    pub fn is_safety_block(&self) -> bool {
        matches!(
            self,
            ExecutorError::BlockedBySafety(_) | ExecutorError::SafetyInfrastructureUnavailable(_)
        )
    }
}
