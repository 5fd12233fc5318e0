//! Error taxonomy for the orchestration engine.
//!
//! Mirrors the manual `Display`/`Error` idiom used throughout the inherited
//! `cloudllm` module tree (see `OrchestrationError` in `orchestration.rs`)
//! rather than a derive-macro based error crate.

use std::error::Error;
use std::fmt;

/// The closed set of error kinds a task/step can terminate with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Raised by the Model Gateway on transport failure (network, malformed response).
    ModelTransport,
    /// Raised by the Model Gateway when the provider signals rate limiting.
    RateLimit,
    /// Raised by the scheduler when a step or task exceeds its configured timeout.
    Timeout,
    /// Raised by the task-scoped cancellation context.
    Cancelled,
    /// Raised by a Sub-Agent when the shared tool-call budget is exhausted.
    ToolBudgetExhausted,
    /// Raised by the Tool Registry when a tool handler itself fails.
    ToolHandlerError,
    /// Raised by the Sub-Agent's output parser when a final message is unparseable.
    InvalidOutput,
    /// Raised by the Supervisor when no parsable plan could be produced.
    PlanUnparseable,
    /// Raised by a scheduler invariant check; indicates a bug, not a recoverable condition.
    DependencyUnsatisfied,
    /// Raised by a flow mutation that would introduce a cycle; the mutation is rejected.
    CycleDetected,
    /// Catch-all for errors that do not fit the taxonomy above.
    Internal,
}

impl ErrorKind {
    /// Human readable tag matching the wording used in the error taxonomy.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ModelTransport => "model_transport",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::ToolBudgetExhausted => "tool_budget_exhausted",
            ErrorKind::ToolHandlerError => "tool_handler_error",
            ErrorKind::InvalidOutput => "invalid_output",
            ErrorKind::PlanUnparseable => "plan_unparseable",
            ErrorKind::DependencyUnsatisfied => "dependency_unsatisfied",
            ErrorKind::CycleDetected => "cycle_detected",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The orchestrator's top-level error type.
///
/// Errors never cross task boundaries uncaptured: the scheduler converts
/// every `OrchestratorError` produced while executing a step into that
/// step's `error` field and keeps running. Only operations on the Library
/// API itself (`submit`, `cancel`, ...) return this type to the caller.
#[derive(Debug)]
pub struct OrchestratorError {
    pub kind: ErrorKind,
    pub message: String,
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

impl OrchestratorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: Box<dyn Error + Send + Sync>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "task was cancelled")
    }
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

impl From<Box<dyn Error + Send + Sync>> for OrchestratorError {
    fn from(err: Box<dyn Error + Send + Sync>) -> Self {
        let message = err.to_string();
        OrchestratorError::with_source(ErrorKind::Internal, message, err)
    }
}
