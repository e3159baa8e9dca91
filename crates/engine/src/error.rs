//! Engine-wide error kinds (spec §7). Every error that reaches a Job's
//! `error` field is formatted as `{kind.token()}: {message}` so the UI can
//! categorize failures by their leading token without parsing prose.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or manifest; never retried.
    Validation,
    /// Transport error to the container manager or helper; retried in-step.
    Transient,
    /// Exclusion invariant violated (second active job, CTID race).
    Conflict,
    /// Helper-side policy rejection; fatal, surfaced verbatim minus secrets.
    Forbidden,
    /// Step-level deadline exceeded.
    Timeout,
    /// Explicit cancellation.
    Cancelled,
    /// Anything else past the point of no return.
    Fatal,
}

impl ErrorKind {
    pub fn token(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transient => "transient",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Error)]
#[error("{}: {message}", kind.token())]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    /// `transient` errors only: how many times this step has already retried.
    pub retry_count: u32,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_count: 0,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "job cancelled by request")
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// The string persisted on the Job row (spec §7: "stable short kind prefix").
    pub fn job_error_string(&self) -> String {
        format!("{}: {}", self.kind.token(), self.message)
    }

    /// Whether this step should trigger a rollback to a `rolling_back` state
    /// rather than a direct `failing` transition (spec §4.5.1, §4.5.4).
    pub fn triggers_rollback(&self) -> bool {
        !matches!(self.kind, ErrorKind::Conflict | ErrorKind::Validation)
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::transient(format!("store error: {e}"))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
