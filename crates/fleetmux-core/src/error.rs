//! Error types for the orchestration core.
//!
//! Every failure mode is an explicit variant. Transient failures (timeouts,
//! missing external tools) are retried by callers; precondition failures
//! (self-approval, expired approvals, reservation overlap) are surfaced
//! immediately and never retried.

use thiserror::Error;

/// The result type for fleetmux operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fleetmux operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The terminal multiplexer binary is not installed or not reachable.
    #[error("multiplexer not available: {0}")]
    MultiplexerAbsent(String),

    /// An external command exited non-zero or could not be spawned.
    #[error("command failed: {0}")]
    Command(String),

    /// An external invocation exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Database error from the durable store.
    #[error("database error: {0}")]
    DatabaseError(String),

    /// Lookup target does not exist (for update/delete of a specific id).
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness or foreign-key constraint was violated.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Attempt to release a reservation that was already released.
    #[error("reservation already released: {0}")]
    AlreadyReleased(String),

    /// Two exclusive reservations cover overlapping path patterns.
    #[error("reservation conflict: {0}")]
    ReservationConflict(String),

    /// The requester of an approval may not approve it themselves.
    #[error("self-approval forbidden for approval {0}")]
    SelfApprovalForbidden(String),

    /// The approver is not in the approval's allowlist.
    #[error("approver '{approver}' not allowed for approval {id}")]
    ApproverNotAllowed { id: String, approver: String },

    /// The approval has already been approved, denied, or expired.
    #[error("approval {0} is no longer pending")]
    NoLongerPending(String),

    /// The approval (or reservation) expired before the operation.
    #[error("expired: {0}")]
    Expired(String),

    /// Input failed validation.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Parsing error.
    #[error("parse error: {0}")]
    ParseError(String),

    /// IO error description.
    #[error("io error: {0}")]
    IoError(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Machine-readable error code for the CLI / robot-mode boundary.
    ///
    /// External callers assert on codes, not on message wording.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MultiplexerAbsent(_) => ErrorCode::MultiplexerAbsent,
            Self::Command(_) => ErrorCode::CommandFailed,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::DatabaseError(_) => ErrorCode::DatabaseError,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::ConstraintViolation(_) => ErrorCode::ConstraintViolation,
            Self::AlreadyReleased(_) => ErrorCode::AlreadyReleased,
            Self::ReservationConflict(_) => ErrorCode::ReservationConflict,
            Self::SelfApprovalForbidden(_) => ErrorCode::SelfApprovalForbidden,
            Self::ApproverNotAllowed { .. } => ErrorCode::ApproverNotAllowed,
            Self::NoLongerPending(_) => ErrorCode::NoLongerPending,
            Self::Expired(_) => ErrorCode::Expired,
            Self::ValidationError(_) => ErrorCode::ValidationError,
            Self::ParseError(_) => ErrorCode::ParseError,
            Self::IoError(_) => ErrorCode::IoError,
            Self::InvalidConfig(_) => ErrorCode::InvalidConfig,
        }
    }

    /// Whether the error is transient and safe to retry for idempotent reads.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::MultiplexerAbsent(_) | Self::Command(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            other => {
                let msg = other.to_string();
                if msg.to_lowercase().contains("unique")
                    || msg.to_lowercase().contains("foreign key")
                {
                    Self::ConstraintViolation(msg)
                } else {
                    Self::DatabaseError(msg)
                }
            }
        }
    }
}

/// Machine-readable error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    MultiplexerAbsent,
    CommandFailed,
    Timeout,
    DatabaseError,
    NotFound,
    ConstraintViolation,
    AlreadyReleased,
    ReservationConflict,
    SelfApprovalForbidden,
    ApproverNotAllowed,
    NoLongerPending,
    Expired,
    ValidationError,
    ParseError,
    IoError,
    InvalidConfig,
}

impl ErrorCode {
    /// The `SCREAMING_SNAKE_CASE` form used in JSON payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MultiplexerAbsent => "MULTIPLEXER_ABSENT",
            Self::CommandFailed => "COMMAND_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::ConstraintViolation => "CONSTRAINT_VIOLATION",
            Self::AlreadyReleased => "ALREADY_RELEASED",
            Self::ReservationConflict => "RESERVATION_CONFLICT",
            Self::SelfApprovalForbidden => "SELF_APPROVAL_FORBIDDEN",
            Self::ApproverNotAllowed => "APPROVER_NOT_ALLOWED",
            Self::NoLongerPending => "NO_LONGER_PENDING",
            Self::Expired => "EXPIRED",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ParseError => "PARSE_ERROR",
            Self::IoError => "IO_ERROR",
            Self::InvalidConfig => "INVALID_CONFIG",
        }
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_str().to_string()
    }
}
