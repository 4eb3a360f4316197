use thiserror::Error;

use crate::http::Method;

/// Setup-time failures. Each one is a programming mistake in route or
/// configuration setup and should abort initialization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("path pattern must begin with '/': {0:?}")]
    MissingLeadingSlash(String),

    #[error("capture marker without a name in pattern {pattern:?}")]
    EmptyCaptureName { pattern: String },

    #[error("catch-all segment {segment:?} must be the last segment of {pattern:?}")]
    CatchAllNotTerminal { pattern: String, segment: String },

    #[error("capture name {name:?} appears more than once in {pattern:?}")]
    DuplicateCapture { pattern: String, name: String },

    #[error("catch-all {segment:?} in {pattern:?} conflicts with existing catch-all {existing:?}")]
    ConflictingCatchAll {
        pattern: String,
        segment: String,
        existing: String,
    },

    #[error("route already registered: {method} {path}")]
    DuplicateRoute { method: Method, path: String },

    #[error("invalid value {value:?} for setting {key}")]
    InvalidSetting { key: &'static str, value: String },
}

/// Request-time failure reported by a handler or middleware step.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Too many requests, retry after {retry_after}s")]
    TooManyRequests { retry_after: u64 },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Handler panicked: {0}")]
    Panic(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rate limit backend error: {0}")]
    Backend(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status code conventionally associated with this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::BadRequest(_) | Error::Json(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::TooManyRequests { .. } => 429,
            Error::Cancelled => 499,
            Error::DeadlineExceeded => 504,
            Error::Panic(_) | Error::Backend(_) | Error::Internal(_) => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::BadRequest(_) => "BAD_REQUEST",
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::TooManyRequests { .. } => "TOO_MANY_REQUESTS",
            Error::Cancelled => "CANCELLED",
            Error::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Error::Panic(_) => "PANIC",
            Error::Json(_) => "INVALID_JSON",
            Error::Backend(_) => "BACKEND_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Outcome of a handler or middleware step.
pub type HandlerResult = Result<(), Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::NotFound("x".into()).status_code(), 404);
        assert_eq!(Error::TooManyRequests { retry_after: 3 }.status_code(), 429);
        assert_eq!(Error::DeadlineExceeded.status_code(), 504);
        assert_eq!(Error::Panic("boom".into()).error_code(), "PANIC");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::DuplicateRoute {
            method: Method::Get,
            path: "/users".into(),
        };
        assert_eq!(err.to_string(), "route already registered: GET /users");
    }
}
