//! The closed set of error tags the core itself can raise, plus the open
//! error type a handler can construct to override the response status.

use crate::status::StatusCode;
use std::{error, fmt};

/// A closed set of error tags raised internally by [`crate::body::BodyParser`]
/// and [`crate::context::HttpContext`]. Each carries a fixed message and a
/// default HTTP status; all instances are immutable singletons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Declared or accumulated body size exceeded the configured limit.
    BodyTooLarge,
    /// The transport observed the connection aborting mid-request.
    Aborted,
    /// A `Known`-mode ingest over- or under-shot the declared content-length.
    SizeMismatch,
    /// `json()` was called and the body did not parse as JSON.
    InvalidJSON,
    /// Catch-all for handler-side failures with no more specific status.
    ServerError,
}

impl ErrorKind {
    #[inline]
    pub const fn message(&self) -> &'static str {
        match self {
            ErrorKind::BodyTooLarge => "Request body too large",
            ErrorKind::Aborted => "Request aborted",
            ErrorKind::SizeMismatch => "Request body size mismatch",
            ErrorKind::InvalidJSON => "Invalid JSON",
            ErrorKind::ServerError => "Internal Server Error",
        }
    }

    #[inline]
    pub const fn status(&self) -> StatusCode {
        match self {
            ErrorKind::BodyTooLarge => StatusCode::PayloadTooLarge,
            ErrorKind::Aborted => StatusCode::ImaTeapot,
            ErrorKind::SizeMismatch => StatusCode::BadRequest,
            ErrorKind::InvalidJSON => StatusCode::BadRequest,
            ErrorKind::ServerError => StatusCode::InternalServerError,
        }
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// The open error type a handler returns to drive a non-200 response.
///
/// Mirrors the source's "a thrown value carrying a finite integer status
/// field" rule (§7): a [`HandlerError`] with `status` set produces
/// `<status> <canonical-text>` with a `text/plain` body equal to `message`;
/// one with `status: None` always surfaces as `500 Internal Server Error`,
/// regardless of `message`, matching "everything else produces 500".
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub status: Option<StatusCode>,
    pub message: String,
}

impl HandlerError {
    #[inline]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status: Some(status), message: message.into() }
    }

    /// An error with no valid status override; always renders as 500.
    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self { status: None, message: message.into() }
    }

    /// The status shown on the wire: the override if present, else 500.
    #[inline]
    pub fn effective_status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::InternalServerError)
    }

    /// The body text shown on the wire, per §7: the error's own message when
    /// a status override is present, else the fixed `Internal Server Error`
    /// text (an error without a usable status is indistinguishable on the
    /// wire from [`ErrorKind::ServerError`]).
    #[inline]
    pub fn effective_message(&self) -> &str {
        if self.status.is_some() {
            &self.message
        } else {
            ErrorKind::ServerError.message()
        }
    }
}

impl From<ErrorKind> for HandlerError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind.status(), kind.message())
    }
}

impl error::Error for HandlerError {}
impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_table_matches_the_closed_set() {
        let cases = [
            (ErrorKind::BodyTooLarge, "Request body too large", StatusCode::PayloadTooLarge),
            (ErrorKind::Aborted, "Request aborted", StatusCode::ImaTeapot),
            (ErrorKind::SizeMismatch, "Request body size mismatch", StatusCode::BadRequest),
            (ErrorKind::InvalidJSON, "Invalid JSON", StatusCode::BadRequest),
            (ErrorKind::ServerError, "Internal Server Error", StatusCode::InternalServerError),
        ];

        for (kind, message, status) in cases {
            assert_eq!(kind.message(), message);
            assert_eq!(kind.status(), status);
        }
    }

    #[test]
    fn handler_error_without_status_always_surfaces_as_500() {
        let err = HandlerError::internal("whatever the handler said");
        assert_eq!(err.effective_status(), StatusCode::InternalServerError);
        assert_eq!(err.effective_message(), "Internal Server Error");
    }

    #[test]
    fn handler_error_with_status_keeps_its_own_message() {
        let err = HandlerError::new(StatusCode::NotFound, "no such widget");
        assert_eq!(err.effective_status(), StatusCode::NotFound);
        assert_eq!(err.effective_message(), "no such widget");
    }

    #[test]
    fn from_error_kind_round_trips() {
        let err: HandlerError = ErrorKind::BodyTooLarge.into();
        assert_eq!(err.effective_status(), StatusCode::PayloadTooLarge);
        assert_eq!(err.effective_message(), "Request body too large");
    }
}
