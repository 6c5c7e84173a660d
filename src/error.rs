//! Error types returned by retried requests.

use reqwest::{StatusCode, Url};
use std::fmt;

use crate::retry::{ErrorKind, classify_error};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Terminal failure of a logical request, or a configuration problem caught
/// before any attempt was made.
#[derive(Debug)]
pub enum Error {
    /// URL input or policy configuration is unusable. No request was sent.
    InvalidArgument(String),
    /// The transport failed on the final attempt (or with a kind that is not
    /// retried).
    Transport(TransportError),
    /// Raise-for-status turned the terminal response into an error.
    Status { status: StatusCode, url: Url },
    /// A list-based policy was asked for a timeout past its last entry.
    AttemptOutOfRange { attempt: u32, len: usize },
    /// A configuration file could not be read or parsed.
    Config(String),
    /// The response body was already read or released.
    BodyReleased,
}

impl Error {
    /// The retry classification of this error, if it came from an attempt.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Transport(e) => Some(e.kind()),
            Error::Status { .. } => Some(ErrorKind::Status),
            Error::InvalidArgument(_)
            | Error::AttemptOutOfRange { .. }
            | Error::Config(_)
            | Error::BodyReleased => None,
        }
    }

    /// The status code carried by a raise-for-status error.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether raise-for-status produced this error.
    pub fn is_status(&self) -> bool {
        matches!(self, Error::Status { .. })
    }

    /// Whether the transport failed.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Whether the input was rejected before any attempt.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }

    /// Whether a response body was read after it was consumed or released.
    pub fn is_body_released(&self) -> bool {
        matches!(self, Error::BodyReleased)
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::Transport(e) => write!(f, "{}", e),
            Error::Status { status, url } => {
                write!(f, "HTTP status {} for url ({})", status, url)
            }
            Error::AttemptOutOfRange { attempt, len } => write!(
                f,
                "No timeout configured for attempt {} (only {} timeouts)",
                attempt, len
            ),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::BodyReleased => write!(f, "Response body was already read or released"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(error: TransportError) -> Self {
        Error::Transport(error)
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::Transport(TransportError::from(error))
    }
}

/// Failure reported by a [`Transport`](crate::http::Transport).
///
/// The underlying error is kept as the `source()` so callers can downcast it
/// (for example to `reqwest::Error`).
#[derive(Debug)]
pub struct TransportError {
    kind: ErrorKind,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl TransportError {
    /// An error with no underlying cause.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Wraps `source`, taking its message.
    pub fn with_source<E>(kind: ErrorKind, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Retry classification of the failure.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the wrapped error if it is of type `E`.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.source.as_deref().and_then(|e| e.downcast_ref::<E>())
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transport error ({}): {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        let kind = classify_error(&error);
        TransportError::with_source(kind, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::new(ErrorKind::Timeout, "deadline elapsed");
        assert_eq!(err.to_string(), "Transport error (timeout): deadline elapsed");
        assert!(err.source().is_none());
    }

    #[test]
    fn test_transport_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = TransportError::with_source(ErrorKind::Connect, io);

        assert_eq!(err.kind(), ErrorKind::Connect);
        assert!(err.to_string().contains("reset by peer"));
        let inner = err.downcast_ref::<std::io::Error>().unwrap();
        assert_eq!(inner.kind(), std::io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_error_kind_mapping() {
        let err = Error::from(TransportError::new(ErrorKind::Connect, "refused"));
        assert_eq!(err.kind(), Some(ErrorKind::Connect));
        assert!(err.is_transport());
        assert!(err.source().is_some());

        let err = Error::Status {
            status: StatusCode::NOT_FOUND,
            url: Url::parse("http://localhost/missing").unwrap(),
        };
        assert_eq!(err.kind(), Some(ErrorKind::Status));
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert!(err.to_string().contains("404"));

        let err = Error::invalid_argument("empty url list");
        assert_eq!(err.kind(), None);
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_body_released_is_its_own_kind() {
        let err = Error::BodyReleased;
        assert!(err.is_body_released());
        assert!(!err.is_invalid_argument());
        assert_eq!(err.kind(), None);
        assert!(err.to_string().contains("already read"));
    }

    #[test]
    fn test_attempt_out_of_range_display() {
        let err = Error::AttemptOutOfRange { attempt: 3, len: 3 };
        assert!(err.to_string().contains("attempt 3"));
        assert_eq!(err.kind(), None);
    }
}
