//! Error kinds used to decide whether a failed attempt may be retried.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// High-level classification of a failed attempt.
///
/// Retry policies hold an allow-set of these kinds; an error is only retried
/// when its kind is in that set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The connection could not be established (refused, DNS, TLS handshake).
    Connect,
    /// The request or the response did not finish in time.
    Timeout,
    /// The request could not be sent.
    Request,
    /// Reading or writing the body failed mid-transfer.
    Body,
    /// The response body could not be decoded.
    Decode,
    /// Redirect handling failed (loop or limit reached).
    Redirect,
    /// The transport was closed before the attempt.
    Closed,
    /// A 4xx/5xx status turned into an error by raise-for-status.
    Status,
    /// Anything else.
    Other,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 9] = [
        ErrorKind::Connect,
        ErrorKind::Timeout,
        ErrorKind::Request,
        ErrorKind::Body,
        ErrorKind::Decode,
        ErrorKind::Redirect,
        ErrorKind::Closed,
        ErrorKind::Status,
        ErrorKind::Other,
    ];

    /// Kinds that usually go away on their own: connection failures, timeouts
    /// and interrupted bodies.
    pub fn transient() -> [ErrorKind; 3] {
        [ErrorKind::Connect, ErrorKind::Timeout, ErrorKind::Body]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connect => "connect",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Request => "request",
            ErrorKind::Body => "body",
            ErrorKind::Decode => "decode",
            ErrorKind::Redirect => "redirect",
            ErrorKind::Closed => "closed",
            ErrorKind::Status => "status",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ErrorKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = ErrorKind::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown error kind '{}', expected one of: {}", s, known.join(", "))
            })
    }
}

/// Classifies a reqwest error into an [`ErrorKind`].
///
/// Timeouts are checked first: a connect timeout is reported as `Timeout`,
/// not `Connect`.
pub fn classify_error(error: &reqwest::Error) -> ErrorKind {
    if error.is_timeout() {
        ErrorKind::Timeout
    } else if error.is_connect() {
        ErrorKind::Connect
    } else if error.is_status() {
        ErrorKind::Status
    } else if error.is_redirect() {
        ErrorKind::Redirect
    } else if error.is_body() {
        ErrorKind::Body
    } else if error.is_decode() {
        ErrorKind::Decode
    } else if error.is_request() || error.is_builder() {
        ErrorKind::Request
    } else {
        ErrorKind::Other
    }
}
