//! Retry policy: how many attempts, which outcomes qualify for a retry, and how
//! long to wait in between.

mod backoff;
mod classify;

use futures_util::future::BoxFuture;
use reqwest::Method;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::http::Response;

pub use backoff::{
    Backoff, BackoffStrategy, ExponentialBackoff, FibonacciBackoff, JitterBackoff, ListBackoff, RandomBackoff,
    RandomSource,
};
pub use classify::{ErrorKind, classify_error};

/// Default number of attempts, including the first one.
pub const DEFAULT_ATTEMPTS: u32 = 3;

const MIN_SERVER_ERROR_STATUS: u16 = 500;

/// Async predicate run on a response that matched no retry rule. Returning
/// `false` rejects the response and triggers a retry.
pub type EvaluateResponseCallback =
    Arc<dyn for<'a> Fn(&'a Response) -> BoxFuture<'a, bool> + Send + Sync>;

/// Methods retried by default.
pub fn default_methods() -> HashSet<Method> {
    [
        Method::HEAD,
        Method::GET,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
        Method::TRACE,
        Method::POST,
        Method::CONNECT,
        Method::PATCH,
    ]
    .into_iter()
    .collect()
}

/// A retry policy.
///
/// Built from a [`Backoff`] strategy and refined with the `with_*` setters:
///
/// ```
/// use http_retry::{ErrorKind, ExponentialBackoff, RetryOptions};
///
/// let options = RetryOptions::new(ExponentialBackoff::default())
///     .with_attempts(5)
///     .with_statuses([404, 429])
///     .with_exceptions([ErrorKind::Connect, ErrorKind::Timeout]);
/// assert_eq!(options.attempts(), 5);
/// ```
#[derive(Clone)]
pub struct RetryOptions {
    attempts: u32,
    statuses: HashSet<u16>,
    exceptions: HashSet<ErrorKind>,
    methods: HashSet<Method>,
    retry_all_server_errors: bool,
    evaluate_response_callback: Option<EvaluateResponseCallback>,
    backoff: Backoff,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::new(ExponentialBackoff::default())
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("attempts", &self.attempts)
            .field("statuses", &self.statuses)
            .field("exceptions", &self.exceptions)
            .field("methods", &self.methods)
            .field("retry_all_server_errors", &self.retry_all_server_errors)
            .field(
                "evaluate_response_callback",
                &self.evaluate_response_callback.is_some(),
            )
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl RetryOptions {
    /// A policy with [`DEFAULT_ATTEMPTS`] attempts, or as many attempts as a
    /// list backoff has entries.
    pub fn new(backoff: impl Into<Backoff>) -> Self {
        let backoff = backoff.into();
        let attempts = backoff.implied_attempts().unwrap_or(DEFAULT_ATTEMPTS).max(1);
        Self {
            attempts,
            statuses: HashSet::new(),
            exceptions: HashSet::new(),
            methods: default_methods(),
            retry_all_server_errors: true,
            evaluate_response_callback: None,
            backoff,
        }
    }

    /// Default policy with [`ExponentialBackoff`].
    pub fn exponential() -> Self {
        Self::new(ExponentialBackoff::default())
    }

    /// Default policy with [`RandomBackoff`].
    pub fn random() -> Self {
        Self::new(RandomBackoff::default())
    }

    /// Policy waiting `timeouts[i]` before retry `i`; attempts equal the list length.
    pub fn list(timeouts: Vec<Duration>) -> Result<Self> {
        Ok(Self::new(ListBackoff::new(timeouts)?))
    }

    /// Default policy with [`FibonacciBackoff`].
    pub fn fibonacci() -> Self {
        Self::new(FibonacciBackoff::default())
    }

    /// Default policy with [`JitterBackoff`].
    pub fn jitter() -> Self {
        Self::new(JitterBackoff::default())
    }

    /// Total attempts including the first. Zero is raised to one.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Status codes retried in addition to 5xx.
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    /// Error kinds that may be retried. Empty by default.
    pub fn with_exceptions(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.exceptions = kinds.into_iter().collect();
        self
    }

    /// Methods whose responses may be retried.
    pub fn with_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    /// Whether every 5xx response is retried.
    pub fn with_retry_all_server_errors(mut self, retry: bool) -> Self {
        self.retry_all_server_errors = retry;
        self
    }

    /// Sets the async check run on responses no status rule matched.
    pub fn with_evaluate_response_callback<F>(mut self, callback: F) -> Self
    where
        F: for<'a> Fn(&'a Response) -> BoxFuture<'a, bool> + Send + Sync + 'static,
    {
        self.evaluate_response_callback = Some(Arc::new(callback));
        self
    }

    /// Total attempts including the first.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Explicitly retried status codes.
    pub fn statuses(&self) -> &HashSet<u16> {
        &self.statuses
    }

    /// Retried error kinds.
    pub fn exceptions(&self) -> &HashSet<ErrorKind> {
        &self.exceptions
    }

    /// Methods eligible for retry.
    pub fn methods(&self) -> &HashSet<Method> {
        &self.methods
    }

    /// Whether 5xx responses are retried.
    pub fn retry_all_server_errors(&self) -> bool {
        self.retry_all_server_errors
    }

    /// The wait strategy.
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Wait before the next attempt; `attempt` is zero-based (the first retry
    /// passes 0). `response` is the response being retried, if there is one.
    pub fn get_timeout(&self, attempt: u32, response: Option<&Response>) -> Result<Duration> {
        self.backoff.timeout(attempt, response)
    }

    /// Whether a response received on `current_attempt` (1-based) should be
    /// dropped in favour of another attempt.
    pub async fn should_retry_response(&self, current_attempt: u32, response: &Response) -> bool {
        if current_attempt >= self.attempts {
            return false;
        }

        if !self.methods.contains(response.method()) {
            return false;
        }

        let status = response.status().as_u16();
        if status >= MIN_SERVER_ERROR_STATUS && self.retry_all_server_errors {
            return true;
        }

        if self.statuses.contains(&status) {
            return true;
        }

        match &self.evaluate_response_callback {
            Some(callback) => !callback(response).await,
            None => false,
        }
    }

    /// Whether an error raised on `current_attempt` (1-based) should be
    /// retried rather than returned.
    pub fn should_retry_error(&self, current_attempt: u32, error: &Error) -> bool {
        if current_attempt >= self.attempts {
            return false;
        }

        error
            .kind()
            .is_some_and(|kind| self.exceptions.contains(&kind))
    }
}
