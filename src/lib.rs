//! Retrying decorator around an asynchronous HTTP client.
//!
//! A [`RetryClient`] sends each logical request through a [`RequestContext`],
//! which repeats the underlying attempt according to a [`RetryOptions`]
//! policy: which statuses and error kinds qualify, which methods may be
//! retried, and how long to wait between attempts.

pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod logger;
pub mod retry;

pub use client::{RequestBuilder, RetryClient, RetryClientBuilder};
pub use config::{RetryConfig, StrategyConfig};
pub use error::{Error, Result, TransportError};
pub use executor::RequestContext;
pub use http::{
    CURRENT_ATTEMPT_KEY, RequestOptions, RequestParams, RequestTracer, ReqwestTransport,
    Response, TraceContext, Transport, Urls,
};
pub use logger::{LogLogger, Logger};
pub use retry::{
    Backoff, BackoffStrategy, ErrorKind, EvaluateResponseCallback, ExponentialBackoff,
    FibonacciBackoff, JitterBackoff, ListBackoff, RandomBackoff, RetryOptions,
};
