//! The underlying HTTP client: anything that can send one attempt.

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Method, Url};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::params::{CURRENT_ATTEMPT_KEY, RequestParams, TraceContext};
use super::response::Response;
use crate::error::TransportError;
use crate::retry::ErrorKind;

/// Sends single attempts. Retrying is the caller's job.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, params: RequestParams) -> Result<Response, TransportError>;

    /// Releases the client. Further requests may fail.
    async fn close(&self);
}

/// Observes every attempt right before it is dispatched.
#[cfg_attr(test, mockall::automock)]
pub trait RequestTracer: Send + Sync {
    fn on_request_start(&self, method: &Method, url: &Url, trace_request_ctx: &TraceContext);
}

/// [`Transport`] backed by a `reqwest::Client`.
pub struct ReqwestTransport {
    client: Client,
    tracers: Vec<Arc<dyn RequestTracer>>,
    closed: AtomicBool,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl ReqwestTransport {
    /// Wraps an existing `reqwest::Client`.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            tracers: Vec::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Notifies `tracer` around every attempt.
    pub fn with_tracer(mut self, tracer: Arc<dyn RequestTracer>) -> Self {
        self.tracers.push(tracer);
        self
    }

    /// Returns a reference to the underlying reqwest Client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Whether [`close`](Transport::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[tracing::instrument(
        skip(self, params),
        fields(
            method = %params.method,
            url = %params.url,
            current_attempt = ?params.trace_request_ctx.get(CURRENT_ATTEMPT_KEY),
        )
    )]
    async fn request(&self, params: RequestParams) -> Result<Response, TransportError> {
        if self.is_closed() {
            return Err(TransportError::new(
                ErrorKind::Closed,
                "the HTTP client has been closed",
            ));
        }

        for tracer in &self.tracers {
            tracer.on_request_start(&params.method, &params.url, &params.trace_request_ctx);
        }

        let RequestParams {
            method,
            url,
            headers,
            options,
            ..
        } = params;

        debug!("{} {}...", method, url);

        let mut builder = self.client.request(method.clone(), url).headers(headers);
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if let Some(json) = &options.json {
            builder = builder.json(json);
        }
        if let Some(body) = options.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(TransportError::from)?;

        Ok(Response::new(method, response))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("HTTP client closed");
        }
    }
}
