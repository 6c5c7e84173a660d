//! Retrying HTTP client facade.

use futures_util::future::BoxFuture;
use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::Serialize;
use std::fmt;
use std::future::IntoFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::executor::RequestContext;
use crate::http::{
    RequestOptions, RequestParams, ReqwestTransport, Response, TraceContext, Transport, Urls,
};
use crate::logger::{LogLogger, Logger};
use crate::retry::RetryOptions;

/// Who is responsible for the transport's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ownership {
    Owned,
    Borrowed,
}

/// HTTP client whose requests are retried according to a [`RetryOptions`]
/// policy.
///
/// ```no_run
/// use http_retry::{RetryClient, RetryOptions};
///
/// # async fn run() -> http_retry::Result<()> {
/// let client = RetryClient::builder()
///     .retry_options(RetryOptions::exponential().with_attempts(5))
///     .build();
///
/// let mut response = client.get("https://example.com/ping").await?;
/// println!("{}", response.text().await?);
///
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct RetryClient {
    transport: Arc<dyn Transport>,
    ownership: Ownership,
    logger: Arc<dyn Logger>,
    retry_options: RwLock<Arc<RetryOptions>>,
    raise_for_status: bool,
    base_url: Option<Url>,
    closed: AtomicBool,
}

impl Default for RetryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RetryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryClient")
            .field("ownership", &self.ownership)
            .field("retry_options", &self.retry_options())
            .field("raise_for_status", &self.raise_for_status)
            .field("base_url", &self.base_url)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RetryClient {
    /// A client over a fresh `reqwest::Client` with the default policy.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts configuring a client.
    pub fn builder() -> RetryClientBuilder {
        RetryClientBuilder::default()
    }

    /// Current default policy.
    pub fn retry_options(&self) -> Arc<RetryOptions> {
        self.retry_options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the default policy. Requests already built keep the policy
    /// they were built with.
    pub fn set_retry_options(&self, options: RetryOptions) {
        *self.retry_options.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(options);
    }

    /// Whether requests fail on a 4xx or 5xx final response by default.
    pub fn raise_for_status(&self) -> bool {
        self.raise_for_status
    }

    /// URL that relative request URLs are joined onto.
    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// A request with any method. More than one URL switches URL on each retry.
    pub fn request(&self, method: Method, urls: impl Into<Urls>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Target::Urls(method, urls.into()))
    }

    /// A request whose method, URL and headers may change between attempts.
    /// Entry `i` is used for attempt `i + 1`; the last entry is reused when
    /// the list is shorter than the number of attempts.
    pub fn requests(&self, params_list: Vec<RequestParams>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Target::Params(params_list))
    }

    /// A `GET` request.
    pub fn get(&self, urls: impl Into<Urls>) -> RequestBuilder<'_> {
        self.request(Method::GET, urls)
    }

    /// An `OPTIONS` request.
    pub fn options(&self, urls: impl Into<Urls>) -> RequestBuilder<'_> {
        self.request(Method::OPTIONS, urls)
    }

    /// A `HEAD` request.
    pub fn head(&self, urls: impl Into<Urls>) -> RequestBuilder<'_> {
        self.request(Method::HEAD, urls)
    }

    /// A `POST` request.
    pub fn post(&self, urls: impl Into<Urls>) -> RequestBuilder<'_> {
        self.request(Method::POST, urls)
    }

    /// A `PUT` request.
    pub fn put(&self, urls: impl Into<Urls>) -> RequestBuilder<'_> {
        self.request(Method::PUT, urls)
    }

    /// A `PATCH` request.
    pub fn patch(&self, urls: impl Into<Urls>) -> RequestBuilder<'_> {
        self.request(Method::PATCH, urls)
    }

    /// A `DELETE` request.
    pub fn delete(&self, urls: impl Into<Urls>) -> RequestBuilder<'_> {
        self.request(Method::DELETE, urls)
    }

    /// Closes the transport. Calling it again has no effect.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.transport.close().await;
            debug!("Retry client closed");
        }
    }
}

impl Drop for RetryClient {
    fn drop(&mut self) {
        if self.ownership == Ownership::Owned && !self.is_closed() {
            self.logger.warning("Retry client was not closed");
        }
    }
}

/// Configures a [`RetryClient`].
#[derive(Default)]
pub struct RetryClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    logger: Option<Arc<dyn Logger>>,
    retry_options: Option<RetryOptions>,
    raise_for_status: bool,
    base_url: Option<Url>,
}

impl RetryClientBuilder {
    /// Uses a caller-supplied transport. The caller stays responsible for it,
    /// so dropping the client unclosed is not reported.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Logger for retry diagnostics. Defaults to [`LogLogger`].
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Default policy for requests made through the client.
    pub fn retry_options(mut self, options: RetryOptions) -> Self {
        self.retry_options = Some(options);
        self
    }

    /// Fail requests whose final response is 4xx or 5xx.
    pub fn raise_for_status(mut self, raise: bool) -> Self {
        self.raise_for_status = raise;
        self
    }

    /// Relative request URLs are joined onto this one.
    pub fn base_url(mut self, url: Url) -> Self {
        self.base_url = Some(url);
        self
    }

    /// Creates the client, with its own transport unless one was supplied.
    pub fn build(self) -> RetryClient {
        let (transport, ownership) = match self.transport {
            Some(transport) => (transport, Ownership::Borrowed),
            None => (
                Arc::new(ReqwestTransport::default()) as Arc<dyn Transport>,
                Ownership::Owned,
            ),
        };

        RetryClient {
            transport,
            ownership,
            logger: self.logger.unwrap_or_else(|| Arc::new(LogLogger)),
            retry_options: RwLock::new(Arc::new(self.retry_options.unwrap_or_default())),
            raise_for_status: self.raise_for_status,
            base_url: self.base_url,
            closed: AtomicBool::new(false),
        }
    }
}

enum Target {
    Urls(Method, Urls),
    Params(Vec<RequestParams>),
}

/// A request being configured. Await it, or call [`send`](Self::send), to run
/// it with retries; [`build`](Self::build) gives the [`RequestContext`] for
/// scoped use.
///
/// Headers, trace context and request options set here are applied to every
/// attempt, on top of whatever a [`RetryClient::requests`] entry already has.
#[must_use = "a request does nothing until it is sent"]
pub struct RequestBuilder<'a> {
    client: &'a RetryClient,
    target: Target,
    headers: HeaderMap,
    trace_request_ctx: TraceContext,
    options: RequestOptions,
    retry_options: Option<RetryOptions>,
    raise_for_status: Option<bool>,
    error: Option<Error>,
}

impl<'a> RequestBuilder<'a> {
    fn new(client: &'a RetryClient, target: Target) -> Self {
        Self {
            client,
            target,
            headers: HeaderMap::new(),
            trace_request_ctx: TraceContext::new(),
            options: RequestOptions::default(),
            retry_options: None,
            raise_for_status: None,
            error: None,
        }
    }

    /// Adds a header. An invalid name or value fails the request when it is sent.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        K::Error: fmt::Display,
        V: TryInto<HeaderValue>,
        V::Error: fmt::Display,
    {
        if self.error.is_some() {
            return self;
        }

        match (key.try_into(), value.try_into()) {
            (Ok(key), Ok(value)) => {
                self.headers.append(key, value);
            }
            (Err(e), _) => {
                self.error = Some(Error::invalid_argument(format!("invalid header name: {}", e)))
            }
            (_, Err(e)) => {
                self.error = Some(Error::invalid_argument(format!("invalid header value: {}", e)))
            }
        }
        self
    }

    /// Adds every header in `headers`.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Context handed to request tracers with every attempt.
    pub fn trace_request_ctx(mut self, ctx: TraceContext) -> Self {
        self.trace_request_ctx.extend(ctx);
        self
    }

    /// Appends query parameters.
    pub fn query<K: ToString, V: ToString>(mut self, pairs: &[(K, V)]) -> Self {
        self.options
            .query
            .extend(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    /// Raw request body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.options.body = Some(body.into());
        self
    }

    /// JSON request body. Also sets the content type.
    pub fn json<T: Serialize + ?Sized>(mut self, json: &T) -> Self {
        match serde_json::to_value(json) {
            Ok(value) => self.options.json = Some(value),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(Error::invalid_argument(format!("invalid JSON body: {}", e)));
                }
            }
        }
        self
    }

    /// Timeout for each attempt, not for the whole retried request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Overrides the client's default policy for this request.
    pub fn retry_options(mut self, options: RetryOptions) -> Self {
        self.retry_options = Some(options);
        self
    }

    /// Overrides the client's raise-for-status default for this request.
    pub fn raise_for_status(mut self, raise: bool) -> Self {
        self.raise_for_status = Some(raise);
        self
    }

    fn apply(&self, params: &mut RequestParams) {
        for (key, value) in &self.headers {
            params.headers.append(key.clone(), value.clone());
        }
        params.trace_request_ctx.extend(
            self.trace_request_ctx
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        params.options.query.extend(self.options.query.iter().cloned());
        if let Some(body) = &self.options.body {
            params.options.body = Some(body.clone());
        }
        if let Some(json) = &self.options.json {
            params.options.json = Some(json.clone());
        }
        if let Some(timeout) = self.options.timeout {
            params.options.timeout = Some(timeout);
        }
    }

    /// Resolves the URLs and binds the request to its policy. No I/O happens
    /// here; invalid input fails with `Error::InvalidArgument`.
    pub fn build(mut self) -> Result<RequestContext> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }

        let target = std::mem::replace(&mut self.target, Target::Params(Vec::new()));
        let mut params_list = match target {
            Target::Urls(method, urls) => urls
                .resolve(self.client.base_url())?
                .into_iter()
                .map(|url| RequestParams::new(method.clone(), url))
                .collect(),
            Target::Params(params_list) => params_list,
        };
        for params in &mut params_list {
            self.apply(params);
        }

        let retry_options = match self.retry_options.take() {
            Some(options) => Arc::new(options),
            None => self.client.retry_options(),
        };

        RequestContext::new(
            Arc::clone(&self.client.transport),
            params_list,
            Arc::clone(&self.client.logger),
            retry_options,
            self.raise_for_status.unwrap_or(self.client.raise_for_status),
        )
    }

    /// Runs the request and returns the final response.
    pub async fn send(self) -> Result<Response> {
        self.build()?.send().await
    }
}

impl<'a> IntoFuture for RequestBuilder<'a> {
    type Output = Result<Response>;
    type IntoFuture = BoxFuture<'a, Result<Response>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.send())
    }
}
