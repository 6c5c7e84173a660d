//! Per-attempt request parameters and URL-list normalization.

use reqwest::header::HeaderMap;
use reqwest::{Method, Url};
use std::time::Duration;

use crate::error::{Error, Result};

/// Free-form context handed to request tracers with every attempt.
pub type TraceContext = serde_json::Map<String, serde_json::Value>;

/// Key under which the 1-based attempt number is added to the trace context.
pub const CURRENT_ATTEMPT_KEY: &str = "current_attempt";

/// Options passed through to the transport unchanged on every attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub json: Option<serde_json::Value>,
    pub timeout: Option<Duration>,
}

/// Everything needed to send one attempt.
#[derive(Debug, Clone)]
pub struct RequestParams {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub trace_request_ctx: TraceContext,
    pub options: RequestOptions,
}

impl RequestParams {
    /// Params with no headers, trace context or options.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            trace_request_ctx: TraceContext::new(),
            options: RequestOptions::default(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_trace_request_ctx(mut self, ctx: TraceContext) -> Self {
        self.trace_request_ctx = ctx;
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Copy of these params for attempt `current_attempt` (1-based): the trace
    /// context gains `current_attempt`, with caller-supplied keys on top.
    pub fn for_attempt(&self, current_attempt: u32) -> RequestParams {
        let mut ctx = TraceContext::new();
        ctx.insert(CURRENT_ATTEMPT_KEY.to_string(), current_attempt.into());
        ctx.extend(
            self.trace_request_ctx
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        RequestParams {
            trace_request_ctx: ctx,
            ..self.clone()
        }
    }
}

/// One URL or an ordered list of URLs, one per attempt.
///
/// When there are fewer URLs than attempts the last one is reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Urls(Vec<String>);

impl Urls {
    /// Normalized URLs, in attempt order.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Parses every entry, joining relative ones onto `base`.
    ///
    /// Fails with `Error::InvalidArgument` when the list is empty or an entry
    /// is not a usable URL.
    pub fn resolve(&self, base: Option<&Url>) -> Result<Vec<Url>> {
        if self.0.is_empty() {
            return Err(Error::invalid_argument(
                "expected a URL or a non-empty list of URLs",
            ));
        }

        self.0
            .iter()
            .map(|raw| {
                let parsed = match base {
                    Some(base) => base.join(raw),
                    None => Url::parse(raw),
                };
                parsed.map_err(|e| Error::invalid_argument(format!("invalid URL '{}': {}", raw, e)))
            })
            .collect()
    }
}

impl From<&str> for Urls {
    fn from(url: &str) -> Self {
        Urls(vec![url.to_string()])
    }
}

impl From<String> for Urls {
    fn from(url: String) -> Self {
        Urls(vec![url])
    }
}

impl From<&String> for Urls {
    fn from(url: &String) -> Self {
        Urls(vec![url.clone()])
    }
}

impl From<Url> for Urls {
    fn from(url: Url) -> Self {
        Urls(vec![url.to_string()])
    }
}

impl From<&Url> for Urls {
    fn from(url: &Url) -> Self {
        Urls(vec![url.to_string()])
    }
}

impl<T: ToString> From<Vec<T>> for Urls {
    fn from(urls: Vec<T>) -> Self {
        Urls(urls.iter().map(ToString::to_string).collect())
    }
}

impl<T: ToString> From<&[T]> for Urls {
    fn from(urls: &[T]) -> Self {
        Urls(urls.iter().map(ToString::to_string).collect())
    }
}

impl<T: ToString, const N: usize> From<[T; N]> for Urls {
    fn from(urls: [T; N]) -> Self {
        Urls(urls.iter().map(ToString::to_string).collect())
    }
}

/// Picks the params for attempt `current_attempt` (1-based), reusing the last
/// entry when the list is shorter.
pub(crate) fn params_for_attempt(params: &[RequestParams], current_attempt: u32) -> Option<&RequestParams> {
    let index = usize::try_from(current_attempt.saturating_sub(1)).unwrap_or(usize::MAX);
    params.get(index).or_else(|| params.last())
}
