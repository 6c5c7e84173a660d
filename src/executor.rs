//! Drives the attempt loop of one logical request.

use futures_util::future::BoxFuture;
use std::future::IntoFuture;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::http::{RequestParams, Response, Transport, params_for_attempt};
use crate::logger::Logger;
use crate::retry::RetryOptions;

/// One logical request, retried according to its [`RetryOptions`].
///
/// Await it to run the request and take ownership of the final response:
///
/// ```no_run
/// # async fn run(client: &http_retry::RetryClient) -> http_retry::Result<()> {
/// let mut response = client.get("https://example.com").build()?.await?;
/// println!("{}", response.text().await?);
/// # Ok(())
/// # }
/// ```
///
/// Or use it as a scope: [`enter`](Self::enter) keeps the response inside the
/// context, and [`exit`](Self::exit) (or dropping the context) releases it.
pub struct RequestContext {
    transport: Arc<dyn Transport>,
    params_list: Vec<RequestParams>,
    logger: Arc<dyn Logger>,
    retry_options: Arc<RetryOptions>,
    raise_for_status: bool,
    response: Option<Response>,
}

impl RequestContext {
    /// Binds a non-empty params list to a transport and a policy. Entry `i`
    /// is used for attempt `i + 1`.
    pub fn new(
        transport: Arc<dyn Transport>,
        params_list: Vec<RequestParams>,
        logger: Arc<dyn Logger>,
        retry_options: Arc<RetryOptions>,
        raise_for_status: bool,
    ) -> Result<Self> {
        if params_list.is_empty() {
            return Err(Error::invalid_argument(
                "at least one set of request parameters is required",
            ));
        }

        Ok(Self {
            transport,
            params_list,
            logger,
            retry_options,
            raise_for_status,
            response: None,
        })
    }

    /// Per-attempt parameters, in attempt order.
    pub fn params_list(&self) -> &[RequestParams] {
        &self.params_list
    }

    /// The policy this request runs under.
    pub fn retry_options(&self) -> &RetryOptions {
        &self.retry_options
    }

    /// Whether a final 4xx/5xx response becomes `Error::Status`.
    pub fn raise_for_status(&self) -> bool {
        self.raise_for_status
    }

    /// Runs the request and hands the final response to the caller.
    pub async fn send(self) -> Result<Response> {
        self.do_request().await
    }

    /// Runs the request and keeps the final response in this context until
    /// [`exit`](Self::exit) or drop. A response held from an earlier call is
    /// released first.
    pub async fn enter(&mut self) -> Result<&mut Response> {
        self.exit();
        let response = self.do_request().await?;
        Ok(self.response.insert(response))
    }

    /// Releases the held response, if any. Safe to call more than once.
    pub fn exit(&mut self) {
        if let Some(mut response) = self.response.take() {
            response.release();
        }
    }

    /// The response kept by [`enter`](Self::enter).
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    #[tracing::instrument(
        skip(self),
        fields(
            method = %self.params_list[0].method,
            url = %self.params_list[0].url,
            attempts = self.retry_options.attempts(),
        )
    )]
    async fn do_request(&self) -> Result<Response> {
        let attempts = self.retry_options.attempts();
        let mut current_attempt = 0;

        loop {
            self.logger
                .debug(&format!("Attempt {} out of {}", current_attempt + 1, attempts));
            current_attempt += 1;

            let params = params_for_attempt(&self.params_list, current_attempt)
                .ok_or_else(|| Error::invalid_argument("no request parameters"))?
                .for_attempt(current_attempt);

            let error = match self.transport.request(params).await {
                Ok(mut response) => {
                    if self
                        .retry_options
                        .should_retry_response(current_attempt, &response)
                        .await
                    {
                        let timeout = self
                            .retry_options
                            .get_timeout(current_attempt - 1, Some(&response));
                        // Release before sleeping so two bodies from the same
                        // pool are never held at once.
                        response.release();
                        self.logger.debug(&format!(
                            "Retrying after response code: {}",
                            response.status().as_u16()
                        ));
                        tokio::time::sleep(timeout?).await;
                        continue;
                    }

                    match self.finish(response) {
                        Ok(response) => return Ok(response),
                        Err(e) => e,
                    }
                }
                Err(e) => Error::Transport(e),
            };

            if !self.retry_options.should_retry_error(current_attempt, &error) {
                if attempts > 1 && current_attempt >= attempts {
                    self.logger.exception(&format!(
                        "Giving up after {} attempts: {}",
                        current_attempt, error
                    ));
                }
                return Err(error);
            }

            self.logger
                .debug(&format!("Retrying after exception: {}", error));
            let timeout = self.retry_options.get_timeout(current_attempt - 1, None)?;
            tokio::time::sleep(timeout).await;
        }
    }

    /// Applies raise-for-status to a terminal response.
    fn finish(&self, mut response: Response) -> Result<Response> {
        if self.raise_for_status {
            if let Err(e) = response.error_for_status() {
                response.release();
                return Err(e);
            }
        }
        Ok(response)
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        self.exit();
    }
}

impl IntoFuture for RequestContext {
    type Output = Result<Response>;
    type IntoFuture = BoxFuture<'static, Result<Response>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.send())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::http::{CURRENT_ATTEMPT_KEY, MockTransport, TraceContext};
    use crate::logger::{LogLogger, MockLogger};
    use crate::retry::{Backoff, ErrorKind, ExponentialBackoff, ListBackoff};
    use crate::test_utils::{response, zero_wait_options};
    use reqwest::{Method, StatusCode, Url};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn params(path: &str) -> RequestParams {
        let url = Url::parse("http://localhost").unwrap().join(path).unwrap();
        RequestParams::new(Method::GET, url)
    }

    fn context(transport: MockTransport, options: RetryOptions, raise_for_status: bool) -> RequestContext {
        RequestContext::new(
            Arc::new(transport),
            vec![params("/test")],
            Arc::new(LogLogger),
            Arc::new(options),
            raise_for_status,
        )
        .unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn test_success_on_first_attempt() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .times(1)
            .returning(|_| Ok(response(Method::GET, 200, "Ok!")));

        let mut response = context(transport, zero_wait_options(3), false)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "Ok!");
    }

    #[test_log::test(tokio::test)]
    async fn test_always_server_error_uses_all_attempts() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .times(5)
            .returning(|_| Ok(response(Method::GET, 500, "")));

        let response = context(transport, zero_wait_options(5), false)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!response.is_released());
    }

    #[test_log::test(tokio::test)]
    async fn test_succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut transport = MockTransport::new();
        transport.expect_request().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(response(Method::GET, 500, ""))
            } else {
                Ok(response(Method::GET, 200, "Ok!"))
            }
        });

        let mut response = context(transport, zero_wait_options(5), false)
            .await
            .unwrap();

        assert_eq!(response.text().await.unwrap(), "Ok!");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_server_errors_not_retried_when_disabled() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .times(1)
            .returning(|_| Ok(response(Method::GET, 500, "")));

        let options = zero_wait_options(5).with_retry_all_server_errors(false);
        let response = context(transport, options, false).await.unwrap();

        assert_eq!(response.status(), 500);
    }

    #[tokio::test]
    async fn test_method_not_in_retry_methods() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .times(1)
            .returning(|_| Ok(response(Method::GET, 500, "")));

        let options = zero_wait_options(5).with_methods([Method::POST]);
        let response = context(transport, options, false).await.unwrap();

        assert_eq!(response.status(), 500);
    }

    #[tokio::test]
    async fn test_transport_error_not_allow_listed_propagates() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .times(1)
            .returning(|_| Err(TransportError::new(ErrorKind::Timeout, "timed out")));

        let options = zero_wait_options(5).with_exceptions([ErrorKind::Connect]);
        let err = context(transport, options, false).await.unwrap_err();

        assert_eq!(err.kind(), Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_transport_error_retried_then_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut transport = MockTransport::new();
        transport.expect_request().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TransportError::new(ErrorKind::Connect, "connection refused"))
            } else {
                Ok(response(Method::GET, 200, "Ok!"))
            }
        });

        let options = zero_wait_options(3).with_exceptions([ErrorKind::Connect]);
        let response = context(transport, options, false).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_last_error_surfaces_after_exhaustion() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut transport = MockTransport::new();
        transport.expect_request().times(3).returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Err(TransportError::new(ErrorKind::Connect, format!("failure {}", n)))
        });

        let options = zero_wait_options(3).with_exceptions([ErrorKind::Connect]);
        let err = context(transport, options, false).await.unwrap_err();

        assert!(err.is_transport());
        assert!(err.to_string().contains("failure 3"));
    }

    #[tokio::test]
    async fn test_raise_for_status() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .times(5)
            .returning(|_| Ok(response(Method::GET, 404, "")));

        let options = zero_wait_options(5).with_statuses([404]);
        let err = context(transport, options, true).await.unwrap_err();

        assert!(err.is_status());
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_raise_for_status_retried_when_allow_listed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut transport = MockTransport::new();
        transport.expect_request().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(response(Method::GET, 404, ""))
            } else {
                Ok(response(Method::GET, 200, "Ok!"))
            }
        });

        let options = zero_wait_options(5).with_exceptions([ErrorKind::Status]);
        let response = context(transport, options, true).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_urls_change_between_attempts() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);

        let mut transport = MockTransport::new();
        transport.expect_request().returning(move |params| {
            let path = params.url.path().to_string();
            recorder.lock().unwrap().push(path.clone());
            let status = if path == "/ping" { 200 } else { 500 };
            Ok(response(Method::GET, status, ""))
        });

        let ctx = RequestContext::new(
            Arc::new(transport),
            vec![params("/internal_error"), params("/internal_error"), params("/ping")],
            Arc::new(LogLogger),
            Arc::new(zero_wait_options(5)),
            false,
        )
        .unwrap();
        let response = ctx.await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["/internal_error", "/internal_error", "/ping"]
        );
    }

    #[tokio::test]
    async fn test_last_params_reused() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);

        let mut transport = MockTransport::new();
        transport.expect_request().times(4).returning(move |params| {
            recorder.lock().unwrap().push(params.url.path().to_string());
            Ok(response(Method::GET, 500, ""))
        });

        let ctx = RequestContext::new(
            Arc::new(transport),
            vec![params("/first"), params("/second")],
            Arc::new(LogLogger),
            Arc::new(zero_wait_options(4)),
            false,
        )
        .unwrap();
        ctx.await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["/first", "/second", "/second", "/second"]
        );
    }

    #[tokio::test]
    async fn test_trace_ctx_per_attempt() {
        let seen: Arc<Mutex<Vec<TraceContext>>> = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut transport = MockTransport::new();
        transport.expect_request().returning(move |params| {
            recorder.lock().unwrap().push(params.trace_request_ctx.clone());
            let status = if calls.fetch_add(1, Ordering::SeqCst) < 2 { 500 } else { 200 };
            Ok(response(Method::GET, status, ""))
        });

        let mut ctx = TraceContext::new();
        ctx.insert("foo".to_string(), json!("bar"));
        let request = RequestContext::new(
            Arc::new(transport),
            vec![params("/sometimes_error").with_trace_request_ctx(ctx)],
            Arc::new(LogLogger),
            Arc::new(zero_wait_options(5)),
            false,
        )
        .unwrap();
        request.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        for (i, ctx) in seen.iter().enumerate() {
            assert_eq!(ctx["foo"], json!("bar"));
            assert_eq!(ctx[CURRENT_ATTEMPT_KEY], json!(i + 1));
        }
    }

    #[tokio::test]
    async fn test_empty_params_rejected() {
        let transport = MockTransport::new();
        let err = RequestContext::new(
            Arc::new(transport),
            Vec::new(),
            Arc::new(LogLogger),
            Arc::new(RetryOptions::default()),
            false,
        )
        .err()
        .unwrap();

        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn test_enter_holds_and_exit_releases() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .times(1)
            .returning(|_| Ok(response(Method::GET, 200, "Ok!")));

        let mut ctx = context(transport, zero_wait_options(3), false);
        let response = ctx.enter().await.unwrap();
        assert_eq!(response.status(), 200);
        assert!(!response.is_released());

        ctx.exit();
        assert!(ctx.response().is_none());
        ctx.exit();
        assert!(ctx.response().is_none());
    }

    #[tokio::test]
    async fn test_enter_read_body_then_drop() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .times(1)
            .returning(|_| Ok(response(Method::GET, 200, "Ok!")));

        let mut ctx = context(transport, zero_wait_options(3), false);
        {
            let response = ctx.enter().await.unwrap();
            assert_eq!(response.text().await.unwrap(), "Ok!");
        }
        assert!(ctx.response().unwrap().is_released());
        drop(ctx);
    }

    #[tokio::test]
    async fn test_list_backoff_attempts() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .times(3)
            .returning(|_| Ok(response(Method::GET, 500, "")));

        let options = RetryOptions::new(ListBackoff::new(vec![Duration::ZERO; 3]).unwrap());
        let response = context(transport, options, false).await.unwrap();

        assert_eq!(response.status(), 500);
    }

    #[tokio::test]
    async fn test_list_backoff_too_short_for_attempts() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .times(2)
            .returning(|_| Ok(response(Method::GET, 500, "")));

        let options = RetryOptions::new(ListBackoff::new(vec![Duration::ZERO]).unwrap()).with_attempts(3);
        let err = context(transport, options, false).await.unwrap_err();

        assert!(matches!(err, Error::AttemptOutOfRange { attempt: 1, len: 1 }));
    }

    #[tokio::test]
    async fn test_cancelled_during_wait_stops_attempts() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .times(1)
            .returning(|_| Ok(response(Method::GET, 500, "")));

        let backoff = ExponentialBackoff::new(Duration::from_secs(60), Duration::from_secs(60), 1.0);
        let options = RetryOptions::new(backoff).with_attempts(5);
        let ctx = context(transport, options, false);

        let result = tokio::time::timeout(Duration::from_millis(50), ctx.send()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_waits_between_attempts() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .times(3)
            .returning(|_| Ok(response(Method::GET, 500, "")));

        let backoff = ExponentialBackoff::new(Duration::from_millis(20), Duration::from_secs(1), 2.0);
        let options = RetryOptions::new(backoff).with_attempts(3);

        let start = std::time::Instant::now();
        context(transport, options, false).await.unwrap();

        // 20ms + 40ms
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_custom_backoff_sees_retried_response() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let backoff = Backoff::custom(move |_attempt: u32, response: Option<&Response>| -> Result<Duration> {
            recorder
                .lock()
                .unwrap()
                .push(response.map(|r| (r.status().as_u16(), r.is_released())));
            Ok(Duration::ZERO)
        });

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut transport = MockTransport::new();
        transport.expect_request().times(3).returning(move |_| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(response(Method::GET, 503, "")),
                1 => Err(TransportError::new(ErrorKind::Connect, "refused")),
                _ => Ok(response(Method::GET, 200, "Ok!")),
            }
        });

        let options = RetryOptions::new(backoff)
            .with_attempts(5)
            .with_exceptions([ErrorKind::Connect]);
        let response = context(transport, options, false).await.unwrap();

        assert_eq!(response.status(), 200);
        // The strategy runs before the body is released
        assert_eq!(*seen.lock().unwrap(), vec![Some((503, false)), None]);
    }

    fn context_with_logger(
        transport: MockTransport,
        logger: MockLogger,
        options: RetryOptions,
    ) -> RequestContext {
        RequestContext::new(
            Arc::new(transport),
            vec![params("/test")],
            Arc::new(logger),
            Arc::new(options),
            false,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_exhaustion_logged_as_exception() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .times(3)
            .returning(|_| Err(TransportError::new(ErrorKind::Connect, "refused")));

        let mut logger = MockLogger::new();
        logger.expect_debug().return_const(());
        logger
            .expect_exception()
            .withf(|msg| msg.contains("Giving up after 3 attempts"))
            .times(1)
            .return_const(());

        let options = zero_wait_options(3).with_exceptions([ErrorKind::Connect]);
        context_with_logger(transport, logger, options)
            .await
            .unwrap_err();
    }

    #[tokio::test]
    async fn test_non_retryable_error_after_retry_not_logged_as_exhaustion() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut transport = MockTransport::new();
        transport.expect_request().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(response(Method::GET, 500, ""))
            } else {
                Err(TransportError::new(ErrorKind::Timeout, "timed out"))
            }
        });

        let mut logger = MockLogger::new();
        logger.expect_debug().return_const(());
        logger.expect_exception().never();

        let err = context_with_logger(transport, logger, zero_wait_options(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let transport = MockTransport::new();
        let ctx = context(transport, zero_wait_options(1), false);
        let future = ctx.into_future();
        assert_send(&future);
    }
}
