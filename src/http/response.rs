//! Response of a single attempt.

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::sync::{Mutex, PoisonError};

use crate::error::{Error, Result};

/// Response to one attempt.
///
/// Status, headers and URL stay readable after the body has been released.
/// Reading the body (`text`, `bytes`, `json`) consumes it and leaves the
/// response released; dropping the response releases it as well.
#[derive(Debug)]
pub struct Response {
    method: Method,
    url: Url,
    status: StatusCode,
    headers: HeaderMap,
    // reqwest::Response is Send but not guaranteed Sync; the mutex makes
    // `&Response` shareable across await points. Mutation goes through
    // `get_mut`, so it is never contended.
    body: Mutex<Option<reqwest::Response>>,
}

impl Response {
    /// Wraps a reqwest response together with the method that produced it.
    pub fn new(method: Method, response: reqwest::Response) -> Self {
        Self {
            method,
            url: response.url().clone(),
            status: response.status(),
            headers: response.headers().clone(),
            body: Mutex::new(Some(response)),
        }
    }

    /// Method of the request that produced this response.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Final URL, after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Status code of the response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Drops the body and returns the connection to the pool. Calling it
    /// again has no effect.
    pub fn release(&mut self) {
        if self.body_mut().take().is_some() {
            log::trace!("Released response body for {} {}", self.method, self.url);
        }
    }

    /// Whether the body has been read or released.
    pub fn is_released(&self) -> bool {
        self.body
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Returns `Error::Status` for 4xx and 5xx responses.
    pub fn error_for_status(&self) -> Result<()> {
        if self.status.is_client_error() || self.status.is_server_error() {
            return Err(Error::Status {
                status: self.status,
                url: self.url.clone(),
            });
        }
        Ok(())
    }

    fn body_mut(&mut self) -> &mut Option<reqwest::Response> {
        self.body.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_body(&mut self) -> Result<reqwest::Response> {
        self.body_mut()
            .take()
            .ok_or(Error::BodyReleased)
    }

    /// Reads the body as text. Fails with `Error::BodyReleased` on a second read.
    pub async fn text(&mut self) -> Result<String> {
        Ok(self.take_body()?.text().await?)
    }

    /// Reads the body as raw bytes.
    pub async fn bytes(&mut self) -> Result<Vec<u8>> {
        Ok(self.take_body()?.bytes().await?.to_vec())
    }

    /// Reads the body and deserializes it from JSON.
    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T> {
        Ok(self.take_body()?.json::<T>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> Response {
        let inner = ::http::Response::builder()
            .status(status)
            .header("x-test", "yes")
            .body(body.to_string())
            .unwrap();
        Response::new(Method::GET, reqwest::Response::from(inner))
    }

    #[tokio::test]
    async fn test_text_consumes_body() {
        let mut response = response(200, "Ok!");
        assert!(!response.is_released());

        assert_eq!(response.text().await.unwrap(), "Ok!");
        assert!(response.is_released());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-test"], "yes");

        let err = response.text().await.unwrap_err();
        assert!(err.is_body_released());
        assert!(!err.is_invalid_argument());
    }

    #[tokio::test]
    async fn test_json_body() {
        let mut response = response(200, r#"{"name": "test", "value": 42}"#);
        let value: serde_json::Value = response.json().await.unwrap();
        assert_eq!(value["value"], 42);
    }

    #[tokio::test]
    async fn test_read_after_release_fails() {
        let mut response = response(200, "Ok!");
        response.release();

        assert!(response.bytes().await.unwrap_err().is_body_released());
        let err = response.json::<serde_json::Value>().await.unwrap_err();
        assert!(matches!(err, Error::BodyReleased));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut response = response(200, "Ok!");
        response.release();
        response.release();
        assert!(response.is_released());
        assert_eq!(response.method(), &Method::GET);
    }

    #[test]
    fn test_response_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Response>();
    }

    #[test]
    fn test_error_for_status() {
        assert!(response(200, "").error_for_status().is_ok());
        assert!(response(302, "").error_for_status().is_ok());

        let err = response(404, "").error_for_status().unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));

        let err = response(500, "").error_for_status().unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
