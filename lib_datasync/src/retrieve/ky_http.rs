//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client around `reqwest` with optional retry middleware
//! and standardized JSON response handling. Transport failures are classified
//! into the [`SyncError`] taxonomy here, so callers never see `reqwest` errors.

use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use crate::errors::{Result, SyncError};

/// A standardized container for API responses.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized body of a 2xx response.
    pub data: Option<T>,
    /// The raw body of a non-2xx response.
    pub error_body: Option<String>,
    pub status: u16,
    /// Whether the status code was in the 2xx range.
    pub success: bool,
    pub headers: HeaderMap,
}

impl<T> ApiResponse<T> {
    /// Turns a non-2xx response into [`SyncError::UpstreamError`].
    pub fn into_data(self) -> Result<T> {
        match self.data {
            Some(data) if self.success => Ok(data),
            _ => Err(SyncError::UpstreamError {
                status: self.status,
                body: self.error_body.unwrap_or_default(),
            }),
        }
    }
}

/// A flexible asynchronous HTTP client.
///
/// Handles the base URL, Bearer authentication, the per-request timeout and,
/// when `max_retries > 0`, transparent retries of transient failures.
pub struct ApiClient {
    inner: ClientWithMiddleware,
    /// Always ends with `/`, so relative paths are appended rather than substituted.
    base_url: Url,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a client.
    ///
    /// # Arguments
    /// * `base_url` - Absolute base URL (e.g., "http://comlink:3000").
    /// * `auth_token` - Optional Bearer token.
    /// * `timeout` - Bound on each request, body included.
    /// * `max_retries` - Retries of transient failures; `0` disables the retry middleware.
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let url = Url::parse(&normalized)
            .map_err(|e| SyncError::Config(format!("invalid base URL '{base_url}': {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("HTTP client: {e}")))?;

        let mut builder = ClientBuilder::new(http);
        if max_retries > 0 {
            let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
            builder = builder.with(RetryTransientMiddleware::new_with_policy(retry_policy));
        }

        Ok(Self {
            inner: builder.build(),
            base_url: url,
            auth_token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a request and decodes a 2xx body as JSON.
    ///
    /// # Errors
    /// - [`SyncError::UpstreamTimeout`] when the request or body read times out.
    /// - [`SyncError::UpstreamUnreachable`] on connection-level failures.
    /// - [`SyncError::MalformedResponse`] when a 2xx body is not valid JSON for `T`.
    ///
    /// A non-2xx status is not an error here; it is reported in the [`ApiResponse`].
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        headers: Option<HeaderMap>,
        body: Option<B>,
    ) -> Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let req = self.prepare(method, path, headers, body)?;
        let response = req.send().await.map_err(|e| classify_middleware(path, e))?;
        let status = response.status();
        let resp_headers = response.headers().clone();

        if status.is_success() {
            let raw = response
                .bytes()
                .await
                .map_err(|e| classify_reqwest(path, e))?;
            let data = serde_json::from_slice::<T>(&raw)
                .map_err(|e| SyncError::MalformedResponse(format!("{path}: {e}")))?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }

    /// `POST`s a JSON body, ignoring any 2xx response body (e.g. `204 No Content`).
    ///
    /// Returns the status code of a successful response.
    pub async fn post_discard<B>(&self, path: &str, body: &B) -> Result<u16>
    where
        B: Serialize + ?Sized,
    {
        let req = self.prepare(Method::POST, path, None, Some(body))?;
        let response = req.send().await.map_err(|e| classify_middleware(path, e))?;
        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(SyncError::UpstreamError {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }

    /// Joins the URL and attaches headers, authentication and the JSON body.
    fn prepare<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        headers: Option<HeaderMap>,
        body: Option<B>,
    ) -> Result<RequestBuilder> {
        let full_url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| SyncError::Config(format!("invalid path '{path}': {e}")))?;
        let mut req = self.inner.request(method, full_url);

        if let Some(h) = headers {
            req = req.headers(h);
        }
        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(b) = body {
            let json_body = serde_json::to_string(&b)
                .map_err(|e| SyncError::Config(format!("request body for '{path}': {e}")))?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }
        Ok(req)
    }

    /// `POST`s a JSON body and returns the decoded 2xx body.
    pub async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request::<T, &B>(Method::POST, path, None, Some(body))
            .await?
            .into_data()
    }
}

fn classify_middleware(path: &str, err: reqwest_middleware::Error) -> SyncError {
    match err {
        reqwest_middleware::Error::Reqwest(e) => classify_reqwest(path, e),
        reqwest_middleware::Error::Middleware(e) => {
            SyncError::UpstreamUnreachable(format!("{path}: {e:#}"))
        }
    }
}

fn classify_reqwest(path: &str, err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::UpstreamTimeout(format!("{path}: {err}"))
    } else if err.is_decode() {
        SyncError::MalformedResponse(format!("{path}: {err}"))
    } else {
        SyncError::UpstreamUnreachable(format!("{path}: {err}"))
    }
}
