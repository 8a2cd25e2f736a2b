//! Retrying HTTP executor.
//!
//! Every logical request is retried on transient failures (timeouts, connection
//! errors, `429` and `5xx`) with jittered exponential backoff. A `Retry-After`
//! header replaces the computed delay. Request bodies are buffered once and
//! replayed byte-for-byte, so an L2 signature computed over them stays valid
//! across attempts.

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff as _;
use bon::Builder;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client as ReqwestClient, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::Result;
use crate::error::{Error, RetriesExhausted};

const JITTER: f64 = 0.25;
const MULTIPLIER: f64 = 2.0;

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Builder)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    #[builder(default = 3)]
    pub max_retries: u32,
    #[builder(default = Duration::from_millis(100))]
    pub base_delay: Duration,
    #[builder(default = Duration::from_secs(5))]
    pub max_delay: Duration,
    /// Per-attempt timeout.
    #[builder(default = Duration::from_secs(10))]
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::builder().build()
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_randomization_factor(JITTER)
            .with_multiplier(MULTIPLIER)
            .with_max_interval(self.max_delay)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// A request relative to the transport's base URL.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl Request {
    #[must_use]
    pub fn new<S: Into<String>>(method: Method, path: S) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn get<S: Into<String>>(path: S) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post<S: Into<String>>(path: S) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn delete<S: Into<String>>(path: S) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn query<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    #[must_use]
    pub fn body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `body` once; the same bytes are signed and sent on every attempt.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = Some(Bytes::from(serde_json::to_vec(body)?));
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(self)
    }

    /// Bytes that will be sent, for signing.
    #[must_use]
    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_deref().unwrap_or_default()
    }
}

/// A successful (2xx) response.
#[derive(Clone, Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[derive(Clone, Debug)]
pub struct Transport {
    client: ReqwestClient,
    base: Url,
    policy: RetryPolicy,
}

impl Transport {
    pub fn new(base: Url, policy: RetryPolicy) -> Result<Self> {
        let client = ReqwestClient::builder().timeout(policy.timeout).build()?;
        Ok(Self::with_client(client, base, policy))
    }

    /// Uses `client` as is; its own timeout settings take precedence.
    #[must_use]
    pub fn with_client(client: ReqwestClient, base: Url, policy: RetryPolicy) -> Self {
        Self {
            client,
            base,
            policy,
        }
    }

    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `request` until it succeeds, fails terminally, exhausts the retry
    /// budget or `cancel` fires.
    pub async fn execute(&self, request: &Request, cancel: &CancellationToken) -> Result<Response> {
        let url = self.url(request)?;
        let mut backoff = self.policy.backoff();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let mut builder = self
                .client
                .request(request.method.clone(), url.clone())
                .headers(request.headers.clone());
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::cancelled()),
                outcome = builder.send() => outcome,
            };

            let (failure, retry_after) = match outcome {
                Ok(response) if response.status().is_success() => {
                    let status = response.status();
                    let headers = response.headers().clone();
                    let body = response.bytes().await?;
                    return Ok(Response {
                        status,
                        headers,
                        body,
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    let retry_after = parse_retry_after(response.headers());
                    let body = response.bytes().await.unwrap_or_default();
                    let failure = status_error(status, request, &body);

                    if !is_retryable_status(status) {
                        return Err(failure);
                    }
                    (failure, retry_after)
                }
                Err(e) if is_retryable_error(&e) => (Error::from(e), None),
                Err(e) => return Err(e.into()),
            };

            if attempt > self.policy.max_retries {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    method = %request.method,
                    path = %request.path,
                    attempts = attempt,
                    error = %failure,
                    "request failed, retries exhausted"
                );
                return Err(RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(failure),
                }
                .into());
            }

            let computed = backoff.next_backoff().unwrap_or(self.policy.max_delay);
            let delay = retry_after.unwrap_or(computed);

            #[cfg(feature = "tracing")]
            tracing::debug!(
                method = %request.method,
                path = %request.path,
                attempt,
                delay_ms = delay.as_millis(),
                error = %failure,
                "retrying request"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::cancelled()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn url(&self, request: &Request) -> Result<Url> {
        let mut url = self.base.join(&request.path)?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }
}

fn status_error(status: StatusCode, request: &Request, body: &[u8]) -> Error {
    let text = String::from_utf8_lossy(body);
    let message = match text.trim() {
        "" => status.canonical_reason().unwrap_or_default().to_owned(),
        trimmed => trimmed.to_owned(),
    };

    Error::status_error(status, request.method.clone(), request.path.clone(), message)
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Non-negative whole seconds; anything else is ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    if is_permanent_dns_failure(error) {
        return false;
    }
    if error.is_timeout() || error.is_connect() {
        return true;
    }

    let mut source = error.source();
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<io::Error>() {
            return matches!(
                io.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::UnexpectedEof
            );
        }
        source = inner.source();
    }
    false
}

/// NXDOMAIN-style lookups will not start resolving on retry.
fn is_permanent_dns_failure(error: &reqwest::Error) -> bool {
    const NOT_FOUND: [&str; 4] = [
        "name or service not known",
        "nodename nor servname provided",
        "no such host",
        "no address associated with hostname",
    ];

    let mut source: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(inner) = source {
        let text = inner.to_string().to_ascii_lowercase();
        if NOT_FOUND.iter().any(|needle| text.contains(needle)) {
            return true;
        }
        source = inner.source();
    }
    false
}
