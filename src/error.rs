use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use reqwest::{Method, StatusCode};

use crate::types::{ChainId, Decimal};

/// Broad category of an [`Error`].
///
/// The concrete cause is available through [`Error::downcast_ref`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
    /// Terminal non-2xx response from the exchange.
    Status,
    /// Caller input rejected before any network call.
    Validation,
    /// Missing or malformed signer/credentials.
    Authentication,
    /// Unsupported tick size, chain or other static configuration.
    Configuration,
    /// Network-level failure, including exhausted retries.
    Transport,
    /// The caller's cancellation scope fired.
    Cancelled,
    /// Streaming connection failure.
    WebSocket,
    /// Serialization, signing or other internal failure.
    Internal,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[must_use]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    /// The status error carried by this error, looking through exhausted retries.
    #[must_use]
    pub fn status(&self) -> Option<&Status> {
        self.downcast_ref::<Status>().or_else(|| {
            self.downcast_ref::<RetriesExhausted>()
                .and_then(|exhausted| exhausted.last.status())
        })
    }

    /// Whether retrying the same request above the transport could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.status().is_some_and(Status::is_retryable)
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation::Other(message.into()).into()
    }

    pub fn authentication<S: Into<String>>(reason: S) -> Self {
        Authentication::Missing(reason.into()).into()
    }

    pub fn status_error<S: Into<String>>(
        status_code: StatusCode,
        method: Method,
        path: String,
        message: S,
    ) -> Self {
        Status {
            status_code,
            method,
            path,
            message: message.into(),
        }
        .into()
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            kind: Kind::Cancelled,
            source: None,
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn unsupported_chain(chain_id: ChainId) -> Self {
        Configuration::UnsupportedChain(chain_id).into()
    }

    pub fn unsupported_tick_size<S: Into<String>>(tick_size: S) -> Self {
        Configuration::UnsupportedTickSize(tick_size.into()).into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// Terminal HTTP response from the exchange.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Status {
    pub status_code: StatusCode,
    pub method: Method,
    pub path: String,
    pub message: String,
}

impl Status {
    /// 5xx and 429 are worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.status_code == StatusCode::TOO_MANY_REQUESTS || self.status_code.is_server_error()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} returned {}: {}",
            self.method,
            self.path,
            self.status_code.as_u16(),
            self.message
        )
    }
}

impl StdError for Status {}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    InvalidSide(String),
    PriceOutOfRange {
        price: Decimal,
        min: Decimal,
        max: Decimal,
    },
    FeeRateMismatch {
        provided: u32,
        required: u32,
    },
    Other(String),
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validation::InvalidSide(side) => write!(f, "invalid side: {side}"),
            Validation::PriceOutOfRange { price, min, max } => {
                write!(f, "price {price} outside valid range [{min}, {max}]")
            }
            Validation::FeeRateMismatch { provided, required } => write!(
                f,
                "invalid user provided fee rate ({provided}), fee rate for the market must be {required}"
            ),
            Validation::Other(reason) => f.write_str(reason),
        }
    }
}

impl StdError for Validation {}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    Missing(String),
    InvalidSecretEncoding(String),
}

impl fmt::Display for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authentication::Missing(reason) => f.write_str(reason),
            Authentication::InvalidSecretEncoding(reason) => {
                write!(f, "api secret is not valid base64url: {reason}")
            }
        }
    }
}

impl StdError for Authentication {}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Configuration {
    UnsupportedTickSize(String),
    UnsupportedChain(ChainId),
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Configuration::UnsupportedTickSize(tick) => write!(f, "unsupported tick size: {tick}"),
            Configuration::UnsupportedChain(chain_id) => {
                write!(f, "unsupported chain id: {chain_id}")
            }
        }
    }
}

impl StdError for Configuration {}

/// Last failure of a request that used up its retry budget.
#[derive(Debug)]
pub struct RetriesExhausted {
    pub attempts: u32,
    pub last: Box<Error>,
}

impl fmt::Display for RetriesExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "request failed after {} attempts: {}",
            self.attempts, self.last
        )
    }
}

impl StdError for RetriesExhausted {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.last.as_ref())
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebSocket {
    NotConnected,
    Closed,
}

impl fmt::Display for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebSocket::NotConnected => f.write_str("websocket is not connected"),
            WebSocket::Closed => f.write_str("websocket client is closed"),
        }
    }
}

impl StdError for WebSocket {}

impl From<Status> for Error {
    fn from(e: Status) -> Self {
        Error::with_source(Kind::Status, e)
    }
}

impl From<Validation> for Error {
    fn from(e: Validation) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}

impl From<Authentication> for Error {
    fn from(e: Authentication) -> Self {
        Error::with_source(Kind::Authentication, e)
    }
}

impl From<Configuration> for Error {
    fn from(e: Configuration) -> Self {
        Error::with_source(Kind::Configuration, e)
    }
}

impl From<RetriesExhausted> for Error {
    fn from(e: RetriesExhausted) -> Self {
        Error::with_source(Kind::Transport, e)
    }
}

impl From<WebSocket> for Error {
    fn from(e: WebSocket) -> Self {
        Error::with_source(Kind::WebSocket, e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::with_source(Kind::Transport, e)
    }
}

impl From<reqwest::header::InvalidHeaderValue> for Error {
    fn from(e: reqwest::header::InvalidHeaderValue) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Configuration, e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<alloy::signers::Error> for Error {
    fn from(e: alloy::signers::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

#[cfg(feature = "ws")]
impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::with_source(Kind::WebSocket, e)
    }
}
