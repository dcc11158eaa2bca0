//! HTTP plumbing shared by the verifier, prober and link checker.
//!
//! A [`Transport`] performs exactly one request and never follows redirects.
//! Redirects are followed here so every caller can bound and count hops.

pub mod http;
pub mod limiter;
pub mod retry;

pub use http::HttpTransport;
pub use limiter::{HostLimiter, HostPermit};
pub use retry::RetryPolicy;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single network operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkFailure {
    #[error("timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("DNS lookup failed: {0}")]
    Dns(String),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("more than {0} redirects")]
    TooManyRedirects(usize),

    #[error("redirect loop through {0}")]
    RedirectLoop(String),

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("reading body failed: {0}")]
    Body(String),
}

impl NetworkFailure {
    /// Whether trying again later might succeed
    ///
    /// Timeouts, dropped connections, 5xx, 408 and 429 are transient. 404,
    /// 410 and other client errors, DNS failures, bad URLs and redirect
    /// problems are permanent.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connection(_) | Self::Body(_) => true,
            Self::Status(status) => *status >= 500 || *status == 408 || *status == 429,
            Self::Dns(_) | Self::TooManyRedirects(_) | Self::RedirectLoop(_) | Self::InvalidUrl { .. } => false,
        }
    }
}

/// Status line and headers of one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// URL that produced this response
    pub url: String,
    pub status: u16,
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
}

impl Reply {
    pub fn new(url: impl Into<String>, status: u16) -> Self {
        Self {
            url: url.into(),
            status,
            headers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    #[must_use]
    pub const fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")?.trim().parse().ok()
    }

    /// `Retry-After` in seconds, when given as a number
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.header("retry-after")?.trim().parse().ok()
    }
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, NetworkFailure>> + Send>>;

/// A response with its body still unread
pub struct Response {
    pub reply: Reply,
    pub body: ByteStream,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("reply", &self.reply)
            .field("body", &"ByteStream { ... }")
            .finish()
    }
}

/// Single-request HTTP client
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a HEAD request
    async fn head(&self, url: &str) -> Result<Reply, NetworkFailure>;

    /// Issue a GET request, optionally with a `Range` header value
    async fn get(&self, url: &str, range: Option<&str>) -> Result<Response, NetworkFailure>;
}

/// Resolve a `Location` header against the URL that returned it
pub fn resolve_location(base: &str, location: &str) -> Result<String, NetworkFailure> {
    let base_url = reqwest::Url::parse(base).map_err(|e| NetworkFailure::InvalidUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })?;
    base_url
        .join(location)
        .map(String::from)
        .map_err(|e| NetworkFailure::InvalidUrl {
            url: location.to_string(),
            reason: e.to_string(),
        })
}

/// Tracks hops while following a redirect chain
struct RedirectChain {
    max_redirects: usize,
    hops: usize,
    visited: HashSet<String>,
}

impl RedirectChain {
    fn new(start: &str, max_redirects: usize) -> Self {
        Self {
            max_redirects,
            hops: 0,
            visited: HashSet::from([start.to_string()]),
        }
    }

    /// Next URL to request, or `None` when `reply` ends the chain
    fn next(&mut self, reply: &Reply) -> Result<Option<String>, NetworkFailure> {
        if !reply.is_redirect() {
            return Ok(None);
        }
        let Some(location) = reply.header("location") else {
            return Ok(None);
        };

        let next = resolve_location(&reply.url, location)?;
        self.hops += 1;
        if self.hops > self.max_redirects {
            return Err(NetworkFailure::TooManyRedirects(self.max_redirects));
        }
        if !self.visited.insert(next.clone()) {
            return Err(NetworkFailure::RedirectLoop(next));
        }
        tracing::debug!("Redirect {} -> {next}", reply.url);
        Ok(Some(next))
    }
}

/// HEAD `url`, following up to `max_redirects` redirects
///
/// Returns the final reply and the number of hops taken.
pub async fn head_following(
    transport: &dyn Transport,
    url: &str,
    max_redirects: usize,
) -> Result<(Reply, usize), NetworkFailure> {
    let mut chain = RedirectChain::new(url, max_redirects);
    let mut current = url.to_string();
    loop {
        let reply = transport.head(&current).await?;
        match chain.next(&reply)? {
            Some(next) => current = next,
            None => return Ok((reply, chain.hops)),
        }
    }
}

/// GET `url`, following up to `max_redirects` redirects
pub async fn get_following(
    transport: &dyn Transport,
    url: &str,
    range: Option<&str>,
    max_redirects: usize,
) -> Result<(Response, usize), NetworkFailure> {
    let mut chain = RedirectChain::new(url, max_redirects);
    let mut current = url.to_string();
    loop {
        let response = transport.get(&current, range).await?;
        match chain.next(&response.reply)? {
            Some(next) => current = next,
            None => return Ok((response, chain.hops)),
        }
    }
}

/// Host part of a URL, lowercased
pub fn host_of(url: &str) -> Result<String, NetworkFailure> {
    let parsed = reqwest::Url::parse(url).map_err(|e| NetworkFailure::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    parsed
        .host_str()
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| NetworkFailure::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        })
}
