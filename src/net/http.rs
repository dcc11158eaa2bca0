use crate::config::NetworkConfig;
use crate::error::{RegistryError, Result};
use crate::net::{ByteStream, NetworkFailure, Reply, Response, Transport};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::RANGE;
use std::collections::HashMap;
use std::error::Error as _;
use std::time::Duration;

/// `reqwest` transport with redirects disabled
pub struct HttpTransport {
    client: reqwest::Client,
    request_timeout: Duration,
    read_timeout: Duration,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("client", &"Client { ... }")
            .field("request_timeout", &self.request_timeout)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

impl HttpTransport {
    /// Create transport from config
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| RegistryError::Other(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            request_timeout: config.request_timeout(),
            read_timeout: config.read_timeout(),
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> std::result::Result<reqwest::Response, NetworkFailure> {
        match tokio::time::timeout(self.request_timeout, request.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(classify(&e, self.request_timeout)),
            Err(_) => Err(NetworkFailure::Timeout(self.request_timeout)),
        }
    }
}

fn reply_of(url: &str, response: &reqwest::Response) -> Reply {
    let headers: HashMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    Reply {
        url: url.to_string(),
        status: response.status().as_u16(),
        headers,
    }
}

/// Map a reqwest error onto the failure taxonomy
fn classify(error: &reqwest::Error, timeout: Duration) -> NetworkFailure {
    if error.is_timeout() {
        return NetworkFailure::Timeout(timeout);
    }
    if error.is_builder() {
        return NetworkFailure::InvalidUrl {
            url: error.url().map(ToString::to_string).unwrap_or_default(),
            reason: error.to_string(),
        };
    }
    if error.is_body() || error.is_decode() {
        return NetworkFailure::Body(error.to_string());
    }

    // hyper reports resolver failures as connect errors; look at the chain
    let mut detail = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        detail = format!("{detail}: {inner}");
        source = inner.source();
    }
    let lowered = detail.to_ascii_lowercase();
    if lowered.contains("dns error") || lowered.contains("failed to lookup address") {
        NetworkFailure::Dns(detail)
    } else {
        NetworkFailure::Connection(detail)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn head(&self, url: &str) -> std::result::Result<Reply, NetworkFailure> {
        let response = self.send(self.client.head(url)).await?;
        Ok(reply_of(url, &response))
    }

    async fn get(&self, url: &str, range: Option<&str>) -> std::result::Result<Response, NetworkFailure> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        let response = self.send(request).await?;
        let reply = reply_of(url, &response);

        // Every chunk must arrive within the read timeout
        let read_timeout = self.read_timeout;
        let chunks = Box::pin(response.bytes_stream());
        let body: ByteStream = Box::pin(futures_util::stream::unfold(
            Some(chunks),
            move |state| async move {
                let mut chunks = state?;
                match tokio::time::timeout(read_timeout, chunks.next()).await {
                    Ok(Some(Ok(bytes))) => Some((Ok(bytes), Some(chunks))),
                    Ok(Some(Err(e))) => Some((Err(NetworkFailure::Body(e.to_string())), None)),
                    Ok(None) => None,
                    Err(_) => Some((Err(NetworkFailure::Timeout(read_timeout)), None)),
                }
            },
        ));

        Ok(Response { reply, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_from_defaults() {
        let transport = HttpTransport::new(&NetworkConfig::default()).unwrap();
        assert_eq!(transport.request_timeout, Duration::from_secs(30));
        assert_eq!(transport.read_timeout, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_invalid_url_is_permanent() {
        let transport = HttpTransport::new(&NetworkConfig::default()).unwrap();
        let err = transport.head("not a url").await.unwrap_err();
        assert!(!err.is_transient(), "{err:?}");
    }
}
