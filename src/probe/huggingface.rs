use super::{normalize_hash, HashProvider, ProbeError};
use crate::manifest::Sha256Digest;
use crate::net::Transport;
use async_trait::async_trait;

/// Hugging Face Hub `/resolve/` links
///
/// A HEAD on a resolve URL answers with a redirect to the CDN. For LFS files
/// the redirect carries the SHA-256 in `x-linked-etag`; the redirect is not
/// followed because the CDN response does not repeat it.
#[derive(Debug, Clone, Copy, Default)]
pub struct HuggingFace;

const HOSTS: &[&str] = &["huggingface.co", "hf.co"];

#[async_trait]
impl HashProvider for HuggingFace {
    fn name(&self) -> &'static str {
        "huggingface"
    }

    fn supports(&self, url: &reqwest::Url) -> bool {
        url.host_str().is_some_and(|host| HOSTS.contains(&host)) && url.path().contains("/resolve/")
    }

    async fn probe(&self, transport: &dyn Transport, url: &reqwest::Url) -> Result<Sha256Digest, ProbeError> {
        let reply = transport.head(url.as_str()).await?;
        if !(reply.is_success() || reply.is_redirect()) {
            return Err(ProbeError::from_reply(&reply));
        }

        let etag = reply
            .header("x-linked-etag")
            .or_else(|| reply.header("etag"))
            .ok_or_else(|| ProbeError::HashUnavailable {
                reason: "response has no etag".to_string(),
            })?;

        normalize_hash(etag)
    }
}
