use super::{normalize_hash, HashProvider, ProbeError};
use crate::manifest::Sha256Digest;
use crate::net::{get_following, NetworkFailure, Transport};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;

/// Metadata responses larger than this are rejected
const MAX_METADATA_BYTES: usize = 4 * 1024 * 1024;

const DOWNLOAD_PREFIX: &str = "/api/download/models/";

/// Civitai model-version downloads
///
/// `/api/download/models/<version>` links are looked up through
/// `/api/v1/model-versions/<version>`, whose file list carries SHA-256 hashes.
#[derive(Debug, Clone, Copy)]
pub struct Civitai {
    max_redirects: usize,
}

#[derive(Debug, Deserialize)]
struct ModelVersion {
    #[serde(default)]
    files: Vec<VersionFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionFile {
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    primary: Option<bool>,
    #[serde(default)]
    hashes: Hashes,
}

#[derive(Debug, Default, Deserialize)]
struct Hashes {
    #[serde(rename = "SHA256")]
    sha256: Option<String>,
}

impl Civitai {
    #[must_use]
    pub const fn new(max_redirects: usize) -> Self {
        Self { max_redirects }
    }

    fn version_id(url: &reqwest::Url) -> Option<&str> {
        let id = url.path().strip_prefix(DOWNLOAD_PREFIX)?.trim_end_matches('/');
        (!id.is_empty() && id.chars().all(|c| c.is_ascii_digit())).then_some(id)
    }

    /// Metadata endpoint for a download link, keeping any query credentials
    fn metadata_url(url: &reqwest::Url, version: &str) -> reqwest::Url {
        let mut metadata = url.clone();
        metadata.set_path(&format!("/api/v1/model-versions/{version}"));
        metadata
    }
}

/// Query parameters that authenticate rather than select a file
const CREDENTIAL_PARAMS: &[&str] = &["token"];

/// Host, path and sorted file-selecting query parameters of a download link
fn selector(url: &reqwest::Url) -> (Option<&str>, &str, Vec<(String, String)>) {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !CREDENTIAL_PARAMS.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    params.sort();
    (url.host_str(), url.path().trim_end_matches('/'), params)
}

/// Pick the file a download link refers to
///
/// Links are compared without credentials and regardless of parameter
/// order. A link that selects a file by parameter (`type=VAE`) must match
/// one; otherwise the primary file, then a sole file, is taken.
fn select_file<'a>(files: &'a [VersionFile], url: &reqwest::Url) -> Option<&'a VersionFile> {
    let wanted = selector(url);
    let by_url = files.iter().find(|f| {
        f.download_url
            .as_deref()
            .and_then(|u| reqwest::Url::parse(u).ok())
            .is_some_and(|u| selector(&u) == wanted)
    });
    if by_url.is_some() || !wanted.2.is_empty() {
        return by_url;
    }

    files
        .iter()
        .find(|f| f.primary == Some(true))
        .or_else(|| match files {
            [only] => Some(only),
            _ => None,
        })
}

#[async_trait]
impl HashProvider for Civitai {
    fn name(&self) -> &'static str {
        "civitai"
    }

    fn supports(&self, url: &reqwest::Url) -> bool {
        matches!(url.host_str(), Some("civitai.com" | "www.civitai.com")) && Self::version_id(url).is_some()
    }

    async fn probe(&self, transport: &dyn Transport, url: &reqwest::Url) -> Result<Sha256Digest, ProbeError> {
        let version = Self::version_id(url).ok_or_else(|| ProbeError::HashUnavailable {
            reason: "not a model-version download link".to_string(),
        })?;
        let metadata_url = Self::metadata_url(url, version);

        let (response, _) = get_following(transport, metadata_url.as_str(), None, self.max_redirects).await?;
        if !response.reply.is_success() {
            return Err(ProbeError::from_reply(&response.reply));
        }

        let mut body = response.body;
        let mut buf = Vec::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
            if buf.len() > MAX_METADATA_BYTES {
                return Err(NetworkFailure::Body("metadata response too large".to_string()).into());
            }
        }

        let version: ModelVersion = serde_json::from_slice(&buf).map_err(|e| ProbeError::HashUnavailable {
            reason: format!("unexpected metadata response: {e}"),
        })?;

        let file = select_file(&version.files, url).ok_or_else(|| ProbeError::HashUnavailable {
            reason: format!("no file in model version matches {}", url.path()),
        })?;
        let hash = file.hashes.sha256.as_deref().ok_or_else(|| ProbeError::HashUnavailable {
            reason: "file has no SHA256 hash".to_string(),
        })?;

        normalize_hash(hash)
    }
}
