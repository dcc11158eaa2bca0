//! Hash acquisition from provider metadata.
//!
//! Providers expose the content hash of hosted files through cheap metadata
//! requests, so placeholders can be filled without downloading gigabytes.
//! Hashes found this way are written with a `sha256_source: probed` marker
//! until a full download confirms them.

mod civitai;
mod huggingface;

pub use civitai::Civitai;
pub use huggingface::HuggingFace;

use crate::config::Config;
use crate::manifest::{ManifestFile, Sha256Digest};
use crate::net::{NetworkFailure, Reply, Transport};
use crate::validate::Validator;
use crate::verify::{BatchReport, HashMethod, Outcome, VerificationResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Longest `Retry-After` the prober is willing to wait out
const MAX_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("unsupported host '{host}'; use `mods-registry verify` to download and hash it instead")]
    UnsupportedHost { host: String },

    #[error("rate limited by provider{}", .retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("authentication required (HTTP {status}); the file is gated")]
    AuthRequired { status: u16 },

    #[error("hash unavailable: {reason}")]
    HashUnavailable { reason: String },

    #[error(transparent)]
    Network(#[from] NetworkFailure),
}

impl ProbeError {
    /// Classify a non-success metadata response
    pub(crate) fn from_reply(reply: &Reply) -> Self {
        match reply.status {
            401 | 403 => Self::AuthRequired {
                status: reply.status,
            },
            429 => Self::RateLimited {
                retry_after_secs: reply.retry_after_secs(),
            },
            status => Self::Network(NetworkFailure::Status(status)),
        }
    }
}

/// A hosting provider that publishes content hashes
#[async_trait]
pub trait HashProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this provider can answer for `url`
    fn supports(&self, url: &reqwest::Url) -> bool;

    /// Fetch the SHA-256 of the file at `url` from metadata alone
    async fn probe(&self, transport: &dyn Transport, url: &reqwest::Url) -> Result<Sha256Digest, ProbeError>;
}

/// Fills placeholder hashes from provider metadata
pub struct RemoteHashProber {
    transport: Arc<dyn Transport>,
    providers: Vec<Box<dyn HashProvider>>,
    validator: Validator,
    delay: Duration,
    dry_run: bool,
}

impl RemoteHashProber {
    /// Create prober with the built-in providers
    pub fn new(config: &Config, transport: Arc<dyn Transport>, dry_run: bool) -> crate::Result<Self> {
        Ok(Self {
            transport,
            providers: vec![
                Box::new(HuggingFace),
                Box::new(Civitai::new(config.network.max_redirects)),
            ],
            validator: Validator::new(&config.validation)?,
            delay: Duration::from_millis(config.probe.delay_ms),
            dry_run,
        })
    }

    /// Resolve a hash for one URL
    pub async fn probe_url(&self, url: &str) -> Result<Sha256Digest, ProbeError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| NetworkFailure::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let provider = self
            .providers
            .iter()
            .find(|p| p.supports(&parsed))
            .ok_or_else(|| ProbeError::UnsupportedHost {
                host: parsed.host_str().unwrap_or_default().to_string(),
            })?;

        tracing::debug!("Probing {url} via {}", provider.name());
        match provider.probe(self.transport.as_ref(), &parsed).await {
            Err(ProbeError::RateLimited { retry_after_secs }) => {
                let wait = retry_after_secs
                    .unwrap_or(1)
                    .min(MAX_RETRY_AFTER_SECS);
                tracing::warn!("{} rate limited, waiting {wait}s", provider.name());
                tokio::time::sleep(Duration::from_secs(wait)).await;
                provider.probe(self.transport.as_ref(), &parsed).await
            }
            other => other,
        }
    }

    /// Probe every placeholder hash in `files`
    ///
    /// Requests are issued one at a time with the configured delay between
    /// them. Each found hash is written back unless this is a dry run.
    pub async fn probe(&self, files: &[ManifestFile]) -> BatchReport {
        let mut report = BatchReport {
            dry_run: self.dry_run,
            ..BatchReport::default()
        };
        let mut first = true;

        for file in files {
            let validation = self.validator.validate_file(file);
            let Some(manifest) = validation.manifest else {
                let reason = validation
                    .errors()
                    .next()
                    .map_or_else(|| "invalid manifest".to_string(), ToString::to_string);
                tracing::warn!("Skipping {}: {reason}", file.path.display());
                report.skipped.push((file.path.clone(), reason));
                continue;
            };

            for d in manifest.pending_descriptors() {
                if !first && !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                first = false;

                let probed = self.probe_url(&d.descriptor.url).await;
                let (computed_hash, outcome) = match probed {
                    Ok(digest) => {
                        tracing::info!("{} [{}]: {digest}", manifest.id, d.label());
                        (Some(digest), Outcome::Resolved)
                    }
                    Err(e) => {
                        tracing::warn!("{} [{}]: {e}", manifest.id, d.label());
                        (None, Outcome::Failed(e.into()))
                    }
                };

                report.results.push(VerificationResult {
                    path: file.path.clone(),
                    manifest: manifest.id.clone(),
                    slot: d.slot,
                    label: d.label(),
                    url: d.descriptor.url.clone(),
                    declared_hash: d.descriptor.hash.declared().to_string(),
                    computed_hash,
                    method: HashMethod::Probed,
                    outcome,
                    occurrence: manifest.occurrence_of(d.slot),
                });
            }
        }

        report.write_back(files);
        report.sort();
        report
    }
}

/// Turn a provider-supplied value into a digest
///
/// Accepts surrounding quotes, a weak-validator prefix and uppercase hex.
/// Anything that is not 64 hex characters (such as a git SHA-1) is rejected.
pub(crate) fn normalize_hash(raw: &str) -> Result<Sha256Digest, ProbeError> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("W/").unwrap_or(trimmed);
    let value = trimmed.trim_matches('"').to_ascii_lowercase();

    Sha256Digest::try_from(value.as_str()).map_err(|e| ProbeError::HashUnavailable {
        reason: format!(
            "provider returned '{}', not a SHA-256 ({e})",
            value.chars().take(40).collect::<String>()
        ),
    })
}
