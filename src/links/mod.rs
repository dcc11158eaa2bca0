//! Link-health auditing.
//!
//! Every download URL (and, optionally, every homepage) declared in the
//! manifest set is probed without downloading its payload. URLs shared by
//! several manifests are checked once.

use crate::config::Config;
use crate::error::{RegistryError, Result};
use crate::manifest::rewrite::write_atomic;
use crate::manifest::ManifestFile;
use crate::net::{get_following, head_following, HostLimiter, NetworkFailure, Reply, RetryPolicy, Transport};
use futures_util::future::join_all;
use serde::Serialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Download,
    Homepage,
}

/// A URL and where it was declared
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    /// Manifest id, with `:<variant>` for variant downloads
    pub manifest: String,
    pub url: String,
    pub kind: LinkKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkStatus {
    pub url: String,
    pub referenced_by: Vec<String>,
    pub kind: LinkKind,
    pub reachable: bool,
    pub http_status: Option<u16>,
    pub redirect_chain_length: usize,
    /// Reachable through more than one redirect
    pub degraded: bool,
    pub error: Option<String>,
    pub attempts: u32,
}

/// Outcome of a link check run, ordered by URL
#[derive(Debug, Clone, Serialize)]
pub struct LinkReport {
    pub total: usize,
    pub ok: usize,
    pub degraded: usize,
    pub broken: usize,
    pub links: Vec<LinkStatus>,
}

impl LinkReport {
    fn from_links(mut links: Vec<LinkStatus>) -> Self {
        links.sort_by(|a, b| a.url.cmp(&b.url));
        let broken = links.iter().filter(|l| !l.reachable).count();
        let degraded = links.iter().filter(|l| l.reachable && l.degraded).count();
        Self {
            total: links.len(),
            ok: links.len() - broken - degraded,
            degraded,
            broken,
            links,
        }
    }

    #[must_use]
    pub fn has_broken(&self) -> bool {
        self.broken > 0
    }

    #[must_use]
    pub fn get(&self, url: &str) -> Option<&LinkStatus> {
        self.links.iter().find(|l| l.url == url)
    }

    /// Write the report as JSON
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut content = serde_json::to_string_pretty(self)
            .map_err(|e| RegistryError::Other(format!("Failed to serialize link report: {e}")))?;
        content.push('\n');
        write_atomic(path, &content)
    }
}

/// Extract link targets from manifest files
///
/// Works on the raw documents so links in manifests that fail validation are
/// still audited. Unparseable files are skipped.
#[must_use]
pub fn collect_targets(files: &[ManifestFile], include_homepages: bool) -> Vec<LinkTarget> {
    let mut targets = Vec::new();

    for file in files {
        let doc = match file.parse() {
            Ok(doc) => doc,
            Err(message) => {
                tracing::warn!("Skipping {}: {message}", file.path.display());
                continue;
            }
        };
        let id = doc
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_else(|| file.stem())
            .to_string();
        let url_of = |v: &Value| v.get("url").and_then(Value::as_str).map(str::to_string);

        if include_homepages {
            if let Some(homepage) = doc.get("homepage").and_then(Value::as_str) {
                targets.push(LinkTarget {
                    manifest: id.clone(),
                    url: homepage.to_string(),
                    kind: LinkKind::Homepage,
                });
            }
        }

        if let Some(url) = doc.get("file").and_then(url_of) {
            targets.push(LinkTarget {
                manifest: id.clone(),
                url,
                kind: LinkKind::Download,
            });
        }

        for variant in doc.get("variants").and_then(Value::as_sequence).into_iter().flatten() {
            if let Some(url) = url_of(variant) {
                let vid = variant.get("id").and_then(Value::as_str).unwrap_or("?");
                targets.push(LinkTarget {
                    manifest: format!("{id}:{vid}"),
                    url,
                    kind: LinkKind::Download,
                });
            }
        }
    }

    targets
}

/// Probes URLs with bounded concurrency and retries
pub struct LinkChecker {
    transport: Arc<dyn Transport>,
    limiter: Arc<HostLimiter>,
    retry: RetryPolicy,
    max_redirects: usize,
}

struct Observed {
    status: u16,
    hops: usize,
}

impl LinkChecker {
    /// Create checker from config
    #[must_use]
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            limiter: Arc::new(HostLimiter::from_config(&config.network)),
            retry: RetryPolicy::from_config(&config.links),
            max_redirects: config.network.max_redirects,
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Check every target, deduplicating by URL
    pub async fn check(&self, targets: &[LinkTarget]) -> LinkReport {
        let mut unique: BTreeMap<&str, (LinkKind, Vec<String>)> = BTreeMap::new();
        for target in targets {
            let entry = unique
                .entry(target.url.as_str())
                .or_insert_with(|| (target.kind, Vec::new()));
            entry.0 = entry.0.min(target.kind);
            entry.1.push(target.manifest.clone());
        }

        tracing::info!("Checking {} unique URL(s)", unique.len());

        let checks = unique
            .into_iter()
            .map(|(url, (kind, referenced_by))| self.check_url(url, kind, referenced_by));
        LinkReport::from_links(join_all(checks).await)
    }

    async fn check_url(&self, url: &str, kind: LinkKind, referenced_by: Vec<String>) -> LinkStatus {
        let last_hops = AtomicUsize::new(0);
        let attempted = self
            .retry
            .run(|| async {
                let observed = self.probe(url).await?;
                last_hops.store(observed.hops, Ordering::Relaxed);
                if (200..300).contains(&observed.status) {
                    Ok(observed)
                } else {
                    Err(NetworkFailure::Status(observed.status))
                }
            })
            .await;

        let status = match attempted.result {
            Ok(observed) => LinkStatus {
                url: url.to_string(),
                referenced_by,
                kind,
                reachable: true,
                http_status: Some(observed.status),
                redirect_chain_length: observed.hops,
                degraded: observed.hops > 1,
                error: None,
                attempts: attempted.attempts,
            },
            Err(failure) => LinkStatus {
                url: url.to_string(),
                referenced_by,
                kind,
                reachable: false,
                http_status: match failure {
                    NetworkFailure::Status(code) => Some(code),
                    _ => None,
                },
                redirect_chain_length: last_hops.load(Ordering::Relaxed),
                degraded: false,
                error: Some(failure.to_string()),
                attempts: attempted.attempts,
            },
        };

        if status.reachable {
            tracing::debug!("ok {url} ({} hop(s))", status.redirect_chain_length);
        } else {
            tracing::warn!(
                "broken {url}: {}",
                status.error.as_deref().unwrap_or_default()
            );
        }
        status
    }

    /// One HEAD, with a ranged GET when the server rejects HEAD
    async fn probe(&self, url: &str) -> std::result::Result<Observed, NetworkFailure> {
        let _permit = self.limiter.acquire(url).await?;
        let transport = self.transport.as_ref();

        let (reply, hops) = head_following(transport, url, self.max_redirects).await?;
        if !head_rejected(&reply) {
            return Ok(Observed {
                status: reply.status,
                hops,
            });
        }

        tracing::debug!("HEAD rejected by {url} ({}), retrying with GET", reply.status);
        let (response, hops) = get_following(transport, url, Some("bytes=0-0"), self.max_redirects).await?;
        Ok(Observed {
            status: response.reply.status,
            hops,
        })
    }
}

fn head_rejected(reply: &Reply) -> bool {
    matches!(reply.status, 405 | 501)
}
