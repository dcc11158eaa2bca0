//! Content-hash verification by full download.
//!
//! Each selected descriptor is downloaded once and streamed through SHA-256
//! without touching disk. Placeholders are resolved, probed hashes that match
//! are promoted, and mismatches are reported but never written.

mod report;
mod stream;

pub use report::{BatchReport, HashMethod, ItemFailure, Outcome, VerificationResult};
pub use stream::{SizeCheck, VerifyFailure};

use crate::config::Config;
use crate::manifest::{DescriptorRef, HashState, Manifest, ManifestFile};
use crate::net::{get_following, HostLimiter, NetworkFailure, Transport};
use crate::validate::Validator;
use futures_util::future::join_all;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Arc;

/// Which descriptors a run looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    /// Every descriptor, including verified ones
    #[default]
    All,
    /// Placeholders and probed hashes
    Unverified,
}

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub selection: Selection,
    /// Only descriptors of this variant id
    pub variant: Option<String>,
    /// Report without rewriting manifests
    pub dry_run: bool,
    /// Draw progress bars
    pub progress: bool,
}

impl VerifyOptions {
    fn selects(&self, descriptor: &DescriptorRef<'_>) -> bool {
        if let Some(wanted) = &self.variant {
            if descriptor.variant != Some(wanted.as_str()) {
                return false;
            }
        }
        match self.selection {
            Selection::All => true,
            Selection::Unverified => !matches!(descriptor.descriptor.hash, HashState::Verified(_)),
        }
    }
}

/// One descriptor queued for download
struct Job {
    result: VerificationResult,
    hash: HashState,
    size: u64,
}

/// Downloads payloads and compares their hashes
pub struct HashVerifier {
    transport: Arc<dyn Transport>,
    limiter: Arc<HostLimiter>,
    validator: Validator,
    max_redirects: usize,
    options: VerifyOptions,
}

impl HashVerifier {
    /// Create verifier from config
    pub fn new(config: &Config, transport: Arc<dyn Transport>, options: VerifyOptions) -> crate::Result<Self> {
        Ok(Self {
            transport,
            limiter: Arc::new(HostLimiter::from_config(&config.network)),
            validator: Validator::new(&config.validation)?,
            max_redirects: config.network.max_redirects,
            options,
        })
    }

    fn jobs(&self, file: &ManifestFile, manifest: &Manifest) -> Vec<Job> {
        manifest
            .descriptors()
            .into_iter()
            .filter(|d| self.options.selects(d))
            .map(|d| Job {
                result: VerificationResult {
                    path: file.path.clone(),
                    manifest: manifest.id.clone(),
                    slot: d.slot,
                    label: d.label(),
                    url: d.descriptor.url.clone(),
                    declared_hash: d.descriptor.hash.declared().to_string(),
                    computed_hash: None,
                    method: HashMethod::Downloaded,
                    outcome: Outcome::Match,
                    occurrence: manifest.occurrence_of(d.slot),
                },
                hash: d.descriptor.hash.clone(),
                size: d.descriptor.size,
            })
            .collect()
    }

    /// Verify the selected descriptors of every file
    ///
    /// Manifests that fail validation are skipped and reported. Failures
    /// stay with their descriptor; the rest of the batch continues.
    pub async fn verify(&self, files: &[ManifestFile]) -> BatchReport {
        let mut report = BatchReport {
            dry_run: self.options.dry_run,
            ..BatchReport::default()
        };

        let mut jobs = Vec::new();
        for file in files {
            let validation = self.validator.validate_file(file);
            match validation.manifest {
                Some(manifest) => jobs.extend(self.jobs(file, &manifest)),
                None => {
                    let reason = validation
                        .errors()
                        .next()
                        .map_or_else(|| "invalid manifest".to_string(), ToString::to_string);
                    tracing::warn!("Skipping {}: {reason}", file.path.display());
                    report.skipped.push((file.path.clone(), reason));
                }
            }
        }

        tracing::info!("Verifying {} descriptor(s)", jobs.len());

        let multi = self.options.progress.then(MultiProgress::new);
        let runs = jobs.into_iter().map(|job| {
            let bar = multi.as_ref().map_or_else(ProgressBar::hidden, |m| {
                m.add(progress_bar(job.size, &job.result.manifest, &job.result.label))
            });
            self.run(job, bar)
        });
        report.results = join_all(runs).await;

        report.write_back(files);
        report.sort();
        report
    }

    async fn run(&self, job: Job, bar: ProgressBar) -> VerificationResult {
        let Job {
            mut result,
            hash,
            size,
        } = job;

        match self.download_digest(&result.url, size, &bar).await {
            Ok(digest) => {
                result.outcome = match &hash {
                    HashState::Pending { .. } => Outcome::Resolved,
                    HashState::Probed(declared) if *declared == digest => Outcome::Promoted,
                    HashState::Verified(declared) if *declared == digest => Outcome::Match,
                    HashState::Probed(_) | HashState::Verified(_) => Outcome::Mismatch,
                };
                match &result.outcome {
                    Outcome::Mismatch => tracing::error!(
                        "{} [{}]: hash mismatch, declared {} computed {digest}",
                        result.manifest,
                        result.label,
                        result.declared_hash
                    ),
                    outcome => tracing::info!("{} [{}]: {outcome}", result.manifest, result.label),
                }
                result.computed_hash = Some(digest);
                bar.finish_and_clear();
            }
            Err(failure) => {
                tracing::warn!("{} [{}]: {failure}", result.manifest, result.label);
                result.outcome = Outcome::Failed(failure.into());
                bar.abandon();
            }
        }

        result
    }

    async fn download_digest(
        &self,
        url: &str,
        size: u64,
        bar: &ProgressBar,
    ) -> Result<crate::manifest::Sha256Digest, VerifyFailure> {
        let _permit = self.limiter.acquire(url).await?;
        let (response, _) = get_following(self.transport.as_ref(), url, None, self.max_redirects).await?;

        if !response.reply.is_success() {
            return Err(NetworkFailure::Status(response.reply.status).into());
        }
        if let Some(length) = response.reply.content_length() {
            if length != size {
                return Err(VerifyFailure::SizeMismatch {
                    declared: size,
                    observed: length,
                    check: SizeCheck::ContentLength,
                });
            }
        }

        let (digest, _) = stream::hash_body(response.body, size, bar).await?;
        Ok(digest)
    }
}

fn progress_bar(size: u64, manifest: &str, label: &str) -> ProgressBar {
    let style = ProgressStyle::with_template(
        "{msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    ProgressBar::new(size)
        .with_style(style)
        .with_message(format!("{manifest} [{label}]"))
}
