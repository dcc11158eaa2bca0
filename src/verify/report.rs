use crate::manifest::rewrite::rewrite_file;
use crate::manifest::{DescriptorSlot, HashRewrite, ManifestFile, Sha256Digest, TrustLevel};
use crate::probe::ProbeError;
use crate::verify::stream::VerifyFailure;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// How a hash was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMethod {
    /// Computed from the full payload
    Downloaded,
    /// Read from the provider's metadata
    Probed,
}

impl HashMethod {
    /// Trust level a hash obtained this way earns
    #[must_use]
    pub const fn trust(self) -> TrustLevel {
        match self {
            Self::Downloaded => TrustLevel::Verified,
            Self::Probed => TrustLevel::Probed,
        }
    }
}

impl fmt::Display for HashMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Downloaded => "downloaded",
            Self::Probed => "probed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemFailure {
    #[error(transparent)]
    Verify(#[from] VerifyFailure),
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// What happened to one descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Declared hash confirmed, nothing to do
    Match,
    /// Probed hash confirmed by download; trust marker removed
    Promoted,
    /// Placeholder replaced
    Resolved,
    /// Declared hash is wrong; never corrected automatically
    Mismatch,
    Failed(ItemFailure),
}

impl Outcome {
    /// Whether the manifest needs rewriting
    #[must_use]
    pub const fn rewrites(&self) -> bool {
        matches!(self, Self::Promoted | Self::Resolved)
    }

    /// Whether this outcome should fail the run
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        matches!(self, Self::Mismatch | Self::Failed(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match => f.write_str("match"),
            Self::Promoted => f.write_str("promoted"),
            Self::Resolved => f.write_str("resolved"),
            Self::Mismatch => f.write_str("HASH MISMATCH"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Result for one descriptor
#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub path: PathBuf,
    pub manifest: String,
    pub slot: DescriptorSlot,
    /// `file` or `variant <id>`
    pub label: String,
    pub url: String,
    pub declared_hash: String,
    pub computed_hash: Option<Sha256Digest>,
    pub method: HashMethod,
    pub outcome: Outcome,
    pub(crate) occurrence: usize,
}

impl VerificationResult {
    /// Whether the obtained hash equals the declared one
    #[must_use]
    pub fn matched(&self) -> bool {
        self.computed_hash
            .as_ref()
            .is_some_and(|d| d.as_str() == self.declared_hash)
    }

    fn rewrite(&self) -> Option<HashRewrite> {
        if !self.outcome.rewrites() {
            return None;
        }
        let digest = self.computed_hash.clone()?;
        Some(HashRewrite {
            declared: self.declared_hash.clone(),
            occurrence: self.occurrence,
            digest,
            trust: self.method.trust(),
        })
    }
}

/// Results of a verifier or prober run
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<VerificationResult>,
    /// Manifests that failed validation and were not processed
    pub skipped: Vec<(PathBuf, String)>,
    /// Files rewritten in place
    pub rewritten: Vec<PathBuf>,
    pub dry_run: bool,
}

impl BatchReport {
    #[must_use]
    pub fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }

    #[must_use]
    pub fn has_blocking(&self) -> bool {
        self.results.iter().any(|r| r.outcome.is_blocking()) || !self.skipped.is_empty()
    }

    /// Order results by file, then document position
    pub fn sort(&mut self) {
        self.results.sort_by(|a, b| {
            a.path
                .cmp(&b.path)
                .then_with(|| a.slot.cmp(&b.slot))
        });
        self.rewritten.sort();
    }

    /// Write back every resolved or promoted hash, one file at a time
    ///
    /// A file that cannot be rewritten turns its pending results into
    /// failures; other files are unaffected.
    pub fn write_back(&mut self, files: &[ManifestFile]) {
        if self.dry_run {
            return;
        }

        for file in files {
            let indices: Vec<usize> = self
                .results
                .iter()
                .enumerate()
                .filter(|(_, r)| r.path == file.path && r.outcome.rewrites())
                .map(|(i, _)| i)
                .collect();
            let rewrites: Vec<HashRewrite> = indices
                .iter()
                .filter_map(|&i| self.results[i].rewrite())
                .collect();
            if rewrites.is_empty() {
                continue;
            }

            match rewrite_file(&file.path, &file.source, &rewrites) {
                Ok(_) => self.rewritten.push(file.path.clone()),
                Err(e) => {
                    tracing::error!("{e}");
                    for i in indices {
                        self.results[i].outcome =
                            Outcome::Failed(VerifyFailure::Rewrite(e.to_string()).into());
                    }
                }
            }
        }
    }
}
