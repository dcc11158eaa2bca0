//! Index compilation.
//!
//! The compiler validates every manifest and refuses to produce an index if
//! any of them has an error. Nothing is written until the whole set passes,
//! and the write itself goes through a temp file and rename.

mod flatten;

use crate::config::{Config, RegistryConfig};
use crate::error::{RegistryError, Result};
use crate::manifest::rewrite::write_atomic;
use crate::manifest::{Manifest, ManifestFile};
use crate::validate::{unresolved_hashes, Rule, Severity, Validator, Violation};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// `generated_at` timestamp format
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// The published registry index
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryIndex {
    pub version: u32,
    pub generated_at: String,
    pub total_count: usize,
    pub type_counts: BTreeMap<String, usize>,
    pub cloud_available_count: usize,
    pub schema_url: String,
    pub items: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Warnings,
    Errors,
}

/// Validation status of one manifest file
#[derive(Debug, Clone, Serialize)]
pub struct ManifestStatus {
    pub path: PathBuf,
    pub id: Option<String>,
    pub violations: Vec<Violation>,
}

impl ManifestStatus {
    #[must_use]
    pub fn status(&self) -> Status {
        if self.violations.iter().any(Violation::is_error) {
            Status::Errors
        } else if self.violations.is_empty() {
            Status::Ok
        } else {
            Status::Warnings
        }
    }
}

/// Per-manifest results of a validation pass, in load order
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompileReport {
    pub manifests: Vec<ManifestStatus>,
}

impl CompileReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.manifests.len()
    }

    #[must_use]
    pub fn failing_count(&self) -> usize {
        self.count(Status::Errors)
    }

    #[must_use]
    pub fn count(&self, status: Status) -> usize {
        self.manifests.iter().filter(|m| m.status() == status).count()
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failing_count() == 0
    }

    /// Look up a manifest's status by path
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&ManifestStatus> {
        self.manifests.iter().find(|m| m.path == path)
    }
}

/// Builds the registry index from a manifest set
pub struct IndexCompiler {
    validator: Validator,
    registry: RegistryConfig,
}

impl IndexCompiler {
    /// Create compiler from config
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            validator: Validator::new(&config.validation)?,
            registry: config.registry.clone(),
        })
    }

    /// Override the placeholder hash policy
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.registry.strict = strict;
        self
    }

    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.registry.strict
    }

    /// Validate every manifest without producing an index
    #[must_use]
    pub fn check(&self, files: &[ManifestFile]) -> CompileReport {
        self.validate_all(files).0
    }

    fn validate_all(&self, files: &[ManifestFile]) -> (CompileReport, Vec<Manifest>) {
        let mut report = CompileReport::default();
        let mut manifests = Vec::with_capacity(files.len());
        let mut first_seen: HashMap<String, PathBuf> = HashMap::new();

        for file in files {
            tracing::debug!("Validating {}", file.path.display());
            let mut validation = self.validator.validate_file(file);

            if let Some(manifest) = &validation.manifest {
                for violation in unresolved_hashes(manifest, self.registry.strict) {
                    validation.push(violation);
                }
            }

            let id = validation
                .manifest
                .as_ref()
                .map(|m| m.id.clone())
                .or_else(|| Some(file.stem().to_string()).filter(|s| !s.is_empty()));

            if let Some(id) = &id {
                match first_seen.get(id) {
                    Some(first) => validation.push(Violation::error(
                        "id",
                        Rule::DuplicateId,
                        format!("Duplicate id '{id}', already defined in {}", first.display()),
                    )),
                    None => {
                        first_seen.insert(id.clone(), file.path.clone());
                    }
                }
            }

            for violation in &validation.violations {
                match violation.severity {
                    Severity::Error => tracing::warn!("{}: {violation}", file.path.display()),
                    Severity::Warning => tracing::debug!("{}: {violation}", file.path.display()),
                }
            }

            if let Some(manifest) = validation.manifest {
                manifests.push(manifest);
            }
            report.manifests.push(ManifestStatus {
                path: file.path.clone(),
                id,
                violations: validation.violations,
            });
        }

        (report, manifests)
    }

    /// Compile the index stamped with the current time
    pub fn compile(&self, files: &[ManifestFile]) -> Result<(RegistryIndex, CompileReport)> {
        self.compile_at(files, Utc::now())
    }

    /// Compile the index stamped with `now`
    ///
    /// Fails with [`RegistryError::CompilationBlocked`] carrying the status of
    /// every manifest if any of them has an error.
    pub fn compile_at(
        &self,
        files: &[ManifestFile],
        now: DateTime<Utc>,
    ) -> Result<(RegistryIndex, CompileReport)> {
        let (report, mut manifests) = self.validate_all(files);
        if !report.is_ok() {
            return Err(RegistryError::CompilationBlocked(Box::new(report)));
        }

        manifests.sort_by(|a, b| a.id.cmp(&b.id));

        let mut type_counts = BTreeMap::new();
        for manifest in &manifests {
            *type_counts
                .entry(manifest.artifact_type().as_str().to_string())
                .or_insert(0) += 1;
        }
        let cloud_available_count = manifests.iter().filter(|m| m.cloud_available).count();

        let items = manifests
            .iter()
            .map(|m| flatten::item(m, &self.registry.omit_fields))
            .collect();

        let index = RegistryIndex {
            version: self.registry.index_version,
            generated_at: now.format(TIMESTAMP_FORMAT).to_string(),
            total_count: manifests.len(),
            type_counts,
            cloud_available_count,
            schema_url: self.registry.schema_url.clone(),
            items,
        };

        Ok((index, report))
    }

    /// Compile and write the index to `output`
    pub fn build(&self, files: &[ManifestFile], output: &Path) -> Result<(RegistryIndex, CompileReport)> {
        let (index, report) = self.compile(files)?;
        write_index(&index, output)?;
        tracing::info!(
            "Built index with {} item(s) -> {}",
            index.total_count,
            output.display()
        );
        Ok((index, report))
    }
}

/// Serialize the index and replace `path` atomically
pub fn write_index(index: &RegistryIndex, path: &Path) -> Result<()> {
    let mut content = serde_json::to_string_pretty(index)
        .map_err(|e| RegistryError::Other(format!("Failed to serialize index: {e}")))?;
    content.push('\n');
    write_atomic(path, &content)
}
