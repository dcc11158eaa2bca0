//! Type-aware validation of a single manifest.
//!
//! Validation never fails: every problem, including unparseable input, comes
//! back as a [`Violation`]. A manifest with no error-severity violations is
//! also converted into its typed [`Manifest`] form.

mod fields;

use crate::config::ValidationConfig;
use crate::error::{RegistryError, Result};
use crate::manifest::{ArtifactType, Body, Category, Download, Manifest, ManifestFile};
use regex::Regex;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::fmt;

/// Manifest ids are lowercase slugs
pub const ID_PATTERN: &str = r"^[a-z0-9]+(-[a-z0-9]+)*$";

/// Top-level keys the validator interprets itself
const KNOWN_KEYS: &[&str] = &[
    "id",
    "name",
    "type",
    "category",
    "cloud_available",
    "homepage",
    "file",
    "variants",
    "recipe",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
        })
    }
}

/// The rule a violation breaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Malformed,
    MissingField,
    FieldType,
    IdPattern,
    IdMismatch,
    UnknownType,
    UnknownCategory,
    /// Exactly one of file/variants, or a recipe block for recipes
    PayloadShape,
    InvalidHash,
    InvalidSize,
    InvalidUrl,
    DeniedHost,
    DuplicateVariant,
    TypeRequirement,
    TypeDirectoryMismatch,
    DuplicateId,
    HashUnresolved,
}

impl Rule {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::MissingField => "missing_field",
            Self::FieldType => "field_type",
            Self::IdPattern => "id_pattern",
            Self::IdMismatch => "id_mismatch",
            Self::UnknownType => "unknown_type",
            Self::UnknownCategory => "unknown_category",
            Self::PayloadShape => "payload_shape",
            Self::InvalidHash => "invalid_hash",
            Self::InvalidSize => "invalid_size",
            Self::InvalidUrl => "invalid_url",
            Self::DeniedHost => "denied_host",
            Self::DuplicateVariant => "duplicate_variant",
            Self::TypeRequirement => "type_requirement",
            Self::TypeDirectoryMismatch => "type_directory_mismatch",
            Self::DuplicateId => "duplicate_id",
            Self::HashUnresolved => "hash_unresolved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Field path such as `variants[1].sha256`; empty for the whole document
    pub path: String,
    pub rule: Rule,
    pub severity: Severity,
    pub message: String,
}

impl Violation {
    pub fn error(path: impl Into<String>, rule: Rule, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            rule,
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(path: impl Into<String>, rule: Rule, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            rule,
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} [{}]: {}", self.severity, self.rule.as_str(), self.message)
        } else {
            write!(
                f,
                "{} [{}] {}: {}",
                self.severity,
                self.rule.as_str(),
                self.path,
                self.message
            )
        }
    }
}

/// Outcome of validating one manifest
#[derive(Debug, Clone, Default)]
pub struct Validation {
    pub violations: Vec<Violation>,
    /// Present only when there are no error-severity violations
    pub manifest: Option<Manifest>,
}

impl Validation {
    fn malformed(message: String) -> Self {
        Self {
            violations: vec![Violation::error("", Rule::Malformed, message)],
            manifest: None,
        }
    }

    /// Add a violation found outside the document itself
    pub fn push(&mut self, violation: Violation) {
        if violation.is_error() {
            self.manifest = None;
        }
        self.violations.push(violation);
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.violations.iter().any(Violation::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| v.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| !v.is_error())
    }
}

/// Accumulates violations while walking a document
#[derive(Default)]
pub(crate) struct Collector {
    violations: Vec<Violation>,
}

impl Collector {
    pub(crate) fn error(&mut self, path: impl Into<String>, rule: Rule, message: impl Into<String>) {
        self.violations.push(Violation::error(path, rule, message));
    }

    pub(crate) fn warning(&mut self, path: impl Into<String>, rule: Rule, message: impl Into<String>) {
        self.violations.push(Violation::warning(path, rule, message));
    }

    fn has_errors(&self) -> bool {
        self.violations.iter().any(Violation::is_error)
    }
}

/// Schema validator for manifests
#[derive(Debug, Clone)]
pub struct Validator {
    id_pattern: Regex,
    url_denylist: Vec<Regex>,
    placeholder_prefix: String,
}

impl Validator {
    /// Create validator from config
    pub fn new(config: &ValidationConfig) -> Result<Self> {
        let id_pattern = Regex::new(ID_PATTERN)
            .map_err(|e| RegistryError::Other(format!("Invalid id pattern: {e}")))?;

        let url_denylist = config
            .url_denylist
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    RegistryError::Config(format!("Invalid url_denylist pattern '{pattern}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id_pattern,
            url_denylist,
            placeholder_prefix: config.placeholder_prefix.clone(),
        })
    }

    #[must_use]
    pub fn placeholder_prefix(&self) -> &str {
        &self.placeholder_prefix
    }

    /// Validate a manifest file, including its type directory
    #[must_use]
    pub fn validate_file(&self, file: &ManifestFile) -> Validation {
        let doc = match file.parse() {
            Ok(doc) => doc,
            Err(message) => return Validation::malformed(message),
        };

        let mut validation = self.validate(&doc, file.stem());

        let declared = doc
            .get("type")
            .and_then(Value::as_str)
            .and_then(ArtifactType::find);
        if let (Some(expected), Some(declared)) = (file.dir_type, declared) {
            if expected != declared {
                validation.push(Violation::error(
                    "type",
                    Rule::TypeDirectoryMismatch,
                    format!(
                        "Type '{declared}' doesn't match directory '{}' (expected '{expected}')",
                        expected.dir_name()
                    ),
                ));
            }
        }

        validation
    }

    /// Validate one parsed document against its filename stem
    #[must_use]
    pub fn validate(&self, doc: &Value, stem: &str) -> Validation {
        let mut out = Collector::default();

        let Some(map) = doc.as_mapping() else {
            out.error("", Rule::Malformed, "Manifest must be a YAML mapping");
            return Validation {
                violations: out.violations,
                manifest: None,
            };
        };

        // 1. Required fields
        let id = fields::required_str(map, "id", "", &mut out);
        let name = fields::required_str(map, "name", "", &mut out);
        let type_name = fields::required_str(map, "type", "", &mut out);

        // 2. Id shape and filename
        if let Some(id) = id {
            if !self.id_pattern.is_match(id) {
                out.error(
                    "id",
                    Rule::IdPattern,
                    format!("ID '{id}' must be a lowercase slug matching {ID_PATTERN}"),
                );
            }
            if id != stem {
                out.error(
                    "id",
                    Rule::IdMismatch,
                    format!("ID '{id}' does not match filename '{stem}'"),
                );
            }
        }

        // 3. Closed type enumeration
        let kind = type_name.and_then(|name| {
            let found = ArtifactType::find(name);
            if found.is_none() {
                let hint = ArtifactType::suggest(name)
                    .map(|s| format!(" Did you mean '{s}'?"))
                    .unwrap_or_default();
                out.error(
                    "type",
                    Rule::UnknownType,
                    format!(
                        "Invalid type '{name}'. Must be one of: {}.{hint}",
                        ArtifactType::all_names().join(", ")
                    ),
                );
            }
            found
        });

        let category = self.category(map, &mut out);
        let cloud_available = fields::optional_bool(map, "cloud_available", "", &mut out);
        let homepage = fields::optional_str(map, "homepage", "", &mut out);
        if let Some(homepage) = homepage {
            if let Err((_, message)) = self.check_url(homepage) {
                out.warning("homepage", Rule::InvalidUrl, message);
            }
        }

        // 4. Payload shape
        let present = |key: &str| map.get(key).is_some_and(|v| !v.is_null());
        let (has_file, has_variants, has_recipe) =
            (present("file"), present("variants"), present("recipe"));
        fields::check_shape(kind, has_file, has_variants, has_recipe, &mut out);

        // 5. Download descriptors
        let file = map
            .get("file")
            .filter(|v| !v.is_null())
            .and_then(|v| fields::descriptor(self, v, "file", false, &mut out));
        let variants = map
            .get("variants")
            .filter(|v| !v.is_null())
            .and_then(|v| fields::variants(self, v, &mut out));

        // 6. Type-specific requirements
        let recipe = if kind == Some(ArtifactType::Recipe) {
            fields::recipe(map.get("recipe"), &mut out)
        } else {
            None
        };
        if kind == Some(ArtifactType::Lora) {
            fields::lora_base_models(map, &mut out);
        }

        let extra = fields::extra_fields(map, KNOWN_KEYS, "", &mut out);

        if out.has_errors() {
            return Validation {
                violations: out.violations,
                manifest: None,
            };
        }

        let body = match (kind, file, variants, recipe) {
            (Some(ArtifactType::Recipe), None, None, Some(recipe)) => Some(Body::Recipe(recipe)),
            (Some(kind), Some(file), None, None) if !kind.is_recipe() => Some(Body::Asset {
                kind,
                download: Download::File(file),
            }),
            (Some(kind), None, Some(variants), None) if !kind.is_recipe() => Some(Body::Asset {
                kind,
                download: Download::Variants(variants),
            }),
            _ => None,
        };

        let manifest = match (id, name, body) {
            (Some(id), Some(name), Some(body)) => Some(Manifest {
                id: id.to_string(),
                name: name.to_string(),
                category,
                cloud_available: cloud_available.unwrap_or(false),
                homepage: homepage.map(str::to_string),
                body,
                extra,
            }),
            _ => {
                out.error("", Rule::PayloadShape, "Manifest payload could not be assembled");
                None
            }
        };

        Validation {
            violations: out.violations,
            manifest,
        }
    }

    fn category(&self, map: &Mapping, out: &mut Collector) -> Option<Category> {
        let name = fields::optional_str(map, "category", "", out)?;
        let found = Category::find(name);
        if found.is_none() {
            let hint = Category::suggest(name)
                .map(|s| format!(" Did you mean '{s}'?"))
                .unwrap_or_default();
            out.error(
                "category",
                Rule::UnknownCategory,
                format!(
                    "Invalid category '{name}'. Must be one of: {}.{hint}",
                    Category::all_names().join(", ")
                ),
            );
        }
        found
    }

    /// Check that a URL is a direct HTTP(S) link
    pub fn check_url(&self, url: &str) -> std::result::Result<(), (Rule, String)> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| (Rule::InvalidUrl, format!("Invalid URL '{url}': {e}")))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err((
                Rule::InvalidUrl,
                format!("URL '{url}' must use http or https"),
            ));
        }
        if parsed.host_str().map_or(true, str::is_empty) {
            return Err((Rule::InvalidUrl, format!("URL '{url}' has no host")));
        }

        if let Some(pattern) = self.url_denylist.iter().find(|re| re.is_match(url)) {
            return Err((
                Rule::DeniedHost,
                format!(
                    "URL '{url}' needs a browser to resolve (matches denylist pattern {}); link the direct file instead",
                    pattern.as_str()
                ),
            ));
        }

        Ok(())
    }

    pub(crate) fn is_placeholder(&self, value: &str) -> bool {
        value.starts_with(&self.placeholder_prefix)
    }
}

/// Placeholder hashes left in a validated manifest
///
/// Errors under the strict policy, warnings otherwise.
#[must_use]
pub fn unresolved_hashes(manifest: &Manifest, strict: bool) -> Vec<Violation> {
    manifest
        .pending_descriptors()
        .into_iter()
        .map(|d| {
            let path = format!("{}.sha256", d.slot.path());
            let message = format!(
                "{} has placeholder hash: {}",
                capitalize(&d.label()),
                d.descriptor.hash.declared()
            );
            if strict {
                Violation::error(path, Rule::HashUnresolved, message)
            } else {
                Violation::warning(path, Rule::HashUnresolved, message)
            }
        })
        .collect()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
