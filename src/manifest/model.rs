use crate::manifest::digest::HashState;
use crate::manifest::types::{ArtifactType, Category};
use serde_json::{Map, Value};

/// A manifest that passed validation
///
/// Built only by the validator, so the payload shape always agrees with the
/// artifact type.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub id: String,
    pub name: String,
    pub category: Option<Category>,
    pub cloud_available: bool,
    pub homepage: Option<String>,
    pub body: Body,
    /// Remaining top-level fields (author, license, tags, dates, ...)
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Downloadable artifact of any non-recipe type
    Asset { kind: ArtifactType, download: Download },
    Recipe(Recipe),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Download {
    File(Descriptor),
    /// Never empty
    Variants(Vec<Variant>),
}

/// One downloadable file
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub url: String,
    pub hash: HashState,
    pub size: u64,
    pub format: Option<String>,
    pub file_name: Option<String>,
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub id: String,
    pub precision: Option<String>,
    pub descriptor: Descriptor,
}

/// Configuration-only payload
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    pub base_model: String,
    pub training: Map<String, Value>,
    /// Generation defaults, tips and anything else in the block
    pub extra: Map<String, Value>,
}

/// Position of a descriptor inside its manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorSlot {
    File,
    Variant(usize),
}

impl DescriptorSlot {
    /// Field path used in violation reports
    #[must_use]
    pub fn path(self) -> String {
        match self {
            Self::File => "file".to_string(),
            Self::Variant(i) => format!("variants[{i}]"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DescriptorRef<'a> {
    pub slot: DescriptorSlot,
    /// Variant id, or `None` for a single file
    pub variant: Option<&'a str>,
    pub descriptor: &'a Descriptor,
}

impl DescriptorRef<'_> {
    /// Human-readable label such as `variant fp16` or `file`
    #[must_use]
    pub fn label(&self) -> String {
        self.variant
            .map_or_else(|| "file".to_string(), |id| format!("variant {id}"))
    }
}

impl Manifest {
    #[must_use]
    pub const fn artifact_type(&self) -> ArtifactType {
        match &self.body {
            Body::Asset { kind, .. } => *kind,
            Body::Recipe(_) => ArtifactType::Recipe,
        }
    }

    /// All descriptors in document order
    #[must_use]
    pub fn descriptors(&self) -> Vec<DescriptorRef<'_>> {
        match &self.body {
            Body::Recipe(_) => Vec::new(),
            Body::Asset {
                download: Download::File(descriptor),
                ..
            } => vec![DescriptorRef {
                slot: DescriptorSlot::File,
                variant: None,
                descriptor,
            }],
            Body::Asset {
                download: Download::Variants(variants),
                ..
            } => variants
                .iter()
                .enumerate()
                .map(|(i, v)| DescriptorRef {
                    slot: DescriptorSlot::Variant(i),
                    variant: Some(v.id.as_str()),
                    descriptor: &v.descriptor,
                })
                .collect(),
        }
    }

    /// Descriptors still carrying a placeholder hash
    #[must_use]
    pub fn pending_descriptors(&self) -> Vec<DescriptorRef<'_>> {
        self.descriptors()
            .into_iter()
            .filter(|d| d.descriptor.hash.is_pending())
            .collect()
    }

    /// Number of descriptors at or before `slot` that declare the same hash text
    ///
    /// Used to pick the right line when two descriptors share a placeholder.
    #[must_use]
    pub fn occurrence_of(&self, slot: DescriptorSlot) -> usize {
        let descriptors = self.descriptors();
        let Some(target) = descriptors.iter().find(|d| d.slot == slot) else {
            return 0;
        };
        let declared = target.descriptor.hash.declared();
        descriptors
            .iter()
            .take_while(|d| d.slot != slot)
            .filter(|d| d.descriptor.hash.declared() == declared)
            .count()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn descriptor(url: &str, hash: HashState, size: u64) -> Descriptor {
        Descriptor {
            url: url.to_string(),
            hash,
            size,
            format: Some("safetensors".to_string()),
            file_name: None,
            extra: Map::new(),
        }
    }

    pub(crate) fn pending(tag: &str) -> HashState {
        HashState::Pending {
            placeholder: format!("VERIFY_{tag}"),
        }
    }

    pub(crate) fn variants_manifest(id: &str, variants: Vec<(&str, HashState)>) -> Manifest {
        Manifest {
            id: id.to_string(),
            name: id.to_string(),
            category: None,
            cloud_available: false,
            homepage: None,
            body: Body::Asset {
                kind: ArtifactType::Checkpoint,
                download: Download::Variants(
                    variants
                        .into_iter()
                        .map(|(vid, hash)| Variant {
                            id: vid.to_string(),
                            precision: None,
                            descriptor: descriptor(
                                &format!("https://example.test/{id}-{vid}.safetensors"),
                                hash,
                                100,
                            ),
                        })
                        .collect(),
                ),
            },
            extra: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::manifest::digest::Sha256Digest;

    #[test]
    fn test_descriptors_in_order() {
        let manifest = variants_manifest(
            "flux-dev",
            vec![("fp16", pending("a")), ("fp8", pending("b"))],
        );
        let refs = manifest.descriptors();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].slot, DescriptorSlot::Variant(0));
        assert_eq!(refs[1].label(), "variant fp8");
        assert_eq!(manifest.artifact_type(), ArtifactType::Checkpoint);
    }

    #[test]
    fn test_recipe_has_no_descriptors() {
        let manifest = Manifest {
            id: "portrait-recipe".to_string(),
            name: "Portrait".to_string(),
            category: None,
            cloud_available: false,
            homepage: None,
            body: Body::Recipe(Recipe {
                base_model: "flux-dev".to_string(),
                training: Map::new(),
                extra: Map::new(),
            }),
            extra: Map::new(),
        };
        assert!(manifest.descriptors().is_empty());
        assert_eq!(manifest.artifact_type(), ArtifactType::Recipe);
    }

    #[test]
    fn test_pending_filter() {
        let digest = Sha256Digest::compute(b"weights");
        let manifest = variants_manifest(
            "sdxl",
            vec![("fp16", HashState::Verified(digest)), ("fp8", pending("x"))],
        );
        let pending = manifest.pending_descriptors();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].variant, Some("fp8"));
    }

    #[test]
    fn test_occurrence_of_shared_placeholder() {
        let manifest = variants_manifest(
            "dup",
            vec![
                ("a", pending("same")),
                ("b", pending("other")),
                ("c", pending("same")),
            ],
        );
        assert_eq!(manifest.occurrence_of(DescriptorSlot::Variant(0)), 0);
        assert_eq!(manifest.occurrence_of(DescriptorSlot::Variant(1)), 0);
        assert_eq!(manifest.occurrence_of(DescriptorSlot::Variant(2)), 1);
    }
}
