use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of artifact a manifest describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Checkpoint,
    DiffusionModel,
    Lora,
    Vae,
    TextEncoder,
    Controlnet,
    Upscaler,
    Embedding,
    Ipadapter,
    Segmentation,
    Recipe,
}

/// Type table: (type, manifest value, directory under `manifests/`)
const TYPES: &[(ArtifactType, &str, &str)] = &[
    (ArtifactType::Checkpoint, "checkpoint", "checkpoints"),
    (ArtifactType::DiffusionModel, "diffusion_model", "diffusion_models"),
    (ArtifactType::Lora, "lora", "loras"),
    (ArtifactType::Vae, "vae", "vae"),
    (ArtifactType::TextEncoder, "text_encoder", "text_encoders"),
    (ArtifactType::Controlnet, "controlnet", "controlnet"),
    (ArtifactType::Upscaler, "upscaler", "upscalers"),
    (ArtifactType::Embedding, "embedding", "embeddings"),
    (ArtifactType::Ipadapter, "ipadapter", "ipadapters"),
    (ArtifactType::Segmentation, "segmentation", "segmentation"),
    (ArtifactType::Recipe, "recipe", "recipes"),
];

impl ArtifactType {
    /// Find type by its manifest value
    #[must_use]
    pub fn find(name: &str) -> Option<Self> {
        TYPES.iter().find(|(_, n, _)| *n == name).map(|(t, _, _)| *t)
    }

    /// Find type by the directory its manifests live in
    #[must_use]
    pub fn from_dir_name(dir: &str) -> Option<Self> {
        TYPES.iter().find(|(_, _, d)| *d == dir).map(|(t, _, _)| *t)
    }

    /// Get all manifest values
    #[must_use]
    pub fn all_names() -> Vec<&'static str> {
        TYPES.iter().map(|(_, n, _)| *n).collect()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        TYPES
            .iter()
            .find(|(t, _, _)| *t == self)
            .map_or("", |(_, n, _)| n)
    }

    #[must_use]
    pub fn dir_name(self) -> &'static str {
        TYPES
            .iter()
            .find(|(t, _, _)| *t == self)
            .map_or("", |(_, _, d)| d)
    }

    #[must_use]
    pub const fn is_recipe(self) -> bool {
        matches!(self, Self::Recipe)
    }

    /// Find closest type name using Levenshtein distance
    #[must_use]
    pub fn suggest(name: &str) -> Option<&'static str> {
        suggest_from(name, TYPES.iter().map(|(_, n, _)| *n))
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Browsing category shown by the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    General,
    Style,
    Character,
    Concept,
    Product,
    Technique,
    Acceleration,
    Editing,
    Upscaling,
    Segmentation,
    Controlnet,
}

const CATEGORIES: &[(Category, &str)] = &[
    (Category::General, "general"),
    (Category::Style, "style"),
    (Category::Character, "character"),
    (Category::Concept, "concept"),
    (Category::Product, "product"),
    (Category::Technique, "technique"),
    (Category::Acceleration, "acceleration"),
    (Category::Editing, "editing"),
    (Category::Upscaling, "upscaling"),
    (Category::Segmentation, "segmentation"),
    (Category::Controlnet, "controlnet"),
];

impl Category {
    #[must_use]
    pub fn find(name: &str) -> Option<Self> {
        CATEGORIES.iter().find(|(_, n)| *n == name).map(|(c, _)| *c)
    }

    #[must_use]
    pub fn all_names() -> Vec<&'static str> {
        CATEGORIES.iter().map(|(_, n)| *n).collect()
    }

    #[must_use]
    pub fn suggest(name: &str) -> Option<&'static str> {
        suggest_from(name, CATEGORIES.iter().map(|(_, n)| *n))
    }
}

fn suggest_from(name: &str, candidates: impl Iterator<Item = &'static str>) -> Option<&'static str> {
    if name.is_empty() {
        return None;
    }

    candidates
        .map(|candidate| (candidate, levenshtein_distance(name, candidate)))
        .min_by_key(|(_, dist)| *dist)
        .filter(|(_, dist)| *dist <= 2) // Only suggest if within 2 edits
        .map(|(candidate, _)| candidate)
}

/// Calculate Levenshtein distance between two strings
fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();

    if s1_chars.is_empty() {
        return s2_chars.len();
    }
    if s2_chars.is_empty() {
        return s1_chars.len();
    }

    // Single rolling row instead of the full matrix
    let mut prev: Vec<usize> = (0..=s2_chars.len()).collect();
    let mut curr = vec![0; s2_chars.len() + 1];

    for (i, c1) in s1_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, c2) in s2_chars.iter().enumerate() {
            let cost = usize::from(c1 != c2);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[s2_chars.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_type() {
        assert_eq!(ArtifactType::find("lora"), Some(ArtifactType::Lora));
        assert_eq!(
            ArtifactType::find("diffusion_model"),
            Some(ArtifactType::DiffusionModel)
        );
        assert_eq!(ArtifactType::find("model"), None);
    }

    #[test]
    fn test_all_names() {
        let names = ArtifactType::all_names();
        assert_eq!(names.len(), 11);
        assert!(names.contains(&"recipe"));
        assert!(names.contains(&"ipadapter"));
    }

    #[test]
    fn test_dir_mapping_roundtrips() {
        for name in ArtifactType::all_names() {
            let t = ArtifactType::find(name).unwrap();
            assert_eq!(ArtifactType::from_dir_name(t.dir_name()), Some(t));
        }
        assert_eq!(
            ArtifactType::from_dir_name("checkpoints"),
            Some(ArtifactType::Checkpoint)
        );
        assert_eq!(ArtifactType::from_dir_name("vae"), Some(ArtifactType::Vae));
        assert_eq!(ArtifactType::from_dir_name("misc"), None);
    }

    #[test]
    fn test_serde_names_match_table() {
        for name in ArtifactType::all_names() {
            let parsed: ArtifactType = serde_json::from_value(serde_json::json!(name)).unwrap();
            assert_eq!(parsed.as_str(), name);
        }
    }

    #[test]
    fn test_suggest() {
        assert_eq!(ArtifactType::suggest("lorra"), Some("lora"));
        assert_eq!(ArtifactType::suggest("checkpont"), Some("checkpoint"));
        assert_eq!(ArtifactType::suggest("completely-wrong"), None);
        assert_eq!(ArtifactType::suggest(""), None);
        assert_eq!(Category::suggest("stlye"), Some("style"));
    }

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("vae", "vae"), 0);
        assert_eq!(levenshtein_distance("lora", "loras"), 1);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn test_category_lookup() {
        assert_eq!(Category::find("style"), Some(Category::Style));
        assert_eq!(Category::find("landscape"), None);
        assert_eq!(Category::all_names().len(), 11);
    }
}
