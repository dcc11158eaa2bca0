pub mod digest;
pub mod loader;
pub mod model;
pub mod rewrite;
pub mod types;

pub use digest::{HashState, Sha256Digest, TrustLevel};
pub use loader::{discover, load_targets, Discovery, ManifestFile};
pub use model::{Body, Descriptor, DescriptorRef, DescriptorSlot, Download, Manifest, Recipe, Variant};
pub use rewrite::HashRewrite;
pub use types::{ArtifactType, Category};
