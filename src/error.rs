use crate::index::CompileReport;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the registry pipeline
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Config error: {0}\n\nTroubleshooting:\n- Check ./registry.toml or ~/.config/mods-registry/config.toml\n- Pass an explicit file with --config <path>\n- Run with RUST_LOG=debug for more details")]
    Config(String),

    #[error("Manifest error in {}: {message}", path.display())]
    Manifest { path: PathBuf, message: String },

    #[error("Manifest directory not found: {}\n\nTroubleshooting:\n- Run from the registry root or set registry.manifests_dir in config\n- Expected layout: manifests/<type-dir>/<id>.yaml", .0.display())]
    ManifestsDirMissing(PathBuf),

    #[error("Index compilation blocked: {} of {} manifest(s) have errors\n\nTroubleshooting:\n- Run `mods-registry validate` to see every violation\n- Placeholder hashes block strict builds: run `mods-registry probe` or `mods-registry verify` first", .0.failing_count(), .0.total())]
    CompilationBlocked(Box<CompileReport>),

    #[error("Could not rewrite {}: {message}\n\nTroubleshooting:\n- The sha256 line may have been edited since the manifest was loaded\n- Re-run the tool against a clean checkout", path.display())]
    Rewrite { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
