use crate::error::{RegistryError, Result};
use crate::manifest::types::ArtifactType;
use std::fs;
use std::path::{Path, PathBuf};

/// A manifest file read from disk, not yet validated
#[derive(Debug, Clone)]
pub struct ManifestFile {
    pub path: PathBuf,
    pub source: String,
    /// Why the file could not be decoded as UTF-8, if it could not
    pub decode_error: Option<String>,
    /// Type implied by the parent directory, if it is a known type directory
    pub dir_type: Option<ArtifactType>,
}

/// Result of scanning a manifests directory
#[derive(Debug, Default)]
pub struct Discovery {
    pub files: Vec<ManifestFile>,
    pub unknown_dirs: Vec<PathBuf>,
}

impl ManifestFile {
    /// Read a manifest file
    ///
    /// Undecodable content is kept as a parse failure so one bad file does
    /// not abort a batch.
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| RegistryError::Manifest {
            path: path.to_path_buf(),
            message: format!("Failed to read: {e}"),
        })?;
        let (source, decode_error) = match String::from_utf8(bytes) {
            Ok(source) => (source, None),
            Err(e) => {
                tracing::warn!("{} is not valid UTF-8", path.display());
                (String::new(), Some(format!("File is not valid UTF-8: {}", e.utf8_error())))
            }
        };

        let dir_type = path
            .parent()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
            .and_then(ArtifactType::from_dir_name);

        Ok(Self {
            path: path.to_path_buf(),
            source,
            decode_error,
            dir_type,
        })
    }

    /// File name without extension; must equal the manifest id
    #[must_use]
    pub fn stem(&self) -> &str {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
    }

    /// Parse the YAML document
    ///
    /// Syntax errors and empty documents come back as a message rather than
    /// an error so the validator can report them as a violation.
    pub fn parse(&self) -> std::result::Result<serde_yaml::Value, String> {
        if let Some(message) = &self.decode_error {
            return Err(message.clone());
        }
        match serde_yaml::from_str::<serde_yaml::Value>(&self.source) {
            Ok(serde_yaml::Value::Null) => Err("Empty manifest file".to_string()),
            Ok(value) => Ok(value),
            Err(e) => Err(format!("Failed to parse YAML: {e}")),
        }
    }
}

fn is_manifest_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml")
}

/// Scan `manifests/<type-dir>/*.yaml` in sorted order
pub fn discover(manifests_dir: &Path) -> Result<Discovery> {
    if !manifests_dir.is_dir() {
        return Err(RegistryError::ManifestsDirMissing(
            manifests_dir.to_path_buf(),
        ));
    }

    let mut type_dirs: Vec<PathBuf> = fs::read_dir(manifests_dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    type_dirs.sort();

    let mut discovery = Discovery::default();

    for type_dir in type_dirs {
        let known = type_dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(ArtifactType::from_dir_name)
            .is_some();

        if !known {
            tracing::warn!("Unknown manifest directory: {}", type_dir.display());
            discovery.unknown_dirs.push(type_dir);
            continue;
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&type_dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| is_manifest_file(path))
            .collect();
        paths.sort();

        for path in paths {
            discovery.files.push(ManifestFile::read(&path)?);
        }
    }

    tracing::debug!(
        "Discovered {} manifest(s) under {}",
        discovery.files.len(),
        manifests_dir.display()
    );

    Ok(discovery)
}

/// Load explicit targets; directories are scanned as manifest roots
pub fn load_targets(targets: &[PathBuf], manifests_dir: &Path) -> Result<Vec<ManifestFile>> {
    if targets.is_empty() {
        return Ok(discover(manifests_dir)?.files);
    }

    let mut files = Vec::new();
    for target in targets {
        if target.is_dir() {
            files.extend(discover(target)?.files);
        } else {
            files.push(ManifestFile::read(target)?);
        }
    }
    Ok(files)
}
