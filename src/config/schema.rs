use crate::error::{Result, RegistryError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "registry.toml";

/// Main configuration structure
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub links: LinkCheckConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct RegistryConfig {
    #[serde(default = "default_manifests_dir")]
    pub manifests_dir: PathBuf,
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
    #[serde(default = "default_schema_url")]
    pub schema_url: String,
    #[serde(default = "default_index_version")]
    pub index_version: u32,
    /// Placeholder hashes block compilation when set
    #[serde(default)]
    pub strict: bool,
    /// Top-level manifest keys left out of index items
    #[serde(default = "default_omit_fields")]
    pub omit_fields: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ValidationConfig {
    #[serde(default = "default_placeholder_prefix")]
    pub placeholder_prefix: String,
    /// Regex patterns for links that need a browser to resolve
    #[serde(default = "default_url_denylist")]
    pub url_denylist: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct NetworkConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_per_host")]
    pub max_per_host: usize,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct LinkCheckConfig {
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_true")]
    pub check_homepages: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ProbeConfig {
    /// Pause between provider requests
    #[serde(default = "default_probe_delay_ms")]
    pub delay_ms: u64,
}

// Default value functions
fn default_manifests_dir() -> PathBuf {
    PathBuf::from("manifests")
}
fn default_index_path() -> PathBuf {
    PathBuf::from("index.json")
}
fn default_schema_url() -> String {
    "https://registry.mods.sh/schemas/manifest.schema.json".to_string()
}
fn default_index_version() -> u32 {
    2
}
fn default_omit_fields() -> Vec<String> {
    vec!["notes".to_string()]
}
fn default_placeholder_prefix() -> String {
    "VERIFY_".to_string()
}
fn default_url_denylist() -> Vec<String> {
    vec![
        r"^https?://drive\.google\.com/".to_string(),
        r"^https?://(www\.)?mega\.(nz|io)/".to_string(),
        r"^https?://(www\.)?mediafire\.com/".to_string(),
        r"^https?://(www\.)?dropbox\.com/.*[?&]dl=0".to_string(),
        r"^https?://(hf\.co|huggingface\.co)/.+/blob/".to_string(),
    ]
}
fn default_user_agent() -> String {
    format!("mods-registry/{}", env!("CARGO_PKG_VERSION"))
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_read_timeout_secs() -> u64 {
    120
}
fn default_max_redirects() -> usize {
    5
}
fn default_max_concurrent() -> usize {
    8
}
fn default_max_per_host() -> usize {
    2
}
fn default_retries() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    8000
}
fn default_true() -> bool {
    true
}
fn default_probe_delay_ms() -> u64 {
    200
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            manifests_dir: default_manifests_dir(),
            index_path: default_index_path(),
            schema_url: default_schema_url(),
            index_version: default_index_version(),
            strict: false,
            omit_fields: default_omit_fields(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            placeholder_prefix: default_placeholder_prefix(),
            url_denylist: default_url_denylist(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            max_redirects: default_max_redirects(),
            max_concurrent: default_max_concurrent(),
            max_per_host: default_max_per_host(),
        }
    }
}

impl Default for LinkCheckConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            check_homepages: default_true(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_probe_delay_ms(),
        }
    }
}

impl NetworkConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Config {
    /// Load config, applying CI environment overrides
    ///
    /// An explicit path must exist; otherwise the first existing of
    /// `./registry.toml` and the XDG config file is used, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(RegistryError::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Self::from_file(path)?
            }
            None => match Self::discover() {
                Some(path) => Self::from_file(&path)?,
                None => {
                    tracing::debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env();
        config.check()?;
        Ok(config)
    }

    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            RegistryError::Config(format!("Failed to parse {}: {e}", path.display()))
        })?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }

        let user = dirs::config_dir()?.join("mods-registry").join("config.toml");
        user.exists().then_some(user)
    }

    /// CI runs always build with the strict hash policy
    pub fn apply_env(&mut self) {
        if std::env::var_os("CI").is_some() || std::env::var_os("GITHUB_ACTIONS").is_some() {
            if !self.registry.strict {
                tracing::debug!("CI environment detected, enabling strict hash policy");
            }
            self.registry.strict = true;
        }
    }

    fn check(&self) -> Result<()> {
        if self.network.max_concurrent == 0 || self.network.max_per_host == 0 {
            return Err(RegistryError::Config(
                "network.max_concurrent and network.max_per_host must be at least 1".to_string(),
            ));
        }
        if self.validation.placeholder_prefix.is_empty() {
            return Err(RegistryError::Config(
                "validation.placeholder_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.registry.manifests_dir, PathBuf::from("manifests"));
        assert_eq!(config.registry.index_version, 2);
        assert_eq!(config.validation.placeholder_prefix, "VERIFY_");
        assert_eq!(config.network.max_per_host, 2);
        assert_eq!(config.links.retries, 2);
        assert!(config.network.user_agent.starts_with("mods-registry/"));
    }

    #[test]
    fn test_partial_file_merges_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.toml");
        fs::write(
            &path,
            "[network]\nmax_per_host = 4\n\n[registry]\nstrict = true\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.network.max_per_host, 4);
        assert_eq!(config.network.max_concurrent, 8);
        assert!(config.registry.strict);
        assert_eq!(config.registry.omit_fields, vec!["notes".to_string()]);
    }

    #[test]
    fn test_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.toml");
        fs::write(&path, "[network\nmax_per_host = ").unwrap();

        assert!(matches!(
            Config::from_file(&path),
            Err(RegistryError::Config(_))
        ));
    }

    #[test]
    #[serial]
    fn test_missing_explicit_path() {
        let result = Config::load(Some(Path::new("/nonexistent/registry.toml")));
        assert!(result.unwrap_err().to_string().contains("not found"));
    }

    #[test]
    #[serial]
    fn test_zero_concurrency_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.toml");
        fs::write(&path, "[network]\nmax_concurrent = 0\n").unwrap();

        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    #[serial]
    fn test_ci_env_enables_strict() {
        let original = std::env::var_os("CI");
        std::env::set_var("CI", "true");

        let mut config = Config::default();
        config.apply_env();
        assert!(config.registry.strict);

        match original {
            Some(val) => std::env::set_var("CI", val),
            None => std::env::remove_var("CI"),
        }
    }
}
