//! Configuration module for mods-registry
//!
//! Loads config from an explicit `--config` path, then `./registry.toml`, then
//! `$XDG_CONFIG_HOME/mods-registry/config.toml` (or `~/.config/...`).
//! Falls back to embedded defaults if no file exists.
//! Partial configs are merged with defaults using serde's default attributes.
//!
//! # Example
//!
//! ```no_run
//! use mods_registry::config::Config;
//!
//! let config = Config::load(None).expect("Failed to load config");
//! println!("Manifests: {}", config.registry.manifests_dir.display());
//! println!("Max per host: {}", config.network.max_per_host);
//! ```

pub mod schema;

pub use schema::{
    Config, LinkCheckConfig, NetworkConfig, ProbeConfig, RegistryConfig, ValidationConfig,
};
