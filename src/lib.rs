#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod error;
pub mod index;
pub mod links;
pub mod manifest;
pub mod net;
pub mod probe;
pub mod validate;
pub mod verify;

pub use error::{RegistryError, Result};
