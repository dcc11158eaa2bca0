//! SHA-256 digests and the trust level attached to each declared hash.
//!
//! A descriptor's `sha256` is one of three states: a placeholder awaiting
//! resolution, a provider-attested (probed) digest, or a digest computed from
//! the downloaded bytes. The state is carried in the manifest as the `sha256`
//! value plus an optional `sha256_source: probed` marker.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Expected length of a hex-encoded SHA-256 digest.
const DIGEST_HEX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
    #[error("expected {DIGEST_HEX_LEN} hex characters, got {0}")]
    Length(usize),
    #[error("non-hex character '{0}'")]
    NonHex(char),
    #[error("digest must be lowercase")]
    Uppercase,
}

/// A validated, lowercase hex-encoded SHA-256 digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Digest of an in-memory buffer
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self::from_hasher(Sha256::new_with_prefix(data))
    }

    /// Finish a streaming hasher
    #[must_use]
    pub fn from_hasher(hasher: Sha256) -> Self {
        Self(hex::encode(hasher.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<&str> for Sha256Digest {
    type Error = DigestError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        validate_sha256(value)?;
        Ok(Self(value.to_owned()))
    }
}

impl TryFrom<String> for Sha256Digest {
    type Error = DigestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_sha256(&value)?;
        Ok(Self(value))
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_sha256(value: &str) -> Result<(), DigestError> {
    if value.len() != DIGEST_HEX_LEN {
        return Err(DigestError::Length(value.len()));
    }
    if let Some(bad) = value.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(DigestError::NonHex(bad));
    }
    if value.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(DigestError::Uppercase);
    }
    Ok(())
}

/// How much a declared hash can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    /// Placeholder, nothing known yet
    Unknown,
    /// Attested by the hosting provider's metadata
    Probed,
    /// Computed from the downloaded bytes
    Verified,
}

impl TrustLevel {
    /// Parse a `sha256_source` marker value
    #[must_use]
    pub fn from_marker(value: &str) -> Option<Self> {
        match value {
            "probed" => Some(Self::Probed),
            "verified" => Some(Self::Verified),
            _ => None,
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Probed => "probed",
            Self::Verified => "verified",
        })
    }
}

/// The declared hash of one descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashState {
    Pending { placeholder: String },
    Probed(Sha256Digest),
    Verified(Sha256Digest),
}

impl HashState {
    /// Interpret a manifest's `sha256` value and optional trust marker
    ///
    /// A real digest without a marker counts as verified.
    pub fn parse(raw: &str, marker: Option<TrustLevel>, placeholder_prefix: &str) -> Result<Self, DigestError> {
        if raw.starts_with(placeholder_prefix) {
            return Ok(Self::Pending {
                placeholder: raw.to_string(),
            });
        }

        let digest = Sha256Digest::try_from(raw)?;
        Ok(match marker {
            Some(TrustLevel::Probed) => Self::Probed(digest),
            _ => Self::Verified(digest),
        })
    }

    /// Text as written in the manifest
    #[must_use]
    pub fn declared(&self) -> &str {
        match self {
            Self::Pending { placeholder } => placeholder,
            Self::Probed(d) | Self::Verified(d) => d.as_str(),
        }
    }

    #[must_use]
    pub const fn digest(&self) -> Option<&Sha256Digest> {
        match self {
            Self::Pending { .. } => None,
            Self::Probed(d) | Self::Verified(d) => Some(d),
        }
    }

    #[must_use]
    pub const fn trust(&self) -> TrustLevel {
        match self {
            Self::Pending { .. } => TrustLevel::Unknown,
            Self::Probed(_) => TrustLevel::Probed,
            Self::Verified(_) => TrustLevel::Verified,
        }
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_compute_known_digest() {
        assert_eq!(Sha256Digest::compute(b"").as_str(), EMPTY_SHA256);
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let mut hasher = Sha256::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(
            Sha256Digest::from_hasher(hasher),
            Sha256Digest::compute(b"hello world")
        );
    }

    #[test]
    fn test_rejects_bad_digests() {
        assert_eq!(
            Sha256Digest::try_from("abcdef"),
            Err(DigestError::Length(6))
        );
        assert_eq!(
            Sha256Digest::try_from("g".repeat(64)),
            Err(DigestError::NonHex('g'))
        );
        assert_eq!(
            Sha256Digest::try_from("A".repeat(64)),
            Err(DigestError::Uppercase)
        );
        assert!(Sha256Digest::try_from("a".repeat(64)).is_ok());
    }

    #[test]
    fn test_hash_state_parse() {
        let pending = HashState::parse("VERIFY_flux_fp16", None, "VERIFY_").unwrap();
        assert!(pending.is_pending());
        assert_eq!(pending.declared(), "VERIFY_flux_fp16");
        assert_eq!(pending.trust(), TrustLevel::Unknown);

        let verified = HashState::parse(EMPTY_SHA256, None, "VERIFY_").unwrap();
        assert_eq!(verified.trust(), TrustLevel::Verified);

        let probed = HashState::parse(EMPTY_SHA256, Some(TrustLevel::Probed), "VERIFY_").unwrap();
        assert_eq!(probed.trust(), TrustLevel::Probed);
        assert_eq!(probed.digest().unwrap().as_str(), EMPTY_SHA256);

        assert!(HashState::parse("deadbeef", None, "VERIFY_").is_err());
    }

    #[test]
    fn test_marker_values() {
        assert_eq!(TrustLevel::from_marker("probed"), Some(TrustLevel::Probed));
        assert_eq!(TrustLevel::from_marker("verified"), Some(TrustLevel::Verified));
        assert_eq!(TrustLevel::from_marker("guessed"), None);
    }
}
