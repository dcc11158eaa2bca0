use crate::manifest::Sha256Digest;
use crate::net::{ByteStream, NetworkFailure};
use futures_util::StreamExt;
use indicatif::ProgressBar;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Where a size disagreement was noticed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeCheck {
    /// `Content-Length` header, before hashing
    ContentLength,
    /// More bytes arrived than declared
    Overrun,
    /// Stream ended short
    EndOfStream,
}

impl fmt::Display for SizeCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ContentLength => "Content-Length",
            Self::Overrun => "stream overrun",
            Self::EndOfStream => "end of stream",
        })
    }
}

/// Why a descriptor could not be verified
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyFailure {
    #[error("{0}")]
    Network(#[from] NetworkFailure),

    #[error("size mismatch ({check}): declared {declared} bytes, got {observed}")]
    SizeMismatch {
        declared: u64,
        observed: u64,
        check: SizeCheck,
    },

    #[error("could not update manifest: {0}")]
    Rewrite(String),
}

/// Hash a response body, enforcing the declared size
///
/// Stops reading as soon as the stream passes `declared_size`.
pub(crate) async fn hash_body(
    mut body: ByteStream,
    declared_size: u64,
    progress: &ProgressBar,
) -> Result<(Sha256Digest, u64), VerifyFailure> {
    let mut hasher = Sha256::new();
    let mut received: u64 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        received += chunk.len() as u64;
        if received > declared_size {
            return Err(VerifyFailure::SizeMismatch {
                declared: declared_size,
                observed: received,
                check: SizeCheck::Overrun,
            });
        }
        hasher.update(&chunk);
        progress.set_position(received);
    }

    if received != declared_size {
        return Err(VerifyFailure::SizeMismatch {
            declared: declared_size,
            observed: received,
            check: SizeCheck::EndOfStream,
        });
    }

    Ok((Sha256Digest::from_hasher(hasher), received))
}
