//! Content hashes: the identity of a byte payload
//!
//! A content hash is the 128-bit MD5 digest of an image's raw bytes. It names
//! the persisted file and is the key for exact-duplicate detection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Extension used for every persisted image, whatever its real format
pub const IMAGE_EXTENSION: &str = "jpg";

/// Error parsing a content hash from text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid content hash '{0}': expected 32 hex characters")]
pub struct InvalidContentHash(pub String);

/// 128-bit digest of an image payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Computes the hash of `bytes`
    pub fn of(bytes: &[u8]) -> Self {
        Self(md5::compute(bytes).0)
    }

    /// Lowercase hex form, as used in checkpoints and file names
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Name of the file this payload is stored under
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.to_hex(), IMAGE_EXTENSION)
    }

    /// Recovers a hash from a stored file name such as `<hex>.jpg`
    ///
    /// Returns `None` for names that were not produced by [`ContentHash::file_name`].
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(IMAGE_EXTENSION)?.strip_suffix('.')?;
        stem.parse().ok()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = InvalidContentHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidContentHash(s.to_string());
        if s.len() != 32 {
            return Err(invalid());
        }
        let bytes = hex::decode(s.to_ascii_lowercase()).map_err(|_| invalid())?;
        let digest: [u8; 16] = bytes.try_into().map_err(|_| invalid())?;
        Ok(Self(digest))
    }
}

impl TryFrom<String> for ContentHash {
    type Error = InvalidContentHash;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_hex()
    }
}
