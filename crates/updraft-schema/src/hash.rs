//! SHA-512 content digests.
//!
//! Every integrity check in updraft (per-file checksum manifests, whole
//! package digests, download verification) is expressed as a
//! [`Sha512Digest`].

use std::io::Read;

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha512};

use crate::SchemaError;

/// Number of hex characters in a SHA-512 digest.
pub const SHA512_HEX_LEN: usize = 128;

/// SHA-512 of zero bytes of input.
///
/// Zero-length files are represented by this constant without being read.
pub const EMPTY_SHA512: &str = "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3e";

/// A validated SHA-512 digest (128 lowercase hex characters).
///
/// Validation happens at construction and at deserialization time, so an
/// invalid hex string never propagates through the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Sha512Digest(String);

impl Sha512Digest {
    /// Create a new `Sha512Digest`, validating the input.
    ///
    /// Accepts strings with or without a `sha512:` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidDigest`] if the hex portion is not
    /// exactly 128 ASCII hex characters.
    pub fn new(s: impl Into<String>) -> Result<Self, SchemaError> {
        let s = s.into();
        let hex = s.strip_prefix("sha512:").unwrap_or(&s);

        if hex.len() != SHA512_HEX_LEN {
            return Err(SchemaError::InvalidDigest(format!(
                "expected {SHA512_HEX_LEN} hex characters, got {} in '{s}'",
                hex.len()
            )));
        }

        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SchemaError::InvalidDigest(format!(
                "contains non-hex characters in '{s}'"
            )));
        }

        Ok(Self(hex.to_lowercase()))
    }

    /// Digest of empty input.
    pub fn empty() -> Self {
        Self(EMPTY_SHA512.to_string())
    }

    /// Compute the digest of an in-memory buffer.
    pub fn compute(data: &[u8]) -> Self {
        if data.is_empty() {
            return Self::empty();
        }
        Self(hex::encode(Sha512::digest(data)))
    }

    /// Compute the digest of a stream, reading it to the end.
    ///
    /// # Errors
    ///
    /// Propagates any read error from `reader`.
    pub fn compute_reader<R: Read>(mut reader: R) -> std::io::Result<Self> {
        let mut hasher = Sha512::new();
        let mut buffer = [0u8; 8192];
        loop {
            let count = reader.read(&mut buffer)?;
            if count == 0 {
                break;
            }
            hasher.update(&buffer[..count]);
        }
        Ok(Self::from_hasher(hasher))
    }

    /// Finalize a running hasher into a digest.
    pub fn from_hasher(hasher: Sha512) -> Self {
        Self(hex::encode(hasher.finalize()))
    }

    /// Get the digest as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Sha512Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl std::str::FromStr for Sha512Digest {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::fmt::Display for Sha512Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha512Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
