//! Binary patches built with zstd dictionary compression.
//!
//! The old content serves as the dictionary for compressing the new content,
//! so shared byte runs cost almost nothing in the patch.

use std::io::Write;

use thiserror::Error;
use zstd::dict::{DecoderDictionary, EncoderDictionary};

/// Compression level used for patches.
pub const PATCH_LEVEL: i32 = 19;

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("failed to build patch: {0}")]
    Diff(#[source] std::io::Error),

    #[error("failed to apply patch: {0}")]
    Apply(#[source] std::io::Error),
}

/// Generate a patch that turns `old` into `new`.
pub fn diff(old: &[u8], new: &[u8]) -> Result<Vec<u8>, PatchError> {
    diff_with_level(old, new, PATCH_LEVEL)
}

/// Generate a patch with an explicit zstd compression level.
pub fn diff_with_level(old: &[u8], new: &[u8], level: i32) -> Result<Vec<u8>, PatchError> {
    if old.is_empty() {
        return zstd::stream::encode_all(new, level).map_err(PatchError::Diff);
    }

    let dict = EncoderDictionary::copy(old, level);
    let mut encoder =
        zstd::stream::Encoder::with_prepared_dictionary(Vec::new(), &dict).map_err(PatchError::Diff)?;
    encoder.write_all(new).map_err(PatchError::Diff)?;
    encoder.finish().map_err(PatchError::Diff)
}

/// Apply a patch produced by [`diff`] to `old`.
pub fn apply(old: &[u8], patch: &[u8]) -> Result<Vec<u8>, PatchError> {
    if old.is_empty() {
        return zstd::stream::decode_all(patch).map_err(PatchError::Apply);
    }

    let dict = DecoderDictionary::copy(old);
    let mut decoder =
        zstd::stream::Decoder::with_prepared_dictionary(patch, &dict).map_err(PatchError::Apply)?;
    let mut out = Vec::new();
    std::io::copy(&mut decoder, &mut out).map_err(PatchError::Apply)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(old: &[u8], new: &[u8]) {
        let patch = diff(old, new).unwrap();
        assert_eq!(apply(old, &patch).unwrap(), new);
    }

    #[test]
    fn test_patch_roundtrip() {
        let old = b"hello world this is a test string for binary deltas";
        let new =
            b"hello world this is a test string for binary deltas with some new content at the end";

        let patch = diff(old, new).unwrap();
        assert!(patch.len() < new.len());
        assert_eq!(apply(old, &patch).unwrap(), new);
    }

    #[test]
    fn test_edge_inputs() {
        round_trip(b"", b"");
        round_trip(b"", b"fresh content");
        round_trip(b"old content", b"");
        round_trip(b"identical", b"identical");
        round_trip(b"x", b"y");
    }

    #[test]
    fn test_large_binary_with_small_edit() {
        let old: Vec<u8> = (0..256 * 1024u32).map(|i| (i.wrapping_mul(31) % 251) as u8).collect();
        let mut new = old.clone();
        new[1000..1010].copy_from_slice(b"0123456789");
        new.extend_from_slice(b"trailer");

        let patch = diff(&old, &new).unwrap();
        assert!(patch.len() < new.len() / 10);
        assert_eq!(apply(&old, &patch).unwrap(), new);
    }

    #[test]
    fn test_garbage_patch_fails() {
        assert!(apply(b"some base content", b"not a zstd frame").is_err());
    }
}
