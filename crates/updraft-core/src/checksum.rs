//! Checksum provider: content digests and whole-package digests.

use std::io::Read;

use sha2::{Digest, Sha512};
use updraft_schema::Sha512Digest;

use crate::package::Package;

/// Digest of an in-memory buffer.
pub fn digest(data: &[u8]) -> Sha512Digest {
    Sha512Digest::compute(data)
}

/// Digest of a stream. Read errors propagate.
pub fn digest_reader<R: Read>(reader: R) -> std::io::Result<Sha512Digest> {
    Sha512Digest::compute_reader(reader)
}

/// Digest of a whole package.
///
/// Covers id, version, runtime identifier and kind, then one
/// `<target path>\t<content digest>\n` line per entry in package order.
/// The container bytes and the package's own recorded digest and size are
/// not inputs, so re-encoding or reassembling a package keeps its digest.
pub fn package_digest(package: &Package) -> Sha512Digest {
    let meta = &package.metadata;
    let mut hasher = Sha512::new();
    hasher.update(meta.id.to_lowercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(meta.version.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(meta.target.rid.to_lowercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(meta.kind.as_str().as_bytes());
    hasher.update(b"\n");

    for entry in &package.entries {
        hasher.update(entry.target_path.as_bytes());
        hasher.update(b"\t");
        hasher.update(entry.digest().as_str().as_bytes());
        hasher.update(b"\n");
    }

    Sha512Digest::from_hasher(hasher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{PackageEntry, PackageKind, PackageMetadata};
    use updraft_schema::Target;

    fn package(entries: Vec<PackageEntry>) -> Package {
        Package {
            metadata: PackageMetadata {
                id: "demoapp".into(),
                version: semver::Version::new(1, 0, 0),
                target: Target::from_rid("win-x64").unwrap(),
                channels: vec!["test".into()],
                kind: PackageKind::Full,
                genesis: true,
                delta: None,
            },
            entries,
        }
    }

    #[test]
    fn stable_for_identical_input() {
        let a = package(vec![PackageEntry::new("lib/win-x64/a", "a")]);
        let b = package(vec![PackageEntry::new("lib/win-x64/a", "a")]);
        assert_eq!(package_digest(&a), package_digest(&b));
    }

    #[test]
    fn order_sensitive() {
        let a = package(vec![
            PackageEntry::new("lib/win-x64/a", "a"),
            PackageEntry::new("lib/win-x64/b", "b"),
        ]);
        let b = package(vec![
            PackageEntry::new("lib/win-x64/b", "b"),
            PackageEntry::new("lib/win-x64/a", "a"),
        ]);
        assert_ne!(package_digest(&a), package_digest(&b));
    }

    #[test]
    fn kind_and_channels() {
        let full = package(vec![PackageEntry::new("lib/win-x64/a", "a")]);

        let mut delta = full.clone();
        delta.metadata.kind = PackageKind::Delta;
        assert_ne!(package_digest(&full), package_digest(&delta));

        let mut other_channels = full.clone();
        other_channels.metadata.channels.push("production".into());
        assert_eq!(package_digest(&full), package_digest(&other_channels));
    }

    #[test]
    fn reader_errors_propagate() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk gone"))
            }
        }
        assert!(digest_reader(Failing).is_err());
    }
}
