//! Package reassembler.
//!
//! Rebuilds full packages by applying delta packages to a base full package,
//! verifying every reconstructed entry and every resulting package against
//! its recorded digest.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use semver::Version;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use updraft_schema::{ReleaseChain, ReleaseMetadata, Sha512Digest};

use crate::io::container::{Container, ContainerError};
use crate::io::patch::{self, PatchError};
use crate::manifest::ManifestError;
use crate::package::{Package, PackageEntry, PackageKind, PackageMetadata, canonical_order};
use crate::progress::ProgressSink;

#[derive(Error, Debug)]
pub enum ReassembleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Container(#[from] ContainerError),

    #[error("Checksum manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Failed to apply patch for '{path}': {source}")]
    Patch {
        path: String,
        #[source]
        source: PatchError,
    },

    #[error("Checksum mismatch for '{path}': expected {expected}, got {actual}")]
    EntryMismatch {
        path: String,
        expected: Sha512Digest,
        actual: Sha512Digest,
    },

    #[error("Package {filename} failed verification: expected {expected}, got {actual}")]
    PackageMismatch {
        filename: String,
        expected: Sha512Digest,
        actual: Sha512Digest,
    },

    #[error("'{path}' is missing from {package}")]
    MissingEntry { path: String, package: String },

    #[error("Delta package {version} carries no change lists")]
    MissingChanges { version: Version },

    #[error("Cannot apply {delta} on top of {base}")]
    Incompatible { base: String, delta: String },

    #[error("Required package {} is missing", .0.display())]
    MissingPackage(PathBuf),

    #[error("No verified full package available to rebuild {0}")]
    NoBaseFull(Version),

    #[error("Version {0} is not part of the release chain")]
    NotInChain(Version),

    #[error("Reassembly cancelled")]
    Cancelled,
}

impl ReassembleError {
    /// A required input is absent; the request cannot be satisfied at all.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::MissingPackage(_) | Self::NoBaseFull(_) | Self::NotInChain(_)
        )
    }

    /// Content failed digest verification.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::EntryMismatch { .. }
                | Self::PackageMismatch { .. }
                | Self::Patch { .. }
                | Self::MissingEntry { .. }
                | Self::Manifest(_)
                | Self::Container(_)
        )
    }
}

fn describe(meta: &PackageMetadata) -> String {
    format!("{} {} {} ({})", meta.id, meta.version, meta.target, meta.kind)
}

/// Apply one delta package to the full package it was built against.
///
/// Every reconstructed entry is checked against the delta's checksum
/// manifest; any mismatch aborts with no output.
pub fn reassemble_full(
    delta: &Package,
    base: &Package,
    sink: &dyn ProgressSink,
) -> Result<Package, ReassembleError> {
    let (base_meta, delta_meta) = (&base.metadata, &delta.metadata);
    if base_meta.kind != PackageKind::Full
        || delta_meta.kind != PackageKind::Delta
        || !base_meta.id.eq_ignore_ascii_case(&delta_meta.id)
        || !base_meta.target.rid.eq_ignore_ascii_case(&delta_meta.target.rid)
        || delta_meta.version <= base_meta.version
    {
        return Err(ReassembleError::Incompatible {
            base: describe(base_meta),
            delta: describe(delta_meta),
        });
    }

    let changes = delta_meta
        .delta
        .as_ref()
        .ok_or_else(|| ReassembleError::MissingChanges {
            version: delta_meta.version.clone(),
        })?;
    let new: HashSet<&str> = changes.new.iter().map(String::as_str).collect();
    let modified: HashSet<&str> = changes.modified.iter().map(String::as_str).collect();

    let manifest = delta.checksum_manifest()?;
    let total = manifest.len() as u64;
    let missing = |path: &str, package: &Package| ReassembleError::MissingEntry {
        path: path.to_string(),
        package: describe(&package.metadata),
    };

    let mut entries = Vec::with_capacity(manifest.len() + 1);
    for (index, line) in manifest.lines().iter().enumerate() {
        let path = line.target_path.as_str();
        let content = if modified.contains(path) {
            let old = base.entry(path).ok_or_else(|| missing(path, base))?;
            let patch_entry = delta.entry(path).ok_or_else(|| missing(path, delta))?;
            let rebuilt = patch::apply(&old.content, &patch_entry.content).map_err(|source| {
                ReassembleError::Patch {
                    path: path.to_string(),
                    source,
                }
            })?;
            Bytes::from(rebuilt)
        } else if new.contains(path) {
            delta.entry(path).ok_or_else(|| missing(path, delta))?.content.clone()
        } else {
            base.entry(path).ok_or_else(|| missing(path, base))?.content.clone()
        };

        let actual = Sha512Digest::compute(&content);
        if actual != line.digest {
            return Err(ReassembleError::EntryMismatch {
                path: path.to_string(),
                expected: line.digest.clone(),
                actual,
            });
        }
        entries.push(PackageEntry::new(path, content));
        sink.report(index as u64 + 1, total);
    }

    let layout = delta.layout();
    let manifest_path = layout.checksum_manifest_path();
    entries.push(
        delta
            .entry(&manifest_path)
            .ok_or_else(|| missing(&manifest_path, delta))?
            .clone(),
    );
    canonical_order(&mut entries, &layout);

    sink.report(total, total);
    Ok(Package {
        metadata: PackageMetadata {
            kind: PackageKind::Full,
            genesis: false,
            delta: None,
            ..delta_meta.clone()
        },
        entries,
    })
}

/// Maps one step's `(completed, total)` onto the whole chain's progress.
struct StepSink<'a> {
    inner: &'a dyn ProgressSink,
    offset: u64,
    total: u64,
}

impl ProgressSink for StepSink<'_> {
    fn report(&self, completed: u64, _: u64) {
        self.inner.report(self.offset + completed, self.total);
    }
}

/// Rebuilds full packages from a local package directory.
pub struct Reassembler {
    container: Arc<dyn Container>,
}

impl std::fmt::Debug for Reassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reassembler").finish_non_exhaustive()
    }
}

impl Reassembler {
    pub fn new(container: Arc<dyn Container>) -> Self {
        Self { container }
    }

    /// Read `path` and check its package digest.
    fn load_verified(
        &self,
        path: &Path,
        filename: &str,
        expected: &Sha512Digest,
    ) -> Result<Package, ReassembleError> {
        let bytes = std::fs::read(path)?;
        let package = self.container.read(&bytes)?;
        let actual = package.digest();
        if actual != *expected {
            return Err(ReassembleError::PackageMismatch {
                filename: filename.to_string(),
                expected: expected.clone(),
                actual,
            });
        }
        Ok(package)
    }

    /// Newest release whose full package is present and verifies.
    fn nearest_full(
        &self,
        packages_dir: &Path,
        releases: &[ReleaseMetadata],
    ) -> Option<(usize, Package)> {
        for (index, release) in releases.iter().enumerate().rev() {
            let path = packages_dir.join(&release.full_filename);
            if !path.exists() {
                continue;
            }
            match self.load_verified(&path, &release.full_filename, &release.full_digest) {
                Ok(package) => return Some((index, package)),
                Err(e) => {
                    tracing::warn!("Ignoring full package {}: {e}", release.full_filename);
                }
            }
        }
        None
    }

    /// Rebuild the full package of `target` by replaying deltas from the
    /// nearest verified full package in `packages_dir`.
    pub fn rebuild_chain(
        &self,
        packages_dir: &Path,
        chain: &ReleaseChain,
        target: &Version,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Package, ReassembleError> {
        let chain = chain
            .up_to(target)
            .ok_or_else(|| ReassembleError::NotInChain(target.clone()))?;
        let releases = chain.releases();

        let (base_index, mut current) = self
            .nearest_full(packages_dir, releases)
            .ok_or_else(|| ReassembleError::NoBaseFull(target.clone()))?;

        let steps = &releases[base_index + 1..];
        if steps.is_empty() {
            tracing::debug!("Full package for {target} already present");
            sink.report(1, 1);
            return Ok(current);
        }

        let mut paths = Vec::with_capacity(steps.len());
        for release in steps {
            let path = packages_dir.join(release.filename());
            if !path.exists() {
                return Err(ReassembleError::MissingPackage(path));
            }
            paths.push(path);
        }

        let total: u64 = steps.iter().map(|r| r.files.len() as u64).sum();
        let mut offset = 0;

        for (release, path) in steps.iter().zip(&paths) {
            if cancel.is_cancelled() {
                return Err(ReassembleError::Cancelled);
            }

            tracing::debug!(
                "Applying {} to {} {}",
                release.filename(),
                current.metadata.id,
                current.metadata.version
            );
            let delta = self.load_verified(path, release.filename(), release.digest())?;
            let step = StepSink {
                inner: sink,
                offset,
                total,
            };
            current = reassemble_full(&delta, &current, &step)?;

            let actual = current.digest();
            if actual != release.full_digest {
                return Err(ReassembleError::PackageMismatch {
                    filename: release.full_filename.clone(),
                    expected: release.full_digest.clone(),
                    actual,
                });
            }
            offset += release.files.len() as u64;
        }

        sink.report(total, total);
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::tests::request;
    use crate::builder::{BuiltDelta, BuiltPackage, PackageBuilder};
    use crate::io::container::ZipContainer;
    use std::sync::Mutex;

    struct Fixture {
        v1: BuiltPackage,
        v2: BuiltPackage,
        v3: BuiltPackage,
        d2: BuiltDelta,
        d3: BuiltDelta,
    }

    fn fixture() -> Fixture {
        let builder = PackageBuilder::default();
        let big = "0123456789".repeat(500);
        let v1 = builder
            .build_full(&request("1.0.0", true, &[("A.dll", "a"), ("B.dll", big.as_str())]))
            .unwrap();
        let big2 = format!("{big}!");
        let v2 = builder
            .build_full(&request(
                "1.1.0",
                false,
                &[("A.dll", "a"), ("B.dll", big2.as_str()), ("C.dll", "c")],
            ))
            .unwrap();
        let v3 = builder
            .build_full(&request("1.2.0", false, &[("B.dll", big2.as_str()), ("D.dll", "d")]))
            .unwrap();
        let d2 = builder.build_delta(&v1.package, &v2).unwrap();
        let d3 = builder.build_delta(&v2.package, &v3).unwrap();
        Fixture { v1, v2, v3, d2, d3 }
    }

    fn chain(f: &Fixture) -> ReleaseChain {
        ReleaseChain::new(
            "test",
            vec![
                f.v1.genesis_release().unwrap(),
                f.d2.release.clone(),
                f.d3.release.clone(),
            ],
        )
        .unwrap()
    }

    fn write(dir: &Path, filename: &str, bytes: &[u8]) {
        std::fs::write(dir.join(filename), bytes).unwrap();
    }

    fn reassembler() -> Reassembler {
        Reassembler::new(Arc::new(ZipContainer))
    }

    #[test]
    fn single_step_matches_built_full() {
        let f = fixture();
        let reports = Mutex::new(Vec::new());
        let sink = |c: u64, t: u64| reports.lock().unwrap().push((c, t));

        let rebuilt = reassemble_full(&f.d2.package, &f.v1.package, &sink).unwrap();
        assert_eq!(rebuilt, f.v2.package);
        assert_eq!(rebuilt.digest(), f.v2.artifact.digest);

        let reports = reports.into_inner().unwrap();
        assert!(reports.windows(2).all(|w| w[0].0 <= w[1].0));
        let (c, t) = *reports.last().unwrap();
        assert_eq!(c, t);
    }

    #[test]
    fn corrupted_patch_is_fatal() {
        let f = fixture();
        let mut delta = f.d2.package.clone();
        let index = delta
            .entries
            .iter()
            .position(|e| e.target_path == "lib/win-x64/B.dll")
            .unwrap();
        let patch = patch::diff(b"something else entirely", b"other").unwrap();
        delta.entries[index].content = patch.into();

        let err = reassemble_full(&delta, &f.v1.package, &crate::progress::NullSink).unwrap_err();
        assert!(err.is_integrity(), "{err}");
    }

    #[test]
    fn wrong_base_rejected() {
        let f = fixture();
        assert!(matches!(
            reassemble_full(&f.d3.package, &f.v3.package, &crate::progress::NullSink),
            Err(ReassembleError::Incompatible { .. })
        ));
        assert!(reassemble_full(&f.d3.package, &f.v1.package, &crate::progress::NullSink)
            .unwrap_err()
            .is_integrity());
    }

    #[test]
    fn rebuilds_from_genesis() {
        let f = fixture();
        let dir = tempfile::tempdir().unwrap();
        let chain = chain(&f);
        write(dir.path(), &chain.releases()[0].full_filename, &f.v1.bytes);
        write(dir.path(), chain.releases()[1].filename(), &f.d2.bytes);
        write(dir.path(), chain.releases()[2].filename(), &f.d3.bytes);

        let reports = Mutex::new(Vec::new());
        let sink = |c: u64, t: u64| reports.lock().unwrap().push((c, t));
        let rebuilt = reassembler()
            .rebuild_chain(
                dir.path(),
                &chain,
                &Version::new(1, 2, 0),
                &sink,
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(rebuilt.digest(), f.v3.artifact.digest);

        let reports = reports.into_inner().unwrap();
        let total = (f.v2.files.len() + f.v3.files.len()) as u64;
        assert_eq!(reports.last(), Some(&(total, total)));
        assert!(reports.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn prefers_nearest_full() {
        let f = fixture();
        let dir = tempfile::tempdir().unwrap();
        let chain = chain(&f);
        // Only v2 full and the v3 delta present.
        write(dir.path(), &chain.releases()[1].full_filename, &f.v2.bytes);
        write(dir.path(), chain.releases()[2].filename(), &f.d3.bytes);

        let rebuilt = reassembler()
            .rebuild_chain(
                dir.path(),
                &chain,
                &Version::new(1, 2, 0),
                &crate::progress::NullSink,
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(rebuilt, f.v3.package);
    }

    #[test]
    fn target_already_full_is_returned_unchanged() {
        let f = fixture();
        let dir = tempfile::tempdir().unwrap();
        let chain = chain(&f);
        write(dir.path(), &chain.releases()[0].full_filename, &f.v1.bytes);

        let genesis_only = ReleaseChain::new("test", vec![f.v1.genesis_release().unwrap()]).unwrap();
        let rebuilt = reassembler()
            .rebuild_chain(
                dir.path(),
                &genesis_only,
                &Version::new(1, 0, 0),
                &crate::progress::NullSink,
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(rebuilt.digest(), f.v1.artifact.digest);
    }

    #[test]
    fn missing_delta_is_structural() {
        let f = fixture();
        let dir = tempfile::tempdir().unwrap();
        let chain = chain(&f);
        write(dir.path(), &chain.releases()[0].full_filename, &f.v1.bytes);
        write(dir.path(), chain.releases()[2].filename(), &f.d3.bytes);

        let err = reassembler()
            .rebuild_chain(
                dir.path(),
                &chain,
                &Version::new(1, 2, 0),
                &crate::progress::NullSink,
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, ReassembleError::MissingPackage(_)));
        assert!(err.is_structural());
    }

    #[test]
    fn no_base_and_unknown_version() {
        let f = fixture();
        let dir = tempfile::tempdir().unwrap();
        let chain = chain(&f);
        let r = reassembler();
        let cancel = CancellationToken::new();

        let err = r
            .rebuild_chain(dir.path(), &chain, &Version::new(1, 2, 0), &crate::progress::NullSink, &cancel)
            .unwrap_err();
        assert!(matches!(err, ReassembleError::NoBaseFull(_)));

        let err = r
            .rebuild_chain(dir.path(), &chain, &Version::new(9, 9, 9), &crate::progress::NullSink, &cancel)
            .unwrap_err();
        assert!(matches!(err, ReassembleError::NotInChain(_)));
    }

    #[test]
    fn corrupt_delta_on_disk_is_integrity_error() {
        let f = fixture();
        let dir = tempfile::tempdir().unwrap();
        let chain = chain(&f);
        write(dir.path(), &chain.releases()[0].full_filename, &f.v1.bytes);
        // v3's delta stored under v2's delta filename.
        write(dir.path(), chain.releases()[1].filename(), &f.d3.bytes);

        let err = reassembler()
            .rebuild_chain(
                dir.path(),
                &chain,
                &Version::new(1, 1, 0),
                &crate::progress::NullSink,
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, ReassembleError::PackageMismatch { .. }));
        assert!(err.is_integrity());
    }

    #[test]
    fn cancellation_observed() {
        let f = fixture();
        let dir = tempfile::tempdir().unwrap();
        let chain = chain(&f);
        write(dir.path(), &chain.releases()[0].full_filename, &f.v1.bytes);
        write(dir.path(), chain.releases()[1].filename(), &f.d2.bytes);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = reassembler()
            .rebuild_chain(dir.path(), &chain, &Version::new(1, 1, 0), &crate::progress::NullSink, &cancel)
            .unwrap_err();
        assert!(matches!(err, ReassembleError::Cancelled));
    }
}
