//! In-memory package model.
//!
//! A package is an ordered list of (target path, content) entries plus
//! package-level metadata. Container formats are handled in
//! [`crate::io::container`]; everything else works on this model.

use bytes::Bytes;
use semver::Version;
use serde::{Deserialize, Serialize};
use updraft_schema::{FileEntry, Layout, Sha512Digest, Target};

use crate::checksum;
use crate::manifest::{ChecksumManifest, ManifestError};

/// Full or delta archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    /// Self-contained archive holding every current file.
    Full,
    /// Archive holding only changes relative to the previous full release.
    Delta,
}

impl PackageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageKind::Full => "full",
            PackageKind::Delta => "delta",
        }
    }
}

impl std::fmt::Display for PackageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Target-path lists describing a delta package. Content does not travel here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaPaths {
    pub new: Vec<String>,
    pub modified: Vec<String>,
    pub unmodified: Vec<String>,
    pub deleted: Vec<String>,
}

/// Package-level metadata, stored as the final container entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub id: String,
    pub version: Version,
    pub target: Target,
    pub channels: Vec<String>,
    pub kind: PackageKind,
    pub genesis: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<DeltaPaths>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    pub target_path: String,
    pub content: Bytes,
}

impl PackageEntry {
    pub fn new(target_path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            target_path: target_path.into(),
            content: content.into(),
        }
    }

    pub fn digest(&self) -> Sha512Digest {
        checksum::digest(&self.content)
    }

    pub fn file_entry(&self) -> FileEntry {
        FileEntry::from_content(self.target_path.clone(), &self.content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub metadata: PackageMetadata,
    pub entries: Vec<PackageEntry>,
}

impl Package {
    pub fn layout(&self) -> Layout {
        Layout::new(&self.metadata.target)
    }

    pub fn is_full(&self) -> bool {
        self.metadata.kind == PackageKind::Full
    }

    pub fn entry(&self, target_path: &str) -> Option<&PackageEntry> {
        self.entries.iter().find(|e| e.target_path == target_path)
    }

    /// Content-based package digest, see [`checksum::package_digest`].
    pub fn digest(&self) -> Sha512Digest {
        checksum::package_digest(self)
    }

    /// Parse the embedded checksum manifest.
    pub fn checksum_manifest(&self) -> Result<ChecksumManifest, ManifestError> {
        let path = self.layout().checksum_manifest_path();
        let entry = self
            .entry(&path)
            .ok_or(ManifestError::Missing { path })?;
        ChecksumManifest::parse(&entry.content)
    }

    /// Entries other than the checksum manifest and engine-private files.
    pub fn app_entries(&self) -> impl Iterator<Item = &PackageEntry> {
        let layout = self.layout();
        self.entries
            .iter()
            .filter(move |e| !layout.is_private(&e.target_path))
    }
}

/// Sort entries into canonical package order: engine-private entries first,
/// then app entries, each group ordered by target path.
pub fn canonical_order(entries: &mut [PackageEntry], layout: &Layout) {
    entries.sort_by(|a, b| {
        let a_key = (!layout.is_private(&a.target_path), a.target_path.as_str());
        let b_key = (!layout.is_private(&b.target_path), b.target_path.as_str());
        a_key.cmp(&b_key)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_puts_private_first() {
        let target = Target::from_rid("win-x64").unwrap();
        let layout = Layout::new(&target);
        let mut entries = vec![
            PackageEntry::new("lib/win-x64/b.dll", "b"),
            PackageEntry::new(layout.descriptor_path(), "{}"),
            PackageEntry::new("lib/win-x64/a.dll", "a"),
            PackageEntry::new(layout.checksum_manifest_path(), ""),
        ];
        canonical_order(&mut entries, &layout);

        let paths: Vec<_> = entries.iter().map(|e| e.target_path.as_str()).collect();
        assert!(layout.is_private(paths[0]));
        assert!(layout.is_private(paths[1]));
        assert_eq!(&paths[2..], ["lib/win-x64/a.dll", "lib/win-x64/b.dll"]);
    }
}
