//! Release metadata, release chains and the release feed document.

use std::collections::HashSet;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::{FileEntry, SchemaError, Sha512Digest, Target, validate_app_id, validate_channels};

/// File extension of package archives.
pub const PACKAGE_EXTENSION: &str = "upkg";

/// Upstream id of the full package series, e.g. `demoapp_full_win-x64`.
pub fn full_upstream_id(id: &str, rid: &str) -> String {
    format!("{id}_full_{rid}").to_lowercase()
}

/// Upstream id of the delta package series, e.g. `demoapp_delta_win-x64`.
pub fn delta_upstream_id(id: &str, rid: &str) -> String {
    format!("{id}_delta_{rid}").to_lowercase()
}

/// Id of the release feed document for an application.
pub fn feed_id(id: &str) -> String {
    format!("{id}_releases").to_lowercase()
}

/// Filename of a full package archive.
pub fn full_filename(id: &str, rid: &str, version: &Version) -> String {
    format!("{}.{version}.{PACKAGE_EXTENSION}", full_upstream_id(id, rid)).to_lowercase()
}

/// Filename of a delta package archive.
pub fn delta_filename(id: &str, rid: &str, version: &Version) -> String {
    format!("{}.{version}.{PACKAGE_EXTENSION}", delta_upstream_id(id, rid)).to_lowercase()
}

/// Identity shared by the full and delta packages of one release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseHeader {
    /// Application id.
    pub id: String,
    /// Release version.
    pub version: Version,
    /// Ordered, distinct channel names.
    pub channels: Vec<String>,
    /// Target platform.
    pub target: Target,
}

/// Size and digest of a built archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseArtifact {
    /// Archive size in bytes.
    pub size: u64,
    /// Package digest.
    pub digest: Sha512Digest,
}

/// Classification of a release's files relative to its predecessor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseChanges {
    /// Files absent from the predecessor, or excluded from patching.
    #[serde(default)]
    pub new: Vec<FileEntry>,
    /// Files shipped as binary patches.
    #[serde(default)]
    pub modified: Vec<FileEntry>,
    /// Target paths carried over from the predecessor unchanged.
    #[serde(default)]
    pub unmodified: Vec<String>,
    /// Target paths dropped since the predecessor.
    #[serde(default)]
    pub deleted: Vec<String>,
}

impl ReleaseChanges {
    /// True when every list is empty.
    pub fn is_empty(&self) -> bool {
        self.new.is_empty()
            && self.modified.is_empty()
            && self.unmodified.is_empty()
            && self.deleted.is_empty()
    }
}

/// Metadata for one version of one application on one target.
///
/// Values are immutable once built; [`ReleaseMetadata::as_full`] and
/// [`ReleaseMetadata::as_delta`] return new views rather than mutating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    /// Application id.
    pub id: String,
    /// Release version.
    pub version: Version,
    /// Ordered, distinct channel names.
    pub channels: Vec<String>,
    /// Target platform.
    pub target: Target,
    /// First release of this id/target pair.
    pub genesis: bool,
    /// Whether this view describes the full archive (otherwise the delta archive).
    pub full: bool,
    /// Full archive filename.
    pub full_filename: String,
    /// Full archive size in bytes.
    pub full_size: u64,
    /// Full package digest.
    pub full_digest: Sha512Digest,
    /// Delta archive filename, absent on genesis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_filename: Option<String>,
    /// Delta archive size, absent on genesis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_size: Option<u64>,
    /// Delta package digest, absent on genesis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_digest: Option<Sha512Digest>,
    /// Complete manifest of this version.
    #[serde(default)]
    pub files: Vec<FileEntry>,
    /// Changes relative to the previous release.
    #[serde(flatten)]
    pub changes: ReleaseChanges,
}

impl ReleaseMetadata {
    /// Metadata for the first release of an id/target pair.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if the result violates any invariant.
    pub fn genesis(
        header: ReleaseHeader,
        full: ReleaseArtifact,
        files: Vec<FileEntry>,
    ) -> Result<Self, SchemaError> {
        let release = Self {
            full_filename: full_filename(&header.id, &header.target.rid, &header.version),
            id: header.id,
            version: header.version,
            channels: header.channels,
            target: header.target,
            genesis: true,
            full: true,
            full_size: full.size,
            full_digest: full.digest,
            delta_filename: None,
            delta_size: None,
            delta_digest: None,
            files,
            changes: ReleaseChanges::default(),
        };
        release.validate()?;
        Ok(release)
    }

    /// Metadata for a release that has both a full and a delta archive.
    /// The returned view is the delta view.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if the result violates any invariant.
    pub fn delta(
        header: ReleaseHeader,
        full: ReleaseArtifact,
        delta: ReleaseArtifact,
        files: Vec<FileEntry>,
        changes: ReleaseChanges,
    ) -> Result<Self, SchemaError> {
        let release = Self {
            full_filename: full_filename(&header.id, &header.target.rid, &header.version),
            delta_filename: Some(delta_filename(
                &header.id,
                &header.target.rid,
                &header.version,
            )),
            id: header.id,
            version: header.version,
            channels: header.channels,
            target: header.target,
            genesis: false,
            full: false,
            full_size: full.size,
            full_digest: full.digest,
            delta_size: Some(delta.size),
            delta_digest: Some(delta.digest),
            files,
            changes,
        };
        release.validate()?;
        Ok(release)
    }

    /// Does this view describe the full archive?
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Does this view describe the delta archive?
    pub fn is_delta(&self) -> bool {
        !self.full
    }

    /// Has this release a delta archive at all?
    pub fn has_delta(&self) -> bool {
        self.delta_filename.is_some()
    }

    /// Filename of the archive this view describes.
    pub fn filename(&self) -> &str {
        match (&self.delta_filename, self.full) {
            (Some(name), false) => name,
            _ => &self.full_filename,
        }
    }

    /// Digest of the archive this view describes.
    pub fn digest(&self) -> &Sha512Digest {
        match (&self.delta_digest, self.full) {
            (Some(digest), false) => digest,
            _ => &self.full_digest,
        }
    }

    /// Size of the archive this view describes.
    pub fn size(&self) -> u64 {
        match (self.delta_size, self.full) {
            (Some(size), false) => size,
            _ => self.full_size,
        }
    }

    /// Upstream id of the archive this view describes.
    pub fn upstream_id(&self) -> String {
        if self.full {
            full_upstream_id(&self.id, &self.target.rid)
        } else {
            delta_upstream_id(&self.id, &self.target.rid)
        }
    }

    /// Full-archive view of this release.
    ///
    /// With `genesis` set the result is a genesis release: delta artifacts
    /// and the change lists are dropped.
    pub fn as_full(&self, genesis: bool) -> Self {
        let mut release = Self {
            genesis,
            full: true,
            ..self.clone()
        };
        if genesis {
            release.delta_filename = None;
            release.delta_size = None;
            release.delta_digest = None;
            release.changes = ReleaseChanges::default();
        }
        release
    }

    /// Delta-archive view of this release.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidRelease`] for a genesis release or a
    /// release without delta artifacts.
    pub fn as_delta(&self) -> Result<Self, SchemaError> {
        if self.genesis || !self.has_delta() {
            return Err(self.invalid("release has no delta archive"));
        }
        Ok(Self {
            full: false,
            ..self.clone()
        })
    }

    /// Is this release published to `channel`? Channel names compare case-insensitively.
    pub fn supports_channel(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c.eq_ignore_ascii_case(channel))
    }

    /// Is this release built for `target`?
    pub fn is_available_for(&self, target: &Target) -> bool {
        self.target.rid.eq_ignore_ascii_case(&target.rid)
    }

    /// Check every invariant of a release.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), SchemaError> {
        validate_app_id(&self.id)?;
        validate_channels(&self.channels)?;

        if self.full_filename != full_filename(&self.id, &self.target.rid, &self.version) {
            return Err(self.invalid("unexpected full filename"));
        }

        let delta_fields = [
            self.delta_filename.is_some(),
            self.delta_size.is_some(),
            self.delta_digest.is_some(),
        ];
        if delta_fields.iter().any(|f| *f) && !delta_fields.iter().all(|f| *f) {
            return Err(self.invalid("delta filename, size and digest must be set together"));
        }

        if self.genesis {
            if !self.full {
                return Err(self.invalid("genesis release must be full"));
            }
            if self.has_delta() || !self.changes.is_empty() {
                return Err(self.invalid("genesis release cannot carry delta data"));
            }
            return Ok(());
        }

        if !self.full && !self.has_delta() {
            return Err(self.invalid("delta view without a delta archive"));
        }
        let expected_delta = delta_filename(&self.id, &self.target.rid, &self.version);
        if self
            .delta_filename
            .as_ref()
            .is_some_and(|name| *name != expected_delta)
        {
            return Err(self.invalid("unexpected delta filename"));
        }

        self.validate_changes()
    }

    fn validate_changes(&self) -> Result<(), SchemaError> {
        if self.files.is_empty() {
            return Ok(());
        }

        let current: HashSet<&str> = self.files.iter().map(|f| f.target_path.as_str()).collect();
        let mut classified = HashSet::new();
        let present = self
            .changes
            .new
            .iter()
            .chain(&self.changes.modified)
            .map(|f| f.target_path.as_str())
            .chain(self.changes.unmodified.iter().map(String::as_str));

        for path in present {
            if !classified.insert(path) {
                return Err(self.invalid(format!("'{path}' is classified more than once")));
            }
            if !current.contains(path) {
                return Err(self.invalid(format!("'{path}' is not in the release manifest")));
            }
        }
        if classified.len() != current.len() {
            return Err(self.invalid("change lists do not cover the release manifest"));
        }
        if let Some(path) = self
            .changes
            .deleted
            .iter()
            .find(|p| current.contains(p.as_str()))
        {
            return Err(self.invalid(format!("deleted path '{path}' is still in the manifest")));
        }
        Ok(())
    }

    fn invalid(&self, reason: impl Into<String>) -> SchemaError {
        SchemaError::InvalidRelease {
            version: self.version.to_string(),
            reason: reason.into(),
        }
    }
}

/// Ordered releases of one (id, channel, target): a genesis followed by deltas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseChain {
    channel: String,
    releases: Vec<ReleaseMetadata>,
}

impl ReleaseChain {
    /// Sort and validate `releases` into a chain.
    ///
    /// The genesis release is stored in its full view and every later
    /// release in its delta view. An empty list is a valid, empty chain.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidChain`] if the releases do not form a
    /// chain, or a release validation error.
    pub fn new(
        channel: impl Into<String>,
        mut releases: Vec<ReleaseMetadata>,
    ) -> Result<Self, SchemaError> {
        let channel = channel.into();
        releases.sort_by(|a, b| a.version.cmp(&b.version));

        let mut chain = Self {
            channel,
            releases: Vec::with_capacity(releases.len()),
        };
        for release in releases {
            chain.append(release)?;
        }
        Ok(chain)
    }

    /// Append the next release to the chain.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidChain`] when the release does not
    /// extend the chain.
    pub fn append(&mut self, release: ReleaseMetadata) -> Result<(), SchemaError> {
        release.validate()?;

        if !release.supports_channel(&self.channel) {
            return Err(SchemaError::InvalidChain(format!(
                "release {} is not published to channel '{}'",
                release.version, self.channel
            )));
        }

        let Some(newest) = self.releases.last() else {
            if !release.genesis {
                return Err(SchemaError::InvalidChain(format!(
                    "first release {} is not a genesis release",
                    release.version
                )));
            }
            self.releases.push(release.as_full(true));
            return Ok(());
        };

        if release.genesis {
            return Err(SchemaError::InvalidChain(format!(
                "release {} is a second genesis release",
                release.version
            )));
        }
        if !release.id.eq_ignore_ascii_case(&newest.id) || !release.is_available_for(&newest.target)
        {
            return Err(SchemaError::InvalidChain(format!(
                "release {} belongs to {} on {}, expected {} on {}",
                release.version, release.id, release.target, newest.id, newest.target
            )));
        }
        if release.version <= newest.version {
            return Err(SchemaError::InvalidChain(format!(
                "release {} does not follow {}",
                release.version, newest.version
            )));
        }

        self.releases.push(release.as_delta()?);
        Ok(())
    }

    /// Channel this chain was built for.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// All releases, oldest first.
    pub fn releases(&self) -> &[ReleaseMetadata] {
        &self.releases
    }

    /// The genesis release, if the chain is not empty.
    pub fn genesis(&self) -> Option<&ReleaseMetadata> {
        self.releases.first()
    }

    /// Delta releases following the genesis, oldest first.
    pub fn deltas(&self) -> &[ReleaseMetadata] {
        self.releases.get(1..).unwrap_or_default()
    }

    /// Does the chain hold anything besides its genesis?
    pub fn has_deltas(&self) -> bool {
        self.releases.len() > 1
    }

    /// The most recent release.
    pub fn newest(&self) -> Option<&ReleaseMetadata> {
        self.releases.last()
    }

    /// Prefix of the chain ending at `version`, if that version is in the chain.
    pub fn up_to(&self, version: &Version) -> Option<Self> {
        let end = self.releases.iter().position(|r| r.version == *version)?;
        Some(Self {
            channel: self.channel.clone(),
            releases: self.releases[..=end].to_vec(),
        })
    }

    /// Number of releases.
    pub fn len(&self) -> usize {
        self.releases.len()
    }

    /// True for a chain with no releases.
    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }
}

/// JSON document listing every published release of an application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFeed {
    /// Releases in publication order.
    #[serde(default)]
    pub releases: Vec<ReleaseMetadata>,
}

impl ReleaseFeed {
    /// Parse a feed from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Json`] for malformed input.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String, SchemaError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Chain of releases for `id` on `rid` published to `channel`.
    ///
    /// # Errors
    ///
    /// Returns an error if the matching releases do not form a valid chain.
    pub fn chain(&self, id: &str, rid: &str, channel: &str) -> Result<ReleaseChain, SchemaError> {
        let releases = self
            .releases
            .iter()
            .filter(|r| {
                r.id.eq_ignore_ascii_case(id)
                    && r.target.rid.eq_ignore_ascii_case(rid)
                    && r.supports_channel(channel)
            })
            .cloned()
            .collect();
        ReleaseChain::new(channel, releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(version: &str) -> ReleaseHeader {
        ReleaseHeader {
            id: "demoapp".into(),
            version: Version::parse(version).unwrap(),
            channels: vec!["test".into(), "production".into()],
            target: Target::from_rid("win-x64").unwrap(),
        }
    }

    fn artifact(seed: &[u8]) -> ReleaseArtifact {
        ReleaseArtifact {
            size: seed.len() as u64,
            digest: Sha512Digest::compute(seed),
        }
    }

    fn genesis() -> ReleaseMetadata {
        ReleaseMetadata::genesis(
            header("1.0.0"),
            artifact(b"full-1"),
            vec![FileEntry::from_content("lib/win-x64/a.dll", b"a")],
        )
        .unwrap()
    }

    fn delta(version: &str) -> ReleaseMetadata {
        let a = FileEntry::from_content("lib/win-x64/a.dll", b"a2");
        ReleaseMetadata::delta(
            header(version),
            artifact(version.as_bytes()),
            artifact(b"delta"),
            vec![a.clone()],
            ReleaseChanges {
                modified: vec![a.with_delta(b"patch")],
                ..ReleaseChanges::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn naming() {
        let release = delta("1.1.0-Beta");
        assert_eq!(release.full_filename, "demoapp_full_win-x64.1.1.0-beta.upkg");
        assert_eq!(release.filename(), "demoapp_delta_win-x64.1.1.0-beta.upkg");
        assert_eq!(release.upstream_id(), "demoapp_delta_win-x64");
        assert_eq!(feed_id("DemoApp"), "demoapp_releases");
    }

    #[test]
    fn views_are_pure() {
        let release = delta("1.1.0");
        let full = release.as_full(false);
        assert!(full.is_full());
        assert!(release.is_delta());
        assert_eq!(full.filename(), release.full_filename);
        assert_eq!(full.digest(), &release.full_digest);
        assert_eq!(full.as_delta().unwrap(), release);

        let as_genesis = release.as_full(true);
        assert!(as_genesis.validate().is_ok());
        assert!(as_genesis.as_delta().is_err());
    }

    #[test]
    fn genesis_rejects_delta_data() {
        let mut release = genesis();
        release.full = false;
        assert!(release.validate().is_err());
    }

    #[test]
    fn overlapping_changes_rejected() {
        let a = FileEntry::from_content("lib/win-x64/a.dll", b"a");
        let err = ReleaseMetadata::delta(
            header("1.1.0"),
            artifact(b"f"),
            artifact(b"d"),
            vec![a.clone()],
            ReleaseChanges {
                new: vec![a.clone()],
                unmodified: vec![a.target_path.clone()],
                ..ReleaseChanges::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidRelease { .. }));
    }

    #[test]
    fn channel_support() {
        let release = genesis();
        assert!(release.supports_channel("Production"));
        assert!(!release.supports_channel("staging"));
        assert!(release.is_available_for(&Target::from_rid("WIN-X64").unwrap()));
    }

    #[test]
    fn chain_orders_and_validates() {
        let chain =
            ReleaseChain::new("test", vec![delta("1.2.0"), genesis(), delta("1.1.0")]).unwrap();
        assert_eq!(chain.len(), 3);
        assert!(chain.genesis().unwrap().genesis);
        assert_eq!(chain.deltas().len(), 2);
        assert!(chain.deltas().iter().all(ReleaseMetadata::is_delta));
        assert_eq!(chain.newest().unwrap().version, Version::new(1, 2, 0));

        let prefix = chain.up_to(&Version::new(1, 1, 0)).unwrap();
        assert_eq!(prefix.len(), 2);
        assert!(chain.up_to(&Version::new(9, 0, 0)).is_none());
    }

    #[test]
    fn chain_errors() {
        assert!(ReleaseChain::new("test", vec![delta("1.1.0")]).is_err());
        assert!(ReleaseChain::new("test", vec![genesis(), genesis()]).is_err());
        assert!(ReleaseChain::new("test", vec![genesis(), delta("1.1.0"), delta("1.1.0")]).is_err());
        assert!(ReleaseChain::new("staging", vec![genesis()]).is_err());

        let empty = ReleaseChain::new("test", Vec::new()).unwrap();
        assert!(empty.is_empty());
        assert!(empty.genesis().is_none());
        assert!(!empty.has_deltas());
    }

    #[test]
    fn feed_round_trip_and_chain() {
        let feed = ReleaseFeed {
            releases: vec![genesis(), delta("1.1.0")],
        };
        let parsed = ReleaseFeed::from_json(&feed.to_json().unwrap()).unwrap();
        assert_eq!(parsed, feed);

        let chain = parsed.chain("DemoApp", "win-x64", "test").unwrap();
        assert_eq!(chain.len(), 2);
        assert!(parsed.chain("demoapp", "linux-x64", "test").unwrap().is_empty());
    }
}
