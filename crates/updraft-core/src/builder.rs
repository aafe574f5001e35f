//! Package builder: full and delta archives.
//!
//! A full package holds every file of a release plus the engine-private
//! files (loader, engine library, app descriptor, checksum manifest). A
//! delta package holds only what changed since the previous full package:
//! new content verbatim, modified content as binary patches, and the new
//! checksum manifest.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use updraft_schema::{
    APP_DESCRIPTOR_FILENAME, AppDescriptor, CHECKSUM_MANIFEST_FILENAME, FileEntry, Layout,
    ReleaseArtifact, ReleaseChanges, ReleaseHeader, ReleaseMetadata, SchemaError,
    normalize_relative_path,
};

use crate::diff::{self, DeltaSummary, DiffError, PatchPolicy};
use crate::io::container::{Container, ContainerError, METADATA_ENTRY, ZipContainer};
use crate::io::patch::{self, PatchError};
use crate::manifest::{ChecksumManifest, ManifestError};
use crate::package::{Package, PackageEntry, PackageKind, PackageMetadata, canonical_order};

#[derive(Error, Debug)]
pub enum PackError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("cannot build a delta between different applications: {previous} -> {current}")]
    CrossId { previous: String, current: String },

    #[error("cannot build a delta between targets {previous} and {current}")]
    TargetMismatch { previous: String, current: String },

    #[error("package {version} is not a full package")]
    NotFull { version: String },

    #[error("version {current} does not follow {previous}")]
    VersionNotNewer { previous: String, current: String },

    #[error("current package has an empty checksum manifest")]
    EmptyManifest,

    #[error("duplicate target path '{0}'")]
    DuplicatePath(String),

    #[error("'{0}' lies inside the engine-private root")]
    ReservedPath(String),

    #[error("checksum manifest does not match content at '{path}'")]
    ManifestMismatch { path: String },
}

/// A user file to package, relative to the application directory.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub relative_path: String,
    pub content: Bytes,
}

impl SourceFile {
    pub fn new(relative_path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            relative_path: relative_path.into(),
            content: content.into(),
        }
    }
}

/// Engine-owned binaries shipped in the private root of every package.
#[derive(Debug, Clone)]
pub struct EngineAssets {
    pub loader_filename: String,
    pub loader: Bytes,
    pub library_filename: String,
    pub library: Bytes,
}

impl EngineAssets {
    /// Filenames the engine owns; user files with these names are dropped.
    fn owned_filenames(&self) -> [&str; 4] {
        [
            self.loader_filename.as_str(),
            self.library_filename.as_str(),
            APP_DESCRIPTOR_FILENAME,
            CHECKSUM_MANIFEST_FILENAME,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub descriptor: AppDescriptor,
    pub genesis: bool,
    pub files: Vec<SourceFile>,
    pub engine: EngineAssets,
}

/// A full package together with its encoded bytes.
#[derive(Debug, Clone)]
pub struct BuiltPackage {
    pub package: Package,
    pub bytes: Bytes,
    pub artifact: ReleaseArtifact,
    /// Checksum manifest as file entries.
    pub files: Vec<FileEntry>,
}

impl BuiltPackage {
    /// Wrap an already encoded full package.
    pub fn from_bytes(container: &dyn Container, bytes: Bytes) -> Result<Self, PackError> {
        let package = container.read(&bytes)?;
        Self::from_parts(package, bytes)
    }

    fn from_parts(package: Package, bytes: Bytes) -> Result<Self, PackError> {
        if !package.is_full() {
            return Err(PackError::NotFull {
                version: package.metadata.version.to_string(),
            });
        }
        let manifest = verified_manifest(&package)?;
        let files = manifest.file_entries(|path| {
            package
                .entry(path)
                .map(|e| e.content.len() as u64)
        });
        let artifact = ReleaseArtifact {
            size: bytes.len() as u64,
            digest: package.digest(),
        };
        Ok(Self {
            package,
            bytes,
            artifact,
            files,
        })
    }

    pub fn header(&self) -> ReleaseHeader {
        header(&self.package.metadata)
    }

    /// Release metadata for a genesis package.
    pub fn genesis_release(&self) -> Result<ReleaseMetadata, PackError> {
        Ok(ReleaseMetadata::genesis(
            self.header(),
            self.artifact.clone(),
            self.files.clone(),
        )?)
    }
}

/// A delta package together with the release it completes.
#[derive(Debug, Clone)]
pub struct BuiltDelta {
    pub package: Package,
    pub bytes: Bytes,
    pub summary: DeltaSummary,
    pub release: ReleaseMetadata,
}

fn header(metadata: &PackageMetadata) -> ReleaseHeader {
    ReleaseHeader {
        id: metadata.id.clone(),
        version: metadata.version.clone(),
        channels: metadata.channels.clone(),
        target: metadata.target.clone(),
    }
}

/// Parse a package's checksum manifest and check it against the content.
fn verified_manifest(package: &Package) -> Result<ChecksumManifest, PackError> {
    let manifest = package.checksum_manifest()?;
    for line in manifest.lines() {
        let entry = package
            .entry(&line.target_path)
            .ok_or_else(|| PackError::ManifestMismatch {
                path: line.target_path.clone(),
            })?;
        if entry.digest() != line.digest {
            return Err(PackError::ManifestMismatch {
                path: line.target_path.clone(),
            });
        }
    }
    if manifest.len() + 1 != package.entries.len() {
        let listed: HashSet<&str> = manifest
            .lines()
            .iter()
            .map(|l| l.target_path.as_str())
            .collect();
        let manifest_path = package.layout().checksum_manifest_path();
        let unlisted = package
            .entries
            .iter()
            .find(|e| e.target_path != manifest_path && !listed.contains(e.target_path.as_str()))
            .map_or(manifest_path.clone(), |e| e.target_path.clone());
        return Err(PackError::ManifestMismatch { path: unlisted });
    }
    Ok(manifest)
}

pub struct PackageBuilder {
    container: Arc<dyn Container>,
    exclusions: Vec<String>,
}

impl Default for PackageBuilder {
    fn default() -> Self {
        Self::new(Arc::new(ZipContainer))
    }
}

impl std::fmt::Debug for PackageBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageBuilder")
            .field("exclusions", &self.exclusions)
            .finish_non_exhaustive()
    }
}

impl PackageBuilder {
    pub fn new(container: Arc<dyn Container>) -> Self {
        Self {
            container,
            exclusions: Vec::new(),
        }
    }

    /// Never patch target paths matching `pattern`; ship them whole instead.
    pub fn with_patch_exclusion(mut self, pattern: impl Into<String>) -> Self {
        self.exclusions.push(pattern.into());
        self
    }

    pub fn container(&self) -> &Arc<dyn Container> {
        &self.container
    }

    fn policy(&self, layout: Layout) -> Result<PatchPolicy, PackError> {
        let mut policy = PatchPolicy::new(layout);
        for pattern in &self.exclusions {
            policy = policy.exclude(pattern)?;
        }
        Ok(policy)
    }

    /// Build a full package.
    pub fn build_full(&self, request: &BuildRequest) -> Result<BuiltPackage, PackError> {
        let descriptor = &request.descriptor;
        descriptor.validate()?;

        let layout = Layout::new(&descriptor.target);
        let owned = request.engine.owned_filenames();

        let mut entries = vec![
            PackageEntry::new(
                layout.private_path(&request.engine.loader_filename)?,
                request.engine.loader.clone(),
            ),
            PackageEntry::new(
                layout.private_path(&request.engine.library_filename)?,
                request.engine.library.clone(),
            ),
            PackageEntry::new(
                layout.descriptor_path(),
                descriptor.sanitized().to_json()?.into_bytes(),
            ),
        ];

        let mut seen = HashSet::new();
        for file in &request.files {
            let relative = normalize_relative_path(&file.relative_path)?;
            if owned.iter().any(|name| relative.eq_ignore_ascii_case(name)) {
                tracing::debug!("Stripping engine-owned file from app root: {relative}");
                continue;
            }
            let target_path = layout.app_path(&relative)?;
            if layout.is_private(&target_path) {
                return Err(PackError::ReservedPath(relative));
            }
            if !seen.insert(target_path.clone()) {
                return Err(PackError::DuplicatePath(target_path));
            }
            entries.push(PackageEntry::new(target_path, file.content.clone()));
        }

        canonical_order(&mut entries, &layout);
        let manifest_path = layout.checksum_manifest_path();
        let manifest = ChecksumManifest::from_entries(&entries, &manifest_path);
        entries.push(PackageEntry::new(manifest_path, manifest.render().into_bytes()));
        canonical_order(&mut entries, &layout);

        let package = Package {
            metadata: PackageMetadata {
                id: descriptor.id.clone(),
                version: descriptor.version.clone(),
                target: descriptor.target.clone(),
                channels: descriptor.channel_names(),
                kind: PackageKind::Full,
                genesis: request.genesis,
                delta: None,
            },
            entries,
        };

        let bytes = Bytes::from(self.container.write(&package)?);
        let built = BuiltPackage::from_parts(package, bytes)?;

        tracing::info!(
            "Built full package {} {} ({} files, {})",
            descriptor.id,
            descriptor.version,
            built.files.len(),
            crate::format_bytes(built.artifact.size)
        );
        Ok(built)
    }

    /// Build the delta package that turns `previous` into `current`.
    pub fn build_delta(
        &self,
        previous: &Package,
        current: &BuiltPackage,
    ) -> Result<BuiltDelta, PackError> {
        let prev_meta = &previous.metadata;
        let cur_meta = &current.package.metadata;

        if !prev_meta.id.eq_ignore_ascii_case(&cur_meta.id) {
            return Err(PackError::CrossId {
                previous: prev_meta.id.clone(),
                current: cur_meta.id.clone(),
            });
        }
        if !prev_meta.target.rid.eq_ignore_ascii_case(&cur_meta.target.rid) {
            return Err(PackError::TargetMismatch {
                previous: prev_meta.target.rid.clone(),
                current: cur_meta.target.rid.clone(),
            });
        }
        for meta in [prev_meta, cur_meta] {
            if meta.kind != PackageKind::Full {
                return Err(PackError::NotFull {
                    version: meta.version.to_string(),
                });
            }
        }
        if cur_meta.version <= prev_meta.version {
            return Err(PackError::VersionNotNewer {
                previous: prev_meta.version.to_string(),
                current: cur_meta.version.to_string(),
            });
        }
        if current.files.is_empty() {
            return Err(PackError::EmptyManifest);
        }

        let layout = current.package.layout();
        let previous_manifest = verified_manifest(previous)?;
        let previous_files = previous_manifest.file_entries(|path| {
            previous.entry(path).map(|e| e.content.len() as u64)
        });

        let summary = diff::summarize(&previous_files, &current.files, &self.policy(layout.clone())?)?;

        let mut entries = Vec::with_capacity(summary.new.len() + summary.modified.len() + 1);
        for file in &summary.new {
            entries.push(content_of(&current.package, &file.target_path)?.clone());
        }

        let mut modified = Vec::with_capacity(summary.modified.len());
        for file in &summary.modified {
            let old = content_of(previous, &file.target_path)?;
            let new = content_of(&current.package, &file.target_path)?;
            let patch = patch::diff(&old.content, &new.content)?;
            tracing::debug!(
                "Patched {} ({} -> {})",
                file.target_path,
                crate::format_bytes(file.full_size),
                crate::format_bytes(patch.len() as u64)
            );
            modified.push(file.clone().with_delta(&patch));
            entries.push(PackageEntry::new(file.target_path.clone(), patch));
        }

        let manifest_path = layout.checksum_manifest_path();
        entries.push(content_of(&current.package, &manifest_path)?.clone());
        canonical_order(&mut entries, &layout);

        let package = Package {
            metadata: PackageMetadata {
                kind: PackageKind::Delta,
                genesis: false,
                delta: Some(summary.paths()),
                ..cur_meta.clone()
            },
            entries,
        };

        let bytes = Bytes::from(self.container.write(&package)?);
        let delta_artifact = ReleaseArtifact {
            size: bytes.len() as u64,
            digest: package.digest(),
        };

        let changes = ReleaseChanges {
            new: summary.new.clone(),
            modified,
            unmodified: summary.unmodified.iter().map(|f| f.target_path.clone()).collect(),
            deleted: summary.deleted.iter().map(|f| f.target_path.clone()).collect(),
        };
        let release = ReleaseMetadata::delta(
            current.header(),
            current.artifact.clone(),
            delta_artifact,
            current.files.clone(),
            changes,
        )?;

        tracing::info!(
            "Built delta package {} {} -> {} (new: {}, modified: {}, unmodified: {}, deleted: {}, {})",
            cur_meta.id,
            prev_meta.version,
            cur_meta.version,
            summary.new.len(),
            summary.modified.len(),
            summary.unmodified.len(),
            summary.deleted.len(),
            crate::format_bytes(bytes.len() as u64)
        );

        Ok(BuiltDelta {
            package,
            bytes,
            summary,
            release,
        })
    }

    /// Number of entries in an archive, excluding the container metadata entry.
    pub fn count_non_packaging_files(&self, bytes: &[u8]) -> Result<usize, PackError> {
        Ok(self
            .container
            .entry_names(bytes)?
            .iter()
            .filter(|name| name.as_str() != METADATA_ENTRY)
            .count())
    }

    /// Read the checksum manifest embedded in an archive.
    pub fn checksum_manifest(&self, bytes: &[u8]) -> Result<ChecksumManifest, PackError> {
        Ok(self.container.read(bytes)?.checksum_manifest()?)
    }

    /// Parse checksum manifest text.
    pub fn parse_checksum_manifest(&self, content: &[u8]) -> Result<ChecksumManifest, PackError> {
        Ok(ChecksumManifest::parse(content)?)
    }
}

fn content_of<'a>(package: &'a Package, target_path: &str) -> Result<&'a PackageEntry, PackError> {
    package
        .entry(target_path)
        .ok_or_else(|| PackError::ManifestMismatch {
            path: target_path.to_string(),
        })
}
