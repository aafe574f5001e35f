//! Restore orchestrator.
//!
//! Brings a local package directory up to date with a release chain in
//! three phases:
//!
//! 1. **Checksum**: verify every candidate package already on disk.
//! 2. **Download**: fetch the genesis and delta packages that are missing
//!    or corrupt, verifying each before it is written.
//! 3. **Reassemble**: rebuild the newest full package from deltas when it
//!    is not already present.
//!
//! Each phase runs its items concurrently under its own limit. Per-item
//! failures are recorded as [`ReleaseStatus`] values rather than errors.

mod checksum;
mod download;
mod reassemble;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use updraft_schema::{ReleaseChain, ReleaseMetadata, Sha512Digest};

use crate::config::{ConfigError, RestoreOptions};
use crate::io::container::{Container, ZipContainer};
use crate::io::download::{DownloadError, PackageSource};
use crate::{NullReporter, Reporter};

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Invalid restore options: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Restore task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Restore cancelled")]
    Cancelled,
}

/// What a restore is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreType {
    /// Installing or updating an app: the newest full package must exist afterwards.
    InstallOrUpdate,
    /// Publishing: only the genesis and delta packages are needed.
    Pack,
}

/// Outcome of one release in one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseStatus {
    pub release: ReleaseMetadata,
    pub ok: bool,
    pub reason: Option<String>,
}

impl ReleaseStatus {
    fn ok(release: ReleaseMetadata) -> Self {
        Self {
            release,
            ok: true,
            reason: None,
        }
    }

    fn failed(release: ReleaseMetadata, reason: impl Into<String>) -> Self {
        Self {
            release,
            ok: false,
            reason: Some(reason.into()),
        }
    }

    pub fn filename(&self) -> &str {
        self.release.filename()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub checksums: Vec<ReleaseStatus>,
    pub downloads: Vec<ReleaseStatus>,
    pub reassembled: Vec<ReleaseStatus>,
    pub success: bool,
}

fn sort_statuses(statuses: &mut [ReleaseStatus]) {
    statuses.sort_by(|a, b| {
        a.release
            .version
            .cmp(&b.release.version)
            .then_with(|| a.filename().cmp(b.filename()))
    });
}

/// Decode `bytes` and compare its package digest with `expected`.
fn verify_package(
    container: &dyn Container,
    bytes: &[u8],
    expected: &Sha512Digest,
) -> Result<(), DownloadError> {
    let package = container
        .read(bytes)
        .map_err(|e| DownloadError::Corrupt(e.to_string()))?;
    let actual = package.digest();
    if actual != *expected {
        return Err(DownloadError::HashMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Write `bytes` to `dir/filename` through a temp file in the same directory.
///
/// The final name only ever holds complete content.
fn persist(dir: &Path, filename: &str, bytes: &[u8]) -> std::io::Result<()> {
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(dir.join(filename)).map_err(|e| e.error)?;
    Ok(())
}

/// Everything a phase needs, cloned into its tasks.
struct PhaseContext {
    packages_dir: PathBuf,
    container: Arc<dyn Container>,
    reporter: Arc<dyn Reporter>,
    options: RestoreOptions,
    cancel: CancellationToken,
}

/// Drives restores against one package source.
pub struct PackageManager {
    source: Arc<dyn PackageSource>,
    container: Arc<dyn Container>,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageManager").finish_non_exhaustive()
    }
}

impl PackageManager {
    pub fn new(source: Arc<dyn PackageSource>) -> Self {
        Self {
            source,
            container: Arc::new(ZipContainer),
            reporter: Arc::new(NullReporter),
        }
    }

    pub fn with_container(mut self, container: Arc<dyn Container>) -> Self {
        self.container = container;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Restore `packages_dir` so that it satisfies `chain`.
    pub async fn restore(
        &self,
        packages_dir: &Path,
        chain: &ReleaseChain,
        restore_type: RestoreType,
        options: &RestoreOptions,
        cancel: &CancellationToken,
    ) -> Result<RestoreSummary, RestoreError> {
        options.validate()?;

        if chain.genesis().is_none() {
            tracing::info!("Release chain for channel '{}' is empty", chain.channel());
            return Ok(RestoreSummary {
                success: true,
                ..RestoreSummary::default()
            });
        }

        tokio::fs::create_dir_all(packages_dir).await?;
        let ctx = PhaseContext {
            packages_dir: packages_dir.to_path_buf(),
            container: self.container.clone(),
            reporter: self.reporter.clone(),
            options: options.clone(),
            cancel: cancel.clone(),
        };
        let started = Instant::now();
        let bail_if_cancelled = || {
            if cancel.is_cancelled() {
                Err(RestoreError::Cancelled)
            } else {
                Ok(())
            }
        };

        bail_if_cancelled()?;
        let candidates = checksum::candidates(chain, restore_type);
        let checksums = checksum::run(&ctx, candidates).await?;

        bail_if_cancelled()?;
        let mut wanted: Vec<ReleaseMetadata> = checksums
            .iter()
            .filter(|s| !s.ok && (s.release.genesis || s.release.is_delta()))
            .map(|s| s.release.clone())
            .collect();
        wanted.sort_by(|a, b| a.version.cmp(&b.version));
        let downloads = download::run(&ctx, &self.source, wanted).await?;
        let downloads_ok = downloads.iter().all(|s| s.ok);

        bail_if_cancelled()?;
        let reassembled = match restore_type {
            RestoreType::Pack => Vec::new(),
            RestoreType::InstallOrUpdate => {
                let targets = reassemble::targets(chain, &checksums);
                if downloads_ok {
                    reassemble::run(&ctx, chain, targets).await?
                } else {
                    let mut skipped: Vec<_> = targets
                        .into_iter()
                        .map(|r| ReleaseStatus::failed(r, "a required download failed"))
                        .collect();
                    sort_statuses(&mut skipped);
                    skipped
                }
            }
        };
        bail_if_cancelled()?;

        let success = downloads_ok && reassembled.iter().all(|s| s.ok);
        tracing::info!(
            "Restore of {} packages for channel '{}' {} in {:.1}s",
            chain.len(),
            chain.channel(),
            if success { "succeeded" } else { "failed" },
            started.elapsed().as_secs_f64()
        );

        Ok(RestoreSummary {
            checksums,
            downloads,
            reassembled,
            success,
        })
    }
}
