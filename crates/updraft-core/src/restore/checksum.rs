//! Checksum phase: verify packages already on disk.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use updraft_schema::{ReleaseChain, ReleaseMetadata, Sha512Digest};

use super::{PhaseContext, ReleaseStatus, RestoreError, RestoreType, sort_statuses};
use crate::io::container::Container;
use crate::progress::percentage;
use crate::reporter::ChecksumProgress;

/// Packages a restore of `restore_type` needs on disk.
///
/// The genesis full package and every delta package always; the newest
/// full package too when installing and the chain has deltas.
pub(super) fn candidates(chain: &ReleaseChain, restore_type: RestoreType) -> Vec<ReleaseMetadata> {
    let mut candidates: Vec<ReleaseMetadata> = chain.releases().to_vec();
    if restore_type == RestoreType::InstallOrUpdate && chain.has_deltas() {
        if let Some(newest) = chain.newest() {
            candidates.push(newest.as_full(false));
        }
    }
    candidates
}

fn check_file(container: &dyn Container, path: &Path, expected: &Sha512Digest) -> Result<(), String> {
    if !path.exists() {
        return Err("not present".to_string());
    }
    let bytes = std::fs::read(path).map_err(|e| format!("unreadable: {e}"))?;
    super::verify_package(container, &bytes, expected).map_err(|e| e.to_string())
}

pub(super) async fn run(
    ctx: &PhaseContext,
    candidates: Vec<ReleaseMetadata>,
) -> Result<Vec<ReleaseStatus>, RestoreError> {
    let total = candidates.len();
    let started = Instant::now();
    let semaphore = Arc::new(Semaphore::new(ctx.options.checksum_concurrency));
    let mut set = JoinSet::new();

    for release in candidates {
        let semaphore = semaphore.clone();
        let container = ctx.container.clone();
        let cancel = ctx.cancel.clone();
        let path = ctx.packages_dir.join(release.filename());

        set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return Ok::<_, RestoreError>(ReleaseStatus::failed(release, "cancelled"));
            };
            if cancel.is_cancelled() {
                return Ok(ReleaseStatus::failed(release, "cancelled"));
            }

            let expected = release.digest().clone();
            let outcome =
                tokio::task::spawn_blocking(move || check_file(container.as_ref(), &path, &expected))
                    .await?;
            Ok::<_, RestoreError>(match outcome {
                Ok(()) => ReleaseStatus::ok(release),
                Err(reason) => {
                    tracing::debug!("{} needs restoring: {reason}", release.filename());
                    ReleaseStatus::failed(release, reason)
                }
            })
        });
    }

    let mut statuses = Vec::with_capacity(total);
    let mut releases_ok = 0;
    while let Some(joined) = set.join_next().await {
        let status = joined??;
        if status.ok {
            releases_ok += 1;
        }
        statuses.push(status);
        ctx.reporter.checksum(&ChecksumProgress {
            percentage: percentage(statuses.len() as u64, total as u64),
            releases_ok,
            releases_checksummed: statuses.len(),
            releases_to_checksum: total,
        });
    }

    sort_statuses(&mut statuses);
    tracing::info!(
        "Checksummed {total} packages in {:.1}s: {releases_ok} ok",
        started.elapsed().as_secs_f64()
    );
    Ok(statuses)
}
