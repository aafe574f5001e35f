//! Reassemble phase: rebuild the newest full package from deltas.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use updraft_schema::{ReleaseChain, ReleaseMetadata};

use super::{PhaseContext, ReleaseStatus, RestoreError, sort_statuses};
use crate::progress::ProgressHub;
use crate::reassemble::{ReassembleError, Reassembler};
use crate::reporter::RestoreProgress;

/// Full packages that have to be rebuilt, in their full view.
///
/// Only the newest release qualifies, and only when it is a delta whose
/// full package did not checksum cleanly.
pub(super) fn targets(chain: &ReleaseChain, checksums: &[ReleaseStatus]) -> Vec<ReleaseMetadata> {
    let Some(newest) = chain.newest() else {
        return Vec::new();
    };
    if newest.genesis {
        return Vec::new();
    }
    let present = checksums.iter().any(|s| {
        s.ok && s.release.is_full() && s.release.version == newest.version
    });
    if present {
        tracing::debug!("Full package for {} already present", newest.version);
        return Vec::new();
    }
    vec![newest.as_full(false)]
}

pub(super) async fn run(
    ctx: &PhaseContext,
    chain: &ReleaseChain,
    targets: Vec<ReleaseMetadata>,
) -> Result<Vec<ReleaseStatus>, RestoreError> {
    if targets.is_empty() {
        return Ok(Vec::new());
    }

    let started = Instant::now();
    let reporter = ctx.reporter.clone();
    let (hub, consumer) =
        ProgressHub::spawn(targets.len(), ctx.options.progress_interval, move |aggregate| {
            reporter.restore(&RestoreProgress {
                percentage: aggregate.percentage,
                files_restored: aggregate.completed,
                files_to_restore: aggregate.total,
            });
        });

    let reassembler = Arc::new(Reassembler::new(ctx.container.clone()));
    let semaphore = Arc::new(Semaphore::new(ctx.options.restore_concurrency));
    let mut set = JoinSet::new();

    for (item, release) in targets.into_iter().enumerate() {
        let sink = hub.sink(item);
        let hub = hub.clone();
        let semaphore = semaphore.clone();
        let reassembler = reassembler.clone();
        let container = ctx.container.clone();
        let packages_dir = ctx.packages_dir.clone();
        let cancel = ctx.cancel.clone();
        let chain = chain.clone();

        set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return Ok::<_, RestoreError>(ReleaseStatus::failed(release, "cancelled"));
            };

            let version = release.version.clone();
            let filename = release.full_filename.clone();
            let outcome = tokio::task::spawn_blocking(move || -> Result<u64, ReassembleError> {
                let package =
                    reassembler.rebuild_chain(&packages_dir, &chain, &version, &sink, &cancel)?;
                let bytes = container.write(&package)?;
                super::persist(&packages_dir, &filename, &bytes)?;
                Ok(bytes.len() as u64)
            })
            .await?;
            hub.finished(item);

            Ok::<_, RestoreError>(match outcome {
                Ok(size) => {
                    tracing::info!(
                        "Rebuilt {} ({})",
                        release.full_filename,
                        crate::format_bytes(size)
                    );
                    ReleaseStatus::ok(release)
                }
                Err(e) => {
                    tracing::warn!("Failed to rebuild {}: {e}", release.full_filename);
                    ReleaseStatus::failed(release, e.to_string())
                }
            })
        });
    }
    drop(hub);

    let mut statuses = Vec::new();
    while let Some(joined) = set.join_next().await {
        statuses.push(joined??);
    }
    consumer.await?;

    sort_statuses(&mut statuses);
    tracing::info!(
        "Reassembly finished in {:.1}s",
        started.elapsed().as_secs_f64()
    );
    Ok(statuses)
}
