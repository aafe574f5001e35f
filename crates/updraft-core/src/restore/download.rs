//! Download phase: fetch, verify and store missing packages.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use updraft_schema::ReleaseMetadata;

use super::{PhaseContext, ReleaseStatus, RestoreError, sort_statuses};
use crate::io::container::Container;
use crate::io::download::{DownloadError, PackageSource};
use crate::progress::{ItemSink, ProgressHub, ProgressSink};
use crate::reporter::DownloadProgress;

async fn fetch_and_store(
    source: &dyn PackageSource,
    container: Arc<dyn Container>,
    packages_dir: &Path,
    release: &ReleaseMetadata,
    sink: &ItemSink,
    cancel: &CancellationToken,
) -> Result<(), DownloadError> {
    let size = release.size();
    let on_bytes = |received: u64| sink.report(received, size.max(received));
    let bytes = source.download(release, &on_bytes, cancel).await?;

    let expected = release.digest().clone();
    let dir = packages_dir.to_path_buf();
    let filename = release.filename().to_string();
    tokio::task::spawn_blocking(move || -> Result<(), DownloadError> {
        super::verify_package(container.as_ref(), &bytes, &expected)?;
        super::persist(&dir, &filename, &bytes)?;
        Ok(())
    })
    .await
    .map_err(|e| DownloadError::Io(std::io::Error::other(e)))?
}

pub(super) async fn run(
    ctx: &PhaseContext,
    source: &Arc<dyn PackageSource>,
    releases: Vec<ReleaseMetadata>,
) -> Result<Vec<ReleaseStatus>, RestoreError> {
    if releases.is_empty() {
        tracing::debug!("All packages present, nothing to download");
        return Ok(Vec::new());
    }

    let releases_to_download = releases.len();
    let bytes_to_download: u64 = releases.iter().map(ReleaseMetadata::size).sum();
    tracing::info!(
        "Downloading {releases_to_download} packages ({})",
        crate::format_bytes(bytes_to_download)
    );

    let started = Instant::now();
    let reporter = ctx.reporter.clone();
    let succeeded = Arc::new(AtomicUsize::new(0));
    let downloaded = succeeded.clone();
    let (hub, consumer) = ProgressHub::spawn(
        releases_to_download,
        ctx.options.progress_interval,
        move |aggregate| {
            tracing::info!(
                "Downloaded {}% ({} of {})",
                aggregate.percentage,
                crate::format_bytes(aggregate.completed),
                crate::format_bytes(aggregate.total)
            );
            reporter.download(&DownloadProgress {
                percentage: aggregate.percentage,
                releases_downloaded: downloaded.load(Ordering::SeqCst),
                releases_to_download,
                bytes_downloaded: aggregate.completed,
                bytes_to_download: aggregate.total.max(bytes_to_download),
            });
        },
    );

    let semaphore = Arc::new(Semaphore::new(ctx.options.download_concurrency));
    let mut set = JoinSet::new();

    for (item, release) in releases.into_iter().enumerate() {
        let sink = hub.sink(item);
        sink.report(0, release.size());

        let hub = hub.clone();
        let succeeded = succeeded.clone();
        let semaphore = semaphore.clone();
        let source = source.clone();
        let container = ctx.container.clone();
        let packages_dir = ctx.packages_dir.clone();
        let cancel = ctx.cancel.clone();

        set.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) if !cancel.is_cancelled() => {
                    fetch_and_store(
                        source.as_ref(),
                        container,
                        &packages_dir,
                        &release,
                        &sink,
                        &cancel,
                    )
                    .await
                }
                _ => Err(DownloadError::Cancelled),
            };
            let status = match result {
                Ok(()) => {
                    succeeded.fetch_add(1, Ordering::SeqCst);
                    tracing::debug!("Downloaded {}", release.filename());
                    ReleaseStatus::ok(release)
                }
                Err(e) => {
                    tracing::warn!("Failed to download {}: {e}", release.filename());
                    ReleaseStatus::failed(release, e.to_string())
                }
            };
            hub.finished(item);
            status
        });
    }
    drop(hub);

    let mut statuses = Vec::with_capacity(releases_to_download);
    while let Some(joined) = set.join_next().await {
        statuses.push(joined?);
    }
    consumer.await?;

    sort_statuses(&mut statuses);
    let failed = statuses.iter().filter(|s| !s.ok).count();
    tracing::info!(
        "Downloads finished in {:.1}s: {} ok, {failed} failed",
        started.elapsed().as_secs_f64(),
        statuses.len() - failed
    );
    Ok(statuses)
}
