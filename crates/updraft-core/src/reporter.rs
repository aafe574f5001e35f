//! Reporter trait for dependency injection
//!
//! The restore orchestrator reports per-phase progress through this trait
//! without being coupled to a specific UI.

/// Checksum phase progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChecksumProgress {
    pub percentage: u8,
    pub releases_ok: usize,
    pub releases_checksummed: usize,
    pub releases_to_checksum: usize,
}

/// Download phase progress, aggregated over every concurrent download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadProgress {
    pub percentage: u8,
    pub releases_downloaded: usize,
    pub releases_to_download: usize,
    pub bytes_downloaded: u64,
    pub bytes_to_download: u64,
}

/// Reassembly phase progress, in files restored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreProgress {
    pub percentage: u8,
    pub files_restored: u64,
    pub files_to_restore: u64,
}

pub trait Reporter: Send + Sync {
    /// A release finished checksumming.
    fn checksum(&self, progress: &ChecksumProgress);

    /// Aggregate download progress changed.
    fn download(&self, progress: &DownloadProgress);

    /// Aggregate reassembly progress changed.
    fn restore(&self, progress: &RestoreProgress);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn checksum(&self, progress: &ChecksumProgress) {
        (**self).checksum(progress);
    }
    fn download(&self, progress: &DownloadProgress) {
        (**self).download(progress);
    }
    fn restore(&self, progress: &RestoreProgress) {
        (**self).restore(progress);
    }
}

/// A no-op reporter for silent operations (e.g., verification, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn checksum(&self, _: &ChecksumProgress) {}
    fn download(&self, _: &DownloadProgress) {}
    fn restore(&self, _: &RestoreProgress) {}
}
