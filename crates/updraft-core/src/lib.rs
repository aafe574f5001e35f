pub mod builder;
pub mod checksum;
pub mod config;
pub mod diff;
pub mod io;
pub mod manifest;
pub mod package;
pub mod paths;
pub mod progress;
pub mod reassemble;
pub mod restore;

pub mod reporter;

pub use builder::{BuildRequest, BuiltDelta, BuiltPackage, EngineAssets, PackError, PackageBuilder, SourceFile};
pub use config::{ConfigError, RestoreOptions};
pub use io::container::{Container, ZipContainer};
pub use io::download::{HttpPackageSource, PackageSource};
pub use package::{Package, PackageEntry, PackageKind, PackageMetadata};
pub use paths::*;
pub use reassemble::{ReassembleError, Reassembler};
pub use reporter::{NullReporter, Reporter};
pub use restore::{PackageManager, ReleaseStatus, RestoreError, RestoreSummary, RestoreType};

/// User Agent string for core operations
pub const USER_AGENT: &str = concat!("updraft-core/", env!("CARGO_PKG_VERSION"));

/// Format bytes for human-readable display
pub fn format_bytes(bytes: u64) -> String {
    let kb = bytes as f64 / 1024.0;
    let mb = kb / 1024.0;
    if mb >= 1024.0 {
        format!("{:.1} GB", mb / 1024.0)
    } else if kb >= 1024.0 {
        format!("{mb:.1} MB")
    } else if kb >= 1.0 {
        format!("{kb:.1} KB")
    } else {
        format!("{bytes} B")
    }
}
