//! Shared value types and wire format for updraft packages and release feeds.

pub mod hash;
pub mod layout;
pub mod release;
pub mod types;
pub mod validation;

// Re-exports
pub use hash::*;
pub use layout::{
    APP_DESCRIPTOR_FILENAME, CHECKSUM_MANIFEST_FILENAME, Layout, PRIVATE_DIR,
    normalize_relative_path,
};
pub use release::{
    ReleaseArtifact, ReleaseChain, ReleaseChanges, ReleaseFeed, ReleaseHeader, ReleaseMetadata,
};
pub use types::*;
pub use validation::*;
