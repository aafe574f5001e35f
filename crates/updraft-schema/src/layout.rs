//! Target-path layout inside a package.
//!
//! Every package has two roots:
//!
//! - the app root `lib/<rid>/` holding user content at its original
//!   relative path, and
//! - the engine-private root `lib/<rid>/<PRIVATE_DIR>/` holding the loader,
//!   the engine library, the app descriptor and the checksum manifest.
//!
//! Private-root files are never binary patched.

use crate::{SchemaError, Target};

/// Folder name of the engine-private root.
pub const PRIVATE_DIR: &str = "0f3c2a9d8e7b4c61a5d09e2b7c4f1a38";

/// Filename of the embedded checksum manifest.
pub const CHECKSUM_MANIFEST_FILENAME: &str = "updraft.checksums";

/// Filename of the embedded app descriptor.
pub const APP_DESCRIPTOR_FILENAME: &str = "updraft.app.json";

/// Normalize a relative path to forward slashes with no leading separator.
///
/// # Errors
///
/// Returns [`SchemaError::InvalidTargetPath`] for empty paths and paths that
/// escape their root via `..`.
pub fn normalize_relative_path(path: &str) -> Result<String, SchemaError> {
    let replaced = path.replace('\\', "/");
    let mut parts = Vec::new();
    for part in replaced.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                return Err(SchemaError::InvalidTargetPath {
                    path: path.to_string(),
                    reason: "parent directory references are not allowed",
                });
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(SchemaError::InvalidTargetPath {
            path: path.to_string(),
            reason: "path is empty",
        });
    }
    Ok(parts.join("/"))
}

/// Maps relative file names onto package target paths for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    app_root: String,
    private_root: String,
}

impl Layout {
    /// Layout for `target`.
    pub fn new(target: &Target) -> Self {
        let app_root = format!("lib/{}/", target.rid);
        let private_root = format!("{app_root}{PRIVATE_DIR}/");
        Self {
            app_root,
            private_root,
        }
    }

    /// Target path for a user file.
    ///
    /// # Errors
    ///
    /// See [`normalize_relative_path`].
    pub fn app_path(&self, relative: &str) -> Result<String, SchemaError> {
        Ok(format!("{}{}", self.app_root, normalize_relative_path(relative)?))
    }

    /// Target path for an engine-owned file.
    ///
    /// # Errors
    ///
    /// See [`normalize_relative_path`].
    pub fn private_path(&self, relative: &str) -> Result<String, SchemaError> {
        Ok(format!(
            "{}{}",
            self.private_root,
            normalize_relative_path(relative)?
        ))
    }

    /// Target path of the checksum manifest.
    pub fn checksum_manifest_path(&self) -> String {
        format!("{}{CHECKSUM_MANIFEST_FILENAME}", self.private_root)
    }

    /// Target path of the app descriptor.
    pub fn descriptor_path(&self) -> String {
        format!("{}{APP_DESCRIPTOR_FILENAME}", self.private_root)
    }

    /// Is `target_path` under the engine-private root?
    pub fn is_private(&self, target_path: &str) -> bool {
        target_path.starts_with(&self.private_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization() {
        assert_eq!(normalize_relative_path("a\\b\\c.dll").unwrap(), "a/b/c.dll");
        assert_eq!(normalize_relative_path("./a//b").unwrap(), "a/b");
        assert_eq!(normalize_relative_path("/a").unwrap(), "a");
        assert!(normalize_relative_path("../a").is_err());
        assert!(normalize_relative_path("./").is_err());
    }

    #[test]
    fn roots() {
        let layout = Layout::new(&Target::from_rid("win-x64").unwrap());
        assert_eq!(layout.app_path("A.dll").unwrap(), "lib/win-x64/A.dll");

        let manifest = layout.checksum_manifest_path();
        assert!(manifest.starts_with("lib/win-x64/"));
        assert!(layout.is_private(&manifest));
        assert!(layout.is_private(&layout.descriptor_path()));
        assert!(!layout.is_private("lib/win-x64/A.dll"));
    }
}
