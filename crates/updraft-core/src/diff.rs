//! Release diff engine.
//!
//! Classifies every entry of two full manifests as new, modified,
//! unmodified or deleted. Entries keep their manifest order inside each
//! bucket; archive layout depends on it.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use updraft_schema::{FileEntry, Layout};

use crate::package::DeltaPaths;

#[derive(Error, Debug)]
pub enum DiffError {
    #[error("target path '{0}' appears more than once in a manifest")]
    DuplicatePath(String),

    #[error("invalid exclusion pattern: {0}")]
    InvalidPattern(#[from] glob::PatternError),
}

/// Decides which modified entries bypass the binary patcher.
///
/// Engine-private files are always excluded. Extra exclusions are glob
/// patterns matched against the full target path.
#[derive(Debug, Clone)]
pub struct PatchPolicy {
    layout: Layout,
    excluded: Vec<glob::Pattern>,
}

impl PatchPolicy {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            excluded: Vec::new(),
        }
    }

    pub fn exclude(mut self, pattern: &str) -> Result<Self, DiffError> {
        self.excluded.push(glob::Pattern::new(pattern)?);
        Ok(self)
    }

    pub fn is_excluded(&self, target_path: &str) -> bool {
        self.layout.is_private(target_path) || self.excluded.iter().any(|p| p.matches(target_path))
    }
}

/// Classification of a current manifest relative to a previous one.
///
/// `new`, `modified` and `unmodified` hold entries from the current
/// manifest; `deleted` holds entries from the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaSummary {
    pub new: Vec<FileEntry>,
    pub modified: Vec<FileEntry>,
    pub unmodified: Vec<FileEntry>,
    pub deleted: Vec<FileEntry>,
}

impl DeltaSummary {
    pub fn paths(&self) -> DeltaPaths {
        fn collect(entries: &[FileEntry]) -> Vec<String> {
            entries.iter().map(|e| e.target_path.clone()).collect()
        }
        DeltaPaths {
            new: collect(&self.new),
            modified: collect(&self.modified),
            unmodified: collect(&self.unmodified),
            deleted: collect(&self.deleted),
        }
    }
}

fn index(entries: &[FileEntry]) -> Result<HashMap<&str, &FileEntry>, DiffError> {
    let mut map = HashMap::with_capacity(entries.len());
    for entry in entries {
        if map.insert(entry.target_path.as_str(), entry).is_some() {
            return Err(DiffError::DuplicatePath(entry.target_path.clone()));
        }
    }
    Ok(map)
}

/// Compare two full manifests.
pub fn summarize(
    previous: &[FileEntry],
    current: &[FileEntry],
    policy: &PatchPolicy,
) -> Result<DeltaSummary, DiffError> {
    let previous_by_path = index(previous)?;
    let current_paths: HashSet<&str> = index(current)?.into_keys().collect();

    let mut summary = DeltaSummary::default();

    for entry in current {
        match previous_by_path.get(entry.target_path.as_str()) {
            None => summary.new.push(entry.clone()),
            Some(old) if old.full_digest == entry.full_digest => {
                summary.unmodified.push(entry.clone());
            }
            Some(_) if policy.is_excluded(&entry.target_path) => {
                summary.new.push(entry.clone());
            }
            Some(_) => summary.modified.push(entry.clone()),
        }
    }

    summary.deleted = previous
        .iter()
        .filter(|e| !current_paths.contains(e.target_path.as_str()))
        .cloned()
        .collect();

    tracing::debug!(
        new = summary.new.len(),
        modified = summary.modified.len(),
        unmodified = summary.unmodified.len(),
        deleted = summary.deleted.len(),
        "summarized release delta"
    );

    Ok(summary)
}
