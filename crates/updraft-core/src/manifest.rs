//! Checksum manifest embedded in every package.
//!
//! One line per file entry, `<target path>\t<hex digest>\n`, in package
//! order. The manifest never lists itself.

use std::collections::HashSet;

use thiserror::Error;
use updraft_schema::{FileEntry, Sha512Digest};

use crate::package::PackageEntry;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ManifestError {
    #[error("checksum manifest is not valid UTF-8")]
    Encoding,

    #[error("malformed checksum manifest line {line}: '{content}'")]
    MalformedLine { line: usize, content: String },

    #[error("duplicate target path '{0}' in checksum manifest")]
    Duplicate(String),

    #[error("package has no checksum manifest at '{path}'")]
    Missing { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestLine {
    pub target_path: String,
    pub digest: Sha512Digest,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumManifest {
    lines: Vec<ManifestLine>,
}

impl ChecksumManifest {
    /// Build a manifest from package entries, skipping `exclude` (the manifest's own path).
    pub fn from_entries<'a>(
        entries: impl IntoIterator<Item = &'a PackageEntry>,
        exclude: &str,
    ) -> Self {
        let lines = entries
            .into_iter()
            .filter(|e| e.target_path != exclude)
            .map(|e| ManifestLine {
                target_path: e.target_path.clone(),
                digest: e.digest(),
            })
            .collect();
        Self { lines }
    }

    pub fn parse(content: &[u8]) -> Result<Self, ManifestError> {
        let text = std::str::from_utf8(content).map_err(|_| ManifestError::Encoding)?;
        let text = text.strip_suffix('\n').unwrap_or(text);

        let mut lines = Vec::new();
        let mut seen = HashSet::new();
        if text.is_empty() {
            return Ok(Self { lines });
        }

        for (index, raw) in text.split('\n').enumerate() {
            let raw = raw.strip_suffix('\r').unwrap_or(raw);
            let malformed = || ManifestError::MalformedLine {
                line: index + 1,
                content: raw.to_string(),
            };

            let (path, hex) = raw.split_once('\t').ok_or_else(malformed)?;
            if path.is_empty() {
                return Err(malformed());
            }
            let digest = Sha512Digest::new(hex).map_err(|_| malformed())?;
            if !seen.insert(path.to_string()) {
                return Err(ManifestError::Duplicate(path.to_string()));
            }
            lines.push(ManifestLine {
                target_path: path.to_string(),
                digest,
            });
        }
        Ok(Self { lines })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.target_path);
            out.push('\t');
            out.push_str(line.digest.as_str());
            out.push('\n');
        }
        out
    }

    pub fn lines(&self) -> &[ManifestLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn get(&self, target_path: &str) -> Option<&Sha512Digest> {
        self.lines
            .iter()
            .find(|l| l.target_path == target_path)
            .map(|l| &l.digest)
    }

    /// Manifest lines as [`FileEntry`] values, sized from `entries` when available.
    pub fn file_entries(&self, sizes: impl Fn(&str) -> Option<u64>) -> Vec<FileEntry> {
        self.lines
            .iter()
            .map(|l| {
                FileEntry::new(
                    l.target_path.clone(),
                    l.digest.clone(),
                    sizes(&l.target_path).unwrap_or_default(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use updraft_schema::EMPTY_SHA512;

    #[test]
    fn build_and_parse() {
        let entries = vec![
            PackageEntry::new("lib/win-x64/a.dll", "a"),
            PackageEntry::new("lib/win-x64/manifest", ""),
            PackageEntry::new("lib/win-x64/empty", ""),
        ];
        let manifest = ChecksumManifest::from_entries(&entries, "lib/win-x64/manifest");
        assert_eq!(manifest.len(), 2);

        let text = manifest.render();
        assert!(text.ends_with('\n'));
        assert!(text.contains(&format!("lib/win-x64/empty\t{EMPTY_SHA512}")));

        let parsed = ChecksumManifest::parse(text.as_bytes()).unwrap();
        assert_eq!(parsed, manifest);
        assert_eq!(
            parsed.get("lib/win-x64/a.dll"),
            Some(&Sha512Digest::compute(b"a"))
        );
    }

    #[test]
    fn zero_entries() {
        assert!(ChecksumManifest::parse(b"").unwrap().is_empty());
        assert!(ChecksumManifest::parse(b"\n").unwrap().is_empty());
        assert_eq!(ChecksumManifest::default().render(), "");
    }

    #[test]
    fn crlf_tolerated() {
        let text = format!("a\t{EMPTY_SHA512}\r\nb\t{EMPTY_SHA512}\r\n");
        assert_eq!(ChecksumManifest::parse(text.as_bytes()).unwrap().len(), 2);
    }

    #[test]
    fn malformed_lines_rejected() {
        let no_tab = format!("a\t{EMPTY_SHA512}\nbroken line\n");
        assert_eq!(
            ChecksumManifest::parse(no_tab.as_bytes()).unwrap_err(),
            ManifestError::MalformedLine {
                line: 2,
                content: "broken line".into()
            }
        );

        let bad_digest = "a\tdeadbeef\n";
        assert!(matches!(
            ChecksumManifest::parse(bad_digest.as_bytes()),
            Err(ManifestError::MalformedLine { line: 1, .. })
        ));

        let empty_path = format!("\t{EMPTY_SHA512}\n");
        assert!(ChecksumManifest::parse(empty_path.as_bytes()).is_err());

        let blank_middle = format!("a\t{EMPTY_SHA512}\n\nb\t{EMPTY_SHA512}\n");
        assert!(ChecksumManifest::parse(blank_middle.as_bytes()).is_err());

        let duplicate = format!("a\t{EMPTY_SHA512}\na\t{EMPTY_SHA512}\n");
        assert_eq!(
            ChecksumManifest::parse(duplicate.as_bytes()).unwrap_err(),
            ManifestError::Duplicate("a".into())
        );

        assert_eq!(
            ChecksumManifest::parse(&[0xff, 0xfe]).unwrap_err(),
            ManifestError::Encoding
        );
    }
}
