//! Value types shared by the package producer and the restore side.

use serde::{Deserialize, Serialize};

use crate::{SchemaError, Sha512Digest, validate_app_id, validate_channels};

/// Operating system family a release targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    /// Microsoft Windows.
    Windows,
    /// Linux distributions.
    Linux,
    /// Apple macOS.
    Macos,
}

impl Os {
    /// Lowercase display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Windows => "windows",
            Os::Linux => "linux",
            Os::Macos => "macos",
        }
    }

    /// Infer the OS family from a runtime identifier prefix (`win-x64`, `linux-arm64`, `osx-x64`).
    pub fn from_rid(rid: &str) -> Option<Self> {
        let rid = rid.to_ascii_lowercase();
        if rid.starts_with("win") {
            Some(Os::Windows)
        } else if rid.starts_with("linux") {
            Some(Os::Linux)
        } else if rid.starts_with("osx") || rid.starts_with("macos") {
            Some(Os::Macos)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Os {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A target platform and architecture, identified by its runtime identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Operating system family.
    pub os: Os,
    /// Runtime identifier, e.g. `win-x64`.
    pub rid: String,
}

impl Target {
    /// Create a target, validating the runtime identifier.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidRid`] for an empty rid or one that
    /// contains whitespace or path separators.
    pub fn new(os: Os, rid: impl Into<String>) -> Result<Self, SchemaError> {
        let rid = rid.into();
        if rid.is_empty()
            || rid
                .chars()
                .any(|c| c.is_whitespace() || c == '/' || c == '\\')
        {
            return Err(SchemaError::InvalidRid(rid));
        }
        Ok(Self { os, rid })
    }

    /// Create a target from a runtime identifier alone.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidRid`] when the OS family cannot be inferred.
    pub fn from_rid(rid: impl Into<String>) -> Result<Self, SchemaError> {
        let rid = rid.into();
        let os = Os::from_rid(&rid).ok_or_else(|| SchemaError::InvalidRid(rid.clone()))?;
        Self::new(os, rid)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.rid)
    }
}

/// Where a channel's packages are published.
///
/// The engine only ever asks a feed for its source and whether credentials
/// are attached; it never branches on the concrete variant beyond that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UpdateFeed {
    /// A NuGet v3 feed.
    Nuget {
        /// Feed name as configured by the publisher.
        name: String,
        /// Feed index URL.
        source: String,
        /// Optional username.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        /// Optional password.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        /// Optional API key used for publishing.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
    },
    /// A plain HTTP directory holding package files.
    Http {
        /// Base URL; package filenames are appended to it.
        source: String,
        /// Optional basic-auth username.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        /// Optional basic-auth password.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
}

impl UpdateFeed {
    /// Base URL of the feed.
    pub fn source(&self) -> &str {
        match self {
            UpdateFeed::Nuget { source, .. } | UpdateFeed::Http { source, .. } => source,
        }
    }

    /// Username/password pair, if both are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match self {
            UpdateFeed::Nuget {
                username: Some(user),
                password: Some(pass),
                ..
            }
            | UpdateFeed::Http {
                username: Some(user),
                password: Some(pass),
                ..
            } => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    /// Does fetching from this feed need credentials?
    pub fn requires_credentials(&self) -> bool {
        self.credentials().is_some()
    }

    /// Copy of this feed with every secret removed.
    pub fn without_credentials(&self) -> Self {
        match self {
            UpdateFeed::Nuget { name, source, .. } => UpdateFeed::Nuget {
                name: name.clone(),
                source: source.clone(),
                username: None,
                password: None,
                api_key: None,
            },
            UpdateFeed::Http { source, .. } => UpdateFeed::Http {
                source: source.clone(),
                username: None,
                password: None,
            },
        }
    }
}

/// A named release channel and the feed it is published to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel name, e.g. `test` or `production`.
    pub name: String,
    /// Where packages for this channel live.
    pub update_feed: UpdateFeed,
}

/// Application descriptor embedded in every package's private root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDescriptor {
    /// Application id.
    pub id: String,
    /// Release version.
    pub version: semver::Version,
    /// Target platform.
    pub target: Target,
    /// Main executable, relative to the app root.
    pub main_exe: String,
    /// Ordered list of channels.
    pub channels: Vec<Channel>,
}

impl AppDescriptor {
    /// Create a descriptor, validating the id and channel list.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] for an invalid id, an empty or duplicate
    /// channel list, or an invalid channel name.
    pub fn new(
        id: impl Into<String>,
        version: semver::Version,
        target: Target,
        main_exe: impl Into<String>,
        channels: Vec<Channel>,
    ) -> Result<Self, SchemaError> {
        let descriptor = Self {
            id: id.into(),
            version,
            target,
            main_exe: main_exe.into(),
            channels,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Check id and channel invariants.
    ///
    /// # Errors
    ///
    /// See [`AppDescriptor::new`].
    pub fn validate(&self) -> Result<(), SchemaError> {
        validate_app_id(&self.id)?;
        validate_channels(&self.channel_names())
    }

    /// Channel names in declaration order.
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }

    /// Copy of this descriptor with all feed credentials stripped.
    pub fn sanitized(&self) -> Self {
        Self {
            channels: self
                .channels
                .iter()
                .map(|c| Channel {
                    name: c.name.clone(),
                    update_feed: c.update_feed.without_credentials(),
                })
                .collect(),
            ..self.clone()
        }
    }

    /// Serialize to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String, SchemaError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate a descriptor from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Json`] for malformed input, or a validation
    /// error for an invalid descriptor.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let descriptor: Self = serde_json::from_str(json)?;
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// One file inside a release, addressed by its normalized target path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Forward-slash path inside the package.
    pub target_path: String,
    /// Digest of the full file content.
    pub full_digest: Sha512Digest,
    /// Size of the full file content in bytes.
    pub full_size: u64,
    /// Digest of the stored patch, for patched entries only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_digest: Option<Sha512Digest>,
    /// Size of the stored patch, for patched entries only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_size: Option<u64>,
}

impl FileEntry {
    /// Entry with a precomputed full digest.
    pub fn new(target_path: impl Into<String>, full_digest: Sha512Digest, full_size: u64) -> Self {
        Self {
            target_path: target_path.into(),
            full_digest,
            full_size,
            delta_digest: None,
            delta_size: None,
        }
    }

    /// Entry describing `content`.
    pub fn from_content(target_path: impl Into<String>, content: &[u8]) -> Self {
        Self::new(
            target_path,
            Sha512Digest::compute(content),
            content.len() as u64,
        )
    }

    /// Attach patch digest and size, producing a new entry.
    pub fn with_delta(self, patch: &[u8]) -> Self {
        Self {
            delta_digest: Some(Sha512Digest::compute(patch)),
            delta_size: Some(patch.len() as u64),
            ..self
        }
    }

    /// True when this entry travels as a binary patch.
    pub fn is_patched(&self) -> bool {
        self.delta_digest.is_some()
    }
}
