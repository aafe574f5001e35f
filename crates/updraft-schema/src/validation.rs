//! Identifier validation and the schema error type.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static APP_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+([._-]\w+)*$").expect("app id pattern compiles"));

static CHANNEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9]+$").expect("channel pattern compiles"));

/// Errors raised while constructing or validating schema values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A digest string is not a well formed SHA-512 hex digest.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// The application id does not match `^\w+([._-]\w+)*$`.
    #[error("invalid application id '{0}'")]
    InvalidAppId(String),

    /// A channel name is not purely alphanumeric.
    #[error("invalid channel name '{0}'")]
    InvalidChannelName(String),

    /// The same channel name appears more than once.
    #[error("duplicate channel name '{0}'")]
    DuplicateChannel(String),

    /// A release or descriptor declares no channels.
    #[error("at least one channel is required")]
    NoChannels,

    /// The runtime identifier is empty or contains path separators.
    #[error("invalid runtime identifier '{0}'")]
    InvalidRid(String),

    /// A target path cannot be normalized.
    #[error("invalid target path '{path}': {reason}")]
    InvalidTargetPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Release metadata violates one of its invariants.
    #[error("invalid release {version}: {reason}")]
    InvalidRelease {
        /// Version of the offending release.
        version: String,
        /// Which invariant was violated.
        reason: String,
    },

    /// A release chain is not well formed.
    #[error("invalid release chain: {0}")]
    InvalidChain(String),

    /// A JSON document could not be parsed or written.
    #[error("json error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for SchemaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Returns true if `id` is a valid application id.
pub fn is_valid_app_id(id: &str) -> bool {
    APP_ID_RE.is_match(id)
}

/// Returns true if `name` is a valid channel name.
pub fn is_valid_channel_name(name: &str) -> bool {
    CHANNEL_RE.is_match(name)
}

/// Validate an application id.
///
/// # Errors
///
/// Returns [`SchemaError::InvalidAppId`] when the id is rejected.
pub fn validate_app_id(id: &str) -> Result<(), SchemaError> {
    if is_valid_app_id(id) {
        Ok(())
    } else {
        Err(SchemaError::InvalidAppId(id.to_string()))
    }
}

/// Validate an ordered list of channel names: non-empty, alphanumeric, distinct.
///
/// # Errors
///
/// Returns the first violation found, in list order.
pub fn validate_channels<S: AsRef<str>>(channels: &[S]) -> Result<(), SchemaError> {
    if channels.is_empty() {
        return Err(SchemaError::NoChannels);
    }
    let mut seen = std::collections::HashSet::new();
    for channel in channels {
        let name = channel.as_ref();
        if !is_valid_channel_name(name) {
            return Err(SchemaError::InvalidChannelName(name.to_string()));
        }
        if !seen.insert(name.to_ascii_lowercase()) {
            return Err(SchemaError::DuplicateChannel(name.to_string()));
        }
    }
    Ok(())
}
