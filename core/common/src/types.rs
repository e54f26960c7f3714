//! Common types used throughout Stowage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::{Error, Result};

/// Maximum length of a stored name in bytes.
pub const MAX_NAME_LENGTH: usize = 255;

/// Maximum length kept from a caller-supplied name when generating a stored name.
const MAX_SANITIZED_LENGTH: usize = 200;

/// Fallback used when sanitization leaves nothing of the original name.
const FALLBACK_NAME: &str = "file";

/// Last timestamp handed out by [`StoredName::generate`].
static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

/// The name under which bytes are physically persisted.
///
/// A `StoredName` is always safe to join to a storage directory: it holds only
/// ASCII alphanumerics, `-`, `_` and `.`, never contains `..`, never starts or
/// ends with a dot, and never contains a path separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoredName(String);

impl StoredName {
    /// Validate a stored name received from a caller.
    ///
    /// # Errors
    /// - Empty or longer than [`MAX_NAME_LENGTH`]
    /// - Contains `/`, `\` or `..`
    /// - Starts or ends with `.`
    /// - Contains characters outside the allow-list
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidInput("Name cannot be empty".to_string()));
        }
        if name.len() > MAX_NAME_LENGTH {
            return Err(Error::InvalidInput(format!(
                "Name exceeds {} bytes",
                MAX_NAME_LENGTH
            )));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(Error::InvalidInput(
                "Name cannot contain path separators".to_string(),
            ));
        }
        if name.contains("..") {
            return Err(Error::InvalidInput(
                "Name cannot contain parent directory segments".to_string(),
            ));
        }
        if name.starts_with('.') || name.ends_with('.') {
            return Err(Error::InvalidInput(
                "Name cannot start or end with '.'".to_string(),
            ));
        }
        if !name.chars().all(is_allowed_char) {
            return Err(Error::InvalidInput(
                "Name contains disallowed characters".to_string(),
            ));
        }
        Ok(Self(name))
    }

    /// Generate a distinct stored name for a caller-supplied filename.
    ///
    /// Produces `<millisecond-timestamp>-<sanitized-original>`. The timestamp is
    /// taken from a process-wide monotonic counter, so two names generated in
    /// the same millisecond still differ.
    pub fn generate(original: &str) -> Self {
        Self::generate_at(original, Utc::now().timestamp_millis())
    }

    fn generate_at(original: &str, now_millis: i64) -> Self {
        let stamp = next_stamp(now_millis);
        Self(format!("{}-{}", stamp, sanitize(original)))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoredName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for StoredName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<StoredName> for String {
    fn from(name: StoredName) -> Self {
        name.0
    }
}

impl AsRef<str> for StoredName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

fn next_stamp(now_millis: i64) -> i64 {
    let mut last = LAST_STAMP.load(Ordering::Relaxed);
    loop {
        let candidate = now_millis.max(last + 1);
        match LAST_STAMP.compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}

/// Reduce a caller-supplied filename to the stored-name alphabet.
///
/// Only the final path component is kept, disallowed characters become `_`,
/// runs of dots collapse to one, and leading/trailing dots are dropped.
pub fn sanitize(original: &str) -> String {
    let base = original
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(original);

    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        let c = if is_allowed_char(c) { c } else { '_' };
        if c == '.' && out.ends_with('.') {
            continue;
        }
        out.push(c);
    }

    out.truncate(MAX_SANITIZED_LENGTH);
    let trimmed = out.trim_matches('.');
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// How uploads are verified while they stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IntegrityMode {
    /// No accounting beyond what the backend reports.
    #[default]
    None,
    /// Count bytes only.
    Size,
    /// Count bytes and compute a SHA-256 digest.
    Hash,
}

impl IntegrityMode {
    /// Whether a digest should be computed.
    pub fn computes_hash(&self) -> bool {
        matches!(self, IntegrityMode::Hash)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityMode::None => "NONE",
            IntegrityMode::Size => "SIZE",
            IntegrityMode::Hash => "HASH",
        }
    }
}

impl FromStr for IntegrityMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(IntegrityMode::None),
            "SIZE" => Ok(IntegrityMode::Size),
            "HASH" => Ok(IntegrityMode::Hash),
            other => Err(Error::InvalidInput(format!(
                "Unknown integrity mode '{}'. Use: NONE, SIZE, or HASH",
                other
            ))),
        }
    }
}

impl fmt::Display for IntegrityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of a successfully persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Logical name the artifact was stored under.
    pub filename: String,
    /// Physical path or backend-specific locator.
    pub path: String,
    /// Exact number of bytes written.
    pub size: u64,
    /// When the artifact was persisted.
    pub created_at: DateTime<Utc>,
    /// Lowercase hex SHA-256 of the persisted bytes, in HASH mode only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}
