//! Process-wide storage configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Error, IntegrityMode, Result};

/// Default provider kind.
pub const DEFAULT_PROVIDER: &str = "local";

/// Default base directory for the local backend.
pub const DEFAULT_STORAGE_DIR: &str = "./storage";

/// Default maximum accepted upload size (100 MiB).
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// Subdirectory of the base directory that holds uploaded artifacts.
pub const UPLOADS_DIRNAME: &str = "uploads";

/// Environment variable names read by [`StorageConfig::apply_env`].
pub mod env {
    pub const PROVIDER: &str = "STOWAGE_PROVIDER";
    pub const INTEGRITY: &str = "STOWAGE_INTEGRITY";
    pub const STORAGE_DIR: &str = "STOWAGE_STORAGE_DIR";
    pub const MAX_UPLOAD_SIZE: &str = "STOWAGE_MAX_UPLOAD_SIZE";
    pub const REMOTE_ACCOUNT: &str = "STOWAGE_REMOTE_ACCOUNT";
    pub const REMOTE_CONTAINER: &str = "STOWAGE_REMOTE_CONTAINER";
    pub const REMOTE_CREDENTIAL: &str = "STOWAGE_REMOTE_CREDENTIAL";
}

/// Parameters for a remote object store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Storage account or project identifier.
    pub account: String,
    /// Container or bucket name.
    pub container: String,
    /// Optional service endpoint override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Access credential. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub credential: Option<String>,
}

impl RemoteConfig {
    /// Whether enough is configured to attempt a connection.
    pub fn has_credentials(&self) -> bool {
        !self.account.is_empty()
            && !self.container.is_empty()
            && self.credential.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// Backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider kind (e.g., "local", "memory", "azure", "s3").
    #[serde(default = "default_provider")]
    pub kind: String,
    /// Base directory for the local backend.
    #[serde(default = "default_storage_dir")]
    pub base_dir: PathBuf,
    /// Remote backend parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,
}

impl ProviderConfig {
    /// Local backend rooted at `base_dir`.
    pub fn local(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            kind: DEFAULT_PROVIDER.to_string(),
            base_dir: base_dir.into(),
            remote: None,
        }
    }

    /// Directory holding uploaded artifacts for the local backend.
    pub fn uploads_dir(&self) -> PathBuf {
        self.base_dir.join(UPLOADS_DIRNAME)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::local(DEFAULT_STORAGE_DIR)
    }
}

/// Storage configuration, resolved once at process start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend selection.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// How uploads are verified.
    #[serde(default)]
    pub integrity: IntegrityMode,
    /// Largest upload a caller should accept. Not enforced by the service.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
}

impl StorageConfig {
    /// Configuration for a local backend with the given base directory.
    pub fn local(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            provider: ProviderConfig::local(base_dir),
            ..Self::default()
        }
    }

    /// Set integrity mode.
    pub fn with_integrity(mut self, integrity: IntegrityMode) -> Self {
        self.integrity = integrity;
        self
    }

    /// Set provider kind.
    pub fn with_provider_kind(mut self, kind: impl Into<String>) -> Self {
        self.provider.kind = kind.into();
        self
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Load configuration from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&contents)
    }

    /// Overlay values from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary variable source.
    pub fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(kind) = lookup(env::PROVIDER) {
            self.provider.kind = kind.trim().to_ascii_lowercase();
        }
        if let Some(mode) = lookup(env::INTEGRITY) {
            self.integrity = mode.parse()?;
        }
        if let Some(dir) = lookup(env::STORAGE_DIR) {
            self.provider.base_dir = PathBuf::from(dir);
        }
        if let Some(size) = lookup(env::MAX_UPLOAD_SIZE) {
            self.max_upload_size = size.trim().parse().map_err(|_| {
                Error::InvalidInput(format!("{} must be a byte count", env::MAX_UPLOAD_SIZE))
            })?;
        }

        let account = lookup(env::REMOTE_ACCOUNT);
        let container = lookup(env::REMOTE_CONTAINER);
        let credential = lookup(env::REMOTE_CREDENTIAL);
        if account.is_some() || container.is_some() || credential.is_some() {
            let remote = self.provider.remote.get_or_insert_with(RemoteConfig::default);
            if let Some(account) = account {
                remote.account = account;
            }
            if let Some(container) = container {
                remote.container = container;
            }
            if credential.is_some() {
                remote.credential = credential;
            }
        }

        Ok(self)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            integrity: IntegrityMode::default(),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        }
    }
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STORAGE_DIR)
}

fn default_max_upload_size() -> u64 {
    DEFAULT_MAX_UPLOAD_SIZE
}
