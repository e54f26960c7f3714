//! Remote object store provider.
//!
//! Stands in for cloud object stores ("azure", "s3"). No SDK is wired in:
//! every operation fails with a distinguishable error so that a misconfigured
//! deployment never mistakes a remote kind for a working backend.

use async_trait::async_trait;
use tracing::warn;

use crate::provider::{ByteStream, StorageProvider};
use stowage_common::{Error, RemoteConfig, Result, StoredName, UploadResult};

/// Remote object store provider.
pub struct RemoteProvider {
    kind: String,
    config: Option<RemoteConfig>,
}

impl RemoteProvider {
    /// Create a provider for the remote `kind` with optional connection parameters.
    pub fn new(kind: impl Into<String>, config: Option<RemoteConfig>) -> Self {
        Self {
            kind: kind.into(),
            config,
        }
    }

    /// Container or bucket this provider targets, if configured.
    pub fn container(&self) -> Option<&str> {
        self.config.as_ref().map(|c| c.container.as_str())
    }

    /// Error for an operation on this backend.
    ///
    /// `Unavailable` without credentials, `NotImplemented` otherwise.
    fn unsupported(&self, operation: &str) -> Error {
        match &self.config {
            Some(config) if config.has_credentials() => Error::NotImplemented(format!(
                "{} is not implemented for the {} backend",
                operation, self.kind
            )),
            _ => Error::Unavailable(format!(
                "The {} backend has no credentials configured",
                self.kind
            )),
        }
    }
}

#[async_trait]
impl StorageProvider for RemoteProvider {
    fn name(&self) -> &str {
        &self.kind
    }

    async fn store(&self, name: &StoredName, _stream: ByteStream) -> Result<UploadResult> {
        let err = self.unsupported("store");
        warn!(backend = %self.kind, name = %name, error = %err, "Remote store rejected");
        Err(err)
    }

    async fn retrieve(&self, name: &StoredName) -> Result<ByteStream> {
        let err = self.unsupported("retrieve");
        warn!(backend = %self.kind, name = %name, error = %err, "Remote retrieve rejected");
        Err(err)
    }
}
