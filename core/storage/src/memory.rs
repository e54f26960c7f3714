//! In-memory storage provider for testing.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::integrity::IntegrityStream;
use crate::provider::{chunks_stream, ByteStream, StorageProvider, DEFAULT_CHUNK_SIZE};
use stowage_common::{Error, IntegrityMode, Result, StoredName, UploadResult};

/// In-memory storage provider.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Counts every call that reaches it, so tests can assert
/// that invalid requests were stopped before the backend.
pub struct MemoryProvider {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
    integrity: IntegrityMode,
    calls: AtomicUsize,
}

impl MemoryProvider {
    /// Provider name as reported by [`StorageProvider::name`].
    pub const NAME: &'static str = "memory";

    /// Create a new empty memory provider.
    pub fn new(integrity: IntegrityMode) -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            integrity,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `store`/`retrieve` calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    /// Check if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_error() -> Error {
        Error::Storage("Lock poisoned".to_string())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        let objects = self.objects.read().map_err(|_| Self::lock_error())?;
        Ok(objects.contains_key(key))
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new(IntegrityMode::None)
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn store(&self, name: &StoredName, stream: ByteStream) -> Result<UploadResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let key = name.as_str();
        if self.contains(key)? {
            return Err(Error::AlreadyExists(format!("Artifact {} already exists", name)));
        }

        let (mut stream, handle) = IntegrityStream::new(stream, self.integrity);
        let mut data = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        drop(stream);
        let report = handle.report().await?;

        {
            let mut objects = self.objects.write().map_err(|_| Self::lock_error())?;
            if objects.contains_key(key) {
                return Err(Error::AlreadyExists(format!("Artifact {} already exists", name)));
            }
            objects.insert(key.to_string(), data.freeze());
        }

        Ok(UploadResult {
            filename: key.to_string(),
            path: format!("memory://{}", key),
            size: report.size,
            created_at: Utc::now(),
            hash: report.hash,
        })
    }

    async fn retrieve(&self, name: &StoredName) -> Result<ByteStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let data = {
            let objects = self.objects.read().map_err(|_| Self::lock_error())?;
            objects
                .get(name.as_str())
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("No artifact named {}", name)))?
        };

        let chunks: Vec<Bytes> = (0..data.len())
            .step_by(DEFAULT_CHUNK_SIZE)
            .map(|start| data.slice(start..(start + DEFAULT_CHUNK_SIZE).min(data.len())))
            .collect();
        Ok(chunks_stream(chunks))
    }
}
