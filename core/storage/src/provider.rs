//! Storage provider trait definition.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use std::pin::Pin;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use stowage_common::{Error, Result, StoredName, UploadResult};

/// Default chunk size for streamed reads (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Byte stream type for upload/download operations.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Storage provider trait for different backends.
///
/// A provider persists a byte stream under a [`StoredName`] and hands it back
/// as a stream. Payloads are never materialized whole.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Get the provider name (e.g., "local", "memory", "azure").
    fn name(&self) -> &str;

    /// Make the backend ready to accept uploads.
    ///
    /// Runs its side effect at most once per provider and is safe to call
    /// concurrently. Backends with nothing to prepare keep the default.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Persist a stream under `name`.
    ///
    /// # Postconditions
    /// - On success the artifact is durable and `size` equals the bytes written
    /// - On failure no artifact is visible under `name`
    ///
    /// # Errors
    /// - Name already taken
    /// - Source stream failure
    /// - Backend I/O errors
    async fn store(&self, name: &StoredName, stream: ByteStream) -> Result<UploadResult>;

    /// Open a stored artifact for reading.
    ///
    /// # Errors
    /// - Artifact not found
    /// - Backend I/O errors
    async fn retrieve(&self, name: &StoredName) -> Result<ByteStream>;
}

/// Wrap an async reader as a [`ByteStream`] of `DEFAULT_CHUNK_SIZE` chunks.
pub fn reader_stream<R>(reader: R) -> ByteStream
where
    R: AsyncRead + Send + 'static,
{
    let stream = ReaderStream::with_capacity(reader, DEFAULT_CHUNK_SIZE).map_err(Error::from);
    Box::pin(stream)
}

/// Build a [`ByteStream`] from in-memory chunks.
pub fn chunks_stream<I>(chunks: I) -> ByteStream
where
    I: IntoIterator<Item = Bytes>,
    I::IntoIter: Send + 'static,
{
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok::<Bytes, Error>)))
}

/// Drain a stream into memory. Intended for small payloads and tests.
pub async fn read_to_end(mut stream: ByteStream) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    while let Some(chunk) = stream.next().await {
        data.extend_from_slice(&chunk?);
    }
    Ok(data)
}
