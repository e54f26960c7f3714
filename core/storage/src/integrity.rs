//! Integrity verification spliced into an upload stream.
//!
//! [`IntegrityStream`] forwards every chunk unchanged while counting bytes
//! and, in [`IntegrityMode::Hash`], feeding a SHA-256 digest. It is purely
//! poll-driven: nothing is read from the source until the consumer asks for
//! it, and no chunk is held after it has been handed on.

use bytes::Bytes;
use futures::Stream;
use sha2::{Digest, Sha256};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::provider::ByteStream;
use stowage_common::{Error, IntegrityMode, Result};

/// Byte count and optional digest of a completed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Bytes that passed through the stream.
    pub size: u64,
    /// Lowercase hex SHA-256, present in HASH mode only.
    pub hash: Option<String>,
}

/// Pass-through stream that accounts for the bytes it forwards.
pub struct IntegrityStream {
    inner: ByteStream,
    size: u64,
    hasher: Option<Sha256>,
    report: Option<oneshot::Sender<Result<IntegrityReport>>>,
}

/// Pending result of an [`IntegrityStream`].
///
/// Resolves once the source signals end-of-data. If the source fails, or the
/// stream is dropped before reaching the end, the handle resolves to an error.
#[derive(Debug)]
pub struct IntegrityHandle {
    rx: oneshot::Receiver<Result<IntegrityReport>>,
}

impl IntegrityStream {
    /// Wrap `inner`, returning the stream and a handle to its report.
    pub fn new(inner: ByteStream, mode: IntegrityMode) -> (Self, IntegrityHandle) {
        let (tx, rx) = oneshot::channel();
        let stream = Self {
            inner,
            size: 0,
            hasher: mode.computes_hash().then(Sha256::new),
            report: Some(tx),
        };
        (stream, IntegrityHandle { rx })
    }

    /// Bytes seen so far.
    pub fn bytes_seen(&self) -> u64 {
        self.size
    }

    fn finish(&mut self) {
        if let Some(tx) = self.report.take() {
            let hash = self.hasher.take().map(|h| hex::encode(h.finalize()));
            let _ = tx.send(Ok(IntegrityReport {
                size: self.size,
                hash,
            }));
        }
    }

    fn fail(&mut self) {
        if let Some(tx) = self.report.take() {
            let _ = tx.send(Err(Error::Storage(format!(
                "Source stream failed after {} bytes",
                self.size
            ))));
        }
    }
}

impl Stream for IntegrityStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.size += chunk.len() as u64;
                if let Some(hasher) = this.hasher.as_mut() {
                    hasher.update(&chunk);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.fail();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl IntegrityHandle {
    /// Wait for the stream to complete.
    ///
    /// # Errors
    /// - Source stream failed
    /// - Stream dropped before end-of-data
    pub async fn report(self) -> Result<IntegrityReport> {
        match self.rx.await {
            Ok(report) => report,
            Err(_) => Err(Error::Storage(
                "Upload stream ended before completion".to_string(),
            )),
        }
    }
}

/// Digest `data` the same way [`IntegrityStream`] does.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{chunks_stream, read_to_end};
    use futures::StreamExt;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const HELLO_WORLD_SHA256: &str =
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[tokio::test]
    async fn test_hash_mode_reports_size_and_digest() {
        let source = chunks_stream(vec![Bytes::from_static(b"hello"), Bytes::from_static(b" world")]);
        let (stream, handle) = IntegrityStream::new(source, IntegrityMode::Hash);

        let data = read_to_end(Box::pin(stream)).await.unwrap();
        let report = handle.report().await.unwrap();

        assert_eq!(data, b"hello world");
        assert_eq!(report.size, 11);
        assert_eq!(report.hash.as_deref(), Some(HELLO_WORLD_SHA256));
    }

    #[tokio::test]
    async fn test_size_mode_skips_digest() {
        let source = chunks_stream(vec![Bytes::from_static(b"abc")]);
        let (stream, handle) = IntegrityStream::new(source, IntegrityMode::Size);

        read_to_end(Box::pin(stream)).await.unwrap();
        let report = handle.report().await.unwrap();

        assert_eq!(report, IntegrityReport { size: 3, hash: None });
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let (stream, handle) = IntegrityStream::new(chunks_stream(Vec::<Bytes>::new()), IntegrityMode::Hash);

        read_to_end(Box::pin(stream)).await.unwrap();
        let report = handle.report().await.unwrap();

        assert_eq!(report.size, 0);
        assert_eq!(report.hash.as_deref(), Some(sha256_hex(b"").as_str()));
    }

    #[tokio::test]
    async fn test_dropped_before_end_reports_error() {
        let source = chunks_stream(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        let (mut stream, handle) = IntegrityStream::new(source, IntegrityMode::Hash);

        stream.next().await.unwrap().unwrap();
        assert_eq!(stream.bytes_seen(), 1);
        drop(stream);

        assert!(handle.report().await.is_err());
    }

    #[tokio::test]
    async fn test_source_error_reports_error() {
        let source: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(Error::Storage("connection reset".to_string())),
        ]));
        let (stream, handle) = IntegrityStream::new(source, IntegrityMode::Size);

        assert!(read_to_end(Box::pin(stream)).await.is_err());
        assert!(handle.report().await.is_err());
    }

    #[tokio::test]
    async fn test_reads_only_what_consumer_takes() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let source: ByteStream = Box::pin(
            futures::stream::iter((0..4u8).map(|i| Ok::<Bytes, Error>(Bytes::from(vec![i; 16]))))
                .inspect(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
        );
        let (mut stream, mut handle) = IntegrityStream::new(source, IntegrityMode::Hash);

        assert_eq!(pulled.load(Ordering::SeqCst), 0);
        for taken in 1..=4 {
            stream.next().await.unwrap().unwrap();
            assert_eq!(pulled.load(Ordering::SeqCst), taken);
            assert!(handle.rx.try_recv().is_err());
        }

        assert!(stream.next().await.is_none());
        assert_eq!(handle.report().await.unwrap().size, 64);
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_digest(
            data in proptest::collection::vec(any::<u8>(), 0..4096),
            split in 1usize..512,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let chunks: Vec<Bytes> = data.chunks(split).map(Bytes::copy_from_slice).collect();

            let report = runtime.block_on(async {
                let (stream, handle) = IntegrityStream::new(chunks_stream(chunks), IntegrityMode::Hash);
                read_to_end(Box::pin(stream)).await.unwrap();
                handle.report().await.unwrap()
            });

            prop_assert_eq!(report.size, data.len() as u64);
            prop_assert_eq!(report.hash, Some(sha256_hex(&data)));
        }
    }
}
