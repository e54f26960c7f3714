//! Upload and download orchestration over a storage provider.

use bytes::Bytes;
use futures::StreamExt;
use std::io::ErrorKind as IoErrorKind;
use std::sync::Arc;
use tracing::{debug, info, warn};

use stowage_common::{Error, IntegrityMode, Result, StorageConfig, StoredName, UploadResult};
use stowage_storage::{select_provider, ByteStream, IntegrityStream, StorageProvider};

/// Storage orchestration service.
///
/// Sits above whichever provider the configuration selects. Every call
/// validates its name first; a backend failure is always returned as an
/// error, never as a fabricated result.
pub struct StorageService {
    provider: Arc<dyn StorageProvider>,
    config: StorageConfig,
}

impl StorageService {
    /// Create a service for the provider selected by `config`.
    ///
    /// # Errors
    /// - No provider could be resolved
    pub fn new(config: StorageConfig) -> Result<Self> {
        let provider = select_provider(&config)?;
        Ok(Self::with_provider(config, provider))
    }

    /// Create a service over an explicit provider.
    ///
    /// Storage locations come from `provider`; `config` is only kept for
    /// reporting.
    pub fn with_provider(config: StorageConfig, provider: Arc<dyn StorageProvider>) -> Self {
        Self { provider, config }
    }

    /// Get the active provider.
    pub fn provider(&self) -> &Arc<dyn StorageProvider> {
        &self.provider
    }

    /// Get the configuration the service was built from.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Store `stream` under the caller-chosen stored name.
    ///
    /// # Preconditions
    /// - `name` was generated to be distinct (see [`StoredName::generate`])
    ///
    /// # Postconditions
    /// - On success the artifact is persisted and `size`/`hash` describe exactly
    ///   the bytes written
    ///
    /// # Errors
    /// - Unsafe or malformed name (before any backend access)
    /// - Name already taken
    /// - Backend failure
    pub async fn upload(&self, name: &str, stream: ByteStream) -> Result<UploadResult> {
        let name = StoredName::parse(name)?;
        self.store(name, stream).await
    }

    /// Store `stream` under a fresh stored name derived from `original`.
    pub async fn upload_file(&self, original: &str, stream: ByteStream) -> Result<UploadResult> {
        self.store(StoredName::generate(original), stream).await
    }

    /// Open a stored artifact for streaming.
    ///
    /// # Errors
    /// - Unsafe or malformed name (before any backend access)
    /// - Artifact not found
    /// - Backend failure
    pub async fn download(&self, name: &str) -> Result<ByteStream> {
        let name = StoredName::parse(name)?;
        debug!(name = %name, "Download requested");

        self.provider
            .retrieve(&name)
            .await
            .map_err(|e| normalize("download", &name, e))
    }

    /// Open a stored artifact and check it against a previously reported hash.
    ///
    /// Bytes are forwarded as they are read. If the digest of the complete
    /// artifact differs from `expected_hash`, the stream ends with an error
    /// instead of finishing cleanly.
    pub async fn download_verified(&self, name: &str, expected_hash: &str) -> Result<ByteStream> {
        let inner = self.download(name).await?;
        let expected = expected_hash.trim().to_ascii_lowercase();
        let (stream, handle) = IntegrityStream::new(inner, IntegrityMode::Hash);

        let check = futures::stream::once(async move {
            let report = handle.report().await?;
            match report.hash {
                Some(actual) if actual == expected => Ok(()),
                _ => Err(Error::Storage(
                    "Integrity check failed: content hash does not match".to_string(),
                )),
            }
        })
        .filter_map(|outcome: Result<()>| {
            futures::future::ready(outcome.err().map(Err::<Bytes, Error>))
        });

        Ok(Box::pin(stream.chain(check)))
    }

    async fn store(&self, name: StoredName, stream: ByteStream) -> Result<UploadResult> {
        debug!(name = %name, provider = self.provider.name(), "Upload received");

        self.provider
            .prepare()
            .await
            .map_err(|e| normalize("upload", &name, e))?;

        match self.provider.store(&name, stream).await {
            Ok(result) => {
                info!(
                    name = %name,
                    size = result.size,
                    hashed = result.hash.is_some(),
                    "Upload persisted"
                );
                Ok(result)
            }
            Err(e) => Err(normalize("upload", &name, e)),
        }
    }
}

/// Map a backend error to its uniform shape.
///
/// Raw I/O errors are reduced to a kind and a message free of filesystem
/// paths; the original detail only goes to the log.
fn normalize(operation: &str, name: &StoredName, err: Error) -> Error {
    let detail = err.to_string();
    let normalized = match err {
        Error::Io(e) if e.kind() == IoErrorKind::NotFound => {
            Error::NotFound(format!("No artifact named {}", name))
        }
        Error::Io(e) if e.kind() == IoErrorKind::PermissionDenied => {
            Error::Storage(format!("{} of {} was denied by the backend", operation, name))
        }
        Error::Io(e) => Error::Storage(format!("{} of {} failed: {}", operation, name, e.kind())),
        other => other,
    };

    warn!(
        operation,
        name = %name,
        kind = ?normalized.kind(),
        error = %detail,
        "Storage operation failed"
    );
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_common::ErrorKind;
    use proptest::prelude::*;
    use stowage_storage::{chunks_stream, read_to_end, sha256_hex, LocalProvider, MemoryProvider};
    use tempfile::TempDir;

    const HELLO_WORLD_SHA256: &str =
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn local_service(temp: &TempDir, mode: IntegrityMode) -> StorageService {
        StorageService::new(StorageConfig::local(temp.path()).with_integrity(mode)).unwrap()
    }

    fn memory_service(mode: IntegrityMode) -> (StorageService, Arc<MemoryProvider>) {
        let provider = Arc::new(MemoryProvider::new(mode));
        let config = StorageConfig::default()
            .with_provider_kind("memory")
            .with_integrity(mode);
        (
            StorageService::with_provider(config, provider.clone()),
            provider,
        )
    }

    fn bytes(data: &[u8]) -> ByteStream {
        chunks_stream(vec![Bytes::copy_from_slice(data)])
    }

    #[tokio::test]
    async fn test_empty_upload_in_size_mode() {
        let temp = TempDir::new().unwrap();
        let service = local_service(&temp, IntegrityMode::Size);

        let result = service.upload("empty.txt", chunks_stream(Vec::<Bytes>::new())).await.unwrap();

        assert_eq!(result.size, 0);
        assert_eq!(result.hash, None);
    }

    #[tokio::test]
    async fn test_hello_world_in_hash_mode() {
        let temp = TempDir::new().unwrap();
        let service = local_service(&temp, IntegrityMode::Hash);

        let result = service.upload("hello.txt", bytes(b"hello world")).await.unwrap();

        assert_eq!(result.size, 11);
        assert_eq!(result.hash.as_deref(), Some(HELLO_WORLD_SHA256));
    }

    #[tokio::test]
    async fn test_traversal_rejected_before_filesystem_access() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("base");
        let service = StorageService::new(StorageConfig::local(&base)).unwrap();

        for bad in ["../../etc/passwd", "../secret", "a/b", "a\\b"] {
            let err = service.download(bad).await.err().unwrap();
            assert_eq!(err.kind(), ErrorKind::Validation, "{bad}");

            let err = service.upload(bad, bytes(b"x")).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{bad}");
        }

        assert!(!base.exists());
    }

    #[tokio::test]
    async fn test_traversal_never_reaches_provider() {
        let (service, provider) = memory_service(IntegrityMode::None);

        let err = service.download("../../etc/passwd").await.err().unwrap();

        assert!(err.is_validation());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_round_trip_and_hash_match() {
        let temp = TempDir::new().unwrap();
        let service = local_service(&temp, IntegrityMode::Hash);
        let data: Vec<u8> = (0..200_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let chunks: Vec<Bytes> = data.chunks(4096).map(Bytes::copy_from_slice).collect();

        let result = service
            .upload_file("report final.pdf", chunks_stream(chunks))
            .await
            .unwrap();
        let back = read_to_end(service.download(&result.filename).await.unwrap())
            .await
            .unwrap();

        assert_eq!(back, data);
        assert_eq!(result.hash, Some(sha256_hex(&back)));
        assert!(result.filename.ends_with("-report_final.pdf"));
    }

    #[tokio::test]
    async fn test_single_byte_size() {
        let (service, _) = memory_service(IntegrityMode::Size);
        let result = service.upload("one.bin", bytes(&[0xff])).await.unwrap();
        assert_eq!(result.size, 1);
    }

    #[tokio::test]
    async fn test_colliding_originals_do_not_overwrite() {
        let temp = TempDir::new().unwrap();
        let service = Arc::new(local_service(&temp, IntegrityMode::Hash));

        let tasks: Vec<_> = (0..16u8)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    let original = if i % 2 == 0 { "my file.txt" } else { "my_file.txt" };
                    let payload = vec![i; 1024];
                    let result = service
                        .upload_file(original, bytes(&payload))
                        .await
                        .unwrap();
                    (result, payload)
                })
            })
            .collect();

        let mut names = std::collections::HashSet::new();
        for task in tasks {
            let (result, payload) = task.await.unwrap();
            assert!(names.insert(result.filename.clone()));

            let back = read_to_end(service.download(&result.filename).await.unwrap())
                .await
                .unwrap();
            assert_eq!(back, payload);
        }
    }

    #[tokio::test]
    async fn test_duplicate_stored_name_is_rejected() {
        let temp = TempDir::new().unwrap();
        let service = local_service(&temp, IntegrityMode::None);

        service.upload("taken.txt", bytes(b"one")).await.unwrap();
        let err = service.upload("taken.txt", bytes(b"two")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let service = local_service(&temp, IntegrityMode::None);

        let err = service.download("missing.txt").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_backend_failure_is_propagated() {
        let config = StorageConfig::default().with_provider_kind("azure");
        let service = StorageService::new(config).unwrap();

        let err = service.upload("file.txt", bytes(b"data")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);

        let err = service.download("file.txt").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_source_failure_is_propagated() {
        let temp = TempDir::new().unwrap();
        let service = local_service(&temp, IntegrityMode::Hash);
        let source: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"half")),
            Err(Error::Storage("client went away".to_string())),
        ]));

        assert!(service.upload("half.txt", source).await.is_err());
        let err = service.download("half.txt").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_upload_dir_created_lazily() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("lazy");
        let service = StorageService::new(StorageConfig::local(&base)).unwrap();

        assert!(!base.exists());
        service.upload("a.txt", bytes(b"a")).await.unwrap();
        assert!(base.join("uploads").is_dir());
        service.upload("b.txt", bytes(b"b")).await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_dir_follows_injected_provider() {
        let temp = TempDir::new().unwrap();
        let configured = temp.path().join("configured");
        let actual = temp.path().join("actual");
        let provider = Arc::new(LocalProvider::new(&actual, IntegrityMode::Hash));
        let service = StorageService::with_provider(StorageConfig::local(&configured), provider);

        service.upload("x.txt", bytes(b"x")).await.unwrap();
        service.upload("y.txt", bytes(b"y")).await.unwrap();

        assert!(!configured.exists());
        assert!(actual.join("uploads").join("x.txt").is_file());
        assert!(actual.join("uploads").join("y.txt").is_file());
    }

    #[tokio::test]
    async fn test_download_verified() {
        let (service, _) = memory_service(IntegrityMode::Hash);
        let result = service.upload("hello.txt", bytes(b"hello world")).await.unwrap();
        let hash = result.hash.unwrap();

        let ok = read_to_end(service.download_verified("hello.txt", &hash).await.unwrap())
            .await
            .unwrap();
        assert_eq!(ok, b"hello world");

        let wrong = sha256_hex(b"something else");
        let err = read_to_end(service.download_verified("hello.txt", &wrong).await.unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[tokio::test]
    async fn test_multi_megabyte_upload() {
        let (service, _) = memory_service(IntegrityMode::Hash);
        let data = vec![0x5au8; 5 * 1024 * 1024];
        let chunks: Vec<Bytes> = data.chunks(16 * 1024).map(Bytes::copy_from_slice).collect();

        let result = service.upload("big.bin", chunks_stream(chunks)).await.unwrap();

        assert_eq!(result.size, data.len() as u64);
        assert_eq!(result.hash, Some(sha256_hex(&data)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_local_round_trip_preserves_bytes(
            data in proptest::collection::vec(any::<u8>(), 0..16 * 1024),
            splits in proptest::collection::vec(1usize..4096, 1..8),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let mut chunks = Vec::new();
            let mut rest = data.as_slice();
            for size in splits.iter().cycle() {
                if rest.is_empty() {
                    break;
                }
                let (head, tail) = rest.split_at((*size).min(rest.len()));
                chunks.push(Bytes::copy_from_slice(head));
                rest = tail;
            }

            let (result, back) = runtime.block_on(async {
                let temp = TempDir::new().unwrap();
                let service = local_service(&temp, IntegrityMode::Hash);
                let result = service.upload("case.bin", chunks_stream(chunks)).await.unwrap();
                let back = read_to_end(service.download("case.bin").await.unwrap())
                    .await
                    .unwrap();
                (result, back)
            });

            prop_assert_eq!(&back, &data);
            prop_assert_eq!(result.size, data.len() as u64);
            prop_assert_eq!(result.hash, Some(sha256_hex(&back)));
        }
    }
}
