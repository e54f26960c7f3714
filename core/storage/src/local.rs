//! Local filesystem storage provider.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::integrity::{IntegrityReport, IntegrityStream};
use crate::provider::{reader_stream, ByteStream, StorageProvider, DEFAULT_CHUNK_SIZE};
use stowage_common::config::UPLOADS_DIRNAME;
use stowage_common::{Error, IntegrityMode, Result, StoredName, UploadResult};

/// Prefix of in-flight upload files. Never a valid [`StoredName`].
const PARTIAL_PREFIX: &str = ".partial-";

/// Local filesystem storage provider.
///
/// Artifacts live at `<base>/uploads/<name>`. Uploads are written to a hidden
/// partial file first and only published under their name once flushed,
/// synced and accounted for.
///
/// Publishing uses a hard link so that an existing name is never replaced.
/// The base directory must therefore live on a filesystem that supports hard
/// links; on FAT or link-less FUSE/network mounts every upload fails with an
/// I/O error.
pub struct LocalProvider {
    base_dir: PathBuf,
    uploads_dir: PathBuf,
    integrity: IntegrityMode,
    uploads_ready: OnceCell<()>,
}

impl LocalProvider {
    /// Provider name as reported by [`StorageProvider::name`].
    pub const NAME: &'static str = "local";

    /// Create a new local provider rooted at `base_dir`.
    ///
    /// Only records the directory; nothing is created until the first upload.
    pub fn new(base_dir: impl AsRef<Path>, integrity: IntegrityMode) -> Self {
        let base_dir = base_dir.as_ref().to_path_buf();
        let uploads_dir = base_dir.join(UPLOADS_DIRNAME);
        Self {
            base_dir,
            uploads_dir,
            integrity,
            uploads_ready: OnceCell::new(),
        }
    }

    /// Base directory of this provider.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory holding uploaded artifacts.
    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Create the upload directory if it is missing.
    ///
    /// Only the first successful call touches the filesystem. Safe to call
    /// concurrently; an existing directory is not an error.
    pub async fn ensure_uploads_dir(&self) -> Result<()> {
        self.uploads_ready
            .get_or_try_init(|| async {
                match fs::create_dir_all(&self.uploads_dir).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                    Err(e) => return Err(Error::from(e)),
                }
                debug!(dir = %self.uploads_dir.display(), "Upload directory ready");
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// Resolve `name` to an existing file strictly inside the upload directory.
    async fn resolve_existing(&self, name: &StoredName) -> Result<PathBuf> {
        let raw = name.as_str();
        if raw.contains('/') || raw.contains('\\') || raw.contains("..") {
            return Err(Error::InvalidInput(
                "Name cannot contain path separators or parent segments".to_string(),
            ));
        }

        let not_found = || Error::NotFound(format!("No artifact named {}", name));

        let root = fs::canonicalize(&self.uploads_dir)
            .await
            .map_err(|_| not_found())?;
        let candidate = fs::canonicalize(root.join(raw))
            .await
            .map_err(|_| not_found())?;

        if candidate == root || !candidate.starts_with(&root) {
            warn!(name = %name, "Resolved path escapes the upload directory");
            return Err(Error::InvalidInput(
                "Name resolves outside the upload directory".to_string(),
            ));
        }

        let meta = fs::metadata(&candidate).await.map_err(|_| not_found())?;
        if !meta.is_file() {
            return Err(not_found());
        }

        Ok(candidate)
    }

    /// Stream `source` into `file`, returning the accounting for what was written.
    async fn write_stream(&self, file: File, source: ByteStream) -> Result<IntegrityReport> {
        let (mut stream, handle) = match self.integrity {
            IntegrityMode::None => (source, None),
            mode => {
                let (stream, handle) = IntegrityStream::new(source, mode);
                (Box::pin(stream) as ByteStream, Some(handle))
            }
        };

        let mut writer = BufWriter::with_capacity(DEFAULT_CHUNK_SIZE, file);
        while let Some(chunk) = stream.next().await {
            writer.write_all(&chunk?).await?;
        }
        writer.flush().await?;
        drop(stream);

        let file = writer.into_inner();
        file.sync_all().await?;
        let written = file.metadata().await?.len();

        match handle {
            None => Ok(IntegrityReport {
                size: written,
                hash: None,
            }),
            Some(handle) => {
                let report = handle.report().await?;
                if report.size != written {
                    return Err(Error::Storage(format!(
                        "Size mismatch: streamed {} bytes, persisted {}",
                        report.size, written
                    )));
                }
                Ok(report)
            }
        }
    }
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn prepare(&self) -> Result<()> {
        self.ensure_uploads_dir().await
    }

    async fn store(&self, name: &StoredName, stream: ByteStream) -> Result<UploadResult> {
        self.ensure_uploads_dir().await?;

        let target = self.uploads_dir.join(name.as_str());
        if fs::try_exists(&target).await? {
            return Err(Error::AlreadyExists(format!("Artifact {} already exists", name)));
        }

        debug!(name = %name, mode = %self.integrity, "Streaming upload");

        let (partial, file) = PartialFile::create(&self.uploads_dir).await?;
        let report = self.write_stream(file, stream).await?;
        partial.publish(&target).await?;

        info!(name = %name, size = report.size, "Upload persisted");

        Ok(UploadResult {
            filename: name.to_string(),
            path: target.display().to_string(),
            size: report.size,
            created_at: Utc::now(),
            hash: report.hash,
        })
    }

    async fn retrieve(&self, name: &StoredName) -> Result<ByteStream> {
        let path = self.resolve_existing(name).await?;
        let file = File::open(&path)
            .await
            .map_err(|_| Error::NotFound(format!("No artifact named {}", name)))?;

        debug!(name = %name, "Streaming download");
        Ok(reader_stream(file))
    }
}

/// In-flight upload file, removed on drop unless published.
///
/// Dropping the upload future mid-stream drops this guard, so an aborted
/// upload never leaves a truncated artifact behind.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    async fn create(dir: &Path) -> Result<(Self, File)> {
        let path = dir.join(format!("{}{}", PARTIAL_PREFIX, Uuid::new_v4()));
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        Ok((Self { path, armed: true }, file))
    }

    /// Make the partial file visible at `target` without replacing anything there.
    async fn publish(mut self, target: &Path) -> Result<()> {
        match fs::hard_link(&self.path, target).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyExists(format!(
                    "Artifact {} already exists",
                    target
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default()
                )));
            }
            Err(e) => return Err(e.into()),
        }

        self.armed = false;
        if let Err(e) = fs::remove_file(&self.path).await {
            warn!(error = %e, "Failed to remove partial upload file");
        }
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
