//! Stowage CLI - Command line interface for storing and retrieving files.
//!
//! This tool drives the storage service the way a network front end would:
//! it enforces the upload size limit, derives stored names, and streams
//! bytes in and out of the configured backend.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use stowage_common::{Error, IntegrityMode, StorageConfig};
use stowage_service::StorageService;
use stowage_storage::{reader_stream, ByteStream};

#[derive(Parser)]
#[command(name = "stowage")]
#[command(about = "Stowage - Streaming file storage with integrity accounting")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Commands,
}

/// Configuration sources, applied after the config file and environment.
#[derive(Args)]
struct ConfigOverrides {
    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Provider kind: "local", "memory", "azure", or "s3".
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Integrity mode: "none", "size", or "hash".
    #[arg(long, global = true)]
    integrity: Option<IntegrityMode>,

    /// Base directory for the local provider.
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file.
    Upload {
        /// File to upload.
        #[arg(short, long)]
        file: PathBuf,

        /// Display name to derive the stored name from (default: file name).
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Retrieve a stored file.
    Download {
        /// Stored name returned by `upload`.
        #[arg(short, long)]
        name: String,

        /// Destination file path.
        #[arg(short, long)]
        output: PathBuf,

        /// Fail if the content does not match this SHA-256 hash.
        #[arg(long)]
        expect_hash: Option<String>,
    },

    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = resolve_config(&cli.overrides).await?;

    match cli.command {
        Commands::Upload { file, name } => cmd_upload(config, &file, name.as_deref()).await,

        Commands::Download {
            name,
            output,
            expect_hash,
        } => cmd_download(config, &name, &output, expect_hash.as_deref()).await,

        Commands::Config => cmd_config(&config),
    }
}

/// Build the configuration: file, then environment, then flags.
async fn resolve_config(overrides: &ConfigOverrides) -> Result<StorageConfig> {
    let config = match &overrides.config {
        Some(path) => StorageConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => StorageConfig::default(),
    };

    let mut config = config
        .apply_env()
        .context("Invalid configuration in environment")?;

    if let Some(provider) = &overrides.provider {
        config.provider.kind = provider.to_ascii_lowercase();
    }
    if let Some(integrity) = overrides.integrity {
        config.integrity = integrity;
    }
    if let Some(dir) = &overrides.storage_dir {
        config.provider.base_dir = dir.clone();
    }

    Ok(config)
}

/// Reject streams that grow past `max` bytes.
fn limit_stream(stream: ByteStream, max: u64) -> ByteStream {
    let mut seen = 0u64;
    Box::pin(stream.map(move |chunk| {
        let chunk = chunk?;
        seen += chunk.len() as u64;
        if seen > max {
            return Err(Error::InvalidInput(format!(
                "Upload exceeds the {} byte limit",
                max
            )));
        }
        Ok(chunk)
    }))
}

/// Upload a file.
async fn cmd_upload(config: StorageConfig, file: &Path, name: Option<&str>) -> Result<()> {
    let max = config.max_upload_size;
    let original = match name {
        Some(name) => name.to_string(),
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("Source path has no file name")?,
    };

    let source = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let declared = source.metadata().await?.len();
    if declared > max {
        anyhow::bail!("File is {} bytes; the limit is {} bytes", declared, max);
    }

    info!("Uploading {} as {}", file.display(), original);

    let service = StorageService::new(config).context("Failed to initialize storage")?;
    let result = service
        .upload_file(&original, limit_stream(reader_stream(source), max))
        .await
        .context("Upload failed")?;

    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}

/// Download a stored file.
async fn cmd_download(
    config: StorageConfig,
    name: &str,
    output: &Path,
    expect_hash: Option<&str>,
) -> Result<()> {
    info!("Downloading {} to {}", name, output.display());

    let service = StorageService::new(config).context("Failed to initialize storage")?;
    let stream = match expect_hash {
        Some(hash) => service.download_verified(name, hash).await,
        None => service.download(name).await,
    }
    .context("Download failed")?;

    write_output(stream, output).await?;

    println!("File downloaded: {}", output.display());

    Ok(())
}

/// Stream into a temporary file next to `output`, then move it into place.
///
/// `output` is only replaced once every byte has been written and synced; on
/// failure the temporary file is dropped and `output` is left as it was.
async fn write_output(mut stream: ByteStream, output: &Path) -> Result<u64> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let temp = tempfile::Builder::new()
        .prefix(".stowage-download-")
        .tempfile_in(dir)
        .with_context(|| format!("Failed to create a temporary file in {}", dir.display()))?;
    let mut file = tokio::fs::File::from_std(temp.reopen()?);

    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Download interrupted")?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    temp.persist(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    Ok(written)
}

/// Print the effective configuration.
fn cmd_config(config: &StorageConfig) -> Result<()> {
    println!("{}", config.to_json()?);
    Ok(())
}
