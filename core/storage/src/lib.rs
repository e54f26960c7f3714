//! Storage provider abstraction for Stowage.
//!
//! This module provides a trait-based interface for storage backends
//! (local filesystem, in-memory, remote object stores), the integrity
//! stream spliced into uploads, and a registry that selects a backend from
//! configuration.
//!
//! # Design Principles
//! - Provider isolation: backends only know how to store and retrieve bytes
//! - Async operations: all I/O operations are async
//! - Streaming: payloads flow through in chunks and are never held whole
//! - Unified error semantics: consistent error types across providers

pub mod integrity;
pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod remote;

pub use integrity::{sha256_hex, IntegrityHandle, IntegrityReport, IntegrityStream};
pub use local::LocalProvider;
pub use memory::MemoryProvider;
pub use provider::{chunks_stream, read_to_end, reader_stream, ByteStream, StorageProvider};
pub use registry::{create_default_registry, select_provider, ProviderFactory, ProviderRegistry};
pub use remote::RemoteProvider;
