//! Common utilities and types shared across Stowage modules.
//!
//! This module provides the error type, stored-name policy, integrity mode,
//! upload record and configuration used by every other crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ProviderConfig, RemoteConfig, StorageConfig};
pub use error::{Error, ErrorKind, Result};
pub use types::{IntegrityMode, StoredName, UploadResult};
