//! Storage orchestration for Stowage.
//!
//! [`StorageService`] is the single entry point callers use to move bytes in
//! and out of the configured backend. It validates names before any backend
//! or filesystem access, prepares the local upload directory once per
//! process, and hands back errors in a uniform shape.

pub mod service;

pub use service::StorageService;
