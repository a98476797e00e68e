//! Persistence adapters for MarkVault.
//!
//! The vault core only ever stores one opaque, already-encrypted blob per
//! vault. This module provides the trait-based contract for that (get/set of
//! bytes under a key) and a registry for resolving implementations by name.
//!
//! # Design Principles
//! - Opaque data: stores never see plaintext and never interpret the bytes
//! - Atomic replace: a `set` either fully lands or leaves the old blob intact
//! - Async operations: all I/O operations are async

pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use provider::{validate_key, BlobInfo, BlobStore};
pub use registry::{create_default_registry, StoreFactory, StoreRegistry};
