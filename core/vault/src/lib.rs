//! Vault engine for MarkVault.
//!
//! This module provides:
//! - The bookmark tree and its structural edits
//! - Version-stamped query caching and a bounded icon cache
//! - Session key management and inactivity auto-lock
//! - The persisted blob format, vault lifecycle and backups
//! - Conversion of Chromium bookmark files
//!
//! # Architecture
//! A [`Vault`] unlocks the blob held by a storage backend into a
//! [`Session`]. The session owns the decrypted tree and saves it back,
//! encrypted, after every successful edit.

pub mod blob;
pub mod cache;
pub mod config;
pub mod guard;
pub mod import;
pub mod keys;
pub mod manager;
pub mod session;
pub mod tree;

pub use blob::{EncryptedPayload, PersistedBlob};
pub use cache::{BoundedCache, CacheStats, EvictionPolicy, Icon, IconCache, Page, QueryCache};
pub use config::VaultSettings;
pub use guard::SessionGuard;
pub use import::convert_chromium;
pub use keys::KeyManager;
pub use manager::Vault;
pub use session::{SaveOutcome, Session, SessionHandle};
pub use tree::{Bookmark, Document, Folder, Node, Position, PreOrder, Scope, Tree};
