//! # fieldcrypt storage
//!
//! Durable key/value collections for fieldcrypt.
//!
//! The engine keeps two pieces of state of its own: the encrypted-types
//! registry and the reconciliation queue. Both live in named collections of
//! a [`KeyValueStore`]. Values are opaque bytes; callers own the encoding.
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - For tests and hosts that persist state elsewhere
//! - [`FileStore`] - A single-directory store: an append-only journal
//!   folded into atomically replaced snapshots
//!
//! ## Example
//!
//! ```rust
//! use fieldcrypt_storage::{KeyValueStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//! store.set("field_encrypt", "entity_types", b"\x80").unwrap();
//! assert_eq!(store.get("field_encrypt", "entity_types").unwrap(), Some(b"\x80".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::KeyValueStore;
