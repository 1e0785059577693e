//! # Horizon Core
//!
//! Core types shared by every Horizon crate.
//!
//! ## Key Components
//!
//! - **Keys**: [`CredentialKey`], the validated identifier of one rotatable credential
//! - **Secrets**: [`SecretString`], a zeroizing string that never prints its content
//! - **Storage**: the durable keyed [`Storage`] trait with in-memory and
//!   filesystem implementations
//!
//! ## Usage
//!
//! ```rust
//! use horizon_core::{CredentialKey, MemoryStorage};
//!
//! let key = CredentialKey::new("primary-instance").unwrap();
//! assert_eq!(key.as_str(), "primary-instance");
//!
//! let storage = MemoryStorage::new();
//! assert!(storage.is_empty());
//! ```
#![forbid(unsafe_code)]

mod error;
mod key;
mod secret;
pub mod storage;

pub use error::{StorageError, StorageResult};
pub use key::{CredentialKey, KeyError};
pub use secret::SecretString;
pub use storage::{FileStorage, MemoryStorage, Storage, StorageExt};

/// Common prelude for Horizon crates
pub mod prelude {
    pub use super::{
        CredentialKey, KeyError, SecretString, Storage, StorageError, StorageExt, StorageResult,
    };
}
