//! In-memory key storage.
//!
//! The [`KeyStore`] maps key IDs to loaded [`crate::KeyRecord`]s and holds
//! the decrypted secret key of every record that has been unlocked. Keys
//! can be looked up by their 16 character key ID, by the full 40 character
//! fingerprint, by an 8 character short ID, or by the key ID of one of
//! their subkeys.
//!
//! # Thread Safety
//!
//! The store is `Send + Sync`. The key map sits behind a reader/writer
//! lock, so lookups of different keys never contend. Unlocking runs the
//! expensive passphrase derivation outside the map lock and serializes
//! concurrent unlocks of the same key.
//!
//! # Basic Usage
//!
//! ```no_run
//! use chevron::{parse_key_block, KeyStore};
//!
//! let text = std::fs::read_to_string("secret.asc").unwrap();
//! let store = KeyStore::new();
//!
//! let loaded = store.insert(parse_key_block(&text).unwrap());
//! store.unlock(&loaded[0], "my_password").unwrap();
//! assert!(!store.is_locked(&loaded[0]).unwrap());
//! ```

mod store;

pub use store::*;
