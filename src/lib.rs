//! # Chevron
//!
//! An in-memory OpenPGP keyring for RSA keys, built on
//! [rpgp](https://docs.rs/pgp): load armored key blocks, unlock them with a
//! passphrase, and create or check detached signatures in two encodings.
//!
//! This library provides:
//!
//! - **Key Loading**: Parse armored public and private key blocks, with
//!   subkeys and self-signature checks
//! - **Signing/Verification**: Detached RSA signatures over text or binary data
//! - **Quanto Signatures**: A compact `FINGERPRINT_HASH_BASE64` single-line encoding
//! - **Key Management**: Generate keys, change passwords, export public keys
//!
//! ## Quick Start
//!
//! ```no_run
//! use chevron::KeyManager;
//!
//! let manager = KeyManager::new();
//!
//! // Generate a key and load it
//! let key = manager.generate_key("password", "Alice <alice@example.com>", 2048).unwrap();
//! let fp = manager.load_key(&key).unwrap().remove(0);
//! manager.unlock_key(&fp, "password").unwrap();
//!
//! // Sign and verify
//! let sig = manager.sign_data(&fp, "Hello!").unwrap();
//! assert!(manager.verify_signature("Hello!", &sig).unwrap().valid);
//! ```
//!
//! ## Signature Formats
//!
//! | Format | Shape |
//! |--------|-------|
//! | `Standard` | `-----BEGIN PGP SIGNATURE-----` armored block |
//! | `Quanto` | `CE4503B2947E2202_SHA512_wsBc...==uzle` |
//!
//! ## Design
//!
//! Keys are identified by their 16 character key ID, the last 64 bits of
//! the v4 fingerprint. The [`KeyManager`] owns a [`KeyStore`] and a
//! [`Config`]; the free functions underneath it take the store and the
//! armored text explicitly.

// Modules
mod armor;
mod config;
mod error;
mod types;

mod key;
mod keyring;
mod manager;
mod sign;
mod signature;
mod verify;

pub mod keystore;

// Re-export error types
pub use error::{Error, Result};

// Re-export configuration
pub use config::{Config, MIN_KEY_BITS};

// Re-export all public types
pub use pgp::crypto::hash::HashAlgorithm;
pub use types::{KeyInfo, SignatureFormat, Verification};

// Re-export keyring functions
pub use keyring::{
    encode_key_block, list_fingerprints, parse_key_block, KeyRecord, PublicMaterial, SigningKey,
    Subkey, UserId,
};

// Re-export signature encodings
pub use signature::{
    decode_signature, encode_signature, hash_name, parse_hash_name, parse_signature, Signature,
};

// Re-export signing and verification functions
pub use sign::{sign_message, sign_with_store};
pub use verify::{verify_packet, verify_signature_with_store, verify_with_store};

// Re-export key generation and management functions
pub use key::{change_password, generate_key, MAX_KEY_BITS};

// Re-export the keystore and its service object
pub use keystore::KeyStore;
pub use manager::KeyManager;

#[cfg(test)]
pub(crate) mod test_fixtures {
    pub const TEST_KEY: &str = include_str!("../tests/files/test_key.asc");
    pub const TEST_KEY_FINGERPRINT: &str = "CE4503B2947E2202";
    pub const TEST_KEY_PASSWORD: &str = "1234567890";
}
