//! Error types for the chevron library.
//!
//! Every failure kind of the keyring has its own variant so callers can
//! match on it. A signature that does not verify is not an error; it is
//! reported through [`crate::Verification`].

use pgp::errors::Error as PgpError;
use thiserror::Error;

/// The main error type for chevron operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Key block armor or packets are malformed
    #[error("Malformed armored data: {0}")]
    MalformedArmor(String),

    /// Signature text is neither an armored signature nor a Quanto signature
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    /// No key with this fingerprint is loaded
    #[error("Key not found: {0}")]
    UnknownKey(String),

    /// The passphrase did not decrypt the secret key material
    #[error("Invalid password or key")]
    WrongPassword,

    /// Signing was attempted before the key was unlocked
    #[error("Key {0} is locked")]
    KeyLocked(String),

    /// Key generation below the minimum modulus size
    #[error("Invalid key size {requested}: keys must be at least {minimum} bits")]
    InvalidKeySize { requested: usize, minimum: usize },

    /// The key holds no secret material
    #[error("Key {0} does not contain secret key material")]
    MissingPrivateMaterial(String),

    /// Algorithm not supported
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Cryptographic operation failed
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

/// A specialized Result type for chevron operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Translate an rpgp error raised while reading a key block.
    pub(crate) fn key_block(e: PgpError) -> Self {
        match e {
            PgpError::Unsupported { .. } => Error::UnsupportedAlgorithm(e.to_string()),
            other => Error::MalformedArmor(other.to_string()),
        }
    }

    /// Translate an rpgp error raised while reading a signature.
    pub(crate) fn signature(e: PgpError) -> Self {
        Error::MalformedSignature(e.to_string())
    }

    /// Translate an rpgp error raised while decrypting secret material.
    ///
    /// Ciphers and S2K modes rpgp cannot use (GNU dummy keys among them) are
    /// reported as such; every other failure means the passphrase was wrong.
    pub(crate) fn unlock(e: PgpError) -> Self {
        match e {
            PgpError::Unsupported { .. } => Error::UnsupportedAlgorithm(e.to_string()),
            _ => Error::WrongPassword,
        }
    }
}
