//! Public type definitions for the chevron library.

use std::fmt;

/// Wire encoding of a detached signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureFormat {
    /// ASCII-armored `PGP SIGNATURE` block.
    #[default]
    Standard,
    /// `FINGERPRINT_HASH_BASE64` single line.
    Quanto,
}

impl fmt::Display for SignatureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureFormat::Standard => f.write_str("standard"),
            SignatureFormat::Quanto => f.write_str("quanto"),
        }
    }
}

/// Outcome of a signature check.
///
/// A signature that does not verify is a normal result, not an error:
/// `valid` is false and `diagnostic` says why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub valid: bool,
    pub diagnostic: String,
}

impl Verification {
    pub fn valid() -> Self {
        Self {
            valid: true,
            diagnostic: String::new(),
        }
    }

    pub fn invalid(diagnostic: impl Into<String>) -> Self {
        Self {
            valid: false,
            diagnostic: diagnostic.into(),
        }
    }

    /// The `(valid, diagnostic)` pair.
    pub fn into_tuple(self) -> (bool, String) {
        (self.valid, self.diagnostic)
    }
}

/// Summary of a loaded key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    /// 16 hex character key ID
    pub fingerprint: String,
    /// 40 hex character v4 fingerprint
    pub full_fingerprint: String,
    /// First verified user ID
    pub identifier: Option<String>,
    /// Modulus size in bits
    pub bits: usize,
    /// Subkey key IDs
    pub subkeys: Vec<String>,
    /// Whether the key carries secret material
    pub has_private: bool,
    /// Whether the secret material still needs a passphrase
    pub locked: bool,
}
