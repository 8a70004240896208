//! Keyring configuration.
//!
//! The defaults are what [`crate::KeyManager::new`] uses. Each field can be
//! overridden from the environment with [`Config::from_env`].

use std::env;

use pgp::crypto::hash::HashAlgorithm;

use crate::error::{Error, Result};
use crate::signature::parse_hash_name;

/// Smallest RSA modulus accepted for key generation.
pub const MIN_KEY_BITS: usize = 2048;

/// Comment header written on armored key blocks.
pub const DEFAULT_ARMOR_COMMENT: &str = "Generated by Chevron";

/// Environment variable selecting the hash used for new signatures.
pub const SIGNATURE_HASH_ENV: &str = "CHEVRON_SIGNATURE_HASH";
/// Environment variable raising the minimum generated key size.
pub const MIN_KEY_BITS_ENV: &str = "CHEVRON_MIN_KEY_BITS";
/// Environment variable replacing the armor comment header.
pub const ARMOR_COMMENT_ENV: &str = "CHEVRON_ARMOR_COMMENT";

/// Keyring configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Hash algorithm for new signatures.
    pub signature_hash: HashAlgorithm,

    /// Minimum RSA modulus size for key generation. Never below [`MIN_KEY_BITS`].
    pub min_key_bits: usize,

    /// `Comment` header on armored key blocks.
    pub armor_comment: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signature_hash: HashAlgorithm::Sha512,
            min_key_bits: MIN_KEY_BITS,
            armor_comment: DEFAULT_ARMOR_COMMENT.to_string(),
        }
    }
}

impl Config {
    /// Defaults overridden by any `CHEVRON_*` environment variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup(SIGNATURE_HASH_ENV) {
            config.signature_hash = parse_hash(SIGNATURE_HASH_ENV, &value)?;
        }
        if let Some(value) = lookup(MIN_KEY_BITS_ENV) {
            config = config.with_min_key_bits(parse_number(MIN_KEY_BITS_ENV, &value)?);
        }
        if let Some(value) = lookup(ARMOR_COMMENT_ENV) {
            config.armor_comment = value;
        }

        Ok(config)
    }

    pub fn with_signature_hash(mut self, hash: HashAlgorithm) -> Self {
        self.signature_hash = hash;
        self
    }

    /// Values below [`MIN_KEY_BITS`] are raised to it.
    pub fn with_min_key_bits(mut self, bits: usize) -> Self {
        self.min_key_bits = bits.max(MIN_KEY_BITS);
        self
    }

    pub fn with_armor_comment(mut self, comment: impl Into<String>) -> Self {
        self.armor_comment = comment.into();
        self
    }
}

fn parse_hash(name: &str, value: &str) -> Result<HashAlgorithm> {
    parse_hash_name(value)
        .ok_or_else(|| Error::InvalidInput(format!("{}: unknown hash algorithm {:?}", name, value)))
}

fn parse_number(name: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|e| Error::InvalidInput(format!("{}: {}", name, e)))
}
