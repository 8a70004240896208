//! The keyring service object.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::key;
use crate::keyring::{self, encode_key_block, parse_key_block};
use crate::keystore::KeyStore;
use crate::sign::sign_with_store;
use crate::types::{KeyInfo, SignatureFormat, Verification};
use crate::verify::verify_with_store;

/// Owns a [`KeyStore`] and the [`Config`] every operation runs under.
///
/// Construct one per process and share it by reference (or through an
/// `Arc`); all methods take `&self`.
///
/// # Example
///
/// ```no_run
/// use chevron::KeyManager;
///
/// let manager = KeyManager::new();
/// let text = std::fs::read_to_string("secret.asc").unwrap();
///
/// let fp = manager.load_key(&text).unwrap().remove(0);
/// manager.unlock_key(&fp, "1234567890").unwrap();
///
/// let sig = manager.quanto_sign_data(&fp, "HUEBR").unwrap();
/// let result = manager.quanto_verify_signature("HUEBR", &sig).unwrap();
/// assert!(result.valid);
/// ```
#[derive(Default)]
pub struct KeyManager {
    store: KeyStore,
    config: Config,
}

impl KeyManager {
    /// Create a manager with an empty store and default settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            store: KeyStore::new(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    /// Key IDs of every key in an armored block, without loading it.
    pub fn list_fingerprints(&self, key_text: &str) -> Result<Vec<String>> {
        keyring::list_fingerprints(key_text)
    }

    /// Parse an armored block and add every key in it to the store.
    ///
    /// # Returns
    /// The key IDs now present in the store, in block order.
    pub fn load_key(&self, key_text: &str) -> Result<Vec<String>> {
        let records = parse_key_block(key_text)?;
        Ok(self.store.insert(records))
    }

    pub fn unlock_key(&self, fingerprint: &str, password: &str) -> Result<()> {
        self.store.unlock(fingerprint, password)
    }

    pub fn is_key_locked(&self, fingerprint: &str) -> Result<bool> {
        self.store.is_locked(fingerprint)
    }

    /// Summary of every loaded key.
    pub fn loaded_keys(&self) -> Vec<KeyInfo> {
        self.store.key_infos()
    }

    pub fn remove_key(&self, fingerprint: &str) -> Result<()> {
        self.store.remove(fingerprint).map(|_| ())
    }

    // ========================================================================
    // Signing
    // ========================================================================

    /// Sign text, returning an armored signature.
    pub fn sign_data(&self, fingerprint: &str, data: &str) -> Result<String> {
        self.sign(fingerprint, data.as_bytes(), SignatureFormat::Standard)
    }

    /// Sign text, returning a Quanto signature.
    pub fn quanto_sign_data(&self, fingerprint: &str, data: &str) -> Result<String> {
        self.sign(fingerprint, data.as_bytes(), SignatureFormat::Quanto)
    }

    /// Sign the bytes encoded in `b64data`, returning an armored signature.
    pub fn sign_base64_data(&self, fingerprint: &str, b64data: &str) -> Result<String> {
        let data = decode_payload(b64data)?;
        self.sign(fingerprint, &data, SignatureFormat::Standard)
    }

    /// Sign the bytes encoded in `b64data`, returning a Quanto signature.
    pub fn quanto_sign_base64_data(&self, fingerprint: &str, b64data: &str) -> Result<String> {
        let data = decode_payload(b64data)?;
        self.sign(fingerprint, &data, SignatureFormat::Quanto)
    }

    fn sign(&self, fingerprint: &str, data: &[u8], format: SignatureFormat) -> Result<String> {
        sign_with_store(
            &self.store,
            fingerprint,
            data,
            self.config.signature_hash,
            format,
        )
    }

    // ========================================================================
    // Verification
    // ========================================================================

    /// Verify an armored signature over text.
    pub fn verify_signature(&self, data: &str, signature: &str) -> Result<Verification> {
        verify_with_store(&self.store, data.as_bytes(), signature, SignatureFormat::Standard)
    }

    /// Verify a Quanto signature over text.
    pub fn quanto_verify_signature(&self, data: &str, signature: &str) -> Result<Verification> {
        verify_with_store(&self.store, data.as_bytes(), signature, SignatureFormat::Quanto)
    }

    /// Verify an armored signature over the bytes encoded in `b64data`.
    pub fn verify_base64_data_signature(
        &self,
        b64data: &str,
        signature: &str,
    ) -> Result<Verification> {
        let data = decode_payload(b64data)?;
        verify_with_store(&self.store, &data, signature, SignatureFormat::Standard)
    }

    /// Verify a Quanto signature over the bytes encoded in `b64data`.
    pub fn quanto_verify_base64_data_signature(
        &self,
        b64data: &str,
        signature: &str,
    ) -> Result<Verification> {
        let data = decode_payload(b64data)?;
        verify_with_store(&self.store, &data, signature, SignatureFormat::Quanto)
    }

    // ========================================================================
    // Key management
    // ========================================================================

    /// Re-encrypt an armored private key under a new password.
    ///
    /// The store is not touched; load the result to use it.
    pub fn change_key_password(
        &self,
        key_text: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<String> {
        key::change_password(key_text, current_password, new_password, &self.config)
    }

    /// Generate a new armored private key. The key is not loaded.
    pub fn generate_key(&self, password: &str, identifier: &str, bits: usize) -> Result<String> {
        key::generate_key(password, identifier, bits, &self.config)
    }

    /// Armored public key block of a loaded key.
    pub fn get_public_key(&self, fingerprint: &str) -> Result<String> {
        let record = self.store.get(fingerprint)?;
        let text = encode_key_block(&record, false, &self.config)?;
        info!("{}: public key exported", record.fingerprint());
        Ok(text)
    }
}

fn decode_payload(b64data: &str) -> Result<Vec<u8>> {
    let compact: String = b64data.split_whitespace().collect();
    STANDARD
        .decode(compact)
        .map_err(|e| Error::InvalidInput(format!("invalid base64 data: {}", e)))
}
