//! Signing functions.
//!
//! This module creates detached signatures with keys held by a
//! [`KeyStore`]. The secret key is only borrowed from the store for the
//! duration of the RSA operation.

use log::debug;
use pgp::composed::DetachedSignature;
use pgp::crypto::hash::HashAlgorithm;

use crate::error::{Error, Result};
use crate::keyring::SigningKey;
use crate::keystore::KeyStore;
use crate::signature::{encode_signature, Signature};
use crate::types::SignatureFormat;

/// Create a binary document signature over `data`.
///
/// # Arguments
/// * `key` - The unlocked signing key
/// * `data` - The data to sign
/// * `hash` - Digest algorithm
pub fn sign_message(
    key: &SigningKey,
    data: &[u8],
    hash: HashAlgorithm,
) -> Result<DetachedSignature> {
    if !key.is_rsa() {
        return Err(Error::UnsupportedAlgorithm(format!(
            "key {} is not an RSA key",
            key.key_id()
        )));
    }
    key.sign(data, hash)
        .map_err(|e| Error::Crypto(e.to_string()))
}

/// Sign `data` with a stored key and encode the result in `format`.
///
/// # Errors
/// * `Error::UnknownKey` if no key matches `fingerprint`
/// * `Error::KeyLocked` if the key has not been unlocked
/// * `Error::MissingPrivateMaterial` if the key is public only
///
/// # Example
///
/// ```no_run
/// use chevron::{parse_key_block, sign_with_store, HashAlgorithm, KeyStore, SignatureFormat};
///
/// let store = KeyStore::new();
/// let text = std::fs::read_to_string("secret.asc").unwrap();
/// let fp = store.insert(parse_key_block(&text).unwrap()).remove(0);
/// store.unlock(&fp, "password").unwrap();
///
/// let sig = sign_with_store(&store, &fp, b"HUEBR", HashAlgorithm::Sha512, SignatureFormat::Quanto)
///     .unwrap();
/// assert!(sig.starts_with(&fp));
/// ```
pub fn sign_with_store(
    store: &KeyStore,
    fingerprint: &str,
    data: &[u8],
    hash: HashAlgorithm,
    format: SignatureFormat,
) -> Result<String> {
    let signature = store.with_signing_key(fingerprint, |key, key_id| {
        let detached = sign_message(key, data, hash)?;
        Ok(Signature::signed_by(format, detached, key_id))
    })?;
    let text = encode_signature(&signature, format)?;
    debug!(
        "{}: signed {} bytes ({} signature)",
        signature.fingerprint().unwrap_or_default(),
        data.len(),
        format
    );
    Ok(text)
}
