//! Verification functions.
//!
//! A signature that fails to verify is reported as an invalid
//! [`Verification`], never as an error. Errors are reserved for signatures
//! that cannot be decoded and for signers that are not loaded.

use log::debug;
use pgp::composed::DetachedSignature;

use crate::error::{Error, Result};
use crate::keyring::PublicMaterial;
use crate::keystore::KeyStore;
use crate::signature::{decode_signature, unknown_critical_subpacket, Signature};
use crate::types::{SignatureFormat, Verification};

/// Diagnostic for a digest whose leading bytes do not match the packet.
pub const HASH_TAG_MISMATCH: &str = "invalid signature: hash tag doesn't match";
/// Diagnostic for a signature value the key does not accept.
pub const RSA_FAILURE: &str = "invalid signature: RSA verification failure";
/// Diagnostic for a signature carrying a critical subpacket this crate does not know.
pub const UNKNOWN_CRITICAL: &str = "invalid signature: unsupported critical subpacket";

/// Verify a detached signature over `data` against `key`.
///
/// # Returns
/// A valid [`Verification`], or an invalid one whose diagnostic names the
/// failed check.
pub fn verify_packet(
    signature: &DetachedSignature,
    data: &[u8],
    key: &PublicMaterial,
) -> Verification {
    if let Some(subpacket) = unknown_critical_subpacket(&signature.signature) {
        debug!("critical subpacket not understood: {}", subpacket);
        return Verification::invalid(UNKNOWN_CRITICAL);
    }
    if !key.is_rsa() {
        return Verification::invalid(RSA_FAILURE);
    }
    match key.verify(signature, data) {
        Ok(()) => Verification::valid(),
        Err(e) => {
            let reason = e.to_string();
            debug!("{}: {}", key.key_id(), reason);
            // rpgp checks the two leading digest bytes before the RSA operation
            if reason.to_ascii_lowercase().contains("hash") {
                Verification::invalid(HASH_TAG_MISMATCH)
            } else {
                Verification::invalid(RSA_FAILURE)
            }
        }
    }
}

/// Verify a decoded signature, looking the signer up in `store`.
///
/// For Quanto signatures the fingerprint and hash fields must agree with
/// the packet they carry. A signature that names no issuer is tried
/// against every loaded key.
///
/// # Errors
/// `Error::UnknownKey` if the signer is not loaded.
pub fn verify_signature_with_store(
    store: &KeyStore,
    signature: &Signature,
    data: &[u8],
) -> Result<Verification> {
    let Some(fingerprint) = signature.fingerprint() else {
        return verify_without_issuer(store, signature, data);
    };
    let key = store.public_key(fingerprint)?;

    if let Some(problem) = signature.inconsistency() {
        debug!("{}: {}", fingerprint, problem);
        return Ok(Verification::invalid(problem));
    }

    let result = verify_packet(signature.detached(), data, &key);
    if !result.valid {
        debug!(
            "{}: signature over {} bytes rejected: {}",
            fingerprint,
            data.len(),
            result.diagnostic
        );
    }
    Ok(result)
}

fn verify_without_issuer(
    store: &KeyStore,
    signature: &Signature,
    data: &[u8],
) -> Result<Verification> {
    let candidates = store.public_materials();
    if candidates.is_empty() {
        return Err(Error::UnknownKey("signature names no issuer".to_string()));
    }

    let mut last = Verification::invalid(RSA_FAILURE);
    for (key_id, key) in candidates {
        let result = verify_packet(signature.detached(), data, &key);
        if result.valid {
            debug!("{}: signature without issuer verified", key_id);
            return Ok(result);
        }
        last = result;
    }
    Ok(last)
}

/// Decode `text` in `format` and verify it over `data`.
///
/// # Errors
/// * `Error::MalformedSignature` if `text` is not a signature in `format`
/// * `Error::UnknownKey` if the signer is not loaded
///
/// # Example
///
/// ```no_run
/// use chevron::{verify_with_store, KeyStore, SignatureFormat};
///
/// let store = KeyStore::new();
/// let sig = std::fs::read_to_string("data.sig").unwrap();
/// let result = verify_with_store(&store, b"HUEBR", &sig, SignatureFormat::Standard).unwrap();
/// if !result.valid {
///     println!("bad signature: {}", result.diagnostic);
/// }
/// ```
pub fn verify_with_store(
    store: &KeyStore,
    data: &[u8],
    text: &str,
    format: SignatureFormat,
) -> Result<Verification> {
    let signature = decode_signature(text, format)?;
    verify_signature_with_store(store, &signature, data)
}
