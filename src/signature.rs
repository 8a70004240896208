//! Detached signature encodings.
//!
//! A [`Signature`] wraps one rpgp detached signature together with the
//! identity of its signer. It travels in one of two encodings:
//!
//! - **Standard**: an ASCII-armored `PGP SIGNATURE` block.
//! - **Quanto**: a single line `FINGERPRINT_HASH_BASE64`, where the last
//!   field is the base64 packet with its CRC24 appended as `=XXXX`.
//!   `$` is accepted in place of `_`.

use std::io::Cursor;
use std::time::SystemTime;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use pgp::composed::{Deserializable, DetachedSignature};
use pgp::crypto::hash::HashAlgorithm;
use pgp::packet::{self, SubpacketData};
use pgp::ser::Serialize;

use crate::armor::{self, ArmoredBlock, SIGNATURE_LABEL};
use crate::error::{Error, Result};
use crate::keystore::normalize_fingerprint;
use crate::types::SignatureFormat;

/// Name of a hash algorithm in the Quanto encoding.
pub fn hash_name(hash: HashAlgorithm) -> Option<&'static str> {
    match hash {
        HashAlgorithm::Md5 => Some("MD5"),
        HashAlgorithm::Sha1 => Some("SHA1"),
        HashAlgorithm::Ripemd160 => Some("RIPEMD160"),
        HashAlgorithm::Sha256 => Some("SHA256"),
        HashAlgorithm::Sha384 => Some("SHA384"),
        HashAlgorithm::Sha512 => Some("SHA512"),
        HashAlgorithm::Sha224 => Some("SHA224"),
        _ => None,
    }
}

/// Hash algorithm from its Quanto name, ignoring case. `SHA-512` style
/// names are accepted as well.
pub fn parse_hash_name(name: &str) -> Option<HashAlgorithm> {
    let name = name.trim().to_ascii_uppercase().replace('-', "");
    [
        HashAlgorithm::Sha1,
        HashAlgorithm::Ripemd160,
        HashAlgorithm::Sha224,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
    ]
    .into_iter()
    .find(|hash| hash_name(*hash) == Some(name.as_str()))
}

/// Issuer key ID named by a signature packet, as 16 uppercase hex characters.
///
/// An issuer fingerprint subpacket wins over an issuer key ID subpacket.
pub(crate) fn issuer_key_id(sig: &packet::Signature) -> Option<String> {
    let config = sig.config()?;
    let subpackets = || {
        config
            .hashed_subpackets
            .iter()
            .chain(config.unhashed_subpackets.iter())
    };
    let from_fingerprint = subpackets().find_map(|sp| match &sp.data {
        SubpacketData::IssuerFingerprint(fp) => {
            let bytes = fp.as_bytes();
            bytes
                .len()
                .checked_sub(8)
                .map(|start| hex::encode_upper(&bytes[start..]))
        }
        _ => None,
    });
    from_fingerprint.or_else(|| {
        subpackets().find_map(|sp| match &sp.data {
            SubpacketData::IssuerKeyId(id) => Some(hex::encode_upper(id.as_ref())),
            _ => None,
        })
    })
}

/// First hashed subpacket marked critical that this crate does not know.
pub(crate) fn unknown_critical_subpacket(sig: &packet::Signature) -> Option<String> {
    let config = sig.config()?;
    config
        .hashed_subpackets
        .iter()
        .find(|sp| sp.is_critical && matches!(sp.data, SubpacketData::Other(..)))
        .map(|sp| format!("{:?}", sp.data))
}

fn packet_hash(sig: &packet::Signature) -> Option<HashAlgorithm> {
    sig.config().map(|config| config.hash_alg)
}

/// A decoded detached signature.
#[derive(Debug, Clone)]
pub struct Signature {
    format: SignatureFormat,
    fingerprint: Option<String>,
    hash: Option<HashAlgorithm>,
    inner: DetachedSignature,
}

impl Signature {
    /// Wrap a signature, taking signer and hash from the packet itself.
    ///
    /// Version 3 signatures carry no issuer subpacket, so the signer may be
    /// unknown.
    pub fn from_detached(format: SignatureFormat, inner: DetachedSignature) -> Self {
        Self {
            format,
            fingerprint: issuer_key_id(&inner.signature),
            hash: packet_hash(&inner.signature),
            inner,
        }
    }

    /// A signature just made by `key_id`.
    pub(crate) fn signed_by(
        format: SignatureFormat,
        inner: DetachedSignature,
        key_id: &str,
    ) -> Self {
        let mut signature = Self::from_detached(format, inner);
        signature.fingerprint = Some(key_id.to_string());
        signature
    }

    pub fn format(&self) -> SignatureFormat {
        self.format
    }

    /// Signer key ID as named by the encoding.
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Hash algorithm as named by the encoding.
    pub fn hash(&self) -> Option<HashAlgorithm> {
        self.hash
    }

    pub fn packet(&self) -> &packet::Signature {
        &self.inner.signature
    }

    pub fn detached(&self) -> &DetachedSignature {
        &self.inner
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        let config = self.inner.signature.config()?;
        config.hashed_subpackets.iter().find_map(|sp| match &sp.data {
            SubpacketData::SignatureCreationTime(t) => {
                let time: SystemTime = (*t).into();
                Some(DateTime::from(time))
            }
            _ => None,
        })
    }

    /// Serialized signature packet, header included.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.inner
            .signature
            .to_writer_with_header(&mut out)
            .map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(out)
    }

    /// Same signature in another encoding.
    pub fn with_format(mut self, format: SignatureFormat) -> Self {
        self.format = format;
        self
    }

    /// Differences between what the encoding claims and what the packet says.
    pub(crate) fn inconsistency(&self) -> Option<String> {
        let packet = &self.inner.signature;
        if let (Some(issuer), Some(claimed)) = (issuer_key_id(packet), &self.fingerprint) {
            if &issuer != claimed {
                return Some(format!(
                    "signature issuer {} does not match fingerprint {}",
                    issuer, claimed
                ));
            }
        }
        let actual = packet_hash(packet);
        if self.hash != actual {
            let describe = |hash: Option<HashAlgorithm>| match hash {
                Some(h) => hash_name(h).map_or_else(|| format!("{:?}", h), str::to_string),
                None => "unknown".to_string(),
            };
            return Some(format!(
                "hash algorithm {} does not match signature hash algorithm {}",
                describe(self.hash),
                describe(actual)
            ));
        }
        None
    }
}

/// Parse a signature in either encoding.
///
/// Armor framing means Standard; anything else is tried as Quanto.
///
/// # Errors
/// `Error::MalformedSignature` if the text fits neither encoding.
pub fn parse_signature(text: &str) -> Result<Signature> {
    if text.trim_start().starts_with("-----BEGIN PGP") {
        decode_signature(text, SignatureFormat::Standard)
    } else {
        decode_signature(text, SignatureFormat::Quanto)
    }
}

/// Parse a signature that must be in `format`.
pub fn decode_signature(text: &str, format: SignatureFormat) -> Result<Signature> {
    match format {
        SignatureFormat::Standard => decode_standard(text),
        SignatureFormat::Quanto => decode_quanto(text),
    }
}

fn decode_standard(text: &str) -> Result<Signature> {
    let blocks = armor::parse_blocks(text).map_err(Error::MalformedSignature)?;
    let block = blocks
        .into_iter()
        .next()
        .ok_or_else(|| Error::MalformedSignature("no armored block found".to_string()))?;
    if block.label() != SIGNATURE_LABEL {
        return Err(Error::MalformedSignature(format!(
            "expected a signature block, found {}",
            block.label()
        )));
    }
    let data = block.decode().map_err(Error::MalformedSignature)?;
    let inner = DetachedSignature::from_bytes(Cursor::new(&data)).map_err(Error::signature)?;
    Ok(Signature::from_detached(SignatureFormat::Standard, inner))
}

fn decode_quanto(text: &str) -> Result<Signature> {
    let fields: Vec<&str> = text.trim().split(['_', '$']).collect();
    let [fingerprint, hash, body] = fields.as_slice() else {
        return Err(Error::MalformedSignature(format!(
            "expected three fields in a quanto signature, found {}",
            fields.len()
        )));
    };

    let fingerprint = normalize_fingerprint(fingerprint);
    if !matches!(fingerprint.len(), 16 | 40) || hex::decode(&fingerprint).is_err() {
        return Err(Error::MalformedSignature(format!(
            "invalid fingerprint {:?}",
            fingerprint
        )));
    }
    let hash = parse_hash_name(hash)
        .ok_or_else(|| Error::MalformedSignature(format!("unknown hash algorithm {:?}", hash)))?;

    let data = ArmoredBlock::from_body(SIGNATURE_LABEL, body)
        .decode()
        .map_err(Error::MalformedSignature)?;
    let inner = DetachedSignature::from_bytes(Cursor::new(&data)).map_err(Error::signature)?;

    Ok(Signature {
        format: SignatureFormat::Quanto,
        // hex checked above, so the string is ASCII
        fingerprint: Some(fingerprint[fingerprint.len() - 16..].to_string()),
        hash: Some(hash),
        inner,
    })
}

/// Encode a signature in `format`.
pub fn encode_signature(signature: &Signature, format: SignatureFormat) -> Result<String> {
    match format {
        SignatureFormat::Standard => signature
            .inner
            .to_armored_string(None.into())
            .map_err(|e| Error::Crypto(e.to_string())),
        SignatureFormat::Quanto => {
            let fingerprint = signature.fingerprint().ok_or_else(|| {
                Error::MalformedSignature("signature names no issuer".to_string())
            })?;
            let hash = signature
                .hash
                .and_then(hash_name)
                .ok_or_else(|| Error::UnsupportedAlgorithm(format!("{:?}", signature.hash)))?;
            let data = signature.to_bytes()?;
            Ok(format!(
                "{}_{}_{}={}",
                fingerprint,
                hash,
                STANDARD.encode(&data),
                armor::checksum(&data)
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::{key_id_hex, parse_key_block, SigningKey};
    use crate::test_fixtures::{TEST_KEY, TEST_KEY_FINGERPRINT, TEST_KEY_PASSWORD};

    fn sample() -> Signature {
        let record = parse_key_block(TEST_KEY).unwrap().remove(0);
        let unlocked = record.unlock(TEST_KEY_PASSWORD).unwrap();
        let key: &SigningKey = unlocked.get(TEST_KEY_FINGERPRINT).unwrap();
        let detached = key.sign(b"HUEBR", HashAlgorithm::Sha512).unwrap();
        Signature::from_detached(SignatureFormat::Standard, detached)
    }

    #[test]
    fn test_hash_names() {
        assert_eq!(parse_hash_name("sha512"), Some(HashAlgorithm::Sha512));
        assert_eq!(parse_hash_name("SHA-256"), Some(HashAlgorithm::Sha256));
        assert_eq!(parse_hash_name("MD5"), None);
        assert_eq!(parse_hash_name("WHIRLPOOL"), None);
        assert_eq!(hash_name(HashAlgorithm::Sha1), Some("SHA1"));
    }

    #[test]
    fn test_standard_encoding() {
        let sig = sample();
        assert_eq!(sig.fingerprint(), Some(TEST_KEY_FINGERPRINT));
        let text = encode_signature(&sig, SignatureFormat::Standard).unwrap();
        assert!(text.starts_with("-----BEGIN PGP SIGNATURE-----"));

        let parsed = parse_signature(&text).unwrap();
        assert_eq!(parsed.format(), SignatureFormat::Standard);
        assert_eq!(parsed.fingerprint(), Some(TEST_KEY_FINGERPRINT));
        assert_eq!(parsed.hash(), Some(HashAlgorithm::Sha512));
        assert_eq!(parsed.to_bytes().unwrap(), sig.to_bytes().unwrap());
        assert!(parsed.created().is_some());
    }

    #[test]
    fn test_quanto_encoding() {
        let sig = sample();
        let text = encode_signature(&sig, SignatureFormat::Quanto).unwrap();
        assert!(text.starts_with(&format!("{}_SHA512_", TEST_KEY_FINGERPRINT)));
        assert!(!text.contains('\n'));

        let parsed = parse_signature(&text).unwrap();
        assert_eq!(parsed.format(), SignatureFormat::Quanto);
        assert_eq!(parsed.to_bytes().unwrap(), sig.to_bytes().unwrap());
        assert_eq!(parsed.inconsistency(), None);

        let dollar = text.replacen('_', "$", 2);
        assert_eq!(
            parse_signature(&dollar).unwrap().to_bytes().unwrap(),
            sig.to_bytes().unwrap()
        );
    }

    #[test]
    fn test_quanto_without_checksum() {
        let sig = sample();
        let text = encode_signature(&sig, SignatureFormat::Quanto).unwrap();
        let stripped = &text[..text.len() - 5];
        assert_eq!(
            parse_signature(stripped).unwrap().to_bytes().unwrap(),
            sig.to_bytes().unwrap()
        );
    }

    #[test]
    fn test_quanto_full_fingerprint_field() {
        let sig = sample();
        let record = parse_key_block(TEST_KEY).unwrap().remove(0);
        assert_eq!(key_id_hex(record.public_key()), TEST_KEY_FINGERPRINT);
        let text = encode_signature(&sig, SignatureFormat::Quanto).unwrap();
        let long = text.replacen(TEST_KEY_FINGERPRINT, record.full_fingerprint(), 1);
        let parsed = parse_signature(&long).unwrap();
        assert_eq!(parsed.fingerprint(), Some(TEST_KEY_FINGERPRINT));
    }

    #[test]
    fn test_quanto_claims_checked() {
        let sig = sample();
        let text = encode_signature(&sig, SignatureFormat::Quanto).unwrap();

        let wrong_hash = text.replacen("SHA512", "SHA256", 1);
        assert!(parse_signature(&wrong_hash)
            .unwrap()
            .inconsistency()
            .unwrap()
            .contains("hash algorithm"));

        let wrong_fp = format!("0123456789ABCDEF{}", &text[16..]);
        assert!(parse_signature(&wrong_fp)
            .unwrap()
            .inconsistency()
            .unwrap()
            .contains("does not match fingerprint"));
    }

    #[test]
    fn test_malformed_signatures() {
        for text in [
            "",
            "just some text",
            "A_B",
            "CE4503B2947E2202_SHA512_!!!!",
            "CE4503B2947E2202_MD5_AAAA",
            "XYZ_SHA512_AAAA",
            "CE4503B2947E2202_SHA512_SFVFQlI=",
            "-----BEGIN PGP MESSAGE-----\n\nAAAA\n-----END PGP MESSAGE-----",
        ] {
            assert!(
                matches!(parse_signature(text), Err(Error::MalformedSignature(_))),
                "accepted {:?}",
                text
            );
        }
    }

    #[test]
    fn test_wrong_format_rejected() {
        let sig = sample();
        let quanto = encode_signature(&sig, SignatureFormat::Quanto).unwrap();
        assert!(decode_signature(&quanto, SignatureFormat::Standard).is_err());
        let standard = encode_signature(&sig, SignatureFormat::Standard).unwrap();
        assert!(decode_signature(&standard, SignatureFormat::Quanto).is_err());
    }
}
