//! Key blocks.
//!
//! This module turns armored key blocks into [`KeyRecord`]s and back. rpgp
//! parses the individual packets; records are assembled here because a block
//! may hold several keys and may repeat its primary key packet, which rpgp's
//! composed key parser would read as a second key. Every primary key packet
//! opens a new record and the user IDs, subkeys and signatures that follow
//! attach to it.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use pgp::composed::{
    DetachedSignature, SignedKeyDetails, SignedPublicKey, SignedPublicSubKey, SignedSecretKey,
    SignedSecretSubKey,
};
use pgp::crypto::hash::HashAlgorithm;
use pgp::errors::Error as PgpError;
use pgp::packet::{
    Packet, PacketParser, PublicKey, PublicSubkey, SecretKey, SecretSubkey, Signature,
    SignatureType, UserId as UserIdPacket,
};
use pgp::ser::Serialize;
use pgp::types::{KeyDetails, Password, PublicParams, SignedUser};
use rand::thread_rng;

use crate::armor;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::signature::issuer_key_id;

/// `Version` header on armored key blocks.
pub(crate) const ARMOR_VERSION: &str = concat!("Chevron ", env!("CARGO_PKG_VERSION"));

/// 16 hex character key ID, uppercase.
pub(crate) fn key_id_hex(key: &impl KeyDetails) -> String {
    hex::encode_upper(key.legacy_key_id().as_ref())
}

/// 40 hex character fingerprint, uppercase.
pub(crate) fn fingerprint_hex(key: &impl KeyDetails) -> String {
    hex::encode_upper(key.fingerprint().as_bytes())
}

/// Modulus size from a serialized v4 RSA key body.
fn rsa_bits(body: &[u8]) -> usize {
    match body.get(6..8) {
        Some(&[hi, lo]) => usize::from(u16::from_be_bytes([hi, lo])),
        _ => 0,
    }
}

/// Append `0x99 || u16 length || body`, the form keys take in signed data.
fn hash_key_body(out: &mut Vec<u8>, body: &[u8]) -> Option<()> {
    let len = u16::try_from(body.len()).ok()?;
    out.push(0x99);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(body);
    Some(())
}

/// Signed data of a user ID certification.
fn certification_data(key_body: &[u8], id: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    hash_key_body(&mut out, key_body)?;
    let len = u32::try_from(id.len()).ok()?;
    out.push(0xB4);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(id);
    Some(out)
}

/// Public half of a primary key or a subkey.
#[derive(Debug, Clone)]
pub enum PublicMaterial {
    Primary(PublicKey),
    Subkey(PublicSubkey),
}

impl PublicMaterial {
    /// 16 hex character key ID.
    pub fn key_id(&self) -> String {
        match self {
            PublicMaterial::Primary(key) => key_id_hex(key),
            PublicMaterial::Subkey(key) => key_id_hex(key),
        }
    }

    pub fn is_rsa(&self) -> bool {
        let params = match self {
            PublicMaterial::Primary(key) => key.public_params(),
            PublicMaterial::Subkey(key) => key.public_params(),
        };
        matches!(params, PublicParams::RSA(_))
    }

    /// Check a detached signature over `data`.
    pub(crate) fn verify(
        &self,
        signature: &DetachedSignature,
        data: &[u8],
    ) -> pgp::errors::Result<()> {
        match self {
            PublicMaterial::Primary(key) => signature.verify(key, data),
            PublicMaterial::Subkey(key) => signature.verify(key, data),
        }
    }
}

/// Secret key material after a successful unlock.
///
/// The passphrase protection has been removed, so the key signs without one.
#[derive(Debug, Clone)]
pub enum SigningKey {
    Primary(SecretKey),
    Subkey(SecretSubkey),
}

impl SigningKey {
    pub fn key_id(&self) -> String {
        match self {
            SigningKey::Primary(key) => key_id_hex(key),
            SigningKey::Subkey(key) => key_id_hex(key),
        }
    }

    pub fn is_rsa(&self) -> bool {
        let params = match self {
            SigningKey::Primary(key) => key.public_params(),
            SigningKey::Subkey(key) => key.public_params(),
        };
        matches!(params, PublicParams::RSA(_))
    }

    /// Binary document signature over `data`.
    pub(crate) fn sign(
        &self,
        data: &[u8],
        hash: HashAlgorithm,
    ) -> pgp::errors::Result<DetachedSignature> {
        let mut rng = thread_rng();
        let password = Password::empty();
        match self {
            SigningKey::Primary(key) => DetachedSignature::sign_binary_data(
                &mut rng,
                key,
                &password,
                hash,
                Cursor::new(data),
            ),
            SigningKey::Subkey(key) => DetachedSignature::sign_binary_data(
                &mut rng,
                key,
                &password,
                hash,
                Cursor::new(data),
            ),
        }
    }
}

/// A user ID and the signatures made over it.
#[derive(Debug, Clone)]
pub struct UserId {
    packet: UserIdPacket,
    signatures: Vec<Signature>,
    verified: bool,
}

impl UserId {
    /// The user ID text. Invalid UTF-8 is replaced.
    pub fn value(&self) -> String {
        String::from_utf8_lossy(self.packet.id()).into_owned()
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Whether a self-certification by the primary key verifies.
    pub fn is_verified(&self) -> bool {
        self.verified
    }
}

/// A subkey and its binding signatures.
#[derive(Debug, Clone)]
pub struct Subkey {
    public: PublicMaterial,
    body: Vec<u8>,
    secret: Option<SecretSubkey>,
    has_private: bool,
    signatures: Vec<Signature>,
    fingerprint: String,
    bound: bool,
}

impl Subkey {
    fn new(public: PublicSubkey, body: Vec<u8>, secret: Option<SecretSubkey>) -> Self {
        Self {
            fingerprint: key_id_hex(&public),
            public: PublicMaterial::Subkey(public),
            body,
            has_private: secret.is_some(),
            secret,
            signatures: Vec::new(),
            bound: false,
        }
    }

    /// A repeated primary key packet kept as a subkey entry.
    fn repeated(primary: PublicKey, body: Vec<u8>, has_private: bool) -> Self {
        Self {
            fingerprint: key_id_hex(&primary),
            public: PublicMaterial::Primary(primary),
            body,
            secret: None,
            has_private,
            signatures: Vec::new(),
            bound: false,
        }
    }

    /// 16 hex character key ID.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn public_key(&self) -> &PublicMaterial {
        &self.public
    }

    pub fn has_private(&self) -> bool {
        self.has_private
    }

    /// Whether a binding signature by the primary key verifies.
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Whether this entry repeats the primary key packet.
    pub fn is_repeated_primary(&self) -> bool {
        matches!(self.public, PublicMaterial::Primary(_))
    }
}

/// Identity and material of one key.
///
/// The record only ever holds secret material in its protected form; the
/// decrypted key lives in the [`crate::KeyStore`] entry.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    primary: PublicKey,
    body: Vec<u8>,
    secret: Option<SecretKey>,
    fingerprint: String,
    full_fingerprint: String,
    direct_signatures: Vec<Signature>,
    users: Vec<UserId>,
    subkeys: Vec<Subkey>,
}

/// Secret keys of a record after a successful unlock, by key ID.
pub(crate) struct UnlockedKey {
    keys: HashMap<String, SigningKey>,
}

impl UnlockedKey {
    pub(crate) fn get(&self, key_id: &str) -> Option<&SigningKey> {
        self.keys.get(key_id)
    }
}

impl KeyRecord {
    fn new(primary: PublicKey, body: Vec<u8>, secret: Option<SecretKey>) -> Self {
        Self {
            fingerprint: key_id_hex(&primary),
            full_fingerprint: fingerprint_hex(&primary),
            primary,
            body,
            secret,
            direct_signatures: Vec::new(),
            users: Vec::new(),
            subkeys: Vec::new(),
        }
    }

    /// 16 hex character key ID, the identifier used across the API.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// 40 hex character v4 fingerprint.
    pub fn full_fingerprint(&self) -> &str {
        &self.full_fingerprint
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.primary
    }

    /// Creation time of the primary key.
    pub fn created(&self) -> DateTime<Utc> {
        let created: SystemTime = self.primary.created_at().into();
        DateTime::from(created)
    }

    /// User IDs whose self-signature verifies, in block order.
    pub fn identities(&self) -> Vec<String> {
        self.users
            .iter()
            .filter(|u| u.verified)
            .map(UserId::value)
            .collect()
    }

    /// Every user ID, verified or not.
    pub fn user_ids(&self) -> &[UserId] {
        &self.users
    }

    pub fn subkeys(&self) -> &[Subkey] {
        &self.subkeys
    }

    pub fn has_private(&self) -> bool {
        self.secret.is_some()
    }

    /// Modulus size of the primary key.
    pub fn bit_length(&self) -> usize {
        rsa_bits(&self.body)
    }

    /// The primary key ID followed by subkey IDs, without repeats.
    pub fn all_fingerprints(&self) -> Vec<String> {
        let mut out = vec![self.fingerprint.clone()];
        for subkey in &self.subkeys {
            if !out.iter().any(|fp| fp == &subkey.fingerprint) {
                out.push(subkey.fingerprint.clone());
            }
        }
        out
    }

    /// Public key of the primary or of a subkey, by key ID.
    pub fn find_public(&self, key_id: &str) -> Option<PublicMaterial> {
        if self.fingerprint == key_id {
            return Some(PublicMaterial::Primary(self.primary.clone()));
        }
        self.subkeys
            .iter()
            .find(|s| s.fingerprint == key_id)
            .map(|s| s.public.clone())
    }

    /// The primary key and every distinct subkey, by key ID.
    pub(crate) fn public_materials(&self) -> Vec<(String, PublicMaterial)> {
        let mut out = vec![(
            self.fingerprint.clone(),
            PublicMaterial::Primary(self.primary.clone()),
        )];
        for subkey in &self.subkeys {
            if !subkey.is_repeated_primary() {
                out.push((subkey.fingerprint.clone(), subkey.public.clone()));
            }
        }
        out
    }

    /// Check user ID certifications and subkey bindings against the primary key.
    ///
    /// The signed data is assembled here so the repeated primary entry can be
    /// checked the same way as a real subkey.
    fn check_self_signatures(&mut self) {
        let issued_by_primary = |sig: &Signature| {
            issuer_key_id(sig).map_or(true, |id| id == self.fingerprint)
        };

        for user in &mut self.users {
            let data = certification_data(&self.body, user.packet.id());
            user.verified = data.is_some_and(|data| {
                user.signatures.iter().any(|sig| {
                    is_certification(sig)
                        && issued_by_primary(sig)
                        && sig.verify(&self.primary, &data[..]).is_ok()
                })
            });
            if !user.verified {
                warn!(
                    "{}: user ID {:?} has no valid self-signature",
                    self.fingerprint,
                    user.value()
                );
            }
        }

        for subkey in &mut self.subkeys {
            let mut data = Vec::new();
            subkey.bound = hash_key_body(&mut data, &self.body).is_some()
                && hash_key_body(&mut data, &subkey.body).is_some()
                && subkey.signatures.iter().any(|sig| {
                    sig.typ() == Some(SignatureType::SubkeyBinding)
                        && issued_by_primary(sig)
                        && sig.verify(&self.primary, &data[..]).is_ok()
                });
            if !subkey.bound {
                warn!(
                    "{}: subkey {} has no valid binding signature",
                    self.fingerprint, subkey.fingerprint
                );
            }
        }
    }

    /// Decrypt the primary secret key and every secret subkey.
    pub(crate) fn unlock(&self, password: &str) -> Result<UnlockedKey> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| Error::MissingPrivateMaterial(self.fingerprint.clone()))?;
        let password = Password::from(password);

        let mut primary = secret.clone();
        primary.remove_password(&password).map_err(Error::unlock)?;

        let mut keys = HashMap::new();
        for subkey in &self.subkeys {
            if let Some(sub_secret) = &subkey.secret {
                let mut key = sub_secret.clone();
                key.remove_password(&password).map_err(Error::unlock)?;
                keys.insert(subkey.fingerprint.clone(), SigningKey::Subkey(key));
            }
        }
        keys.insert(self.fingerprint.clone(), SigningKey::Primary(primary));

        Ok(UnlockedKey { keys })
    }

    /// Copy of this record with every secret key protected under `new`.
    ///
    /// rpgp picks a fresh salt and IV for each key.
    pub(crate) fn reprotect(&self, current: &str, new: &str) -> Result<Self> {
        let current = Password::from(current);
        let new = Password::from(new);
        let mut rng = thread_rng();

        let mut record = self.clone();
        let missing = Error::MissingPrivateMaterial(self.fingerprint.clone());
        let secret = record.secret.as_mut().ok_or(missing)?;
        secret.remove_password(&current).map_err(Error::unlock)?;
        secret
            .set_password(&mut rng, &new)
            .map_err(|e| Error::Crypto(e.to_string()))?;

        for subkey in &mut record.subkeys {
            if let Some(sub_secret) = subkey.secret.as_mut() {
                sub_secret
                    .remove_password(&current)
                    .map_err(Error::unlock)?;
                sub_secret
                    .set_password(&mut rng, &new)
                    .map_err(|e| Error::Crypto(e.to_string()))?;
            }
        }
        Ok(record)
    }

    fn key_details(&self) -> SignedKeyDetails {
        let (revocations, direct): (Vec<Signature>, Vec<Signature>) = self
            .direct_signatures
            .iter()
            .cloned()
            .partition(|sig| sig.typ() == Some(SignatureType::KeyRevocation));
        let users = self
            .users
            .iter()
            .map(|u| SignedUser::new(u.packet.clone(), u.signatures.clone()))
            .collect();
        SignedKeyDetails::new(revocations, direct, users, Vec::new())
    }

    /// The record as an rpgp public key, without the repeated primary entry.
    pub(crate) fn to_signed_public(&self) -> SignedPublicKey {
        let public_subkeys = self
            .subkeys
            .iter()
            .filter_map(|subkey| match &subkey.public {
                PublicMaterial::Subkey(key) => Some(SignedPublicSubKey {
                    key: key.clone(),
                    signatures: subkey.signatures.clone(),
                }),
                PublicMaterial::Primary(_) => None,
            })
            .collect();

        SignedPublicKey {
            primary_key: self.primary.clone(),
            details: self.key_details(),
            public_subkeys,
        }
    }

    /// The record as an rpgp secret key, without the repeated primary entry.
    pub(crate) fn to_signed_secret(&self) -> Result<SignedSecretKey> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| Error::MissingPrivateMaterial(self.fingerprint.clone()))?;

        let mut public_subkeys = Vec::new();
        let mut secret_subkeys = Vec::new();
        for subkey in &self.subkeys {
            match (&subkey.secret, &subkey.public) {
                (Some(key), _) => secret_subkeys.push(SignedSecretSubKey {
                    key: key.clone(),
                    signatures: subkey.signatures.clone(),
                }),
                (None, PublicMaterial::Subkey(key)) => public_subkeys.push(SignedPublicSubKey {
                    key: key.clone(),
                    signatures: subkey.signatures.clone(),
                }),
                (None, PublicMaterial::Primary(_)) => {}
            }
        }

        Ok(SignedSecretKey::new(
            secret.clone(),
            self.key_details(),
            public_subkeys,
            secret_subkeys,
        ))
    }
}

fn is_certification(sig: &Signature) -> bool {
    matches!(
        sig.typ(),
        Some(
            SignatureType::CertGeneric
                | SignatureType::CertPersona
                | SignatureType::CertCasual
                | SignatureType::CertPositive
        )
    )
}

/// Where a signature packet attaches while walking a key block.
#[derive(Clone, Copy)]
enum Attach {
    Direct,
    User,
    Subkey,
    Skip,
}

/// Parse an armored key block into its key records, in block order.
///
/// # Errors
/// [`Error::MalformedArmor`] when the armor, checksum or packet structure is broken.
pub fn parse_key_block(text: &str) -> Result<Vec<KeyRecord>> {
    let blocks = armor::parse_blocks(text).map_err(Error::MalformedArmor)?;
    if blocks.is_empty() {
        return Err(Error::MalformedArmor("no armored block found".to_string()));
    }

    let mut packets = Vec::new();
    for block in blocks {
        if !block.is_key_block() {
            return Err(Error::MalformedArmor(format!(
                "expected a key block, found {}",
                block.label()
            )));
        }
        let data = block.decode().map_err(Error::MalformedArmor)?;
        for packet in PacketParser::new(Cursor::new(&data)) {
            match packet {
                Ok(packet) => packets.push(Some(packet)),
                Err(e @ PgpError::Unsupported { .. }) => {
                    debug!("skipping a packet rpgp cannot read: {}", e);
                    packets.push(None);
                }
                Err(e) => return Err(Error::key_block(e)),
            }
        }
    }

    let records = parse_records(packets)?;
    if records.is_empty() {
        return Err(Error::MalformedArmor("no keys found".to_string()));
    }
    Ok(records)
}

/// Group packets into records. `None` marks a packet that could not be read;
/// signatures after it are dropped.
fn parse_records(packets: Vec<Option<Packet>>) -> Result<Vec<KeyRecord>> {
    let mut records: Vec<KeyRecord> = Vec::new();
    let mut attach = Attach::Skip;

    for packet in packets {
        let Some(packet) = packet else {
            attach = Attach::Skip;
            continue;
        };
        match packet {
            Packet::PublicKey(key) => {
                attach = open_or_fold(&mut records, key, None)?;
            }
            Packet::SecretKey(key) => {
                let public = key.public_key();
                attach = open_or_fold(&mut records, public, Some(key))?;
            }
            Packet::PublicSubkey(key) => {
                let current = current_record(&mut records, "public subkey")?;
                let body = key.to_bytes().map_err(Error::key_block)?;
                current.subkeys.push(Subkey::new(key, body, None));
                attach = Attach::Subkey;
            }
            Packet::SecretSubkey(key) => {
                let current = current_record(&mut records, "secret subkey")?;
                let public = key.public_key();
                let body = public.to_bytes().map_err(Error::key_block)?;
                current.subkeys.push(Subkey::new(public, body, Some(key)));
                attach = Attach::Subkey;
            }
            Packet::UserId(id) => {
                current_record(&mut records, "user ID")?.users.push(UserId {
                    packet: id,
                    signatures: Vec::new(),
                    verified: false,
                });
                attach = Attach::User;
            }
            Packet::Signature(sig) => {
                let current = current_record(&mut records, "signature")?;
                match attach {
                    Attach::Direct => current.direct_signatures.push(sig),
                    Attach::User => {
                        if let Some(user) = current.users.last_mut() {
                            user.signatures.push(sig);
                        }
                    }
                    Attach::Subkey => {
                        if let Some(subkey) = current.subkeys.last_mut() {
                            subkey.signatures.push(sig);
                        }
                    }
                    Attach::Skip => {}
                }
            }
            Packet::Trust(_) => {}
            _ => {
                debug!("skipping a packet that is not part of an RSA key");
                attach = Attach::Skip;
            }
        }
    }

    for record in &mut records {
        record.check_self_signatures();
    }
    Ok(records)
}

/// Open a record for a primary key, or fold a repeat of the open one into it.
fn open_or_fold(
    records: &mut Vec<KeyRecord>,
    public: PublicKey,
    secret: Option<SecretKey>,
) -> Result<Attach> {
    let body = public.to_bytes().map_err(Error::key_block)?;
    if let Some(current) = records.last_mut() {
        if current.body == body {
            debug!(
                "{}: repeated primary key packet folded in as a subkey",
                current.fingerprint
            );
            current
                .subkeys
                .push(Subkey::repeated(public, body, secret.is_some()));
            return Ok(Attach::Subkey);
        }
    }
    records.push(KeyRecord::new(public, body, secret));
    Ok(Attach::Direct)
}

fn current_record<'a>(records: &'a mut [KeyRecord], what: &str) -> Result<&'a mut KeyRecord> {
    records
        .last_mut()
        .ok_or_else(|| Error::MalformedArmor(format!("{} packet before any primary key", what)))
}

/// `Version` and `Comment` armor headers.
pub(crate) fn armor_headers(config: &Config) -> BTreeMap<String, Vec<String>> {
    let mut headers = BTreeMap::new();
    headers.insert("Version".to_string(), vec![ARMOR_VERSION.to_string()]);
    headers.insert("Comment".to_string(), vec![config.armor_comment.clone()]);
    headers
}

/// Serialize a record as an armored key block.
///
/// With `include_private` the block is a private key block and fails with
/// [`Error::MissingPrivateMaterial`] if the record has no secret key.
/// Otherwise only public keys, user IDs and signatures are written. A
/// repeated primary key packet is not written back.
pub fn encode_key_block(record: &KeyRecord, include_private: bool, config: &Config) -> Result<String> {
    let headers = armor_headers(config);
    let text = if include_private {
        record
            .to_signed_secret()?
            .to_armored_string(Some(&headers).into())
    } else {
        record.to_signed_public().to_armored_string(Some(&headers).into())
    };
    text.map_err(|e| Error::Crypto(e.to_string()))
}

/// Fingerprints of every key and subkey in an armored block, without repeats.
///
/// # Example
///
/// ```no_run
/// let text = std::fs::read_to_string("key.asc").unwrap();
/// for fingerprint in chevron::list_fingerprints(&text).unwrap() {
///     println!("{}", fingerprint);
/// }
/// ```
pub fn list_fingerprints(text: &str) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for record in parse_key_block(text)? {
        for fingerprint in record.all_fingerprints() {
            if !out.contains(&fingerprint) {
                out.push(fingerprint);
            }
        }
    }
    Ok(out)
}
