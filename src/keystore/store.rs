//! KeyStore implementation.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::keyring::{KeyRecord, PublicMaterial, SigningKey, UnlockedKey};
use crate::types::KeyInfo;

/// A loaded record plus its unlock state.
struct KeyEntry {
    record: KeyRecord,
    unlocked: RwLock<Option<UnlockedKey>>,
    unlocking: Mutex<()>,
}

impl KeyEntry {
    fn new(record: KeyRecord) -> Self {
        Self {
            record,
            unlocked: RwLock::new(None),
            unlocking: Mutex::new(()),
        }
    }

    fn is_unlocked(&self) -> bool {
        self.unlocked.read().is_some()
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Arc<KeyEntry>>,
    /// Subkey IDs and 8 character short IDs, with every `(owner, key ID)`
    /// pair they stand for.
    aliases: HashMap<String, Vec<(String, String)>>,
}

impl Inner {
    /// Resolve any accepted spelling to `(record key ID, matched key ID)`.
    ///
    /// A short ID shared by several keys resolves to nothing.
    fn resolve(&self, fingerprint: &str) -> Option<(String, String)> {
        let normalized = normalize_fingerprint(fingerprint);
        if !normalized.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let key_id = match normalized.len() {
            40 => normalized[24..].to_string(),
            16 | 8 => normalized,
            _ => return None,
        };

        if self.entries.contains_key(&key_id) {
            return Some((key_id.clone(), key_id));
        }
        match self.aliases.get(&key_id)?.as_slice() {
            [(owner, id)] => Some((owner.clone(), id.clone())),
            targets => {
                debug!("{}: ambiguous, matches {} keys", key_id, targets.len());
                None
            }
        }
    }

    fn entry(&self, fingerprint: &str) -> Result<(Arc<KeyEntry>, String)> {
        let (owner, key_id) = self
            .resolve(fingerprint)
            .ok_or_else(|| Error::UnknownKey(fingerprint.to_string()))?;
        let entry = self
            .entries
            .get(&owner)
            .cloned()
            .ok_or_else(|| Error::UnknownKey(fingerprint.to_string()))?;
        Ok((entry, key_id))
    }

    fn alias(&mut self, alias: &str, owner: &str, key_id: &str) {
        let targets = self.aliases.entry(alias.to_string()).or_default();
        if !targets.iter().any(|(o, k)| o == owner && k == key_id) {
            targets.push((owner.to_string(), key_id.to_string()));
        }
    }

    fn unindex(&mut self, owner: &str) {
        self.aliases.retain(|_, targets| {
            targets.retain(|(o, _)| o != owner);
            !targets.is_empty()
        });
    }

    fn index(&mut self, record: &KeyRecord) {
        let owner = record.fingerprint().to_string();
        self.alias(&owner[8..], &owner, &owner);
        for subkey in record.subkeys() {
            let id = subkey.fingerprint();
            if id != owner {
                self.alias(id, &owner, id);
                self.alias(&id[8..], &owner, id);
            }
        }
    }
}

/// Uppercase, without spaces or a `0x` prefix.
pub(crate) fn normalize_fingerprint(fingerprint: &str) -> String {
    let compact: String = fingerprint
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    match compact.strip_prefix("0X") {
        Some(rest) => rest.to_string(),
        None => compact,
    }
}

/// Thread-safe in-memory keyring.
///
/// Records are keyed by their 16 character key ID. Replacing a record
/// drops its unlocked secret key.
#[derive(Default)]
pub struct KeyStore {
    inner: RwLock<Inner>,
}

impl KeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace records.
    ///
    /// Each record is inserted atomically; replacing a key that was unlocked
    /// leaves the new record locked.
    ///
    /// # Returns
    /// The key IDs of the inserted records, in order.
    pub fn insert(&self, records: Vec<KeyRecord>) -> Vec<String> {
        let mut inner = self.inner.write();
        let mut loaded = Vec::with_capacity(records.len());

        for record in records {
            let fingerprint = record.fingerprint().to_string();
            inner.unindex(&fingerprint);
            inner.index(&record);
            if let Some(previous) = inner
                .entries
                .insert(fingerprint.clone(), Arc::new(KeyEntry::new(record)))
            {
                if previous.is_unlocked() {
                    debug!("{}: replaced an unlocked key", fingerprint);
                }
            }
            info!("{}: key loaded", fingerprint);
            loaded.push(fingerprint);
        }

        loaded
    }

    /// Get a copy of a record.
    ///
    /// # Errors
    /// Returns `Error::UnknownKey` if nothing matches `fingerprint`.
    pub fn get(&self, fingerprint: &str) -> Result<KeyRecord> {
        let (entry, _) = self.inner.read().entry(fingerprint)?;
        Ok(entry.record.clone())
    }

    /// Check if a key (or a key owning this subkey) is loaded.
    pub fn contains(&self, fingerprint: &str) -> bool {
        self.inner.read().resolve(fingerprint).is_some()
    }

    /// Decrypt the secret key material of a record and keep it for signing.
    ///
    /// A wrong password leaves an already unlocked key unlocked.
    ///
    /// # Errors
    /// * `Error::UnknownKey` if nothing matches `fingerprint`
    /// * `Error::MissingPrivateMaterial` if the record is public only
    /// * `Error::WrongPassword` if the passphrase does not decrypt the key
    pub fn unlock(&self, fingerprint: &str, password: &str) -> Result<()> {
        let (entry, _) = self.inner.read().entry(fingerprint)?;
        let _guard = entry.unlocking.lock();

        match entry.record.unlock(password) {
            Ok(unlocked) => {
                *entry.unlocked.write() = Some(unlocked);
                info!("{}: key unlocked", entry.record.fingerprint());
                Ok(())
            }
            Err(e) => {
                warn!("{}: unlock failed: {}", entry.record.fingerprint(), e);
                Err(e)
            }
        }
    }

    /// Whether the record still needs [`KeyStore::unlock`] before it can sign.
    pub fn is_locked(&self, fingerprint: &str) -> Result<bool> {
        let (entry, _) = self.inner.read().entry(fingerprint)?;
        Ok(!entry.is_unlocked())
    }

    /// Remove a record and drop its unlocked key.
    pub fn remove(&self, fingerprint: &str) -> Result<KeyRecord> {
        let mut inner = self.inner.write();
        let (owner, _) = inner
            .resolve(fingerprint)
            .ok_or_else(|| Error::UnknownKey(fingerprint.to_string()))?;
        inner.unindex(&owner);
        let entry = inner
            .entries
            .remove(&owner)
            .ok_or_else(|| Error::UnknownKey(fingerprint.to_string()))?;
        info!("{}: key removed", owner);
        Ok(entry.record.clone())
    }

    /// Key IDs of all records, sorted.
    pub fn fingerprints(&self) -> Vec<String> {
        let mut out: Vec<String> = self.inner.read().entries.keys().cloned().collect();
        out.sort();
        out
    }

    /// Summary of every record, sorted by key ID.
    pub fn key_infos(&self) -> Vec<KeyInfo> {
        let inner = self.inner.read();
        let mut out: Vec<KeyInfo> = inner
            .entries
            .values()
            .map(|entry| {
                let record = &entry.record;
                KeyInfo {
                    fingerprint: record.fingerprint().to_string(),
                    full_fingerprint: record.full_fingerprint().to_string(),
                    identifier: record.identities().into_iter().next(),
                    bits: record.bit_length(),
                    subkeys: record
                        .subkeys()
                        .iter()
                        .map(|s| s.fingerprint().to_string())
                        .collect(),
                    has_private: record.has_private(),
                    locked: !entry.is_unlocked(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        out
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Public key for `fingerprint`, which may name a subkey.
    pub(crate) fn public_key(&self, fingerprint: &str) -> Result<PublicMaterial> {
        let (entry, key_id) = self.inner.read().entry(fingerprint)?;
        entry
            .record
            .find_public(&key_id)
            .ok_or_else(|| Error::UnknownKey(fingerprint.to_string()))
    }

    /// Every loaded primary key and subkey, by key ID.
    pub(crate) fn public_materials(&self) -> Vec<(String, PublicMaterial)> {
        let inner = self.inner.read();
        let mut out: Vec<(String, PublicMaterial)> = inner
            .entries
            .values()
            .flat_map(|entry| entry.record.public_materials())
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Run `f` with the unlocked secret key for `fingerprint`.
    ///
    /// The key never leaves the store; `f` only borrows it.
    pub(crate) fn with_signing_key<T>(
        &self,
        fingerprint: &str,
        f: impl FnOnce(&SigningKey, &str) -> Result<T>,
    ) -> Result<T> {
        let (entry, key_id) = self.inner.read().entry(fingerprint)?;
        if !entry.record.has_private() {
            return Err(Error::MissingPrivateMaterial(key_id));
        }

        let unlocked = entry.unlocked.read();
        let key = unlocked
            .as_ref()
            .ok_or_else(|| Error::KeyLocked(entry.record.fingerprint().to_string()))?
            .get(&key_id)
            .ok_or_else(|| Error::MissingPrivateMaterial(key_id.clone()))?;
        f(key, &key_id)
    }
}
