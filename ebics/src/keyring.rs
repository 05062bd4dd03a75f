//! User and bank key material, plus the persistence port.
//!
//! A [`Keyring`] has five slots. User slots are filled by local key
//! generation (or import), bank slots by a successful HPB exchange. The
//! engine reads slots through [`Keyring::require`] and
//! [`Keyring::require_private`], which turn a missing key into a
//! [`PreconditionError`] before anything is sent.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SubsecRound, Utc};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec;
use crate::crypto::{self, CryptoProvider};
use crate::error::PreconditionError;
use crate::key_management::BankKeys;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyUsage {
    /// Electronic signature of order data (A005/A006).
    Signature,
    /// Identification and authentication of requests (X002).
    Authentication,
    /// Encryption of order data (E002).
    Encryption,
}

impl KeyUsage {
    pub fn letter(self) -> char {
        match self {
            KeyUsage::Signature => 'A',
            KeyUsage::Authentication => 'X',
            KeyUsage::Encryption => 'E',
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeySlot {
    UserSignature,
    UserAuthentication,
    UserEncryption,
    BankAuthentication,
    BankEncryption,
}

impl KeySlot {
    pub const ALL: [KeySlot; 5] = [
        KeySlot::UserSignature,
        KeySlot::UserAuthentication,
        KeySlot::UserEncryption,
        KeySlot::BankAuthentication,
        KeySlot::BankEncryption,
    ];

    pub fn usage(self) -> KeyUsage {
        match self {
            KeySlot::UserSignature => KeyUsage::Signature,
            KeySlot::UserAuthentication | KeySlot::BankAuthentication => KeyUsage::Authentication,
            KeySlot::UserEncryption | KeySlot::BankEncryption => KeyUsage::Encryption,
        }
    }

    pub fn is_bank(self) -> bool {
        matches!(self, KeySlot::BankAuthentication | KeySlot::BankEncryption)
    }

    /// Field name in the persisted JSON object.
    pub fn json_key(self) -> &'static str {
        match self {
            KeySlot::UserSignature => "userA",
            KeySlot::UserAuthentication => "userX",
            KeySlot::UserEncryption => "userE",
            KeySlot::BankAuthentication => "bankX",
            KeySlot::BankEncryption => "bankE",
        }
    }
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owner = if self.is_bank() { "bank" } else { "user" };
        write!(f, "{} {}", owner, self.usage().letter())
    }
}

/// One key of the keyring: public half, optional private half and
/// certificate, and the process version it is used with.
#[derive(Clone)]
pub struct KeyEntry {
    pub usage: KeyUsage,
    /// Process version, e.g. `A006`, `X002`, `E002`.
    pub version: String,
    pub public_key: RsaPublicKey,
    pub private_key: Option<RsaPrivateKey>,
    /// DER encoded X.509 certificate.
    pub certificate: Option<Vec<u8>>,
    pub created: DateTime<Utc>,
}

impl KeyEntry {
    pub fn from_private(usage: KeyUsage, version: &str, private_key: RsaPrivateKey) -> Self {
        KeyEntry {
            usage,
            version: version.to_string(),
            public_key: private_key.to_public_key(),
            private_key: Some(private_key),
            certificate: None,
            created: Utc::now().trunc_subsecs(0),
        }
    }

    pub fn from_public(usage: KeyUsage, version: &str, public_key: RsaPublicKey) -> Self {
        KeyEntry {
            usage,
            version: version.to_string(),
            public_key,
            private_key: None,
            certificate: None,
            created: Utc::now().trunc_subsecs(0),
        }
    }

    pub fn with_certificate(mut self, der: Vec<u8>) -> Self {
        self.certificate = Some(der);
        self
    }

    pub fn digest<C: CryptoProvider + ?Sized>(&self, crypto: &C) -> [u8; 32] {
        crypto::public_key_digest(crypto, &self.public_key)
    }

    /// Key hash as printed on initialisation letters: uppercase hex in
    /// groups of two.
    pub fn letter_hash<C: CryptoProvider + ?Sized>(&self, crypto: &C) -> String {
        let hex = hex::encode_upper(self.digest(crypto));
        hex.as_bytes()
            .chunks(2)
            .filter_map(|pair| std::str::from_utf8(pair).ok())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyEntry")
            .field("usage", &self.usage)
            .field("version", &self.version)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("certificate", &self.certificate.as_ref().map(Vec::len))
            .field("created", &self.created)
            .finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Keyring {
    entries: BTreeMap<KeySlot, KeyEntry>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: KeySlot) -> Option<&KeyEntry> {
        self.entries.get(&slot)
    }

    pub fn set(&mut self, slot: KeySlot, entry: KeyEntry) {
        self.entries.insert(slot, entry);
    }

    pub fn remove(&mut self, slot: KeySlot) -> Option<KeyEntry> {
        self.entries.remove(&slot)
    }

    pub fn require(&self, slot: KeySlot) -> Result<&KeyEntry, PreconditionError> {
        self.get(slot).ok_or(PreconditionError::MissingKey(slot))
    }

    pub fn require_private(&self, slot: KeySlot) -> Result<&RsaPrivateKey, PreconditionError> {
        self.require(slot)?
            .private_key
            .as_ref()
            .ok_or(PreconditionError::MissingPrivateKey(slot))
    }

    pub fn has_bank_keys(&self) -> bool {
        self.get(KeySlot::BankAuthentication).is_some() && self.get(KeySlot::BankEncryption).is_some()
    }

    /// Stores the keys returned by HPB, replacing any previous bank keys.
    pub fn set_bank_keys(&mut self, keys: BankKeys) {
        self.set(KeySlot::BankAuthentication, keys.authentication);
        self.set(KeySlot::BankEncryption, keys.encryption);
    }

    /// Generates fresh A, X and E key pairs for the user.
    pub fn generate_user_keys<C: CryptoProvider + ?Sized>(
        &mut self,
        crypto: &C,
        bits: usize,
        signature_version: &str,
    ) -> Result<(), crypto::CryptoError> {
        let signature = crypto.generate_key_pair(bits)?;
        let authentication = crypto.generate_key_pair(bits)?;
        let encryption = crypto.generate_key_pair(bits)?;
        self.set(
            KeySlot::UserSignature,
            KeyEntry::from_private(KeyUsage::Signature, signature_version, signature),
        );
        self.set(
            KeySlot::UserAuthentication,
            KeyEntry::from_private(KeyUsage::Authentication, "X002", authentication),
        );
        self.set(
            KeySlot::UserEncryption,
            KeyEntry::from_private(KeyUsage::Encryption, "E002", encryption),
        );
        Ok(())
    }

    pub fn to_json(&self, password: &str) -> Result<String, StorageError> {
        let mut stored = BTreeMap::new();
        for (slot, entry) in &self.entries {
            stored.insert(slot.json_key(), StoredKey::encode(*slot, entry, password)?);
        }
        Ok(serde_json::to_string_pretty(&stored)?)
    }

    pub fn from_json(json: &str, password: &str) -> Result<Self, StorageError> {
        let mut stored: BTreeMap<String, StoredKey> = serde_json::from_str(json)?;
        let mut keyring = Keyring::new();
        for slot in KeySlot::ALL {
            if let Some(key) = stored.remove(slot.json_key()) {
                keyring.set(slot, key.decode(slot, password)?);
            }
        }
        if let Some(unknown) = stored.keys().next() {
            return Err(StorageError::UnknownSlot(unknown.clone()));
        }
        Ok(keyring)
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed keyring: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown keyring slot `{0}`")]
    UnknownSlot(String),
    #[error("cannot encode or decode the {slot} key: {message}")]
    Key { slot: KeySlot, message: String },
    #[error("cannot decrypt the {0} private key, wrong password?")]
    WrongPassword(KeySlot),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredKey {
    usage: KeyUsage,
    version: String,
    /// SubjectPublicKeyInfo PEM.
    public_key: String,
    /// Password encrypted PKCS#8 PEM.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_key: Option<String>,
    /// Base64 DER.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    certificate: Option<String>,
    created: DateTime<Utc>,
}

impl StoredKey {
    fn encode(slot: KeySlot, entry: &KeyEntry, password: &str) -> Result<Self, StorageError> {
        let key_error = |message: String| StorageError::Key { slot, message };
        let public_key = entry
            .public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| key_error(e.to_string()))?;
        let private_key = match &entry.private_key {
            Some(key) => Some(
                key.to_pkcs8_encrypted_pem(&mut rand::rngs::OsRng, password, LineEnding::LF)
                    .map_err(|e| key_error(e.to_string()))?
                    .to_string(),
            ),
            None => None,
        };
        Ok(StoredKey {
            usage: entry.usage,
            version: entry.version.clone(),
            public_key,
            private_key,
            certificate: entry.certificate.as_deref().map(codec::encode_base64),
            created: entry.created,
        })
    }

    fn decode(self, slot: KeySlot, password: &str) -> Result<KeyEntry, StorageError> {
        let key_error = |message: String| StorageError::Key { slot, message };
        let public_key = RsaPublicKey::from_public_key_pem(&self.public_key).map_err(|e| key_error(e.to_string()))?;
        let private_key = match &self.private_key {
            Some(pem) => Some(
                RsaPrivateKey::from_pkcs8_encrypted_pem(pem, password)
                    .map_err(|_| StorageError::WrongPassword(slot))?,
            ),
            None => None,
        };
        let certificate = match &self.certificate {
            Some(b64) => Some(codec::decode_base64(b64).map_err(|e| key_error(e.to_string()))?),
            None => None,
        };
        Ok(KeyEntry {
            usage: self.usage,
            version: self.version,
            public_key,
            private_key,
            certificate,
            created: self.created,
        })
    }
}

/// Persistence port for a [`Keyring`].
pub trait KeyringStore {
    fn load(&self) -> Result<Keyring, StorageError>;
    fn save(&self, keyring: &Keyring) -> Result<(), StorageError>;
}

/// Keyring kept as a JSON file, private keys encrypted with `password`.
#[derive(Clone, Debug)]
pub struct JsonFileKeyring {
    path: PathBuf,
    password: String,
}

impl JsonFileKeyring {
    pub fn new(path: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        JsonFileKeyring {
            path: path.into(),
            password: password.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

impl KeyringStore for JsonFileKeyring {
    fn load(&self) -> Result<Keyring, StorageError> {
        let json = std::fs::read_to_string(&self.path)?;
        Keyring::from_json(&json, &self.password)
    }

    fn save(&self, keyring: &Keyring) -> Result<(), StorageError> {
        let json = keyring.to_json(&self.password)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        log::debug!("keyring saved to {}", self.path.display());
        Ok(())
    }
}

/// In-memory store holding the same JSON text a file would. Loading an
/// empty store yields an empty keyring.
#[derive(Debug)]
pub struct MemoryKeyring {
    password: String,
    json: Mutex<Option<String>>,
}

impl MemoryKeyring {
    pub fn new(password: impl Into<String>) -> Self {
        MemoryKeyring {
            password: password.into(),
            json: Mutex::new(None),
        }
    }

    /// The persisted JSON text, if anything was saved.
    pub fn json(&self) -> Option<String> {
        self.json.lock().ok().and_then(|json| json.clone())
    }
}

impl KeyringStore for MemoryKeyring {
    fn load(&self) -> Result<Keyring, StorageError> {
        match self.json() {
            Some(json) => Keyring::from_json(&json, &self.password),
            None => Ok(Keyring::new()),
        }
    }

    fn save(&self, keyring: &Keyring) -> Result<(), StorageError> {
        let json = keyring.to_json(&self.password)?;
        let mut slot = self
            .json
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "keyring lock poisoned"))?;
        *slot = Some(json);
        Ok(())
    }
}
