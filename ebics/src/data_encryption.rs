//! Hybrid encryption of order data (E002).
//!
//! Outbound: zlib compress, AES-128-CBC under a fresh transaction key, the
//! key itself RSA encrypted for the bank's E key. Inbound runs the same
//! steps backwards with the user's E key. One key serves a whole
//! transaction.

use std::fmt;

use rsa::RsaPrivateKey;

use crate::codec;
use crate::crypto::{CryptoError, CryptoProvider, AES_KEY_LENGTH};
use crate::envelope::{DataEncryptionInfo, KeyDigest};
use crate::error::Result;
use crate::keyring::KeyEntry;

#[derive(Clone, PartialEq, Eq)]
pub struct TransactionKey([u8; AES_KEY_LENGTH]);

impl TransactionKey {
    pub fn generate<C: CryptoProvider + ?Sized>(crypto: &C) -> Self {
        TransactionKey(crypto.generate_transaction_key())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; AES_KEY_LENGTH] = bytes.try_into().map_err(|_| CryptoError::KeyLength(bytes.len()))?;
        Ok(TransactionKey(key))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Recovers the key sent by the bank, encrypted for the user's E key.
    pub fn unwrap<C: CryptoProvider + ?Sized>(
        crypto: &C,
        private_key: &RsaPrivateKey,
        encrypted: &[u8],
    ) -> Result<Self, CryptoError> {
        let bytes = crypto.rsa_decrypt(private_key, encrypted)?;
        TransactionKey::from_bytes(&bytes)
    }

    /// Encrypts the key for the bank and records which bank key was used.
    pub fn wrap<C: CryptoProvider + ?Sized>(
        &self,
        crypto: &C,
        bank_encryption: &KeyEntry,
    ) -> Result<DataEncryptionInfo, CryptoError> {
        let transaction_key = crypto.rsa_encrypt(&bank_encryption.public_key, &self.0)?;
        Ok(DataEncryptionInfo {
            encryption_pub_key_digest: KeyDigest {
                version: bank_encryption.version.clone(),
                digest: bank_encryption.digest(crypto),
            },
            transaction_key,
        })
    }

    /// Compresses and encrypts `plaintext`.
    pub fn seal<C: CryptoProvider + ?Sized>(&self, crypto: &C, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        crypto.aes_cbc_encrypt(&self.0, &codec::compress(plaintext))
    }

    /// Decrypts and decompresses `ciphertext`. Padding left by the decrypt
    /// is ignored by the inflater.
    pub fn open<C: CryptoProvider + ?Sized>(&self, crypto: &C, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let compressed = crypto.aes_cbc_decrypt(&self.0, ciphertext)?;
        Ok(codec::decompress(&compressed)?)
    }
}

impl fmt::Debug for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransactionKey(<redacted>)")
    }
}
