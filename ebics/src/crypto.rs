//! Narrow port to the cryptographic primitives the protocol composes.
//!
//! The engine never touches a cipher or an RNG directly; it goes through a
//! [`CryptoProvider`]. [`RustCrypto`] is the default adapter on top of the
//! `rsa`, `aes`/`cbc` and `sha2` crates.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;

use crate::error::PreconditionError;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

pub const AES_KEY_LENGTH: usize = 16;
const AES_BLOCK: usize = 16;
const ZERO_IV: [u8; AES_BLOCK] = [0; AES_BLOCK];

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error(transparent)]
    Rsa(#[from] rsa::Error),
    #[error("AES key must be {AES_KEY_LENGTH} bytes, got {0}")]
    KeyLength(usize),
    #[error("ciphertext length {0} is not a multiple of the AES block size")]
    BlockLength(usize),
    #[error("signature verification failed")]
    BadSignature,
    #[error("digest of the authenticated elements does not match DigestValue")]
    DigestMismatch,
    #[error("invalid certificate: {0}")]
    Certificate(String),
    #[error("invalid key encoding: {0}")]
    KeyEncoding(String),
}

/// RSA signature padding, chosen by the signature process version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureScheme {
    /// A005 and X002: RSASSA-PKCS1-v1_5 with SHA-256.
    Pkcs1v15Sha256,
    /// A006: RSASSA-PSS with SHA-256 and a 32 byte salt.
    PssSha256,
}

impl SignatureScheme {
    pub fn for_version(version: &str) -> Result<Self, PreconditionError> {
        match version {
            "A005" | "X002" => Ok(SignatureScheme::Pkcs1v15Sha256),
            "A006" => Ok(SignatureScheme::PssSha256),
            other => Err(PreconditionError::UnsupportedSignatureVersion(other.to_string())),
        }
    }
}

pub trait CryptoProvider {
    fn sha256(&self, data: &[u8]) -> [u8; 32];

    /// Signs an already computed SHA-256 digest.
    fn rsa_sign(&self, key: &RsaPrivateKey, scheme: SignatureScheme, digest: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn rsa_verify(
        &self,
        key: &RsaPublicKey,
        scheme: SignatureScheme,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError>;

    /// RSAES-PKCS1-v1_5.
    fn rsa_encrypt(&self, key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn rsa_decrypt(&self, key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// AES-128-CBC with a zero IV and ANSI X9.23 padding.
    fn aes_cbc_encrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// AES-128-CBC with a zero IV; the padding is left in place.
    fn aes_cbc_decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn random_bytes(&self, len: usize) -> Vec<u8>;

    fn generate_key_pair(&self, bits: usize) -> Result<RsaPrivateKey, CryptoError>;

    /// Public key of a DER encoded X.509 certificate.
    fn certificate_public_key(&self, der: &[u8]) -> Result<RsaPublicKey, CryptoError>;

    /// 16 random bytes as uppercase hex.
    fn generate_nonce(&self) -> String {
        hex::encode_upper(self.random_bytes(16))
    }

    fn generate_transaction_key(&self) -> [u8; AES_KEY_LENGTH] {
        let mut key = [0u8; AES_KEY_LENGTH];
        key.copy_from_slice(&self.random_bytes(AES_KEY_LENGTH));
        key
    }
}

impl<C: CryptoProvider + ?Sized> CryptoProvider for &C {
    fn sha256(&self, data: &[u8]) -> [u8; 32] {
        (**self).sha256(data)
    }

    fn rsa_sign(&self, key: &RsaPrivateKey, scheme: SignatureScheme, digest: &[u8]) -> Result<Vec<u8>, CryptoError> {
        (**self).rsa_sign(key, scheme, digest)
    }

    fn rsa_verify(
        &self,
        key: &RsaPublicKey,
        scheme: SignatureScheme,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        (**self).rsa_verify(key, scheme, digest, signature)
    }

    fn rsa_encrypt(&self, key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        (**self).rsa_encrypt(key, data)
    }

    fn rsa_decrypt(&self, key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        (**self).rsa_decrypt(key, data)
    }

    fn aes_cbc_encrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        (**self).aes_cbc_encrypt(key, data)
    }

    fn aes_cbc_decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        (**self).aes_cbc_decrypt(key, data)
    }

    fn random_bytes(&self, len: usize) -> Vec<u8> {
        (**self).random_bytes(len)
    }

    fn generate_key_pair(&self, bits: usize) -> Result<RsaPrivateKey, CryptoError> {
        (**self).generate_key_pair(bits)
    }

    fn certificate_public_key(&self, der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
        (**self).certificate_public_key(der)
    }
}

/// [`CryptoProvider`] backed by the RustCrypto crates and the OS RNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct RustCrypto;

impl CryptoProvider for RustCrypto {
    fn sha256(&self, data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    fn rsa_sign(&self, key: &RsaPrivateKey, scheme: SignatureScheme, digest: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signature = match scheme {
            SignatureScheme::Pkcs1v15Sha256 => key.sign(Pkcs1v15Sign::new::<Sha256>(), digest)?,
            SignatureScheme::PssSha256 => key.sign_with_rng(&mut OsRng, Pss::new::<Sha256>(), digest)?,
        };
        Ok(signature)
    }

    fn rsa_verify(
        &self,
        key: &RsaPublicKey,
        scheme: SignatureScheme,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        let result = match scheme {
            SignatureScheme::Pkcs1v15Sha256 => key.verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature),
            SignatureScheme::PssSha256 => key.verify(Pss::new::<Sha256>(), digest, signature),
        };
        result.map_err(|_| CryptoError::BadSignature)
    }

    fn rsa_encrypt(&self, key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(key.encrypt(&mut OsRng, Pkcs1v15Encrypt, data)?)
    }

    fn rsa_decrypt(&self, key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(key.decrypt(Pkcs1v15Encrypt, data)?)
    }

    fn aes_cbc_encrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes128CbcEnc::new_from_slices(key, &ZERO_IV).map_err(|_| CryptoError::KeyLength(key.len()))?;
        let padded = pad_x923(data);
        let mut out = vec![0u8; padded.len()];
        let encrypted = cipher
            .encrypt_padded_b2b_mut::<NoPadding>(&padded, &mut out)
            .map_err(|_| CryptoError::BlockLength(padded.len()))?;
        Ok(encrypted.to_vec())
    }

    fn aes_cbc_decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() % AES_BLOCK != 0 {
            return Err(CryptoError::BlockLength(data.len()));
        }
        let cipher = Aes128CbcDec::new_from_slices(key, &ZERO_IV).map_err(|_| CryptoError::KeyLength(key.len()))?;
        let mut out = vec![0u8; data.len()];
        let decrypted = cipher
            .decrypt_padded_b2b_mut::<NoPadding>(data, &mut out)
            .map_err(|_| CryptoError::BlockLength(data.len()))?;
        Ok(decrypted.to_vec())
    }

    fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        bytes
    }

    fn generate_key_pair(&self, bits: usize) -> Result<RsaPrivateKey, CryptoError> {
        Ok(RsaPrivateKey::new(&mut OsRng, bits)?)
    }

    fn certificate_public_key(&self, der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
        let certificate = Certificate::from_der(der).map_err(|e| CryptoError::Certificate(e.to_string()))?;
        let spki = certificate
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| CryptoError::Certificate(e.to_string()))?;
        RsaPublicKey::from_public_key_der(&spki).map_err(|e| CryptoError::Certificate(e.to_string()))
    }
}

/// ANSI X9.23: zero bytes, the last one holding the pad length (1..=16).
fn pad_x923(data: &[u8]) -> Vec<u8> {
    let pad = AES_BLOCK - data.len() % AES_BLOCK;
    let mut padded = Vec::with_capacity(data.len() + pad);
    padded.extend_from_slice(data);
    padded.resize(data.len() + pad - 1, 0);
    padded.push(pad as u8);
    padded
}

/// Strips ANSI X9.23 padding, if the trailing byte describes a valid one.
#[cfg(test)]
pub(crate) fn unpad_x923(data: &[u8]) -> &[u8] {
    match data.last() {
        Some(&pad) if (1..=AES_BLOCK as u8).contains(&pad) && data.len() >= pad as usize => {
            &data[..data.len() - pad as usize]
        }
        _ => data,
    }
}

/// `lowercase-hex(e) + " " + lowercase-hex(n)`, leading zeros trimmed.
/// If the exponent renders longer than the modulus the two are swapped.
pub fn public_key_hash_input(key: &RsaPublicKey) -> String {
    let exponent = hex::encode(key.e().to_bytes_be()).trim_start_matches('0').to_string();
    let modulus = hex::encode(key.n().to_bytes_be()).trim_start_matches('0').to_string();
    if exponent.len() > modulus.len() {
        format!("{} {}", modulus, exponent)
    } else {
        format!("{} {}", exponent, modulus)
    }
}

/// SHA-256 key digest used for `BankPubKeyDigests` and
/// `EncryptionPubKeyDigest`, and printed on initialisation letters.
pub fn public_key_digest<C: CryptoProvider + ?Sized>(crypto: &C, key: &RsaPublicKey) -> [u8; 32] {
    crypto.sha256(public_key_hash_input(key).as_bytes())
}
