//! Order data documents of the key management orders (INI, HIA, HPB), the
//! order signature (`UserSignatureData`) and the HEV answer.

use chrono::{DateTime, Utc};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};

use crate::codec;
use crate::config::User;
use crate::crypto::{CryptoProvider, SignatureScheme};
use crate::error::{Error, PreconditionError, Result};
use crate::keyring::{KeyEntry, KeySlot, KeyUsage, Keyring};
use crate::return_code::{self, BankError};
use crate::version::{Version, VersionDescriptor, HEV_NAMESPACE};
use crate::xml::{Document, Element, XMLDSIG_NS};

fn key_timestamp(created: &DateTime<Utc>) -> String {
    created.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn x509_data(entry: &KeyEntry) -> Option<Element> {
    entry.certificate.as_ref().map(|der| {
        Element::new("ds:X509Data").child(Element::leaf("ds:X509Certificate", codec::encode_base64(der)))
    })
}

fn pub_key_value(entry: &KeyEntry) -> Element {
    let key = &entry.public_key;
    Element::new("PubKeyValue")
        .child(
            Element::new("ds:RSAKeyValue")
                .child(Element::leaf("ds:Modulus", codec::encode_base64(&key.n().to_bytes_be())))
                .child(Element::leaf("ds:Exponent", codec::encode_base64(&key.e().to_bytes_be()))),
        )
        .child(Element::leaf("TimeStamp", key_timestamp(&entry.created)))
}

/// `X509Data` and, before 3.0, `PubKeyValue` of a key info block.
fn key_info(descriptor: &VersionDescriptor, slot: KeySlot, entry: &KeyEntry, name: &str) -> Result<Element, PreconditionError> {
    if descriptor.certificates_required && entry.certificate.is_none() {
        return Err(PreconditionError::MissingCertificate(slot));
    }
    let element = Element::new(name).maybe(x509_data(entry));
    Ok(if descriptor.certificates_required {
        element
    } else {
        element.child(pub_key_value(entry))
    })
}

fn payload_root(name: &str, namespace: &str) -> Element {
    Element::new(name)
        .declare(None, namespace)
        .declare(Some("ds"), XMLDSIG_NS)
}

/// INI order data: the user's signature key.
pub fn signature_pub_key_order_data(
    descriptor: &VersionDescriptor,
    user: &User,
    keyring: &Keyring,
) -> Result<Document, PreconditionError> {
    let slot = KeySlot::UserSignature;
    let entry = keyring.require(slot)?;
    SignatureScheme::for_version(&entry.version)?;
    let info = key_info(descriptor, slot, entry, "SignaturePubKeyInfo")?
        .child(Element::leaf("SignatureVersion", entry.version.clone()));
    let root = payload_root("SignaturePubKeyOrderData", descriptor.signature_namespace)
        .child(info)
        .child(Element::leaf("PartnerID", user.partner_id.clone()))
        .child(Element::leaf("UserID", user.user_id.clone()));
    Ok(Document::new(root))
}

/// HIA order data: the user's authentication and encryption keys.
pub fn hia_request_order_data(
    descriptor: &VersionDescriptor,
    user: &User,
    keyring: &Keyring,
) -> Result<Document, PreconditionError> {
    let authentication = keyring.require(KeySlot::UserAuthentication)?;
    let encryption = keyring.require(KeySlot::UserEncryption)?;
    let authentication_info = key_info(
        descriptor,
        KeySlot::UserAuthentication,
        authentication,
        "AuthenticationPubKeyInfo",
    )?
    .child(Element::leaf("AuthenticationVersion", authentication.version.clone()));
    let encryption_info = key_info(descriptor, KeySlot::UserEncryption, encryption, "EncryptionPubKeyInfo")?
        .child(Element::leaf("EncryptionVersion", encryption.version.clone()));
    let root = payload_root("HIARequestOrderData", descriptor.namespace)
        .child(authentication_info)
        .child(encryption_info)
        .child(Element::leaf("PartnerID", user.partner_id.clone()))
        .child(Element::leaf("UserID", user.user_id.clone()));
    Ok(Document::new(root))
}

/// Electronic signature of an order: the user's A key signs the SHA-256
/// `digest` of the order data.
pub fn user_signature_data<C: CryptoProvider + ?Sized>(
    descriptor: &VersionDescriptor,
    user: &User,
    keyring: &Keyring,
    digest: &[u8],
    crypto: &C,
) -> Result<Document> {
    let key = keyring.require_private(KeySlot::UserSignature)?;
    let entry = keyring.require(KeySlot::UserSignature)?;
    let scheme = SignatureScheme::for_version(&entry.version)?;
    let signature = crypto.rsa_sign(key, scheme, digest)?;
    let order_signature = Element::new("OrderSignatureData")
        .child(Element::leaf("SignatureVersion", entry.version.clone()))
        .child(Element::leaf("SignatureValue", codec::encode_base64(&signature)))
        .child(Element::leaf("PartnerID", user.partner_id.clone()))
        .child(Element::leaf("UserID", user.user_id.clone()));
    let root = payload_root("UserSignatureData", descriptor.signature_namespace).child(order_signature);
    Ok(Document::new(root))
}

/// Bank keys announced by HPB.
#[derive(Clone, Debug)]
pub struct BankKeys {
    pub authentication: KeyEntry,
    pub encryption: KeyEntry,
    pub host_id: Option<String>,
}

fn parse_rsa_key_value(key_value: &Element) -> Result<RsaPublicKey> {
    let component = |name: &str| -> Result<BigUint> {
        let element = key_value
            .first(name)
            .ok_or_else(|| Error::unexpected(format!("RSAKeyValue without {}", name)))?;
        Ok(BigUint::from_bytes_be(&codec::decode_base64(&element.text_content())?))
    };
    let modulus = component("Modulus")?;
    let exponent = component("Exponent")?;
    Ok(RsaPublicKey::new(modulus, exponent).map_err(crate::crypto::CryptoError::from)?)
}

fn parse_key_info<C: CryptoProvider + ?Sized>(
    info: &Element,
    usage: KeyUsage,
    version_element: &str,
    crypto: &C,
) -> Result<KeyEntry> {
    let version = info
        .first(version_element)
        .map(|e| e.text_content().trim().to_string())
        .ok_or_else(|| Error::unexpected(format!("{} missing in {}", version_element, info.name)))?;
    let certificate = match info.first("X509Data").and_then(|data| data.first("X509Certificate")) {
        Some(element) => Some(codec::decode_base64(&element.text_content())?),
        None => None,
    };
    let key_value = info
        .first("PubKeyValue")
        .and_then(|value| value.first("RSAKeyValue"));
    let public_key = match (key_value, &certificate) {
        (Some(key_value), _) => parse_rsa_key_value(key_value)?,
        (None, Some(der)) => crypto.certificate_public_key(der)?,
        (None, None) => {
            return Err(Error::unexpected(format!("{} carries neither key value nor certificate", info.name)))
        }
    };
    let mut entry = KeyEntry::from_public(usage, &version, public_key);
    if let Some(der) = certificate {
        entry = entry.with_certificate(der);
    }
    Ok(entry)
}

/// Reads `HPBResponseOrderData`.
pub fn parse_hpb_order_data<C: CryptoProvider + ?Sized>(order_data: &[u8], crypto: &C) -> Result<BankKeys> {
    let document = Document::parse(order_data)?;
    let root = &document.root;
    if root.name.local != "HPBResponseOrderData" {
        return Err(Error::unexpected(format!("expected HPBResponseOrderData, got {}", root.name)));
    }
    let authentication = root
        .first("AuthenticationPubKeyInfo")
        .ok_or_else(|| Error::unexpected("HPB order data without AuthenticationPubKeyInfo"))?;
    let encryption = root
        .first("EncryptionPubKeyInfo")
        .ok_or_else(|| Error::unexpected("HPB order data without EncryptionPubKeyInfo"))?;
    Ok(BankKeys {
        authentication: parse_key_info(authentication, KeyUsage::Authentication, "AuthenticationVersion", crypto)?,
        encryption: parse_key_info(encryption, KeyUsage::Encryption, "EncryptionVersion", crypto)?,
        host_id: root.first("HostID").map(|e| e.text_content()),
    })
}

/// Protocol versions a bank announced in its HEV answer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionSupport {
    /// `(protocol, release)` pairs such as `("H004", "02.50")`.
    pub versions: Vec<(String, String)>,
}

impl VersionSupport {
    pub fn supports(&self, version: Version) -> bool {
        self.versions.iter().any(|(protocol, _)| protocol == version.as_str())
    }

    /// Newest announced version this engine speaks.
    pub fn best(&self) -> Option<Version> {
        Version::ALL.iter().rev().copied().find(|v| self.supports(*v))
    }
}

/// Reads `ebicsHEVResponse`. A non-success `SystemReturnCode` becomes a
/// [`BankError`].
pub fn parse_hev_response(response: &[u8]) -> Result<VersionSupport> {
    let document = Document::parse(response)?;
    let root = &document.root;
    if root.name.local != "ebicsHEVResponse" || root.namespace.as_deref() != Some(HEV_NAMESPACE) {
        return Err(Error::unexpected(format!("expected ebicsHEVResponse, got {}", root.name)));
    }
    if let Some(system) = root.first_ns(HEV_NAMESPACE, "SystemReturnCode") {
        let code = system
            .first_ns(HEV_NAMESPACE, "ReturnCode")
            .map(|e| e.text_content().trim().to_string())
            .unwrap_or_default();
        if code != return_code::OK {
            let report = system.first_ns(HEV_NAMESPACE, "ReportText").map(|e| e.text_content());
            return Err(BankError::from_code(&code, report.as_deref()).into());
        }
    }
    let versions = root
        .elements()
        .filter(|e| e.name.local == "VersionNumber")
        .map(|e| {
            (
                e.attribute("ProtocolVersion").unwrap_or_default().to_string(),
                e.text_content().trim().to_string(),
            )
        })
        .collect();
    Ok(VersionSupport { versions })
}
