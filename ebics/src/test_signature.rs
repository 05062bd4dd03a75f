use chrono::Utc;

use crate::auth_signature::{self, authenticated_digest, check, sign, sign_document, verify};
use crate::codec;
use crate::config::ClientConfig;
use crate::crypto::{CryptoError, RustCrypto};
use crate::envelope::{Envelope, EnvelopeBuilder};
use crate::error::{Error, PreconditionError};
use crate::keyring::{KeySlot, Keyring};
use crate::order::{Order, OrderType};
use crate::test_support::{bank, keyring, keys, user};
use crate::version::Version;
use crate::xml::{Document, Element};

fn hpb_envelope() -> Envelope {
    let (bank, user, config) = (bank(Version::H004), user(), ClientConfig::default());
    EnvelopeBuilder::new(&bank, &user, &config)
        .no_pubkey_digests(&Order::new(OrderType::HPB), "00112233445566778899AABBCCDDEEFF", Utc::now())
        .unwrap()
}

fn signed_with(envelope: &Envelope) -> Document {
    let mut envelope = envelope.clone();
    sign(&mut envelope, &keyring(Version::H004), &RustCrypto).unwrap();
    Document::parse(&envelope.to_bytes()).unwrap()
}

fn signed() -> Document {
    signed_with(&hpb_envelope())
}

#[test]
fn test_signature_sits_between_header_and_body() {
    let doc = signed();
    let names: Vec<_> = doc.root.elements().map(|e| e.name.local.as_str()).collect();
    assert_eq!(names, ["header", "AuthSignature", "body"]);
    let auth = doc.root.first("AuthSignature").unwrap();
    let signed_info = auth.first("SignedInfo").unwrap();
    assert_eq!(signed_info.name.prefix.as_deref(), Some("ds"));
    let reference = signed_info.first("Reference").unwrap();
    assert_eq!(reference.attribute("URI"), Some(auth_signature::REFERENCE_URI));
    assert_eq!(
        signed_info.first("SignatureMethod").unwrap().attribute("Algorithm"),
        Some(auth_signature::SIGNATURE_ALGORITHM)
    );
}

#[test]
fn test_digest_is_stable_across_reparse() {
    let envelope = hpb_envelope();
    let before = authenticated_digest(&RustCrypto, envelope.root());
    let doc = signed_with(&envelope);
    assert_eq!(authenticated_digest(&RustCrypto, &doc.root), before);
    let again = Document::parse(&doc.to_bytes()).unwrap();
    assert_eq!(authenticated_digest(&RustCrypto, &again.root), before);

    let embedded = doc
        .root
        .first("AuthSignature")
        .and_then(|a| a.first("SignedInfo"))
        .and_then(|s| s.first("Reference"))
        .and_then(|r| r.first("DigestValue"))
        .unwrap();
    assert_eq!(codec::decode_base64(&embedded.text_content()).unwrap(), before);
}

#[test]
fn test_verify_with_user_key() {
    let doc = signed();
    let public = keys().user_x.to_public_key();
    let result = check(&doc.root, &public, &RustCrypto).unwrap();
    assert!(result.digest_matches());
    assert!(result.signature_valid);
    verify(&doc.root, &public, &RustCrypto).unwrap();

    let other = keys().bank_x.to_public_key();
    assert!(matches!(
        verify(&doc.root, &other, &RustCrypto),
        Err(Error::Crypto(CryptoError::BadSignature))
    ));
}

#[test]
fn test_tampered_header_is_detected() {
    let xml = signed().to_xml().replace("myHostId", "otherHost");
    let doc = Document::parse(xml.as_bytes()).unwrap();
    let result = check(&doc.root, &keys().user_x.to_public_key(), &RustCrypto).unwrap();
    assert!(!result.digest_matches());
    assert!(result.signature_valid);
    assert!(matches!(
        verify(&doc.root, &keys().user_x.to_public_key(), &RustCrypto),
        Err(Error::Crypto(CryptoError::DigestMismatch))
    ));
}

#[test]
fn test_sign_requires_key_and_signed_kind() {
    let mut envelope = hpb_envelope();
    assert!(matches!(
        sign(&mut envelope, &Keyring::new(), &RustCrypto),
        Err(Error::Precondition(PreconditionError::MissingKey(KeySlot::UserAuthentication)))
    ));
    assert!(envelope.root().first("AuthSignature").is_none());

    let (bank, user, config) = (bank(Version::H004), user(), ClientConfig::default());
    let mut unsecured = EnvelopeBuilder::new(&bank, &user, &config)
        .unsecured(&Order::new(OrderType::INI), b"<x/>")
        .unwrap();
    assert!(matches!(
        sign(&mut unsecured, &keyring(Version::H004), &RustCrypto),
        Err(Error::Precondition(PreconditionError::InvalidState(_)))
    ));
}

#[test]
fn test_bank_signed_response() {
    let mut root = Element::new("ebicsResponse")
        .declare(None, "urn:org:ebics:H004")
        .declare(Some("ds"), crate::xml::XMLDSIG_NS)
        .child(
            Element::new("header")
                .attr("authenticate", "true")
                .child(Element::new("mutable").child(Element::leaf("ReturnCode", "000000"))),
        )
        .child(Element::new("body").child(Element::leaf("ReturnCode", "000000").attr("authenticate", "true")));
    sign_document(&mut root, &keys().bank_x, &RustCrypto).unwrap();
    let doc = Document::parse(&Document::new(root).to_bytes()).unwrap();
    verify(&doc.root, &keys().bank_x.to_public_key(), &RustCrypto).unwrap();

    let unsigned = Document::parse(br#"<ebicsResponse xmlns="urn:org:ebics:H004"/>"#).unwrap();
    assert!(matches!(
        check(&unsigned.root, &keys().bank_x.to_public_key(), &RustCrypto),
        Err(Error::UnexpectedResponse(_))
    ));
}
