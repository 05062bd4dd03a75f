//! Identification and authentication signature (X002).
//!
//! Every element carrying `authenticate="true"` is canonicalized (inclusive
//! C14N), the concatenation is hashed into `DigestValue`, and the
//! canonicalized `SignedInfo` is signed with RSA-SHA256. The resulting
//! `AuthSignature` goes between `header` and `body`.

use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::codec;
use crate::crypto::{CryptoError, CryptoProvider, SignatureScheme};
use crate::envelope::Envelope;
use crate::error::{PreconditionError, Result};
use crate::keyring::{KeySlot, Keyring};
use crate::xml::{canonicalize, canonicalize_authenticated, find_with_scope, Element, NamespaceScope};

pub const C14N_ALGORITHM: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const SIGNATURE_ALGORITHM: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const DIGEST_ALGORITHM: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const REFERENCE_URI: &str = "#xpointer(//*[@authenticate='true'])";

/// SHA-256 over the canonical form of all authenticated elements.
pub fn authenticated_digest<C: CryptoProvider + ?Sized>(crypto: &C, root: &Element) -> [u8; 32] {
    crypto.sha256(&canonicalize_authenticated(root))
}

fn signed_info(digest: &[u8]) -> Element {
    Element::new("ds:SignedInfo")
        .child(Element::new("ds:CanonicalizationMethod").attr("Algorithm", C14N_ALGORITHM))
        .child(Element::new("ds:SignatureMethod").attr("Algorithm", SIGNATURE_ALGORITHM))
        .child(
            Element::new("ds:Reference")
                .attr("URI", REFERENCE_URI)
                .child(
                    Element::new("ds:Transforms")
                        .child(Element::new("ds:Transform").attr("Algorithm", C14N_ALGORITHM)),
                )
                .child(Element::new("ds:DigestMethod").attr("Algorithm", DIGEST_ALGORITHM))
                .child(Element::leaf("ds:DigestValue", codec::encode_base64(digest))),
        )
}

/// Signs an envelope with the user's X key.
///
/// The private key is looked up first: without it nothing is canonicalized.
pub fn sign<C: CryptoProvider + ?Sized>(envelope: &mut Envelope, keyring: &Keyring, crypto: &C) -> Result<()> {
    let key = keyring.require_private(KeySlot::UserAuthentication)?;
    if !envelope.kind.is_signed() {
        return Err(PreconditionError::InvalidState(format!("{} is not signed", envelope.kind)).into());
    }
    sign_document(&mut envelope.document.root, key, crypto)?;
    Ok(())
}

/// Computes and inserts `AuthSignature` into `root`, right after `header`.
pub fn sign_document<C: CryptoProvider + ?Sized>(
    root: &mut Element,
    key: &RsaPrivateKey,
    crypto: &C,
) -> Result<(), CryptoError> {
    let digest = authenticated_digest(crypto, root);
    let signed_info = signed_info(&digest);
    // AuthSignature declares nothing, so SignedInfo sees the root's bindings
    let scope = NamespaceScope::new().extended(root);
    let canonical = canonicalize(&signed_info, &scope);
    let signature = crypto.rsa_sign(
        key,
        SignatureScheme::Pkcs1v15Sha256,
        &crypto.sha256(canonical.as_bytes()),
    )?;
    let auth_signature = Element::new("AuthSignature")
        .child(signed_info)
        .child(Element::leaf("ds:SignatureValue", codec::encode_base64(&signature)));
    let index = root.position("header").map_or(0, |i| i + 1);
    root.insert(index, auth_signature);
    Ok(())
}

/// Outcome of checking the `AuthSignature` of a document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureCheck {
    pub computed_digest: [u8; 32],
    pub embedded_digest: Vec<u8>,
    pub signature_valid: bool,
}

impl SignatureCheck {
    pub fn digest_matches(&self) -> bool {
        self.embedded_digest == self.computed_digest
    }

    pub fn is_valid(&self) -> bool {
        self.digest_matches() && self.signature_valid
    }
}

/// Recomputes the digest and checks the signature against `public_key`.
/// Fails only if the signature block is missing or malformed.
pub fn check<C: CryptoProvider + ?Sized>(root: &Element, public_key: &RsaPublicKey, crypto: &C) -> Result<SignatureCheck> {
    let auth_signature = root
        .first("AuthSignature")
        .ok_or_else(|| crate::Error::unexpected("document carries no AuthSignature"))?;
    let (signed_info, scope) = find_with_scope(root, &|e: &Element| e.name.local == "SignedInfo")
        .ok_or_else(|| crate::Error::unexpected("AuthSignature has no SignedInfo"))?;
    let embedded = signed_info
        .first("Reference")
        .and_then(|reference| reference.first("DigestValue"))
        .ok_or_else(|| crate::Error::unexpected("SignedInfo has no DigestValue"))?;
    let signature_value = auth_signature
        .first("SignatureValue")
        .ok_or_else(|| crate::Error::unexpected("AuthSignature has no SignatureValue"))?;

    let computed_digest = authenticated_digest(crypto, root);
    let embedded_digest = codec::decode_base64(&embedded.text_content())?;
    let signature = codec::decode_base64(&signature_value.text_content())?;
    let canonical = canonicalize(signed_info, &scope);
    let signature_valid = crypto
        .rsa_verify(
            public_key,
            SignatureScheme::Pkcs1v15Sha256,
            &crypto.sha256(canonical.as_bytes()),
            &signature,
        )
        .is_ok();
    Ok(SignatureCheck {
        computed_digest,
        embedded_digest,
        signature_valid,
    })
}

/// Like [`check`], but any mismatch is an error.
pub fn verify<C: CryptoProvider + ?Sized>(root: &Element, public_key: &RsaPublicKey, crypto: &C) -> Result<()> {
    let result = check(root, public_key, crypto)?;
    if !result.digest_matches() {
        return Err(CryptoError::DigestMismatch.into());
    }
    if !result.signature_valid {
        return Err(CryptoError::BadSignature.into());
    }
    Ok(())
}
