//! Protocol generation table.
//!
//! Everything that differs between H003, H004 and H005 and can be expressed
//! as data lives here; the envelope builder and response parser read it
//! instead of branching on the version.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PreconditionError;

/// Namespace of the version-independent HEV exchange.
pub const HEV_NAMESPACE: &str = "http://www.ebics.org/H000";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Version {
    H003,
    H004,
    H005,
}

impl Version {
    pub const ALL: [Version; 3] = [Version::H003, Version::H004, Version::H005];

    pub fn as_str(self) -> &'static str {
        match self {
            Version::H003 => "H003",
            Version::H004 => "H004",
            Version::H005 => "H005",
        }
    }

    pub fn descriptor(self) -> &'static VersionDescriptor {
        match self {
            Version::H003 => &H003,
            Version::H004 => &H004,
            Version::H005 => &H005,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Version {
    type Err = PreconditionError;

    /// Accepts the protocol tag or the EBICS release number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "H003" | "2.4" => Ok(Version::H003),
            "H004" | "2.5" => Ok(Version::H004),
            "H005" | "3.0" => Ok(Version::H005),
            other => Err(PreconditionError::UnsupportedVersion(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    /// Host version probe, no header, no signature.
    Hev,
    /// INI and HIA: plain order data, no `AuthSignature`.
    Unsecured,
    /// HPB: signed, but the bank key digests are not known yet.
    NoPubKeyDigests,
    /// Regular signed request.
    Secured,
    /// Upload without electronic signature.
    Unsigned,
}

impl EnvelopeKind {
    pub fn root_name(self) -> &'static str {
        match self {
            EnvelopeKind::Hev => "ebicsHEVRequest",
            EnvelopeKind::Unsecured => "ebicsUnsecuredRequest",
            EnvelopeKind::NoPubKeyDigests => "ebicsNoPubKeyDigestsRequest",
            EnvelopeKind::Secured => "ebicsRequest",
            EnvelopeKind::Unsigned => "ebicsUnsignedRequest",
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, EnvelopeKind::NoPubKeyDigests | EnvelopeKind::Secured)
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.root_name())
    }
}

/// Shape of the `OrderDetails` element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderDetailsShape {
    /// `OrderType` + `OrderAttribute` (+ order specific params), H003/H004.
    OrderTypeAndAttribute,
    /// `AdminOrderType` + `Service` based params, H005.
    AdminOrderTypeAndService,
}

#[derive(Debug, PartialEq, Eq)]
pub struct VersionDescriptor {
    pub version: Version,
    /// EBICS release as announced by HEV, e.g. `02.50`.
    pub release: &'static str,
    pub namespace: &'static str,
    /// Namespace of the signature payloads (`SignaturePubKeyOrderData`,
    /// `UserSignatureData`).
    pub signature_namespace: &'static str,
    pub order_details: OrderDetailsShape,
    pub data_digest: bool,
    pub additional_order_info: bool,
    pub unsigned_requests: bool,
    /// H003 uploads carry a client generated `OrderID`.
    pub upload_order_id: bool,
    /// Key management payloads must carry X.509 certificates.
    pub certificates_required: bool,
    pub signature_version: &'static str,
    pub authentication_version: &'static str,
    pub encryption_version: &'static str,
}

pub static H003: VersionDescriptor = VersionDescriptor {
    version: Version::H003,
    release: "02.40",
    namespace: "http://www.ebics.org/H003",
    signature_namespace: "http://www.ebics.org/S001",
    order_details: OrderDetailsShape::OrderTypeAndAttribute,
    data_digest: false,
    additional_order_info: false,
    unsigned_requests: false,
    upload_order_id: true,
    certificates_required: false,
    signature_version: "A005",
    authentication_version: "X002",
    encryption_version: "E002",
};

pub static H004: VersionDescriptor = VersionDescriptor {
    version: Version::H004,
    release: "02.50",
    namespace: "urn:org:ebics:H004",
    signature_namespace: "http://www.ebics.org/S001",
    order_details: OrderDetailsShape::OrderTypeAndAttribute,
    data_digest: false,
    additional_order_info: false,
    unsigned_requests: false,
    upload_order_id: false,
    certificates_required: false,
    signature_version: "A006",
    authentication_version: "X002",
    encryption_version: "E002",
};

pub static H005: VersionDescriptor = VersionDescriptor {
    version: Version::H005,
    release: "03.00",
    namespace: "urn:org:ebics:H005",
    signature_namespace: "http://www.ebics.org/S002",
    order_details: OrderDetailsShape::AdminOrderTypeAndService,
    data_digest: true,
    additional_order_info: true,
    unsigned_requests: true,
    upload_order_id: false,
    certificates_required: true,
    signature_version: "A006",
    authentication_version: "X002",
    encryption_version: "E002",
};

impl VersionDescriptor {
    /// Looks a descriptor up by protocol tag, failing closed.
    pub fn for_tag(tag: &str) -> Result<&'static VersionDescriptor, PreconditionError> {
        tag.parse::<Version>().map(Version::descriptor)
    }

    pub fn root_name(&self, kind: EnvelopeKind) -> &'static str {
        kind.root_name()
    }

    pub fn supports(&self, kind: EnvelopeKind) -> bool {
        kind != EnvelopeKind::Unsigned || self.unsigned_requests
    }
}
