//! Request envelopes.
//!
//! [`build`] turns plain header and body values into an unsigned document
//! for one of the five envelope kinds; version differences come from the
//! [`VersionDescriptor`] table. [`EnvelopeBuilder`] fills the values from a
//! bank, a user and the client configuration for the usual requests.
//!
//! Element order follows the EBICS schemas:
//!
//! ```text
//! root (Version, Revision)
//!   header authenticate="true"
//!     static   HostID Nonce Timestamp PartnerID UserID Product OrderDetails
//!              BankPubKeyDigests SecurityMedium NumSegments
//!              (or HostID TransactionID after initialisation)
//!     mutable  TransactionPhase SegmentNumber
//!   AuthSignature   (inserted when signing)
//!   body
//! ```

use chrono::{DateTime, Utc};

use crate::codec;
use crate::config::{Bank, ClientConfig, Product, User};
use crate::error::PreconditionError;
use crate::order::{Direction, Order, OrderParams, OrderType, Service, VeuParams, VeuTarget};
use crate::transaction::{ReceiptCode, TransactionPhase};
use crate::version::{EnvelopeKind, OrderDetailsShape, Version, VersionDescriptor, HEV_NAMESPACE};
use crate::xml::{Document, Element, XMLDSIG_NS};

pub const SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const REVISION: &str = "1";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StaticHeader {
    pub host_id: String,
    pub nonce: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub partner_id: Option<String>,
    pub user_id: Option<String>,
    pub product: Option<Product>,
    pub order_details: Option<OrderDetails>,
    pub bank_pub_key_digests: Option<BankPubKeyDigests>,
    pub security_medium: Option<String>,
    pub num_segments: Option<u32>,
    pub transaction_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderDetails {
    pub order: Order,
    /// Client generated order id, H003 uploads only.
    pub order_id: Option<String>,
    /// Country code used for `FileFormat` when the order gives none.
    pub country_code: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentMark {
    pub number: u32,
    pub last: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MutableHeader {
    pub phase: Option<TransactionPhase>,
    pub segment: Option<SegmentMark>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyDigest {
    /// Process version of the digested key, `X002` or `E002`.
    pub version: String,
    pub digest: [u8; 32],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BankPubKeyDigests {
    pub authentication: KeyDigest,
    pub encryption: KeyDigest,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataEncryptionInfo {
    pub encryption_pub_key_digest: KeyDigest,
    /// Transaction key, RSA encrypted for the bank.
    pub transaction_key: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataDigest {
    pub signature_version: String,
    pub digest: Vec<u8>,
}

/// Payload of a `DataTransfer` body. Byte fields hold binary data; they are
/// base64 encoded when rendered.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataTransfer {
    pub encryption_info: Option<DataEncryptionInfo>,
    pub signature_data: Option<Vec<u8>>,
    pub data_digest: Option<DataDigest>,
    pub additional_order_info: Option<String>,
    pub order_data: Option<Vec<u8>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Body {
    #[default]
    Empty,
    DataTransfer(DataTransfer),
    Receipt(ReceiptCode),
}

/// A built request: the document plus what it was built as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub version: Version,
    pub document: Document,
}

impl Envelope {
    pub fn root(&self) -> &Element {
        &self.document.root
    }

    pub fn header(&self) -> Option<&Element> {
        self.document.root.first("header")
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.document.to_bytes()
    }
}

/// Builds an unsigned envelope of `kind` for `descriptor`.
pub fn build(
    kind: EnvelopeKind,
    descriptor: &VersionDescriptor,
    header: StaticHeader,
    mutable: MutableHeader,
    body: Body,
) -> Result<Envelope, PreconditionError> {
    if !descriptor.supports(kind) {
        return Err(PreconditionError::UnsupportedEnvelope {
            kind,
            version: descriptor.version,
        });
    }
    if kind == EnvelopeKind::Hev {
        let root = Element::new(kind.root_name())
            .declare(None, HEV_NAMESPACE)
            .child(Element::leaf("HostID", header.host_id));
        return Ok(Envelope {
            kind,
            version: descriptor.version,
            document: Document::new(root),
        });
    }

    let root = Element::new(kind.root_name())
        .declare(None, descriptor.namespace)
        .declare(Some("ds"), XMLDSIG_NS)
        .attr("Version", descriptor.version.as_str())
        .attr("Revision", REVISION)
        .child(
            Element::new("header")
                .attr("authenticate", "true")
                .child(static_header(descriptor, header)?)
                .child(mutable_header(mutable)),
        )
        .child(body_element(descriptor, body)?);
    Ok(Envelope {
        kind,
        version: descriptor.version,
        document: Document::new(root),
    })
}

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn static_header(descriptor: &VersionDescriptor, header: StaticHeader) -> Result<Element, PreconditionError> {
    let order_details = match header.order_details {
        Some(details) => Some(order_details(descriptor, &details)?),
        None => None,
    };
    Ok(Element::new("static")
        .child(Element::leaf("HostID", header.host_id))
        .maybe(header.transaction_id.map(|id| Element::leaf("TransactionID", id)))
        .maybe(header.nonce.map(|nonce| Element::leaf("Nonce", nonce)))
        .maybe(header.timestamp.map(|ts| Element::leaf("Timestamp", format_timestamp(&ts))))
        .maybe(header.partner_id.map(|id| Element::leaf("PartnerID", id)))
        .maybe(header.user_id.map(|id| Element::leaf("UserID", id)))
        .maybe(
            header
                .product
                .map(|p| Element::leaf("Product", p.name).attr("Language", p.language)),
        )
        .maybe(order_details)
        .maybe(header.bank_pub_key_digests.map(bank_pub_key_digests))
        .maybe(header.security_medium.map(|medium| Element::leaf("SecurityMedium", medium)))
        .maybe(header.num_segments.map(|n| Element::leaf("NumSegments", n.to_string()))))
}

fn mutable_header(mutable: MutableHeader) -> Element {
    Element::new("mutable")
        .maybe(mutable.phase.map(|phase| Element::leaf("TransactionPhase", phase.as_str())))
        .maybe(mutable.segment.map(|segment| {
            Element::leaf("SegmentNumber", segment.number.to_string())
                .attr("lastSegment", if segment.last { "true" } else { "false" })
        }))
}

fn key_digest(name: &str, digest: KeyDigest) -> Element {
    Element::leaf(name, codec::encode_base64(&digest.digest))
        .attr("Version", digest.version)
        .attr("Algorithm", SHA256_ALGORITHM)
}

fn bank_pub_key_digests(digests: BankPubKeyDigests) -> Element {
    Element::new("BankPubKeyDigests")
        .child(key_digest("Authentication", digests.authentication))
        .child(key_digest("Encryption", digests.encryption))
}

fn body_element(descriptor: &VersionDescriptor, body: Body) -> Result<Element, PreconditionError> {
    let body_element = Element::new("body");
    Ok(match body {
        Body::Empty => body_element,
        Body::Receipt(code) => body_element.child(
            Element::new("TransferReceipt")
                .attr("authenticate", "true")
                .child(Element::leaf("ReceiptCode", code.as_str())),
        ),
        Body::DataTransfer(transfer) => {
            if transfer.data_digest.is_some() && !descriptor.data_digest {
                return Err(PreconditionError::InvalidState(format!(
                    "DataDigest is not part of {}",
                    descriptor.version
                )));
            }
            if transfer.additional_order_info.is_some() && !descriptor.additional_order_info {
                return Err(PreconditionError::InvalidState(format!(
                    "AdditionalOrderInfo is not part of {}",
                    descriptor.version
                )));
            }
            let info = transfer.encryption_info.map(|info| {
                Element::new("DataEncryptionInfo")
                    .attr("authenticate", "true")
                    .child(key_digest("EncryptionPubKeyDigest", info.encryption_pub_key_digest))
                    .child(Element::leaf("TransactionKey", codec::encode_base64(&info.transaction_key)))
            });
            let signature = transfer.signature_data.map(|data| {
                Element::leaf("SignatureData", codec::encode_base64(&data)).attr("authenticate", "true")
            });
            let digest = transfer.data_digest.map(|digest| {
                Element::leaf("DataDigest", codec::encode_base64(&digest.digest))
                    .attr("SignatureVersion", digest.signature_version)
            });
            body_element.child(
                Element::new("DataTransfer")
                    .maybe(info)
                    .maybe(signature)
                    .maybe(digest)
                    .maybe(
                        transfer
                            .additional_order_info
                            .map(|text| Element::leaf("AdditionalOrderInfo", text)),
                    )
                    .maybe(
                        transfer
                            .order_data
                            .map(|data| Element::leaf("OrderData", codec::encode_base64(&data))),
                    ),
            )
        }
    })
}

/// `OrderDetails` in the shape of the protocol version.
pub fn order_details(descriptor: &VersionDescriptor, details: &OrderDetails) -> Result<Element, PreconditionError> {
    let order = &details.order;
    order.validate(descriptor)?;
    let element = match descriptor.order_details {
        OrderDetailsShape::OrderTypeAndAttribute => Element::new("OrderDetails")
            .child(Element::leaf("OrderType", order.order_type.as_str()))
            .maybe(details.order_id.clone().map(|id| Element::leaf("OrderID", id)))
            .child(Element::leaf("OrderAttribute", order.attribute()))
            .maybe(classic_params(details)),
        OrderDetailsShape::AdminOrderTypeAndService => Element::new("OrderDetails")
            .child(Element::leaf("AdminOrderType", order.order_type.as_str()))
            .maybe(service_params(order)),
    };
    Ok(element)
}

fn date_range(order: &Order) -> Option<Element> {
    order.range.map(|range| {
        Element::new("DateRange")
            .child(Element::leaf("Start", range.start.format("%Y-%m-%d").to_string()))
            .child(Element::leaf("End", range.end.format("%Y-%m-%d").to_string()))
    })
}

/// Order parameters of H003 and H004.
fn classic_params(details: &OrderDetails) -> Option<Element> {
    let order = &details.order;
    match (&order.params, order.order_type) {
        (_, OrderType::INI | OrderType::HIA | OrderType::HPB) => None,
        (OrderParams::FileFormat(format), order_type) => {
            let country = if format.country_code.is_empty() {
                details.country_code.clone()
            } else {
                format.country_code.clone()
            };
            let file_format = Element::leaf("FileFormat", format.format.clone()).attr("CountryCode", country);
            Some(match order_type {
                OrderType::FUL => Element::new("FULOrderParams").child(file_format),
                _ => Element::new("FDLOrderParams").maybe(date_range(order)).child(file_format),
            })
        }
        (OrderParams::Veu(veu), order_type) => Some(veu_params(order_type, veu)),
        (_, OrderType::HVU) => Some(Element::new("HVUOrderParams")),
        (_, OrderType::HVZ) => Some(Element::new("HVZOrderParams")),
        _ => Some(Element::new("StandardOrderParams").maybe(date_range(order))),
    }
}

/// Order parameters of H005.
fn service_params(order: &Order) -> Option<Element> {
    match (&order.params, order.order_type) {
        (_, OrderType::INI | OrderType::HIA | OrderType::HPB) => None,
        (OrderParams::Service(service), OrderType::BTU) => Some(
            Element::new("BTUOrderParams")
                .child(service_element(service))
                .maybe(order.signed.then(|| Element::leaf("SignatureFlag", "true"))),
        ),
        (OrderParams::Service(service), _) => Some(
            Element::new("BTDOrderParams")
                .child(service_element(service))
                .maybe(date_range(order)),
        ),
        (OrderParams::Veu(veu), order_type) => Some(veu_params(order_type, veu)),
        (_, OrderType::HVU) => Some(Element::new("HVUOrderParams")),
        (_, OrderType::HVZ) => Some(Element::new("HVZOrderParams")),
        _ if order.direction() == Direction::Download => {
            Some(Element::new("StandardOrderParams").maybe(date_range(order)))
        }
        _ => None,
    }
}

pub fn service_element(service: &Service) -> Element {
    let message = &service.message;
    let mut msg_name = Element::new("MsgName");
    for (name, value) in [
        ("version", &message.version),
        ("variant", &message.variant),
        ("format", &message.format),
    ] {
        if let Some(value) = value {
            msg_name = msg_name.attr(name, value.clone());
        }
    }
    Element::new("Service")
        .child(Element::leaf("ServiceName", service.name.clone()))
        .maybe(service.scope.clone().map(|scope| Element::leaf("Scope", scope)))
        .maybe(service.option.clone().map(|option| Element::leaf("ServiceOption", option)))
        .maybe(
            service
                .container
                .clone()
                .map(|container| Element::new("Container").attr("containerType", container)),
        )
        .child(msg_name.text(message.name.clone()))
}

fn veu_params(order_type: OrderType, veu: &VeuParams) -> Element {
    let target = match &veu.target {
        VeuTarget::OrderType(order_type) => Element::leaf("OrderType", order_type.clone()),
        VeuTarget::Service(service) => service_element(service),
    };
    let element = Element::new(&format!("{}OrderParams", order_type.as_str()))
        .child(Element::leaf("PartnerID", veu.partner_id.clone()))
        .child(target)
        .child(Element::leaf("OrderID", veu.order_id.clone()));
    match (order_type, veu.flags) {
        (OrderType::HVT, Some(flags)) => element.child(
            Element::new("OrderFlags")
                .attr("completeOrderData", flags.complete_order_data.to_string())
                .attr("fetchLimit", flags.fetch_limit.to_string())
                .attr("fetchOffset", flags.fetch_offset.to_string()),
        ),
        _ => element,
    }
}

/// Fills envelope values from the client's bank, user and configuration.
pub struct EnvelopeBuilder<'a> {
    descriptor: &'static VersionDescriptor,
    bank: &'a Bank,
    user: &'a User,
    config: &'a ClientConfig,
}

impl<'a> EnvelopeBuilder<'a> {
    pub fn new(bank: &'a Bank, user: &'a User, config: &'a ClientConfig) -> Self {
        EnvelopeBuilder {
            descriptor: bank.version.descriptor(),
            bank,
            user,
            config,
        }
    }

    pub fn descriptor(&self) -> &'static VersionDescriptor {
        self.descriptor
    }

    fn details(&self, order: &Order, order_id: Option<String>) -> OrderDetails {
        OrderDetails {
            order: order.clone(),
            order_id,
            country_code: self.bank.country_code.clone(),
        }
    }

    fn initialisation_header(
        &self,
        order: &Order,
        nonce: &str,
        timestamp: DateTime<Utc>,
        order_id: Option<String>,
    ) -> StaticHeader {
        StaticHeader {
            host_id: self.bank.host_id.clone(),
            nonce: Some(nonce.to_string()),
            timestamp: Some(timestamp),
            partner_id: Some(self.user.partner_id.clone()),
            user_id: Some(self.user.user_id.clone()),
            product: Some(self.config.product.clone()),
            order_details: Some(self.details(order, order_id)),
            security_medium: Some(self.config.security_medium.clone()),
            ..Default::default()
        }
    }

    fn transaction_header(&self, transaction_id: &str) -> StaticHeader {
        StaticHeader {
            host_id: self.bank.host_id.clone(),
            transaction_id: Some(transaction_id.to_string()),
            ..Default::default()
        }
    }

    pub fn hev(&self) -> Result<Envelope, PreconditionError> {
        let header = StaticHeader {
            host_id: self.bank.host_id.clone(),
            ..Default::default()
        };
        build(EnvelopeKind::Hev, self.descriptor, header, MutableHeader::default(), Body::Empty)
    }

    /// INI/HIA request. `order_data` is the key payload document; it is
    /// compressed and base64 encoded, not encrypted.
    pub fn unsecured(&self, order: &Order, order_data: &[u8]) -> Result<Envelope, PreconditionError> {
        let header = StaticHeader {
            host_id: self.bank.host_id.clone(),
            partner_id: Some(self.user.partner_id.clone()),
            user_id: Some(self.user.user_id.clone()),
            product: Some(self.config.product.clone()),
            order_details: Some(self.details(order, None)),
            security_medium: Some(self.config.security_medium.clone()),
            ..Default::default()
        };
        let body = Body::DataTransfer(DataTransfer {
            order_data: Some(codec::compress(order_data)),
            ..Default::default()
        });
        build(EnvelopeKind::Unsecured, self.descriptor, header, MutableHeader::default(), body)
    }

    /// HPB request: signed, without bank key digests.
    pub fn no_pubkey_digests(
        &self,
        order: &Order,
        nonce: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Envelope, PreconditionError> {
        let header = self.initialisation_header(order, nonce, timestamp, None);
        build(
            EnvelopeKind::NoPubKeyDigests,
            self.descriptor,
            header,
            MutableHeader::default(),
            Body::Empty,
        )
    }

    pub fn download_init(
        &self,
        order: &Order,
        nonce: &str,
        timestamp: DateTime<Utc>,
        digests: BankPubKeyDigests,
    ) -> Result<Envelope, PreconditionError> {
        let mut header = self.initialisation_header(order, nonce, timestamp, None);
        header.bank_pub_key_digests = Some(digests);
        let mutable = MutableHeader {
            phase: Some(TransactionPhase::Initialisation),
            segment: None,
        };
        build(EnvelopeKind::Secured, self.descriptor, header, mutable, Body::Empty)
    }

    /// Download transfer request for segment `number`.
    pub fn download_transfer(&self, transaction_id: &str, segment: SegmentMark) -> Result<Envelope, PreconditionError> {
        let mutable = MutableHeader {
            phase: Some(TransactionPhase::Transfer),
            segment: Some(segment),
        };
        build(
            EnvelopeKind::Secured,
            self.descriptor,
            self.transaction_header(transaction_id),
            mutable,
            Body::Empty,
        )
    }

    pub fn receipt(&self, transaction_id: &str, code: ReceiptCode) -> Result<Envelope, PreconditionError> {
        let mutable = MutableHeader {
            phase: Some(TransactionPhase::Receipt),
            segment: None,
        };
        build(
            EnvelopeKind::Secured,
            self.descriptor,
            self.transaction_header(transaction_id),
            mutable,
            Body::Receipt(code),
        )
    }

    /// Upload initialisation carrying the encrypted transaction key and the
    /// order signature; the order data follows in transfer requests.
    #[allow(clippy::too_many_arguments)]
    pub fn upload_init(
        &self,
        order: &Order,
        nonce: &str,
        timestamp: DateTime<Utc>,
        digests: BankPubKeyDigests,
        num_segments: u32,
        order_id: Option<String>,
        transfer: DataTransfer,
    ) -> Result<Envelope, PreconditionError> {
        let mut header = self.initialisation_header(order, nonce, timestamp, order_id);
        header.bank_pub_key_digests = Some(digests);
        header.num_segments = Some(num_segments);
        let mutable = MutableHeader {
            phase: Some(TransactionPhase::Initialisation),
            segment: None,
        };
        build(
            EnvelopeKind::Secured,
            self.descriptor,
            header,
            mutable,
            Body::DataTransfer(transfer),
        )
    }

    pub fn upload_transfer(
        &self,
        transaction_id: &str,
        segment: SegmentMark,
        order_data: Vec<u8>,
    ) -> Result<Envelope, PreconditionError> {
        let mutable = MutableHeader {
            phase: Some(TransactionPhase::Transfer),
            segment: Some(segment),
        };
        let body = Body::DataTransfer(DataTransfer {
            order_data: Some(order_data),
            ..Default::default()
        });
        build(
            EnvelopeKind::Secured,
            self.descriptor,
            self.transaction_header(transaction_id),
            mutable,
            body,
        )
    }

    /// Unsigned upload initialisation (3.0): no `AuthSignature`, no order
    /// signature, the first order data segment travels along.
    pub fn unsigned(
        &self,
        order: &Order,
        nonce: &str,
        timestamp: DateTime<Utc>,
        num_segments: u32,
        encryption_info: DataEncryptionInfo,
        first_segment: Vec<u8>,
    ) -> Result<Envelope, PreconditionError> {
        let mut header = self.initialisation_header(order, nonce, timestamp, None);
        header.num_segments = Some(num_segments);
        let body = Body::DataTransfer(DataTransfer {
            encryption_info: Some(encryption_info),
            order_data: Some(first_segment),
            ..Default::default()
        });
        build(
            EnvelopeKind::Unsigned,
            self.descriptor,
            header,
            MutableHeader::default(),
            body,
        )
    }
}
