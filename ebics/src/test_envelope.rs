use chrono::{TimeZone, Utc};

use crate::codec;
use crate::config::ClientConfig;
use crate::crypto::RustCrypto;
use crate::envelope::{
    build, Body, DataDigest, DataTransfer, EnvelopeBuilder, KeyDigest, MutableHeader, SegmentMark, StaticHeader,
};
use crate::error::PreconditionError;
use crate::key_management;
use crate::keyring::KeySlot;
use crate::order::{FileFormat, MessageName, Order, OrderType, Service};
use crate::test_support::{bank, bank_keys, keyring, user, user_keyring, HOST_ID, PARTNER_ID, USER_ID};
use crate::transaction::ReceiptCode;
use crate::version::{EnvelopeKind, Version, HEV_NAMESPACE, H003, H004};
use crate::xml::{Document, Element};

const NONCE: &str = "0123456789ABCDEF0123456789ABCDEF";

fn reparse(envelope: &crate::envelope::Envelope) -> Document {
    Document::parse(&envelope.to_bytes()).unwrap()
}

fn child_names(element: &Element) -> Vec<String> {
    element.elements().map(|e| e.name.local.clone()).collect()
}

fn digests() -> crate::envelope::BankPubKeyDigests {
    let keys = bank_keys();
    crate::envelope::BankPubKeyDigests {
        authentication: KeyDigest {
            version: "X002".into(),
            digest: keys.authentication.digest(&RustCrypto),
        },
        encryption: KeyDigest {
            version: "E002".into(),
            digest: keys.encryption.digest(&RustCrypto),
        },
    }
}

#[test]
fn test_ini_envelope() {
    let (bank, user, config) = (bank(Version::H004), user(), ClientConfig::default());
    let keyring = user_keyring(Version::H004);
    let payload = key_management::signature_pub_key_order_data(&H004, &user, &keyring).unwrap();
    let envelope = EnvelopeBuilder::new(&bank, &user, &config)
        .unsecured(&Order::new(OrderType::INI), &payload.to_bytes())
        .unwrap();
    assert_eq!(envelope.kind, EnvelopeKind::Unsecured);

    let doc = reparse(&envelope);
    let ns = H004.namespace;
    let root = &doc.root;
    assert_eq!(root.name.local, "ebicsUnsecuredRequest");
    assert_eq!(root.attribute("Version"), Some("H004"));
    assert_eq!(root.attribute("Revision"), Some("1"));
    assert!(root.first("AuthSignature").is_none());

    let header = root.path_ns(ns, &["header", "static"]).unwrap();
    assert_eq!(header.first("HostID").unwrap().text_content(), HOST_ID);
    assert_eq!(header.first("PartnerID").unwrap().text_content(), PARTNER_ID);
    assert_eq!(header.first("UserID").unwrap().text_content(), USER_ID);
    let details = header.first("OrderDetails").unwrap();
    assert_eq!(details.first("OrderType").unwrap().text_content(), "INI");
    assert_eq!(details.first("OrderAttribute").unwrap().text_content(), "DZNNN");
    assert_eq!(child_names(details), ["OrderType", "OrderAttribute"]);

    let order_data = root.path_ns(ns, &["body", "DataTransfer", "OrderData"]).unwrap();
    let inflated = codec::decompress(&codec::decode_base64(&order_data.text_content()).unwrap()).unwrap();
    assert_eq!(inflated, payload.to_bytes());
    let signature_payload = Document::parse(&inflated).unwrap();
    assert_eq!(signature_payload.root.name.local, "SignaturePubKeyOrderData");
    assert_eq!(signature_payload.root.namespace.as_deref(), Some("http://www.ebics.org/S001"));
    let info = signature_payload.root.first("SignaturePubKeyInfo").unwrap();
    assert_eq!(info.first("SignatureVersion").unwrap().text_content(), "A006");
    assert!(info.path_ns("http://www.ebics.org/S001", &["PubKeyValue"]).is_some());
}

#[test]
fn test_hpb_envelope() {
    let (bank, user, config) = (bank(Version::H004), user(), ClientConfig::default());
    let timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
    let envelope = EnvelopeBuilder::new(&bank, &user, &config)
        .no_pubkey_digests(&Order::new(OrderType::HPB), NONCE, timestamp)
        .unwrap();
    let doc = reparse(&envelope);
    let ns = H004.namespace;
    assert_eq!(doc.root.name.local, "ebicsNoPubKeyDigestsRequest");

    let header = doc.root.first_ns(ns, "header").unwrap();
    assert_eq!(header.attribute("authenticate"), Some("true"));
    let mutable = header.first_ns(ns, "mutable").unwrap();
    assert!(mutable.children.is_empty());
    let header_static = header.first_ns(ns, "static").unwrap();
    assert_eq!(
        child_names(header_static),
        ["HostID", "Nonce", "Timestamp", "PartnerID", "UserID", "Product", "OrderDetails", "SecurityMedium"]
    );
    assert_eq!(header_static.first("Timestamp").unwrap().text_content(), "2024-03-01T12:30:05.000Z");
    assert_eq!(header_static.first("Nonce").unwrap().text_content(), NONCE);
    assert_eq!(header_static.first("SecurityMedium").unwrap().text_content(), "0000");
    let details = header_static.first("OrderDetails").unwrap();
    assert_eq!(details.first("OrderAttribute").unwrap().text_content(), "DZHNN");
    assert_eq!(child_names(&doc.root), ["header", "body"]);
}

#[test]
fn test_download_init_header_order() {
    let (bank, user, config) = (bank(Version::H004), user(), ClientConfig::default());
    let envelope = EnvelopeBuilder::new(&bank, &user, &config)
        .download_init(&Order::new(OrderType::STA), NONCE, Utc::now(), digests())
        .unwrap();
    let doc = reparse(&envelope);
    let ns = H004.namespace;
    let header_static = doc.root.path_ns(ns, &["header", "static"]).unwrap();
    assert_eq!(
        child_names(header_static),
        [
            "HostID",
            "Nonce",
            "Timestamp",
            "PartnerID",
            "UserID",
            "Product",
            "OrderDetails",
            "BankPubKeyDigests",
            "SecurityMedium"
        ]
    );
    let product = header_static.first("Product").unwrap();
    assert_eq!(product.attribute("Language"), Some("de"));
    let authentication = header_static.path_ns(ns, &["BankPubKeyDigests", "Authentication"]).unwrap();
    assert_eq!(authentication.attribute("Version"), Some("X002"));
    assert_eq!(
        authentication.attribute("Algorithm"),
        Some("http://www.w3.org/2001/04/xmlenc#sha256")
    );
    let details = header_static.first("OrderDetails").unwrap();
    assert_eq!(child_names(details), ["OrderType", "OrderAttribute", "StandardOrderParams"]);
    let mutable = doc.root.path_ns(ns, &["header", "mutable", "TransactionPhase"]).unwrap();
    assert_eq!(mutable.text_content(), "Initialisation");
}

#[test]
fn test_transfer_and_receipt() {
    let (bank, user, config) = (bank(Version::H004), user(), ClientConfig::default());
    let builder = EnvelopeBuilder::new(&bank, &user, &config);
    let ns = H004.namespace;

    let transfer = reparse(
        &builder
            .download_transfer("TX1", SegmentMark { number: 2, last: true })
            .unwrap(),
    );
    let header_static = transfer.root.path_ns(ns, &["header", "static"]).unwrap();
    assert_eq!(child_names(header_static), ["HostID", "TransactionID"]);
    let segment = transfer.root.path_ns(ns, &["header", "mutable", "SegmentNumber"]).unwrap();
    assert_eq!(segment.text_content(), "2");
    assert_eq!(segment.attribute("lastSegment"), Some("true"));

    for (code, literal) in [(ReceiptCode::Positive, "0"), (ReceiptCode::Negative, "1")] {
        let receipt = reparse(&builder.receipt("TX1", code).unwrap());
        let phase = receipt.root.path_ns(ns, &["header", "mutable", "TransactionPhase"]).unwrap();
        assert_eq!(phase.text_content(), "Receipt");
        let element = receipt.root.path_ns(ns, &["body", "TransferReceipt"]).unwrap();
        assert!(element.is_authenticated());
        assert_eq!(element.first("ReceiptCode").unwrap().text_content(), literal);
    }
}

#[test]
fn test_fdl_params_use_bank_country() {
    let bank = bank(Version::H004).with_country_code("CH");
    let (user, config) = (user(), ClientConfig::default());
    let order = Order::fdl(FileFormat {
        format: "camt.xxx.cfonb120.stm".into(),
        country_code: String::new(),
    });
    let doc = reparse(
        &EnvelopeBuilder::new(&bank, &user, &config)
            .download_init(&order, NONCE, Utc::now(), digests())
            .unwrap(),
    );
    let format = doc
        .root
        .path_ns(H004.namespace, &["header", "static", "OrderDetails", "FDLOrderParams", "FileFormat"])
        .unwrap();
    assert_eq!(format.text_content(), "camt.xxx.cfonb120.stm");
    assert_eq!(format.attribute("CountryCode"), Some("CH"));
}

#[test]
fn test_h005_btd_details() {
    let (bank, user, config) = (bank(Version::H005), user(), ClientConfig::default());
    let service = Service::new("EOP", MessageName::new("camt.053").version("08"))
        .scope("CH")
        .container("ZIP");
    let doc = reparse(
        &EnvelopeBuilder::new(&bank, &user, &config)
            .download_init(&Order::btd(service), NONCE, Utc::now(), digests())
            .unwrap(),
    );
    let ns = "urn:org:ebics:H005";
    assert_eq!(doc.root.namespace.as_deref(), Some(ns));
    let details = doc.root.path_ns(ns, &["header", "static", "OrderDetails"]).unwrap();
    assert_eq!(details.first("AdminOrderType").unwrap().text_content(), "BTD");
    assert!(details.first("OrderAttribute").is_none());
    let service = details.path_ns(ns, &["BTDOrderParams", "Service"]).unwrap();
    assert_eq!(child_names(service), ["ServiceName", "Scope", "Container", "MsgName"]);
    let msg_name = service.first("MsgName").unwrap();
    assert_eq!(msg_name.text_content(), "camt.053");
    assert_eq!(msg_name.attribute("version"), Some("08"));
    assert_eq!(service.first("Container").unwrap().attribute("containerType"), Some("ZIP"));
}

#[test]
fn test_upload_init_per_version() {
    let user = user();
    let config = ClientConfig::default();
    let transfer = DataTransfer {
        signature_data: Some(b"signature".to_vec()),
        ..Default::default()
    };

    let h003 = bank(Version::H003);
    let doc = reparse(
        &EnvelopeBuilder::new(&h003, &user, &config)
            .upload_init(&Order::new(OrderType::CCT), NONCE, Utc::now(), digests(), 2, Some("A1B2".into()), transfer.clone())
            .unwrap(),
    );
    let header_static = doc.root.path_ns(H003.namespace, &["header", "static"]).unwrap();
    assert_eq!(header_static.first("NumSegments").unwrap().text_content(), "2");
    let details = header_static.first("OrderDetails").unwrap();
    assert_eq!(child_names(details), ["OrderType", "OrderID", "OrderAttribute", "StandardOrderParams"]);
    assert_eq!(details.first("OrderAttribute").unwrap().text_content(), "OZHNN");

    let h004 = bank(Version::H004);
    let with_digest = DataTransfer {
        data_digest: Some(DataDigest {
            signature_version: "A006".into(),
            digest: vec![1; 32],
        }),
        ..transfer.clone()
    };
    assert!(matches!(
        EnvelopeBuilder::new(&h004, &user, &config).upload_init(
            &Order::new(OrderType::CCT),
            NONCE,
            Utc::now(),
            digests(),
            1,
            None,
            with_digest.clone()
        ),
        Err(PreconditionError::InvalidState(_))
    ));

    let h005 = bank(Version::H005);
    let service = Service::new("SCT", MessageName::new("pain.001"));
    let doc = reparse(
        &EnvelopeBuilder::new(&h005, &user, &config)
            .upload_init(&Order::btu(service), NONCE, Utc::now(), digests(), 1, None, with_digest)
            .unwrap(),
    );
    let ns = "urn:org:ebics:H005";
    let data_transfer = doc.root.path_ns(ns, &["body", "DataTransfer"]).unwrap();
    assert_eq!(child_names(data_transfer), ["SignatureData", "DataDigest"]);
    let digest = data_transfer.first("DataDigest").unwrap();
    assert_eq!(digest.attribute("SignatureVersion"), Some("A006"));
    let flag = doc
        .root
        .path_ns(ns, &["header", "static", "OrderDetails", "BTUOrderParams", "SignatureFlag"])
        .unwrap();
    assert_eq!(flag.text_content(), "true");
}

#[test]
fn test_unsigned_needs_h005() {
    let user = user();
    let config = ClientConfig::default();
    let keyring = keyring(Version::H005);
    let info = crate::data_encryption::TransactionKey::generate(&RustCrypto)
        .wrap(&RustCrypto, keyring.require(KeySlot::BankEncryption).unwrap())
        .unwrap();
    let order = Order::btu(Service::new("SCT", MessageName::new("pain.001"))).unsigned();

    let h005 = bank(Version::H005);
    let envelope = EnvelopeBuilder::new(&h005, &user, &config)
        .unsigned(&order, NONCE, Utc::now(), 1, info.clone(), vec![7; 32])
        .unwrap();
    let doc = reparse(&envelope);
    assert_eq!(doc.root.name.local, "ebicsUnsignedRequest");
    let data_transfer = doc.root.path_ns("urn:org:ebics:H005", &["body", "DataTransfer"]).unwrap();
    assert_eq!(child_names(data_transfer), ["DataEncryptionInfo", "OrderData"]);

    let h004 = bank(Version::H004);
    let order = Order::new(OrderType::CCT).unsigned();
    assert!(EnvelopeBuilder::new(&h004, &user, &config)
        .unsigned(&order, NONCE, Utc::now(), 1, info, vec![7; 32])
        .is_err());
    assert!(matches!(
        build(
            EnvelopeKind::Unsigned,
            &H004,
            StaticHeader::default(),
            MutableHeader::default(),
            Body::Empty
        ),
        Err(PreconditionError::UnsupportedEnvelope { .. })
    ));
}

#[test]
fn test_hev_request() {
    let (bank, user, config) = (bank(Version::H005), user(), ClientConfig::default());
    let doc = reparse(&EnvelopeBuilder::new(&bank, &user, &config).hev().unwrap());
    assert_eq!(doc.root.name.local, "ebicsHEVRequest");
    assert_eq!(doc.root.namespace.as_deref(), Some(HEV_NAMESPACE));
    assert!(doc.root.attributes.is_empty());
    assert_eq!(child_names(&doc.root), ["HostID"]);
}

#[test]
fn test_order_validation_runs_before_building() {
    let (bank, user, config) = (bank(Version::H005), user(), ClientConfig::default());
    let result = EnvelopeBuilder::new(&bank, &user, &config).download_init(
        &Order::new(OrderType::STA),
        NONCE,
        Utc::now(),
        digests(),
    );
    assert!(matches!(
        result,
        Err(PreconditionError::UnsupportedOrderType { order_type: OrderType::STA, version: Version::H005 })
    ));
}

#[test]
fn test_h005_key_payloads_need_certificates() {
    let user = user();
    let mut keyring = user_keyring(Version::H005);
    let payload = key_management::hia_request_order_data(Version::H005.descriptor(), &user, &keyring).unwrap();
    let info = payload.root.first("AuthenticationPubKeyInfo").unwrap();
    assert!(info.first("X509Data").is_some());
    assert!(info.first("PubKeyValue").is_none());

    let mut entry = keyring.remove(KeySlot::UserEncryption).unwrap();
    entry.certificate = None;
    keyring.set(KeySlot::UserEncryption, entry);
    assert!(matches!(
        key_management::hia_request_order_data(Version::H005.descriptor(), &user, &keyring),
        Err(PreconditionError::MissingCertificate(KeySlot::UserEncryption))
    ));
}
