//! In-process bank for the client tests: answers EBICS requests the way a
//! bank server would, verifying signatures and decrypting uploads.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use ebics::auth_signature;
use ebics::codec;
use ebics::crypto::{CryptoProvider, RustCrypto, SignatureScheme};
use ebics::version::HEV_NAMESPACE;
use ebics::xml::{Document, Element, XMLDSIG_NS};
use ebics::{
    Bank, BankKeys, KeyEntry, KeySlot, KeyUsage, Keyring, TransactionKey, Transport, TransportError, User,
    Version,
};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;

pub const HOST_ID: &str = "myHostId";
pub const URL: &str = "https://ebics.bank.example/ebicsweb";

pub struct Keys {
    pub user_a: RsaPrivateKey,
    pub user_x: RsaPrivateKey,
    pub user_e: RsaPrivateKey,
    pub bank_x: RsaPrivateKey,
    pub bank_e: RsaPrivateKey,
}

pub fn keys() -> &'static Keys {
    static KEYS: OnceLock<Keys> = OnceLock::new();
    KEYS.get_or_init(|| {
        let generate = || RustCrypto.generate_key_pair(1024).expect("Failed to generate test key");
        Keys {
            user_a: generate(),
            user_x: generate(),
            user_e: generate(),
            bank_x: generate(),
            bank_e: generate(),
        }
    })
}

pub fn bank(version: Version) -> Bank {
    Bank::new(HOST_ID, URL, version)
}

pub fn user() -> User {
    User::new("myPartnerId", "myUserId")
}

pub fn user_keyring(version: Version) -> Keyring {
    let keys = keys();
    let descriptor = version.descriptor();
    let certify = |entry: KeyEntry, tag: u8| {
        if descriptor.certificates_required {
            entry.with_certificate(vec![0x30, 0x03, 0x02, 0x01, tag])
        } else {
            entry
        }
    };
    let mut keyring = Keyring::new();
    keyring.set(
        KeySlot::UserSignature,
        certify(
            KeyEntry::from_private(KeyUsage::Signature, descriptor.signature_version, keys.user_a.clone()),
            1,
        ),
    );
    keyring.set(
        KeySlot::UserAuthentication,
        certify(KeyEntry::from_private(KeyUsage::Authentication, "X002", keys.user_x.clone()), 2),
    );
    keyring.set(
        KeySlot::UserEncryption,
        certify(KeyEntry::from_private(KeyUsage::Encryption, "E002", keys.user_e.clone()), 3),
    );
    keyring
}

pub fn keyring(version: Version) -> Keyring {
    let keys = keys();
    let mut keyring = user_keyring(version);
    keyring.set_bank_keys(BankKeys {
        authentication: KeyEntry::from_public(KeyUsage::Authentication, "X002", keys.bank_x.to_public_key()),
        encryption: KeyEntry::from_public(KeyUsage::Encryption, "E002", keys.bank_e.to_public_key()),
        host_id: Some(HOST_ID.to_string()),
    });
    keyring
}

/// One request as the bank saw it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recorded {
    pub root: String,
    pub order_type: Option<String>,
    pub phase: Option<String>,
    pub segment: Option<u32>,
    pub last_segment: Option<bool>,
    pub transaction_id: Option<String>,
    pub receipt: Option<String>,
    pub signed: bool,
}

/// Order data received through an upload.
#[derive(Clone, Debug)]
pub struct Uploaded {
    pub order_type: String,
    pub order_id: String,
    pub data: Vec<u8>,
    pub num_segments: u32,
    /// Order signature, already verified against the data when present.
    pub signature: Option<(String, Vec<u8>)>,
    pub data_digest: Option<Vec<u8>>,
}

enum Transaction {
    Download {
        segments: Vec<String>,
    },
    Upload {
        order_type: String,
        order_id: Option<String>,
        key: TransactionKey,
        signature: Option<(String, Vec<u8>)>,
        data_digest: Option<Vec<u8>>,
        num_segments: u32,
        received: Vec<String>,
    },
}

#[derive(Default)]
struct State {
    downloads: HashMap<String, Vec<u8>>,
    failures: HashMap<String, String>,
    last_segment_code: Option<String>,
    transactions: HashMap<String, Transaction>,
    counter: u32,
    requests: Vec<Recorded>,
    uploads: Vec<Uploaded>,
    key_orders: Vec<(String, Vec<u8>)>,
}

pub struct SimulatedBank {
    version: Version,
    segment_size: usize,
    state: Mutex<State>,
}

struct Reply {
    static_children: Vec<Element>,
    mutable_children: Vec<Element>,
    body: Vec<Element>,
    body_code: String,
}

impl Reply {
    fn new() -> Self {
        Reply {
            static_children: Vec::new(),
            mutable_children: Vec::new(),
            body: Vec::new(),
            body_code: "000000".to_string(),
        }
    }
}

fn text_of(element: Option<&Element>) -> Option<String> {
    element.map(|e| e.text_content().trim().to_string())
}

fn order_type_of(root: &Element) -> Option<String> {
    let details = root.first("header")?.first("static")?.first("OrderDetails")?;
    text_of(details.first("OrderType").or_else(|| details.first("AdminOrderType")))
}

impl SimulatedBank {
    pub fn new(version: Version) -> Self {
        SimulatedBank {
            version,
            segment_size: 3 << 18,
            state: Mutex::new(State::default()),
        }
    }

    /// Serves `data` for downloads of `order_type`.
    pub fn with_download(self, order_type: &str, data: &[u8]) -> Self {
        self.state.lock().unwrap().downloads.insert(order_type.to_string(), data.to_vec());
        self
    }

    /// Ciphertext bytes per download segment.
    pub fn with_segment_size(mut self, segment_size: usize) -> Self {
        self.segment_size = segment_size - segment_size % 3;
        self
    }

    /// Answers the initialisation of `order_type` with `code` in the body.
    pub fn failing(self, order_type: &str, code: &str) -> Self {
        self.state.lock().unwrap().failures.insert(order_type.to_string(), code.to_string());
        self
    }

    /// Drops upload transactions at their last segment and answers `code`
    /// in the header.
    pub fn terminating_uploads(self, code: &str) -> Self {
        self.state.lock().unwrap().last_segment_code = Some(code.to_string());
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn uploads(&self) -> Vec<Uploaded> {
        self.state.lock().unwrap().uploads.clone()
    }

    /// Order type and inflated order data of every INI/HIA request.
    pub fn key_orders(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().unwrap().key_orders.clone()
    }

    fn namespace(&self) -> &'static str {
        self.version.descriptor().namespace
    }

    fn next_id(state: &mut State) -> String {
        state.counter += 1;
        format!("{:032X}", state.counter)
    }

    fn response(&self, root_name: &str, reply: Reply, header_code: &str) -> Document {
        let mut mutable = Element::new("mutable");
        for child in reply.mutable_children {
            mutable.push(child);
        }
        mutable.push(Element::leaf("ReturnCode", header_code));
        mutable.push(Element::leaf("ReportText", format!("[{}] simulated", header_code)));
        let mut header_static = Element::new("static");
        for child in reply.static_children {
            header_static.push(child);
        }
        let mut body = Element::new("body");
        for child in reply.body {
            body.push(child);
        }
        body.push(Element::leaf("ReturnCode", reply.body_code).attr("authenticate", "true"));
        let mut root = Element::new(root_name)
            .declare(None, self.namespace())
            .declare(Some("ds"), XMLDSIG_NS)
            .attr("Version", self.version.as_str())
            .attr("Revision", "1")
            .child(
                Element::new("header")
                    .attr("authenticate", "true")
                    .child(header_static)
                    .child(mutable),
            )
            .child(body);
        if root_name == "ebicsResponse" {
            auth_signature::sign_document(&mut root, &keys().bank_x, &RustCrypto).expect("Failed to sign response");
        }
        Document::new(root)
    }

    fn record(&self, state: &mut State, root: &Element) {
        let header = root.first("header");
        let mutable = header.and_then(|h| h.first("mutable"));
        let segment = mutable.and_then(|m| m.first("SegmentNumber"));
        state.requests.push(Recorded {
            root: root.name.local.clone(),
            order_type: order_type_of(root),
            phase: text_of(mutable.and_then(|m| m.first("TransactionPhase"))),
            segment: text_of(segment).map(|n| n.parse().expect("SegmentNumber")),
            last_segment: segment.map(|s| s.attribute("lastSegment") == Some("true")),
            transaction_id: text_of(header.and_then(|h| h.first("static")).and_then(|s| s.first("TransactionID"))),
            receipt: text_of(
                root.first("body")
                    .and_then(|b| b.first("TransferReceipt"))
                    .and_then(|r| r.first("ReceiptCode")),
            ),
            signed: root.first("AuthSignature").is_some(),
        });
    }

    fn hev(&self) -> Document {
        let mut root = Element::new("ebicsHEVResponse")
            .declare(None, HEV_NAMESPACE)
            .child(
                Element::new("SystemReturnCode")
                    .child(Element::leaf("ReturnCode", "000000"))
                    .child(Element::leaf("ReportText", "[EBICS_OK] OK")),
            );
        for version in [Version::H003, Version::H004] {
            root.push(
                Element::leaf("VersionNumber", version.descriptor().release).attr("ProtocolVersion", version.as_str()),
            );
        }
        Document::new(root)
    }

    fn unsecured(&self, state: &mut State, root: &Element) -> Document {
        let order_type = order_type_of(root).expect("OrderDetails");
        let order_data = text_of(
            root.first("body")
                .and_then(|b| b.first("DataTransfer"))
                .and_then(|d| d.first("OrderData")),
        )
        .expect("OrderData");
        let payload = codec::decompress(&codec::decode_base64(&order_data).unwrap()).unwrap();
        state.key_orders.push((order_type, payload));
        self.response("ebicsKeyManagementResponse", Reply::new(), "000000")
    }

    fn hpb(&self) -> Document {
        let keys = keys();
        let key_info = |name: &str, key: &RsaPrivateKey, version_element: &str, version: &str| {
            let public = key.to_public_key();
            Element::new(name)
                .child(
                    Element::new("PubKeyValue").child(
                        Element::new("ds:RSAKeyValue")
                            .child(Element::leaf("ds:Modulus", codec::encode_base64(&public.n().to_bytes_be())))
                            .child(Element::leaf("ds:Exponent", codec::encode_base64(&public.e().to_bytes_be()))),
                    ),
                )
                .child(Element::leaf(version_element, version))
        };
        let order_data = Document::new(
            Element::new("HPBResponseOrderData")
                .declare(None, self.namespace())
                .declare(Some("ds"), XMLDSIG_NS)
                .child(key_info("AuthenticationPubKeyInfo", &keys.bank_x, "AuthenticationVersion", "X002"))
                .child(key_info("EncryptionPubKeyInfo", &keys.bank_e, "EncryptionVersion", "E002"))
                .child(Element::leaf("HostID", HOST_ID)),
        );
        let (info, ciphertext) = self.seal_for_user(&order_data.to_bytes());
        let mut reply = Reply::new();
        reply.body.push(
            Element::new("DataTransfer")
                .child(info)
                .child(Element::leaf("OrderData", codec::encode_base64(&ciphertext))),
        );
        self.response("ebicsKeyManagementResponse", reply, "000000")
    }

    /// Encrypts `data` for the user. Returns `DataEncryptionInfo` and the
    /// ciphertext.
    fn seal_for_user(&self, data: &[u8]) -> (Element, Vec<u8>) {
        let user_e = KeyEntry::from_public(KeyUsage::Encryption, "E002", keys().user_e.to_public_key());
        let key = TransactionKey::generate(&RustCrypto);
        let info = key.wrap(&RustCrypto, &user_e).unwrap();
        let ciphertext = key.seal(&RustCrypto, data).unwrap();
        let element = Element::new("DataEncryptionInfo")
            .attr("authenticate", "true")
            .child(
                Element::leaf(
                    "EncryptionPubKeyDigest",
                    codec::encode_base64(&info.encryption_pub_key_digest.digest),
                )
                .attr("Version", "E002")
                .attr("Algorithm", "http://www.w3.org/2001/04/xmlenc#sha256"),
            )
            .child(Element::leaf("TransactionKey", codec::encode_base64(&info.transaction_key)));
        (element, ciphertext)
    }

    fn segment_mark(number: u32, total: u32) -> Element {
        Element::leaf("SegmentNumber", number.to_string())
            .attr("lastSegment", if number == total { "true" } else { "false" })
    }

    fn request(&self, state: &mut State, root: &Element) -> Document {
        let mutable = root.first("header").and_then(|h| h.first("mutable")).expect("mutable header");
        match text_of(mutable.first("TransactionPhase")).as_deref() {
            Some("Initialisation") if root.first("body").and_then(|b| b.first("DataTransfer")).is_some() => {
                self.upload_init(state, root)
            }
            Some("Initialisation") => self.download_init(state, root),
            Some("Transfer") => self.transfer(state, root),
            Some("Receipt") => self.receipt(state, root),
            other => panic!("unexpected phase {:?}", other),
        }
    }

    fn download_init(&self, state: &mut State, root: &Element) -> Document {
        let order_type = order_type_of(root).expect("OrderDetails");
        if let Some(code) = state.failures.get(&order_type) {
            let mut reply = Reply::new();
            reply.body_code = code.clone();
            return self.response("ebicsResponse", reply, "000000");
        }
        let Some(data) = state.downloads.get(&order_type).cloned() else {
            return self.response("ebicsResponse", Reply::new(), "090005");
        };
        let (info, ciphertext) = self.seal_for_user(&data);
        let segments: Vec<String> = ciphertext
            .chunks(self.segment_size)
            .map(codec::encode_base64)
            .collect();
        let total = segments.len() as u32;
        let id = Self::next_id(state);

        let mut reply = Reply::new();
        reply.static_children.push(Element::leaf("TransactionID", id.clone()));
        reply.static_children.push(Element::leaf("NumSegments", total.to_string()));
        reply.mutable_children.push(Element::leaf("TransactionPhase", "Initialisation"));
        reply.mutable_children.push(Self::segment_mark(1, total));
        reply.body.push(
            Element::new("DataTransfer")
                .child(info)
                .child(Element::leaf("OrderData", segments[0].clone())),
        );
        state.transactions.insert(id, Transaction::Download { segments });
        self.response("ebicsResponse", reply, "000000")
    }

    fn upload_init(&self, state: &mut State, root: &Element) -> Document {
        let order_type = order_type_of(root).expect("OrderDetails");
        let header_static = root.first("header").and_then(|h| h.first("static")).unwrap();
        let num_segments: u32 = text_of(header_static.first("NumSegments")).unwrap().parse().unwrap();
        let client_order_id = text_of(header_static.first("OrderDetails").and_then(|d| d.first("OrderID")));
        let transfer = root.first("body").and_then(|b| b.first("DataTransfer")).unwrap();
        let key = self.transaction_key(transfer);
        let signature = text_of(transfer.first("SignatureData")).map(|b64| {
            let document = key.open(&RustCrypto, &codec::decode_base64(&b64).unwrap()).unwrap();
            let document = Document::parse(&document).unwrap();
            assert_eq!(document.root.name.local, "UserSignatureData");
            let order_signature = document.root.first("OrderSignatureData").expect("OrderSignatureData");
            (
                text_of(order_signature.first("SignatureVersion")).unwrap(),
                codec::decode_base64(&text_of(order_signature.first("SignatureValue")).unwrap()).unwrap(),
            )
        });
        let data_digest = text_of(transfer.first("DataDigest")).map(|b64| codec::decode_base64(&b64).unwrap());
        let id = Self::next_id(state);

        let mut reply = Reply::new();
        reply.static_children.push(Element::leaf("TransactionID", id.clone()));
        reply.mutable_children.push(Element::leaf("TransactionPhase", "Initialisation"));
        let transaction = Transaction::Upload {
            order_type,
            order_id: client_order_id,
            key,
            signature,
            data_digest,
            num_segments,
            received: Vec::new(),
        };
        if num_segments == 0 {
            let order_id = Self::complete_upload(state, transaction);
            reply.mutable_children.push(Element::leaf("OrderID", order_id));
        } else {
            state.transactions.insert(id, transaction);
        }
        self.response("ebicsResponse", reply, "000000")
    }

    fn transaction_key(&self, transfer: &Element) -> TransactionKey {
        let encrypted = text_of(transfer.first("DataEncryptionInfo").and_then(|i| i.first("TransactionKey")))
            .expect("TransactionKey");
        TransactionKey::unwrap(&RustCrypto, &keys().bank_e, &codec::decode_base64(&encrypted).unwrap()).unwrap()
    }

    fn unsigned(&self, state: &mut State, root: &Element) -> Document {
        assert!(root.first("AuthSignature").is_none());
        let order_type = order_type_of(root).expect("OrderDetails");
        let header_static = root.first("header").and_then(|h| h.first("static")).unwrap();
        let num_segments: u32 = text_of(header_static.first("NumSegments")).unwrap().parse().unwrap();
        let transfer = root.first("body").and_then(|b| b.first("DataTransfer")).unwrap();
        assert!(transfer.first("SignatureData").is_none());
        let key = self.transaction_key(transfer);
        let first = text_of(transfer.first("OrderData")).expect("first segment");
        let id = Self::next_id(state);
        let transaction = Transaction::Upload {
            order_type,
            order_id: None,
            key,
            signature: None,
            data_digest: None,
            num_segments,
            received: vec![first],
        };
        let mut reply = Reply::new();
        reply.static_children.push(Element::leaf("TransactionID", id.clone()));
        reply.mutable_children.push(Element::leaf("TransactionPhase", "Initialisation"));
        if num_segments == 1 {
            let order_id = Self::complete_upload(state, transaction);
            reply.mutable_children.push(Element::leaf("OrderID", order_id));
        } else {
            state.transactions.insert(id, transaction);
        }
        self.response("ebicsResponse", reply, "000000")
    }

    fn transfer(&self, state: &mut State, root: &Element) -> Document {
        let id = text_of(root.first("header").and_then(|h| h.first("static")).and_then(|s| s.first("TransactionID")))
            .expect("TransactionID");
        let segment = root
            .first("header")
            .and_then(|h| h.first("mutable"))
            .and_then(|m| m.first("SegmentNumber"))
            .expect("SegmentNumber");
        let number: u32 = segment.text_content().trim().parse().unwrap();
        let last = segment.attribute("lastSegment") == Some("true");

        let mut reply = Reply::new();
        reply.static_children.push(Element::leaf("TransactionID", id.clone()));
        reply.mutable_children.push(Element::leaf("TransactionPhase", "Transfer"));
        let transaction = state.transactions.remove(&id).expect("unknown transaction");
        match transaction {
            Transaction::Download { segments } => {
                let total = segments.len() as u32;
                assert!(number >= 2 && number <= total, "segment {} of {}", number, total);
                assert_eq!(last, number == total);
                reply.mutable_children.push(Self::segment_mark(number, total));
                reply.body.push(
                    Element::new("DataTransfer")
                        .child(Element::leaf("OrderData", segments[number as usize - 1].clone())),
                );
                state.transactions.insert(id, Transaction::Download { segments });
            }
            Transaction::Upload {
                order_type,
                order_id,
                key,
                signature,
                data_digest,
                num_segments,
                mut received,
            } => {
                assert_eq!(number as usize, received.len() + 1, "segments out of order");
                assert_eq!(last, number == num_segments);
                let data = text_of(
                    root.first("body")
                        .and_then(|b| b.first("DataTransfer"))
                        .and_then(|d| d.first("OrderData")),
                )
                .expect("OrderData");
                received.push(data);
                reply.mutable_children.push(Self::segment_mark(number, num_segments));
                let transaction = Transaction::Upload {
                    order_type,
                    order_id,
                    key,
                    signature,
                    data_digest,
                    num_segments,
                    received,
                };
                if let (true, Some(code)) = (last, state.last_segment_code.clone()) {
                    return self.response("ebicsResponse", reply, &code);
                }
                if last {
                    let order_id = Self::complete_upload(state, transaction);
                    reply.mutable_children.push(Element::leaf("OrderID", order_id));
                } else {
                    state.transactions.insert(id, transaction);
                }
            }
        }
        self.response("ebicsResponse", reply, "000000")
    }

    /// Decrypts, checks the order signature and stores the upload. Returns
    /// the order id.
    fn complete_upload(state: &mut State, transaction: Transaction) -> String {
        let Transaction::Upload {
            order_type,
            order_id,
            key,
            signature,
            data_digest,
            num_segments,
            received,
        } = transaction
        else {
            panic!("not an upload");
        };
        let data = if num_segments == 0 {
            Vec::new()
        } else {
            let ciphertext = codec::decode_base64(&received.concat()).unwrap();
            key.open(&RustCrypto, &ciphertext).unwrap()
        };
        if let (Some((version, value)), true) = (&signature, num_segments > 0) {
            let scheme = SignatureScheme::for_version(version).unwrap();
            RustCrypto
                .rsa_verify(&keys().user_a.to_public_key(), scheme, &RustCrypto.sha256(&data), value)
                .expect("order signature does not match the order data");
        }
        if let (Some(digest), true) = (&data_digest, num_segments > 0) {
            assert_eq!(digest.as_slice(), RustCrypto.sha256(&data).as_slice());
        }
        state.counter += 1;
        let order_id = order_id.unwrap_or_else(|| format!("B{:03}", state.counter));
        state.uploads.push(Uploaded {
            order_type,
            order_id: order_id.clone(),
            data,
            num_segments,
            signature,
            data_digest,
        });
        order_id
    }

    fn receipt(&self, state: &mut State, root: &Element) -> Document {
        let id = text_of(root.first("header").and_then(|h| h.first("static")).and_then(|s| s.first("TransactionID")))
            .expect("TransactionID");
        assert!(
            matches!(state.transactions.remove(&id), Some(Transaction::Download { .. })),
            "receipt for unknown transaction {}",
            id
        );
        let code = text_of(
            root.first("body")
                .and_then(|b| b.first("TransferReceipt"))
                .and_then(|r| r.first("ReceiptCode")),
        )
        .expect("ReceiptCode");
        let mut reply = Reply::new();
        reply.static_children.push(Element::leaf("TransactionID", id));
        reply.mutable_children.push(Element::leaf("TransactionPhase", "Receipt"));
        let header_code = if code == "0" { "011000" } else { "011001" };
        self.response("ebicsResponse", reply, header_code)
    }
}

impl Transport for SimulatedBank {
    fn post(&self, url: &str, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        assert_eq!(url, URL);
        let document = Document::parse(request).map_err(|e| TransportError::with_source("malformed request", e))?;
        let root = &document.root;
        let mut state = self.state.lock().map_err(|_| TransportError::new("bank state poisoned"))?;
        self.record(&mut state, root);
        if matches!(root.name.local.as_str(), "ebicsRequest" | "ebicsNoPubKeyDigestsRequest") {
            auth_signature::verify(root, &keys().user_x.to_public_key(), &RustCrypto)
                .expect("request AuthSignature does not verify");
        }
        let response = match root.name.local.as_str() {
            "ebicsHEVRequest" => self.hev(),
            "ebicsUnsecuredRequest" => self.unsecured(&mut state, root),
            "ebicsNoPubKeyDigestsRequest" => self.hpb(),
            "ebicsRequest" => self.request(&mut state, root),
            "ebicsUnsignedRequest" => self.unsigned(&mut state, root),
            other => panic!("unexpected request {}", other),
        };
        Ok(response.to_bytes())
    }
}

/// Transport that fails every request.
pub struct Unreachable;

impl Transport for Unreachable {
    fn post(&self, _url: &str, _request: &[u8]) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::new("connection refused"))
    }
}
