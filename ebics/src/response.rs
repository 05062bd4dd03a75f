//! Bank responses (`ebicsResponse`, `ebicsKeyManagementResponse`).
//!
//! Fields are looked up by namespace-qualified path in the namespace of the
//! protocol version; a response in a foreign namespace is rejected.

use crate::envelope::SegmentMark;
use crate::error::{Error, Result};
use crate::return_code::{self, BankError, ReturnCodeFamily};
use crate::transaction::TransactionPhase;
use crate::version::VersionDescriptor;
use crate::xml::{Document, Element};

#[derive(Clone, Debug)]
pub struct Response {
    pub document: Document,
    pub header_code: Option<String>,
    pub body_code: Option<String>,
    pub report_text: Option<String>,
    pub transaction_id: Option<String>,
    pub phase: Option<TransactionPhase>,
    pub num_segments: Option<u32>,
    pub segment: Option<SegmentMark>,
    pub order_id: Option<String>,
    /// Transaction key, still encrypted for the user's E key.
    pub transaction_key: Option<Vec<u8>>,
    /// Base64 text of the encrypted order data segment.
    pub order_data: Option<String>,
}

fn text(element: Option<&Element>) -> Option<String> {
    element
        .map(|e| e.text_content().trim().to_string())
        .filter(|t| !t.is_empty())
}

impl Response {
    pub fn parse(bytes: &[u8], descriptor: &VersionDescriptor) -> Result<Self> {
        let document = Document::parse(bytes)?;
        let ns = descriptor.namespace;
        let root = &document.root;
        if root.namespace.as_deref() != Some(ns) {
            return Err(Error::unexpected(format!(
                "{} in namespace {:?}, expected {}",
                root.name,
                root.namespace.as_deref().unwrap_or(""),
                ns
            )));
        }
        let header_static = root.path_ns(ns, &["header", "static"]);
        let mutable = root.path_ns(ns, &["header", "mutable"]);
        let body = root.first_ns(ns, "body");
        let data_transfer = body.and_then(|b| b.first_ns(ns, "DataTransfer"));

        let segment = match mutable.and_then(|m| m.first_ns(ns, "SegmentNumber")) {
            Some(element) => {
                let number = element
                    .text_content()
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| Error::unexpected("SegmentNumber is not a number"))?;
                Some(SegmentMark {
                    number,
                    last: element.attribute("lastSegment") == Some("true"),
                })
            }
            None => None,
        };
        let num_segments = match text(header_static.and_then(|s| s.first_ns(ns, "NumSegments"))) {
            Some(n) => Some(
                n.parse::<u32>()
                    .map_err(|_| Error::unexpected("NumSegments is not a number"))?,
            ),
            None => None,
        };
        let transaction_key = match text(
            data_transfer
                .and_then(|d| d.first_ns(ns, "DataEncryptionInfo"))
                .and_then(|i| i.first_ns(ns, "TransactionKey")),
        ) {
            Some(b64) => Some(crate::codec::decode_base64(&b64)?),
            None => None,
        };

        let response = Response {
            header_code: text(mutable.and_then(|m| m.first_ns(ns, "ReturnCode"))),
            body_code: text(body.and_then(|b| b.first_ns(ns, "ReturnCode"))),
            report_text: text(mutable.and_then(|m| m.first_ns(ns, "ReportText"))),
            transaction_id: text(header_static.and_then(|s| s.first_ns(ns, "TransactionID"))),
            phase: text(mutable.and_then(|m| m.first_ns(ns, "TransactionPhase")))
                .and_then(|p| TransactionPhase::parse(&p)),
            num_segments,
            segment,
            order_id: text(mutable.and_then(|m| m.first_ns(ns, "OrderID"))),
            transaction_key,
            order_data: text(data_transfer.and_then(|d| d.first_ns(ns, "OrderData"))),
            document,
        };
        if response.header_code.is_none() && response.body_code.is_none() {
            return Err(Error::unexpected("response carries no ReturnCode"));
        }
        Ok(response)
    }

    /// The authoritative code: the header code, unless it reports success,
    /// in which case the body code decides.
    pub fn return_code(&self) -> &str {
        match (self.header_code.as_deref(), self.body_code.as_deref()) {
            (Some(header), _) if header != return_code::OK => header,
            (_, Some(body)) => body,
            (Some(header), None) => header,
            (None, None) => return_code::OK,
        }
    }

    pub fn family(&self) -> ReturnCodeFamily {
        ReturnCodeFamily::of(self.return_code())
    }

    /// `Ok` for success, informational and warning codes, the classified
    /// [`BankError`] otherwise.
    pub fn check(&self) -> Result<(), BankError> {
        let code = self.return_code();
        let family = self.family();
        if family == ReturnCodeFamily::Success {
            return Ok(());
        }
        let error = BankError::from_code(code, self.report_text.as_deref());
        if family.is_success() {
            log::warn!("bank answered {}", error);
            Ok(())
        } else {
            Err(error)
        }
    }

    pub fn root(&self) -> &Element {
        &self.document.root
    }

    pub fn is_last_segment(&self) -> bool {
        self.segment.map_or(true, |s| s.last)
    }
}
