//! Segmented transaction bookkeeping.
//!
//! The state machines only track what was sent and received; building the
//! requests and talking to the bank is the client's job. Both enforce the
//! ordering rules: segment numbers run 1..=N without gaps, exactly the
//! segment N is the last one, and the transaction id assigned by the bank
//! never changes.

use std::fmt;

use crate::codec;
use crate::data_encryption::TransactionKey;
use crate::envelope::SegmentMark;
use crate::error::{Error, PreconditionError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionPhase {
    Initialisation,
    Transfer,
    Receipt,
}

impl TransactionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionPhase::Initialisation => "Initialisation",
            TransactionPhase::Transfer => "Transfer",
            TransactionPhase::Receipt => "Receipt",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "Initialisation" => Some(TransactionPhase::Initialisation),
            "Transfer" => Some(TransactionPhase::Transfer),
            "Receipt" => Some(TransactionPhase::Receipt),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acknowledgement sent at the end of a download.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReceiptCode {
    /// `0`: data received and processed.
    Positive,
    /// `1`: the bank should keep the data for another download.
    Negative,
}

impl ReceiptCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReceiptCode::Positive => "0",
            ReceiptCode::Negative => "1",
        }
    }
}

/// One downloaded segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub number: u32,
    pub is_last: bool,
    /// Base64 text of the encrypted chunk, as received.
    pub ciphertext: String,
    /// Raw response document the segment came with.
    pub response: Vec<u8>,
}

/// Download in progress: segment 1 arrives with the initialisation
/// response, the client then asks for 2..=N and finishes with a receipt.
#[derive(Debug)]
pub struct DownloadTransaction {
    id: String,
    key: TransactionKey,
    num_segments: u32,
    segments: Vec<Segment>,
    phase: TransactionPhase,
    receipt: Option<ReceiptCode>,
}

impl DownloadTransaction {
    pub fn start(id: String, key: TransactionKey, num_segments: u32, first: Segment) -> Result<Self> {
        if id.is_empty() {
            return Err(Error::unexpected("initialisation response carries no TransactionID"));
        }
        if num_segments == 0 {
            return Err(Error::unexpected("download announces zero segments"));
        }
        let mut transaction = DownloadTransaction {
            id,
            key,
            num_segments,
            segments: Vec::with_capacity(num_segments as usize),
            phase: TransactionPhase::Initialisation,
            receipt: None,
        };
        transaction.receive(first)?;
        Ok(transaction)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> &TransactionKey {
        &self.key
    }

    pub fn num_segments(&self) -> u32 {
        self.num_segments
    }

    pub fn phase(&self) -> TransactionPhase {
        self.phase
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_complete(&self) -> bool {
        self.segments.len() as u32 == self.num_segments
    }

    /// The segment to request next, `None` once all arrived.
    pub fn next_segment(&self) -> Option<SegmentMark> {
        if self.is_complete() {
            return None;
        }
        let number = self.segments.len() as u32 + 1;
        Some(SegmentMark {
            number,
            last: number == self.num_segments,
        })
    }

    /// Records a segment received from the bank. Segments must arrive in
    /// order and the last one must be flagged as such.
    pub fn receive(&mut self, segment: Segment) -> Result<()> {
        if self.phase == TransactionPhase::Receipt {
            return Err(PreconditionError::InvalidState(format!(
                "transaction {} already received all {} segments",
                self.id, self.num_segments
            ))
            .into());
        }
        let expected = self.segments.len() as u32 + 1;
        if segment.number != expected {
            return Err(Error::unexpected(format!(
                "expected segment {} of transaction {}, got {}",
                expected, self.id, segment.number
            )));
        }
        let last = expected == self.num_segments;
        if segment.is_last != last {
            return Err(Error::unexpected(format!(
                "segment {} of {} has lastSegment={}",
                segment.number, self.num_segments, segment.is_last
            )));
        }
        self.segments.push(segment);
        self.phase = if last {
            TransactionPhase::Receipt
        } else {
            TransactionPhase::Transfer
        };
        Ok(())
    }

    /// The encrypted order data of all segments, in segment order.
    pub fn ciphertext(&self) -> Result<Vec<u8>> {
        if !self.is_complete() {
            return Err(PreconditionError::InvalidState(format!(
                "transaction {} has {} of {} segments",
                self.id,
                self.segments.len(),
                self.num_segments
            ))
            .into());
        }
        let text: String = self.segments.iter().map(|s| s.ciphertext.as_str()).collect();
        Ok(codec::decode_base64(&text)?)
    }

    /// Marks the receipt as sent. Only allowed once, after the last segment.
    pub fn acknowledge(&mut self, code: ReceiptCode) -> Result<()> {
        if self.phase != TransactionPhase::Receipt || self.receipt.is_some() {
            return Err(PreconditionError::InvalidState(format!(
                "receipt for transaction {} not expected in phase {}",
                self.id, self.phase
            ))
            .into());
        }
        self.receipt = Some(code);
        Ok(())
    }

    pub fn receipt(&self) -> Option<ReceiptCode> {
        self.receipt
    }
}

/// Upload in progress. The ciphertext is split up front; the bank assigns
/// the transaction id in its initialisation response.
#[derive(Debug)]
pub struct UploadTransaction {
    id: Option<String>,
    segments: Vec<Vec<u8>>,
    sent: u32,
    phase: TransactionPhase,
    order_id: Option<String>,
}

impl UploadTransaction {
    pub fn new(segments: Vec<Vec<u8>>) -> Self {
        UploadTransaction {
            id: None,
            segments,
            sent: 0,
            phase: TransactionPhase::Initialisation,
            order_id: None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn phase(&self) -> TransactionPhase {
        self.phase
    }

    pub fn num_segments(&self) -> u32 {
        self.segments.len() as u32
    }

    pub fn order_id(&self) -> Option<&str> {
        self.order_id.as_deref()
    }

    /// Stores the id from the initialisation response.
    pub fn assign_id(&mut self, id: String) -> Result<()> {
        if self.id.is_some() {
            return Err(PreconditionError::InvalidState("transaction id assigned twice".into()).into());
        }
        if id.is_empty() {
            return Err(Error::unexpected("initialisation response carries no TransactionID"));
        }
        self.id = Some(id);
        self.phase = TransactionPhase::Transfer;
        Ok(())
    }

    /// Next segment to send with its mark, `None` once all were sent.
    pub fn next_segment(&self) -> Option<(SegmentMark, &[u8])> {
        let index = self.sent as usize;
        self.segments.get(index).map(|data| {
            let number = self.sent + 1;
            (
                SegmentMark {
                    number,
                    last: number == self.num_segments(),
                },
                data.as_slice(),
            )
        })
    }

    /// Records that the bank accepted segment `number`.
    pub fn acknowledge(&mut self, number: u32) -> Result<()> {
        if self.id.is_none() {
            return Err(PreconditionError::InvalidState("segment sent before initialisation".into()).into());
        }
        if number != self.sent + 1 || number > self.num_segments() {
            return Err(PreconditionError::InvalidState(format!(
                "segment {} acknowledged, expected {}",
                number,
                self.sent + 1
            ))
            .into());
        }
        self.sent = number;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.id.is_some() && self.sent == self.num_segments()
    }

    pub fn finish(&mut self, order_id: Option<String>) -> Result<()> {
        if !self.is_complete() {
            return Err(PreconditionError::InvalidState(format!(
                "upload finished after {} of {} segments",
                self.sent,
                self.num_segments()
            ))
            .into());
        }
        self.order_id = order_id;
        self.phase = TransactionPhase::Receipt;
        Ok(())
    }
}

/// Splits `ciphertext` into chunks of at most `segment_size` bytes, rounded
/// down to a multiple of three.
pub fn split_segments(ciphertext: &[u8], segment_size: usize, max_segments: Option<u32>) -> Result<Vec<Vec<u8>>> {
    let chunk = segment_size - segment_size % 3;
    if chunk == 0 {
        return Err(PreconditionError::InvalidSegmentSize.into());
    }
    let segments: Vec<Vec<u8>> = ciphertext.chunks(chunk).map(<[u8]>::to_vec).collect();
    let count = segments.len() as u32;
    if let Some(max) = max_segments {
        if count > max {
            return Err(PreconditionError::TooManySegments { segments: count, max }.into());
        }
    }
    Ok(segments)
}
