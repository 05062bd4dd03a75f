//! Error types of the engine.
//!
//! Two families matter to callers: [`PreconditionError`] is raised locally
//! before anything is sent, [`BankError`] classifies a non-success return
//! code sent back by the bank. The remaining variants wrap failures of the
//! collaborators (transport, XML, crypto, storage).

use thiserror::Error;

use crate::codec::CodecError;
use crate::crypto::CryptoError;
use crate::keyring::{KeySlot, StorageError};
use crate::order::OrderType;
use crate::return_code::BankError;
use crate::transport::TransportError;
use crate::version::{EnvelopeKind, Version};
use crate::xml::XmlError;

/// Local invariant violations. Always fatal for the current operation and
/// never classified against the bank return code table.
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("keyring has no {0} key")]
    MissingKey(KeySlot),
    #[error("keyring has no private key for the {0} key")]
    MissingPrivateKey(KeySlot),
    #[error("the {0} key needs an X.509 certificate for this protocol version")]
    MissingCertificate(KeySlot),
    #[error("unsupported protocol version `{0}`")]
    UnsupportedVersion(String),
    #[error("order type {order_type} is not available in {version}")]
    UnsupportedOrderType { order_type: OrderType, version: Version },
    #[error("order type {order_type} cannot be sent as {operation}")]
    WrongDirection { order_type: OrderType, operation: &'static str },
    #[error("order type {order_type} does not accept {params} parameters")]
    InvalidOrderParams { order_type: OrderType, params: &'static str },
    #[error("{kind} is not available in {version}")]
    UnsupportedEnvelope { kind: EnvelopeKind, version: Version },
    #[error("unsupported signature version `{0}`")]
    UnsupportedSignatureVersion(String),
    #[error("segment size must be greater than zero")]
    InvalidSegmentSize,
    #[error("{segments} segments exceed the configured maximum of {max}")]
    TooManySegments { segments: u32, max: u32 },
    #[error("invalid transaction state: {0}")]
    InvalidState(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error(transparent)]
    Bank(#[from] BankError),
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl Error {
    pub(crate) fn unexpected(message: impl Into<String>) -> Self {
        Error::UnexpectedResponse(message.into())
    }

    /// The bank classification, if this error came from a return code.
    pub fn bank_error(&self) -> Option<&BankError> {
        match self {
            Error::Bank(error) => Some(error),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
