//! Client side protocol engine for EBICS (Electronic Banking Internet
//! Communication Standard), versions H003 (2.4), H004 (2.5) and H005 (3.0).
//!
//! The engine builds request envelopes, signs them with the user's
//! authentication key, encrypts order data for the bank, drives the
//! segmented upload/download transactions and classifies bank return codes.
//! HTTP and key storage stay outside: callers plug in a [`Transport`] and,
//! optionally, a [`KeyringStore`].
//!
//! ```no_run
//! use ebics::{Bank, ClientConfig, EbicsClient, Keyring, Transport, TransportError, User, Version};
//!
//! struct Http;
//! impl Transport for Http {
//!     fn post(&self, _url: &str, _request: &[u8]) -> Result<Vec<u8>, TransportError> {
//!         unimplemented!()
//!     }
//! }
//!
//! let bank = Bank::new("MYHOST", "https://bank.example/ebics", Version::H004);
//! let user = User::new("PARTNER", "USER");
//! let client = EbicsClient::new(bank, user, Keyring::new(), Http)
//!     .with_config(ClientConfig::default());
//! let versions = client.hev()?;
//! # Ok::<(), ebics::Error>(())
//! ```

pub mod auth_signature;
pub mod client;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod data_encryption;
pub mod envelope;
pub mod error;
pub mod key_management;
pub mod keyring;
pub mod order;
pub mod response;
pub mod return_code;
pub mod transaction;
pub mod transport;
pub mod version;
pub mod xml;

pub use client::{Download, EbicsClient, Upload};
pub use config::{Bank, ClientConfig, Product, User};
pub use crypto::{CryptoError, CryptoProvider, RustCrypto, SignatureScheme};
pub use data_encryption::TransactionKey;
pub use envelope::{Envelope, EnvelopeBuilder};
pub use error::{Error, PreconditionError, Result};
pub use key_management::{BankKeys, VersionSupport};
pub use keyring::{JsonFileKeyring, KeyEntry, KeySlot, KeyUsage, Keyring, KeyringStore, MemoryKeyring, StorageError};
pub use order::{
    DateRange, Direction, FileFormat, HvtFlags, MessageName, Order, OrderParams, OrderType, Service, VeuParams, VeuTarget,
};
pub use response::Response;
pub use return_code::{BankError, ReturnCodeFamily, ReturnCodeKind};
pub use transaction::{ReceiptCode, TransactionPhase};
pub use transport::{Transport, TransportError};
pub use version::{EnvelopeKind, Version, VersionDescriptor};

#[cfg(test)]
mod test_envelope;
#[cfg(test)]
mod test_signature;
