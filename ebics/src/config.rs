//! Constructor values of a client: who the bank is, who the user is and
//! the tunables of the engine. All of them deserialize from JSON.

use serde::{Deserialize, Serialize};

use crate::version::Version;

/// Bank endpoint. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bank {
    pub host_id: String,
    pub url: String,
    /// Default country code for FDL/FUL file formats.
    #[serde(default = "default_country_code")]
    pub country_code: String,
    pub version: Version,
}

fn default_country_code() -> String {
    "DE".to_string()
}

impl Bank {
    pub fn new(host_id: impl Into<String>, url: impl Into<String>, version: Version) -> Self {
        Bank {
            host_id: host_id.into(),
            url: url.into(),
            country_code: default_country_code(),
            version,
        }
    }

    pub fn with_country_code(mut self, country_code: impl Into<String>) -> Self {
        self.country_code = country_code.into();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub partner_id: String,
    pub user_id: String,
}

impl User {
    pub fn new(partner_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        User {
            partner_id: partner_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// `Product` element of the static header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub language: String,
}

impl Default for Product {
    fn default() -> Self {
        Product {
            name: concat!("ebics-rs ", env!("CARGO_PKG_VERSION")).to_string(),
            language: "de".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    pub product: Product,
    pub security_medium: String,
    /// Ciphertext bytes per upload segment, rounded down to a multiple of
    /// three so that segments concatenate to valid base64. The default of
    /// 768 KiB encodes to 1 MiB.
    pub segment_size: usize,
    /// Upper bound on segments per upload, if the bank announced one.
    pub max_segments: Option<u32>,
    /// Verify the `AuthSignature` of bank responses with the bank X key.
    pub verify_bank_signature: bool,
    pub key_bits: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            product: Product::default(),
            security_medium: "0000".to_string(),
            segment_size: 3 << 18,
            max_segments: None,
            verify_bank_signature: false,
            key_bits: 2048,
        }
    }
}
