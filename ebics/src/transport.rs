//! HTTP boundary. One call to [`Transport::post`] is exactly one exchange
//! with the bank; the engine never retries.

use std::fmt;

pub const CONTENT_TYPE: &str = "text/xml; charset=UTF-8";

pub trait Transport {
    /// Posts `request` to `url` with [`CONTENT_TYPE`] and returns the
    /// response body.
    fn post(&self, url: &str, request: &[u8]) -> Result<Vec<u8>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn post(&self, url: &str, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).post(url, request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn post(&self, url: &str, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).post(url, request)
    }
}

#[derive(Debug)]
pub struct TransportError {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        TransportError {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        TransportError {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
