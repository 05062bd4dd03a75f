use std::time::Duration;

use ebics::transport::CONTENT_TYPE;
use ebics::{Transport, TransportError};
use reqwest::blocking::Client;
use reqwest::header;

/// Blocking HTTPS transport. Anything but a 2xx answer is a transport
/// failure; return codes inside the body are the engine's business.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(HttpTransport { client })
    }
}

impl Transport for HttpTransport {
    fn post(&self, url: &str, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        log::trace!("request:\n{}", String::from_utf8_lossy(request));
        let response = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, CONTENT_TYPE)
            .body(request.to_vec())
            .send()
            .map_err(|e| TransportError::with_source(format!("POST {} failed", url), e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::new(format!("bank answered HTTP {}", status)));
        }
        let body = response
            .bytes()
            .map_err(|e| TransportError::with_source("Failed to read response body", e))?;
        log::trace!("response:\n{}", String::from_utf8_lossy(&body));
        Ok(body.to_vec())
    }
}
