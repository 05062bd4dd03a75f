//! JSON configuration of the command line client.
//!
//! ```json
//! {
//!   "bank": { "hostId": "EBIXQUAL", "url": "https://ebics.bank.example/ebicsweb", "version": "H004" },
//!   "user": { "partnerId": "PARTNER1", "userId": "USER1" },
//!   "keyring": "keys.json",
//!   "client": { "verifyBankSignature": true }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use ebics::{Bank, ClientConfig, User};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    pub bank: Bank,
    pub user: User,
    /// Keyring file. A relative path is taken relative to the config file.
    pub keyring: PathBuf,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    60
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: HostConfig =
            serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))?;
        if config.keyring.is_relative() {
            if let Some(dir) = path.parent() {
                config.keyring = dir.join(&config.keyring);
            }
        }
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
