//! Client configuration, loadable from TOML.

use serde::{Deserialize, Serialize};
use std::path::Path;
use zkcw_planner::FeeSchedule;
use zkcw_types::{CloudError, Result};
use zkcw_watch::WatchConfig;

pub const DEFAULT_GATEWAY_URL: &str = "https://api.zkcloudworker.com";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub gateway_url: String,
    /// Upper bound for one prove/send/proveAndSend/runJob call, and for a wallet signature.
    pub call_timeout_ms: u64,
    pub http_timeout_ms: u64,
    pub encrypt_payloads: bool,
    pub fees: FeeSchedule,
    pub watch: WatchConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            call_timeout_ms: 300_000,
            http_timeout_ms: 60_000,
            encrypt_payloads: true,
            fees: FeeSchedule::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: ClientConfig =
            toml::from_str(s).map_err(|e| CloudError::Config(format!("invalid config: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CloudError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    pub fn check(&self) -> Result<()> {
        if self.gateway_url.trim().is_empty() {
            return Err(CloudError::Config("gateway_url is empty".into()));
        }
        if self.call_timeout_ms == 0 {
            return Err(CloudError::Config("call_timeout_ms must be positive".into()));
        }
        self.watch.check().map_err(CloudError::Config)?;
        self.fees.check().map_err(CloudError::Config)
    }
}
