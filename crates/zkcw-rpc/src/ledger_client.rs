//! HTTP client for ledger inclusion queries.
//!
//! Endpoints:
//! - GET /api/v1/ledger/status?hash=<tx_hash>

use async_trait::async_trait;
use std::time::Duration;
use zkcw_types::{LedgerStatus, Result};

use crate::api::{read_data, request_error};
use crate::LedgerQuery;

pub struct HttpLedger {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpLedger {
    pub fn new(base_url: &str, timeout_ms: Option<u64>) -> Self {
        let timeout_ms = timeout_ms.unwrap_or(20_000);
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

#[async_trait]
impl LedgerQuery for HttpLedger {
    async fn transaction_status(&self, tx_hash: &str) -> Result<LedgerStatus> {
        let url = format!("{}/api/v1/ledger/status", self.base_url);

        let resp = self.client
            .get(&url)
            .query(&[("hash", tx_hash)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| request_error(e, "ledger status"))?;

        read_data(resp, "ledger status").await
    }
}
