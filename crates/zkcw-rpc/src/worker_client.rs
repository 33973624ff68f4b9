//! HTTP client for the worker operation surface.
//!
//! Endpoints:
//! - POST /api/v1/jobs/<job_id>/call

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use zkcw_types::Result;

use crate::api::{read_data, request_error};
use crate::{WorkerRequest, WorkerResponse, WorkerRpc};

/// Dispatches operations to a launched worker through the gateway.
pub struct HttpWorkerRpc {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpWorkerRpc {
    pub fn new(base_url: &str, timeout_ms: Option<u64>) -> Self {
        let timeout_ms = timeout_ms.unwrap_or(300_000);
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
impl WorkerRpc for HttpWorkerRpc {
    async fn call(&self, api_key: &str, request: &WorkerRequest) -> Result<WorkerResponse> {
        let url = format!(
            "{}/api/v1/jobs/{}/call",
            self.base_url, request.credentials.job_id
        );
        debug!(
            job_id = %request.credentials.job_id,
            operation = %request.operation,
            sealed = request.payload.is_sealed(),
            "calling worker"
        );

        let resp = self.client
            .post(&url)
            .bearer_auth(api_key)
            .json(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| request_error(e, "worker call"))?;

        read_data(resp, "worker call").await
    }
}
