//! HTTP client for the zkCloudWorker gateway.
//!
//! Endpoints:
//! - POST   /api/v1/workers/launch
//! - GET    /api/v1/jobs/<job_id>
//! - DELETE /api/v1/jobs/<job_id>

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use zkcw_types::{Job, Result};

use crate::api::{error_from_response, read_data, request_error};
use crate::{Gateway, LaunchRequest, LaunchResponse};

/// Gateway client for launching and managing worker instances.
pub struct HttpGateway {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpGateway {
    pub fn new(base_url: &str, timeout_ms: Option<u64>) -> Self {
        let timeout_ms = timeout_ms.unwrap_or(30_000);
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
impl Gateway for HttpGateway {
    /// POST /api/v1/workers/launch
    async fn launch_worker(&self, api_key: &str, request: &LaunchRequest) -> Result<LaunchResponse> {
        let url = format!("{}/api/v1/workers/launch", self.base_url);
        debug!(job_name = %request.job_name, "requesting worker launch");

        let resp = self.client
            .post(&url)
            .bearer_auth(api_key)
            .json(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| request_error(e, "gateway launch"))?;

        read_data(resp, "gateway launch").await
    }

    /// GET /api/v1/jobs/<job_id>
    async fn job_status(&self, api_key: &str, job_id: &str) -> Result<Job> {
        let url = format!("{}/api/v1/jobs/{}", self.base_url, job_id);

        let resp = self.client
            .get(&url)
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| request_error(e, "job status"))?;

        read_data(resp, "job status").await
    }

    /// DELETE /api/v1/jobs/<job_id>
    async fn release_worker(&self, api_key: &str, job_id: &str) -> Result<()> {
        let url = format!("{}/api/v1/jobs/{}", self.base_url, job_id);
        debug!(%job_id, "releasing worker");

        let resp = self.client
            .delete(&url)
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| request_error(e, "job release"))?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp, "job release").await);
        }
        Ok(())
    }
}
