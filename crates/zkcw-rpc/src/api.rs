//! Response wrapper and status mapping shared by the HTTP clients.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zkcw_types::{CloudError, ErrorInfo, ErrorKind, Result};

/// Gateway API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: Option<i32>,
    pub message: Option<String>,
    pub data: Option<T>,
}

pub(crate) fn request_error(e: reqwest::Error, what: &str) -> CloudError {
    if e.is_timeout() {
        CloudError::Timeout(format!("{} timed out", what))
    } else {
        CloudError::Transport(format!("{} request failed: {}", what, e))
    }
}

fn remote_error(code: Option<i32>, message: Option<String>) -> Option<CloudError> {
    let kind = ErrorKind::from_code(code?)?;
    Some(CloudError::Remote(ErrorInfo::new(
        kind,
        message.unwrap_or_else(|| kind.name().to_string()),
    )))
}

/// Map a non-success response to an error.
pub(crate) async fn error_from_response(resp: reqwest::Response, what: &str) -> CloudError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let message = format!("{} returned status {}: {}", what, status, body);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CloudError::Auth(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            CloudError::WorkerUnavailable(message)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => CloudError::Timeout(message),
        _ => serde_json::from_str::<ApiResponse<Value>>(&body)
            .ok()
            .and_then(|parsed| remote_error(parsed.code, parsed.message))
            .unwrap_or(CloudError::Transport(message)),
    }
}

/// Check the status and unwrap `data` from the response body.
pub(crate) async fn read_data<T: DeserializeOwned>(resp: reqwest::Response, what: &str) -> Result<T> {
    if !resp.status().is_success() {
        return Err(error_from_response(resp, what).await);
    }

    let body: ApiResponse<T> = resp
        .json()
        .await
        .map_err(|e| CloudError::Transport(format!("failed to parse {} response: {}", what, e)))?;

    match body.data {
        Some(data) => Ok(data),
        None => Err(remote_error(body.code, body.message.clone()).unwrap_or_else(|| {
            CloudError::Transport(format!(
                "{} response carried no data: {}",
                what,
                body.message.unwrap_or_default()
            ))
        })),
    }
}
