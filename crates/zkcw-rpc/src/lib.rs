//! External collaborators of the client and their wire types.
//!
//! - `Gateway`: launches worker instances, reports and releases jobs
//! - `WorkerRpc`: the operation surface of a launched worker
//! - `LedgerQuery`: inclusion status of a submitted transaction hash
//! - `WalletSigner`: local signing capability, keyed by signer address
//!
//! HTTP implementations live in the `*_client` modules.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use zkcw_crypto::Envelope;
use zkcw_types::{ErrorInfo, ErrorKind, Hex, Job, LedgerStatus, Operation, Result};

mod api;
pub mod gateway_client;
pub mod ledger_client;
pub mod worker_client;

pub use api::ApiResponse;
pub use gateway_client::HttpGateway;
pub use ledger_client::HttpLedger;
pub use worker_client::HttpWorkerRpc;

/// Launch request sent to the gateway. Carries only the client's public key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    pub job_name: String,
    pub client_public_key: Hex,
}

/// Gateway answer to a launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchResponse {
    pub worker_public_key: Hex,
    pub job_id: String,
}

/// Identifies the session on every worker call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredentials {
    pub client_identity: String,
    pub job_id: String,
    pub job_name: String,
    pub client_public_key: Hex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRequest {
    pub operation: Operation,
    pub credentials: SessionCredentials,
    pub payload: Envelope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub payload: Envelope,
}

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn launch_worker(&self, api_key: &str, request: &LaunchRequest) -> Result<LaunchResponse>;
    async fn job_status(&self, api_key: &str, job_id: &str) -> Result<Job>;
    async fn release_worker(&self, api_key: &str, job_id: &str) -> Result<()>;
}

#[async_trait]
pub trait WorkerRpc: Send + Sync {
    async fn call(&self, api_key: &str, request: &WorkerRequest) -> Result<WorkerResponse>;
}

#[async_trait]
pub trait LedgerQuery: Send + Sync {
    async fn transaction_status(&self, tx_hash: &str) -> Result<LedgerStatus>;
}

/// Failures of the local signing capability.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("signature request rejected: {0}")]
    Rejected(String),

    #[error("wallet unavailable: {0}")]
    Unavailable(String),

    #[error("wallet does not control account {0}")]
    UnknownAccount(String),
}

impl WalletError {
    pub fn to_error_info(&self) -> ErrorInfo {
        let kind = match self {
            WalletError::Rejected(_) => ErrorKind::UserRejected,
            WalletError::Unavailable(_) => ErrorKind::WalletUnavailable,
            WalletError::UnknownAccount(_) => ErrorKind::SignerMismatch,
        };
        ErrorInfo::new(kind, self.to_string())
    }
}

/// Signs serialized transactions with keys that never leave the wallet.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    async fn sign_transaction(
        &self,
        signer_address: &str,
        transaction: &Value,
    ) -> std::result::Result<Value, WalletError>;
}
