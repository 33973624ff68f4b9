//! Local state for the zkCloudWorker client.
//!
//! Defines the `StorageAdapter` trait that all storage backends must implement.
//! Provides a `MemoryStore` for tests and ephemeral clients.
//!
//! Three kinds of records are kept:
//! - last-known status of each launched job
//! - submitted transactions, keyed by fingerprint, so a send is never repeated
//! - operation history (prove/sign/send/proveAndSend/runJob)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use zkcw_types::{ErrorInfo, Hex, JobStatus, Result};

pub mod memory;

pub use memory::MemoryStore;

/// Cached view of a remote job. The remote side owns the truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub job_name: String,
    pub status: JobStatus,
    pub last_error: Option<ErrorInfo>,
    pub updated_at: u64,
}

/// A transaction that was handed to the network through a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub fingerprint: Hex,
    pub job_id: String,
    pub tx_hash: Hex,
    pub data: Option<Value>,
    pub fee_payer: Option<String>,
    pub submitted_at: u64,
}

/// Stored operation (pipeline history).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOperation {
    pub id: String,
    pub job_id: String,
    pub op_type: String,
    pub status: String,
    pub tx_hash: Option<Hex>,
    pub error_code: Option<i32>,
    pub created_at: u64,
    pub updated_at: u64,
    pub data: Value,
}

/// Query for listing operations.
#[derive(Debug, Clone, Default)]
pub struct ListOperationsQuery {
    pub job_id: Option<String>,
    pub op_type: Option<String>,
}

/// The core storage adapter trait.
///
/// All methods are async to support both in-memory and persistent backends.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    // --- Lifecycle ---
    async fn init(&self) -> Result<()> { Ok(()) }
    async fn close(&self) -> Result<()> { Ok(()) }

    // --- Jobs ---
    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>>;
    async fn upsert_job(&self, job: &JobRecord) -> Result<()>;
    async fn remove_job(&self, job_id: &str) -> Result<bool>;

    // --- Submissions ---
    async fn get_submission(&self, fingerprint: &str) -> Result<Option<SubmissionRecord>>;
    /// Returns false when a record with the same fingerprint already exists;
    /// the existing record is kept.
    async fn record_submission(&self, record: &SubmissionRecord) -> Result<bool>;

    // --- Operations ---
    async fn create_operation(&self, op: &StoredOperation) -> Result<()>;
    async fn list_operations(&self, query: &ListOperationsQuery) -> Result<Vec<StoredOperation>>;
}

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
