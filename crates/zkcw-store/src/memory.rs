//! In-memory storage adapter.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::*;
use zkcw_types::Result;

/// In-memory storage adapter (for testing and ephemeral use).
pub struct MemoryStore {
    jobs: Mutex<HashMap<String, JobRecord>>,
    submissions: Mutex<HashMap<Hex, SubmissionRecord>>,
    operations: Mutex<Vec<StoredOperation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            submissions: Mutex::new(HashMap::new()),
            operations: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl StorageAdapter for MemoryStore {
    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        Ok(lock(&self.jobs).get(job_id).cloned())
    }

    async fn upsert_job(&self, job: &JobRecord) -> Result<()> {
        lock(&self.jobs).insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn remove_job(&self, job_id: &str) -> Result<bool> {
        Ok(lock(&self.jobs).remove(job_id).is_some())
    }

    async fn get_submission(&self, fingerprint: &str) -> Result<Option<SubmissionRecord>> {
        Ok(lock(&self.submissions).get(fingerprint).cloned())
    }

    async fn record_submission(&self, record: &SubmissionRecord) -> Result<bool> {
        let mut submissions = lock(&self.submissions);
        if submissions.contains_key(&record.fingerprint) {
            return Ok(false);
        }
        submissions.insert(record.fingerprint.clone(), record.clone());
        Ok(true)
    }

    async fn create_operation(&self, op: &StoredOperation) -> Result<()> {
        lock(&self.operations).push(op.clone());
        Ok(())
    }

    async fn list_operations(&self, query: &ListOperationsQuery) -> Result<Vec<StoredOperation>> {
        let ops = lock(&self.operations);
        let filtered = ops
            .iter()
            .filter(|o| {
                if let Some(ref job_id) = query.job_id {
                    if o.job_id != *job_id { return false; }
                }
                if let Some(ref op_type) = query.op_type {
                    if o.op_type != *op_type { return false; }
                }
                true
            })
            .cloned()
            .collect();
        Ok(filtered)
    }
}
