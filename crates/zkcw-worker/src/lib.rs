//! Worker-side contract of the zkCloudWorker service.
//!
//! - `Worker`: the capability set a named worker implements
//! - `launchpad`: registry from job name to worker constructor
//! - `contract`: a worker that proves and submits contract transactions
//! - `pool`: in-process pool serving the gateway and RPC surfaces

use async_trait::async_trait;
use std::sync::Arc;
use zkcw_planner::{plan_fee, FeePayerGuard, FeePayerPool, FeeSchedule, FeeStrategy};
use zkcw_types::{
    ErrorInfo, ErrorKind, FeePolicy, JobPayload, JobResult, Operation, SerializedTransaction,
    SignedSerializedTransaction, TransactionResult, TxnPayload,
};

pub mod contract;
pub mod launchpad;
pub mod pool;

pub use contract::{ContractBackend, ContractWorker, NetworkSubmitter};
pub use launchpad::{Launchpad, LaunchpadBuilder};
pub use pool::{LocalPool, LocalPoolConfig};

/// Environment handed to a worker on every call.
#[derive(Clone)]
pub struct WorkerContext {
    pub job_id: String,
    pub job_name: String,
    pub fees: FeeSchedule,
    fee_strategy: Arc<dyn FeeStrategy>,
    fee_payers: FeePayerPool,
}

impl WorkerContext {
    pub fn new(
        job_id: impl Into<String>,
        job_name: impl Into<String>,
        fees: FeeSchedule,
        fee_strategy: Arc<dyn FeeStrategy>,
        fee_payers: FeePayerPool,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            job_name: job_name.into(),
            fees,
            fee_strategy,
            fee_payers,
        }
    }

    /// Fee for the split path: the caller's policy, resolved against the schedule.
    pub fn resolve_fee(&self, policy: FeePolicy, estimate: Option<u64>) -> u64 {
        self.fees.resolve(policy, estimate)
    }

    /// Fee for proveAndSend: chosen by the pool's strategy, within bounds.
    pub fn plan_fee(&self, estimate: Option<u64>) -> u64 {
        plan_fee(self.fee_strategy.as_ref(), &self.fees, estimate)
    }

    pub fn acquire_fee_payer(&self) -> Result<FeePayerGuard, ErrorInfo> {
        self.fee_payers.acquire().ok_or_else(|| {
            ErrorInfo::new(ErrorKind::WorkerUnavailable, "no fee payer is available")
        })
    }

    pub fn is_fee_payer(&self, address: &str) -> bool {
        self.fee_payers.contains(address)
    }
}

pub(crate) fn unsupported(operation: Operation) -> ErrorInfo {
    ErrorInfo::new(
        ErrorKind::Unsupported,
        format!("this worker does not implement {}", operation),
    )
}

/// Capabilities of a named worker. Variants implement the operations they support.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn prove(&self, _ctx: &WorkerContext, _payload: TxnPayload) -> SerializedTransaction {
        SerializedTransaction::failed(unsupported(Operation::Prove))
    }

    async fn send(
        &self,
        _ctx: &WorkerContext,
        _transaction: SignedSerializedTransaction,
    ) -> TransactionResult {
        TransactionResult::failed(unsupported(Operation::Send))
    }

    async fn prove_and_send(&self, _ctx: &WorkerContext, _payload: TxnPayload) -> TransactionResult {
        TransactionResult::failed(unsupported(Operation::ProveAndSend))
    }

    async fn run_job(&self, _ctx: &WorkerContext, _payload: JobPayload) -> JobResult {
        JobResult::failed(unsupported(Operation::RunJob))
    }
}
