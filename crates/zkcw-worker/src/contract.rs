//! Worker that proves and submits contract transactions.
//!
//! Flow per operation:
//! - prove: resolve the caller's fee → build and prove against the caller's sender
//! - send: forward the signed transaction to the network
//! - proveAndSend: take a fee payer from the pool → plan the fee → build and
//!   prove with the payer as sender → sign with the payer wallet → submit
//!
//! Contract compilation and proving are opaque here (`ContractBackend`).

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use zkcw_rpc::WalletSigner;
use zkcw_types::{
    ErrorInfo, ErrorKind, FeePolicy, Hex, SerializedTransaction, SignedSerializedTransaction,
    TransactionResult, TxnPayload,
};

use crate::{Worker, WorkerContext};

/// Compile the target contract, construct the transaction and prove it.
#[async_trait]
pub trait ContractBackend: Send + Sync {
    /// Returns the proved, unsigned transaction, or a `CompileError` /
    /// `ProofError` / `InvalidPayload`.
    async fn prove_transaction(&self, data: &Value, sender: &str, fee: u64) -> Result<Value, ErrorInfo>;

    /// Current network fee estimate, if the backend has one.
    async fn estimate_fee(&self) -> Option<u64> {
        None
    }
}

/// Hands signed transactions to the network.
#[async_trait]
pub trait NetworkSubmitter: Send + Sync {
    /// Returns the canonical transaction hash, or `RejectedByNetwork` /
    /// `AlreadySubmitted` / `Timeout`.
    async fn submit(&self, signed_transaction: &Value) -> Result<Hex, ErrorInfo>;
}

pub struct ContractWorker {
    backend: Arc<dyn ContractBackend>,
    network: Arc<dyn NetworkSubmitter>,
    payer_wallet: Option<Arc<dyn WalletSigner>>,
}

impl ContractWorker {
    pub fn new(backend: Arc<dyn ContractBackend>, network: Arc<dyn NetworkSubmitter>) -> Self {
        Self { backend, network, payer_wallet: None }
    }

    /// Wallet holding the keys of the pool's fee payers. Required for proveAndSend.
    pub fn with_payer_wallet(mut self, wallet: Arc<dyn WalletSigner>) -> Self {
        self.payer_wallet = Some(wallet);
        self
    }
}

fn invalid_payload(message: impl Into<String>) -> ErrorInfo {
    ErrorInfo::new(ErrorKind::InvalidPayload, message)
}

#[async_trait]
impl Worker for ContractWorker {
    async fn prove(&self, ctx: &WorkerContext, payload: TxnPayload) -> SerializedTransaction {
        let Some(sender) = payload.sender_address().map(str::to_string) else {
            return SerializedTransaction::failed(invalid_payload("senderAddress is required"));
        };
        let policy = payload.fee().unwrap_or(FeePolicy::Auto);
        if let Err(message) = ctx.fees.validate(policy) {
            return SerializedTransaction::failed(invalid_payload(message));
        }

        let estimate = self.backend.estimate_fee().await;
        let fee = ctx.resolve_fee(policy, estimate);
        debug!(job_id = %ctx.job_id, %sender, fee, "proving transaction");

        match self.backend.prove_transaction(&payload.data, &sender, fee).await {
            Ok(transaction) => SerializedTransaction::proved(transaction),
            Err(error) => SerializedTransaction::failed(error),
        }
    }

    async fn send(&self, ctx: &WorkerContext, transaction: SignedSerializedTransaction) -> TransactionResult {
        match self.network.submit(transaction.transaction()).await {
            Ok(hash) => {
                info!(job_id = %ctx.job_id, tx_hash = %hash, "transaction submitted");
                TransactionResult::submitted(hash, None).with_fee_payer(transaction.signer())
            }
            Err(error) => TransactionResult::failed(error),
        }
    }

    async fn prove_and_send(&self, ctx: &WorkerContext, payload: TxnPayload) -> TransactionResult {
        let Some(ref wallet) = self.payer_wallet else {
            return TransactionResult::failed(ErrorInfo::new(
                ErrorKind::WorkerUnavailable,
                "worker has no fee payer wallet",
            ));
        };
        let payer = match ctx.acquire_fee_payer() {
            Ok(payer) => payer,
            Err(error) => return TransactionResult::failed(error),
        };

        let estimate = self.backend.estimate_fee().await;
        let fee = ctx.plan_fee(estimate);
        debug!(job_id = %ctx.job_id, payer = %payer.address(), fee, "proving with pool fee payer");

        let proved = match self.backend.prove_transaction(&payload.data, payer.address(), fee).await {
            Ok(transaction) => SerializedTransaction::proved(transaction),
            Err(error) => return TransactionResult::failed(error),
        };
        let Some(ref unsigned) = proved.transaction else {
            return TransactionResult::failed(ErrorInfo::new(ErrorKind::ProofError, "empty proof"));
        };
        let signed = match wallet.sign_transaction(payer.address(), unsigned).await {
            Ok(signed) => signed,
            Err(e) => return TransactionResult::failed(e.to_error_info()),
        };
        let signed = match SignedSerializedTransaction::from_unsigned(&proved, signed, payer.address()) {
            Ok(signed) => signed,
            Err(error) => return TransactionResult::failed(error),
        };

        self.send(ctx, signed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use zkcw_planner::{EstimateFeeStrategy, FeePayerPool, FeeSchedule};
    use zkcw_rpc::WalletError;

    struct RecordingBackend {
        calls: Mutex<Vec<(String, u64)>>,
        estimate: Option<u64>,
    }

    #[async_trait]
    impl ContractBackend for RecordingBackend {
        async fn prove_transaction(&self, data: &Value, sender: &str, fee: u64) -> Result<Value, ErrorInfo> {
            if data.get("fail").is_some() {
                return Err(ErrorInfo::new(ErrorKind::ProofError, "assertion failed: Invalid root !"));
            }
            self.calls.lock().unwrap().push((sender.to_string(), fee));
            Ok(json!({ "feePayer": sender, "fee": fee, "proof": "0xproof" }))
        }

        async fn estimate_fee(&self) -> Option<u64> {
            self.estimate
        }
    }

    struct Network;

    #[async_trait]
    impl NetworkSubmitter for Network {
        async fn submit(&self, signed: &Value) -> Result<Hex, ErrorInfo> {
            Ok(format!("5Ju{}", signed["feePayer"].as_str().unwrap_or("?")))
        }
    }

    struct PayerWallet;

    #[async_trait]
    impl WalletSigner for PayerWallet {
        async fn sign_transaction(&self, signer: &str, transaction: &Value) -> Result<Value, WalletError> {
            let mut signed = transaction.clone();
            signed["signature"] = json!(format!("sig:{}", signer));
            Ok(signed)
        }
    }

    fn setup(payers: &[&str]) -> (ContractWorker, Arc<RecordingBackend>, WorkerContext) {
        let backend = Arc::new(RecordingBackend { calls: Mutex::new(Vec::new()), estimate: Some(5_000_000) });
        let worker = ContractWorker::new(backend.clone(), Arc::new(Network))
            .with_payer_wallet(Arc::new(PayerWallet));
        let ctx = WorkerContext::new(
            "job-1",
            "collections-prover",
            FeeSchedule::default(),
            Arc::new(EstimateFeeStrategy),
            FeePayerPool::new(payers.iter().copied()),
        );
        (worker, backend, ctx)
    }

    fn payload(options: Value) -> TxnPayload {
        serde_json::from_value(json!({ "data": { "claimUid": "abc" }, "options": options })).unwrap()
    }

    #[tokio::test]
    async fn test_prove_uses_caller_sender_and_fee() {
        let (worker, backend, ctx) = setup(&["B62qpool"]);
        let result = worker
            .prove(&ctx, payload(json!({ "senderAddress": "B62qcaller", "fee": "MIN_FEE" })))
            .await;

        assert!(result.is_ok());
        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![("B62qcaller".to_string(), ctx.fees.min_fee)]);
    }

    #[tokio::test]
    async fn test_prove_rejects_missing_sender_and_out_of_range_fee() {
        let (worker, _, ctx) = setup(&[]);
        let missing = worker.prove(&ctx, payload(json!({ "fee": "AUTO_FEE" }))).await;
        assert!(missing.error.unwrap().is(ErrorKind::InvalidPayload));

        let too_high = worker
            .prove(&ctx, payload(json!({ "senderAddress": "B62qcaller", "fee": u64::MAX })))
            .await;
        assert!(too_high.error.unwrap().is(ErrorKind::InvalidPayload));
    }

    #[tokio::test]
    async fn test_prove_surfaces_backend_errors() {
        let (worker, _, ctx) = setup(&[]);
        let payload: TxnPayload = serde_json::from_value(json!({
            "data": { "fail": true },
            "options": { "senderAddress": "B62qcaller" }
        }))
        .unwrap();
        let result = worker.prove(&ctx, payload).await;
        assert!(result.transaction.is_none());
        assert!(result.error.unwrap().is(ErrorKind::ProofError));
    }

    #[tokio::test]
    async fn test_prove_and_send_pays_from_the_pool() {
        let (worker, backend, ctx) = setup(&["B62qpool"]);
        let result = worker.prove_and_send(&ctx, TxnPayload::new(json!({ "claimUid": "abc" }))).await;

        assert!(result.is_ok());
        assert_eq!(result.fee_payer.as_deref(), Some("B62qpool"));
        assert_eq!(result.hash.as_deref(), Some("5JuB62qpool"));
        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![("B62qpool".to_string(), 5_000_000)]);
        // payer is back in the pool
        assert!(ctx.acquire_fee_payer().is_ok());
    }

    #[tokio::test]
    async fn test_prove_and_send_without_free_payer() {
        let (worker, _, ctx) = setup(&[]);
        let result = worker.prove_and_send(&ctx, TxnPayload::new(json!({}))).await;
        assert!(result.error.unwrap().is(ErrorKind::WorkerUnavailable));
    }
}
