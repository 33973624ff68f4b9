//! The client: transaction pipeline, generic job runner and inclusion watch,
//! all dispatched through one session.
//!
//! Split path: `prove` (remote) → `sign` (local wallet) → `send` (remote).
//! Merged path: `prove_and_send`, where the worker picks payer and fee.
//!
//! Pipeline operations return result values carrying an optional `ErrorInfo`.
//! Nothing is retried here.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use zkcw_crypto::fingerprint;
use zkcw_planner::FeeSchedule;
use zkcw_rpc::{
    Gateway, HttpGateway, HttpLedger, HttpWorkerRpc, LedgerQuery, WalletSigner, WorkerRequest,
    WorkerRpc,
};
use zkcw_store::{
    now_secs, JobRecord, ListOperationsQuery, MemoryStore, StorageAdapter, StoredOperation,
    SubmissionRecord,
};
use zkcw_types::{
    CloudError, ErrorInfo, ErrorKind, FeePolicy, Job, JobPayload, JobResult, Operation, Result,
    SerializedTransaction, SignedSerializedTransaction, TransactionResult, TxnOptions, TxnPayload,
};
use zkcw_watch::{InclusionHandle, InclusionOutcome, InclusionWatcher, WatchEventHandler};

use crate::config::ClientConfig;
use crate::session::Session;

/// Collaborators for a client, assembled before launch.
pub struct ClientBuilder {
    config: ClientConfig,
    gateway: Option<Arc<dyn Gateway>>,
    worker_rpc: Option<Arc<dyn WorkerRpc>>,
    ledger: Option<Arc<dyn LedgerQuery>>,
    wallet: Option<Arc<dyn WalletSigner>>,
    store: Option<Arc<dyn StorageAdapter>>,
    watch_events: Option<WatchEventHandler>,
}

impl ClientBuilder {
    pub fn with_gateway(mut self, gateway: Arc<dyn Gateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_worker_rpc(mut self, worker_rpc: Arc<dyn WorkerRpc>) -> Self {
        self.worker_rpc = Some(worker_rpc);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn LedgerQuery>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_wallet(mut self, wallet: Arc<dyn WalletSigner>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    /// Defaults to a `MemoryStore`.
    pub fn with_store(mut self, store: Arc<dyn StorageAdapter>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_watch_events(mut self, handler: WatchEventHandler) -> Self {
        self.watch_events = Some(handler);
        self
    }

    /// Establish a session with a fresh `job_name` worker.
    ///
    /// Fails with `Auth`, `Handshake` or `WorkerUnavailable`.
    pub async fn launch(self, api_key: &str, job_name: &str) -> Result<CloudWorkerClient> {
        self.config.check()?;
        let gateway = self
            .gateway
            .ok_or_else(|| CloudError::Config("no gateway configured".into()))?;
        let worker_rpc = self
            .worker_rpc
            .ok_or_else(|| CloudError::Config("no worker rpc configured".into()))?;
        let ledger = self
            .ledger
            .ok_or_else(|| CloudError::Config("no ledger configured".into()))?;
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        store.init().await?;

        let (session, job) = Session::establish(gateway.as_ref(), api_key, job_name).await?;
        let watcher = InclusionWatcher::new(self.config.watch.clone(), ledger, self.watch_events);

        let client = CloudWorkerClient {
            config: self.config,
            gateway,
            worker_rpc,
            wallet: self.wallet,
            store,
            watcher,
            session,
            op_seq: AtomicU64::new(0),
        };
        client.cache_job(&job).await;
        Ok(client)
    }
}

/// A client bound to one session with one remote worker.
pub struct CloudWorkerClient {
    config: ClientConfig,
    gateway: Arc<dyn Gateway>,
    worker_rpc: Arc<dyn WorkerRpc>,
    wallet: Option<Arc<dyn WalletSigner>>,
    store: Arc<dyn StorageAdapter>,
    watcher: InclusionWatcher,
    session: Session,
    op_seq: AtomicU64,
}

fn invalid_payload(message: impl Into<String>) -> ErrorInfo {
    ErrorInfo::new(ErrorKind::InvalidPayload, message)
}

fn check_data(data: &Value) -> std::result::Result<(), ErrorInfo> {
    if !data.is_object() {
        return Err(invalid_payload("payload data must be a JSON object"));
    }
    Ok(())
}

/// Split-path payload: requires a sender, fills in `AUTO_FEE`, and holds an
/// explicit fee to the client's schedule.
fn prepare_prove(mut payload: TxnPayload, fees: &FeeSchedule) -> std::result::Result<TxnPayload, ErrorInfo> {
    check_data(&payload.data)?;
    let options = payload.options.get_or_insert_with(TxnOptions::default);
    match options.sender_address.as_deref() {
        None | Some("") => return Err(invalid_payload("options.senderAddress is required")),
        Some(sender) if sender.chars().any(char::is_whitespace) => {
            return Err(invalid_payload("options.senderAddress must not contain whitespace"));
        }
        Some(_) => {}
    }
    let fee = *options.fee.get_or_insert(FeePolicy::Auto);
    fees.validate(fee).map_err(invalid_payload)?;
    Ok(payload)
}

/// Merged-path payload: payer and fee belong to the worker.
fn prepare_prove_and_send(payload: &TxnPayload) -> std::result::Result<(), ErrorInfo> {
    check_data(&payload.data)?;
    if payload.sender_address().is_some() {
        return Err(invalid_payload("proveAndSend does not accept options.senderAddress"));
    }
    if payload.fee().is_some() {
        return Err(invalid_payload("proveAndSend does not accept options.fee"));
    }
    Ok(())
}

impl CloudWorkerClient {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            gateway: None,
            worker_rpc: None,
            ledger: None,
            wallet: None,
            store: None,
            watch_events: None,
        }
    }

    /// Builder with the HTTP gateway, worker RPC and ledger at `config.gateway_url`.
    pub fn from_config(config: ClientConfig) -> ClientBuilder {
        let url = config.gateway_url.clone();
        let http_timeout = Some(config.http_timeout_ms);
        let call_timeout = Some(config.call_timeout_ms);
        Self::builder(config)
            .with_gateway(Arc::new(HttpGateway::new(&url, http_timeout)))
            .with_worker_rpc(Arc::new(HttpWorkerRpc::new(&url, call_timeout)))
            .with_ledger(Arc::new(HttpLedger::new(&url, http_timeout)))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Shared dispatch: seal → call the worker under the per-call timeout → open → decode.
    async fn dispatch<T: DeserializeOwned>(&self, operation: Operation, body: Value) -> Result<T> {
        let request = WorkerRequest {
            operation,
            credentials: self.session.credentials(),
            payload: self.session.seal(&body, self.config.encrypt_payloads)?,
        };
        debug!(job_id = %self.session.job_id(), %operation, "dispatching");

        let limit = Duration::from_millis(self.config.call_timeout_ms);
        let response = timeout(limit, self.worker_rpc.call(self.session.api_key(), &request))
            .await
            .map_err(|_| {
                CloudError::Timeout(format!(
                    "{} did not complete within {} ms",
                    operation, self.config.call_timeout_ms
                ))
            })??;

        let body = self.session.open(response.payload, request.payload.is_sealed())?;
        Ok(serde_json::from_value(body)?)
    }

    /// Prove a transaction against the caller's `senderAddress` and fee policy.
    ///
    /// Returns exactly one of a transaction or an error.
    pub async fn prove(&self, payload: TxnPayload) -> SerializedTransaction {
        let result = match prepare_prove(payload, &self.config.fees) {
            Ok(payload) => match serde_json::to_value(&payload) {
                Ok(body) => self
                    .dispatch::<SerializedTransaction>(Operation::Prove, body)
                    .await
                    .unwrap_or_else(|e| SerializedTransaction::failed(e.to_error_info())),
                Err(e) => SerializedTransaction::failed(CloudError::from(e).to_error_info()),
            },
            Err(error) => SerializedTransaction::failed(error),
        }
        .normalized();

        self.record(Operation::Prove.as_str(), None, result.error.as_ref(), json!({})).await;
        result
    }

    /// Sign locally with the wallet key of `signer_address`.
    ///
    /// An errored or empty artifact is refused with `SignerMismatch` before the
    /// wallet is contacted.
    pub async fn sign(
        &self,
        signer_address: &str,
        transaction: &SerializedTransaction,
    ) -> std::result::Result<SignedSerializedTransaction, ErrorInfo> {
        let signed = self.sign_inner(signer_address, transaction).await;
        self.record("sign", None, signed.as_ref().err(), json!({ "signer": signer_address }))
            .await;
        signed
    }

    async fn sign_inner(
        &self,
        signer_address: &str,
        transaction: &SerializedTransaction,
    ) -> std::result::Result<SignedSerializedTransaction, ErrorInfo> {
        let unsigned = match (&transaction.transaction, &transaction.error) {
            (Some(unsigned), None) => unsigned,
            // from_unsigned produces the SignerMismatch for both cases
            _ => return SignedSerializedTransaction::from_unsigned(transaction, Value::Null, signer_address),
        };
        let Some(ref wallet) = self.wallet else {
            return Err(ErrorInfo::new(ErrorKind::WalletUnavailable, "no wallet is connected"));
        };

        let limit = Duration::from_millis(self.config.call_timeout_ms);
        let signed = match timeout(limit, wallet.sign_transaction(signer_address, unsigned)).await {
            Ok(Ok(signed)) => signed,
            Ok(Err(e)) => return Err(e.to_error_info()),
            Err(_) => {
                return Err(ErrorInfo::new(
                    ErrorKind::WalletUnavailable,
                    format!("wallet did not answer within {} ms", self.config.call_timeout_ms),
                ))
            }
        };
        SignedSerializedTransaction::from_unsigned(transaction, signed, signer_address)
    }

    /// Submit a signed transaction through the worker.
    ///
    /// A transaction this client already submitted is not sent again: the
    /// recorded hash comes back with `AlreadySubmitted`.
    pub async fn send(&self, transaction: &SignedSerializedTransaction) -> TransactionResult {
        let result = self.send_inner(transaction).await;
        self.record(
            Operation::Send.as_str(),
            result.hash.as_deref(),
            result.error.as_ref(),
            json!({ "signer": transaction.signer() }),
        )
        .await;
        result
    }

    async fn send_inner(&self, transaction: &SignedSerializedTransaction) -> TransactionResult {
        let fp = match fingerprint(transaction.transaction()) {
            Ok(fp) => fp,
            Err(e) => return TransactionResult::failed(e.to_error_info()),
        };

        match self.store.get_submission(&fp).await {
            Ok(Some(previous)) => {
                info!(tx_hash = %previous.tx_hash, "transaction already submitted, not resending");
                return TransactionResult {
                    hash: Some(previous.tx_hash),
                    data: previous.data,
                    error: Some(ErrorInfo::new(
                        ErrorKind::AlreadySubmitted,
                        "transaction was already submitted",
                    )),
                    fee_payer: previous.fee_payer,
                };
            }
            Ok(None) => {}
            // without the ledger a resend cannot be ruled out
            Err(e) => {
                warn!(error = %e, "submission ledger lookup failed, not sending");
                return TransactionResult::failed(e.to_error_info());
            }
        }

        let body = match serde_json::to_value(transaction) {
            Ok(body) => body,
            Err(e) => return TransactionResult::failed(CloudError::from(e).to_error_info()),
        };
        let result = self
            .dispatch::<TransactionResult>(Operation::Send, body)
            .await
            .unwrap_or_else(|e| TransactionResult::failed(e.to_error_info()));

        let accepted = match result.error {
            None => true,
            Some(ref error) => error.is(ErrorKind::AlreadySubmitted),
        };
        if let (true, Some(hash)) = (accepted, result.hash.as_deref()) {
            info!(job_id = %self.session.job_id(), tx_hash = %hash, "transaction sent");
            let record = SubmissionRecord {
                fingerprint: fp,
                job_id: self.session.job_id().to_string(),
                tx_hash: hash.to_string(),
                data: result.data.clone(),
                fee_payer: result.fee_payer.clone(),
                submitted_at: now_secs(),
            };
            if let Err(e) = self.store.record_submission(&record).await {
                warn!(tx_hash = %hash, error = %e, "failed to record submission");
            }
        }
        result
    }

    /// Prove, sign and send on the worker, paid by one of its own fee payers.
    pub async fn prove_and_send(&self, payload: TxnPayload) -> TransactionResult {
        let result = match prepare_prove_and_send(&payload) {
            Ok(()) => match serde_json::to_value(&payload) {
                Ok(body) => self
                    .dispatch::<TransactionResult>(Operation::ProveAndSend, body)
                    .await
                    .unwrap_or_else(|e| TransactionResult::failed(e.to_error_info())),
                Err(e) => TransactionResult::failed(CloudError::from(e).to_error_info()),
            },
            Err(error) => TransactionResult::failed(error),
        };

        if let Some(ref hash) = result.hash {
            info!(job_id = %self.session.job_id(), tx_hash = %hash, fee_payer = ?result.fee_payer, "transaction proved and sent");
        }
        self.record(
            Operation::ProveAndSend.as_str(),
            result.hash.as_deref(),
            result.error.as_ref(),
            json!({ "feePayer": result.fee_payer }),
        )
        .await;
        result
    }

    /// Run arbitrary, non-transactional worker logic.
    pub async fn run_job(&self, payload: JobPayload) -> JobResult {
        let result = match check_data(&payload.data) {
            Ok(()) => match serde_json::to_value(&payload) {
                Ok(body) => self
                    .dispatch::<JobResult>(Operation::RunJob, body)
                    .await
                    .unwrap_or_else(|e| JobResult::failed(e.to_error_info())),
                Err(e) => JobResult::failed(CloudError::from(e).to_error_info()),
            },
            Err(error) => JobResult::failed(error),
        };
        self.record(Operation::RunJob.as_str(), None, result.error.as_ref(), json!({})).await;
        result
    }

    /// Watch `tx_hash` until it is included, rejected, or the wait window ends.
    ///
    /// `callback` runs at most once. Dropping the handle stops the watch.
    pub fn wait_for_inclusion<F>(&self, tx_hash: &str, callback: F) -> InclusionHandle
    where
        F: FnOnce(InclusionOutcome) + Send + 'static,
    {
        self.watcher.wait_for_inclusion(tx_hash, callback)
    }

    /// Current job status from the gateway. Refreshes the cached record.
    pub async fn job_status(&self) -> Result<Job> {
        let job = self
            .gateway
            .job_status(self.session.api_key(), self.session.job_id())
            .await?;
        self.cache_job(&job).await;
        Ok(job)
    }

    /// Last status seen for this session's job, without a remote call.
    pub async fn cached_job(&self) -> Result<Option<JobRecord>> {
        self.store.get_job(self.session.job_id()).await
    }

    /// Operation history for this session's job, oldest first.
    pub async fn operations(&self) -> Result<Vec<StoredOperation>> {
        self.store
            .list_operations(&ListOperationsQuery {
                job_id: Some(self.session.job_id().to_string()),
                op_type: None,
            })
            .await
    }

    /// Release the remote worker and end the session.
    pub async fn release(self) -> Result<()> {
        let job_id = self.session.job_id().to_string();
        self.gateway.release_worker(self.session.api_key(), &job_id).await?;
        self.store.remove_job(&job_id).await?;
        self.store.close().await?;
        info!(%job_id, "session released");
        Ok(())
    }

    async fn cache_job(&self, job: &Job) {
        let record = JobRecord {
            job_id: job.job_id.clone(),
            job_name: job.job_name.clone(),
            status: job.status,
            last_error: job.error.clone(),
            updated_at: now_secs(),
        };
        if let Err(e) = self.store.upsert_job(&record).await {
            warn!(job_id = %job.job_id, error = %e, "failed to cache job status");
        }
    }

    async fn record(&self, op_type: &str, tx_hash: Option<&str>, error: Option<&ErrorInfo>, data: Value) {
        let now = now_secs();
        let seq = self.op_seq.fetch_add(1, Ordering::Relaxed);
        let op = StoredOperation {
            id: format!("{}:{}", self.session.job_id(), seq),
            job_id: self.session.job_id().to_string(),
            op_type: op_type.to_string(),
            status: if error.is_some() { "failed" } else { "succeeded" }.to_string(),
            tx_hash: tx_hash.map(str::to_string),
            error_code: error.map(|e| e.code),
            created_at: now,
            updated_at: now,
            data,
        };
        if let Err(e) = self.store.create_operation(&op).await {
            warn!(op_id = %op.id, error = %e, "failed to record operation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use zkcw_crypto::Envelope;
    use zkcw_rpc::{WalletError, WorkerResponse};
    use zkcw_types::{Hex, JobStatus, LedgerStatus};
    use zkcw_watch::{WatchConfig, WatchState};
    use zkcw_worker::{
        ContractBackend, ContractWorker, Launchpad, LocalPool, LocalPoolConfig, NetworkSubmitter,
        Worker, WorkerContext,
    };

    const CALLER: &str = "B62qcaller";
    const POOL_PAYER: &str = "B62qpool";

    struct Backend;

    #[async_trait]
    impl ContractBackend for Backend {
        async fn prove_transaction(
            &self,
            data: &Value,
            sender: &str,
            fee: u64,
        ) -> std::result::Result<Value, ErrorInfo> {
            if data.get("invalidRoot").is_some() {
                return Err(ErrorInfo::new(ErrorKind::ProofError, "assertion failed: Invalid root !"));
            }
            Ok(json!({ "feePayer": sender, "fee": fee, "claimUid": data["claimUid"], "proof": "0xproof" }))
        }
    }

    /// Network and ledger in one: submissions get sequential hashes.
    struct Chain {
        submitted: Mutex<Vec<Value>>,
        resolves: bool,
    }

    impl Chain {
        fn new(resolves: bool) -> Self {
            Self { submitted: Mutex::new(Vec::new()), resolves }
        }

        fn submissions(&self) -> usize {
            self.submitted.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl NetworkSubmitter for Chain {
        async fn submit(&self, signed: &Value) -> std::result::Result<Hex, ErrorInfo> {
            if signed.get("signature").is_none() {
                return Err(ErrorInfo::new(ErrorKind::RejectedByNetwork, "missing signature"));
            }
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(signed.clone());
            Ok(format!("5Ju{:03}", submitted.len()))
        }
    }

    #[async_trait]
    impl LedgerQuery for Chain {
        async fn transaction_status(&self, _tx_hash: &str) -> Result<LedgerStatus> {
            if self.resolves {
                Ok(LedgerStatus::Included { block: "1024".into() })
            } else {
                Ok(LedgerStatus::Pending)
            }
        }
    }

    #[derive(Default)]
    struct Wallet {
        requests: AtomicUsize,
        reject: bool,
    }

    #[async_trait]
    impl WalletSigner for Wallet {
        async fn sign_transaction(
            &self,
            signer_address: &str,
            transaction: &Value,
        ) -> std::result::Result<Value, WalletError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                return Err(WalletError::Rejected("declined by user".into()));
            }
            if transaction["feePayer"] != json!(signer_address) {
                return Err(WalletError::UnknownAccount(signer_address.into()));
            }
            let mut signed = transaction.clone();
            signed["signature"] = json!(format!("sig:{}", signer_address));
            Ok(signed)
        }
    }

    struct Echo;

    #[async_trait]
    impl Worker for Echo {
        async fn run_job(&self, ctx: &WorkerContext, payload: JobPayload) -> JobResult {
            JobResult::ok(json!({ "jobName": ctx.job_name, "echo": payload.data }))
        }
    }

    struct Sleeper;

    #[async_trait]
    impl Worker for Sleeper {
        async fn run_job(&self, _ctx: &WorkerContext, _payload: JobPayload) -> JobResult {
            tokio::time::sleep(Duration::from_secs(600)).await;
            JobResult::ok(json!({}))
        }
    }

    /// Reports every send as a duplicate of an earlier on-chain submission.
    struct Resubmitted {
        sends: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Worker for Resubmitted {
        async fn send(&self, _ctx: &WorkerContext, transaction: SignedSerializedTransaction) -> TransactionResult {
            self.sends.fetch_add(1, Ordering::SeqCst);
            TransactionResult {
                hash: Some("5Juprev".into()),
                data: None,
                error: Some(ErrorInfo::new(ErrorKind::AlreadySubmitted, "nonce already used")),
                fee_payer: Some(transaction.signer().to_string()),
            }
        }
    }

    struct Harness {
        pool: Arc<LocalPool>,
        chain: Arc<Chain>,
        wallet: Arc<Wallet>,
        remote_sends: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new(ledger_resolves: bool) -> Self {
            let chain = Arc::new(Chain::new(ledger_resolves));
            let wallet = Arc::new(Wallet::default());
            let (network, payer_wallet) = (chain.clone(), wallet.clone());
            let remote_sends = Arc::new(AtomicUsize::new(0));
            let sends = remote_sends.clone();
            let launchpad = Launchpad::builder()
                .register("collections-prover", move || {
                    ContractWorker::new(Arc::new(Backend), network.clone())
                        .with_payer_wallet(payer_wallet.clone())
                })
                .register("send-email-to-judges", || Echo)
                .register("slow-job", || Sleeper)
                .register("resubmitted", move || Resubmitted { sends: sends.clone() })
                .build();
            let pool = LocalPool::new(
                Arc::new(launchpad),
                LocalPoolConfig { fee_payers: vec![POOL_PAYER.into()], ..Default::default() },
            )
            .with_api_key("key");
            Self { pool: Arc::new(pool), chain, wallet, remote_sends }
        }

        async fn launch_with(
            &self,
            job_name: &str,
            config: ClientConfig,
            wallet: Option<Arc<dyn WalletSigner>>,
        ) -> Result<CloudWorkerClient> {
            let mut builder = CloudWorkerClient::builder(config)
                .with_gateway(self.pool.clone())
                .with_worker_rpc(self.pool.clone())
                .with_ledger(self.chain.clone());
            if let Some(wallet) = wallet {
                builder = builder.with_wallet(wallet);
            }
            builder.launch("key", job_name).await
        }

        async fn launch(&self, job_name: &str) -> CloudWorkerClient {
            let wallet: Arc<dyn WalletSigner> = self.wallet.clone();
            self.launch_with(job_name, config(), Some(wallet)).await.unwrap()
        }
    }

    fn config() -> ClientConfig {
        ClientConfig {
            call_timeout_ms: 5_000,
            watch: WatchConfig {
                initial_interval_ms: 1_000,
                max_interval_ms: 4_000,
                max_wait_ms: 30_000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn claim(options: Value) -> TxnPayload {
        serde_json::from_value(json!({ "data": { "claimUid": "abc" }, "options": options })).unwrap()
    }

    #[tokio::test]
    async fn test_prove_sign_send_claim() {
        let h = Harness::new(true);
        let client = h.launch("collections-prover").await;

        let proved = client.prove(claim(json!({ "senderAddress": CALLER, "fee": "MIN_FEE" }))).await;
        assert!(proved.is_ok());
        assert!(proved.hash.is_none());
        assert_eq!(proved.transaction.as_ref().unwrap()["fee"], json!(1_000_000));

        let signed = client.sign(CALLER, &proved).await.unwrap();
        assert_eq!(signed.signer(), CALLER);

        let result = client.send(&signed).await;
        assert!(result.error.is_none());
        assert_eq!(result.hash.as_deref(), Some("5Ju001"));
        assert_eq!(result.fee_payer.as_deref(), Some(CALLER));

        let ops: Vec<String> = client.operations().await.unwrap().into_iter().map(|o| o.op_type).collect();
        assert_eq!(ops, ["prove", "sign", "send"]);
    }

    #[tokio::test]
    async fn test_proof_error_is_never_signed_or_sent() {
        let h = Harness::new(true);
        let client = h.launch("collections-prover").await;

        let payload: TxnPayload = serde_json::from_value(json!({
            "data": { "claimUid": "abc", "invalidRoot": true },
            "options": { "senderAddress": CALLER, "fee": "MIN_FEE" }
        }))
        .unwrap();
        let proved = client.prove(payload).await;
        assert!(proved.transaction.is_none());
        assert!(proved.hash.is_none());
        assert!(proved.error.as_ref().unwrap().is(ErrorKind::ProofError));

        let err = client.sign(CALLER, &proved).await.unwrap_err();
        assert!(err.is(ErrorKind::SignerMismatch));
        assert_eq!(h.wallet.requests.load(Ordering::SeqCst), 0);
        assert_eq!(h.chain.submissions(), 0);
    }

    #[tokio::test]
    async fn test_second_send_returns_first_hash() {
        let h = Harness::new(true);
        let client = h.launch("collections-prover").await;

        let proved = client.prove(claim(json!({ "senderAddress": CALLER }))).await;
        let signed = client.sign(CALLER, &proved).await.unwrap();
        let first = client.send(&signed).await;
        let second = client.send(&signed).await;

        assert!(first.is_ok());
        assert!(second.error.unwrap().is(ErrorKind::AlreadySubmitted));
        assert_eq!(second.hash, first.hash);
        assert_eq!(h.chain.submissions(), 1);
    }

    #[tokio::test]
    async fn test_prove_and_send_pays_from_worker_pool() {
        let h = Harness::new(true);
        let client = h.launch("collections-prover").await;

        let result = client.prove_and_send(TxnPayload::new(json!({ "claimUid": "abc" }))).await;
        assert!(result.is_ok());
        assert_eq!(result.fee_payer.as_deref(), Some(POOL_PAYER));
        assert_ne!(result.fee_payer.as_deref(), Some(CALLER));

        let rejected = client.prove_and_send(claim(json!({ "senderAddress": CALLER }))).await;
        assert!(rejected.error.unwrap().is(ErrorKind::InvalidPayload));
        let rejected = client.prove_and_send(claim(json!({ "fee": "MAX_FEE" }))).await;
        assert!(rejected.error.unwrap().is(ErrorKind::InvalidPayload));
        assert_eq!(h.chain.submissions(), 1);
    }

    #[tokio::test]
    async fn test_prove_validates_payload() {
        let h = Harness::new(true);
        let client = h.launch("collections-prover").await;

        let missing = client.prove(claim(json!({ "fee": "AUTO_FEE" }))).await;
        assert!(missing.error.unwrap().is(ErrorKind::InvalidPayload));
        let spaced = client.prove(claim(json!({ "senderAddress": "B62q caller" }))).await;
        assert!(spaced.error.unwrap().is(ErrorKind::InvalidPayload));
        let not_object = client
            .prove(TxnPayload::new(json!(["abc"])).with_options(TxnOptions {
                sender_address: Some(CALLER.into()),
                ..Default::default()
            }))
            .await;
        assert!(not_object.error.unwrap().is(ErrorKind::InvalidPayload));
        let too_low = client.prove(claim(json!({ "senderAddress": CALLER, "fee": 1 }))).await;
        assert!(too_low.error.unwrap().is(ErrorKind::InvalidPayload));
    }

    #[tokio::test]
    async fn test_sign_failures() {
        let h = Harness::new(true);
        let client = h.launch("collections-prover").await;
        let proved = client.prove(claim(json!({ "senderAddress": CALLER }))).await;

        let err = client.sign("B62qsomeoneelse", &proved).await.unwrap_err();
        assert!(err.is(ErrorKind::SignerMismatch));

        let no_wallet = h.launch_with("collections-prover", config(), None).await.unwrap();
        let err = no_wallet.sign(CALLER, &proved).await.unwrap_err();
        assert!(err.is(ErrorKind::WalletUnavailable));

        let declining: Arc<dyn WalletSigner> = Arc::new(Wallet { reject: true, ..Default::default() });
        let declined = h.launch_with("collections-prover", config(), Some(declining)).await.unwrap();
        let err = declined.sign(CALLER, &proved).await.unwrap_err();
        assert!(err.is(ErrorKind::UserRejected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sent_transaction_is_watched_to_inclusion() {
        let h = Harness::new(true);
        let client = h.launch("collections-prover").await;
        let result = client.prove_and_send(TxnPayload::new(json!({ "claimUid": "abc" }))).await;
        let hash = result.hash.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = client.wait_for_inclusion(&hash, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let outcome = handle.join().await.unwrap();

        assert_eq!(outcome.state, WatchState::Included);
        assert_eq!(outcome.result.hash.as_deref(), Some(hash.as_str()));
        assert_eq!(outcome.result.data.unwrap()["block"], json!("1024"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_hash_expires_once() {
        let h = Harness::new(false);
        let client = h.launch("collections-prover").await;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = client.wait_for_inclusion("0xHASH", move |outcome| {
            assert_eq!(outcome.state, WatchState::Expired);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let outcome = handle.join().await.unwrap();

        assert_eq!(outcome.state, WatchState::Expired);
        assert!(outcome.result.error.unwrap().is(ErrorKind::Expired));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_job_sealed_and_plain() {
        let h = Harness::new(true);
        for encrypt_payloads in [true, false] {
            let config = ClientConfig { encrypt_payloads, ..config() };
            let client = h.launch_with("send-email-to-judges", config, None).await.unwrap();

            let result = client.run_job(JobPayload::new(json!({ "judges": ["ana", "bo"] }))).await;
            assert!(result.is_ok());
            let data = result.data.unwrap();
            assert_eq!(data["jobName"], json!("send-email-to-judges"));
            assert_eq!(data["echo"]["judges"][1], json!("bo"));

            assert_eq!(client.job_status().await.unwrap().status, JobStatus::Succeeded);
            assert_eq!(client.cached_job().await.unwrap().unwrap().status, JobStatus::Succeeded);
        }

        let client = h.launch_with("send-email-to-judges", config(), None).await.unwrap();
        let invalid = client.run_job(JobPayload::new(json!("not an object"))).await;
        assert!(invalid.error.unwrap().is(ErrorKind::InvalidPayload));
    }

    #[tokio::test]
    async fn test_unsupported_operation() {
        let h = Harness::new(true);
        let client = h.launch("send-email-to-judges").await;
        let result = client.prove_and_send(TxnPayload::new(json!({}))).await;
        assert!(result.error.unwrap().is(ErrorKind::Unsupported));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let h = Harness::new(true);
        let config = ClientConfig { call_timeout_ms: 1_000, ..config() };
        let client = h.launch_with("slow-job", config, None).await.unwrap();

        let result = client.run_job(JobPayload::new(json!({}))).await;
        assert!(result.error.unwrap().is(ErrorKind::Timeout));
    }

    /// Forwards to the pool, then answers in plaintext regardless of the request.
    struct Downgrader {
        inner: Arc<LocalPool>,
    }

    #[async_trait]
    impl WorkerRpc for Downgrader {
        async fn call(&self, api_key: &str, request: &WorkerRequest) -> Result<WorkerResponse> {
            self.inner.call(api_key, request).await?;
            Ok(WorkerResponse { payload: Envelope::plain(json!({ "data": { "forged": true } })) })
        }
    }

    #[tokio::test]
    async fn test_plain_reply_to_sealed_request_is_refused() {
        let h = Harness::new(true);
        let client = CloudWorkerClient::builder(config())
            .with_gateway(h.pool.clone())
            .with_worker_rpc(Arc::new(Downgrader { inner: h.pool.clone() }))
            .with_ledger(h.chain.clone())
            .launch("key", "send-email-to-judges")
            .await
            .unwrap();

        let result = client.run_job(JobPayload::new(json!({ "judges": ["ana"] }))).await;
        assert!(result.data.is_none());
        assert!(result.error.unwrap().is(ErrorKind::HandshakeError));

        // a plaintext session has nothing to downgrade
        let plain = CloudWorkerClient::builder(ClientConfig { encrypt_payloads: false, ..config() })
            .with_gateway(h.pool.clone())
            .with_worker_rpc(Arc::new(Downgrader { inner: h.pool.clone() }))
            .with_ledger(h.chain.clone())
            .launch("key", "send-email-to-judges")
            .await
            .unwrap();
        let result = plain.run_job(JobPayload::new(json!({}))).await;
        assert_eq!(result.data, Some(json!({ "forged": true })));
    }

    #[tokio::test]
    async fn test_explicit_fee_is_held_to_client_schedule() {
        let h = Harness::new(true);
        let mut strict = config();
        strict.fees.min_fee = 50_000_000;
        let wallet: Arc<dyn WalletSigner> = h.wallet.clone();
        let client = h.launch_with("collections-prover", strict, Some(wallet)).await.unwrap();

        let low = client.prove(claim(json!({ "senderAddress": CALLER, "fee": 2_000_000 }))).await;
        assert!(low.transaction.is_none());
        let error = low.error.unwrap();
        assert!(error.is(ErrorKind::InvalidPayload));
        assert!(error.message.contains("[50000000,"), "{}", error.message);

        let named = client.prove(claim(json!({ "senderAddress": CALLER, "fee": "MIN_FEE" }))).await;
        assert!(named.is_ok());

        // the worker's own schedule accepts the same amount
        let lenient = h.launch("collections-prover").await;
        let proved = lenient.prove(claim(json!({ "senderAddress": CALLER, "fee": 2_000_000 }))).await;
        assert!(proved.is_ok());
        assert_eq!(proved.transaction.unwrap()["fee"], json!(2_000_000));
    }

    /// Memory store whose submission ledger cannot be read.
    struct UnreadableLedger {
        inner: MemoryStore,
    }

    #[async_trait]
    impl StorageAdapter for UnreadableLedger {
        async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
            self.inner.get_job(job_id).await
        }

        async fn upsert_job(&self, job: &JobRecord) -> Result<()> {
            self.inner.upsert_job(job).await
        }

        async fn remove_job(&self, job_id: &str) -> Result<bool> {
            self.inner.remove_job(job_id).await
        }

        async fn get_submission(&self, _fingerprint: &str) -> Result<Option<SubmissionRecord>> {
            Err(CloudError::Other("disk unavailable".into()))
        }

        async fn record_submission(&self, record: &SubmissionRecord) -> Result<bool> {
            self.inner.record_submission(record).await
        }

        async fn create_operation(&self, op: &StoredOperation) -> Result<()> {
            self.inner.create_operation(op).await
        }

        async fn list_operations(&self, query: &ListOperationsQuery) -> Result<Vec<StoredOperation>> {
            self.inner.list_operations(query).await
        }
    }

    #[tokio::test]
    async fn test_unreadable_submission_ledger_blocks_send() {
        let h = Harness::new(true);
        let client = CloudWorkerClient::builder(config())
            .with_gateway(h.pool.clone())
            .with_worker_rpc(h.pool.clone())
            .with_ledger(h.chain.clone())
            .with_wallet(h.wallet.clone())
            .with_store(Arc::new(UnreadableLedger { inner: MemoryStore::new() }))
            .launch("key", "collections-prover")
            .await
            .unwrap();

        let proved = client.prove(claim(json!({ "senderAddress": CALLER }))).await;
        let signed = client.sign(CALLER, &proved).await.unwrap();
        for _ in 0..2 {
            let result = client.send(&signed).await;
            assert!(result.hash.is_none());
            let error = result.error.unwrap();
            assert!(error.is(ErrorKind::Internal));
            assert!(error.message.contains("disk unavailable"));
        }
        assert_eq!(h.chain.submissions(), 0);
    }

    #[tokio::test]
    async fn test_remote_duplicate_is_recorded_and_not_resent() {
        let h = Harness::new(true);
        let client = h.launch("resubmitted").await;
        let signed: SignedSerializedTransaction = serde_json::from_value(json!({
            "transaction": { "feePayer": CALLER, "nonce": 7, "signature": "sig:B62qcaller" },
            "signer": CALLER
        }))
        .unwrap();

        let first = client.send(&signed).await;
        let second = client.send(&signed).await;

        for result in [&first, &second] {
            assert_eq!(result.hash.as_deref(), Some("5Juprev"));
            assert!(result.error.as_ref().unwrap().is(ErrorKind::AlreadySubmitted));
        }
        assert_eq!(second.fee_payer.as_deref(), Some(CALLER));
        assert_eq!(h.remote_sends.load(Ordering::SeqCst), 1);
    }

    /// Never answers a signature request.
    struct SilentWallet;

    #[async_trait]
    impl WalletSigner for SilentWallet {
        async fn sign_transaction(
            &self,
            _signer_address: &str,
            _transaction: &Value,
        ) -> std::result::Result<Value, WalletError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Err(WalletError::Rejected("too late".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_wallet_is_unavailable_after_call_timeout() {
        let h = Harness::new(true);
        let config = ClientConfig { call_timeout_ms: 1_000, ..config() };
        let wallet: Arc<dyn WalletSigner> = Arc::new(SilentWallet);
        let client = h.launch_with("collections-prover", config, Some(wallet)).await.unwrap();
        let proved = client.prove(claim(json!({ "senderAddress": CALLER }))).await;
        assert!(proved.is_ok());

        let started = tokio::time::Instant::now();
        let err = client.sign(CALLER, &proved).await.unwrap_err();
        assert!(err.is(ErrorKind::WalletUnavailable));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(h.chain.submissions(), 0);
    }

    #[tokio::test]
    async fn test_launch_failures() {
        let h = Harness::new(true);
        let err = CloudWorkerClient::builder(config())
            .with_gateway(h.pool.clone())
            .with_worker_rpc(h.pool.clone())
            .with_ledger(h.chain.clone())
            .launch("not-a-key", "collections-prover")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CloudError::Auth(_)));

        let err = h.launch_with("batch-voting", config(), None).await.err().unwrap();
        assert!(matches!(err, CloudError::WorkerUnavailable(_)));

        let err = CloudWorkerClient::builder(config())
            .launch("key", "collections-prover")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CloudError::Config(_)));
    }

    #[tokio::test]
    async fn test_relaunch_creates_a_new_session_and_release_frees_the_worker() {
        let h = Harness::new(true);
        let first = h.launch("collections-prover").await;
        let second = h.launch("collections-prover").await;
        assert_ne!(first.session().job_id(), second.session().job_id());
        assert_eq!(first.session().client_identity(), second.session().client_identity());
        assert_eq!(h.pool.active_jobs(), 2);

        first.release().await.unwrap();
        second.release().await.unwrap();
        assert_eq!(h.pool.active_jobs(), 0);
    }
}
