//! In-process worker pool.
//!
//! Serves the `Gateway` and `WorkerRpc` surfaces without a network hop:
//! - launch: api key check → registry lookup → capacity check → key exchange
//! - call: credential check → open envelope → run the worker → seal the answer
//!
//! Job status moves Pending → Running → Succeeded/Failed on each call.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};
use zkcw_crypto::{ChannelKey, Envelope, PublicKey, SessionKeyPair};
use zkcw_planner::{EstimateFeeStrategy, FeePayerPool, FeeSchedule, FeeStrategy};
use zkcw_rpc::{
    Gateway, LaunchRequest, LaunchResponse, WorkerRequest, WorkerResponse, WorkerRpc,
};
use zkcw_types::{
    CloudError, ErrorInfo, ErrorKind, Job, JobPayload, JobResult, JobStatus, Operation, Result,
    SerializedTransaction, SignedSerializedTransaction, TransactionResult, TxnPayload,
};

use crate::launchpad::Launchpad;
use crate::{Worker, WorkerContext};

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct LocalPoolConfig {
    pub capacity: usize,
    pub fees: FeeSchedule,
    pub fee_payers: Vec<String>,
}

impl Default for LocalPoolConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            fees: FeeSchedule::default(),
            fee_payers: Vec::new(),
        }
    }
}

struct JobState {
    status: JobStatus,
    result: Option<Value>,
    error: Option<ErrorInfo>,
}

struct Instance {
    job_name: String,
    client_public_key: String,
    channel: ChannelKey,
    worker: Arc<dyn Worker>,
    context: WorkerContext,
    state: Mutex<JobState>,
}

impl Instance {
    fn state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct LocalPool {
    launchpad: Arc<Launchpad>,
    config: LocalPoolConfig,
    api_keys: HashSet<String>,
    fee_strategy: Arc<dyn FeeStrategy>,
    fee_payers: FeePayerPool,
    instances: Mutex<HashMap<String, Arc<Instance>>>,
}

impl LocalPool {
    pub fn new(launchpad: Arc<Launchpad>, config: LocalPoolConfig) -> Self {
        let fee_payers = FeePayerPool::new(config.fee_payers.clone());
        Self {
            launchpad,
            config,
            api_keys: HashSet::new(),
            fee_strategy: Arc::new(EstimateFeeStrategy),
            fee_payers,
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_keys.insert(api_key.to_string());
        self
    }

    pub fn with_fee_strategy(mut self, strategy: Arc<dyn FeeStrategy>) -> Self {
        self.fee_strategy = strategy;
        self
    }

    pub fn active_jobs(&self) -> usize {
        self.instances().len()
    }

    fn instances(&self) -> MutexGuard<'_, HashMap<String, Arc<Instance>>> {
        self.instances.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn authorize(&self, api_key: &str) -> Result<()> {
        if api_key.is_empty() || !self.api_keys.contains(api_key) {
            return Err(CloudError::Auth("api key not recognized".into()));
        }
        Ok(())
    }

    fn instance(&self, job_id: &str) -> Result<Arc<Instance>> {
        self.instances()
            .get(job_id)
            .cloned()
            .ok_or_else(|| CloudError::WorkerUnavailable(format!("no running job {}", job_id)))
    }

    async fn run(&self, instance: &Instance, operation: Operation, body: Value) -> Result<(Value, Option<ErrorInfo>)> {
        let ctx = &instance.context;
        match operation {
            Operation::Prove => {
                let result = match decode::<TxnPayload>(body) {
                    Ok(payload) => instance.worker.prove(ctx, payload).await.normalized(),
                    Err(error) => SerializedTransaction::failed(error),
                };
                encode(&result, result.error.as_ref())
            }
            Operation::Send => {
                let result = match decode::<SignedSerializedTransaction>(body) {
                    Ok(signed) => instance.worker.send(ctx, signed).await,
                    Err(error) => TransactionResult::failed(error),
                };
                encode(&result, result.error.as_ref())
            }
            Operation::ProveAndSend => {
                let result = match decode::<TxnPayload>(body) {
                    Ok(payload) => instance.worker.prove_and_send(ctx, payload).await,
                    Err(error) => TransactionResult::failed(error),
                };
                encode(&result, result.error.as_ref())
            }
            Operation::RunJob => {
                let result = match decode::<JobPayload>(body) {
                    Ok(payload) => instance.worker.run_job(ctx, payload).await,
                    Err(error) => JobResult::failed(error),
                };
                encode(&result, result.error.as_ref())
            }
        }
    }
}

fn decode<T: DeserializeOwned>(body: Value) -> std::result::Result<T, ErrorInfo> {
    serde_json::from_value(body)
        .map_err(|e| ErrorInfo::new(ErrorKind::InvalidPayload, format!("malformed payload: {}", e)))
}

fn encode<T: Serialize>(result: &T, error: Option<&ErrorInfo>) -> Result<(Value, Option<ErrorInfo>)> {
    Ok((serde_json::to_value(result)?, error.cloned()))
}

#[async_trait]
impl Gateway for LocalPool {
    async fn launch_worker(&self, api_key: &str, request: &LaunchRequest) -> Result<LaunchResponse> {
        self.authorize(api_key)?;

        let worker = self.launchpad.instantiate(&request.job_name).ok_or_else(|| {
            CloudError::WorkerUnavailable(format!("no worker registered as {}", request.job_name))
        })?;
        let client_key = PublicKey::from_hex(&request.client_public_key)
            .map_err(|e| CloudError::Handshake(format!("bad client public key: {}", e)))?;

        let keys = SessionKeyPair::generate();
        let job_id = format!("{}-{:016x}", request.job_name, rand::random::<u64>());
        let channel = keys.derive_channel_key(&client_key, &job_id)?;
        let context = WorkerContext::new(
            job_id.clone(),
            request.job_name.clone(),
            self.config.fees,
            Arc::clone(&self.fee_strategy),
            self.fee_payers.clone(),
        );
        let instance = Arc::new(Instance {
            job_name: request.job_name.clone(),
            client_public_key: request.client_public_key.clone(),
            channel,
            worker,
            context,
            state: Mutex::new(JobState {
                status: JobStatus::Pending,
                result: None,
                error: None,
            }),
        });

        {
            let mut instances = self.instances();
            if instances.len() >= self.config.capacity {
                return Err(CloudError::WorkerUnavailable(format!(
                    "pool is at capacity ({} jobs)",
                    self.config.capacity
                )));
            }
            instances.insert(job_id.clone(), instance);
        }

        info!(%job_id, job_name = %request.job_name, "worker launched");
        Ok(LaunchResponse {
            worker_public_key: keys.public_key().to_hex()?,
            job_id,
        })
    }

    async fn job_status(&self, api_key: &str, job_id: &str) -> Result<Job> {
        self.authorize(api_key)?;
        let instance = self.instance(job_id)?;
        let state = instance.state();
        Ok(Job {
            job_id: job_id.to_string(),
            job_name: instance.job_name.clone(),
            status: state.status,
            result: state.result.clone(),
            error: state.error.clone(),
        })
    }

    async fn release_worker(&self, api_key: &str, job_id: &str) -> Result<()> {
        self.authorize(api_key)?;
        match self.instances().remove(job_id) {
            Some(_) => {
                info!(%job_id, "worker released");
                Ok(())
            }
            None => Err(CloudError::WorkerUnavailable(format!("no running job {}", job_id))),
        }
    }
}

#[async_trait]
impl WorkerRpc for LocalPool {
    async fn call(&self, api_key: &str, request: &WorkerRequest) -> Result<WorkerResponse> {
        self.authorize(api_key)?;
        let credentials = &request.credentials;
        let instance = self.instance(&credentials.job_id)?;
        if credentials.job_name != instance.job_name
            || credentials.client_public_key != instance.client_public_key
        {
            return Err(CloudError::Handshake("credentials do not match the session".into()));
        }

        let sealed = request.payload.is_sealed();
        let body = request.payload.clone().open(Some(&instance.channel))?;
        debug!(job_id = %credentials.job_id, operation = %request.operation, sealed, "running operation");

        instance.state().status = JobStatus::Running;
        let (response, error) = self.run(&instance, request.operation, body).await?;
        {
            let mut state = instance.state();
            state.status = if error.is_some() { JobStatus::Failed } else { JobStatus::Succeeded };
            state.result = if error.is_some() { None } else { Some(response.clone()) };
            state.error = error;
        }

        let payload = if sealed {
            Envelope::seal(&instance.channel, &response)?
        } else {
            Envelope::plain(response)
        };
        Ok(WorkerResponse { payload })
    }
}
