//! Session establishment with a named remote worker.
//!
//! Handshake:
//! 1. generate a fresh session key pair
//! 2. `launchWorker(apiKey, jobName, clientPk)` → `{ workerPk, jobId }`
//! 3. derive the channel key from `sk·workerPk`, bound to the jobId
//! 4. query the job once; a `failed` job means the worker never came up
//!
//! A `Session` is immutable. Launching again produces a new one.

use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, info};
use zkcw_crypto::{fingerprint, ChannelKey, Envelope, PublicKey, SessionKeyPair};
use zkcw_rpc::{Gateway, LaunchRequest, SessionCredentials};
use zkcw_types::{CloudError, Hex, Job, JobStatus, Result};

pub struct Session {
    client_identity: String,
    job_name: String,
    job_id: String,
    worker_public_key: PublicKey,
    client_public_key: Hex,
    keys: SessionKeyPair,
    channel: ChannelKey,
    api_key: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("client_identity", &self.client_identity)
            .field("job_name", &self.job_name)
            .field("job_id", &self.job_id)
            .field("client_public_key", &self.client_public_key)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Network-level failures during the handshake surface as `Handshake`.
fn handshake_error(e: CloudError) -> CloudError {
    match e {
        CloudError::Transport(msg) | CloudError::Timeout(msg) => CloudError::Handshake(msg),
        other => other,
    }
}

impl Session {
    /// Launch a worker for `job_name` and bind a session to it.
    ///
    /// Returns the session together with the job as first observed.
    pub async fn establish(gateway: &dyn Gateway, api_key: &str, job_name: &str) -> Result<(Session, Job)> {
        if api_key.trim().is_empty() {
            return Err(CloudError::Auth("api key is empty".into()));
        }
        if job_name.trim().is_empty() {
            return Err(CloudError::WorkerUnavailable("job name is empty".into()));
        }

        let keys = SessionKeyPair::generate();
        let client_public_key = keys.public_key().to_hex()?;
        let request = LaunchRequest {
            job_name: job_name.to_string(),
            client_public_key: client_public_key.clone(),
        };
        let launched = gateway.launch_worker(api_key, &request).await.map_err(handshake_error)?;
        debug!(job_id = %launched.job_id, %job_name, "worker launched, deriving channel key");

        let worker_public_key = PublicKey::from_hex(&launched.worker_public_key)
            .map_err(|e| CloudError::Handshake(format!("invalid worker public key: {}", e)))?;
        let channel = keys.derive_channel_key(&worker_public_key, &launched.job_id)?;

        let job = gateway
            .job_status(api_key, &launched.job_id)
            .await
            .map_err(handshake_error)?;
        if job.status == JobStatus::Failed {
            return Err(CloudError::WorkerUnavailable(format!(
                "job {} failed to start",
                launched.job_id
            )));
        }

        let session = Session {
            client_identity: fingerprint(&json!(api_key))?,
            job_name: job_name.to_string(),
            job_id: launched.job_id,
            worker_public_key,
            client_public_key,
            keys,
            channel,
            api_key: api_key.to_string(),
        };
        info!(job_id = %session.job_id, job_name = %session.job_name, "session established");
        Ok((session, job))
    }

    /// Stable, non-reversible identifier of the api key holder.
    pub fn client_identity(&self) -> &str {
        &self.client_identity
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn worker_public_key(&self) -> &PublicKey {
        &self.worker_public_key
    }

    pub fn client_public_key(&self) -> &PublicKey {
        self.keys.public_key()
    }

    pub fn credentials(&self) -> SessionCredentials {
        SessionCredentials {
            client_identity: self.client_identity.clone(),
            job_id: self.job_id.clone(),
            job_name: self.job_name.clone(),
            client_public_key: self.client_public_key.clone(),
        }
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn seal(&self, body: &Value, encrypt: bool) -> Result<Envelope> {
        if encrypt {
            Envelope::seal(&self.channel, body)
        } else {
            Ok(Envelope::plain(body.clone()))
        }
    }

    /// Open a worker response. A sealed request only accepts a sealed reply.
    pub(crate) fn open(&self, envelope: Envelope, expect_sealed: bool) -> Result<Value> {
        if expect_sealed {
            envelope.open_sealed(&self.channel)
        } else {
            envelope.open(Some(&self.channel))
        }
    }
}
