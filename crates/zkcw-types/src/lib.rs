//! Shared data model for the zkCloudWorker client.
//!
//! Every async boundary in the client returns one of the result values defined
//! here, each carrying an optional [`ErrorInfo`] instead of raising.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 0x-prefixed hex string (e.g. "0x1234...").
pub type Hex = String;

/// Error taxonomy shared by the client, the worker pool and the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // session establishment
    AuthError,
    HandshakeError,
    WorkerUnavailable,
    // prove
    InvalidPayload,
    CompileError,
    ProofError,
    // sign
    SignerMismatch,
    UserRejected,
    WalletUnavailable,
    // send
    RejectedByNetwork,
    Timeout,
    AlreadySubmitted,
    // inclusion watcher
    Expired,
    Failed,

    Unsupported,
    Internal,
}

impl ErrorKind {
    const ALL: [ErrorKind; 16] = [
        ErrorKind::AuthError,
        ErrorKind::HandshakeError,
        ErrorKind::WorkerUnavailable,
        ErrorKind::InvalidPayload,
        ErrorKind::CompileError,
        ErrorKind::ProofError,
        ErrorKind::SignerMismatch,
        ErrorKind::UserRejected,
        ErrorKind::WalletUnavailable,
        ErrorKind::RejectedByNetwork,
        ErrorKind::Timeout,
        ErrorKind::AlreadySubmitted,
        ErrorKind::Expired,
        ErrorKind::Failed,
        ErrorKind::Unsupported,
        ErrorKind::Internal,
    ];

    /// Stable numeric code carried in [`ErrorInfo::code`].
    pub const fn code(self) -> i32 {
        match self {
            ErrorKind::AuthError => 101,
            ErrorKind::HandshakeError => 102,
            ErrorKind::WorkerUnavailable => 103,
            ErrorKind::InvalidPayload => 201,
            ErrorKind::CompileError => 202,
            ErrorKind::ProofError => 203,
            ErrorKind::SignerMismatch => 301,
            ErrorKind::UserRejected => 302,
            ErrorKind::WalletUnavailable => 303,
            ErrorKind::RejectedByNetwork => 401,
            ErrorKind::Timeout => 402,
            ErrorKind::AlreadySubmitted => 403,
            ErrorKind::Expired => 501,
            ErrorKind::Failed => 502,
            ErrorKind::Unsupported => 901,
            ErrorKind::Internal => 999,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code)
    }

    pub const fn name(self) -> &'static str {
        match self {
            ErrorKind::AuthError => "AuthError",
            ErrorKind::HandshakeError => "HandshakeError",
            ErrorKind::WorkerUnavailable => "WorkerUnavailable",
            ErrorKind::InvalidPayload => "InvalidPayload",
            ErrorKind::CompileError => "CompileError",
            ErrorKind::ProofError => "ProofError",
            ErrorKind::SignerMismatch => "SignerMismatch",
            ErrorKind::UserRejected => "UserRejected",
            ErrorKind::WalletUnavailable => "WalletUnavailable",
            ErrorKind::RejectedByNetwork => "RejectedByNetwork",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::AlreadySubmitted => "AlreadySubmitted",
            ErrorKind::Expired => "Expired",
            ErrorKind::Failed => "Failed",
            ErrorKind::Unsupported => "Unsupported",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error value embedded in results. Callers must check it before trusting
/// the other fields of the enclosing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Value>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.code(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: Value) -> Self {
        self.cause = Some(cause);
        self
    }

    /// The taxonomy entry for this error, if the code is a known one.
    pub fn kind(&self) -> Option<ErrorKind> {
        ErrorKind::from_code(self.code)
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.code == kind.code()
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "{} ({}): {}", kind, self.code, self.message),
            None => write!(f, "error {}: {}", self.code, self.message),
        }
    }
}

/// Client SDK error types.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Remote(ErrorInfo),

    #[error("{0}")]
    Other(String),
}

impl CloudError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CloudError::Auth(_) => ErrorKind::AuthError,
            CloudError::Handshake(_) | CloudError::Crypto(_) => ErrorKind::HandshakeError,
            CloudError::WorkerUnavailable(_) => ErrorKind::WorkerUnavailable,
            CloudError::Timeout(_) => ErrorKind::Timeout,
            CloudError::InvalidPayload(_) => ErrorKind::InvalidPayload,
            CloudError::Remote(info) => info.kind().unwrap_or(ErrorKind::Internal),
            CloudError::Transport(_)
            | CloudError::Config(_)
            | CloudError::Serialization(_)
            | CloudError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Fold this error into the value form carried by result types.
    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            CloudError::Remote(info) => info.clone(),
            other => ErrorInfo::new(other.kind(), other.to_string()),
        }
    }
}

impl From<ErrorInfo> for CloudError {
    fn from(info: ErrorInfo) -> Self {
        CloudError::Remote(info)
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

/// Fee selection for a transaction: a named policy or an explicit amount in nanomina.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawFeePolicy", into = "RawFeePolicy")]
pub enum FeePolicy {
    Min,
    Max,
    Auto,
    Fixed(u64),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawFeePolicy {
    Named(String),
    Amount(u64),
}

impl FromStr for FeePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "MIN_FEE" => Ok(FeePolicy::Min),
            "MAX_FEE" => Ok(FeePolicy::Max),
            "AUTO_FEE" => Ok(FeePolicy::Auto),
            other => other
                .parse::<u64>()
                .map(FeePolicy::Fixed)
                .map_err(|_| format!("unknown fee policy: {}", other)),
        }
    }
}

impl TryFrom<RawFeePolicy> for FeePolicy {
    type Error = String;

    fn try_from(raw: RawFeePolicy) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawFeePolicy::Named(name) => name.parse(),
            RawFeePolicy::Amount(amount) => Ok(FeePolicy::Fixed(amount)),
        }
    }
}

impl From<FeePolicy> for RawFeePolicy {
    fn from(policy: FeePolicy) -> Self {
        match policy {
            FeePolicy::Min => RawFeePolicy::Named("MIN_FEE".into()),
            FeePolicy::Max => RawFeePolicy::Named("MAX_FEE".into()),
            FeePolicy::Auto => RawFeePolicy::Named("AUTO_FEE".into()),
            FeePolicy::Fixed(amount) => RawFeePolicy::Amount(amount),
        }
    }
}

/// Options recognized for transaction jobs. Unknown keys are passed through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxnOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<FeePolicy>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload for prove and proveAndSend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxnPayload {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<TxnOptions>,
}

impl TxnPayload {
    pub fn new(data: Value) -> Self {
        Self { data, options: None }
    }

    pub fn with_options(mut self, options: TxnOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn sender_address(&self) -> Option<&str> {
        self.options.as_ref()?.sender_address.as_deref()
    }

    pub fn fee(&self) -> Option<FeePolicy> {
        self.options.as_ref()?.fee
    }
}

/// Payload for generic jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

impl JobPayload {
    pub fn new(data: Value) -> Self {
        Self { data, options: None }
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }
}

/// Proved but unsigned transaction returned by `prove`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SerializedTransaction {
    pub hash: Option<Hex>,
    pub transaction: Option<Value>,
    pub error: Option<ErrorInfo>,
}

impl SerializedTransaction {
    pub fn proved(transaction: Value) -> Self {
        Self {
            hash: None,
            transaction: Some(transaction),
            error: None,
        }
    }

    pub fn failed(error: ErrorInfo) -> Self {
        Self {
            hash: None,
            transaction: None,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.transaction.is_some()
    }

    /// Enforce that exactly one of `transaction` and `error` is set.
    ///
    /// An artifact carrying both is treated as failed; one carrying neither
    /// becomes a `ProofError`.
    pub fn normalized(self) -> Self {
        match (self.transaction, self.error) {
            (Some(transaction), None) => Self {
                hash: self.hash,
                transaction: Some(transaction),
                error: None,
            },
            (_, Some(error)) => Self {
                hash: self.hash,
                transaction: None,
                error: Some(error),
            },
            (None, None) => Self::failed(ErrorInfo::new(
                ErrorKind::ProofError,
                "worker returned neither a transaction nor an error",
            )),
        }
    }
}

/// A serialized transaction that carries a wallet signature.
///
/// Only obtainable through [`SignedSerializedTransaction::from_unsigned`], so
/// an errored or empty artifact can never be signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSignedTransaction")]
pub struct SignedSerializedTransaction {
    hash: Option<Hex>,
    transaction: Value,
    signer: String,
}

#[derive(Deserialize)]
struct RawSignedTransaction {
    #[serde(default)]
    hash: Option<Hex>,
    transaction: Value,
    signer: String,
}

impl TryFrom<RawSignedTransaction> for SignedSerializedTransaction {
    type Error = String;

    fn try_from(raw: RawSignedTransaction) -> std::result::Result<Self, Self::Error> {
        if raw.transaction.is_null() {
            return Err("signed transaction has no body".into());
        }
        if raw.signer.trim().is_empty() {
            return Err("signed transaction has no signer".into());
        }
        Ok(Self {
            hash: raw.hash,
            transaction: raw.transaction,
            signer: raw.signer,
        })
    }
}

impl SignedSerializedTransaction {
    pub fn from_unsigned(
        unsigned: &SerializedTransaction,
        signed_transaction: Value,
        signer: &str,
    ) -> std::result::Result<Self, ErrorInfo> {
        if let Some(ref err) = unsigned.error {
            return Err(ErrorInfo::new(
                ErrorKind::SignerMismatch,
                format!("refusing to sign an errored transaction: {}", err),
            ));
        }
        if unsigned.transaction.is_none() {
            return Err(ErrorInfo::new(
                ErrorKind::SignerMismatch,
                "serialized transaction has no body to sign",
            ));
        }
        if signer.trim().is_empty() {
            return Err(ErrorInfo::new(ErrorKind::SignerMismatch, "signer address is empty"));
        }
        if signed_transaction.is_null() {
            return Err(ErrorInfo::new(
                ErrorKind::Internal,
                "wallet returned an empty signed transaction",
            ));
        }
        Ok(Self {
            hash: unsigned.hash.clone(),
            transaction: signed_transaction,
            signer: signer.to_string(),
        })
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    pub fn transaction(&self) -> &Value {
        &self.transaction
    }

    pub fn signer(&self) -> &str {
        &self.signer
    }
}

/// Terminal value of send, proveAndSend and the inclusion watcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    pub hash: Option<Hex>,
    pub data: Option<Value>,
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_payer: Option<String>,
}

impl TransactionResult {
    pub fn submitted(hash: impl Into<Hex>, data: Option<Value>) -> Self {
        Self {
            hash: Some(hash.into()),
            data,
            error: None,
            fee_payer: None,
        }
    }

    pub fn failed(error: ErrorInfo) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn with_fee_payer(mut self, payer: impl Into<String>) -> Self {
        self.fee_payer = Some(payer.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.hash.is_some()
    }
}

/// Result of a generic job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub data: Option<Value>,
    pub error: Option<ErrorInfo>,
}

impl JobResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: ErrorInfo) -> Self {
        Self {
            data: None,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Remote job status. Transitions are driven by the worker pool only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

/// Client-visible view of a remote job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub job_name: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Operations accepted by the worker RPC surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Prove,
    Send,
    ProveAndSend,
    RunJob,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Prove => "prove",
            Operation::Send => "send",
            Operation::ProveAndSend => "proveAndSend",
            Operation::RunJob => "runJob",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger-side status of a submitted transaction hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LedgerStatus {
    Pending,
    Included { block: String },
    Rejected { reason: String },
}

/// Parse a hex string to a byte array.
pub fn hex_to_bytes(hex_str: &str) -> std::result::Result<Vec<u8>, CloudError> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_str).map_err(|e| CloudError::Crypto(format!("invalid hex string: {}", e)))
}

/// Convert bytes to a 0x-prefixed hex string.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
