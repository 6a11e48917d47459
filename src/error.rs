//! Error hierarchy (§7.1). One `thiserror` enum per subsystem, composed
//! into `CoreError` at the controller boundary; `main.rs` maps `CoreError`
//! to the process exit codes of §6.

use thiserror::Error;

use crate::domain::ErrorType;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("no loadable policies")]
    EmptyPlan,
    #[error("failed to fetch ruleset content at {key}: {source}")]
    FetchFailed {
        key: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("policy {name} failed to parse: {message}")]
    ParseFailed { name: String, message: String },
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("worker process for region {region} exited with status {status}")]
    WorkerStartFailed { region: String, status: i32 },
    #[error("worker process for region {region} produced no output before exit")]
    WorkerProtocolViolation { region: String },
    #[error("failed to spawn worker for region {region}: {source}")]
    SpawnFailed {
        region: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ShardStoreError {
    #[error("partial write: only shard indexes {written_indexes:?} landed before failure")]
    PartialWrite { written_indexes: Vec<u32> },
    #[error("object store error on key {key}: {source}")]
    ObjectStore {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("tenant {tenant} is already locked by job {existing_job_id}")]
    LockHeld {
        tenant: String,
        existing_job_id: String,
    },
    #[error("license quota broker denied job: {reason}")]
    QuotaDenied { reason: String },
    #[error("job deadline exceeded before any region completed")]
    TimeoutBeforeProgress,
}

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("no credentials source produced a result (NO_CREDENTIALS)")]
    NoCredentials,
    #[error("AssumeRole failed: {0}")]
    AssumeRoleFailed(String),
    #[error("failed to materialize credentials file: {0}")]
    MaterializationFailed(#[source] std::io::Error),
    #[error("EKS DescribeCluster failed for platform {platform_id}: {message}")]
    DescribeClusterFailed { platform_id: String, message: String },
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    ShardStore(#[from] ShardStoreError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// §6 exit codes: 0 is reserved for a clean SUCCEEDED job and is
    /// never produced here.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::Lifecycle(LifecycleError::QuotaDenied { .. }) => 2,
            _ => 1,
        }
    }
}

/// Maps a worker-reported error string/code to the five-way taxonomy.
/// Each `CloudRunner` owns a provider-specific variant of this mapping;
/// this is the fallback used for unrecognized codes.
pub fn classify_unknown(_message: &str) -> ErrorType {
    ErrorType::Internal
}
