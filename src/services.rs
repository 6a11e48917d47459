//! Dependency container (§1.1 Design Notes): owns every trait object the
//! controller needs and is constructed exactly once in `main.rs`, never
//! behind a process-wide singleton or `static`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::credentials::aws::{AssumeRoleCache, AwsCredentials, AwsStsClient, ClusterDescription};
use crate::lifecycle::{LockRegistry, NullQuotaBroker, QuotaBroker};
use crate::objectstore::{InMemoryObjectStore, ObjectStore};
use crate::secrets::{InMemorySecretStore, SecretStore};

/// Stand-in for a real AWS STS/EKS client. No crate in this lineage's
/// dependency pack carries an AWS SDK, so the production backend for
/// this trait is left to be supplied by the deployment environment;
/// this implementation only services tenants that never reach an
/// `AssumeRole` or EKS `DescribeCluster` call.
pub struct UnavailableStsClient;

#[async_trait]
impl AwsStsClient for UnavailableStsClient {
    async fn assume_role(&self, role_arn: &str, _session_name: &str) -> anyhow::Result<AwsCredentials> {
        anyhow::bail!("no AWS STS backend configured; cannot assume role {role_arn}")
    }

    async fn describe_cluster(&self, platform_id: &str) -> anyhow::Result<ClusterDescription> {
        anyhow::bail!("no AWS STS backend configured; cannot describe EKS cluster {platform_id}")
    }
}

pub struct Services {
    pub object_store: Box<dyn ObjectStore>,
    pub secret_store: Box<dyn SecretStore>,
    pub quota_broker: Box<dyn QuotaBroker>,
    pub sts_client: Box<dyn AwsStsClient>,
    pub assume_role_cache: Arc<AssumeRoleCache>,
    pub locks: Arc<LockRegistry>,
}

impl Services {
    /// The reference wiring used by this binary: in-memory object and
    /// secret stores, an always-authorize quota broker, and an STS
    /// client that only fails when actually called. A deployment with a
    /// real object store / secrets manager / license service swaps these
    /// trait objects for its own implementations without touching the
    /// controller.
    pub fn bootstrap() -> Self {
        Self {
            object_store: Box::new(InMemoryObjectStore::default()),
            secret_store: Box::new(InMemorySecretStore::default()),
            quota_broker: Box::new(NullQuotaBroker),
            sts_client: Box::new(UnavailableStsClient),
            assume_role_cache: AssumeRoleCache::new(),
            locks: LockRegistry::new(),
        }
    }
}
