//! Credentials Resolver (§4.5): produce a job's credentials-environment
//! bundle from the first source that succeeds in a fixed chain.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use kube::config::Kubeconfig;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{Cloud, Platform, PlatformType, Tenant};
use crate::error::CredentialsError;
use crate::secrets::SecretStore;

use super::aws::{AssumeRoleCache, AwsStsClient, assume_role_cached};
use super::azure::materialize_azure_env;
use super::gcp::materialize_gcp_env;
use super::kubernetes::{build_eks_kubeconfig, merge_kubeconfig};

/// Tracks every temp path materialized during resolution so it can be
/// removed on both the success and failure finalize path (§4.5.2). The
/// controller holds this for the job's duration and drops it in the
/// same step that releases the tenant lock.
#[derive(Default)]
pub struct MaterializedCredentials {
    paths: Vec<PathBuf>,
}

impl MaterializedCredentials {
    pub fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }
}

impl Drop for MaterializedCredentials {
    fn drop(&mut self) {
        for path in &self.paths {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove materialized credentials file");
                }
            }
        }
    }
}

/// Opaque, provider-specific payload resolved by a chain step, before
/// materialization into an env var bundle.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialsPayload {
    Aws {
        access_key_id: String,
        secret_access_key: String,
        session_token: Option<String>,
        region: Option<String>,
    },
    Azure {
        client_id: String,
        client_secret: Option<String>,
        certificate_pem: Option<String>,
        tenant_id: String,
    },
    Gcp {
        service_account_json: String,
    },
    KubernetesBearerToken {
        token: String,
    },
}

/// The tenant-linked parent record (`CUSTODIAN_ACCESS`, §4.5 step 2):
/// resolves to a role ARN for AWS, or a direct service-principal/account
/// payload for the other clouds.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ParentLink {
    AwsRoleArn {
        role_arn: String,
    },
    AzureServicePrincipal {
        client_id: String,
        client_secret: Option<String>,
        certificate_pem: Option<String>,
        tenant_id: String,
    },
    GcpServiceAccount {
        service_account_json: String,
    },
}

pub struct CredentialsResolver<'a> {
    secrets: &'a dyn SecretStore,
    sts: &'a dyn AwsStsClient,
    assume_role_cache: &'a AssumeRoleCache,
    allow_management_creds: bool,
}

impl<'a> CredentialsResolver<'a> {
    pub fn new(
        secrets: &'a dyn SecretStore,
        sts: &'a dyn AwsStsClient,
        assume_role_cache: &'a AssumeRoleCache,
        allow_management_creds: bool,
    ) -> Self {
        Self {
            secrets,
            sts,
            assume_role_cache,
            allow_management_creds,
        }
    }

    /// §4.5's fixed chain, stopping at the first source that produces a
    /// result. `ambient_principal_id` is the host's own identity
    /// (instance-profile account id / subscription id), if available.
    #[instrument(skip_all, fields(tenant = %tenant.name, cloud = %tenant.cloud))]
    pub async fn resolve(
        &self,
        job_id: Uuid,
        tenant: &Tenant,
        platform: Option<&Platform>,
        ambient_principal_id: Option<&str>,
    ) -> Result<(HashMap<String, String>, MaterializedCredentials), CredentialsError> {
        let mut guard = MaterializedCredentials::default();

        // Step 1: job-scoped ephemeral, single-use.
        let job_key = format!("jobs/{job_id}/credentials");
        if let Some(raw) = self.secrets.take(&job_key).await.map_err(|_| CredentialsError::NoCredentials)? {
            if let Ok(payload) = serde_json::from_str::<CredentialsPayload>(&raw) {
                info!("resolved credentials from job-scoped ephemeral store");
                let env = self.materialize(tenant, platform, payload, &mut guard).await?;
                return Ok((env, guard));
            }
        }

        // Step 2: tenant-linked parent, AssumeRole-cached for AWS.
        let link_key = format!("tenants/{}/custodian_access", tenant.name);
        if let Some(raw) = self.secrets.get(&link_key).await.map_err(|_| CredentialsError::NoCredentials)? {
            if let Ok(link) = serde_json::from_str::<ParentLink>(&raw) {
                info!("resolved credentials from tenant-linked parent");
                let payload = self.resolve_parent_link(tenant.name.as_str(), link).await?;
                let env = self.materialize(tenant, platform, payload, &mut guard).await?;
                return Ok((env, guard));
            }
        }

        // Step 3: management credentials, only behind the feature flag.
        if self.allow_management_creds {
            let mgmt_key = format!("management/{}", tenant.cloud);
            if let Some(raw) = self.secrets.get(&mgmt_key).await.map_err(|_| CredentialsError::NoCredentials)? {
                if let Ok(payload) = serde_json::from_str::<CredentialsPayload>(&raw) {
                    info!("resolved credentials from management credentials (ALLOW_MANAGEMENT_CREDS)");
                    let env = self.materialize(tenant, platform, payload, &mut guard).await?;
                    return Ok((env, guard));
                }
            }
        }

        // Step 4: ambient, only if the host's own principal matches the tenant.
        if ambient_principal_id.is_some_and(|id| id == tenant.project_id) {
            info!("using ambient host credentials");
            return Ok((HashMap::new(), guard));
        }

        Err(CredentialsError::NoCredentials)
    }

    async fn resolve_parent_link(&self, tenant_name: &str, link: ParentLink) -> Result<CredentialsPayload, CredentialsError> {
        match link {
            ParentLink::AwsRoleArn { role_arn } => {
                let creds = assume_role_cached(self.sts, self.assume_role_cache, tenant_name, &role_arn).await?;
                Ok(CredentialsPayload::Aws {
                    access_key_id: creds.access_key_id,
                    secret_access_key: creds.secret_access_key,
                    session_token: Some(creds.session_token),
                    region: None,
                })
            }
            ParentLink::AzureServicePrincipal {
                client_id,
                client_secret,
                certificate_pem,
                tenant_id,
            } => Ok(CredentialsPayload::Azure {
                client_id,
                client_secret,
                certificate_pem,
                tenant_id,
            }),
            ParentLink::GcpServiceAccount { service_account_json } => {
                Ok(CredentialsPayload::Gcp { service_account_json })
            }
        }
    }

    async fn materialize(
        &self,
        tenant: &Tenant,
        platform: Option<&Platform>,
        payload: CredentialsPayload,
        guard: &mut MaterializedCredentials,
    ) -> Result<HashMap<String, String>, CredentialsError> {
        match (tenant.cloud, payload) {
            (Cloud::Aws, CredentialsPayload::Aws { access_key_id, secret_access_key, session_token, region }) => {
                Ok(super::aws::materialize_aws_env(
                    &access_key_id,
                    &secret_access_key,
                    session_token.as_deref(),
                    region.as_deref(),
                ))
            }
            (Cloud::Azure, CredentialsPayload::Azure { client_id, client_secret, certificate_pem, tenant_id }) => {
                materialize_azure_env(&client_id, client_secret.as_deref(), certificate_pem.as_deref(), &tenant_id, guard)
            }
            (Cloud::Google, CredentialsPayload::Gcp { service_account_json }) => {
                materialize_gcp_env(&service_account_json, guard)
            }
            (Cloud::Kubernetes, CredentialsPayload::KubernetesBearerToken { token }) => {
                self.materialize_kubernetes(platform, &token, guard).await
            }
            _ => Err(CredentialsError::NoCredentials),
        }
    }

    /// Kubernetes has no uniform payload shape: a staged bearer token is
    /// merged into a staged kubeconfig when one exists; otherwise, for an
    /// EKS platform, the parent tenant's AWS credentials are resolved and
    /// used to mint a synthetic kubeconfig (§4.5, §4.5.1).
    async fn materialize_kubernetes(
        &self,
        platform: Option<&Platform>,
        token: &str,
        guard: &mut MaterializedCredentials,
    ) -> Result<HashMap<String, String>, CredentialsError> {
        let platform = platform.ok_or_else(|| CredentialsError::DescribeClusterFailed {
            platform_id: "unknown".into(),
            message: "Kubernetes credentials resolved with no platform context".into(),
        })?;

        let staged_kubeconfig_key = format!("platforms/{}/kubeconfig", platform.id);
        if let Some(raw) = self
            .secrets
            .get(&staged_kubeconfig_key)
            .await
            .map_err(|_| CredentialsError::NoCredentials)?
        {
            let existing: Kubeconfig = serde_yaml::from_str(&raw).map_err(|e| CredentialsError::DescribeClusterFailed {
                platform_id: platform.id.clone(),
                message: e.to_string(),
            })?;
            return merge_kubeconfig(platform, &existing, token, guard);
        }

        if platform.platform_type != PlatformType::Eks {
            return Err(CredentialsError::DescribeClusterFailed {
                platform_id: platform.id.clone(),
                message: "no staged kubeconfig and platform is not EKS; cannot synthesize one".into(),
            });
        }

        let link_key = format!("tenants/{}/custodian_access", platform.parent_tenant);
        let raw = self
            .secrets
            .get(&link_key)
            .await
            .map_err(|_| CredentialsError::NoCredentials)?
            .ok_or(CredentialsError::NoCredentials)?;
        let ParentLink::AwsRoleArn { role_arn } = serde_json::from_str::<ParentLink>(&raw).map_err(|_| CredentialsError::NoCredentials)?
        else {
            return Err(CredentialsError::NoCredentials);
        };

        let creds = assume_role_cached(self.sts, self.assume_role_cache, &platform.parent_tenant, &role_arn).await?;
        let cluster = self
            .sts
            .describe_cluster(&platform.id)
            .await
            .map_err(|e| CredentialsError::DescribeClusterFailed {
                platform_id: platform.id.clone(),
                message: e.to_string(),
            })?;

        build_eks_kubeconfig(platform, &cluster, &creds, &platform.region, Utc::now(), guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::InMemorySecretStore;
    use async_trait::async_trait;

    struct StubSts;
    #[async_trait]
    impl AwsStsClient for StubSts {
        async fn assume_role(&self, _role_arn: &str, _session_name: &str) -> anyhow::Result<super::super::aws::AwsCredentials> {
            Ok(super::super::aws::AwsCredentials {
                access_key_id: "AKIA".into(),
                secret_access_key: "secret".into(),
                session_token: "token".into(),
                expiration: Utc::now() + chrono::Duration::hours(1),
            })
        }
        async fn describe_cluster(&self, _platform_id: &str) -> anyhow::Result<super::super::aws::ClusterDescription> {
            Ok(super::super::aws::ClusterDescription {
                endpoint: "https://cluster.eks.amazonaws.com".into(),
                certificate_authority_data: "cA==".into(),
            })
        }
    }

    fn aws_tenant() -> Tenant {
        Tenant::new("acme-aws", Cloud::Aws, "111122223333")
    }

    #[tokio::test]
    async fn job_scoped_ephemeral_wins_and_is_consumed_once() {
        let secrets = InMemorySecretStore::default();
        secrets
            .put(
                "jobs/11111111-1111-1111-1111-111111111111/credentials",
                r#"{"kind":"aws","access_key_id":"AKIDX","secret_access_key":"s3cr3t","session_token":null,"region":null}"#,
            )
            .await
            .unwrap();
        let cache = AssumeRoleCache::new();
        let resolver = CredentialsResolver::new(&secrets, &StubSts, &cache, false);

        let job_id = Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap();
        let (env, _guard) = resolver.resolve(job_id, &aws_tenant(), None, None).await.unwrap();
        assert_eq!(env.get("AWS_ACCESS_KEY_ID").map(String::as_str), Some("AKIDX"));

        // the ephemeral entry is read-then-delete, so resolving the same
        // job again with no other source configured falls through to NO_CREDENTIALS
        let second = resolver.resolve(job_id, &aws_tenant(), None, None).await;
        assert!(matches!(second.unwrap_err(), CredentialsError::NoCredentials));
    }

    #[tokio::test]
    async fn tenant_linked_role_arn_is_assumed() {
        let secrets = InMemorySecretStore::default();
        secrets
            .put("tenants/acme-aws/custodian_access", r#"{"kind":"aws_role_arn","role_arn":"arn:aws:iam::111122223333:role/scan"}"#)
            .await
            .unwrap();
        let cache = AssumeRoleCache::new();
        let resolver = CredentialsResolver::new(&secrets, &StubSts, &cache, false);

        let (env, _guard) = resolver.resolve(Uuid::new_v4(), &aws_tenant(), None, None).await.unwrap();
        assert_eq!(env.get("AWS_ACCESS_KEY_ID").map(String::as_str), Some("AKIA"));
        assert_eq!(env.get("AWS_SESSION_TOKEN").map(String::as_str), Some("token"));
    }

    #[tokio::test]
    async fn management_creds_are_ignored_unless_flag_is_set() {
        let secrets = InMemorySecretStore::default();
        secrets
            .put("management/AWS", r#"{"kind":"aws","access_key_id":"MGMT","secret_access_key":"s","session_token":null,"region":null}"#)
            .await
            .unwrap();
        let cache = AssumeRoleCache::new();

        let resolver = CredentialsResolver::new(&secrets, &StubSts, &cache, false);
        let err = resolver.resolve(Uuid::new_v4(), &aws_tenant(), None, None).await.unwrap_err();
        assert!(matches!(err, CredentialsError::NoCredentials));

        let resolver_allowed = CredentialsResolver::new(&secrets, &StubSts, &cache, true);
        let (env, _guard) = resolver_allowed.resolve(Uuid::new_v4(), &aws_tenant(), None, None).await.unwrap();
        assert_eq!(env.get("AWS_ACCESS_KEY_ID").map(String::as_str), Some("MGMT"));
    }

    #[tokio::test]
    async fn ambient_is_used_only_when_principal_matches_tenant() {
        let secrets = InMemorySecretStore::default();
        let cache = AssumeRoleCache::new();
        let resolver = CredentialsResolver::new(&secrets, &StubSts, &cache, false);

        let mismatched = resolver.resolve(Uuid::new_v4(), &aws_tenant(), None, Some("999999999999")).await;
        assert!(matches!(mismatched.unwrap_err(), CredentialsError::NoCredentials));

        let (env, _guard) = resolver
            .resolve(Uuid::new_v4(), &aws_tenant(), None, Some("111122223333"))
            .await
            .unwrap();
        assert!(env.is_empty());
    }

    #[tokio::test]
    async fn no_source_produces_a_result_is_no_credentials() {
        let secrets = InMemorySecretStore::default();
        let cache = AssumeRoleCache::new();
        let resolver = CredentialsResolver::new(&secrets, &StubSts, &cache, false);
        let err = resolver.resolve(Uuid::new_v4(), &aws_tenant(), None, None).await.unwrap_err();
        assert!(matches!(err, CredentialsError::NoCredentials));
    }
}
