//! Synthetic and merged kubeconfig materialization (§4.5, §4.5.1).
//!
//! Grounded on `multi_cluster.rs`'s `kube::config::Kubeconfig::read()` —
//! the same types used there to *read* a kubeconfig are used here in
//! reverse, to *write* one.

use std::collections::HashMap;
use std::path::PathBuf;

use kube::config::{AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext};

use crate::domain::Platform;
use crate::error::CredentialsError;

use super::aws::{AwsCredentials, ClusterDescription, mint_eks_bearer_token};
use super::resolver::MaterializedCredentials;

fn materialize_path(platform_id: &str) -> PathBuf {
    std::env::temp_dir().join(format!("kubeconfig-{platform_id}-{}.yaml", uuid::Uuid::new_v4()))
}

/// Builds a synthetic kubeconfig for an EKS platform that has none: one
/// cluster/context/user, the user carrying the minted bearer token
/// directly rather than an `exec` plugin invocation.
pub fn build_eks_kubeconfig(
    platform: &Platform,
    cluster: &ClusterDescription,
    creds: &AwsCredentials,
    region: &str,
    now: chrono::DateTime<chrono::Utc>,
    guard: &mut MaterializedCredentials,
) -> Result<HashMap<String, String>, CredentialsError> {
    let token = mint_eks_bearer_token(creds, region, &platform.name, now);

    let cluster_name = platform.name.clone();
    let context_name = format!("{cluster_name}-context");
    let user_name = format!("{cluster_name}-user");

    let kubeconfig = Kubeconfig {
        clusters: vec![NamedCluster {
            name: cluster_name.clone(),
            cluster: Some(Cluster {
                server: Some(cluster.endpoint.clone()),
                certificate_authority_data: Some(cluster.certificate_authority_data.clone()),
                ..Default::default()
            }),
        }],
        contexts: vec![NamedContext {
            name: context_name.clone(),
            context: Some(Context {
                cluster: cluster_name,
                user: user_name.clone(),
                ..Default::default()
            }),
        }],
        current_context: Some(context_name),
        auth_infos: vec![NamedAuthInfo {
            name: user_name,
            auth_info: Some(AuthInfo {
                token: Some(token.into()),
                ..Default::default()
            }),
        }],
        ..Default::default()
    };

    write_kubeconfig(&platform.id, &kubeconfig, guard)
}

/// Merges a staged bearer token into a staged kubeconfig: a new
/// `user`/`context` is added referencing the kubeconfig's existing
/// cluster, and that context is made current.
pub fn merge_kubeconfig(
    platform: &Platform,
    existing: &Kubeconfig,
    token: &str,
    guard: &mut MaterializedCredentials,
) -> Result<HashMap<String, String>, CredentialsError> {
    let Some(cluster_name) = existing.clusters.first().map(|c| c.name.clone()) else {
        return Err(CredentialsError::DescribeClusterFailed {
            platform_id: platform.id.clone(),
            message: "staged kubeconfig has no clusters to attach a token to".into(),
        });
    };

    let user_name = format!("{}-token-user", platform.name);
    let context_name = format!("{}-token-context", platform.name);

    let mut merged = existing.clone();
    merged.auth_infos.push(NamedAuthInfo {
        name: user_name.clone(),
        auth_info: Some(AuthInfo {
            token: Some(token.to_string().into()),
            ..Default::default()
        }),
    });
    merged.contexts.push(NamedContext {
        name: context_name.clone(),
        context: Some(Context {
            cluster: cluster_name,
            user: user_name,
            ..Default::default()
        }),
    });
    merged.current_context = Some(context_name);

    write_kubeconfig(&platform.id, &merged, guard)
}

fn write_kubeconfig(
    platform_id: &str,
    kubeconfig: &Kubeconfig,
    guard: &mut MaterializedCredentials,
) -> Result<HashMap<String, String>, CredentialsError> {
    let path = materialize_path(platform_id);
    let yaml = serde_yaml::to_string(kubeconfig).map_err(|e| CredentialsError::DescribeClusterFailed {
        platform_id: platform_id.to_string(),
        message: e.to_string(),
    })?;
    std::fs::write(&path, yaml).map_err(CredentialsError::MaterializationFailed)?;
    guard.track(path.clone());

    let mut env = HashMap::new();
    env.insert("KUBECONFIG".to_string(), path.to_string_lossy().into_owned());
    Ok(env)
}
