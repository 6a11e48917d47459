//! AWS credential materialization: `AssumeRole` caching and the
//! `aws-iam-authenticator` SigV4 bearer token used to mint a synthetic
//! EKS kubeconfig (§4.5, §4.5.1).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::CredentialsError;

#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ClusterDescription {
    pub endpoint: String,
    pub certificate_authority_data: String,
}

/// Abstraction over the AWS STS/EKS API calls the resolver needs.
/// No example in the retrieved pack carries a full AWS SDK dependency,
/// so the surface used here is this narrow trait plus a hand-rolled
/// SigV4 presign (see `presign_get_caller_identity` below) — recorded in
/// DESIGN.md as a deliberate, narrowly-scoped addition.
#[async_trait]
pub trait AwsStsClient: Send + Sync {
    async fn assume_role(&self, role_arn: &str, session_name: &str) -> anyhow::Result<AwsCredentials>;
    async fn describe_cluster(&self, platform_id: &str) -> anyhow::Result<ClusterDescription>;
}

fn refresh_margin() -> Duration {
    Duration::minutes(15)
}

/// Per-tenant `AssumeRole` result cache, refreshed once the cached
/// credentials are within `refresh_margin` of expiry (§4.5 step 2).
#[derive(Default)]
pub struct AssumeRoleCache {
    entries: Mutex<HashMap<String, AwsCredentials>>,
}

impl AssumeRoleCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

pub async fn assume_role_cached(
    client: &dyn AwsStsClient,
    cache: &AssumeRoleCache,
    cache_key: &str,
    role_arn: &str,
) -> Result<AwsCredentials, CredentialsError> {
    {
        let entries = cache.entries.lock().await;
        if let Some(creds) = entries.get(cache_key) {
            if creds.expiration - Utc::now() > refresh_margin() {
                return Ok(creds.clone());
            }
        }
    }

    let session_name = format!("scan-{cache_key}");
    let fresh = client
        .assume_role(role_arn, &session_name)
        .await
        .map_err(|e| CredentialsError::AssumeRoleFailed(e.to_string()))?;
    cache.entries.lock().await.insert(cache_key.to_string(), fresh.clone());
    Ok(fresh)
}

pub fn materialize_aws_env(
    access_key_id: &str,
    secret_access_key: &str,
    session_token: Option<&str>,
    region: Option<&str>,
) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("AWS_ACCESS_KEY_ID".to_string(), access_key_id.to_string());
    env.insert("AWS_SECRET_ACCESS_KEY".to_string(), secret_access_key.to_string());
    if let Some(token) = session_token {
        env.insert("AWS_SESSION_TOKEN".to_string(), token.to_string());
    }
    if let Some(region) = region {
        env.insert("AWS_DEFAULT_REGION".to_string(), region.to_string());
    }
    env
}

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts a key of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Builds the `aws-iam-authenticator` bearer token: a SigV4 pre-signed
/// `GetCallerIdentity` URL carrying `x-k8s-aws-id`, base64url-encoded
/// with the `k8s-aws-v1.` prefix (§4.5.1). `now` is accepted as a
/// parameter so the signature is deterministic under test.
pub fn mint_eks_bearer_token(
    creds: &AwsCredentials,
    region: &str,
    cluster_name: &str,
    now: DateTime<Utc>,
) -> String {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let host = format!("sts.{region}.amazonaws.com");
    let credential_scope = format!("{date_stamp}/{region}/sts/aws4_request");
    let credential = format!("{}/{credential_scope}", creds.access_key_id);

    let mut query: BTreeMap<&str, String> = BTreeMap::new();
    query.insert("Action", "GetCallerIdentity".to_string());
    query.insert("Version", "2011-06-15".to_string());
    query.insert("X-Amz-Algorithm", "AWS4-HMAC-SHA256".to_string());
    query.insert("X-Amz-Credential", credential.clone());
    query.insert("X-Amz-Date", amz_date.clone());
    query.insert("X-Amz-Expires", "60".to_string());
    query.insert("X-Amz-SignedHeaders", "host;x-k8s-aws-id".to_string());
    query.insert("X-Amz-Security-Token", creds.session_token.clone());

    let canonical_query = query
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let canonical_headers = format!("host:{host}\nx-k8s-aws-id:{cluster_name}\n");
    let signed_headers = "host;x-k8s-aws-id";
    let hashed_payload = sha256_hex(b"");

    let canonical_request =
        format!("GET\n/\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{hashed_payload}");

    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let k_date = hmac_sha256(format!("AWS4{}", creds.secret_access_key).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"sts");
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

    let presigned_url = format!("https://{host}/?{canonical_query}&X-Amz-Signature={signature}");
    format!("k8s-aws-v1.{}", URL_SAFE_NO_PAD.encode(presigned_url))
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
