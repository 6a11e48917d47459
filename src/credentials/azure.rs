//! Azure credential materialization (§4.5): client id/secret/tenant id as
//! env vars, or a temp PEM path for certificate-based credentials.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::CredentialsError;

use super::resolver::MaterializedCredentials;

fn materialize_pem_path() -> PathBuf {
    std::env::temp_dir().join(format!("azure-cert-{}.pem", uuid::Uuid::new_v4()))
}

pub fn materialize_azure_env(
    client_id: &str,
    client_secret: Option<&str>,
    certificate_pem: Option<&str>,
    tenant_id: &str,
    guard: &mut MaterializedCredentials,
) -> Result<HashMap<String, String>, CredentialsError> {
    let mut env = HashMap::new();
    env.insert("AZURE_CLIENT_ID".to_string(), client_id.to_string());
    env.insert("AZURE_TENANT_ID".to_string(), tenant_id.to_string());

    if let Some(pem) = certificate_pem {
        let path = materialize_pem_path();
        std::fs::write(&path, pem).map_err(CredentialsError::MaterializationFailed)?;
        guard.track(path.clone());
        env.insert("AZURE_CLIENT_CERTIFICATE_PATH".to_string(), path.to_string_lossy().into_owned());
    } else if let Some(secret) = client_secret {
        env.insert("AZURE_CLIENT_SECRET".to_string(), secret.to_string());
    } else {
        return Err(CredentialsError::NoCredentials);
    }

    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_path_is_written_and_cleaned_up_on_drop() {
        let mut guard = MaterializedCredentials::default();
        let env = materialize_azure_env("client-1", None, Some("-----BEGIN CERTIFICATE-----"), "tenant-1", &mut guard).unwrap();
        let path = env.get("AZURE_CLIENT_CERTIFICATE_PATH").unwrap().clone();
        assert!(std::path::Path::new(&path).exists());
        assert!(!env.contains_key("AZURE_CLIENT_SECRET"));

        drop(guard);
        assert!(!std::path::Path::new(&path).exists());
    }

    #[test]
    fn client_secret_path_sets_no_file() {
        let mut guard = MaterializedCredentials::default();
        let env = materialize_azure_env("client-1", Some("shh"), None, "tenant-1", &mut guard).unwrap();
        assert_eq!(env.get("AZURE_CLIENT_SECRET").map(String::as_str), Some("shh"));
        assert!(!env.contains_key("AZURE_CLIENT_CERTIFICATE_PATH"));
    }

    #[test]
    fn neither_secret_nor_certificate_is_no_credentials() {
        let mut guard = MaterializedCredentials::default();
        let err = materialize_azure_env("client-1", None, None, "tenant-1", &mut guard).unwrap_err();
        assert!(matches!(err, CredentialsError::NoCredentials));
    }
}
