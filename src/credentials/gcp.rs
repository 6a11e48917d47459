//! GCP credential materialization (§4.5): service-account JSON written
//! to a temp file, pointed at by `GOOGLE_APPLICATION_CREDENTIALS`.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::CredentialsError;

use super::resolver::MaterializedCredentials;

fn materialize_path() -> PathBuf {
    std::env::temp_dir().join(format!("gcp-sa-{}.json", uuid::Uuid::new_v4()))
}

pub fn materialize_gcp_env(
    service_account_json: &str,
    guard: &mut MaterializedCredentials,
) -> Result<HashMap<String, String>, CredentialsError> {
    let path = materialize_path();
    std::fs::write(&path, service_account_json).map_err(CredentialsError::MaterializationFailed)?;
    guard.track(path.clone());

    let mut env = HashMap::new();
    env.insert("GOOGLE_APPLICATION_CREDENTIALS".to_string(), path.to_string_lossy().into_owned());
    Ok(env)
}
