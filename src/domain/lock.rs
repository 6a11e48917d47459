use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// At most one active Lock per tenant name at any moment (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    pub tenant_name: String,
    pub job_id: Uuid,
    pub regions: HashSet<String>,
}

impl Lock {
    pub fn new(tenant_name: impl Into<String>, job_id: Uuid, regions: HashSet<String>) -> Self {
        Self {
            tenant_name: tenant_name.into(),
            job_id,
            regions,
        }
    }
}
