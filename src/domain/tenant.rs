use serde::{Deserialize, Serialize};

/// The four cloud types a tenant or platform may scan as.
///
/// Replaces the source's isinstance chains on cloud/resource objects
/// (§9 Design Notes) with a tagged union dispatched through `CloudRunner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Cloud {
    Aws,
    Azure,
    Google,
    Kubernetes,
}

impl Cloud {
    /// Non-AWS clouds ignore regions entirely; the plan collapses to `[GLOBAL]`.
    pub fn is_regional(self) -> bool {
        matches!(self, Cloud::Aws)
    }
}

impl std::fmt::Display for Cloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Cloud::Aws => "AWS",
            Cloud::Azure => "AZURE",
            Cloud::Google => "GOOGLE",
            Cloud::Kubernetes => "KUBERNETES",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlatformType {
    Eks,
    Aks,
    Gke,
    SelfManaged,
}

/// A Kubernetes scan target hosted inside a tenant. Always scans as
/// `Cloud::Kubernetes` regardless of the parent tenant's cloud.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub id: String,
    pub parent_tenant: String,
    pub platform_type: PlatformType,
    pub name: String,
    pub region: String,
    pub secret_ref: Option<String>,
}

/// Long-lived, immutable-per-scan tenant record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub name: String,
    pub cloud: Cloud,
    /// Opaque to the core: AWS account id, Azure subscription id, or GCP project id.
    pub project_id: String,
    pub activated: bool,
    pub regions: Vec<String>,
}

impl Tenant {
    pub fn new(name: impl Into<String>, cloud: Cloud, project_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cloud,
            project_id: project_id.into(),
            activated: true,
            regions: Vec::new(),
        }
    }
}
