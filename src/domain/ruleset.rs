use serde::{Deserialize, Serialize};

use super::tenant::Cloud;

/// A published, versioned bundle of policies (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ruleset {
    pub name: String,
    pub version: Option<String>,
    /// Licensed rulesets require a non-empty license key (§3 invariant).
    pub license_key: Option<String>,
    pub cloud: Cloud,
    pub rule_ids: Vec<String>,
    /// Object-store key the policy content lives at (§4.1.1).
    pub content_ref: String,
}

/// A named declarative check targeting one resource type in one cloud.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub resource_type: String,
    /// Opaque filter DSL blob; the core never interprets it.
    #[serde(default)]
    pub filter: serde_json::Value,
    /// Explicit classification hint from the ruleset author, if any.
    #[serde(default)]
    pub is_global: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ruleset_requires_explicit_license_key_field() {
        let rs = Ruleset {
            name: "cis-aws".into(),
            version: Some("1.2.0".into()),
            license_key: None,
            cloud: Cloud::Aws,
            rule_ids: vec!["r1".into()],
            content_ref: "rulesets/cis-aws/1.2.0.json".into(),
        };
        assert!(rs.license_key.is_none());
    }

    #[test]
    fn policy_deserializes_without_optional_fields() {
        let p: Policy = serde_json::from_str(r#"{"name":"p1","resource_type":"aws.ec2"}"#).unwrap();
        assert_eq!(p.name, "p1");
        assert_eq!(p.is_global, None);
    }
}
