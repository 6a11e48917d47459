//! Self-healing routines run during finalization step 3 (§4.4): AWS-S3
//! re-regionalization and Azure pseudo-region resolution.

use std::collections::BTreeMap;

use crate::domain::{AZURE_PSEUDO_REGION, GLOBAL, ShardOutcome, ShardPart, ShardsCollection};

const S3_RESOURCE_TYPES: &[&str] = &["s3", "aws.s3"];

fn resource_region(resource: &serde_json::Value, default_region: &str) -> String {
    resource
        .get("Location")
        .and_then(|l| l.get("LocationConstraint"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(default_region)
        .to_string()
}

/// AWS-S3 re-regionalization (§4.3): parts for an s3-typed policy at
/// `GLOBAL` are re-emitted per-region by reading each resource's real
/// bucket region, and the global part is dropped.
///
/// Gated by `Config::s3_self_heal_enabled` (§4.3.2) at the call site —
/// this function itself is unconditional so it stays simple to test.
pub fn s3_self_heal(collection: &mut ShardsCollection, default_region: &str) {
    let s3_policies: Vec<String> = collection
        .meta()
        .iter()
        .filter(|(_, meta)| S3_RESOURCE_TYPES.contains(&meta.resource_type.as_str()))
        .map(|(name, _)| name.clone())
        .collect();

    for policy in s3_policies {
        let key = crate::domain::ShardKey::global(&policy);
        let Some(part) = collection.get(&key).cloned() else { continue };
        let ShardOutcome::Resources(resources) = part.outcome else { continue };
        if resources.is_empty() {
            continue;
        }

        collection.drop_part(&key);

        let mut by_region: BTreeMap<String, Vec<serde_json::Value>> = BTreeMap::new();
        for resource in resources {
            let region = resource_region(&resource, default_region);
            by_region.entry(region).or_default().push(resource);
        }

        for (region, resources) in by_region {
            collection.put_part(ShardPart::resources(policy.clone(), region, resources));
        }
    }
}

/// Azure pseudo-region resolution (§4.3): the scanner emits all Azure
/// findings under `AzureCloud`; this regroups each policy's resources by
/// their own `location` field (absent → `GLOBAL`) before the result is
/// merged into the shards (which would otherwise drop `AzureCloud`
/// entries outright via `ShardsCollection::update`'s carve-out).
pub fn azure_resolve(collection: &ShardsCollection) -> ShardsCollection {
    let mut resolved = ShardsCollection::new();
    resolved.update_meta_from(collection);

    for part in collection.iter() {
        if part.key.location != AZURE_PSEUDO_REGION {
            resolved.put_part(part.clone());
            continue;
        }

        let resources = match &part.outcome {
            ShardOutcome::Resources(resources) => resources,
            ShardOutcome::Error { error_type, message } => {
                // No per-resource location to regroup by; an error outcome
                // has no resources, so it collapses to GLOBAL.
                resolved.put_part(ShardPart::error(part.key.policy.clone(), GLOBAL, *error_type, message));
                continue;
            }
        };

        let mut by_region: BTreeMap<String, Vec<serde_json::Value>> = BTreeMap::new();
        for resource in resources {
            let region = resource
                .get("location")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .unwrap_or(GLOBAL)
                .to_string();
            by_region.entry(region).or_default().push(resource.clone());
        }
        for (region, resources) in by_region {
            resolved.put_part(ShardPart::resources(part.key.policy.clone(), region, resources));
        }
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PolicyMeta, ShardKey};

    #[test]
    fn s3_self_heal_splits_global_part_by_bucket_region() {
        let mut collection = ShardsCollection::new();
        collection.set_meta(
            "R_s3",
            PolicyMeta {
                resource_type: "s3".into(),
                description: String::new(),
                is_global: true,
            },
        );
        collection.put_parts(vec![ShardPart::resources(
            "R_s3",
            GLOBAL,
            vec![
                serde_json::json!({"Location": {"LocationConstraint": "us-east-1"}}),
                serde_json::json!({"Location": {"LocationConstraint": "us-east-1"}}),
                serde_json::json!({"Location": {"LocationConstraint": "eu-west-1"}}),
            ],
        )]);

        s3_self_heal(&mut collection, "us-east-1");

        assert!(collection.get(&ShardKey::global("R_s3")).is_none());
        assert_eq!(collection.get(&ShardKey::new("R_s3", "us-east-1")).unwrap().resource_count(), 2);
        assert_eq!(collection.get(&ShardKey::new("R_s3", "eu-west-1")).unwrap().resource_count(), 1);
    }

    #[test]
    fn s3_self_heal_falls_back_to_default_region_when_constraint_absent() {
        let mut collection = ShardsCollection::new();
        collection.set_meta(
            "R_s3",
            PolicyMeta {
                resource_type: "aws.s3".into(),
                description: String::new(),
                is_global: true,
            },
        );
        collection.put_parts(vec![ShardPart::resources("R_s3", GLOBAL, vec![serde_json::json!({})])]);

        s3_self_heal(&mut collection, "us-east-1");

        assert_eq!(collection.get(&ShardKey::new("R_s3", "us-east-1")).unwrap().resource_count(), 1);
    }

    #[test]
    fn azure_resolve_regroups_by_resource_location_and_drops_pseudo_region() {
        let mut collection = ShardsCollection::new();
        collection.put_parts(vec![ShardPart::resources(
            "R1",
            AZURE_PSEUDO_REGION,
            vec![
                serde_json::json!({"location": "westeurope"}),
                serde_json::json!({"location": "northeurope"}),
                serde_json::json!({}),
            ],
        )]);

        let resolved = azure_resolve(&collection);

        assert!(resolved.get(&ShardKey::new("R1", AZURE_PSEUDO_REGION)).is_none());
        assert_eq!(resolved.get(&ShardKey::new("R1", "westeurope")).unwrap().resource_count(), 1);
        assert_eq!(resolved.get(&ShardKey::new("R1", "northeurope")).unwrap().resource_count(), 1);
        assert_eq!(resolved.get(&ShardKey::new("R1", GLOBAL)).unwrap().resource_count(), 1);
    }
}
