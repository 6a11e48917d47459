//! Fetch, filter, dedupe and classify policies for one job (§4.1).
//!
//! Grounded on the original `PoliciesLoader` (`executor/job.py`): the
//! shape of `prepare_policies`/`_load`/`load_from_policies` survives as
//! `PoliciesLoader::load`, generalized from a Python class pulling from a
//! process-wide S3 client singleton to one holding a borrowed
//! `dyn ObjectStore` (§9 Design Notes: no global singletons).

use std::collections::HashSet;

use tracing::warn;

use crate::domain::{Cloud, Policy, Ruleset};
use crate::error::PolicyError;
use crate::objectstore::ObjectStore;

use super::classify::is_global;

#[derive(Debug, Clone)]
pub struct LoadedPolicy {
    pub policy: Policy,
    pub is_global: bool,
}

#[derive(serde::Deserialize)]
struct RulesetContent {
    policies: Vec<Policy>,
}

pub struct PoliciesLoader<'a> {
    store: &'a dyn ObjectStore,
    cloud: Cloud,
}

impl<'a> PoliciesLoader<'a> {
    pub fn new(store: &'a dyn ObjectStore, cloud: Cloud) -> Self {
        Self { store, cloud }
    }

    /// Fetch every ruleset's content (licensed first, then standard),
    /// concatenate, filter by `exclude`/`keep`, dedupe by name (first
    /// occurrence wins, later ones recorded as warnings), and classify.
    ///
    /// Returns `(loaded policies, warnings)`. An empty result after
    /// filtering is *not* an error here — the caller (region planner /
    /// executor) surfaces `PolicyError::EmptyPlan` once it knows no
    /// policy survived for any location.
    pub async fn load(
        &self,
        rulesets: &[Ruleset],
        exclude: &HashSet<String>,
        keep: &HashSet<String>,
    ) -> Result<(Vec<LoadedPolicy>, Vec<String>), PolicyError> {
        let mut ordered = rulesets.to_vec();
        ordered.sort_by_key(|r| r.license_key.is_none());

        let mut seen = HashSet::new();
        let mut warnings = Vec::new();
        let mut loaded = Vec::new();

        for ruleset in &ordered {
            let raw = self
                .store
                .get(&ruleset.content_ref)
                .await
                .map_err(|source| PolicyError::FetchFailed {
                    key: ruleset.content_ref.clone(),
                    source,
                })?;
            let Some(bytes) = raw else {
                warn!(ruleset = %ruleset.name, key = %ruleset.content_ref, "ruleset content missing");
                continue;
            };

            let content: RulesetContent = match serde_json::from_slice(&bytes) {
                Ok(c) => c,
                Err(e) => {
                    return Err(PolicyError::ParseFailed {
                        name: ruleset.name.clone(),
                        message: e.to_string(),
                    });
                }
            };

            for policy in content.policies {
                if exclude.contains(&policy.name) {
                    continue;
                }
                if !keep.is_empty() && !keep.contains(&policy.name) {
                    continue;
                }
                if !seen.insert(policy.name.clone()) {
                    warnings.push(format!("duplicate policy name dropped: {}", policy.name));
                    continue;
                }
                let global = is_global(&policy, self.cloud);
                loaded.push(LoadedPolicy { policy, is_global: global });
            }
        }

        Ok((loaded, warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectstore::InMemoryObjectStore;

    fn ruleset(name: &str, content_ref: &str, licensed: bool) -> Ruleset {
        Ruleset {
            name: name.into(),
            version: Some("1".into()),
            license_key: licensed.then(|| "lk-1".into()),
            cloud: Cloud::Aws,
            rule_ids: vec![],
            content_ref: content_ref.into(),
        }
    }

    async fn store_with(content_ref: &str, policies_json: &str) -> InMemoryObjectStore {
        let store = InMemoryObjectStore::default();
        store
            .put(content_ref, format!(r#"{{"policies":{policies_json}}}"#).into_bytes())
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn dedupes_by_name_first_occurrence_wins() {
        let store = store_with(
            "rs/1.json",
            r#"[{"name":"p1","resource_type":"aws.ec2"},{"name":"p1","resource_type":"aws.rds"}]"#,
        )
        .await;
        let loader = PoliciesLoader::new(&store, Cloud::Aws);
        let (loaded, warnings) = loader
            .load(&[ruleset("rs1", "rs/1.json", false)], &HashSet::new(), &HashSet::new())
            .await
            .unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].policy.resource_type, "aws.ec2");
        assert_eq!(warnings.len(), 1);
    }

    #[tokio::test]
    async fn exclude_removes_by_name_and_keep_restricts() {
        let store = store_with(
            "rs/1.json",
            r#"[{"name":"p1","resource_type":"aws.ec2"},{"name":"p2","resource_type":"aws.rds"},{"name":"p3","resource_type":"aws.s3"}]"#,
        )
        .await;
        let loader = PoliciesLoader::new(&store, Cloud::Aws);

        let exclude: HashSet<String> = ["p2".to_string()].into_iter().collect();
        let keep: HashSet<String> = ["p1".to_string(), "p3".to_string()].into_iter().collect();

        let (loaded, _) = loader
            .load(&[ruleset("rs1", "rs/1.json", false)], &exclude, &keep)
            .await
            .unwrap();

        let names: HashSet<_> = loaded.iter().map(|lp| lp.policy.name.clone()).collect();
        assert_eq!(names, HashSet::from(["p1".to_string(), "p3".to_string()]));
    }

    #[tokio::test]
    async fn licensed_rulesets_load_before_standard() {
        let store = InMemoryObjectStore::default();
        store
            .put("rs/std.json", br#"{"policies":[{"name":"dup","resource_type":"aws.ec2"}]}"#.to_vec())
            .await
            .unwrap();
        store
            .put("rs/lic.json", br#"{"policies":[{"name":"dup","resource_type":"aws.s3"}]}"#.to_vec())
            .await
            .unwrap();
        let loader = PoliciesLoader::new(&store, Cloud::Aws);

        let (loaded, _) = loader
            .load(
                &[ruleset("std", "rs/std.json", false), ruleset("lic", "rs/lic.json", true)],
                &HashSet::new(),
                &HashSet::new(),
            )
            .await
            .unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].policy.resource_type, "aws.s3", "licensed ruleset policy should win the dedupe");
    }

    #[tokio::test]
    async fn missing_ruleset_content_is_skipped_with_warning_log_not_error() {
        let store = InMemoryObjectStore::default();
        let loader = PoliciesLoader::new(&store, Cloud::Aws);
        let (loaded, _) = loader
            .load(&[ruleset("gone", "rs/missing.json", false)], &HashSet::new(), &HashSet::new())
            .await
            .unwrap();
        assert!(loaded.is_empty());
    }
}
