use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::GLOBAL;

/// Five-way error taxonomy surfaced into `StatisticsItem.error_type` (§4.2, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorType {
    Access,
    Credentials,
    Client,
    Internal,
    Skipped,
}

/// Key identifying one shard part: a policy evaluated at one location.
/// `location` is a region name or the sentinel `GLOBAL`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardKey {
    pub policy: String,
    pub location: String,
}

impl ShardKey {
    pub fn new(policy: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            policy: policy.into(),
            location: location.into(),
        }
    }

    pub fn global(policy: impl Into<String>) -> Self {
        Self::new(policy, GLOBAL)
    }
}

/// One outcome of evaluating a policy at a location: either a set of
/// resources, or an error. Never both (§3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShardOutcome {
    Resources(Vec<serde_json::Value>),
    Error { error_type: ErrorType, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardPart {
    pub key: ShardKey,
    pub timestamp: DateTime<Utc>,
    pub outcome: ShardOutcome,
}

impl ShardPart {
    pub fn resources(
        policy: impl Into<String>,
        location: impl Into<String>,
        resources: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            key: ShardKey::new(policy, location),
            timestamp: Utc::now(),
            outcome: ShardOutcome::Resources(resources),
        }
    }

    pub fn error(
        policy: impl Into<String>,
        location: impl Into<String>,
        error_type: ErrorType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            key: ShardKey::new(policy, location),
            timestamp: Utc::now(),
            outcome: ShardOutcome::Error {
                error_type,
                message: message.into(),
            },
        }
    }

    pub fn resource_count(&self) -> usize {
        match &self.outcome {
            ShardOutcome::Resources(r) => r.len(),
            ShardOutcome::Error { .. } => 0,
        }
    }
}

/// Per-policy metadata sidecar, keyed by policy name (§3, §4.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyMeta {
    pub resource_type: String,
    pub description: String,
    pub is_global: bool,
}

/// An indexed set of shard parts plus the meta sidecar. Keyed by
/// `(policy, location)`; last write wins within a job (§3, §4.3).
///
/// Not `Sync`: exactly one owner task holds a `&mut ShardsCollection`
/// at a time per §5's shared-resource policy.
#[derive(Debug, Clone, Default)]
pub struct ShardsCollection {
    parts: BTreeMap<ShardKey, ShardPart>,
    meta: BTreeMap<String, PolicyMeta>,
}

impl ShardsCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn get(&self, key: &ShardKey) -> Option<&ShardPart> {
        self.parts.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShardPart> {
        self.parts.values()
    }

    pub fn meta(&self) -> &BTreeMap<String, PolicyMeta> {
        &self.meta
    }

    pub fn set_meta(&mut self, policy: impl Into<String>, meta: PolicyMeta) {
        self.meta.insert(policy.into(), meta);
    }

    pub fn update_meta_from(&mut self, other: &ShardsCollection) {
        for (policy, meta) in &other.meta {
            self.meta.insert(policy.clone(), meta.clone());
        }
    }

    /// `put_parts`: in-memory insert; last write by `(policy, location)` wins.
    pub fn put_parts<I: IntoIterator<Item = ShardPart>>(&mut self, parts: I) {
        for part in parts {
            self.parts.insert(part.key.clone(), part);
        }
    }

    /// `put_part`: targeted single-part edit, used by self-heal routines.
    pub fn put_part(&mut self, part: ShardPart) {
        self.parts.insert(part.key.clone(), part);
    }

    /// `drop_part`: targeted removal, used by self-heal routines.
    pub fn drop_part(&mut self, key: &ShardKey) -> Option<ShardPart> {
        self.parts.remove(key)
    }

    /// `update(other)`: overwrite matching `(policy, location)` from `other`.
    /// Azure carve-out: entries with `location = AzureCloud` are dropped —
    /// the caller must resolve them via self-heal before merging (§4.3).
    pub fn update(&mut self, other: &ShardsCollection) {
        for (key, part) in &other.parts {
            if key.location == super::AZURE_PSEUDO_REGION {
                continue;
            }
            self.parts.insert(key.clone(), part.clone());
        }
        for (policy, meta) in &other.meta {
            self.meta.insert(policy.clone(), meta.clone());
        }
    }

    /// `diff(other)`: parts present here but absent from `other`, keyed by
    /// `(policy, location)`. Never introduces resources (§8 invariant 3).
    pub fn diff(&self, other: &ShardsCollection) -> ShardsCollection {
        let mut result = ShardsCollection::new();
        for (key, part) in &self.parts {
            if !other.parts.contains_key(key) {
                result.parts.insert(key.clone(), part.clone());
            }
        }
        result.meta = self.meta.clone();
        result
    }

    /// Parts at a single location (used by `fetch(region)` once the owning
    /// shard blob has been loaded by the store).
    pub fn parts_at(&self, location: &str) -> Vec<&ShardPart> {
        self.parts.values().filter(|p| p.key.location == location).collect()
    }

    /// Count of GLOBAL parts for a given policy — used to assert §8 invariant 2.
    pub fn global_part_count(&self, policy: &str) -> usize {
        self.parts
            .values()
            .filter(|p| p.key.policy == policy && p.key.location == GLOBAL)
            .count()
    }
}

impl PartialEq for ShardsCollection {
    fn eq(&self, other: &Self) -> bool {
        self.parts.len() == other.parts.len()
            && self.parts.iter().all(|(k, v)| {
                other.parts.get(k).is_some_and(|ov| {
                    serde_json::to_value(v).unwrap() == serde_json::to_value(ov).unwrap()
                })
            })
    }
}

/// One element of the statistics artifact (§6). Produced once per rule
/// invocation attempt; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsItem {
    pub policy: String,
    pub region: String,
    pub tenant_name: String,
    pub customer_name: String,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default)]
    pub api_calls: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanned_resources: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_resources: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traceback: Vec<String>,
}
