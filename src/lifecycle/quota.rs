//! Quota broker RPC abstraction (§6, §4.4 Pre-authorization).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::JobStatus;

#[derive(Debug, Clone)]
pub struct RulesetAuthorization {
    /// Ruleset id to its object-store content key, as authorized.
    pub ruleset_content: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub enum QuotaDecision {
    Authorized(RulesetAuthorization),
    Denied { reason: String },
}

#[async_trait]
pub trait QuotaBroker: Send + Sync {
    /// `post_job`: pre-authorize a licensed job. `ruleset_map` is
    /// `{tlk: [ruleset_name_version, ...]}`.
    async fn post_job(
        &self,
        job_id: Uuid,
        customer: &str,
        tenant: &str,
        ruleset_map: &BTreeMap<String, Vec<String>>,
    ) -> anyhow::Result<QuotaDecision>;

    /// `update_job`: finalization notification (§4.4 step 8).
    async fn update_job(
        &self,
        job_id: Uuid,
        created_at: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
        stopped_at: Option<DateTime<Utc>>,
        status: JobStatus,
    ) -> anyhow::Result<()>;
}

/// Always-authorize broker used when a job names no licensed ruleset, and
/// as a test double.
pub struct NullQuotaBroker;

#[async_trait]
impl QuotaBroker for NullQuotaBroker {
    async fn post_job(
        &self,
        _job_id: Uuid,
        _customer: &str,
        _tenant: &str,
        _ruleset_map: &BTreeMap<String, Vec<String>>,
    ) -> anyhow::Result<QuotaDecision> {
        Ok(QuotaDecision::Authorized(RulesetAuthorization {
            ruleset_content: BTreeMap::new(),
        }))
    }

    async fn update_job(
        &self,
        _job_id: Uuid,
        _created_at: DateTime<Utc>,
        _started_at: Option<DateTime<Utc>>,
        _stopped_at: Option<DateTime<Utc>>,
        _status: JobStatus,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
