use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ruleset::Ruleset;

/// Job status; monotone over `STARTING -> RUNNING -> {SUCCEEDED|FAILED}` (§3, §8 invariant 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Starting,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Whether `self -> next` is a legal transition under §4.4's state machine.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Starting, Running) => true,
            (Starting, Failed) => true,
            (Running, Succeeded) | (Running, Failed) => true,
            _ => false,
        }
    }
}

/// How the job was triggered; affects whether a pre-existing Job record
/// is expected (§4.4 Scheduled jobs) and whether the difference artifact
/// is persisted (§4.4 finalization step 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    Standard,
    Scheduled,
    EventDriven,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub tenant_name: String,
    pub customer_name: String,
    pub status: JobStatus,
    pub job_type: JobType,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub rulesets: Vec<Ruleset>,
    pub regions: Vec<String>,
    pub rules_to_scan: Vec<String>,
    pub affected_license: Option<String>,
    pub scheduled_rule_name: Option<String>,
    pub platform_id: Option<String>,
    pub reason: Option<String>,
    /// Duplicate-policy-name warnings recorded by the loader (§4.1).
    pub warnings: Vec<String>,
}

impl Job {
    pub fn new_standard(
        tenant_name: impl Into<String>,
        customer_name: impl Into<String>,
        rulesets: Vec<Ruleset>,
        regions: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_name: tenant_name.into(),
            customer_name: customer_name.into(),
            status: JobStatus::Starting,
            job_type: JobType::Standard,
            submitted_at: Utc::now(),
            started_at: None,
            stopped_at: None,
            rulesets,
            regions,
            rules_to_scan: Vec::new(),
            affected_license: None,
            scheduled_rule_name: None,
            platform_id: None,
            reason: None,
            warnings: Vec::new(),
        }
    }

    /// A scheduled job has no pre-existing record (§4.4); the controller
    /// binary builds one from the scheduler entry it was invoked for.
    pub fn new_scheduled(
        tenant_name: impl Into<String>,
        customer_name: impl Into<String>,
        rulesets: Vec<Ruleset>,
        regions: Vec<String>,
        scheduled_rule_name: impl Into<String>,
    ) -> Self {
        Self {
            job_type: JobType::Scheduled,
            scheduled_rule_name: Some(scheduled_rule_name.into()),
            ..Self::new_standard(tenant_name, customer_name, rulesets, regions)
        }
    }

    /// Transition to `next`, recording timestamps per §4.4. Panics on an
    /// illegal transition — the controller is the only caller and must
    /// never attempt one (§8 invariant 8 is a compile-time-adjacent
    /// contract enforced here at runtime).
    pub fn transition(&mut self, next: JobStatus) {
        assert!(
            self.status.can_transition_to(next),
            "illegal job transition {:?} -> {:?}",
            self.status,
            next
        );
        match next {
            JobStatus::Running => self.started_at = Some(Utc::now()),
            JobStatus::Succeeded | JobStatus::Failed => self.stopped_at = Some(Utc::now()),
            JobStatus::Starting => {}
        }
        self.status = next;
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.reason = Some(reason.into());
        self.transition(JobStatus::Failed);
    }

    pub fn is_licensed(&self) -> bool {
        self.rulesets.iter().any(|r| r.license_key.is_some())
    }
}
