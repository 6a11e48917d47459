//! The controller itself (§4.4): pre-authorization, locking, execution,
//! and the eight-step mandatory finalization order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::domain::{Job, JobStatus, JobType, PolicyMeta, Tenant};
use crate::error::{CoreError, LifecycleError, PolicyError};
use crate::executor::launcher::ProcessLauncher;
use crate::executor::runner::CloudRunner;
use crate::executor::execute_plan;
use crate::objectstore::ObjectStore;
use crate::policy::{PoliciesLoader, region_plan};
use crate::shards::selfheal::{azure_resolve, s3_self_heal};
use crate::shards::sharding::shard_index;
use crate::shards::ShardStore;
use crate::stats::write_statistics;

use super::locking::LockRegistry;
use super::quota::{QuotaBroker, QuotaDecision};

fn job_result_key(job: &Job) -> String {
    format!("reports/{}/jobs/{}", job.tenant_name, job.id)
}

fn latest_key(tenant_name: &str) -> String {
    format!("reports/{tenant_name}/latest")
}

fn ed_job_difference_key(job: &Job) -> String {
    format!("reports/{}/jobs/{}/diff", job.tenant_name, job.id)
}

/// Everything the controller needs about the execution environment for
/// one run, beyond the `Job`/`Tenant` records themselves.
pub struct RunParams<'a> {
    pub runner: &'a dyn CloudRunner,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub credentials_env: HashMap<String, String>,
    pub work_dir_root: &'a Path,
    pub parallelism: usize,
    pub deadline: DateTime<Utc>,
    pub s3_self_heal_enabled: bool,
    pub aws_default_region: &'a str,
}

pub struct LifecycleController<'a> {
    object_store: &'a dyn ObjectStore,
    quota_broker: &'a dyn QuotaBroker,
    locks: Arc<LockRegistry>,
}

impl<'a> LifecycleController<'a> {
    pub fn new(object_store: &'a dyn ObjectStore, quota_broker: &'a dyn QuotaBroker, locks: Arc<LockRegistry>) -> Self {
        Self {
            object_store,
            quota_broker,
            locks,
        }
    }

    /// Drives `job` from STARTING through to a terminal status,
    /// mutating it in place. Returns the lifecycle error on a fatal
    /// failure, having already recorded it on the job.
    #[instrument(skip_all, fields(job_id = %job.id, tenant = %job.tenant_name))]
    pub async fn run(&self, job: &mut Job, tenant: &Tenant, params: RunParams<'_>) -> Result<(), CoreError> {
        if let Err(e) = self.pre_authorize(job).await {
            job.fail("LM_DID_NOT_ALLOW");
            return Err(e);
        }

        let regions: HashSet<String> = job.regions.iter().cloned().collect();
        let guard = match self.locks.acquire(&job.tenant_name, job.id, regions) {
            Ok(g) => g,
            Err(e) => {
                job.fail("LOCK_HELD");
                return Err(e.into());
            }
        };

        job.transition(JobStatus::Running);

        let (outcome, policy_metas) = match self.execute(job, tenant, &params).await {
            Ok(result) => result,
            Err(e) => {
                job.fail("EXECUTION_FAILED");
                guard.release();
                return Err(e);
            }
        };

        if let Err(e) = self
            .finalize(
                job,
                &outcome.shard_parts,
                &outcome.statistics,
                &policy_metas,
                params.s3_self_heal_enabled,
                params.aws_default_region,
            )
            .await
        {
            job.fail("FINALIZATION_FAILED");
            guard.release();
            return Err(e);
        }

        job.transition(JobStatus::Succeeded);
        if job.is_licensed() {
            self.notify_quota(job).await;
        }
        guard.release();

        info!(
            parts = outcome.shard_parts.len(),
            stats = outcome.statistics.len(),
            deadline_exceeded = outcome.deadline_exceeded,
            "job finalized"
        );
        Ok(())
    }

    async fn pre_authorize(&self, job: &mut Job) -> Result<(), CoreError> {
        if !job.is_licensed() {
            return Ok(());
        }

        let mut ruleset_map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for ruleset in &job.rulesets {
            if let Some(tlk) = &ruleset.license_key {
                let version = ruleset.version.as_deref().unwrap_or("0");
                ruleset_map.entry(tlk.clone()).or_default().push(format!("{}_{version}", ruleset.name));
            }
        }

        let decision = self
            .quota_broker
            .post_job(job.id, &job.customer_name, &job.tenant_name, &ruleset_map)
            .await
            .map_err(CoreError::Other)?;

        match decision {
            QuotaDecision::Authorized(auth) => {
                for ruleset in &mut job.rulesets {
                    if let Some(content_ref) = auth.ruleset_content.get(&ruleset.name) {
                        ruleset.content_ref = content_ref.clone();
                    }
                }
                Ok(())
            }
            QuotaDecision::Denied { reason } => Err(LifecycleError::QuotaDenied { reason }.into()),
        }
    }

    async fn execute(
        &self,
        job: &mut Job,
        tenant: &Tenant,
        params: &RunParams<'_>,
    ) -> Result<(crate::executor::ExecutionOutcome, BTreeMap<String, PolicyMeta>), CoreError> {
        let plan = region_plan(tenant.cloud, &tenant.regions, &job.regions);

        let keep: HashSet<String> = job.rules_to_scan.iter().cloned().collect();
        let loader = PoliciesLoader::new(self.object_store, tenant.cloud);
        let (policies, warnings) = loader.load(&job.rulesets, &HashSet::new(), &keep).await?;
        job.warnings.extend(warnings);

        if policies.is_empty() {
            return Err(PolicyError::EmptyPlan.into());
        }

        let metas: BTreeMap<String, PolicyMeta> = policies
            .iter()
            .map(|lp| {
                (
                    lp.policy.name.clone(),
                    PolicyMeta {
                        resource_type: lp.policy.resource_type.clone(),
                        description: String::new(),
                        is_global: lp.is_global,
                    },
                )
            })
            .collect();

        let outcome = execute_plan(
            params.runner,
            params.launcher.clone(),
            &policies,
            &plan,
            &job.tenant_name,
            &job.customer_name,
            params.credentials_env.clone(),
            params.work_dir_root,
            params.deadline,
            params.parallelism,
        )
        .await;

        Ok((outcome, metas))
    }

    /// Steps 1-7 of §4.4's mandatory finalization order. Step 8
    /// (transition + release + notify) is driven by the caller, since it
    /// also governs the FAILED path.
    async fn finalize(
        &self,
        job: &Job,
        shard_parts: &[crate::domain::ShardPart],
        statistics: &[crate::domain::StatisticsItem],
        policy_metas: &BTreeMap<String, PolicyMeta>,
        s3_self_heal_enabled: bool,
        aws_default_region: &str,
    ) -> Result<(), CoreError> {
        // Step 1: materialize the job's raw ShardsCollection.
        let mut job_store = ShardStore::new(self.object_store, job_result_key(job));
        for (name, meta) in policy_metas {
            job_store.set_meta(name.clone(), meta.clone());
        }
        job_store.put_parts(shard_parts.iter().cloned());
        job_store.write_all().await?;
        job_store.write_meta().await?;

        // Step 2: fetch the tenant's latest shards covering the job's
        // touched indexes, plus its meta.
        let touched: HashSet<u32> = job_store.collection().iter().map(|p| shard_index(&p.key.location)).collect();
        let mut latest_store = ShardStore::new(self.object_store, latest_key(&job.tenant_name));
        latest_store.fetch_by_indexes(&touched).await?;
        latest_store.fetch_meta().await?;

        // Step 3: self-heals, applied to the in-memory job collection only
        // (the raw job_result key written in step 1 is left untouched).
        if s3_self_heal_enabled {
            s3_self_heal(job_store.collection_mut(), aws_default_region);
        }
        let healed = azure_resolve(job_store.collection());

        // Step 4: difference against latest, computed from the healed view.
        let difference = healed.diff(latest_store.collection());

        // Step 5: merge healed job into latest; write latest + its meta.
        latest_store.update(&healed);
        latest_store.write_all().await?;
        latest_store.write_meta().await?;

        // Step 6: event-driven jobs persist the difference; standard jobs discard it.
        if job.job_type == JobType::EventDriven {
            let mut diff_store = ShardStore::new(self.object_store, ed_job_difference_key(job));
            diff_store.put_parts(difference.iter().cloned());
            diff_store.write_all().await?;
        }

        // Step 7: statistics artifact.
        write_statistics(self.object_store, &job.id.to_string(), statistics)
            .await
            .map_err(CoreError::Other)?;

        Ok(())
    }

    async fn notify_quota(&self, job: &Job) {
        if let Err(e) = self
            .quota_broker
            .update_job(job.id, job.submitted_at, job.started_at, job.stopped_at, job.status)
            .await
        {
            warn!(job_id = %job.id, error = %e, "quota broker update_job failed; finalization already committed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::domain::{Cloud, Job, Ruleset};
    use crate::executor::launcher::NativeProcessLauncher;
    use crate::executor::runner::AwsRunner;
    use crate::objectstore::InMemoryObjectStore;
    use crate::shards::sharding::{SHARD_COUNT, shard_key};
    use std::collections::BTreeMap as Map;

    async fn seeded_store(content_ref: &str) -> InMemoryObjectStore {
        let store = InMemoryObjectStore::default();
        store
            .put(
                content_ref,
                br#"{"policies":[{"name":"R_ec2","resource_type":"aws.ec2"}]}"#.to_vec(),
            )
            .await
            .unwrap();
        store
    }

    fn tenant() -> Tenant {
        Tenant::new("acme-aws", Cloud::Aws, "111122223333")
    }

    fn job(content_ref: &str) -> Job {
        let ruleset = Ruleset {
            name: "standard".into(),
            version: Some("1".into()),
            license_key: None,
            cloud: Cloud::Aws,
            rule_ids: vec![],
            content_ref: content_ref.into(),
        };
        Job::new_standard("acme-aws", "acme", vec![ruleset], vec!["eu-west-1".into()])
    }

    fn run_params<'a>(work_dir: &'a Path) -> RunParams<'a> {
        RunParams {
            runner: &AwsRunner,
            launcher: Arc::new(NativeProcessLauncher),
            credentials_env: HashMap::new(),
            work_dir_root: work_dir,
            parallelism: 2,
            deadline: Utc::now() + chrono::Duration::minutes(5),
            s3_self_heal_enabled: true,
            aws_default_region: "us-east-1",
        }
    }

    #[tokio::test]
    async fn successful_run_reaches_succeeded_and_writes_every_artifact() {
        let store = seeded_store("rs/std.json").await;
        let broker = crate::lifecycle::NullQuotaBroker;
        let locks = LockRegistry::new();
        let controller = LifecycleController::new(&store, &broker, locks.clone());

        let dir = tempfile::tempdir().unwrap();
        let mut j = job("rs/std.json");
        let t = tenant();

        controller.run(&mut j, &t, run_params(dir.path())).await.unwrap();

        assert_eq!(j.status, JobStatus::Succeeded);
        assert!(j.stopped_at.is_some());
        assert!(!locks.is_locked("acme-aws"));

        let job_key = format!("reports/{}/jobs/{}", j.tenant_name, j.id);
        let mut any_shard_written = false;
        for idx in 0..SHARD_COUNT {
            if store.get(&shard_key(&job_key, idx)).await.unwrap().is_some() {
                any_shard_written = true;
                break;
            }
        }
        assert!(any_shard_written, "expected at least one job shard blob to be written");

        let stats = store.get(&crate::stats::statistics_key(&j.id.to_string())).await.unwrap();
        assert!(stats.is_some());
    }

    #[tokio::test]
    async fn quota_denial_fails_job_without_running_the_plan() {
        let store = seeded_store("rs/lic.json").await;

        struct DenyBroker;
        #[async_trait]
        impl QuotaBroker for DenyBroker {
            async fn post_job(
                &self,
                _job_id: uuid::Uuid,
                _customer: &str,
                _tenant: &str,
                _ruleset_map: &Map<String, Vec<String>>,
            ) -> anyhow::Result<QuotaDecision> {
                Ok(QuotaDecision::Denied {
                    reason: "quota exhausted".into(),
                })
            }

            async fn update_job(
                &self,
                _job_id: uuid::Uuid,
                _created_at: DateTime<Utc>,
                _started_at: Option<DateTime<Utc>>,
                _stopped_at: Option<DateTime<Utc>>,
                _status: JobStatus,
            ) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let broker = DenyBroker;
        let locks = LockRegistry::new();
        let controller = LifecycleController::new(&store, &broker, locks.clone());

        let dir = tempfile::tempdir().unwrap();
        let mut j = job("rs/lic.json");
        j.rulesets[0].license_key = Some("tlk-1".into());
        let t = tenant();

        let err = controller.run(&mut j, &t, run_params(dir.path())).await.unwrap_err();
        assert!(matches!(err, CoreError::Lifecycle(LifecycleError::QuotaDenied { .. })));
        assert_eq!(j.status, JobStatus::Failed);
        assert_eq!(j.reason.as_deref(), Some("LM_DID_NOT_ALLOW"));
        assert!(!locks.is_locked("acme-aws"));
    }

    #[tokio::test]
    async fn lock_held_by_another_job_fails_fast() {
        let store = seeded_store("rs/std.json").await;
        let broker = crate::lifecycle::NullQuotaBroker;
        let locks = LockRegistry::new();
        let _held = locks
            .acquire("acme-aws", uuid::Uuid::new_v4(), HashSet::new())
            .unwrap();

        let controller = LifecycleController::new(&store, &broker, locks.clone());
        let dir = tempfile::tempdir().unwrap();
        let mut j = job("rs/std.json");
        let t = tenant();

        let err = controller.run(&mut j, &t, run_params(dir.path())).await.unwrap_err();
        assert!(matches!(err, CoreError::Lifecycle(LifecycleError::LockHeld { .. })));
        assert_eq!(j.status, JobStatus::Failed);
    }
}
