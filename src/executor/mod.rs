//! Isolated Executor (§4.2): spawns one worker process per region,
//! reconciles its report into shard parts and statistics, and enforces
//! the deadline and short-circuit rules.

pub mod launcher;
pub mod runner;
pub mod taxonomy;
pub mod worker;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::domain::{Cloud, ErrorType, GLOBAL, Policy, ShardOutcome, ShardPart, StatisticsItem};
use crate::policy::LoadedPolicy;

use launcher::ProcessLauncher;
use runner::CloudRunner;
use taxonomy::ReconciledLocation;
use worker::{WorkerRequest, run_worker};

pub struct ExecutionOutcome {
    pub shard_parts: Vec<ShardPart>,
    pub statistics: Vec<StatisticsItem>,
    /// `true` iff the deadline tripped before every region in the plan ran.
    pub deadline_exceeded: bool,
}

/// Owned, `'static` description of one location's worker invocation —
/// everything `execute_location` needs, independent of how it's driven
/// (awaited inline for GLOBAL, or spawned into the bounded pool).
struct LocationJob {
    location: String,
    cloud: Cloud,
    program: String,
    args: Vec<String>,
    planned_policies: Vec<Policy>,
    credentials_env: HashMap<String, String>,
    work_dir: PathBuf,
    tenant_name: String,
    customer_name: String,
}

/// Policies applicable at one location: globals run only at `GLOBAL`,
/// regionals run at every non-`GLOBAL` location (§4.1, S1 scenario).
fn policies_for_location<'a>(policies: &'a [LoadedPolicy], location: &str) -> Vec<&'a LoadedPolicy> {
    if location == GLOBAL {
        policies.iter().filter(|p| p.is_global).collect()
    } else {
        policies.iter().filter(|p| !p.is_global).collect()
    }
}

/// Load the resources a policy wrote into its workspace file, `<work_dir>/<policy>.json`
/// (§4.2 Worker contract). Missing file or malformed content is treated as
/// the legitimate "zero resources found" outcome rather than an error —
/// the worker's `WorkerResult` is the authority on whether the rule failed.
async fn read_policy_resources(work_dir: &std::path::Path, policy_name: &str) -> Vec<serde_json::Value> {
    let path = work_dir.join(format!("{policy_name}.json"));
    match tokio::fs::read(&path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

async fn read_location_resources(
    work_dir: &std::path::Path,
    planned_policy_names: &[String],
) -> HashMap<String, Vec<serde_json::Value>> {
    let mut resources = HashMap::with_capacity(planned_policy_names.len());
    for name in planned_policy_names {
        resources.insert(name.clone(), read_policy_resources(work_dir, name).await);
    }
    resources
}

async fn execute_location(launcher: Arc<dyn ProcessLauncher>, job: LocationJob) -> ReconciledLocation {
    if job.planned_policies.is_empty() {
        return ReconciledLocation {
            shard_parts: Vec::new(),
            statistics: Vec::new(),
        };
    }
    let names: Vec<String> = job.planned_policies.iter().map(|p| p.name.clone()).collect();

    let _ = tokio::fs::create_dir_all(&job.work_dir).await;
    let start = Utc::now();

    let request = WorkerRequest {
        policies: job.planned_policies.clone(),
        work_dir: job.work_dir.to_string_lossy().into_owned(),
        cloud: job.cloud,
        region: job.location.clone(),
    };

    let result = run_worker(
        launcher.as_ref(),
        &job.program,
        &job.args,
        job.credentials_env.clone(),
        job.work_dir.clone(),
        &request,
    )
    .await;
    let end = Utc::now();

    match result {
        Ok(worker_result) => {
            let resources = read_location_resources(&job.work_dir, &names).await;
            taxonomy::reconcile_location(
                &job.location,
                &names,
                &worker_result,
                &job.tenant_name,
                &job.customer_name,
                start,
                end,
                |name| resources.get(name).cloned().unwrap_or_default(),
            )
        }
        Err(e) => {
            warn!(region = %job.location, error = %e, "worker failed to start; treating planned rules as INTERNAL");
            let mut reconciled = taxonomy::all_skipped(
                &job.location,
                &names,
                &job.tenant_name,
                &job.customer_name,
                &e.to_string(),
                end,
            );
            for part in &mut reconciled.shard_parts {
                if let ShardOutcome::Error { error_type, .. } = &mut part.outcome {
                    *error_type = ErrorType::Internal;
                }
            }
            for stat in &mut reconciled.statistics {
                stat.error_type = Some(ErrorType::Internal);
            }
            reconciled
        }
    }
}

/// Execute the full region plan for one job.
///
/// GLOBAL always runs first and to completion before any other region is
/// spawned (§5 ordering guarantees); the remaining regions run through a
/// bounded pool of size `parallelism` (§4.2 Rationale, §4.4.2).
#[instrument(skip_all, fields(regions = plan.len()))]
#[allow(clippy::too_many_arguments)]
pub async fn execute_plan(
    runner: &dyn CloudRunner,
    launcher: Arc<dyn ProcessLauncher>,
    policies: &[LoadedPolicy],
    plan: &[String],
    tenant_name: &str,
    customer_name: &str,
    credentials_env: HashMap<String, String>,
    work_dir_root: &std::path::Path,
    deadline: DateTime<Utc>,
    parallelism: usize,
) -> ExecutionOutcome {
    let (program, args) = runner.worker_command();
    let mut shard_parts = Vec::new();
    let mut statistics = Vec::new();
    let mut deadline_exceeded = false;

    let make_job = |location: &str| LocationJob {
        location: location.to_string(),
        cloud: runner.cloud(),
        program: program.clone(),
        args: args.clone(),
        planned_policies: policies_for_location(policies, location)
            .into_iter()
            .map(|p| p.policy.clone())
            .collect(),
        credentials_env: credentials_env.clone(),
        work_dir: work_dir_root.join(location),
        tenant_name: tenant_name.to_string(),
        customer_name: customer_name.to_string(),
    };

    let mut locations = plan.iter();
    let Some(first) = locations.next() else {
        return ExecutionOutcome {
            shard_parts,
            statistics,
            deadline_exceeded: false,
        };
    };

    // GLOBAL (or the sole location for non-regional clouds) always runs
    // first and is awaited to completion before anything else is spawned.
    let reconciled = execute_location(launcher.clone(), make_job(first)).await;
    shard_parts.extend(reconciled.shard_parts);
    statistics.extend(reconciled.statistics);

    let remaining: Vec<&String> = locations.collect();
    if remaining.is_empty() {
        return ExecutionOutcome {
            shard_parts,
            statistics,
            deadline_exceeded: false,
        };
    }

    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut in_flight = FuturesUnordered::new();

    for location in remaining {
        if Utc::now() >= deadline {
            deadline_exceeded = true;
            let job = make_job(location);
            let names: Vec<String> = job.planned_policies.iter().map(|p| p.name.clone()).collect();
            let reconciled = taxonomy::all_skipped(
                &job.location,
                &names,
                tenant_name,
                customer_name,
                "time exceeded",
                Utc::now(),
            );
            shard_parts.extend(reconciled.shard_parts);
            statistics.extend(reconciled.statistics);
            continue;
        }

        let job = make_job(location);
        let launcher = launcher.clone();
        let semaphore = semaphore.clone();
        in_flight.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            execute_location(launcher, job).await
        }));
    }

    while let Some(joined) = in_flight.next().await {
        if let Ok(reconciled) = joined {
            shard_parts.extend(reconciled.shard_parts);
            statistics.extend(reconciled.statistics);
        }
    }

    info!(parts = shard_parts.len(), stats = statistics.len(), "execution plan complete");

    ExecutionOutcome {
        shard_parts,
        statistics,
        deadline_exceeded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Policy;
    use crate::executor::launcher::NativeProcessLauncher;
    use crate::executor::runner::AwsRunner;

    fn loaded(name: &str, is_global: bool) -> LoadedPolicy {
        LoadedPolicy {
            policy: Policy {
                name: name.into(),
                resource_type: "aws.ec2".into(),
                filter: serde_json::Value::Null,
                is_global: None,
            },
            is_global,
        }
    }

    #[test]
    fn global_policies_only_scheduled_at_global_location() {
        let policies = vec![loaded("R_s3_global", true), loaded("R_ec2_regional", false)];
        let at_global = policies_for_location(&policies, GLOBAL);
        let at_region = policies_for_location(&policies, "eu-west-1");
        assert_eq!(at_global.len(), 1);
        assert_eq!(at_global[0].policy.name, "R_s3_global");
        assert_eq!(at_region.len(), 1);
        assert_eq!(at_region[0].policy.name, "R_ec2_regional");
    }

    struct FileWritingRunner;

    impl CloudRunner for FileWritingRunner {
        fn cloud(&self) -> Cloud {
            Cloud::Aws
        }

        fn worker_command(&self) -> (String, Vec<String>) {
            let script = r#"cat >/dev/null; echo '[{"id":"i-1"},{"id":"i-2"}]' > R1.json; echo '{"n_successful":1,"failed":[]}'"#;
            ("sh".to_string(), vec!["-c".to_string(), script.to_string()])
        }

        fn classify_error(&self, _code: &str) -> ErrorType {
            ErrorType::Internal
        }
    }

    #[tokio::test]
    async fn successful_rule_resources_are_read_from_the_workspace() {
        let policies = vec![loaded("R1", false)];
        let plan = vec!["eu-west-1".to_string()];
        let dir = tempfile::tempdir().unwrap();
        let outcome = execute_plan(
            &FileWritingRunner,
            Arc::new(NativeProcessLauncher),
            &policies,
            &plan,
            "acme-aws",
            "acme",
            HashMap::new(),
            dir.path(),
            Utc::now() + chrono::Duration::minutes(5),
            1,
        )
        .await;

        let part = outcome.shard_parts.iter().find(|p| p.key.policy == "R1").unwrap();
        match &part.outcome {
            ShardOutcome::Resources(resources) => assert_eq!(resources.len(), 2),
            other => panic!("expected resources, got {other:?}"),
        }
        let stat = outcome.statistics.iter().find(|s| s.policy == "R1").unwrap();
        assert_eq!(stat.scanned_resources, Some(2));
    }

    #[tokio::test]
    async fn deadline_in_the_past_skips_every_remaining_region() {
        let policies = vec![loaded("R1", false)];
        let plan = vec![GLOBAL.to_string(), "eu-west-1".to_string(), "eu-central-1".to_string()];
        let dir = tempfile::tempdir().unwrap();
        let outcome = execute_plan(
            &AwsRunner,
            Arc::new(NativeProcessLauncher),
            &policies,
            &plan,
            "acme-aws",
            "acme",
            HashMap::new(),
            dir.path(),
            Utc::now() - chrono::Duration::seconds(1),
            4,
        )
        .await;
        assert!(outcome.deadline_exceeded);
        let skipped = outcome
            .statistics
            .iter()
            .filter(|s| s.error_type == Some(ErrorType::Skipped))
            .count();
        assert_eq!(skipped, 2);
    }
}
