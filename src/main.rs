use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use scan_pipeline::config::{Cli, Config, JobKind};
use scan_pipeline::credentials::CredentialsResolver;
use scan_pipeline::domain::{Cloud, Job, Platform, Ruleset, Tenant};
use scan_pipeline::error::CoreError;
use scan_pipeline::executor::launcher::NativeProcessLauncher;
use scan_pipeline::executor::runner::runner_for;
use scan_pipeline::lifecycle::{LifecycleController, RunParams};
use scan_pipeline::objectstore::ObjectStore;
use scan_pipeline::services::Services;
use scan_pipeline::telemetry;

fn job_record_key(job_id: &str) -> String {
    format!("jobs/{job_id}/request.json")
}

fn tenant_record_key(tenant_name: &str) -> String {
    format!("tenants/{tenant_name}.json")
}

fn platform_record_key(platform_id: &str) -> String {
    format!("platforms/{platform_id}.json")
}

async fn load_job(store: &dyn ObjectStore, job_id: &str) -> Result<Job> {
    let bytes = store
        .get(&job_record_key(job_id))
        .await
        .with_context(|| format!("fetching job record for {job_id}"))?
        .with_context(|| format!("no job record staged at {}", job_record_key(job_id)))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing job record for {job_id}"))
}

async fn load_tenant(store: &dyn ObjectStore, tenant_name: &str) -> Result<Tenant> {
    let bytes = store
        .get(&tenant_record_key(tenant_name))
        .await
        .with_context(|| format!("fetching tenant record for {tenant_name}"))?
        .with_context(|| format!("no tenant record staged at {}", tenant_record_key(tenant_name)))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing tenant record for {tenant_name}"))
}

async fn load_platform(store: &dyn ObjectStore, platform_id: &str) -> Result<Platform> {
    let bytes = store
        .get(&platform_record_key(platform_id))
        .await
        .with_context(|| format!("fetching platform record for {platform_id}"))?
        .with_context(|| format!("no platform record staged at {}", platform_record_key(platform_id)))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing platform record for {platform_id}"))
}

async fn persist_job(store: &dyn ObjectStore, job_id: &str, job: &Job) -> Result<()> {
    store.put_atomic(&job_record_key(job_id), serde_json::to_vec(job)?).await
}

fn scheduler_entry_key(scheduled_job_name: &str) -> String {
    format!("scheduler/{scheduled_job_name}.json")
}

/// What a scheduler entry supplies for a run it triggers (§4.4 Scheduled jobs).
#[derive(Debug, Deserialize, Serialize)]
struct ScheduleEntry {
    rulesets: Vec<Ruleset>,
    #[serde(default)]
    regions: Vec<String>,
    #[serde(default)]
    last_execution_time: Option<chrono::DateTime<chrono::Utc>>,
}

async fn load_schedule_entry(store: &dyn ObjectStore, scheduled_job_name: &str) -> Result<ScheduleEntry> {
    let bytes = store
        .get(&scheduler_entry_key(scheduled_job_name))
        .await
        .with_context(|| format!("fetching scheduler entry for {scheduled_job_name}"))?
        .with_context(|| format!("no scheduler entry staged at {}", scheduler_entry_key(scheduled_job_name)))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing scheduler entry for {scheduled_job_name}"))
}

/// A platform (Kubernetes) scan locks and plans under the platform's own
/// identity, not its parent tenant's — the parent tenant's AWS/Azure/GCP
/// lock is a separate resource (§4.4 locking is per scan target).
fn scan_identity(tenant: Tenant, platform: Option<&Platform>) -> Tenant {
    match platform {
        Some(p) => Tenant::new(p.id.clone(), Cloud::Kubernetes, tenant.project_id),
        None => tenant,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env_and_cli(cli)?;
    telemetry::init(config.json_logs);

    let services = Services::bootstrap();

    let tenant_name = config.tenant_name.clone().context("TENANT_NAME is required")?;
    let tenant = load_tenant(services.object_store.as_ref(), &tenant_name).await?;

    let mut job = match (&config.job_type, &config.job_id) {
        (_, Some(job_id)) => load_job(services.object_store.as_ref(), job_id).await?,
        (JobKind::Scheduled, None) => {
            let scheduled_job_name = config
                .scheduled_job_name
                .clone()
                .context("SCHEDULED_JOB_NAME is required for a scheduled job with no JOB_ID")?;
            let entry = load_schedule_entry(services.object_store.as_ref(), &scheduled_job_name).await?;
            let regions = if entry.regions.is_empty() { config.target_regions.clone() } else { entry.regions };
            Job::new_scheduled(&tenant_name, &tenant_name, entry.rulesets, regions, &scheduled_job_name)
        }
        (JobKind::Standard, None) | (JobKind::EventDriven, None) => {
            anyhow::bail!("JOB_ID is required for standard and event-driven jobs")
        }
    };
    let job_id = job.id.to_string();
    if !config.target_regions.is_empty() {
        job.regions = config.target_regions.clone();
    }
    if let Some(platform_id) = &config.platform_id {
        job.platform_id = Some(platform_id.clone());
    }

    let platform = match &job.platform_id {
        Some(platform_id) => Some(load_platform(services.object_store.as_ref(), platform_id).await?),
        None => None,
    };

    let credentials_resolver = CredentialsResolver::new(
        services.secret_store.as_ref(),
        services.sts_client.as_ref(),
        services.assume_role_cache.as_ref(),
        config.allow_management_creds,
    );
    let job_uuid = job.id;
    let (credentials_env, _materialized) = match credentials_resolver
        .resolve(job_uuid, &tenant, platform.as_ref(), None)
        .await
    {
        Ok(resolved) => resolved,
        Err(e) => {
            error!(error = %e, "credentials resolution failed");
            job.fail("NO_CREDENTIALS");
            if let Err(persist_err) = persist_job(services.object_store.as_ref(), &job_id, &job).await {
                warn!(error = %persist_err, "failed to persist final job record");
            }
            std::process::exit(CoreError::Credentials(e).exit_code());
        }
    };

    let scan_tenant = scan_identity(tenant, platform.as_ref());
    let runner = runner_for(scan_tenant.cloud);
    let deadline = job.submitted_at + chrono::Duration::from_std(config.job_lifetime).unwrap_or_default();
    let work_dir_root = std::env::temp_dir().join(format!("scan-{job_id}"));

    let params = RunParams {
        runner: runner.as_ref(),
        launcher: Arc::new(NativeProcessLauncher),
        credentials_env,
        work_dir_root: &work_dir_root,
        parallelism: config.effective_parallelism(scan_tenant.cloud),
        deadline,
        s3_self_heal_enabled: config.s3_self_heal_enabled,
        aws_default_region: config.aws_default_region.as_deref().unwrap_or("us-east-1"),
    };

    let controller = LifecycleController::new(
        services.object_store.as_ref(),
        services.quota_broker.as_ref(),
        services.locks.clone(),
    );

    let run_fut = controller.run(&mut job, &scan_tenant, params);
    tokio::pin!(run_fut);
    let result: Result<(), CoreError> = tokio::select! {
        res = &mut run_fut => res,
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received; letting the job run to its existing deadline");
            (&mut run_fut).await
        }
    };

    if let Err(e) = &result {
        error!(error = %e, "job failed");
    } else {
        info!(job_id = %job.id, "job succeeded");
    }

    if let Err(e) = persist_job(services.object_store.as_ref(), &job_id, &job).await {
        warn!(error = %e, "failed to persist final job record");
    }

    if let Some(scheduled_job_name) = &job.scheduled_rule_name {
        match load_schedule_entry(services.object_store.as_ref(), scheduled_job_name).await {
            Ok(mut entry) => {
                entry.last_execution_time = job.started_at.or(Some(chrono::Utc::now()));
                if let Err(e) = services
                    .object_store
                    .put_atomic(&scheduler_entry_key(scheduled_job_name), serde_json::to_vec(&entry)?)
                    .await
                {
                    warn!(error = %e, "failed to update scheduler entry last_execution_time");
                }
            }
            Err(e) => warn!(error = %e, "failed to reload scheduler entry for last_execution_time update"),
        }
    }

    let exit_code = result.as_ref().err().map(CoreError::exit_code).unwrap_or(0);
    std::process::exit(exit_code);
}
