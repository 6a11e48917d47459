//! Environment-variable contract (§6) plus the `clap`-derived CLI used for
//! local/manual overrides (§1.1). Environment variables are authoritative
//! in production batch contexts; CLI flags exist for local runs and tests.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use crate::domain::Cloud;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorMode {
    /// Regions are processed sequentially in one worker at a time.
    Consistent,
    /// Regions are processed through a bounded pool of size `parallelism`.
    Concurrent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Standard,
    Scheduled,
    EventDriven,
}

/// One-shot invocation overrides. Mirrors the environment contract so a
/// developer can run a scan locally without exporting a dozen variables.
#[derive(Debug, Parser)]
#[command(name = "scan-pipeline", about = "Scan execution pipeline controller")]
pub struct Cli {
    /// Pre-created Job id (standard job). Overrides $JOB_ID.
    #[arg(long)]
    pub job_id: Option<String>,

    /// Tenant to scan. Overrides $TENANT_NAME.
    #[arg(long)]
    pub tenant: Option<String>,

    /// Comma-separated region allowlist (AWS only). Overrides $TARGET_REGIONS.
    #[arg(long)]
    pub regions: Option<String>,

    /// Emit structured logs as JSON instead of text.
    #[arg(long)]
    pub json_logs: bool,
}

/// Fully resolved configuration for one controller invocation, built by
/// layering `Cli` overrides over the environment contract of §6.
#[derive(Debug, Clone)]
pub struct Config {
    pub job_id: Option<String>,
    pub batch_results_ids: Vec<String>,
    pub target_regions: Vec<String>,
    pub tenant_name: Option<String>,
    pub platform_id: Option<String>,
    pub credentials_key: Option<String>,
    pub job_lifetime: Duration,
    pub allow_management_creds: bool,
    pub executor_mode: ExecutorMode,
    pub executor_parallelism: usize,
    pub job_type: JobKind,
    pub scheduled_job_name: Option<String>,
    pub aws_default_region: Option<String>,
    pub s3_self_heal_enabled: bool,
    pub json_logs: bool,
}

impl Config {
    pub fn from_env_and_cli(cli: Cli) -> Result<Self> {
        let job_lifetime_minutes: u64 = env_parse_or("BATCH_JOB_LIFETIME_MINUTES", 180)?;

        let executor_mode = match env::var("EXECUTOR_MODE").ok().as_deref() {
            Some("concurrent") => ExecutorMode::Concurrent,
            _ => ExecutorMode::Consistent,
        };

        let job_type = match env::var("JOB_TYPE").ok().as_deref() {
            Some("scheduled") => JobKind::Scheduled,
            Some("event-driven") => JobKind::EventDriven,
            _ => JobKind::Standard,
        };

        let target_regions = cli
            .regions
            .or_else(|| env::var("TARGET_REGIONS").ok())
            .map(|s| split_csv(&s))
            .unwrap_or_default();

        let batch_results_ids = env::var("BATCH_RESULTS_IDS")
            .ok()
            .map(|s| split_csv(&s))
            .unwrap_or_default();

        Ok(Self {
            job_id: cli.job_id.or_else(|| env::var("JOB_ID").ok()),
            batch_results_ids,
            target_regions,
            tenant_name: cli.tenant.or_else(|| env::var("TENANT_NAME").ok()),
            platform_id: env::var("PLATFORM_ID").ok(),
            credentials_key: env::var("CREDENTIALS_KEY").ok(),
            job_lifetime: Duration::from_secs(job_lifetime_minutes * 60),
            allow_management_creds: env_bool("ALLOW_MANAGEMENT_CREDS"),
            executor_mode,
            executor_parallelism: env_parse_or("RESOURCE_COLLECTOR_PARALLELISM", 4)?,
            job_type,
            scheduled_job_name: env::var("SCHEDULED_JOB_NAME").ok(),
            aws_default_region: env::var("AWS_DEFAULT_REGION").ok(),
            s3_self_heal_enabled: env::var("SHARD_S3_SELF_HEAL")
                .ok()
                .map(|v| parse_bool(&v))
                .unwrap_or(true),
            json_logs: cli.json_logs || env::var("LOG_FORMAT").ok().as_deref() == Some("json"),
        })
    }

    /// Parallelism to apply to the region worker pool for `cloud`, per
    /// §4.2/§4.4.2 (only AWS has more than one non-GLOBAL region to pool).
    pub fn effective_parallelism(&self, cloud: Cloud) -> usize {
        if !cloud.is_regional() {
            return 1;
        }
        match self.executor_mode {
            ExecutorMode::Consistent => 1,
            ExecutorMode::Concurrent => self.executor_parallelism.max(1),
        }
    }
}

fn split_csv(s: &str) -> Vec<String> {
    s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

fn env_bool(key: &str) -> bool {
    env::var(key).ok().map(|v| parse_bool(&v)).unwrap_or(false)
}

fn parse_bool(v: &str) -> bool {
    v.eq_ignore_ascii_case("true") || v == "1"
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key).ok() {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw}: {e}"))
            .with_context(|| format!("parsing {key}")),
        None => Ok(default),
    }
}
