//! Per-region result reconciliation: combines what the worker reported
//! with what it left unaccounted-for into one `StatisticsItem`/`ShardPart`
//! pair per planned policy (§4.2 Error taxonomy, §8 invariant 1).

use chrono::{DateTime, Utc};

use crate::domain::{ErrorType, ShardPart, StatisticsItem};

use super::worker::{WorkerFailure, WorkerResult};

pub struct ReconciledLocation {
    pub shard_parts: Vec<ShardPart>,
    pub statistics: Vec<StatisticsItem>,
}

/// Reconcile one location's worker result against the full set of policy
/// names that were planned to run there.
///
/// `resource_reader` loads the resources a successfully-evaluated policy
/// wrote into the worker's workspace (§4.2 Worker contract); it returns
/// an empty vec if the worker produced no file for it (a legitimate
/// "zero resources found" outcome).
pub fn reconcile_location(
    location: &str,
    planned_policy_names: &[String],
    result: &WorkerResult,
    tenant_name: &str,
    customer_name: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    resource_reader: impl Fn(&str) -> Vec<serde_json::Value>,
) -> ReconciledLocation {
    let failed_by_name: std::collections::HashMap<&str, &WorkerFailure> =
        result.failed.iter().map(|f| (f.policy.as_str(), f)).collect();

    // The short-circuit rule: if a CREDENTIALS failure is present and the
    // worker accounted for fewer policies than were planned, it stopped
    // early. Every planned policy it never got to is SKIPPED with the
    // same reason, in planned order following the first CREDENTIALS hit.
    let credentials_failure = result
        .failed
        .iter()
        .find(|f| f.error_type == ErrorType::Credentials);
    let short_circuited = credentials_failure.is_some()
        && (result.failed.len() as u32 + result.n_successful) < planned_policy_names.len() as u32;

    let mut shard_parts = Vec::with_capacity(planned_policy_names.len());
    let mut statistics = Vec::with_capacity(planned_policy_names.len());

    for name in planned_policy_names {
        if let Some(failure) = failed_by_name.get(name.as_str()) {
            shard_parts.push(ShardPart::error(name.clone(), location, failure.error_type, &failure.message));
            statistics.push(StatisticsItem {
                policy: name.clone(),
                region: location.to_string(),
                tenant_name: tenant_name.to_string(),
                customer_name: customer_name.to_string(),
                start_time: start.timestamp() as f64,
                end_time: end.timestamp() as f64,
                api_calls: Default::default(),
                scanned_resources: None,
                failed_resources: Some(0),
                error_type: Some(failure.error_type),
                reason: Some(failure.message.clone()),
                traceback: failure.trace.clone(),
            });
            continue;
        }

        if short_circuited {
            let reason = credentials_failure.map(|f| f.message.clone()).unwrap_or_default();
            shard_parts.push(ShardPart::error(name.clone(), location, ErrorType::Skipped, &reason));
            statistics.push(StatisticsItem {
                policy: name.clone(),
                region: location.to_string(),
                tenant_name: tenant_name.to_string(),
                customer_name: customer_name.to_string(),
                start_time: start.timestamp() as f64,
                end_time: end.timestamp() as f64,
                api_calls: Default::default(),
                scanned_resources: None,
                failed_resources: Some(0),
                error_type: Some(ErrorType::Skipped),
                reason: Some(reason),
                traceback: vec![],
            });
            continue;
        }

        // Treated as a success: read whatever the worker wrote for it.
        let resources = resource_reader(name);
        let count = resources.len() as u64;
        shard_parts.push(ShardPart::resources(name.clone(), location, resources));
        statistics.push(StatisticsItem {
            policy: name.clone(),
            region: location.to_string(),
            tenant_name: tenant_name.to_string(),
            customer_name: customer_name.to_string(),
            start_time: start.timestamp() as f64,
            end_time: end.timestamp() as f64,
            api_calls: Default::default(),
            scanned_resources: Some(count),
            failed_resources: Some(0),
            error_type: None,
            reason: None,
            traceback: vec![],
        });
    }

    ReconciledLocation { shard_parts, statistics }
}

/// All planned policies marked `SKIPPED` with a fixed reason — used both
/// for deadline-exceeded regions (§4.2 Time budget) and for regions never
/// spawned at all.
pub fn all_skipped(
    location: &str,
    planned_policy_names: &[String],
    tenant_name: &str,
    customer_name: &str,
    reason: &str,
    at: DateTime<Utc>,
) -> ReconciledLocation {
    let mut shard_parts = Vec::with_capacity(planned_policy_names.len());
    let mut statistics = Vec::with_capacity(planned_policy_names.len());
    for name in planned_policy_names {
        shard_parts.push(ShardPart::error(name.clone(), location, ErrorType::Skipped, reason));
        statistics.push(StatisticsItem {
            policy: name.clone(),
            region: location.to_string(),
            tenant_name: tenant_name.to_string(),
            customer_name: customer_name.to_string(),
            start_time: at.timestamp() as f64,
            end_time: at.timestamp() as f64,
            api_calls: Default::default(),
            scanned_resources: None,
            failed_resources: Some(0),
            error_type: Some(ErrorType::Skipped),
            reason: Some(reason.to_string()),
            traceback: vec![],
        });
    }
    ReconciledLocation { shard_parts, statistics }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::worker::WorkerFailure;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn credentials_failure_skips_remaining_planned_policies() {
        let result = WorkerResult {
            n_successful: 0,
            failed: vec![WorkerFailure {
                policy: "A".into(),
                location: "us-east-1".into(),
                error_type: ErrorType::Credentials,
                message: "token expired".into(),
                trace: vec![],
            }],
        };
        let planned = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let reconciled = reconcile_location(
            "us-east-1",
            &planned,
            &result,
            "acme-aws",
            "acme",
            now(),
            now(),
            |_| vec![],
        );

        let by_name: std::collections::HashMap<_, _> =
            reconciled.statistics.iter().map(|s| (s.policy.clone(), s)).collect();
        assert_eq!(by_name["A"].error_type, Some(ErrorType::Credentials));
        assert_eq!(by_name["B"].error_type, Some(ErrorType::Skipped));
        assert_eq!(by_name["C"].error_type, Some(ErrorType::Skipped));
        assert_eq!(by_name["B"].reason.as_deref(), Some("token expired"));
        assert_eq!(reconciled.statistics.len(), 3);
    }

    #[test]
    fn access_denied_does_not_skip_siblings() {
        let result = WorkerResult {
            n_successful: 1,
            failed: vec![WorkerFailure {
                policy: "R_rds_regional".into(),
                location: "eu-west-1".into(),
                error_type: ErrorType::Access,
                message: "denied".into(),
                trace: vec![],
            }],
        };
        let planned = vec!["R_ec2_regional".to_string(), "R_rds_regional".to_string()];
        let reconciled = reconcile_location(
            "eu-west-1",
            &planned,
            &result,
            "t",
            "c",
            now(),
            now(),
            |_| vec![],
        );
        let by_name: std::collections::HashMap<_, _> =
            reconciled.statistics.iter().map(|s| (s.policy.clone(), s)).collect();
        assert_eq!(by_name["R_ec2_regional"].error_type, None);
        assert_eq!(by_name["R_rds_regional"].error_type, Some(ErrorType::Access));
    }

    #[test]
    fn all_skipped_covers_every_planned_policy() {
        let planned = vec!["A".to_string(), "B".to_string()];
        let reconciled = all_skipped("eu-north-1", &planned, "t", "c", "time exceeded", now());
        assert_eq!(reconciled.statistics.len(), 2);
        assert!(reconciled
            .statistics
            .iter()
            .all(|s| s.error_type == Some(ErrorType::Skipped) && s.reason.as_deref() == Some("time exceeded")));
    }
}
