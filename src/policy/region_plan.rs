//! Region plan construction (§4.1): `[GLOBAL] + sorted(regions)`.

use std::collections::BTreeSet;

use crate::domain::{Cloud, GLOBAL};

/// Build the execution plan for one job: tenant-configured regions union
/// job-requested regions, GLOBAL always first. Non-AWS clouds ignore
/// regions entirely and the plan collapses to `[GLOBAL]`.
pub fn region_plan(cloud: Cloud, tenant_regions: &[String], job_regions: &[String]) -> Vec<String> {
    if !cloud.is_regional() {
        return vec![GLOBAL.to_string()];
    }

    let mut regions: BTreeSet<String> = tenant_regions.iter().cloned().collect();
    regions.extend(job_regions.iter().cloned());

    let mut plan = Vec::with_capacity(regions.len() + 1);
    plan.push(GLOBAL.to_string());
    plan.extend(regions);
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aws_plan_is_global_then_sorted_union() {
        let plan = region_plan(
            Cloud::Aws,
            &["eu-west-1".into(), "us-east-1".into()],
            &["eu-central-1".into()],
        );
        assert_eq!(plan, vec!["GLOBAL", "eu-central-1", "eu-west-1", "us-east-1"]);
    }

    #[test]
    fn aws_plan_dedupes_overlapping_regions() {
        let plan = region_plan(Cloud::Aws, &["eu-west-1".into()], &["eu-west-1".into()]);
        assert_eq!(plan, vec!["GLOBAL", "eu-west-1"]);
    }

    #[test]
    fn non_aws_clouds_collapse_to_global_only() {
        for cloud in [Cloud::Azure, Cloud::Google, Cloud::Kubernetes] {
            let plan = region_plan(cloud, &["westeurope".into()], &[]);
            assert_eq!(plan, vec!["GLOBAL"]);
        }
    }
}
