//! Global-vs-regional policy classification (§4.1).

use crate::domain::{Cloud, Policy};

/// Built-in multi-regional resource types, per §4.1(b). Kept as a small
/// static table rather than pulled from the rule content itself — the
/// core treats rule content as opaque.
const MULTI_REGIONAL_RESOURCE_TYPES: &[&str] = &[
    "aws.iam-role",
    "aws.iam-user",
    "aws.iam-policy",
    "aws.cloudfront",
    "aws.route53-zone",
    "aws.waf",
];

fn service_of(resource_type: &str) -> &str {
    resource_type.strip_prefix("aws.").unwrap_or(resource_type)
}

/// `true` iff `policy` is classified global under §4.1's three-way rule.
/// Non-AWS clouds are global unconditionally — this function assumes the
/// caller already special-cased that at the `Cloud` level (see
/// [`region_plan::region_plan`](super::region_plan::region_plan)).
pub fn is_global(policy: &Policy, cloud: Cloud) -> bool {
    if !cloud.is_regional() {
        return true;
    }
    if policy.is_global == Some(true) {
        return true;
    }
    if MULTI_REGIONAL_RESOURCE_TYPES.contains(&policy.resource_type.as_str()) {
        return true;
    }
    service_of(&policy.resource_type).starts_with("s3")
}
