//! `CloudRunner` abstraction (§4.2.2, §9 Design Notes): replaces the
//! original's isinstance chains on cloud/resource objects with a method
//! on a per-cloud runner chosen once from the tenant's `Cloud`.

use crate::domain::{Cloud, ErrorType};

/// Per-cloud knowledge needed by the executor: how to invoke the scanning
/// engine subprocess for this cloud, and how to classify its raw error
/// codes into the five-way taxonomy.
pub trait CloudRunner: Send + Sync {
    fn cloud(&self) -> Cloud;

    /// Program + args used to invoke the scanning engine for one region.
    /// The region and policy list travel in the `WorkerRequest` body, not
    /// the argv, so every cloud's command line is the same shape.
    fn worker_command(&self) -> (String, Vec<String>);

    /// Map a worker-reported error code/message to the taxonomy. Each
    /// runner knows its own provider's error vocabulary; unrecognized
    /// codes fall back to `ErrorType::Internal`.
    fn classify_error(&self, code: &str) -> ErrorType;
}

fn classify_common(code: &str) -> Option<ErrorType> {
    match code {
        "ACCESS" | "AccessDenied" | "Forbidden" | "UnauthorizedOperation" => Some(ErrorType::Access),
        "CREDENTIALS" | "ExpiredToken" | "InvalidClientTokenId" | "Unauthenticated" => {
            Some(ErrorType::Credentials)
        }
        "CLIENT" | "Throttling" | "ValidationError" | "BadRequest" => Some(ErrorType::Client),
        _ => None,
    }
}

pub struct AwsRunner;

impl CloudRunner for AwsRunner {
    fn cloud(&self) -> Cloud {
        Cloud::Aws
    }

    fn worker_command(&self) -> (String, Vec<String>) {
        ("custodian-worker".to_string(), vec!["--provider".into(), "aws".into()])
    }

    fn classify_error(&self, code: &str) -> ErrorType {
        classify_common(code).unwrap_or(ErrorType::Internal)
    }
}

pub struct AzureRunner;

impl CloudRunner for AzureRunner {
    fn cloud(&self) -> Cloud {
        Cloud::Azure
    }

    fn worker_command(&self) -> (String, Vec<String>) {
        ("custodian-worker".to_string(), vec!["--provider".into(), "azure".into()])
    }

    fn classify_error(&self, code: &str) -> ErrorType {
        match code {
            "AuthorizationFailed" => ErrorType::Access,
            "InvalidAuthenticationTokenTenant" | "ExpiredAuthenticationToken" => ErrorType::Credentials,
            other => classify_common(other).unwrap_or(ErrorType::Internal),
        }
    }
}

pub struct GcpRunner;

impl CloudRunner for GcpRunner {
    fn cloud(&self) -> Cloud {
        Cloud::Google
    }

    fn worker_command(&self) -> (String, Vec<String>) {
        ("custodian-worker".to_string(), vec!["--provider".into(), "gcp".into()])
    }

    fn classify_error(&self, code: &str) -> ErrorType {
        match code {
            "PERMISSION_DENIED" => ErrorType::Access,
            "UNAUTHENTICATED" => ErrorType::Credentials,
            other => classify_common(other).unwrap_or(ErrorType::Internal),
        }
    }
}

pub struct K8sRunner;

impl CloudRunner for K8sRunner {
    fn cloud(&self) -> Cloud {
        Cloud::Kubernetes
    }

    fn worker_command(&self) -> (String, Vec<String>) {
        ("custodian-worker".to_string(), vec!["--provider".into(), "k8s".into()])
    }

    fn classify_error(&self, code: &str) -> ErrorType {
        match code {
            "Forbidden" => ErrorType::Access,
            "Unauthorized" => ErrorType::Credentials,
            other => classify_common(other).unwrap_or(ErrorType::Internal),
        }
    }
}

pub fn runner_for(cloud: Cloud) -> Box<dyn CloudRunner> {
    match cloud {
        Cloud::Aws => Box::new(AwsRunner),
        Cloud::Azure => Box::new(AzureRunner),
        Cloud::Google => Box::new(GcpRunner),
        Cloud::Kubernetes => Box::new(K8sRunner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_for_dispatches_by_cloud() {
        assert_eq!(runner_for(Cloud::Aws).cloud(), Cloud::Aws);
        assert_eq!(runner_for(Cloud::Azure).cloud(), Cloud::Azure);
        assert_eq!(runner_for(Cloud::Google).cloud(), Cloud::Google);
        assert_eq!(runner_for(Cloud::Kubernetes).cloud(), Cloud::Kubernetes);
    }

    #[test]
    fn azure_runner_classifies_provider_specific_codes() {
        let runner = AzureRunner;
        assert_eq!(runner.classify_error("AuthorizationFailed"), ErrorType::Access);
        assert_eq!(runner.classify_error("ExpiredAuthenticationToken"), ErrorType::Credentials);
        assert_eq!(runner.classify_error("something-unrecognized"), ErrorType::Internal);
    }

    #[test]
    fn aws_runner_classifies_common_codes() {
        let runner = AwsRunner;
        assert_eq!(runner.classify_error("AccessDenied"), ErrorType::Access);
        assert_eq!(runner.classify_error("ExpiredToken"), ErrorType::Credentials);
        assert_eq!(runner.classify_error("Throttling"), ErrorType::Client);
    }
}
