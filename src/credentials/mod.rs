//! Credentials Resolver (§4.5): resolves a job's cloud credentials
//! through a fixed priority chain and materializes them into an
//! env-var bundle plus any backing temp files.

pub mod aws;
pub mod azure;
pub mod gcp;
pub mod kubernetes;
pub mod resolver;

pub use aws::{AssumeRoleCache, AwsCredentials, AwsStsClient, ClusterDescription};
pub use resolver::{CredentialsPayload, CredentialsResolver, MaterializedCredentials};
