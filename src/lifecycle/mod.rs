//! Job Lifecycle Controller (§4.4): owns the Job state machine, the
//! tenant lock, license pre-authorization, and the mandatory
//! finalization order.

pub mod controller;
pub mod locking;
pub mod quota;

pub use controller::{LifecycleController, RunParams};
pub use locking::{LockGuard, LockRegistry};
pub use quota::{NullQuotaBroker, QuotaBroker, QuotaDecision, RulesetAuthorization};
