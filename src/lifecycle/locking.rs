//! Per-tenant lock (§3 Lock, §4.4 Locking discipline, §4.4.1 RAII guard).
//!
//! Generalized from the teacher's finalizer-removal-on-cleanup pattern in
//! its reconcile loop (`commands/reconcile.rs`): there, a Kubernetes
//! finalizer is added before risky work and removed once it's safe; here,
//! a tenant lock is acquired before a scan and an RAII guard guarantees
//! its release even on a panicking finalize path.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::domain::Lock;
use crate::error::LifecycleError;

/// Registry of active locks, one per tenant. Synchronous and
/// `std::sync::Mutex`-backed (not `tokio::sync::Mutex`) so that
/// `LockGuard::drop` can release without needing an async runtime.
#[derive(Default)]
pub struct LockRegistry {
    active: Mutex<std::collections::HashMap<String, Lock>>,
}

impl LockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquisition is strict: if an entry exists for the tenant and it is
    /// not this job, acquisition fails fast.
    pub fn acquire(
        self: &Arc<Self>,
        tenant_name: &str,
        job_id: Uuid,
        regions: HashSet<String>,
    ) -> Result<LockGuard, LifecycleError> {
        let mut guard = self.active.lock().expect("lock registry mutex poisoned");
        if let Some(existing) = guard.get(tenant_name) {
            if existing.job_id != job_id {
                return Err(LifecycleError::LockHeld {
                    tenant: tenant_name.to_string(),
                    existing_job_id: existing.job_id.to_string(),
                });
            }
        }
        guard.insert(tenant_name.to_string(), Lock::new(tenant_name, job_id, regions));
        drop(guard);

        Ok(LockGuard {
            registry: self.clone(),
            tenant_name: tenant_name.to_string(),
            job_id,
            released: false,
        })
    }

    fn release(&self, tenant_name: &str, job_id: Uuid) {
        let mut guard = self.active.lock().expect("lock registry mutex poisoned");
        if let Some(existing) = guard.get(tenant_name) {
            if existing.job_id == job_id {
                guard.remove(tenant_name);
            }
        }
    }

    pub fn is_locked(&self, tenant_name: &str) -> bool {
        self.active.lock().expect("lock registry mutex poisoned").contains_key(tenant_name)
    }
}

/// RAII handle: released unconditionally on drop, including on a
/// panicking finalize path (§4.4 Locking discipline).
pub struct LockGuard {
    registry: Arc<LockRegistry>,
    tenant_name: String,
    job_id: Uuid,
    released: bool,
}

impl LockGuard {
    /// Explicit release on the ordinary finalize path. Consumes `self` so
    /// `Drop` becomes a no-op afterward.
    pub fn release(mut self) {
        self.registry.release(&self.tenant_name, self.job_id);
        self.released = true;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            self.registry.release(&self.tenant_name, self.job_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_job_cannot_acquire_while_first_holds_lock() {
        let registry = LockRegistry::new();
        let job_a = Uuid::new_v4();
        let job_b = Uuid::new_v4();

        let _guard_a = registry.acquire("acme-aws", job_a, HashSet::new()).unwrap();
        let err = registry.acquire("acme-aws", job_b, HashSet::new()).unwrap_err();
        assert!(matches!(err, LifecycleError::LockHeld { .. }));
    }

    #[test]
    fn drop_releases_lock_even_without_explicit_release() {
        let registry = LockRegistry::new();
        let job_a = Uuid::new_v4();
        {
            let _guard = registry.acquire("acme-aws", job_a, HashSet::new()).unwrap();
            assert!(registry.is_locked("acme-aws"));
        }
        assert!(!registry.is_locked("acme-aws"));
    }

    #[test]
    fn explicit_release_then_drop_does_not_release_a_different_jobs_lock() {
        let registry = LockRegistry::new();
        let job_a = Uuid::new_v4();
        let job_b = Uuid::new_v4();

        let guard_a = registry.acquire("acme-aws", job_a, HashSet::new()).unwrap();
        guard_a.release();
        let _guard_b = registry.acquire("acme-aws", job_b, HashSet::new()).unwrap();
        // dropping the already-released guard_a handle must not disturb job_b's lock
        assert!(registry.is_locked("acme-aws"));
    }

    #[test]
    fn panic_during_finalize_still_releases_lock() {
        let registry = LockRegistry::new();
        let job_a = Uuid::new_v4();
        let registry_for_panic = registry.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = registry_for_panic.acquire("acme-aws", job_a, HashSet::new()).unwrap();
            panic!("simulated finalize panic");
        });
        assert!(result.is_err());
        assert!(!registry.is_locked("acme-aws"));
    }
}
