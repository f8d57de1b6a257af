//! Per-deployment mutual exclusion.
//!
//! Every mutating operation holds its deployment's guard across
//! fetch → decide → persist, so two cycles for the same deployment are
//! serialized while different deployments proceed in parallel.
//!
//! Entries live only while someone holds or waits on them: each acquire drops
//! the entries nobody else references, so the registry tracks active
//! deployments rather than every deployment ever seen.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of one async mutex per deployment id.
#[derive(Clone, Default)]
pub struct DeploymentLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl DeploymentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `deployment_id`.
    pub async fn acquire(&self, deployment_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // A registry-only reference means no holder and no waiter.
            locks.retain(|id, lock| id == deployment_id || Arc::strong_count(lock) > 1);
            locks
                .entry(deployment_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry for a deleted deployment.
    pub async fn forget(&self, deployment_id: &str) {
        self.locks.lock().await.remove(deployment_id);
    }

    /// Number of deployments with a lock entry.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_deployment_is_serialized() {
        let locks = DeploymentLocks::new();
        let guard = locks.acquire("d1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("d1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn different_deployments_do_not_block() {
        let locks = DeploymentLocks::new();
        let _a = locks.acquire("d1").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("d2")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len().await, 2);
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = DeploymentLocks::new();
        for i in 0..100 {
            drop(locks.acquire(&format!("d{i}")).await);
        }
        assert_eq!(locks.len().await, 1);
    }

    #[tokio::test]
    async fn held_and_awaited_entries_survive_pruning() {
        let locks = DeploymentLocks::new();
        let held = locks.acquire("d1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("d1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(locks.acquire("d2").await);
        drop(locks.acquire("d3").await);
        assert_eq!(locks.len().await, 2);
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn forget_removes_entry() {
        let locks = DeploymentLocks::new();
        drop(locks.acquire("d1").await);
        locks.forget("d1").await;
        assert!(locks.is_empty().await);
    }
}
