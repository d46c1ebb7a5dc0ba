//! Shared pool registry — the single source of truth for slot state.
//!
//! The lifecycle manager creates and removes entries; discovery results are
//! written through the transition methods below; the status service only
//! takes snapshots. Transitions are checked so a slot can never leave a
//! terminal state, and `ready` is only ever observed together with a
//! published endpoint.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

/// Lifecycle status of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Starting,
    Ready,
    Busy,
    Failed,
    Terminated,
}

impl SlotStatus {
    /// Slots in service: reachable through their published endpoint.
    pub fn in_service(self) -> bool {
        matches!(self, SlotStatus::Ready | SlotStatus::Busy)
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotStatus::Starting => "starting",
            SlotStatus::Ready => "ready",
            SlotStatus::Busy => "busy",
            SlotStatus::Failed => "failed",
            SlotStatus::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// One fixed position in the worker pool.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSlot {
    pub index: usize,
    pub id: String,
    pub dynamic_endpoint: Option<String>,
    pub published_endpoint: Option<String>,
    pub status: SlotStatus,
    pub started_at: DateTime<Utc>,
}

/// Gauge snapshot for readiness and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounts {
    pub total: usize,
    pub ready: usize,
    pub busy: usize,
}

/// Stable slot id for a pool index.
pub fn slot_id(index: usize) -> String {
    format!("browser-{index}")
}

struct Inner {
    slots: BTreeMap<usize, WorkerSlot>,
    launch_complete: bool,
}

/// Shared slot map; size fixed at configuration time.
pub struct PoolRegistry {
    inner: RwLock<Inner>,
    pool_size: usize,
}

impl PoolRegistry {
    pub fn new(pool_size: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                slots: BTreeMap::new(),
                launch_complete: false,
            }),
            pool_size,
        }
    }

    /// Configured pool size (not the number of entries present).
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Record a new slot entering the `starting` state.
    pub async fn insert_starting(&self, index: usize) -> WorkerSlot {
        let slot = WorkerSlot {
            index,
            id: slot_id(index),
            dynamic_endpoint: None,
            published_endpoint: None,
            status: SlotStatus::Starting,
            started_at: Utc::now(),
        };
        let mut inner = self.inner.write().await;
        if inner.slots.insert(index, slot.clone()).is_some() {
            warn!(slot = %slot.id, "slot entry replaced while running");
        }
        slot
    }

    /// `starting → ready`, recording both endpoints in the same critical
    /// section so readers never observe a ready slot without an endpoint.
    pub async fn mark_ready(&self, index: usize, dynamic: String, published: String) -> bool {
        self.transition(index, |slot| {
            if slot.status != SlotStatus::Starting {
                return false;
            }
            slot.dynamic_endpoint = Some(dynamic.clone());
            slot.published_endpoint = Some(published.clone());
            slot.status = SlotStatus::Ready;
            true
        })
        .await
    }

    /// `starting → failed`.
    pub async fn mark_failed(&self, index: usize) -> bool {
        self.transition(index, |slot| {
            if slot.status != SlotStatus::Starting {
                return false;
            }
            slot.status = SlotStatus::Failed;
            true
        })
        .await
    }

    /// Any live state → `terminated`. Used only by the lifecycle manager
    /// during shutdown.
    pub async fn mark_terminated(&self, index: usize) -> bool {
        self.transition(index, |slot| {
            if slot.status == SlotStatus::Terminated {
                return false;
            }
            slot.status = SlotStatus::Terminated;
            true
        })
        .await
    }

    /// `ready ↔ busy` for the embedding application layer.
    pub async fn set_busy(&self, index: usize, busy: bool) -> bool {
        self.transition(index, |slot| match (slot.status, busy) {
            (SlotStatus::Ready, true) => {
                slot.status = SlotStatus::Busy;
                true
            }
            (SlotStatus::Busy, false) => {
                slot.status = SlotStatus::Ready;
                true
            }
            _ => false,
        })
        .await
    }

    async fn transition<F>(&self, index: usize, apply: F) -> bool
    where
        F: FnOnce(&mut WorkerSlot) -> bool,
    {
        let mut inner = self.inner.write().await;
        match inner.slots.get_mut(&index) {
            Some(slot) => {
                let from = slot.status;
                let applied = apply(slot);
                if !applied {
                    warn!(slot = %slot.id, %from, "rejected slot transition");
                }
                applied
            }
            None => {
                warn!(index, "transition on unknown slot");
                false
            }
        }
    }

    /// Consistent snapshot of all slots, ordered by index.
    pub async fn snapshot(&self) -> Vec<WorkerSlot> {
        self.inner.read().await.slots.values().cloned().collect()
    }

    pub async fn counts(&self) -> PoolCounts {
        let inner = self.inner.read().await;
        let mut counts = PoolCounts {
            total: inner.slots.len(),
            ready: 0,
            busy: 0,
        };
        for slot in inner.slots.values() {
            match slot.status {
                SlotStatus::Ready => counts.ready += 1,
                SlotStatus::Busy => counts.busy += 1,
                _ => {}
            }
        }
        counts
    }

    /// Endpoint for single-endpoint consumers: slot 0 when in service,
    /// otherwise the first in-service slot.
    pub async fn primary_endpoint(&self) -> Option<String> {
        let inner = self.inner.read().await;
        inner
            .slots
            .values()
            .filter(|s| s.status.in_service())
            .filter_map(|s| s.published_endpoint.clone())
            .next()
    }

    pub async fn launch_complete(&self) -> bool {
        self.inner.read().await.launch_complete
    }

    pub async fn set_launch_complete(&self) {
        self.inner.write().await.launch_complete = true;
    }

    /// Drop all entries. Only the lifecycle manager calls this, at the end
    /// of the shutdown sequence.
    pub async fn clear(&self) {
        self.inner.write().await.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_requires_starting() {
        let registry = PoolRegistry::new(2);
        registry.insert_starting(0).await;
        assert!(
            registry
                .mark_ready(0, "ws://127.0.0.1:1/a".into(), "ws://127.0.0.1:3001/a".into())
                .await
        );
        // Second attempt is rejected: ready is reached exactly once.
        assert!(
            !registry
                .mark_ready(0, "ws://127.0.0.1:2/b".into(), "ws://127.0.0.1:3002/b".into())
                .await
        );
    }

    #[tokio::test]
    async fn test_terminal_states_are_sticky() {
        let registry = PoolRegistry::new(2);
        registry.insert_starting(0).await;
        registry.mark_failed(0).await;
        assert!(!registry.mark_ready(0, "d".into(), "p".into()).await);
        assert!(registry.mark_terminated(0).await);
        assert!(!registry.mark_terminated(0).await);
        assert!(!registry.mark_failed(0).await);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot[0].status, SlotStatus::Terminated);
    }

    #[tokio::test]
    async fn test_ready_slot_always_has_endpoint() {
        let registry = PoolRegistry::new(1);
        registry.insert_starting(0).await;
        registry
            .mark_ready(0, "ws://127.0.0.1:4000/s".into(), "ws://127.0.0.1:3001/s".into())
            .await;
        for slot in registry.snapshot().await {
            if slot.status.in_service() {
                assert!(slot.published_endpoint.is_some());
            }
        }
    }

    #[tokio::test]
    async fn test_busy_roundtrip() {
        let registry = PoolRegistry::new(1);
        registry.insert_starting(0).await;
        registry
            .mark_ready(0, "d".into(), "ws://127.0.0.1:3001/s".into())
            .await;
        assert!(registry.set_busy(0, true).await);
        assert_eq!(registry.counts().await.busy, 1);
        // Busy slots cannot go busy again, only back to ready.
        assert!(!registry.set_busy(0, true).await);
        assert!(registry.set_busy(0, false).await);
        assert_eq!(registry.counts().await.ready, 1);
    }

    #[tokio::test]
    async fn test_counts_and_primary() {
        let registry = PoolRegistry::new(3);
        for i in 0..3 {
            registry.insert_starting(i).await;
        }
        registry.mark_failed(0).await;
        registry
            .mark_ready(1, "d1".into(), "ws://127.0.0.1:3002/s1".into())
            .await;
        registry
            .mark_ready(2, "d2".into(), "ws://127.0.0.1:3003/s2".into())
            .await;

        let counts = registry.counts().await;
        assert_eq!(counts.total, 3);
        assert_eq!(counts.ready, 2);
        assert_eq!(counts.busy, 0);

        // Slot 0 failed, so the first in-service slot is primary.
        assert_eq!(
            registry.primary_endpoint().await.as_deref(),
            Some("ws://127.0.0.1:3002/s1")
        );
    }

    #[tokio::test]
    async fn test_clear_empties_registry() {
        let registry = PoolRegistry::new(1);
        registry.insert_starting(0).await;
        registry.clear().await;
        assert!(registry.snapshot().await.is_empty());
        assert_eq!(registry.pool_size(), 1);
    }
}
