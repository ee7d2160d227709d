//! Shared run state

use std::sync::Arc;
use survey_model::{RunPhase, RunState};
use tokio::sync::{RwLock, RwLockWriteGuard};

/// Handle to the state of the current run.
///
/// Cloning the handle is cheap; readers only ever receive owned snapshots.
#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<RunState>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owned copy of the current state
    pub async fn snapshot(&self) -> RunState {
        self.inner.read().await.clone()
    }

    pub async fn phase(&self) -> RunPhase {
        self.inner.read().await.phase
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, RunState> {
        self.inner.write().await
    }

    /// Apply `f` under the write lock
    pub(crate) async fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut RunState) -> R,
    {
        let mut state = self.inner.write().await;
        f(&mut state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let shared = SharedState::new();
        let before = shared.snapshot().await;

        shared
            .update(|s| {
                s.phase = RunPhase::Running;
                s.current_iteration = 2;
            })
            .await;

        assert_eq!(before.phase, RunPhase::Idle);
        let after = shared.snapshot().await;
        assert_eq!(after.phase, RunPhase::Running);
        assert_eq!(after.current_iteration, 2);
    }

    #[tokio::test]
    async fn test_concurrent_readers() {
        let shared = SharedState::new();
        let writer = {
            let shared = shared.clone();
            tokio::spawn(async move {
                for i in 1..=100 {
                    shared.update(|s| s.current_iteration = i).await;
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut last = 0;
        for _ in 0..100 {
            let seen = shared.snapshot().await.current_iteration;
            assert!(seen >= last);
            last = seen;
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
        assert_eq!(shared.snapshot().await.current_iteration, 100);
    }
}
