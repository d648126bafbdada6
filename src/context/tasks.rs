//! Background work registered with `wait_until`.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinSet;

use crate::observability::metrics;

/// Keeps work alive after a response is sent.
///
/// Tasks run immediately on the runtime; the server drains them during
/// shutdown instead of aborting them.
#[derive(Clone, Default)]
pub struct WaitUntil {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl WaitUntil {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn `task` without blocking the caller.
    pub fn register<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        metrics::record_background_task();
        let mut tasks = self.lock();
        // reap finished tasks
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                tracing::error!(error = %e, "Background task failed");
            }
        }
        tasks.spawn(task);
    }

    /// Number of tasks not yet collected by [`WaitUntil::drain`].
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Wait for every registered task, including ones registered while
    /// draining.
    pub async fn drain(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.lock());
            if batch.is_empty() {
                return;
            }
            while let Some(result) = batch.join_next().await {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Background task failed");
                }
            }
        }
    }
}

impl std::fmt::Debug for WaitUntil {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitUntil").field("pending", &self.pending()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_drain_waits_for_nested_registrations() {
        let tasks = WaitUntil::new();
        let done = Arc::new(AtomicUsize::new(0));

        let (inner_tasks, inner_done) = (tasks.clone(), done.clone());
        tasks.register(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let done = inner_done.clone();
            inner_tasks.register(async move {
                done.fetch_add(1, Ordering::SeqCst);
            });
            inner_done.fetch_add(1, Ordering::SeqCst);
        });

        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert_eq!(tasks.pending(), 0);
    }
}
