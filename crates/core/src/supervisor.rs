//! # Task Supervisor
//!
//! Tracks detached background tasks (builder runs, fire-and-forget
//! swarms) so shutdown can wait for work in flight instead of dropping
//! it mid-write.

use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Registry of detached task handles
#[derive(Default)]
pub struct TaskSupervisor {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a tracked background task
    pub fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.handles.lock().unwrap().push(handle);
    }

    /// Number of tasks still running
    pub fn active(&self) -> usize {
        let mut handles = self.handles.lock().unwrap();
        handles.retain(|h| !h.is_finished());
        handles.len()
    }

    /// Wait up to `grace` for in-flight tasks, then abort stragglers
    pub async fn shutdown_drain(&self, grace: Duration) {
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().unwrap();
            guard.drain(..).collect()
        };
        if handles.is_empty() {
            return;
        }

        tracing::info!(tasks = handles.len(), "Draining background tasks");
        let drain = async {
            for handle in &handles {
                while !handle.is_finished() {
                    tokio::time::sleep(Duration::from_millis(25)).await;
                }
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            for handle in &handles {
                if !handle.is_finished() {
                    handle.abort();
                }
            }
            tracing::warn!("Shutdown grace expired, aborted remaining tasks");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_waits_for_completion() {
        let supervisor = TaskSupervisor::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        supervisor.spawn(async move {
            let _ = rx.await;
        });
        assert_eq!(supervisor.active(), 1);

        tx.send(()).ok();
        supervisor.shutdown_drain(Duration::from_secs(1)).await;
        assert_eq!(supervisor.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_aborts_after_grace() {
        let supervisor = TaskSupervisor::new();
        supervisor.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        supervisor.shutdown_drain(Duration::from_millis(100)).await;
        // Handle set was drained either way
        assert_eq!(supervisor.active(), 0);
    }
}
