//! Polls a cluster's onboarding status until it is approved.

use crate::api::ClusterStatus;
use futures::prelude::*;
use std::sync::Arc;
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{self, Duration},
};
use tracing::Instrument;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

#[async_trait::async_trait]
pub trait ClusterStatusSource: Send + Sync {
    async fn fetch(&self, cluster: &str) -> anyhow::Result<ClusterStatus>;
}

#[derive(Debug, thiserror::Error)]
#[error("failed to check status of cluster {cluster}")]
pub struct PollError {
    pub cluster: String,
    #[source]
    source: anyhow::Error,
}

/// A running poll task. Dropping the handle stops polling.
#[derive(Debug)]
pub struct Polling {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Yields the cluster's status every `interval`.
///
/// The stream ends after the first approved status or after the first
/// failed check; a failure is yielded once and is not retried.
pub fn statuses<S>(
    source: Arc<S>,
    cluster: String,
    interval: Duration,
) -> impl Stream<Item = Result<ClusterStatus, PollError>>
where
    S: ClusterStatusSource + ?Sized + 'static,
{
    async_stream::stream! {
        loop {
            match source.fetch(&cluster).await {
                Ok(status) => {
                    let approved = status.approved;
                    tracing::debug!(%cluster, approved, message = ?status.message, "cluster status");
                    yield Ok(status);
                    if approved {
                        tracing::info!(%cluster, "cluster approved");
                        break;
                    }
                }
                Err(error) => {
                    tracing::warn!(%cluster, %error, "cluster status check failed");
                    yield Err(PollError { cluster: cluster.clone(), source: error });
                    break;
                }
            }
            time::sleep(interval).await;
        }
    }
}

/// Spawns a task that polls the cluster's status and hands every update to
/// `on_update`.
pub fn spawn<S, F>(
    source: Arc<S>,
    cluster: impl Into<String>,
    interval: Duration,
    mut on_update: F,
) -> Polling
where
    S: ClusterStatusSource + ?Sized + 'static,
    F: FnMut(Result<ClusterStatus, PollError>) + Send + 'static,
{
    let cluster = cluster.into();
    let span = tracing::info_span!("poll", %cluster);
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(
        async move {
            let updates = statuses(source, cluster, interval);
            futures::pin_mut!(updates);
            loop {
                tokio::select! {
                    biased;
                    // Fires on an explicit stop and when the handle is dropped.
                    _ = &mut stop_rx => {
                        tracing::debug!("polling stopped");
                        return;
                    }
                    next = updates.next() => match next {
                        Some(update) => on_update(update),
                        None => return,
                    },
                }
            }
        }
        .instrument(span),
    );
    Polling {
        stop: Some(stop_tx),
        task,
    }
}

// === impl Polling ===

impl Polling {
    /// Stops polling and waits for the task to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    struct Scripted {
        responses: Mutex<VecDeque<anyhow::Result<ClusterStatus>>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(responses: Vec<anyhow::Result<ClusterStatus>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl ClusterStatusSource for Scripted {
        async fn fetch(&self, cluster: &str) -> anyhow::Result<ClusterStatus> {
            assert_eq!(cluster, "cluster1");
            *self.calls.lock() += 1;
            self.responses.lock().pop_front().unwrap_or_else(|| Ok(pending()))
        }
    }

    fn pending() -> ClusterStatus {
        ClusterStatus {
            approved: false,
            message: Some("waiting for CSR approval".to_string()),
        }
    }

    fn approved() -> ClusterStatus {
        ClusterStatus {
            approved: true,
            message: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_once_approved() {
        let source = Scripted::new(vec![Ok(pending()), Ok(pending()), Ok(approved())]);
        let start = time::Instant::now();
        let updates = statuses(source.clone(), "cluster1".to_string(), DEFAULT_INTERVAL)
            .map(Result::unwrap)
            .collect::<Vec<_>>()
            .await;
        assert_eq!(updates, vec![pending(), pending(), approved()]);
        assert_eq!(*source.calls.lock(), 3);
        assert_eq!(start.elapsed(), DEFAULT_INTERVAL * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_first_error() {
        let source = Scripted::new(vec![
            Ok(pending()),
            Err(anyhow::anyhow!("500 Internal Server Error")),
            Ok(approved()),
        ]);
        let updates = statuses(source.clone(), "cluster1".to_string(), DEFAULT_INTERVAL)
            .collect::<Vec<_>>()
            .await;
        assert_eq!(updates.len(), 2);
        let err = updates[1].as_ref().unwrap_err();
        assert_eq!(err.cluster, "cluster1");
        assert_eq!(err.to_string(), "failed to check status of cluster cluster1");
        assert_eq!(*source.calls.lock(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_ends_polling() {
        let source = Scripted::new(vec![]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let polling = spawn(source.clone(), "cluster1", DEFAULT_INTERVAL, move |update| {
            let _ = tx.send(update.is_ok());
        });

        assert_eq!(rx.recv().await, Some(true));
        assert_eq!(rx.recv().await, Some(true));
        polling.stop().await;

        // The callback was dropped with the task.
        assert_eq!(rx.recv().await, None);
        let calls = *source.calls.lock();
        time::sleep(DEFAULT_INTERVAL * 3).await;
        assert_eq!(*source.calls.lock(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn task_finishes_on_approval() {
        let source = Scripted::new(vec![Ok(approved())]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let polling = spawn(source, "cluster1", DEFAULT_INTERVAL, move |update| {
            let _ = tx.send(update.map(|s| s.approved).unwrap_or(false));
        });
        assert_eq!(rx.recv().await, Some(true));
        assert_eq!(rx.recv().await, None);
        assert!(polling.is_finished());
    }
}
