//! Worker pool that drains a work queue into a reconciler

use crate::error::Result;
use crate::queue::{QueueKey, WorkQueue};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What to do with a key after a successful pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    /// Look again later without counting a failure
    RequeueAfter(Duration),
}

#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    type Key: QueueKey;

    fn name(&self) -> &'static str;

    async fn reconcile(&self, key: &Self::Key) -> Result<Action>;
}

/// Worker pool settings
#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    pub workers: usize,
    /// How long in-flight work may take to drain at shutdown
    pub grace_period: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            grace_period: Duration::from_secs(10),
        }
    }
}

pub struct Controller<R: Reconciler> {
    reconciler: Arc<R>,
    queue: WorkQueue<R::Key>,
    config: ControllerConfig,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(reconciler: Arc<R>, queue: WorkQueue<R::Key>, config: ControllerConfig) -> Self {
        Self {
            reconciler,
            queue,
            config,
        }
    }

    pub fn queue(&self) -> &WorkQueue<R::Key> {
        &self.queue
    }

    /// Runs the workers until `token` is cancelled
    pub async fn run(self, token: CancellationToken) {
        let name = self.reconciler.name();
        let workers = self.config.workers.max(1);
        info!(controller = name, workers, "Controller started");

        let mut tasks = JoinSet::new();
        for _ in 0..workers {
            let reconciler = self.reconciler.clone();
            let queue = self.queue.clone();
            tasks.spawn(async move { work(reconciler, queue).await });
        }

        token.cancelled().await;
        self.queue.shutdown();

        let drained = tokio::time::timeout(self.config.grace_period, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(controller = name, "Grace period expired; aborting workers");
            tasks.abort_all();
        }
        info!(controller = name, "Controller stopped");
    }
}

async fn work<R: Reconciler>(reconciler: Arc<R>, queue: WorkQueue<R::Key>) {
    let name = reconciler.name();
    while let Some(key) = queue.get().await {
        match reconciler.reconcile(&key).await {
            Ok(Action::Done) => {
                queue.forget(&key);
            }
            Ok(Action::RequeueAfter(delay)) => {
                queue.forget(&key);
                queue.add_after(key.clone(), delay);
            }
            Err(e) if e.is_transient() => {
                let delay = queue.add_rate_limited(key.clone());
                debug!(controller = name, ?key, error = %e, ?delay, "Transient failure; retrying");
            }
            Err(e) => {
                let delay = queue.add_rate_limited(key.clone());
                error!(controller = name, ?key, error = %e, ?delay, "Reconciliation failed");
            }
        }
        queue.done(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconcileError;
    use hnc_client::ClientError;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Flaky {
        calls: Mutex<HashMap<String, u32>>,
    }

    #[async_trait]
    impl Reconciler for Flaky {
        type Key = String;

        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn reconcile(&self, key: &String) -> Result<Action> {
            let mut calls = self.calls.lock();
            let count = calls.entry(key.clone()).or_insert(0);
            *count += 1;
            if *count < 3 {
                return Err(ReconcileError::Client(ClientError::Conflict(key.clone())));
            }
            Ok(Action::Done)
        }
    }

    #[tokio::test]
    async fn test_failures_are_retried_until_success() {
        let reconciler = Arc::new(Flaky::default());
        let queue = WorkQueue::default();
        let controller = Controller::new(reconciler.clone(), queue.clone(), ControllerConfig::default());
        let token = CancellationToken::new();
        let handle = tokio::spawn(controller.run(token.clone()));

        queue.add("a".to_string());
        queue.add("b".to_string());

        for _ in 0..200 {
            let done = {
                let calls = reconciler.calls.lock();
                calls.get("a") == Some(&3) && calls.get("b") == Some(&3)
            };
            if done && queue.is_idle() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(reconciler.calls.lock().get("a"), Some(&3));
        assert_eq!(queue.failures(&"a".to_string()), 0);

        token.cancel();
        handle.await.unwrap();
        assert!(queue.is_shutdown());
    }
}
