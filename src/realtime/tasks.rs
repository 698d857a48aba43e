//! Supervised background tasks. Work the realtime layer does not await (view-count
//! announcements, offline bookkeeping on disconnect) reports its failures here.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use prometheus::IntCounter;
use tokio::task::JoinHandle;

use crate::error::RealtimeError;

#[derive(Clone)]
pub struct TaskSupervisor {
    failures: Arc<AtomicU64>,
    failures_metric: IntCounter,
}

impl TaskSupervisor {
    pub fn new(failures_metric: IntCounter) -> Self {
        Self {
            failures: Arc::new(AtomicU64::new(0)),
            failures_metric,
        }
    }

    /// Run `fut` on the runtime. An `Err` is logged under `name` and counted.
    pub fn spawn<F>(&self, name: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), RealtimeError>> + Send + 'static,
    {
        let sink = self.clone();
        tokio::spawn(async move {
            if let Err(err) = fut.await {
                sink.report(name, &err);
            }
        })
    }

    pub fn report(&self, name: &'static str, err: &RealtimeError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.failures_metric.inc();
        tracing::error!(task = name, error = %err, "background task failed");
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
