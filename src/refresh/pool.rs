//! Bounded worker pool for per-source refresh jobs.
//!
//! A fixed number of workers share one job queue. Each job is bounded by a
//! timeout so a hung source only costs its own slot for that long. Results
//! are delivered on a channel that closes once every job has been answered.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mediastash_common::{Error, MediaRecord, Result, SourceRef};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::source::MetadataSource;

/// Outcome of refreshing one source.
#[derive(Debug)]
pub struct SourceResult {
    pub source: SourceRef,
    pub outcome: Result<Vec<MediaRecord>>,
    pub elapsed: Duration,
}

/// Worker pool settings.
#[derive(Debug, Clone, Copy)]
pub struct RefreshPool {
    workers: usize,
    per_source_limit: usize,
    source_timeout: Duration,
}

impl RefreshPool {
    pub fn new(workers: usize, per_source_limit: usize, source_timeout: Duration) -> Self {
        Self {
            workers: workers.max(1),
            per_source_limit,
            source_timeout,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queue every source and start the workers.
    ///
    /// The returned receiver yields exactly one [`SourceResult`] per source
    /// and then closes.
    pub fn dispatch(
        &self,
        sources: Vec<SourceRef>,
        metadata: Arc<dyn MetadataSource>,
    ) -> mpsc::Receiver<SourceResult> {
        let total = sources.len();
        let (job_tx, job_rx) = mpsc::channel(total.max(1));
        let (result_tx, result_rx) = mpsc::channel(total.max(1));

        for source in sources {
            // Capacity equals the job count, so this never fails.
            let _ = job_tx.try_send(source);
        }
        drop(job_tx);

        let jobs = Arc::new(Mutex::new(job_rx));
        let workers = self.workers.min(total.max(1));
        info!(sources = total, workers, "Dispatching refresh jobs");

        for worker_id in 0..workers {
            tokio::spawn(run_worker(
                worker_id,
                Arc::clone(&jobs),
                result_tx.clone(),
                Arc::clone(&metadata),
                self.per_source_limit,
                self.source_timeout,
            ));
        }

        result_rx
    }
}

async fn run_worker(
    worker_id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<SourceRef>>>,
    results: mpsc::Sender<SourceResult>,
    metadata: Arc<dyn MetadataSource>,
    limit: usize,
    timeout: Duration,
) {
    debug!(worker_id, "Refresh worker started");

    loop {
        let next = jobs.lock().await.recv().await;
        let Some(source) = next else {
            break;
        };

        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, metadata.latest(&source, limit)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::internal(format!(
                "timed out after {}s",
                timeout.as_secs()
            ))),
        };
        let elapsed = started.elapsed();

        match &outcome {
            Ok(records) => debug!(
                worker_id,
                source = %source.name,
                records = records.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Source refreshed"
            ),
            Err(e) => warn!(
                worker_id,
                source = %source.name,
                error = %e,
                "Source refresh failed"
            ),
        }

        if results
            .send(SourceResult {
                source,
                outcome,
                elapsed,
            })
            .await
            .is_err()
        {
            break;
        }
    }

    debug!(worker_id, "Refresh worker stopped");
}
