//! Periodic refresh of every tracked source.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::pool::RefreshPool;
use super::source::{MetadataSource, RecordSink, SourceCatalog};

/// A source whose refresh failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceError {
    pub source: String,
    pub message: String,
}

/// Tally of one refresh run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub sources_processed: usize,
    pub records_saved: usize,
    pub errors: Vec<SourceError>,
    pub elapsed_ms: u64,
}

pub struct RefreshScheduler {
    catalog: Arc<dyn SourceCatalog>,
    metadata: Arc<dyn MetadataSource>,
    sink: Arc<dyn RecordSink>,
    pool: RefreshPool,
    interval: Duration,
    /// Serializes scheduled and on-demand runs.
    running: Mutex<()>,
}

impl RefreshScheduler {
    pub fn new(
        catalog: Arc<dyn SourceCatalog>,
        metadata: Arc<dyn MetadataSource>,
        sink: Arc<dyn RecordSink>,
        pool: RefreshPool,
        interval: Duration,
    ) -> Self {
        Self {
            catalog,
            metadata,
            sink,
            pool,
            interval,
            running: Mutex::new(()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Refresh every source once.
    ///
    /// A failing source is recorded in the report and does not stop the
    /// others. If the catalog itself fails the report is empty.
    pub async fn run_once(&self) -> RefreshReport {
        let _guard = self.running.lock().await;
        let started = Instant::now();
        let mut report = RefreshReport::default();

        let sources = match self.catalog.sources().await {
            Ok(sources) => sources,
            Err(e) => {
                error!(error = %e, "Failed to list sources; skipping refresh");
                report.elapsed_ms = started.elapsed().as_millis() as u64;
                return report;
            }
        };
        if sources.is_empty() {
            info!("No sources to refresh");
            return report;
        }
        info!(sources = sources.len(), workers = self.pool.workers(), "Starting refresh");

        let mut results = self.pool.dispatch(sources, Arc::clone(&self.metadata));
        while let Some(result) = results.recv().await {
            report.sources_processed += 1;
            let name = result.source.name.clone();

            let saved = match result.outcome {
                Ok(records) => self.sink.save(&result.source, &records).await,
                Err(e) => Err(e),
            };
            match saved {
                Ok(count) => {
                    report.records_saved += count;
                    info!(
                        source = %name,
                        records = count,
                        elapsed_ms = result.elapsed.as_millis() as u64,
                        "Refreshed source"
                    );
                }
                Err(e) => {
                    warn!(source = %name, error = %e, "Refresh failed for source");
                    report.errors.push(SourceError {
                        source: name,
                        message: e.to_string(),
                    });
                }
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            sources = report.sources_processed,
            records = report.records_saved,
            errors = report.errors.len(),
            elapsed_ms = report.elapsed_ms,
            "Refresh complete"
        );
        report
    }

    /// Run immediately, then every interval, until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs(), "Refresh scheduler started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = self.run_once() => {}
                        }
                    }
                }
            }

            info!("Refresh scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::source::ConfigCatalog;
    use async_trait::async_trait;
    use mediastash_common::{Error, MediaRecord, Result, SourceRef};
    use parking_lot::Mutex as SyncMutex;

    struct Fixed;

    #[async_trait]
    impl MetadataSource for Fixed {
        async fn latest(&self, source: &SourceRef, _limit: usize) -> Result<Vec<MediaRecord>> {
            if source.name == "broken" {
                return Err(Error::tool("yt-dlp", "exit status 1"));
            }
            Ok(vec![MediaRecord {
                id: format!("{}-1", source.name),
                title: "t".into(),
                url: source.url.clone(),
                channel_name: None,
                duration_secs: None,
                published_at: None,
                thumbnail: None,
                is_short: false,
            }])
        }
    }

    #[derive(Default)]
    struct Collect(SyncMutex<Vec<String>>);

    #[async_trait]
    impl RecordSink for Collect {
        async fn save(&self, _source: &SourceRef, records: &[MediaRecord]) -> Result<usize> {
            self.0.lock().extend(records.iter().map(|r| r.id.clone()));
            Ok(records.len())
        }
    }

    struct BrokenCatalog;

    #[async_trait]
    impl SourceCatalog for BrokenCatalog {
        async fn sources(&self) -> Result<Vec<SourceRef>> {
            Err(Error::internal("catalog unavailable"))
        }
    }

    fn source(name: &str) -> SourceRef {
        SourceRef {
            name: name.into(),
            url: format!("https://example.com/{name}"),
        }
    }

    #[tokio::test]
    async fn failing_source_does_not_stop_others() {
        let sink = Arc::new(Collect::default());
        let scheduler = RefreshScheduler::new(
            Arc::new(ConfigCatalog::new(vec![source("a"), source("broken"), source("b")])),
            Arc::new(Fixed),
            sink.clone(),
            RefreshPool::new(2, 5, Duration::from_secs(5)),
            Duration::from_secs(3600),
        );

        let report = scheduler.run_once().await;
        assert_eq!(report.sources_processed, 3);
        assert_eq!(report.records_saved, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].source, "broken");

        let mut ids = sink.0.lock().clone();
        ids.sort();
        assert_eq!(ids, vec!["a-1".to_string(), "b-1".to_string()]);
    }

    #[tokio::test]
    async fn catalog_failure_yields_empty_report() {
        let scheduler = RefreshScheduler::new(
            Arc::new(BrokenCatalog),
            Arc::new(Fixed),
            Arc::new(Collect::default()),
            RefreshPool::new(2, 5, Duration::from_secs(5)),
            Duration::from_secs(3600),
        );
        let report = scheduler.run_once().await;
        assert_eq!(report.sources_processed, 0);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn spawned_scheduler_runs_immediately_and_stops() {
        let sink = Arc::new(Collect::default());
        let scheduler = Arc::new(RefreshScheduler::new(
            Arc::new(ConfigCatalog::new(vec![source("a")])),
            Arc::new(Fixed),
            sink.clone(),
            RefreshPool::new(1, 5, Duration::from_secs(5)),
            Duration::from_secs(3600),
        ));
        let shutdown = CancellationToken::new();
        let handle = scheduler.spawn(shutdown.clone());

        for _ in 0..50 {
            if !sink.0.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.0.lock().len(), 1);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
