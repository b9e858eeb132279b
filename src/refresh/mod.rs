//! Periodic refresh of tracked upstream sources.
//!
//! The [`RefreshScheduler`] asks a [`SourceCatalog`] for the sources, fans
//! them out over a [`RefreshPool`], and hands each source's records to a
//! [`RecordSink`].

mod pool;
mod scheduler;
pub mod source;

pub use pool::{RefreshPool, SourceResult};
pub use scheduler::{RefreshReport, RefreshScheduler, SourceError};
pub use source::{
    ConfigCatalog, JsonFileSink, MetadataSource, RecordSink, SourceCatalog, YtDlpMetadataSource,
};

use std::sync::Arc;

use crate::config::Config;

/// Build the scheduler wired to the config file and yt-dlp.
pub fn scheduler_from_config(config: &Config) -> RefreshScheduler {
    let refresh = &config.refresh;
    RefreshScheduler::new(
        Arc::new(ConfigCatalog::new(refresh.sources.clone())),
        Arc::new(YtDlpMetadataSource::new(&config.tools, refresh.source_timeout())),
        Arc::new(JsonFileSink::new(refresh.records_path.clone())),
        RefreshPool::new(refresh.workers, refresh.per_source_limit, refresh.source_timeout()),
        refresh.interval(),
    )
}
