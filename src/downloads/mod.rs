//! Download ledger: in-flight fetches, their buffer gates, and the fetch
//! collaborator they run.

mod download;
pub mod fetcher;
mod manager;

pub use download::{Download, Progress};
pub use fetcher::{FetchPhase, FetchProgress, FetchRequest, Fetcher, ProgressFn, YtDlpFetcher};
pub use manager::{DownloadManager, StartOutcome};
