//! Wire types shared between the ledger, the broadcaster and the HTTP layer.
//!
//! Status enums serialize in lowercase; structs use camelCase field names
//! since they are consumed by browser clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::Quality;

/// Lifecycle state of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Bytes are being fetched into the temp file.
    #[default]
    Fetching,
    /// The fetch tool is finalizing the container.
    Muxing,
    /// The file has been moved into the cache.
    Complete,
    /// The fetch failed.
    Error,
}

impl DownloadStatus {
    /// `complete` and `error` end a download; everything else is incremental.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetching => write!(f, "fetching"),
            Self::Muxing => write!(f, "muxing"),
            Self::Complete => write!(f, "complete"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A progress update for one quality of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub quality: Quality,
    /// 0-100. Zero while the total size is unknown.
    pub percent: f64,
    pub bytes_written: u64,
    /// Best known estimate of the final size; zero if unknown.
    pub bytes_total: u64,
    pub status: DownloadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    /// Build an incremental or terminal event from counters.
    pub fn new(quality: Quality, status: DownloadStatus, bytes_written: u64, bytes_total: u64) -> Self {
        Self {
            quality,
            percent: percent_of(bytes_written, bytes_total),
            bytes_written,
            bytes_total,
            status,
            error: None,
        }
    }

    /// Terminal success event.
    pub fn complete(quality: Quality, bytes: u64) -> Self {
        let mut event = Self::new(quality, DownloadStatus::Complete, bytes, bytes);
        event.percent = 100.0;
        event
    }

    /// Terminal failure event.
    pub fn failed(quality: Quality, bytes_written: u64, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(quality, DownloadStatus::Error, bytes_written, 0)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

fn percent_of(written: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((written as f64 / total as f64) * 100.0).min(100.0)
}

/// An upstream source whose latest items the refresh scheduler tracks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub name: String,
    pub url: String,
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.url)
    }
}

/// Metadata for one item produced by a refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub is_short: bool,
}

impl MediaRecord {
    /// Whether a title marks the item as a short-form clip.
    pub fn title_marks_short(title: &str) -> bool {
        title.to_lowercase().contains("#short")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&DownloadStatus::Muxing).unwrap();
        assert_eq!(json, "\"muxing\"");
        assert!(DownloadStatus::Complete.is_terminal());
        assert!(DownloadStatus::Error.is_terminal());
        assert!(!DownloadStatus::Fetching.is_terminal());
        assert!(!DownloadStatus::Muxing.is_terminal());
    }

    #[test]
    fn progress_event_wire_shape() {
        let event = ProgressEvent::new(Quality::P720, DownloadStatus::Fetching, 25, 100);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["quality"], "720");
        assert_eq!(value["bytesWritten"], 25);
        assert_eq!(value["bytesTotal"], 100);
        assert_eq!(value["percent"], 25.0);
        assert_eq!(value["status"], "fetching");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn percent_is_zero_without_total_and_capped() {
        assert_eq!(
            ProgressEvent::new(Quality::P360, DownloadStatus::Fetching, 10, 0).percent,
            0.0
        );
        assert_eq!(
            ProgressEvent::new(Quality::P360, DownloadStatus::Fetching, 200, 100).percent,
            100.0
        );
    }

    #[test]
    fn failed_event_carries_message() {
        let event = ProgressEvent::failed(Quality::P1080, 42, "exit status 1");
        assert!(event.is_terminal());
        assert_eq!(event.status, DownloadStatus::Error);
        assert_eq!(event.error.as_deref(), Some("exit status 1"));
        assert_eq!(event.bytes_written, 42);
    }

    #[test]
    fn shorts_detection_is_case_insensitive() {
        assert!(MediaRecord::title_marks_short("Quick tip #Shorts"));
        assert!(!MediaRecord::title_marks_short("A long documentary"));
    }
}
