//! Serving byte ranges of a file that may still be growing.
//!
//! The available length comes from the ledger's counter for an in-flight
//! download and from the file size for a completed entry. A filesystem stat
//! of a file being written can run ahead of what has been flushed, so it is
//! never consulted for in-flight data.

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::Response,
};
use futures::Stream;
use mediastash_common::{DownloadStatus, Error, Result};
use std::io::SeekFrom;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::cache::{CacheEntry, CacheLease};
use crate::downloads::Download;

/// Interpretation of a `Range` header against the available length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// No usable range; serve everything available.
    Full,
    /// Inclusive byte window, already clamped to the available length.
    Partial { start: u64, end: u64 },
    /// Starts at or past the available length.
    Unsatisfiable,
}

/// Parse a `Range` header.
///
/// Supports formats:
/// - bytes=0-499
/// - bytes=500-
/// - bytes=-500 (last 500 bytes)
///
/// Missing, malformed and multi-range headers are served as [`RangeSpec::Full`].
/// A bounded range ending past `available` is clamped for a complete file;
/// while the file is `growing` those bytes do not exist yet, so the range is
/// unsatisfiable and the client retries later.
pub fn parse_range(header: Option<&str>, available: u64, growing: bool) -> RangeSpec {
    let Some(spec) = header.and_then(|h| h.trim().strip_prefix("bytes=")) else {
        return RangeSpec::Full;
    };
    if spec.contains(',') {
        return RangeSpec::Full;
    }
    let Some((start, end)) = spec.split_once('-') else {
        return RangeSpec::Full;
    };
    let (start, end) = (start.trim(), end.trim());

    match (start.is_empty(), end.is_empty()) {
        (true, false) => {
            let Ok(suffix_len) = end.parse::<u64>() else {
                return RangeSpec::Full;
            };
            if suffix_len == 0 || available == 0 {
                return RangeSpec::Unsatisfiable;
            }
            RangeSpec::Partial {
                start: available.saturating_sub(suffix_len),
                end: available - 1,
            }
        }
        (false, true) => match start.parse::<u64>() {
            Ok(start) if start >= available => RangeSpec::Unsatisfiable,
            Ok(start) => RangeSpec::Partial {
                start,
                end: available - 1,
            },
            Err(_) => RangeSpec::Full,
        },
        (false, false) => match (start.parse::<u64>(), end.parse::<u64>()) {
            (Ok(start), Ok(end)) if start > end => RangeSpec::Full,
            (Ok(start), Ok(_)) if start >= available => RangeSpec::Unsatisfiable,
            (Ok(_), Ok(end)) if growing && end >= available => RangeSpec::Unsatisfiable,
            (Ok(start), Ok(end)) => RangeSpec::Partial {
                start,
                end: end.min(available - 1),
            },
            _ => RangeSpec::Full,
        },
        (true, true) => RangeSpec::Full,
    }
}

/// Determine content type from a file extension.
pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "ts" => "video/mp2t",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "opus" | "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}

/// What to serve bytes from.
#[derive(Debug, Clone)]
pub enum ServeSource {
    Cached(CacheEntry),
    InFlight(Arc<Download>),
}

impl ServeSource {
    pub fn is_growing(&self) -> bool {
        match self {
            Self::Cached(_) => false,
            Self::InFlight(download) => download.status() != DownloadStatus::Complete,
        }
    }

    /// Bytes that are safe to read right now.
    pub fn available_length(&self) -> u64 {
        match self {
            Self::Cached(entry) => entry.size_bytes,
            Self::InFlight(download) => download.bytes_written(),
        }
    }

    async fn open(&self) -> Result<File> {
        match self {
            Self::Cached(entry) => Ok(File::open(&entry.path).await?),
            Self::InFlight(download) => match File::open(download.readable_path()).await {
                Ok(file) => Ok(file),
                // The fetch may have renamed temp to final since we looked.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    match File::open(download.final_path()).await {
                        Ok(file) => Ok(file),
                        Err(_) if download.status() == DownloadStatus::Error => Err(Error::fetch(
                            download.key(),
                            download.error().unwrap_or_else(|| "fetch failed".to_string()),
                        )),
                        Err(_) => Err(Error::not_found(download.key().to_string())),
                    }
                }
                Err(e) => Err(e.into()),
            },
        }
    }
}

/// Build the response for `range` over `source`.
///
/// The lease is held until the body has been fully sent or dropped.
pub async fn serve(
    source: ServeSource,
    lease: CacheLease,
    range: Option<&str>,
    content_type: &'static str,
) -> Result<Response> {
    let available = source.available_length();
    let spec = parse_range(range, available, source.is_growing());

    let (status, start, length) = match spec {
        RangeSpec::Unsatisfiable => return Err(Error::RangeNotSatisfiable { available }),
        RangeSpec::Full => (StatusCode::OK, 0, available),
        RangeSpec::Partial { start, end } => (StatusCode::PARTIAL_CONTENT, start, end - start + 1),
    };

    let mut file = source.open().await?;
    if start > 0 {
        file.seek(SeekFrom::Start(start)).await?;
    }
    debug!(key = %lease.key(), start, length, available, "Serving bytes");

    let body = Body::from_stream(LeasedStream {
        inner: ReaderStream::new(file.take(length)),
        _lease: lease,
    });

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, length.to_string())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "no-cache");
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, start + length - 1, available),
        );
    }
    builder
        .body(body)
        .map_err(|e| Error::internal(format!("failed to build response: {e}")))
}

/// A body stream that keeps a cache lease alive until it is dropped.
struct LeasedStream<S> {
    inner: S,
    _lease: CacheLease,
}

impl<S: Stream + Unpin> Stream for LeasedStream<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
