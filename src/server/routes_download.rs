//! Download control and progress routes.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use mediastash_common::{ProgressEvent, Quality, ResourceId};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{error::AppError, AppContext};
use crate::downloads::{DownloadManager, StartOutcome};
use crate::events::Subscription;
use crate::streaming::quality_or_default;

pub fn download_routes() -> Router<AppContext> {
    Router::new()
        .route("/download/:resource_id", post(start_download))
        .route("/download/:resource_id/status", get(download_status))
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub quality: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadResponse {
    /// `started` for a new or joined fetch, `complete` for a cache hit.
    pub status: String,
    pub quality: Quality,
    pub buffer_threshold: u64,
}

/// Start (or join) a fetch without waiting for any bytes.
pub async fn start_download(
    State(ctx): State<AppContext>,
    Path(resource_id): Path<String>,
    body: Option<Json<DownloadRequest>>,
) -> Result<Json<DownloadResponse>, AppError> {
    let resource: ResourceId = resource_id.parse()?;
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let quality = quality_or_default(request.quality.as_deref())?;

    let status = match ctx.downloads.start_or_join(&resource, quality)? {
        StartOutcome::Cached(_) => "complete",
        StartOutcome::Started(_) | StartOutcome::Joined(_) => "started",
    };

    Ok(Json(DownloadResponse {
        status: status.to_string(),
        quality,
        buffer_threshold: quality.buffer_threshold(),
    }))
}

struct StatusStream {
    snapshot: Option<BTreeMap<Quality, ProgressEvent>>,
    subscription: Subscription,
    downloads: Arc<DownloadManager>,
    shutdown: CancellationToken,
    done: bool,
}

/// Server-sent progress for every tracked quality of a resource.
///
/// The first event is a `snapshot` of what is in flight. `progress` events
/// follow until a terminal event leaves nothing in flight for the resource.
pub async fn download_status(
    State(ctx): State<AppContext>,
    Path(resource_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let resource: ResourceId = resource_id.parse()?;

    // Subscribe before taking the snapshot so nothing falls in between.
    let subscription = ctx.events.subscribe(&resource);
    let snapshot = ctx.downloads.status(&resource);
    tracing::debug!(
        resource_id = %resource,
        tracked = snapshot.len(),
        "Progress stream opened"
    );

    let state = StatusStream {
        snapshot: Some(snapshot),
        subscription,
        downloads: Arc::clone(&ctx.downloads),
        shutdown: ctx.shutdown.clone(),
        done: false,
    };

    let events = stream::unfold(state, |mut s| async move {
        if s.done {
            return None;
        }
        if let Some(snapshot) = s.snapshot.take() {
            return Some((Ok(sse_event("snapshot", &snapshot)), s));
        }

        let event = tokio::select! {
            biased;
            event = s.subscription.recv() => event,
            _ = s.shutdown.cancelled() => None,
        }?;
        if event.is_terminal() && s.downloads.status(s.subscription.resource()).is_empty() {
            s.done = true;
        }
        Some((Ok(sse_event("progress", &event)), s))
    });

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}

fn sse_event<T: Serialize>(name: &str, payload: &T) -> Event {
    let data = serde_json::to_string(payload)
        .unwrap_or_else(|e| format!(r#"{{"error": "serialization failed: {}"}}"#, e));
    Event::default().event(name).data(data)
}
