//! `GET /api/stream/:resource_id` handler.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    response::Response,
};
use mediastash_common::{CacheKey, Quality, ResourceId};
use serde::Deserialize;
use tracing::debug;

use super::partial::{content_type_for, serve, ServeSource};
use crate::downloads::StartOutcome;
use crate::server::{error::AppError, AppContext};

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub quality: Option<String>,
}

/// Parse an optional quality parameter, defaulting to 720p.
pub(crate) fn quality_or_default(raw: Option<&str>) -> mediastash_common::Result<Quality> {
    match raw.map(str::trim).filter(|q| !q.is_empty()) {
        Some(q) => q.parse(),
        None => Ok(Quality::default()),
    }
}

/// Serve a resource, fetching it first if it is not cached.
///
/// On a miss the request blocks until the quality's buffer threshold has
/// been written, then streams whatever is available. Dropping the request
/// only stops this reader; the fetch keeps running for everyone else.
pub async fn stream_resource(
    State(ctx): State<AppContext>,
    Path(resource_id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let resource: ResourceId = resource_id.parse()?;
    let quality = quality_or_default(query.quality.as_deref())?;
    let key = CacheKey::new(resource.clone(), quality);

    let outcome = ctx.downloads.start_or_join(&resource, quality)?;
    // Must follow start_or_join: a held lease blocks stale-file removal.
    let lease = ctx.cache.lease(&key);

    let source = match outcome {
        StartOutcome::Cached(entry) => ServeSource::Cached(entry),
        StartOutcome::Started(download) | StartOutcome::Joined(download) => {
            download
                .wait_until_ready(ctx.config.downloads.buffer_timeout())
                .await?;
            debug!(
                key = %key,
                bytes_written = download.bytes_written(),
                "Buffer ready"
            );
            ServeSource::InFlight(download)
        }
    };

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());
    let content_type = content_type_for(&ctx.config.cache.extension);

    Ok(serve(source, lease, range, content_type).await?)
}
