//! Media streaming module.
//!
//! Serves cached and in-flight files over HTTP range requests.
//!
//! # Routes
//!
//! - `GET /stream/{resource_id}?quality=Q` - cache hit or buffered fetch, then byte ranges

mod partial;
mod playback;

pub use partial::{content_type_for, parse_range, serve, RangeSpec, ServeSource};
pub use playback::{stream_resource, StreamQuery};
pub(crate) use playback::quality_or_default;

use axum::{routing::get, Router};

use crate::server::AppContext;

/// Create the streaming router.
pub fn stream_router() -> Router<AppContext> {
    Router::new().route("/:resource_id", get(stream_resource))
}
