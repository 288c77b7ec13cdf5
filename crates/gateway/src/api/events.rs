//! Live session updates over SSE — `GET /v1/events/:slug`.
//!
//! Subscribers receive `update` events carrying the transcript,
//! changelog, and roll deltas each commit or roll wrote, in commit
//! order. Subscribing never creates a writer. A client that misses
//! events (lag, reconnect) reconciles by re-reading the logs with
//! `?cursor=`; the stream itself never replays.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::stream::Stream;

use tf_engine::SessionUpdate;

use crate::api::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn session_events_sse(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<impl IntoResponse> {
    // Unknown sessions 404 instead of waiting silently forever.
    if !state.storage.session_exists(&slug)? {
        return Err(ApiError(tf_domain::Error::SessionMissing(slug)));
    }

    let rx = state.engine.bus().subscribe(&slug);
    let stream = make_update_stream(rx);

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn make_update_stream(
    mut rx: tokio::sync::broadcast::Receiver<SessionUpdate>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(update) => {
                    let data = serde_json::to_string(&update).unwrap_or_default();
                    yield Ok(Event::default().event("update").data(data));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    // Tell the client to reconcile via the log cursors.
                    let msg = format!("{{\"warning\":\"missed {n} events\"}}");
                    yield Ok(Event::default().event("warning").data(msg));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    }
}
