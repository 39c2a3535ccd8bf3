//! Training endpoint streaming progress as server-sent events

use crate::error::ApiError;
use crate::server::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use tracing::{info, warn};
use trainpipe_core::{ProgressMessage, TrainRequest};

/// Start a training job and stream its progress.
///
/// Request errors are answered with a JSON error body. Once the stream has
/// started, failures arrive as its final `status_type: "error"` event.
/// Closing the connection cancels the job.
pub async fn train(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    request: Result<Json<TrainRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Json(request) = request.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let progress = state.api.train(project_id, request).await?;
    info!(
        "Streaming progress of job {} for project {}",
        progress.job_id(),
        project_id
    );

    let stream = progress
        .into_stream()
        .map(|message| Ok(Event::default().data(encode(&message))));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn encode(message: &ProgressMessage) -> String {
    serde_json::to_string(message).unwrap_or_else(|e| {
        warn!("Failed to encode progress message: {}", e);
        json!({"log": e.to_string(), "status_type": "error"}).to_string()
    })
}
