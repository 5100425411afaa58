use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{event, instrument, Level};

use super::AppState;
use crate::api_error;
use crate::error::RelayError;
use crate::notifier::NotificationsSnapshot;
use crate::registry::DestinationSnapshot;
use crate::settings::{validate_destination_url, RelayConfig};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub url: String,
    pub payload: Value,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rate_limit: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DestinationQuery {
    pub url: String,
}

/// Always accepted once queued; the outcome shows up under notifications
#[instrument(skip(state, request), fields(url = %request.url), level = "debug")]
pub async fn enqueue(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> Result<StatusCode, RelayError> {
    validate_destination_url(&request.url)?;
    if !request.payload.is_object() {
        return Err(api_error!("payload must be a JSON object"));
    }
    state
        .dispatcher
        .enqueue_with(request.url, request.payload, request.name, request.rate_limit)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

#[instrument(skip(state, config), level = "debug")]
pub async fn apply_config(
    State(state): State<AppState>,
    Json(config): Json<RelayConfig>,
) -> Result<StatusCode, RelayError> {
    config.validate()?;
    state.dispatcher.apply_config(config).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state), level = "debug")]
pub async fn list_destinations(
    State(state): State<AppState>,
) -> Result<Json<Vec<DestinationSnapshot>>, StatusCode> {
    state
        .dispatcher
        .destinations()
        .await
        .map_err(|err| {
            event!(
                Level::ERROR,
                message = "Failed listing destinations",
                err = format!("{:?}", err)
            );
            StatusCode::SERVICE_UNAVAILABLE
        })
        .map(Json)
}

#[instrument(skip(state), level = "debug")]
pub async fn get_destination(
    Query(query): Query<DestinationQuery>,
    State(state): State<AppState>,
) -> Result<Json<DestinationSnapshot>, StatusCode> {
    let snapshot = state
        .dispatcher
        .destination(query.url)
        .await
        .map_err(|err| {
            event!(
                Level::ERROR,
                message = "Failed reading destination",
                err = format!("{:?}", err)
            );
            StatusCode::SERVICE_UNAVAILABLE
        })?;
    snapshot.map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[instrument(skip(state), level = "debug")]
pub async fn notifications(State(state): State<AppState>) -> Json<NotificationsSnapshot> {
    Json(state.notifier.snapshot())
}
