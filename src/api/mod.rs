mod base;
mod webhooks;

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    error_handling::HandleErrorLayer, http::StatusCode, response::IntoResponse, routing, Router,
};
use tokio::time::Duration;
use tower::{BoxError, ServiceBuilder};
use tower_http::trace::TraceLayer;

pub mod paths;

pub use base::AboutResponse;
pub use webhooks::{DestinationQuery, EnqueueRequest};

use crate::dispatcher::DispatcherHandle;
use crate::error::Result;
use crate::notifier::MemoryNotifier;

/// Shared by every handler
#[derive(Clone, Debug)]
pub struct AppState {
    pub dispatcher: DispatcherHandle,
    pub notifier: Arc<MemoryNotifier>,
}

/// Build the API around a running dispatcher
pub async fn api(state: AppState) -> Result<Router> {
    let api = Router::new()
        .route(paths::base::ROOT, routing::get(base::root))
        .route(paths::base::HEALTH, routing::get(base::health))
        .route(paths::base::ABOUT, routing::get(base::about))
        // Producers
        .route(paths::webhooks::ENQUEUE, routing::post(webhooks::enqueue))
        // Configuration collaborator
        .route(paths::webhooks::CONFIG, routing::put(webhooks::apply_config))
        // Inspection
        .route(paths::webhooks::DESTINATIONS, routing::get(webhooks::list_destinations))
        .route(paths::webhooks::DESTINATION, routing::get(webhooks::get_destination))
        .route(paths::NOTIFICATIONS, routing::get(webhooks::notifications))
        .layer(
            ServiceBuilder::new()
                // Handle errors from middleware
                .layer(HandleErrorLayer::new(handle_error))
                .load_shed()
                .timeout(Duration::from_secs(10)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(api)
}

async fn handle_error(error: BoxError) -> impl IntoResponse {
    if error.is::<tower::timeout::error::Elapsed>() {
        return (StatusCode::REQUEST_TIMEOUT, Cow::from("request timed out"));
    }

    if error.is::<tower::load_shed::error::Overloaded>() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Cow::from("service is overloaded, try again later"),
        );
    }

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Cow::from(format!("Unhandled internal error: {}", error)),
    )
}
