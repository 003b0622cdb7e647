pub use crate::cpu_usage::{cpu_load_handler, cpu_usage_handler};

use crate::{auth::require_api_key, state::AppState};
use axum::{middleware, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub fn router(state: Arc<AppState>) -> Router {
    // Query routes sit behind the API key gate; health stays open
    let queries = Router::new()
        .route("/cpu_usage/:seconds/:container", get(cpu_usage_handler))
        .route("/cpu_load/:seconds/:prefix", get(cpu_load_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health_handler))
        .merge(queries)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
