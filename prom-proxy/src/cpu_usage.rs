use crate::{error::ApiError, state::AppState};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};

#[derive(Debug, Serialize)]
pub struct CpuUsageResponse {
    pub average_cpu_usage: f64,
}

#[derive(Debug, Serialize)]
pub struct CpuLoadResponse {
    pub average_cpu_load: BTreeMap<String, f64>,
}

fn parse_window(seconds: &str) -> Result<u64, ApiError> {
    seconds
        .parse()
        .map_err(|_| ApiError::InvalidDuration(seconds.to_string()))
}

pub async fn cpu_usage_handler(
    State(state): State<Arc<AppState>>,
    Path((seconds, container)): Path<(String, String)>,
) -> Result<Json<CpuUsageResponse>, ApiError> {
    let window = parse_window(&seconds)?;
    debug!(%container, window, "Received cpu_usage request");

    let average_cpu_usage = state
        .prometheus
        .average_cpu_usage(&container, window)
        .await
        .map_err(|e| {
            error!(%container, "CPU usage query failed: {}", e);
            e
        })?;
    Ok(Json(CpuUsageResponse { average_cpu_usage }))
}

pub async fn cpu_load_handler(
    State(state): State<Arc<AppState>>,
    Path((seconds, prefix)): Path<(String, String)>,
) -> Result<Json<CpuLoadResponse>, ApiError> {
    let window = parse_window(&seconds)?;
    debug!(%prefix, window, "Received cpu_load request");

    let average_cpu_load = state
        .prometheus
        .average_cpu_load_by_prefix(&prefix, window)
        .await?;
    Ok(Json(CpuLoadResponse { average_cpu_load }))
}
