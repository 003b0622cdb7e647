use crate::{api_key::KeyStoreError, prometheus::QueryError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            // Bad input is reported like any other failed query
            ApiError::InvalidDuration(_) | ApiError::Query(_) | ApiError::KeyStore(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
