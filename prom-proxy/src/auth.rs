use crate::{api_key::ApiKeyStore, error::ApiError, state::AppState};
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub enum AuthGate {
    Disabled,
    Enabled(Arc<ApiKeyStore>),
}

impl AuthGate {
    /// Resolves the key up front so file errors surface before serving traffic.
    pub fn bootstrap(&self) -> Result<(), ApiError> {
        if let AuthGate::Enabled(store) = self {
            store.get_or_generate()?;
        }
        Ok(())
    }

    fn check(&self, header: Option<&[u8]>) -> Result<(), ApiError> {
        let store = match self {
            AuthGate::Disabled => return Ok(()),
            AuthGate::Enabled(store) => store,
        };
        let api_key = store.get_or_generate()?;

        let header = header.ok_or(ApiError::Unauthorized("Authorization header is missing"))?;
        let header = std::str::from_utf8(header)
            .map_err(|_| ApiError::Unauthorized("Invalid Authorization header format"))?;

        // Expect exactly "Bearer <token>"
        let parts: Vec<&str> = header.split(' ').collect();
        if parts.len() != 2 || parts[0] != "Bearer" {
            return Err(ApiError::Unauthorized("Invalid Authorization header format"));
        }

        if parts[1].as_bytes() != api_key.as_bytes() {
            return Err(ApiError::Unauthorized("Unauthorized"));
        }
        Ok(())
    }
}

/// Rejects requests without a matching bearer token when the gate is enabled.
pub async fn require_api_key<B>(
    State(state): State<Arc<AppState>>,
    req: Request<B>,
    next: Next<B>,
) -> Response {
    let header = req.headers().get(AUTHORIZATION).map(|v| v.as_bytes());
    match state.auth.check(header) {
        Ok(()) => next.run(req).await,
        Err(e) => {
            match &e {
                ApiError::Unauthorized(reason) => {
                    warn!(path = %req.uri().path(), reason, "Rejected request");
                }
                other => error!("API key lookup failed: {}", other),
            }
            e.into_response()
        }
    }
}
