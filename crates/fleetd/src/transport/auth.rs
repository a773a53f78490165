// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::{ErrorBody, ErrorResponse, FleetError};
use crate::repo::model::TenantId;
use crate::state::AppState;

/// Static bearer token check for `/api/*` routes. WebSocket upgrades carry
/// the token as a query parameter and validate in their handlers; the health
/// endpoint stays open.
pub async fn auth_layer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if let Some(expected) = state.config.auth_token.as_deref() {
        if path.starts_with("/api/") && path != "/api/v1/health" {
            let provided = request
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "));
            if provided != Some(expected) {
                return unauthorized();
            }
        }
    }
    next.run(request).await
}

pub fn unauthorized() -> Response {
    let body = ErrorResponse {
        error: ErrorBody {
            code: "UNAUTHORIZED".to_owned(),
            message: "missing or invalid bearer token".to_owned(),
        },
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

/// The gateway forwards the authenticated tenant on every request.
pub fn require_tenant(headers: &HeaderMap) -> Result<TenantId, FleetError> {
    headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| FleetError::BadRequest("missing or invalid X-Tenant-Id header".to_owned()))
}
