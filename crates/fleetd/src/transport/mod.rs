// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the fleet daemon.
//!
//! This is a thin wrapper: authentication token issuance and tenant
//! administration live in the host platform's gateway, which forwards the
//! tenant id on every request.

pub mod auth;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Build the axum `Router` with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(http::health))
        // Device operations
        .route("/api/v1/devices/{id}/info", get(http::device_info))
        .route("/api/v1/devices/{id}/test", post(http::test_device))
        .route("/api/v1/devices/{id}/attendance/ingest", post(http::ingest_attendance))
        // Enrollment
        .route("/api/v1/devices/{id}/enrollment", post(http::start_enrollment))
        .route("/api/v1/enrollments/{session_uuid}/cancel", post(http::cancel_enrollment))
        .route(
            "/api/v1/devices/{id}/students/{student_id}/fingers",
            get(http::list_enrolled_fingers),
        )
        .route(
            "/api/v1/devices/{id}/students/{student_id}/fingers/{finger}",
            delete(http::delete_fingerprint),
        )
        // Student sync
        .route(
            "/api/v1/devices/{id}/students/{student_id}/sync",
            post(http::sync_student).get(http::check_student),
        )
        // Live streams, one endpoint per broadcast channel
        .route("/ws/device-status", get(ws::device_status))
        .route("/ws/device-info", get(ws::device_info))
        .route("/ws/enrollment", get(ws::enrollment))
        .route("/ws/attendance", get(ws::attendance))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
