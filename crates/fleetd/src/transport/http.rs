// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the device interaction API.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enrollment::{self, StartEnrollmentRequest};
use crate::error::FleetError;
use crate::events::DeviceInfoPayload;
use crate::hub::Channel;
use crate::info::{self, TestDeviceResult};
use crate::pipeline::IngestionSummary;
use crate::repo::model::{DeviceId, EnrollmentSession, StudentId};
use crate::state::AppState;
use crate::sync;
use crate::transport::auth::require_tenant;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub subscribers: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct TestDeviceRequest {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub synced: bool,
}

#[derive(Debug, Serialize)]
pub struct OnDeviceResponse {
    pub on_device: bool,
}

#[derive(Debug, Serialize)]
pub struct EnrolledFingersResponse {
    pub fingers: Vec<u8>,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let mut subscribers = 0;
    for channel in Channel::ALL {
        subscribers += state.hub.count(channel, None).await;
    }
    Json(HealthResponse {
        status: "running".to_owned(),
        subscribers,
    })
}

/// `GET /api/v1/devices/{id}/info`
pub async fn device_info(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<DeviceId>,
    headers: HeaderMap,
) -> Result<Json<DeviceInfoPayload>, FleetError> {
    let tenant = require_tenant(&headers)?;
    Ok(Json(info::get_device_info(&state, tenant, device_id).await?))
}

/// `POST /api/v1/devices/{id}/test?timeout_secs=`
pub async fn test_device(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<DeviceId>,
    Query(request): Query<TestDeviceRequest>,
    headers: HeaderMap,
) -> Result<Json<TestDeviceResult>, FleetError> {
    let tenant = require_tenant(&headers)?;
    let timeout = request.timeout_secs.map(Duration::from_secs);
    Ok(Json(info::test_device(&state, tenant, device_id, timeout).await?))
}

/// `POST /api/v1/devices/{id}/attendance/ingest`
pub async fn ingest_attendance(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<DeviceId>,
    headers: HeaderMap,
) -> Result<Json<IngestionSummary>, FleetError> {
    let tenant = require_tenant(&headers)?;
    let summary = state.pipeline().ingest_for_device(tenant, device_id).await?;
    Ok(Json(summary))
}

/// `POST /api/v1/devices/{id}/enrollment`
pub async fn start_enrollment(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<DeviceId>,
    headers: HeaderMap,
    Json(request): Json<StartEnrollmentRequest>,
) -> Result<(StatusCode, Json<EnrollmentSession>), FleetError> {
    let tenant = require_tenant(&headers)?;
    let session = enrollment::start_enrollment(&state, tenant, device_id, request).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// `POST /api/v1/enrollments/{session_uuid}/cancel`
pub async fn cancel_enrollment(
    State(state): State<Arc<AppState>>,
    Path(session_uuid): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<EnrollmentSession>, FleetError> {
    let tenant = require_tenant(&headers)?;
    Ok(Json(
        enrollment::cancel_enrollment(&state, tenant, session_uuid).await?,
    ))
}

/// `GET /api/v1/devices/{id}/students/{student_id}/fingers`
pub async fn list_enrolled_fingers(
    State(state): State<Arc<AppState>>,
    Path((device_id, student_id)): Path<(DeviceId, StudentId)>,
    headers: HeaderMap,
) -> Result<Json<EnrolledFingersResponse>, FleetError> {
    let tenant = require_tenant(&headers)?;
    let fingers =
        enrollment::list_enrolled_fingers(&state, tenant, device_id, student_id).await?;
    Ok(Json(EnrolledFingersResponse { fingers }))
}

/// `DELETE /api/v1/devices/{id}/students/{student_id}/fingers/{finger}`
pub async fn delete_fingerprint(
    State(state): State<Arc<AppState>>,
    Path((device_id, student_id, finger)): Path<(DeviceId, StudentId, u8)>,
    headers: HeaderMap,
) -> Result<StatusCode, FleetError> {
    let tenant = require_tenant(&headers)?;
    enrollment::delete_fingerprint(&state, tenant, device_id, student_id, finger).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/v1/devices/{id}/students/{student_id}/sync`
pub async fn sync_student(
    State(state): State<Arc<AppState>>,
    Path((device_id, student_id)): Path<(DeviceId, StudentId)>,
    headers: HeaderMap,
) -> Result<Json<SyncResponse>, FleetError> {
    let tenant = require_tenant(&headers)?;
    sync::sync_student_to_device(&state, tenant, student_id, device_id).await?;
    Ok(Json(SyncResponse { synced: true }))
}

/// `GET /api/v1/devices/{id}/students/{student_id}/sync`
pub async fn check_student(
    State(state): State<Arc<AppState>>,
    Path((device_id, student_id)): Path<(DeviceId, StudentId)>,
    headers: HeaderMap,
) -> Result<Json<OnDeviceResponse>, FleetError> {
    let tenant = require_tenant(&headers)?;
    let on_device = sync::check_student_on_device(&state, tenant, student_id, device_id).await?;
    Ok(Json(OnDeviceResponse { on_device }))
}
