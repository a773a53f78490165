// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::repo::model::{DeviceId, StudentId};

/// Service-level errors. Device-layer failures of any kind surface as a 503
/// at the ingress boundary; they are operational, not client mistakes.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    #[error("device {0} is offline or unreachable")]
    DeviceOffline(DeviceId),

    #[error("student {0} not found")]
    StudentNotFound(StudentId),

    #[error("enrollment session {0} not found")]
    EnrollmentNotFound(Uuid),

    #[error("enrollment already in progress for device {device_id} finger {finger_index}")]
    EnrollmentInProgress { device_id: DeviceId, finger_index: u8 },

    #[error("enrollment session {0} is not in progress")]
    EnrollmentNotActive(Uuid),

    #[error("enrollment failed: {0}")]
    Enrollment(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Device(#[from] zkproto::ZkError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FleetError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::DeviceNotFound(_) | Self::StudentNotFound(_) | Self::EnrollmentNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::DeviceOffline(_) | Self::Device(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::EnrollmentInProgress { .. } | Self::EnrollmentNotActive(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Enrollment(_) | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::DeviceOffline(_) | Self::Device(_) => "DEVICE_OFFLINE",
            Self::StudentNotFound(_) => "STUDENT_NOT_FOUND",
            Self::EnrollmentNotFound(_) => "ENROLLMENT_NOT_FOUND",
            Self::EnrollmentInProgress { .. } => "ENROLLMENT_IN_PROGRESS",
            Self::EnrollmentNotActive(_) => "ENROLLMENT_NOT_IN_PROGRESS",
            Self::Enrollment(_) => "ENROLLMENT_ERROR",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for FleetError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code().to_owned(),
                message: self.to_string(),
            },
        };
        (self.http_status(), Json(body)).into_response()
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
