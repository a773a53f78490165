// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Enrollment orchestration.
//!
//! `start_enrollment` validates, creates the session row, and spawns the
//! driver task; the task forwards fine-grained driver progress to the
//! enrollment channel and finalizes the row from the terminal outcome.
//! Every terminal state produces exactly one broadcast: a row that is
//! already terminal (an API-side cancel won the race) is left untouched.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use zkproto::enroll::{run_enrollment, EnrollOutcome, EnrollParams, EnrollProgress};

use crate::error::FleetError;
use crate::events::EnrollmentEvent;
use crate::hub::Channel;
use crate::repo::model::{
    Device, DeviceId, EnrollmentSession, EnrollmentStatus, NewEnrollment, NewTemplate, StudentId,
    TenantId,
};
use crate::state::AppState;
use crate::sync::online_device;

/// Default quality score when the summary frame carried no template size.
const DEFAULT_QUALITY: i32 = 85;

#[derive(Debug, Deserialize)]
pub struct StartEnrollmentRequest {
    pub student_id: StudentId,
    pub finger_index: u8,
}

/// Start an interactive enrollment. Returns with the session IN_PROGRESS;
/// capture runs in the background and reports over the enrollment channel.
pub async fn start_enrollment(
    state: &Arc<AppState>,
    tenant: TenantId,
    device_id: DeviceId,
    request: StartEnrollmentRequest,
) -> Result<EnrollmentSession, FleetError> {
    if request.finger_index > 9 {
        return Err(FleetError::BadRequest(format!(
            "finger index {} out of range 0..=9",
            request.finger_index
        )));
    }
    let device = online_device(state, tenant, device_id).await?;
    let known = state
        .students
        .find_existing(tenant, &[request.student_id])
        .await?;
    if !known.contains(&request.student_id) {
        return Err(FleetError::StudentNotFound(request.student_id));
    }
    if state
        .enrollments
        .active_for_finger(device_id, request.finger_index)
        .await?
    {
        return Err(FleetError::EnrollmentInProgress {
            device_id,
            finger_index: request.finger_index,
        });
    }

    let mut session = state
        .enrollments
        .create(NewEnrollment {
            session_uuid: Uuid::new_v4(),
            tenant_id: tenant,
            student_id: request.student_id,
            device_id,
            finger_index: request.finger_index,
        })
        .await?;
    state.enrollments.mark_in_progress(session.id).await?;
    session.status = EnrollmentStatus::InProgress;

    let cancel = state.enroll_cancels.register(session.session_uuid);
    tokio::spawn(run_enrollment_task(
        Arc::clone(state),
        device,
        session.clone(),
        cancel,
    ));

    info!(
        session_uuid = %session.session_uuid,
        student_id = request.student_id,
        device_id,
        finger_index = request.finger_index,
        "enrollment started"
    );
    Ok(session)
}

/// Cancel an in-progress enrollment.
///
/// Sets the driver's cancel flag (observed before its next event wait) and
/// marks the row CANCELLED right away so the caller sees the final state.
/// The driver's own terminal outcome then finds the row terminal and skips.
pub async fn cancel_enrollment(
    state: &AppState,
    tenant: TenantId,
    session_uuid: Uuid,
) -> Result<EnrollmentSession, FleetError> {
    let session = state
        .enrollments
        .get_by_uuid(tenant, session_uuid)
        .await?
        .ok_or(FleetError::EnrollmentNotFound(session_uuid))?;
    if session.status != EnrollmentStatus::InProgress {
        return Err(FleetError::EnrollmentNotActive(session_uuid));
    }

    let had_active_run = state.enroll_cancels.cancel(session_uuid);
    if !had_active_run {
        debug!(%session_uuid, "no active driver for cancelled session");
    }

    state.enrollments.cancel(session.id).await?;
    state
        .hub
        .publish(
            Channel::Enrollment,
            tenant,
            &EnrollmentEvent::EnrollmentCancelled {
                session_id: session_uuid,
                status: "cancelled".to_owned(),
                message: "Enrollment cancelled".to_owned(),
                timestamp: Utc::now(),
            },
        )
        .await;

    state
        .enrollments
        .get_by_uuid(tenant, session_uuid)
        .await?
        .ok_or(FleetError::EnrollmentNotFound(session_uuid))
}

/// Finger indices enrolled for a student on a device. Prefers asking the
/// device; falls back to completed sessions when it is offline.
pub async fn list_enrolled_fingers(
    state: &AppState,
    tenant: TenantId,
    device_id: DeviceId,
    student_id: StudentId,
) -> Result<Vec<u8>, FleetError> {
    let device = state
        .devices
        .get(tenant, device_id)
        .await?
        .ok_or(FleetError::DeviceNotFound(device_id))?;

    if device.status == crate::repo::model::DeviceStatus::Online {
        let user_id = student_id.to_string();
        match state
            .pool
            .with_session(&device, move |session| session.enrolled_finger_indices(&user_id))
            .await
        {
            Ok(fingers) => return Ok(fingers),
            Err(e) => warn!(device_id, err = %e, "device finger listing failed, using database"),
        }
    }
    state
        .enrollments
        .enrolled_finger_indices(tenant, student_id, device_id)
        .await
}

/// Delete one finger's template from the device and revoke the stored copy.
pub async fn delete_fingerprint(
    state: &AppState,
    tenant: TenantId,
    device_id: DeviceId,
    student_id: StudentId,
    finger_index: u8,
) -> Result<(), FleetError> {
    let device = online_device(state, tenant, device_id).await?;
    let user_id = student_id.to_string();
    state
        .pool
        .with_session(&device, move |session| {
            session.delete_user_template(&user_id, finger_index)
        })
        .await?;
    state
        .templates
        .revoke(tenant, student_id, finger_index)
        .await?;
    info!(student_id, device_id, finger_index, "fingerprint deleted");
    Ok(())
}

// -- Driver task --------------------------------------------------------------

/// Map one driver progress event to the `{progress, status, message}` triple
/// the UI protocol uses.
pub fn progress_frame(progress: &EnrollProgress) -> (u8, &'static str, String) {
    match progress {
        EnrollProgress::Started => (
            0,
            "ready",
            "Enrollment started. Place your finger on the scanner.".to_owned(),
        ),
        EnrollProgress::FingerDetected { attempt } => (
            33,
            "placing",
            format!("Finger detected (press {attempt}). Keep your finger steady."),
        ),
        EnrollProgress::FingerProcessed { attempt } => {
            (66, "processing", format!("Finger press {attempt} processed."))
        }
        EnrollProgress::LowQuality { attempt } => (
            66,
            "processing",
            format!("Finger quality low on press {attempt}. Try again."),
        ),
    }
}

async fn run_enrollment_task(
    state: Arc<AppState>,
    device: Device,
    session: EnrollmentSession,
    cancel: Arc<AtomicBool>,
) {
    let tenant = session.tenant_id;
    let session_uuid = session.session_uuid;

    let (tx, mut rx) = mpsc::unbounded_channel::<EnrollProgress>();
    let params = EnrollParams {
        user_id: session.student_id.to_string(),
        finger_index: session.finger_index,
        timeout: state.config.enroll_timeout(),
        max_attempts: state.config.enroll_max_attempts,
    };

    let driver = {
        let pool = Arc::clone(&state.pool);
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            pool.with_session(&device, move |session| {
                let mut emit = move |progress: EnrollProgress| {
                    let _ = tx.send(progress);
                };
                Ok(run_enrollment(session, &params, &cancel, &mut emit))
            })
            .await
        })
    };

    // Forward progress as it arrives; the channel closes when the driver is
    // done with its callback.
    while let Some(progress) = rx.recv().await {
        let (pct, status, message) = progress_frame(&progress);
        state
            .hub
            .publish(
                Channel::Enrollment,
                tenant,
                &EnrollmentEvent::EnrollmentProgress {
                    session_id: session_uuid,
                    progress: pct,
                    status: status.to_owned(),
                    message,
                    timestamp: Utc::now(),
                },
            )
            .await;
    }

    let outcome = match driver.await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => EnrollOutcome::Failed {
            reason: e.to_string(),
        },
        Err(e) => {
            error!(%session_uuid, err = %e, "enrollment driver task failed");
            EnrollOutcome::Failed {
                reason: "enrollment driver task failed".to_owned(),
            }
        }
    };

    finalize(&state, tenant, session_uuid, outcome).await;
    state.enroll_cancels.remove(session_uuid);
}

/// Apply a terminal driver outcome to the session row and broadcast it.
///
/// No-op when the row is already terminal; at most one COMPLETED transition
/// and one terminal broadcast per session can ever happen.
pub async fn finalize(
    state: &AppState,
    tenant: TenantId,
    session_uuid: Uuid,
    outcome: EnrollOutcome,
) {
    let session = match state.enrollments.get_by_uuid(tenant, session_uuid).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            warn!(%session_uuid, "enrollment session vanished before finalize");
            return;
        }
        Err(e) => {
            error!(%session_uuid, err = %e, "failed to load enrollment session for finalize");
            return;
        }
    };
    if session.status.is_terminal() {
        debug!(%session_uuid, status = session.status.as_str(), "session already terminal");
        return;
    }

    match outcome {
        EnrollOutcome::Completed { template, size, .. } => {
            let sealed = state.sealer.seal(&template);
            let quality = if size > 0 { i32::from(size) } else { DEFAULT_QUALITY };
            let completed_at = Utc::now();
            if let Err(e) = state
                .enrollments
                .complete(session.id, Some(&sealed), Some(quality), completed_at)
                .await
            {
                error!(%session_uuid, err = %e, "failed to persist completed enrollment");
                return;
            }
            if let Err(e) = state
                .templates
                .append(NewTemplate {
                    tenant_id: tenant,
                    student_id: session.student_id,
                    device_id: session.device_id,
                    finger_index: session.finger_index,
                    sealed_bytes: sealed,
                    quality: Some(quality),
                    enrollment_id: Some(session.id),
                })
                .await
            {
                warn!(%session_uuid, err = %e, "failed to store canonical template copy");
            }
            state
                .hub
                .publish(
                    Channel::Enrollment,
                    tenant,
                    &EnrollmentEvent::EnrollmentComplete {
                        session_id: session_uuid,
                        progress: 100,
                        status: "complete".to_owned(),
                        message: "Enrollment completed successfully".to_owned(),
                        quality_score: Some(quality),
                        timestamp: Utc::now(),
                    },
                )
                .await;
            info!(%session_uuid, quality, "enrollment completed");
        }
        EnrollOutcome::Cancelled => {
            if let Err(e) = state.enrollments.cancel(session.id).await {
                error!(%session_uuid, err = %e, "failed to persist cancelled enrollment");
            }
            state
                .hub
                .publish(
                    Channel::Enrollment,
                    tenant,
                    &EnrollmentEvent::EnrollmentCancelled {
                        session_id: session_uuid,
                        status: "cancelled".to_owned(),
                        message: "Enrollment cancelled".to_owned(),
                        timestamp: Utc::now(),
                    },
                )
                .await;
            info!(%session_uuid, "enrollment cancelled");
        }
        outcome => {
            let reason = match outcome {
                EnrollOutcome::Duplicate => "This fingerprint is already enrolled".to_owned(),
                EnrollOutcome::Timeout => "Enrollment timeout".to_owned(),
                EnrollOutcome::Failed { reason } => reason,
                EnrollOutcome::Completed { .. } | EnrollOutcome::Cancelled => return,
            };
            if let Err(e) = state.enrollments.fail(session.id, &reason).await {
                error!(%session_uuid, err = %e, "failed to persist failed enrollment");
            }
            state
                .hub
                .publish(
                    Channel::Enrollment,
                    tenant,
                    &EnrollmentEvent::EnrollmentError {
                        session_id: session_uuid,
                        status: "error".to_owned(),
                        error: reason.clone(),
                        timestamp: Utc::now(),
                    },
                )
                .await;
            warn!(%session_uuid, reason, "enrollment did not complete");
        }
    }
}
