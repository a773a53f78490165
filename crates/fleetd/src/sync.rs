// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Student-to-device sync.
//!
//! A student lands on a device as `uid = student_id`, `user_id =
//! str(student_id)`; attendance resolution later reverses exactly that
//! mapping.

use tracing::info;

use crate::error::FleetError;
use crate::repo::model::{Device, DeviceId, DeviceStatus, StudentId, TenantId};
use crate::state::AppState;

/// Write the student's user record onto the device so enrollment can proceed.
pub async fn sync_student_to_device(
    state: &AppState,
    tenant: TenantId,
    student_id: StudentId,
    device_id: DeviceId,
) -> Result<(), FleetError> {
    let profiles = state.students.profiles(tenant, &[student_id]).await?;
    let profile = profiles
        .get(&student_id)
        .ok_or(FleetError::StudentNotFound(student_id))?;
    let device = online_device(state, tenant, device_id).await?;

    // Device display format: "AdmissionNumber - Full Name".
    let display_name = format!("{} - {}", profile.admission_number, profile.full_name);
    let user_id = student_id.to_string();
    state
        .pool
        .with_session(&device, move |session| {
            session.set_user(student_id as u16, &user_id, &display_name, 0)
        })
        .await?;

    info!(student_id, device_id, "student synced to device");
    Ok(())
}

/// Whether the student's user record exists on the device.
pub async fn check_student_on_device(
    state: &AppState,
    tenant: TenantId,
    student_id: StudentId,
    device_id: DeviceId,
) -> Result<bool, FleetError> {
    let device = online_device(state, tenant, device_id).await?;
    let user_id = student_id.to_string();
    state
        .pool
        .with_session(&device, move |session| {
            Ok(session.get_users()?.iter().any(|u| u.user_id == user_id))
        })
        .await
}

pub(crate) async fn online_device(
    state: &AppState,
    tenant: TenantId,
    device_id: DeviceId,
) -> Result<Device, FleetError> {
    let device = state
        .devices
        .get(tenant, device_id)
        .await?
        .ok_or(FleetError::DeviceNotFound(device_id))?;
    if device.status != DeviceStatus::Online {
        return Err(FleetError::DeviceOffline(device_id));
    }
    Ok(device)
}
