// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end ingestion scenarios over in-memory stores and scripted logs.

use std::sync::Arc;

use fleetd::error::FleetError;
use fleetd::hub::Channel;
use fleetd::pipeline::IngestionSummary;
use fleetd::repo::model::{DeviceStatus, EventType};

use fleet_specs::{
    local, local_utc, online_device, raw_log, MemStudentDirectory, RecordingSink, World, TENANT,
};

const DEVICE: i64 = 3;

fn world_with_student_42() -> World {
    World::new(
        vec![online_device(DEVICE)],
        vec![MemStudentDirectory::student(42, "Jane Wanjiku")],
    )
}

async fn feed_sink(world: &World) -> Arc<RecordingSink> {
    let sink = Arc::new(RecordingSink::default());
    world
        .hub
        .subscribe(Channel::AttendanceScans, TENANT, sink.clone())
        .await;
    sink
}

fn feed_event_types(message: &serde_json::Value) -> Vec<String> {
    message["events"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|e| e["event_type"].as_str().unwrap_or_default().to_owned())
        .collect()
}

#[tokio::test]
async fn first_tap_of_the_day_is_in() {
    let world = world_with_student_42();
    let sink = feed_sink(&world).await;
    world.logs.push(vec![raw_log("42", local(8, 1, 12))]);

    let summary = world.pipeline().ingest_for_device(TENANT, DEVICE).await.unwrap();
    assert_eq!(
        summary,
        IngestionSummary { inserted: 1, skipped: 0, duplicates_filtered: 0, total: 1 }
    );

    let records = world.attendance.records.lock().clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].student_id, Some(42));
    assert_eq!(records[0].event_type, EventType::In);
    assert_eq!(records[0].occurred_at, local_utc(8, 1, 12));

    let messages = sink.received();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["type"], "attendance_events");
    assert_eq!(messages[0]["count"], 1);
    assert_eq!(feed_event_types(&messages[0]), vec!["IN"]);
    assert_eq!(messages[0]["events"][0]["student_name"], "Jane Wanjiku");
    assert_eq!(messages[0]["events"][0]["admission_number"], "ADM-42");
}

#[tokio::test]
async fn immediate_retap_is_filtered_but_broadcast() {
    let world = world_with_student_42();
    let sink = feed_sink(&world).await;
    world.logs.push(vec![
        raw_log("42", local(8, 1, 12)),
        raw_log("42", local(8, 1, 15)),
    ]);

    let summary = world.pipeline().ingest_for_device(TENANT, DEVICE).await.unwrap();
    assert_eq!(
        summary,
        IngestionSummary { inserted: 1, skipped: 0, duplicates_filtered: 1, total: 2 }
    );

    // Only the IN tap is persisted; the feed shows both in order.
    let records = world.attendance.records.lock().clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event_type, EventType::In);

    let messages = sink.received();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["count"], 2);
    assert_eq!(feed_event_types(&messages[0]), vec!["IN", "DUPLICATE"]);
    // Every feed event carries its own unique id.
    let ids: Vec<&str> = messages[0]["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test]
async fn exit_after_window_is_out() {
    let world = world_with_student_42();
    let sink = feed_sink(&world).await;

    // Morning IN already ingested on a previous round.
    world.logs.push(vec![raw_log("42", local(8, 1, 12))]);
    world.pipeline().ingest_for_device(TENANT, DEVICE).await.unwrap();

    world.logs.push(vec![raw_log("42", local(9, 30, 0))]);
    let summary = world.pipeline().ingest_for_device(TENANT, DEVICE).await.unwrap();
    assert_eq!(summary.inserted, 1);

    let records = world.attendance.records.lock().clone();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].event_type, EventType::Out);
    assert_eq!(records[1].occurred_at, local_utc(9, 30, 0));

    let messages = sink.received();
    assert_eq!(feed_event_types(&messages[1]), vec!["OUT"]);
}

#[tokio::test]
async fn unknown_user_is_persisted_unmatched() {
    let world = world_with_student_42();
    let sink = feed_sink(&world).await;
    world.logs.push(vec![raw_log("9999", local(8, 15, 0))]);

    let summary = world.pipeline().ingest_for_device(TENANT, DEVICE).await.unwrap();
    assert_eq!(summary.inserted, 1);

    let records = world.attendance.records.lock().clone();
    assert_eq!(records[0].student_id, None);
    assert_eq!(records[0].event_type, EventType::Unknown);
    assert_eq!(records[0].device_user_id, "9999");

    let messages = sink.received();
    assert_eq!(feed_event_types(&messages[0]), vec!["UNKNOWN"]);
    assert!(messages[0]["events"][0]["student_id"].is_null());
}

#[tokio::test]
async fn replayed_dump_is_fully_absorbed() {
    let world = world_with_student_42();
    let sink = feed_sink(&world).await;

    // The terminal returns its whole log on every poll, duplicate tap included.
    let dump = vec![
        raw_log("42", local(8, 1, 12)),
        raw_log("42", local(8, 1, 15)),
    ];
    world.logs.push(dump.clone());
    let first = world.pipeline().ingest_for_device(TENANT, DEVICE).await.unwrap();
    assert_eq!(
        first,
        IngestionSummary { inserted: 1, skipped: 0, duplicates_filtered: 1, total: 2 }
    );

    world.logs.push(dump);
    let second = world.pipeline().ingest_for_device(TENANT, DEVICE).await.unwrap();
    // The stored IN is caught by database dedup; the DUPLICATE tap, never
    // stored, is caught by the processed-scan cache.
    assert_eq!(
        second,
        IngestionSummary { inserted: 0, skipped: 2, duplicates_filtered: 0, total: 2 }
    );

    // No broadcast for an all-skipped round.
    assert_eq!(sink.received().len(), 1);
    assert_eq!(world.attendance.records.lock().len(), 1);
}

#[tokio::test]
async fn consecutive_persisted_records_alternate() {
    let world = world_with_student_42();
    world.logs.push(vec![
        raw_log("42", local(8, 0, 0)),
        raw_log("42", local(8, 10, 0)),
        raw_log("42", local(8, 20, 0)),
        raw_log("42", local(8, 24, 0)), // within window of 8:20, duplicate
        raw_log("42", local(8, 30, 0)),
    ]);

    let summary = world.pipeline().ingest_for_device(TENANT, DEVICE).await.unwrap();
    assert_eq!(summary.inserted, 4);
    assert_eq!(summary.duplicates_filtered, 1);

    let types: Vec<EventType> = world
        .attendance
        .records
        .lock()
        .iter()
        .map(|r| r.event_type)
        .collect();
    assert_eq!(
        types,
        vec![EventType::In, EventType::Out, EventType::In, EventType::Out]
    );
}

#[tokio::test]
async fn offline_device_is_rejected() {
    let mut device = online_device(DEVICE);
    device.status = DeviceStatus::Offline;
    let world = World::new(vec![device], vec![]);

    let err = world.pipeline().ingest_for_device(TENANT, DEVICE).await.unwrap_err();
    assert!(matches!(err, FleetError::DeviceOffline(id) if id == DEVICE));
}

#[tokio::test]
async fn unknown_device_is_rejected() {
    let world = World::new(vec![], vec![]);
    let err = world.pipeline().ingest_for_device(TENANT, 77).await.unwrap_err();
    assert!(matches!(err, FleetError::DeviceNotFound(77)));
}

#[tokio::test]
async fn empty_log_dump_is_a_zero_summary() {
    let world = world_with_student_42();
    let sink = feed_sink(&world).await;

    let summary = world.pipeline().ingest_for_device(TENANT, DEVICE).await.unwrap();
    assert_eq!(summary, IngestionSummary::default());
    assert!(sink.received().is_empty());
}

#[tokio::test]
async fn other_tenant_subscribers_see_nothing() {
    let world = world_with_student_42();
    let ours = feed_sink(&world).await;
    let theirs = Arc::new(RecordingSink::default());
    world
        .hub
        .subscribe(Channel::AttendanceScans, TENANT + 1, theirs.clone())
        .await;

    world.logs.push(vec![raw_log("42", local(8, 1, 12))]);
    world.pipeline().ingest_for_device(TENANT, DEVICE).await.unwrap();

    assert_eq!(ours.received().len(), 1);
    assert!(theirs.received().is_empty());
}
