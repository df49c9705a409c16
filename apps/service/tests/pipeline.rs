//! Worker pipeline: check execution, incident transitions and outbox writes
//! against a real libsql store and the in-memory queue.

mod common;

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use common::{Pipeline, http_monitor};
use pulse_service::database::models::{
    AlertDirection, ChannelType, IncidentKind, Monitor, MonitorStatus, MonitorType, OutboxState, to_millis,
};
use pulse_service::monitoring::{CheckOutcome, MonitoringExecutor};
use pulse_service::queue::{CheckJob, JobConsumer, JobQueue};
use pulse_service::worker::{CheckProcessor, JobOutcome};

#[tokio::test]
async fn test_threshold_opens_one_incident_and_alerts_each_channel_once() {
    let pipeline = Pipeline::new().await;
    let workspace_id = Uuid::new_v4();
    let monitor = http_monitor(workspace_id);
    pipeline.add_monitor(&monitor).await;

    let email = pipeline.add_channel(workspace_id, ChannelType::Email).await;
    let slack = pipeline.add_channel(workspace_id, ChannelType::Integration("slack".into())).await;
    // Another workspace's channel must never be alerted
    pipeline.add_channel(Uuid::new_v4(), ChannelType::Email).await;

    pipeline.checker.push_failures(4);

    for expected in 1..=2 {
        pipeline.run_check(&monitor).await;
        let stored = pipeline.monitor(monitor.id).await;
        assert_eq!(stored.consecutive_failures, expected);
        assert_eq!(stored.status, MonitorStatus::Unhealthy);
        assert!(pipeline.database.open_incident(monitor.id).await.unwrap().is_none());
    }

    pipeline.run_check(&monitor).await;
    let incident = pipeline.database.open_incident(monitor.id).await.unwrap().expect("incident after third failure");
    assert_eq!(incident.kind, IncidentKind::Failure);
    assert_eq!(incident.reason, "Connection refused");

    let outbox = pipeline.database.outbox_for_incident(incident.id).await.unwrap();
    assert_eq!(outbox.len(), 2);
    assert!(outbox.iter().all(|row| row.direction == AlertDirection::Failure && row.state == OutboxState::Pending));
    let mut channels: Vec<Uuid> = outbox.iter().map(|row| row.channel_id).collect();
    channels.sort();
    let mut expected = vec![email.id, slack.id];
    expected.sort();
    assert_eq!(channels, expected);

    let activity = pipeline.database.activity_for_entity(incident.id).await.unwrap();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].action, "incident.created");
    assert_eq!(activity[0].message, "Incident created for monitor Website");

    // Fourth failure: still one incident, no new alerts
    pipeline.run_check(&monitor).await;
    assert_eq!(pipeline.database.incidents_for_monitor(monitor.id).await.unwrap().len(), 1);
    assert_eq!(pipeline.database.outbox_for_incident(incident.id).await.unwrap().len(), 2);
    assert_eq!(pipeline.monitor(monitor.id).await.consecutive_failures, 4);
    assert_eq!(pipeline.queue.acked_count(), 4);
}

#[tokio::test]
async fn test_recovery_resolves_incident_and_queues_recovery_alerts() {
    let pipeline = Pipeline::new().await;
    let workspace_id = Uuid::new_v4();
    let monitor = http_monitor(workspace_id);
    pipeline.add_monitor(&monitor).await;
    pipeline.add_channel(workspace_id, ChannelType::Email).await;

    pipeline.checker.push_failures(3);
    for _ in 0..3 {
        pipeline.run_check(&monitor).await;
    }
    let incident = pipeline.database.open_incident(monitor.id).await.unwrap().unwrap();

    pipeline.checker.push(CheckOutcome::success(85));
    pipeline.run_check(&monitor).await;

    assert!(pipeline.database.open_incident(monitor.id).await.unwrap().is_none());
    let incidents = pipeline.database.incidents_for_monitor(monitor.id).await.unwrap();
    let resolved = &incidents[0];
    assert!(resolved.resolved_at.is_some());
    assert!(resolved.duration_seconds.unwrap() >= 0);
    let checks = pipeline.database.recent_checks(monitor.id, 10).await.unwrap();
    let recovering = checks.iter().find(|check| check.success).unwrap();
    assert_eq!(resolved.resolved_check_id, Some(recovering.id));

    let outbox = pipeline.database.outbox_for_incident(incident.id).await.unwrap();
    assert_eq!(outbox.iter().filter(|row| row.direction == AlertDirection::Recovery).count(), 1);
    assert_eq!(outbox.iter().filter(|row| row.direction == AlertDirection::Failure).count(), 1);

    let stored = pipeline.monitor(monitor.id).await;
    assert_eq!(stored.consecutive_failures, 0);
    assert_eq!(stored.status, MonitorStatus::Healthy);
    assert_eq!(stored.last_response_time_ms, Some(85));

    let actions: Vec<String> =
        pipeline.database.activity_for_entity(incident.id).await.unwrap().into_iter().map(|a| a.action).collect();
    assert!(actions.contains(&"incident.resolved".to_string()));
}

#[tokio::test]
async fn test_success_without_incident_only_resets_counter() {
    let pipeline = Pipeline::new().await;
    let mut monitor = http_monitor(Uuid::new_v4());
    monitor.consecutive_failures = 2;
    pipeline.add_monitor(&monitor).await;

    pipeline.run_check(&monitor).await;

    let stored = pipeline.monitor(monitor.id).await;
    assert_eq!(stored.consecutive_failures, 0);
    assert_eq!(stored.status, MonitorStatus::Healthy);
    assert!(stored.last_checked_at.is_some());
    assert!(pipeline.database.incidents_for_monitor(monitor.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_delivery_keeps_a_single_open_incident() {
    let pipeline = Pipeline::new().await;
    let workspace_id = Uuid::new_v4();
    let mut monitor = http_monitor(workspace_id);
    monitor.consecutive_failures = 2;
    pipeline.add_monitor(&monitor).await;
    pipeline.add_channel(workspace_id, ChannelType::Email).await;
    pipeline.add_channel(workspace_id, ChannelType::Whatsapp).await;
    pipeline.checker.push_failures(2);

    // Two workers handling the same job at the same moment
    let executor = MonitoringExecutor::new(std::time::Duration::from_secs(1))
        .register(MonitorType::Http, pipeline.checker.clone());
    let processor = CheckProcessor::new(pipeline.database.clone(), Arc::new(executor));
    let payload = CheckJob::new(monitor.id, workspace_id).encode().unwrap();

    let (first, second) = tokio::join!(processor.process(&payload), processor.process(&payload));
    first.unwrap();
    second.unwrap();

    let incidents = pipeline.database.incidents_for_monitor(monitor.id).await.unwrap();
    assert_eq!(incidents.len(), 1);
    assert!(incidents[0].is_open());
    assert_eq!(pipeline.database.outbox_for_incident(incidents[0].id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_missing_monitor_is_acknowledged() {
    let pipeline = Pipeline::new().await;
    let ghost = http_monitor(Uuid::new_v4());

    pipeline.run_check(&ghost).await;

    assert_eq!(pipeline.queue.acked_count(), 1);
    assert_eq!(pipeline.queue.rejected_count(), 0);
    assert_eq!(pipeline.checker.calls(), 0);
}

#[tokio::test]
async fn test_inactive_monitor_is_skipped() {
    let pipeline = Pipeline::new().await;
    let mut monitor = http_monitor(Uuid::new_v4());
    monitor.is_active = false;
    pipeline.add_monitor(&monitor).await;

    pipeline.run_check(&monitor).await;

    assert_eq!(pipeline.queue.acked_count(), 1);
    assert_eq!(pipeline.checker.calls(), 0);
    assert!(pipeline.database.recent_checks(monitor.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_payload_is_requeued() {
    let pipeline = Pipeline::new().await;
    pipeline.queue.publish_raw(b"{not json".to_vec()).await;

    let mut consumer = pipeline.queue.consumer();
    let delivery = consumer.receive().await.unwrap().unwrap();
    let outcome = pipeline.worker.handle(delivery.as_ref()).await.unwrap();

    assert!(outcome.is_none());
    assert_eq!(pipeline.queue.rejected_count(), 1);
    assert_eq!(pipeline.queue.len().await, 1);
}

#[tokio::test]
async fn test_poison_job_is_dropped_after_max_deliver() {
    let pipeline = Pipeline::new().await;
    pipeline.queue.publish_raw(b"{not json".to_vec()).await;

    let drained = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        pipeline.worker.drain(&mut pipeline.queue.consumer()),
    )
    .await
    .expect("drain kept redelivering")
    .unwrap();

    assert_eq!(drained, 10);
    assert_eq!(pipeline.queue.rejected_count(), 10);
    assert_eq!(pipeline.queue.dropped_count(), 1);
    assert!(pipeline.queue.is_empty().await);
}

#[tokio::test]
async fn test_unregistered_type_is_requeued_without_writing() {
    let pipeline = Pipeline::new().await;
    let monitor = Monitor::new(Uuid::new_v4(), "example.com", MonitorType::Dns);
    pipeline.add_monitor(&monitor).await;
    pipeline.queue.publish(&CheckJob::new(monitor.id, monitor.workspace_id)).await.unwrap();

    let mut consumer = pipeline.queue.consumer();
    let delivery = consumer.receive().await.unwrap().unwrap();
    assert!(pipeline.worker.handle(delivery.as_ref()).await.unwrap().is_none());

    let redelivery = consumer.receive().await.unwrap().unwrap();
    assert_eq!(redelivery.attempt(), 2);
    assert!(pipeline.database.recent_checks(monitor.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_heartbeat_check_keeps_last_ping_time() {
    let pipeline = Pipeline::new().await;
    let last_ping = Utc::now() - chrono::Duration::seconds(30);
    let mut monitor = Monitor::new(Uuid::new_v4(), "heartbeat", MonitorType::Heartbeat);
    monitor.interval_seconds = 60;
    monitor.grace_period_seconds = 10;
    monitor.last_checked_at = Some(last_ping);
    pipeline.add_monitor(&monitor).await;

    pipeline.run_check(&monitor).await;

    let stored = pipeline.monitor(monitor.id).await;
    assert_eq!(stored.status, MonitorStatus::Healthy);
    assert_eq!(stored.last_checked_at.map(to_millis), Some(to_millis(last_ping)));
}

#[tokio::test]
async fn test_stale_heartbeat_counts_as_failure() {
    let pipeline = Pipeline::new().await;
    let mut monitor = Monitor::new(Uuid::new_v4(), "heartbeat", MonitorType::Heartbeat);
    monitor.interval_seconds = 60;
    monitor.grace_period_seconds = 10;
    monitor.last_checked_at = Some(Utc::now() - chrono::Duration::seconds(300));
    pipeline.add_monitor(&monitor).await;

    pipeline.run_check(&monitor).await;

    let stored = pipeline.monitor(monitor.id).await;
    assert_eq!(stored.status, MonitorStatus::Unhealthy);
    assert_eq!(stored.consecutive_failures, 1);
    let check = &pipeline.database.recent_checks(monitor.id, 1).await.unwrap()[0];
    assert_eq!(check.error_message.as_deref(), Some("Request not received"));
}

#[tokio::test]
async fn test_slow_incident_escalates_to_failure() {
    let pipeline = Pipeline::new().await;
    let workspace_id = Uuid::new_v4();
    let mut monitor = http_monitor(workspace_id);
    monitor.max_retries = 2;
    monitor.slow_response_threshold_ms = Some(500);
    pipeline.add_monitor(&monitor).await;
    pipeline.add_channel(workspace_id, ChannelType::Email).await;

    pipeline.checker.push(CheckOutcome::success(900));
    pipeline.run_check(&monitor).await;
    let slow = pipeline.database.open_incident(monitor.id).await.unwrap().unwrap();
    assert_eq!(slow.kind, IncidentKind::SlowResponse);

    pipeline.checker.push_failures(2);
    pipeline.run_check(&monitor).await;
    assert_eq!(pipeline.database.open_incident(monitor.id).await.unwrap().unwrap().id, slow.id);
    pipeline.run_check(&monitor).await;

    let failure = pipeline.database.open_incident(monitor.id).await.unwrap().unwrap();
    assert_eq!(failure.kind, IncidentKind::Failure);
    assert_ne!(failure.id, slow.id);

    // The slow incident closes without a recovery alert
    let slow_outbox = pipeline.database.outbox_for_incident(slow.id).await.unwrap();
    assert_eq!(slow_outbox.len(), 1);
    assert_eq!(slow_outbox[0].direction, AlertDirection::Failure);
    assert_eq!(pipeline.database.outbox_for_incident(failure.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_processor_reports_outcome() {
    let pipeline = Pipeline::new().await;
    let monitor = http_monitor(Uuid::new_v4());
    pipeline.add_monitor(&monitor).await;

    pipeline.queue.publish(&CheckJob::new(monitor.id, monitor.workspace_id)).await.unwrap();
    let mut consumer = pipeline.queue.consumer();
    let delivery = consumer.receive().await.unwrap().unwrap();
    let outcome = pipeline.worker.handle(delivery.as_ref()).await.unwrap();

    assert!(matches!(outcome, Some(JobOutcome::Checked { success: true, .. })));
}
