use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Row, TransactionBehavior, params};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::models::{
    ActivityLog, AlertChannel, AlertDirection, AlertSent, CheckRecord, ChannelType, DueMonitor,
    HeartbeatReceipt, Incident, IncidentKind, Monitor, MonitorStatus, MonitorType, OutboxEntry,
    OutboxState, PendingAlert, from_millis, to_millis,
};
use crate::monitoring::types::Timings;
use crate::pool::{LibsqlManager, LibsqlPool};

/// Incident to open as part of a transition
#[derive(Debug, Clone)]
pub struct NewIncident {
    pub kind: IncidentKind,
    pub reason: String,
    /// Failure alert text queued for every subscribed channel
    pub alert_message: String,
}

/// Incident to close as part of a transition
#[derive(Debug, Clone)]
pub struct ResolvedIncident {
    pub incident_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Recovery alert text; `None` closes the incident silently
    pub alert_message: Option<String>,
}

/// Everything the worker writes after a check, applied atomically
#[derive(Debug, Clone)]
pub struct TransitionCommit {
    pub monitor_id: Uuid,
    pub workspace_id: Uuid,
    /// Monitor name, or its URL when unnamed; used in activity messages
    pub monitor_label: String,
    pub check_id: Uuid,
    pub checked_at: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub status: MonitorStatus,
    pub response_time_ms: u64,
    /// Heartbeat monitors keep `last_checked_at` for the last received ping
    pub touch_last_checked: bool,
    pub resolve: Option<ResolvedIncident>,
    pub open: Option<NewIncident>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionReport {
    pub opened: Option<Uuid>,
    pub resolved: Option<Uuid>,
    pub alerts_queued: usize,
}

/// Database trait for abstracting database operations
#[async_trait]
pub trait Database: Send + Sync {
    /// Insert or replace a monitor definition
    async fn insert_monitor(&self, monitor: &Monitor) -> Result<()>;

    async fn get_monitor(&self, id: Uuid) -> Result<Option<Monitor>>;

    /// Active, non-paused monitors whose next run is due, oldest first
    async fn due_monitors(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<DueMonitor>>;

    /// Advance `next_run_at` only if it is still due; true when this caller won the claim
    async fn claim_monitor(&self, due: &DueMonitor, now: DateTime<Utc>) -> Result<bool>;

    /// Record an externally received heartbeat ping
    async fn record_heartbeat(&self, id: Uuid, now: DateTime<Utc>) -> Result<HeartbeatReceipt>;

    async fn insert_check(&self, check: &CheckRecord) -> Result<()>;

    async fn recent_checks(&self, monitor_id: Uuid, limit: u32) -> Result<Vec<CheckRecord>>;

    async fn open_incident(&self, monitor_id: Uuid) -> Result<Option<Incident>>;

    async fn incidents_for_monitor(&self, monitor_id: Uuid) -> Result<Vec<Incident>>;

    /// Apply incident changes, outbox rows and the monitor update in one transaction
    async fn commit_transition(&self, commit: &TransitionCommit) -> Result<TransitionReport>;

    async fn insert_alert_channel(&self, channel: &AlertChannel) -> Result<()>;

    async fn subscribe_channel(&self, monitor_id: Uuid, channel_id: Uuid) -> Result<()>;

    /// Channels that should hear about a monitor's incidents
    async fn channels_for_monitor(&self, monitor_id: Uuid, workspace_id: Uuid) -> Result<Vec<AlertChannel>>;

    async fn due_alerts(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<PendingAlert>>;

    /// Hide a due outbox row until `lease_until`; true when this caller won the lease
    async fn lease_alert(&self, id: Uuid, now: DateTime<Utc>, lease_until: DateTime<Utc>) -> Result<bool>;

    /// Mark an outbox row delivered and write the sent record
    async fn complete_alert(&self, alert: &PendingAlert, sent_at: DateTime<Utc>) -> Result<()>;

    /// Record a failed delivery; `retry_at = None` marks the row failed for good
    async fn fail_alert(&self, alert: &PendingAlert, error: &str, retry_at: Option<DateTime<Utc>>) -> Result<()>;

    async fn outbox_for_incident(&self, incident_id: Uuid) -> Result<Vec<OutboxEntry>>;

    async fn alerts_sent_for_incident(&self, incident_id: Uuid) -> Result<Vec<AlertSent>>;

    async fn activity_for_entity(&self, entity_id: Uuid) -> Result<Vec<ActivityLog>>;

    /// Delete check history older than `cutoff` that no incident points at
    async fn delete_checks_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Delete sent or failed outbox rows last touched before `cutoff`
    async fn delete_settled_alerts_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

const MONITOR_COLUMNS: &str = "id, workspace_id, name, url, port, monitor_type, method, headers, body, \
     interval_seconds, timeout_ms, expected_status, keyword, keyword_match, dns_records, \
     grace_period_seconds, max_retries, slow_response_threshold_ms, is_active, status, \
     consecutive_failures, last_checked_at, last_response_time_ms, next_run_at, created_at, updated_at";

const CHECK_COLUMNS: &str = "id, monitor_id, checked_at, status, success, response_time_ms, \
     dns_lookup_ms, connect_ms, download_ms, http_status, request_headers, response_headers, \
     response_body, response_size_bytes, error_message, details";

const INCIDENT_COLUMNS: &str = "id, monitor_id, workspace_id, kind, started_at, check_id, \
     resolved_at, duration_seconds, resolved_check_id, reason";

const CHANNEL_COLUMNS: &str = "c.id, c.workspace_id, c.channel_type, c.destination, c.all_monitors, c.created_at";

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }
}

fn get_uuid(row: &Row, idx: i32) -> Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).with_context(|| format!("invalid uuid `{raw}` in column {idx}"))
}

fn get_opt_uuid(row: &Row, idx: i32) -> Result<Option<Uuid>> {
    row.get::<Option<String>>(idx)?
        .map(|raw| Uuid::parse_str(&raw).with_context(|| format!("invalid uuid `{raw}` in column {idx}")))
        .transpose()
}

fn get_json<T: DeserializeOwned>(row: &Row, idx: i32) -> Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).with_context(|| format!("invalid json in column {idx}"))
}

fn get_opt_json<T: DeserializeOwned>(row: &Row, idx: i32) -> Result<Option<T>> {
    row.get::<Option<String>>(idx)?
        .map(|raw| serde_json::from_str(&raw).with_context(|| format!("invalid json in column {idx}")))
        .transpose()
}

fn get_opt_time(row: &Row, idx: i32) -> Result<Option<DateTime<Utc>>> {
    Ok(row.get::<Option<i64>>(idx)?.map(from_millis))
}

fn opt_u64(value: Option<u64>) -> Option<i64> {
    value.map(|v| v as i64)
}

fn row_to_monitor(row: &Row) -> Result<Monitor> {
    let monitor_type: String = row.get(5)?;
    let status: String = row.get(19)?;
    let keyword_match: Option<String> = row.get(13)?;

    Ok(Monitor {
        id: get_uuid(row, 0)?,
        workspace_id: get_uuid(row, 1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        port: row.get::<Option<i64>>(4)?.map(|p| p as u16),
        monitor_type: monitor_type.parse::<MonitorType>()?,
        method: row.get(6)?,
        headers: get_json(row, 7)?,
        body: row.get(8)?,
        interval_seconds: row.get::<i64>(9)? as u32,
        timeout_ms: row.get::<i64>(10)? as u32,
        expected_status: get_json(row, 11)?,
        keyword: row.get(12)?,
        keyword_match: keyword_match.map(|m| m.parse()).transpose()?,
        dns_records: get_json(row, 14)?,
        grace_period_seconds: row.get::<i64>(15)? as u32,
        max_retries: row.get::<i64>(16)? as u32,
        slow_response_threshold_ms: row.get::<Option<i64>>(17)?.map(|v| v as u32),
        is_active: row.get::<i64>(18)? != 0,
        status: status.parse()?,
        consecutive_failures: row.get::<i64>(20)? as u32,
        last_checked_at: get_opt_time(row, 21)?,
        last_response_time_ms: row.get::<Option<i64>>(22)?.map(|v| v as u64),
        next_run_at: from_millis(row.get(23)?),
        created_at: from_millis(row.get(24)?),
        updated_at: from_millis(row.get(25)?),
    })
}

fn row_to_check(row: &Row) -> Result<CheckRecord> {
    let status: String = row.get(3)?;
    Ok(CheckRecord {
        id: get_uuid(row, 0)?,
        monitor_id: get_uuid(row, 1)?,
        checked_at: from_millis(row.get(2)?),
        status: status.parse()?,
        success: row.get::<i64>(4)? != 0,
        response_time_ms: row.get::<i64>(5)? as u64,
        timings: Timings {
            dns_lookup_ms: row.get::<Option<i64>>(6)?.map(|v| v as u64),
            connect_ms: row.get::<Option<i64>>(7)?.map(|v| v as u64),
            download_ms: row.get::<Option<i64>>(8)?.map(|v| v as u64),
        },
        http_status: row.get::<Option<i64>>(9)?.map(|v| v as u16),
        request_headers: get_opt_json(row, 10)?,
        response_headers: get_opt_json(row, 11)?,
        response_body: row.get(12)?,
        response_size_bytes: row.get::<Option<i64>>(13)?.map(|v| v as u64),
        error_message: row.get(14)?,
        details: get_opt_json(row, 15)?,
    })
}

fn row_to_incident(row: &Row) -> Result<Incident> {
    let kind: String = row.get(3)?;
    Ok(Incident {
        id: get_uuid(row, 0)?,
        monitor_id: get_uuid(row, 1)?,
        workspace_id: get_uuid(row, 2)?,
        kind: kind.parse()?,
        started_at: from_millis(row.get(4)?),
        check_id: get_uuid(row, 5)?,
        resolved_at: get_opt_time(row, 6)?,
        duration_seconds: row.get(7)?,
        resolved_check_id: get_opt_uuid(row, 8)?,
        reason: row.get(9)?,
    })
}

/// Reads the six `CHANNEL_COLUMNS` starting at `offset`
fn row_to_channel(row: &Row, offset: i32) -> Result<AlertChannel> {
    let channel_type: String = row.get(offset + 2)?;
    Ok(AlertChannel {
        id: get_uuid(row, offset)?,
        workspace_id: get_uuid(row, offset + 1)?,
        channel_type: channel_type.parse::<ChannelType>()?,
        destination: get_json(row, offset + 3)?,
        all_monitors: row.get::<i64>(offset + 4)? != 0,
        created_at: from_millis(row.get(offset + 5)?),
    })
}

async fn insert_activity(conn: &Connection, entry: &ActivityLog) -> Result<()> {
    conn.execute(
        "INSERT INTO activity_logs (id, workspace_id, action, entity_type, entity_id, message, metadata, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            entry.id.to_string(),
            entry.workspace_id.to_string(),
            entry.action.clone(),
            entry.entity_type.clone(),
            entry.entity_id.to_string(),
            entry.message.clone(),
            entry.metadata.to_string(),
            to_millis(entry.created_at),
        ],
    )
    .await?;
    Ok(())
}

async fn query_channels(conn: &Connection, monitor_id: Uuid, workspace_id: Uuid) -> Result<Vec<AlertChannel>> {
    let sql = format!(
        "SELECT {CHANNEL_COLUMNS} FROM alert_channels c
         WHERE c.workspace_id = ?1
           AND (c.all_monitors = 1
                OR EXISTS (SELECT 1 FROM monitor_alert_channels s
                           WHERE s.channel_id = c.id AND s.monitor_id = ?2))
         ORDER BY c.created_at, c.id"
    );
    let mut rows = conn.query(&sql, params![workspace_id.to_string(), monitor_id.to_string()]).await?;
    let mut channels = Vec::new();
    while let Some(row) = rows.next().await? {
        channels.push(row_to_channel(&row, 0)?);
    }
    Ok(channels)
}

/// Queue one outbox row per channel; returns how many were new
async fn queue_alerts(
    conn: &Connection,
    commit: &TransitionCommit,
    incident_id: Uuid,
    direction: AlertDirection,
    message: &str,
) -> Result<usize> {
    let channels = query_channels(conn, commit.monitor_id, commit.workspace_id).await?;
    let now = to_millis(commit.checked_at);
    let mut queued = 0;

    for channel in channels {
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO alert_outbox
                    (id, incident_id, monitor_id, workspace_id, channel_id, direction, message,
                     attempts, next_attempt_at, state, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, 'pending', ?, ?)",
                params![
                    Uuid::new_v4().to_string(),
                    incident_id.to_string(),
                    commit.monitor_id.to_string(),
                    commit.workspace_id.to_string(),
                    channel.id.to_string(),
                    direction.as_str(),
                    message,
                    now,
                    now,
                    now,
                ],
            )
            .await?;
        queued += inserted as usize;
    }

    Ok(queued)
}

async fn apply_transition(conn: &Connection, commit: &TransitionCommit) -> Result<TransitionReport> {
    let mut report = TransitionReport::default();
    let now = to_millis(commit.checked_at);

    if let Some(resolve) = &commit.resolve {
        let duration = (commit.checked_at - resolve.started_at).num_seconds().max(0);
        let updated = conn
            .execute(
                "UPDATE incidents SET resolved_at = ?, duration_seconds = ?, resolved_check_id = ?
                 WHERE id = ? AND resolved_at IS NULL",
                params![now, duration, commit.check_id.to_string(), resolve.incident_id.to_string()],
            )
            .await?;

        // Another delivery already closed it
        if updated == 1 {
            report.resolved = Some(resolve.incident_id);
            insert_activity(
                conn,
                &ActivityLog::new(
                    commit.workspace_id,
                    "incident.resolved",
                    "incident",
                    resolve.incident_id,
                    format!("Incident resolved after {duration}s"),
                    serde_json::json!({
                        "monitor_id": commit.monitor_id,
                        "check_id": commit.check_id,
                        "duration_seconds": duration,
                    }),
                ),
            )
            .await?;
            if let Some(message) = &resolve.alert_message {
                report.alerts_queued +=
                    queue_alerts(conn, commit, resolve.incident_id, AlertDirection::Recovery, message).await?;
            }
        }
    }

    if let Some(open) = &commit.open {
        let incident_id = Uuid::new_v4();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO incidents (id, monitor_id, workspace_id, kind, started_at, check_id, reason)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    incident_id.to_string(),
                    commit.monitor_id.to_string(),
                    commit.workspace_id.to_string(),
                    open.kind.as_str(),
                    now,
                    commit.check_id.to_string(),
                    open.reason.clone(),
                ],
            )
            .await?;

        // Zero rows means an incident is already open for this monitor
        if inserted == 1 {
            report.opened = Some(incident_id);
            insert_activity(
                conn,
                &ActivityLog::new(
                    commit.workspace_id,
                    "incident.created",
                    "incident",
                    incident_id,
                    format!("Incident created for monitor {}", commit.monitor_label),
                    serde_json::json!({
                        "monitor_id": commit.monitor_id,
                        "check_id": commit.check_id,
                        "kind": open.kind,
                        "reason": open.reason,
                    }),
                ),
            )
            .await?;
            report.alerts_queued +=
                queue_alerts(conn, commit, incident_id, AlertDirection::Failure, &open.alert_message).await?;
        }
    }

    conn.execute(
        "UPDATE monitors SET
            consecutive_failures = ?,
            status = CASE WHEN status = 'paused' THEN status ELSE ? END,
            last_response_time_ms = ?,
            last_checked_at = CASE WHEN ? = 1 THEN ? ELSE last_checked_at END,
            updated_at = ?
         WHERE id = ?",
        params![
            i64::from(commit.consecutive_failures),
            commit.status.as_str(),
            commit.response_time_ms as i64,
            i64::from(commit.touch_last_checked),
            now,
            now,
            commit.monitor_id.to_string(),
        ],
    )
    .await?;

    Ok(report)
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn insert_monitor(&self, monitor: &Monitor) -> Result<()> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "INSERT OR REPLACE INTO monitors ({MONITOR_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        conn.execute(
            &sql,
            params![
                monitor.id.to_string(),
                monitor.workspace_id.to_string(),
                monitor.name.clone(),
                monitor.url.clone(),
                monitor.port.map(i64::from),
                monitor.monitor_type.as_str(),
                monitor.method.clone(),
                serde_json::to_string(&monitor.headers)?,
                monitor.body.clone(),
                i64::from(monitor.interval_seconds),
                i64::from(monitor.timeout_ms),
                serde_json::to_string(&monitor.expected_status)?,
                monitor.keyword.clone(),
                monitor.keyword_match.map(|m| m.as_str()),
                serde_json::to_string(&monitor.dns_records)?,
                i64::from(monitor.grace_period_seconds),
                i64::from(monitor.max_retries),
                monitor.slow_response_threshold_ms.map(i64::from),
                i64::from(monitor.is_active),
                monitor.status.as_str(),
                i64::from(monitor.consecutive_failures),
                monitor.last_checked_at.map(to_millis),
                opt_u64(monitor.last_response_time_ms),
                to_millis(monitor.next_run_at),
                to_millis(monitor.created_at),
                to_millis(monitor.updated_at),
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_monitor(&self, id: Uuid) -> Result<Option<Monitor>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?");
        let mut rows = conn.query(&sql, params![id.to_string()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_monitor(&row)?)),
            None => Ok(None),
        }
    }

    async fn due_monitors(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<DueMonitor>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, workspace_id, interval_seconds, next_run_at FROM monitors
                 WHERE is_active = 1 AND status != 'paused' AND next_run_at <= ?
                 ORDER BY next_run_at ASC
                 LIMIT ?",
                params![to_millis(now), i64::from(limit)],
            )
            .await?;

        let mut due = Vec::new();
        while let Some(row) = rows.next().await? {
            due.push(DueMonitor {
                id: get_uuid(&row, 0)?,
                workspace_id: get_uuid(&row, 1)?,
                interval_seconds: row.get::<i64>(2)? as u32,
                next_run_at: from_millis(row.get(3)?),
            });
        }
        Ok(due)
    }

    async fn claim_monitor(&self, due: &DueMonitor, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.get_conn().await?;
        let next_run_at = now + chrono::Duration::seconds(i64::from(due.interval_seconds.max(1)));
        let updated = conn
            .execute(
                "UPDATE monitors SET next_run_at = ?, updated_at = ?
                 WHERE id = ? AND next_run_at <= ? AND is_active = 1",
                params![to_millis(next_run_at), to_millis(now), due.id.to_string(), to_millis(now)],
            )
            .await?;
        Ok(updated == 1)
    }

    async fn record_heartbeat(&self, id: Uuid, now: DateTime<Utc>) -> Result<HeartbeatReceipt> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT monitor_type, is_active FROM monitors WHERE id = ?", params![id.to_string()])
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(HeartbeatReceipt::NotFound);
        };
        let monitor_type: String = row.get(0)?;
        if row.get::<i64>(1)? == 0 {
            return Ok(HeartbeatReceipt::Inactive);
        }
        if monitor_type.parse::<MonitorType>()? != MonitorType::Heartbeat {
            return Ok(HeartbeatReceipt::NotHeartbeat);
        }
        drop(rows);

        conn.execute(
            "UPDATE monitors SET last_checked_at = ?, updated_at = ? WHERE id = ?",
            params![to_millis(now), to_millis(now), id.to_string()],
        )
        .await?;
        Ok(HeartbeatReceipt::Recorded)
    }

    async fn insert_check(&self, check: &CheckRecord) -> Result<()> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "INSERT INTO monitor_checks ({CHECK_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        conn.execute(
            &sql,
            params![
                check.id.to_string(),
                check.monitor_id.to_string(),
                to_millis(check.checked_at),
                check.status.to_string(),
                i64::from(check.success),
                check.response_time_ms as i64,
                opt_u64(check.timings.dns_lookup_ms),
                opt_u64(check.timings.connect_ms),
                opt_u64(check.timings.download_ms),
                check.http_status.map(i64::from),
                check.request_headers.as_ref().map(serde_json::to_string).transpose()?,
                check.response_headers.as_ref().map(serde_json::to_string).transpose()?,
                check.response_body.clone(),
                opt_u64(check.response_size_bytes),
                check.error_message.clone(),
                check.details.as_ref().map(serde_json::to_string).transpose()?,
            ],
        )
        .await?;
        Ok(())
    }

    async fn recent_checks(&self, monitor_id: Uuid, limit: u32) -> Result<Vec<CheckRecord>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {CHECK_COLUMNS} FROM monitor_checks WHERE monitor_id = ?
             ORDER BY checked_at DESC LIMIT ?"
        );
        let mut rows = conn.query(&sql, params![monitor_id.to_string(), i64::from(limit)]).await?;

        let mut checks = Vec::new();
        while let Some(row) = rows.next().await? {
            checks.push(row_to_check(&row)?);
        }
        Ok(checks)
    }

    async fn open_incident(&self, monitor_id: Uuid) -> Result<Option<Incident>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents WHERE monitor_id = ? AND resolved_at IS NULL LIMIT 1"
        );
        let mut rows = conn.query(&sql, params![monitor_id.to_string()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_incident(&row)?)),
            None => Ok(None),
        }
    }

    async fn incidents_for_monitor(&self, monitor_id: Uuid) -> Result<Vec<Incident>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE monitor_id = ? ORDER BY started_at ASC");
        let mut rows = conn.query(&sql, params![monitor_id.to_string()]).await?;

        let mut incidents = Vec::new();
        while let Some(row) = rows.next().await? {
            incidents.push(row_to_incident(&row)?);
        }
        Ok(incidents)
    }

    async fn commit_transition(&self, commit: &TransitionCommit) -> Result<TransitionReport> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;

        match apply_transition(&tx, commit).await {
            Ok(report) => {
                tx.commit().await?;
                Ok(report)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback of incident transition failed");
                }
                Err(err)
            }
        }
    }

    async fn insert_alert_channel(&self, channel: &AlertChannel) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR REPLACE INTO alert_channels (id, workspace_id, channel_type, destination, all_monitors, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                channel.id.to_string(),
                channel.workspace_id.to_string(),
                channel.channel_type.as_str(),
                channel.destination.to_string(),
                i64::from(channel.all_monitors),
                to_millis(channel.created_at),
            ],
        )
        .await?;
        Ok(())
    }

    async fn subscribe_channel(&self, monitor_id: Uuid, channel_id: Uuid) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR IGNORE INTO monitor_alert_channels (monitor_id, channel_id) VALUES (?, ?)",
            params![monitor_id.to_string(), channel_id.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn channels_for_monitor(&self, monitor_id: Uuid, workspace_id: Uuid) -> Result<Vec<AlertChannel>> {
        let conn = self.get_conn().await?;
        query_channels(&conn, monitor_id, workspace_id).await
    }

    async fn due_alerts(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<PendingAlert>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT o.id, o.incident_id, o.monitor_id, o.workspace_id, o.direction, o.message,
                    o.attempts, o.next_attempt_at, {CHANNEL_COLUMNS}
             FROM alert_outbox o
             JOIN alert_channels c ON c.id = o.channel_id
             WHERE o.state = 'pending' AND o.next_attempt_at <= ?
             ORDER BY o.next_attempt_at ASC
             LIMIT ?"
        );
        let mut rows = conn.query(&sql, params![to_millis(now), i64::from(limit)]).await?;

        let mut alerts = Vec::new();
        while let Some(row) = rows.next().await? {
            let direction: String = row.get(4)?;
            alerts.push(PendingAlert {
                id: get_uuid(&row, 0)?,
                incident_id: get_uuid(&row, 1)?,
                monitor_id: get_uuid(&row, 2)?,
                workspace_id: get_uuid(&row, 3)?,
                direction: direction.parse()?,
                message: row.get(5)?,
                attempts: row.get::<i64>(6)? as u32,
                next_attempt_at: from_millis(row.get(7)?),
                channel: row_to_channel(&row, 8)?,
            });
        }
        Ok(alerts)
    }

    async fn lease_alert(&self, id: Uuid, now: DateTime<Utc>, lease_until: DateTime<Utc>) -> Result<bool> {
        let conn = self.get_conn().await?;
        let updated = conn
            .execute(
                "UPDATE alert_outbox SET next_attempt_at = ?, updated_at = ?
                 WHERE id = ? AND state = 'pending' AND next_attempt_at <= ?",
                params![to_millis(lease_until), to_millis(now), id.to_string(), to_millis(now)],
            )
            .await?;
        Ok(updated == 1)
    }

    async fn complete_alert(&self, alert: &PendingAlert, sent_at: DateTime<Utc>) -> Result<()> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;

        tx.execute(
            "UPDATE alert_outbox SET state = 'sent', attempts = attempts + 1, last_error = NULL, updated_at = ?
             WHERE id = ?",
            params![to_millis(sent_at), alert.id.to_string()],
        )
        .await?;
        tx.execute(
            "INSERT INTO alerts_sent (id, monitor_id, channel_id, incident_id, direction, sent_at, message)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                Uuid::new_v4().to_string(),
                alert.monitor_id.to_string(),
                alert.channel.id.to_string(),
                alert.incident_id.to_string(),
                alert.direction.as_str(),
                to_millis(sent_at),
                alert.message.clone(),
            ],
        )
        .await?;

        let action = match (&alert.channel.channel_type, alert.direction) {
            (ChannelType::Email, AlertDirection::Failure) => "alert.email_sent",
            (ChannelType::Email, AlertDirection::Recovery) => "alert.recovery_email_sent",
            _ => "alert.sent",
        };
        insert_activity(
            &tx,
            &ActivityLog::new(
                alert.workspace_id,
                action,
                "incident",
                alert.incident_id,
                format!("{} alert delivered via {}", alert.direction, alert.channel.channel_type),
                serde_json::json!({
                    "channel_id": alert.channel.id,
                    "monitor_id": alert.monitor_id,
                    "attempts": alert.attempts + 1,
                }),
            ),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fail_alert(&self, alert: &PendingAlert, error: &str, retry_at: Option<DateTime<Utc>>) -> Result<()> {
        let conn = self.get_conn().await?;
        let now = to_millis(Utc::now());

        match retry_at {
            Some(retry_at) => {
                conn.execute(
                    "UPDATE alert_outbox SET attempts = attempts + 1, last_error = ?, next_attempt_at = ?, updated_at = ?
                     WHERE id = ?",
                    params![error, to_millis(retry_at), now, alert.id.to_string()],
                )
                .await?;
            }
            None => {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;
                tx.execute(
                    "UPDATE alert_outbox SET attempts = attempts + 1, last_error = ?, state = 'failed', updated_at = ?
                     WHERE id = ?",
                    params![error, now, alert.id.to_string()],
                )
                .await?;
                insert_activity(
                    &tx,
                    &ActivityLog::new(
                        alert.workspace_id,
                        "alert.failed",
                        "incident",
                        alert.incident_id,
                        format!("{} alert via {} gave up: {}", alert.direction, alert.channel.channel_type, error),
                        serde_json::json!({
                            "channel_id": alert.channel.id,
                            "monitor_id": alert.monitor_id,
                            "attempts": alert.attempts + 1,
                        }),
                    ),
                )
                .await?;
                tx.commit().await?;
            }
        }
        Ok(())
    }

    async fn outbox_for_incident(&self, incident_id: Uuid) -> Result<Vec<OutboxEntry>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, incident_id, channel_id, direction, state, attempts, next_attempt_at, last_error
                 FROM alert_outbox WHERE incident_id = ? ORDER BY created_at, channel_id",
                params![incident_id.to_string()],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            let direction: String = row.get(3)?;
            let state: String = row.get(4)?;
            entries.push(OutboxEntry {
                id: get_uuid(&row, 0)?,
                incident_id: get_uuid(&row, 1)?,
                channel_id: get_uuid(&row, 2)?,
                direction: direction.parse()?,
                state: state.parse::<OutboxState>()?,
                attempts: row.get::<i64>(5)? as u32,
                next_attempt_at: from_millis(row.get(6)?),
                last_error: row.get(7)?,
            });
        }
        Ok(entries)
    }

    async fn alerts_sent_for_incident(&self, incident_id: Uuid) -> Result<Vec<AlertSent>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, monitor_id, channel_id, incident_id, direction, sent_at, message
                 FROM alerts_sent WHERE incident_id = ? ORDER BY sent_at",
                params![incident_id.to_string()],
            )
            .await?;

        let mut sent = Vec::new();
        while let Some(row) = rows.next().await? {
            let direction: String = row.get(4)?;
            sent.push(AlertSent {
                id: get_uuid(&row, 0)?,
                monitor_id: get_uuid(&row, 1)?,
                channel_id: get_uuid(&row, 2)?,
                incident_id: get_uuid(&row, 3)?,
                direction: direction.parse()?,
                sent_at: from_millis(row.get(5)?),
                message: row.get(6)?,
            });
        }
        Ok(sent)
    }

    async fn activity_for_entity(&self, entity_id: Uuid) -> Result<Vec<ActivityLog>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, workspace_id, action, entity_type, entity_id, message, metadata, created_at
                 FROM activity_logs WHERE entity_id = ? ORDER BY created_at",
                params![entity_id.to_string()],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(ActivityLog {
                id: get_uuid(&row, 0)?,
                workspace_id: get_uuid(&row, 1)?,
                action: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: get_uuid(&row, 4)?,
                message: row.get(5)?,
                metadata: get_json(&row, 6)?,
                created_at: from_millis(row.get(7)?),
            });
        }
        Ok(entries)
    }

    async fn delete_checks_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM monitor_checks
                 WHERE checked_at < ?
                   AND id NOT IN (SELECT check_id FROM incidents)
                   AND id NOT IN (SELECT resolved_check_id FROM incidents WHERE resolved_check_id IS NOT NULL)",
                params![to_millis(cutoff)],
            )
            .await?;
        Ok(deleted)
    }

    async fn delete_settled_alerts_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM alert_outbox WHERE state IN ('sent', 'failed') AND updated_at < ?",
                params![to_millis(cutoff)],
            )
            .await?;
        Ok(deleted)
    }
}
