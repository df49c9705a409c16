//! Incident state machine.
//!
//! Pure decision logic: given a monitor's stored state, the latest check and
//! the currently open incident (if any), work out the new failure counter,
//! the monitor status and what should happen to incidents. Persisting the
//! decision is the repository's job (`Database::commit_transition`).

use crate::database::models::{Incident, IncidentKind, Monitor, MonitorStatus};
use crate::database::{NewIncident, ResolvedIncident};
use crate::monitoring::types::CheckOutcome;

pub const DEFAULT_FAILURE_REASON: &str = "Max retry threshold reached";

/// What happens to incidents after a check
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentAction {
    /// Nothing to record
    None,
    /// Start a new incident
    Open { kind: IncidentKind, reason: String },
    /// An incident is already open; no new incident and no new alerts
    AlreadyOpen,
    /// Close the open incident, with or without recovery alerts
    Resolve { incident: Incident, notify: bool },
    /// Close a slow-response incident quietly and open a failure incident
    Escalate { incident: Incident, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub consecutive_failures: u32,
    pub status: MonitorStatus,
    pub action: IncidentAction,
}

/// Decide the transition for one check
pub fn evaluate(monitor: &Monitor, outcome: &CheckOutcome, open: Option<&Incident>) -> Transition {
    if !outcome.success {
        let consecutive_failures = monitor.consecutive_failures.saturating_add(1);
        let reached = consecutive_failures >= monitor.failure_threshold();
        let reason = || {
            outcome
                .error_message
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string())
        };

        let action = match open {
            Some(incident) if incident.kind == IncidentKind::SlowResponse && reached => {
                IncidentAction::Escalate { incident: incident.clone(), reason: reason() }
            }
            Some(_) => IncidentAction::AlreadyOpen,
            None if reached => IncidentAction::Open { kind: IncidentKind::Failure, reason: reason() },
            None => IncidentAction::None,
        };

        return Transition { consecutive_failures, status: next_status(monitor, MonitorStatus::Unhealthy), action };
    }

    let slow = outcome.is_slow(monitor.slow_response_threshold_ms);
    let action = match open {
        // Still slow: keep the slow incident open
        Some(incident) if slow && incident.kind == IncidentKind::SlowResponse => IncidentAction::AlreadyOpen,
        Some(incident) => IncidentAction::Resolve { incident: incident.clone(), notify: true },
        None if slow => IncidentAction::Open { kind: IncidentKind::SlowResponse, reason: slow_reason(monitor, outcome) },
        None => IncidentAction::None,
    };

    Transition { consecutive_failures: 0, status: next_status(monitor, MonitorStatus::Healthy), action }
}

/// A paused monitor keeps its status when a check still lands
fn next_status(monitor: &Monitor, observed: MonitorStatus) -> MonitorStatus {
    match monitor.status {
        MonitorStatus::Paused => MonitorStatus::Paused,
        _ => observed,
    }
}

fn slow_reason(monitor: &Monitor, outcome: &CheckOutcome) -> String {
    format!(
        "Slow response: {}ms exceeds {}ms threshold",
        outcome.response_time_ms,
        monitor.slow_response_threshold_ms.unwrap_or_default()
    )
}

pub fn failure_message(monitor: &Monitor) -> String {
    format!("Monitor DOWN: {}", monitor.url)
}

pub fn slow_message(monitor: &Monitor, outcome: &CheckOutcome) -> String {
    format!("Monitor SLOW: {} responded in {}ms", monitor.url, outcome.response_time_ms)
}

pub fn recovery_message(monitor: &Monitor) -> String {
    format!("Monitor RECOVERED: {}", monitor.url)
}

impl Transition {
    /// Incident writes for the repository, as (resolve, open)
    pub fn incident_changes(
        &self,
        monitor: &Monitor,
        outcome: &CheckOutcome,
    ) -> (Option<ResolvedIncident>, Option<NewIncident>) {
        match &self.action {
            IncidentAction::None | IncidentAction::AlreadyOpen => (None, None),
            IncidentAction::Open { kind, reason } => {
                let alert_message = match kind {
                    IncidentKind::Failure => failure_message(monitor),
                    IncidentKind::SlowResponse => slow_message(monitor, outcome),
                };
                (None, Some(NewIncident { kind: *kind, reason: reason.clone(), alert_message }))
            }
            IncidentAction::Resolve { incident, notify } => (
                Some(ResolvedIncident {
                    incident_id: incident.id,
                    started_at: incident.started_at,
                    alert_message: notify.then(|| recovery_message(monitor)),
                }),
                None,
            ),
            IncidentAction::Escalate { incident, reason } => (
                Some(ResolvedIncident {
                    incident_id: incident.id,
                    started_at: incident.started_at,
                    alert_message: None,
                }),
                Some(NewIncident {
                    kind: IncidentKind::Failure,
                    reason: reason.clone(),
                    alert_message: failure_message(monitor),
                }),
            ),
        }
    }
}
