//! Core domain model shared across the steward workspace.

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "steward-core";

/// Local status tracked per event, owned by humans rather than the sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    NotContacted,
    Contacted,
    Completed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::NotContacted => "not_contacted",
            EventStatus::Contacted => "contacted",
            EventStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "not_contacted" => Some(EventStatus::NotContacted),
            "contacted" => Some(EventStatus::Contacted),
            "completed" => Some(EventStatus::Completed),
            _ => None,
        }
    }
}

impl Default for EventStatus {
    fn default() -> Self {
        EventStatus::NotContacted
    }
}

/// One synchronized calendar occurrence. The id is the remote *instance* id,
/// so a recurring event produces one row per occurrence. Every column here is
/// sync-owned and may be overwritten on any run; human-edited state lives in
/// [`EventMeta`].
///
/// Timestamps are kept as the ISO 8601 strings the upstream service supplies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub title: String,
    pub event_type: Option<String>,
    pub description: Option<String>,
    pub start_at: String,
    pub end_at: Option<String>,
    pub campus: Option<String>,
    pub rooms: Vec<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub owner: Option<String>,
    pub form_url: Option<String>,
    pub synced_at: String,
}

/// Human-owned metadata row, bootstrapped exactly once when an event is first
/// observed and never overwritten by sync afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    pub event_id: String,
    pub status: EventStatus,
    pub coordinator_id: Option<i64>,
    pub setup_notes: Option<String>,
    pub estimated_attendance: Option<String>,
    pub event_locations: Option<String>,
    pub additional_comments: Option<String>,
    pub updated_at: String,
}

/// Distinguishes an absent field from an explicit `null`: absent stays outer
/// `None`, `null` becomes `Some(None)` and clears the column.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// Partial update for a meta row. Outer `None` leaves the column alone;
/// `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetaUpdate {
    pub status: Option<EventStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub coordinator_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub setup_notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub estimated_attendance: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub event_locations: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub additional_comments: Option<Option<String>>,
}

impl MetaUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.coordinator_id.is_none()
            && self.setup_notes.is_none()
            && self.estimated_attendance.is_none()
            && self.event_locations.is_none()
            && self.additional_comments.is_none()
    }
}

/// Form submission captured for an event. The upstream submission API has no
/// incremental query, so the full set per event is replaced on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormSubmission {
    pub event_id: String,
    pub submission_id: String,
    pub submitted_at: Option<String>,
    pub submitter_name: Option<String>,
    pub submitter_email: Option<String>,
    pub responses: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinator {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineNote {
    pub id: i64,
    pub event_id: String,
    pub author_name: String,
    pub note: String,
    pub created_at: String,
}

/// Event row joined with its meta and assigned coordinator for read paths.
#[derive(Debug, Clone, Serialize)]
pub struct EventWithMeta {
    #[serde(flatten)]
    pub event: EventRecord,
    pub status: EventStatus,
    pub coordinator_id: Option<i64>,
    pub setup_notes: Option<String>,
    pub estimated_attendance: Option<String>,
    pub event_locations: Option<String>,
    pub additional_comments: Option<String>,
    pub coordinator_name: Option<String>,
    pub coordinator_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_submissions: Option<Vec<FormSubmission>>,
}

/// Filters accepted by the event list query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub campus: Option<String>,
    pub event_type: Option<String>,
    pub status: Option<EventStatus>,
    /// `Some(None)` selects events with no coordinator assigned.
    pub coordinator_id: Option<Option<i64>>,
}

/// Outcome of one reconciliation run. Counters reflect successful writes;
/// per-record failures land in `errors` without aborting the run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResult {
    /// Stamped by the engine at the start of the run.
    pub run_id: String,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub total: usize,
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Snapshot of sync state for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub total_events: i64,
    pub last_sync_at: Option<String>,
}
