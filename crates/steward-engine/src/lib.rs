//! Reconciliation engine: fetch the approved calendar window, enrich each
//! instance, diff against local rows and write the difference. One run is a
//! strictly sequential pass; overlap protection belongs to whoever schedules
//! runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use steward_client::{CalendarClient, Resource};
use steward_core::{EventRecord, FormSubmission, SyncResult};
use steward_store::SqliteStore;
use steward_transform::{Enrichment, IncludedIndex};
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "steward-engine";

/// Recurring internal gatherings that should never surface as coordinated
/// events, matched against the resolved event type.
pub const DEFAULT_EXCLUDED_EVENT_TYPES: &[&str] = &["Sunday Service", "Worship Practice"];

/// Remote calendar surface the engine drives. Implemented for the real
/// [`CalendarClient`]; tests substitute counting or failing mocks.
#[async_trait]
pub trait CalendarApi: Send + Sync {
    /// Approved instances in the look-ahead window, plus the combined
    /// included resource set.
    async fn approved_instances(&self, days_ahead: i64) -> Result<(Vec<Resource>, Vec<Resource>)>;
    async fn instance_rooms(&self, instance_id: &str) -> Result<Vec<String>>;
    async fn event_tags(&self, event_id: &str) -> Result<Vec<String>>;
    /// Submissions for a parent event; `event_id` on the returned rows is the
    /// parent id and gets restamped per local row.
    async fn event_submissions(&self, event_id: &str) -> Result<Vec<FormSubmission>>;
}

/// Write half of the local store as the engine sees it.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn event_ids(&self) -> Result<HashSet<String>>;
    async fn insert_event(&self, record: &EventRecord) -> Result<()>;
    async fn update_event(&self, record: &EventRecord) -> Result<()>;
    async fn delete_events(&self, ids: &[String]) -> Result<u64>;
    async fn replace_submissions(
        &self,
        event_id: &str,
        submissions: &[FormSubmission],
    ) -> Result<()>;
}

#[async_trait]
impl CalendarApi for CalendarClient {
    async fn approved_instances(&self, days_ahead: i64) -> Result<(Vec<Resource>, Vec<Resource>)> {
        Ok(CalendarClient::approved_instances(self, days_ahead).await?)
    }

    async fn instance_rooms(&self, instance_id: &str) -> Result<Vec<String>> {
        Ok(CalendarClient::instance_rooms(self, instance_id).await?)
    }

    async fn event_tags(&self, event_id: &str) -> Result<Vec<String>> {
        Ok(CalendarClient::event_tags(self, event_id).await?)
    }

    async fn event_submissions(&self, event_id: &str) -> Result<Vec<FormSubmission>> {
        let (data, included) = CalendarClient::event_submissions(self, event_id).await?;
        Ok(steward_transform::submissions_from_resources(
            event_id, &data, &included,
        ))
    }
}

#[async_trait]
impl<T> CalendarApi for &T
where
    T: CalendarApi + ?Sized,
{
    async fn approved_instances(&self, days_ahead: i64) -> Result<(Vec<Resource>, Vec<Resource>)> {
        (**self).approved_instances(days_ahead).await
    }

    async fn instance_rooms(&self, instance_id: &str) -> Result<Vec<String>> {
        (**self).instance_rooms(instance_id).await
    }

    async fn event_tags(&self, event_id: &str) -> Result<Vec<String>> {
        (**self).event_tags(event_id).await
    }

    async fn event_submissions(&self, event_id: &str) -> Result<Vec<FormSubmission>> {
        (**self).event_submissions(event_id).await
    }
}

#[async_trait]
impl<T> CalendarApi for Arc<T>
where
    T: CalendarApi + ?Sized,
{
    async fn approved_instances(&self, days_ahead: i64) -> Result<(Vec<Resource>, Vec<Resource>)> {
        (**self).approved_instances(days_ahead).await
    }

    async fn instance_rooms(&self, instance_id: &str) -> Result<Vec<String>> {
        (**self).instance_rooms(instance_id).await
    }

    async fn event_tags(&self, event_id: &str) -> Result<Vec<String>> {
        (**self).event_tags(event_id).await
    }

    async fn event_submissions(&self, event_id: &str) -> Result<Vec<FormSubmission>> {
        (**self).event_submissions(event_id).await
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn event_ids(&self) -> Result<HashSet<String>> {
        Ok(SqliteStore::event_ids(self).await?)
    }

    async fn insert_event(&self, record: &EventRecord) -> Result<()> {
        Ok(SqliteStore::insert_event(self, record).await?)
    }

    async fn update_event(&self, record: &EventRecord) -> Result<()> {
        Ok(SqliteStore::update_event(self, record).await?)
    }

    async fn delete_events(&self, ids: &[String]) -> Result<u64> {
        Ok(SqliteStore::delete_events(self, ids).await?)
    }

    async fn replace_submissions(
        &self,
        event_id: &str,
        submissions: &[FormSubmission],
    ) -> Result<()> {
        Ok(SqliteStore::replace_submissions(self, event_id, submissions).await?)
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Look-ahead window in days.
    pub days_ahead: i64,
    /// Delete statements carry at most this many ids.
    pub delete_batch_size: usize,
    /// Resolved event types dropped from the incoming set.
    pub excluded_event_types: HashSet<String>,
    /// Past this point no further remote calls are issued; remaining
    /// instances are written unenriched.
    pub deadline: Option<Instant>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            days_ahead: 90,
            delete_batch_size: 50,
            excluded_event_types: DEFAULT_EXCLUDED_EVENT_TYPES
                .iter()
                .map(|name| name.to_string())
                .collect(),
            deadline: None,
        }
    }
}

pub struct SyncEngine<A, S> {
    api: A,
    store: S,
    config: SyncConfig,
}

impl<A: CalendarApi, S: EventStore> SyncEngine<A, S> {
    pub fn new(api: A, store: S, config: SyncConfig) -> Self {
        Self { api, store, config }
    }

    /// Runs one full reconciliation pass. Per-record failures are collected
    /// into the result; only a failed listing fetch aborts the run, before
    /// any local write.
    pub async fn run(&self) -> SyncResult {
        let mut result = SyncResult {
            run_id: uuid::Uuid::new_v4().to_string(),
            ..SyncResult::default()
        };

        let (instances, included) = match self.api.approved_instances(self.config.days_ahead).await
        {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(run_id = %result.run_id, error = %err, "listing fetch failed, aborting run");
                result
                    .errors
                    .push(format!("fetching event instances: {err:#}"));
                return result;
            }
        };
        info!(instances = instances.len(), "fetched approved instances");

        let (records, submissions_by_parent) =
            self.enrich(&instances, &included, &mut result).await;
        result.total = records.len();

        let existing = match self.store.event_ids().await {
            Ok(ids) => ids,
            Err(err) => {
                result
                    .errors
                    .push(format!("loading local event ids: {err:#}"));
                return result;
            }
        };
        let incoming_ids: HashSet<String> =
            records.iter().map(|(record, _)| record.id.clone()).collect();

        for (record, parent_id) in &records {
            let write = if existing.contains(&record.id) {
                self.store.update_event(record).await.map(|()| {
                    result.updated += 1;
                })
            } else {
                self.store.insert_event(record).await.map(|()| {
                    result.created += 1;
                })
            };
            if let Err(err) = write {
                result.errors.push(format!("Event {}: {err:#}", record.id));
                continue;
            }
            if let Some(rows) = parent_id
                .as_deref()
                .and_then(|parent| submissions_by_parent.get(parent))
            {
                let restamped: Vec<FormSubmission> = rows
                    .iter()
                    .map(|row| FormSubmission {
                        event_id: record.id.clone(),
                        ..row.clone()
                    })
                    .collect();
                if let Err(err) = self.store.replace_submissions(&record.id, &restamped).await {
                    result.errors.push(format!("Event {}: {err:#}", record.id));
                }
            }
        }

        let mut to_delete: Vec<String> = existing.difference(&incoming_ids).cloned().collect();
        to_delete.sort();
        for batch in to_delete.chunks(self.config.delete_batch_size) {
            match self.store.delete_events(batch).await {
                Ok(deleted) => result.deleted += deleted as usize,
                Err(err) => result
                    .errors
                    .push(format!("deleting {} events: {err:#}", batch.len())),
            }
        }

        info!(
            run_id = %result.run_id,
            created = result.created,
            updated = result.updated,
            deleted = result.deleted,
            errors = result.errors.len(),
            "sync run finished"
        );
        result
    }

    /// Enriches every instance with rooms and its parent's tags, applies the
    /// type exclusion and transforms to local records. Tags and submissions
    /// are looked up once per parent event id.
    async fn enrich(
        &self,
        instances: &[Resource],
        included: &[Resource],
        result: &mut SyncResult,
    ) -> (
        Vec<(EventRecord, Option<String>)>,
        HashMap<String, Vec<FormSubmission>>,
    ) {
        let index = IncludedIndex::new(included);
        let synced_at = Utc::now().to_rfc3339();

        let mut tag_cache: HashMap<String, Option<String>> = HashMap::new();
        let mut submissions_by_parent: HashMap<String, Vec<FormSubmission>> = HashMap::new();
        let mut records = Vec::with_capacity(instances.len());
        let mut deadline_reported = false;

        for instance in instances {
            let parent_id = instance
                .related_one("event")
                .map(|identifier| identifier.id.clone());
            let mut enrichment = Enrichment::default();

            let expired = self
                .config
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline);
            if expired && !deadline_reported {
                result.errors.push(
                    "time budget exhausted; remaining instances synced without enrichment"
                        .to_string(),
                );
                deadline_reported = true;
            }

            if !expired {
                match self.api.instance_rooms(&instance.id).await {
                    Ok(rooms) => enrichment.rooms = rooms,
                    Err(err) => result
                        .errors
                        .push(format!("Event {}: {err:#}", instance.id)),
                }
            }

            if let Some(parent) = &parent_id {
                if let Some(cached) = tag_cache.get(parent) {
                    enrichment.event_type = cached.clone();
                } else if !expired {
                    match self.api.event_tags(parent).await {
                        Ok(tags) => {
                            let first = tags.into_iter().next();
                            tag_cache.insert(parent.clone(), first.clone());
                            enrichment.event_type = first;
                        }
                        Err(err) => result
                            .errors
                            .push(format!("Event {}: {err:#}", instance.id)),
                    }
                    match self.api.event_submissions(parent).await {
                        Ok(rows) => {
                            submissions_by_parent.insert(parent.clone(), rows);
                        }
                        Err(err) => result
                            .errors
                            .push(format!("Event {}: {err:#}", instance.id)),
                    }
                }
            }

            // Excluded instances vanish from the incoming set entirely, so a
            // same-id row from an earlier run falls into the delete phase.
            if let Some(event_type) = &enrichment.event_type {
                if self.config.excluded_event_types.contains(event_type) {
                    debug!(instance = %instance.id, event_type = %event_type, "excluded by type");
                    continue;
                }
            }

            let record =
                steward_transform::event_record(instance, &index, &enrichment, &synced_at);
            records.push((record, parent_id));
        }

        (records, submissions_by_parent)
    }
}
