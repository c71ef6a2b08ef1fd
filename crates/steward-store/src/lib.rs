//! SQLite persistence for synchronized events and the human-owned state that
//! hangs off them (status metadata, coordinators, timeline notes).

use std::collections::HashSet;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, SqlitePool};
use steward_core::{
    Coordinator, EventFilter, EventRecord, EventStatus, EventWithMeta, FormSubmission, MetaUpdate,
    SyncStatus, TimelineNote,
};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "steward-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("encoding rooms column: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if missing) and migrates the database at `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options: SqliteConnectOptions = database_url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Single-connection in-memory store, used by tests and ad-hoc tooling.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options: SqliteConnectOptions = "sqlite::memory:"
            .parse::<SqliteConnectOptions>()?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Ids of every locally stored event, loaded once per sync run for the
    /// diff phase.
    pub async fn event_ids(&self) -> Result<HashSet<String>, StoreError> {
        let rows = sqlx::query("SELECT id FROM events")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("id").map_err(StoreError::from))
            .collect()
    }

    /// Inserts a new event row and bootstraps its metadata row in the same
    /// transaction. A failure on either side rolls both back, so an event can
    /// never exist without metadata.
    pub async fn insert_event(&self, record: &EventRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        bind_event_insert(record)?.execute(&mut *tx).await?;
        sqlx::query(
            "INSERT INTO event_meta (event_id, status, updated_at) VALUES (?, ?, ?)",
        )
        .bind(&record.id)
        .bind(EventStatus::default().as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Overwrites every sync-owned column for an existing event. Metadata
    /// columns are deliberately untouched.
    pub async fn update_event(&self, record: &EventRecord) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE events SET title = ?, event_type = ?, description = ?, start_at = ?, \
             end_at = ?, campus = ?, rooms = ?, contact_name = ?, contact_email = ?, \
             contact_phone = ?, owner = ?, form_url = ?, synced_at = ? WHERE id = ?",
        )
        .bind(&record.title)
        .bind(&record.event_type)
        .bind(&record.description)
        .bind(&record.start_at)
        .bind(&record.end_at)
        .bind(&record.campus)
        .bind(serde_json::to_string(&record.rooms)?)
        .bind(&record.contact_name)
        .bind(&record.contact_email)
        .bind(&record.contact_phone)
        .bind(&record.owner)
        .bind(&record.form_url)
        .bind(&record.synced_at)
        .bind(&record.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes the given event ids in one statement; metadata, submissions and
    /// notes follow via cascade. Callers batch the id list to bound query
    /// size.
    pub async fn delete_events(&self, ids: &[String]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut builder = QueryBuilder::new("DELETE FROM events WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        drop(separated);
        builder.push(")");
        let result = builder.build().execute(&self.pool).await?;
        debug!(deleted = result.rows_affected(), "deleted event batch");
        Ok(result.rows_affected())
    }

    /// Full replacement of an event's submission set: delete-then-insert in
    /// one transaction, so a failure leaves either the old set or the new one,
    /// never a mix.
    pub async fn replace_submissions(
        &self,
        event_id: &str,
        submissions: &[FormSubmission],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM event_form_submissions WHERE event_id = ?")
            .bind(event_id)
            .execute(&mut *tx)
            .await?;
        for submission in submissions {
            sqlx::query(
                "INSERT INTO event_form_submissions \
                 (event_id, submission_id, submitted_at, submitter_name, submitter_email, responses) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(event_id)
            .bind(&submission.submission_id)
            .bind(&submission.submitted_at)
            .bind(&submission.submitter_name)
            .bind(&submission.submitter_email)
            .bind(&submission.responses)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Events joined with metadata and coordinator, filtered and ordered by
    /// start time. A missing meta row reads as the default status.
    pub async fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventWithMeta>, StoreError> {
        let mut builder = QueryBuilder::new(
            "SELECT e.id, e.title, e.event_type, e.description, e.start_at, e.end_at, \
             e.campus, e.rooms, e.contact_name, e.contact_email, e.contact_phone, e.owner, \
             e.form_url, e.synced_at, m.status, m.coordinator_id, m.setup_notes, \
             m.estimated_attendance, m.event_locations, m.additional_comments, \
             c.name AS coordinator_name, c.email AS coordinator_email \
             FROM events e \
             LEFT JOIN event_meta m ON m.event_id = e.id \
             LEFT JOIN coordinators c ON c.id = m.coordinator_id \
             WHERE 1 = 1",
        );

        if let Some(start_date) = &filter.start_date {
            builder.push(" AND datetime(e.start_at) >= datetime(");
            builder.push_bind(start_date);
            builder.push(")");
        }
        if let Some(end_date) = &filter.end_date {
            builder.push(" AND datetime(e.start_at) <= datetime(");
            builder.push_bind(end_date);
            builder.push(")");
        }
        if let Some(campus) = &filter.campus {
            builder.push(" AND e.campus = ");
            builder.push_bind(campus);
        }
        if let Some(event_type) = &filter.event_type {
            builder.push(" AND e.event_type = ");
            builder.push_bind(event_type);
        }
        match &filter.coordinator_id {
            Some(None) => {
                builder.push(" AND m.coordinator_id IS NULL");
            }
            Some(Some(coordinator_id)) => {
                builder.push(" AND m.coordinator_id = ");
                builder.push_bind(*coordinator_id);
            }
            None => {}
        }
        builder.push(" ORDER BY e.start_at");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            events.push(event_with_meta_from_row(row)?);
        }

        // Status lives in event_meta and defaults when the row is missing, so
        // it is filtered after the join rather than in SQL.
        if let Some(status) = filter.status {
            events.retain(|event| event.status == status);
        }
        Ok(events)
    }

    /// One event with metadata and its submissions, or `None`.
    pub async fn get_event(&self, id: &str) -> Result<Option<EventWithMeta>, StoreError> {
        let row = sqlx::query(
            "SELECT e.id, e.title, e.event_type, e.description, e.start_at, e.end_at, \
             e.campus, e.rooms, e.contact_name, e.contact_email, e.contact_phone, e.owner, \
             e.form_url, e.synced_at, m.status, m.coordinator_id, m.setup_notes, \
             m.estimated_attendance, m.event_locations, m.additional_comments, \
             c.name AS coordinator_name, c.email AS coordinator_email \
             FROM events e \
             LEFT JOIN event_meta m ON m.event_id = e.id \
             LEFT JOIN coordinators c ON c.id = m.coordinator_id \
             WHERE e.id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut event = event_with_meta_from_row(&row)?;

        let submission_rows = sqlx::query(
            "SELECT event_id, submission_id, submitted_at, submitter_name, submitter_email, \
             responses FROM event_form_submissions WHERE event_id = ? ORDER BY submitted_at",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let mut submissions = Vec::with_capacity(submission_rows.len());
        for row in &submission_rows {
            submissions.push(FormSubmission {
                event_id: row.try_get("event_id")?,
                submission_id: row.try_get("submission_id")?,
                submitted_at: row.try_get("submitted_at")?,
                submitter_name: row.try_get("submitter_name")?,
                submitter_email: row.try_get("submitter_email")?,
                responses: row.try_get("responses")?,
            });
        }
        event.form_submissions = Some(submissions);
        Ok(Some(event))
    }

    /// Applies a partial metadata update, creating the row when absent.
    /// Sync-owned event columns are never touched from here.
    pub async fn update_meta(&self, event_id: &str, update: &MetaUpdate) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let exists = sqlx::query("SELECT event_id FROM event_meta WHERE event_id = ?")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();

        if exists {
            let mut builder = QueryBuilder::new("UPDATE event_meta SET updated_at = ");
            builder.push_bind(&now);
            if let Some(status) = update.status {
                builder.push(", status = ");
                builder.push_bind(status.as_str());
            }
            if let Some(coordinator_id) = &update.coordinator_id {
                builder.push(", coordinator_id = ");
                builder.push_bind(*coordinator_id);
            }
            if let Some(setup_notes) = &update.setup_notes {
                builder.push(", setup_notes = ");
                builder.push_bind(setup_notes.as_deref());
            }
            if let Some(estimated_attendance) = &update.estimated_attendance {
                builder.push(", estimated_attendance = ");
                builder.push_bind(estimated_attendance.as_deref());
            }
            if let Some(event_locations) = &update.event_locations {
                builder.push(", event_locations = ");
                builder.push_bind(event_locations.as_deref());
            }
            if let Some(additional_comments) = &update.additional_comments {
                builder.push(", additional_comments = ");
                builder.push_bind(additional_comments.as_deref());
            }
            builder.push(" WHERE event_id = ");
            builder.push_bind(event_id);
            builder.build().execute(&self.pool).await?;
        } else {
            sqlx::query(
                "INSERT INTO event_meta (event_id, status, coordinator_id, setup_notes, \
                 estimated_attendance, event_locations, additional_comments, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(event_id)
            .bind(update.status.unwrap_or_default().as_str())
            .bind(update.coordinator_id.clone().flatten())
            .bind(update.setup_notes.clone().flatten())
            .bind(update.estimated_attendance.clone().flatten())
            .bind(update.event_locations.clone().flatten())
            .bind(update.additional_comments.clone().flatten())
            .bind(&now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// All coordinators ordered by name. Duplicate names (case-insensitive)
    /// are folded onto the first id first, re-pointing any meta rows at the
    /// surviving coordinator; this path can run concurrently with a sync pass
    /// since it never touches the events table.
    pub async fn coordinators(&self) -> Result<Vec<Coordinator>, StoreError> {
        let rows = sqlx::query("SELECT id, name FROM coordinators ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut first_id_by_name: std::collections::HashMap<String, i64> =
            std::collections::HashMap::new();
        let mut duplicates: Vec<(i64, i64)> = Vec::new();
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            let name: String = row.try_get("name")?;
            let key = name.trim().to_lowercase();
            match first_id_by_name.get(&key) {
                None => {
                    first_id_by_name.insert(key, id);
                }
                Some(&canonical_id) if canonical_id != id => {
                    duplicates.push((id, canonical_id));
                }
                Some(_) => {}
            }
        }

        for (duplicate_id, canonical_id) in duplicates {
            let mut tx = self.pool.begin().await?;
            sqlx::query("UPDATE event_meta SET coordinator_id = ? WHERE coordinator_id = ?")
                .bind(canonical_id)
                .bind(duplicate_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM coordinators WHERE id = ?")
                .bind(duplicate_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }

        let rows = sqlx::query("SELECT id, name, email, created_at FROM coordinators ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Coordinator {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    email: row.try_get("email")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    pub async fn add_coordinator(
        &self,
        name: &str,
        email: Option<&str>,
    ) -> Result<Coordinator, StoreError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO coordinators (name, email, created_at) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(email)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(Coordinator {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            email: email.map(str::to_string),
            created_at: now,
        })
    }

    /// Timeline notes for an event, newest first.
    pub async fn timeline_notes(&self, event_id: &str) -> Result<Vec<TimelineNote>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, event_id, author_name, note, created_at FROM event_timeline_notes \
             WHERE event_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(TimelineNote {
                    id: row.try_get("id")?,
                    event_id: row.try_get("event_id")?,
                    author_name: row.try_get("author_name")?,
                    note: row.try_get("note")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    pub async fn create_timeline_note(
        &self,
        event_id: &str,
        author_name: &str,
        note: &str,
    ) -> Result<TimelineNote, StoreError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO event_timeline_notes (event_id, author_name, note, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(event_id)
        .bind(author_name)
        .bind(note)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(TimelineNote {
            id: result.last_insert_rowid(),
            event_id: event_id.to_string(),
            author_name: author_name.to_string(),
            note: note.to_string(),
            created_at: now,
        })
    }

    /// Returns whether a note was actually deleted.
    pub async fn delete_timeline_note(
        &self,
        event_id: &str,
        note_id: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM event_timeline_notes WHERE event_id = ? AND id = ?",
        )
        .bind(event_id)
        .bind(note_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn sync_status(&self) -> Result<SyncStatus, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total, MAX(synced_at) AS last FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(SyncStatus {
            total_events: row.try_get("total")?,
            last_sync_at: row.try_get("last")?,
        })
    }
}

fn bind_event_insert(
    record: &EventRecord,
) -> Result<sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>>, StoreError> {
    Ok(sqlx::query(
        "INSERT INTO events (id, title, event_type, description, start_at, end_at, campus, \
         rooms, contact_name, contact_email, contact_phone, owner, form_url, synced_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.id)
    .bind(&record.title)
    .bind(&record.event_type)
    .bind(&record.description)
    .bind(&record.start_at)
    .bind(&record.end_at)
    .bind(&record.campus)
    .bind(serde_json::to_string(&record.rooms)?)
    .bind(&record.contact_name)
    .bind(&record.contact_email)
    .bind(&record.contact_phone)
    .bind(&record.owner)
    .bind(&record.form_url)
    .bind(&record.synced_at))
}

fn event_with_meta_from_row(row: &SqliteRow) -> Result<EventWithMeta, StoreError> {
    let rooms_json: Option<String> = row.try_get("rooms")?;
    let rooms: Vec<String> = rooms_json
        .as_deref()
        .and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default();
    let status: Option<String> = row.try_get("status")?;

    Ok(EventWithMeta {
        event: EventRecord {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            event_type: row.try_get("event_type")?,
            description: row.try_get("description")?,
            start_at: row.try_get("start_at")?,
            end_at: row.try_get("end_at")?,
            campus: row.try_get("campus")?,
            rooms,
            contact_name: row.try_get("contact_name")?,
            contact_email: row.try_get("contact_email")?,
            contact_phone: row.try_get("contact_phone")?,
            owner: row.try_get("owner")?,
            form_url: row.try_get("form_url")?,
            synced_at: row.try_get("synced_at")?,
        },
        status: status
            .as_deref()
            .and_then(EventStatus::parse)
            .unwrap_or_default(),
        coordinator_id: row.try_get("coordinator_id")?,
        setup_notes: row.try_get("setup_notes")?,
        estimated_attendance: row.try_get("estimated_attendance")?,
        event_locations: row.try_get("event_locations")?,
        additional_comments: row.try_get("additional_comments")?,
        coordinator_name: row.try_get("coordinator_name")?,
        coordinator_email: row.try_get("coordinator_email")?,
        form_submissions: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> EventRecord {
        EventRecord {
            id: id.to_string(),
            title: format!("Event {id}"),
            event_type: Some("Conference".to_string()),
            description: None,
            start_at: "2026-09-12T14:00:00Z".to_string(),
            end_at: Some("2026-09-12T16:00:00Z".to_string()),
            campus: Some("Main Campus".to_string()),
            rooms: vec!["Room A".to_string(), "Room B".to_string()],
            contact_name: Some("Ana Pop".to_string()),
            contact_email: Some("ana@example.org".to_string()),
            contact_phone: None,
            owner: Some("Ana Pop".to_string()),
            form_url: None,
            synced_at: "2026-08-30T00:00:00Z".to_string(),
        }
    }

    fn submission(event_id: &str, submission_id: &str) -> FormSubmission {
        FormSubmission {
            event_id: event_id.to_string(),
            submission_id: submission_id.to_string(),
            submitted_at: Some("2026-08-01T12:00:00Z".to_string()),
            submitter_name: Some("Ion Micu".to_string()),
            submitter_email: None,
            responses: Some("{\"headcount\":\"40\"}".to_string()),
        }
    }

    #[tokio::test]
    async fn insert_bootstraps_meta_with_default_status() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_event(&record("a")).await.unwrap();

        let event = store.get_event("a").await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::NotContacted);
        assert_eq!(event.event.rooms, vec!["Room A", "Room B"]);

        // A second insert of the same id must fail rather than duplicate.
        assert!(store.insert_event(&record("a")).await.is_err());
    }

    #[tokio::test]
    async fn update_overwrites_sync_columns_but_not_meta() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_event(&record("a")).await.unwrap();
        store
            .update_meta(
                "a",
                &MetaUpdate {
                    status: Some(EventStatus::Contacted),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let mut changed = record("a");
        changed.title = "Renamed".to_string();
        changed.campus = None;
        store.update_event(&changed).await.unwrap();

        let event = store.get_event("a").await.unwrap().unwrap();
        assert_eq!(event.event.title, "Renamed");
        assert!(event.event.campus.is_none());
        assert_eq!(event.status, EventStatus::Contacted);
    }

    #[tokio::test]
    async fn delete_cascades_to_meta_and_submissions() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_event(&record("a")).await.unwrap();
        store.insert_event(&record("b")).await.unwrap();
        store
            .replace_submissions("a", &[submission("a", "s1")])
            .await
            .unwrap();

        let deleted = store
            .delete_events(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        assert!(store.get_event("a").await.unwrap().is_none());
        let ids = store.event_ids().await.unwrap();
        assert_eq!(ids.len(), 1);
        assert!(ids.contains("b"));

        let orphans = sqlx::query("SELECT COUNT(*) AS n FROM event_form_submissions")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let count: i64 = orphans.try_get("n").unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn replace_submissions_is_a_full_swap() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_event(&record("a")).await.unwrap();
        store
            .replace_submissions("a", &[submission("a", "s1"), submission("a", "s2")])
            .await
            .unwrap();
        store
            .replace_submissions("a", &[submission("a", "s3")])
            .await
            .unwrap();

        let event = store.get_event("a").await.unwrap().unwrap();
        let submissions = event.form_submissions.unwrap();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].submission_id, "s3");
    }

    #[tokio::test]
    async fn meta_update_is_partial_and_upserts() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_event(&record("a")).await.unwrap();
        store
            .update_meta(
                "a",
                &MetaUpdate {
                    setup_notes: Some(Some("bring chairs".to_string())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .update_meta(
                "a",
                &MetaUpdate {
                    status: Some(EventStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let event = store.get_event("a").await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Completed);
        assert_eq!(event.setup_notes.as_deref(), Some("bring chairs"));
    }

    #[tokio::test]
    async fn list_events_applies_filters_and_status_default() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_event(&record("a")).await.unwrap();
        let mut other = record("b");
        other.campus = Some("Annex".to_string());
        other.start_at = "2026-10-01T10:00:00Z".to_string();
        store.insert_event(&other).await.unwrap();

        let all = store.list_events(&EventFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].event.id, "a"); // ordered by start_at
        assert_eq!(all[0].status, EventStatus::NotContacted);

        let annex_only = store
            .list_events(&EventFilter {
                campus: Some("Annex".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(annex_only.len(), 1);
        assert_eq!(annex_only[0].event.id, "b");

        let unassigned = store
            .list_events(&EventFilter {
                coordinator_id: Some(None),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(unassigned.len(), 2);
    }

    #[tokio::test]
    async fn coordinator_duplicates_fold_onto_first_id() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_event(&record("a")).await.unwrap();
        let first = store.add_coordinator("Maria Ilie", None).await.unwrap();
        let duplicate = store.add_coordinator("maria ilie ", None).await.unwrap();
        store
            .update_meta(
                "a",
                &MetaUpdate {
                    coordinator_id: Some(Some(duplicate.id)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let coordinators = store.coordinators().await.unwrap();
        assert_eq!(coordinators.len(), 1);
        assert_eq!(coordinators[0].id, first.id);

        let event = store.get_event("a").await.unwrap().unwrap();
        assert_eq!(event.coordinator_id, Some(first.id));
    }

    #[tokio::test]
    async fn timeline_notes_crud() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_event(&record("a")).await.unwrap();

        let note = store
            .create_timeline_note("a", "Ana", "called the contact")
            .await
            .unwrap();
        store
            .create_timeline_note("a", "Ana", "confirmed rooms")
            .await
            .unwrap();

        let notes = store.timeline_notes("a").await.unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].note, "confirmed rooms"); // newest first

        assert!(store.delete_timeline_note("a", note.id).await.unwrap());
        assert!(!store.delete_timeline_note("a", note.id).await.unwrap());
        assert_eq!(store.timeline_notes("a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sync_status_reports_count_and_latest_stamp() {
        let store = SqliteStore::in_memory().await.unwrap();
        let empty = store.sync_status().await.unwrap();
        assert_eq!(empty.total_events, 0);
        assert!(empty.last_sync_at.is_none());

        store.insert_event(&record("a")).await.unwrap();
        let mut later = record("b");
        later.synced_at = "2026-08-31T00:00:00Z".to_string();
        store.insert_event(&later).await.unwrap();

        let status = store.sync_status().await.unwrap();
        assert_eq!(status.total_events, 2);
        assert_eq!(status.last_sync_at.as_deref(), Some("2026-08-31T00:00:00Z"));
    }
}
