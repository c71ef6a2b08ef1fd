//! Axum JSON API: sync triggers plus the read/admin surface over the store.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, patch},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use steward_core::{EventFilter, EventStatus, MetaUpdate, SyncResult};
use steward_engine::{CalendarApi, SyncConfig, SyncEngine};
use steward_store::SqliteStore;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "steward-web";

/// Manual sync triggers closer together than this are rejected with 429. Two
/// overlapping runs would race on create/delete decisions.
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub store: SqliteStore,
    pub api: Arc<dyn CalendarApi>,
    pub sync_config: SyncConfig,
    /// Bearer token required on `/api/cron` when set.
    pub cron_secret: Option<String>,
    last_sync_started: Arc<Mutex<Option<Instant>>>,
}

impl AppState {
    pub fn new(store: SqliteStore, api: Arc<dyn CalendarApi>) -> Self {
        Self {
            store,
            api,
            sync_config: SyncConfig::default(),
            cron_secret: std::env::var("CRON_SECRET").ok().filter(|v| !v.is_empty()),
            last_sync_started: Arc::new(Mutex::new(None)),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/sync",
            get(sync_status_handler).post(trigger_sync_handler),
        )
        .route("/api/cron", get(cron_handler))
        .route("/api/events", get(list_events_handler))
        .route("/api/events/{id}", get(get_event_handler))
        .route("/api/events/{id}/meta", patch(update_meta_handler))
        .route(
            "/api/events/{id}/timeline-notes",
            get(list_notes_handler).post(create_note_handler),
        )
        .route(
            "/api/events/{id}/timeline-notes/{note_id}",
            delete(delete_note_handler),
        )
        .route("/api/coordinators", get(coordinators_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn run_sync(state: &AppState) -> SyncResult {
    SyncEngine::new(
        state.api.clone(),
        state.store.clone(),
        state.sync_config.clone(),
    )
    .run()
    .await
}

fn sync_body(result: &SyncResult) -> serde_json::Value {
    json!({
        "ok": result.ok(),
        "run_id": result.run_id,
        "created": result.created,
        "updated": result.updated,
        "deleted": result.deleted,
        "total": result.total,
        "errors": result.errors,
        "synced_at": Utc::now().to_rfc3339(),
    })
}

async fn sync_status_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.sync_status().await {
        Ok(status) => Json(json!({
            "ok": true,
            "total_events": status.total_events,
            "last_sync_at": status.last_sync_at,
        }))
        .into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn trigger_sync_handler(State(state): State<Arc<AppState>>) -> Response {
    {
        let mut last = match state.last_sync_started.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(started) = *last {
            let elapsed = started.elapsed();
            if elapsed < MIN_SYNC_INTERVAL {
                let wait = (MIN_SYNC_INTERVAL - elapsed).as_secs().max(1);
                warn!(wait_seconds = wait, "manual sync rejected, too soon");
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({
                        "error": "sync already ran recently",
                        "retry_after_seconds": wait,
                    })),
                )
                    .into_response();
            }
        }
        *last = Some(Instant::now());
    }

    let result = run_sync(&state).await;
    Json(sync_body(&result)).into_response()
}

async fn cron_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.cron_secret {
        let authorized = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value == format!("Bearer {secret}"));
        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "unauthorized" })),
            )
                .into_response();
        }
    }

    let started = Instant::now();
    let result = run_sync(&state).await;
    let mut body = sync_body(&result);
    body["duration_ms"] = json!(started.elapsed().as_millis() as u64);
    Json(body).into_response()
}

#[derive(Debug, Deserialize, Default)]
struct EventsQuery {
    start_date: Option<String>,
    end_date: Option<String>,
    campus: Option<String>,
    event_type: Option<String>,
    status: Option<EventStatus>,
    coordinator_id: Option<i64>,
    /// `unassigned=true` selects events with no coordinator; wins over
    /// `coordinator_id`.
    unassigned: Option<bool>,
}

impl EventsQuery {
    fn into_filter(self) -> EventFilter {
        let coordinator_id = if self.unassigned == Some(true) {
            Some(None)
        } else {
            self.coordinator_id.map(Some)
        };
        EventFilter {
            start_date: self.start_date,
            end_date: self.end_date,
            campus: self.campus,
            event_type: self.event_type,
            status: self.status,
            coordinator_id,
        }
    }
}

async fn list_events_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Response {
    match state.store.list_events(&query.into_filter()).await {
        Ok(events) => Json(events).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn get_event_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    match state.store.get_event(&id).await {
        Ok(Some(event)) => Json(event).into_response(),
        Ok(None) => not_found("event not found"),
        Err(err) => server_error(err.into()),
    }
}

async fn update_meta_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    Json(update): Json<MetaUpdate>,
) -> Response {
    if update.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "no fields to update" })),
        )
            .into_response();
    }
    match state.store.get_event(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("event not found"),
        Err(err) => return server_error(err.into()),
    }
    match state.store.update_meta(&id, &update).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn list_notes_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    match state.store.timeline_notes(&id).await {
        Ok(notes) => Json(notes).into_response(),
        Err(err) => server_error(err.into()),
    }
}

#[derive(Debug, Deserialize)]
struct NewNote {
    author_name: String,
    note: String,
}

async fn create_note_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    Json(body): Json<NewNote>,
) -> Response {
    if body.author_name.trim().is_empty() || body.note.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "author_name and note are required" })),
        )
            .into_response();
    }
    match state.store.get_event(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("event not found"),
        Err(err) => return server_error(err.into()),
    }
    match state
        .store
        .create_timeline_note(&id, body.author_name.trim(), body.note.trim())
        .await
    {
        Ok(note) => (StatusCode::CREATED, Json(note)).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn delete_note_handler(
    State(state): State<Arc<AppState>>,
    AxumPath((id, note_id)): AxumPath<(String, i64)>,
) -> Response {
    match state.store.delete_timeline_note(&id, note_id).await {
        Ok(true) => Json(json!({ "ok": true })).into_response(),
        Ok(false) => not_found("note not found"),
        Err(err) => server_error(err.into()),
    }
}

async fn coordinators_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.coordinators().await {
        Ok(coordinators) => Json(coordinators).into_response(),
        Err(err) => server_error(err.into()),
    }
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
}

fn server_error(err: anyhow::Error) -> Response {
    warn!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use steward_client::Resource;
    use steward_core::{EventRecord, FormSubmission};
    use tower::ServiceExt;

    struct EmptyApi;

    #[async_trait]
    impl CalendarApi for EmptyApi {
        async fn approved_instances(
            &self,
            _days_ahead: i64,
        ) -> anyhow::Result<(Vec<Resource>, Vec<Resource>)> {
            Ok((vec![], vec![]))
        }

        async fn instance_rooms(&self, _instance_id: &str) -> anyhow::Result<Vec<String>> {
            Ok(vec![])
        }

        async fn event_tags(&self, _event_id: &str) -> anyhow::Result<Vec<String>> {
            Ok(vec![])
        }

        async fn event_submissions(&self, _event_id: &str) -> anyhow::Result<Vec<FormSubmission>> {
            Ok(vec![])
        }
    }

    async fn state() -> AppState {
        let store = SqliteStore::in_memory().await.unwrap();
        AppState {
            store,
            api: Arc::new(EmptyApi),
            sync_config: SyncConfig::default(),
            cron_secret: None,
            last_sync_started: Arc::new(Mutex::new(None)),
        }
    }

    fn record(id: &str) -> EventRecord {
        EventRecord {
            id: id.to_string(),
            title: "Open House".to_string(),
            event_type: None,
            description: None,
            start_at: "2026-09-12T14:00:00Z".to_string(),
            end_at: None,
            campus: Some("Main Campus".to_string()),
            rooms: vec![],
            contact_name: None,
            contact_email: None,
            contact_phone: None,
            owner: None,
            form_url: None,
            synced_at: "2026-08-30T00:00:00Z".to_string(),
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn manual_sync_is_interval_gated() {
        let app = app(state().await);

        let first = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sync")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let body = body_json(first).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["created"], 0);

        let second = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sync")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(second).await;
        assert!(body["retry_after_seconds"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn cron_requires_bearer_when_secret_set() {
        let mut state = state().await;
        state.cron_secret = Some("s3cret".to_string());
        let app = app(state);

        let unauthorized = app.clone().oneshot(get("/api/cron")).await.unwrap();
        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

        let wrong = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/cron")
                    .header("authorization", "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let authorized = app
            .oneshot(
                Request::builder()
                    .uri("/api/cron")
                    .header("authorization", "Bearer s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(authorized.status(), StatusCode::OK);
        let body = body_json(authorized).await;
        assert!(body["duration_ms"].is_u64());
    }

    #[tokio::test]
    async fn cron_is_open_without_secret() {
        let app = app(state().await);
        let response = app.oneshot(get("/api/cron")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn events_list_and_detail() {
        let state = state().await;
        state.store.insert_event(&record("a")).await.unwrap();
        let app = app(state);

        let list = app.clone().oneshot(get("/api/events")).await.unwrap();
        assert_eq!(list.status(), StatusCode::OK);
        let body = body_json(list).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["status"], "not_contacted");

        let filtered = app
            .clone()
            .oneshot(get("/api/events?campus=Annex"))
            .await
            .unwrap();
        assert_eq!(body_json(filtered).await.as_array().unwrap().len(), 0);

        let detail = app.clone().oneshot(get("/api/events/a")).await.unwrap();
        assert_eq!(detail.status(), StatusCode::OK);
        let body = body_json(detail).await;
        assert_eq!(body["title"], "Open House");
        assert!(body["form_submissions"].is_array());

        let missing = app.oneshot(get("/api/events/nope")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn meta_patch_validates_and_applies() {
        let state = state().await;
        state.store.insert_event(&record("a")).await.unwrap();
        let app = app(state);

        let empty = app
            .clone()
            .oneshot(json_request("PATCH", "/api/events/a/meta", json!({})))
            .await
            .unwrap();
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

        let missing = app
            .clone()
            .oneshot(json_request(
                "PATCH",
                "/api/events/nope/meta",
                json!({ "status": "contacted" }),
            ))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let ok = app
            .clone()
            .oneshot(json_request(
                "PATCH",
                "/api/events/a/meta",
                json!({ "status": "contacted", "setup_notes": "call first" }),
            ))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let detail = body_json(app.oneshot(get("/api/events/a")).await.unwrap()).await;
        assert_eq!(detail["status"], "contacted");
        assert_eq!(detail["setup_notes"], "call first");
    }

    #[tokio::test]
    async fn timeline_note_lifecycle() {
        let state = state().await;
        state.store.insert_event(&record("a")).await.unwrap();
        let app = app(state);

        let blank = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/events/a/timeline-notes",
                json!({ "author_name": " ", "note": "x" }),
            ))
            .await
            .unwrap();
        assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

        let created = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/events/a/timeline-notes",
                json!({ "author_name": "Ana", "note": "booked the hall" }),
            ))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let note = body_json(created).await;
        let note_id = note["id"].as_i64().unwrap();

        let listed = body_json(
            app.clone()
                .oneshot(get("/api/events/a/timeline-notes"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let deleted = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/events/a/timeline-notes/{note_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::OK);

        let again = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/events/a/timeline-notes/{note_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn coordinators_endpoint_lists_rows() {
        let state = state().await;
        state.store.add_coordinator("Maria Ilie", None).await.unwrap();
        let app = app(state);

        let body = body_json(app.oneshot(get("/api/coordinators")).await.unwrap()).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["name"], "Maria Ilie");
    }
}
