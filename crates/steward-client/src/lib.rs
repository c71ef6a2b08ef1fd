//! Authenticated client for the upstream calendar's JSON:API-style REST
//! interface: typed resource envelopes, transparent pagination, and request
//! pacing against the shared rate budget.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const CRATE_NAME: &str = "steward-client";

pub const DEFAULT_BASE_URL: &str = "https://api.planningcenteronline.com/calendar/v2";

/// Upstream ceiling is 100 requests per 20 seconds; one request every 210 ms
/// keeps a full run comfortably under it.
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 210;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("calendar API error ({status}): {body}")]
    Http { status: u16, body: String },
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("invalid pagination link: {0}")]
    NextLink(#[from] url::ParseError),
}

/// Kind tag carried by every remote resource. Unrecognized kinds are kept as
/// [`ResourceKind::Other`] so a new upstream type never breaks deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum ResourceKind {
    Event,
    EventInstance,
    EventTime,
    Room,
    Person,
    Tag,
    FormSubmission,
    Other,
}

impl From<String> for ResourceKind {
    fn from(value: String) -> Self {
        ResourceKind::from(value.as_str())
    }
}

impl From<&str> for ResourceKind {
    fn from(value: &str) -> Self {
        match value {
            "Event" => ResourceKind::Event,
            "EventInstance" => ResourceKind::EventInstance,
            "EventTime" => ResourceKind::EventTime,
            "Room" => ResourceKind::Room,
            "Person" => ResourceKind::Person,
            "Tag" => ResourceKind::Tag,
            "FormSubmission" | "EventRequest" => ResourceKind::FormSubmission,
            _ => ResourceKind::Other,
        }
    }
}

/// `(kind, id)` pair used for cross-references between resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RelationshipData {
    One(ResourceIdentifier),
    Many(Vec<ResourceIdentifier>),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub data: Option<RelationshipData>,
}

/// One remote resource: an opaque id plus a kind-specific attribute bag.
/// Relationships point at other resources by `(kind, id)`; the targets live in
/// the flat `included` set returned alongside a page.
#[derive(Debug, Clone, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub id: String,
    #[serde(default)]
    pub attributes: JsonValue,
    #[serde(default)]
    pub relationships: HashMap<String, Relationship>,
}

impl Resource {
    /// To-one relationship target, if present.
    pub fn related_one(&self, name: &str) -> Option<&ResourceIdentifier> {
        match self.relationships.get(name)?.data.as_ref()? {
            RelationshipData::One(identifier) => Some(identifier),
            RelationshipData::Many(identifiers) => identifiers.first(),
        }
    }

    /// String attribute lookup on the attribute bag.
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(JsonValue::as_str)
    }
}

/// One page of a remote collection. `next` is the relative endpoint of the
/// following page, or `None` when the collection is exhausted.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: Vec<Resource>,
    pub included: Vec<Resource>,
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DataEnvelope {
    Many(Vec<Resource>),
    One(Resource),
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MetaNext {
    offset: u64,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(default)]
    next: Option<MetaNext>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<DataEnvelope>,
    #[serde(default)]
    included: Vec<Resource>,
    #[serde(default)]
    links: Links,
    #[serde(default)]
    meta: Meta,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub app_id: String,
    pub secret: String,
    pub base_url: String,
    pub request_delay: Duration,
    pub timeout: Duration,
}

impl ClientConfig {
    /// Reads credentials and overrides from the environment. Missing
    /// credentials are a fatal configuration error, surfaced before any
    /// network call is made.
    pub fn from_env() -> Result<Self, ApiError> {
        let app_id = std::env::var("PCO_APP_ID").ok().filter(|v| !v.is_empty());
        let secret = std::env::var("PCO_SECRET").ok().filter(|v| !v.is_empty());
        let (app_id, secret) = match (app_id, secret) {
            (Some(app_id), Some(secret)) => (app_id, secret),
            _ => {
                return Err(ApiError::Config(
                    "PCO_APP_ID and PCO_SECRET must be set in the environment".to_string(),
                ))
            }
        };

        let base_url = std::env::var("PCO_BASE_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let request_delay = std::env::var("SYNC_REQUEST_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_REQUEST_DELAY_MS));

        Ok(Self {
            app_id,
            secret,
            base_url,
            request_delay,
            timeout: Duration::from_secs(30),
        })
    }
}

/// HTTP access to the calendar API. Every request authenticates with HTTP
/// Basic credentials and is followed by a fixed pacing delay, so callers can
/// issue calls back-to-back without tracking the rate budget themselves.
#[derive(Debug)]
pub struct CalendarClient {
    http: reqwest::Client,
    base_url: String,
    app_id: String,
    secret: String,
    request_delay: Duration,
}

impl CalendarClient {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            app_id: config.app_id,
            secret: config.secret,
            request_delay: config.request_delay,
        })
    }

    pub fn from_env() -> Result<Self, ApiError> {
        Self::new(ClientConfig::from_env()?)
    }

    async fn get_envelope(&self, endpoint: &str) -> Result<Envelope, ApiError> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(%url, "calendar API request");

        let response = self
            .http
            .get(&url)
            .basic_auth(&self.app_id, Some(&self.secret))
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let envelope = response.json::<Envelope>().await?;
        tokio::time::sleep(self.request_delay).await;
        Ok(envelope)
    }

    /// Fetches one page of a collection, resolving whichever pagination style
    /// the response carries (absolute next link or offset cursor) into a
    /// relative next endpoint.
    pub async fn fetch_page(&self, endpoint: &str) -> Result<Page, ApiError> {
        let envelope = self.get_envelope(endpoint).await?;

        let data = match envelope.data {
            Some(DataEnvelope::Many(resources)) => resources,
            Some(DataEnvelope::One(resource)) => vec![resource],
            None => Vec::new(),
        };

        let next = match envelope.links.next {
            Some(link) => Some(self.relative_endpoint(&link)?),
            None => envelope
                .meta
                .next
                .map(|cursor| with_offset(endpoint, cursor.offset)),
        };

        Ok(Page {
            data,
            included: envelope.included,
            next,
        })
    }

    /// Rewrites an absolute next link into a path+query relative to the API
    /// base, so it can be fed straight back into [`fetch_page`].
    ///
    /// [`fetch_page`]: CalendarClient::fetch_page
    fn relative_endpoint(&self, link: &str) -> Result<String, ApiError> {
        let url = Url::parse(link)?;
        let base_path = Url::parse(&self.base_url)?.path().to_string();
        let path = url
            .path()
            .strip_prefix(base_path.trim_end_matches('/'))
            .unwrap_or(url.path());
        match url.query() {
            Some(query) => Ok(format!("{path}?{query}")),
            None => Ok(path.to_string()),
        }
    }

    /// All approved, future-dated instances within the look-ahead window,
    /// followed through every page. Returns the primary resources and the
    /// combined included set.
    pub async fn approved_instances(
        &self,
        days_ahead: i64,
    ) -> Result<(Vec<Resource>, Vec<Resource>), ApiError> {
        let now = Utc::now();
        let window_end = now + chrono::Duration::days(days_ahead);

        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("filter", "future,approved")
            .append_pair(
                "where[starts_at][gte]",
                &now.to_rfc3339_opts(SecondsFormat::Millis, true),
            )
            .append_pair(
                "where[starts_at][lte]",
                &window_end.to_rfc3339_opts(SecondsFormat::Millis, true),
            )
            .append_pair("include", "event,owner")
            .append_pair("per_page", "100")
            .finish();

        collect_pages(format!("/event_instances?{query}"), |endpoint| async move {
            self.fetch_page(&endpoint).await
        })
        .await
    }

    /// Room names booked for one instance, via its event times.
    pub async fn instance_rooms(&self, instance_id: &str) -> Result<Vec<String>, ApiError> {
        let page = self
            .fetch_page(&format!(
                "/event_instances/{instance_id}/event_times?include=room_setups"
            ))
            .await?;

        let mut rooms = Vec::new();
        for resource in &page.included {
            if resource.kind == ResourceKind::Room {
                if let Some(name) = resource.attr_str("name") {
                    if !rooms.iter().any(|existing| existing == name) {
                        rooms.push(name.to_string());
                    }
                }
            }
        }
        Ok(rooms)
    }

    /// Tag names attached to an event, in upstream order.
    pub async fn event_tags(&self, event_id: &str) -> Result<Vec<String>, ApiError> {
        let page = self.fetch_page(&format!("/events/{event_id}/tags")).await?;
        Ok(page
            .data
            .iter()
            .filter_map(|resource| resource.attr_str("name").map(str::to_string))
            .collect())
    }

    /// Form submissions (event requests) for an event, with submitter persons
    /// in the included set.
    pub async fn event_submissions(
        &self,
        event_id: &str,
    ) -> Result<(Vec<Resource>, Vec<Resource>), ApiError> {
        let page = self
            .fetch_page(&format!(
                "/events/{event_id}/event_requests?include=submitter"
            ))
            .await?;
        Ok((page.data, page.included))
    }
}

/// Follows a paginated collection to completion. There is no iteration bound:
/// the loop ends only when a page reports no next endpoint.
pub async fn collect_pages<F, Fut>(
    first_endpoint: String,
    mut fetch: F,
) -> Result<(Vec<Resource>, Vec<Resource>), ApiError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Page, ApiError>>,
{
    let mut data = Vec::new();
    let mut included = Vec::new();
    let mut endpoint = Some(first_endpoint);

    while let Some(current) = endpoint.take() {
        let page = fetch(current).await?;
        data.extend(page.data);
        included.extend(page.included);
        endpoint = page.next;
    }

    Ok((data, included))
}

/// Re-applies an offset cursor from response metadata onto the endpoint that
/// produced it.
fn with_offset(endpoint: &str, offset: u64) -> String {
    let (path, query) = match endpoint.split_once('?') {
        Some((path, query)) => (path, query),
        None => (endpoint, ""),
    };

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if key != "offset" {
            serializer.append_pair(&key, &value);
        }
    }
    serializer.append_pair("offset", &offset.to_string());
    format!("{path}?{}", serializer.finish())
}
