//! Folds a remote resource graph into flat local records.
//!
//! Every function here is pure and total: malformed or missing upstream data
//! degrades fields to `None` (or a placeholder title) instead of raising, so
//! one bad resource can never abort a sync batch.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use steward_client::{Resource, ResourceKind};
use steward_core::{EventRecord, FormSubmission};

pub const CRATE_NAME: &str = "steward-transform";

pub const UNTITLED_EVENT: &str = "Untitled Event";

/// Lookup index over a page's flat `included` set, built once per run instead
/// of re-scanning the list for every reference.
pub struct IncludedIndex<'a> {
    by_key: HashMap<(ResourceKind, &'a str), &'a Resource>,
    first_of_kind: HashMap<ResourceKind, &'a Resource>,
}

impl<'a> IncludedIndex<'a> {
    pub fn new(included: &'a [Resource]) -> Self {
        let mut by_key = HashMap::with_capacity(included.len());
        let mut first_of_kind = HashMap::new();
        for resource in included {
            by_key.insert((resource.kind, resource.id.as_str()), resource);
            first_of_kind.entry(resource.kind).or_insert(resource);
        }
        Self {
            by_key,
            first_of_kind,
        }
    }

    pub fn get(&self, kind: ResourceKind, id: &str) -> Option<&'a Resource> {
        self.by_key.get(&(kind, id)).copied()
    }

    pub fn first_of_kind(&self, kind: ResourceKind) -> Option<&'a Resource> {
        self.first_of_kind.get(&kind).copied()
    }
}

/// Per-instance data resolved by the caller through secondary fetches. The
/// transform itself performs no I/O.
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    pub rooms: Vec<String>,
    pub event_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EventAttributes {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    registration_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct InstanceAttributes {
    #[serde(default)]
    starts_at: Option<String>,
    #[serde(default)]
    ends_at: Option<String>,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PersonAttributes {
    #[serde(default)]
    name_prefix: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    name_suffix: Option<String>,
    #[serde(default)]
    contact_data: ContactData,
}

#[derive(Debug, Default, Deserialize)]
struct ContactData {
    #[serde(default)]
    email_addresses: Vec<EmailEntry>,
    #[serde(default)]
    phone_numbers: Vec<PhoneEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct EmailEntry {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    primary: bool,
}

#[derive(Debug, Default, Deserialize)]
struct PhoneEntry {
    #[serde(default)]
    number: Option<String>,
    #[serde(default)]
    primary: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SubmissionAttributes {
    #[serde(default)]
    submitted_at: Option<String>,
    #[serde(default)]
    responses: JsonValue,
}

/// Attribute-bag deserialization with shape-error fallback to defaults.
fn attrs<T: DeserializeOwned + Default>(resource: &Resource) -> T {
    serde_json::from_value(resource.attributes.clone()).unwrap_or_default()
}

/// Concatenates the non-empty name parts with single spaces.
fn full_name(person: &PersonAttributes) -> Option<String> {
    let parts: Vec<&str> = [
        person.name_prefix.as_deref(),
        person.first_name.as_deref(),
        person.last_name.as_deref(),
        person.name_suffix.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .filter(|part| !part.is_empty())
    .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// The entry flagged primary, else the first entry, else `None`.
fn primary_email(person: &PersonAttributes) -> Option<String> {
    let emails = &person.contact_data.email_addresses;
    emails
        .iter()
        .find(|entry| entry.primary)
        .or_else(|| emails.first())
        .and_then(|entry| entry.address.clone())
}

fn primary_phone(person: &PersonAttributes) -> Option<String> {
    let phones = &person.contact_data.phone_numbers;
    phones
        .iter()
        .find(|entry| entry.primary)
        .or_else(|| phones.first())
        .and_then(|entry| entry.number.clone())
}

/// Campus is the text before the first `" - "` separator in the free-text
/// location; without a separator the whole trimmed string is the campus.
pub fn campus_from_location(location: &str) -> String {
    match location.split_once(" - ") {
        Some((campus, _address)) => campus.trim().to_string(),
        None => location.trim().to_string(),
    }
}

/// Transforms one remote instance plus its included graph into a local event
/// record. The local primary key is the *instance* id; descriptive fields come
/// from the parent event, so a recurrence yields one row per occurrence with
/// identical titles and differing times.
///
/// A missing parent event must not block sync of an otherwise-valid instance:
/// the record falls back to the first included event, then to a placeholder
/// title, and is always produced.
pub fn event_record(
    instance: &Resource,
    index: &IncludedIndex<'_>,
    enrichment: &Enrichment,
    synced_at: &str,
) -> EventRecord {
    let parent = instance
        .related_one("event")
        .and_then(|identifier| index.get(ResourceKind::Event, &identifier.id))
        .or_else(|| index.first_of_kind(ResourceKind::Event));

    let event_attrs: EventAttributes = parent.map(attrs).unwrap_or_default();
    let instance_attrs: InstanceAttributes = attrs(instance);

    let owner_attrs: Option<PersonAttributes> = parent
        .and_then(|event| event.related_one("owner"))
        .and_then(|identifier| index.get(ResourceKind::Person, &identifier.id))
        .map(attrs);

    let owner_name = owner_attrs.as_ref().and_then(full_name);

    EventRecord {
        id: instance.id.clone(),
        title: event_attrs
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNTITLED_EVENT.to_string()),
        event_type: enrichment.event_type.clone(),
        description: event_attrs.description.filter(|d| !d.is_empty()),
        start_at: instance_attrs.starts_at.unwrap_or_default(),
        end_at: instance_attrs.ends_at,
        campus: instance_attrs
            .location
            .as_deref()
            .map(campus_from_location)
            .filter(|campus| !campus.is_empty()),
        rooms: enrichment.rooms.clone(),
        contact_name: owner_name.clone(),
        contact_email: owner_attrs.as_ref().and_then(primary_email),
        contact_phone: owner_attrs.as_ref().and_then(primary_phone),
        owner: owner_name,
        form_url: event_attrs.registration_url.filter(|u| !u.is_empty()),
        synced_at: synced_at.to_string(),
    }
}

/// Extracts form submission rows for an event from an event-requests page,
/// resolving each submitter person out of the included set.
pub fn submissions_from_resources(
    event_id: &str,
    data: &[Resource],
    included: &[Resource],
) -> Vec<FormSubmission> {
    let index = IncludedIndex::new(included);

    data.iter()
        .filter(|resource| resource.kind == ResourceKind::FormSubmission)
        .map(|resource| {
            let submission_attrs: SubmissionAttributes = attrs(resource);
            let submitter: Option<PersonAttributes> = resource
                .related_one("submitter")
                .and_then(|identifier| index.get(ResourceKind::Person, &identifier.id))
                .map(attrs);

            let responses = match submission_attrs.responses {
                JsonValue::Null => None,
                value => Some(value.to_string()),
            };

            FormSubmission {
                event_id: event_id.to_string(),
                submission_id: resource.id.clone(),
                submitted_at: submission_attrs.submitted_at,
                submitter_name: submitter.as_ref().and_then(full_name),
                submitter_email: submitter.as_ref().and_then(primary_email),
                responses,
            }
        })
        .collect()
}
