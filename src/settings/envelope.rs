//! Payload envelopes for save_settings
//!
//! Clients have sent the values record in several shapes over time. Each
//! container (the payload, then `payload.body`, then `payload.settings`) is
//! run through the extractors below in order; the first hit wins.

use serde_json::{Map, Value};

use super::values::{looks_like_settings_values, SettingsValues};

type JsonObject = Map<String, Value>;
type Extractor = fn(&JsonObject) -> Option<&JsonObject>;

const SETTINGS_KEY: &str = "settings";
const VALUES_KEY: &str = "values";
const BODY_KEY: &str = "body";

/// Nested containers tried after the payload itself
const NESTED_CONTAINERS: [&str; 2] = [BODY_KEY, SETTINGS_KEY];

/// Dry-run flag spellings, highest priority first
pub const DRY_RUN_KEYS: [&str; 3] = ["is_dry_run", "dry_run", "isDryRun"];

/// Values extractors, highest priority first
const VALUE_EXTRACTORS: &[(&str, Extractor)] = &[
    ("settings.values", settings_values),
    ("settings", bare_settings),
    ("values", values),
    ("inline", inline),
];

fn settings_values(container: &JsonObject) -> Option<&JsonObject> {
    object_at(container, SETTINGS_KEY).and_then(|settings| object_at(settings, VALUES_KEY))
}

fn bare_settings(container: &JsonObject) -> Option<&JsonObject> {
    object_at(container, SETTINGS_KEY).filter(|settings| looks_like_settings_values(settings))
}

fn values(container: &JsonObject) -> Option<&JsonObject> {
    object_at(container, VALUES_KEY)
}

fn inline(container: &JsonObject) -> Option<&JsonObject> {
    Some(container).filter(|c| looks_like_settings_values(c))
}

fn object_at<'a>(container: &'a JsonObject, key: &str) -> Option<&'a JsonObject> {
    container.get(key).and_then(Value::as_object)
}

/// The payload followed by its `body` and `settings` objects, when present
fn containers(payload: &JsonObject) -> impl Iterator<Item = &JsonObject> {
    std::iter::once(payload).chain(
        NESTED_CONTAINERS
            .iter()
            .filter_map(move |key| object_at(payload, key)),
    )
}

/// Extract and normalise the values record.
/// Returns `None` when no container holds anything recognisable.
pub fn extract_values(payload: &JsonObject) -> Option<SettingsValues> {
    containers(payload).find_map(|container| {
        VALUE_EXTRACTORS.iter().find_map(|(name, extract)| {
            extract(container).map(|found| {
                tracing::trace!("settings values found via {}", name);
                SettingsValues::normalize(found.clone())
            })
        })
    })
}

/// Dry-run flag; absent everywhere means a real save
pub fn extract_dry_run(payload: &JsonObject) -> bool {
    containers(payload)
        .find_map(|container| {
            DRY_RUN_KEYS
                .iter()
                .find_map(|key| container.get(*key).map(flag_value))
        })
        .unwrap_or(false)
}

/// `true` or the string "true" in any case; everything else is false
fn flag_value(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
