//! Canonical settings values
//!
//! The zone picker is addressed at `zone`, but older clients echo the same
//! selection back under `output` or as a bare `output_id`. After
//! normalisation `output` and `zone` are either both absent or identical.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const OUTPUT_KEY: &str = "output";
pub const ZONE_KEY: &str = "zone";
pub const OUTPUT_ID_KEY: &str = "output_id";
pub const DISPLAY_NAME_KEY: &str = "display_name";

const SAVED_ZONE_NAME: &str = "Saved Zone";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsValues(Map<String, Value>);

impl SettingsValues {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Normalise a raw values object.
    ///
    /// Rules, applied once:
    /// - a `zone` or `output` entry that is not an object is dropped
    /// - `zone` and `output` both objects: the one carrying a non-blank
    ///   `output_id` wins, `zone` on a tie
    /// - only one of them is an object: it is mirrored into the other
    /// - neither key present: a non-blank bare `output_id` becomes
    ///   `{output_id}` under both
    pub fn normalize(mut values: Map<String, Value>) -> Self {
        values.retain(|key, value| {
            !(key == ZONE_KEY || key == OUTPUT_KEY) || value.is_object()
        });

        let zone = values.get(ZONE_KEY).filter(|v| v.is_object()).cloned();
        let output = values.get(OUTPUT_KEY).filter(|v| v.is_object()).cloned();

        match (zone, output) {
            (Some(zone), Some(output)) => {
                if object_output_id(&zone).is_none() && object_output_id(&output).is_some() {
                    values.insert(ZONE_KEY.to_string(), output);
                } else {
                    values.insert(OUTPUT_KEY.to_string(), zone);
                }
            }
            (Some(zone), None) => {
                values.insert(OUTPUT_KEY.to_string(), zone);
            }
            (None, Some(output)) => {
                values.insert(ZONE_KEY.to_string(), output);
            }
            (None, None) => {
                if let Some(output_id) = non_blank_str(values.get(OUTPUT_ID_KEY)) {
                    let selection = Value::Object(Map::from_iter([(
                        OUTPUT_ID_KEY.to_string(),
                        Value::String(output_id.to_string()),
                    )]));
                    values.insert(OUTPUT_KEY.to_string(), selection.clone());
                    values.insert(ZONE_KEY.to_string(), selection);
                }
            }
        }

        Self(values)
    }

    /// Values seeded from a persisted output id
    pub fn from_saved_output(output_id: &str) -> Self {
        let selection = serde_json::json!({
            OUTPUT_ID_KEY: output_id,
            DISPLAY_NAME_KEY: SAVED_ZONE_NAME,
        });
        let mut values = Map::new();
        values.insert(OUTPUT_KEY.to_string(), selection.clone());
        values.insert(ZONE_KEY.to_string(), selection);
        Self(values)
    }

    /// Selected output id: `zone`, then `output`, then a bare `output_id`
    pub fn output_id(&self) -> Option<&str> {
        [ZONE_KEY, OUTPUT_KEY]
            .iter()
            .filter_map(|key| self.0.get(*key))
            .find_map(object_output_id)
            .or_else(|| non_blank_str(self.0.get(OUTPUT_ID_KEY)))
    }

    pub fn zone(&self) -> Option<&Value> {
        self.0.get(ZONE_KEY).filter(|v| v.is_object())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// Whether an object is itself a values record rather than an envelope
pub fn looks_like_settings_values(candidate: &Map<String, Value>) -> bool {
    [OUTPUT_KEY, ZONE_KEY, OUTPUT_ID_KEY]
        .iter()
        .any(|key| candidate.contains_key(*key))
}

fn object_output_id(value: &Value) -> Option<&str> {
    non_blank_str(value.as_object()?.get(OUTPUT_ID_KEY))
}

fn non_blank_str(value: Option<&Value>) -> Option<&str> {
    value?.as_str().filter(|s| !s.trim().is_empty())
}
