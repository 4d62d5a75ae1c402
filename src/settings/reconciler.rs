//! Settings service: get/save the zone selection rendered by the Core
//!
//! The Core renders the zone picker itself and owns the list of choices, so
//! the layout always advertises the control regardless of what this side
//! currently knows about zones.

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, PoisonError, RwLock};

use super::envelope::{extract_dry_run, extract_values};
use super::values::{SettingsValues, ZONE_KEY};
use crate::bus::{BusEvent, SharedBus};
use crate::store::ZoneConfigStore;
use crate::zones::ZoneProvider;

/// Service name the Core addresses settings requests to
pub const SETTINGS_SERVICE: &str = "com.roonlabs.settings:1";
pub const ZONE_CONTROL_TITLE: &str = "Playback zone";

const GET_SETTINGS: &str = "get_settings";
const SAVE_SETTINGS: &str = "save_settings";
const ERROR_STATUS: &str = "Error";

/// One control in the settings layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutControl {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub setting: String,
}

impl LayoutControl {
    fn zone_picker() -> Self {
        Self {
            kind: ZONE_KEY.to_string(),
            title: ZONE_CONTROL_TITLE.to_string(),
            setting: ZONE_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsLayout {
    pub values: Map<String, Value>,
    pub layout: Vec<LayoutControl>,
    pub has_error: bool,
}

impl SettingsLayout {
    /// Layout for the given values. Only the `zone` entry is echoed back, it
    /// is the one value the picker reads.
    fn for_values(values: &SettingsValues) -> Self {
        let mut echoed = Map::new();
        if let Some(zone) = values.zone() {
            echoed.insert(ZONE_KEY.to_string(), zone.clone());
        }
        Self {
            values: echoed,
            layout: vec![LayoutControl::zone_picker()],
            has_error: false,
        }
    }

    fn errored() -> Self {
        Self {
            values: Map::new(),
            layout: Vec::new(),
            has_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsError {
    pub status: String,
    pub error: String,
    pub settings: SettingsLayout,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SettingsResponse {
    Layout(SettingsLayout),
    Error(SettingsError),
}

impl SettingsResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(SettingsError {
            status: ERROR_STATUS.to_string(),
            error: message.into(),
            settings: SettingsLayout::errored(),
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsRequest {
    GetSettings,
    SaveSettings,
    Unknown(String),
}

impl SettingsRequest {
    pub fn parse(name: &str) -> Self {
        match name {
            GET_SETTINGS => Self::GetSettings,
            SAVE_SETTINGS => Self::SaveSettings,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Request named by a service path suffix, else by the payload's
    /// `request` field, defaulting to get_settings.
    pub fn from_service_path(path: &str, payload: Option<&Value>) -> Self {
        if path.ends_with("/get_settings") {
            return Self::GetSettings;
        }
        if path.ends_with("/save_settings") {
            return Self::SaveSettings;
        }
        payload
            .and_then(|p| p.get("request"))
            .and_then(Value::as_str)
            .map(Self::parse)
            .unwrap_or(Self::GetSettings)
    }
}

/// Owner of the current settings values
pub struct SettingsReconciler {
    host_input: String,
    zone_config: ZoneConfigStore,
    zones: Arc<dyn ZoneProvider>,
    bus: SharedBus,
    current: RwLock<SettingsValues>,
}

impl SettingsReconciler {
    pub fn new(
        host_input: &str,
        zone_config: ZoneConfigStore,
        zones: Arc<dyn ZoneProvider>,
        bus: SharedBus,
    ) -> Self {
        let host_input = host_input.trim().to_string();
        let current = Self::load_saved_settings(&host_input, &zone_config);
        Self {
            host_input,
            zone_config,
            zones,
            bus,
            current: RwLock::new(current),
        }
    }

    /// Seed values from the stored output id and rewrite it under the
    /// canonical key.
    fn load_saved_settings(host_input: &str, zone_config: &ZoneConfigStore) -> SettingsValues {
        match zone_config.stored_output_id(host_input) {
            Some(output_id) => {
                tracing::debug!("Loaded saved output: {}", output_id);
                zone_config.save_output_id(&output_id);
                SettingsValues::from_saved_output(&output_id)
            }
            None => SettingsValues::empty(),
        }
    }

    pub fn current_settings(&self) -> SettingsValues {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_settings(&self) -> SettingsLayout {
        SettingsLayout::for_values(&self.current_settings())
    }

    /// Apply new values. The layout is always computed; only a real save
    /// touches memory, storage and the bus.
    pub fn save_settings(&self, values: SettingsValues, is_dry_run: bool) -> SettingsLayout {
        let values = SettingsValues::normalize(values.into_inner());
        let layout = SettingsLayout::for_values(&values);
        tracing::debug!("Save settings (dry_run={}): {:?}", is_dry_run, values);

        if is_dry_run {
            return layout;
        }

        // Held until the store matches memory so overlapping saves commit in order
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = values.clone();

        let Some(output_id) = values.output_id() else {
            tracing::warn!("save_settings committed without output_id");
            return layout;
        };

        let zone_id = self.find_zone_id_by_output_id(output_id);
        if let Some(zone_id) = &zone_id {
            self.zone_config.save_zone_configuration(zone_id);
        }
        self.zone_config.save_output_id(output_id);
        drop(current);

        match zone_id {
            Some(zone_id) => {
                tracing::info!("Zone selected: {} (from output {})", zone_id, output_id);
                self.bus.publish(BusEvent::ZoneConfigChanged {
                    zone_id,
                    output_id: output_id.to_string(),
                });
            }
            None => {
                tracing::warn!("Output selected but zone not yet available: {}", output_id);
            }
        }

        layout
    }

    /// Layout for values the user is still editing. Empty or missing values
    /// show what is saved; anything else is laid out as a dry run.
    pub fn preview_settings(&self, values: &Value) -> SettingsLayout {
        match values.as_object() {
            Some(map) if !map.is_empty() => {
                self.save_settings(SettingsValues::normalize(map.clone()), true)
            }
            _ => self.get_settings(),
        }
    }

    /// Commit values the Core reports as saved
    pub fn commit_saved_values(&self, values: &Value) -> SettingsResponse {
        let path = format!("{}/{}", SETTINGS_SERVICE, SAVE_SETTINGS);
        let payload = serde_json::json!({ "values": values });
        self.handle_service_request(&path, Some(&payload))
    }

    pub fn handle_request(&self, request: &SettingsRequest, payload: Option<&Value>) -> SettingsResponse {
        match request {
            SettingsRequest::GetSettings => SettingsResponse::Layout(self.get_settings()),
            SettingsRequest::SaveSettings => {
                let payload = match payload {
                    None => None,
                    Some(Value::Object(map)) => Some(map),
                    Some(other) => {
                        tracing::warn!("Malformed save_settings payload: {}", other);
                        return SettingsResponse::error("Malformed settings payload");
                    }
                };
                let is_dry_run = payload.map(extract_dry_run).unwrap_or(false);
                let values = payload.and_then(extract_values).unwrap_or_default();
                SettingsResponse::Layout(self.save_settings(values, is_dry_run))
            }
            SettingsRequest::Unknown(name) => {
                tracing::warn!("Unknown settings request: {}", name);
                SettingsResponse::error(format!("Unknown request type: {}", name))
            }
        }
    }

    /// Dispatch by service path (e.g. `com.roonlabs.settings:1/save_settings`)
    pub fn handle_service_request(&self, path: &str, payload: Option<&Value>) -> SettingsResponse {
        let request = SettingsRequest::from_service_path(path, payload);
        self.handle_request(&request, payload)
    }

    /// Dispatch a message carrying `request` and an optional `body`
    pub fn handle_message(&self, message: &Value) -> SettingsResponse {
        let Some(name) = message.get("request").and_then(Value::as_str) else {
            return SettingsResponse::error("Missing request type");
        };
        self.handle_request(&SettingsRequest::parse(name), message.get("body"))
    }

    /// Requests this service answers
    pub fn service_info(&self) -> Value {
        serde_json::json!({ GET_SETTINGS: true, SAVE_SETTINGS: true })
    }

    /// Configured zone id, migrating legacy keys and resolving the stored
    /// output through the live zones
    pub fn load_zone_configuration(&self) -> Option<String> {
        let zone_id = self
            .zone_config
            .load_zone_configuration(&self.host_input, |output_id| {
                self.find_zone_id_by_output_id(output_id)
            });
        tracing::debug!("Loaded zone configuration: {:?}", zone_id);
        zone_id
    }

    fn find_zone_id_by_output_id(&self, output_id: &str) -> Option<String> {
        self.zone_config
            .find_zone_id_by_output_id(output_id, &self.zones.zones())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::create_bus;
    use crate::store::zone_config::{OUTPUT_ID_KEY, ZONE_CONFIG_KEY};
    use crate::store::{KeyValueStore, MemoryStore};
    use crate::zones::fixtures::zone;
    use crate::zones::ZoneCache;
    use serde_json::json;
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;

    struct Harness {
        store: Arc<MemoryStore>,
        zones: ZoneCache,
        bus: SharedBus,
        reconciler: SettingsReconciler,
    }

    fn harness(entries: &[(&str, &str)]) -> Harness {
        let store = Arc::new(MemoryStore::with_entries(entries.iter().copied()));
        let zones = ZoneCache::new();
        zones.upsert(zone("zone_a", "playing", true, &["out_a"]));
        let bus = create_bus();
        let reconciler = SettingsReconciler::new(
            "192.168.1.20:9330",
            ZoneConfigStore::new(store.clone()),
            Arc::new(zones.clone()),
            bus.clone(),
        );
        Harness {
            store,
            zones,
            bus,
            reconciler,
        }
    }

    fn values(value: Value) -> SettingsValues {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_layout_always_has_zone_control() {
        let h = harness(&[]);
        h.zones.clear();

        let layout = h.reconciler.get_settings();

        assert_eq!(layout.layout, vec![LayoutControl::zone_picker()]);
        assert!(layout.values.is_empty());
        assert!(!layout.has_error);
    }

    #[test]
    fn test_seeds_from_legacy_output_and_rewrites_canonical_key() {
        let h = harness(&[("roon_zone_id_192.168.1.20:9330", "out_legacy")]);

        let layout = h.reconciler.get_settings();

        assert_eq!(layout.values["zone"]["output_id"], "out_legacy");
        assert_eq!(layout.values["zone"]["display_name"], "Saved Zone");
        assert_eq!(h.store.get(OUTPUT_ID_KEY).as_deref(), Some("out_legacy"));
    }

    #[tokio::test]
    async fn test_save_persists_and_notifies() {
        let h = harness(&[]);
        let mut rx = h.bus.subscribe();

        let layout = h
            .reconciler
            .save_settings(values(json!({"output": {"output_id": "out_a"}})), false);

        assert_eq!(layout.values["zone"]["output_id"], "out_a");
        assert_eq!(h.store.get(OUTPUT_ID_KEY).as_deref(), Some("out_a"));
        assert_eq!(h.store.get(ZONE_CONFIG_KEY).as_deref(), Some("zone_a"));
        assert_eq!(
            rx.recv().await.unwrap(),
            BusEvent::ZoneConfigChanged {
                zone_id: "zone_a".to_string(),
                output_id: "out_a".to_string(),
            }
        );
    }

    #[test]
    fn test_save_unknown_output_persists_output_only() {
        let h = harness(&[]);
        let mut rx = h.bus.subscribe();

        h.reconciler
            .save_settings(values(json!({"zone": {"output_id": "out_unknown"}})), false);

        assert_eq!(h.store.get(OUTPUT_ID_KEY).as_deref(), Some("out_unknown"));
        assert!(!h.store.contains(ZONE_CONFIG_KEY));
        assert!(rx.try_recv().is_err());
        assert_eq!(h.reconciler.current_settings().output_id(), Some("out_unknown"));
    }

    #[test]
    fn test_dry_run_has_no_side_effects() {
        let h = harness(&[(OUTPUT_ID_KEY, "out_old")]);
        let mut rx = h.bus.subscribe();
        let before_store = h.store.snapshot();
        let before_values = h.reconciler.current_settings();

        let layout = h
            .reconciler
            .save_settings(values(json!({"zone": {"output_id": "out_a"}})), true);

        assert_eq!(layout.values["zone"]["output_id"], "out_a");
        assert_eq!(h.store.snapshot(), before_store);
        assert_eq!(h.reconciler.current_settings(), before_values);
        assert!(rx.try_recv().is_err());
    }

    /// Parks the write of `parked_output` until released
    struct ParkingStore {
        inner: MemoryStore,
        parked_output: &'static str,
        entered: Mutex<Option<mpsc::Sender<()>>>,
        release: Mutex<Option<mpsc::Receiver<()>>>,
    }

    impl KeyValueStore for ParkingStore {
        fn get(&self, key: &str) -> Option<String> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) {
            if key == OUTPUT_ID_KEY && value == self.parked_output {
                if let Some(entered) = self.entered.lock().unwrap().take() {
                    entered.send(()).unwrap();
                    let release = self.release.lock().unwrap().take().unwrap();
                    release.recv().unwrap();
                }
            }
            self.inner.set(key, value);
        }

        fn remove(&self, key: &str) {
            self.inner.remove(key);
        }
    }

    #[test]
    fn test_overlapping_saves_keep_memory_and_store_in_step() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let store = Arc::new(ParkingStore {
            inner: MemoryStore::new(),
            parked_output: "out_a",
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(Some(release_rx)),
        });
        let zones = ZoneCache::new();
        zones.upsert(zone("zone_a", "playing", true, &["out_a"]));
        zones.upsert(zone("zone_b", "stopped", false, &["out_b"]));
        let reconciler = SettingsReconciler::new(
            "",
            ZoneConfigStore::new(store.clone()),
            Arc::new(zones),
            create_bus(),
        );

        std::thread::scope(|s| {
            let first = s.spawn(|| {
                reconciler.save_settings(values(json!({"zone": {"output_id": "out_a"}})), false)
            });
            entered_rx.recv().unwrap();
            let second = s.spawn(|| {
                reconciler.save_settings(values(json!({"zone": {"output_id": "out_b"}})), false)
            });
            std::thread::sleep(Duration::from_millis(50));
            release_tx.send(()).unwrap();
            first.join().unwrap();
            second.join().unwrap();
        });

        assert_eq!(reconciler.current_settings().output_id(), Some("out_b"));
        assert_eq!(store.get(OUTPUT_ID_KEY).as_deref(), Some("out_b"));
        assert_eq!(store.get(ZONE_CONFIG_KEY).as_deref(), Some("zone_b"));
    }

    #[test]
    fn test_handle_request_routes_envelopes() {
        let h = harness(&[]);
        let payload = json!({"body": {"dry_run": true, "settings": {"values": {"zone": {"output_id": "out_a"}}}}});

        let response = h
            .reconciler
            .handle_request(&SettingsRequest::SaveSettings, Some(&payload));

        match response {
            SettingsResponse::Layout(layout) => {
                assert_eq!(layout.values["zone"]["output_id"], "out_a")
            }
            SettingsResponse::Error(e) => panic!("unexpected error {:?}", e),
        }
        assert!(!h.store.contains(OUTPUT_ID_KEY));
    }

    #[test]
    fn test_malformed_payload_yields_error_envelope() {
        let h = harness(&[]);

        let response = h
            .reconciler
            .handle_request(&SettingsRequest::SaveSettings, Some(&json!([1, 2, 3])));

        let json = response.to_json();
        assert_eq!(json["status"], "Error");
        assert_eq!(json["settings"]["has_error"], true);
        assert_eq!(json["settings"]["layout"], json!([]));
    }

    #[test]
    fn test_unknown_request_yields_error_envelope() {
        let h = harness(&[]);

        let response = h.reconciler.handle_message(&json!({"request": "subscribe_settings"}));

        assert!(response.is_error());
        assert_eq!(response.to_json()["error"], "Unknown request type: subscribe_settings");
    }

    #[test]
    fn test_preview_shows_saved_or_dry_run_values() {
        let h = harness(&[(OUTPUT_ID_KEY, "out_saved")]);
        let before_store = h.store.snapshot();

        let saved = h.reconciler.preview_settings(&Value::Null);
        let edited = h
            .reconciler
            .preview_settings(&json!({"zone": {"output_id": "out_a"}}));

        assert_eq!(saved.values["zone"]["output_id"], "out_saved");
        assert_eq!(edited.values["zone"]["output_id"], "out_a");
        assert_eq!(h.store.snapshot(), before_store);
        assert_eq!(h.reconciler.current_settings().output_id(), Some("out_saved"));
    }

    #[test]
    fn test_commit_saved_values_persists() {
        let h = harness(&[]);

        let response = h
            .reconciler
            .commit_saved_values(&json!({"zone": {"output_id": "out_a"}}));

        assert!(!response.is_error());
        assert_eq!(h.store.get(OUTPUT_ID_KEY).as_deref(), Some("out_a"));
        assert_eq!(h.store.get(ZONE_CONFIG_KEY).as_deref(), Some("zone_a"));
    }

    #[test]
    fn test_service_path_routing() {
        assert_eq!(
            SettingsRequest::from_service_path("com.roonlabs.settings:1/save_settings", None),
            SettingsRequest::SaveSettings
        );
        assert_eq!(
            SettingsRequest::from_service_path("other", Some(&json!({"request": "save_settings"}))),
            SettingsRequest::SaveSettings
        );
        assert_eq!(
            SettingsRequest::from_service_path("other", None),
            SettingsRequest::GetSettings
        );
    }

    #[test]
    fn test_load_zone_configuration_uses_live_zones() {
        let h = harness(&[(OUTPUT_ID_KEY, "out_b")]);
        h.zones.upsert(zone("zone_b", "stopped", false, &["out_b"]));

        assert_eq!(h.reconciler.load_zone_configuration().as_deref(), Some("zone_b"));
        assert_eq!(h.store.get(ZONE_CONFIG_KEY).as_deref(), Some("zone_b"));
    }
}
