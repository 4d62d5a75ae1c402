//! Zone configuration persistence
//!
//! Canonical keys are `roon_output_id` and `configured_zone`. Older builds
//! stored the output id per host and the zone per Core; those keys are only
//! ever read, and the core-scoped zone key is deleted once migrated.

use std::sync::Arc;

use super::KeyValueStore;
use crate::zones::ZoneMap;

pub const OUTPUT_ID_KEY: &str = "roon_output_id";
pub const ZONE_CONFIG_KEY: &str = "configured_zone";

fn legacy_output_key(host_input: &str) -> String {
    format!("roon_zone_id_{}", host_input)
}

fn legacy_core_id_key(host_input: &str) -> String {
    format!("roon_core_id_{}", host_input)
}

fn legacy_zone_key(core_id: &str) -> String {
    format!("configured_zone_{}", core_id)
}

#[derive(Clone)]
pub struct ZoneConfigStore {
    store: Arc<dyn KeyValueStore>,
}

impl ZoneConfigStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn save_zone_configuration(&self, zone_id: &str) {
        self.store.set(ZONE_CONFIG_KEY, zone_id);
    }

    pub fn save_output_id(&self, output_id: &str) {
        self.store.set(OUTPUT_ID_KEY, output_id);
    }

    /// Canonical output id, else the host-scoped legacy one
    pub fn stored_output_id(&self, host_input: &str) -> Option<String> {
        self.store.get(OUTPUT_ID_KEY).or_else(|| {
            if host_input.trim().is_empty() {
                None
            } else {
                self.store.get(&legacy_output_key(host_input))
            }
        })
    }

    /// Resolve the configured zone, migrating legacy keys on the way.
    ///
    /// Lookup order: canonical zone key, core-scoped legacy zone key, then the
    /// stored output id mapped through `resolve_zone_id`.
    pub fn load_zone_configuration<F>(&self, host_input: &str, resolve_zone_id: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(zone_id) = self.store.get(ZONE_CONFIG_KEY) {
            return Some(zone_id);
        }

        if !host_input.trim().is_empty() {
            if let Some(core_id) = self.store.get(&legacy_core_id_key(host_input)) {
                let legacy_key = legacy_zone_key(&core_id);
                if let Some(zone_id) = self.store.get(&legacy_key) {
                    self.store.set(ZONE_CONFIG_KEY, &zone_id);
                    self.store.remove(&legacy_key);
                    tracing::info!("Migrated zone configuration from {}", legacy_key);
                    return Some(zone_id);
                }
            }
        }

        let output_id = self.stored_output_id(host_input)?;
        let zone_id = resolve_zone_id(&output_id)?;
        self.save_zone_configuration(&zone_id);
        tracing::debug!("Mapped stored output {} to zone {}", output_id, zone_id);
        Some(zone_id)
    }

    /// First zone whose outputs contain `output_id`
    pub fn find_zone_id_by_output_id(&self, output_id: &str, zones: &ZoneMap) -> Option<String> {
        zones
            .values()
            .find(|zone| zone.has_output(output_id))
            .map(|zone| zone.zone_id.clone())
    }
}
