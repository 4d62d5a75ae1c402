//! Live zone model and cache
//!
//! Zones are keyed by their Core-assigned id. The map is ordered so that
//! "first zone" is stable between calls; nothing relies on that order meaning
//! anything beyond determinism.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Zone information as reported by the Core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub zone_id: String,
    pub display_name: String,
    /// "playing", "paused", "loading" or "stopped"
    pub state: String,
    pub now_playing: Option<NowPlaying>,
    pub outputs: Vec<Output>,
}

/// Output information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub output_id: String,
    pub display_name: String,
}

/// Now playing information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub image_key: Option<String>,
}

impl Zone {
    pub fn is_playing(&self) -> bool {
        self.state == "playing"
    }

    pub fn has_output(&self, output_id: &str) -> bool {
        self.outputs.iter().any(|o| o.output_id == output_id)
    }
}

pub type ZoneMap = BTreeMap<String, Zone>;

/// Supplier of the current live zone set
pub trait ZoneProvider: Send + Sync {
    fn zones(&self) -> ZoneMap;
}

impl ZoneProvider for ZoneMap {
    fn zones(&self) -> ZoneMap {
        self.clone()
    }
}

/// Zone cache maintained from Core subscriptions.
/// Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct ZoneCache {
    zones: Arc<RwLock<ZoneMap>>,
}

impl ZoneCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a zone. Returns true if the zone was not known before.
    pub fn upsert(&self, zone: Zone) -> bool {
        let mut zones = self.zones.write().unwrap_or_else(PoisonError::into_inner);
        zones.insert(zone.zone_id.clone(), zone).is_none()
    }

    pub fn remove(&self, zone_id: &str) -> Option<Zone> {
        let mut zones = self.zones.write().unwrap_or_else(PoisonError::into_inner);
        zones.remove(zone_id)
    }

    /// Drop every zone (Core lost)
    pub fn clear(&self) {
        self.zones
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn get(&self, zone_id: &str) -> Option<Zone> {
        let zones = self.zones.read().unwrap_or_else(PoisonError::into_inner);
        zones.get(zone_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.zones.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ZoneProvider for ZoneCache {
    fn zones(&self) -> ZoneMap {
        self.zones
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
