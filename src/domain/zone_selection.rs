//! Zone selection - which zone the display follows
//!
//! Evaluated whenever the live zone set changes. Only a purely automatic
//! choice is marked for persistence: a stale stored id is worked around for
//! this session but left in place, since the zone may come back.

use serde::Serialize;
use std::fmt;

use crate::zones::ZoneMap;

const STALE_ZONE_WARNING: &str =
    "Configured zone is unavailable, falling back to an available zone";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ZoneSelectionReason {
    NoZonesAvailable,
    StoredConfiguration,
    StaleConfigurationFallback,
    CurrentSelection,
    AutomaticSelection,
}

impl ZoneSelectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoZonesAvailable => "no zones available",
            Self::StoredConfiguration => "stored configuration",
            Self::StaleConfigurationFallback => "stale configuration fallback",
            Self::CurrentSelection => "current selection",
            Self::AutomaticSelection => "automatic selection",
        }
    }
}

impl fmt::Display for ZoneSelectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneSelectionDecision {
    pub zone_id: Option<String>,
    pub reason: ZoneSelectionReason,
    pub persist: bool,
    pub status_message: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZoneSelectionUseCase;

impl ZoneSelectionUseCase {
    pub fn new() -> Self {
        Self
    }

    pub fn select_zone(
        &self,
        available_zones: &ZoneMap,
        stored_zone_id: Option<&str>,
        current_zone_id: Option<&str>,
    ) -> ZoneSelectionDecision {
        if available_zones.is_empty() {
            return ZoneSelectionDecision {
                zone_id: None,
                reason: ZoneSelectionReason::NoZonesAvailable,
                persist: false,
                status_message: None,
            };
        }

        if let Some(stored) = stored_zone_id {
            if available_zones.contains_key(stored) {
                return ZoneSelectionDecision {
                    zone_id: Some(stored.to_string()),
                    reason: ZoneSelectionReason::StoredConfiguration,
                    persist: false,
                    status_message: None,
                };
            }

            return ZoneSelectionDecision {
                zone_id: auto_select_zone_id(available_zones),
                reason: ZoneSelectionReason::StaleConfigurationFallback,
                persist: false,
                status_message: Some(STALE_ZONE_WARNING.to_string()),
            };
        }

        if let Some(current) = current_zone_id.filter(|id| available_zones.contains_key(*id)) {
            return ZoneSelectionDecision {
                zone_id: Some(current.to_string()),
                reason: ZoneSelectionReason::CurrentSelection,
                persist: false,
                status_message: None,
            };
        }

        ZoneSelectionDecision {
            zone_id: auto_select_zone_id(available_zones),
            reason: ZoneSelectionReason::AutomaticSelection,
            persist: true,
            status_message: None,
        }
    }
}

/// Playing with a track > any zone with a track > first zone
fn auto_select_zone_id(zones: &ZoneMap) -> Option<String> {
    zones
        .iter()
        .find(|(_, zone)| zone.is_playing() && zone.now_playing.is_some())
        .or_else(|| zones.iter().find(|(_, zone)| zone.now_playing.is_some()))
        .or_else(|| zones.iter().next())
        .map(|(zone_id, _)| zone_id.clone())
}
