//! Zone settings exposed to the Core's settings UI

pub mod envelope;
pub mod reconciler;
pub mod values;

pub use reconciler::{
    LayoutControl, SettingsError, SettingsLayout, SettingsReconciler, SettingsRequest,
    SettingsResponse, SETTINGS_SERVICE, ZONE_CONTROL_TITLE,
};
pub use values::SettingsValues;
