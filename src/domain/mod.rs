//! Pure decision logic shared by the connection and zone layers
//!
//! Nothing in here touches the network or storage, so every rule can be
//! exercised directly from unit tests.

pub mod guard;
pub mod reconnect;
pub mod zone_selection;

pub use guard::{InFlightGuard, InFlightPermit};
pub use reconnect::{is_valid_core_host, ReconnectDecision, ReconnectPolicy, ReconnectReason};
pub use zone_selection::{ZoneSelectionDecision, ZoneSelectionReason, ZoneSelectionUseCase};
