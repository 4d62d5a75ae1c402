//! Cover Art Remote - Roon Core connection and zone reconciliation
//!
//! Keeps a cover-art display attached to a Roon Core across flaky networks.
//!
//! This library provides:
//! - Network readiness detection and a retrying Core connection supervisor
//! - Auto-reconnect policy for the last known Core
//! - The extension's settings service (zone picker) and its persistence
//! - Zone selection over the live zone set fed by the Roon link

pub mod adapters;
pub mod bus;
pub mod config;
pub mod domain;
pub mod network;
pub mod session;
pub mod settings;
pub mod store;
pub mod zones;
