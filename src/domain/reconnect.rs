//! Auto-reconnect policy
//!
//! Decides whether a remembered Core is worth reconnecting to on startup.
//! Checks run in a fixed order and the first failing one wins.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;

/// Host prefix used as a placeholder when a Core was only known by its id
const CORE_ID_PLACEHOLDER_PREFIX: &str = "by_core_id_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectReason {
    MissingHost,
    InvalidPort,
    InvalidHost,
    StaleConnection,
    RecentSuccess,
}

impl ReconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingHost => "missing_host",
            Self::InvalidPort => "invalid_port",
            Self::InvalidHost => "invalid_host",
            Self::StaleConnection => "stale_connection",
            Self::RecentSuccess => "recent_success",
        }
    }
}

impl fmt::Display for ReconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconnectDecision {
    pub should_reconnect: bool,
    pub reason: ReconnectReason,
}

impl ReconnectDecision {
    fn reject(reason: ReconnectReason) -> Self {
        Self {
            should_reconnect: false,
            reason,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// A last success at least this old counts as stale (boundary inclusive)
    valid_window: TimeDelta,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            valid_window: TimeDelta::days(7),
        }
    }
}

impl ReconnectPolicy {
    pub fn new(valid_window: TimeDelta) -> Self {
        Self { valid_window }
    }

    pub fn valid_window(&self) -> TimeDelta {
        self.valid_window
    }

    pub fn decide<F>(
        &self,
        last_host: Option<&str>,
        last_port: i32,
        last_connection_time: DateTime<Utc>,
        now: DateTime<Utc>,
        is_valid_host: F,
    ) -> ReconnectDecision
    where
        F: Fn(&str) -> bool,
    {
        let host = match last_host {
            Some(host) if !host.trim().is_empty() => host,
            _ => return ReconnectDecision::reject(ReconnectReason::MissingHost),
        };
        if last_port <= 0 {
            return ReconnectDecision::reject(ReconnectReason::InvalidPort);
        }
        if !is_valid_host(host) {
            return ReconnectDecision::reject(ReconnectReason::InvalidHost);
        }
        if now.signed_duration_since(last_connection_time) >= self.valid_window {
            return ReconnectDecision::reject(ReconnectReason::StaleConnection);
        }

        ReconnectDecision {
            should_reconnect: true,
            reason: ReconnectReason::RecentSuccess,
        }
    }
}

/// Default host predicate: an IP literal or a syntactically valid domain,
/// excluding core-id placeholders that were never real addresses.
pub fn is_valid_core_host(host: &str) -> bool {
    let host = host.trim();
    if host.is_empty() || host.starts_with(CORE_ID_PLACEHOLDER_PREFIX) {
        return false;
    }
    host.parse::<IpAddr>().is_ok() || url::Host::parse(host).is_ok()
}
