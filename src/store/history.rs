//! Last successful Core connection, used to decide on auto-reconnect

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::KeyValueStore;

const LAST_HOST_KEY: &str = "last_core_host";
const LAST_PORT_KEY: &str = "last_core_port";
const LAST_TIME_KEY: &str = "last_connection_time";

/// Snapshot of the remembered connection. Missing fields are represented the
/// way the reconnect policy expects them: no host, port 0, epoch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastConnection {
    pub host: Option<String>,
    pub port: i32,
    pub time: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ConnectionHistory {
    store: Arc<dyn KeyValueStore>,
}

impl ConnectionHistory {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn last_connection(&self) -> LastConnection {
        let host = self.store.get(LAST_HOST_KEY);
        let port = self
            .store
            .get(LAST_PORT_KEY)
            .and_then(|p| p.trim().parse::<i32>().ok())
            .unwrap_or(0);
        let time = self
            .store
            .get(LAST_TIME_KEY)
            .and_then(|t| t.trim().parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(DateTime::UNIX_EPOCH);

        LastConnection { host, port, time }
    }

    pub fn record_success(&self, host: &str, port: u16, at: DateTime<Utc>) {
        self.store.set(LAST_HOST_KEY, host);
        self.store.set(LAST_PORT_KEY, &port.to_string());
        self.store
            .set(LAST_TIME_KEY, &at.timestamp_millis().to_string());
        tracing::debug!("Recorded successful connection to {}:{}", host, port);
    }
}
