//! Configuration management

use anyhow::Result;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::ReconnectPolicy;
use crate::network::SupervisorConfig;

/// Application directory name under the platform config/data roots
const APP_DIR_NAME: &str = "coverart-remote";

const ENV_PREFIX: &str = "COVERART";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Core to connect to. Without a host the last successful one is used.
#[derive(Debug, Deserialize)]
pub struct CoreConfig {
    pub host: Option<String>,
    #[serde(default = "default_core_port")]
    pub port: u16,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_core_port(),
        }
    }
}

fn default_core_port() -> u16 {
    9330
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub network_ready_timeout_ms: u64,
    /// Per-attempt timeout of the Core validator
    pub attempt_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 15_000,
            network_ready_timeout_ms: 30_000,
            attempt_timeout_ms: 5_000,
        }
    }
}

impl ConnectionConfig {
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            network_ready_timeout: Duration::from_millis(self.network_ready_timeout_ms),
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub poll_interval_ms: u64,
    pub probe_host: String,
    pub probe_port: u16,
    pub probe_timeout_ms: u64,
    /// How often the route watcher re-checks the outbound route
    pub watch_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            probe_host: "8.8.8.8".to_string(),
            probe_port: 53,
            probe_timeout_ms: 3_000,
            watch_interval_ms: 2_000,
        }
    }
}

impl NetworkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }

    /// Probe endpoint as a socket address, when the host is an IP literal
    pub fn route_target(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.probe_host.parse().ok()?;
        Some(SocketAddr::new(ip, self.probe_port))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub valid_window_days: i64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            valid_window_days: 7,
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> Result<ReconnectPolicy> {
        let window = chrono::TimeDelta::try_days(self.valid_window_days)
            .filter(|window| *window >= chrono::TimeDelta::zero())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "reconnect.valid_window_days out of range: {}",
                    self.valid_window_days
                )
            })?;
        Ok(ReconnectPolicy::new(window))
    }
}

/// Get config directory (XDG_CONFIG_HOME or platform default)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("COVERART_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library/Application Support").join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config").join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join(APP_DIR_NAME);
        }
    }

    // Fallback to current directory
    PathBuf::from(".")
}

/// Get data directory (XDG_DATA_HOME or platform default)
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("COVERART_DATA_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library/Application Support").join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/share").join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("LOCALAPPDATA") {
            return PathBuf::from(appdata).join(APP_DIR_NAME);
        }
    }

    // Fallback to ./data
    PathBuf::from("./data")
}

/// Path of a file kept in the data directory
pub fn get_data_file_path(filename: &str) -> PathBuf {
    get_data_dir().join(filename)
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        // Start with defaults
        .set_default("core.port", default_core_port() as i64)?
        // Load from config file if it exists
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // Override with environment variables (COVERART_CORE__HOST, COVERART_CONNECTION__MAX_ATTEMPTS, etc.)
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    // Shortcuts: COVERART_HOST / COVERART_PORT beat everything else
    if let Ok(host) = std::env::var("COVERART_HOST") {
        if !host.trim().is_empty() {
            builder = builder.set_override("core.host", host.trim().to_string())?;
        }
    }
    if let Ok(port) = std::env::var("COVERART_PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("core.port", port_num as i64)?;
        }
    }

    let config: Config = builder.build()?.try_deserialize()?;
    config.reconnect.policy()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn isolate() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("create temp dir");
        env::set_var("COVERART_CONFIG_DIR", dir.path());
        dir
    }

    fn cleanup(vars: &[&str]) {
        env::remove_var("COVERART_CONFIG_DIR");
        for var in vars {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        let _dir = isolate();

        let config = load_config().expect("config should load");
        cleanup(&[]);

        assert_eq!(config.core.host, None);
        assert_eq!(config.core.port, 9330);
        assert_eq!(config.connection.max_attempts, 5);
        assert_eq!(config.network.probe_host, "8.8.8.8");
        assert_eq!(config.reconnect.valid_window_days, 7);

        let supervisor = config.connection.supervisor_config();
        assert_eq!(supervisor.initial_delay, Duration::from_secs(1));
        assert_eq!(supervisor.max_delay, Duration::from_secs(15));
    }

    #[test]
    #[serial]
    fn test_host_and_port_shortcuts() {
        let _dir = isolate();
        env::set_var("COVERART_HOST", "192.168.1.50");
        env::set_var("COVERART_PORT", "9100");

        let config = load_config().expect("config should load");
        cleanup(&["COVERART_HOST", "COVERART_PORT"]);

        assert_eq!(config.core.host.as_deref(), Some("192.168.1.50"));
        assert_eq!(config.core.port, 9100);
    }

    #[test]
    #[serial]
    fn test_nested_env_overrides() {
        let _dir = isolate();
        env::set_var("COVERART_CONNECTION__MAX_ATTEMPTS", "3");

        let config = load_config().expect("config should load");
        cleanup(&["COVERART_CONNECTION__MAX_ATTEMPTS"]);

        assert_eq!(config.connection.max_attempts, 3);
    }

    #[test]
    #[serial]
    fn test_config_file_is_read() {
        let dir = isolate();
        std::fs::write(
            dir.path().join("config.toml"),
            "[core]\nhost = \"core.local\"\n\n[reconnect]\nvalid_window_days = 2\n",
        )
        .unwrap();

        let config = load_config().expect("config should load");
        cleanup(&[]);

        assert_eq!(config.core.host.as_deref(), Some("core.local"));
        assert_eq!(
            config.reconnect.policy().unwrap().valid_window(),
            chrono::TimeDelta::days(2)
        );
    }

    #[test]
    #[serial]
    fn test_out_of_range_window_is_rejected() {
        let _dir = isolate();
        env::set_var("COVERART_RECONNECT__VALID_WINDOW_DAYS", "200000000000000");

        let result = load_config();
        cleanup(&["COVERART_RECONNECT__VALID_WINDOW_DAYS"]);

        let error = result.expect_err("window should be rejected").to_string();
        assert!(error.contains("valid_window_days"), "{}", error);

        let negative = ReconnectConfig {
            valid_window_days: -1,
        };
        assert!(negative.policy().is_err());
    }

    #[test]
    #[serial]
    fn test_invalid_port_shortcut_ignored() {
        let _dir = isolate();
        env::set_var("COVERART_PORT", "not-a-port");

        let config = load_config().expect("config should load");
        cleanup(&["COVERART_PORT"]);

        assert_eq!(config.core.port, 9330);
    }

    #[test]
    #[serial]
    fn test_data_dir_override() {
        env::set_var("COVERART_DATA_DIR", "/tmp/coverart-data");
        let path = get_data_file_path("preferences.json");
        env::remove_var("COVERART_DATA_DIR");

        assert_eq!(path, PathBuf::from("/tmp/coverart-data/preferences.json"));
    }

    #[test]
    fn test_route_target() {
        let network = NetworkConfig::default();
        assert_eq!(network.route_target(), Some("8.8.8.8:53".parse().unwrap()));

        let named = NetworkConfig {
            probe_host: "dns.example".to_string(),
            ..NetworkConfig::default()
        };
        assert_eq!(named.route_target(), None);
    }
}
