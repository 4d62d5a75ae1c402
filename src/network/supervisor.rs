//! ConnectionSupervisor - network gate plus bounded retries with backoff
//!
//! Readiness is resolved before the first attempt. Attempts are strictly
//! sequential; transient failures back off with a capped doubling delay,
//! an invalid Core ends the sequence at once.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::detector::{NetworkReadiness, NetworkState, StateCallback};
use super::validator::{ConnectionOutcome, ConnectionValidator};

/// Retry configuration for connection attempts
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Attempts per connect call (at least one is always made)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Maximum delay (backoff caps at this value)
    pub max_delay: Duration,
    /// Upper bound on the readiness wait
    pub network_ready_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15),
            network_ready_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionResult {
    Success,
    Failed { error: String, can_retry: bool },
    NetworkNotReady(String),
}

/// Progress reported while connecting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    CheckingNetwork,
    NetworkUnavailable,
    NetworkCheckFailed(String),
    NetworkWaiting,
    NetworkReady,
    Attempting { attempt: u32, max_attempts: u32 },
    Retrying { timed_out: bool, delay: Duration },
    Connected,
    Rejected(String),
    Exhausted,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CheckingNetwork => write!(f, "Checking network connection..."),
            Self::NetworkUnavailable => write!(f, "Network unavailable. Please check your connection."),
            Self::NetworkCheckFailed(message) => write!(f, "Network check failed: {}", message),
            Self::NetworkWaiting => write!(f, "Network connecting, waiting..."),
            Self::NetworkReady => write!(f, "Network ready. Connecting..."),
            Self::Attempting {
                attempt,
                max_attempts,
            } => write!(f, "Connecting... (attempt {}/{})", attempt, max_attempts),
            Self::Retrying { timed_out, delay } => {
                let what = if *timed_out { "timed out" } else { "failed" };
                write!(f, "Connection {}. Retrying in {:?}...", what, delay)
            }
            Self::Connected => write!(f, "Connected."),
            Self::Rejected(message) => write!(f, "Connection failed: {}", message),
            Self::Exhausted => write!(f, "Connection failed. Max retries reached."),
        }
    }
}

pub struct ConnectionSupervisor {
    detector: Arc<dyn NetworkReadiness>,
    validator: Arc<dyn ConnectionValidator>,
    config: SupervisorConfig,
}

impl ConnectionSupervisor {
    pub fn new(
        detector: Arc<dyn NetworkReadiness>,
        validator: Arc<dyn ConnectionValidator>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            detector,
            validator,
            config,
        }
    }

    /// Wait for the network, then try the Core up to `max_attempts` times.
    ///
    /// `on_status` observes every phase in order and cannot influence the
    /// outcome.
    pub async fn connect<F>(&self, host: &str, port: u16, mut on_status: F) -> ConnectionResult
    where
        F: FnMut(&ConnectionStatus) + Send,
    {
        let mut report = |status: ConnectionStatus| {
            debug!("{}", status);
            on_status(&status);
        };

        report(ConnectionStatus::CheckingNetwork);
        info!("Connecting to {}:{}", host, port);

        match self
            .detector
            .wait_for_ready(self.config.network_ready_timeout)
            .await
        {
            NetworkState::NotAvailable => {
                report(ConnectionStatus::NetworkUnavailable);
                return ConnectionResult::NetworkNotReady("Network is unavailable".to_string());
            }
            NetworkState::Error(message) => {
                report(ConnectionStatus::NetworkCheckFailed(message.clone()));
                return ConnectionResult::NetworkNotReady(message);
            }
            NetworkState::Connecting => report(ConnectionStatus::NetworkWaiting),
            NetworkState::Available => report(ConnectionStatus::NetworkReady),
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut delay = self.config.initial_delay;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            report(ConnectionStatus::Attempting {
                attempt,
                max_attempts,
            });

            let timed_out = match self.validator.validate_connection(host, port).await {
                ConnectionOutcome::Success => {
                    report(ConnectionStatus::Connected);
                    info!("Connected to {}:{}", host, port);
                    return ConnectionResult::Success;
                }
                ConnectionOutcome::InvalidCore(message) => {
                    error!("Invalid Core at {}:{}: {}", host, port, message);
                    report(ConnectionStatus::Rejected(message.clone()));
                    return ConnectionResult::Failed {
                        error: message,
                        can_retry: false,
                    };
                }
                ConnectionOutcome::NetworkError(message) => {
                    warn!("Network error (attempt {}): {}", attempt, message);
                    last_error = message;
                    false
                }
                ConnectionOutcome::Timeout(message) => {
                    warn!("Connection timeout (attempt {}): {}", attempt, message);
                    last_error = message;
                    true
                }
            };

            if attempt < max_attempts {
                report(ConnectionStatus::Retrying { timed_out, delay });
                tokio::time::sleep(delay).await;
                // Exponential backoff capped at max_delay
                delay = (delay * 2).min(self.config.max_delay);
            }
        }

        report(ConnectionStatus::Exhausted);
        error!("Connection to {}:{} failed, retries exhausted: {}", host, port, last_error);
        ConnectionResult::Failed {
            error: format!("Connection failed: {}", last_error),
            can_retry: true,
        }
    }

    /// Push network state changes to `on_change` until unregistered
    pub fn register_network_monitoring(&self, on_change: StateCallback) {
        self.detector.subscribe(on_change);
    }

    pub fn unregister_network_monitoring(&self) {
        self.detector.unsubscribe();
    }
}
