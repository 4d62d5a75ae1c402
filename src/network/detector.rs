//! Network readiness: is it worth trying to reach the Core yet?

use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use super::monitor::{NetworkEvent, NetworkMonitor};
use super::probe::ReachabilityProbe;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);
pub const READY_TIMEOUT_MESSAGE: &str = "network check timed out";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkState {
    NotAvailable,
    /// Up, but the internet route is not confirmed yet
    Connecting,
    Available,
    Error(String),
}

impl NetworkState {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAvailable => f.write_str("network not available"),
            Self::Connecting => f.write_str("network connecting"),
            Self::Available => f.write_str("network available"),
            Self::Error(message) => f.write_str(message),
        }
    }
}

pub type StateCallback = Arc<dyn Fn(NetworkState) + Send + Sync>;

#[async_trait]
pub trait NetworkReadiness: Send + Sync {
    async fn current_state(&self) -> NetworkState;

    /// Resolve once the network is Available, or with an Error state when
    /// `timeout` elapses first
    async fn wait_for_ready(&self, timeout: Duration) -> NetworkState;

    /// Push state changes to `on_change`, replacing any earlier subscription
    fn subscribe(&self, on_change: StateCallback);

    fn unsubscribe(&self);
}

/// Maps monitor capabilities plus the probe onto a NetworkState
#[derive(Clone)]
struct Classifier {
    monitor: Arc<dyn NetworkMonitor>,
    probe: Arc<dyn ReachabilityProbe>,
}

impl Classifier {
    async fn classify(&self) -> NetworkState {
        let caps = match self.monitor.active_network() {
            Ok(Some(caps)) => caps,
            Ok(None) => return NetworkState::NotAvailable,
            Err(e) => {
                tracing::error!("Network state check failed: {}", e);
                return NetworkState::Error(format!("network state check failed: {}", e));
            }
        };

        if !caps.internet {
            return NetworkState::Connecting;
        }
        if caps.validated || self.probe.is_reachable().await {
            return NetworkState::Available;
        }
        NetworkState::Connecting
    }
}

pub struct NetworkReadinessDetector {
    classifier: Classifier,
    poll_interval: Duration,
    subscription: Mutex<Option<CancellationToken>>,
}

impl NetworkReadinessDetector {
    pub fn new(monitor: Arc<dyn NetworkMonitor>, probe: Arc<dyn ReachabilityProbe>) -> Self {
        Self::with_poll_interval(monitor, probe, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        monitor: Arc<dyn NetworkMonitor>,
        probe: Arc<dyn ReachabilityProbe>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            classifier: Classifier { monitor, probe },
            poll_interval,
            subscription: Mutex::new(None),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[async_trait]
impl NetworkReadiness for NetworkReadinessDetector {
    async fn current_state(&self) -> NetworkState {
        self.classifier.classify().await
    }

    async fn wait_for_ready(&self, timeout: Duration) -> NetworkState {
        let poll = async {
            loop {
                let state = self.classifier.classify().await;
                if state.is_available() {
                    return state;
                }
                tracing::debug!("Waiting for network: {}", state);
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(state) => state,
            Err(_) => {
                tracing::warn!("Network readiness check timed out after {:?}", timeout);
                NetworkState::Error(READY_TIMEOUT_MESSAGE.to_string())
            }
        }
    }

    fn subscribe(&self, on_change: StateCallback) {
        let token = CancellationToken::new();
        if let Some(previous) = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone())
        {
            previous.cancel();
        }

        let classifier = self.classifier.clone();
        let mut events = classifier.monitor.events();

        tokio::spawn(async move {
            // Recomputation triggered by the latest event; superseded ones are cancelled
            let mut pending = token.child_token();

            loop {
                let event = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = events.recv() => event,
                };

                match event {
                    Ok(NetworkEvent::Lost) => {
                        pending.cancel();
                        on_change(NetworkState::NotAvailable);
                    }
                    Ok(NetworkEvent::Available | NetworkEvent::CapabilitiesChanged)
                    | Err(RecvError::Lagged(_)) => {
                        pending.cancel();
                        pending = token.child_token();
                        let cancelled = pending.clone();
                        let classifier = classifier.clone();
                        let on_change = on_change.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                biased;
                                _ = cancelled.cancelled() => {}
                                state = classifier.classify() => on_change(state),
                            }
                        });
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("Network event stream closed");
                        break;
                    }
                }
            }
        });
    }

    fn unsubscribe(&self) {
        if let Some(token) = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }
}

impl Drop for NetworkReadinessDetector {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
