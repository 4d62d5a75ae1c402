//! Session - one connection lifecycle per process
//!
//! Picks the Core to talk to (configured host, else the remembered one if
//! the reconnect policy allows it), connects through the supervisor, pins the
//! Roon link to the Core it validated and keeps the followed zone in line
//! with the live zone set.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::CoreLink;
use crate::bus::{BusEvent, SharedBus};
use crate::domain::{
    is_valid_core_host, InFlightGuard, ReconnectDecision, ReconnectPolicy, ReconnectReason,
    ZoneSelectionDecision, ZoneSelectionUseCase,
};
use crate::network::{ConnectionResult, ConnectionStatus, ConnectionSupervisor, StateCallback};
use crate::settings::SettingsReconciler;
use crate::store::{ConnectionHistory, KeyValueStore, ZoneConfigStore};
use crate::zones::ZoneProvider;

/// Host and port of a Core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreTarget {
    pub host: String,
    pub port: u16,
}

impl CoreTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, the form users type and legacy keys are derived from
    pub fn host_input(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Explicitly configured Core. Bypasses the reconnect policy.
    pub core: Option<CoreTarget>,
    pub policy: ReconnectPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// `launch` already ran in this process
    AlreadyLaunched,
    /// The remembered Core is not worth reconnecting to
    Skipped(ReconnectDecision),
    /// Another connect is in flight
    Busy,
    Finished(ConnectionResult),
}

pub struct Session {
    supervisor: ConnectionSupervisor,
    history: ConnectionHistory,
    policy: ReconnectPolicy,
    configured_core: Option<CoreTarget>,
    guard: InFlightGuard,
    launched: AtomicBool,
    link: OnceLock<Arc<dyn CoreLink>>,
    zone_config: ZoneConfigStore,
    reconciler: Arc<SettingsReconciler>,
    zones: Arc<dyn ZoneProvider>,
    selector: ZoneSelectionUseCase,
    current_zone: RwLock<Option<String>>,
    bus: SharedBus,
}

impl Session {
    pub fn new(
        supervisor: ConnectionSupervisor,
        store: Arc<dyn KeyValueStore>,
        zones: Arc<dyn ZoneProvider>,
        bus: SharedBus,
        options: SessionOptions,
    ) -> Self {
        let history = ConnectionHistory::new(store.clone());
        let zone_config = ZoneConfigStore::new(store);

        // Legacy per-host keys are looked up under the Core we expect to use
        let host_input = match &options.core {
            Some(core) => core.host_input(),
            None => {
                let last = history.last_connection();
                last.host
                    .map(|host| format!("{}:{}", host, last.port))
                    .unwrap_or_default()
            }
        };

        let reconciler = Arc::new(SettingsReconciler::new(
            &host_input,
            zone_config.clone(),
            zones.clone(),
            bus.clone(),
        ));

        Self {
            supervisor,
            history,
            policy: options.policy,
            configured_core: options.core,
            guard: InFlightGuard::new(),
            launched: AtomicBool::new(false),
            link: OnceLock::new(),
            zone_config,
            reconciler,
            zones,
            selector: ZoneSelectionUseCase::new(),
            current_zone: RwLock::new(None),
            bus,
        }
    }

    /// Link that pairs with every Core this session validates. Set once.
    pub fn set_link(&self, link: Arc<dyn CoreLink>) {
        if self.link.set(link).is_err() {
            warn!("Core link already set, keeping the first one");
        }
    }

    /// Settings service backing this session
    pub fn reconciler(&self) -> Arc<SettingsReconciler> {
        self.reconciler.clone()
    }

    pub fn current_zone(&self) -> Option<String> {
        self.current_zone
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_connecting(&self) -> bool {
        self.guard.is_in_progress()
    }

    /// Boot-time connect. Runs at most once; later calls return
    /// `AlreadyLaunched` without touching the network.
    pub async fn launch<F>(&self, on_status: F) -> LaunchOutcome
    where
        F: FnMut(&ConnectionStatus) + Send,
    {
        if self.launched.swap(true, Ordering::SeqCst) {
            debug!("Session already launched");
            return LaunchOutcome::AlreadyLaunched;
        }

        let target = match self.resolve_target() {
            Ok(target) => target,
            Err(decision) => {
                info!("Not reconnecting on launch: {}", decision.reason);
                return LaunchOutcome::Skipped(decision);
            }
        };

        self.connect_to(&target, on_status).await
    }

    /// Configured Core, else the remembered one if the policy accepts it
    fn resolve_target(&self) -> Result<CoreTarget, ReconnectDecision> {
        if let Some(core) = &self.configured_core {
            return Ok(core.clone());
        }

        let last = self.history.last_connection();
        let decision = self.policy.decide(
            last.host.as_deref(),
            last.port,
            last.time,
            Utc::now(),
            is_valid_core_host,
        );
        if !decision.should_reconnect {
            return Err(decision);
        }

        let port = u16::try_from(last.port).map_err(|_| ReconnectDecision {
            should_reconnect: false,
            reason: ReconnectReason::InvalidPort,
        })?;
        let host = last.host.unwrap_or_default();
        Ok(CoreTarget::new(host.trim(), port))
    }

    /// Connect to `target` unless a connect is already running. Statuses are
    /// forwarded to `on_status` and mirrored on the bus. A validated Core is
    /// handed to the link before it is remembered.
    pub async fn connect_to<F>(&self, target: &CoreTarget, mut on_status: F) -> LaunchOutcome
    where
        F: FnMut(&ConnectionStatus) + Send,
    {
        let Some(_permit) = self.guard.try_acquire() else {
            warn!("Connect to {} ignored, another connect is running", target.host_input());
            return LaunchOutcome::Busy;
        };

        let bus = self.bus.clone();
        let result = self
            .supervisor
            .connect(&target.host, target.port, |status| {
                bus.publish(BusEvent::ConnectionStatus {
                    message: status.to_string(),
                });
                on_status(status);
            })
            .await;

        let result = match result {
            ConnectionResult::Success => self.pin_link(target).await,
            other => other,
        };

        if result == ConnectionResult::Success {
            self.history
                .record_success(&target.host, target.port, Utc::now());
        }

        LaunchOutcome::Finished(result)
    }

    async fn pin_link(&self, target: &CoreTarget) -> ConnectionResult {
        let Some(link) = self.link.get() else {
            return ConnectionResult::Success;
        };
        match link.pin_core(&target.host, target.port).await {
            Ok(()) => ConnectionResult::Success,
            Err(e) => {
                warn!("Could not pair with Core {}: {}", target.host_input(), e);
                ConnectionResult::Failed {
                    error: format!("Could not pair with Core: {}", e),
                    can_retry: true,
                }
            }
        }
    }

    /// Re-evaluate the followed zone against the live zone set
    pub fn reconcile_zone(&self) -> ZoneSelectionDecision {
        let zones = self.zones.zones();
        let stored = self.reconciler.load_zone_configuration();
        let previous = self.current_zone();

        let decision = self
            .selector
            .select_zone(&zones, stored.as_deref(), previous.as_deref());

        if decision.persist {
            if let Some(zone_id) = &decision.zone_id {
                info!("Persisting automatically selected zone {}", zone_id);
                self.zone_config.save_zone_configuration(zone_id);
            }
        }

        if let Some(message) = &decision.status_message {
            warn!("{}", message);
            self.bus.publish(BusEvent::ConnectionStatus {
                message: message.clone(),
            });
        }

        if decision.zone_id != previous {
            debug!(
                "Zone {:?} -> {:?} ({})",
                previous, decision.zone_id, decision.reason
            );
            *self
                .current_zone
                .write()
                .unwrap_or_else(PoisonError::into_inner) = decision.zone_id.clone();
            self.bus.publish(BusEvent::ZoneSelected {
                zone_id: decision.zone_id.clone(),
                reason: decision.reason.to_string(),
            });
        }

        decision
    }

    /// Reconcile on every zone or zone-configuration change until cancelled
    pub async fn run_zone_reconciliation(&self, shutdown: CancellationToken) {
        let mut rx = self.bus.subscribe();
        self.reconcile_zone();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Zone reconciliation stopped");
                    break;
                }
                event = rx.recv() => match event {
                    Ok(BusEvent::ZonesChanged { .. })
                    | Ok(BusEvent::ZoneRemoved { .. })
                    | Ok(BusEvent::ZoneConfigChanged { .. }) => {
                        self.reconcile_zone();
                    }
                    Ok(BusEvent::ShuttingDown) | Err(RecvError::Closed) => break,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Zone reconciliation lagged by {} events", skipped);
                        self.reconcile_zone();
                    }
                },
            }
        }
    }

    /// Forward network state changes while the session is alive
    pub fn register_network_monitoring(&self, on_change: StateCallback) {
        self.supervisor.register_network_monitoring(on_change);
    }

    pub fn unregister_network_monitoring(&self) {
        self.supervisor.unregister_network_monitoring();
    }
}
