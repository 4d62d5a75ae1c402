//! Platform view of the active network
//!
//! `SystemNetworkMonitor` has no OS connectivity service to ask, so it
//! discovers the outbound route by connecting a UDP socket (no packets are
//! sent) and reports a non-loopback local address as internet capability.
//! It never claims the network is validated; the readiness probe decides.

use anyhow::Result;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

/// Capabilities of the active network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkCapabilities {
    /// The network claims a route to the internet
    pub internet: bool,
    /// The platform confirmed the internet route actually works
    pub validated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Available,
    CapabilitiesChanged,
    Lost,
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network query failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("network monitor unavailable: {0}")]
    Unavailable(String),
}

pub trait NetworkMonitor: Send + Sync {
    /// Capabilities of the active network, `None` when there is none
    fn active_network(&self) -> Result<Option<NetworkCapabilities>, NetworkError>;

    /// Stream of connectivity changes
    fn events(&self) -> broadcast::Receiver<NetworkEvent>;
}

/// Public address used only to pick the outbound route
const DEFAULT_ROUTE_TARGET: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 53);
const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(2);

pub struct SystemNetworkMonitor {
    route_target: SocketAddr,
    watch_interval: Duration,
    events: broadcast::Sender<NetworkEvent>,
    /// Wrapped in RwLock to allow creating fresh token on restart
    shutdown: Arc<RwLock<CancellationToken>>,
    started: Arc<AtomicBool>,
}

impl Default for SystemNetworkMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_ROUTE_TARGET, DEFAULT_WATCH_INTERVAL)
    }
}

impl SystemNetworkMonitor {
    pub fn new(route_target: SocketAddr, watch_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            route_target,
            watch_interval,
            events,
            shutdown: Arc::new(RwLock::new(CancellationToken::new())),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the route watcher (internal - use Startable trait)
    async fn start_internal(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let shutdown = {
            let mut token = self.shutdown.write().await;
            *token = CancellationToken::new();
            token.clone()
        };

        let target = self.route_target;
        let events = self.events.clone();
        let mut ticker = tokio::time::interval(self.watch_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tokio::spawn(async move {
            let mut previous = local_route(target).ok().flatten();
            tracing::debug!("Network watcher started, route via {:?}", previous);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Network watcher stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let current = match local_route(target) {
                            Ok(route) => route,
                            Err(e) => {
                                tracing::warn!("Route lookup failed: {}", e);
                                continue;
                            }
                        };
                        if let Some(event) = route_change(previous, current) {
                            tracing::info!("Network {:?} (route {:?} -> {:?})", event, previous, current);
                            // Ignore send errors (no subscribers)
                            let _ = events.send(event);
                        }
                        previous = current;
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop the route watcher (internal - use Startable trait)
    async fn stop_internal(&self) {
        self.shutdown.read().await.cancel();
        self.started.store(false, Ordering::SeqCst);
    }
}

crate::impl_startable!(SystemNetworkMonitor, "network-monitor");

impl NetworkMonitor for SystemNetworkMonitor {
    fn active_network(&self) -> Result<Option<NetworkCapabilities>, NetworkError> {
        Ok(local_route(self.route_target)?.map(|local| NetworkCapabilities {
            internet: !local.is_loopback() && !local.is_unspecified(),
            validated: false,
        }))
    }

    fn events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }
}

/// Local address the kernel would use to reach `target`.
/// `Ok(None)` when there is no route at all.
fn local_route(target: SocketAddr) -> std::io::Result<Option<IpAddr>> {
    let bind_addr: SocketAddr = match target {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(bind_addr)?;
    if socket.connect(target).is_err() {
        return Ok(None);
    }
    Ok(Some(socket.local_addr()?.ip()))
}

fn route_change(previous: Option<IpAddr>, current: Option<IpAddr>) -> Option<NetworkEvent> {
    match (previous, current) {
        (None, Some(_)) => Some(NetworkEvent::Available),
        (Some(_), None) => Some(NetworkEvent::Lost),
        (Some(a), Some(b)) if a != b => Some(NetworkEvent::CapabilitiesChanged),
        _ => None,
    }
}
