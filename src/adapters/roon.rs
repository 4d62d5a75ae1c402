//! Roon link using rust-roon-api
//!
//! Pairs with the Roon Core over the WebSocket protocol, either at the
//! address the connection supervisor validated or via SOOD discovery, and
//! keeps the shared zone cache in sync with the Core's zone subscription.
//! The zone picker in the Core's settings UI is served by the attached
//! settings reconciler.

use anyhow::Result;
use async_trait::async_trait;
use roon_api::{
    info,
    settings::{self as roon_settings, Settings},
    status::{self, Status},
    transport::{self, Transport, Zone as RoonZone},
    CoreEvent, Info, Parsed, RoonApi, Services, Svc,
};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::traits::CoreLink;
use crate::bus::{BusEvent, SharedBus};
use crate::config::get_data_file_path;
use crate::settings::values::ZONE_KEY;
use crate::settings::{SettingsLayout, SettingsReconciler, SettingsResponse, ZONE_CONTROL_TITLE};
use crate::zones::{NowPlaying, Output, Zone, ZoneCache};

const ROON_STATE_FILE: &str = "roon_state.json";

/// Initial reconnection delay
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Maximum reconnection delay
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct RoonLinkStatus {
    pub connected: bool,
    pub core_name: Option<String>,
    pub core_version: Option<String>,
    /// Address pairing is pinned to; `None` while discovering
    pub core_address: Option<SocketAddr>,
    pub zone_count: usize,
}

/// Internal state
#[derive(Default)]
struct LinkState {
    connected: bool,
    core_name: Option<String>,
    core_version: Option<String>,
}

#[derive(Clone)]
pub struct RoonLink {
    state: Arc<RwLock<LinkState>>,
    zones: ZoneCache,
    bus: SharedBus,
    state_path: PathBuf,
    settings: Option<Arc<SettingsReconciler>>,
    core_address: Arc<RwLock<Option<SocketAddr>>>,
    /// Wrapped in RwLock to allow creating fresh token on restart
    shutdown: Arc<RwLock<CancellationToken>>,
    started: Arc<AtomicBool>,
}

impl RoonLink {
    pub fn new(zones: ZoneCache, bus: SharedBus) -> Self {
        Self::with_state_path(zones, bus, get_data_file_path(ROON_STATE_FILE))
    }

    pub fn with_state_path(zones: ZoneCache, bus: SharedBus, state_path: PathBuf) -> Self {
        Self {
            state: Arc::new(RwLock::new(LinkState::default())),
            zones,
            bus,
            state_path,
            settings: None,
            core_address: Arc::new(RwLock::new(None)),
            shutdown: Arc::new(RwLock::new(CancellationToken::new())),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Serve the Core's settings UI from `reconciler`
    pub fn with_settings(mut self, reconciler: Arc<SettingsReconciler>) -> Self {
        self.settings = Some(reconciler);
        self
    }

    /// Start the Roon event loop (internal - use Startable trait)
    async fn start_internal(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(()); // Already started
        }

        // Create fresh cancellation token for this run (previous token may be cancelled)
        let shutdown = {
            let mut token = self.shutdown.write().await;
            *token = CancellationToken::new();
            token.clone()
        };

        let link = self.clone();

        // Spawn Roon event loop with reconnection logic
        tokio::spawn(async move {
            let mut retry_delay = INITIAL_RETRY_DELAY;

            loop {
                tracing::info!("Starting Roon discovery loop...");

                let loop_result = tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Roon link shutdown requested during discovery");
                        break;
                    }
                    result = run_roon_loop(link.clone(), shutdown.clone()) => result,
                };

                match loop_result {
                    Ok(()) => tracing::info!("Roon event loop ended normally"),
                    Err(e) => tracing::error!("Roon event loop error: {}", e),
                }

                link.mark_disconnected().await;

                tracing::info!("Roon loop exited, reconnecting in {:?}...", retry_delay);

                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Roon link shutdown requested");
                        break;
                    }
                    _ = tokio::time::sleep(retry_delay) => {
                        // Exponential backoff up to max
                        retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop the Roon link (internal - use Startable trait)
    async fn stop_internal(&self) {
        self.shutdown.read().await.cancel();
        self.started.store(false, Ordering::SeqCst);
        tracing::info!("Roon link stopped");
    }

    pub async fn get_status(&self) -> RoonLinkStatus {
        let s = self.state.read().await;
        RoonLinkStatus {
            connected: s.connected,
            core_name: s.core_name.clone(),
            core_version: s.core_version.clone(),
            core_address: *self.core_address.read().await,
            zone_count: self.zones.len(),
        }
    }

    async fn mark_connected(&self, core_name: String, core_version: String) {
        {
            let mut s = self.state.write().await;
            s.connected = true;
            s.core_name = Some(core_name.clone());
            s.core_version = Some(core_version.clone());
        }
        self.bus.publish(BusEvent::CoreConnected {
            core_name,
            version: core_version,
        });
    }

    /// Forget the Core and every zone it reported
    async fn mark_disconnected(&self) {
        let was_connected = {
            let mut s = self.state.write().await;
            let was_connected = s.connected;
            *s = LinkState::default();
            was_connected
        };
        let had_zones = !self.zones.is_empty();
        self.zones.clear();

        if was_connected {
            self.bus.publish(BusEvent::CoreDisconnected);
        }
        if had_zones {
            self.bus.publish(BusEvent::ZonesChanged {
                zone_ids: Vec::new(),
            });
        }
    }

    fn apply_zones(&self, zones: &[RoonZone]) {
        let mut zone_ids = Vec::with_capacity(zones.len());
        for zone in zones {
            tracing::debug!("Zone update: {} ({})", zone.display_name, zone.zone_id);
            if self.zones.upsert(convert_zone(zone)) {
                tracing::info!("Zone discovered: {}", zone.display_name);
            }
            zone_ids.push(zone.zone_id.clone());
        }
        self.bus.publish(BusEvent::ZonesChanged { zone_ids });
    }

    fn apply_saved_settings(&self, values: &Value) {
        let Some(reconciler) = &self.settings else {
            tracing::debug!("Settings saved with no settings service attached");
            return;
        };
        if let SettingsResponse::Error(error) = reconciler.commit_saved_values(values) {
            tracing::warn!("Saved settings rejected: {}", error.error);
        }
    }

    fn remove_zones(&self, zone_ids: &[String]) {
        for zone_id in zone_ids {
            tracing::debug!("Zone removed: {}", zone_id);
            self.zones.remove(zone_id);
            self.bus.publish(BusEvent::ZoneRemoved {
                zone_id: zone_id.clone(),
            });
        }
    }
}

#[async_trait]
impl CoreLink for RoonLink {
    /// Pair with the Core at `host:port` instead of whatever discovery finds.
    /// A running link reconnects when the address changes.
    async fn pin_core(&self, host: &str, port: u16) -> Result<()> {
        let address = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| anyhow::anyhow!("No address for Core {}:{}", host, port))?;

        let changed = {
            let mut pinned = self.core_address.write().await;
            let changed = *pinned != Some(address);
            *pinned = Some(address);
            changed
        };

        if changed && self.started.load(Ordering::SeqCst) {
            tracing::info!("Re-pairing with Roon Core at {}", address);
            self.stop_internal().await;
            self.mark_disconnected().await;
            self.start_internal().await?;
        }
        Ok(())
    }
}

/// Convert Roon zone to our Zone struct
fn convert_zone(roon_zone: &RoonZone) -> Zone {
    let now_playing = roon_zone.now_playing.as_ref().map(|np| NowPlaying {
        title: np.three_line.line1.clone(),
        artist: np.three_line.line2.clone(),
        album: np.three_line.line3.clone(),
        image_key: np.image_key.clone(),
    });

    let outputs = roon_zone
        .outputs
        .iter()
        .map(|o| Output {
            output_id: o.output_id.clone(),
            display_name: o.display_name.clone(),
        })
        .collect();

    let state_str = match roon_zone.state {
        transport::State::Playing => "playing",
        transport::State::Paused => "paused",
        transport::State::Loading => "loading",
        transport::State::Stopped => "stopped",
    };

    Zone {
        zone_id: roon_zone.zone_id.clone(),
        display_name: roon_zone.display_name.clone(),
        state: state_str.to_string(),
        now_playing,
        outputs,
    }
}

/// Zone picker in roon-api's settings types
fn roon_layout(layout: SettingsLayout) -> roon_settings::Layout<Value> {
    roon_settings::Layout {
        values: Value::Object(layout.values),
        layout: vec![roon_settings::Widget::Zone(roon_settings::Zone {
            title: ZONE_CONTROL_TITLE,
            subtitle: None,
            setting: ZONE_KEY,
        })],
        has_error: layout.has_error,
    }
}

fn extension_info() -> Info {
    // info! appends CARGO_PKG_NAME to the prefix: "com.coverart.coverart-remote"
    info!("com.coverart", "Cover Art Remote")
}

/// Main Roon event loop
async fn run_roon_loop(link: RoonLink, shutdown: CancellationToken) -> Result<()> {
    tracing::info!("Starting Roon discovery...");

    if let Some(parent) = link.state_path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created data directory: {:?}", parent);
        }
    }
    let state_path = link.state_path.to_string_lossy().to_string();
    tracing::info!("Roon state file: {}", state_path);

    let mut roon = RoonApi::new(extension_info());

    // Status service makes the extension visible in Roon Settings
    let (svc, status) = Status::new(&roon);

    let mut services = vec![
        Services::Transport(Transport::new()),
        Services::Status(status),
    ];

    let mut provided: HashMap<String, Svc> = HashMap::new();
    provided.insert(status::SVCNAME.to_owned(), svc);

    if let Some(reconciler) = link.settings.clone() {
        let get_layout = move |values: Value| roon_layout(reconciler.preview_settings(&values));
        let (svc, settings) = Settings::new(&roon, Box::new(get_layout));
        services.push(Services::Settings(settings));
        provided.insert(roon_settings::SVCNAME.to_owned(), svc);
    }

    let state_path_for_load = state_path.clone();
    let get_roon_state = move || RoonApi::load_roon_state(&state_path_for_load);

    let pinned = *link.core_address.read().await;
    let connection = match pinned {
        Some(address) => {
            tracing::info!("Connecting to Roon Core at {}", address);
            roon.ws_connect(
                Box::new(get_roon_state),
                provided,
                Some(services),
                &address.ip(),
                &address.port().to_string(),
            )
            .await
        }
        None => {
            roon.start_discovery(Box::new(get_roon_state), provided, Some(services))
                .await
        }
    };
    let (mut handles, mut core_rx) =
        connection.ok_or_else(|| anyhow::anyhow!("Failed to start Roon connection"))?;

    tracing::info!(
        "Roon connection started, waiting for core (authorize in Roon → Settings → Extensions)..."
    );

    handles.spawn(async move {
        loop {
            let event_result = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Roon event handler shutdown requested");
                    break;
                }
                result = core_rx.recv() => result
            };

            let Some((event, msg)) = event_result else {
                // Channel closed - exit to allow reconnection
                tracing::info!("Roon event channel closed, exiting handler");
                break;
            };

            match event {
                CoreEvent::Found(mut core) => {
                    let core_name = core.display_name.clone();
                    let core_version = core.display_version.clone();
                    tracing::info!("Roon Core found: {} (version {})", core_name, core_version);

                    if let Some(status) = core.get_status() {
                        status.set_status("Following zone selection".to_string(), false).await;
                    }

                    link.mark_connected(core_name, core_version).await;

                    if let Some(transport) = core.get_transport().cloned() {
                        transport.subscribe_zones().await;
                    }
                }
                CoreEvent::Lost(mut core) => {
                    tracing::warn!(
                        "Roon Core lost: {} (version {})",
                        core.display_name,
                        core.display_version
                    );

                    if let Some(status) = core.get_status() {
                        status
                            .set_status("Disconnected - searching...".to_string(), true)
                            .await;
                    }

                    link.mark_disconnected().await;
                }
                _ => {}
            }

            if let Some((_, parsed)) = msg {
                match parsed {
                    Parsed::RoonState(roon_state) => {
                        // Persist pairing state to data directory
                        if let Err(e) = RoonApi::save_roon_state(&state_path, roon_state) {
                            tracing::warn!("Failed to save Roon state: {}", e);
                        } else {
                            tracing::debug!("Roon state saved to {}", state_path);
                        }
                    }
                    Parsed::Zones(zones) => link.apply_zones(&zones),
                    Parsed::ZonesRemoved(zone_ids) => link.remove_zones(&zone_ids),
                    Parsed::SettingsSaved(values) => link.apply_saved_settings(&values),
                    _ => {}
                }
            }
        }
    });

    // Wait for all handles (runs until shutdown or error)
    while handles.join_next().await.is_some() {}

    Ok(())
}

// Startable trait implementation via macro
crate::impl_startable!(RoonLink, "roon");
