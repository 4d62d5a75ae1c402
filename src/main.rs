//! Cover Art Remote
//!
//! Connects to a Roon Core, keeps the connection alive across network changes
//! and follows the configured zone.

use coverart_remote::{adapters, bus, config, network, session, store, zones};

use adapters::Startable;
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coverart_remote=debug,roon_api=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting Cover Art Remote v{} ({})",
        env!("COVERART_VERSION"),
        env!("COVERART_GIT_SHA")
    );

    // Load configuration
    let config = config::load_config()?;
    tracing::info!(
        "Configuration loaded, core: {}",
        config.core.host.as_deref().unwrap_or("<last known>")
    );

    let bus = bus::create_bus();
    let data_dir = config::get_data_dir();
    let prefs: Arc<dyn store::KeyValueStore> = Arc::new(store::JsonFileStore::open(&data_dir));
    let zone_cache = zones::ZoneCache::new();

    // Network readiness
    let monitor = Arc::new(match config.network.route_target() {
        Some(target) => network::SystemNetworkMonitor::new(target, config.network.watch_interval()),
        None => {
            tracing::warn!(
                "Probe host {} is not an IP address, using the default route target",
                config.network.probe_host
            );
            network::SystemNetworkMonitor::default()
        }
    });
    monitor.start().await?;

    let probe = Arc::new(network::TcpProbe::new(
        config.network.probe_host.clone(),
        config.network.probe_port,
        config.network.probe_timeout(),
    ));
    let detector = Arc::new(network::NetworkReadinessDetector::with_poll_interval(
        monitor.clone(),
        probe,
        config.network.poll_interval(),
    ));
    let validator = Arc::new(network::HttpCoreValidator::new(
        config.connection.attempt_timeout(),
    ));
    let supervisor = network::ConnectionSupervisor::new(
        detector,
        validator,
        config.connection.supervisor_config(),
    );

    let session = Arc::new(session::Session::new(
        supervisor,
        prefs,
        Arc::new(zone_cache.clone()),
        bus.clone(),
        session::SessionOptions {
            core: config
                .core
                .host
                .as_ref()
                .map(|host| session::CoreTarget::new(host.clone(), config.core.port)),
            policy: config.reconnect.policy()?,
        },
    ));

    let roon = adapters::RoonLink::new(zone_cache, bus.clone()).with_settings(session.reconciler());
    session.set_link(Arc::new(roon.clone()));
    tracing::info!(
        "Settings service ready: {}",
        session.reconciler().service_info()
    );

    session.register_network_monitoring(Arc::new(|state: network::NetworkState| {
        tracing::info!("Network state: {}", state);
    }));

    let shutdown = CancellationToken::new();
    let reconciliation = tokio::spawn({
        let session = session.clone();
        let shutdown = shutdown.clone();
        async move { session.run_zone_reconciliation(shutdown).await }
    });

    roon.start().await?;

    match session.launch(|status| tracing::info!("{}", status)).await {
        session::LaunchOutcome::Finished(result) => tracing::info!("Launch finished: {:?}", result),
        session::LaunchOutcome::Skipped(decision) => {
            tracing::info!("No reconnect on launch ({}), waiting for discovery", decision.reason)
        }
        other => tracing::debug!("Launch: {:?}", other),
    }

    shutdown_signal().await;

    tracing::info!("Shutting down services...");
    bus.publish(bus::BusEvent::ShuttingDown);
    shutdown.cancel();
    session.unregister_network_monitoring();
    roon.stop().await;
    monitor.stop().await;
    if let Err(e) = reconciliation.await {
        tracing::warn!("Zone reconciliation task ended abnormally: {}", e);
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
