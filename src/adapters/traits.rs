use anyhow::Result;
use async_trait::async_trait;

/// Background service with a restartable start/stop lifecycle.
///
/// `start` is idempotent while running; `stop` cancels the service's token
/// so a later `start` runs with a fresh one.
#[async_trait]
pub trait Startable: Send + Sync {
    /// Service name used in logs ("roon", "network-monitor")
    fn name(&self) -> &'static str;

    async fn start(&self) -> Result<()>;

    async fn stop(&self);

    fn is_running(&self) -> bool;
}

/// Link that pairs with a Core once its address has been validated
#[async_trait]
pub trait CoreLink: Send + Sync {
    async fn pin_core(&self, host: &str, port: u16) -> Result<()>;
}

/// Implement `Startable` for a service that provides
/// `async fn start_internal(&self) -> Result<()>`,
/// `async fn stop_internal(&self)` and a `started: Arc<AtomicBool>` field.
///
/// ```ignore
/// impl_startable!(SystemNetworkMonitor, "network-monitor");
/// ```
#[macro_export]
macro_rules! impl_startable {
    ($service:ty, $name:literal) => {
        #[async_trait::async_trait]
        impl $crate::adapters::Startable for $service {
            fn name(&self) -> &'static str {
                $name
            }

            async fn start(&self) -> anyhow::Result<()> {
                tracing::debug!("Starting {}", $name);
                self.start_internal().await
            }

            async fn stop(&self) {
                tracing::debug!("Stopping {}", $name);
                self.stop_internal().await
            }

            fn is_running(&self) -> bool {
                self.started.load(std::sync::atomic::Ordering::SeqCst)
            }
        }
    };
}
