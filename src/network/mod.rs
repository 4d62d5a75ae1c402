//! Connection resilience: network readiness and the Core connection supervisor

pub mod detector;
pub mod monitor;
pub mod probe;
pub mod supervisor;
pub mod validator;

pub use detector::{NetworkReadiness, NetworkReadinessDetector, NetworkState, StateCallback};
pub use monitor::{
    NetworkCapabilities, NetworkError, NetworkEvent, NetworkMonitor, SystemNetworkMonitor,
};
pub use probe::{ReachabilityProbe, TcpProbe};
pub use supervisor::{ConnectionResult, ConnectionStatus, ConnectionSupervisor, SupervisorConfig};
pub use validator::{ConnectionOutcome, ConnectionValidator, HttpCoreValidator};
