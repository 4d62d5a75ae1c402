//! Connection supervisor driven through the real readiness detector.
//!
//! Network and Core are scripted; time is paused so backoff runs instantly.

use async_trait::async_trait;
use coverart_remote::network::{
    ConnectionOutcome, ConnectionResult, ConnectionStatus, ConnectionSupervisor,
    ConnectionValidator, NetworkCapabilities, NetworkError, NetworkEvent, NetworkMonitor,
    NetworkReadiness, NetworkReadinessDetector, NetworkState, ReachabilityProbe, SupervisorConfig,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

const VALIDATED: NetworkCapabilities = NetworkCapabilities {
    internet: true,
    validated: true,
};

const UNVALIDATED: NetworkCapabilities = NetworkCapabilities {
    internet: true,
    validated: false,
};

struct ScriptedMonitor {
    network: Mutex<Option<NetworkCapabilities>>,
    events: broadcast::Sender<NetworkEvent>,
}

impl ScriptedMonitor {
    fn new(network: Option<NetworkCapabilities>) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            network: Mutex::new(network),
            events,
        })
    }

    fn set(&self, network: Option<NetworkCapabilities>) {
        *self.network.lock().unwrap() = network;
    }

    fn emit(&self, event: NetworkEvent) {
        let _ = self.events.send(event);
    }
}

impl NetworkMonitor for ScriptedMonitor {
    fn active_network(&self) -> Result<Option<NetworkCapabilities>, NetworkError> {
        Ok(*self.network.lock().unwrap())
    }

    fn events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }
}

struct SwitchProbe(AtomicBool);

#[async_trait]
impl ReachabilityProbe for SwitchProbe {
    async fn is_reachable(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Replays outcomes in order, then repeats the last one
struct ScriptedCore {
    outcomes: Mutex<VecDeque<ConnectionOutcome>>,
    calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
}

impl ScriptedCore {
    fn new(outcomes: Vec<ConnectionOutcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn gaps(&self) -> Vec<Duration> {
        self.call_times
            .lock()
            .unwrap()
            .windows(2)
            .map(|w| w[1] - w[0])
            .collect()
    }
}

#[async_trait]
impl ConnectionValidator for ScriptedCore {
    async fn validate_connection(&self, _host: &str, _port: u16) -> ConnectionOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.len() > 1 {
            outcomes.pop_front().unwrap()
        } else {
            outcomes.front().cloned().unwrap_or(ConnectionOutcome::Success)
        }
    }
}

fn supervisor(
    monitor: Arc<ScriptedMonitor>,
    reachable: bool,
    core: Arc<ScriptedCore>,
    config: SupervisorConfig,
) -> ConnectionSupervisor {
    let detector = NetworkReadinessDetector::with_poll_interval(
        monitor,
        Arc::new(SwitchProbe(AtomicBool::new(reachable))),
        Duration::from_millis(500),
    );
    ConnectionSupervisor::new(Arc::new(detector), core, config)
}

async fn connect_recording(
    supervisor: &ConnectionSupervisor,
) -> (ConnectionResult, Vec<ConnectionStatus>) {
    let mut statuses = Vec::new();
    let result = supervisor
        .connect("192.168.1.20", 9330, |status| statuses.push(status.clone()))
        .await;
    (result, statuses)
}

#[tokio::test(start_paused = true)]
async fn recovers_after_transient_failures() {
    let core = ScriptedCore::new(vec![
        ConnectionOutcome::NetworkError("connection refused".to_string()),
        ConnectionOutcome::Timeout("no answer".to_string()),
        ConnectionOutcome::Success,
    ]);
    let supervisor = supervisor(
        ScriptedMonitor::new(Some(VALIDATED)),
        false,
        core.clone(),
        SupervisorConfig::default(),
    );

    let (result, statuses) = connect_recording(&supervisor).await;

    assert_eq!(result, ConnectionResult::Success);
    assert_eq!(
        statuses,
        vec![
            ConnectionStatus::CheckingNetwork,
            ConnectionStatus::NetworkReady,
            ConnectionStatus::Attempting {
                attempt: 1,
                max_attempts: 5
            },
            ConnectionStatus::Retrying {
                timed_out: false,
                delay: Duration::from_secs(1)
            },
            ConnectionStatus::Attempting {
                attempt: 2,
                max_attempts: 5
            },
            ConnectionStatus::Retrying {
                timed_out: true,
                delay: Duration::from_secs(2)
            },
            ConnectionStatus::Attempting {
                attempt: 3,
                max_attempts: 5
            },
            ConnectionStatus::Connected,
        ]
    );
    assert_eq!(core.gaps(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
}

#[tokio::test(start_paused = true)]
async fn exhaustion_is_retryable_and_backoff_is_capped() {
    let core = ScriptedCore::new(vec![ConnectionOutcome::NetworkError(
        "host unreachable".to_string(),
    )]);
    let supervisor = supervisor(
        ScriptedMonitor::new(Some(VALIDATED)),
        false,
        core.clone(),
        SupervisorConfig {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            network_ready_timeout: Duration::from_secs(30),
        },
    );

    let (result, statuses) = connect_recording(&supervisor).await;

    assert_eq!(
        result,
        ConnectionResult::Failed {
            error: "Connection failed: host unreachable".to_string(),
            can_retry: true,
        }
    );
    assert_eq!(statuses.last(), Some(&ConnectionStatus::Exhausted));
    assert_eq!(core.calls(), 5);
    assert_eq!(
        core.gaps(),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(3),
            Duration::from_secs(3),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn invalid_core_is_not_retried() {
    let core = ScriptedCore::new(vec![ConnectionOutcome::InvalidCore(
        "not a Roon Core".to_string(),
    )]);
    let supervisor = supervisor(
        ScriptedMonitor::new(Some(VALIDATED)),
        false,
        core.clone(),
        SupervisorConfig::default(),
    );

    let (result, statuses) = connect_recording(&supervisor).await;

    assert_eq!(
        result,
        ConnectionResult::Failed {
            error: "not a Roon Core".to_string(),
            can_retry: false,
        }
    );
    assert_eq!(
        statuses.last(),
        Some(&ConnectionStatus::Rejected("not a Roon Core".to_string()))
    );
    assert_eq!(core.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn no_network_never_reaches_the_core() {
    let core = ScriptedCore::new(vec![ConnectionOutcome::Success]);
    let supervisor = supervisor(
        ScriptedMonitor::new(None),
        true,
        core.clone(),
        SupervisorConfig {
            network_ready_timeout: Duration::from_secs(5),
            ..SupervisorConfig::default()
        },
    );

    let started = Instant::now();
    let (result, statuses) = connect_recording(&supervisor).await;

    assert!(matches!(result, ConnectionResult::NetworkNotReady(_)));
    assert_eq!(core.calls(), 0);
    assert_eq!(statuses.len(), 2);
    assert!(matches!(statuses[1], ConnectionStatus::NetworkCheckFailed(_)));
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn waits_for_network_before_first_attempt() {
    let monitor = ScriptedMonitor::new(None);
    let core = ScriptedCore::new(vec![ConnectionOutcome::Success]);
    let supervisor = supervisor(
        monitor.clone(),
        false,
        core.clone(),
        SupervisorConfig::default(),
    );

    let flip = {
        let monitor = monitor.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            monitor.set(Some(VALIDATED));
        })
    };

    let started = Instant::now();
    let (result, _) = connect_recording(&supervisor).await;
    flip.await.unwrap();

    assert_eq!(result, ConnectionResult::Success);
    assert_eq!(core.calls(), 1);
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn unvalidated_network_uses_the_probe() {
    let detector = NetworkReadinessDetector::new(
        ScriptedMonitor::new(Some(UNVALIDATED)),
        Arc::new(SwitchProbe(AtomicBool::new(false))),
    );
    assert_eq!(detector.current_state().await, NetworkState::Connecting);

    let detector = NetworkReadinessDetector::new(
        ScriptedMonitor::new(Some(UNVALIDATED)),
        Arc::new(SwitchProbe(AtomicBool::new(true))),
    );
    assert_eq!(detector.current_state().await, NetworkState::Available);
}

#[tokio::test]
async fn monitoring_pushes_state_changes_until_unregistered() {
    let monitor = ScriptedMonitor::new(Some(VALIDATED));
    let supervisor = supervisor(
        monitor.clone(),
        false,
        ScriptedCore::new(vec![ConnectionOutcome::Success]),
        SupervisorConfig::default(),
    );

    let (tx, mut rx) = mpsc::channel(8);
    supervisor.register_network_monitoring(Arc::new(move |state: NetworkState| {
        let _ = tx.try_send(state);
    }));
    // Let the subscription task start listening
    tokio::task::yield_now().await;

    monitor.set(None);
    monitor.emit(NetworkEvent::Lost);
    let state = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap();
    assert_eq!(state, Some(NetworkState::NotAvailable));

    monitor.set(Some(VALIDATED));
    monitor.emit(NetworkEvent::Available);
    let state = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap();
    assert_eq!(state, Some(NetworkState::Available));

    supervisor.unregister_network_monitoring();
    tokio::task::yield_now().await;
    monitor.emit(NetworkEvent::Available);
    let after = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(matches!(after, Err(_) | Ok(None)));
}
