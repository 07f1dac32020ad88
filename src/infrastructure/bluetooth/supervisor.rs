//! Connection Supervisor
//!
//! Owns the single authoritative [`ConnectionState`] and drives the link
//! through discovery, subscription, staleness recovery and backoff:
//!
//! ```text
//! Disconnected ─backoff─▶ Scanning ─match─▶ Connecting ─ok─▶ Subscribed
//!      ▲                     │                  │              │    ▲
//!      └──── timeout ────────┘                  │           no frame│resubscribed
//!      └──── attempts exhausted ────────────────┘              ▼    │
//!      └──── link dropped / resubscribe failed ─────────────── Stale
//! ```

use crate::domain::models::{ConnectionState, LinkEvent, RawFrame};
use crate::domain::settings::LinkSettings;
use crate::error::BridgeError;
use crate::infrastructure::backoff::Backoff;
use crate::infrastructure::bluetooth::{BleLink, BleTransport};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub name_prefix: String,
    pub scan_timeout: Duration,
    pub connect_attempts: u32,
    pub stale_timeout: Duration,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl SupervisorConfig {
    pub fn new(name_prefix: &str, link: &LinkSettings) -> Self {
        Self {
            name_prefix: name_prefix.to_string(),
            scan_timeout: Duration::from_millis(link.scan_timeout_ms),
            connect_attempts: link.connect_attempts,
            stale_timeout: Duration::from_millis(link.stale_timeout_ms),
            backoff_min: Duration::from_millis(link.backoff_min_ms),
            backoff_max: Duration::from_millis(link.backoff_max_ms),
        }
    }
}

pub struct ConnectionSupervisor<T: BleTransport> {
    transport: T,
    config: SupervisorConfig,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    backoff: Backoff,
    device: Option<T::Device>,
    link: Option<T::Link>,
    frames: mpsc::Sender<LinkEvent>,
    shutdown: CancellationToken,
    dropped_on_full_queue: u64,
}

impl<T: BleTransport> ConnectionSupervisor<T> {
    pub fn new(
        transport: T,
        config: SupervisorConfig,
        frames: mpsc::Sender<LinkEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let backoff = Backoff::new(config.backoff_min, config.backoff_max);
        Self {
            transport,
            config,
            state: ConnectionState::Disconnected,
            state_tx,
            backoff,
            device: None,
            link: None,
            frames,
            shutdown,
            dropped_on_full_queue: 0,
        }
    }

    /// Observe state changes without owning the state
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Run until the shutdown token is cancelled
    pub async fn run(mut self) {
        self.transition(ConnectionState::Scanning, "startup");

        while !self.shutdown.is_cancelled() {
            match self.state {
                ConnectionState::Disconnected => self.wait_backoff().await,
                ConnectionState::Scanning => self.scan().await,
                ConnectionState::Connecting => self.connect().await,
                ConnectionState::Subscribed => self.receive().await,
                ConnectionState::Stale => self.recover().await,
            }
        }

        self.transport.stop_discovery().await;
        if let Some(mut link) = self.link.take() {
            link.disconnect().await;
        }
        self.transition(ConnectionState::Disconnected, "shutdown");
    }

    fn transition(&mut self, next: ConnectionState, reason: &str) {
        info!(from = %self.state, to = %next, reason, "Connection state changed");
        self.state = next;
        self.state_tx.send_replace(next);
    }

    async fn wait_backoff(&mut self) {
        let delay = self.backoff.next_delay();
        info!("Reconnecting in {:?}", delay);

        let shutdown = self.shutdown.clone();
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                self.transition(ConnectionState::Scanning, "backoff elapsed");
            }
        }
    }

    async fn scan(&mut self) {
        let shutdown = self.shutdown.clone();
        let scan_timeout = self.config.scan_timeout;
        let result = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = tokio::time::timeout(
                scan_timeout,
                self.transport.discover(&self.config.name_prefix),
            ) => result,
        };

        match result {
            Ok(Ok(device)) => {
                let reason = format!("found {}", device);
                self.device = Some(device);
                self.transition(ConnectionState::Connecting, &reason);
            }
            Ok(Err(e)) => {
                self.transport.stop_discovery().await;
                self.transition(ConnectionState::Disconnected, &format!("scan failed: {}", e));
            }
            Err(_) => {
                self.transport.stop_discovery().await;
                self.transition(
                    ConnectionState::Disconnected,
                    &format!(
                        "no device named {:?}* within {:?}",
                        self.config.name_prefix, scan_timeout
                    ),
                );
            }
        }
    }

    async fn connect(&mut self) {
        let Some(device) = self.device.take() else {
            self.transition(ConnectionState::Disconnected, "no device to connect to");
            return;
        };

        let shutdown = self.shutdown.clone();
        let attempts = self.config.connect_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let result = tokio::select! {
                _ = shutdown.cancelled() => return,
                result = self.transport.connect(&device) => result,
            };
            match result {
                Ok(link) => {
                    self.link = Some(link);
                    self.backoff.reset();
                    let reason = format!("subscribed to {}", device);
                    self.transition(ConnectionState::Subscribed, &reason);
                    self.signal(LinkEvent::Subscribed { recalibrate: true }).await;
                    return;
                }
                Err(e) => {
                    warn!("Connection attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = Some(e);
                }
            }
        }

        let error = BridgeError::SubscriptionFailure {
            attempts,
            reason: last_error.map(|e| e.to_string()).unwrap_or_default(),
        };
        self.transition(ConnectionState::Disconnected, &error.to_string());
    }

    async fn receive(&mut self) {
        let Some(link) = self.link.as_mut() else {
            self.transition(ConnectionState::Disconnected, "no active link");
            return;
        };

        let shutdown = self.shutdown.clone();
        let stale_timeout = self.config.stale_timeout;
        let result = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = tokio::time::timeout(stale_timeout, link.next_frame()) => result,
        };

        match result {
            Ok(Some(bytes)) => {
                self.forward_frame(RawFrame::new(bytes, Instant::now()));
            }
            Ok(None) => {
                self.drop_link().await;
                let error = BridgeError::ConnectionLost("notification stream ended".to_string());
                self.transition(ConnectionState::Disconnected, &error.to_string());
            }
            Err(_) => {
                self.transition(
                    ConnectionState::Stale,
                    &format!("no frame within {:?}", stale_timeout),
                );
                self.signal(LinkEvent::Stale).await;
            }
        }
    }

    async fn recover(&mut self) {
        let Some(link) = self.link.as_mut() else {
            self.transition(ConnectionState::Disconnected, "no active link");
            return;
        };

        let shutdown = self.shutdown.clone();
        let result = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = link.resubscribe() => result,
        };

        match result {
            Ok(()) => {
                self.backoff.reset();
                self.transition(ConnectionState::Subscribed, "resubscribed after stale period");
                self.signal(LinkEvent::Subscribed { recalibrate: false }).await;
            }
            Err(e) => {
                self.drop_link().await;
                self.transition(
                    ConnectionState::Disconnected,
                    &format!("resubscribe failed: {}", e),
                );
            }
        }
    }

    async fn drop_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.disconnect().await;
        }
        self.signal(LinkEvent::Lost).await;
    }

    /// Hand a frame to the frame path without ever waiting on it
    fn forward_frame(&mut self, frame: RawFrame) {
        match self.frames.try_send(LinkEvent::Frame(frame)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_on_full_queue += 1;
                warn!(
                    total = self.dropped_on_full_queue,
                    "Frame queue full, dropping frame"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Frame path closed, discarding frame");
            }
        }
    }

    /// Deliver a lifecycle marker. These are never dropped: the supervisor
    /// waits for queue space unless shutdown wins first.
    async fn signal(&mut self, event: LinkEvent) {
        let shutdown = self.shutdown.clone();
        tokio::select! {
            _ = shutdown.cancelled() => {}
            result = self.frames.send(event) => {
                if let Err(e) = result {
                    debug!("Frame path closed, discarding link event {:?}", e.0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::fmt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    enum Step {
        Frame(Vec<u8>),
        Drop,
    }

    #[derive(Default)]
    struct Counters {
        scans: Mutex<Vec<tokio::time::Instant>>,
        connects: AtomicUsize,
        resubscribes: AtomicUsize,
        disconnects: AtomicUsize,
    }

    struct MockDevice;

    impl fmt::Display for MockDevice {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("Mock-1")
        }
    }

    /// Scripted transport: each queue entry answers one call, an empty
    /// discovery queue never finds anything.
    struct MockTransport {
        discoveries: VecDeque<bool>,
        connects: VecDeque<Option<Vec<Step>>>,
        resubscribes: Arc<Mutex<VecDeque<bool>>>,
        counters: Arc<Counters>,
    }

    struct MockLink {
        steps: VecDeque<Step>,
        resubscribes: Arc<Mutex<VecDeque<bool>>>,
        counters: Arc<Counters>,
    }

    impl BleTransport for MockTransport {
        type Device = MockDevice;
        type Link = MockLink;

        async fn discover(&mut self, _name_prefix: &str) -> Result<MockDevice, BridgeError> {
            self.counters
                .scans
                .lock()
                .unwrap()
                .push(tokio::time::Instant::now());
            match self.discoveries.pop_front() {
                Some(true) => Ok(MockDevice),
                Some(false) => Err(BridgeError::ConnectionLost("scan aborted".into())),
                None => std::future::pending().await,
            }
        }

        async fn stop_discovery(&mut self) {}

        async fn connect(&mut self, _device: &MockDevice) -> Result<MockLink, BridgeError> {
            self.counters.connects.fetch_add(1, Ordering::SeqCst);
            match self.connects.pop_front().flatten() {
                Some(steps) => Ok(MockLink {
                    steps: steps.into(),
                    resubscribes: self.resubscribes.clone(),
                    counters: self.counters.clone(),
                }),
                None => Err(BridgeError::SubscriptionFailure {
                    attempts: 1,
                    reason: "refused".into(),
                }),
            }
        }
    }

    impl BleLink for MockLink {
        async fn next_frame(&mut self) -> Option<Vec<u8>> {
            match self.steps.pop_front() {
                Some(Step::Frame(bytes)) => Some(bytes),
                Some(Step::Drop) => None,
                // Out of script: the peripheral goes quiet
                None => std::future::pending().await,
            }
        }

        async fn resubscribe(&mut self) -> Result<(), BridgeError> {
            self.counters.resubscribes.fetch_add(1, Ordering::SeqCst);
            let ok = self.resubscribes.lock().unwrap().pop_front().unwrap_or(false);
            if ok {
                Ok(())
            } else {
                Err(BridgeError::ConnectionLost("gone".into()))
            }
        }

        async fn disconnect(&mut self) {
            self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            name_prefix: "Mock".into(),
            scan_timeout: Duration::from_secs(5),
            connect_attempts: 3,
            stale_timeout: Duration::from_millis(30),
            backoff_min: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
        }
    }

    struct Harness {
        events: mpsc::Receiver<LinkEvent>,
        states: watch::Receiver<ConnectionState>,
        counters: Arc<Counters>,
        shutdown: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
    }

    fn start(
        discoveries: Vec<bool>,
        connects: Vec<Option<Vec<Step>>>,
        resubscribes: Vec<bool>,
    ) -> Harness {
        start_with(config(), 16, discoveries, connects, resubscribes)
    }

    fn start_with(
        config: SupervisorConfig,
        queue_capacity: usize,
        discoveries: Vec<bool>,
        connects: Vec<Option<Vec<Step>>>,
        resubscribes: Vec<bool>,
    ) -> Harness {
        let counters = Arc::new(Counters::default());
        let transport = MockTransport {
            discoveries: discoveries.into(),
            connects: connects.into(),
            resubscribes: Arc::new(Mutex::new(resubscribes.into())),
            counters: counters.clone(),
        };
        let (tx, events) = mpsc::channel(queue_capacity);
        let shutdown = CancellationToken::new();
        let supervisor = ConnectionSupervisor::new(transport, config, tx, shutdown.clone());
        let states = supervisor.subscribe_state();
        let handle = tokio::spawn(supervisor.run());
        Harness {
            events,
            states,
            counters,
            shutdown,
            handle,
        }
    }

    async fn next_event(events: &mut mpsc::Receiver<LinkEvent>) -> LinkEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for link event")
            .expect("channel closed")
    }

    fn frame_bytes(event: &LinkEvent) -> Vec<u8> {
        match event {
            LinkEvent::Frame(frame) => frame.bytes.clone(),
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_forwards_frames_then_recovers_from_stale() {
        let steps = vec![Step::Frame(vec![1]), Step::Frame(vec![2])];
        let mut h = start(vec![true], vec![Some(steps)], vec![true]);

        assert_eq!(
            next_event(&mut h.events).await,
            LinkEvent::Subscribed { recalibrate: true }
        );
        assert_eq!(frame_bytes(&next_event(&mut h.events).await), vec![1]);
        assert_eq!(frame_bytes(&next_event(&mut h.events).await), vec![2]);

        // Script exhausted: goes stale, resubscribes without recalibrating
        assert_eq!(next_event(&mut h.events).await, LinkEvent::Stale);
        assert_eq!(
            next_event(&mut h.events).await,
            LinkEvent::Subscribed { recalibrate: false }
        );
        assert_eq!(h.counters.resubscribes.load(Ordering::SeqCst), 1);

        h.shutdown.cancel();
        h.handle.await.unwrap();
        assert_eq!(h.counters.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(*h.states.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_failed_resubscribe_drops_link_and_rescans() {
        let mut h = start(vec![true, true], vec![Some(vec![]), Some(vec![])], vec![false]);

        assert_eq!(
            next_event(&mut h.events).await,
            LinkEvent::Subscribed { recalibrate: true }
        );
        assert_eq!(next_event(&mut h.events).await, LinkEvent::Stale);
        assert_eq!(next_event(&mut h.events).await, LinkEvent::Lost);
        // Backoff, rescan and a fresh subscription that recalibrates
        assert_eq!(
            next_event(&mut h.events).await,
            LinkEvent::Subscribed { recalibrate: true }
        );
        assert_eq!(h.counters.connects.load(Ordering::SeqCst), 2);

        h.shutdown.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_end_is_connection_lost() {
        let steps = vec![Step::Frame(vec![7]), Step::Drop];
        let mut h = start(vec![true], vec![Some(steps)], vec![]);

        next_event(&mut h.events).await;
        next_event(&mut h.events).await;
        assert_eq!(next_event(&mut h.events).await, LinkEvent::Lost);
        assert_eq!(h.counters.resubscribes.load(Ordering::SeqCst), 0);
        assert_eq!(h.counters.disconnects.load(Ordering::SeqCst), 1);

        h.shutdown.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_retries_are_bounded() {
        let mut h = start(vec![true], vec![None, None, None, Some(vec![])], vec![]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.counters.connects.load(Ordering::SeqCst), 3);
        assert!(h.events.try_recv().is_err());
        assert_eq!(*h.states.borrow(), ConnectionState::Scanning);

        h.shutdown.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_error_backs_off_and_retries() {
        let mut h = start(vec![false, false, true], vec![Some(vec![])], vec![]);

        assert_eq!(
            next_event(&mut h.events).await,
            LinkEvent::Subscribed { recalibrate: true }
        );
        assert_eq!(*h.states.borrow(), ConnectionState::Subscribed);

        h.shutdown.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_cancels_backoff_wait() {
        let mut config = config();
        config.backoff_min = Duration::from_secs(60);
        config.backoff_max = Duration::from_secs(60);

        let transport = MockTransport {
            discoveries: vec![false].into(),
            connects: VecDeque::new(),
            resubscribes: Arc::new(Mutex::new(VecDeque::new())),
            counters: Arc::new(Counters::default()),
        };
        let (tx, _events) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let supervisor = ConnectionSupervisor::new(transport, config, tx, shutdown.clone());
        let handle = tokio::spawn(supervisor.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("backoff wait was not cancelled")
            .unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_drops_frames_but_not_link_events() {
        let steps = vec![Step::Frame(vec![1]), Step::Frame(vec![2]), Step::Drop];
        let mut h = start_with(config(), 2, vec![true], vec![Some(steps)], vec![]);

        // Nobody drains the queue while the link runs and drops
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            next_event(&mut h.events).await,
            LinkEvent::Subscribed { recalibrate: true }
        );
        assert_eq!(frame_bytes(&next_event(&mut h.events).await), vec![1]);
        assert_eq!(next_event(&mut h.events).await, LinkEvent::Lost);
        assert_eq!(h.counters.disconnects.load(Ordering::SeqCst), 1);

        h.shutdown.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_resets_reconnect_delay() {
        let mut config = config();
        config.backoff_min = Duration::from_millis(100);
        config.backoff_max = Duration::from_secs(10);

        // Two failed scans, a link that drops at once, then failures again
        let h = start_with(
            config,
            16,
            vec![false, false, true, false],
            vec![Some(vec![Step::Drop])],
            vec![],
        );
        tokio::time::sleep(Duration::from_secs(1)).await;

        let scans = h.counters.scans.lock().unwrap().clone();
        assert!(scans.len() >= 5, "only {} scans", scans.len());
        let gaps: Vec<u128> = scans
            .windows(2)
            .take(4)
            .map(|w| (w[1] - w[0]).as_millis())
            .collect();
        let expected = [100, 200, 100, 200];
        for (gap, want) in gaps.iter().zip(expected) {
            assert!(gap.abs_diff(want) <= 2, "gaps {:?}, expected {:?}", gaps, expected);
        }

        h.shutdown.cancel();
        h.handle.await.unwrap();
    }
}
