//! Bridge runtime
//!
//! Wires the connection supervisor, the frame path and the motion tick
//! together:
//!
//! ```text
//! supervisor ──LinkEvent (bounded)──▶ frame task ──watch<PointerDelta>──▶ tick task ──▶ PointerOutput
//!                                         └────────ClickEvent (unbounded)────┘
//! ```

use crate::domain::debounce::ButtonDebouncer;
use crate::domain::fusion::AxisFusion;
use crate::domain::models::{
    ClickEvent, ConnectionState, LinkEvent, OutputEvent, PointerDelta, RawFrame,
};
use crate::domain::motion::MotionIntegrator;
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::protocol::{decode_frame, SequenceTracker};
use crate::infrastructure::bluetooth::supervisor::{ConnectionSupervisor, SupervisorConfig};
use crate::infrastructure::bluetooth::BleTransport;
use crate::infrastructure::virtual_pointer::PointerOutput;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Decoder, sequence tracking, axis fusion and debouncing for one stream
/// of link events
pub struct FrameProcessor {
    tracker: SequenceTracker,
    fusion: AxisFusion,
    debouncer: ButtonDebouncer,
    malformed_frames: u64,
}

impl FrameProcessor {
    pub fn new(settings: &Settings) -> Self {
        Self {
            tracker: SequenceTracker::new(),
            fusion: AxisFusion::new(settings.motion.clone()),
            debouncer: ButtonDebouncer::new(
                &settings.button_bindings,
                settings.debounce_interval(),
            ),
            malformed_frames: 0,
        }
    }

    /// Apply one link event; returns the clicks it produced
    pub fn handle(&mut self, event: LinkEvent) -> Vec<ClickEvent> {
        match event {
            LinkEvent::Subscribed { recalibrate: false } => {
                self.tracker.reset();
                Vec::new()
            }
            LinkEvent::Subscribed { recalibrate: true } => {
                self.tracker.reset();
                self.fusion.halt();
                self.fusion.recalibrate();
                self.debouncer.release_all()
            }
            LinkEvent::Frame(frame) => self.handle_frame(&frame),
            LinkEvent::Stale => {
                self.fusion.pause();
                self.debouncer.release_all()
            }
            LinkEvent::Lost => {
                self.tracker.reset();
                self.fusion.halt();
                self.debouncer.release_all()
            }
        }
    }

    fn handle_frame(&mut self, frame: &RawFrame) -> Vec<ClickEvent> {
        let sample = match decode_frame(frame) {
            Ok(sample) => sample,
            Err(e) => {
                self.malformed_frames += 1;
                warn!(total = self.malformed_frames, "Dropping frame: {}", e);
                return Vec::new();
            }
        };

        self.tracker.observe(sample.counter);
        self.fusion.update(&sample);
        self.debouncer.observe(sample.button_mask, sample.received_at)
    }

    pub fn delta(&self) -> PointerDelta {
        self.fusion.delta()
    }

    pub fn malformed_frames(&self) -> u64 {
        self.malformed_frames
    }

    pub fn dropped_frames(&self) -> u64 {
        self.tracker.dropped_total()
    }
}

/// The running bridge. Dropping it without [`PointerBridge::shutdown`]
/// leaves the tasks running until the runtime stops.
pub struct PointerBridge {
    shutdown: CancellationToken,
    state: watch::Receiver<ConnectionState>,
    supervisor: Option<JoinHandle<()>>,
    frames: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<PointerOutput>>,
}

impl PointerBridge {
    /// Spawn the supervisor, frame and tick tasks. Must be called from
    /// within a tokio runtime.
    pub fn start<T>(settings: &Settings, transport: T, output: PointerOutput) -> Self
    where
        T: BleTransport + 'static,
    {
        let shutdown = CancellationToken::new();
        let (link_tx, link_rx) = mpsc::channel(settings.link.frame_queue_capacity);
        let (delta_tx, delta_rx) = watch::channel(PointerDelta::ZERO);
        let (click_tx, click_rx) = mpsc::unbounded_channel();

        let supervisor = ConnectionSupervisor::new(
            transport,
            SupervisorConfig::new(&settings.device_name_prefix, &settings.link),
            link_tx,
            shutdown.clone(),
        );
        let state = supervisor.subscribe_state();

        let supervisor = tokio::spawn(supervisor.run());
        let frames = tokio::spawn(run_frames(
            FrameProcessor::new(settings),
            link_rx,
            delta_tx,
            click_tx,
            shutdown.clone(),
        ));
        let ticker = tokio::spawn(run_ticks(
            output,
            delta_rx,
            click_rx,
            settings.motion.tick_interval(),
            shutdown.clone(),
        ));

        info!(
            "Bridge started, looking for devices named {:?}*",
            settings.device_name_prefix
        );

        Self {
            shutdown,
            state,
            supervisor: Some(supervisor),
            frames: Some(frames),
            ticker: Some(ticker),
        }
    }

    /// Latest supervisor state, updated on every transition
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stop everything and release the virtual pointing device.
    ///
    /// The tick task is awaited first so nothing is emitted afterwards; the
    /// device is released last. Calling it again does nothing.
    pub async fn shutdown(&mut self) {
        let Some(ticker) = self.ticker.take() else {
            return;
        };
        info!("Shutting down bridge");
        self.shutdown.cancel();

        let output = match ticker.await {
            Ok(output) => Some(output),
            Err(e) => {
                warn!("Tick task failed: {}", e);
                None
            }
        };

        if let Some(supervisor) = self.supervisor.take() {
            if let Err(e) = supervisor.await {
                warn!("Supervisor task failed: {}", e);
            }
        }
        if let Some(frames) = self.frames.take() {
            if let Err(e) = frames.await {
                warn!("Frame task failed: {}", e);
            }
        }

        if let Some(mut output) = output {
            output.release().await;
        }
        info!("Bridge stopped");
    }
}

async fn run_frames(
    mut processor: FrameProcessor,
    mut events: mpsc::Receiver<LinkEvent>,
    delta_tx: watch::Sender<PointerDelta>,
    clicks: mpsc::UnboundedSender<ClickEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let produced = processor.handle(event);
        let delta = processor.delta();
        delta_tx.send_if_modified(|current| {
            let changed = *current != delta;
            *current = delta;
            changed
        });

        for click in produced {
            info!(button = %click.button, pressed = click.pressed, "Click");
            if clicks.send(click).is_err() {
                debug!("Tick task gone, frame task stopping");
                return;
            }
        }
    }

    debug!(
        malformed = processor.malformed_frames(),
        dropped = processor.dropped_frames(),
        "Frame task stopped"
    );
}

async fn run_ticks(
    mut output: PointerOutput,
    mut delta: watch::Receiver<PointerDelta>,
    mut clicks: mpsc::UnboundedReceiver<ClickEvent>,
    tick_interval: Duration,
    shutdown: CancellationToken,
) -> PointerOutput {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut integrator = MotionIntegrator::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let snapshot = *delta.borrow_and_update();
        let mut batch = Vec::new();
        if let Some(motion) = integrator.step(snapshot) {
            batch.push(OutputEvent::Move(motion));
        }
        while let Ok(click) = clicks.try_recv() {
            batch.push(OutputEvent::Click(click));
        }
        output.emit(batch).await;
    }

    debug!("Tick task stopped");
    output
}
