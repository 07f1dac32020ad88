//! Virtual Pointer Module
//!
//! OS-level relative pointing device plus the emitter that feeds it.
//!
//! ```text
//! motion tick ──Vec<OutputEvent>──> PointerOutput ──spawn_blocking──> VirtualPointer
//!                                        │                                 │
//!                                        └── re-open on backoff <── error ─┘
//! ```
//!
//! Emission never blocks the async runtime: each batch runs on the blocking
//! pool under a timeout, and a batch that finds the device busy is dropped.

#[cfg(target_os = "linux")]
mod uinput;
#[cfg(windows)]
mod send_input;

use crate::domain::models::{OutputEvent, PointerButton};
use crate::domain::settings::{OutputBackendKind, OutputSettings};
use crate::error::BridgeError;
use crate::infrastructure::backoff::Backoff;
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const RELEASE_TIMEOUT: Duration = Duration::from_secs(1);

/// A relative pointing device the host OS treats as a mouse
pub trait VirtualPointer: Send {
    fn move_by(&mut self, dx: i32, dy: i32) -> Result<(), BridgeError>;
    fn click(&mut self, button: PointerButton, pressed: bool) -> Result<(), BridgeError>;
}

/// Creates [`VirtualPointer`]s; called once at startup and again on re-open
pub trait PointerBackend: Send + Sync {
    fn open(&self) -> Result<Box<dyn VirtualPointer>, BridgeError>;
}

/// Pick the backend named in the output settings
pub fn backend_for(settings: &OutputSettings) -> Arc<dyn PointerBackend> {
    match settings.backend {
        OutputBackendKind::Log => Arc::new(LogBackend),
        OutputBackendKind::Native => native_backend(settings),
    }
}

#[cfg(target_os = "linux")]
fn native_backend(settings: &OutputSettings) -> Arc<dyn PointerBackend> {
    Arc::new(uinput::UinputBackend::new(&settings.device_name))
}

#[cfg(windows)]
fn native_backend(_settings: &OutputSettings) -> Arc<dyn PointerBackend> {
    Arc::new(send_input::SendInputBackend)
}

#[cfg(not(any(target_os = "linux", windows)))]
fn native_backend(_settings: &OutputSettings) -> Arc<dyn PointerBackend> {
    Arc::new(UnsupportedBackend)
}

#[cfg(not(any(target_os = "linux", windows)))]
struct UnsupportedBackend;

#[cfg(not(any(target_os = "linux", windows)))]
impl PointerBackend for UnsupportedBackend {
    fn open(&self) -> Result<Box<dyn VirtualPointer>, BridgeError> {
        Err(BridgeError::VirtualDeviceUnavailable(
            "no native pointer backend on this platform, use the log backend".to_string(),
        ))
    }
}

/// Dry-run backend: pointer activity goes to the log only
pub struct LogBackend;

impl PointerBackend for LogBackend {
    fn open(&self) -> Result<Box<dyn VirtualPointer>, BridgeError> {
        info!("Using log-only pointer output (dry run)");
        Ok(Box::new(LogPointer))
    }
}

struct LogPointer;

impl VirtualPointer for LogPointer {
    fn move_by(&mut self, dx: i32, dy: i32) -> Result<(), BridgeError> {
        debug!(dx, dy, "pointer move");
        Ok(())
    }

    fn click(&mut self, button: PointerButton, pressed: bool) -> Result<(), BridgeError> {
        info!(%button, pressed, "pointer button");
        Ok(())
    }
}

type SharedPointer = Arc<Mutex<Option<Box<dyn VirtualPointer>>>>;

enum EmitFailure {
    Busy,
    Device(BridgeError),
}

/// Owns the virtual pointing device for the lifetime of the bridge
pub struct PointerOutput {
    backend: Arc<dyn PointerBackend>,
    device: SharedPointer,
    emit_timeout: Duration,
    reopen_backoff: Backoff,
    reopen_at: Option<Instant>,
    released: bool,
    dropped_batches: u64,
    late_batches: u64,
}

impl PointerOutput {
    /// Open the device. Failure here is fatal to startup.
    pub fn open(
        backend: Arc<dyn PointerBackend>,
        emit_timeout: Duration,
        reopen_backoff: Backoff,
    ) -> Result<Self, BridgeError> {
        let pointer = backend.open()?;
        Ok(Self {
            backend,
            device: Arc::new(Mutex::new(Some(pointer))),
            emit_timeout,
            reopen_backoff,
            reopen_at: None,
            released: false,
            dropped_batches: 0,
            late_batches: 0,
        })
    }

    /// Write one tick's worth of events, in order.
    ///
    /// Never fails: a busy or broken device costs this batch only, and a
    /// slow one finishes it in the background without holding up the tick.
    pub async fn emit(&mut self, events: Vec<OutputEvent>) {
        if self.released || events.is_empty() {
            return;
        }
        let count = events.len();

        if !self.try_reopen() {
            self.drop_batch(count, "device unavailable");
            return;
        }

        let device = Arc::clone(&self.device);
        let task = tokio::task::spawn_blocking(move || write_batch(&device, &events));

        match tokio::time::timeout(self.emit_timeout, task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(EmitFailure::Busy))) => self.drop_batch(count, "device busy"),
            Ok(Ok(Err(EmitFailure::Device(e)))) => {
                warn!("Virtual pointer write failed: {}", e);
                self.drop_batch(count, "device error");
                self.schedule_reopen();
            }
            Ok(Err(join_err)) => {
                warn!("Emission task failed: {}", join_err);
                self.drop_batch(count, "emission task failed");
            }
            Err(_) => {
                self.late_batches += 1;
                warn!(
                    events = count,
                    timeout = ?self.emit_timeout,
                    "Emission timed out, batch completing late"
                );
            }
        }
    }

    /// Destroy the device. Safe to call more than once.
    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let device = Arc::clone(&self.device);
        let task = tokio::task::spawn_blocking(move || {
            device
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .is_some()
        });

        match tokio::time::timeout(RELEASE_TIMEOUT, task).await {
            Ok(Ok(true)) => info!("Released virtual pointing device"),
            Ok(Ok(false)) => debug!("Virtual pointing device was already gone"),
            Ok(Err(e)) => warn!("Releasing virtual pointing device failed: {}", e),
            Err(_) => warn!("Timed out releasing virtual pointing device"),
        }
        if self.dropped_batches > 0 || self.late_batches > 0 {
            info!(
                dropped = self.dropped_batches,
                late = self.late_batches,
                "Output batch totals"
            );
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn dropped_batches(&self) -> u64 {
        self.dropped_batches
    }

    /// Batches that overran the emit timeout and finished in the background
    pub fn late_batches(&self) -> u64 {
        self.late_batches
    }

    /// True when the device is usable for this batch
    fn try_reopen(&mut self) -> bool {
        let Some(at) = self.reopen_at else {
            return true;
        };
        if Instant::now() < at {
            return false;
        }

        let pointer = match self.backend.open() {
            Ok(pointer) => pointer,
            Err(e) => {
                warn!("Re-opening virtual pointing device failed: {}", e);
                self.schedule_reopen();
                return false;
            }
        };

        if !install(&self.device, pointer) {
            debug!("Device lock held by a late write, retrying re-open later");
            self.schedule_reopen();
            return false;
        }

        info!("Virtual pointing device re-opened");
        self.reopen_at = None;
        self.reopen_backoff.reset();
        true
    }

    fn schedule_reopen(&mut self) {
        let delay = self.reopen_backoff.next_delay();
        debug!("Next device re-open attempt in {:?}", delay);
        self.reopen_at = Some(Instant::now() + delay);
    }

    fn drop_batch(&mut self, count: usize, reason: &str) {
        self.dropped_batches += 1;
        warn!(events = count, reason, "Dropped output batch");
    }
}

/// Put a freshly opened pointer in place; false when a write still holds the lock
fn install(
    device: &Mutex<Option<Box<dyn VirtualPointer>>>,
    pointer: Box<dyn VirtualPointer>,
) -> bool {
    let mut guard = match device.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        Err(TryLockError::WouldBlock) => return false,
    };
    *guard = Some(pointer);
    true
}

fn write_batch(
    device: &Mutex<Option<Box<dyn VirtualPointer>>>,
    events: &[OutputEvent],
) -> Result<(), EmitFailure> {
    let mut guard = match device.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::WouldBlock) => return Err(EmitFailure::Busy),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
    };

    let result = match guard.as_mut() {
        Some(pointer) => events
            .iter()
            .try_for_each(|event| write_event(pointer.as_mut(), event)),
        None => Err(BridgeError::VirtualDeviceUnavailable(
            "device is closed".to_string(),
        )),
    };

    result.map_err(|e| {
        // A broken device is closed and re-opened later
        *guard = None;
        EmitFailure::Device(e)
    })
}

fn write_event(pointer: &mut dyn VirtualPointer, event: &OutputEvent) -> Result<(), BridgeError> {
    match *event {
        OutputEvent::Move(motion) => pointer.move_by(motion.dx, motion.dy),
        OutputEvent::Click(click) => pointer.click(click.button, click.pressed),
    }
}
