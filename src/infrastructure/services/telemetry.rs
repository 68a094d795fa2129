use core::sync::atomic::{AtomicBool, Ordering};

use bindicator_core::{BackgroundActivity, PauseGate, pause::WorkGuard};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::{Duration, with_timeout};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Control side of the telemetry beacon task.
pub struct TelemetryService {
    gate: PauseGate,
    active: AtomicBool,
    flush_request: Signal<CriticalSectionRawMutex, ()>,
    flushed: Signal<CriticalSectionRawMutex, ()>,
}

impl TelemetryService {
    pub const fn new() -> Self {
        Self {
            gate: PauseGate::new(),
            active: AtomicBool::new(false),
            flush_request: Signal::new(),
            flushed: Signal::new(),
        }
    }

    /// Called by the beacon task once it has a socket; flushes are no-ops
    /// before that.
    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub(crate) fn begin(&self) -> Option<WorkGuard<'_>> {
        self.gate.begin()
    }

    pub(crate) async fn flush_requested(&self) {
        self.flush_request.wait().await;
    }

    pub(crate) fn mark_flushed(&self) {
        self.flushed.signal(());
    }
}

impl Default for TelemetryService {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundActivity for TelemetryService {
    async fn pause(&self) {
        self.gate.pause().await;
        log::debug!("telemetry: paused");
    }

    fn resume(&self) {
        self.gate.resume();
        log::debug!("telemetry: resumed");
    }

    async fn flush(&self) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        self.flushed.reset();
        self.flush_request.signal(());
        if with_timeout(FLUSH_TIMEOUT, self.flushed.wait()).await.is_err() {
            log::warn!("telemetry: flush timed out");
        }
    }
}
