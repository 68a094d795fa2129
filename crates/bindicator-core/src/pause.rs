//! Pausing background network work while an update is being programmed.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_time::{Duration, Timer};

const POLL: Duration = Duration::from_millis(10);

/// Something the OTA server quiesces before writing flash.
#[allow(async_fn_in_trait)]
pub trait BackgroundActivity {
    /// Stop starting new work and wait until in-flight work has drained.
    async fn pause(&self);

    fn resume(&self);

    /// Push out anything buffered. Called once before a reboot.
    async fn flush(&self) {}
}

impl<T: BackgroundActivity + ?Sized> BackgroundActivity for &T {
    async fn pause(&self) {
        T::pause(self).await;
    }

    fn resume(&self) {
        T::resume(self);
    }

    async fn flush(&self) {
        T::flush(self).await;
    }
}

impl BackgroundActivity for () {
    async fn pause(&self) {}

    fn resume(&self) {}
}

impl<A: BackgroundActivity, B: BackgroundActivity> BackgroundActivity for (A, B) {
    async fn pause(&self) {
        self.0.pause().await;
        self.1.pause().await;
    }

    fn resume(&self) {
        self.0.resume();
        self.1.resume();
    }

    async fn flush(&self) {
        self.0.flush().await;
        self.1.flush().await;
    }
}

/// Cooperative pause switch shared by a worker and its controller.
///
/// Workers wrap each unit of network work in [`PauseGate::begin`]; the guard
/// is refused while paused. [`PauseGate::pause`] returns once no guard is
/// alive.
pub struct PauseGate {
    paused: AtomicBool,
    in_flight: AtomicU32,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    pub const fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            in_flight: AtomicU32::new(0),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Enter a unit of work, `None` while paused.
    pub fn begin(&self) -> Option<WorkGuard<'_>> {
        if self.is_paused() {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        // A pause may have landed between the check and the increment.
        if self.is_paused() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(WorkGuard { gate: self })
    }

    /// Wait until the gate is open again.
    pub async fn wait_resumed(&self) {
        while self.is_paused() {
            Timer::after(POLL).await;
        }
    }

    pub async fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        while self.in_flight() > 0 {
            Timer::after(POLL).await;
        }
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }
}

impl BackgroundActivity for PauseGate {
    async fn pause(&self) {
        PauseGate::pause(self).await;
    }

    fn resume(&self) {
        PauseGate::resume(self);
    }
}

pub struct WorkGuard<'a> {
    gate: &'a PauseGate,
}

impl Drop for WorkGuard<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
