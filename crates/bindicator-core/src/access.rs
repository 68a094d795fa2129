//! Time-boxed enable switch for the OTA listener.
//!
//! Expiry is evaluated lazily: an expired window keeps its fields until the
//! next explicit enable or disable, it just reads as disabled.

use core::cell::Cell;

use embassy_sync::blocking_mutex::{Mutex, raw::RawMutex};
use embassy_time::{Duration, Instant};

/// Window length used when `enable` is called with a zero timeout.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessWindow {
    enabled: bool,
    enabled_at: Instant,
    timeout: Duration,
    default_timeout: Duration,
}

impl Default for AccessWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl AccessWindow {
    pub const fn new(default_timeout: Duration) -> Self {
        Self {
            enabled: false,
            enabled_at: Instant::from_ticks(0),
            timeout: Duration::from_ticks(0),
            default_timeout,
        }
    }

    /// Open the window at `now`. Returns the effective timeout.
    pub fn enable_at(&mut self, timeout: Duration, now: Instant) -> Duration {
        let timeout = if timeout.as_ticks() == 0 {
            self.default_timeout
        } else {
            timeout
        };
        self.enabled = true;
        self.enabled_at = now;
        self.timeout = timeout;
        timeout
    }

    pub fn enable(&mut self, timeout: Duration) -> Duration {
        self.enable_at(timeout, Instant::now())
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled_at(&self, now: Instant) -> bool {
        self.enabled && now.saturating_duration_since(self.enabled_at) < self.timeout
    }

    pub fn is_enabled(&self) -> bool {
        self.is_enabled_at(Instant::now())
    }

    /// Time left before the window closes, zero when closed.
    pub fn time_remaining_at(&self, now: Instant) -> Duration {
        if !self.is_enabled_at(now) {
            return Duration::from_ticks(0);
        }
        self.timeout - now.saturating_duration_since(self.enabled_at)
    }

    pub fn time_remaining(&self) -> Duration {
        self.time_remaining_at(Instant::now())
    }
}

/// [`AccessWindow`] shared between the console and the OTA listener.
pub struct SharedAccessWindow<M: RawMutex> {
    inner: Mutex<M, Cell<AccessWindow>>,
}

impl<M: RawMutex> SharedAccessWindow<M> {
    pub const fn new(default_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Cell::new(AccessWindow::new(default_timeout))),
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut AccessWindow) -> R) -> R {
        self.inner.lock(|cell| {
            let mut window = cell.get();
            let result = f(&mut window);
            cell.set(window);
            result
        })
    }

    pub fn enable(&self, timeout: Duration) -> Duration {
        let timeout = self.update(|w| w.enable(timeout));
        log::info!("ota: enabled timeout={}s", timeout.as_secs());
        timeout
    }

    pub fn disable(&self) {
        self.update(AccessWindow::disable);
        log::info!("ota: disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.snapshot().is_enabled()
    }

    pub fn time_remaining(&self) -> Duration {
        self.snapshot().time_remaining()
    }

    pub fn snapshot(&self) -> AccessWindow {
        self.inner.lock(Cell::get)
    }
}
