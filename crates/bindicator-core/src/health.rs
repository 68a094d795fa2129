//! Health supervisor gating the hardware watchdog.
//!
//! The application reports the outcome of every duty cycle. Too many
//! consecutive failures, or too long without a success, flip the device to
//! unhealthy for the rest of the run. From then on nobody feeds the hardware
//! watchdog and it resets the chip.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::{Mutex, raw::RawMutex};
use embassy_time::{Duration, Instant, Timer};

/// Hardware watchdog timeout.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(8);

/// How long the fatal path waits for the hardware watchdog before resetting
/// in software.
pub const FATAL_GRACE: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub max_consecutive_failures: u32,
    pub max_time_without_success: Duration,
}

impl HealthPolicy {
    pub const DEFAULT: Self = Self {
        max_consecutive_failures: 3,
        max_time_without_success: Duration::from_secs(12 * 60 * 60),
    };
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthState {
    policy: HealthPolicy,
    consecutive_failures: u32,
    last_success: Instant,
    healthy: bool,
}

impl HealthState {
    /// Fresh state; boot counts as the last success.
    pub const fn new(policy: HealthPolicy, boot: Instant) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
            last_success: boot,
            healthy: true,
        }
    }

    pub const fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub const fn policy(&self) -> HealthPolicy {
        self.policy
    }

    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub const fn last_success(&self) -> Instant {
        self.last_success
    }

    pub fn report_success_at(&mut self, now: Instant) {
        self.consecutive_failures = 0;
        self.last_success = now;
    }

    /// Record a failure and re-evaluate. Returns the resulting health.
    pub fn report_failure_at(&mut self, now: Instant) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let stale = now.saturating_duration_since(self.last_success)
            >= self.policy.max_time_without_success;
        if self.healthy
            && (self.consecutive_failures >= self.policy.max_consecutive_failures || stale)
        {
            log::error!(
                "health: unhealthy failures={} since_success={}s",
                self.consecutive_failures,
                now.saturating_duration_since(self.last_success).as_secs()
            );
            self.healthy = false;
        }
        self.healthy
    }

    /// Unconditional one-way switch used by the fatal path.
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }
}

/// Hardware watchdog capability.
pub trait WatchdogTimer {
    fn feed(&mut self);

    /// Reset the chip immediately.
    fn software_reset(&mut self) -> !;
}

/// [`HealthState`] shared between the duty cycle, the OTA server and the
/// watchdog feeder.
pub struct HealthSupervisor<M: RawMutex> {
    state: Mutex<M, RefCell<HealthState>>,
}

impl<M: RawMutex> HealthSupervisor<M> {
    pub const fn new(policy: HealthPolicy, boot: Instant) -> Self {
        Self {
            state: Mutex::new(RefCell::new(HealthState::new(policy, boot))),
        }
    }

    pub fn report_success(&self) {
        self.state
            .lock(|s| s.borrow_mut().report_success_at(Instant::now()));
    }

    pub fn report_failure(&self) -> bool {
        self.state
            .lock(|s| s.borrow_mut().report_failure_at(Instant::now()))
    }

    pub fn is_healthy(&self) -> bool {
        self.state.lock(|s| s.borrow().is_healthy())
    }

    pub fn mark_unhealthy(&self) {
        self.state.lock(|s| s.borrow_mut().mark_unhealthy());
    }

    pub fn snapshot(&self) -> HealthState {
        self.state.lock(|s| *s.borrow())
    }

    /// Feed `watchdog` only while healthy. Returns whether it was fed.
    pub fn feed_if_healthy<W: WatchdogTimer + ?Sized>(&self, watchdog: &mut W) -> bool {
        if self.is_healthy() {
            watchdog.feed();
            true
        } else {
            false
        }
    }

    /// Stop feeding, give the hardware watchdog `grace` to fire, then reset
    /// in software.
    pub async fn fatal_error<W: WatchdogTimer + ?Sized>(
        &self,
        watchdog: &mut W,
        reason: &str,
        grace: Duration,
    ) -> ! {
        log::error!("health: fatal reason={}", reason);
        self.mark_unhealthy();
        Timer::after(grace).await;
        log::error!("health: watchdog did not fire, resetting");
        watchdog.software_reset()
    }
}
