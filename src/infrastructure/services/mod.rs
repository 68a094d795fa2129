//! Firmware-wide shared state.
//!
//! Tasks talk to each other only through these statics: the console opens
//! the OTA window, the duty cycle reports into the health supervisor and the
//! OTA server pauses the background workers.

mod telemetry;

use bindicator_core::{HealthSupervisor, PauseGate, SharedAccessWindow};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Instant;

use crate::infrastructure::config;

pub use telemetry::TelemetryService;

pub static OTA_WINDOW: SharedAccessWindow<CriticalSectionRawMutex> =
    SharedAccessWindow::new(config::OTA.window);

pub static HEALTH: HealthSupervisor<CriticalSectionRawMutex> =
    HealthSupervisor::new(config::HEALTH, Instant::from_ticks(0));

/// Gate around each duty cycle probe.
pub static DUTY_CYCLE: PauseGate = PauseGate::new();

pub static TELEMETRY: TelemetryService = TelemetryService::new();

/// Everything the OTA server quiesces while it owns the flash.
pub type Background = (&'static PauseGate, &'static TelemetryService);

pub fn background() -> Background {
    (&DUTY_CYCLE, &TELEMETRY)
}
