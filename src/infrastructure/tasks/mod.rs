mod console;
mod duty_cycle;
mod ota;
mod telemetry;
mod watchdog;

pub use console::console_task;
pub use duty_cycle::duty_cycle_task;
pub use ota::ota_server_task;
pub use telemetry::telemetry_task;
pub use watchdog::watchdog_task;
