mod boot;
mod flash;
pub(crate) mod network;
mod watchdog;
mod wifi_sta;

pub use boot::{EspBootController, LayoutCheckError, check_partition_layout};
pub use flash::{EspFlashController, init_flash_storage};
pub use network::wait_for_connection;
pub use watchdog::EspWatchdog;
pub use wifi_sta::{WifiStartError, start_wifi_sta};
