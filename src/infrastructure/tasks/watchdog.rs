use embassy_time::Timer;

use crate::infrastructure::{config, drivers::EspWatchdog, services::HEALTH};

/// Feeds the hardware watchdog for as long as the device reports healthy.
///
/// Once unhealthy the feeding stops for good and the watchdog resets the
/// device within its timeout.
#[embassy_executor::task]
pub async fn watchdog_task(mut watchdog: EspWatchdog) {
    let mut starving = false;
    loop {
        let fed = HEALTH.feed_if_healthy(&mut watchdog);
        if !fed && !starving {
            log::error!(
                "watchdog: unhealthy, no longer feeding (reset in {}s)",
                config::WATCHDOG.timeout.as_secs()
            );
        }
        starving = !fed;
        Timer::after(config::WATCHDOG.feed_period).await;
    }
}
