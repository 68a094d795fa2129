use core::cell::RefCell;

use bindicator_core::WatchdogTimer;
use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
use embassy_time::Duration;
use esp_hal::{
    peripherals,
    rtc_cntl::{Rtc, RwdtStage, RwdtStageAction},
};

static RTC: Mutex<CriticalSectionRawMutex, RefCell<Option<Rtc<'static>>>> =
    Mutex::new(RefCell::new(None));

/// Handle to the RTC watchdog. Cheap to copy, all copies share the timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct EspWatchdog;

impl EspWatchdog {
    /// Arm the RTC watchdog to reset the whole system after `timeout`
    /// without a feed.
    pub fn start(lpwr: peripherals::LPWR<'static>, timeout: Duration) -> Self {
        let mut rtc = Rtc::new(lpwr);
        rtc.rwdt.set_timeout(
            RwdtStage::Stage0,
            esp_hal::time::Duration::from_millis(timeout.as_millis()),
        );
        rtc.rwdt
            .set_stage_action(RwdtStage::Stage0, RwdtStageAction::ResetSystem);
        rtc.rwdt.enable();
        rtc.rwdt.feed();
        RTC.lock(|cell| cell.replace(Some(rtc)));
        log::info!("watchdog: armed timeout={}s", timeout.as_secs());
        Self
    }
}

impl WatchdogTimer for EspWatchdog {
    fn feed(&mut self) {
        RTC.lock(|cell| {
            if let Some(rtc) = cell.borrow_mut().as_mut() {
                rtc.rwdt.feed();
            }
        });
    }

    fn software_reset(&mut self) -> ! {
        esp_hal::system::software_reset()
    }
}
