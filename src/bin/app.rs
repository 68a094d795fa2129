#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_time::{Duration, with_timeout};

use bindicator::infrastructure::{
    config,
    drivers::{
        EspBootController, EspWatchdog, check_partition_layout, init_flash_storage,
        start_wifi_sta, wait_for_connection,
    },
    services::HEALTH,
    tasks::{console_task, duty_cycle_task, ota_server_task, telemetry_task, watchdog_task},
};
use bindicator_core::{BootOracle, boot::confirm_boot};
use esp_alloc as _;
use esp_backtrace as _;
use esp_hal::{clock::CpuClock, timer::timg::TimerGroup};

esp_bootloader_esp_idf::esp_app_desc!();

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    esp_println::logger::init_logger_from_env();

    // Initialize hardware
    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    // Allocate heap memory (64 + 32 KB)
    esp_alloc::heap_allocator!(
        #[unsafe(link_section = ".dram2_uninit")] size: 64 * 1024
    );
    esp_alloc::heap_allocator!(size: 32 * 1024);

    // Start rtos
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    log::info!("bindicator {} starting", config::FIRMWARE.version);

    // Mark the running image valid before the network comes up
    init_flash_storage(peripherals.FLASH);
    let mut boot = EspBootController;
    if confirm_boot(&mut boot).is_err() {
        log::warn!("boot: continuing with unconfirmed image");
    }
    let oracle = BootOracle::from_controller(&mut boot);

    let mut watchdog = EspWatchdog::start(peripherals.LPWR, config::WATCHDOG.timeout);
    spawner.spawn(watchdog_task(watchdog)).ok();

    if let Err(e) = check_partition_layout(&config::PARTITIONS) {
        log::error!("boot: partition layout mismatch: {:?}", e);
        HEALTH
            .fatal_error(&mut watchdog, "partition layout", config::WATCHDOG.fatal_grace)
            .await;
    }

    let stack = match start_wifi_sta(
        spawner,
        peripherals.WIFI,
        config::WIFI.ssid,
        config::WIFI.password,
        config::DEVICE.hostname,
    ) {
        Ok(stack) => stack,
        Err(e) => {
            log::error!("network: wifi start failed: {:?}", e);
            HEALTH
                .fatal_error(&mut watchdog, "wifi start", config::WATCHDOG.fatal_grace)
                .await
        }
    };

    match with_timeout(config::WIFI.connect_timeout, wait_for_connection(stack)).await {
        Ok(ip) => log::info!("network: up address={}", ip.address),
        Err(_) => {
            HEALTH
                .fatal_error(&mut watchdog, "network timeout", config::WATCHDOG.fatal_grace)
                .await
        }
    }

    spawner.spawn(ota_server_task(stack, oracle)).ok();
    spawner.spawn(console_task(stack, oracle)).ok();
    spawner.spawn(duty_cycle_task(stack)).ok();
    spawner.spawn(telemetry_task(stack, oracle.current())).ok();

    loop {
        embassy_time::Timer::after(Duration::from_secs(5)).await;
    }
}
