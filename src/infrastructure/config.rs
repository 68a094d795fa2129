#![allow(clippy::unreadable_literal)]

use bindicator_core::{
    HealthPolicy, OtaServerConfig, PartitionTable, access::DEFAULT_WINDOW, console::CONSOLE_PORT,
    health::WATCHDOG_TIMEOUT, protocol::OTA_PORT,
};
use embassy_time::Duration;

pub struct WifiConfig {
    pub ssid: &'static str,
    pub password: &'static str,
    pub connect_timeout: Duration,
}

pub struct DeviceConfig {
    pub hostname: &'static str,
}

pub struct OtaConfig {
    pub port: u16,
    pub window: Duration,
}

pub struct ConsoleConfig {
    pub port: u16,
    pub password: &'static str,
    pub prompt_timeout: Duration,
    pub idle_timeout: Duration,
}

pub struct WatchdogConfig {
    pub timeout: Duration,
    pub feed_period: Duration,
    pub fatal_grace: Duration,
}

pub struct DutyCycleConfig {
    pub host: &'static str,
    pub port: u16,
    pub interval: Duration,
    pub probe_timeout: Duration,
}

pub struct TelemetryConfig {
    /// Beacons are disabled when no collector is configured.
    pub collector: Option<&'static str>,
    pub port: u16,
    pub interval: Duration,
}

pub struct FirmwareConfig {
    pub version: &'static str,
}

pub const WIFI: WifiConfig = WifiConfig {
    ssid: env!("WIFI_SSID"),
    password: env!("WIFI_PASSWORD"),
    connect_timeout: Duration::from_secs(30),
};

pub const DEVICE: DeviceConfig = DeviceConfig {
    hostname: match option_env!("DEVICE_HOSTNAME") {
        Some(hostname) => hostname,
        None => "bindicator",
    },
};

pub const OTA: OtaConfig = OtaConfig {
    port: OTA_PORT,
    window: DEFAULT_WINDOW,
};

pub const OTA_SERVER: OtaServerConfig = OtaServerConfig::DEFAULT;

pub const CONSOLE: ConsoleConfig = ConsoleConfig {
    port: CONSOLE_PORT,
    password: env!("CONSOLE_PASSWORD"),
    prompt_timeout: Duration::from_secs(10),
    idle_timeout: Duration::from_secs(5 * 60),
};

pub const WATCHDOG: WatchdogConfig = WatchdogConfig {
    timeout: WATCHDOG_TIMEOUT,
    feed_period: Duration::from_secs(2),
    fatal_grace: bindicator_core::health::FATAL_GRACE,
};

pub const HEALTH: HealthPolicy = HealthPolicy::DEFAULT;

pub const DUTY_CYCLE: DutyCycleConfig = DutyCycleConfig {
    host: env!("BROKER_HOST"),
    port: 1883,
    interval: Duration::from_secs(15 * 60),
    probe_timeout: Duration::from_secs(10),
};

pub const TELEMETRY: TelemetryConfig = TelemetryConfig {
    collector: option_env!("TELEMETRY_HOST"),
    port: 9125,
    interval: Duration::from_secs(60),
};

/// Must agree with `partitions.csv`; checked against the flashed table at boot.
pub const PARTITIONS: PartitionTable =
    match PartitionTable::new(0x10000, 0x200000, 0x1F0000, 0x3F400000) {
        Ok(table) => table,
        Err(_) => panic!("invalid partition geometry"),
    };

pub const FIRMWARE: FirmwareConfig = FirmwareConfig {
    version: env!("BUILD_VERSION"),
};
