use core::str::FromStr;

use embassy_executor::Spawner;
use embassy_net::{DhcpConfig, Runner, Stack, StackResources};
use embassy_time::{Duration, Timer};
use esp_hal::{peripherals::WIFI, rng::Rng};
use esp_radio::{
    InitializationError,
    wifi::{
        AuthMethod, ClientConfig, Config, ModeConfig, WifiController, WifiDevice, WifiError,
        WifiEvent, WifiStaState,
    },
};
use heapless::String;

use crate::mk_static;

/// Maximum length of the hostname
const MAX_HOSTNAME_LEN: usize = 32;

/// OTA listener, console, duty cycle probe, telemetry and DNS.
const MAX_NETWORK_CONNECTIONS: usize = 6;

/// Type alias for the hostname
pub type Hostname = String<MAX_HOSTNAME_LEN>;

#[derive(Debug)]
pub enum WifiStartError {
    Radio(InitializationError),
    Wifi(WifiError),
    Hostname,
}

/// Start the Wi-Fi STA (Station) mode
///
/// Spawns the connection and network runner tasks and returns the stack
/// right away; use [`super::network::wait_for_connection`] to wait for an
/// address.
pub fn start_wifi_sta(
    spawner: Spawner,
    wifi_device: WIFI<'static>,
    ssid: &'static str,
    password: &'static str,
    hostname: &str,
) -> Result<Stack<'static>, WifiStartError> {
    let esp_radio_ctrl = &*mk_static!(
        esp_radio::Controller<'static>,
        esp_radio::init().map_err(WifiStartError::Radio)?
    );
    let (controller, interfaces) =
        esp_radio::wifi::new(esp_radio_ctrl, wifi_device, Config::default())
            .map_err(WifiStartError::Wifi)?;
    let mut dhcp_config = DhcpConfig::default();
    dhcp_config.hostname =
        Some(Hostname::from_str(hostname).map_err(|()| WifiStartError::Hostname)?);

    let net_config = embassy_net::Config::dhcpv4(dhcp_config);

    let network_resources = mk_static!(
        StackResources<MAX_NETWORK_CONNECTIONS>,
        StackResources::<MAX_NETWORK_CONNECTIONS>::new()
    );
    let (stack, runner) =
        embassy_net::new(interfaces.sta, net_config, network_resources, get_seed());

    spawner
        .spawn(wifi_connection_task(controller, ssid, password))
        .ok();
    spawner.spawn(network_runner_task(runner)).ok();

    Ok(stack)
}

fn get_seed() -> u64 {
    let rng = Rng::new();
    u64::from(rng.random()) << 32 | u64::from(rng.random())
}

/// Background task for connecting to the `WiFi` network and reconnecting if needed
#[embassy_executor::task]
async fn wifi_connection_task(
    mut controller: WifiController<'static>,
    ssid: &'static str,
    password: &'static str,
) {
    loop {
        // Wait until we're no longer connected
        if esp_radio::wifi::sta_state() == WifiStaState::Connected {
            controller.wait_for_event(WifiEvent::StaDisconnected).await;
            log::warn!("network: disconnected");
            Timer::after(Duration::from_millis(2000)).await;
        }
        if !matches!(controller.is_started(), Ok(true)) {
            let client_config = if password.is_empty() {
                ClientConfig::default()
                    .with_ssid(ssid.into())
                    .with_auth_method(AuthMethod::None)
            } else {
                ClientConfig::default()
                    .with_ssid(ssid.into())
                    .with_password(password.into())
            };
            let mode_config = ModeConfig::Client(client_config);
            let started = match controller.set_config(&mode_config) {
                Ok(()) => controller.start_async().await,
                Err(e) => Err(e),
            };
            if let Err(e) = started {
                log::error!("network: error starting wifi: {:?}", e);
                Timer::after(Duration::from_millis(5000)).await;
                continue;
            }
        }

        log::info!("network: connecting ssid={}", ssid);
        if let Err(e) = controller.connect_async().await {
            log::warn!("network: error connecting: {:?}", e);
            Timer::after(Duration::from_millis(5000)).await;
        }
    }
}

/// Background task for running the network stack
#[embassy_executor::task]
async fn network_runner_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await;
}
