//! UDP status beacon
//!
//! Sends one line of device status to the configured collector every
//! interval, and once more on request before a reboot.

use core::fmt::Write as _;

use bindicator_core::Partition;
use embassy_futures::select::{Either, select};
use embassy_net::{
    IpAddress, Stack,
    udp::{PacketMetadata, UdpSocket},
};
use embassy_time::{Instant, Timer};

use crate::infrastructure::{
    config,
    drivers::network::resolve_host,
    services::{HEALTH, TELEMETRY},
};

const BUFFER_SIZE: usize = 256;

type Beacon = heapless::String<160>;

#[embassy_executor::task]
pub async fn telemetry_task(stack: Stack<'static>, partition: Partition) {
    let Some(host) = config::TELEMETRY.collector else {
        log::info!("telemetry: no collector configured, beacon disabled");
        return;
    };

    let mut rx_meta = [PacketMetadata::EMPTY; 2];
    let mut rx_buffer = [0u8; BUFFER_SIZE];
    let mut tx_meta = [PacketMetadata::EMPTY; 4];
    let mut tx_buffer = [0u8; BUFFER_SIZE];
    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    if let Err(e) = socket.bind(config::TELEMETRY.port) {
        log::error!("telemetry: bind failed err={:?}", e);
        return;
    }
    TELEMETRY.set_active(true);
    log::info!(
        "telemetry: beacon to {}:{} every {}s",
        host,
        config::TELEMETRY.port,
        config::TELEMETRY.interval.as_secs()
    );

    let mut collector: Option<IpAddress> = None;
    loop {
        let flush = matches!(
            select(
                Timer::after(config::TELEMETRY.interval),
                TELEMETRY.flush_requested()
            )
            .await,
            Either::Second(())
        );

        if let Some(_guard) = TELEMETRY.begin() {
            if collector.is_none() {
                collector = resolve_host(stack, host).await;
            }
            if let Some(addr) = collector {
                let beacon = render_beacon(partition);
                if let Err(e) = socket
                    .send_to(beacon.as_bytes(), (addr, config::TELEMETRY.port))
                    .await
                {
                    log::warn!("telemetry: send failed err={:?}", e);
                    collector = None;
                }
            }
        }

        if flush {
            TELEMETRY.mark_flushed();
        }
    }
}

fn render_beacon(partition: Partition) -> Beacon {
    let health = HEALTH.snapshot();
    let mut beacon = Beacon::new();
    let _ = writeln!(
        beacon,
        "bindicator version={} partition={} uptime={}s healthy={} failures={}",
        config::FIRMWARE.version,
        partition,
        Instant::now().as_secs(),
        health.is_healthy(),
        health.consecutive_failures()
    );
    beacon
}
