//! OTA listener task
//!
//! Accepts one client at a time on the OTA port while the access window is
//! open and hands the connection to the core [`OtaServer`]. A successful
//! session ends in a reboot, so every return from `handle` is a failure and
//! the listener simply goes around again.

use bindicator_core::{BootOracle, OtaServer};
use embassy_futures::select::{Either, select};
use embassy_net::{Stack, tcp::TcpSocket};
use embassy_time::{Duration, with_timeout};

use crate::infrastructure::{
    config,
    drivers::{EspBootController, EspFlashController},
    services::{OTA_WINDOW, background},
};

/// Chunks are up to 4 KiB; a full chunk plus its header fits the window.
const RX_BUFFER_SIZE: usize = 4096 + 512;
const TX_BUFFER_SIZE: usize = 256;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[embassy_executor::task]
pub async fn ota_server_task(stack: Stack<'static>, oracle: BootOracle) {
    let mut server = OtaServer::new(
        EspFlashController,
        EspBootController,
        oracle,
        config::PARTITIONS,
        &OTA_WINDOW,
        background(),
        config::OTA_SERVER,
    );
    let mut rx_buffer = [0u8; RX_BUFFER_SIZE];
    let mut tx_buffer = [0u8; TX_BUFFER_SIZE];

    log::info!(
        "ota: server ready port={} target={}",
        config::OTA.port,
        server.target()
    );

    loop {
        server.wait_for_window().await;

        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        let accepted = match select(
            socket.accept(config::OTA.port),
            server.wait_for_window_closed(),
        )
        .await
        {
            Either::First(Ok(())) => true,
            Either::First(Err(e)) => {
                log::warn!("ota: accept failed err={:?}", e);
                false
            }
            Either::Second(()) => {
                log::info!("ota: window closed, listener stopped");
                false
            }
        };

        if accepted {
            log::info!("ota: client connected remote={:?}", socket.remote_endpoint());
            // Drop the connection if the peer stops acking our replies.
            socket.set_timeout(Some(config::OTA_SERVER.read_timeout));
            server.handle(&mut socket).await;
            socket.close();
            let _ = with_timeout(CLOSE_TIMEOUT, socket.flush()).await;
        }
        socket.abort();
    }
}
