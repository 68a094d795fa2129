//! Periodic reachability probe standing in for the schedule fetch.
//!
//! Each wake opens a TCP connection to the configured broker and reports
//! the outcome to the health supervisor.

use embassy_net::{Stack, tcp::TcpSocket};
use embassy_time::{Timer, with_timeout};

use crate::infrastructure::{
    config,
    drivers::network::resolve_host,
    services::{DUTY_CYCLE, HEALTH},
};

#[derive(Debug)]
enum ProbeError {
    Resolve,
    Connect(embassy_net::tcp::ConnectError),
    Timeout,
}

#[embassy_executor::task]
pub async fn duty_cycle_task(stack: Stack<'static>) {
    log::info!(
        "duty: probing {}:{} every {}s",
        config::DUTY_CYCLE.host,
        config::DUTY_CYCLE.port,
        config::DUTY_CYCLE.interval.as_secs()
    );
    loop {
        DUTY_CYCLE.wait_resumed().await;
        if let Some(_guard) = DUTY_CYCLE.begin() {
            match probe(stack).await {
                Ok(()) => {
                    log::info!("duty: probe ok");
                    HEALTH.report_success();
                }
                Err(e) => {
                    log::warn!("duty: probe failed err={:?}", e);
                    HEALTH.report_failure();
                }
            }
        }
        Timer::after(config::DUTY_CYCLE.interval).await;
    }
}

async fn probe(stack: Stack<'static>) -> Result<(), ProbeError> {
    let addr = resolve_host(stack, config::DUTY_CYCLE.host)
        .await
        .ok_or(ProbeError::Resolve)?;

    let mut rx_buffer = [0u8; 128];
    let mut tx_buffer = [0u8; 128];
    let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
    let connected = with_timeout(
        config::DUTY_CYCLE.probe_timeout,
        socket.connect((addr, config::DUTY_CYCLE.port)),
    )
    .await;
    socket.abort();
    connected
        .map_err(|_| ProbeError::Timeout)?
        .map_err(ProbeError::Connect)
}
