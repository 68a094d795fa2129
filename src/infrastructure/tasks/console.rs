//! Telnet console task
//!
//! One authenticated session at a time. Parsing, lockout policy and
//! rendering live in [`bindicator_core::console`]; this task owns the
//! socket and the firmware state the commands act on.

use core::fmt::Write as _;

use bindicator_core::{
    BootOracle, WatchdogTimer,
    console::{
        AuthThrottle, Command, HELP, LineBuffer, LineEvent, PROMPT, TELNET_WILL_ECHO,
        TELNET_WONT_ECHO, constant_time_eq, render_ota_enabled, render_ota_status,
        render_status, render_version,
    },
};
use embassy_net::{Stack, tcp::TcpSocket};
use embassy_time::{Duration, Instant, Timer, with_timeout};
use embedded_io_async::Write;

use crate::infrastructure::{
    config,
    drivers::EspWatchdog,
    services::{HEALTH, OTA_WINDOW},
};

const RX_BUFFER_SIZE: usize = 512;
const TX_BUFFER_SIZE: usize = 1024;
const MAX_LINE_LEN: usize = 64;

type Reply = heapless::String<512>;

#[derive(Debug)]
enum ConsoleError {
    Closed,
    Io(embassy_net::tcp::Error),
    Timeout,
}

impl From<embassy_net::tcp::Error> for ConsoleError {
    fn from(e: embassy_net::tcp::Error) -> Self {
        Self::Io(e)
    }
}

/// Outcome of one command.
enum Flow {
    Continue,
    Quit,
    Reboot,
}

#[embassy_executor::task]
pub async fn console_task(stack: Stack<'static>, oracle: BootOracle) {
    let mut rx_buffer = [0u8; RX_BUFFER_SIZE];
    let mut tx_buffer = [0u8; TX_BUFFER_SIZE];
    let mut throttle = AuthThrottle::new();

    log::info!("console: listening port={}", config::CONSOLE.port);
    loop {
        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        socket.set_timeout(Some(config::CONSOLE.idle_timeout));
        if let Err(e) = socket.accept(config::CONSOLE.port).await {
            log::warn!("console: accept failed err={:?}", e);
            continue;
        }
        log::info!("console: connected remote={:?}", socket.remote_endpoint());

        let mut session = Session {
            socket: &mut socket,
            pending: [0; 64],
            pending_len: 0,
            pending_pos: 0,
            after_cr: false,
        };
        match session.run(&mut throttle, &oracle).await {
            Ok(Flow::Reboot) => {
                log::warn!("console: reboot requested");
                Timer::after(Duration::from_millis(100)).await;
                EspWatchdog.software_reset();
            }
            Ok(_) => log::info!("console: session closed"),
            Err(e) => log::info!("console: session ended err={:?}", e),
        }

        socket.close();
        let _ = with_timeout(Duration::from_secs(1), socket.flush()).await;
        socket.abort();
    }
}

struct Session<'s, 'a> {
    socket: &'s mut TcpSocket<'a>,
    pending: [u8; 64],
    pending_len: usize,
    pending_pos: usize,
    after_cr: bool,
}

impl Session<'_, '_> {
    async fn run(
        &mut self,
        throttle: &mut AuthThrottle,
        oracle: &BootOracle,
    ) -> Result<Flow, ConsoleError> {
        if let Some(wait) = throttle.locked_for_at(Instant::now()) {
            log::warn!("console: locked out, {}s left", wait.as_secs());
            let mut reply = Reply::new();
            let _ = write!(
                reply,
                "Too many failed attempts. Try again in {}s\r\n",
                wait.as_secs().max(1)
            );
            self.send(&reply).await?;
            return Ok(Flow::Quit);
        }

        if !self.authenticate(throttle).await? {
            return Ok(Flow::Quit);
        }

        let mut reply = Reply::new();
        let _ = write!(
            reply,
            "bindicator {}\r\nType 'help' for commands\r\n",
            config::FIRMWARE.version
        );
        self.send(&reply).await?;

        let mut line = LineBuffer::<MAX_LINE_LEN>::new();
        loop {
            self.send(PROMPT).await?;
            if !self.read_line(&mut line).await? {
                self.send("Line too long\r\n").await?;
                continue;
            }
            let mut reply = Reply::new();
            let flow = execute(Command::parse(line.as_str()), oracle, &mut reply);
            self.send(&reply).await?;
            if !matches!(flow, Flow::Continue) {
                self.socket.flush().await?;
                return Ok(flow);
            }
        }
    }

    /// Prompt for the password with local echo off.
    async fn authenticate(&mut self, throttle: &mut AuthThrottle) -> Result<bool, ConsoleError> {
        self.socket.write_all(&TELNET_WILL_ECHO).await?;
        self.send("Password: ").await?;

        let mut line = LineBuffer::<MAX_LINE_LEN>::new();
        let read = with_timeout(config::CONSOLE.prompt_timeout, self.read_line(&mut line)).await;

        self.socket.write_all(&TELNET_WONT_ECHO).await?;
        self.send("\r\n").await?;

        let complete = match read {
            Ok(read) => read?,
            Err(_) => {
                self.send("Timeout\r\n").await?;
                self.socket.flush().await?;
                return Err(ConsoleError::Timeout);
            }
        };

        if complete && constant_time_eq(line.as_bytes(), config::CONSOLE.password.as_bytes()) {
            throttle.record_success();
            log::info!("console: authenticated");
            return Ok(true);
        }

        throttle.record_failure_at(Instant::now());
        log::warn!("console: bad password failures={}", throttle.failures());
        self.send("Authentication failed\r\n").await?;
        self.socket.flush().await?;
        Ok(false)
    }

    /// Read one line into `line`. `false` when it overflowed; the rest of the
    /// overlong line is discarded.
    async fn read_line<const N: usize>(
        &mut self,
        line: &mut LineBuffer<N>,
    ) -> Result<bool, ConsoleError> {
        line.clear();
        let mut overflowed = false;
        loop {
            if self.pending_pos == self.pending_len {
                let n = self.socket.read(&mut self.pending).await?;
                if n == 0 {
                    return Err(ConsoleError::Closed);
                }
                self.pending_len = n;
                self.pending_pos = 0;
            }
            let byte = self.pending[self.pending_pos];
            self.pending_pos += 1;
            let after_cr = core::mem::replace(&mut self.after_cr, byte == b'\r');

            match line.push(byte) {
                LineEvent::Pending => {}
                LineEvent::Overflow => overflowed = true,
                // Second half of a "\r\n" line ending.
                LineEvent::Line if byte == b'\n' && after_cr => {}
                LineEvent::Line => {
                    if overflowed {
                        line.clear();
                    }
                    return Ok(!overflowed);
                }
            }
        }
    }

    async fn send(&mut self, text: &str) -> Result<(), ConsoleError> {
        self.socket.write_all(text.as_bytes()).await?;
        Ok(())
    }
}

fn execute(command: Command<'_>, oracle: &BootOracle, reply: &mut Reply) -> Flow {
    let now = Instant::now();
    // A full reply buffer only truncates the text.
    let _ = match command {
        Command::Empty => Ok(()),
        Command::Help => reply.write_str(HELP),
        Command::Version => render_version(reply, config::FIRMWARE.version),
        Command::Status => render_status(
            reply,
            Duration::from_ticks(now.as_ticks()),
            oracle.current(),
            &HEALTH.snapshot(),
            now,
        ),
        Command::Ota => render_ota_status(
            reply,
            &OTA_WINDOW.snapshot(),
            oracle,
            &config::PARTITIONS,
            now,
        ),
        Command::OtaEnable(timeout) => {
            let effective = OTA_WINDOW.enable(timeout);
            render_ota_enabled(reply, effective)
        }
        Command::OtaDisable => {
            OTA_WINDOW.disable();
            reply.write_str("OTA server disabled\r\n")
        }
        Command::Reboot => {
            let _ = reply.write_str("Rebooting...\r\n");
            return Flow::Reboot;
        }
        Command::Quit => {
            let _ = reply.write_str("Bye\r\n");
            return Flow::Quit;
        }
        Command::BadDuration(arg) => write!(
            reply,
            "Invalid duration: {} (use 90, 30s, 5m or 1h)\r\n",
            arg
        ),
        Command::Unknown(name) => write!(
            reply,
            "Unknown command: {}. Type 'help' for commands\r\n",
            name
        ),
    };
    Flow::Continue
}
