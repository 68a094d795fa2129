//! Debug console logic: line assembly, authentication throttling, command
//! parsing and the text the commands print.
//!
//! The firmware owns the socket; everything here is transport free.

use core::fmt::{self, Write};

use embassy_time::{Duration, Instant, TICK_HZ};

use crate::{
    access::AccessWindow,
    boot::BootOracle,
    health::HealthState,
    partition::{Partition, PartitionTable},
    protocol::OTA_PORT,
};

/// Telnet port of the console.
pub const CONSOLE_PORT: u16 = 23;

/// IAC WILL ECHO: the server echoes, so the client stops (password entry).
pub const TELNET_WILL_ECHO: [u8; 3] = [0xFF, 0xFB, 0x01];
/// IAC WONT ECHO: the client echoes again.
pub const TELNET_WONT_ECHO: [u8; 3] = [0xFF, 0xFC, 0x01];

const IAC: u8 = 0xFF;

pub const PROMPT: &str = "> ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Empty,
    Help,
    Version,
    Status,
    Ota,
    /// Zero means the default window.
    OtaEnable(Duration),
    OtaDisable,
    Reboot,
    Quit,
    BadDuration(&'a str),
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        let (name, arg) = match line.split_once(' ') {
            Some((name, arg)) => (name, arg.trim()),
            None => (line, ""),
        };
        match (name, arg) {
            ("", _) => Self::Empty,
            ("help", "") => Self::Help,
            ("version", "") => Self::Version,
            ("status", "") => Self::Status,
            ("ota", "") => Self::Ota,
            ("ota-enable", "") => Self::OtaEnable(Duration::from_ticks(0)),
            ("ota-enable", arg) => match parse_duration(arg) {
                Some(timeout) => Self::OtaEnable(timeout),
                None => Self::BadDuration(arg),
            },
            ("ota-disable", "") => Self::OtaDisable,
            ("reboot", "") => Self::Reboot,
            ("quit" | "exit", "") => Self::Quit,
            _ => Self::Unknown(line),
        }
    }
}

/// `90`, `30s`, `5m`, `1h`. A bare number is seconds. Lengths the tick
/// counter cannot hold are rejected.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits.parse().ok()?;
    let seconds = match unit {
        "" | "s" | "S" => value,
        "m" | "M" => value.checked_mul(60)?,
        "h" | "H" => value.checked_mul(60 * 60)?,
        _ => return None,
    };
    if seconds > u64::MAX / TICK_HZ {
        return None;
    }
    Some(Duration::from_secs(seconds))
}

/// Compare secrets without an early exit on the first differing byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Escalating lockout after failed password attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthThrottle {
    failures: u32,
    last_failure: Option<Instant>,
}

impl AuthThrottle {
    pub const fn new() -> Self {
        Self {
            failures: 0,
            last_failure: None,
        }
    }

    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Lockout length for the current failure count.
    pub fn lockout(&self) -> Duration {
        match self.failures {
            10.. => Duration::from_secs(5 * 60),
            5.. => Duration::from_secs(30),
            3.. => Duration::from_secs(5),
            _ => Duration::from_ticks(0),
        }
    }

    /// Remaining lockout, `None` when connections are accepted.
    pub fn locked_for_at(&self, now: Instant) -> Option<Duration> {
        let last = self.last_failure?;
        let elapsed = now.saturating_duration_since(last);
        let lockout = self.lockout();
        (elapsed < lockout).then(|| lockout - elapsed)
    }

    pub fn record_failure_at(&mut self, now: Instant) {
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(now);
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    Pending,
    Line,
    Overflow,
}

/// Accumulates printable bytes from a telnet stream into a line.
///
/// IAC sequences are dropped, backspace edits, `\r` or `\n` complete the
/// line. Control bytes and anything above ASCII are ignored.
#[derive(Debug, Clone)]
pub struct LineBuffer<const N: usize> {
    buf: [u8; N],
    len: usize,
    skip: u8,
}

impl<const N: usize> Default for LineBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> LineBuffer<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
            skip: 0,
        }
    }

    pub fn push(&mut self, byte: u8) -> LineEvent {
        if self.skip > 0 {
            self.skip -= 1;
            return LineEvent::Pending;
        }
        match byte {
            IAC => self.skip = 2,
            b'\r' | b'\n' => return LineEvent::Line,
            0x08 | 0x7F => self.len = self.len.saturating_sub(1),
            0x20..=0x7E => {
                if self.len == N {
                    return LineEvent::Overflow;
                }
                self.buf[self.len] = byte;
                self.len += 1;
            }
            _ => {}
        }
        LineEvent::Pending
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Only printable ASCII is ever stored.
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(self.as_bytes()).unwrap_or("")
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.skip = 0;
    }
}

pub const HELP: &str = "Commands: help version status ota ota-enable [dur] ota-disable reboot quit\r\n";

pub fn render_version<W: Write>(w: &mut W, version: &str) -> fmt::Result {
    write!(w, "Bindicator\r\n  Version: {}\r\n", version)
}

/// `1h 2m 3s`.
pub struct Uptime(pub Duration);

impl fmt::Display for Uptime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        write!(f, "{}h {}m {}s", secs / 3600, secs / 60 % 60, secs % 60)
    }
}

pub fn render_status<W: Write>(
    w: &mut W,
    uptime: Duration,
    current: Partition,
    health: &HealthState,
    now: Instant,
) -> fmt::Result {
    if health.is_healthy() {
        w.write_str("Status: OK\r\n")?;
    } else {
        w.write_str("Status: UNHEALTHY (reset pending)\r\n")?;
    }
    write!(w, "  Uptime:    {}\r\n", Uptime(uptime))?;
    write!(w, "  Partition: {}\r\n", current)?;
    write!(
        w,
        "  Failures:  {}/{}\r\n",
        health.consecutive_failures(),
        health.policy().max_consecutive_failures
    )?;
    write!(
        w,
        "  Last success: {}m ago\r\n",
        now.saturating_duration_since(health.last_success()).as_secs() / 60
    )
}

pub fn render_ota_status<W: Write>(
    w: &mut W,
    window: &AccessWindow,
    oracle: &BootOracle,
    table: &PartitionTable,
    now: Instant,
) -> fmt::Result {
    w.write_str("OTA Status:\r\n")?;
    if window.is_enabled_at(now) {
        let remaining = window.time_remaining_at(now).as_secs();
        write!(
            w,
            "  Server:            ENABLED ({}m {}s remaining)\r\n",
            remaining / 60,
            remaining % 60
        )?;
    } else {
        w.write_str("  Server:            disabled\r\n")?;
    }
    write!(w, "  Current partition: {}", oracle.current())?;
    if !oracle.is_reported() {
        w.write_str(" (assumed)")?;
    }
    w.write_str("\r\n")?;
    write!(w, "  Target partition:  {}\r\n", oracle.target())?;
    for partition in [Partition::A, Partition::B] {
        write!(
            w,
            "  Partition {} offset: {:#010x} (xip {:#010x})\r\n",
            partition,
            table.offset_of(partition),
            table.xip_address_of(partition)
        )?;
    }
    write!(w, "  Max image size: {} KB\r\n", table.max_image_size() / 1024)
}

pub fn render_ota_enabled<W: Write>(w: &mut W, timeout: Duration) -> fmt::Result {
    write!(
        w,
        "OTA server enabled on port {}\r\n  Timeout: {} minutes\r\n",
        OTA_PORT,
        timeout.as_secs() / 60
    )
}
