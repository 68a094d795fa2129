//! Minimal telnet console client.

use std::{
    io::{ErrorKind, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use bindicator_core::console::{CONSOLE_PORT, PROMPT};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

const IAC: u8 = 0xFF;

pub(crate) struct Console {
    stream: TcpStream,
}

impl Console {
    /// Connect, answer the password prompt and wait for the first prompt.
    pub(crate) fn connect(host: &str, password: &str) -> Result<Self> {
        let stream = connect(host, CONSOLE_PORT)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        let mut console = Self { stream };

        let greeting = console.read_until(|text| text.to_lowercase().contains("password"))?;
        if !greeting.to_lowercase().contains("password") {
            bail!("unexpected greeting: {}", greeting.trim());
        }
        console.stream.write_all(format!("{password}\r\n").as_bytes())?;

        let banner = console.read_until(|text| text.ends_with(PROMPT))?;
        if !banner.ends_with(PROMPT) {
            bail!("console refused login: {}", banner.trim());
        }
        Ok(console)
    }

    /// Run one command and return its output without the trailing prompt.
    pub(crate) fn command(&mut self, command: &str) -> Result<String> {
        self.stream
            .write_all(format!("{command}\r\n").as_bytes())
            .context("send failed")?;
        let output = self.read_until(|text| text.ends_with(PROMPT))?;
        Ok(output.trim_end_matches(PROMPT).trim().to_owned())
    }

    /// Read until `done` holds for the text so far, the peer closes, or the
    /// read times out.
    fn read_until(&mut self, done: impl Fn(&str) -> bool) -> Result<String> {
        let mut raw = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => raw.extend_from_slice(&buf[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    break;
                }
                Err(e) => return Err(e).context("read failed"),
            }
            if done(&strip_telnet(&raw)) {
                break;
            }
        }
        Ok(strip_telnet(&raw))
    }
}

pub(crate) fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let addr = (host, port)
        .to_socket_addrs()
        .with_context(|| format!("resolve {host}"))?
        .next()
        .with_context(|| format!("no address for {host}"))?;
    TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).with_context(|| format!("connect {addr}"))
}

/// Drop telnet IAC sequences and decode the rest as text.
fn strip_telnet(data: &[u8]) -> String {
    let mut text = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] == IAC && i + 1 < data.len() {
            // WILL/WONT/DO/DONT carry an option byte.
            i += if (0xFB..=0xFE).contains(&data[i + 1]) { 3 } else { 2 };
        } else {
            text.push(data[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&text).into_owned()
}
