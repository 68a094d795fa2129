//! OTA transfer server.
//!
//! One session at a time: handshake, receive chunks into the inactive
//! partition, verify the SHA-256 of the whole image, then reboot into it.
//! The transport is any `embedded-io-async` stream, the firmware hands in a
//! TCP socket.

use core::convert::Infallible;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Timer, with_timeout};
use embedded_io_async::{Read, ReadExactError, Write};
use sha2::{Digest as _, Sha256};

use crate::{
    access::SharedAccessWindow,
    boot::{BootController, BootOracle, RebootError},
    flash::{FlashController, ImageWriter, WriteError},
    partition::{Partition, PartitionTable},
    pause::BackgroundActivity,
    protocol::{self, DONE, Digest, MAX_CHUNK_SIZE, MAX_LINE_LEN, Reply},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaServerConfig {
    /// Time allowed for the `OTA` line after connect.
    pub handshake_timeout: Duration,
    /// Per read timeout while receiving chunk headers and bodies. Also
    /// bounds each reply write, including the wait for the peer's ack.
    pub read_timeout: Duration,
    /// Time allowed for the rest of the `DONE` line.
    pub done_timeout: Duration,
    /// Delay between `VERIFIED` and the reset, lets the reply leave.
    pub reboot_delay: Duration,
    /// Poll step while the access window is closed.
    pub poll_interval: Duration,
}

impl OtaServerConfig {
    pub const DEFAULT: Self = Self {
        handshake_timeout: Duration::from_secs(10),
        read_timeout: Duration::from_secs(30),
        done_timeout: Duration::from_secs(2),
        reboot_delay: Duration::from_millis(500),
        poll_interval: Duration::from_millis(500),
    };
}

impl Default for OtaServerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Listening,
    Handshaking,
    Receiving,
    Verifying,
    Rebooting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("bad handshake")]
    BadHandshake,
    #[error("timeout")]
    Timeout,
    #[error("connection closed")]
    Closed,
    #[error("connection error")]
    Io,
    #[error("empty chunk")]
    EmptyChunk,
    #[error("chunk too large")]
    ChunkTooLarge,
    #[error("firmware too large")]
    FirmwareTooLarge,
    #[error("erase failed")]
    Erase,
    #[error("write failed")]
    Write,
    #[error("bad digest")]
    BadDigest,
    #[error("hash mismatch")]
    HashMismatch,
    #[error("reboot failed: {0}")]
    Reboot(RebootError),
}

impl SessionError {
    /// Whether the peer is told about the failure with an `ERROR` line.
    pub fn is_reported(&self) -> bool {
        !matches!(self, Self::Closed | Self::Io | Self::Reboot(_))
    }
}

impl From<WriteError> for SessionError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::TooLarge => Self::FirmwareTooLarge,
            WriteError::Erase(_) => Self::Erase,
            WriteError::Write(_) => Self::Write,
        }
    }
}

impl<E> From<ReadExactError<E>> for SessionError {
    fn from(err: ReadExactError<E>) -> Self {
        match err {
            ReadExactError::UnexpectedEof => Self::Closed,
            ReadExactError::Other(_) => Self::Io,
        }
    }
}

/// Per-connection transfer state. Dropped on completion or error.
struct TransferSession<'f, F> {
    writer: ImageWriter<'f, F>,
    hasher: Sha256,
    chunks: u32,
    buffer: [u8; MAX_CHUNK_SIZE],
}

impl<'f, F: FlashController> TransferSession<'f, F> {
    fn new(flash: &'f mut F, table: PartitionTable, target: Partition) -> Self {
        Self {
            writer: ImageWriter::new(flash, table, target),
            hasher: Sha256::new(),
            chunks: 0,
            buffer: [0; MAX_CHUNK_SIZE],
        }
    }

    /// Receive chunks until `DONE`. Returns the digest the client claims.
    async fn receive<C: Read + Write>(
        &mut self,
        conn: &mut C,
        config: &OtaServerConfig,
    ) -> Result<Digest, SessionError> {
        loop {
            let mut header = [0u8; 4];
            read_exact(conn, &mut header, config.read_timeout).await?;

            if header == *DONE.as_bytes() {
                let mut line = [0u8; MAX_LINE_LEN];
                let rest = read_line(conn, &mut line, config.done_timeout)
                    .await
                    .map_err(|err| match err {
                        LineError::Session(err) => err,
                        LineError::Malformed => SessionError::BadDigest,
                    })?;
                return protocol::parse_done_digest(rest).map_err(|_| SessionError::BadDigest);
            }

            let len = u32::from_le_bytes(header);
            if len == 0 {
                return Err(SessionError::EmptyChunk);
            }
            if len as usize > MAX_CHUNK_SIZE {
                log::error!("ota: chunk too large size={}", len);
                return Err(SessionError::ChunkTooLarge);
            }
            if !self.writer.fits(len) {
                log::error!(
                    "ota: firmware too large total={} chunk={}",
                    self.writer.written(),
                    len
                );
                return Err(SessionError::FirmwareTooLarge);
            }

            let chunk = &mut self.buffer[..len as usize];
            read_exact(conn, chunk, config.read_timeout).await?;
            self.hasher.update(&*chunk);
            let total = self.writer.append(chunk).await?;
            self.chunks += 1;
            if self.chunks % 20 == 1 {
                log::debug!(
                    "ota: chunk n={} size={} total={}",
                    self.chunks,
                    len,
                    total
                );
            }

            send(conn, Reply::Ack { total }, config.read_timeout).await?;
        }
    }

    fn finish(self) -> Digest {
        self.hasher.finalize().into()
    }
}

/// Gated, single-session OTA transfer server.
pub struct OtaServer<'a, M: RawMutex, F, B, A> {
    flash: F,
    boot: B,
    oracle: BootOracle,
    table: PartitionTable,
    window: &'a SharedAccessWindow<M>,
    background: A,
    config: OtaServerConfig,
    state: ServerState,
}

impl<'a, M, F, B, A> OtaServer<'a, M, F, B, A>
where
    M: RawMutex,
    F: FlashController,
    B: BootController,
    A: BackgroundActivity,
{
    pub fn new(
        flash: F,
        boot: B,
        oracle: BootOracle,
        table: PartitionTable,
        window: &'a SharedAccessWindow<M>,
        background: A,
        config: OtaServerConfig,
    ) -> Self {
        Self {
            flash,
            boot,
            oracle,
            table,
            window,
            background,
            config,
            state: ServerState::Idle,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn target(&self) -> Partition {
        self.oracle.target()
    }

    pub fn window_open(&self) -> bool {
        self.window.is_enabled()
    }

    /// Idle until the access window opens, then move to `Listening`.
    pub async fn wait_for_window(&mut self) {
        self.state = ServerState::Idle;
        while !self.window.is_enabled() {
            Timer::after(self.config.poll_interval).await;
        }
        self.state = ServerState::Listening;
        log::info!("ota: listening target={}", self.oracle.target());
    }

    /// Resolves once the access window has closed.
    pub async fn wait_for_window_closed(&self) {
        while self.window.is_enabled() {
            Timer::after(self.config.poll_interval).await;
        }
    }

    /// Run one session on an accepted connection.
    ///
    /// On success the device reboots and this never returns. Any return is
    /// a failed session; the server is back in `Idle` and the caller may
    /// listen again.
    pub async fn handle<C: Read + Write>(&mut self, conn: &mut C) -> SessionError {
        let mut paused = false;
        let err = match self.run(conn, &mut paused).await {
            Ok(never) => match never {},
            Err(err) => err,
        };

        log::error!("ota: session failed err={}", err);
        if paused {
            self.background.resume();
            log::warn!("ota: background tasks resumed");
        }
        if err.is_reported() {
            let mut reason: heapless::String<32> = heapless::String::new();
            let _ = core::fmt::write(&mut reason, format_args!("{}", err));
            if send(conn, Reply::Error(&reason), self.config.read_timeout)
                .await
                .is_err()
            {
                log::warn!("ota: could not deliver error reply");
            }
        }
        self.state = ServerState::Idle;
        err
    }

    async fn run<C: Read + Write>(
        &mut self,
        conn: &mut C,
        paused: &mut bool,
    ) -> Result<Infallible, SessionError> {
        self.state = ServerState::Handshaking;
        let mut line = [0u8; MAX_LINE_LEN];
        let hello = read_line(conn, &mut line, self.config.handshake_timeout)
            .await
            .map_err(|err| match err {
                LineError::Session(SessionError::Timeout) | LineError::Malformed => {
                    SessionError::BadHandshake
                }
                LineError::Session(err) => err,
            })?;
        if !protocol::is_handshake(hello) {
            return Err(SessionError::BadHandshake);
        }

        let max_size = self.table.max_image_size();
        send(conn, Reply::Ready { max_size }, self.config.read_timeout).await?;

        log::warn!("ota: pausing background tasks");
        self.background.pause().await;
        *paused = true;

        let target = self.oracle.target();
        log::info!(
            "ota: receiving target={} offset={:#010x} max_size={}",
            target,
            self.table.offset_of(target),
            max_size
        );
        self.state = ServerState::Receiving;
        let mut session = TransferSession::new(&mut self.flash, self.table, target);
        let expected = session.receive(conn, &self.config).await?;

        self.state = ServerState::Verifying;
        let bytes = session.writer.written();
        let sectors = session.writer.erased().erased_count();
        let chunks = session.chunks;
        let actual = session.finish();
        if actual != expected {
            log::error!(
                "ota: hash mismatch expected={} actual={}",
                HexDigest(&expected),
                HexDigest(&actual)
            );
            return Err(SessionError::HashMismatch);
        }
        if send(conn, Reply::Verified, self.config.read_timeout)
            .await
            .is_err()
        {
            log::warn!("ota: peer gone before VERIFIED");
        }
        log::info!(
            "ota: complete bytes={} chunks={} sectors={}",
            bytes,
            chunks,
            sectors
        );

        self.window.disable();
        self.state = ServerState::Rebooting;
        self.background.resume();
        *paused = false;
        self.background.flush().await;

        log::info!(
            "ota: rebooting partition={} offset={:#010x} xip={:#010x}",
            target,
            self.table.offset_of(target),
            self.table.xip_address_of(target)
        );
        let err = self
            .boot
            .reboot_to_partition(target, self.config.reboot_delay)
            .await;
        Err(SessionError::Reboot(err))
    }
}

struct HexDigest<'d>(&'d Digest);

impl core::fmt::Display for HexDigest<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

enum LineError {
    Session(SessionError),
    Malformed,
}

async fn read_exact<C: Read>(
    conn: &mut C,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<(), SessionError> {
    with_timeout(timeout, conn.read_exact(buf))
        .await
        .map_err(|_| SessionError::Timeout)??;
    Ok(())
}

/// Read up to and excluding `\n`, the whole line bounded by `timeout`.
async fn read_line<'b, C: Read>(
    conn: &mut C,
    buf: &'b mut [u8],
    timeout: Duration,
) -> Result<&'b str, LineError> {
    let read = async {
        let mut len = 0;
        loop {
            let mut byte = [0u8; 1];
            match conn.read(&mut byte).await {
                Ok(0) => return Err(LineError::Session(SessionError::Closed)),
                Ok(_) => {}
                Err(_) => return Err(LineError::Session(SessionError::Io)),
            }
            if byte[0] == b'\n' {
                return Ok(len);
            }
            let Some(slot) = buf.get_mut(len) else {
                return Err(LineError::Malformed);
            };
            *slot = byte[0];
            len += 1;
        }
    };
    let len = with_timeout(timeout, read)
        .await
        .map_err(|_| LineError::Session(SessionError::Timeout))??;
    core::str::from_utf8(&buf[..len]).map_err(|_| LineError::Malformed)
}

/// Write one reply and wait for it to drain, both within `timeout`.
async fn send<C: Write>(
    conn: &mut C,
    reply: Reply<'_>,
    timeout: Duration,
) -> Result<(), SessionError> {
    let line = reply.encode();
    let write = async {
        conn.write_all(line.as_bytes()).await?;
        conn.flush().await
    };
    with_timeout(timeout, write)
        .await
        .map_err(|_| SessionError::Timeout)?
        .map_err(|_| SessionError::Io)
}
