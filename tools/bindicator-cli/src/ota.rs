//! Client side of the OTA transfer protocol.

use std::{
    io::{BufRead, BufReader, Write},
    net::TcpStream,
    path::Path,
    thread,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use bindicator_core::{
    console::parse_duration,
    protocol::{HANDSHAKE, MAX_CHUNK_SIZE, OTA_PORT, Reply, encode_chunk_header, encode_done},
};

use crate::{console, image::ImageSummary};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// Erasing a fresh sector can take several hundred milliseconds.
const ACK_TIMEOUT: Duration = Duration::from_secs(30);
const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);
/// The device polls its access window twice a second.
const LISTEN_DELAY: Duration = Duration::from_secs(1);

/// Open the device's OTA window through the console.
pub(crate) fn enable(host: &str, duration: Option<&str>, password: &str) -> Result<String> {
    let command = match duration {
        Some(duration) => {
            if parse_duration(duration).is_none() {
                bail!("invalid duration {duration:?} (use 90, 30s, 5m or 1h)");
            }
            format!("ota-enable {duration}")
        }
        None => "ota-enable".to_owned(),
    };

    println!("Enabling OTA server...");
    let mut console = console::Console::connect(host, password)?;
    let output = console.command(&command)?;
    if output.contains("Unknown command") {
        bail!("device firmware has no ota-enable command");
    }
    if !output.contains("enabled") {
        bail!("unexpected response: {output}");
    }
    Ok(output)
}

pub(crate) fn push(host: &str, path: &Path, password: &str) -> Result<()> {
    let image = ImageSummary::load(path)?;
    if image.data.is_empty() {
        bail!("{} is empty", path.display());
    }
    println!("Firmware: {}", path.display());
    print!("{image}");
    println!();

    println!("{}", enable(host, None, password)?);
    println!();
    thread::sleep(LISTEN_DELAY);

    println!("Connecting to {host}:{OTA_PORT}...");
    let stream = console::connect(host, OTA_PORT)?;
    let mut session = Session::new(stream)?;
    session.transfer(&image)?;

    println!("Firmware verified!");
    println!("Device will reboot into the new partition...");
    Ok(())
}

struct Session {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
    line: String,
}

impl Session {
    fn new(stream: TcpStream) -> Result<Self> {
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            writer: stream,
            reader,
            line: String::new(),
        })
    }

    fn transfer(&mut self, image: &ImageSummary) -> Result<()> {
        writeln!(self.writer, "{HANDSHAKE}")?;
        match self.reply(HANDSHAKE_TIMEOUT).context("handshake")? {
            Reply::Ready { max_size } => {
                println!("Device ready, max image size {max_size} bytes");
                if image.len() > max_size as usize {
                    bail!("image is {} bytes, device accepts {max_size}", image.len());
                }
            }
            other => bail!("unexpected handshake reply: {other:?}"),
        }

        let total_chunks = image.chunk_count();
        println!("Sending {total_chunks} chunks...");
        let mut sent = 0usize;
        for (index, chunk) in image.data.chunks(MAX_CHUNK_SIZE).enumerate() {
            let header = encode_chunk_header(u32::try_from(chunk.len())?);
            self.writer.write_all(&header)?;
            self.writer.write_all(chunk)?;
            sent += chunk.len();

            let number = index + 1;
            match self
                .reply(ACK_TIMEOUT)
                .with_context(|| format!("chunk {number}: no ACK"))?
            {
                Reply::Ack { total } if total as usize == sent => {}
                Reply::Ack { total } => {
                    bail!("chunk {number}: device has {total} bytes, sent {sent}")
                }
                Reply::Error(reason) => bail!("chunk {number}: device error: {reason}"),
                other => bail!("chunk {number}: unexpected reply: {other:?}"),
            }
            print!(
                "\r[{:3}%] Chunk {number}/{total_chunks}",
                sent * 100 / image.len()
            );
            std::io::stdout().flush()?;
        }
        println!();

        println!("Verifying (sha256 {})...", hex::encode(image.digest));
        self.writer.write_all(encode_done(&image.digest).as_bytes())?;
        match self.reply(VERIFY_TIMEOUT).context("verification")? {
            Reply::Verified => Ok(()),
            Reply::Error(reason) => bail!("verification failed: {reason}"),
            other => bail!("unexpected verification reply: {other:?}"),
        }
    }

    /// Read and parse one reply line.
    fn reply(&mut self, timeout: Duration) -> Result<Reply<'_>> {
        self.reader.get_ref().set_read_timeout(Some(timeout))?;
        self.line.clear();
        if self.reader.read_line(&mut self.line)? == 0 {
            bail!("connection closed by device");
        }
        Reply::parse(&self.line).with_context(|| format!("bad reply {:?}", self.line.trim_end()))
    }
}
