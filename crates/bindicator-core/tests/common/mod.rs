#![allow(dead_code, unreachable_pub)]

use std::{cell::Cell, collections::VecDeque, convert::Infallible};

use bindicator_core::{
    BackgroundActivity, BootController, FlashController, Partition, PartitionTable,
    boot::{ConfirmError, RebootError},
    flash::FlashError,
    partition::SECTOR_SIZE,
    protocol::{self, Digest, encode_chunk_header},
};
use embassy_time::Duration;
use embedded_io_async::{ErrorType, Read, Write};
use sha2::{Digest as _, Sha256};

pub const FLASH_SIZE: usize = 4 * 1024 * 1024;

pub fn production_table() -> PartitionTable {
    PartitionTable::new(0x1_0000, 0x20_0000, 0x1F_0000, 0x3F40_0000).unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Erase { offset: u32 },
    Write { offset: u32, len: usize },
}

/// In-memory NOR flash that refuses to program bytes that were not erased.
pub struct RecordingFlash {
    pub memory: Vec<u8>,
    pub operations: Vec<Operation>,
    pub fail_writes: bool,
}

impl Default for RecordingFlash {
    fn default() -> Self {
        Self {
            memory: vec![0; FLASH_SIZE],
            operations: Vec::new(),
            fail_writes: false,
        }
    }
}

impl RecordingFlash {
    pub fn erases(&self) -> Vec<u32> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                Operation::Erase { offset } => Some(*offset),
                Operation::Write { .. } => None,
            })
            .collect()
    }

    pub fn writes(&self) -> Vec<(u32, usize)> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                Operation::Write { offset, len } => Some((*offset, *len)),
                Operation::Erase { .. } => None,
            })
            .collect()
    }

    pub fn read(&self, offset: u32, len: usize) -> &[u8] {
        &self.memory[offset as usize..offset as usize + len]
    }
}

impl FlashController for RecordingFlash {
    fn erase_sector(&mut self, offset: u32) -> Result<(), FlashError> {
        if offset % SECTOR_SIZE != 0 {
            return Err(FlashError::Unaligned);
        }
        let start = offset as usize;
        let end = start + SECTOR_SIZE as usize;
        if end > self.memory.len() {
            return Err(FlashError::OutOfRange);
        }
        self.memory[start..end].fill(0xFF);
        self.operations.push(Operation::Erase { offset });
        Ok(())
    }

    fn write_bytes(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        if self.fail_writes {
            return Err(FlashError::Write);
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > self.memory.len() {
            return Err(FlashError::OutOfRange);
        }
        assert!(
            self.memory[start..end].iter().all(|&b| b == 0xFF),
            "write to unerased flash at {offset:#x}"
        );
        self.memory[start..end].copy_from_slice(data);
        self.operations.push(Operation::Write {
            offset,
            len: data.len(),
        });
        Ok(())
    }
}

/// Boot controller that records what it was asked to do and never resets.
#[derive(Default)]
pub struct ScriptedBoot {
    pub running: Option<Partition>,
    pub reboots: Vec<(Partition, Duration)>,
}

impl BootController for ScriptedBoot {
    fn running_partition(&mut self) -> Option<Partition> {
        self.running
    }

    fn confirm_partition(&mut self) -> Result<(), ConfirmError> {
        Ok(())
    }

    async fn reboot_to_partition(&mut self, partition: Partition, delay: Duration) -> RebootError {
        self.reboots.push((partition, delay));
        RebootError::NoReset
    }
}

/// Counts pause/resume/flush calls.
#[derive(Default)]
pub struct RecordingActivity {
    pub paused: Cell<bool>,
    pub pauses: Cell<u32>,
    pub resumes: Cell<u32>,
    pub flushes: Cell<u32>,
}

impl BackgroundActivity for RecordingActivity {
    async fn pause(&self) {
        self.paused.set(true);
        self.pauses.set(self.pauses.get() + 1);
    }

    fn resume(&self) {
        self.paused.set(false);
        self.resumes.set(self.resumes.get() + 1);
    }

    async fn flush(&self) {
        self.flushes.set(self.flushes.get() + 1);
    }
}

/// A client whose whole input is scripted up front.
///
/// Once the script is exhausted reads either report end of stream or hang,
/// the latter to exercise read timeouts.
pub struct ScriptedPeer {
    input: VecDeque<u8>,
    pub output: Vec<u8>,
    hang_when_drained: bool,
    /// Flushes that complete before every later one pends forever.
    flushes_before_stall: Option<usize>,
}

impl ScriptedPeer {
    pub fn new(input: Vec<u8>) -> Self {
        Self {
            input: input.into(),
            output: Vec::new(),
            hang_when_drained: false,
            flushes_before_stall: None,
        }
    }

    pub fn hanging(input: Vec<u8>) -> Self {
        Self {
            hang_when_drained: true,
            ..Self::new(input)
        }
    }

    /// A client that stops acknowledging after `flushes` replies, like one
    /// that dropped off the network.
    pub fn stalling_after(input: Vec<u8>, flushes: usize) -> Self {
        Self {
            flushes_before_stall: Some(flushes),
            ..Self::hanging(input)
        }
    }

    pub fn output_text(&self) -> &str {
        std::str::from_utf8(&self.output).unwrap()
    }
}

impl ErrorType for ScriptedPeer {
    type Error = Infallible;
}

impl Read for ScriptedPeer {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.input.is_empty() {
            if self.hang_when_drained {
                core::future::pending::<()>().await;
            }
            return Ok(0);
        }
        let n = buf.len().min(self.input.len());
        for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedPeer {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        match &mut self.flushes_before_stall {
            Some(0) => core::future::pending().await,
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

pub fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

pub fn sha256(data: &[u8]) -> Digest {
    Sha256::digest(data).into()
}

/// Client side of a full session: handshake, `sizes` chunks, `DONE`.
pub fn session_script(image: &[u8], sizes: &[usize], digest: &Digest) -> Vec<u8> {
    let mut script = b"OTA\n".to_vec();
    let mut rest = image;
    for &size in sizes {
        let (chunk, tail) = rest.split_at(size);
        script.extend_from_slice(&encode_chunk_header(size as u32));
        script.extend_from_slice(chunk);
        rest = tail;
    }
    assert!(rest.is_empty(), "chunk sizes must cover the image");
    script.extend_from_slice(protocol::encode_done(digest).as_bytes());
    script
}

/// Split `len` into chunks of `chunk` bytes, the last one shorter.
pub fn even_chunks(len: usize, chunk: usize) -> Vec<usize> {
    let mut sizes = vec![chunk; len / chunk];
    if len % chunk != 0 {
        sizes.push(len % chunk);
    }
    sizes
}
