//! Line framing of the OTA transfer protocol.
//!
//! ```text
//! C->D: "OTA\n"
//! D->C: "READY <max_size>\n"
//! repeat:
//!   C->D: <u32 LE length><chunk>
//!   D->C: "ACK <total>\n"
//! C->D: "DONE <sha256 hex>\n"
//! D->C: "VERIFIED\n" | "ERROR <reason>\n"
//! ```
//!
//! Both the device and the host tool use these helpers, so the wire text is
//! defined once.

use core::fmt::Write as _;

use heapless::String;

/// TCP port of the OTA listener.
pub const OTA_PORT: u16 = 4242;

/// Largest chunk the device buffers at once.
pub const MAX_CHUNK_SIZE: usize = 4096;

pub const HANDSHAKE: &str = "OTA";
pub const DONE: &str = "DONE";

/// Hex characters in a SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Longest line either side sends, `DONE` plus digest included.
pub const MAX_LINE_LEN: usize = 96;

pub type Digest = [u8; 32];

pub type Line = String<MAX_LINE_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown reply")]
    Unknown,
    #[error("bad number")]
    BadNumber,
    #[error("bad digest")]
    BadDigest,
}

/// A device to client line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply<'a> {
    Ready { max_size: u32 },
    Ack { total: u32 },
    Verified,
    Error(&'a str),
}

impl<'a> Reply<'a> {
    /// Render the reply, newline included. Over-long error reasons are
    /// truncated.
    pub fn encode(&self) -> Line {
        let mut line = Line::new();
        match self {
            Reply::Ready { max_size } => {
                let _ = writeln!(line, "READY {}", max_size);
            }
            Reply::Ack { total } => {
                let _ = writeln!(line, "ACK {}", total);
            }
            Reply::Verified => {
                let _ = line.push_str("VERIFIED\n");
            }
            Reply::Error(reason) => {
                let _ = line.push_str("ERROR ");
                let room = MAX_LINE_LEN - line.len() - 1;
                let _ = line.push_str(truncate(reason, room));
                let _ = line.push('\n');
            }
        }
        line
    }

    /// Parse one line, with or without its trailing newline.
    pub fn parse(line: &'a str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line == "VERIFIED" {
            return Ok(Reply::Verified);
        }
        if let Some(reason) = line.strip_prefix("ERROR ") {
            return Ok(Reply::Error(reason));
        }
        if let Some(n) = line.strip_prefix("READY ") {
            return Ok(Reply::Ready {
                max_size: parse_u32(n)?,
            });
        }
        if let Some(n) = line.strip_prefix("ACK ") {
            return Ok(Reply::Ack {
                total: parse_u32(n)?,
            });
        }
        Err(ParseError::Unknown)
    }
}

fn parse_u32(s: &str) -> Result<u32, ParseError> {
    s.trim().parse().map_err(|_| ParseError::BadNumber)
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Whether a handshake line is exactly `OTA`.
pub fn is_handshake(line: &str) -> bool {
    line.trim_end_matches(['\r', '\n']) == HANDSHAKE
}

/// Parse the text after the `DONE` marker into a digest.
///
/// Hex case is ignored; anything but 64 hex characters is rejected.
pub fn parse_done_digest(rest: &str) -> Result<Digest, ParseError> {
    let hex_digest = rest.trim_matches([' ', '\r', '\n']);
    if hex_digest.len() != DIGEST_HEX_LEN {
        return Err(ParseError::BadDigest);
    }
    let mut digest = [0u8; 32];
    hex::decode_to_slice(hex_digest, &mut digest).map_err(|_| ParseError::BadDigest)?;
    Ok(digest)
}

/// `DONE <lowercase hex>\n`.
pub fn encode_done(digest: &Digest) -> Line {
    let mut line = Line::new();
    let _ = line.push_str(DONE);
    let _ = line.push(' ');
    for byte in digest {
        let _ = write!(line, "{:02x}", byte);
    }
    let _ = line.push('\n');
    line
}

/// 4-byte little-endian chunk header.
pub fn encode_chunk_header(len: u32) -> [u8; 4] {
    len.to_le_bytes()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn replies_render_as_wire_text() {
        assert_eq!(Reply::Ready { max_size: 2_031_616 }.encode(), "READY 2031616\n");
        assert_eq!(Reply::Ack { total: 8192 }.encode(), "ACK 8192\n");
        assert_eq!(Reply::Verified.encode(), "VERIFIED\n");
        assert_eq!(Reply::Error("hash mismatch").encode(), "ERROR hash mismatch\n");
    }

    #[test]
    fn replies_parse_back() {
        assert_eq!(Reply::parse("READY 4096\n"), Ok(Reply::Ready { max_size: 4096 }));
        assert_eq!(Reply::parse("ACK 10000\r\n"), Ok(Reply::Ack { total: 10000 }));
        assert_eq!(Reply::parse("VERIFIED"), Ok(Reply::Verified));
        assert_eq!(
            Reply::parse("ERROR chunk too large\n"),
            Ok(Reply::Error("chunk too large"))
        );
        assert_eq!(Reply::parse("ACK x"), Err(ParseError::BadNumber));
        assert_eq!(Reply::parse("HELLO"), Err(ParseError::Unknown));
    }

    #[test]
    fn long_error_reason_is_truncated() {
        let reason = "x".repeat(200);
        let line = Reply::Error(&reason).encode();
        assert_eq!(line.len(), MAX_LINE_LEN);
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn done_digest_accepts_either_case() {
        let lower = "ab".repeat(32);
        let upper = "AB".repeat(32);
        assert_eq!(parse_done_digest(&lower), Ok([0xAB; 32]));
        assert_eq!(parse_done_digest(&std::format!(" {upper}\n")), Ok([0xAB; 32]));
    }

    #[test]
    fn done_digest_rejects_garbage() {
        assert_eq!(parse_done_digest(""), Err(ParseError::BadDigest));
        assert_eq!(parse_done_digest(&"a".repeat(63)), Err(ParseError::BadDigest));
        assert_eq!(parse_done_digest(&"zz".repeat(32)), Err(ParseError::BadDigest));
    }

    #[test]
    fn done_line_is_lowercase_hex() {
        let line = encode_done(&[0xCD; 32]);
        assert_eq!(line.len(), 4 + 1 + 64 + 1);
        assert!(line.starts_with("DONE cdcd"));
        assert_eq!(parse_done_digest(&line[4..]), Ok([0xCD; 32]));
    }

    #[test]
    fn handshake_tolerates_crlf() {
        assert!(is_handshake("OTA\n"));
        assert!(is_handshake("OTA\r\n"));
        assert!(!is_handshake("OTA please"));
    }
}
