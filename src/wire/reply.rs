//! Reply frames and the incremental decoder that produces them.
//!
//! A frame starts with a one-byte sigil:
//!
//! - `+OK\r\n` status line
//! - `-ERR message\r\n` error line
//! - `:42\r\n` integer
//! - `$1\r\n5\r\n` bulk string, or `$-1\r\n` for an absent key

use std::fmt;

use super::command::CRLF;
use super::error::CommandError;

/// Upper bound on the bytes buffered while waiting for one frame.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// One parsed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Single-line acknowledgement such as `OK`.
    Status(String),
    /// Numeric reply.
    Integer(i64),
    /// Length-prefixed string; `None` when the key does not exist.
    Bulk(Option<String>),
    /// Protocol-level error line.
    Error(String),
}

impl Reply {
    /// Parse a buffer that must hold exactly one complete frame.
    pub fn parse(buf: &[u8]) -> Result<Reply, CommandError> {
        if buf.is_empty() {
            return Err(CommandError::PeerClosed);
        }

        let mut decoder = ReplyDecoder::new();
        decoder.feed(buf)?;
        match decoder.decode()? {
            Some(reply) if decoder.buffered() == 0 => Ok(reply),
            Some(_) => Err(CommandError::malformed(format!(
                "{} trailing bytes after frame",
                decoder.buffered()
            ))),
            None => Err(CommandError::malformed("incomplete frame")),
        }
    }

    /// Whether this is the `+OK` success marker.
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Status(s) if s == "OK")
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "+{}", s),
            Reply::Integer(n) => write!(f, ":{}", n),
            Reply::Bulk(Some(s)) => write!(f, "${}", s),
            Reply::Bulk(None) => f.write_str("(nil)"),
            Reply::Error(s) => write!(f, "-{}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Waiting for the sigil and its terminated first line.
    Header,
    /// Bulk header consumed; waiting for `len` payload bytes plus CRLF.
    Payload { header_len: usize, len: usize },
}

/// Incremental decoder over bytes read from the socket.
///
/// Bytes are appended with [`feed`](Self::feed); [`decode`](Self::decode)
/// yields `Ok(None)` until a whole frame has been buffered. The buffer never
/// grows past `max_frame`.
#[derive(Debug)]
pub struct ReplyDecoder {
    buf: Vec<u8>,
    state: DecodeState,
    max_frame: usize,
}

impl ReplyDecoder {
    pub fn new() -> Self {
        Self::with_max_frame(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            state: DecodeState::Header,
            max_frame,
        }
    }

    /// Number of bytes buffered but not yet consumed by a decoded frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append bytes read from the connection.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), CommandError> {
        if self.buf.len() + bytes.len() > self.max_frame {
            return Err(CommandError::malformed(format!(
                "frame exceeds {} bytes",
                self.max_frame
            )));
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Try to decode one frame from the buffered bytes.
    pub fn decode(&mut self) -> Result<Option<Reply>, CommandError> {
        loop {
            match self.state {
                DecodeState::Header => {
                    let Some(&sigil) = self.buf.first() else {
                        return Ok(None);
                    };
                    if !matches!(sigil, b'+' | b'-' | b':' | b'$') {
                        return Err(CommandError::malformed(format!(
                            "unknown reply type byte 0x{:02x}",
                            sigil
                        )));
                    }

                    let Some(line_end) = find_crlf(&self.buf) else {
                        return Ok(None);
                    };
                    let line = text(&self.buf[1..line_end])?;
                    let header_len = line_end + CRLF.len();

                    let reply = match sigil {
                        b'+' => Reply::Status(line),
                        b'-' => Reply::Error(line),
                        b':' => Reply::Integer(parse_integer(&line)?),
                        _ => match parse_integer(&line)? {
                            -1 => Reply::Bulk(None),
                            len if len < -1 => {
                                return Err(CommandError::malformed(format!(
                                    "negative bulk length {}",
                                    len
                                )));
                            }
                            len => {
                                let len = usize::try_from(len)
                                    .ok()
                                    .filter(|len| *len <= self.max_frame)
                                    .ok_or_else(|| {
                                        CommandError::malformed(format!(
                                            "bulk length {} exceeds {} bytes",
                                            len, self.max_frame
                                        ))
                                    })?;
                                self.state = DecodeState::Payload { header_len, len };
                                continue;
                            }
                        },
                    };

                    self.consume(header_len);
                    return Ok(Some(reply));
                }
                DecodeState::Payload { header_len, len } => {
                    let payload_end = header_len + len;
                    let frame_end = payload_end + CRLF.len();
                    if self.buf.len() < frame_end {
                        return Ok(None);
                    }
                    if &self.buf[payload_end..frame_end] != CRLF {
                        return Err(CommandError::malformed(
                            "bulk payload not terminated by CRLF",
                        ));
                    }

                    let payload = text(&self.buf[header_len..payload_end])?;
                    self.consume(frame_end);
                    self.state = DecodeState::Header;
                    return Ok(Some(Reply::Bulk(Some(payload))));
                }
            }
        }
    }

    fn consume(&mut self, n: usize) {
        self.buf.drain(..n);
    }
}

impl Default for ReplyDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(CRLF.len()).position(|w| w == CRLF)
}

fn text(bytes: &[u8]) -> Result<String, CommandError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| CommandError::malformed("reply is not valid UTF-8"))
}

fn parse_integer(line: &str) -> Result<i64, CommandError> {
    line.parse()
        .map_err(|_| CommandError::malformed(format!("invalid integer {:?}", line)))
}
