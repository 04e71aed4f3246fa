//! STOMP 1.2 wire codec
//!
//! The engine only relies on two operations: turning buffered bytes into
//! frames and turning a frame back into bytes. [`StompCodec`] provides both
//! through the `tokio_util` codec traits so it can also be used with
//! `FramedRead`/`FramedWrite` outside the proxy.
//!
//! # Wire format
//! ```text
//! COMMAND
//! header1:value1
//! header2:value2
//!
//! body^@
//! ```
//!
//! A bare EOL where a command is expected is a heartbeat. Heartbeats encode
//! back to the same EOL and are never followed by a terminator.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::Frame;
use crate::{Error, Result};

/// Terminates every non-heartbeat frame on the wire.
pub const NULL_BYTE: u8 = 0x00;
const LF: u8 = b'\n';
const CR: u8 = b'\r';

#[derive(Debug, Clone, Copy, Default)]
pub struct StompCodec;

impl StompCodec {
    pub fn new() -> Self {
        Self
    }

    /// Decodes every complete frame currently held in `src`.
    ///
    /// Incomplete trailing input stays in `src` for the next call. On error the
    /// frames completed so far are returned alongside it.
    pub fn decode_all(&mut self, src: &mut BytesMut) -> (Vec<Frame>, Option<Error>) {
        let mut frames = Vec::new();
        loop {
            match self.decode(src) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => return (frames, None),
                Err(e) => return (frames, Some(e)),
            }
        }
    }
}

/// Serializes a frame for the wire, appending the terminator unless it is a
/// bare EOL heartbeat.
pub fn to_wire(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf);
    if !is_bare_eol(frame) {
        buf.put_u8(NULL_BYTE);
    }
    buf.freeze()
}

impl Decoder for StompCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.is_empty() {
            return Ok(None);
        }

        // Heartbeats keep their EOL as the command so they re-encode verbatim
        match src[0] {
            LF => {
                src.advance(1);
                return Ok(Some(Frame::new("\n")));
            }
            CR if src.len() < 2 => return Ok(None),
            CR if src[1] == LF => {
                src.advance(2);
                return Ok(Some(Frame::new("\r\n")));
            }
            _ => {}
        }

        let (command_line, mut pos) = match read_line(src, 0) {
            Some(line) => line,
            None => return Ok(None),
        };
        let command = utf8(command_line)?.to_string();
        let escaped = !matches!(command.as_str(), "CONNECT" | "CONNECTED");

        let mut frame = Frame::new(command);
        loop {
            let (line, next) = match read_line(src, pos) {
                Some(line) => line,
                None => return Ok(None),
            };
            pos = next;
            if line.is_empty() {
                break;
            }

            let line = utf8(line)?;
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| Error::codec(format!("malformed header line: {:?}", line)))?;
            let (key, value) = if escaped {
                (unescape(key)?, unescape(value)?)
            } else {
                (key.to_string(), value.to_string())
            };
            // First occurrence of a repeated header wins
            frame.headers.entry(key).or_insert(value);
        }

        let body_start = pos;
        let content_length = frame
            .header("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok());

        let body_end = match content_length {
            Some(len) => {
                let end = body_start.checked_add(len).ok_or_else(|| {
                    Error::codec(format!("content-length {} out of range", len))
                })?;
                if src.len() <= end {
                    return Ok(None);
                }
                if src[end] != NULL_BYTE {
                    return Err(Error::codec(format!(
                        "frame body longer than content-length {}",
                        len
                    )));
                }
                end
            }
            None => match src[body_start..].iter().position(|b| *b == NULL_BYTE) {
                Some(offset) => body_start + offset,
                None => return Ok(None),
            },
        };

        frame.body = Bytes::copy_from_slice(&src[body_start..body_end]);
        src.advance(body_end + 1);
        Ok(Some(frame))
    }
}

impl<'a> Encoder<&'a Frame> for StompCodec {
    type Error = Error;

    fn encode(&mut self, frame: &'a Frame, dst: &mut BytesMut) -> Result<()> {
        encode_into(frame, dst);
        Ok(())
    }
}

/// A heartbeat that carries nothing but its EOL. Whitespace commands with
/// headers or a body are written out in full.
fn is_bare_eol(frame: &Frame) -> bool {
    matches!(frame.command.as_str(), "" | "\n" | "\r\n")
        && frame.headers.is_empty()
        && frame.body.is_empty()
}

fn encode_into(frame: &Frame, dst: &mut BytesMut) {
    if is_bare_eol(frame) {
        match frame.command.as_str() {
            "\r\n" => dst.put_slice(b"\r\n"),
            _ => dst.put_u8(LF),
        }
        return;
    }

    let escaped = !matches!(frame.command.as_str(), "CONNECT" | "CONNECTED");
    dst.put_slice(frame.command.as_bytes());
    dst.put_u8(LF);
    for (key, value) in &frame.headers {
        if escaped {
            dst.put_slice(escape(key).as_bytes());
            dst.put_u8(b':');
            dst.put_slice(escape(value).as_bytes());
        } else {
            dst.put_slice(key.as_bytes());
            dst.put_u8(b':');
            dst.put_slice(value.as_bytes());
        }
        dst.put_u8(LF);
    }
    dst.put_u8(LF);
    dst.put_slice(&frame.body);
}

/// Returns the line starting at `start` without its EOL, and the offset after the EOL.
fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let offset = buf[start..].iter().position(|b| *b == LF)?;
    let end = start + offset;
    let line = &buf[start..end];
    let line = line.strip_suffix(&[CR]).unwrap_or(line);
    Some((line, end + 1))
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| Error::codec(format!("invalid UTF-8 in frame: {}", e)))
}

fn unescape(value: &str) -> Result<String> {
    if !value.contains('\\') {
        return Ok(value.to_string());
    }

    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(Error::codec(format!(
                    "invalid header escape sequence: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            _ => out.push(c),
        }
    }
    out
}
