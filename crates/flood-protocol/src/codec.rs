//! Newline-delimited framing of envelopes over a byte stream

use crate::error::{ProtocolError, ProtocolResult};
use bytes::{BufMut, Bytes, BytesMut};

/// Maximum frame size (1MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Splits an inbound byte stream into frames
pub struct Framer {
    buffer: BytesMut,
}

impl Framer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the framer buffer
    pub fn feed(&mut self, data: &[u8]) -> ProtocolResult<()> {
        if self.buffer.len() + data.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: self.buffer.len() + data.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Try to take one complete frame from the buffer, skipping blank lines
    pub fn next_frame(&mut self) -> ProtocolResult<Option<String>> {
        loop {
            let line_end = match self.buffer.iter().position(|&b| b == b'\n') {
                Some(pos) => pos,
                None => return Ok(None), // Incomplete
            };

            let line = self.buffer.split_to(line_end + 1);
            let body = line[..line_end].strip_suffix(b"\r").unwrap_or(&line[..line_end]);

            let text = std::str::from_utf8(body)
                .map_err(|e| ProtocolError::InvalidFrame(e.to_string()))?
                .trim();

            if !text.is_empty() {
                return Ok(Some(text.to_string()));
            }
        }
    }

    /// Bytes received but not yet framed
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminate a frame for the wire
pub fn encode_frame(frame: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(frame.len() + 1);
    buf.put_slice(frame.as_bytes());
    buf.put_u8(b'\n');
    buf.freeze()
}
