use crate::error::CodecError;

/// Length-prefixed framing for record files and streams.
///
/// Each frame is a 4-byte big-endian payload length followed by the payload
/// (one encoded record).
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthPrefixed {
    /// Maximum payload size in bytes (0 = unlimited).
    pub max_payload: usize,
}

const LENGTH_BYTES: usize = 4;

impl LengthPrefixed {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Try to take one frame from the front of `buf`.
    ///
    /// `Ok(None)` means more bytes are needed. On success returns the payload
    /// and the number of bytes consumed.
    pub fn decode<'a>(&self, buf: &'a [u8]) -> Result<Option<(&'a [u8], usize)>, CodecError> {
        if buf.len() < LENGTH_BYTES {
            return Ok(None);
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        if self.max_payload > 0 && len > self.max_payload {
            return Err(CodecError::malformed(format!(
                "frame too large: {len} bytes (max {})",
                self.max_payload
            )));
        }

        let total = LENGTH_BYTES + len;
        if buf.len() < total {
            return Ok(None);
        }
        Ok(Some((&buf[LENGTH_BYTES..total], total)))
    }

    pub fn encode(&self, data: &[u8], buf: &mut Vec<u8>) -> Result<(), CodecError> {
        if self.max_payload > 0 && data.len() > self.max_payload {
            return Err(CodecError::malformed(format!(
                "frame too large: {} bytes (max {})",
                data.len(),
                self.max_payload
            )));
        }
        let len = u32::try_from(data.len())
            .map_err(|_| CodecError::malformed(format!("frame too large for 4-byte header: {}", data.len())))?;
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(data);
        Ok(())
    }

    /// Split a complete buffer into frames. A partial frame at the end is malformed.
    pub fn split<'a>(&self, mut buf: &'a [u8]) -> Result<Vec<&'a [u8]>, CodecError> {
        let mut frames = Vec::new();
        while !buf.is_empty() {
            match self.decode(buf)? {
                Some((frame, consumed)) => {
                    frames.push(frame);
                    buf = &buf[consumed..];
                }
                None => {
                    return Err(CodecError::malformed(format!(
                        "truncated frame: {} dangling bytes",
                        buf.len()
                    )));
                }
            }
        }
        Ok(frames)
    }
}
