//! Stream framing conventions of the product under test.
//!
//! Stream connections carry discrete units; how a unit is delimited is
//! decided by the product, never inferred from how the kernel happened to
//! split reads. Datagram sockets always use one message per call and
//! ignore the framing except for [`Framing::encode`] on stream relays.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{io_err, SocketError};

/// Largest unit accepted from the wire.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Largest datagram accepted, above the default Linux socket buffer size.
pub const MAX_DATAGRAM_BYTES: usize = 256 * 1024;

const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// 4-byte little-endian length header, then the payload.
    #[default]
    LengthPrefixedLe,
    /// 4-byte big-endian length header, then the payload.
    LengthPrefixedBe,
    /// Payload terminated by `\n` (terminator not part of the payload).
    Newline,
    /// Whatever a single read returns.
    Raw,
}

impl std::str::FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "le" | "length-le" | "length_prefixed_le" => Ok(Framing::LengthPrefixedLe),
            "be" | "length-be" | "length_prefixed_be" => Ok(Framing::LengthPrefixedBe),
            "newline" | "line" => Ok(Framing::Newline),
            "raw" => Ok(Framing::Raw),
            other => Err(format!(
                "unknown framing '{other}'; expected: le, be, newline, raw"
            )),
        }
    }
}

impl Framing {
    /// Wire bytes for one unit.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, SocketError> {
        if payload.len() > MAX_FRAME_BYTES {
            return Err(SocketError::Protocol(format!(
                "payload of {} bytes exceeds frame limit {MAX_FRAME_BYTES}",
                payload.len()
            )));
        }
        let len = payload.len() as u32;
        let mut out = Vec::with_capacity(payload.len() + HEADER_LEN);
        match self {
            Framing::LengthPrefixedLe => {
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(payload);
            }
            Framing::LengthPrefixedBe => {
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(payload);
            }
            Framing::Newline => {
                out.extend_from_slice(payload);
                out.push(b'\n');
            }
            Framing::Raw => out.extend_from_slice(payload),
        }
        Ok(out)
    }

    /// Split one complete unit off the front of `pending`.
    ///
    /// `Ok(None)` means more bytes are needed; nothing is consumed then, so
    /// a reader can stop at any point and resume with the same buffer.
    pub fn decode(&self, pending: &mut Vec<u8>, address: &str) -> Result<Option<Vec<u8>>, SocketError> {
        match self {
            Framing::LengthPrefixedLe | Framing::LengthPrefixedBe => {
                let Some(header) = pending.get(..HEADER_LEN) else {
                    return Ok(None);
                };
                let mut raw = [0u8; HEADER_LEN];
                raw.copy_from_slice(header);
                let len = match self {
                    Framing::LengthPrefixedBe => u32::from_be_bytes(raw),
                    _ => u32::from_le_bytes(raw),
                } as usize;
                if len > MAX_FRAME_BYTES {
                    return Err(SocketError::Protocol(format!(
                        "frame header announces {len} bytes (limit {MAX_FRAME_BYTES}) on {address}"
                    )));
                }
                if pending.len() < HEADER_LEN + len {
                    return Ok(None);
                }
                let payload = pending[HEADER_LEN..HEADER_LEN + len].to_vec();
                pending.drain(..HEADER_LEN + len);
                Ok(Some(payload))
            }
            Framing::Newline => match pending.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    let line = pending[..end].to_vec();
                    pending.drain(..=end);
                    Ok(Some(line))
                }
                None if pending.len() > MAX_FRAME_BYTES => Err(SocketError::Protocol(format!(
                    "line exceeds frame limit {MAX_FRAME_BYTES} on {address}"
                ))),
                None => Ok(None),
            },
            Framing::Raw if pending.is_empty() => Ok(None),
            Framing::Raw => Ok(Some(std::mem::take(pending))),
        }
    }

    /// What is left in `pending` once the peer closed the stream.
    ///
    /// A trailing unterminated line still counts as a unit; half a length
    /// prefixed frame does not.
    pub fn finish(&self, pending: &mut Vec<u8>, address: &str) -> Result<Option<Vec<u8>>, SocketError> {
        if let Some(unit) = self.decode(pending, address)? {
            return Ok(Some(unit));
        }
        match self {
            _ if pending.is_empty() => Ok(None),
            Framing::Newline => Ok(Some(std::mem::take(pending))),
            _ => Err(io_err(
                address,
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream closed inside a frame ({} bytes pending)", pending.len()),
                ),
            )),
        }
    }

    /// Read one unit. `Ok(None)` means the peer closed cleanly between units.
    pub async fn read_frame<R>(
        &self,
        reader: &mut R,
        address: &str,
    ) -> Result<Option<Vec<u8>>, SocketError>
    where
        R: AsyncBufRead + Unpin,
    {
        match self {
            Framing::LengthPrefixedLe | Framing::LengthPrefixedBe => {
                let mut header = [0u8; HEADER_LEN];
                if !read_header(reader, &mut header, address).await? {
                    return Ok(None);
                }
                let len = match self {
                    Framing::LengthPrefixedBe => u32::from_be_bytes(header),
                    _ => u32::from_le_bytes(header),
                } as usize;
                if len > MAX_FRAME_BYTES {
                    return Err(SocketError::Protocol(format!(
                        "frame header announces {len} bytes (limit {MAX_FRAME_BYTES}) on {address}"
                    )));
                }
                let mut payload = vec![0u8; len];
                reader
                    .read_exact(&mut payload)
                    .await
                    .map_err(|e| io_err(address, e))?;
                Ok(Some(payload))
            }
            Framing::Newline => {
                let mut line = Vec::new();
                let read = reader
                    .take(MAX_FRAME_BYTES as u64 + 1)
                    .read_until(b'\n', &mut line)
                    .await
                    .map_err(|e| io_err(address, e))?;
                if read == 0 {
                    return Ok(None);
                }
                if line.last() == Some(&b'\n') {
                    line.pop();
                } else if line.len() > MAX_FRAME_BYTES {
                    return Err(SocketError::Protocol(format!(
                        "line exceeds frame limit {MAX_FRAME_BYTES} on {address}"
                    )));
                }
                Ok(Some(line))
            }
            Framing::Raw => {
                let mut buf = vec![0u8; MAX_FRAME_BYTES];
                let read = reader
                    .read(&mut buf)
                    .await
                    .map_err(|e| io_err(address, e))?;
                if read == 0 {
                    return Ok(None);
                }
                buf.truncate(read);
                Ok(Some(buf))
            }
        }
    }
}

/// Receive buffer one byte over the limit, so an oversized datagram is
/// detected instead of silently cut to the buffer size.
pub(crate) fn datagram_buffer() -> Vec<u8> {
    vec![0u8; MAX_DATAGRAM_BYTES + 1]
}

pub(crate) fn datagram_payload(buf: &[u8], n: usize, address: &str) -> Result<Vec<u8>, SocketError> {
    if n > MAX_DATAGRAM_BYTES {
        return Err(SocketError::Protocol(format!(
            "datagram on {address} exceeds {MAX_DATAGRAM_BYTES} bytes and was truncated"
        )));
    }
    Ok(buf[..n].to_vec())
}

/// Fill `header`; `false` when the stream ended before its first byte.
async fn read_header<R>(
    reader: &mut R,
    header: &mut [u8; HEADER_LEN],
    address: &str,
) -> Result<bool, SocketError>
where
    R: AsyncBufRead + Unpin,
{
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader
            .read(&mut header[filled..])
            .await
            .map_err(|e| io_err(address, e))?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(io_err(
                address,
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream closed inside a frame header",
                ),
            ));
        }
        filled += n;
    }
    Ok(true)
}
