//! Framing codec
//!
//! Every packet is a 5-byte header followed by the payload:
//!
//! ```text
//! ┌──────────┬───────────────────────┬─────────────────────┐
//! │ type: u8 │ length: u32 (BE)      │ payload (length B)  │
//! └──────────┴───────────────────────┴─────────────────────┘
//! ```
//!
//! A stream that ends exactly on a packet boundary is a clean end of stream;
//! ending anywhere else is a truncation error.

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::constants::{HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::error::ProtocolError;
use crate::protocol::packet::{Packet, PacketType};

/// Encode a packet into a single contiguous buffer
pub fn encode(kind: PacketType, payload: &[u8]) -> Result<Bytes, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u8(kind.tag());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Decode one packet from a complete buffer.
///
/// Returns `Ok(None)` for an empty buffer, mirroring [`read_packet`] at a
/// clean end of stream.
pub fn decode(mut data: &[u8]) -> Result<Option<Packet>, ProtocolError> {
    read_packet(&mut data)
}

/// Read until `buf` is full or the stream ends; returns the bytes read
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<usize, ProtocolError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Read the next packet.
///
/// `Ok(None)` means the peer closed the stream before the first header byte.
pub fn read_packet<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Packet>, ProtocolError> {
    let mut header = [0u8; HEADER_SIZE];
    let got = read_full(reader, &mut header)?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_SIZE {
        return Err(ProtocolError::Truncated {
            expected: HEADER_SIZE,
            received: got,
        });
    }

    let kind = PacketType::from(header[0]);
    let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if length > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(length));
    }

    let mut payload = vec![0u8; length];
    let got = read_full(reader, &mut payload)?;
    if got < length {
        return Err(ProtocolError::Truncated {
            expected: length,
            received: got,
        });
    }

    Ok(Some(Packet::new(kind, payload)))
}

/// Write side of a packet stream.
///
/// All senders share one lock so the bytes of two packets never interleave.
pub struct PacketWriter<W: Write> {
    inner: Mutex<W>,
}

impl<W: Write> PacketWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Write header and payload as one unit
    pub fn send(&self, kind: PacketType, payload: &[u8]) -> Result<(), ProtocolError> {
        let frame = encode(kind, payload)?;
        let mut inner = self.inner.lock();
        inner.write_all(&frame)?;
        inner.flush()?;
        Ok(())
    }

    /// Like [`PacketWriter::send`], but give up if another sender keeps the
    /// stream for longer than `wait`
    pub fn send_within(
        &self,
        kind: PacketType,
        payload: &[u8],
        wait: Duration,
    ) -> Result<(), ProtocolError> {
        let frame = encode(kind, payload)?;
        let mut inner = self.inner.try_lock_for(wait).ok_or_else(|| {
            io::Error::new(io::ErrorKind::TimedOut, "stream busy with another sender")
        })?;
        inner.write_all(&frame)?;
        inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}
