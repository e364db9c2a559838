use std::io::{Read, Write};

use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::constant::{DEFAULT_MAX_PAYLOAD_SIZE, MAX_FRAME_PAYLOAD};
use crate::error::{Error, Result};

/// MySQL packet header (zero-copy)
///
/// Layout matches MySQL wire protocol:
/// - length: 3 bytes (little-endian, payload length)
/// - sequence_id: 1 byte
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct PacketHeader {
    pub length: [u8; 3],
    pub sequence_id: u8,
}

impl PacketHeader {
    pub fn encode(length: usize, sequence_id: u8) -> Self {
        let len = u32::to_le_bytes(length as u32);
        Self {
            length: [len[0], len[1], len[2]],
            sequence_id,
        }
    }

    pub fn length(&self) -> usize {
        u32::from_le_bytes([self.length[0], self.length[1], self.length[2], 0]) as usize
    }
}

/// A reassembled payload and the sequence id of its first frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sequence_id: u8,
    pub payload: Vec<u8>,
}

/// Frames payloads onto a byte stream and reassembles them
///
/// The codec owns the per-connection sequence counter but not the stream, so
/// the same codec drives a `TcpStream`, a `BufReader` or an in-memory buffer.
#[derive(Debug)]
pub struct PacketCodec {
    sequence_id: u8,
    max_payload_size: usize,
}

impl PacketCodec {
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            sequence_id: 0,
            max_payload_size,
        }
    }

    /// The sequence id the next frame (read or written) must carry
    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    /// Start a new command: the next frame is sequence 0
    pub fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Read one complete payload into `buffer`, concatenating 16MB continuation frames.
    ///
    /// Returns the sequence id of the first frame.
    #[tracing::instrument(skip_all)]
    pub fn read_payload<R: Read>(&mut self, reader: &mut R, buffer: &mut Vec<u8>) -> Result<u8> {
        buffer.clear();

        let first_sequence_id = self.sequence_id;
        loop {
            let mut header = PacketHeader::new_zeroed();
            reader.read_exact(header.as_mut_bytes())?;

            if header.sequence_id != self.sequence_id {
                return Err(Error::SequenceMismatch {
                    expected: self.sequence_id,
                    actual: header.sequence_id,
                });
            }
            self.sequence_id = self.sequence_id.wrapping_add(1);

            let length = header.length();
            let total = buffer.len() + length;
            if total > self.max_payload_size {
                return Err(Error::PayloadTooLarge {
                    size: total,
                    limit: self.max_payload_size,
                });
            }

            let start = buffer.len();
            buffer.resize(total, 0);
            reader.read_exact(&mut buffer[start..])?;

            tracing::trace!(length, sequence_id = header.sequence_id, "read frame");

            if length < MAX_FRAME_PAYLOAD {
                return Ok(first_sequence_id);
            }
        }
    }

    /// Read one complete payload into a fresh [`Packet`]
    pub fn read_packet<R: Read>(&mut self, reader: &mut R) -> Result<Packet> {
        let mut payload = Vec::new();
        let sequence_id = self.read_payload(reader, &mut payload)?;
        Ok(Packet {
            sequence_id,
            payload,
        })
    }

    /// Write a payload, splitting it into 16MB frames.
    ///
    /// When the last chunk is exactly `0xFFFFFF` bytes an empty frame follows it.
    /// An empty payload is sent as a single empty frame.
    #[tracing::instrument(skip_all)]
    pub fn write_payload<W: Write>(&mut self, writer: &mut W, payload: &[u8]) -> Result<()> {
        let mut remaining = payload;
        loop {
            let chunk_size = remaining.len().min(MAX_FRAME_PAYLOAD);
            let chunk;
            (chunk, remaining) = remaining.split_at(chunk_size);

            let header = PacketHeader::encode(chunk_size, self.sequence_id);
            writer.write_all(header.as_bytes())?;
            writer.write_all(chunk)?;

            tracing::trace!(length = chunk_size, sequence_id = self.sequence_id, "wrote frame");
            self.sequence_id = self.sequence_id.wrapping_add(1);

            if chunk_size < MAX_FRAME_PAYLOAD {
                break;
            }
        }

        writer.flush()?;
        Ok(())
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_SIZE)
    }
}
