//! # Packet Serialization
//!
//! Little-endian binary encoding of [`Message`]s.
//!
//! ```text
//! ┌──────────┬──────────────────────────────────────────────┐
//! │ type (1) │ body (depends on type)                       │
//! └──────────┴──────────────────────────────────────────────┘
//! ```
//!
//! Lists carry a `u32` count, payloads a `u32` byte length. Framing on a
//! stream transport is the transport's business.

use terrastream_core::{ChunkCoord, CoarseHeight, ColumnCoord, CompressedData, StreamError, StreamResult};

use super::packets::{HeightRecord, Message, PacketType, SurfaceRequest};

/// Largest payload accepted for one surface or light blob.
pub const MAX_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

/// Largest list accepted in one message.
pub const MAX_LIST_LEN: usize = 65_536;

/// Packet serializer - writes messages to a reusable buffer.
#[derive(Debug, Default)]
pub struct PacketSerializer {
    buffer: Vec<u8>,
}

impl PacketSerializer {
    /// Creates a new serializer.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Resets the serializer for reuse.
    #[inline]
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Returns the number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns a slice of the written data.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes a u16 in little-endian format.
    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u32 in little-endian format.
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes an i32 in little-endian format.
    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn write_len(&mut self, len: usize) {
        // Lists and payloads are bounded far below u32::MAX by the producers.
        self.write_u32(u32::try_from(len).unwrap_or(u32::MAX));
    }

    /// Writes a chunk coordinate.
    pub fn write_chunk(&mut self, pos: ChunkCoord) {
        self.write_i32(pos.x);
        self.write_i32(pos.y);
        self.write_i32(pos.z);
    }

    /// Writes a column coordinate.
    pub fn write_column(&mut self, col: ColumnCoord) {
        self.write_i32(col.x);
        self.write_i32(col.y);
    }

    /// Writes a length-prefixed payload.
    pub fn write_payload(&mut self, data: &CompressedData) {
        self.write_len(data.len());
        self.buffer.extend_from_slice(&data.0);
    }

    /// Serializes a complete message, replacing previous contents.
    pub fn serialize(&mut self, message: &Message) -> &[u8] {
        self.reset();
        self.write_u8(message.packet_type() as u8);
        match message {
            Message::Hello { protocol_version } => self.write_u16(*protocol_version),
            Message::RequestSurfaces { requests } => {
                self.write_len(requests.len());
                for request in requests {
                    self.write_chunk(request.pos);
                    self.write_u32(request.known_version);
                }
            }
            Message::SurfaceUpdate {
                pos,
                version,
                surface,
                light,
            } => {
                self.write_chunk(*pos);
                self.write_u32(*version);
                self.write_payload(surface);
                self.write_payload(light);
            }
            Message::RequestHeights { columns } => {
                self.write_len(columns.len());
                for col in columns {
                    self.write_column(*col);
                }
            }
            Message::HeightmapUpdate { records } => {
                self.write_len(records.len());
                for record in records {
                    self.write_column(record.column);
                    self.write_i32(record.height.0);
                }
            }
            Message::ViewerMoved { pos } => self.write_chunk(*pos),
            Message::Disconnect => {}
        }
        &self.buffer
    }
}

/// Packet deserializer - reads one message from a buffer.
pub struct PacketDeserializer<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> PacketDeserializer<'a> {
    /// Creates a new deserializer from a buffer.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Returns the number of bytes remaining.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(n)?;
        let slice = self.buffer.get(self.position..end)?;
        self.position = end;
        Some(slice)
    }

    /// Reads a single byte.
    #[inline]
    pub fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    /// Reads a u16 in little-endian format.
    #[inline]
    pub fn read_u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    /// Reads a u32 in little-endian format.
    #[inline]
    pub fn read_u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads an i32 in little-endian format.
    #[inline]
    pub fn read_i32(&mut self) -> Option<i32> {
        self.take(4).map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a chunk coordinate.
    pub fn read_chunk(&mut self) -> Option<ChunkCoord> {
        Some(ChunkCoord::new(self.read_i32()?, self.read_i32()?, self.read_i32()?))
    }

    /// Reads a column coordinate.
    pub fn read_column(&mut self) -> Option<ColumnCoord> {
        Some(ColumnCoord::new(self.read_i32()?, self.read_i32()?))
    }

    fn read_len(&mut self, max: usize) -> StreamResult<usize> {
        let len = self.read_u32().ok_or_else(truncated)? as usize;
        if len > max {
            return Err(StreamError::Decode(format!("length {len} exceeds limit {max}")));
        }
        Ok(len)
    }

    /// Reads a length-prefixed payload.
    ///
    /// # Errors
    ///
    /// [`StreamError::Decode`] when truncated or oversized.
    pub fn read_payload(&mut self) -> StreamResult<CompressedData> {
        let len = self.read_len(MAX_PAYLOAD_SIZE)?;
        let bytes = self.take(len).ok_or_else(truncated)?;
        Ok(CompressedData(bytes.to_vec()))
    }

    /// Deserializes a message. Trailing bytes are an error.
    ///
    /// # Errors
    ///
    /// [`StreamError::Decode`] on unknown types, truncation, oversized lists
    /// or trailing garbage.
    pub fn deserialize(&mut self) -> StreamResult<Message> {
        let type_byte = self.read_u8().ok_or_else(truncated)?;
        let packet_type = PacketType::from_u8(type_byte)
            .ok_or_else(|| StreamError::Decode(format!("unknown packet type {type_byte}")))?;

        let message = match packet_type {
            PacketType::Hello => Message::Hello {
                protocol_version: self.read_u16().ok_or_else(truncated)?,
            },
            PacketType::RequestSurfaces => {
                let count = self.read_len(MAX_LIST_LEN)?;
                let mut requests = Vec::with_capacity(count);
                for _ in 0..count {
                    let pos = self.read_chunk().ok_or_else(truncated)?;
                    let known_version = self.read_u32().ok_or_else(truncated)?;
                    requests.push(SurfaceRequest::new(pos, known_version));
                }
                Message::RequestSurfaces { requests }
            }
            PacketType::SurfaceUpdate => Message::SurfaceUpdate {
                pos: self.read_chunk().ok_or_else(truncated)?,
                version: self.read_u32().ok_or_else(truncated)?,
                surface: self.read_payload()?,
                light: self.read_payload()?,
            },
            PacketType::RequestHeights => {
                let count = self.read_len(MAX_LIST_LEN)?;
                let mut columns = Vec::with_capacity(count);
                for _ in 0..count {
                    columns.push(self.read_column().ok_or_else(truncated)?);
                }
                Message::RequestHeights { columns }
            }
            PacketType::HeightmapUpdate => {
                let count = self.read_len(MAX_LIST_LEN)?;
                let mut records = Vec::with_capacity(count);
                for _ in 0..count {
                    let column = self.read_column().ok_or_else(truncated)?;
                    let height = CoarseHeight(self.read_i32().ok_or_else(truncated)?);
                    records.push(HeightRecord::new(column, height));
                }
                Message::HeightmapUpdate { records }
            }
            PacketType::ViewerMoved => Message::ViewerMoved {
                pos: self.read_chunk().ok_or_else(truncated)?,
            },
            PacketType::Disconnect => Message::Disconnect,
        };

        if self.remaining() != 0 {
            return Err(StreamError::Decode(format!(
                "{} trailing bytes after {:?}",
                self.remaining(),
                packet_type
            )));
        }
        Ok(message)
    }
}

fn truncated() -> StreamError {
    StreamError::Decode("truncated packet".to_string())
}

/// Encodes a message into a fresh buffer.
#[must_use]
pub fn encode_message(message: &Message) -> Vec<u8> {
    let mut serializer = PacketSerializer::new();
    serializer.serialize(message);
    serializer.buffer
}

/// Decodes one message.
///
/// # Errors
///
/// See [`PacketDeserializer::deserialize`].
pub fn decode_message(bytes: &[u8]) -> StreamResult<Message> {
    PacketDeserializer::new(bytes).deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_deserialize_surface_update() {
        let message = Message::SurfaceUpdate {
            pos: ChunkCoord::new(-3, 7, 1),
            version: 42,
            surface: CompressedData(vec![1, 2, 3, 4]),
            light: CompressedData(vec![9; 17]),
        };
        let bytes = encode_message(&message);
        assert_eq!(bytes[0], PacketType::SurfaceUpdate as u8);
        assert_eq!(decode_message(&bytes).expect("decode"), message);
    }

    #[test]
    fn test_serializer_reuse() {
        let mut serializer = PacketSerializer::new();
        let long = serializer
            .serialize(&Message::RequestHeights {
                columns: vec![ColumnCoord::new(1, 1); 10],
            })
            .len();
        let short = serializer.serialize(&Message::Disconnect).len();
        assert_eq!(long, 1 + 4 + 10 * 8);
        assert_eq!(short, 1);
    }

    #[test]
    fn test_height_records_keep_undefined() {
        let message = Message::HeightmapUpdate {
            records: vec![
                HeightRecord::new(ColumnCoord::new(0, 0), CoarseHeight::UNDEFINED),
                HeightRecord::new(ColumnCoord::new(-1, 5), CoarseHeight::new(3)),
            ],
        };
        assert_eq!(decode_message(&encode_message(&message)).expect("decode"), message);
    }

    #[test]
    fn test_rejects_malformed_packets() {
        assert!(decode_message(&[]).is_err());
        assert!(decode_message(&[200]).is_err());

        let mut truncated = encode_message(&Message::ViewerMoved {
            pos: ChunkCoord::new(1, 2, 3),
        });
        truncated.pop();
        assert!(decode_message(&truncated).is_err());

        let mut trailing = encode_message(&Message::Disconnect);
        trailing.push(0);
        assert!(decode_message(&trailing).is_err());

        // Claims u32::MAX requests.
        let huge = [PacketType::RequestSurfaces as u8, 0xff, 0xff, 0xff, 0xff];
        let err = decode_message(&huge).unwrap_err();
        assert!(err.is_desync());
    }
}
