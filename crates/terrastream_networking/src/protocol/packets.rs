//! # Packet Definitions
//!
//! Every message exchanged between a streaming client and server.
//!
//! Surface and light payloads travel as [`CompressedData`] exactly as the
//! server produced them; the client decodes them only once they reach its
//! chunk cache.

use terrastream_core::{ChunkCoord, CoarseHeight, ColumnCoord, CompressedData};

/// Types of packets in the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Bidirectional: protocol handshake.
    Hello = 0,
    /// Client -> Server: surfaces wanted, with the versions already held.
    RequestSurfaces = 1,
    /// Server -> Client: compressed surface and light of one chunk.
    SurfaceUpdate = 2,
    /// Client -> Server: column heights wanted.
    RequestHeights = 3,
    /// Server -> Client: coarse heights, solicited or not.
    HeightmapUpdate = 4,
    /// Client -> Server: the viewer entered a new chunk.
    ViewerMoved = 5,
    /// Bidirectional: connection is closing.
    Disconnect = 6,
}

impl PacketType {
    /// Parses a type byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Hello),
            1 => Some(Self::RequestSurfaces),
            2 => Some(Self::SurfaceUpdate),
            3 => Some(Self::RequestHeights),
            4 => Some(Self::HeightmapUpdate),
            5 => Some(Self::ViewerMoved),
            6 => Some(Self::Disconnect),
            _ => None,
        }
    }
}

/// One requested surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceRequest {
    /// Chunk wanted.
    pub pos: ChunkCoord,
    /// Surface version the client holds; 0 if none.
    pub known_version: u32,
}

impl SurfaceRequest {
    /// Creates a request.
    #[must_use]
    pub const fn new(pos: ChunkCoord, known_version: u32) -> Self {
        Self { pos, known_version }
    }
}

/// Coarse height of one column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeightRecord {
    /// The column.
    pub column: ColumnCoord,
    /// Its height.
    pub height: CoarseHeight,
}

impl HeightRecord {
    /// Creates a record.
    #[must_use]
    pub const fn new(column: ColumnCoord, height: CoarseHeight) -> Self {
        Self { column, height }
    }
}

/// A protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Handshake carrying the sender's protocol version.
    Hello {
        /// Protocol version.
        protocol_version: u16,
    },
    /// Batch of surface requests.
    RequestSurfaces {
        /// Requests, nearest first by convention.
        requests: Vec<SurfaceRequest>,
    },
    /// Surface and light of one chunk.
    SurfaceUpdate {
        /// Chunk.
        pos: ChunkCoord,
        /// Surface version, bumped on every regeneration.
        version: u32,
        /// Compressed [`terrastream_core::SurfaceData`].
        surface: CompressedData,
        /// Compressed [`terrastream_core::LightData`].
        light: CompressedData,
    },
    /// Batch of height requests.
    RequestHeights {
        /// Columns wanted.
        columns: Vec<ColumnCoord>,
    },
    /// Batch of heights.
    HeightmapUpdate {
        /// Height records.
        records: Vec<HeightRecord>,
    },
    /// Viewer position, used to prioritize the sender's jobs.
    ViewerMoved {
        /// Chunk the viewer is in.
        pos: ChunkCoord,
    },
    /// Connection is closing.
    Disconnect,
}

impl Message {
    /// Returns the packet type.
    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        match self {
            Self::Hello { .. } => PacketType::Hello,
            Self::RequestSurfaces { .. } => PacketType::RequestSurfaces,
            Self::SurfaceUpdate { .. } => PacketType::SurfaceUpdate,
            Self::RequestHeights { .. } => PacketType::RequestHeights,
            Self::HeightmapUpdate { .. } => PacketType::HeightmapUpdate,
            Self::ViewerMoved { .. } => PacketType::ViewerMoved,
            Self::Disconnect => PacketType::Disconnect,
        }
    }

    /// Height-only reply for a single column.
    #[must_use]
    pub fn single_height(column: ColumnCoord, height: CoarseHeight) -> Self {
        Self::HeightmapUpdate {
            records: vec![HeightRecord::new(column, height)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_bytes() {
        for byte in 0..=6u8 {
            let ty = PacketType::from_u8(byte).expect("known type");
            assert_eq!(ty as u8, byte);
        }
        assert_eq!(PacketType::from_u8(7), None);
    }

    #[test]
    fn test_message_types() {
        assert_eq!(Message::Disconnect.packet_type(), PacketType::Disconnect);
        let msg = Message::single_height(ColumnCoord::new(1, 2), CoarseHeight::new(3));
        assert_eq!(msg.packet_type(), PacketType::HeightmapUpdate);
    }
}
