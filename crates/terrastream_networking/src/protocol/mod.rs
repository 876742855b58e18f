//! # Streaming Protocol
//!
//! Versioned request/response messages between client and server.
//!
//! ## Exchange
//!
//! ```text
//! CLIENT                                    SERVER
//!   |--- Hello ------------------------------->|
//!   |<-- Hello --------------------------------|
//!   |--- RequestHeights [cols] --------------->|
//!   |<-- HeightmapUpdate [(col, h)] -----------|
//!   |--- RequestSurfaces [(pos, version)] ---->|
//!   |<-- SurfaceUpdate (pos, v', surf, light) -|   v' != version
//!   |<-- HeightmapUpdate (col, h) -------------|   air chunk, no surface
//!   |                                          |   v' == version: nothing
//!   |--- ViewerMoved (pos) ------------------->|   re-prioritizes jobs
//! ```

mod packets;
mod serialization;

pub use packets::{HeightRecord, Message, PacketType, SurfaceRequest};
pub use serialization::{
    decode_message, encode_message, PacketDeserializer, PacketSerializer, MAX_LIST_LEN, MAX_PAYLOAD_SIZE,
};
