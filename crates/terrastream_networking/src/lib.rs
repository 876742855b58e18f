//! # TERRASTREAM Networking
//!
//! Versioned chunk streaming between an authoritative server and clients.
//!
//! ## Architecture
//!
//! - **Protocol**: compact binary messages; surfaces and lights travel LZ4-compressed
//! - **Server**: world with copy-on-write chunks, nearest-first job queue, worker pool
//! - **Client**: request batching, per-chunk versions, desync recovery
//! - **Transport**: in-process loopback or length-prefixed TCP
//!
//! ## Guarantees
//!
//! - A surface the client already holds at the current version is never re-sent
//! - No surface is requested before its column height is known
//! - Air chunks are answered with a height, never with a surface
//!
//! ```text
//! CLIENT                                 SERVER
//!   |                                      |
//!   |--- RequestSurfaces (pos, v) -------->|
//!   |                                      | <- height known? air? current?
//!   |<-- SurfaceUpdate / HeightmapUpdate --|
//!   |                                      |
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use terrastream_networking::{LoopbackTransport, StreamServer, ServerConfig};
//!
//! let server = Arc::new(StreamServer::start(ServerConfig::default(), world)?);
//! let mut transport = LoopbackTransport::connect(&server);
//! transport.send(&client.hello())?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod client;
pub mod protocol;
pub mod server;
pub mod transport;

// Re-exports for convenience
pub use client::{ClientConfig, ClientEvent, ClientState, StreamClient};
pub use protocol::{decode_message, encode_message, HeightRecord, Message, PacketType, SurfaceRequest};
pub use server::{
    ClientConnection, ConnectionId, FlatTerrain, HeightChange, ServerConfig, ServerStats, StreamServer, TerrainSource,
    World, WorldConfig,
};
pub use transport::{ClientTransport, LoopbackTransport, TcpClientTransport, TcpServer, TransportStats};
