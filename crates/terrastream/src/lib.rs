//! # TERRASTREAM
//!
//! Bounded-memory streaming of an effectively infinite voxel world.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              TERRASTREAM                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐   │
//! │  │   SERVER        │     │   PROTOCOL      │     │   CLIENT        │   │
//! │  │                 │────>│                 │────>│                 │   │
//! │  │  • World        │     │  • Surfaces     │     │  • ChunkCache   │   │
//! │  │  • Job queue    │<────│  • Heights      │<────│  • Scene        │   │
//! │  │  • Extraction   │     │  • Versions     │     │  • Mesh workers │   │
//! │  └─────────────────┘     └─────────────────┘     └─────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: TOML configuration shared by both binaries
//! - `session`: the client frame loop

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod session;

pub use config::StreamingConfig;
pub use session::ClientSession;

// Re-export the member crates
pub use terrastream_core as core;
pub use terrastream_networking as networking;
pub use terrastream_rendering as rendering;

use std::sync::Arc;

use terrastream_core::{MaterialRegistry, MemoryStore, StreamResult, UniformLight};
use terrastream_networking::{FlatTerrain, StreamServer, World};

/// Routes `tracing` events (through the `log` facade) to stderr.
/// `RUST_LOG` overrides the default `info` filter. Returns false if a logger
/// was already installed.
pub fn init_logging() -> bool {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init()
        .is_ok()
}

/// Starts a server over the flat reference terrain with uniform lighting
/// and an in-memory store.
///
/// # Errors
///
/// Worker spawn failures or an invalid server configuration.
pub fn reference_server(config: &StreamingConfig) -> StreamResult<Arc<StreamServer>> {
    let world = Arc::new(World::new(
        config.server_config().world,
        Arc::new(FlatTerrain::new(config.server.ground_level)),
        Arc::new(UniformLight::default()),
        Arc::new(MaterialRegistry::with_defaults()),
        Arc::new(MemoryStore::new()),
    ));
    log::debug!("Reference terrain ground level: {}", config.server.ground_level);
    Ok(Arc::new(StreamServer::start(config.server_config(), world)?))
}
