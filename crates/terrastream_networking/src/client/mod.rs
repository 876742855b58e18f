//! # Stream Client
//!
//! Client-side request bookkeeping for chunk streaming.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      STREAM CLIENT                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │ Requests     │  │ Versions     │  │ Inbound      │      │
//! │  │ (batched,    │  │ (per chunk)  │  │ (cache +     │      │
//! │  │  deduped)    │  │              │  │  events)     │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │         │                 │                 │               │
//! │         └────────────────┼─────────────────┘               │
//! │                          │                                  │
//! │              ┌───────────▼───────────┐                     │
//! │              │     ChunkCache        │                     │
//! │              │  (surfaces, lights,   │                     │
//! │              │   heights)            │                     │
//! │              └───────────────────────┘                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The client never asks for a surface while its column height is
//! undefined: it asks for the height first and requests the surface once
//! the height shows the chunk is not air.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use terrastream_core::{ChunkCache, ChunkCoord, CoarseHeight, ColumnCoord, StreamResult, PROTOCOL_VERSION};

use crate::protocol::{HeightRecord, Message, SurfaceRequest};

/// Client state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientState {
    /// No handshake yet.
    #[default]
    Disconnected,
    /// Hello sent, waiting for the server's.
    Connecting,
    /// Handshake done.
    Connected,
}

/// Client configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Maximum entries per request message.
    pub request_batch: usize,
    /// Requests unanswered for this long are sent again.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_batch: 64,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Something the rest of the client must react to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// The server accepted the handshake.
    Connected {
        /// Server protocol version.
        protocol_version: u16,
    },
    /// A new surface/light pair is in the cache.
    SurfaceUpdated(ChunkCoord),
    /// A column height changed.
    HeightChanged {
        /// The column.
        column: ColumnCoord,
        /// New height.
        new: CoarseHeight,
        /// Previous height, undefined if it was unknown.
        old: CoarseHeight,
    },
    /// Received data for the chunk was inconsistent and has been re-requested.
    Desync(ChunkCoord),
    /// The server closed the connection.
    Disconnected,
}

/// Client streaming state.
pub struct StreamClient {
    config: ClientConfig,
    state: ClientState,
    cache: Arc<ChunkCache>,
    known_versions: HashMap<ChunkCoord, u32>,
    pending_surfaces: HashMap<ChunkCoord, Instant>,
    pending_heights: HashMap<ColumnCoord, Instant>,
    awaiting_height: HashMap<ColumnCoord, Vec<ChunkCoord>>,
    queued_surfaces: Vec<SurfaceRequest>,
    queued_heights: Vec<ColumnCoord>,
    events: Sender<ClientEvent>,
    desyncs: u64,
}

impl StreamClient {
    /// Creates a client writing into `cache`. Events arrive on the returned receiver.
    #[must_use]
    pub fn new(config: ClientConfig, cache: Arc<ChunkCache>) -> (Self, Receiver<ClientEvent>) {
        let (events, rx) = crossbeam_channel::unbounded();
        let client = Self {
            config,
            state: ClientState::Disconnected,
            cache,
            known_versions: HashMap::new(),
            pending_surfaces: HashMap::new(),
            pending_heights: HashMap::new(),
            awaiting_height: HashMap::new(),
            queued_surfaces: Vec::new(),
            queued_heights: Vec::new(),
            events,
            desyncs: 0,
        };
        (client, rx)
    }

    /// Returns the current client state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> ClientState {
        self.state
    }

    /// The cache this client fills.
    #[must_use]
    pub fn cache(&self) -> &Arc<ChunkCache> {
        &self.cache
    }

    /// Handshake message.
    #[must_use]
    pub fn hello(&mut self) -> Message {
        self.state = ClientState::Connecting;
        Message::Hello {
            protocol_version: PROTOCOL_VERSION,
        }
    }

    /// Viewer position report.
    #[must_use]
    pub const fn viewer_moved(pos: ChunkCoord) -> Message {
        Message::ViewerMoved { pos }
    }

    /// Version of `pos` last received.
    #[must_use]
    pub fn known_version(&self, pos: ChunkCoord) -> Option<u32> {
        self.known_versions.get(&pos).copied()
    }

    /// Outstanding surface and height requests.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending_surfaces.len() + self.pending_heights.len()
    }

    /// Number of desyncs recovered from so far.
    #[must_use]
    pub const fn desyncs(&self) -> u64 {
        self.desyncs
    }

    fn queue_height(&mut self, col: ColumnCoord, now: Instant) {
        if self.pending_heights.insert(col, now).is_none() {
            self.queued_heights.push(col);
        }
    }

    /// Asks for the surface of `pos`, or for its column height first.
    ///
    /// Air chunks and chunks already requested are skipped.
    pub fn request_chunk(&mut self, pos: ChunkCoord) {
        if self.pending_surfaces.contains_key(&pos) {
            return;
        }
        let col = pos.column();
        let height = self.cache.height(col);
        if !height.is_defined() {
            let waiting = self.awaiting_height.entry(col).or_default();
            if !waiting.contains(&pos) {
                waiting.push(pos);
            }
            self.queue_height(col, Instant::now());
            return;
        }
        if height.is_air_chunk(pos) {
            return;
        }

        // A known version is only worth sending while the data is still held.
        let known = if self.cache.contains_pair(pos) {
            self.known_version(pos).unwrap_or(0)
        } else {
            0
        };
        if known == 0 {
            self.pending_surfaces.insert(pos, Instant::now());
        }
        self.queued_surfaces.push(SurfaceRequest::new(pos, known));
    }

    /// Forgets everything about `pos` and requests it from scratch.
    pub fn refetch(&mut self, pos: ChunkCoord) {
        self.known_versions.remove(&pos);
        self.pending_surfaces.remove(&pos);
        self.cache.invalidate(pos);
        tracing::debug!("Re-requesting chunk {} from scratch", pos);
        self.request_chunk(pos);
    }

    /// Forgets the versions of chunks whose data has left the cache.
    /// Returns how many were dropped.
    pub fn forget_evicted(&mut self) -> usize {
        let before = self.known_versions.len();
        let cache = &self.cache;
        self.known_versions.retain(|pos, _| cache.contains_pair(*pos));
        let dropped = before - self.known_versions.len();
        if dropped > 0 {
            tracing::trace!("Forgot versions of {} evicted chunks", dropped);
        }
        dropped
    }

    /// Drains queued requests into batched messages, heights first.
    #[must_use]
    pub fn flush(&mut self) -> Vec<Message> {
        let batch = self.config.request_batch.max(1);
        let mut messages = Vec::new();
        for columns in self.queued_heights.chunks(batch) {
            messages.push(Message::RequestHeights {
                columns: columns.to_vec(),
            });
        }
        for requests in self.queued_surfaces.chunks(batch) {
            messages.push(Message::RequestSurfaces {
                requests: requests.to_vec(),
            });
        }
        self.queued_heights.clear();
        self.queued_surfaces.clear();
        messages
    }

    /// Re-queues requests older than the timeout. Returns how many.
    pub fn resend_stale(&mut self, now: Instant) -> usize {
        let timeout = self.config.request_timeout;
        let mut resent = 0;
        for (pos, sent) in &mut self.pending_surfaces {
            if now.duration_since(*sent) >= timeout {
                *sent = now;
                self.queued_surfaces.push(SurfaceRequest::new(*pos, 0));
                resent += 1;
            }
        }
        for (col, sent) in &mut self.pending_heights {
            if now.duration_since(*sent) >= timeout {
                *sent = now;
                self.queued_heights.push(*col);
                resent += 1;
            }
        }
        if resent > 0 {
            tracing::debug!("Re-sending {} stale requests", resent);
        }
        resent
    }

    fn emit(&self, event: ClientEvent) {
        // Nobody listening is not an error for the stream itself.
        let _ = self.events.send(event);
    }

    /// Applies one message from the server.
    ///
    /// # Errors
    ///
    /// Store write-through failures. Inconsistent payloads are not errors:
    /// they are dropped and re-requested.
    pub fn handle(&mut self, message: Message) -> StreamResult<()> {
        match message {
            Message::Hello { protocol_version } => {
                if protocol_version == PROTOCOL_VERSION {
                    self.state = ClientState::Connected;
                    tracing::info!("Connected to server (protocol {})", protocol_version);
                } else {
                    tracing::warn!(
                        "Server speaks protocol {} (expected {})",
                        protocol_version,
                        PROTOCOL_VERSION
                    );
                }
                self.emit(ClientEvent::Connected { protocol_version });
            }
            Message::SurfaceUpdate {
                pos,
                version,
                surface,
                light,
            } => {
                self.pending_surfaces.remove(&pos);
                match self.cache.store_pair(pos, &surface, &light) {
                    Ok(_) => {
                        self.known_versions.insert(pos, version);
                        self.emit(ClientEvent::SurfaceUpdated(pos));
                    }
                    Err(e) if e.is_desync() => {
                        tracing::warn!("Desync on chunk {}: {}", pos, e);
                        self.desyncs += 1;
                        self.emit(ClientEvent::Desync(pos));
                        self.refetch(pos);
                    }
                    Err(e) => return Err(e),
                }
            }
            Message::HeightmapUpdate { records } => {
                for record in records {
                    self.apply_height(record)?;
                }
            }
            Message::Disconnect => {
                self.state = ClientState::Disconnected;
                tracing::info!("Server closed the connection");
                self.emit(ClientEvent::Disconnected);
            }
            other => {
                tracing::warn!("Unexpected {:?} from server; ignored", other.packet_type());
            }
        }
        Ok(())
    }

    fn apply_height(&mut self, record: HeightRecord) -> StreamResult<()> {
        let HeightRecord { column, height } = record;
        self.pending_heights.remove(&column);
        let old = self.cache.set_height(column, height)?;

        // Outstanding surface requests that turned out to be air get no other reply.
        self.pending_surfaces
            .retain(|pos, _| pos.column() != column || !height.is_air_chunk(*pos));

        if old != height {
            tracing::trace!("Column {} height {} -> {}", column, old, height);
            self.emit(ClientEvent::HeightChanged {
                column,
                new: height,
                old,
            });
        }
        if let Some(waiting) = self.awaiting_height.remove(&column) {
            for pos in waiting {
                self.request_chunk(pos);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("state", &self.state)
            .field("known_versions", &self.known_versions.len())
            .field("pending", &self.pending_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrastream_core::{
        ChunkCacheConfig, CompressedData, FaceRecord, LightData, LightMap, Surface, SurfaceData, UniformLight,
        VoxelPos,
    };
    use terrastream_core::material::defaults;

    fn client() -> (StreamClient, Receiver<ClientEvent>) {
        StreamClient::new(
            ClientConfig::default(),
            Arc::new(ChunkCache::new(ChunkCacheConfig::default())),
        )
    }

    fn payload() -> (CompressedData, CompressedData) {
        let surface = SurfaceData {
            opaque: Surface::from(vec![FaceRecord::new(VoxelPos::new(1, 1, 1), 0x3f, defaults::STONE)]),
            transparent: Surface::new(),
        };
        let light = LightData {
            opaque: UniformLight::default().map_for(&surface.opaque),
            transparent: LightMap::default(),
            phase: 0,
        };
        (CompressedData::from_surface(&surface), CompressedData::from_light(&light))
    }

    #[test]
    fn test_height_requested_before_surface() {
        let (mut client, _events) = client();
        let pos = ChunkCoord::new(0, 0, 1);
        client.request_chunk(pos);
        client.request_chunk(pos.offset(0, 0, 1));
        assert_eq!(client.flush(), vec![Message::RequestHeights {
            columns: vec![pos.column()]
        }]);

        client
            .handle(Message::single_height(pos.column(), CoarseHeight::new(2)))
            .expect("height");
        // z=1 is below the height, z=2 is air.
        assert_eq!(client.flush(), vec![Message::RequestSurfaces {
            requests: vec![SurfaceRequest::new(pos, 0)]
        }]);
        assert_eq!(client.pending_len(), 1);
    }

    #[test]
    fn test_surface_update_records_version() {
        let (mut client, events) = client();
        let pos = ChunkCoord::new(0, 0, 0);
        client
            .handle(Message::single_height(pos.column(), CoarseHeight::new(1)))
            .expect("height");
        assert!(matches!(events.try_recv(), Ok(ClientEvent::HeightChanged { .. })));

        let (surface, light) = payload();
        client
            .handle(Message::SurfaceUpdate {
                pos,
                version: 7,
                surface,
                light,
            })
            .expect("surface");
        assert_eq!(events.try_recv(), Ok(ClientEvent::SurfaceUpdated(pos)));
        assert_eq!(client.known_version(pos), Some(7));
        assert!(client.cache().contains_pair(pos));

        // Held data: the known version travels with the request.
        client.request_chunk(pos);
        assert_eq!(client.flush(), vec![Message::RequestSurfaces {
            requests: vec![SurfaceRequest::new(pos, 7)]
        }]);
    }

    #[test]
    fn test_desync_refetches_from_scratch() {
        let (mut client, events) = client();
        let pos = ChunkCoord::new(0, 0, 0);
        client
            .handle(Message::single_height(pos.column(), CoarseHeight::new(1)))
            .expect("height");
        let _ = events.try_recv();

        let (surface, _) = payload();
        client
            .handle(Message::SurfaceUpdate {
                pos,
                version: 3,
                surface,
                light: CompressedData::from_light(&LightData::default()),
            })
            .expect("desync is recovered");
        assert_eq!(events.try_recv(), Ok(ClientEvent::Desync(pos)));
        assert_eq!(client.known_version(pos), None);
        assert_eq!(client.desyncs(), 1);
        assert_eq!(client.flush(), vec![Message::RequestSurfaces {
            requests: vec![SurfaceRequest::new(pos, 0)]
        }]);
    }

    #[test]
    fn test_air_reply_clears_pending() {
        let (mut client, _events) = client();
        let col = ColumnCoord::new(3, 3);
        client.handle(Message::single_height(col, CoarseHeight::new(5))).expect("height");
        client.request_chunk(col.chunk(4));
        assert_eq!(client.pending_len(), 1);

        // The column shrank; the server answers the request with a height only.
        client.handle(Message::single_height(col, CoarseHeight::new(2))).expect("height");
        assert_eq!(client.pending_len(), 0);
    }

    #[test]
    fn test_batching_and_resend() {
        let config = ClientConfig {
            request_batch: 2,
            request_timeout: Duration::from_millis(10),
        };
        let (mut client, _events) = StreamClient::new(config, Arc::new(ChunkCache::new(ChunkCacheConfig::default())));
        for x in 0..5 {
            client.request_chunk(ChunkCoord::new(x, 0, 0));
        }
        assert_eq!(client.flush().len(), 3);
        assert!(client.flush().is_empty());

        let later = Instant::now() + Duration::from_millis(50);
        assert_eq!(client.resend_stale(later), 5);
        assert_eq!(client.resend_stale(later), 0);
    }

    #[test]
    fn test_handshake_state() {
        let (mut client, events) = client();
        assert_eq!(client.state(), ClientState::Disconnected);
        let hello = client.hello();
        assert_eq!(client.state(), ClientState::Connecting);
        client.handle(hello).expect("hello");
        assert_eq!(client.state(), ClientState::Connected);
        assert_eq!(events.try_recv(), Ok(ClientEvent::Connected {
            protocol_version: PROTOCOL_VERSION
        }));
        client.handle(Message::Disconnect).expect("disconnect");
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[test]
    fn test_evicted_chunks_lose_their_versions() {
        let (mut client, _events) = client();
        let pos = ChunkCoord::new(0, 0, 0);
        client
            .handle(Message::single_height(pos.column(), CoarseHeight::new(1)))
            .expect("height");
        let (surface, light) = payload();
        client
            .handle(Message::SurfaceUpdate {
                pos,
                version: 4,
                surface,
                light,
            })
            .expect("surface");
        assert_eq!(client.forget_evicted(), 0);

        client.cache().invalidate(pos);
        assert_eq!(client.forget_evicted(), 1);
        assert_eq!(client.known_version(pos), None);
        client.request_chunk(pos);
        assert_eq!(client.flush(), vec![Message::RequestSurfaces {
            requests: vec![SurfaceRequest::new(pos, 0)]
        }]);
    }
}
