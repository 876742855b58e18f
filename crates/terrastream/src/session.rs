//! # Client Session
//!
//! The client frame loop. One call to [`ClientSession::frame`]:
//!
//! ```text
//!   transport ──▶ StreamClient::handle ──▶ ChunkCache
//!                        │ ClientEvent
//!                        ▼
//!                  Scene::on_surface_updated / on_height_changed
//!                        │
//!                  Scene::frame  (meshes, probes, draw)
//!                        │ SceneRequest
//!                        ▼
//!   transport ◀── StreamClient::flush ◀── request_chunk / refetch
//! ```
//!
//! Nothing in the loop blocks: the transport is polled, mesh jobs and
//! probes are polled by the scene.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Receiver;
use terrastream_core::{ChunkCache, ChunkCoord, MaterialRegistry, PrunerHandle, StreamResult};
use terrastream_networking::{ClientEvent, ClientState, ClientTransport, Message, StreamClient, TransportStats};
use terrastream_rendering::{FrameStats, MeshPipeline, RenderBackend, Scene, SceneRequest};

use crate::config::StreamingConfig;

/// Frames between sweeps of versions whose chunks the cache has evicted.
const VERSION_SWEEP_FRAMES: u64 = 64;

/// A running client: scene, streaming state and a transport.
pub struct ClientSession<B: RenderBackend, T: ClientTransport> {
    scene: Scene<B>,
    client: StreamClient,
    events: Receiver<ClientEvent>,
    transport: T,
    pruner: Option<PrunerHandle>,
    frames: u64,
}

impl<B: RenderBackend, T: ClientTransport> ClientSession<B, T> {
    /// Builds the client side and sends the handshake.
    ///
    /// # Errors
    ///
    /// Thread spawn failures (pruner, mesh workers) and transport errors.
    pub fn start(config: &StreamingConfig, backend: B, mut transport: T) -> StreamResult<Self> {
        let cache = Arc::new(ChunkCache::new(config.cache_config()));
        let pruner = cache.spawn_pruner(config.prune_interval())?;
        let pipeline = MeshPipeline::new(config.client.mesh_workers, Arc::new(MaterialRegistry::with_defaults()))?;
        let scene = Scene::new(config.scene_config(), backend, pipeline, Arc::clone(&cache));
        let (mut client, events) = StreamClient::new(config.client_config(), cache);
        transport.send(&client.hello())?;
        tracing::info!(
            "Client session started: view radius {}, {} mesh workers",
            config.view.radius,
            config.client.mesh_workers
        );
        Ok(Self {
            scene,
            client,
            events,
            transport,
            pruner: Some(pruner),
            frames: 0,
        })
    }

    /// The scene.
    #[must_use]
    pub const fn scene(&self) -> &Scene<B> {
        &self.scene
    }

    /// The streaming client.
    #[must_use]
    pub const fn client(&self) -> &StreamClient {
        &self.client
    }

    /// Returns true once the server accepted the handshake.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client.state() == ClientState::Connected
    }

    /// Transport counters.
    #[must_use]
    pub fn transport_stats(&self) -> TransportStats {
        self.transport.stats()
    }

    /// Frames run so far.
    #[must_use]
    pub const fn frames(&self) -> u64 {
        self.frames
    }

    /// Moves the viewer into chunk `pos` and tells the server.
    ///
    /// # Errors
    ///
    /// Transport errors.
    pub fn move_viewer(&mut self, pos: ChunkCoord) -> StreamResult<()> {
        self.scene.on_move(pos);
        self.transport.send(&StreamClient::viewer_moved(pos))?;
        self.send_requests()
    }

    /// Runs one frame.
    ///
    /// # Errors
    ///
    /// Transport errors; per-chunk failures are logged and skipped.
    pub fn frame(&mut self) -> StreamResult<FrameStats> {
        while let Some(message) = self.transport.try_recv()? {
            if let Err(e) = self.client.handle(message) {
                tracing::warn!("Failed to apply server message: {}", e);
            }
        }
        self.dispatch_events();
        let stats = self.scene.frame();
        self.client.resend_stale(Instant::now());
        if self.frames % VERSION_SWEEP_FRAMES == 0 {
            self.client.forget_evicted();
        }
        self.send_requests()?;
        self.frames += 1;
        Ok(stats)
    }

    fn dispatch_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                ClientEvent::SurfaceUpdated(pos) => self.scene.on_surface_updated(pos),
                ClientEvent::HeightChanged { column, new, old } => self.scene.on_height_changed(column, new, old),
                ClientEvent::Desync(pos) => tracing::debug!("Chunk {} re-requested after desync", pos),
                ClientEvent::Connected { protocol_version } => {
                    tracing::debug!("Handshake done (protocol {})", protocol_version);
                }
                ClientEvent::Disconnected => tracing::warn!("Server disconnected"),
            }
        }
    }

    fn send_requests(&mut self) -> StreamResult<()> {
        for request in self.scene.take_requests() {
            match request {
                SceneRequest::Chunk(pos) => self.client.request_chunk(pos),
                SceneRequest::Refetch(pos) => self.client.refetch(pos),
            }
        }
        for message in self.client.flush() {
            self.transport.send(&message)?;
        }
        Ok(())
    }

    /// Stops background work and releases every GPU resource.
    pub fn close(&mut self) {
        if let Some(pruner) = self.pruner.take() {
            pruner.stop();
        }
        self.scene.clear();
        let _ = self.transport.send(&Message::Disconnect);
    }
}

impl<B: RenderBackend, T: ClientTransport> Drop for ClientSession<B, T> {
    fn drop(&mut self) {
        if self.pruner.is_some() {
            self.close();
        }
    }
}
