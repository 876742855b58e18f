//! # Stream Server
//!
//! The authoritative side of chunk streaming.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      STREAM SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │ Transport    │  │ Job Queue    │  │ Worker Pool  │      │
//! │  │ (messages)   │──│ (nearest     │──│ (extraction, │      │
//! │  │              │  │  first)      │  │  heights)    │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │         │                                   │               │
//! │         │          ┌────────────────────────▼──────┐       │
//! │         └─────────▶│ World                          │       │
//! │                    │ - chunks (copy-on-write)       │       │
//! │                    │ - coarse heights               │       │
//! │                    │ - surface versions + cache     │       │
//! │                    └────────────────────────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Request handling
//!
//! For each `(pos, known_version)` the server:
//! 1. queues a height job if the column height is undefined (no surface);
//! 2. answers with a height-only update if `pos` is an air chunk;
//! 3. answers nothing if `known_version` is current;
//! 4. queues a surface job otherwise.

mod connection;
mod jobs;
mod world;

pub use connection::{ClientConnection, ConnectionId};
pub use jobs::{Job, JobKey, JobQueue};
pub use world::{BuiltSurface, FlatTerrain, HeightChange, TerrainSource, World, WorldConfig};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use terrastream_core::{
    ChunkCoord, ColumnCoord, MaterialId, StreamError, StreamResult, PROTOCOL_VERSION,
};

use crate::protocol::{HeightRecord, Message, SurfaceRequest};

/// Server configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Worker threads building surfaces and heights.
    pub workers: usize,
    /// Maximum queued jobs.
    pub job_queue_capacity: usize,
    /// Radius within which clients receive unsolicited height updates.
    pub view_radius: u32,
    /// World cache capacities.
    pub world: WorldConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            job_queue_capacity: 4096,
            view_radius: 12,
            world: WorldConfig::default(),
        }
    }
}

/// Server statistics snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Connected clients.
    pub connections: usize,
    /// Jobs waiting in the queue.
    pub queued_jobs: usize,
    /// Jobs being worked on.
    pub active_jobs: usize,
    /// Jobs finished.
    pub jobs_completed: u64,
    /// Jobs dropped on overflow.
    pub jobs_dropped: u64,
    /// Surface updates sent.
    pub surfaces_sent: u64,
    /// Height records sent.
    pub heights_sent: u64,
    /// Requests answered with nothing because the client was current.
    pub requests_skipped: u64,
    /// Chunks held by the world.
    pub loaded_chunks: usize,
    /// Surfaces cached by the world.
    pub cached_surfaces: usize,
}

struct Shared {
    world: Arc<World>,
    queue: JobQueue,
    connections: RwLock<HashMap<ConnectionId, ClientConnection>>,
    view_radius: u32,
    next_id: AtomicU32,
    jobs_completed: AtomicU64,
    jobs_dropped: AtomicU64,
    surfaces_sent: AtomicU64,
    heights_sent: AtomicU64,
    requests_skipped: AtomicU64,
}

impl Shared {
    fn schedule(&self, job: Job) {
        if self.queue.push(job).is_err() {
            self.jobs_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Priority of `key` for a set of destinations: the nearest viewer wins.
    fn priority_for(connections: &HashMap<ConnectionId, ClientConnection>, job: &Job) -> u32 {
        let pos = match job.key {
            JobKey::Surface(pos) => pos,
            JobKey::Height(col) => {
                return job
                    .destinations
                    .iter()
                    .filter_map(|id| connections.get(id))
                    .map(|conn| {
                        conn.viewer()
                            .map_or(0, |viewer| conn.priority_of(col.chunk(viewer.z)))
                    })
                    .min()
                    .unwrap_or(u32::MAX);
            }
        };
        job.destinations
            .iter()
            .filter_map(|id| connections.get(id))
            .map(|conn| conn.priority_of(pos))
            .min()
            .unwrap_or(u32::MAX)
    }

    /// Sends to each destination; connections whose outbox is gone are dropped.
    fn deliver(&self, destinations: &[ConnectionId], message: &Message) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let mut connections = self.connections.write();
            for id in destinations {
                if let Some(conn) = connections.get_mut(id) {
                    if conn.send(message.clone()) {
                        delivered += 1;
                    } else {
                        dead.push(*id);
                    }
                }
            }
        }
        for id in dead {
            self.drop_connection(id);
        }
        delivered
    }

    fn drop_connection(&self, id: ConnectionId) -> bool {
        let removed = self.connections.write().remove(&id);
        self.queue.forget_destination(id);
        if let Some(conn) = removed {
            tracing::info!("Client disconnected: {} ({} messages sent)", id, conn.messages_sent());
            true
        } else {
            false
        }
    }

    fn run(&self, job: &Job) {
        match job.key {
            JobKey::Height(col) => match self.world.compute_height(col) {
                Ok(height) => {
                    let n = self.deliver(&job.destinations, &Message::single_height(col, height));
                    self.heights_sent.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(e) => tracing::warn!("Height job for column {} failed: {}", col, e),
            },
            JobKey::Surface(pos) => match self.world.build_surface(pos) {
                Ok(built) => self.deliver_surface(pos, job, built),
                Err(StreamError::IncompleteNeighborhood(_)) => {
                    // Neighbours were pruned between load and snapshot; try again later.
                    tracing::debug!("Retrying surface job for chunk {}", pos);
                    self.schedule(job.clone());
                }
                Err(e) => tracing::warn!("Surface job for chunk {} failed: {}", pos, e),
            },
        }
    }

    fn deliver_surface(&self, pos: ChunkCoord, job: &Job, built: BuiltSurface) {
        let fresh: Vec<ConnectionId> = {
            let connections = self.connections.read();
            job.destinations
                .iter()
                .copied()
                .filter(|id| {
                    connections
                        .get(id)
                        .is_some_and(|conn| conn.sent_version(pos) != Some(built.version))
                })
                .collect()
        };
        if fresh.is_empty() {
            return;
        }
        let message = Message::SurfaceUpdate {
            pos,
            version: built.version,
            surface: built.surface,
            light: built.light,
        };
        let n = self.deliver(&fresh, &message);
        self.surfaces_sent.fetch_add(n as u64, Ordering::Relaxed);
    }
}

fn worker_loop(shared: &Shared) {
    while let Some(job) = shared.queue.pop() {
        shared.run(&job);
        shared.queue.complete(job.key);
        shared.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// The chunk streaming server.
///
/// Transports feed it messages through [`StreamServer::handle_message`];
/// replies go into each connection's outbox.
pub struct StreamServer {
    config: ServerConfig,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl StreamServer {
    /// Starts the worker pool over `world`.
    ///
    /// # Errors
    ///
    /// [`StreamError::Config`] for zero workers, [`StreamError::Io`] if a
    /// thread cannot be spawned.
    pub fn start(config: ServerConfig, world: Arc<World>) -> StreamResult<Self> {
        if config.workers == 0 {
            return Err(StreamError::Config("server needs at least one worker".into()));
        }
        let shared = Arc::new(Shared {
            world,
            queue: JobQueue::new(config.job_queue_capacity),
            connections: RwLock::new(HashMap::new()),
            view_radius: config.view_radius,
            next_id: AtomicU32::new(1),
            jobs_completed: AtomicU64::new(0),
            jobs_dropped: AtomicU64::new(0),
            surfaces_sent: AtomicU64::new(0),
            heights_sent: AtomicU64::new(0),
            requests_skipped: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(config.workers);
        for i in 0..config.workers {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("stream-worker-{i}"))
                .spawn(move || worker_loop(&shared))?;
            workers.push(handle);
        }
        tracing::info!(
            "Stream server started: {} workers, queue capacity {}",
            config.workers,
            config.job_queue_capacity
        );

        Ok(Self {
            config,
            shared,
            workers: Mutex::new(workers),
            running: AtomicBool::new(true),
        })
    }

    /// Server configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The authoritative world.
    #[must_use]
    pub fn world(&self) -> &Arc<World> {
        &self.shared.world
    }

    /// Returns true until [`StreamServer::shutdown`].
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Registers a client whose messages are delivered into `outbox`.
    pub fn connect(&self, outbox: Sender<Message>) -> ConnectionId {
        let id = ConnectionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared
            .connections
            .write()
            .insert(id, ClientConnection::new(id, outbox));
        tracing::info!("Client connected: {}", id);
        id
    }

    /// Removes a client and its queued work.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.shared.drop_connection(id)
    }

    /// Number of connected clients.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.connections.read().len()
    }

    /// Processes one message from `id`.
    pub fn handle_message(&self, id: ConnectionId, message: Message) {
        if !self.shared.connections.read().contains_key(&id) {
            tracing::debug!("Message from unknown connection {} ignored", id);
            return;
        }
        match message {
            Message::Hello { protocol_version } => self.on_hello(id, protocol_version),
            Message::RequestSurfaces { requests } => self.on_request_surfaces(id, &requests),
            Message::RequestHeights { columns } => self.on_request_heights(id, &columns),
            Message::ViewerMoved { pos } => self.on_viewer_moved(id, pos),
            Message::Disconnect => {
                self.disconnect(id);
            }
            Message::SurfaceUpdate { pos, .. } => {
                tracing::warn!("Client {} sent a surface update for {}; ignored", id, pos);
            }
            Message::HeightmapUpdate { .. } => {
                tracing::warn!("Client {} sent a heightmap update; ignored", id);
            }
        }
    }

    fn on_hello(&self, id: ConnectionId, protocol_version: u16) {
        if protocol_version == PROTOCOL_VERSION {
            self.shared.deliver(&[id], &Message::Hello {
                protocol_version: PROTOCOL_VERSION,
            });
            return;
        }
        tracing::warn!(
            "Client {} speaks protocol {} (expected {}), disconnecting",
            id,
            protocol_version,
            PROTOCOL_VERSION
        );
        self.shared.deliver(&[id], &Message::Disconnect);
        self.disconnect(id);
    }

    fn on_request_surfaces(&self, id: ConnectionId, requests: &[SurfaceRequest]) {
        let world = &self.shared.world;
        let mut air = Vec::new();
        let mut jobs = Vec::new();
        {
            let mut connections = self.shared.connections.write();
            let Some(conn) = connections.get_mut(&id) else {
                return;
            };
            for request in requests {
                let pos = request.pos;
                let col = pos.column();
                let height = world.height(col);
                let priority = conn.priority_of(pos);
                if !height.is_defined() {
                    jobs.push(Job::new(JobKey::Height(col), priority, id));
                } else if height.is_air_chunk(pos) {
                    air.push(HeightRecord::new(col, height));
                } else if request.known_version != 0 && world.current_version(pos) == Some(request.known_version) {
                    self.shared.requests_skipped.fetch_add(1, Ordering::Relaxed);
                } else {
                    // Whatever was sent before, the client no longer has it.
                    conn.forget_sent(pos);
                    jobs.push(Job::new(JobKey::Surface(pos), priority, id));
                }
            }
        }

        tracing::trace!(
            "Client {} requested {} surfaces: {} queued, {} air",
            id,
            requests.len(),
            jobs.len(),
            air.len()
        );
        for job in jobs {
            self.shared.schedule(job);
        }
        if !air.is_empty() {
            air.sort_unstable_by_key(|r| (r.column.x, r.column.y));
            air.dedup();
            let n = air.len() as u64;
            if self.shared.deliver(&[id], &Message::HeightmapUpdate { records: air }) > 0 {
                self.shared.heights_sent.fetch_add(n, Ordering::Relaxed);
            }
        }
    }

    fn on_request_heights(&self, id: ConnectionId, columns: &[ColumnCoord]) {
        let world = &self.shared.world;
        let mut records = Vec::new();
        let mut jobs = Vec::new();
        {
            let connections = self.shared.connections.read();
            let Some(conn) = connections.get(&id) else {
                return;
            };
            for &col in columns {
                let height = world.height(col);
                if height.is_defined() {
                    records.push(HeightRecord::new(col, height));
                } else {
                    let z = conn.viewer().map_or(0, |v| v.z);
                    jobs.push(Job::new(JobKey::Height(col), conn.priority_of(col.chunk(z)), id));
                }
            }
        }
        for job in jobs {
            self.shared.schedule(job);
        }
        if !records.is_empty() {
            let n = records.len() as u64;
            if self.shared.deliver(&[id], &Message::HeightmapUpdate { records }) > 0 {
                self.shared.heights_sent.fetch_add(n, Ordering::Relaxed);
            }
        }
    }

    fn on_viewer_moved(&self, id: ConnectionId, pos: ChunkCoord) {
        let connections = {
            let mut connections = self.shared.connections.write();
            if let Some(conn) = connections.get_mut(&id) {
                conn.set_viewer(pos);
                let forgotten = conn.forget_beyond(self.shared.view_radius);
                if forgotten > 0 {
                    tracing::trace!("Client {} left {} chunks behind", id, forgotten);
                }
            }
            connections
        };
        let connections = parking_lot::RwLockWriteGuard::downgrade(connections);
        self.shared
            .queue
            .reprioritize(|job| Shared::priority_for(&connections, job));
        tracing::trace!("Client {} moved to {}", id, pos);
    }

    /// Edits one voxel (world voxel coordinates) and pushes the consequences
    /// to clients: height changes to everyone nearby, fresh surfaces to every
    /// client holding an affected chunk.
    ///
    /// # Errors
    ///
    /// Store failures from the world.
    pub fn set_voxel(&self, x: i32, y: i32, z: i32, material: MaterialId) -> StreamResult<()> {
        let change = self.shared.world.set_voxel(x, y, z, material)?;
        let pos = ChunkCoord::from_voxel(x, y, z);
        let affected: Vec<ChunkCoord> = std::iter::once(pos)
            .chain(pos.neighbors().map(|(_, p)| p))
            .collect();

        let mut jobs = Vec::new();
        let mut watchers = Vec::new();
        {
            let connections = self.shared.connections.read();
            for conn in connections.values() {
                for &chunk in &affected {
                    if conn.holds(chunk) {
                        jobs.push(Job::new(JobKey::Surface(chunk), conn.priority_of(chunk), conn.id));
                    }
                }
                if let Some(change) = change {
                    if conn.cares_about(change.column, self.shared.view_radius) {
                        watchers.push(conn.id);
                    }
                }
            }
        }

        if let Some(change) = change {
            let n = self
                .shared
                .deliver(&watchers, &Message::single_height(change.column, change.new));
            self.shared.heights_sent.fetch_add(n as u64, Ordering::Relaxed);
        }
        for job in jobs {
            self.shared.schedule(job);
        }
        Ok(())
    }

    /// Shrinks world caches to their capacities.
    ///
    /// # Errors
    ///
    /// Store failures while persisting evicted surfaces.
    pub fn maintain(&self) -> StreamResult<()> {
        self.shared.world.prune()
    }

    /// Statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> ServerStats {
        let shared = &self.shared;
        ServerStats {
            connections: shared.connections.read().len(),
            queued_jobs: shared.queue.len(),
            active_jobs: shared.queue.active_len(),
            jobs_completed: shared.jobs_completed.load(Ordering::Relaxed),
            jobs_dropped: shared.jobs_dropped.load(Ordering::Relaxed),
            surfaces_sent: shared.surfaces_sent.load(Ordering::Relaxed),
            heights_sent: shared.heights_sent.load(Ordering::Relaxed),
            requests_skipped: shared.requests_skipped.load(Ordering::Relaxed),
            loaded_chunks: shared.world.loaded_chunks(),
            cached_surfaces: shared.world.cached_surfaces(),
        }
    }

    /// Stops the workers and flushes the world.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.queue.close();
        for handle in self.workers.lock().drain(..) {
            if handle.join().is_err() {
                tracing::warn!("Stream worker panicked");
            }
        }
        if let Err(e) = self.shared.world.flush() {
            tracing::warn!("Failed to flush world on shutdown: {}", e);
        }
        tracing::info!("Stream server stopped");
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use terrastream_core::{CoarseHeight, MaterialRegistry, MemoryStore, UniformLight};

    fn server(workers: usize) -> StreamServer {
        let world = Arc::new(World::new(
            WorldConfig::default(),
            Arc::new(FlatTerrain::new(40)),
            Arc::new(UniformLight::default()),
            Arc::new(MaterialRegistry::with_defaults()),
            Arc::new(MemoryStore::new()),
        ));
        let config = ServerConfig {
            workers,
            ..ServerConfig::default()
        };
        StreamServer::start(config, world).expect("server")
    }

    fn recv(rx: &crossbeam_channel::Receiver<Message>) -> Message {
        rx.recv_timeout(Duration::from_secs(5)).expect("message")
    }

    #[test]
    fn test_hello_handshake() {
        let server = server(1);
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = server.connect(tx);
        server.handle_message(id, Message::Hello {
            protocol_version: PROTOCOL_VERSION,
        });
        assert_eq!(recv(&rx), Message::Hello {
            protocol_version: PROTOCOL_VERSION
        });

        server.handle_message(id, Message::Hello {
            protocol_version: PROTOCOL_VERSION + 1,
        });
        assert_eq!(recv(&rx), Message::Disconnect);
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn test_undefined_height_gets_height_only_reply() {
        let server = server(1);
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = server.connect(tx);
        let pos = ChunkCoord::new(0, 0, 1);
        server.handle_message(id, Message::RequestSurfaces {
            requests: vec![SurfaceRequest::new(pos, 0)],
        });
        assert_eq!(recv(&rx), Message::single_height(pos.column(), CoarseHeight::new(3)));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_surface_then_skip_when_current() {
        let server = server(2);
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = server.connect(tx);
        let pos = ChunkCoord::new(0, 0, 2);
        server.handle_message(id, Message::RequestHeights {
            columns: vec![pos.column()],
        });
        assert!(matches!(recv(&rx), Message::HeightmapUpdate { .. }));

        server.handle_message(id, Message::RequestSurfaces {
            requests: vec![SurfaceRequest::new(pos, 0), SurfaceRequest::new(pos.offset(0, 0, 3), 0)],
        });
        let mut version = 0;
        for _ in 0..2 {
            match recv(&rx) {
                Message::SurfaceUpdate { pos: got, version: v, .. } => {
                    assert_eq!(got, pos);
                    version = v;
                }
                Message::HeightmapUpdate { records } => {
                    assert_eq!(records, vec![HeightRecord::new(pos.column(), CoarseHeight::new(3))]);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(version, 1);

        server.handle_message(id, Message::RequestSurfaces {
            requests: vec![SurfaceRequest::new(pos, version)],
        });
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(server.stats().requests_skipped, 1);
    }

    #[test]
    fn test_edit_pushes_new_version_and_height() {
        let server = server(1);
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = server.connect(tx);
        let pos = ChunkCoord::new(0, 0, 2);
        server.handle_message(id, Message::ViewerMoved { pos });
        server.handle_message(id, Message::RequestHeights {
            columns: vec![pos.column()],
        });
        recv(&rx);
        server.handle_message(id, Message::RequestSurfaces {
            requests: vec![SurfaceRequest::new(pos, 0)],
        });
        assert!(matches!(recv(&rx), Message::SurfaceUpdate { version: 1, .. }));

        server.set_voxel(1, 1, 48, MaterialId::new(1)).expect("edit");
        let mut saw_height = false;
        let mut saw_surface = false;
        while !(saw_height && saw_surface) {
            match recv(&rx) {
                Message::HeightmapUpdate { records } => {
                    assert_eq!(records[0].height, CoarseHeight::new(4));
                    saw_height = true;
                }
                Message::SurfaceUpdate { pos: got, version, .. } => {
                    assert_eq!((got, version), (pos, 2));
                    saw_surface = true;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_request_from_scratch_is_answered_again() {
        let server = server(1);
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = server.connect(tx);
        let pos = ChunkCoord::new(0, 0, 2);
        server.handle_message(id, Message::RequestHeights {
            columns: vec![pos.column()],
        });
        recv(&rx);
        for _ in 0..2 {
            // The second request comes from a client that dropped its copy.
            server.handle_message(id, Message::RequestSurfaces {
                requests: vec![SurfaceRequest::new(pos, 0)],
            });
            assert!(matches!(recv(&rx), Message::SurfaceUpdate { version: 1, .. }));
        }
    }

    #[test]
    fn test_viewer_move_forgets_far_chunks() {
        let server = server(1);
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = server.connect(tx);
        let pos = ChunkCoord::new(0, 0, 2);
        server.handle_message(id, Message::ViewerMoved { pos });
        server.handle_message(id, Message::RequestHeights {
            columns: vec![pos.column()],
        });
        recv(&rx);
        server.handle_message(id, Message::RequestSurfaces {
            requests: vec![SurfaceRequest::new(pos, 0)],
        });
        recv(&rx);
        assert!(server.shared.connections.read()[&id].holds(pos));

        server.handle_message(id, Message::ViewerMoved {
            pos: pos.offset(100, 0, 0),
        });
        assert_eq!(server.shared.connections.read()[&id].sent_len(), 0);

        // Edits far from the viewer push nothing.
        server.set_voxel(1, 1, 39, MaterialId::AIR).expect("edit");
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let server = server(2);
        server.shutdown();
        server.shutdown();
        assert!(!server.is_running());
        assert_eq!(server.stats().connections, 0);
    }
}
