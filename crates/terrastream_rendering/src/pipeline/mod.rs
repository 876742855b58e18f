//! Mesh build pipeline.
//!
//! A fixed pool of worker threads turns (surface, light) pairs into
//! [`MeshBuffers`]. The render thread never waits: every submission returns a
//! [`MeshFuture`] that can be polled, and [`MeshPipeline::drain_ready`] hands
//! back everything that finished since the last frame.
//!
//! ```text
//!   render thread                         workers (N)
//!   ─────────────                         ───────────
//!   schedule(pos, surface, light) ──jobs──▶ build_meshes()
//!   drain_ready()  ◀────────────result────  (skipped if cancelled)
//!   upload on render thread
//! ```

mod stats;

pub use stats::FrameStats;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use terrastream_core::{
    ChunkCoord, LightData, MaterialRegistry, StreamError, StreamResult, SurfaceData,
};

use crate::voxel::{build_meshes, MeshBuffers};

struct MeshJob {
    pos: ChunkCoord,
    surface: Arc<SurfaceData>,
    light: Arc<LightData>,
    cancelled: Arc<AtomicBool>,
    reply: Sender<StreamResult<MeshBuffers>>,
}

/// Pending result of one mesh job.
pub struct MeshFuture {
    pos: ChunkCoord,
    rx: Receiver<StreamResult<MeshBuffers>>,
    cancelled: Arc<AtomicBool>,
}

impl MeshFuture {
    /// Chunk being meshed.
    #[must_use]
    pub const fn pos(&self) -> ChunkCoord {
        self.pos
    }

    /// Takes the result if the job finished. Never blocks.
    ///
    /// A cancelled job, or one whose worker died, yields
    /// [`StreamError::WorkerStopped`].
    pub fn try_take(&self) -> Option<StreamResult<MeshBuffers>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(StreamError::WorkerStopped)),
        }
    }

    /// Blocks up to `timeout` for the result. Meant for tools and tests,
    /// never for the render thread.
    pub fn wait(&self, timeout: std::time::Duration) -> Option<StreamResult<MeshBuffers>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => None,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Some(Err(StreamError::WorkerStopped)),
        }
    }

    /// Asks the worker to skip this job if it has not started yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true if cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Worker pool for mesh building.
pub struct MeshPipeline {
    job_tx: Option<Sender<MeshJob>>,
    workers: Vec<JoinHandle<()>>,
    scheduled: HashMap<ChunkCoord, MeshFuture>,
}

impl MeshPipeline {
    /// Starts `workers` threads (at least one) sharing `materials`.
    ///
    /// # Errors
    ///
    /// Returns error if a thread cannot be spawned.
    pub fn new(workers: usize, materials: Arc<MaterialRegistry>) -> StreamResult<Self> {
        let (job_tx, job_rx) = unbounded::<MeshJob>();
        let mut handles = Vec::with_capacity(workers.max(1));
        for index in 0..workers.max(1) {
            let rx = job_rx.clone();
            let materials = Arc::clone(&materials);
            let handle = std::thread::Builder::new()
                .name(format!("mesh-worker-{index}"))
                .spawn(move || worker_loop(&rx, &materials))?;
            handles.push(handle);
        }
        tracing::info!("Mesh pipeline started with {} workers", handles.len());
        Ok(Self {
            job_tx: Some(job_tx),
            workers: handles,
            scheduled: HashMap::new(),
        })
    }

    /// Queues a job and returns its future. The pipeline does not track it.
    ///
    /// # Errors
    ///
    /// [`StreamError::WorkerStopped`] after shutdown.
    pub fn submit(
        &self,
        pos: ChunkCoord,
        surface: Arc<SurfaceData>,
        light: Arc<LightData>,
    ) -> StreamResult<MeshFuture> {
        let (reply, rx) = bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let job = MeshJob {
            pos,
            surface,
            light,
            cancelled: Arc::clone(&cancelled),
            reply,
        };
        self.job_tx
            .as_ref()
            .ok_or(StreamError::WorkerStopped)?
            .send(job)
            .map_err(|_| StreamError::WorkerStopped)?;
        Ok(MeshFuture { pos, rx, cancelled })
    }

    /// Queues a tracked job; a previous tracked job for `pos` is cancelled.
    ///
    /// # Errors
    ///
    /// [`StreamError::WorkerStopped`] after shutdown.
    pub fn schedule(
        &mut self,
        pos: ChunkCoord,
        surface: Arc<SurfaceData>,
        light: Arc<LightData>,
    ) -> StreamResult<()> {
        let future = self.submit(pos, surface, light)?;
        if let Some(old) = self.scheduled.insert(pos, future) {
            old.cancel();
        }
        Ok(())
    }

    /// Cancels the tracked job for `pos`. Its result is never delivered.
    pub fn cancel(&mut self, pos: ChunkCoord) -> bool {
        match self.scheduled.remove(&pos) {
            Some(future) => {
                future.cancel();
                true
            }
            None => false,
        }
    }

    /// Returns true if a tracked job for `pos` is outstanding.
    #[must_use]
    pub fn is_scheduled(&self, pos: ChunkCoord) -> bool {
        self.scheduled.contains_key(&pos)
    }

    /// Number of outstanding tracked jobs.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.scheduled.len()
    }

    /// Collects every tracked job that finished. Empty meshes are delivered too.
    pub fn drain_ready(&mut self) -> Vec<(ChunkCoord, StreamResult<MeshBuffers>)> {
        let mut ready = Vec::new();
        self.scheduled.retain(|pos, future| match future.try_take() {
            Some(result) => {
                ready.push((*pos, result));
                false
            }
            None => true,
        });
        ready
    }

    /// Stops accepting jobs and joins the workers.
    pub fn shutdown(&mut self) {
        for (_, future) in self.scheduled.drain() {
            future.cancel();
        }
        self.job_tx = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for MeshPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(jobs: &Receiver<MeshJob>, materials: &MaterialRegistry) {
    while let Ok(job) = jobs.recv() {
        if job.cancelled.load(Ordering::Acquire) {
            tracing::trace!("Skipping cancelled mesh job for {}", job.pos);
            continue;
        }
        let result = build_meshes(job.pos, &job.surface, &job.light, materials);
        if let Err(e) = &result {
            tracing::warn!("Mesh build failed for chunk {}: {}", job.pos, e);
        }
        // The receiver is gone when the job was superseded.
        let _ = job.reply.send(result);
    }
}
