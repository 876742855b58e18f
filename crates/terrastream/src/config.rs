//! # Configuration
//!
//! One TOML file configures both binaries. Every field has a default, so an
//! empty file (or none at all) is a valid configuration.
//!
//! ```toml
//! [view]
//! radius = 12
//!
//! [cache]
//! surface_capacity = 4096
//! light_capacity = 4096
//! height_capacity = 32768
//! prune_interval_ms = 2000
//!
//! [client]
//! mesh_workers = 2
//! visibility_threshold = 4
//! request_batch = 64
//!
//! [server]
//! bind = "127.0.0.1:15050"
//! workers = 2
//! job_queue_capacity = 4096
//! surface_cache_capacity = 8192
//! height_cache_capacity = 65536
//! version_capacity = 32768
//! ground_level = 40
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use terrastream_core::{ChunkCacheConfig, StreamError, StreamResult};
use terrastream_networking::{ClientConfig, ServerConfig, WorldConfig};
use terrastream_rendering::{OcclusionConfig, SceneConfig};

/// `[view]` section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewSection {
    /// View radius in chunks (Manhattan distance).
    pub radius: u32,
}

impl Default for ViewSection {
    fn default() -> Self {
        Self { radius: 12 }
    }
}

/// `[cache]` section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSection {
    /// Decoded surfaces kept after pruning.
    pub surface_capacity: usize,
    /// Decoded light maps kept after pruning.
    pub light_capacity: usize,
    /// Column heights kept after pruning.
    pub height_capacity: usize,
    /// Period of the background pruner.
    pub prune_interval_ms: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        let caches = ChunkCacheConfig::default();
        Self {
            surface_capacity: caches.surface_capacity,
            light_capacity: caches.light_capacity,
            height_capacity: caches.height_capacity,
            prune_interval_ms: 2000,
        }
    }
}

/// `[client]` section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientSection {
    /// Mesh building threads.
    pub mesh_workers: usize,
    /// Samples a probe needs to exceed to count as visible.
    pub visibility_threshold: u32,
    /// Maximum entries per request message.
    pub request_batch: usize,
    /// Unanswered requests are re-sent after this long.
    pub request_timeout_ms: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            mesh_workers: 2,
            visibility_threshold: OcclusionConfig::DEFAULT_THRESHOLD,
            request_batch: 64,
            request_timeout_ms: 5000,
        }
    }
}

/// `[server]` section.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    /// TCP listen address.
    pub bind: String,
    /// Surface and height workers.
    pub workers: usize,
    /// Maximum queued jobs.
    pub job_queue_capacity: usize,
    /// Compressed surfaces kept in memory.
    pub surface_cache_capacity: usize,
    /// Chunks kept in memory.
    pub chunk_capacity: usize,
    /// Column heights kept in memory.
    pub height_cache_capacity: usize,
    /// Chunks whose surface version is remembered.
    pub version_capacity: usize,
    /// First air voxel level of the flat reference terrain.
    pub ground_level: i32,
}

impl Default for ServerSection {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            bind: "127.0.0.1:15050".to_owned(),
            workers: server.workers,
            job_queue_capacity: server.job_queue_capacity,
            surface_cache_capacity: server.world.surface_capacity,
            chunk_capacity: server.world.chunk_capacity,
            height_cache_capacity: server.world.height_capacity,
            version_capacity: server.world.version_capacity,
            ground_level: 40,
        }
    }
}

/// Complete configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamingConfig {
    /// `[view]`.
    pub view: ViewSection,
    /// `[cache]`.
    pub cache: CacheSection,
    /// `[client]`.
    pub client: ClientSection,
    /// `[server]`.
    pub server: ServerSection,
}

impl StreamingConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`StreamError::Config`] on syntax errors, unknown keys or invalid values.
    pub fn from_toml_str(text: &str) -> StreamResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| StreamError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`StreamError::Io`] if the file cannot be read, otherwise as
    /// [`StreamingConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> StreamResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`StreamError::Config`] naming the first offending key.
    pub fn validate(&self) -> StreamResult<()> {
        let positive = [
            ("view.radius", self.view.radius as usize),
            ("cache.surface_capacity", self.cache.surface_capacity),
            ("cache.light_capacity", self.cache.light_capacity),
            ("cache.height_capacity", self.cache.height_capacity),
            ("client.mesh_workers", self.client.mesh_workers),
            ("client.request_batch", self.client.request_batch),
            ("server.workers", self.server.workers),
            ("server.job_queue_capacity", self.server.job_queue_capacity),
            ("server.surface_cache_capacity", self.server.surface_cache_capacity),
            ("server.chunk_capacity", self.server.chunk_capacity),
            ("server.height_cache_capacity", self.server.height_cache_capacity),
            ("server.version_capacity", self.server.version_capacity),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(StreamError::Config(format!("{key} must be at least 1")));
        }
        if self.cache.prune_interval_ms == 0 {
            return Err(StreamError::Config("cache.prune_interval_ms must be at least 1".into()));
        }
        if self.server.bind.is_empty() {
            return Err(StreamError::Config("server.bind must not be empty".into()));
        }
        Ok(())
    }

    /// Client chunk cache capacities.
    #[must_use]
    pub const fn cache_config(&self) -> ChunkCacheConfig {
        ChunkCacheConfig {
            surface_capacity: self.cache.surface_capacity,
            light_capacity: self.cache.light_capacity,
            height_capacity: self.cache.height_capacity,
        }
    }

    /// Pruner period.
    #[must_use]
    pub const fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.cache.prune_interval_ms)
    }

    /// Scene settings.
    #[must_use]
    pub const fn scene_config(&self) -> SceneConfig {
        SceneConfig {
            view_radius: self.view.radius,
            occlusion: OcclusionConfig {
                visibility_threshold: self.client.visibility_threshold,
            },
        }
    }

    /// Client request settings.
    #[must_use]
    pub const fn client_config(&self) -> ClientConfig {
        ClientConfig {
            request_batch: self.client.request_batch,
            request_timeout: Duration::from_millis(self.client.request_timeout_ms),
        }
    }

    /// Server settings.
    #[must_use]
    pub const fn server_config(&self) -> ServerConfig {
        ServerConfig {
            workers: self.server.workers,
            job_queue_capacity: self.server.job_queue_capacity,
            view_radius: self.view.radius,
            world: WorldConfig {
                chunk_capacity: self.server.chunk_capacity,
                surface_capacity: self.server.surface_cache_capacity,
                height_capacity: self.server.height_cache_capacity,
                version_capacity: self.server.version_capacity,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = StreamingConfig::from_toml_str("").expect("config");
        assert_eq!(config, StreamingConfig::default());
        assert_eq!(config.view.radius, 12);
        assert_eq!(config.cache.height_capacity, 8 * config.cache.surface_capacity);
        assert_eq!(config.client.visibility_threshold, 4);
        assert_eq!(config.server.bind, "127.0.0.1:15050");
    }

    #[test]
    fn test_partial_sections() {
        let config = StreamingConfig::from_toml_str(
            r#"
            [view]
            radius = 6

            [server]
            workers = 8
            ground_level = 100
            "#,
        )
        .expect("config");
        assert_eq!(config.scene_config().view_radius, 6);
        assert_eq!(config.server_config().view_radius, 6);
        assert_eq!(config.server_config().workers, 8);
        assert_eq!(config.server.ground_level, 100);
        assert_eq!(config.client.request_batch, 64);
        assert_eq!(config.server_config().world, WorldConfig::default());
    }

    #[test]
    fn test_invalid_values() {
        let err = StreamingConfig::from_toml_str("[client]\nmesh_workers = 0\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration: client.mesh_workers must be at least 1"
        );
        assert!(matches!(
            StreamingConfig::from_toml_str("[view]\nradius = \"far\"\n"),
            Err(StreamError::Config(_))
        ));
        assert!(matches!(
            StreamingConfig::from_toml_str("[view]\nzoom = 2\n"),
            Err(StreamError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = StreamingConfig::load("/nonexistent/terrastream.toml").unwrap_err();
        assert!(matches!(err, StreamError::Io(_)));
    }
}
