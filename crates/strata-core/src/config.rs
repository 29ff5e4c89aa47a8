use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use strata_protocol::{CHUNK_LENGTH_PREFIX_SIZE, MESSAGE_HEADER_SIZE, RECIPE_ENTRY_SIZE};
use strata_types::FINGERPRINT_SIZE;

/// All server tunables. Every field has a default so a config file only
/// needs to name what it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Directory holding one file per sealed container.
    #[serde(default = "default_container_dir")]
    pub container_dir: String,

    /// Directory holding the three recipe files per uploaded file.
    #[serde(default = "default_recipe_dir")]
    pub recipe_dir: String,

    /// Location of the persisted dedup counters.
    #[serde(default = "default_stats_path")]
    pub stats_path: String,

    /// Chunks per outgoing restored-chunk batch.
    #[serde(default = "default_send_chunk_batch_size")]
    pub send_chunk_batch_size: usize,

    /// Entries per outgoing recipe batch.
    #[serde(default = "default_send_recipe_batch_size")]
    pub send_recipe_batch_size: usize,

    #[serde(default = "default_max_container_size")]
    pub max_container_size: usize,

    /// Sealed containers buffered between the receiver and the writer thread.
    #[serde(default = "default_container_queue_depth")]
    pub container_queue_depth: usize,

    /// Distinct containers fetched per restore working set.
    #[serde(default = "default_container_capping")]
    pub container_capping: usize,

    /// Containers held in the restore read cache.
    #[serde(default = "default_read_cache_capacity")]
    pub read_cache_capacity: usize,

    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            container_dir: default_container_dir(),
            recipe_dir: default_recipe_dir(),
            stats_path: default_stats_path(),
            send_chunk_batch_size: default_send_chunk_batch_size(),
            send_recipe_batch_size: default_send_recipe_batch_size(),
            max_container_size: default_max_container_size(),
            container_queue_depth: default_container_queue_depth(),
            container_capping: default_container_capping(),
            read_cache_capacity: default_read_cache_capacity(),
            max_chunk_size: default_max_chunk_size(),
        }
    }
}

impl ServerConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.send_chunk_batch_size == 0 {
            return Err(StrataError::Config("send_chunk_batch_size must be > 0".into()));
        }
        if self.send_recipe_batch_size == 0 {
            return Err(StrataError::Config("send_recipe_batch_size must be > 0".into()));
        }
        if self.container_queue_depth == 0 {
            return Err(StrataError::Config("container_queue_depth must be > 0".into()));
        }
        if self.container_capping == 0 {
            return Err(StrataError::Config("container_capping must be > 0".into()));
        }
        if self.max_chunk_size == 0 {
            return Err(StrataError::Config("max_chunk_size must be > 0".into()));
        }
        let smallest_usable = container_footprint_for_one_chunk(self.max_chunk_size);
        if self.max_container_size <= smallest_usable {
            return Err(StrataError::Config(format!(
                "max_container_size {} cannot hold one {}-byte chunk (needs > {})",
                self.max_container_size, self.max_chunk_size, smallest_usable
            )));
        }
        Ok(())
    }

    /// Largest frame a peer may send: a full chunk batch plus the message
    /// header, with recipe batches always smaller.
    pub fn max_frame_size(&self) -> usize {
        let chunk_batch = self.send_chunk_batch_size
            * (CHUNK_LENGTH_PREFIX_SIZE + self.max_chunk_size);
        let recipe_batch = self.send_recipe_batch_size * RECIPE_ENTRY_SIZE;
        MESSAGE_HEADER_SIZE + chunk_batch.max(recipe_batch)
    }
}

/// Bytes one max-size chunk occupies in a container file: leading count
/// word, one header entry, and the payload.
fn container_footprint_for_one_chunk(max_chunk_size: usize) -> usize {
    4 + (FINGERPRINT_SIZE + 8) + max_chunk_size
}

fn default_listen_addr() -> String {
    "127.0.0.1:9166".to_string()
}

fn default_container_dir() -> String {
    "containers".to_string()
}

fn default_recipe_dir() -> String {
    "recipes".to_string()
}

fn default_stats_path() -> String {
    "dedup-stats.bin".to_string()
}

fn default_send_chunk_batch_size() -> usize {
    128
}

fn default_send_recipe_batch_size() -> usize {
    1024
}

fn default_max_container_size() -> usize {
    4 * 1024 * 1024 // 4 MiB
}

fn default_container_queue_depth() -> usize {
    32
}

fn default_container_capping() -> usize {
    16
}

fn default_read_cache_capacity() -> usize {
    64
}

fn default_max_chunk_size() -> usize {
    16 * 1024 // 16 KiB
}

/// Load and parse a config file.
pub fn load_config(path: &Path) -> Result<ServerConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| StrataError::Config(format!("cannot read '{}': {e}", path.display())))?;
    let config: ServerConfig = serde_yaml::from_str(&contents)
        .map_err(|e| StrataError::Config(format!("invalid config '{}': {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Returns a minimal YAML config template suitable for bootstrapping.
pub fn minimal_config_template() -> &'static str {
    r#"# strata server configuration file

listen_addr: 127.0.0.1:9166

container_dir: /var/lib/strata/containers
recipe_dir: /var/lib/strata/recipes
stats_path: /var/lib/strata/dedup-stats.bin

# send_chunk_batch_size: 128
# send_recipe_batch_size: 1024
# max_container_size: 4194304
# container_queue_depth: 32
# container_capping: 16
# read_cache_capacity: 64
# max_chunk_size: 16384
"#
}
