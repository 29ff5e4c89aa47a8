use std::path::Path;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::index::{FingerprintIndex, IndexStats};
use crate::recipe::RecipeStore;
use crate::session::SessionResources;
use crate::storage::{ContainerStore, MemoryKvStore};

/// Config with every path under `root` and the batch/container knobs
/// small enough that tests cross their boundaries with little data.
pub fn test_config(root: &Path) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.container_dir = root.join("containers").to_string_lossy().into_owned();
    config.recipe_dir = root.join("recipes").to_string_lossy().into_owned();
    config.stats_path = root.join("dedup-stats.bin").to_string_lossy().into_owned();
    config.send_chunk_batch_size = 4;
    config.send_recipe_batch_size = 4;
    config.max_container_size = 4096;
    config.container_queue_depth = 4;
    config.container_capping = 4;
    config.read_cache_capacity = 4;
    config.max_chunk_size = 1024;
    config
}

/// Session resources over temp directories with an in-memory index store.
pub fn test_resources(root: &Path) -> SessionResources {
    let config = test_config(root);
    let containers = ContainerStore::open(Path::new(&config.container_dir)).unwrap();
    let recipes = RecipeStore::open(Path::new(&config.recipe_dir)).unwrap();
    let index = Arc::new(FingerprintIndex::new(
        Arc::new(MemoryKvStore::new()),
        IndexStats::default(),
    ));
    SessionResources {
        config,
        index,
        containers,
        recipes,
    }
}

/// A file name in the shape clients use: 64 hex digits.
pub fn test_file_name(seed: u8) -> String {
    format!("{:02x}", seed).repeat(32)
}
