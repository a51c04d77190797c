//! Shared setup for engine tests.

use std::path::Path;
use std::time::Duration;

use crate::engine::{Engine, EngineConfig};

/// Small pages so transport is cheap to trigger; background compaction
/// parked so tests drive it explicitly.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        page_size: 2048,
        transport_interval: Duration::from_millis(20),
        compaction_interval: Duration::from_secs(3600),
        compaction_threshold: usize::MAX,
        ..EngineConfig::default()
    }
}

pub fn open_engine(root: &Path) -> Engine {
    Engine::open(root.join("db"), root.join("buffer"), test_config()).unwrap()
}
