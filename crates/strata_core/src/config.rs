// =============================================================================
// CONFIG - Startup configuration
// =============================================================================

//! TOML-backed configuration, loaded once at startup.

use std::path::Path;

use serde::Deserialize;

use crate::ecs::world::World;
use crate::error::{Result, StrataError};
use crate::events::DEFAULT_PENDING_WARN;
use crate::jobs::JobScheduler;

/// Runtime knobs loaded from a TOML file. Every field has a default, so
/// an empty file is a valid config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// Worker thread count for the job scheduler. `None` means one fewer
    /// than the available hardware parallelism.
    pub worker_threads: Option<usize>,
    /// Pending-event count per queue past which firing logs a warning.
    pub max_event_buffer_warn: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            max_event_buffer_warn: DEFAULT_PENDING_WARN,
        }
    }
}

impl CoreConfig {
    /// Loads and parses the config at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| StrataError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| StrataError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(?path, "config loaded");
        Ok(config)
    }

    /// Builds a job scheduler per this config.
    #[must_use]
    pub fn build_scheduler(&self) -> JobScheduler {
        JobScheduler::new(self.worker_threads)
    }

    /// Builds a world per this config.
    #[must_use]
    pub fn build_world(&self) -> World {
        let mut world = World::new();
        world.events_mut().set_pending_warn(self.max_event_buffer_warn);
        world
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: CoreConfig = toml::from_str("").unwrap();
        assert_eq!(config.worker_threads, None);
        assert_eq!(config.max_event_buffer_warn, DEFAULT_PENDING_WARN);
    }

    #[test]
    fn worker_threads_parse() {
        let config: CoreConfig = toml::from_str("worker_threads = 3").unwrap();
        assert_eq!(config.worker_threads, Some(3));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<CoreConfig>("workers = 3").is_err());
    }

    #[test]
    fn missing_file_reports_the_path() {
        let err = CoreConfig::load("/nonexistent/strata.toml").unwrap_err();
        assert!(matches!(err, StrataError::ConfigIo { .. }));
    }
}
