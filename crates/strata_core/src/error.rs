// =============================================================================
// ERRORS - Crate-wide error type
// =============================================================================

//! Error type shared by storage, scheduling and configuration.

use std::path::PathBuf;

use thiserror::Error;

use crate::ecs::entity::Entity;

/// Errors surfaced by world operations, query construction and config
/// loading.
#[derive(Debug, Error)]
pub enum StrataError {
    /// All 256 component bits are taken.
    #[error("component bit space exhausted while registering `{name}` (256 max)")]
    ComponentLimitExceeded {
        /// Type name of the component that did not fit.
        name: &'static str,
    },

    /// A component type was used before being registered.
    #[error("component `{name}` used before registration")]
    UnregisteredComponent {
        /// Type name of the unregistered component.
        name: &'static str,
    },

    /// Registration was attempted after the registry froze.
    #[error("registry is frozen; `{name}` must be registered before the first spawn")]
    RegistryFrozen {
        /// Type name of the late component.
        name: &'static str,
    },

    /// A query both requires and excludes the same component.
    #[error("query includes and excludes component `{name}`")]
    IncludeExcludeConflict {
        /// Type name of the conflicting component.
        name: &'static str,
    },

    /// The entity handle is stale or was never issued.
    #[error("entity {entity} is not alive")]
    DeadEntity {
        /// The offending handle.
        entity: Entity,
    },

    /// The entity does not carry the requested component.
    #[error("entity {entity} has no `{name}` component")]
    MissingComponent {
        /// The entity that was inspected.
        entity: Entity,
        /// Type name of the absent component.
        name: &'static str,
    },

    /// A type registered as shared data was used as per-entity data, or
    /// the other way around.
    #[error("component `{name}` used with a different storage kind than it was registered with")]
    StorageKindMismatch {
        /// Type name of the misused component.
        name: &'static str,
    },

    /// A type-erased value did not match the column it was pushed into.
    #[error("value of the wrong type pushed into a `{expected}` column")]
    ColumnTypeMismatch {
        /// Element type name of the column.
        expected: &'static str,
    },

    /// Reading a config file failed.
    #[error("failed to read config file {path:?}")]
    ConfigIo {
        /// Path that was read.
        path: PathBuf,
        /// Underlying io error.
        #[source]
        source: std::io::Error,
    },

    /// Parsing a config file failed.
    #[error("failed to parse config file {path:?}")]
    ConfigParse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = StrataError> = std::result::Result<T, E>;
