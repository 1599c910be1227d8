// =============================================================================
// ECS - Archetype-based entity storage
// =============================================================================

//! Entities, components, archetype blocks, queries, filters and deferred
//! commands.

pub mod archetype;
pub mod bitset;
pub mod block;
pub mod commands;
pub mod component;
pub mod entity;
pub mod filter;
pub mod query;
pub mod world;
