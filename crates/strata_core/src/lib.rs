// =============================================================================
// STRATA CORE
// =============================================================================
// Archetype entity storage with a dependency-inferring parallel job
// scheduler, a frame-bounded event bus and deferred structural commands.
//
// The shape of a frame:
//
//   - Entities with the same component signature and shared values live
//     together in fixed-capacity SoA blocks.
//   - Systems declare their component access as a query. The schedule
//     turns each system into a job group with one job per matched block;
//     groups whose declarations collide are chained, everything else
//     runs in parallel.
//   - Jobs never reshape storage. They record structural changes into
//     command buffers, applied on the owner thread once all jobs are
//     done, after which the frame's events are delivered.
//
// Per-column version counters drive change filters, so a system can skip
// whole blocks nothing wrote to since its last pass.
// =============================================================================

//! Archetype ECS core: blocks, queries, jobs, events and commands.
//!
//! ```
//! use strata_core::{Bundle, CommandBuffer, ComponentQuery, JobScheduler, Schedule, System, World};
//! use strata_core::BlockAccessor;
//!
//! struct Position(f32);
//! struct Velocity(f32);
//!
//! struct Movement {
//!     query: ComponentQuery,
//! }
//!
//! impl System for Movement {
//!     fn name(&self) -> &'static str {
//!         "movement"
//!     }
//!
//!     fn query(&self) -> &ComponentQuery {
//!         &self.query
//!     }
//!
//!     fn process_block(&self, dt: f32, block: &BlockAccessor<'_>, _commands: &mut CommandBuffer) {
//!         let positions = block.component_data_mut::<Position>();
//!         let velocities = block.component_data::<Velocity>();
//!         for (position, velocity) in positions.iter_mut().zip(velocities) {
//!             position.0 += velocity.0 * dt;
//!         }
//!     }
//! }
//!
//! let mut world = World::new();
//! let mut scheduler = JobScheduler::new(Some(0));
//! let mut schedule = Schedule::new();
//!
//! world
//!     .spawn(Bundle::new().with(Position(0.0)).with(Velocity(1.0)))
//!     .unwrap();
//! let query = world
//!     .query()
//!     .write::<Position>()
//!     .read::<Velocity>()
//!     .build()
//!     .unwrap();
//! schedule.add_system(Movement { query });
//! schedule.run_pass(1.0 / 60.0, &mut world, &mut scheduler);
//! ```

pub mod config;
pub mod ecs;
pub mod error;
pub mod events;
pub mod jobs;
pub mod schedule;
pub mod system;

pub use crate::config::CoreConfig;
pub use crate::ecs::archetype::{ArchetypeId, ArchetypeLayout};
pub use crate::ecs::bitset::BitSet256;
pub use crate::ecs::block::{Block, BlockAccessor, BlockId, BLOCK_CAP};
pub use crate::ecs::commands::{Bundle, CommandBuffer, Prefab};
pub use crate::ecs::component::{Component, ComponentRegistry};
pub use crate::ecs::entity::Entity;
pub use crate::ecs::filter::{
    BlockFilter, ChangedFilter, CombineAll, CombineAny, EntityAddedRemovedFilter,
};
pub use crate::ecs::query::ComponentQuery;
pub use crate::ecs::world::World;
pub use crate::error::{Result, StrataError};
pub use crate::events::{
    subscriber, ComponentAdded, ComponentRemoved, Event, EventHandler, EventManager, Subscriber,
    DEFAULT_PENDING_WARN,
};
pub use crate::jobs::{JobGroupId, JobScheduler, RING_SLOTS};
pub use crate::schedule::Schedule;
pub use crate::system::System;
