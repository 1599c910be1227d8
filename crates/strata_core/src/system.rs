// =============================================================================
// SYSTEM - The unit of per-pass logic
// =============================================================================

//! The [`System`] trait implemented by all pass logic.

use crate::ecs::block::BlockAccessor;
use crate::ecs::commands::CommandBuffer;
use crate::ecs::query::ComponentQuery;
use crate::ecs::world::World;

/// Logic executed once per pass over every block its query matches.
///
/// `process_block` runs as a job, potentially on any worker thread and
/// concurrently with other systems'. It must only touch components its
/// query declares; the scheduler serializes systems whose declarations
/// collide, nothing more. Structural changes go through the command
/// buffer.
///
/// `before_update` and `after_update` run on the owner thread with full
/// world access, before any job of the pass starts and after all of them
/// have finished respectively. Systems needing mutable state across
/// `process_block` calls use interior mutability; the trait is `&self`
/// throughout because one system instance is shared with its jobs.
pub trait System: Send + Sync {
    /// Name used in logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Declared component access. Must not change between passes.
    fn query(&self) -> &ComponentQuery;

    /// Owner-thread hook before the pass's jobs are queued.
    fn before_update(&self, _dt: f32, _world: &mut World) {}

    /// Per-block work. Runs as a job.
    fn process_block(&self, dt: f32, block: &BlockAccessor<'_>, commands: &mut CommandBuffer);

    /// Owner-thread hook after every job of the pass has finished, before
    /// command buffers are applied. Commands recorded here flush after
    /// the jobs' buffers.
    fn after_update(&self, _dt: f32, _world: &mut World, _commands: &mut CommandBuffer) {}
}
