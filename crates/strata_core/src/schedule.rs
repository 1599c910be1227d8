// =============================================================================
// SCHEDULE - Drives one pass over all registered systems
// =============================================================================
// A pass runs in fixed phases:
//
//   1. before_update, per system, in registration order
//   2. per system: start a job group, queue one job per matched block
//   3. drain every job (the caller participates)
//   4. refresh each system's filter for the blocks it processed
//   5. after_update, per system, in registration order
//   6. apply command buffers: job buffers in queueing order, then
//      after_update buffers in registration order
//   7. deliver events
//
// Systems appear parallel to each other except where their queries
// collide; the job scheduler chains colliding groups in registration
// order, which is what makes phase 5's ordering deterministic.
// =============================================================================

//! The pass driver tying world, systems and job scheduler together.

use std::sync::Arc;

use crate::ecs::block::{Block, BlockAccessor};
use crate::ecs::commands::CommandBuffer;
use crate::ecs::filter::BlockFilter;
use crate::ecs::world::World;
use crate::jobs::JobScheduler;
use crate::system::System;

struct SystemEntry {
    system: Arc<dyn System>,
    filter: Option<Box<dyn BlockFilter>>,
}

/// Registered systems, run in registration order every pass.
#[derive(Default)]
pub struct Schedule {
    entries: Vec<SystemEntry>,
}

impl Schedule {
    /// Creates an empty schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `system` to the pass.
    pub fn add_system<S: System + 'static>(&mut self, system: S) {
        self.entries.push(SystemEntry {
            system: Arc::new(system),
            filter: None,
        });
    }

    /// Appends `system` gated by `filter`. Blocks the filter excludes are
    /// skipped for this system only.
    pub fn add_system_filtered<S: System + 'static>(
        &mut self,
        system: S,
        filter: Box<dyn BlockFilter>,
    ) {
        self.entries.push(SystemEntry {
            system: Arc::new(system),
            filter: Some(filter),
        });
    }

    /// Number of registered systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no system is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs one pass. Must be called on `world`'s owner thread.
    pub fn run_pass(&mut self, dt: f32, world: &mut World, scheduler: &mut JobScheduler) {
        let _span = tracing::debug_span!("pass").entered();

        for entry in &self.entries {
            entry.system.before_update(dt, world);
        }

        let (sender, receiver) = crossbeam_channel::unbounded::<(usize, CommandBuffer)>();
        let mut sequence = 0usize;
        let mut processed: Vec<Vec<Arc<Block>>> = Vec::with_capacity(self.entries.len());
        for entry in &mut self.entries {
            let query = *entry.system.query();
            let group = scheduler.start_group(query);
            let mut queued = 0usize;
            let mut ran = Vec::new();
            for block in world.blocks_matching(&query) {
                if let Some(filter) = entry.filter.as_deref() {
                    if filter.filter_block(&block) {
                        continue;
                    }
                    ran.push(Arc::clone(&block));
                }
                let system = Arc::clone(&entry.system);
                let sender = sender.clone();
                let seq = sequence;
                sequence += 1;
                queued += 1;
                scheduler.queue_job(group, move || {
                    let mut commands = CommandBuffer::new();
                    let accessor = BlockAccessor::new(&block);
                    system.process_block(dt, &accessor, &mut commands);
                    if !commands.is_empty() {
                        // The receiver outlives the pass; a send can only
                        // fail if the driver itself is gone.
                        let _ = sender.send((seq, commands));
                    }
                });
            }
            processed.push(ran);
            tracing::trace!(system = entry.system.name(), jobs = queued, "group queued");
        }
        drop(sender);

        scheduler.complete_all();

        // Filters refresh only for blocks their system processed, and only
        // after its jobs are done, so a system's own writes do not
        // re-trigger it next pass.
        for (entry, blocks) in self.entries.iter_mut().zip(&processed) {
            if let Some(filter) = entry.filter.as_deref_mut() {
                for block in blocks {
                    filter.update_filter(block);
                }
            }
        }

        let mut after_buffers = Vec::new();
        for entry in &self.entries {
            let mut commands = CommandBuffer::new();
            entry.system.after_update(dt, world, &mut commands);
            if !commands.is_empty() {
                after_buffers.push(commands);
            }
        }

        let mut buffers: Vec<(usize, CommandBuffer)> = receiver.try_iter().collect();
        buffers.sort_by_key(|(seq, _)| *seq);
        for (_, buffer) in buffers {
            buffer.apply(world);
        }
        for buffer in after_buffers {
            buffer.apply(world);
        }

        world.deliver_events();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::commands::Bundle;
    use crate::ecs::query::ComponentQuery;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position(f32);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity(f32);

    struct Movement {
        query: ComponentQuery,
    }

    impl System for Movement {
        fn name(&self) -> &'static str {
            "movement"
        }

        fn query(&self) -> &ComponentQuery {
            &self.query
        }

        fn process_block(&self, dt: f32, block: &BlockAccessor<'_>, _commands: &mut CommandBuffer) {
            let positions = block.component_data_mut::<Position>();
            let velocities = block.component_data::<Velocity>();
            for (position, velocity) in positions.iter_mut().zip(velocities) {
                position.0 += velocity.0 * dt;
            }
        }
    }

    #[test]
    fn pass_moves_entities() {
        let mut world = World::new();
        let mut scheduler = JobScheduler::new(Some(0));
        let mut schedule = Schedule::new();

        let entity = world
            .spawn(Bundle::new().with(Position(1.0)).with(Velocity(2.0)))
            .unwrap();
        let query = world
            .query()
            .write::<Position>()
            .read::<Velocity>()
            .build()
            .unwrap();
        schedule.add_system(Movement { query });

        schedule.run_pass(0.5, &mut world, &mut scheduler);
        assert_eq!(world.get_component::<Position>(entity), Some(&Position(2.0)));
        schedule.run_pass(0.5, &mut world, &mut scheduler);
        assert_eq!(world.get_component::<Position>(entity), Some(&Position(3.0)));
    }
}
