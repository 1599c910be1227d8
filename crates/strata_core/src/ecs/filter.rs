// =============================================================================
// FILTERS - Version-based block skipping
// =============================================================================
// Filters let a system skip blocks nothing happened to since its last
// pass. The contract is two operations: filter_block is a pure comparison
// of a block's version counters against a per-block cache, and
// update_filter refreshes that cache. The pass driver updates a system's
// filter only for blocks the system actually processed, after its jobs
// have finished, so a system's own writes are absorbed instead of
// re-triggering it next pass.
//
// The cache is keyed by BlockId, which is stable for the life of the
// world. A filter is stateful and belongs to exactly one system
// registration; sharing one filter between systems would
// cross-contaminate the caches.
//
// Combinators never short-circuit, in either operation. Every child sees
// every block, so child caches stay in step even when another child
// already decided the outcome.
// =============================================================================

//! Change-detection filters over blocks.

use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;

use crate::ecs::block::{Block, BlockId};
use crate::ecs::component::Component;

/// Decides per block whether a system's pass should skip it.
pub trait BlockFilter: Send {
    /// Returns `true` to exclude `block` from the current pass. Pure:
    /// repeated calls without an intervening [`update_filter`] give the
    /// same answer.
    ///
    /// [`update_filter`]: Self::update_filter
    fn filter_block(&self, block: &Block) -> bool;

    /// Refreshes the cache for `block`. Called by the pass driver for
    /// every block the system processed, once its jobs have finished.
    fn update_filter(&mut self, block: &Block);
}

/// Excludes blocks whose `T` column version is unchanged since the last
/// update for that block. A block never updated for always passes.
pub struct ChangedFilter<T: Component> {
    seen: HashMap<BlockId, u32>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component> ChangedFilter<T> {
    /// Creates a filter with an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            seen: HashMap::new(),
            _marker: PhantomData,
        }
    }
}

impl<T: Component> Default for ChangedFilter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Component> BlockFilter for ChangedFilter<T> {
    fn filter_block(&self, block: &Block) -> bool {
        let Some(column) = block.column_of(TypeId::of::<T>()) else {
            // No column, nothing to have changed.
            return true;
        };
        match self.seen.get(&block.id()) {
            Some(last) => *last == column.version(),
            None => false,
        }
    }

    fn update_filter(&mut self, block: &Block) {
        if let Some(column) = block.column_of(TypeId::of::<T>()) {
            self.seen.insert(block.id(), column.version());
        }
    }
}

/// Excludes blocks whose row membership is unchanged since the last
/// update for that block. Row membership changes on any entity add,
/// remove or archetype move touching the block.
#[derive(Default)]
pub struct EntityAddedRemovedFilter {
    seen: HashMap<BlockId, u32>,
}

impl EntityAddedRemovedFilter {
    /// Creates a filter with an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockFilter for EntityAddedRemovedFilter {
    fn filter_block(&self, block: &Block) -> bool {
        match self.seen.get(&block.id()) {
            Some(last) => *last == block.entity_version(),
            None => false,
        }
    }

    fn update_filter(&mut self, block: &Block) {
        self.seen.insert(block.id(), block.entity_version());
    }
}

/// Passes a block if any child passes it. Excludes only when every child
/// excludes.
pub struct CombineAny {
    children: Vec<Box<dyn BlockFilter>>,
}

impl CombineAny {
    /// Combines `children`. An empty combinator excludes every block.
    #[must_use]
    pub fn new(children: Vec<Box<dyn BlockFilter>>) -> Self {
        Self { children }
    }
}

impl BlockFilter for CombineAny {
    fn filter_block(&self, block: &Block) -> bool {
        // fold instead of any: every child must observe the block.
        self.children
            .iter()
            .fold(true, |all, child| child.filter_block(block) && all)
    }

    fn update_filter(&mut self, block: &Block) {
        for child in &mut self.children {
            child.update_filter(block);
        }
    }
}

/// Passes a block only if every child passes it. Excludes when any child
/// excludes.
pub struct CombineAll {
    children: Vec<Box<dyn BlockFilter>>,
}

impl CombineAll {
    /// Combines `children`. An empty combinator passes every block.
    #[must_use]
    pub fn new(children: Vec<Box<dyn BlockFilter>>) -> Self {
        Self { children }
    }
}

impl BlockFilter for CombineAll {
    fn filter_block(&self, block: &Block) -> bool {
        self.children
            .iter()
            .fold(false, |any, child| child.filter_block(block) || any)
    }

    fn update_filter(&mut self, block: &Block) {
        for child in &mut self.children {
            child.update_filter(block);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::archetype::{ArchetypeId, ArchetypeLayout};
    use crate::ecs::bitset::BitSet256;
    use crate::ecs::component::ComponentRegistry;
    use crate::ecs::entity::Entity;

    struct Health(#[allow(dead_code)] u32);

    fn block_with_health() -> Block {
        let mut reg = ComponentRegistry::new();
        let bit = reg.register::<Health>().unwrap();
        let layout =
            ArchetypeLayout::new(ArchetypeId(0), BitSet256::single(bit), BitSet256::new(), &reg);
        let block = Block::new(BlockId(0), layout, Vec::new());
        block
            .push_row(Entity::from_parts(0, 0), vec![Box::new(Health(100))])
            .unwrap();
        block
    }

    #[test]
    fn changed_filter_includes_until_updated() {
        let block = block_with_health();
        let mut filter = ChangedFilter::<Health>::new();

        // Pure: the answer holds until update_filter runs.
        assert!(!filter.filter_block(&block));
        assert!(!filter.filter_block(&block));

        filter.update_filter(&block);
        assert!(filter.filter_block(&block));

        block.column_of(TypeId::of::<Health>()).unwrap().bump_version();
        assert!(!filter.filter_block(&block));
        assert!(!filter.filter_block(&block));
        filter.update_filter(&block);
        assert!(filter.filter_block(&block));
    }

    #[test]
    fn changed_filter_absorbs_writes_before_its_update() {
        let block = block_with_health();
        let mut filter = ChangedFilter::<Health>::new();

        // A write landing between the comparison and the update is
        // swallowed by the update, the way a system's own writes are.
        assert!(!filter.filter_block(&block));
        block.column_of(TypeId::of::<Health>()).unwrap().bump_version();
        filter.update_filter(&block);
        assert!(filter.filter_block(&block));
    }

    #[test]
    fn changed_filter_excludes_blocks_without_the_column() {
        let block = block_with_health();
        struct Missing;
        let mut filter = ChangedFilter::<Missing>::new();
        assert!(filter.filter_block(&block));
        // Updating caches nothing for an absent column.
        filter.update_filter(&block);
        assert!(filter.filter_block(&block));
    }

    #[test]
    fn membership_filter_reacts_to_row_changes() {
        let block = block_with_health();
        let mut filter = EntityAddedRemovedFilter::new();

        assert!(!filter.filter_block(&block));
        filter.update_filter(&block);
        assert!(filter.filter_block(&block));

        block
            .push_row(Entity::from_parts(1, 0), vec![Box::new(Health(50))])
            .unwrap();
        assert!(!filter.filter_block(&block));
    }

    #[test]
    fn combine_any_excludes_only_when_all_children_do() {
        let block = block_with_health();
        // One child tracks Health changes, one tracks membership. After a
        // version bump only the change child passes; the combinator must
        // still pass the block.
        let mut filter = CombineAny::new(vec![
            Box::new(ChangedFilter::<Health>::new()),
            Box::new(EntityAddedRemovedFilter::new()),
        ]);

        assert!(!filter.filter_block(&block));
        filter.update_filter(&block);
        assert!(filter.filter_block(&block));

        block.column_of(TypeId::of::<Health>()).unwrap().bump_version();
        assert!(!filter.filter_block(&block));
    }

    #[test]
    fn combinator_updates_every_child_cache() {
        let block = block_with_health();
        let mut filter = CombineAny::new(vec![
            Box::new(ChangedFilter::<Health>::new()),
            Box::new(EntityAddedRemovedFilter::new()),
        ]);
        assert!(!filter.filter_block(&block));
        filter.update_filter(&block);

        // Both a data change and a membership change happen before the
        // next pass. One update must refresh both children for this to
        // read as exactly one passing pass.
        block.column_of(TypeId::of::<Health>()).unwrap().bump_version();
        block
            .push_row(Entity::from_parts(1, 0), vec![Box::new(Health(1))])
            .unwrap();
        assert!(!filter.filter_block(&block));
        filter.update_filter(&block);
        assert!(filter.filter_block(&block));
    }

    #[test]
    fn combine_all_excludes_when_any_child_does() {
        let block = block_with_health();
        let mut filter = CombineAll::new(vec![
            Box::new(ChangedFilter::<Health>::new()),
            Box::new(EntityAddedRemovedFilter::new()),
        ]);

        assert!(!filter.filter_block(&block));
        filter.update_filter(&block);

        // Only the data column changes; membership is stale, so the
        // conjunction excludes.
        block.column_of(TypeId::of::<Health>()).unwrap().bump_version();
        assert!(filter.filter_block(&block));
    }

    #[test]
    fn empty_combinators() {
        let block = block_with_health();
        assert!(CombineAny::new(Vec::new()).filter_block(&block));
        assert!(!CombineAll::new(Vec::new()).filter_block(&block));
    }
}
