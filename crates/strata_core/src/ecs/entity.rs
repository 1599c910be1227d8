// =============================================================================
// ENTITY - Handles, generations and the allocator behind them
// =============================================================================
// An entity is a 64-bit handle packing a 32-bit slot index and a 32-bit
// generation. Slots are recycled through a free list; the generation is
// bumped on every deallocation so a stale handle can never alias a new
// entity living in the same slot.
// =============================================================================

//! Entity handles and the slot allocator that validates them.

use crate::ecs::block::BlockId;

/// A handle to an entity: 32-bit slot index in the low half, 32-bit
/// generation in the high half.
///
/// Handles are plain values. Whether a handle is still alive is a question
/// for the world that issued it, not for the handle itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity(u64);

impl Entity {
    #[inline]
    pub(crate) const fn from_parts(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    /// Slot index of this handle.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Generation of this handle.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Raw 64-bit form, stable for the lifetime of the handle.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

/// Where an entity's row currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    /// Block holding the row.
    pub block: BlockId,
    /// Row index inside the block.
    pub row: u32,
}

/// Per-slot allocator state.
#[derive(Debug)]
struct Slot {
    generation: u32,
    location: Option<EntityLocation>,
    alive: bool,
}

/// Issues and validates entity handles, and tracks where each live
/// entity's row is stored.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    slots: Vec<Slot>,
    free: Vec<u32>,
    alive: usize,
}

impl EntityAllocator {
    /// Creates an empty allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh handle. Recycles the most recently freed slot if
    /// one exists.
    pub fn allocate(&mut self) -> Entity {
        self.alive += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.alive = true;
            slot.location = None;
            Entity::from_parts(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                location: None,
                alive: true,
            });
            Entity::from_parts(index, 0)
        }
    }

    /// Frees `entity`'s slot and bumps its generation. Returns `false` if
    /// the handle was already dead.
    pub fn deallocate(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let slot = &mut self.slots[entity.index() as usize];
        slot.alive = false;
        slot.location = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(entity.index());
        self.alive -= 1;
        true
    }

    /// Returns whether `entity` refers to a live slot of the matching
    /// generation.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.slots
            .get(entity.index() as usize)
            .is_some_and(|slot| slot.alive && slot.generation == entity.generation())
    }

    /// Current storage location of `entity`, if it is alive and placed.
    #[must_use]
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        if !self.is_alive(entity) {
            return None;
        }
        self.slots[entity.index() as usize].location
    }

    /// Records where `entity`'s row now lives.
    pub fn set_location(&mut self, entity: Entity, location: EntityLocation) {
        debug_assert!(self.is_alive(entity));
        self.slots[entity.index() as usize].location = Some(location);
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alive
    }

    /// Returns whether no entities are alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alive == 0
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trip() {
        let e = Entity::from_parts(0xDEAD_BEEF, 42);
        assert_eq!(e.index(), 0xDEAD_BEEF);
        assert_eq!(e.generation(), 42);
    }

    #[test]
    fn recycled_slot_gets_new_generation() {
        let mut alloc = EntityAllocator::new();
        let first = alloc.allocate();
        assert!(alloc.is_alive(first));
        assert!(alloc.deallocate(first));
        assert!(!alloc.is_alive(first));

        let second = alloc.allocate();
        assert_eq!(second.index(), first.index());
        assert_ne!(second.generation(), first.generation());
        // The stale handle stays dead even though the slot is live again.
        assert!(!alloc.is_alive(first));
        assert!(alloc.is_alive(second));
    }

    #[test]
    fn double_deallocate_is_rejected() {
        let mut alloc = EntityAllocator::new();
        let e = alloc.allocate();
        assert!(alloc.deallocate(e));
        assert!(!alloc.deallocate(e));
        assert_eq!(alloc.len(), 0);
    }

    #[test]
    fn location_is_cleared_on_deallocate() {
        let mut alloc = EntityAllocator::new();
        let e = alloc.allocate();
        alloc.set_location(
            e,
            EntityLocation {
                block: BlockId(0),
                row: 7,
            },
        );
        assert_eq!(alloc.location(e).unwrap().row, 7);
        alloc.deallocate(e);
        assert_eq!(alloc.location(e), None);
    }
}
