// =============================================================================
// WORLD - One self-contained entity store
// =============================================================================
// A world owns its registry, its entity allocator, its layouts and
// blocks, and its event manager. Nothing here is global; two worlds in
// one process never share state, and a component's bit in one world says
// nothing about its bit in another.
//
// Structural mutation is owner-thread-only, and the pass driver
// guarantees no jobs are in flight while it runs. Jobs reshape the world
// indirectly through command buffers.
// =============================================================================

//! The world: registry, entities, archetype storage and events.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::ecs::archetype::{ArchetypeId, ArchetypeLayout};
use crate::ecs::bitset::BitSet256;
use crate::ecs::block::{Block, BlockId};
use crate::ecs::commands::{Bundle, CommandBuffer};
use crate::ecs::component::{Component, ComponentKind, ComponentRegistry};
use crate::ecs::entity::{Entity, EntityAllocator, EntityLocation};
use crate::ecs::query::{ComponentQuery, QueryBuilder};
use crate::error::{Result, StrataError};
use crate::events::{ComponentAdded, ComponentRemoved, Event, EventManager, Subscriber};

/// A self-contained entity store plus its event manager.
///
/// Owned by the thread that created it. Reads are fine from jobs under
/// the scheduler's collision rules; everything that reshapes storage
/// asserts the owner thread.
pub struct World {
    registry: ComponentRegistry,
    entities: EntityAllocator,
    layouts: Vec<Arc<ArchetypeLayout>>,
    layout_ids: HashMap<(BitSet256, BitSet256), ArchetypeId>,
    blocks: Vec<Arc<Block>>,
    blocks_by_layout: Vec<Vec<usize>>,
    events: EventManager,
    owner: ThreadId,
}

impl World {
    /// Creates an empty world owned by the calling thread.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: ComponentRegistry::new(),
            entities: EntityAllocator::new(),
            layouts: Vec::new(),
            layout_ids: HashMap::new(),
            blocks: Vec::new(),
            blocks_by_layout: Vec::new(),
            events: EventManager::new(),
            owner: thread::current().id(),
        }
    }

    // =========================================================================
    // REGISTRATION AND QUERIES
    // =========================================================================

    /// Registers `T` as per-entity data. See [`ComponentRegistry::register`].
    pub fn register<T: Component>(&mut self) -> Result<u8> {
        self.registry.register::<T>()
    }

    /// Registers `T` as per-block shared data.
    pub fn register_shared<T: Component>(&mut self) -> Result<u8> {
        self.registry.register_shared::<T>()
    }

    /// The component registry.
    #[must_use]
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Starts building a query against this world's registry.
    pub fn query(&mut self) -> QueryBuilder<'_> {
        ComponentQuery::builder(&mut self.registry)
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    /// The event manager.
    #[must_use]
    pub fn events(&self) -> &EventManager {
        &self.events
    }

    /// Mutable access to the event manager, for firing and delivery.
    pub fn events_mut(&mut self) -> &mut EventManager {
        &mut self.events
    }

    /// Registers `handler` for events of type `E`.
    pub fn subscribe<E: Event>(&mut self, handler: Subscriber<E>) {
        self.events.subscribe(handler);
    }

    /// Delivers all pending events. Called once per pass by the driver.
    pub fn deliver_events(&mut self) {
        self.events.deliver();
    }

    // =========================================================================
    // STRUCTURAL OPERATIONS
    // =========================================================================

    /// Spawns an entity from `bundle`. Bundle types not yet registered
    /// register themselves here; the spawn then freezes the registry.
    pub fn spawn(&mut self, bundle: Bundle) -> Result<Entity> {
        self.assert_owner();
        let (components, shared) = bundle.into_parts();

        let mut signature = BitSet256::new();
        for entry in &components {
            let bit = (entry.register)(&mut self.registry)?;
            if !matches!(self.registry.info(bit).kind(), ComponentKind::Data { .. }) {
                return Err(StrataError::StorageKindMismatch { name: entry.name });
            }
            signature.set(bit);
        }
        let mut shared_signature = BitSet256::new();
        for entry in &shared {
            let bit = (entry.register)(&mut self.registry)?;
            if !matches!(self.registry.info(bit).kind(), ComponentKind::Shared) {
                return Err(StrataError::StorageKindMismatch { name: entry.name });
            }
            shared_signature.set(bit);
        }
        self.registry.freeze();

        let layout_id = self.layout_for(signature, shared_signature);
        let layout = Arc::clone(&self.layouts[layout_id.index()]);

        let mut shared_by_type: HashMap<TypeId, Arc<dyn Any + Send + Sync>> = shared
            .into_iter()
            .map(|entry| (entry.type_id, entry.value))
            .collect();
        let shared_values = layout
            .shared_types()
            .iter()
            .map(|spec| match shared_by_type.remove(&spec.type_id) {
                Some(value) => value,
                None => unreachable!("shared signature was built from this bundle"),
            })
            .collect();
        let block_index = self.block_for(layout_id, shared_values);

        let mut by_type: HashMap<TypeId, Box<dyn Any + Send>> = components
            .into_iter()
            .map(|entry| (entry.type_id, entry.value))
            .collect();
        let values = layout
            .column_types()
            .iter()
            .map(|spec| match by_type.remove(&spec.type_id) {
                Some(value) => value,
                None => unreachable!("signature was built from this bundle"),
            })
            .collect();

        let block = Arc::clone(&self.blocks[block_index]);
        let entity = self.entities.allocate();
        match block.push_row(entity, values) {
            Ok(row) => {
                self.entities.set_location(
                    entity,
                    EntityLocation {
                        block: block.id(),
                        row,
                    },
                );
                Ok(entity)
            }
            Err(err) => {
                self.entities.deallocate(entity);
                Err(err)
            }
        }
    }

    /// Destroys `entity` and compacts its block.
    pub fn despawn(&mut self, entity: Entity) -> Result<()> {
        self.assert_owner();
        let location = self
            .entities
            .location(entity)
            .ok_or(StrataError::DeadEntity { entity })?;
        let block = Arc::clone(&self.blocks[location.block.index()]);
        let (_values, moved) = block.swap_remove_row(location.row);
        if let Some(moved) = moved {
            self.entities.set_location(
                moved,
                EntityLocation {
                    block: block.id(),
                    row: location.row,
                },
            );
        }
        self.entities.deallocate(entity);
        Ok(())
    }

    /// Adds `value` to `entity`, moving it to the matching archetype, and
    /// fires [`ComponentAdded<T>`]. Overwrites in place if the entity
    /// already carries a `T`, without firing.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<()> {
        self.assert_owner();
        let location = self
            .entities
            .location(entity)
            .ok_or(StrataError::DeadEntity { entity })?;
        let bit = self.registry.bit_of::<T>()?;
        let old_block = Arc::clone(&self.blocks[location.block.index()]);
        let old_layout = Arc::clone(old_block.layout());

        if old_layout.signature().get(bit) {
            if let Some(slot) = old_block.component_mut::<T>(location.row) {
                *slot = value;
            }
            return Ok(());
        }

        let mut signature = *old_layout.signature();
        signature.set(bit);
        let shared_signature = *old_layout.shared_signature();
        let mut incoming = Some(value);
        self.move_row(entity, location, signature, shared_signature, None, |type_id| {
            (type_id == TypeId::of::<T>()).then(|| {
                let value = match incoming.take() {
                    Some(value) => value,
                    None => unreachable!("destination layout holds one column per type"),
                };
                Box::new(value) as Box<dyn Any + Send>
            })
        })?;
        self.events.fire(ComponentAdded::<T>::new(entity));
        Ok(())
    }

    /// Removes `T` from `entity`, moving it to the matching archetype,
    /// and fires [`ComponentRemoved<T>`] carrying the removed value.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<()> {
        self.assert_owner();
        let location = self
            .entities
            .location(entity)
            .ok_or(StrataError::DeadEntity { entity })?;
        let bit = self.registry.bit_of::<T>()?;
        let old_block = Arc::clone(&self.blocks[location.block.index()]);
        let old_layout = Arc::clone(old_block.layout());

        if !old_layout.signature().get(bit) {
            return Err(StrataError::MissingComponent {
                entity,
                name: std::any::type_name::<T>(),
            });
        }

        let mut signature = *old_layout.signature();
        signature.clear(bit);
        let shared_signature = *old_layout.shared_signature();
        let dropped = self.move_row(entity, location, signature, shared_signature, None, |_| None)?;
        let value = dropped
            .into_iter()
            .find_map(|boxed| boxed.downcast::<T>().ok());
        match value {
            Some(value) => {
                self.events.fire(ComponentRemoved {
                    entity,
                    value: *value,
                });
                Ok(())
            }
            None => unreachable!("removed row must contain the removed component"),
        }
    }

    /// Attaches or replaces the shared-component value of type `T` for
    /// `entity`, moving it to a block carrying exactly that value. Shared
    /// values are identified by `Arc` allocation, so entities set to the
    /// same `Arc` end up in the same blocks.
    pub fn set_shared_component<T: Component>(
        &mut self,
        entity: Entity,
        value: Arc<T>,
    ) -> Result<()> {
        self.assert_owner();
        let location = self
            .entities
            .location(entity)
            .ok_or(StrataError::DeadEntity { entity })?;
        let bit = self.registry.bit_of::<T>()?;
        if !matches!(self.registry.info(bit).kind(), ComponentKind::Shared) {
            return Err(StrataError::StorageKindMismatch {
                name: std::any::type_name::<T>(),
            });
        }
        let old_layout = Arc::clone(self.blocks[location.block.index()].layout());

        let signature = *old_layout.signature();
        let mut shared_signature = *old_layout.shared_signature();
        shared_signature.set(bit);
        self.move_row(
            entity,
            location,
            signature,
            shared_signature,
            Some((TypeId::of::<T>(), value)),
            |_| None,
        )?;
        Ok(())
    }

    /// Detaches the shared-component value of type `T` from `entity`,
    /// moving it to a block without one.
    pub fn remove_shared_component<T: Component>(&mut self, entity: Entity) -> Result<()> {
        self.assert_owner();
        let location = self
            .entities
            .location(entity)
            .ok_or(StrataError::DeadEntity { entity })?;
        let bit = self.registry.bit_of::<T>()?;
        let old_layout = Arc::clone(self.blocks[location.block.index()].layout());
        if !old_layout.shared_signature().get(bit) {
            return Err(StrataError::MissingComponent {
                entity,
                name: std::any::type_name::<T>(),
            });
        }

        let signature = *old_layout.signature();
        let mut shared_signature = *old_layout.shared_signature();
        shared_signature.clear(bit);
        self.move_row(entity, location, signature, shared_signature, None, |_| None)?;
        Ok(())
    }

    /// Applies a recorded command buffer. Convenience over
    /// [`CommandBuffer::apply`].
    pub fn apply_commands(&mut self, buffer: CommandBuffer) {
        buffer.apply(self);
    }

    // =========================================================================
    // LOOKUPS
    // =========================================================================

    /// Whether `entity` is alive in this world.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Whether `entity` carries a `T` component.
    #[must_use]
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.get_component::<T>(entity).is_some()
    }

    /// Shared reference to `entity`'s `T` component.
    #[must_use]
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        let location = self.entities.location(entity)?;
        self.blocks[location.block.index()].component::<T>(location.row)
    }

    /// Mutable reference to `entity`'s `T` component. Bumps the column's
    /// change version.
    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.assert_owner();
        let location = self.entities.location(entity)?;
        self.blocks[location.block.index()].component_mut::<T>(location.row)
    }

    /// The shared-component value of type `T` attached to `entity`'s
    /// block, if any.
    #[must_use]
    pub fn shared_component<T: Component>(&self, entity: Entity) -> Option<Arc<T>> {
        let location = self.entities.location(entity)?;
        let value = self.blocks[location.block.index()].shared_value(TypeId::of::<T>())?;
        Arc::clone(value).downcast::<T>().ok()
    }

    /// Non-empty blocks visited by `query`, in creation order.
    #[must_use]
    pub fn blocks_matching(&self, query: &ComponentQuery) -> Vec<Arc<Block>> {
        self.blocks
            .iter()
            .filter(|block| !block.is_empty() && query.matches(block.layout()))
            .cloned()
            .collect()
    }

    /// Block by id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Arc<Block>> {
        self.blocks.get(id.index())
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    /// Moves `entity`'s row to the archetype with `signature` and
    /// `shared_signature`. Shared values carry over from the source
    /// block except for the type named by `shared_override`. `supply`
    /// provides values for destination columns absent from the source
    /// row; source values for columns absent from the destination are
    /// returned.
    fn move_row(
        &mut self,
        entity: Entity,
        location: EntityLocation,
        signature: BitSet256,
        shared_signature: BitSet256,
        shared_override: Option<(TypeId, Arc<dyn Any + Send + Sync>)>,
        mut supply: impl FnMut(TypeId) -> Option<Box<dyn Any + Send>>,
    ) -> Result<Vec<Box<dyn Any + Send>>> {
        let old_block = Arc::clone(&self.blocks[location.block.index()]);
        let old_layout = Arc::clone(old_block.layout());

        let layout_id = self.layout_for(signature, shared_signature);
        let dest_layout = Arc::clone(&self.layouts[layout_id.index()]);
        let dest_shared = dest_layout
            .shared_types()
            .iter()
            .map(|spec| {
                if let Some((type_id, value)) = &shared_override {
                    if *type_id == spec.type_id {
                        return Arc::clone(value);
                    }
                }
                match old_block.shared_value(spec.type_id) {
                    Some(value) => Arc::clone(value),
                    None => unreachable!("destination shared type has no source value"),
                }
            })
            .collect();
        let dest_index = self.block_for(layout_id, dest_shared);
        let dest_block = Arc::clone(&self.blocks[dest_index]);

        let (values, moved) = old_block.swap_remove_row(location.row);
        if let Some(moved) = moved {
            self.entities.set_location(
                moved,
                EntityLocation {
                    block: old_block.id(),
                    row: location.row,
                },
            );
        }
        let mut by_type: HashMap<TypeId, Box<dyn Any + Send>> = old_layout
            .column_types()
            .iter()
            .map(|spec| spec.type_id)
            .zip(values)
            .collect();

        let dest_values = dest_layout
            .column_types()
            .iter()
            .map(|spec| match by_type.remove(&spec.type_id) {
                Some(value) => value,
                None => match supply(spec.type_id) {
                    Some(value) => value,
                    None => unreachable!("destination column has no source value"),
                },
            })
            .collect();

        let row = dest_block.push_row(entity, dest_values)?;
        self.entities.set_location(
            entity,
            EntityLocation {
                block: dest_block.id(),
                row,
            },
        );
        Ok(by_type.into_values().collect())
    }

    fn layout_for(&mut self, signature: BitSet256, shared_signature: BitSet256) -> ArchetypeId {
        if let Some(&id) = self.layout_ids.get(&(signature, shared_signature)) {
            return id;
        }
        let id = ArchetypeId(self.layouts.len() as u32);
        let layout = ArchetypeLayout::new(id, signature, shared_signature, &self.registry);
        self.layouts.push(layout);
        self.blocks_by_layout.push(Vec::new());
        self.layout_ids.insert((signature, shared_signature), id);
        tracing::debug!(layout = id.0, "new archetype layout");
        id
    }

    /// Finds a non-full block of the layout holding exactly these shared
    /// values (by `Arc` identity), or creates one.
    fn block_for(&mut self, layout_id: ArchetypeId, shared: Vec<Arc<dyn Any + Send + Sync>>) -> usize {
        for &index in &self.blocks_by_layout[layout_id.index()] {
            let block = &self.blocks[index];
            if block.is_full() {
                continue;
            }
            let same = block
                .shared_values()
                .iter()
                .zip(shared.iter())
                .all(|(a, b)| Arc::ptr_eq(a, b));
            if same {
                return index;
            }
        }
        let index = self.blocks.len();
        let block = Block::new(
            BlockId(index as u32),
            Arc::clone(&self.layouts[layout_id.index()]),
            shared,
        );
        self.blocks.push(Arc::new(block));
        self.blocks_by_layout[layout_id.index()].push(index);
        index
    }

    fn assert_owner(&self) {
        assert_eq!(
            thread::current().id(),
            self.owner,
            "world storage may only be reshaped on its owner thread"
        );
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TESTS
// =============================================================================
