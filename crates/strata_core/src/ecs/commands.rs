// =============================================================================
// COMMANDS - Deferred structural mutation
// =============================================================================
// Jobs iterate block storage directly and therefore must never reshape
// it. Anything structural a job wants, creating or destroying entities,
// adding or removing components, raising events, is recorded into a
// command buffer and applied on the owner thread after the pass's jobs
// have all finished. Commands apply in recording order; a failing
// command is logged and skipped, never allowed to abort the rest of the
// buffer.
// =============================================================================

//! Command buffers, bundles and prefabs.

use std::any::{Any, TypeId};
use std::sync::Arc;

use crate::ecs::component::{Component, ComponentRegistry};
use crate::ecs::entity::Entity;
use crate::ecs::world::World;
use crate::error::Result;
use crate::events::Event;

/// Recipe producing a fresh [`Bundle`] per instantiation.
pub type Prefab = dyn Fn() -> Bundle + Send + Sync;

/// One per-entity component carried by a bundle.
pub(crate) struct BundleComponent {
    pub(crate) type_id: TypeId,
    pub(crate) name: &'static str,
    /// Registers the type if the registry is still open. Idempotent.
    pub(crate) register: fn(&mut ComponentRegistry) -> Result<u8>,
    pub(crate) value: Box<dyn Any + Send>,
}

/// One shared-component value carried by a bundle.
pub(crate) struct BundleShared {
    pub(crate) type_id: TypeId,
    pub(crate) name: &'static str,
    pub(crate) register: fn(&mut ComponentRegistry) -> Result<u8>,
    pub(crate) value: Arc<dyn Any + Send + Sync>,
}

/// Components for one entity, gathered before it exists.
///
/// Adding a second value of the same type replaces the first. Types named
/// in a bundle register themselves at spawn, so long as the registry is
/// still open.
#[derive(Default)]
pub struct Bundle {
    components: Vec<BundleComponent>,
    shared: Vec<BundleShared>,
}

impl Bundle {
    /// Creates an empty bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds per-entity component data.
    #[must_use]
    pub fn with<T: Component>(mut self, value: T) -> Self {
        let type_id = TypeId::of::<T>();
        self.components.retain(|entry| entry.type_id != type_id);
        self.components.push(BundleComponent {
            type_id,
            name: std::any::type_name::<T>(),
            register: ComponentRegistry::register::<T>,
            value: Box::new(value),
        });
        self
    }

    /// Attaches a shared-component value. Entities spawned with the same
    /// `Arc` land in the same blocks.
    #[must_use]
    pub fn with_shared<T: Component>(mut self, value: Arc<T>) -> Self {
        let type_id = TypeId::of::<T>();
        self.shared.retain(|entry| entry.type_id != type_id);
        self.shared.push(BundleShared {
            type_id,
            name: std::any::type_name::<T>(),
            register: ComponentRegistry::register_shared::<T>,
            value,
        });
        self
    }

    /// Number of per-entity components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the bundle carries no per-entity components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Vec<BundleComponent>, Vec<BundleShared>) {
        (self.components, self.shared)
    }
}

struct Command {
    name: &'static str,
    op: Box<dyn FnOnce(&mut World) -> Result<()> + Send>,
}

/// Records structural mutations for deferred application.
#[derive(Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    /// Defers spawning an entity from `bundle`.
    pub fn create(&mut self, bundle: Bundle) {
        self.push("create", move |world| world.spawn(bundle).map(|_| ()));
    }

    /// Defers instantiating `prefab` as a new entity.
    pub fn instantiate(&mut self, prefab: Arc<Prefab>) {
        self.push("instantiate", move |world| {
            world.spawn(prefab()).map(|_| ())
        });
    }

    /// Defers destroying `entity`.
    pub fn destroy(&mut self, entity: Entity) {
        self.push("destroy", move |world| world.despawn(entity));
    }

    /// Defers adding `value` to `entity`. Fires a `ComponentAdded<T>`
    /// event when applied.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) {
        self.push("add_component", move |world| {
            world.add_component(entity, value)
        });
    }

    /// Defers removing `T` from `entity`. Fires a `ComponentRemoved<T>`
    /// event carrying the removed value when applied.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) {
        self.push("remove_component", move |world| {
            world.remove_component::<T>(entity)
        });
    }

    /// Defers attaching or replacing `entity`'s shared value of type `T`.
    pub fn set_shared<T: Component>(&mut self, entity: Entity, value: Arc<T>) {
        self.push("set_shared", move |world| {
            world.set_shared_component(entity, value)
        });
    }

    /// Defers detaching `entity`'s shared value of type `T`.
    pub fn remove_shared<T: Component>(&mut self, entity: Entity) {
        self.push("remove_shared", move |world| {
            world.remove_shared_component::<T>(entity)
        });
    }

    /// Defers firing `event`. This is how jobs raise events; direct
    /// firing is owner-thread-only.
    pub fn fire_event<E: Event>(&mut self, event: E) {
        self.push("fire_event", move |world| {
            world.events_mut().fire(event);
            Ok(())
        });
    }

    /// Number of recorded commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Applies every recorded command to `world` in recording order.
    /// Failures are logged and skipped.
    pub fn apply(self, world: &mut World) {
        for command in self.commands {
            if let Err(error) = (command.op)(world) {
                tracing::warn!(command = command.name, %error, "deferred command failed, skipping");
            }
        }
    }

    fn push<F: FnOnce(&mut World) -> Result<()> + Send + 'static>(
        &mut self,
        name: &'static str,
        op: F,
    ) {
        self.commands.push(Command {
            name,
            op: Box::new(op),
        });
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Position(f32);

    struct Team;

    #[test]
    fn bundle_deduplicates_by_type() {
        let bundle = Bundle::new().with(Position(1.0)).with(Position(2.0));
        assert_eq!(bundle.len(), 1);
        let (components, _) = bundle.into_parts();
        let value = components.into_iter().next().unwrap().value;
        assert_eq!(*value.downcast::<Position>().unwrap(), Position(2.0));
    }

    #[test]
    fn bundle_keeps_shared_separate() {
        let team = Arc::new(Team);
        let bundle = Bundle::new().with(Position(0.0)).with_shared(team);
        assert_eq!(bundle.len(), 1);
        let (components, shared) = bundle.into_parts();
        assert_eq!(components.len(), 1);
        assert_eq!(shared.len(), 1);
    }
}
