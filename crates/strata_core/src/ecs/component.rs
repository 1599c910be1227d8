// =============================================================================
// COMPONENT REGISTRY - Stable bit assignment for component types
// =============================================================================
// Each world owns one registry. Registering a type assigns it the next
// free bit out of 256; the mapping is fixed for the lifetime of the world
// so signatures and query masks built at different times always agree.
// The registry freezes at the first spawn. Late registration is an error
// rather than a silent reshuffle.
// =============================================================================

//! Component traits and the per-world type-to-bit registry.

use std::any::TypeId;
use std::collections::HashMap;

use crate::ecs::bitset::BIT_CAPACITY;
use crate::ecs::block::{AnyColumn, Column};
use crate::error::{Result, StrataError};

/// Marker for types storable as per-entity component data.
///
/// Blanket-implemented; any `Send + Sync + 'static` type qualifies.
/// Whether a type is used as per-entity data or as per-block shared data
/// is decided at registration, not by the type itself.
pub trait Component: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Component for T {}

/// How a registered type is stored.
#[derive(Clone, Copy)]
pub enum ComponentKind {
    /// Per-entity data laid out in a block column.
    Data {
        /// Creates an empty column for this type.
        new_column: fn() -> Box<dyn AnyColumn>,
    },
    /// Per-block shared data held behind an `Arc`.
    Shared,
}

impl std::fmt::Debug for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data { .. } => f.write_str("Data"),
            Self::Shared => f.write_str("Shared"),
        }
    }
}

/// Registration record for one component type.
#[derive(Debug)]
pub struct ComponentInfo {
    type_id: TypeId,
    name: &'static str,
    bit: u8,
    kind: ComponentKind,
}

impl ComponentInfo {
    /// Rust `TypeId` of the component type.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Type name, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signature bit assigned at registration.
    #[must_use]
    pub fn bit(&self) -> u8 {
        self.bit
    }

    /// Storage kind.
    #[must_use]
    pub fn kind(&self) -> &ComponentKind {
        &self.kind
    }
}

/// Per-world mapping from component types to signature bits.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    infos: Vec<ComponentInfo>,
    by_type: HashMap<TypeId, u8>,
    frozen: bool,
}

impl ComponentRegistry {
    /// Creates an empty, unfrozen registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` as per-entity data and returns its bit. Idempotent:
    /// re-registering an already known type returns the existing bit.
    pub fn register<T: Component>(&mut self) -> Result<u8> {
        self.register_raw::<T>(ComponentKind::Data {
            new_column: new_column::<T>,
        })
    }

    /// Registers `T` as per-block shared data and returns its bit.
    pub fn register_shared<T: Component>(&mut self) -> Result<u8> {
        self.register_raw::<T>(ComponentKind::Shared)
    }

    fn register_raw<T: Component>(&mut self, kind: ComponentKind) -> Result<u8> {
        let type_id = TypeId::of::<T>();
        if let Some(&bit) = self.by_type.get(&type_id) {
            debug_assert!(
                matches!(
                    (&self.infos[bit as usize].kind, &kind),
                    (ComponentKind::Data { .. }, ComponentKind::Data { .. })
                        | (ComponentKind::Shared, ComponentKind::Shared)
                ),
                "`{}` registered twice with different storage kinds",
                std::any::type_name::<T>()
            );
            return Ok(bit);
        }
        let name = std::any::type_name::<T>();
        if self.frozen {
            return Err(StrataError::RegistryFrozen { name });
        }
        if self.infos.len() >= BIT_CAPACITY {
            return Err(StrataError::ComponentLimitExceeded { name });
        }
        let bit = self.infos.len() as u8;
        self.infos.push(ComponentInfo {
            type_id,
            name,
            bit,
            kind,
        });
        self.by_type.insert(type_id, bit);
        Ok(bit)
    }

    /// Bit assigned to `T`, or an error if `T` was never registered.
    pub fn bit_of<T: Component>(&self) -> Result<u8> {
        self.bit_of_type(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    /// Bit assigned to a type id, with `name` carried for diagnostics.
    pub fn bit_of_type(&self, type_id: TypeId, name: &'static str) -> Result<u8> {
        self.by_type
            .get(&type_id)
            .copied()
            .ok_or(StrataError::UnregisteredComponent { name })
    }

    /// Registration record for `bit`.
    ///
    /// # Panics
    /// Panics if `bit` was never assigned.
    #[must_use]
    pub fn info(&self, bit: u8) -> &ComponentInfo {
        &self.infos[bit as usize]
    }

    /// Registration record for a type id, if known.
    #[must_use]
    pub fn info_of_type(&self, type_id: TypeId) -> Option<&ComponentInfo> {
        self.by_type.get(&type_id).map(|&bit| self.info(bit))
    }

    /// Stops further registration. Called by the world at the first spawn.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Whether registration is closed.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether nothing is registered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

fn new_column<T: Component>() -> Box<dyn AnyColumn> {
    Box::new(Column::<T>::new())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Position;
    struct Velocity;
    struct Faction;

    #[test]
    fn bits_are_stable_and_idempotent() {
        let mut reg = ComponentRegistry::new();
        let a = reg.register::<Position>().unwrap();
        let b = reg.register::<Velocity>().unwrap();
        assert_ne!(a, b);
        // Re-registration hands back the same bit.
        assert_eq!(reg.register::<Position>().unwrap(), a);
        assert_eq!(reg.bit_of::<Velocity>().unwrap(), b);
    }

    #[test]
    fn shared_types_share_the_bit_space() {
        let mut reg = ComponentRegistry::new();
        let a = reg.register::<Position>().unwrap();
        let s = reg.register_shared::<Faction>().unwrap();
        assert_ne!(a, s);
        assert!(matches!(reg.info(s).kind(), ComponentKind::Shared));
    }

    #[test]
    fn frozen_registry_rejects_new_types() {
        let mut reg = ComponentRegistry::new();
        reg.register::<Position>().unwrap();
        reg.freeze();
        // Known types still resolve.
        assert!(reg.register::<Position>().is_ok());
        assert!(matches!(
            reg.register::<Velocity>(),
            Err(StrataError::RegistryFrozen { .. })
        ));
    }

    #[test]
    fn unregistered_lookup_fails() {
        let reg = ComponentRegistry::new();
        assert!(matches!(
            reg.bit_of::<Position>(),
            Err(StrataError::UnregisteredComponent { .. })
        ));
    }
}
