// =============================================================================
// ARCHETYPE - Immutable layout shared by every block of one signature
// =============================================================================
// A layout is built once, when a world first sees a given combination of
// data and shared signatures, and then shared by Arc between all blocks
// of that archetype. Columns are ordered by ascending component bit so
// two layouts over the same signature always agree on column order.
// =============================================================================

//! Archetype layouts: the column plan behind every block.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::ecs::bitset::BitSet256;
use crate::ecs::block::AnyColumn;
use crate::ecs::component::{ComponentKind, ComponentRegistry};

/// Index of a layout within its world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchetypeId(pub u32);

impl ArchetypeId {
    /// Index into the world's layout table.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Plan for one data column.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    /// Element type.
    pub type_id: TypeId,
    /// Element type name, for diagnostics.
    pub name: &'static str,
    /// Signature bit of the element type.
    pub bit: u8,
    new_column: fn() -> Box<dyn AnyColumn>,
}

/// Plan for one shared-component slot.
#[derive(Debug, Clone, Copy)]
pub struct SharedSpec {
    /// Value type.
    pub type_id: TypeId,
    /// Value type name, for diagnostics.
    pub name: &'static str,
    /// Signature bit of the value type.
    pub bit: u8,
}

/// Immutable description of one archetype: its signatures and the column
/// order every block of this archetype uses.
#[derive(Debug)]
pub struct ArchetypeLayout {
    id: ArchetypeId,
    signature: BitSet256,
    shared_signature: BitSet256,
    columns: Vec<ColumnSpec>,
    column_index: HashMap<TypeId, usize>,
    shared: Vec<SharedSpec>,
    shared_index: HashMap<TypeId, usize>,
}

impl ArchetypeLayout {
    /// Builds the layout for `(signature, shared_signature)` from the
    /// registry's records. Bits must all be registered, data bits in
    /// `signature` and shared bits in `shared_signature`.
    pub(crate) fn new(
        id: ArchetypeId,
        signature: BitSet256,
        shared_signature: BitSet256,
        registry: &ComponentRegistry,
    ) -> Arc<Self> {
        let mut columns = Vec::with_capacity(signature.count());
        let mut column_index = HashMap::with_capacity(signature.count());
        for bit in signature.iter() {
            let info = registry.info(bit);
            let ComponentKind::Data { new_column } = *info.kind() else {
                unreachable!("shared bit {bit} in data signature");
            };
            column_index.insert(info.type_id(), columns.len());
            columns.push(ColumnSpec {
                type_id: info.type_id(),
                name: info.name(),
                bit,
                new_column,
            });
        }

        let mut shared = Vec::with_capacity(shared_signature.count());
        let mut shared_index = HashMap::with_capacity(shared_signature.count());
        for bit in shared_signature.iter() {
            let info = registry.info(bit);
            debug_assert!(matches!(info.kind(), ComponentKind::Shared));
            shared_index.insert(info.type_id(), shared.len());
            shared.push(SharedSpec {
                type_id: info.type_id(),
                name: info.name(),
                bit,
            });
        }

        Arc::new(Self {
            id,
            signature,
            shared_signature,
            columns,
            column_index,
            shared,
            shared_index,
        })
    }

    /// Layout id.
    #[must_use]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Data-component signature.
    #[must_use]
    pub fn signature(&self) -> &BitSet256 {
        &self.signature
    }

    /// Shared-component signature.
    #[must_use]
    pub fn shared_signature(&self) -> &BitSet256 {
        &self.shared_signature
    }

    /// Column plans in block column order (ascending bit).
    #[must_use]
    pub fn column_types(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Shared slots in block order (ascending bit).
    #[must_use]
    pub fn shared_types(&self) -> &[SharedSpec] {
        &self.shared
    }

    /// Column index of `type_id`, if this archetype stores it.
    #[must_use]
    pub fn column_index(&self, type_id: TypeId) -> Option<usize> {
        self.column_index.get(&type_id).copied()
    }

    /// Shared-slot index of `type_id`, if this archetype carries it.
    #[must_use]
    pub fn shared_index(&self, type_id: TypeId) -> Option<usize> {
        self.shared_index.get(&type_id).copied()
    }

    /// Instantiates one empty column per plan, in column order.
    pub(crate) fn make_columns(&self) -> Vec<Box<dyn AnyColumn>> {
        self.columns
            .iter()
            .map(|spec| (spec.new_column)())
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
