// =============================================================================
// BLOCK - Fixed-capacity SoA storage for one archetype
// =============================================================================
// A block holds up to BLOCK_CAP entity rows. Each component type in the
// archetype gets one densely packed column; row i of every column belongs
// to the same entity. Removal is swap-remove, so columns stay dense and
// iteration never sees holes.
//
// Columns sit behind UnsafeCell so jobs on different threads can slice
// into the same block concurrently. The aliasing contract is enforced
// above this module: the scheduler serializes any two job groups whose
// declared access collides, and structural mutation (adding or removing
// rows) only happens on the world's owner thread while no jobs are in
// flight. Everything unsafe in the crate lives here.
// =============================================================================

//! SoA blocks, typed columns and the job-facing block accessor.
#![allow(unsafe_code)]

use std::any::{Any, TypeId};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::ecs::archetype::ArchetypeLayout;
use crate::ecs::component::Component;
use crate::ecs::entity::Entity;
use crate::error::{Result, StrataError};

/// Maximum number of entity rows per block.
pub const BLOCK_CAP: usize = 256;

/// Stable identifier of a block within its world.
///
/// Blocks are never destroyed, so the id doubles as an index into the
/// world's block table and as a cache key for block filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Index into the world's block table.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// =============================================================================
// COLUMNS
// =============================================================================

/// One densely packed component column.
///
/// The version counter starts at 1 and is bumped every time a job takes
/// mutable access, so change filters can compare against a cached value
/// without inspecting the data itself.
pub struct Column<T: Component> {
    data: UnsafeCell<Vec<T>>,
    version: AtomicU32,
}

// Safety: concurrent access is mediated by the scheduler's collision
// rules; two jobs never hold overlapping mutable slices.
unsafe impl<T: Component> Sync for Column<T> {}

impl<T: Component> Column<T> {
    /// Creates an empty column.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: UnsafeCell::new(Vec::with_capacity(BLOCK_CAP)),
            version: AtomicU32::new(1),
        }
    }

    /// # Safety
    /// No mutable slice of this column may be live.
    pub(crate) unsafe fn slice(&self) -> &[T] {
        &*self.data.get()
    }

    /// # Safety
    /// No other slice of this column, shared or mutable, may be live.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slice_mut(&self) -> &mut [T] {
        &mut *self.data.get()
    }
}

impl<T: Component> Default for Column<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased view of a [`Column`], used for layout-driven row moves.
pub trait AnyColumn: Send + Sync {
    /// Number of rows.
    fn len(&self) -> usize;

    /// Whether the column has no rows.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Downcast entry point.
    fn as_any(&self) -> &dyn Any;

    /// Appends a boxed value, which must be of the column's element type.
    fn push_erased(&self, value: Box<dyn Any + Send>) -> Result<()>;

    /// Removes the value at `row` by swap-remove and returns it boxed.
    fn swap_remove_erased(&self, row: usize) -> Box<dyn Any + Send>;

    /// Current change version.
    fn version(&self) -> u32;

    /// Bumps the change version.
    fn bump_version(&self);

    /// `TypeId` of the element type.
    fn element_type_id(&self) -> TypeId;

    /// Element type name, for diagnostics.
    fn element_name(&self) -> &'static str;
}

impl<T: Component> AnyColumn for Column<T> {
    fn len(&self) -> usize {
        // Safety: len does not alias element data.
        unsafe { (*self.data.get()).len() }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn push_erased(&self, value: Box<dyn Any + Send>) -> Result<()> {
        let value = value
            .downcast::<T>()
            .map_err(|_| StrataError::ColumnTypeMismatch {
                expected: std::any::type_name::<T>(),
            })?;
        // Safety: structural mutation only runs on the owner thread with
        // no jobs in flight, so no slice is live.
        unsafe { (*self.data.get()).push(*value) };
        Ok(())
    }

    fn swap_remove_erased(&self, row: usize) -> Box<dyn Any + Send> {
        // Safety: see push_erased.
        Box::new(unsafe { (*self.data.get()).swap_remove(row) })
    }

    fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    fn element_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn element_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

// =============================================================================
// BLOCK
// =============================================================================

/// Fixed-capacity SoA storage for entities of one archetype sharing the
/// same shared-component values.
pub struct Block {
    id: BlockId,
    layout: Arc<ArchetypeLayout>,
    entities: UnsafeCell<Vec<Entity>>,
    columns: Vec<Box<dyn AnyColumn>>,
    shared: Vec<Arc<dyn Any + Send + Sync>>,
    entity_version: AtomicU32,
}

// Safety: same contract as Column. Row membership only changes on the
// owner thread between passes.
unsafe impl Sync for Block {}

impl Block {
    pub(crate) fn new(
        id: BlockId,
        layout: Arc<ArchetypeLayout>,
        shared: Vec<Arc<dyn Any + Send + Sync>>,
    ) -> Self {
        let columns = layout.make_columns();
        debug_assert_eq!(shared.len(), layout.shared_types().len());
        Self {
            id,
            layout,
            entities: UnsafeCell::new(Vec::with_capacity(BLOCK_CAP)),
            columns,
            shared,
            entity_version: AtomicU32::new(1),
        }
    }

    /// Stable block id.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Layout describing this block's archetype.
    #[must_use]
    pub fn layout(&self) -> &Arc<ArchetypeLayout> {
        &self.layout
    }

    /// Number of live rows.
    #[must_use]
    pub fn len(&self) -> usize {
        // Safety: len does not alias row data.
        unsafe { (*self.entities.get()).len() }
    }

    /// Whether the block holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the block is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= BLOCK_CAP
    }

    /// Version bumped whenever a row is added to or removed from this
    /// block. Starts at 1.
    #[must_use]
    pub fn entity_version(&self) -> u32 {
        self.entity_version.load(Ordering::Acquire)
    }

    /// Entity handles by row. Only valid to call while no structural
    /// mutation is running, which holds everywhere jobs and world code
    /// execute.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        // Safety: structural mutation is confined to the owner thread
        // between passes.
        unsafe { &*self.entities.get() }
    }

    /// Column at `index` in layout order.
    #[must_use]
    pub fn column(&self, index: usize) -> &dyn AnyColumn {
        self.columns[index].as_ref()
    }

    /// Column holding elements of `type_id`, if the layout has one.
    #[must_use]
    pub fn column_of(&self, type_id: TypeId) -> Option<&dyn AnyColumn> {
        self.layout
            .column_index(type_id)
            .map(|idx| self.columns[idx].as_ref())
    }

    /// Shared-component value of `type_id`, if the layout carries one.
    #[must_use]
    pub fn shared_value(&self, type_id: TypeId) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.layout
            .shared_index(type_id)
            .map(|idx| &self.shared[idx])
    }

    /// All shared values in layout order.
    #[must_use]
    pub fn shared_values(&self) -> &[Arc<dyn Any + Send + Sync>] {
        &self.shared
    }

    /// Appends a row. `values` must be in layout column order.
    pub(crate) fn push_row(&self, entity: Entity, values: Vec<Box<dyn Any + Send>>) -> Result<u32> {
        debug_assert!(!self.is_full());
        debug_assert_eq!(values.len(), self.columns.len());
        let row = self.len() as u32;
        for (column, value) in self.columns.iter().zip(values) {
            column.push_erased(value)?;
        }
        // Safety: owner thread, no jobs in flight.
        unsafe { (*self.entities.get()).push(entity) };
        self.entity_version.fetch_add(1, Ordering::AcqRel);
        Ok(row)
    }

    /// Removes `row` by swap-remove. Returns the removed values in layout
    /// column order, plus the entity that moved into `row` (if any) so
    /// the caller can fix its location.
    pub(crate) fn swap_remove_row(&self, row: u32) -> (Vec<Box<dyn Any + Send>>, Option<Entity>) {
        let row = row as usize;
        let values = self
            .columns
            .iter()
            .map(|column| column.swap_remove_erased(row))
            .collect();
        // Safety: owner thread, no jobs in flight.
        let moved = unsafe {
            let entities = &mut *self.entities.get();
            entities.swap_remove(row);
            entities.get(row).copied()
        };
        self.entity_version.fetch_add(1, Ordering::AcqRel);
        (values, moved)
    }

    /// Shared reference to one component value.
    pub(crate) fn component<T: Component>(&self, row: u32) -> Option<&T> {
        let column = self.typed_column::<T>()?;
        // Safety: world-level borrow rules; no job holds this column while
        // the owner thread reads it.
        unsafe { column.slice().get(row as usize) }
    }

    /// Mutable reference to one component value. Bumps the column version.
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn component_mut<T: Component>(&self, row: u32) -> Option<&mut T> {
        let column = self.typed_column::<T>()?;
        column.bump_version();
        // Safety: see component.
        unsafe { column.slice_mut().get_mut(row as usize) }
    }

    fn typed_column<T: Component>(&self) -> Option<&Column<T>> {
        self.column_of(TypeId::of::<T>())?
            .as_any()
            .downcast_ref::<Column<T>>()
    }
}

// =============================================================================
// BLOCK ACCESSOR
// =============================================================================

/// The view a job gets of one block.
///
/// Slices handed out here alias the block's columns directly. The access
/// contract is the job group's declared query: a job may only take
/// mutable slices of components it declared for write, and the scheduler
/// guarantees no colliding group runs concurrently. Taking a mutable
/// slice bumps the column's change version.
pub struct BlockAccessor<'a> {
    block: &'a Block,
}

impl<'a> BlockAccessor<'a> {
    /// Wraps `block` for job access.
    #[must_use]
    pub fn new(block: &'a Block) -> Self {
        Self { block }
    }

    /// Entity handles by row.
    #[must_use]
    pub fn entities(&self) -> &'a [Entity] {
        self.block.entities()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.block.len()
    }

    /// Whether the block holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }

    /// Read-only slice of the `T` column.
    ///
    /// # Panics
    /// Panics if the block has no `T` column; queries guarantee presence
    /// for every component they declare.
    #[must_use]
    pub fn component_data<T: Component>(&self) -> &'a [T] {
        self.try_component_data::<T>().unwrap_or_else(|| {
            panic!(
                "block {:?} has no `{}` column",
                self.block.id(),
                std::any::type_name::<T>()
            )
        })
    }

    /// Read-only slice of the `T` column, or `None` if absent.
    #[must_use]
    pub fn try_component_data<T: Component>(&self) -> Option<&'a [T]> {
        let column = self.typed_column::<T>()?;
        // Safety: declared read access; no colliding writer runs
        // concurrently.
        Some(unsafe { column.slice() })
    }

    /// Mutable slice of the `T` column. Bumps the column version.
    ///
    /// # Panics
    /// Panics if the block has no `T` column.
    #[must_use]
    #[allow(clippy::mut_from_ref)]
    pub fn component_data_mut<T: Component>(&self) -> &'a mut [T] {
        self.try_component_data_mut::<T>().unwrap_or_else(|| {
            panic!(
                "block {:?} has no `{}` column",
                self.block.id(),
                std::any::type_name::<T>()
            )
        })
    }

    /// Mutable slice of the `T` column, or `None` if absent. Bumps the
    /// column version when present.
    #[must_use]
    #[allow(clippy::mut_from_ref)]
    pub fn try_component_data_mut<T: Component>(&self) -> Option<&'a mut [T]> {
        let column = self.typed_column::<T>()?;
        column.bump_version();
        // Safety: declared write access; the scheduler serializes every
        // colliding group.
        Some(unsafe { column.slice_mut() })
    }

    /// Shared-component value of type `T`, if the block carries one.
    #[must_use]
    pub fn shared_component<T: Component>(&self) -> Option<Arc<T>> {
        let value = self.block.shared_value(TypeId::of::<T>())?;
        Arc::clone(value).downcast::<T>().ok()
    }

    /// Current change version of the `T` column.
    #[must_use]
    pub fn column_version<T: Component>(&self) -> Option<u32> {
        Some(self.typed_column::<T>()?.version())
    }

    /// Version bumped on row additions and removals.
    #[must_use]
    pub fn entity_version(&self) -> u32 {
        self.block.entity_version()
    }

    fn typed_column<T: Component>(&self) -> Option<&'a Column<T>> {
        self.block
            .column_of(TypeId::of::<T>())?
            .as_any()
            .downcast_ref::<Column<T>>()
    }
}

// =============================================================================
// TESTS
// =============================================================================
