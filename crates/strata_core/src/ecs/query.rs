// =============================================================================
// QUERY - Declared component access, the currency of scheduling
// =============================================================================
// A query carries four bit masks: read, write, shared and exclude. It is
// both a block matcher (which archetypes does this system touch) and an
// access declaration (what may run concurrently with it). Dependency
// inference between job groups is a pure mask check, collides_with, with
// no knowledge of what the jobs actually do.
// =============================================================================

//! Component queries: block matching and collision detection.

use crate::ecs::archetype::ArchetypeLayout;
use crate::ecs::bitset::BitSet256;
use crate::ecs::component::{Component, ComponentRegistry};
use crate::error::{Result, StrataError};

/// Declared component access of a system or job group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComponentQuery {
    read: BitSet256,
    write: BitSet256,
    shared: BitSet256,
    exclude: BitSet256,
}

impl ComponentQuery {
    /// An empty query. Matches every block and collides with nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            read: BitSet256::EMPTY,
            write: BitSet256::EMPTY,
            shared: BitSet256::EMPTY,
            exclude: BitSet256::EMPTY,
        }
    }

    /// Starts building a query against `registry`. Component types named
    /// while building are registered on the fly if the registry is still
    /// open.
    pub fn builder(registry: &mut ComponentRegistry) -> QueryBuilder<'_> {
        QueryBuilder {
            registry,
            query: Self::empty(),
            error: None,
        }
    }

    /// Read mask.
    #[must_use]
    pub fn read_mask(&self) -> &BitSet256 {
        &self.read
    }

    /// Write mask.
    #[must_use]
    pub fn write_mask(&self) -> &BitSet256 {
        &self.write
    }

    /// Shared-read mask.
    #[must_use]
    pub fn shared_mask(&self) -> &BitSet256 {
        &self.shared
    }

    /// Exclusion mask.
    #[must_use]
    pub fn exclude_mask(&self) -> &BitSet256 {
        &self.exclude
    }

    /// Whether a block of `layout` is visited by this query: the layout
    /// must carry every read, written and shared component, and none of
    /// the excluded ones.
    #[must_use]
    pub fn matches(&self, layout: &ArchetypeLayout) -> bool {
        let required = self.read.union(&self.write);
        layout.signature().contains_all(&required)
            && layout.shared_signature().contains_all(&self.shared)
            && !layout.signature().intersects(&self.exclude)
            && !layout.shared_signature().intersects(&self.exclude)
    }

    /// Whether two queries may not run concurrently: either one writes a
    /// component the other touches in any way.
    #[must_use]
    pub fn collides_with(&self, other: &ComponentQuery) -> bool {
        let self_touch = self.read.union(&self.write).union(&self.shared);
        let other_touch = other.read.union(&other.write).union(&other.shared);
        self.write.intersects(&other_touch) || other.write.intersects(&self_touch)
    }
}

/// Builder for [`ComponentQuery`]. Methods chain; the first failure is
/// stashed and reported by [`QueryBuilder::build`].
pub struct QueryBuilder<'r> {
    registry: &'r mut ComponentRegistry,
    query: ComponentQuery,
    error: Option<StrataError>,
}

impl QueryBuilder<'_> {
    /// Declares read access to `T`.
    #[must_use]
    pub fn read<T: Component>(mut self) -> Self {
        if let Some(bit) = self.resolve::<T>(false) {
            self.query.read.set(bit);
        }
        self
    }

    /// Declares write access to `T`.
    #[must_use]
    pub fn write<T: Component>(mut self) -> Self {
        if let Some(bit) = self.resolve::<T>(false) {
            self.query.write.set(bit);
        }
        self
    }

    /// Declares read access to the shared component `T`.
    #[must_use]
    pub fn shared<T: Component>(mut self) -> Self {
        if let Some(bit) = self.resolve::<T>(true) {
            self.query.shared.set(bit);
        }
        self
    }

    /// Excludes blocks carrying `T`, whether as data or shared.
    #[must_use]
    pub fn exclude<T: Component>(mut self) -> Self {
        // Exclusion does not care about storage kind, but an unknown type
        // still has to be pinned to a bit. Register as data by default if
        // nothing is known about it yet.
        let bit = match self.registry.bit_of::<T>() {
            Ok(bit) => Some(bit),
            Err(_) => self.resolve::<T>(false),
        };
        if let Some(bit) = bit {
            self.query.exclude.set(bit);
        }
        self
    }

    /// Finishes the query. Fails fast if any component is both required
    /// and excluded, or if a type could not be registered.
    pub fn build(self) -> Result<ComponentQuery> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let required = self
            .query
            .read
            .union(&self.query.write)
            .union(&self.query.shared);
        if required.intersects(&self.query.exclude) {
            let bit = required
                .intersection(&self.query.exclude)
                .iter()
                .next()
                .unwrap_or(0);
            return Err(StrataError::IncludeExcludeConflict {
                name: self.registry.info(bit).name(),
            });
        }
        Ok(self.query)
    }

    fn resolve<T: Component>(&mut self, shared: bool) -> Option<u8> {
        if self.error.is_some() {
            return None;
        }
        let result = if shared {
            self.registry.register_shared::<T>()
        } else {
            self.registry.register::<T>()
        };
        match result {
            Ok(bit) => Some(bit),
            Err(err) => {
                self.error = Some(err);
                None
            }
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

    struct Position;
    struct Velocity;
    struct Frozen;
    struct Faction;

    fn layout_of(reg: &ComponentRegistry, bits: &[u8], shared_bits: &[u8]) -> std::sync::Arc<ArchetypeLayout> {
        let mut signature = BitSet256::new();
        for &bit in bits {
            signature.set(bit);
        }
        let mut shared_signature = BitSet256::new();
        for &bit in shared_bits {
            shared_signature.set(bit);
        }
        ArchetypeLayout::new(ArchetypeId(0), signature, shared_signature, reg)
    }

    #[test]
    fn matches_requires_presence_and_absence() {
        let mut reg = ComponentRegistry::new();
        let query = ComponentQuery::builder(&mut reg)
            .read::<Position>()
            .write::<Velocity>()
            .exclude::<Frozen>()
            .build()
            .unwrap();

        let pos = reg.bit_of::<Position>().unwrap();
        let vel = reg.bit_of::<Velocity>().unwrap();
        let frz = reg.bit_of::<Frozen>().unwrap();

        assert!(query.matches(&layout_of(&reg, &[pos, vel], &[])));
        assert!(!query.matches(&layout_of(&reg, &[pos], &[])));
        assert!(!query.matches(&layout_of(&reg, &[pos, vel, frz], &[])));
    }

    #[test]
    fn shared_requirement_checks_shared_signature() {
        let mut reg = ComponentRegistry::new();
        let query = ComponentQuery::builder(&mut reg)
            .read::<Position>()
            .shared::<Faction>()
            .build()
            .unwrap();
        let pos = reg.bit_of::<Position>().unwrap();
        let fac = reg.bit_of::<Faction>().unwrap();

        assert!(query.matches(&layout_of(&reg, &[pos], &[fac])));
        assert!(!query.matches(&layout_of(&reg, &[pos], &[])));
    }

    #[test]
    fn include_exclude_conflict_fails_fast() {
        let mut reg = ComponentRegistry::new();
        let err = ComponentQuery::builder(&mut reg)
            .write::<Position>()
            .exclude::<Position>()
            .build()
            .unwrap_err();
        assert!(matches!(err, StrataError::IncludeExcludeConflict { .. }));
    }

    #[test]
    fn collision_is_write_against_any_touch() {
        let mut reg = ComponentRegistry::new();
        let writer = ComponentQuery::builder(&mut reg)
            .write::<Position>()
            .build()
            .unwrap();
        let reader = ComponentQuery::builder(&mut reg)
            .read::<Position>()
            .build()
            .unwrap();
        let other_writer = ComponentQuery::builder(&mut reg)
            .write::<Velocity>()
            .build()
            .unwrap();

        assert!(writer.collides_with(&reader));
        assert!(reader.collides_with(&writer));
        assert!(!reader.collides_with(&reader));
        assert!(!writer.collides_with(&other_writer));
        assert!(writer.collides_with(&writer));
    }

    #[test]
    fn exclusions_never_collide() {
        let mut reg = ComponentRegistry::new();
        let a = ComponentQuery::builder(&mut reg)
            .write::<Position>()
            .exclude::<Frozen>()
            .build()
            .unwrap();
        let b = ComponentQuery::builder(&mut reg)
            .read::<Velocity>()
            .exclude::<Frozen>()
            .build()
            .unwrap();
        assert!(!a.collides_with(&b));
    }
}
