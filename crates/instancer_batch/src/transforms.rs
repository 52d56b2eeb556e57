//! # Transform Collection
//!
//! Produces the flat world-transform array a batch uploads every frame.
//!
//! ```text
//! rigid (B = 0):     [slot 0][slot 1][slot 2] ...
//! skinned (B = 3):   [s0 b0][s0 b1][s0 b2][s1 b0][s1 b1][s1 b2] ...
//! ```
//!
//! Slot `s` always owns `[s * max(1, B), (s + 1) * max(1, B))`, matching the
//! instance id (rigid) or bone range (skinned) baked into copy `s` of the
//! merged geometry. Empty slots, and slots whose entity has been despawned
//! without detaching, are written as zero matrices so their copy collapses.

use instancer_core::{EntityId, EntityTable, InstancedEntity, Matrix3x4};

/// Gathers world transforms for one batch from the entity table.
///
/// Holds no cursor: every call to [`iter`](Self::iter) or
/// [`write_into`](Self::write_into) starts from slot 0.
#[derive(Clone, Copy)]
pub struct TransformCollector<'a> {
    slots: &'a [Option<EntityId>],
    table: &'a EntityTable,
    bone_map: Option<&'a [u16]>,
}

impl<'a> TransformCollector<'a> {
    /// Creates a collector over a batch's slots.
    ///
    /// `bone_map` is the source's bone remap table for skinned batches and
    /// None for rigid ones.
    #[must_use]
    pub const fn new(slots: &'a [Option<EntityId>], table: &'a EntityTable, bone_map: Option<&'a [u16]>) -> Self {
        Self { slots, table, bone_map }
    }

    /// Transforms per slot, `max(1, B)`.
    #[inline]
    #[must_use]
    pub fn transforms_per_instance(&self) -> usize {
        self.bone_map.map_or(1, |map| map.len().max(1))
    }

    /// Total transforms produced, always `slots * max(1, B)`.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() * self.transforms_per_instance()
    }

    /// Returns true if the batch has no slots.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Lazily yields every transform in upload order.
    pub fn iter(&self) -> impl Iterator<Item = Matrix3x4> + 'a {
        let table = self.table;
        let bone_map = self.bone_map;
        let per_instance = self.transforms_per_instance();

        self.slots.iter().flat_map(move |slot| {
            let entity = slot.and_then(|id| table.get(id));
            (0..per_instance).map(move |bone| transform_of(entity, bone_map, bone))
        })
    }

    /// Overwrites `out` with this frame's transforms and returns how many
    /// were written.
    ///
    /// # Panics
    ///
    /// Panics if `out.len()` differs from [`len`](Self::len). Uploading a
    /// different count than the batch reports is a programming error.
    pub fn write_into(&self, out: &mut [Matrix3x4]) -> usize {
        let per_instance = self.transforms_per_instance();
        assert_eq!(
            out.len(),
            self.len(),
            "world transform buffer must hold exactly {} matrices",
            self.len()
        );

        for (slot, chunk) in self.slots.iter().zip(out.chunks_exact_mut(per_instance)) {
            match slot.and_then(|id| self.table.get(id)) {
                Some(entity) => {
                    let written = entity.write_transforms(chunk, self.bone_map);
                    debug_assert_eq!(written, per_instance);
                }
                None => chunk.fill(Matrix3x4::ZERO),
            }
        }
        out.len()
    }
}

fn transform_of(entity: Option<&InstancedEntity>, bone_map: Option<&[u16]>, bone: usize) -> Matrix3x4 {
    match (entity, bone_map) {
        (None, _) => Matrix3x4::ZERO,
        (Some(entity), None) => entity.world(),
        (Some(entity), Some(map)) => entity.bone_world(usize::from(map[bone])),
    }
}
