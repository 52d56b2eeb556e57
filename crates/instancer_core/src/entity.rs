//! # Instanced Entities
//!
//! An instanced entity is one logical copy of a batched mesh. The scene owns
//! every entity in an [`EntityTable`](crate::EntityTable); a batch only keeps
//! the [`EntityId`] of whoever occupies each of its slots, so despawning an
//! entity never has to reach into the batch first.

use crate::math::Matrix3x4;

/// Handle to an entity in an [`EntityTable`](crate::EntityTable).
///
/// Packs the table slot (low half) with the slot's generation at spawn time
/// (high half). Despawning bumps the slot's generation, so a batch still
/// holding the old handle gets `None` from the table and writes zero
/// transforms for that copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    const GENERATION_SHIFT: u32 = 32;

    /// Sentinel that never resolves in any table.
    pub const NULL: Self = Self(u64::MAX);

    /// Packs a table slot and its generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << Self::GENERATION_SHIFT) | index as u64)
    }

    /// Table slot.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Generation of the slot when this handle was issued.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> Self::GENERATION_SHIFT) as u32
    }

    /// True for [`EntityId::NULL`].
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == Self::NULL.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

/// Identifies one batch among those sharing an entity table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u32);

/// Where an entity currently sits: which batch, and which copy of the
/// merged geometry it drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BatchSlot {
    /// Owning batch.
    pub batch: BatchId,
    /// Slot index within the batch, in `[0, instance_count)`.
    pub slot: u32,
}

/// One logical copy of a batched mesh.
///
/// Rigid entities only carry a world transform. Skinned entities also carry
/// a skeleton pose: one matrix per skeleton bone, in skeleton space. The
/// batch maps its blend indices onto skeleton bones when collecting.
#[derive(Clone, Debug, PartialEq)]
pub struct InstancedEntity {
    world: Matrix3x4,
    bone_pose: Vec<Matrix3x4>,
    slot: Option<BatchSlot>,
}

impl InstancedEntity {
    /// Creates a rigid entity.
    #[must_use]
    pub const fn new(world: Matrix3x4) -> Self {
        Self {
            world,
            bone_pose: Vec::new(),
            slot: None,
        }
    }

    /// Creates a skinned entity with a skeleton pose.
    #[must_use]
    pub fn skinned(world: Matrix3x4, bone_pose: Vec<Matrix3x4>) -> Self {
        Self {
            world,
            bone_pose,
            slot: None,
        }
    }

    /// World transform.
    #[inline]
    #[must_use]
    pub const fn world(&self) -> Matrix3x4 {
        self.world
    }

    /// Sets the world transform.
    #[inline]
    pub fn set_world(&mut self, world: Matrix3x4) {
        self.world = world;
    }

    /// Skeleton pose, one matrix per skeleton bone.
    #[inline]
    #[must_use]
    pub fn bone_pose(&self) -> &[Matrix3x4] {
        &self.bone_pose
    }

    /// Mutable skeleton pose for animation updates.
    #[inline]
    pub fn bone_pose_mut(&mut self) -> &mut [Matrix3x4] {
        &mut self.bone_pose
    }

    /// Replaces the skeleton pose.
    pub fn set_bone_pose(&mut self, pose: Vec<Matrix3x4>) {
        self.bone_pose = pose;
    }

    /// World-space transform of one skeleton bone.
    ///
    /// Bones missing from the pose are treated as identity, so a skinned
    /// mesh with no animation applied renders at its bind pose.
    #[inline]
    #[must_use]
    pub fn bone_world(&self, bone: usize) -> Matrix3x4 {
        match self.bone_pose.get(bone) {
            Some(pose) => self.world * *pose,
            None => self.world,
        }
    }

    /// Batch slot this entity is attached to, if any.
    #[inline]
    #[must_use]
    pub const fn slot(&self) -> Option<BatchSlot> {
        self.slot
    }

    /// Records the slot a batch assigned. Called by the batch on attach.
    #[inline]
    pub fn assign_slot(&mut self, slot: BatchSlot) {
        self.slot = Some(slot);
    }

    /// Forgets the batch slot. Called by the batch on detach.
    #[inline]
    pub fn clear_slot(&mut self) {
        self.slot = None;
    }

    /// Writes this entity's transforms to `out` and returns how many were
    /// written.
    ///
    /// Without a bone map one world transform is written. With a bone map,
    /// `out[b]` receives the world transform of skeleton bone `bone_map[b]`
    /// for every blend index `b`.
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than the number of transforms to write.
    pub fn write_transforms(&self, out: &mut [Matrix3x4], bone_map: Option<&[u16]>) -> usize {
        match bone_map {
            None => {
                out[0] = self.world;
                1
            }
            Some(map) => {
                for (dst, bone) in out[..map.len()].iter_mut().zip(map) {
                    *dst = self.bone_world(usize::from(*bone));
                }
                map.len()
            }
        }
    }
}

impl Default for InstancedEntity {
    fn default() -> Self {
        Self::new(Matrix3x4::IDENTITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_roundtrip() {
        let id = EntityId::new(12345, 67890);
        assert_eq!(id.index(), 12345);
        assert_eq!(id.generation(), 67890);
        assert!(!id.is_null());
        assert!(EntityId::default().is_null());
    }

    #[test]
    fn test_reused_slot_gets_distinct_handle() {
        let old = EntityId::new(3, 0);
        let new = EntityId::new(3, 1);
        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
    }

    #[test]
    fn test_rigid_writes_one_transform() {
        let world = Matrix3x4::from_translation(5.0, 0.0, 0.0);
        let entity = InstancedEntity::new(world);

        let mut out = [Matrix3x4::ZERO; 2];
        assert_eq!(entity.write_transforms(&mut out, None), 1);
        assert_eq!(out[0], world);
        assert_eq!(out[1], Matrix3x4::ZERO);
    }

    #[test]
    fn test_skinned_follows_bone_map() {
        let world = Matrix3x4::from_translation(0.0, 10.0, 0.0);
        let pose = vec![
            Matrix3x4::from_translation(1.0, 0.0, 0.0),
            Matrix3x4::from_translation(2.0, 0.0, 0.0),
            Matrix3x4::from_translation(3.0, 0.0, 0.0),
        ];
        let entity = InstancedEntity::skinned(world, pose);

        // Blend index 0 -> skeleton bone 2, blend index 1 -> skeleton bone 0
        let mut out = [Matrix3x4::ZERO; 2];
        assert_eq!(entity.write_transforms(&mut out, Some(&[2, 0])), 2);
        assert_eq!(out[0].translation(), [3.0, 10.0, 0.0]);
        assert_eq!(out[1].translation(), [1.0, 10.0, 0.0]);
    }

    #[test]
    fn test_missing_bone_uses_world() {
        let world = Matrix3x4::from_translation(4.0, 4.0, 4.0);
        let entity = InstancedEntity::skinned(world, Vec::new());
        assert_eq!(entity.bone_world(7), world);
    }

    #[test]
    fn test_slot_assignment() {
        let mut entity = InstancedEntity::default();
        assert!(entity.slot().is_none());

        let slot = BatchSlot { batch: BatchId(3), slot: 1 };
        entity.assign_slot(slot);
        assert_eq!(entity.slot(), Some(slot));

        entity.clear_slot();
        assert!(entity.slot().is_none());
    }
}
