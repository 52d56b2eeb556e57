//! # Instance Batch
//!
//! Owns the merged geometry for N copies of one source mesh and the slot
//! table mapping copies to live entities.
//!
//! ## Lifecycle
//!
//! ```text
//! Empty ──build_from──▶ Built ──attach──▶ Populated ◀──attach/detach──┐
//!   ▲                                         └────────────────────────┘
//!   └── any build failure leaves the batch here, nothing allocated
//! ```
//!
//! Skeleton presence and bone count are decided once, in `build_from`.

use std::sync::Arc;

use instancer_core::{BatchId, BatchSlot, EntityId, EntityTable, Matrix3x4};

use crate::allocator::{BufferAllocator, BufferDesc, BufferKind};
use crate::capacity::BatchCapacity;
use crate::config::BatchConfig;
use crate::error::{BatchError, BatchResult};
use crate::geometry::{IndexFormat, SourceGeometry, VertexLayout};
use crate::index_builder::IndexBatchBuilder;
use crate::transforms::TransformCollector;
use crate::vertex_builder::{BuildStrategy, VertexBatchBuilder};

/// Where a batch is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BatchState {
    /// No geometry yet.
    Empty,
    /// Geometry built, no entity ever attached.
    Built,
    /// Entities have been attached at least once.
    Populated,
}

/// Everything needed to issue the batch's single draw call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawArgs {
    /// Indices to draw.
    pub index_count: u32,
    /// Index width.
    pub index_format: IndexFormat,
    /// Merged vertex count.
    pub vertex_count: u32,
}

/// Geometry published by a successful build.
struct BuiltGeometry<B> {
    strategy: BuildStrategy,
    layout: VertexLayout,
    vertex_buffers: Vec<B>,
    index_buffer: B,
    vertex_count: usize,
    index_count: usize,
    index_format: IndexFormat,
    bone_map: Option<Vec<u16>>,
}

/// One instanced draw call worth of geometry plus its live entities.
///
/// Entities are referenced by [`EntityId`] only; the scene owns them in an
/// [`EntityTable`] that is passed into every call needing them.
pub struct Batch<A: BufferAllocator> {
    id: BatchId,
    material: String,
    capacity: BatchCapacity,
    config: BatchConfig,
    allocator: Arc<A>,
    state: BatchState,
    geometry: Option<BuiltGeometry<A::Buffer>>,
    slots: Vec<Option<EntityId>>,
    live: usize,
}

impl<A: BufferAllocator> Batch<A> {
    /// Creates an empty batch.
    ///
    /// # Arguments
    ///
    /// * `id` - Identifier recorded in the slots of attached entities
    /// * `material` - Material every instance renders with
    /// * `capacity` - Sizing from the capacity estimator
    /// * `allocator` - Creates and releases the merged buffers
    /// * `config` - Build tunables
    #[must_use]
    pub fn new(
        id: BatchId,
        material: impl Into<String>,
        capacity: BatchCapacity,
        allocator: Arc<A>,
        config: BatchConfig,
    ) -> Self {
        Self {
            id,
            material: material.into(),
            capacity,
            config,
            allocator,
            state: BatchState::Empty,
            geometry: None,
            slots: Vec::new(),
            live: 0,
        }
    }

    /// Builds merged geometry for `instance_count` copies of `source`.
    ///
    /// # Errors
    ///
    /// - `AlreadyBuilt` unless the batch is Empty
    /// - `UnsupportedMaterial` if the capacity is 0
    /// - `CapacityExceeded` if `instance_count` is above the capacity
    /// - `MalformedSource` if the source is inconsistent or has a different
    ///   bone count than the capacity was estimated for
    /// - `InstanceIdOverflow`, `BoneIndexOverflow`, `IndexRangeOverflow` from the builders
    /// - `Allocation` from the allocator
    ///
    /// On error the batch stays Empty and holds no buffers.
    pub fn build_from(&mut self, source: &SourceGeometry, instance_count: usize) -> BatchResult<()> {
        if self.state != BatchState::Empty {
            return Err(BatchError::AlreadyBuilt);
        }
        if !self.capacity.is_supported() {
            return Err(BatchError::UnsupportedMaterial {
                material: self.material.clone(),
            });
        }
        if instance_count == 0 {
            return Err(BatchError::MalformedSource("batch needs at least one instance".to_owned()));
        }
        if instance_count > self.capacity.max_instances {
            return Err(BatchError::CapacityExceeded {
                capacity: self.capacity.max_instances,
                requested: instance_count,
            });
        }

        source.validate()?;
        let strategy = BuildStrategy::detect(source);
        if strategy.transforms_per_instance() != self.capacity.transforms_per_instance() {
            return Err(BatchError::MalformedSource(format!(
                "source has {} bones but capacity was estimated for {}",
                strategy.bone_count(),
                self.capacity.bone_count
            )));
        }

        let vertices = VertexBatchBuilder::new(source, instance_count).build(strategy)?;
        let indices = IndexBatchBuilder::new(source, instance_count)
            .with_policy(self.config.index_overflow)
            .build()?;

        let (layout, streams, vertex_count) = vertices.into_parts();
        let vertex_buffers = self.upload_streams(&layout, &streams, vertex_count)?;

        let index_desc = BufferDesc {
            label: &format!("{}/{}/indices", self.config.label, self.id.0),
            kind: BufferKind::Index,
            element_size: indices.format().size(),
            element_count: indices.len(),
        };
        let index_buffer = match self.allocator.create_buffer(&index_desc, indices.as_bytes()) {
            Ok(buffer) => buffer,
            Err(e) => {
                vertex_buffers.into_iter().for_each(|b| self.allocator.release(b));
                return Err(e);
            }
        };

        tracing::debug!(
            batch = self.id.0,
            material = %self.material,
            instances = instance_count,
            bones = strategy.bone_count(),
            vertices = vertex_count,
            indices = indices.len(),
            "batch built"
        );

        self.geometry = Some(BuiltGeometry {
            strategy,
            layout,
            vertex_buffers,
            index_buffer,
            vertex_count,
            index_count: indices.len(),
            index_format: indices.format(),
            bone_map: source.bone_remap().map(<[u16]>::to_vec),
        });
        self.slots = vec![None; instance_count];
        self.state = BatchState::Built;
        Ok(())
    }

    /// Creates one vertex buffer per stream, releasing what was created so
    /// far if any fails.
    fn upload_streams(
        &self,
        layout: &VertexLayout,
        streams: &[Vec<u8>],
        vertex_count: usize,
    ) -> BatchResult<Vec<A::Buffer>> {
        let mut buffers = Vec::with_capacity(streams.len());
        for (stream, data) in (0u16..).zip(streams) {
            let desc = BufferDesc {
                label: &format!("{}/{}/stream{stream}", self.config.label, self.id.0),
                kind: BufferKind::Vertex,
                element_size: layout.vertex_size(stream),
                element_count: vertex_count,
            };
            match self.allocator.create_buffer(&desc, data) {
                Ok(buffer) => buffers.push(buffer),
                Err(e) => {
                    buffers.into_iter().for_each(|b| self.allocator.release(b));
                    return Err(e);
                }
            }
        }
        Ok(buffers)
    }

    /// Attaches an entity to the lowest free slot and returns that slot.
    ///
    /// # Errors
    ///
    /// - `NotBuilt` before `build_from` succeeded
    /// - `StaleEntity` if the handle is dead
    /// - `AlreadyAttached` if the entity sits in a batch already
    /// - `CapacityExceeded` if every slot is taken; start a new batch
    pub fn attach(&mut self, table: &mut EntityTable, id: EntityId) -> BatchResult<u32> {
        if self.state == BatchState::Empty {
            return Err(BatchError::NotBuilt);
        }
        let entity = table.get_mut(id).ok_or(BatchError::StaleEntity)?;
        if let Some(existing) = entity.slot() {
            return Err(BatchError::AlreadyAttached {
                batch: existing.batch.0,
            });
        }
        let Some(slot) = self.slots.iter().position(Option::is_none) else {
            return Err(BatchError::CapacityExceeded {
                capacity: self.slots.len(),
                requested: self.live + 1,
            });
        };

        let slot = slot as u32;
        self.slots[slot as usize] = Some(id);
        entity.assign_slot(BatchSlot { batch: self.id, slot });
        self.live += 1;
        self.state = BatchState::Populated;

        tracing::trace!(batch = self.id.0, slot, "entity attached");
        Ok(slot)
    }

    /// Detaches an entity. Does nothing if it is not in this batch.
    ///
    /// Works for despawned entities too, so a scene can clean up in either
    /// order.
    pub fn detach(&mut self, table: &mut EntityTable, id: EntityId) {
        let Some(slot) = self.slots.iter().position(|s| *s == Some(id)) else {
            return;
        };
        self.slots[slot] = None;
        self.live -= 1;

        if let Some(entity) = table.get_mut(id) {
            if entity.slot().is_some_and(|s| s.batch == self.id) {
                entity.clear_slot();
            }
        }
        tracing::trace!(batch = self.id.0, slot, "entity detached");
    }

    /// Moves live entities into the lowest slots, keeping their relative
    /// order, and drops handles whose entity was despawned.
    ///
    /// Returns the number of live entities afterwards.
    pub fn defragment(&mut self, table: &mut EntityTable) -> usize {
        let live: Vec<EntityId> = self.slots.iter().flatten().copied().filter(|id| table.is_alive(*id)).collect();

        self.slots.fill(None);
        for (slot, id) in live.iter().enumerate() {
            self.slots[slot] = Some(*id);
            if let Some(entity) = table.get_mut(*id) {
                entity.assign_slot(BatchSlot {
                    batch: self.id,
                    slot: slot as u32,
                });
            }
        }
        self.live = live.len();
        self.live
    }

    /// Detaches every live entity, then drops the batch and its buffers.
    ///
    /// Dropping a batch without this leaves attached entities pointing at a
    /// batch that no longer exists, and `attach` keeps rejecting them with
    /// `AlreadyAttached`.
    pub fn release(mut self, table: &mut EntityTable) {
        for id in self.slots.iter_mut().filter_map(Option::take) {
            if let Some(entity) = table.get_mut(id) {
                if entity.slot().is_some_and(|s| s.batch == self.id) {
                    entity.clear_slot();
                }
            }
        }
        self.live = 0;
        tracing::trace!(batch = self.id.0, "batch released");
    }

    /// Transforms the render loop must upload every frame,
    /// `instance_count * max(1, bone_count)`.
    #[must_use]
    pub fn num_world_transforms(&self) -> usize {
        self.instance_count() * self.transforms_per_instance()
    }

    /// Fills `out` with this frame's world transforms.
    ///
    /// # Panics
    ///
    /// Panics if `out.len() != self.num_world_transforms()`.
    pub fn get_world_transforms(&self, table: &EntityTable, out: &mut [Matrix3x4]) {
        self.transform_collector(table).write_into(out);
    }

    /// Collector over this batch's slots, for lazy iteration.
    #[must_use]
    pub fn transform_collector<'a>(&'a self, table: &'a EntityTable) -> TransformCollector<'a> {
        let bone_map = self.geometry.as_ref().and_then(|g| g.bone_map.as_deref());
        TransformCollector::new(&self.slots, table, bone_map)
    }

    /// Batch identifier.
    #[must_use]
    pub const fn id(&self) -> BatchId {
        self.id
    }

    /// Material name.
    #[must_use]
    pub fn material(&self) -> &str {
        &self.material
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> BatchState {
        self.state
    }

    /// Sizing this batch was created with.
    #[must_use]
    pub const fn capacity(&self) -> BatchCapacity {
        self.capacity
    }

    /// Copies of the geometry, 0 until built.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.slots.len()
    }

    /// Blend indices per instance, 0 for rigid or unbuilt batches.
    #[must_use]
    pub fn bone_count(&self) -> usize {
        self.geometry.as_ref().map_or(0, |g| g.strategy.bone_count())
    }

    fn transforms_per_instance(&self) -> usize {
        self.geometry
            .as_ref()
            .map_or(1, |g| g.strategy.transforms_per_instance())
    }

    /// Strategy chosen at build time.
    #[must_use]
    pub fn strategy(&self) -> Option<BuildStrategy> {
        self.geometry.as_ref().map(|g| g.strategy)
    }

    /// Live attached entities.
    #[must_use]
    pub const fn live_count(&self) -> usize {
        self.live
    }

    /// Returns true if every slot is taken.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.state != BatchState::Empty && self.live == self.slots.len()
    }

    /// Returns true if no entity is attached.
    #[must_use]
    pub const fn is_unused(&self) -> bool {
        self.live == 0
    }

    /// Attached entities with their slots, in slot order.
    pub fn entities(&self) -> impl Iterator<Item = (u32, EntityId)> + '_ {
        (0u32..).zip(&self.slots).filter_map(|(slot, id)| id.map(|id| (slot, id)))
    }

    /// Layout of the merged vertex buffers.
    #[must_use]
    pub fn layout(&self) -> Option<&VertexLayout> {
        self.geometry.as_ref().map(|g| &g.layout)
    }

    /// Merged vertex buffers, one per stream. Empty until built.
    #[must_use]
    pub fn vertex_buffers(&self) -> &[A::Buffer] {
        self.geometry.as_ref().map_or(&[], |g| &g.vertex_buffers)
    }

    /// Merged index buffer.
    #[must_use]
    pub fn index_buffer(&self) -> Option<&A::Buffer> {
        self.geometry.as_ref().map(|g| &g.index_buffer)
    }

    /// Arguments for the batch's draw call.
    #[must_use]
    pub fn draw_args(&self) -> Option<DrawArgs> {
        self.geometry.as_ref().map(|g| DrawArgs {
            index_count: g.index_count as u32,
            index_format: g.index_format,
            vertex_count: g.vertex_count as u32,
        })
    }
}

/// Returns the buffers to the allocator. Entity slot records are left as
/// they are; use [`Batch::release`] while entities are still attached.
impl<A: BufferAllocator> Drop for Batch<A> {
    fn drop(&mut self) {
        if let Some(geometry) = self.geometry.take() {
            for buffer in geometry.vertex_buffers {
                self.allocator.release(buffer);
            }
            self.allocator.release(geometry.index_buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::HostBufferAllocator;
    use crate::geometry::{IndexData, VertexElement, VertexFormat, VertexSemantic};
    use instancer_core::InstancedEntity;

    fn quad() -> SourceGeometry {
        let layout = VertexLayout::new(vec![VertexElement::new(
            VertexSemantic::Position,
            0,
            0,
            VertexFormat::Float3,
        )]);
        SourceGeometry::new(layout, vec![vec![0u8; 48]], 4, IndexData::U16(vec![0, 1, 2, 2, 1, 3]))
    }

    fn rigid_batch(allocator: &Arc<HostBufferAllocator>, max_instances: usize) -> Batch<HostBufferAllocator> {
        Batch::new(
            BatchId(0),
            "rigid",
            BatchCapacity {
                bone_count: 0,
                max_instances,
            },
            Arc::clone(allocator),
            BatchConfig::default(),
        )
    }

    #[test]
    fn test_state_transitions() {
        let allocator = Arc::new(HostBufferAllocator::new());
        let mut table = EntityTable::new();
        let mut batch = rigid_batch(&allocator, 4);
        assert_eq!(batch.state(), BatchState::Empty);
        assert_eq!(batch.num_world_transforms(), 0);

        batch.build_from(&quad(), 2).unwrap();
        assert_eq!(batch.state(), BatchState::Built);
        assert_eq!(batch.num_world_transforms(), 2);

        let id = table.spawn(InstancedEntity::default());
        batch.attach(&mut table, id).unwrap();
        assert_eq!(batch.state(), BatchState::Populated);

        batch.detach(&mut table, id);
        assert_eq!(batch.state(), BatchState::Populated);
        assert!(batch.is_unused());
        assert!(matches!(batch.build_from(&quad(), 2), Err(BatchError::AlreadyBuilt)));
    }

    #[test]
    fn test_attach_before_build() {
        let allocator = Arc::new(HostBufferAllocator::new());
        let mut table = EntityTable::new();
        let mut batch = rigid_batch(&allocator, 4);
        let id = table.spawn(InstancedEntity::default());
        assert!(matches!(batch.attach(&mut table, id), Err(BatchError::NotBuilt)));
    }

    #[test]
    fn test_attach_until_full() {
        let allocator = Arc::new(HostBufferAllocator::new());
        let mut table = EntityTable::new();
        let mut batch = rigid_batch(&allocator, 2);
        batch.build_from(&quad(), 2).unwrap();

        let a = table.spawn(InstancedEntity::default());
        let b = table.spawn(InstancedEntity::default());
        let c = table.spawn(InstancedEntity::default());
        assert_eq!(batch.attach(&mut table, a).unwrap(), 0);
        assert_eq!(batch.attach(&mut table, b).unwrap(), 1);
        assert!(batch.is_full());
        assert!(matches!(
            batch.attach(&mut table, c),
            Err(BatchError::CapacityExceeded { capacity: 2, .. })
        ));

        // Freed slot is reused
        batch.detach(&mut table, a);
        assert!(table.get(a).unwrap().slot().is_none());
        assert_eq!(batch.attach(&mut table, c).unwrap(), 0);
        assert_eq!(table.get(c).unwrap().slot().unwrap().slot, 0);
    }

    #[test]
    fn test_double_attach_and_stale() {
        let allocator = Arc::new(HostBufferAllocator::new());
        let mut table = EntityTable::new();
        let mut batch = rigid_batch(&allocator, 4);
        batch.build_from(&quad(), 4).unwrap();

        let a = table.spawn(InstancedEntity::default());
        batch.attach(&mut table, a).unwrap();
        assert!(matches!(
            batch.attach(&mut table, a),
            Err(BatchError::AlreadyAttached { batch: 0 })
        ));

        let dead = table.spawn(InstancedEntity::default());
        table.despawn(dead);
        assert!(matches!(batch.attach(&mut table, dead), Err(BatchError::StaleEntity)));
    }

    #[test]
    fn test_detach_absent_is_noop() {
        let allocator = Arc::new(HostBufferAllocator::new());
        let mut table = EntityTable::new();
        let mut batch = rigid_batch(&allocator, 4);
        batch.build_from(&quad(), 4).unwrap();

        let a = table.spawn(InstancedEntity::default());
        batch.detach(&mut table, a);
        assert_eq!(batch.live_count(), 0);
    }

    #[test]
    fn test_build_beyond_capacity() {
        let allocator = Arc::new(HostBufferAllocator::new());
        let mut batch = rigid_batch(&allocator, 2);
        assert!(matches!(
            batch.build_from(&quad(), 3),
            Err(BatchError::CapacityExceeded { capacity: 2, requested: 3 })
        ));
        assert_eq!(batch.state(), BatchState::Empty);
    }

    #[test]
    fn test_unsupported_capacity() {
        let allocator = Arc::new(HostBufferAllocator::new());
        let mut batch = rigid_batch(&allocator, 0);
        assert!(matches!(
            batch.build_from(&quad(), 1),
            Err(BatchError::UnsupportedMaterial { .. })
        ));
    }

    #[test]
    fn test_failed_upload_releases_everything() {
        // Vertex stream (2 * 48) and id stream (2 * 16) fit, indices do not
        let allocator = Arc::new(HostBufferAllocator::with_budget(128));
        let mut batch = rigid_batch(&allocator, 2);

        assert!(matches!(batch.build_from(&quad(), 2), Err(BatchError::Allocation(_))));
        assert_eq!(batch.state(), BatchState::Empty);
        assert!(batch.vertex_buffers().is_empty());
        assert_eq!(allocator.stats().live_buffers, 0);
        assert_eq!(allocator.stats().live_bytes, 0);
    }

    #[test]
    fn test_drop_releases_buffers() {
        let allocator = Arc::new(HostBufferAllocator::new());
        {
            let mut batch = rigid_batch(&allocator, 2);
            batch.build_from(&quad(), 2).unwrap();
            assert_eq!(allocator.stats().live_buffers, 3);
        }
        assert_eq!(allocator.stats().live_buffers, 0);
    }

    #[test]
    fn test_release_clears_entity_slots() {
        let allocator = Arc::new(HostBufferAllocator::new());
        let mut table = EntityTable::new();
        let mut first = rigid_batch(&allocator, 4);
        first.build_from(&quad(), 2).unwrap();
        let id = table.spawn(InstancedEntity::default());
        first.attach(&mut table, id).unwrap();

        first.release(&mut table);
        assert!(table.get(id).unwrap().slot().is_none());
        assert_eq!(allocator.stats().live_buffers, 0);

        let mut second = rigid_batch(&allocator, 4);
        second.build_from(&quad(), 2).unwrap();
        assert_eq!(second.attach(&mut table, id).unwrap(), 0);
    }

    #[test]
    fn test_defragment() {
        let allocator = Arc::new(HostBufferAllocator::new());
        let mut table = EntityTable::new();
        let mut batch = rigid_batch(&allocator, 4);
        batch.build_from(&quad(), 4).unwrap();

        let ids: Vec<_> = (0..4).map(|_| table.spawn(InstancedEntity::default())).collect();
        for id in &ids {
            batch.attach(&mut table, *id).unwrap();
        }
        batch.detach(&mut table, ids[0]);
        table.despawn(ids[2]); // despawned without detaching

        assert_eq!(batch.defragment(&mut table), 2);
        let slots: Vec<_> = batch.entities().collect();
        assert_eq!(slots, vec![(0, ids[1]), (1, ids[3])]);
        assert_eq!(table.get(ids[3]).unwrap().slot().unwrap().slot, 1);
    }

    #[test]
    fn test_draw_args() {
        let allocator = Arc::new(HostBufferAllocator::new());
        let mut batch = rigid_batch(&allocator, 8);
        assert!(batch.draw_args().is_none());

        batch.build_from(&quad(), 3).unwrap();
        let args = batch.draw_args().unwrap();
        assert_eq!(args.index_count, 18);
        assert_eq!(args.vertex_count, 12);
        assert_eq!(args.index_format, IndexFormat::U16);
        assert_eq!(batch.index_buffer().unwrap().element_count(), 18);
    }
}
