//! # Instance Manager
//!
//! Keeps as many batches as needed for one mesh/material pair. A full batch
//! is never an error here: the manager simply opens another one.

use std::sync::Arc;

use instancer_core::{BatchId, EntityId, EntityTable, InstancedEntity};

use crate::allocator::BufferAllocator;
use crate::batch::Batch;
use crate::capacity::{BatchCapacity, CapacityEstimator};
use crate::config::BatchConfig;
use crate::error::{BatchError, BatchResult};
use crate::geometry::SourceGeometry;
use crate::reflection::MaterialCatalog;
use crate::vertex_builder::BuildStrategy;

/// Owns every batch drawing one source mesh with one material.
pub struct InstanceManager<A: BufferAllocator> {
    material: String,
    source: Arc<SourceGeometry>,
    capacity: BatchCapacity,
    allocator: Arc<A>,
    config: BatchConfig,
    batches: Vec<Batch<A>>,
    next_batch_id: u32,
}

impl<A: BufferAllocator> InstanceManager<A> {
    /// Creates a manager, sizing batches from the material's reflection data.
    ///
    /// # Errors
    ///
    /// - `UnsupportedMaterial` if the material cannot instance this mesh
    /// - `MalformedSource` if the source geometry is inconsistent
    ///
    /// Batch size is the shader capacity clamped to what the merged vertex
    /// formats can encode (256 rigid copies, or the blend-index range split
    /// across bones).
    pub fn new<C: MaterialCatalog + ?Sized>(
        material: impl Into<String>,
        source: Arc<SourceGeometry>,
        catalog: &C,
        allocator: Arc<A>,
        config: BatchConfig,
    ) -> BatchResult<Self> {
        let material = material.into();
        source.validate()?;
        let mut capacity = CapacityEstimator::with_config(catalog, &config).require(&material, source.bone_count())?;

        let encodable = BuildStrategy::detect(&source).max_encodable_instances(source.layout());
        if capacity.max_instances > encodable {
            tracing::debug!(
                material = %material,
                shader_limit = capacity.max_instances,
                vertex_limit = encodable,
                "clamping batch size to what the vertex formats can encode"
            );
            capacity.max_instances = encodable;
        }
        if !capacity.is_supported() {
            return Err(BatchError::UnsupportedMaterial { material });
        }

        Ok(Self {
            material,
            source,
            capacity,
            allocator,
            config,
            batches: Vec::new(),
            next_batch_id: 0,
        })
    }

    /// Instances per batch.
    #[must_use]
    pub const fn capacity(&self) -> BatchCapacity {
        self.capacity
    }

    /// All batches, in creation order.
    #[must_use]
    pub fn batches(&self) -> &[Batch<A>] {
        &self.batches
    }

    /// Number of batches.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Live entities across all batches.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.batches.iter().map(Batch::live_count).sum()
    }

    /// Spawns an entity into `table` and attaches it to the first batch with
    /// a free slot, building a new batch when all are full.
    ///
    /// # Errors
    ///
    /// Propagates build errors of a new batch; the entity is not spawned then.
    pub fn create_instanced_entity(&mut self, table: &mut EntityTable, entity: InstancedEntity) -> BatchResult<EntityId> {
        let index = match self.batches.iter().position(|b| !b.is_full()) {
            Some(index) => index,
            None => self.open_batch()?,
        };

        let id = table.spawn(entity);
        if let Err(e) = self.batches[index].attach(table, id) {
            table.despawn(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Detaches an entity from its batch and despawns it.
    pub fn destroy_instanced_entity(&mut self, table: &mut EntityTable, id: EntityId) -> Option<InstancedEntity> {
        if let Some(slot) = table.get(id).and_then(InstancedEntity::slot) {
            if let Some(batch) = self.batches.iter_mut().find(|b| b.id() == slot.batch) {
                batch.detach(table, id);
            }
        }
        table.despawn(id)
    }

    /// Drops batches with no live entity, releasing their buffers.
    ///
    /// Returns how many were removed.
    pub fn cleanup_empty_batches(&mut self) -> usize {
        let before = self.batches.len();
        self.batches.retain(|b| !b.is_unused());
        before - self.batches.len()
    }

    /// Releases every batch, clearing the slot records of entities still
    /// attached. Entities stay in `table` and can be attached again.
    pub fn clear(&mut self, table: &mut EntityTable) {
        for batch in self.batches.drain(..) {
            batch.release(table);
        }
    }

    /// Compacts every batch so live entities occupy the lowest slots.
    pub fn defragment_batches(&mut self, table: &mut EntityTable) {
        for batch in &mut self.batches {
            batch.defragment(table);
        }
    }

    fn open_batch(&mut self) -> BatchResult<usize> {
        let id = BatchId(self.next_batch_id);
        let mut batch = Batch::new(
            id,
            self.material.clone(),
            self.capacity,
            Arc::clone(&self.allocator),
            self.config.clone(),
        );
        batch.build_from(&self.source, self.capacity.max_instances)?;

        tracing::info!(
            material = %self.material,
            batch = id.0,
            instances = self.capacity.max_instances,
            "opened instance batch"
        );

        self.next_batch_id += 1;
        self.batches.push(batch);
        Ok(self.batches.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::HostBufferAllocator;
    use crate::geometry::{IndexData, VertexElement, VertexFormat, VertexLayout, VertexSemantic};
    use crate::reflection::{AutoBinding, ConstantDefinition, ConstantType, InMemoryMaterialCatalog};
    use instancer_core::Matrix3x4;

    fn catalog(array_size: usize) -> InMemoryMaterialCatalog {
        let mut catalog = InMemoryMaterialCatalog::new();
        catalog.insert(
            "instanced",
            vec![ConstantDefinition::new("worldMatrix3x4Array", ConstantType::Matrix3x4, array_size)
                .bound_to(AutoBinding::WorldMatrixArray3x4)],
        );
        catalog.insert("plain", Vec::new());
        catalog
    }

    fn triangle() -> Arc<SourceGeometry> {
        let layout = VertexLayout::new(vec![VertexElement::new(
            VertexSemantic::Position,
            0,
            0,
            VertexFormat::Float3,
        )]);
        Arc::new(SourceGeometry::new(layout, vec![vec![0u8; 36]], 3, IndexData::U16(vec![0, 1, 2])))
    }

    /// Skinned triangle, `bones` bones, blend indices in `format`.
    fn skinned_triangle(bones: u16, format: VertexFormat) -> Arc<SourceGeometry> {
        let layout = VertexLayout::new(vec![
            VertexElement::new(VertexSemantic::Position, 0, 0, VertexFormat::Float3),
            VertexElement::new(VertexSemantic::BlendIndices, 0, 12, format),
        ]);
        let stride = layout.vertex_size(0);
        let source = SourceGeometry::new(layout, vec![vec![0u8; stride * 3]], 3, IndexData::U16(vec![0, 1, 2]));
        Arc::new(source.with_bone_remap((0..bones).collect()))
    }

    fn manager(array_size: usize) -> InstanceManager<HostBufferAllocator> {
        InstanceManager::new(
            "instanced",
            triangle(),
            &catalog(array_size),
            Arc::new(HostBufferAllocator::new()),
            BatchConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_unsupported_material() {
        let result = InstanceManager::new(
            "plain",
            triangle(),
            &catalog(8),
            Arc::new(HostBufferAllocator::new()),
            BatchConfig::default(),
        );
        assert!(matches!(result, Err(BatchError::UnsupportedMaterial { .. })));
    }

    #[test]
    fn test_spills_into_new_batch() {
        let mut manager = manager(3);
        let mut table = EntityTable::new();

        for _ in 0..4 {
            manager.create_instanced_entity(&mut table, InstancedEntity::default()).unwrap();
        }
        assert_eq!(manager.batch_count(), 2);
        assert_eq!(manager.batches()[0].live_count(), 3);
        assert_eq!(manager.batches()[1].live_count(), 1);
        assert_eq!(manager.live_count(), 4);
    }

    #[test]
    fn test_destroy_and_cleanup() {
        let mut manager = manager(2);
        let mut table = EntityTable::new();

        let ids: Vec<_> = (0..3)
            .map(|_| manager.create_instanced_entity(&mut table, InstancedEntity::default()).unwrap())
            .collect();
        assert_eq!(manager.batch_count(), 2);

        assert!(manager.destroy_instanced_entity(&mut table, ids[2]).is_some());
        assert_eq!(manager.cleanup_empty_batches(), 1);
        assert_eq!(manager.batch_count(), 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_freed_slot_reused_before_new_batch() {
        let mut manager = manager(2);
        let mut table = EntityTable::new();

        let a = manager.create_instanced_entity(&mut table, InstancedEntity::default()).unwrap();
        manager.create_instanced_entity(&mut table, InstancedEntity::default()).unwrap();
        manager.destroy_instanced_entity(&mut table, a);

        manager.create_instanced_entity(&mut table, InstancedEntity::default()).unwrap();
        assert_eq!(manager.batch_count(), 1);
    }

    #[test]
    fn test_defragment_batches() {
        let mut manager = manager(3);
        let mut table = EntityTable::new();

        let ids: Vec<_> = (0..3)
            .map(|_| manager.create_instanced_entity(&mut table, InstancedEntity::default()).unwrap())
            .collect();
        manager.destroy_instanced_entity(&mut table, ids[0]);
        manager.defragment_batches(&mut table);

        let slots: Vec<_> = manager.batches()[0].entities().map(|(slot, _)| slot).collect();
        assert_eq!(slots, vec![0, 1]);
    }

    #[test]
    fn test_rigid_batches_clamped_to_id_range() {
        let mut manager = manager(300);
        assert_eq!(manager.capacity().max_instances, 256);

        let mut table = EntityTable::new();
        manager.create_instanced_entity(&mut table, InstancedEntity::default()).unwrap();
        assert_eq!(manager.batches()[0].instance_count(), 256);
    }

    #[test]
    fn test_skinned_batches_clamped_to_blend_index_range() {
        // 512 matrices / 2 bones = 256 by the shader, but UByte4 reaches bone 255
        let mut manager = InstanceManager::new(
            "instanced",
            skinned_triangle(2, VertexFormat::UByte4),
            &catalog(512),
            Arc::new(HostBufferAllocator::new()),
            BatchConfig::default(),
        )
        .unwrap();
        assert_eq!(manager.capacity().max_instances, 128);

        let mut table = EntityTable::new();
        let entity = InstancedEntity::skinned(Matrix3x4::IDENTITY, vec![Matrix3x4::IDENTITY; 2]);
        manager.create_instanced_entity(&mut table, entity).unwrap();
        assert_eq!(manager.batches()[0].num_world_transforms(), 256);
    }

    #[test]
    fn test_wide_blend_indices_keep_shader_capacity() {
        let manager = InstanceManager::new(
            "instanced",
            skinned_triangle(2, VertexFormat::UShort4),
            &catalog(512),
            Arc::new(HostBufferAllocator::new()),
            BatchConfig::default(),
        )
        .unwrap();
        assert_eq!(manager.capacity().max_instances, 256);
    }

    #[test]
    fn test_unencodable_bone_count_is_unsupported() {
        // 300 bones cannot be told apart by UByte4 even for a single copy
        let result = InstanceManager::new(
            "instanced",
            skinned_triangle(300, VertexFormat::UByte4),
            &catalog(600),
            Arc::new(HostBufferAllocator::new()),
            BatchConfig::default(),
        );
        assert!(matches!(result, Err(BatchError::UnsupportedMaterial { .. })));
    }

    #[test]
    fn test_clear_frees_entities_for_reattach() {
        let mut manager = manager(4);
        let mut table = EntityTable::new();
        let id = manager.create_instanced_entity(&mut table, InstancedEntity::default()).unwrap();

        manager.clear(&mut table);
        assert_eq!(manager.batch_count(), 0);
        assert!(table.get(id).unwrap().slot().is_none());

        let mut batch = Batch::new(
            BatchId(9),
            "instanced",
            manager.capacity(),
            Arc::new(HostBufferAllocator::new()),
            BatchConfig::default(),
        );
        batch.build_from(&triangle(), 1).unwrap();
        assert_eq!(batch.attach(&mut table, id).unwrap(), 0);
    }
}
