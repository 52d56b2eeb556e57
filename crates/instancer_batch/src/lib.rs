//! # INSTANCER Batch
//!
//! Shader-based instance batching: N copies of one mesh fragment drawn with
//! a single call.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       LOAD TIME (once)                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  MaterialCatalog → CapacityEstimator → max instances         │
//! │  SourceGeometry  → VertexBatchBuilder → merged streams       │
//! │                  → IndexBatchBuilder  → merged indices       │
//! │                  → BufferAllocator    → static GPU buffers   │
//! ├──────────────────────────────────────────────────────────────┤
//! │                       EVERY FRAME                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  EntityTable → TransformCollector → [Matrix3x4; N * max(1,B)]│
//! │                                   → upload → one draw call   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use instancer_batch::{
//!     AutoBinding, Batch, BatchConfig, CapacityEstimator, ConstantDefinition, ConstantType,
//!     HostBufferAllocator, InMemoryMaterialCatalog, IndexData, SourceGeometry, VertexElement,
//!     VertexFormat, VertexLayout, VertexSemantic,
//! };
//! use instancer_core::{BatchId, EntityTable, InstancedEntity, Matrix3x4};
//!
//! let mut catalog = InMemoryMaterialCatalog::new();
//! catalog.insert("crowd", vec![
//!     ConstantDefinition::new("worldMatrix3x4Array", ConstantType::Matrix3x4, 80)
//!         .bound_to(AutoBinding::WorldMatrixArray3x4),
//! ]);
//! let capacity = CapacityEstimator::new(&catalog).require("crowd", 0)?;
//!
//! let layout = VertexLayout::new(vec![
//!     VertexElement::new(VertexSemantic::Position, 0, 0, VertexFormat::Float3),
//! ]);
//! let source = SourceGeometry::new(layout, vec![vec![0u8; 36]], 3, IndexData::U16(vec![0, 1, 2]));
//!
//! let allocator = Arc::new(HostBufferAllocator::new());
//! let mut batch = Batch::new(BatchId(0), "crowd", capacity, allocator, BatchConfig::default());
//! batch.build_from(&source, 4)?;
//!
//! let mut table = EntityTable::new();
//! let id = table.spawn(InstancedEntity::new(Matrix3x4::from_translation(1.0, 0.0, 0.0)));
//! batch.attach(&mut table, id)?;
//!
//! let mut transforms = vec![Matrix3x4::ZERO; batch.num_world_transforms()];
//! batch.get_world_transforms(&table, &mut transforms);
//! assert_eq!(transforms[0].translation(), [1.0, 0.0, 0.0]);
//! # Ok::<(), instancer_batch::BatchError>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod allocator;
pub mod batch;
pub mod capacity;
pub mod config;
pub mod error;
pub mod geometry;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod index_builder;
pub mod manager;
pub mod reflection;
pub mod transforms;
pub mod vertex_builder;

pub use allocator::{AllocatorStats, BufferAllocator, BufferDesc, BufferKind, HostBuffer, HostBufferAllocator};
pub use batch::{Batch, BatchState, DrawArgs};
pub use capacity::{capacity_from_constants, BatchCapacity, CapacityEstimator};
pub use config::{BatchConfig, IndexOverflowPolicy};
pub use error::{BatchError, BatchResult};
pub use geometry::{
    IndexData, IndexFormat, SourceGeometry, VertexElement, VertexFormat, VertexLayout, VertexSemantic,
};
#[cfg(feature = "gpu")]
pub use gpu::{upload_world_transforms, WgpuBufferAllocator};
pub use index_builder::IndexBatchBuilder;
pub use manager::InstanceManager;
pub use reflection::{AutoBinding, ConstantDefinition, ConstantType, InMemoryMaterialCatalog, MaterialCatalog};
pub use transforms::TransformCollector;
pub use vertex_builder::{BuildStrategy, MergedVertexData, VertexBatchBuilder, MAX_RIGID_INSTANCES};
