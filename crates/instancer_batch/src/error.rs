//! # Batch Error Types
//!
//! All errors that can occur while sizing, building or populating a batch.

use thiserror::Error;

use crate::geometry::VertexFormat;

/// Errors that can occur in the batching system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// The material's vertex program has no world-matrix-array binding.
    #[error("material {material} does not support shader instancing")]
    UnsupportedMaterial {
        /// Material name.
        material: String,
    },

    /// The batch is full, or was asked to build more copies than fit.
    #[error("batch capacity exceeded: capacity {capacity}, requested {requested}")]
    CapacityExceeded {
        /// Maximum instances for this batch.
        capacity: usize,
        /// Instances requested.
        requested: usize,
    },

    /// Merged vertices are not addressable by the index type.
    #[error("merged vertex count {vertex_count} exceeds index range of {max} vertices")]
    IndexRangeOverflow {
        /// Merged vertex count.
        vertex_count: usize,
        /// Addressable vertices.
        max: usize,
    },

    /// The per-vertex instance id does not fit its byte channel.
    #[error("instance id overflow: {instance_count} copies, at most 256 fit the id stream")]
    InstanceIdOverflow {
        /// Requested copies.
        instance_count: usize,
    },

    /// A remapped bone index does not fit the blend-index format.
    #[error("bone index {max_index} does not fit blend index format {format:?}")]
    BoneIndexOverflow {
        /// Largest remapped index.
        max_index: usize,
        /// Blend-index element format.
        format: VertexFormat,
    },

    /// The source geometry is inconsistent.
    #[error("malformed source geometry: {0}")]
    MalformedSource(String),

    /// `build_from` was called on a batch that already holds geometry.
    #[error("batch geometry already built")]
    AlreadyBuilt,

    /// The batch has no geometry yet.
    #[error("batch geometry not built")]
    NotBuilt,

    /// The entity already occupies a batch slot.
    #[error("entity already attached to batch {batch}")]
    AlreadyAttached {
        /// Batch holding the entity.
        batch: u32,
    },

    /// The entity handle no longer refers to a live entity.
    #[error("entity handle is stale")]
    StaleEntity,

    /// The buffer allocator refused a buffer.
    #[error("buffer allocation failed: {0}")]
    Allocation(String),

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for batch operations.
pub type BatchResult<T> = Result<T, BatchError>;
