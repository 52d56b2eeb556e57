//! # Capacity Estimation
//!
//! How many instances fit one batch is bounded by the vertex program's
//! world-matrix array: every instance consumes one matrix per bone.

use crate::config::BatchConfig;
use crate::error::{BatchError, BatchResult};
use crate::geometry::SourceGeometry;
use crate::reflection::{ConstantDefinition, MaterialCatalog};

/// Derived sizing for batches of one mesh/material pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchCapacity {
    /// Blend indices per instance (0 if rigid).
    pub bone_count: usize,
    /// Maximum instances per batch. 0 means the material cannot instance.
    pub max_instances: usize,
}

impl BatchCapacity {
    /// Returns true if at least one instance fits.
    #[inline]
    #[must_use]
    pub const fn is_supported(&self) -> bool {
        self.max_instances > 0
    }

    /// Returns true if instancing is possible but fewer than `threshold`
    /// instances fit, so batching may lose to plain draws.
    #[inline]
    #[must_use]
    pub const fn is_low(&self, threshold: usize) -> bool {
        self.is_supported() && self.max_instances < threshold
    }

    /// World transforms each instance consumes.
    #[inline]
    #[must_use]
    pub const fn transforms_per_instance(&self) -> usize {
        if self.bone_count > 1 {
            self.bone_count
        } else {
            1
        }
    }
}

/// Capacity straight from reflection data: `array_size / max(1, bone_count)`
/// of the first float 3x4 world-matrix array, or None if there is none.
#[must_use]
pub fn capacity_from_constants(constants: &[ConstantDefinition], bone_count: usize) -> Option<usize> {
    constants
        .iter()
        .find(|c| c.is_world_matrix_array())
        .map(|c| c.array_size / bone_count.max(1))
}

/// Computes batch capacities from a material catalog.
pub struct CapacityEstimator<'a, C: MaterialCatalog + ?Sized> {
    catalog: &'a C,
    low_capacity_threshold: usize,
    max_instances_cap: Option<usize>,
}

impl<'a, C: MaterialCatalog + ?Sized> CapacityEstimator<'a, C> {
    /// Creates an estimator with default thresholds.
    #[must_use]
    pub fn new(catalog: &'a C) -> Self {
        Self::with_config(catalog, &BatchConfig::default())
    }

    /// Creates an estimator using a batch config's thresholds and cap.
    #[must_use]
    pub fn with_config(catalog: &'a C, config: &BatchConfig) -> Self {
        Self {
            catalog,
            low_capacity_threshold: config.low_capacity_threshold,
            max_instances_cap: config.max_instances_per_batch,
        }
    }

    /// Estimates capacity for a material and bone count.
    ///
    /// Returns `max_instances == 0` when the material has no world-matrix
    /// array; such materials must not be batched.
    #[must_use]
    pub fn estimate(&self, material: &str, bone_count: usize) -> BatchCapacity {
        let shader_limit = self
            .catalog
            .vertex_constants(material)
            .and_then(|constants| capacity_from_constants(constants, bone_count));

        let Some(limit) = shader_limit else {
            tracing::warn!(material, "no world matrix array bound, material cannot be instanced");
            return BatchCapacity {
                bone_count,
                max_instances: 0,
            };
        };

        let shader_capacity = BatchCapacity {
            bone_count,
            max_instances: limit,
        };
        if shader_capacity.is_low(self.low_capacity_threshold) {
            tracing::warn!(
                material,
                bone_count,
                instances = limit,
                "very few instances per batch, batching may be slower than plain draws"
            );
        }

        match self.max_instances_cap {
            Some(cap) => BatchCapacity {
                bone_count,
                max_instances: limit.min(cap),
            },
            None => shader_capacity,
        }
    }

    /// Estimates capacity for a source mesh, taking its bone count from the
    /// bone remap table.
    #[must_use]
    pub fn estimate_for(&self, material: &str, source: &SourceGeometry) -> BatchCapacity {
        self.estimate(material, source.bone_count())
    }

    /// Like [`estimate`](Self::estimate) but fails on unsupported materials.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedMaterial` if no instance fits.
    pub fn require(&self, material: &str, bone_count: usize) -> BatchResult<BatchCapacity> {
        let capacity = self.estimate(material, bone_count);
        if capacity.is_supported() {
            Ok(capacity)
        } else {
            Err(BatchError::UnsupportedMaterial {
                material: material.to_owned(),
            })
        }
    }
}
