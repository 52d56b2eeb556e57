//! # INSTANCER Core
//!
//! Shared types for shader-based instance batching:
//! - Generational entity handles that batches hold instead of references
//! - The scene-owned entity table
//! - 3x4 affine matrices in the layout the vertex stage consumes
//!
//! ## Ownership Rules
//!
//! 1. **The scene owns entities** - batches only store [`EntityId`]s
//! 2. **Stale handles are detectable** - every slot carries a generation
//! 3. **Transforms are `Pod`** - the world-transform array uploads as bytes
//!
//! ## Example
//!
//! ```rust
//! use instancer_core::{EntityTable, InstancedEntity, Matrix3x4};
//!
//! let mut table = EntityTable::new();
//! let id = table.spawn(InstancedEntity::new(Matrix3x4::from_translation(1.0, 2.0, 3.0)));
//! assert!(table.is_alive(id));
//!
//! table.despawn(id);
//! assert!(!table.is_alive(id));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod entity;
pub mod math;
pub mod table;

pub use entity::{BatchId, BatchSlot, EntityId, InstancedEntity};
pub use math::Matrix3x4;
pub use table::EntityTable;
