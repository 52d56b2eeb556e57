//! # Index Batch Builder
//!
//! Repeats the source index list once per copy, shifting copy `i` by
//! `i * source_vertex_count` so it addresses its own vertices.

use crate::config::IndexOverflowPolicy;
use crate::error::{BatchError, BatchResult};
use crate::geometry::{IndexData, IndexFormat, SourceGeometry};

/// Builds the merged index buffer for a batch.
///
/// Output is 16-bit whenever the merged vertex count allows it. Past that,
/// the [`IndexOverflowPolicy`] decides between 32-bit indices and failure.
pub struct IndexBatchBuilder<'a> {
    source: &'a SourceGeometry,
    instance_count: usize,
    policy: IndexOverflowPolicy,
}

impl<'a> IndexBatchBuilder<'a> {
    /// Creates a builder that widens on overflow.
    #[must_use]
    pub const fn new(source: &'a SourceGeometry, instance_count: usize) -> Self {
        Self {
            source,
            instance_count,
            policy: IndexOverflowPolicy::Widen,
        }
    }

    /// Sets the overflow policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: IndexOverflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Index width the merged buffer will use.
    ///
    /// # Errors
    ///
    /// Returns `IndexRangeOverflow` if the merged vertices do not fit the
    /// allowed width.
    pub fn output_format(&self) -> BatchResult<IndexFormat> {
        let vertex_count = self.source.vertex_count() * self.instance_count;

        if vertex_count <= IndexFormat::U16.addressable_vertices() {
            return Ok(IndexFormat::U16);
        }

        let overflow = |max| BatchError::IndexRangeOverflow { vertex_count, max };
        match self.policy {
            IndexOverflowPolicy::Reject => Err(overflow(IndexFormat::U16.addressable_vertices())),
            IndexOverflowPolicy::Widen if vertex_count <= IndexFormat::U32.addressable_vertices() => {
                tracing::debug!(vertex_count, "merged vertices exceed 16-bit range, widening indices");
                Ok(IndexFormat::U32)
            }
            IndexOverflowPolicy::Widen => Err(overflow(IndexFormat::U32.addressable_vertices())),
        }
    }

    /// Builds the merged index buffer.
    ///
    /// # Errors
    ///
    /// Returns `IndexRangeOverflow` as described in [`output_format`](Self::output_format).
    pub fn build(&self) -> BatchResult<IndexData> {
        let format = self.output_format()?;
        let source_vertices = self.source.vertex_count();
        let shifted = (0..self.instance_count).flat_map(|copy| {
            let offset = copy * source_vertices;
            self.source.indices().iter().map(move |i| i as usize + offset)
        });

        let total = self.source.indices().len() * self.instance_count;
        Ok(match format {
            IndexFormat::U16 => {
                let mut out = Vec::with_capacity(total);
                out.extend(shifted.map(|i| i as u16));
                IndexData::U16(out)
            }
            IndexFormat::U32 => {
                let mut out = Vec::with_capacity(total);
                out.extend(shifted.map(|i| i as u32));
                IndexData::U32(out)
            }
        })
    }
}
