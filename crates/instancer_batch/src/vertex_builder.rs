//! # Vertex Batch Builder
//!
//! Merges N copies of a source mesh's vertex streams into one set of
//! buffers. Two strategies, picked once per batch:
//!
//! ```text
//! RIGID                                  SKELETAL
//! stream k: [copy 0][copy 1]..[copy N-1]  stream k: [copy 0][copy 1]..[copy N-1]
//!           byte-identical copies                   blend indices += copy * B
//! stream K+1 (synthetic instance id):
//!           [0 0 0 0]x V, [1 1 1 1]x V, ...         (no extra stream)
//! ```
//!
//! Rigid copies are told apart by the synthetic id stream, which the vertex
//! stage uses to pick its world matrix. Skinned copies need no extra stream:
//! their bone indices already point into a disjoint range of the
//! world-transform array.

use crate::error::{BatchError, BatchResult};
use crate::geometry::{read_channels, SourceGeometry, VertexElement, VertexFormat, VertexLayout, VertexSemantic};

/// Copies the rigid path can tag with a `UByte4` instance id.
pub const MAX_RIGID_INSTANCES: usize = u8::MAX as usize + 1;

/// How merged vertices are produced. Fixed for a batch's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuildStrategy {
    /// Repeat streams verbatim and append an instance-id stream.
    Rigid,
    /// Repeat streams, offsetting blend indices by `copy * bone_count`.
    Skeletal {
        /// Blend indices per instance.
        bone_count: usize,
    },
}

impl BuildStrategy {
    /// Picks the strategy for a source: skeletal when it carries a bone remap
    /// table, rigid otherwise.
    #[must_use]
    pub fn detect(source: &SourceGeometry) -> Self {
        match source.bone_remap() {
            Some(remap) if !remap.is_empty() => Self::Skeletal {
                bone_count: remap.len(),
            },
            _ => Self::Rigid,
        }
    }

    /// Blend indices per instance (0 if rigid).
    #[must_use]
    pub const fn bone_count(self) -> usize {
        match self {
            Self::Rigid => 0,
            Self::Skeletal { bone_count } => bone_count,
        }
    }

    /// World transforms each instance consumes, `max(1, bone_count)`.
    #[must_use]
    pub const fn transforms_per_instance(self) -> usize {
        match self {
            Self::Skeletal { bone_count } if bone_count > 1 => bone_count,
            _ => 1,
        }
    }

    /// Most copies the merged vertex formats can tell apart: the `UByte4` id
    /// channel for rigid batches, the blend-index channel range for skeletal
    /// ones. 0 if the layout has no usable blend indices.
    #[must_use]
    pub fn max_encodable_instances(self, layout: &VertexLayout) -> usize {
        match self {
            Self::Rigid => MAX_RIGID_INSTANCES,
            Self::Skeletal { bone_count } => layout
                .find(VertexSemantic::BlendIndices)
                .and_then(|e| e.format.index_channels())
                .map_or(0, |(_, format_max)| (format_max + 1) / bone_count.max(1)),
        }
    }
}

/// What to do with one element while copying a vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ElementOp {
    /// Copy bytes verbatim.
    Copy,
    /// Add the copy's bone offset to every index channel.
    RemapBones,
}

impl ElementOp {
    const fn for_semantic(semantic: VertexSemantic) -> Self {
        match semantic {
            VertexSemantic::BlendIndices => Self::RemapBones,
            _ => Self::Copy,
        }
    }
}

/// Merged vertex data ready for upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergedVertexData {
    layout: VertexLayout,
    streams: Vec<Vec<u8>>,
    vertex_count: usize,
    instance_id_stream: Option<u16>,
}

impl MergedVertexData {
    /// Layout of the merged buffers, including any synthetic stream.
    #[must_use]
    pub const fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    /// One buffer per stream.
    #[must_use]
    pub fn streams(&self) -> &[Vec<u8>] {
        &self.streams
    }

    /// Merged vertex count, `source vertices * instances`.
    #[must_use]
    pub const fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Stream holding the synthetic instance id (rigid batches only).
    #[must_use]
    pub const fn instance_id_stream(&self) -> Option<u16> {
        self.instance_id_stream
    }

    /// Per-vertex instance ids, read back from the synthetic stream.
    #[must_use]
    pub fn instance_ids(&self) -> Option<Vec<u8>> {
        let stream = self.instance_id_stream?;
        let data = self.streams.get(usize::from(stream))?;
        Some(data.chunks_exact(4).map(|c| c[0]).collect())
    }

    pub(crate) fn into_parts(self) -> (VertexLayout, Vec<Vec<u8>>, usize) {
        (self.layout, self.streams, self.vertex_count)
    }
}

/// Builds merged vertex buffers for a batch of `instance_count` copies.
///
/// The source must already have passed [`SourceGeometry::validate`].
pub struct VertexBatchBuilder<'a> {
    source: &'a SourceGeometry,
    instance_count: usize,
}

impl<'a> VertexBatchBuilder<'a> {
    /// Creates a builder.
    #[must_use]
    pub const fn new(source: &'a SourceGeometry, instance_count: usize) -> Self {
        Self { source, instance_count }
    }

    /// Builds with the given strategy.
    ///
    /// # Errors
    ///
    /// - `InstanceIdOverflow` if a rigid batch has more than 256 copies
    /// - `BoneIndexOverflow` if remapped indices exceed the blend-index format
    /// - `MalformedSource` if the source has no blend indices to remap
    pub fn build(&self, strategy: BuildStrategy) -> BatchResult<MergedVertexData> {
        match strategy {
            BuildStrategy::Rigid => self.build_rigid(),
            BuildStrategy::Skeletal { bone_count } => self.build_skeletal(bone_count),
        }
    }

    fn build_rigid(&self) -> BatchResult<MergedVertexData> {
        let n = self.instance_count;
        if n > MAX_RIGID_INSTANCES {
            return Err(BatchError::InstanceIdOverflow { instance_count: n });
        }

        let vertex_count = self.source.vertex_count();
        let mut streams: Vec<Vec<u8>> = self.source.streams().iter().map(|s| s.repeat(n)).collect();

        let id_stream = self.source.layout().max_stream().map_or(0, |s| s + 1);
        let layout = self.source.layout().with_element(VertexElement::new(
            VertexSemantic::BlendIndices,
            id_stream,
            0,
            VertexFormat::UByte4,
        ));

        // Four equal channels per vertex, all equal to the copy index
        let mut ids = Vec::with_capacity(vertex_count * n * 4);
        for copy in 0..n {
            ids.resize(ids.len() + vertex_count * 4, copy as u8);
        }
        streams.push(ids);

        Ok(MergedVertexData {
            layout,
            streams,
            vertex_count: vertex_count * n,
            instance_id_stream: Some(id_stream),
        })
    }

    fn build_skeletal(&self, bone_count: usize) -> BatchResult<MergedVertexData> {
        let n = self.instance_count;
        let layout = self.source.layout();
        let blend = layout
            .find(VertexSemantic::BlendIndices)
            .ok_or_else(|| BatchError::MalformedSource("skeletal batch without blend indices".to_owned()))?;

        let Some((_, format_max)) = blend.format.index_channels() else {
            return Err(BatchError::MalformedSource(format!(
                "unsupported blend index format {:?}",
                blend.format
            )));
        };
        let max_index = (n * bone_count).saturating_sub(1);
        if max_index > format_max {
            return Err(BatchError::BoneIndexOverflow {
                max_index,
                format: blend.format,
            });
        }

        let vertex_count = self.source.vertex_count();
        let streams = (0u16..)
            .zip(self.source.streams())
            .map(|(stream, src)| self.remap_stream(stream, src, bone_count))
            .collect();

        Ok(MergedVertexData {
            layout: layout.clone(),
            streams,
            vertex_count: vertex_count * n,
            instance_id_stream: None,
        })
    }

    /// Walks one stream vertex by vertex for every copy, dispatching each
    /// element to a plain copy or a bone remap.
    fn remap_stream(&self, stream: u16, src: &[u8], bone_count: usize) -> Vec<u8> {
        let layout = self.source.layout();
        let stride = layout.vertex_size(stream);
        let elements: Vec<(VertexElement, ElementOp)> = layout
            .stream_elements(stream)
            .map(|e| (*e, ElementOp::for_semantic(e.semantic)))
            .collect();

        let mut dst = vec![0u8; src.len() * self.instance_count];
        for (copy, dst_copy) in dst.chunks_exact_mut(src.len()).enumerate() {
            let bone_offset = copy * bone_count;
            for (src_vertex, dst_vertex) in src.chunks_exact(stride).zip(dst_copy.chunks_exact_mut(stride)) {
                for (element, op) in &elements {
                    let range = element.offset..element.end();
                    match op {
                        ElementOp::Copy => dst_vertex[range.clone()].copy_from_slice(&src_vertex[range]),
                        ElementOp::RemapBones => {
                            remap_indices(&src_vertex[range.clone()], &mut dst_vertex[range], element.format, bone_offset);
                        }
                    }
                }
            }
        }
        dst
    }
}

/// Writes `src + offset` for every index channel. The caller has checked the
/// result fits the format.
fn remap_indices(src: &[u8], dst: &mut [u8], format: VertexFormat, offset: usize) {
    let Some((width, _)) = format.index_channels() else {
        dst.copy_from_slice(src);
        return;
    };
    for (value, out) in read_channels(src, width).zip(dst.chunks_exact_mut(width)) {
        let remapped = value + offset;
        match width {
            1 => out[0] = remapped as u8,
            _ => out.copy_from_slice(&(remapped as u16).to_le_bytes()),
        }
    }
}
