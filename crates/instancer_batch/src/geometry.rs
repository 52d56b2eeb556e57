//! # Source Geometry
//!
//! The read-only template a batch is built from: a vertex layout described
//! as a table of elements, one raw byte buffer per stream, and an index
//! buffer. Skinned meshes also carry a bone remap table mapping the blend
//! indices stored in the vertices to skeleton bones.
//!
//! ## Layout
//!
//! ```text
//! stream 0: | position (0..12) | normal (12..24) | uv (24..32) |  stride 32
//! stream 1: | blend idx (0..4) | blend w (4..20) |                stride 20
//! ```
//!
//! A stream's stride is the furthest byte any of its elements reaches.

use crate::error::{BatchError, BatchResult};

/// What a vertex element means to the vertex stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexSemantic {
    /// Object-space position.
    Position,
    /// Surface normal.
    Normal,
    /// Tangent vector.
    Tangent,
    /// Binormal vector.
    Binormal,
    /// Vertex color.
    Diffuse,
    /// Secondary color.
    Specular,
    /// Texture coordinate set.
    TexCoord(u8),
    /// Skinning weights.
    BlendWeights,
    /// Skinning bone indices. Also carries the instance id on rigid batches.
    BlendIndices,
}

/// Storage format of a vertex element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    /// One f32.
    Float1,
    /// Two f32.
    Float2,
    /// Three f32.
    Float3,
    /// Four f32.
    Float4,
    /// Four u8.
    UByte4,
    /// Four u8, normalized.
    UByte4Norm,
    /// Two i16.
    Short2,
    /// Four i16.
    Short4,
    /// Four u16.
    UShort4,
    /// Packed RGBA8 color.
    Color,
}

impl VertexFormat {
    /// Size in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Float1 | Self::UByte4 | Self::UByte4Norm | Self::Short2 | Self::Color => 4,
            Self::Float2 | Self::Short4 | Self::UShort4 => 8,
            Self::Float3 => 12,
            Self::Float4 => 16,
        }
    }

    /// Channel width in bytes and the largest storable value, for formats
    /// that can hold blend indices.
    #[must_use]
    pub const fn index_channels(self) -> Option<(usize, usize)> {
        match self {
            Self::UByte4 => Some((1, u8::MAX as usize)),
            Self::UShort4 => Some((2, u16::MAX as usize)),
            _ => None,
        }
    }
}

/// One attribute of a vertex: where it lives and how it is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexElement {
    /// Meaning.
    pub semantic: VertexSemantic,
    /// Stream (buffer binding) holding the element.
    pub stream: u16,
    /// Byte offset within one vertex of the stream.
    pub offset: usize,
    /// Storage format.
    pub format: VertexFormat,
}

impl VertexElement {
    /// Creates an element.
    #[must_use]
    pub const fn new(semantic: VertexSemantic, stream: u16, offset: usize, format: VertexFormat) -> Self {
        Self {
            semantic,
            stream,
            offset,
            format,
        }
    }

    /// Size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.format.size()
    }

    /// Byte just past the element.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + self.format.size()
    }
}

/// Ordered table of vertex elements.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VertexLayout {
    elements: Vec<VertexElement>,
}

impl VertexLayout {
    /// Creates a layout from its elements.
    #[must_use]
    pub fn new(elements: Vec<VertexElement>) -> Self {
        Self { elements }
    }

    /// Returns a copy of this layout with one more element.
    #[must_use]
    pub fn with_element(&self, element: VertexElement) -> Self {
        let mut elements = self.elements.clone();
        elements.push(element);
        Self { elements }
    }

    /// All elements, in declaration order.
    #[must_use]
    pub fn elements(&self) -> &[VertexElement] {
        &self.elements
    }

    /// Returns true if the layout has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Elements stored in one stream.
    pub fn stream_elements(&self, stream: u16) -> impl Iterator<Item = &VertexElement> {
        self.elements.iter().filter(move |e| e.stream == stream)
    }

    /// Bytes per vertex in one stream.
    #[must_use]
    pub fn vertex_size(&self, stream: u16) -> usize {
        self.stream_elements(stream).map(VertexElement::end).max().unwrap_or(0)
    }

    /// Highest stream index referenced, if any.
    #[must_use]
    pub fn max_stream(&self) -> Option<u16> {
        self.elements.iter().map(|e| e.stream).max()
    }

    /// Number of streams (`max_stream + 1`).
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.max_stream().map_or(0, |s| usize::from(s) + 1)
    }

    /// First element with the given semantic.
    #[must_use]
    pub fn find(&self, semantic: VertexSemantic) -> Option<&VertexElement> {
        self.elements.iter().find(|e| e.semantic == semantic)
    }
}

/// Width of an index buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    /// 16-bit indices.
    U16,
    /// 32-bit indices.
    U32,
}

impl IndexFormat {
    /// Size of one index in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// Number of distinct vertices addressable.
    #[must_use]
    pub const fn addressable_vertices(self) -> usize {
        match self {
            Self::U16 => u16::MAX as usize + 1,
            Self::U32 => u32::MAX as usize + 1,
        }
    }
}

/// Triangle-list indices in either width.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexData {
    /// 16-bit indices.
    U16(Vec<u16>),
    /// 32-bit indices.
    U32(Vec<u32>),
}

impl IndexData {
    /// Number of indices.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::U16(v) => v.len(),
            Self::U32(v) => v.len(),
        }
    }

    /// Returns true if there are no indices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index width.
    #[must_use]
    pub const fn format(&self) -> IndexFormat {
        match self {
            Self::U16(_) => IndexFormat::U16,
            Self::U32(_) => IndexFormat::U32,
        }
    }

    /// Iterates the indices widened to u32.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        let (narrow, wide) = match self {
            Self::U16(v) => (Some(v.iter().copied().map(u32::from)), None),
            Self::U32(v) => (None, Some(v.iter().copied())),
        };
        narrow.into_iter().flatten().chain(wide.into_iter().flatten())
    }

    /// Raw bytes for upload.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::U16(v) => bytemuck::cast_slice(v),
            Self::U32(v) => bytemuck::cast_slice(v),
        }
    }
}

/// Read-only mesh template a batch is built from.
///
/// Constructed by the asset loader and never mutated. Consistency is checked
/// by [`SourceGeometry::validate`] when a batch is built from it.
#[derive(Clone, Debug)]
pub struct SourceGeometry {
    layout: VertexLayout,
    streams: Vec<Vec<u8>>,
    vertex_count: usize,
    indices: IndexData,
    bone_remap: Option<Vec<u16>>,
}

impl SourceGeometry {
    /// Creates a rigid source geometry.
    ///
    /// # Arguments
    ///
    /// * `layout` - Element table for all streams
    /// * `streams` - One buffer per stream, `vertex_size(stream) * vertex_count` bytes each
    /// * `vertex_count` - Vertices in every stream
    /// * `indices` - Triangle list indices into `[0, vertex_count)`
    #[must_use]
    pub fn new(layout: VertexLayout, streams: Vec<Vec<u8>>, vertex_count: usize, indices: IndexData) -> Self {
        Self {
            layout,
            streams,
            vertex_count,
            indices,
            bone_remap: None,
        }
    }

    /// Attaches the bone remap table of a skinned mesh. Entry `b` is the
    /// skeleton bone driven by blend index `b`.
    #[must_use]
    pub fn with_bone_remap(mut self, bone_remap: Vec<u16>) -> Self {
        self.bone_remap = Some(bone_remap);
        self
    }

    /// Vertex layout.
    #[must_use]
    pub const fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    /// Raw bytes of one stream.
    #[must_use]
    pub fn stream(&self, stream: u16) -> Option<&[u8]> {
        self.streams.get(usize::from(stream)).map(Vec::as_slice)
    }

    /// All stream buffers.
    #[must_use]
    pub fn streams(&self) -> &[Vec<u8>] {
        &self.streams
    }

    /// Vertices per stream.
    #[must_use]
    pub const fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Index buffer.
    #[must_use]
    pub const fn indices(&self) -> &IndexData {
        &self.indices
    }

    /// Bone remap table, if skinned.
    #[must_use]
    pub fn bone_remap(&self) -> Option<&[u16]> {
        self.bone_remap.as_deref()
    }

    /// Number of blend indices (0 if rigid).
    #[must_use]
    pub fn bone_count(&self) -> usize {
        self.bone_remap.as_ref().map_or(0, Vec::len)
    }

    /// Checks that buffers, layout, indices and bone data agree.
    ///
    /// # Errors
    ///
    /// Returns `MalformedSource` describing the first inconsistency found.
    pub fn validate(&self) -> BatchResult<()> {
        if self.layout.is_empty() {
            return Err(malformed("missing vertex layout"));
        }
        if self.vertex_count == 0 {
            return Err(malformed("source has no vertices"));
        }
        if self.indices.is_empty() {
            return Err(malformed("source has no indices"));
        }
        if self.streams.len() != self.layout.stream_count() {
            return Err(malformed(format!(
                "layout references {} streams, {} buffers supplied",
                self.layout.stream_count(),
                self.streams.len()
            )));
        }

        for (stream, data) in (0u16..).zip(&self.streams) {
            let stride = self.layout.vertex_size(stream);
            if stride == 0 {
                return Err(malformed(format!("stream {stream} has no elements")));
            }
            if data.len() != stride * self.vertex_count {
                return Err(malformed(format!(
                    "stream {stream} holds {} bytes, expected {} ({} vertices of {stride} bytes)",
                    data.len(),
                    stride * self.vertex_count,
                    self.vertex_count
                )));
            }
        }

        if let Some(bad) = self.indices.iter().find(|&i| i as usize >= self.vertex_count) {
            return Err(malformed(format!(
                "index {bad} out of range for {} vertices",
                self.vertex_count
            )));
        }

        self.validate_bones()
    }

    fn validate_bones(&self) -> BatchResult<()> {
        let blend = self.layout.find(VertexSemantic::BlendIndices);

        let (remap, blend) = match (&self.bone_remap, blend) {
            (None, None) => return Ok(()),
            (None, Some(_)) => return Err(malformed("blend indices present without a bone remap table")),
            (Some(_), None) => return Err(malformed("bone remap table present without blend indices")),
            (Some(remap), Some(blend)) => (remap, *blend),
        };

        if remap.is_empty() {
            return Err(malformed("bone remap table is empty"));
        }
        let Some((width, _)) = blend.format.index_channels() else {
            return Err(malformed(format!("unsupported blend index format {:?}", blend.format)));
        };

        let stride = self.layout.vertex_size(blend.stream);
        let data = &self.streams[usize::from(blend.stream)];
        for vertex in data.chunks_exact(stride) {
            let channels = &vertex[blend.offset..blend.end()];
            if let Some(index) = read_channels(channels, width).find(|&i| i >= remap.len()) {
                return Err(malformed(format!(
                    "blend index {index} out of range for {} remapped bones",
                    remap.len()
                )));
            }
        }
        Ok(())
    }
}

/// Decodes little-endian index channels of `width` bytes each.
pub(crate) fn read_channels(bytes: &[u8], width: usize) -> impl Iterator<Item = usize> + '_ {
    bytes.chunks_exact(width).map(|c| match *c {
        [b] => usize::from(b),
        [lo, hi] => usize::from(u16::from_le_bytes([lo, hi])),
        _ => 0,
    })
}

fn malformed(msg: impl Into<String>) -> BatchError {
    BatchError::MalformedSource(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_layout() -> VertexLayout {
        VertexLayout::new(vec![
            VertexElement::new(VertexSemantic::Position, 0, 0, VertexFormat::Float3),
            VertexElement::new(VertexSemantic::TexCoord(0), 0, 12, VertexFormat::Float2),
        ])
    }

    fn quad() -> SourceGeometry {
        SourceGeometry::new(quad_layout(), vec![vec![0u8; 20 * 4]], 4, IndexData::U16(vec![0, 1, 2, 2, 1, 3]))
    }

    #[test]
    fn test_vertex_size() {
        let layout = quad_layout();
        assert_eq!(layout.vertex_size(0), 20);
        assert_eq!(layout.vertex_size(1), 0);
        assert_eq!(layout.stream_count(), 1);
    }

    #[test]
    fn test_format_sizes() {
        assert_eq!(VertexFormat::Float3.size(), 12);
        assert_eq!(VertexFormat::UByte4.size(), 4);
        assert_eq!(VertexFormat::UShort4.size(), 8);
        assert_eq!(VertexFormat::UByte4.index_channels(), Some((1, 255)));
        assert_eq!(VertexFormat::Float4.index_channels(), None);
    }

    #[test]
    fn test_addressable_vertices() {
        assert_eq!(IndexFormat::U16.addressable_vertices(), 65_536);
        assert_eq!(IndexFormat::U32.addressable_vertices(), 1usize << 32);
    }

    #[test]
    fn test_index_iter_and_bytes() {
        let narrow = IndexData::U16(vec![1, 2, 3]);
        let wide = IndexData::U32(vec![70_000, 5]);
        assert_eq!(narrow.iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(wide.iter().collect::<Vec<_>>(), vec![70_000, 5]);
        assert_eq!(narrow.as_bytes().len(), 6);
        assert_eq!(wide.as_bytes().len(), 8);
        assert_eq!(wide.format(), IndexFormat::U32);
    }

    #[test]
    fn test_valid_quad() {
        assert!(quad().validate().is_ok());
    }

    #[test]
    fn test_missing_layout() {
        let source = SourceGeometry::new(VertexLayout::default(), vec![], 4, IndexData::U16(vec![0]));
        assert!(matches!(source.validate(), Err(BatchError::MalformedSource(_))));
    }

    #[test]
    fn test_stream_size_mismatch() {
        let source = SourceGeometry::new(quad_layout(), vec![vec![0u8; 20 * 3]], 4, IndexData::U16(vec![0]));
        assert!(matches!(source.validate(), Err(BatchError::MalformedSource(_))));
    }

    #[test]
    fn test_index_out_of_range() {
        let source = SourceGeometry::new(quad_layout(), vec![vec![0u8; 80]], 4, IndexData::U16(vec![0, 1, 4]));
        assert!(matches!(source.validate(), Err(BatchError::MalformedSource(_))));
    }

    #[test]
    fn test_remap_without_blend_indices() {
        let source = quad().with_bone_remap(vec![0, 1]);
        assert!(matches!(source.validate(), Err(BatchError::MalformedSource(_))));
    }

    #[test]
    fn test_blend_index_beyond_remap() {
        let layout = VertexLayout::new(vec![
            VertexElement::new(VertexSemantic::Position, 0, 0, VertexFormat::Float3),
            VertexElement::new(VertexSemantic::BlendIndices, 0, 12, VertexFormat::UByte4),
        ]);
        let mut data = vec![0u8; 16];
        data[12] = 2; // only bones 0 and 1 exist
        let source = SourceGeometry::new(layout, vec![data], 1, IndexData::U16(vec![0])).with_bone_remap(vec![5, 6]);
        assert!(matches!(source.validate(), Err(BatchError::MalformedSource(_))));
    }
}
