//! Shader reflection data consumed from the material side.

use std::collections::HashMap;

/// Type of a shader constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstantType {
    /// `float`
    Float1,
    /// `vec2`
    Float2,
    /// `vec3`
    Float3,
    /// `vec4`
    Float4,
    /// `int`
    Int1,
    /// `ivec4`
    Int4,
    /// `mat3`
    Matrix3x3,
    /// `mat3x4` (3 rows, 4 columns)
    Matrix3x4,
    /// `mat4`
    Matrix4x4,
    /// `dmat3x4`
    DoubleMatrix3x4,
    /// `dmat4`
    DoubleMatrix4x4,
    /// Texture sampler
    Sampler,
}

impl ConstantType {
    /// Returns true for single-precision float types.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(
            self,
            Self::Float1 | Self::Float2 | Self::Float3 | Self::Float4 | Self::Matrix3x3 | Self::Matrix3x4 | Self::Matrix4x4
        )
    }
}

/// Engine value a constant is automatically bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AutoBinding {
    /// Single world matrix.
    WorldMatrix,
    /// Array of 3x4 world matrices, one per instance (or per instance bone).
    WorldMatrixArray3x4,
    /// Array of 4x4 world matrices.
    WorldMatrixArray,
    /// Combined view-projection matrix.
    ViewProjMatrix,
    /// Elapsed time.
    Time,
}

/// One uniform/constant declared by a compiled vertex program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstantDefinition {
    /// Declared name.
    pub name: String,
    /// Declared type.
    pub constant_type: ConstantType,
    /// Array length, 1 for non-arrays.
    pub array_size: usize,
    /// Auto binding, if any.
    pub auto_binding: Option<AutoBinding>,
}

impl ConstantDefinition {
    /// Creates an unbound constant.
    #[must_use]
    pub fn new(name: impl Into<String>, constant_type: ConstantType, array_size: usize) -> Self {
        Self {
            name: name.into(),
            constant_type,
            array_size,
            auto_binding: None,
        }
    }

    /// Binds the constant to an engine value.
    #[must_use]
    pub fn bound_to(mut self, binding: AutoBinding) -> Self {
        self.auto_binding = Some(binding);
        self
    }

    /// Returns true if this is the float 3x4 world-matrix array instancing relies on.
    #[must_use]
    pub fn is_world_matrix_array(&self) -> bool {
        self.constant_type == ConstantType::Matrix3x4 && self.auto_binding == Some(AutoBinding::WorldMatrixArray3x4)
    }
}

/// Source of compiled vertex-program reflection per material.
pub trait MaterialCatalog {
    /// Constants of the vertex program the material renders with, or None if
    /// the material has no usable technique.
    fn vertex_constants(&self, material: &str) -> Option<&[ConstantDefinition]>;
}

/// Catalog backed by a map, for tools and tests.
#[derive(Debug, Default)]
pub struct InMemoryMaterialCatalog {
    materials: HashMap<String, Vec<ConstantDefinition>>,
}

impl InMemoryMaterialCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a material's vertex constants.
    pub fn insert(&mut self, material: impl Into<String>, constants: Vec<ConstantDefinition>) {
        self.materials.insert(material.into(), constants);
    }
}

impl MaterialCatalog for InMemoryMaterialCatalog {
    fn vertex_constants(&self, material: &str) -> Option<&[ConstantDefinition]> {
        self.materials.get(material).map(Vec::as_slice)
    }
}
