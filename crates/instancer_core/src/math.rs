//! Affine transforms in the layout consumed by the vertex stage.
//!
//! The world-matrix array is declared as an array of 3x4 matrices in the
//! shader: three rows of four floats, the implicit fourth row being
//! `[0, 0, 0, 1]`.

use std::ops::Mul;

use bytemuck::{Pod, Zeroable};

/// Row-major 3x4 affine matrix.
///
/// Columns 0..3 hold the linear part, column 3 holds the translation.
/// Size is 48 bytes with 4-byte alignment, matching one element of a
/// `float3x4`/`mat3x4` uniform array.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Matrix3x4 {
    /// The three rows.
    pub rows: [[f32; 4]; 3],
}

impl Matrix3x4 {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// All zeros. Collapses every vertex it touches onto the origin.
    pub const ZERO: Self = Self { rows: [[0.0; 4]; 3] };

    /// Identity transform.
    pub const IDENTITY: Self = Self {
        rows: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ],
    };

    /// Creates a matrix from its rows.
    #[must_use]
    pub const fn from_rows(rows: [[f32; 4]; 3]) -> Self {
        Self { rows }
    }

    /// Pure translation.
    #[must_use]
    pub const fn from_translation(x: f32, y: f32, z: f32) -> Self {
        Self {
            rows: [
                [1.0, 0.0, 0.0, x],
                [0.0, 1.0, 0.0, y],
                [0.0, 0.0, 1.0, z],
            ],
        }
    }

    /// Non-uniform scale.
    #[must_use]
    pub const fn from_scale(x: f32, y: f32, z: f32) -> Self {
        Self {
            rows: [
                [x, 0.0, 0.0, 0.0],
                [0.0, y, 0.0, 0.0],
                [0.0, 0.0, z, 0.0],
            ],
        }
    }

    /// Returns the translation column.
    #[must_use]
    pub const fn translation(&self) -> [f32; 3] {
        [self.rows[0][3], self.rows[1][3], self.rows[2][3]]
    }

    /// Transforms a point (w = 1).
    #[must_use]
    pub fn transform_point(&self, p: [f32; 3]) -> [f32; 3] {
        let row = |r: &[f32; 4]| r[0] * p[0] + r[1] * p[1] + r[2] * p[2] + r[3];
        [row(&self.rows[0]), row(&self.rows[1]), row(&self.rows[2])]
    }

    /// Returns true if every element is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.rows.iter().flatten().all(|v| *v == 0.0)
    }
}

impl Mul for Matrix3x4 {
    type Output = Self;

    /// Affine composition: `(a * b).transform_point(p) == a.transform_point(b.transform_point(p))`.
    fn mul(self, rhs: Self) -> Self {
        let mut out = Self::ZERO;
        for (i, row) in self.rows.iter().enumerate() {
            for j in 0..4 {
                let mut v = row[0] * rhs.rows[0][j] + row[1] * rhs.rows[1][j] + row[2] * rhs.rows[2][j];
                if j == 3 {
                    v += row[3];
                }
                out.rows[i][j] = v;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_size() {
        // 3 rows * 4 floats * 4 bytes
        assert_eq!(Matrix3x4::SIZE, 48);
        assert_eq!(std::mem::align_of::<Matrix3x4>(), 4);
    }

    #[test]
    fn test_identity_is_neutral() {
        let m = Matrix3x4::from_translation(1.0, 2.0, 3.0);
        assert_eq!(Matrix3x4::IDENTITY * m, m);
        assert_eq!(m * Matrix3x4::IDENTITY, m);
    }

    #[test]
    fn test_composition_order() {
        let t = Matrix3x4::from_translation(10.0, 0.0, 0.0);
        let s = Matrix3x4::from_scale(2.0, 2.0, 2.0);

        // Scale first, then translate
        assert_eq!((t * s).transform_point([1.0, 1.0, 1.0]), [12.0, 2.0, 2.0]);
        // Translate first, then scale
        assert_eq!((s * t).transform_point([1.0, 1.0, 1.0]), [22.0, 2.0, 2.0]);
    }

    #[test]
    fn test_zero_matrix() {
        assert!(Matrix3x4::ZERO.is_zero());
        assert!(!Matrix3x4::IDENTITY.is_zero());
        assert_eq!(Matrix3x4::default(), Matrix3x4::ZERO);
    }

    #[test]
    fn test_cast_to_bytes() {
        let transforms = [Matrix3x4::IDENTITY; 2];
        let bytes: &[u8] = bytemuck::cast_slice(&transforms);
        assert_eq!(bytes.len(), 96);
    }
}
