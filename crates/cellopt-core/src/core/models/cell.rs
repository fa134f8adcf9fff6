use crate::core::geometry;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Determinants below this magnitude are treated as a collapsed cell.
pub const DEGENERATE_VOLUME: f64 = 1e-12;

/// A periodic simulation box.
///
/// The lattice vectors are the columns of `h`. A deformed cell keeps whatever
/// orientation the strain gives it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    h: Matrix3<f64>,
}

impl Cell {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    /// A cubic box of edge length `a`.
    pub fn cubic(a: f64) -> Self {
        Self::new(Matrix3::identity() * a)
    }

    /// An orthorhombic box with the given edge lengths.
    pub fn orthorhombic(a: f64, b: f64, c: f64) -> Self {
        Self::new(Matrix3::from_diagonal(&Vector3::new(a, b, c)))
    }

    #[inline]
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.h
    }

    pub fn volume(&self) -> f64 {
        self.h.determinant().abs()
    }

    /// Inverse lattice matrix, or `None` for a collapsed cell.
    pub fn inverse(&self) -> Option<Matrix3<f64>> {
        if self.is_degenerate() {
            return None;
        }
        self.h.try_inverse()
    }

    pub fn is_degenerate(&self) -> bool {
        self.volume() < DEGENERATE_VOLUME
    }

    /// Lengths of the three lattice vectors, read from the metric tensor.
    pub fn lengths(&self) -> Vector3<f64> {
        let g = geometry::metric(&self.h);
        Vector3::new(g[(0, 0)].sqrt(), g[(1, 1)].sqrt(), g[(2, 2)].sqrt())
    }

    pub fn to_absolute(&self, fractional: &Vector3<f64>) -> Vector3<f64> {
        self.h * fractional
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cubic_cell_has_expected_volume_and_lengths() {
        let cell = Cell::cubic(3.0);
        assert_relative_eq!(cell.volume(), 27.0);
        assert_relative_eq!(cell.lengths(), Vector3::new(3.0, 3.0, 3.0));
    }

    #[test]
    fn lengths_account_for_tilted_lattice_vectors() {
        let cell = Cell::new(Matrix3::new(3.0, 4.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0));
        assert_relative_eq!(cell.lengths()[1], 4.0);
        assert!(cell.is_degenerate());
        assert!(cell.inverse().is_none());
    }

    #[test]
    fn absolute_position_combines_lattice_vectors() {
        let cell = Cell::new(Matrix3::new(4.0, 1.0, 0.5, 0.0, 5.0, 0.5, 0.0, 0.0, 6.0));
        let absolute = cell.to_absolute(&Vector3::new(0.5, 0.2, 1.0));
        assert_relative_eq!(absolute, Vector3::new(2.7, 1.5, 6.0), epsilon = 1e-12);
    }

    #[test]
    fn volume_is_positive_for_left_handed_cell() {
        let cell = Cell::orthorhombic(-2.0, 3.0, 4.0);
        assert_relative_eq!(cell.volume(), 24.0);
    }
}
