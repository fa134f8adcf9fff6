use nalgebra::{Matrix3, SVector};

/// A 3×3 tensor flattened row-major into nine components.
pub type CellVector = SVector<f64, 9>;

/// Flattens a 3×3 matrix row-major (`[xx, xy, xz, yx, ...]`).
pub fn flatten(tensor: &Matrix3<f64>) -> CellVector {
    CellVector::from_iterator(tensor.transpose().iter().copied())
}

/// Inverse of [`flatten`].
pub fn unflatten(components: &CellVector) -> Matrix3<f64> {
    Matrix3::from_row_slice(components.as_slice())
}

/// Strain of `current` relative to `reference`: `current · reference⁻¹ − I`, flattened.
///
/// Returns `None` when the reference lattice is singular.
pub fn strain(current: &Matrix3<f64>, reference: &Matrix3<f64>) -> Option<CellVector> {
    reference
        .try_inverse()
        .map(|reference_inverse| strain_with_inverse(current, &reference_inverse))
}

/// Same as [`strain`] with the reference inverse already at hand.
pub fn strain_with_inverse(
    current: &Matrix3<f64>,
    reference_inverse: &Matrix3<f64>,
) -> CellVector {
    flatten(&(current * reference_inverse - Matrix3::identity()))
}

/// Metric tensor `hᵀ·h`; its diagonal holds the squared lattice vector lengths.
pub fn metric(current: &Matrix3<f64>) -> Matrix3<f64> {
    current.transpose() * current
}

/// Gradient of `U + p·V` with respect to the nine strain components.
///
/// With the deformation `F = I + ε`, a virial `W` (so that `W = −∂U/∂δ` for a homogeneous
/// deformation `δ` of the current configuration) and `∂V/∂F = V·F⁻ᵀ`, the derivative is
/// `−(W − p·V·I)·F⁻ᵀ`. Returns `None` when `F` is singular.
pub fn stress_to_cell_gradient(
    virial: &Matrix3<f64>,
    external_pressure: f64,
    volume: f64,
    strain: &CellVector,
) -> Option<CellVector> {
    let deformation = Matrix3::identity() + unflatten(strain);
    let inverse_transpose = deformation.try_inverse()?.transpose();
    let stress = virial - Matrix3::identity() * (external_pressure * volume);
    Some(flatten(&(-stress * inverse_transpose)))
}

/// Packs a symmetric tensor as `[xx, yy, zz, xy, xz, yz]`.
pub fn tensor_to_voigt(tensor: &Matrix3<f64>) -> [f64; 6] {
    [
        tensor[(0, 0)],
        tensor[(1, 1)],
        tensor[(2, 2)],
        tensor[(0, 1)],
        tensor[(0, 2)],
        tensor[(1, 2)],
    ]
}

/// Rebuilds the symmetric tensor packed by [`tensor_to_voigt`].
pub fn voigt_to_tensor(voigt: &[f64; 6]) -> Matrix3<f64> {
    let [xx, yy, zz, xy, xz, yz] = *voigt;
    Matrix3::new(xx, xy, xz, xy, yy, yz, xz, yz, zz)
}
