use super::line_search::backtrack;
use super::{Evaluation, Objective, StepControl, StepResult};
use nalgebra::{DMatrix, DVector};
use tracing::trace;

/// One BFGS step on a dense inverse-Hessian approximation.
///
/// Backtracks along `direction`, updates `inverse_hessian` with the observed position
/// and gradient changes, and leaves `−H·g` at the new point in `direction`. The update is
/// skipped when the curvature `sᵀy` is not sufficiently positive, which keeps `H`
/// positive definite.
pub fn bfgs_step<O: Objective>(
    objective: &mut O,
    position: &DVector<f64>,
    start: &Evaluation,
    inverse_hessian: &mut DMatrix<f64>,
    direction: &mut DVector<f64>,
    control: &StepControl,
) -> Result<StepResult, O::Error> {
    let result = backtrack(objective, position, start, direction, control)?;

    let dx = &result.position - position;
    let dg = &result.evaluation.gradient - &start.gradient;
    update_inverse_hessian(inverse_hessian, &dx, &dg);

    *direction = -(&*inverse_hessian * &result.evaluation.gradient);
    Ok(result)
}

fn update_inverse_hessian(inverse_hessian: &mut DMatrix<f64>, dx: &DVector<f64>, dg: &DVector<f64>) {
    let curvature = dg.dot(dx);
    let threshold = (f64::EPSILON * dg.norm_squared() * dx.norm_squared()).sqrt();
    if !(curvature > threshold) {
        trace!(curvature, "Skipping inverse-Hessian update");
        return;
    }

    let hdg = &*inverse_hessian * dg;
    let fae = dg.dot(&hdg);
    let fac = 1.0 / curvature;
    let fad = 1.0 / fae;
    let u = dx * fac - &hdg * fad;

    inverse_hessian.ger(fac, dx, dx, 1.0);
    inverse_hessian.ger(-fad, &hdg, &hdg, 1.0);
    inverse_hessian.ger(fae, &u, &u, 1.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::minimize::testing::{Quadratic, Rosenbrock};
    use approx::assert_relative_eq;

    fn control() -> StepControl {
        StepControl {
            max_step: 100.0,
            tolerance: 1e-12,
            max_iterations: 100,
        }
    }

    #[test]
    fn update_satisfies_secant_condition() {
        let mut h = DMatrix::identity(3, 3);
        let dx = DVector::from_vec(vec![0.5, -0.2, 0.1]);
        let dg = DVector::from_vec(vec![1.0, -0.1, 0.4]);
        update_inverse_hessian(&mut h, &dx, &dg);
        assert_relative_eq!(&h * &dg, dx, epsilon = 1e-12);
        assert_relative_eq!(h.clone(), h.transpose(), epsilon = 1e-12);
    }

    #[test]
    fn update_is_skipped_for_negative_curvature() {
        let mut h = DMatrix::identity(2, 2);
        let dx = DVector::from_vec(vec![1.0, 0.0]);
        let dg = DVector::from_vec(vec![-1.0, 0.0]);
        update_inverse_hessian(&mut h, &dx, &dg);
        assert_eq!(h, DMatrix::identity(2, 2));
    }

    #[test]
    fn bfgs_converges_on_anisotropic_quadratic() {
        let mut q = Quadratic::new(&[1.0, 5.0, 20.0], &[1.0, -1.0, 0.5]);
        let mut position = DVector::zeros(3);
        let mut current = q.evaluate(&position).unwrap();
        let mut h = DMatrix::identity(3, 3);
        let mut direction = -&current.gradient;

        for _ in 0..30 {
            let result =
                bfgs_step(&mut q, &position, &current, &mut h, &mut direction, &control()).unwrap();
            assert!(result.evaluation.value <= current.value);
            position = result.position;
            current = result.evaluation;
        }

        assert_relative_eq!(
            position,
            DVector::from_vec(vec![1.0, -1.0, 0.5]),
            epsilon = 1e-6
        );
    }

    #[test]
    fn bfgs_descends_rosenbrock_valley() {
        let mut objective = Rosenbrock;
        let mut position = DVector::from_vec(vec![-1.2, 1.0]);
        let mut current = objective.evaluate(&position).unwrap();
        let mut h = DMatrix::identity(2, 2);
        let mut direction = -&current.gradient;

        for _ in 0..200 {
            let result = bfgs_step(
                &mut objective,
                &position,
                &current,
                &mut h,
                &mut direction,
                &control(),
            )
            .unwrap();
            position = result.position;
            current = result.evaluation;
        }

        assert_relative_eq!(position, DVector::from_vec(vec![1.0, 1.0]), epsilon = 1e-4);
    }
}
