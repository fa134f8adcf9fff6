//! # Minimization Library
//!
//! Single-step routines over flat coordinate vectors. Each routine takes the current
//! position, an [`Objective`] and the evaluation already taken at that position, moves
//! to a new point and updates the algorithm-specific state handed to it.
//!
//! - [`line_search`] - Bracketing with Brent refinement, and Armijo backtracking
//! - [`descent`] - Steepest descent and Polak–Ribière conjugate gradient
//! - [`bfgs`] - Dense inverse-Hessian quasi-Newton
//! - [`lbfgs`] - Limited-memory quasi-Newton with a fixed-depth history
//! - [`trm`] - Trust-region steps on a dense BFGS Hessian model
//!
//! Every routine returns the final point together with its evaluation, so callers never
//! have to re-evaluate the point they end up on.

pub mod bfgs;
pub mod descent;
pub mod lbfgs;
pub mod line_search;
pub mod trm;

use nalgebra::DVector;

/// Value and gradient of an objective at one point.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub value: f64,
    pub gradient: DVector<f64>,
}

impl Evaluation {
    pub fn new(value: f64, gradient: DVector<f64>) -> Self {
        Self { value, gradient }
    }
}

/// A differentiable scalar function of a flat coordinate vector.
pub trait Objective {
    type Error;

    fn evaluate(&mut self, x: &DVector<f64>) -> Result<Evaluation, Self::Error>;
}

impl<T: Objective + ?Sized> Objective for &mut T {
    type Error = T::Error;

    fn evaluate(&mut self, x: &DVector<f64>) -> Result<Evaluation, Self::Error> {
        (**self).evaluate(x)
    }
}

/// Limits shared by every step routine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepControl {
    /// Largest Euclidean length of a single move.
    pub max_step: f64,
    /// Resolution below which a step is considered to have vanished.
    pub tolerance: f64,
    pub max_iterations: usize,
}

/// Result of one step: the point reached and the evaluation taken there.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub position: DVector<f64>,
    pub evaluation: Evaluation,
}

impl StepResult {
    pub fn new(position: DVector<f64>, evaluation: Evaluation) -> Self {
        Self {
            position,
            evaluation,
        }
    }

    /// The step that did not move.
    pub(crate) fn stay(position: &DVector<f64>, evaluation: &Evaluation) -> Self {
        Self::new(position.clone(), evaluation.clone())
    }
}

/// Scales `v` to unit length, or returns zeros when it has none.
pub fn normalized(v: &DVector<f64>) -> DVector<f64> {
    let norm = v.norm();
    if norm > 0.0 {
        v / norm
    } else {
        DVector::zeros(v.len())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{Evaluation, Objective};
    use nalgebra::DVector;
    use std::convert::Infallible;

    /// `½ Σ cᵢ (xᵢ − mᵢ)²` with a call counter.
    pub struct Quadratic {
        pub curvature: DVector<f64>,
        pub minimum: DVector<f64>,
        pub calls: usize,
    }

    impl Quadratic {
        pub fn new(curvature: &[f64], minimum: &[f64]) -> Self {
            Self {
                curvature: DVector::from_row_slice(curvature),
                minimum: DVector::from_row_slice(minimum),
                calls: 0,
            }
        }
    }

    impl Objective for Quadratic {
        type Error = Infallible;

        fn evaluate(&mut self, x: &DVector<f64>) -> Result<Evaluation, Infallible> {
            self.calls += 1;
            let offset = x - &self.minimum;
            let gradient = self.curvature.component_mul(&offset);
            Ok(Evaluation::new(0.5 * offset.dot(&gradient), gradient))
        }
    }

    /// Rosenbrock valley `(1 − x)² + 100 (y − x²)²`.
    pub struct Rosenbrock;

    impl Objective for Rosenbrock {
        type Error = Infallible;

        fn evaluate(&mut self, p: &DVector<f64>) -> Result<Evaluation, Infallible> {
            let (x, y) = (p[0], p[1]);
            let value = (1.0 - x).powi(2) + 100.0 * (y - x * x).powi(2);
            let gradient = DVector::from_vec(vec![
                -2.0 * (1.0 - x) - 400.0 * x * (y - x * x),
                200.0 * (y - x * x),
            ]);
            Ok(Evaluation::new(value, gradient))
        }
    }
}
