use super::line_search::backtrack;
use super::{Evaluation, Objective, StepControl, StepResult};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// How the initial inverse Hessian `γ·I` of the two-loop recursion is scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialHessianScale {
    /// `γ = 1` throughout.
    Identity,
    /// `γ = sᵀy / yᵀy` from the first accepted pair, then kept.
    #[default]
    FirstStep,
    /// `γ = sᵀy / yᵀy` from the most recent accepted pair.
    EveryStep,
}

/// Fixed-depth ring of position and gradient changes.
///
/// Row `i` of each buffer holds the `i`-th oldest stored pair; once all `depth` rows are
/// in use the oldest pair is discarded on every push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LbfgsHistory {
    pub position_deltas: DMatrix<f64>,
    pub gradient_deltas: DMatrix<f64>,
    pub stored: usize,
    pub scale: f64,
}

impl LbfgsHistory {
    pub fn new(depth: usize, dimension: usize) -> Self {
        Self {
            position_deltas: DMatrix::zeros(depth, dimension),
            gradient_deltas: DMatrix::zeros(depth, dimension),
            stored: 0,
            scale: 1.0,
        }
    }

    pub fn depth(&self) -> usize {
        self.position_deltas.nrows()
    }

    pub fn dimension(&self) -> usize {
        self.position_deltas.ncols()
    }

    /// Stores a pair, returning `false` when it carries no positive curvature.
    pub fn push(&mut self, s: &DVector<f64>, y: &DVector<f64>, scaling: InitialHessianScale) -> bool {
        let curvature = s.dot(y);
        let depth = self.depth();
        if !(curvature > 0.0) || depth == 0 {
            return false;
        }

        let first = self.stored == 0;
        let slot = if self.stored < depth {
            self.stored += 1;
            self.stored - 1
        } else {
            for i in 1..depth {
                let s_row = self.position_deltas.row(i).into_owned();
                let y_row = self.gradient_deltas.row(i).into_owned();
                self.position_deltas.set_row(i - 1, &s_row);
                self.gradient_deltas.set_row(i - 1, &y_row);
            }
            depth - 1
        };
        self.position_deltas.set_row(slot, &s.transpose());
        self.gradient_deltas.set_row(slot, &y.transpose());

        match scaling {
            InitialHessianScale::Identity => {}
            InitialHessianScale::FirstStep if !first => {}
            _ => self.scale = curvature / y.norm_squared(),
        }
        true
    }

    /// Search direction `−H·g` by the two-loop recursion over the stored pairs.
    pub fn direction(&self, gradient: &DVector<f64>) -> DVector<f64> {
        let pairs: Vec<(DVector<f64>, DVector<f64>)> = (0..self.stored)
            .map(|i| {
                (
                    self.position_deltas.row(i).transpose(),
                    self.gradient_deltas.row(i).transpose(),
                )
            })
            .collect();

        let mut q = gradient.clone();
        let mut alphas = vec![0.0; pairs.len()];
        for (i, (s, y)) in pairs.iter().enumerate().rev() {
            let alpha = s.dot(&q) / y.dot(s);
            q.axpy(-alpha, y, 1.0);
            alphas[i] = alpha;
        }

        let mut r = q * self.scale;
        for ((s, y), alpha) in pairs.iter().zip(&alphas) {
            let beta = y.dot(&r) / y.dot(s);
            r.axpy(alpha - beta, s, 1.0);
        }
        -r
    }
}

/// One L-BFGS step: backtrack along `direction`, record the pair, and leave the next
/// two-loop direction in `direction`.
pub fn lbfgs_step<O: Objective>(
    objective: &mut O,
    position: &DVector<f64>,
    start: &Evaluation,
    history: &mut LbfgsHistory,
    scaling: InitialHessianScale,
    direction: &mut DVector<f64>,
    control: &StepControl,
) -> Result<StepResult, O::Error> {
    let result = backtrack(objective, position, start, direction, control)?;

    let s = &result.position - position;
    let y = &result.evaluation.gradient - &start.gradient;
    if !history.push(&s, &y, scaling) {
        trace!(stored = history.stored, "Skipping L-BFGS pair without positive curvature");
    }

    *direction = history.direction(&result.evaluation.gradient);
    Ok(result)
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

    fn vector(values: &[f64]) -> DVector<f64> {
        DVector::from_row_slice(values)
    }

    #[test]
    fn push_discards_oldest_pair_when_full() {
        let mut history = LbfgsHistory::new(2, 2);
        let scaling = InitialHessianScale::Identity;
        assert!(history.push(&vector(&[1.0, 0.0]), &vector(&[1.0, 0.0]), scaling));
        assert!(history.push(&vector(&[0.0, 1.0]), &vector(&[0.0, 2.0]), scaling));
        assert!(history.push(&vector(&[1.0, 1.0]), &vector(&[3.0, 3.0]), scaling));

        assert_eq!(history.stored, 2);
        assert_eq!(history.position_deltas.row(0)[1], 1.0);
        assert_eq!(history.gradient_deltas.row(1)[0], 3.0);
    }

    #[test]
    fn push_rejects_pair_without_positive_curvature() {
        let mut history = LbfgsHistory::new(3, 2);
        assert!(!history.push(
            &vector(&[1.0, 0.0]),
            &vector(&[-1.0, 0.0]),
            InitialHessianScale::EveryStep
        ));
        assert_eq!(history.stored, 0);
        assert_eq!(history.scale, 1.0);
    }

    #[test]
    fn first_step_scaling_is_kept_after_later_pairs() {
        let mut history = LbfgsHistory::new(3, 1);
        history.push(&vector(&[1.0]), &vector(&[2.0]), InitialHessianScale::FirstStep);
        history.push(&vector(&[1.0]), &vector(&[4.0]), InitialHessianScale::FirstStep);
        assert_relative_eq!(history.scale, 0.5);

        let mut every = LbfgsHistory::new(3, 1);
        every.push(&vector(&[1.0]), &vector(&[2.0]), InitialHessianScale::EveryStep);
        every.push(&vector(&[1.0]), &vector(&[4.0]), InitialHessianScale::EveryStep);
        assert_relative_eq!(every.scale, 0.25);
    }

    #[test]
    fn empty_history_gives_scaled_steepest_descent() {
        let history = LbfgsHistory::new(4, 2);
        assert_eq!(history.direction(&vector(&[2.0, -1.0])), vector(&[-2.0, 1.0]));
    }

    #[test]
    fn two_loop_recovers_newton_step_for_one_dimensional_quadratic() {
        let mut history = LbfgsHistory::new(1, 1);
        history.push(&vector(&[0.5]), &vector(&[2.0]), InitialHessianScale::Identity);
        assert_relative_eq!(history.direction(&vector(&[8.0]))[0], -2.0, epsilon = 1e-12);
    }

    #[test]
    fn lbfgs_converges_on_quadratic_for_every_scaling() {
        for scaling in [
            InitialHessianScale::Identity,
            InitialHessianScale::FirstStep,
            InitialHessianScale::EveryStep,
        ] {
            let mut q = Quadratic::new(&[1.0, 4.0, 9.0, 16.0], &[1.0, 2.0, 3.0, 4.0]);
            let mut position = DVector::zeros(4);
            let mut current = q.evaluate(&position).unwrap();
            let mut history = LbfgsHistory::new(3, 4);
            let mut direction = -&current.gradient;

            for _ in 0..60 {
                let result = lbfgs_step(
                    &mut q,
                    &position,
                    &current,
                    &mut history,
                    scaling,
                    &mut direction,
                    &control(),
                )
                .unwrap();
                assert!(result.evaluation.value <= current.value);
                position = result.position;
                current = result.evaluation;
            }

            assert_relative_eq!(position, vector(&[1.0, 2.0, 3.0, 4.0]), epsilon = 1e-6);
        }
    }

    #[test]
    fn lbfgs_descends_rosenbrock_valley() {
        let mut objective = Rosenbrock;
        let mut position = vector(&[-1.2, 1.0]);
        let mut current = objective.evaluate(&position).unwrap();
        let mut history = LbfgsHistory::new(5, 2);
        let mut direction = -&current.gradient;

        for _ in 0..300 {
            let result = lbfgs_step(
                &mut objective,
                &position,
                &current,
                &mut history,
                InitialHessianScale::EveryStep,
                &mut direction,
                &control(),
            )
            .unwrap();
            position = result.position;
            current = result.evaluation;
        }

        assert_relative_eq!(position, vector(&[1.0, 1.0]), epsilon = 1e-4);
    }
}
