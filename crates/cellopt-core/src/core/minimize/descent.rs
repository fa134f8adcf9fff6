use super::line_search::line_minimize;
use super::{Evaluation, Objective, StepControl, StepResult, normalized};
use nalgebra::DVector;
use tracing::trace;

/// Trial step handed to the line minimizer, adapted from one step to the next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveStep {
    pub current: f64,
    /// Factor applied to the last accepted step length; zero keeps `current` fixed.
    pub factor: f64,
}

impl AdaptiveStep {
    fn update(&mut self, travelled: f64) {
        if self.factor > 0.0 && travelled != 0.0 {
            self.current = travelled.abs() * self.factor;
        }
    }
}

/// One steepest-descent step: a line minimization along the current force.
///
/// `direction` is overwritten with the unit force so that callers can persist it.
pub fn steepest_descent_step<O: Objective>(
    objective: &mut O,
    position: &DVector<f64>,
    start: &Evaluation,
    direction: &mut DVector<f64>,
    step: &mut AdaptiveStep,
    control: &StepControl,
) -> Result<StepResult, O::Error> {
    *direction = normalized(&-&start.gradient);
    minimize_along(objective, position, start, direction, step, control)
}

/// One Polak–Ribière conjugate-gradient step.
///
/// `direction` holds the previous conjugate direction on entry and the new one on exit.
/// Without a usable `previous_force` the direction restarts from the current force.
/// The β coefficient is clipped at zero, which restarts the recurrence whenever the
/// forces stop being conjugate.
pub fn conjugate_gradient_step<O: Objective>(
    objective: &mut O,
    position: &DVector<f64>,
    start: &Evaluation,
    previous_force: Option<&DVector<f64>>,
    direction: &mut DVector<f64>,
    step: &mut AdaptiveStep,
    control: &StepControl,
) -> Result<StepResult, O::Error> {
    let force = -&start.gradient;
    *direction = match previous_force {
        Some(previous) if previous.norm_squared() > 0.0 && direction.len() == force.len() => {
            let beta = ((&force - previous).dot(&force) / previous.norm_squared()).max(0.0);
            trace!(beta, "Polak-Ribiere coefficient");
            &force + &*direction * beta
        }
        _ => force,
    };
    minimize_along(objective, position, start, direction, step, control)
}

fn minimize_along<O: Objective>(
    objective: &mut O,
    position: &DVector<f64>,
    start: &Evaluation,
    direction: &DVector<f64>,
    step: &mut AdaptiveStep,
    control: &StepControl,
) -> Result<StepResult, O::Error> {
    let unit = normalized(direction);
    if unit.norm_squared() == 0.0 {
        return Ok(StepResult::stay(position, start));
    }
    let found = line_minimize(objective, position, &unit, start, step.current, control)?;
    step.update(found.step);
    Ok(StepResult::new(found.position, found.evaluation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::minimize::testing::{Quadratic, Rosenbrock};
    use approx::assert_relative_eq;

    fn control() -> StepControl {
        StepControl {
            max_step: 100.0,
            tolerance: 1e-10,
            max_iterations: 100,
        }
    }

    #[test]
    fn steepest_descent_reaches_isotropic_minimum_in_one_step() {
        let mut q = Quadratic::new(&[1.0, 1.0, 1.0], &[0.0, 0.0, 0.0]);
        let position = DVector::from_vec(vec![1.0, 0.0, 0.0]);
        let start = q.evaluate(&position).unwrap();
        let mut direction = DVector::zeros(3);
        let mut step = AdaptiveStep {
            current: 1e-3,
            factor: 1.0,
        };

        let result =
            steepest_descent_step(&mut q, &position, &start, &mut direction, &mut step, &control())
                .unwrap();

        assert_relative_eq!(result.position.norm(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(direction, DVector::from_vec(vec![-1.0, 0.0, 0.0]));
        assert_relative_eq!(step.current, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn adaptive_step_stays_fixed_without_factor() {
        let mut q = Quadratic::new(&[1.0], &[2.0]);
        let position = DVector::zeros(1);
        let start = q.evaluate(&position).unwrap();
        let mut direction = DVector::zeros(1);
        let mut step = AdaptiveStep {
            current: 0.1,
            factor: 0.0,
        };

        steepest_descent_step(&mut q, &position, &start, &mut direction, &mut step, &control())
            .unwrap();

        assert_eq!(step.current, 0.1);
    }

    #[test]
    fn steepest_descent_stays_put_without_force() {
        let mut q = Quadratic::new(&[1.0], &[0.0]);
        let position = DVector::zeros(1);
        let start = q.evaluate(&position).unwrap();
        let mut direction = DVector::zeros(1);
        let mut step = AdaptiveStep {
            current: 0.1,
            factor: 1.0,
        };

        let result =
            steepest_descent_step(&mut q, &position, &start, &mut direction, &mut step, &control())
                .unwrap();

        assert_eq!(result.position, position);
        assert_eq!(q.calls, 1);
    }

    #[test]
    fn conjugate_gradient_solves_two_dimensional_quadratic_in_two_steps() {
        let mut q = Quadratic::new(&[1.0, 10.0], &[1.0, 2.0]);
        let mut position = DVector::zeros(2);
        let mut current = q.evaluate(&position).unwrap();
        let mut direction = DVector::zeros(2);
        let mut previous_force: Option<DVector<f64>> = None;
        let mut step = AdaptiveStep {
            current: 1e-3,
            factor: 1.0,
        };

        for _ in 0..2 {
            let force = -&current.gradient;
            let result = conjugate_gradient_step(
                &mut q,
                &position,
                &current,
                previous_force.as_ref(),
                &mut direction,
                &mut step,
                &control(),
            )
            .unwrap();
            previous_force = Some(force);
            position = result.position;
            current = result.evaluation;
        }

        assert_relative_eq!(position, DVector::from_vec(vec![1.0, 2.0]), epsilon = 1e-5);
    }

    #[test]
    fn conjugate_gradient_lowers_rosenbrock_every_step() {
        let mut objective = Rosenbrock;
        let mut position = DVector::from_vec(vec![-1.2, 1.0]);
        let mut current = objective.evaluate(&position).unwrap();
        let initial = current.value;
        let mut direction = DVector::zeros(2);
        let mut previous_force: Option<DVector<f64>> = None;
        let mut step = AdaptiveStep {
            current: 1e-2,
            factor: 1.0,
        };

        for _ in 0..50 {
            let force = -&current.gradient;
            let result = conjugate_gradient_step(
                &mut objective,
                &position,
                &current,
                previous_force.as_ref(),
                &mut direction,
                &mut step,
                &control(),
            )
            .unwrap();
            assert!(result.evaluation.value <= current.value);
            previous_force = Some(force);
            position = result.position;
            current = result.evaluation;
        }

        assert!(current.value < 1e-2 * initial);
    }
}
