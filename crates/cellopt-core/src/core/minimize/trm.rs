use super::{Evaluation, Objective, StepControl, StepResult};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, trace};

/// Smallest ratio of actual to predicted decrease for which a trial step is taken.
const ACCEPTANCE_RATIO: f64 = 1e-4;
const SHRINK_BELOW: f64 = 0.25;
const EXPAND_ABOVE: f64 = 0.75;
const BISECTION_LIMIT: usize = 200;

/// One trust-region step on the quadratic model built from `hessian`.
///
/// Trial steps solve the trust-region subproblem exactly in the Hessian eigenbasis. Each
/// trial adjusts `trust_radius` by the ratio of actual to predicted decrease: shrink to a
/// quarter of the step when the model is poor, double (capped at `control.max_step`) when
/// it is good and the step reached the boundary. The first acceptable trial is returned
/// after a BFGS update of `hessian`. If the radius falls below `control.tolerance` or
/// `control.max_iterations` trials are rejected, the start point is returned.
pub fn trm_step<O: Objective>(
    objective: &mut O,
    position: &DVector<f64>,
    start: &Evaluation,
    hessian: &mut DMatrix<f64>,
    trust_radius: &mut f64,
    control: &StepControl,
) -> Result<StepResult, O::Error> {
    for _ in 0..control.max_iterations {
        if *trust_radius < control.tolerance {
            debug!(radius = *trust_radius, "Trust radius collapsed");
            break;
        }

        let step = solve_subproblem(hessian, &start.gradient, *trust_radius);
        let predicted = start.gradient.dot(&step) + 0.5 * step.dot(&(&*hessian * &step));
        if !(predicted < 0.0) {
            trace!(predicted, "Quadratic model predicts no decrease");
            break;
        }

        let trial = position + &step;
        let evaluation = objective.evaluate(&trial)?;
        let ratio = (evaluation.value - start.value) / predicted;
        let length = step.norm();
        if ratio.is_nan() || ratio < SHRINK_BELOW {
            *trust_radius = SHRINK_BELOW * length;
        } else if ratio > EXPAND_ABOVE && length > 0.8 * *trust_radius {
            *trust_radius = (2.0 * *trust_radius).min(control.max_step);
        }
        trace!(ratio, radius = *trust_radius, "Trust-region trial");

        if ratio > ACCEPTANCE_RATIO {
            let y = &evaluation.gradient - &start.gradient;
            update_hessian(hessian, &step, &y);
            return Ok(StepResult::new(trial, evaluation));
        }
    }
    Ok(StepResult::stay(position, start))
}

/// Minimizes `gᵀs + ½ sᵀHs` subject to `|s| ≤ radius`.
fn solve_subproblem(hessian: &DMatrix<f64>, gradient: &DVector<f64>, radius: f64) -> DVector<f64> {
    let eigen = hessian.clone().symmetric_eigen();
    let basis = &eigen.eigenvectors;
    let values = &eigen.eigenvalues;
    let g = basis.transpose() * gradient;
    let lowest = values.min();

    let shifted = |mu: f64| {
        DVector::from_iterator(
            g.len(),
            g.iter().zip(values.iter()).map(|(gi, li)| -gi / (li + mu)),
        )
    };

    if lowest > 0.0 {
        let newton = shifted(0.0);
        if newton.norm() <= radius {
            return basis * newton;
        }
    }

    let g_norm = g.norm();
    let floor = (-lowest).max(0.0);

    if lowest <= 0.0 {
        let scale = values.amax().max(1.0);
        let degenerate = |li: f64| (li - lowest).abs() <= 1e-10 * scale;
        let orthogonal = g
            .iter()
            .zip(values.iter())
            .all(|(gi, li)| !degenerate(*li) || gi.abs() <= 1e-10 * g_norm);
        if orthogonal {
            let partial = DVector::from_iterator(
                g.len(),
                g.iter().zip(values.iter()).map(|(gi, li)| {
                    if degenerate(*li) {
                        0.0
                    } else {
                        -gi / (li + floor)
                    }
                }),
            );
            let remaining = radius * radius - partial.norm_squared();
            if remaining >= 0.0 {
                trace!("Trust-region hard case");
                let lowest_index = values.imin();
                let mut step = partial;
                step[lowest_index] += remaining.sqrt();
                return basis * step;
            }
        }
    }

    let (mut lo, mut hi) = (floor, floor + g_norm / radius);
    for _ in 0..BISECTION_LIMIT {
        let mu = 0.5 * (lo + hi);
        if mu <= lo || mu >= hi {
            break;
        }
        if shifted(mu).norm() > radius {
            lo = mu;
        } else {
            hi = mu;
        }
    }
    basis * shifted(hi)
}

fn update_hessian(hessian: &mut DMatrix<f64>, s: &DVector<f64>, y: &DVector<f64>) {
    let curvature = y.dot(s);
    let hs = &*hessian * s;
    let shs = s.dot(&hs);
    let threshold = (f64::EPSILON * y.norm_squared() * s.norm_squared()).sqrt();
    if !(curvature > threshold) || !(shs > 0.0) {
        trace!(curvature, "Skipping Hessian update");
        return;
    }
    hessian.ger(1.0 / curvature, y, y, 1.0);
    hessian.ger(-1.0 / shs, &hs, &hs, 1.0);
}
