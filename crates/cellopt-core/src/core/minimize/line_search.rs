use super::{Evaluation, Objective, StepControl, StepResult};
use nalgebra::DVector;
use tracing::trace;

const GOLDEN_RATIO: f64 = 1.618_034;
const GOLDEN_SECTION: f64 = 0.381_966_0;
const ZEPS: f64 = 1.0e-10;
/// Sufficient-decrease constant of the Armijo condition.
const ARMIJO: f64 = 1.0e-4;

/// The lowest point found along a line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineMinimum {
    /// Signed distance travelled along the unit direction.
    pub step: f64,
    pub position: DVector<f64>,
    pub evaluation: Evaluation,
}

/// Evaluates points along `origin + t·direction`, remembering the lowest one.
struct LineProbe<'a, O: Objective> {
    objective: &'a mut O,
    origin: &'a DVector<f64>,
    direction: &'a DVector<f64>,
    max_step: f64,
    best_step: f64,
    best: Evaluation,
}

impl<'a, O: Objective> LineProbe<'a, O> {
    fn clamp(&self, t: f64) -> f64 {
        t.clamp(-self.max_step, self.max_step)
    }

    fn value(&mut self, t: f64) -> Result<f64, O::Error> {
        let evaluation = self.objective.evaluate(&(self.origin + self.direction * t))?;
        let value = evaluation.value;
        if value < self.best.value {
            self.best_step = t;
            self.best = evaluation;
        }
        Ok(value)
    }

    fn finish(self) -> LineMinimum {
        LineMinimum {
            step: self.best_step,
            position: self.origin + self.direction * self.best_step,
            evaluation: self.best,
        }
    }
}

/// Minimizes along the unit vector `direction` starting from `origin`.
///
/// The minimum is first bracketed by golden-ratio expansion from the trial step
/// `initial_step`, then refined with Brent's method to the fractional precision
/// `control.tolerance`. No probe is placed further than `control.max_step` from the
/// origin. The returned point is the lowest one evaluated, so its value never exceeds
/// `start.value`.
pub fn line_minimize<O: Objective>(
    objective: &mut O,
    origin: &DVector<f64>,
    direction: &DVector<f64>,
    start: &Evaluation,
    initial_step: f64,
    control: &StepControl,
) -> Result<LineMinimum, O::Error> {
    let mut probe = LineProbe {
        objective,
        origin,
        direction,
        max_step: control.max_step,
        best_step: 0.0,
        best: start.clone(),
    };

    let first = probe.clamp(initial_step);
    let (mut a, mut b) = (0.0, first);
    let mut fb = probe.value(first)?;
    if fb > start.value {
        // Search downhill from the trial point back through the origin.
        (a, b, fb) = (first, 0.0, start.value);
    }
    let mut c = probe.clamp(b + GOLDEN_RATIO * (b - a));
    if c == b {
        trace!(step = c, "Line bracket reached its limit");
        return Ok(probe.finish());
    }
    let mut fc = probe.value(c)?;

    let mut expansions = 0;
    while fc < fb {
        if expansions >= control.max_iterations || c.abs() >= control.max_step {
            trace!(step = c, "Line bracket reached its limit");
            return Ok(probe.finish());
        }
        let next = probe.clamp(c + GOLDEN_RATIO * (c - b));
        (a, b, fb) = (b, c, fc);
        c = next;
        fc = probe.value(c)?;
        expansions += 1;
    }

    brent(&mut probe, a, b, c, fb, control)?;
    Ok(probe.finish())
}

fn brent<O: Objective>(
    probe: &mut LineProbe<'_, O>,
    ax: f64,
    bx: f64,
    cx: f64,
    fbx: f64,
    control: &StepControl,
) -> Result<(), O::Error> {
    let tol = control.tolerance;
    let (mut a, mut b) = if ax < cx { (ax, cx) } else { (cx, ax) };
    let (mut x, mut w, mut v) = (bx, bx, bx);
    let (mut fx, mut fw, mut fv) = (fbx, fbx, fbx);
    let mut d: f64 = 0.0;
    let mut e: f64 = 0.0;

    for _ in 0..control.max_iterations {
        let xm = 0.5 * (a + b);
        let tol1 = tol * x.abs() + ZEPS;
        let tol2 = 2.0 * tol1;
        if (x - xm).abs() <= tol2 - 0.5 * (b - a) {
            break;
        }

        if e.abs() > tol1 {
            // Parabolic fit through x, w and v.
            let r = (x - w) * (fx - fv);
            let mut q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            let previous = e;
            e = d;
            if p.abs() >= (0.5 * q * previous).abs() || p <= q * (a - x) || p >= q * (b - x) {
                e = if x >= xm { a - x } else { b - x };
                d = GOLDEN_SECTION * e;
            } else {
                d = p / q;
                let u = x + d;
                if u - a < tol2 || b - u < tol2 {
                    d = tol1.copysign(xm - x);
                }
            }
        } else {
            e = if x >= xm { a - x } else { b - x };
            d = GOLDEN_SECTION * e;
        }

        let u = if d.abs() >= tol1 {
            x + d
        } else {
            x + tol1.copysign(d)
        };
        let fu = probe.value(u)?;
        if fu <= fx {
            if u >= x {
                a = x;
            } else {
                b = x;
            }
            (v, fv, w, fw, x, fx) = (w, fw, x, fx, u, fu);
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                (v, fv, w, fw) = (w, fw, u, fu);
            } else if fu <= fv || v == x || v == w {
                (v, fv) = (u, fu);
            }
        }
    }
    Ok(())
}

/// Backtracking search along `direction` with interpolated step reduction.
///
/// The full step is capped at `control.max_step` in length and accepted once it meets
/// the Armijo condition. Rejected steps shrink by quadratic, then cubic interpolation,
/// never by more than a factor of ten at a time. A direction that is not downhill is
/// replaced by the negative gradient. When the step length falls below
/// `control.tolerance` (relative to the coordinate scale) or the iteration budget runs
/// out, the start point is returned unchanged.
pub fn backtrack<O: Objective>(
    objective: &mut O,
    origin: &DVector<f64>,
    start: &Evaluation,
    direction: &DVector<f64>,
    control: &StepControl,
) -> Result<StepResult, O::Error> {
    let mut step = direction.clone();
    let mut slope = start.gradient.dot(&step);
    if !(slope < 0.0) {
        trace!(slope, "Search direction is not downhill, using steepest descent");
        step = -&start.gradient;
        slope = -start.gradient.norm_squared();
    }

    let length = step.norm();
    if length == 0.0 {
        return Ok(StepResult::stay(origin, start));
    }
    if length > control.max_step {
        let scale = control.max_step / length;
        step *= scale;
        slope *= scale;
    }

    let relative = step
        .iter()
        .zip(origin.iter())
        .map(|(s, x)| s.abs() / x.abs().max(1.0))
        .fold(0.0, f64::max);
    let min_lambda = control.tolerance / relative;

    let mut lambda = 1.0;
    let mut previous: Option<(f64, f64)> = None;
    for _ in 0..control.max_iterations {
        if lambda < min_lambda {
            trace!(lambda, "Backtracking step vanished");
            break;
        }
        let trial = origin + &step * lambda;
        let evaluation = objective.evaluate(&trial)?;
        let value = evaluation.value;
        if value <= start.value + ARMIJO * lambda * slope {
            return Ok(StepResult::new(trial, evaluation));
        }

        let next = match previous {
            None => -slope / (2.0 * (value - start.value - slope)),
            Some((lambda2, value2)) => {
                let rhs1 = value - start.value - lambda * slope;
                let rhs2 = value2 - start.value - lambda2 * slope;
                let a = (rhs1 / (lambda * lambda) - rhs2 / (lambda2 * lambda2)) / (lambda - lambda2);
                let b = (-lambda2 * rhs1 / (lambda * lambda) + lambda * rhs2 / (lambda2 * lambda2))
                    / (lambda - lambda2);
                let cubic = if a == 0.0 {
                    -slope / (2.0 * b)
                } else {
                    let discriminant = b * b - 3.0 * a * slope;
                    if discriminant < 0.0 {
                        0.5 * lambda
                    } else if b <= 0.0 {
                        (-b + discriminant.sqrt()) / (3.0 * a)
                    } else {
                        -slope / (b + discriminant.sqrt())
                    }
                };
                cubic.min(0.5 * lambda)
            }
        };
        previous = Some((lambda, value));
        lambda = if next.is_finite() {
            next.max(0.1 * lambda)
        } else {
            0.1 * lambda
        };
    }

    Ok(StepResult::stay(origin, start))
}
