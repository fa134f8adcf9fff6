use super::config::Tolerances;
use super::progress::{ConvergenceRecord, Progress, ProgressReporter};
use tracing::info;

/// Generalized forces closer than this between two steps count as unchanged.
pub const STAGNATION_FLOOR: f64 = 1e-20;

/// Smallest fraction of the bound cell volume a committed cell may shrink to.
pub const MIN_VOLUME_RATIO: f64 = 1e-3;

/// What one completed step looked like.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSample {
    pub step: usize,
    pub energy_new: f64,
    pub energy_old: f64,
    pub max_force: f64,
    pub max_displacement: f64,
    /// Euclidean norm of the change of the generalized force.
    pub force_change: f64,
    pub atom_count: usize,
}

impl StepSample {
    pub fn energy_change_per_atom(&self) -> f64 {
        (self.energy_new - self.energy_old).abs() / self.atom_count.max(1) as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Converged,
    Stalled,
}

/// Decides whether a run should stop after `sample`.
///
/// Convergence requires all three criteria at once. A step that is not converged but
/// left the forces unchanged has stalled. The full record is always reported.
pub fn check(sample: &StepSample, tolerances: &Tolerances, reporter: &ProgressReporter) -> Verdict {
    let record = ConvergenceRecord {
        step: sample.step,
        energy: sample.energy_new,
        energy_change: sample.energy_change_per_atom(),
        energy_tolerance: tolerances.energy(),
        max_force: sample.max_force,
        force_tolerance: tolerances.force(),
        displacement: sample.max_displacement,
        position_tolerance: tolerances.position(),
    };
    info!(
        step = record.step,
        energy = record.energy,
        energy_change = record.energy_change,
        energy_tolerance = record.energy_tolerance,
        max_force = record.max_force,
        force_tolerance = record.force_tolerance,
        displacement = record.displacement,
        position_tolerance = record.position_tolerance,
        "Convergence check"
    );

    let converged = record.energy_change <= record.energy_tolerance
        && record.max_force <= record.force_tolerance
        && record.displacement <= record.position_tolerance;
    reporter.report(Progress::Convergence(record));

    if converged {
        Verdict::Converged
    } else if sample.force_change <= STAGNATION_FLOOR {
        Verdict::Stalled
    } else {
        Verdict::Continue
    }
}

/// Whether a committed cell has shrunk below [`MIN_VOLUME_RATIO`] of its volume at bind.
pub fn collapsed(volume: f64, reference_volume: f64) -> bool {
    !(volume >= MIN_VOLUME_RATIO * reference_volume)
}
