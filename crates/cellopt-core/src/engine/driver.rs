use super::config::{ConfigError, OptimizerConfig};
use super::context::SimulationContext;
use super::convergence::{self, StepSample, Verdict};
use super::error::EngineError;
use super::mapper::AugmentedStateMapper;
use super::progress::{Progress, ProgressReporter};
use super::state::{OptimizerState, StepHistory};
use crate::core::forcefield::ForceEvaluator;
use crate::core::minimize::bfgs::bfgs_step;
use crate::core::minimize::descent::{AdaptiveStep, conjugate_gradient_step, steepest_descent_step};
use crate::core::minimize::lbfgs::lbfgs_step;
use crate::core::minimize::trm::trm_step;
use crate::core::minimize::{Evaluation, StepResult, normalized};
use nalgebra::DVector;
use tracing::{debug, info, instrument, warn};

/// Result of one optimizer step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Continue,
    Converged(String),
    Stalled(String),
}

impl StepOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepOutcome::Continue)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            StepOutcome::Continue => None,
            StepOutcome::Converged(reason) | StepOutcome::Stalled(reason) => Some(reason),
        }
    }
}

struct Binding<E: ForceEvaluator> {
    mapper: AugmentedStateMapper<E>,
    current: DVector<f64>,
}

/// Optimizes atomic positions and the cell together, one step per call.
///
/// A driver is created for one algorithm, bound once to a [`SimulationContext`] and then
/// stepped until [`step`](Self::step) reports a terminal [`StepOutcome`]. Stepping an
/// unbound or terminated driver is an error.
pub struct OptimizerDriver<'a, E: ForceEvaluator> {
    config: OptimizerConfig,
    state: OptimizerState,
    binding: Option<Binding<E>>,
    outcome: Option<StepOutcome>,
    reporter: &'a ProgressReporter<'a>,
}

impl<'a, E: ForceEvaluator> OptimizerDriver<'a, E> {
    pub fn new(config: OptimizerConfig) -> Result<Self, ConfigError> {
        let state = OptimizerState::empty(config.algorithm);
        Self::with_state(config, state)
    }

    /// Resumes from a persisted state of the configured algorithm.
    pub fn with_state(config: OptimizerConfig, state: OptimizerState) -> Result<Self, ConfigError> {
        config.validate()?;
        config.check_state(&state)?;
        Ok(Self {
            config,
            state,
            binding: None,
            outcome: None,
            reporter: ProgressReporter::silent(),
        })
    }

    pub fn with_reporter(mut self, reporter: &'a ProgressReporter<'a>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn state(&self) -> &OptimizerState {
        &self.state
    }

    pub fn into_state(self) -> OptimizerState {
        self.state
    }

    /// The terminal outcome, once one has been reached.
    pub fn outcome(&self) -> Option<&StepOutcome> {
        self.outcome.as_ref()
    }

    /// Validates the configuration, sizes the persisted state for the system in
    /// `context` and captures its cell as the strain reference.
    pub fn bind(&mut self, context: &SimulationContext<E>) -> Result<(), EngineError> {
        self.config.validate()?;
        if matches!(self.state, OptimizerState::Idle) {
            debug!("Idle optimizer bound; steps will leave the system untouched");
            return Ok(());
        }

        let mapper = AugmentedStateMapper::bind(context, self.config.external_pressure)?;
        let dimension = mapper.dimension();
        self.state.prepare(dimension, &self.config)?;
        let current = mapper.coordinate_of(&context.system)?;

        info!(
            algorithm = %self.config.algorithm,
            atoms = mapper.atom_count(),
            dimension,
            pressure = self.config.external_pressure,
            "Bound cell optimizer"
        );
        self.binding = Some(Binding { mapper, current });
        self.outcome = None;
        Ok(())
    }

    /// Advances the optimization by one step and commits the result to `context`.
    #[instrument(skip_all, name = "optimizer_step", fields(step = index))]
    pub fn step(
        &mut self,
        context: &mut SimulationContext<E>,
        index: usize,
    ) -> Result<StepOutcome, EngineError> {
        if matches!(self.state, OptimizerState::Idle) {
            return Ok(StepOutcome::Continue);
        }
        if let Some(outcome) = &self.outcome {
            return Err(EngineError::Terminated {
                reason: outcome.reason().unwrap_or_default().to_string(),
            });
        }
        let binding = self.binding.as_mut().ok_or(EngineError::Unbound)?;
        self.reporter.report(Progress::StepStart { step: index });

        if context.system != *binding.mapper.working_system() {
            debug!("Committed system changed outside the optimizer; remapping coordinates");
            binding.current = binding.mapper.coordinate_of(&context.system)?;
        }

        let mut start = binding.mapper.ensure_at(&binding.current)?;
        binding.mapper.begin_step();
        mask_fixed(&mut start.gradient, &self.config.fixed_atoms);
        let position = binding.current.clone();
        let force = -&start.gradient;
        let previous_system = context.system.clone();
        let control = self.config.step_control();
        let fixed = &self.config.fixed_atoms;
        let mapper = &mut binding.mapper;

        let result: StepResult = match &mut self.state {
            OptimizerState::Idle => StepResult::new(position.clone(), start.clone()),
            OptimizerState::SteepestDescent(s) => {
                snapshot(&mut s.history, &position, &start, &force, index, fixed);
                let mut step = AdaptiveStep {
                    current: s.initial_step.unwrap_or(self.config.line_search.initial_step),
                    factor: self.config.line_search.adaptive,
                };
                let result = steepest_descent_step(
                    mapper,
                    &position,
                    &start,
                    &mut s.history.direction,
                    &mut step,
                    &control,
                )?;
                s.initial_step = Some(step.current);
                result
            }
            OptimizerState::ConjugateGradient(s) => {
                let previous_force = (index > 0).then(|| s.history.force.clone());
                snapshot(&mut s.history, &position, &start, &force, index, fixed);
                let mut step = AdaptiveStep {
                    current: s.initial_step.unwrap_or(self.config.line_search.initial_step),
                    factor: self.config.line_search.adaptive,
                };
                let result = conjugate_gradient_step(
                    mapper,
                    &position,
                    &start,
                    previous_force.as_ref(),
                    &mut s.history.direction,
                    &mut step,
                    &control,
                )?;
                s.initial_step = Some(step.current);
                result
            }
            OptimizerState::Bfgs(s) => {
                snapshot(&mut s.history, &position, &start, &force, index, fixed);
                bfgs_step(
                    mapper,
                    &position,
                    &start,
                    &mut s.inverse_hessian,
                    &mut s.history.direction,
                    &control,
                )?
            }
            OptimizerState::Lbfgs(s) => {
                snapshot(&mut s.history, &position, &start, &force, index, fixed);
                lbfgs_step(
                    mapper,
                    &position,
                    &start,
                    &mut s.memory,
                    self.config.lbfgs.scale,
                    &mut s.history.direction,
                    &control,
                )?
            }
            OptimizerState::TrustRegion(s) => {
                s.history.record(&position, start.value, &force);
                let mut radius = s.trust_radius.unwrap_or(self.config.max_step);
                let result = trm_step(
                    mapper,
                    &position,
                    &start,
                    &mut s.hessian,
                    &mut radius,
                    &control,
                )?;
                s.trust_radius = Some(radius);
                result
            }
        };

        // Leave the working copy on the accepted point before committing it.
        mapper.ensure_at(&result.position)?;
        let volume = mapper.working_system().cell().volume();
        if convergence::collapsed(volume, mapper.reference_volume()) {
            warn!(volume, reference = mapper.reference_volume(), "Cell collapsed");
            return Err(EngineError::CellCollapsed {
                volume,
                reference: mapper.reference_volume(),
            });
        }
        context.system = mapper.working_system().clone();
        context.forces.transfer_from(mapper.working_forces());
        let evaluations = mapper.take_evaluation_count();
        info!(evaluations, "Number of force calls");

        let mut new_force = -&result.evaluation.gradient;
        mask_fixed(&mut new_force, fixed);
        let sample = StepSample {
            step: index,
            energy_new: result.evaluation.value,
            energy_old: start.value,
            max_force: new_force.amax(),
            max_displacement: previous_system.max_displacement(&context.system),
            force_change: (&new_force - &force).norm(),
            atom_count: mapper.atom_count(),
        };
        binding.current = result.position;

        let verdict = convergence::check(&sample, &self.config.tolerances, self.reporter);
        self.reporter.report(Progress::StepFinish {
            step: index,
            evaluations,
        });

        let outcome = match verdict {
            Verdict::Continue => StepOutcome::Continue,
            Verdict::Converged => StepOutcome::Converged(format!(
                "Converged at step {index}: energy change per atom {:.3e} <= {:.1e}, \
                 max force {:.3e} <= {:.1e}, max displacement {:.3e} <= {:.1e}",
                sample.energy_change_per_atom(),
                self.config.tolerances.energy(),
                sample.max_force,
                self.config.tolerances.force(),
                sample.max_displacement,
                self.config.tolerances.position(),
            )),
            Verdict::Stalled => StepOutcome::Stalled(format!(
                "Stalled at step {index}: forces unchanged (|df| = {:.3e}) with max force {:.3e}",
                sample.force_change, sample.max_force,
            )),
        };
        if outcome.is_terminal() {
            info!(reason = outcome.reason().unwrap_or_default(), "Optimization finished");
            self.outcome = Some(outcome.clone());
        }
        Ok(outcome)
    }
}

/// Records the starting point of a step, seeding the direction with the unit force on
/// the first step.
fn snapshot(
    history: &mut StepHistory,
    position: &DVector<f64>,
    start: &Evaluation,
    force: &DVector<f64>,
    index: usize,
    fixed: &[usize],
) {
    if index == 0 {
        history.direction = normalized(force);
        mask_fixed(&mut history.direction, fixed);
    }
    history.record(position, start.value, force);
}

/// Zeroes the position components of the listed atoms.
fn mask_fixed(vector: &mut DVector<f64>, fixed: &[usize]) {
    for &atom in fixed {
        let first = 3 * atom;
        if first + 3 <= vector.len() {
            vector.rows_mut(first, 3).fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::models::HarmonicWell;
    use crate::core::models::cell::Cell;
    use crate::core::models::system::PeriodicSystem;
    use crate::engine::config::{Algorithm, OptimizerConfigBuilder};
    use nalgebra::Vector3;

    fn well_context() -> SimulationContext<HarmonicWell> {
        let system = PeriodicSystem::new(vec![Vector3::new(1.0, 0.0, 0.0)], Cell::cubic(10.0));
        SimulationContext::new(system, HarmonicWell::isotropic(1.0))
    }

    fn config(algorithm: Algorithm) -> OptimizerConfig {
        OptimizerConfigBuilder::new()
            .algorithm(algorithm)
            .build()
            .unwrap()
    }

    #[test]
    fn stepping_an_unbound_driver_fails() {
        let mut context = well_context();
        let mut driver = OptimizerDriver::new(config(Algorithm::Lbfgs)).unwrap();
        assert!(matches!(
            driver.step(&mut context, 0),
            Err(EngineError::Unbound)
        ));
    }

    #[test]
    fn idle_driver_leaves_system_untouched() {
        let mut context = well_context();
        let original = context.system.clone();
        let mut driver = OptimizerDriver::new(config(Algorithm::Idle)).unwrap();
        driver.bind(&context).unwrap();
        for index in 0..3 {
            assert_eq!(driver.step(&mut context, index).unwrap(), StepOutcome::Continue);
        }
        assert_eq!(context.system, original);
        assert!(context.forces.cached().is_none());
    }

    #[test]
    fn state_of_another_algorithm_is_rejected() {
        let result = OptimizerDriver::<HarmonicWell>::with_state(
            config(Algorithm::Bfgs),
            OptimizerState::empty(Algorithm::TrustRegion),
        );
        assert!(matches!(
            result,
            Err(ConfigError::AlgorithmMismatch {
                expected: Algorithm::Bfgs,
                found: Algorithm::TrustRegion
            })
        ));
    }

    #[test]
    fn step_commits_lower_energy_and_transfers_forces() {
        let mut context = well_context();
        let before = context.potential().unwrap();
        let mut driver = OptimizerDriver::new(config(Algorithm::Bfgs)).unwrap();
        driver.bind(&context).unwrap();

        driver.step(&mut context, 0).unwrap();

        let (cached_system, output) = context.forces.cached().unwrap();
        assert_eq!(cached_system, &context.system);
        assert!(output.potential < before);
    }

    #[test]
    fn terminated_driver_refuses_further_steps() {
        let mut context = well_context();
        let config = OptimizerConfigBuilder::new()
            .algorithm(Algorithm::SteepestDescent)
            .build()
            .unwrap();
        let mut driver = OptimizerDriver::new(config).unwrap();
        driver.bind(&context).unwrap();

        let mut last = StepOutcome::Continue;
        for index in 0..20 {
            last = driver.step(&mut context, index).unwrap();
            if last.is_terminal() {
                break;
            }
        }
        assert!(matches!(last, StepOutcome::Converged(_)));
        assert_eq!(driver.outcome(), Some(&last));
        assert!(matches!(
            driver.step(&mut context, 99),
            Err(EngineError::Terminated { .. })
        ));
    }

    #[test]
    fn mask_fixed_zeroes_atom_components() {
        let mut vector = DVector::from_element(9 + 6, 1.0);
        mask_fixed(&mut vector, &[1]);
        assert_eq!(vector.rows(3, 3).sum(), 0.0);
        assert_eq!(vector.sum(), 12.0);
    }
}
