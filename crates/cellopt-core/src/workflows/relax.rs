use crate::core::forcefield::ForceEvaluator;
use crate::core::models::system::PeriodicSystem;
use crate::engine::config::OptimizerConfig;
use crate::engine::context::SimulationContext;
use crate::engine::driver::{OptimizerDriver, StepOutcome};
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::state::OptimizerState;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct RelaxationResult {
    /// `Continue` when the step budget ran out first.
    pub outcome: StepOutcome,
    pub steps: usize,
    pub system: PeriodicSystem,
    /// Potential energy of the final configuration, without the `p·V` term.
    pub potential: f64,
    pub state: OptimizerState,
}

#[instrument(skip_all, name = "relaxation_workflow")]
pub fn run<E: ForceEvaluator>(
    context: &mut SimulationContext<E>,
    config: &OptimizerConfig,
    max_steps: usize,
    reporter: &ProgressReporter,
) -> Result<RelaxationResult, EngineError> {
    let mut driver = OptimizerDriver::new(config.clone())?.with_reporter(reporter);
    driver.bind(context)?;
    info!(
        algorithm = %config.algorithm,
        max_steps,
        "Starting cell relaxation"
    );

    let mut outcome = StepOutcome::Continue;
    let mut steps = 0;
    for index in 0..max_steps {
        outcome = driver.step(context, index)?;
        steps = index + 1;
        if outcome.is_terminal() {
            break;
        }
    }

    match &outcome {
        StepOutcome::Continue => {
            warn!(steps, "Relaxation stopped at the step limit before converging");
        }
        StepOutcome::Converged(reason) | StepOutcome::Stalled(reason) => {
            reporter.report(Progress::Message(reason.clone()));
        }
    }

    let potential = context.potential()?;
    info!(steps, potential, volume = context.system.cell().volume(), "Relaxation finished");
    Ok(RelaxationResult {
        outcome,
        steps,
        system: context.system.clone(),
        potential,
        state: driver.into_state(),
    })
}
