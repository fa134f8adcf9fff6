use super::error::EngineError;
use crate::core::forcefield::provider::ForceProvider;
use crate::core::forcefield::{ForceEvaluator, ForceOutput};
use crate::core::models::system::PeriodicSystem;

/// The live simulation state an optimizer advances: the committed configuration and the
/// force provider whose cache belongs to it.
#[derive(Debug, Clone)]
pub struct SimulationContext<E: ForceEvaluator> {
    pub system: PeriodicSystem,
    pub forces: ForceProvider<E>,
}

impl<E: ForceEvaluator> SimulationContext<E> {
    pub fn new(system: PeriodicSystem, evaluator: E) -> Self {
        Self {
            system,
            forces: ForceProvider::new(evaluator),
        }
    }

    /// Forces for the committed configuration, evaluated only if not cached.
    pub fn output(&mut self) -> Result<&ForceOutput, EngineError> {
        self.forces.get(&self.system).map_err(EngineError::evaluation)
    }

    pub fn potential(&mut self) -> Result<f64, EngineError> {
        Ok(self.output()?.potential)
    }
}
