use super::{ForceEvaluator, ForceOutput};
use crate::core::models::system::PeriodicSystem;
use tracing::trace;

/// A force evaluator together with its most recent result.
///
/// The cached output is keyed on the exact configuration it was computed for, so a
/// lookup for any other configuration triggers a fresh evaluation.
#[derive(Debug, Clone)]
pub struct ForceProvider<E: ForceEvaluator> {
    evaluator: E,
    cached: Option<(PeriodicSystem, ForceOutput)>,
}

impl<E: ForceEvaluator> ForceProvider<E> {
    pub fn new(evaluator: E) -> Self {
        Self {
            evaluator,
            cached: None,
        }
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    /// Output for `system`, served from the cache when it matches.
    pub fn get(&mut self, system: &PeriodicSystem) -> Result<&ForceOutput, E::Error> {
        match self.cached.take() {
            Some((cached_system, output)) if cached_system == *system => {
                let (_, output) = self.cached.insert((cached_system, output));
                Ok(output)
            }
            _ => self.evaluate(system),
        }
    }

    /// Always evaluates, replacing whatever was cached.
    pub fn evaluate(&mut self, system: &PeriodicSystem) -> Result<&ForceOutput, E::Error> {
        trace!(atoms = system.natoms(), "Evaluating forces");
        let output = self.evaluator.compute(system)?;
        let (_, output) = self.cached.insert((system.clone(), output));
        Ok(output)
    }

    pub fn cached(&self) -> Option<(&PeriodicSystem, &ForceOutput)> {
        self.cached.as_ref().map(|(system, output)| (system, output))
    }

    /// Copies the cached result of `other` into this provider, leaving its evaluator alone.
    pub fn transfer_from(&mut self, other: &ForceProvider<E>) {
        self.cached = other.cached.clone();
    }

    /// Caches an output computed earlier for `system`.
    pub fn store(&mut self, system: PeriodicSystem, output: ForceOutput) {
        self.cached = Some((system, output));
    }

    /// An independent copy: a cloned evaluator with the same cached result.
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::cell::Cell;
    use nalgebra::{Matrix3, Vector3};
    use std::convert::Infallible;

    #[derive(Debug, Clone, Default)]
    struct CountingEvaluator {
        calls: usize,
    }

    impl ForceEvaluator for CountingEvaluator {
        type Error = Infallible;

        fn compute(&mut self, system: &PeriodicSystem) -> Result<ForceOutput, Infallible> {
            self.calls += 1;
            let potential = system.positions().iter().map(|r| r.norm_squared()).sum();
            Ok(ForceOutput::new(
                potential,
                vec![Vector3::zeros(); system.natoms()],
                Matrix3::zeros(),
            ))
        }
    }

    fn system(x: f64) -> PeriodicSystem {
        PeriodicSystem::new(vec![Vector3::new(x, 0.0, 0.0)], Cell::cubic(4.0))
    }

    #[test]
    fn get_reuses_cached_output_for_same_configuration() {
        let mut provider = ForceProvider::new(CountingEvaluator::default());
        let first = provider.get(&system(1.0)).unwrap().potential;
        let second = provider.get(&system(1.0)).unwrap().potential;
        assert_eq!(first, second);
        assert_eq!(provider.evaluator().calls, 1);
    }

    #[test]
    fn get_recomputes_for_changed_configuration() {
        let mut provider = ForceProvider::new(CountingEvaluator::default());
        provider.get(&system(1.0)).unwrap();
        let potential = provider.get(&system(2.0)).unwrap().potential;
        assert_eq!(potential, 4.0);
        assert_eq!(provider.evaluator().calls, 2);
    }

    #[test]
    fn evaluate_bypasses_the_cache() {
        let mut provider = ForceProvider::new(CountingEvaluator::default());
        provider.get(&system(1.0)).unwrap();
        provider.evaluate(&system(1.0)).unwrap();
        assert_eq!(provider.evaluator().calls, 2);
    }

    #[test]
    fn transfer_copies_cache_without_touching_evaluator() {
        let mut source = ForceProvider::new(CountingEvaluator::default());
        source.get(&system(3.0)).unwrap();

        let mut target = ForceProvider::new(CountingEvaluator::default());
        target.transfer_from(&source);

        let (cached_system, output) = target.cached().unwrap();
        assert_eq!(cached_system, &system(3.0));
        assert_eq!(output.potential, 9.0);
        assert_eq!(target.evaluator().calls, 0);

        target.get(&system(3.0)).unwrap();
        assert_eq!(target.evaluator().calls, 0);
    }

    #[test]
    fn stored_output_is_served_without_evaluating() {
        let mut provider = ForceProvider::new(CountingEvaluator::default());
        let output = ForceOutput::new(7.0, vec![Vector3::zeros()], Matrix3::zeros());
        provider.store(system(2.0), output);

        assert_eq!(provider.get(&system(2.0)).unwrap().potential, 7.0);
        assert_eq!(provider.evaluator().calls, 0);
    }

    #[test]
    fn duplicate_is_independent() {
        let mut original = ForceProvider::new(CountingEvaluator::default());
        original.get(&system(1.0)).unwrap();
        let mut copy = original.duplicate();
        copy.evaluate(&system(2.0)).unwrap();
        assert_eq!(original.evaluator().calls, 1);
        assert_eq!(copy.evaluator().calls, 2);
        assert_eq!(original.cached().unwrap().1.potential, 1.0);
    }
}
