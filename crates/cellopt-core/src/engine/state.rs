use super::config::{Algorithm, ConfigError, OptimizerConfig};
use crate::core::minimize::lbfgs::LbfgsHistory;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Position, potential and force of the previous step, plus the search direction.
///
/// Arrays of length zero are placeholders filled in when the optimizer binds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepHistory {
    pub position: DVector<f64>,
    pub potential: f64,
    pub force: DVector<f64>,
    pub direction: DVector<f64>,
}

impl StepHistory {
    pub fn empty() -> Self {
        Self {
            position: DVector::zeros(0),
            potential: 0.0,
            force: DVector::zeros(0),
            direction: DVector::zeros(0),
        }
    }

    fn prepare(&mut self, dimension: usize) -> Result<(), ConfigError> {
        prepare_vector("position", &mut self.position, dimension)?;
        prepare_vector("force", &mut self.force, dimension)?;
        prepare_vector("direction", &mut self.direction, dimension)
    }

    pub(crate) fn record(&mut self, position: &DVector<f64>, potential: f64, force: &DVector<f64>) {
        self.position.copy_from(position);
        self.potential = potential;
        self.force.copy_from(force);
    }
}

impl Default for StepHistory {
    fn default() -> Self {
        Self::empty()
    }
}

/// State of the line-minimizing algorithms.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LineSearchState {
    pub history: StepHistory,
    /// Trial step of the next line minimization; set from the configuration at bind.
    #[serde(default)]
    pub initial_step: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BfgsState {
    pub history: StepHistory,
    pub inverse_hessian: DMatrix<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LbfgsState {
    pub history: StepHistory,
    pub memory: LbfgsHistory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrmState {
    pub history: StepHistory,
    pub hessian: DMatrix<f64>,
    #[serde(default)]
    pub trust_radius: Option<f64>,
}

/// Everything an optimizer carries from one step to the next.
///
/// Each variant holds only what its algorithm needs. The state is serializable so that
/// a run can be checkpointed and resumed with
/// [`OptimizerDriver::with_state`](super::driver::OptimizerDriver::with_state).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum OptimizerState {
    Idle,
    SteepestDescent(LineSearchState),
    ConjugateGradient(LineSearchState),
    Bfgs(BfgsState),
    Lbfgs(LbfgsState),
    TrustRegion(TrmState),
}

impl OptimizerState {
    /// Unsized state for `algorithm`, to be filled in at bind.
    pub fn empty(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Idle => OptimizerState::Idle,
            Algorithm::SteepestDescent => OptimizerState::SteepestDescent(LineSearchState::default()),
            Algorithm::ConjugateGradient => {
                OptimizerState::ConjugateGradient(LineSearchState::default())
            }
            Algorithm::Bfgs => OptimizerState::Bfgs(BfgsState {
                history: StepHistory::empty(),
                inverse_hessian: DMatrix::zeros(0, 0),
            }),
            Algorithm::Lbfgs => OptimizerState::Lbfgs(LbfgsState {
                history: StepHistory::empty(),
                memory: LbfgsHistory::new(0, 0),
            }),
            Algorithm::TrustRegion => OptimizerState::TrustRegion(TrmState {
                history: StepHistory::empty(),
                hessian: DMatrix::zeros(0, 0),
                trust_radius: None,
            }),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            OptimizerState::Idle => Algorithm::Idle,
            OptimizerState::SteepestDescent(_) => Algorithm::SteepestDescent,
            OptimizerState::ConjugateGradient(_) => Algorithm::ConjugateGradient,
            OptimizerState::Bfgs(_) => Algorithm::Bfgs,
            OptimizerState::Lbfgs(_) => Algorithm::Lbfgs,
            OptimizerState::TrustRegion(_) => Algorithm::TrustRegion,
        }
    }

    pub fn history(&self) -> Option<&StepHistory> {
        match self {
            OptimizerState::Idle => None,
            OptimizerState::SteepestDescent(s) | OptimizerState::ConjugateGradient(s) => {
                Some(&s.history)
            }
            OptimizerState::Bfgs(s) => Some(&s.history),
            OptimizerState::Lbfgs(s) => Some(&s.history),
            OptimizerState::TrustRegion(s) => Some(&s.history),
        }
    }

    /// Sizes every persisted array for an augmented coordinate of length `dimension`.
    ///
    /// Empty arrays are initialized (zeros, identity or configured defaults); arrays of
    /// any other wrong size are rejected rather than silently replaced.
    pub fn prepare(&mut self, dimension: usize, config: &OptimizerConfig) -> Result<(), ConfigError> {
        if self.algorithm().is_dense() && dimension > config.max_dense_dimension {
            return Err(ConfigError::DenseStateTooLarge {
                dimension,
                limit: config.max_dense_dimension,
            });
        }

        match self {
            OptimizerState::Idle => Ok(()),
            OptimizerState::SteepestDescent(s) | OptimizerState::ConjugateGradient(s) => {
                s.history.prepare(dimension)?;
                s.initial_step.get_or_insert(config.line_search.initial_step);
                Ok(())
            }
            OptimizerState::Bfgs(s) => {
                s.history.prepare(dimension)?;
                prepare_square("inverse_hessian", &mut s.inverse_hessian, dimension)
            }
            OptimizerState::Lbfgs(s) => {
                s.history.prepare(dimension)?;
                prepare_memory(&mut s.memory, config.lbfgs.corrections, dimension)
            }
            OptimizerState::TrustRegion(s) => {
                s.history.prepare(dimension)?;
                s.trust_radius.get_or_insert(config.max_step);
                prepare_square("hessian", &mut s.hessian, dimension)
            }
        }
    }
}

fn prepare_vector(
    field: &'static str,
    vector: &mut DVector<f64>,
    dimension: usize,
) -> Result<(), ConfigError> {
    match vector.len() {
        0 => {
            *vector = DVector::zeros(dimension);
            Ok(())
        }
        n if n == dimension => Ok(()),
        found => Err(ConfigError::StateSizeMismatch {
            field,
            expected: dimension,
            found,
        }),
    }
}

fn prepare_square(
    field: &'static str,
    matrix: &mut DMatrix<f64>,
    dimension: usize,
) -> Result<(), ConfigError> {
    if matrix.is_empty() {
        *matrix = DMatrix::identity(dimension, dimension);
        return Ok(());
    }
    let (rows, cols) = matrix.shape();
    if rows != dimension || cols != dimension {
        return Err(ConfigError::StateSizeMismatch {
            field,
            expected: dimension,
            found: if rows != dimension { rows } else { cols },
        });
    }
    Ok(())
}

fn prepare_memory(
    memory: &mut LbfgsHistory,
    depth: usize,
    dimension: usize,
) -> Result<(), ConfigError> {
    if memory.position_deltas.is_empty() && memory.gradient_deltas.is_empty() {
        *memory = LbfgsHistory::new(depth, dimension);
        return Ok(());
    }
    for (field, buffer) in [
        ("position_deltas", &memory.position_deltas),
        ("gradient_deltas", &memory.gradient_deltas),
    ] {
        if buffer.nrows() != depth {
            return Err(ConfigError::StateSizeMismatch {
                field,
                expected: depth,
                found: buffer.nrows(),
            });
        }
        if buffer.ncols() != dimension {
            return Err(ConfigError::StateSizeMismatch {
                field,
                expected: dimension,
                found: buffer.ncols(),
            });
        }
    }
    if memory.stored > depth {
        return Err(ConfigError::StateSizeMismatch {
            field: "stored",
            expected: depth,
            found: memory.stored,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::OptimizerConfigBuilder;

    fn config(algorithm: Algorithm) -> OptimizerConfig {
        OptimizerConfigBuilder::new()
            .algorithm(algorithm)
            .build()
            .unwrap()
    }

    #[test]
    fn empty_state_matches_algorithm() {
        for algorithm in [
            Algorithm::Idle,
            Algorithm::SteepestDescent,
            Algorithm::ConjugateGradient,
            Algorithm::Bfgs,
            Algorithm::Lbfgs,
            Algorithm::TrustRegion,
        ] {
            assert_eq!(OptimizerState::empty(algorithm).algorithm(), algorithm);
        }
    }

    #[test]
    fn prepare_zero_initializes_empty_arrays() {
        let mut state = OptimizerState::empty(Algorithm::Bfgs);
        state.prepare(12, &config(Algorithm::Bfgs)).unwrap();
        let OptimizerState::Bfgs(bfgs) = &state else {
            panic!("unexpected state {state:?}");
        };
        assert_eq!(bfgs.history.force, DVector::zeros(12));
        assert_eq!(bfgs.history.position.len(), 12);
        assert_eq!(bfgs.inverse_hessian, DMatrix::identity(12, 12));
    }

    #[test]
    fn prepare_rejects_mismatched_force_array() {
        let mut state = OptimizerState::empty(Algorithm::ConjugateGradient);
        if let OptimizerState::ConjugateGradient(s) = &mut state {
            s.history.force = DVector::zeros(7);
        }
        assert_eq!(
            state.prepare(12, &config(Algorithm::ConjugateGradient)),
            Err(ConfigError::StateSizeMismatch {
                field: "force",
                expected: 12,
                found: 7
            })
        );
    }

    #[test]
    fn prepare_keeps_matching_arrays() {
        let mut state = OptimizerState::empty(Algorithm::SteepestDescent);
        if let OptimizerState::SteepestDescent(s) = &mut state {
            s.history.direction = DVector::from_element(12, 0.5);
            s.initial_step = Some(0.2);
        }
        state.prepare(12, &config(Algorithm::SteepestDescent)).unwrap();
        let OptimizerState::SteepestDescent(s) = &state else {
            panic!("unexpected state {state:?}");
        };
        assert_eq!(s.history.direction, DVector::from_element(12, 0.5));
        assert_eq!(s.initial_step, Some(0.2));
    }

    #[test]
    fn prepare_sizes_lbfgs_memory_from_corrections() {
        let config = OptimizerConfigBuilder::new().lbfgs_corrections(3).build().unwrap();
        let mut state = OptimizerState::empty(Algorithm::Lbfgs);
        state.prepare(15, &config).unwrap();
        let OptimizerState::Lbfgs(s) = &state else {
            panic!("unexpected state {state:?}");
        };
        assert_eq!(s.memory.depth(), 3);
        assert_eq!(s.memory.dimension(), 15);

        let mut resized = state.clone();
        assert!(matches!(
            resized.prepare(18, &config),
            Err(ConfigError::StateSizeMismatch { .. })
        ));
    }

    #[test]
    fn prepare_rejects_oversized_dense_state() {
        let config = OptimizerConfigBuilder::new()
            .algorithm(Algorithm::TrustRegion)
            .max_dense_dimension(100)
            .build()
            .unwrap();
        let mut state = OptimizerState::empty(Algorithm::TrustRegion);
        assert_eq!(
            state.prepare(303, &config),
            Err(ConfigError::DenseStateTooLarge {
                dimension: 303,
                limit: 100
            })
        );
    }

    #[test]
    fn trust_radius_defaults_to_max_step() {
        let config = OptimizerConfigBuilder::new()
            .algorithm(Algorithm::TrustRegion)
            .max_step(0.3)
            .build()
            .unwrap();
        let mut state = OptimizerState::empty(Algorithm::TrustRegion);
        state.prepare(12, &config).unwrap();
        let OptimizerState::TrustRegion(s) = &state else {
            panic!("unexpected state {state:?}");
        };
        assert_eq!(s.trust_radius, Some(0.3));
        assert_eq!(s.hessian.shape(), (12, 12));
    }
}
