use super::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid optimizer configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Optimizer has not been bound to a system")]
    Unbound,

    #[error("Optimizer has already terminated: {reason}")]
    Terminated { reason: String },

    #[error("Coordinate vector has length {found}, expected {expected}")]
    CoordinateLength { expected: usize, found: usize },

    #[error("Force output holds {found} force vectors for {expected} atoms")]
    ForceShape { expected: usize, found: usize },

    #[error("Cell is degenerate (volume {volume:e})")]
    DegenerateCell { volume: f64 },

    #[error("Cell collapsed to volume {volume:e} from {reference:e} at bind")]
    CellCollapsed { volume: f64, reference: f64 },

    #[error("Force evaluation failed: {source}")]
    ForceEvaluation {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl EngineError {
    pub(crate) fn evaluation<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        EngineError::ForceEvaluation {
            source: Box::new(error),
        }
    }
}
