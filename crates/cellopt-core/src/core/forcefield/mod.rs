//! # Force Evaluation
//!
//! The interface between the optimizer and whatever computes energies and forces.
//!
//! ## Key Components
//!
//! - [`ForceEvaluator`] - Computes potential energy, forces and virial for a configuration
//! - [`ForceOutput`] - The result of one evaluation
//! - [`provider`] - Caches the latest output next to the configuration it belongs to
//! - [`models`] - Analytic model potentials

pub mod models;
pub mod provider;

use crate::core::models::system::PeriodicSystem;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::error::Error;

/// Energy, per-atom forces and virial of one configuration.
///
/// The virial follows the convention `W = −∂U/∂δ`, where `δ` is a homogeneous
/// deformation of the evaluated configuration (atoms and cell deformed together).
/// A configuration in mechanical equilibrium under pressure `p` has `W = p·V·I`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForceOutput {
    pub potential: f64,
    pub forces: Vec<Vector3<f64>>,
    pub virial: Matrix3<f64>,
}

impl ForceOutput {
    pub fn new(potential: f64, forces: Vec<Vector3<f64>>, virial: Matrix3<f64>) -> Self {
        Self {
            potential,
            forces,
            virial,
        }
    }

    /// Largest absolute Cartesian force component.
    pub fn max_component(&self) -> f64 {
        self.forces.iter().map(|f| f.amax()).fold(0.0, f64::max)
    }

    /// Internal pressure `tr(W) / 3V`.
    pub fn pressure(&self, volume: f64) -> f64 {
        self.virial.trace() / (3.0 * volume)
    }
}

/// Computes energies and forces for periodic configurations.
///
/// Cloning must produce an independent evaluator: the optimizer keeps a private
/// duplicate and evaluates trial configurations with it without disturbing the
/// caller's copy.
pub trait ForceEvaluator: Clone {
    type Error: Error + Send + Sync + 'static;

    fn compute(&mut self, system: &PeriodicSystem) -> Result<ForceOutput, Self::Error>;
}
