use super::cell::Cell;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Atomic positions inside a periodic cell.
///
/// This is the physical configuration an optimizer works on. Energies and forces live
/// next to it in a [`ForceProvider`](crate::core::forcefield::provider::ForceProvider)
/// so that a configuration can be copied cheaply without dragging stale results along.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodicSystem {
    positions: Vec<Vector3<f64>>,
    cell: Cell,
}

impl PeriodicSystem {
    pub fn new(positions: Vec<Vector3<f64>>, cell: Cell) -> Self {
        Self { positions, cell }
    }

    #[inline]
    pub fn natoms(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn positions(&self) -> &[Vector3<f64>] {
        &self.positions
    }

    #[inline]
    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    /// Replaces positions and cell together.
    ///
    /// The atom count is part of the system's identity, so a position list of a
    /// different length is handed back unchanged as the error value.
    pub fn set_configuration(
        &mut self,
        positions: Vec<Vector3<f64>>,
        cell: Cell,
    ) -> Result<(), Vec<Vector3<f64>>> {
        if positions.len() != self.positions.len() {
            return Err(positions);
        }
        self.positions = positions;
        self.cell = cell;
        Ok(())
    }

    /// Largest absolute change of any Cartesian component between two configurations.
    pub fn max_displacement(&self, other: &PeriodicSystem) -> f64 {
        self.positions
            .iter()
            .zip(other.positions.iter())
            .map(|(a, b)| (a - b).amax())
            .fold(0.0, f64::max)
    }
}
