use super::context::SimulationContext;
use super::error::EngineError;
use crate::core::forcefield::provider::ForceProvider;
use crate::core::forcefield::{ForceEvaluator, ForceOutput};
use crate::core::geometry::{self, CellVector};
use crate::core::minimize::{Evaluation, Objective};
use crate::core::models::cell::Cell;
use crate::core::models::system::PeriodicSystem;
use nalgebra::{DVector, Matrix3, Vector3};
use tracing::trace;

const CELL_COMPONENTS: usize = 9;

/// An evaluated point together with the configuration and output it produced.
struct Snapshot {
    at: DVector<f64>,
    evaluation: Evaluation,
    system: PeriodicSystem,
    output: ForceOutput,
}

/// Maps augmented coordinates to the effective potential `U + p·V` and its gradient.
///
/// An augmented coordinate holds `3N` reference-frame atomic positions followed by the
/// nine row-major components of the strain `ε` against the lattice captured at bind.
/// With `F = I + ε` the trial lattice is `F·h₀` and atom `i` sits at `F·r̃ᵢ`.
///
/// The mapper evaluates on a private working copy of the system and force provider, so
/// trial configurations never leak into the caller's context. Within a step it keeps the
/// starting point and the lowest point evaluated so far, so that either can be returned
/// to by [`ensure_at`](Self::ensure_at) without calling the force evaluator again.
pub struct AugmentedStateMapper<E: ForceEvaluator> {
    system: PeriodicSystem,
    forces: ForceProvider<E>,
    reference: Matrix3<f64>,
    reference_volume: f64,
    reference_inverse: Matrix3<f64>,
    external_pressure: f64,
    evaluations: usize,
    last: Option<(DVector<f64>, Evaluation)>,
    origin: Option<Snapshot>,
    best: Option<Snapshot>,
}

impl<E: ForceEvaluator> AugmentedStateMapper<E> {
    /// Captures the current configuration of `context` as the reference state.
    pub fn bind(context: &SimulationContext<E>, external_pressure: f64) -> Result<Self, EngineError> {
        let system = context.system.clone();
        let natoms = system.natoms();
        if natoms == 0 {
            return Err(EngineError::Initialization(
                "cannot optimize a system without atoms".to_string(),
            ));
        }
        if let Some((_, output)) = context.forces.cached() {
            if output.forces.len() != natoms {
                return Err(EngineError::ForceShape {
                    expected: natoms,
                    found: output.forces.len(),
                });
            }
        }

        let reference = *system.cell().matrix();
        let reference_volume = system.cell().volume();
        let reference_inverse = system
            .cell()
            .inverse()
            .ok_or(EngineError::DegenerateCell {
                volume: system.cell().volume(),
            })?;

        Ok(Self {
            system,
            forces: context.forces.duplicate(),
            reference,
            reference_volume,
            reference_inverse,
            external_pressure,
            evaluations: 0,
            last: None,
            origin: None,
            best: None,
        })
    }

    pub fn atom_count(&self) -> usize {
        self.system.natoms()
    }

    pub fn dimension(&self) -> usize {
        3 * self.atom_count() + CELL_COMPONENTS
    }

    /// Augmented coordinate of a physical configuration.
    pub fn coordinate_of(&self, system: &PeriodicSystem) -> Result<DVector<f64>, EngineError> {
        let natoms = self.atom_count();
        if system.natoms() != natoms {
            return Err(EngineError::CoordinateLength {
                expected: self.dimension(),
                found: 3 * system.natoms() + CELL_COMPONENTS,
            });
        }

        let strain = geometry::strain_with_inverse(system.cell().matrix(), &self.reference_inverse);
        let deformation = Matrix3::identity() + geometry::unflatten(&strain);
        let inverse = deformation
            .try_inverse()
            .ok_or(EngineError::DegenerateCell {
                volume: system.cell().volume(),
            })?;

        let mut x = DVector::zeros(self.dimension());
        for (i, r) in system.positions().iter().enumerate() {
            x.fixed_rows_mut::<3>(3 * i).copy_from(&(inverse * r));
        }
        x.fixed_rows_mut::<CELL_COMPONENTS>(3 * natoms)
            .copy_from(&strain);
        Ok(x)
    }

    /// The evaluation at `x`, leaving the working copy on that configuration.
    ///
    /// The most recent evaluation and the snapshots kept since
    /// [`begin_step`](Self::begin_step) are reused when taken at `x`; any other point is
    /// evaluated.
    pub fn ensure_at(&mut self, x: &DVector<f64>) -> Result<Evaluation, EngineError> {
        if let Some((at, evaluation)) = &self.last {
            if at == x {
                return Ok(evaluation.clone());
            }
        }
        let snapshot = [&self.best, &self.origin]
            .into_iter()
            .flatten()
            .find(|snapshot| snapshot.at == *x);
        if let Some(snapshot) = snapshot {
            trace!("Restoring a configuration evaluated earlier in this step");
            self.system = snapshot.system.clone();
            self.forces
                .store(snapshot.system.clone(), snapshot.output.clone());
            self.last = Some((snapshot.at.clone(), snapshot.evaluation.clone()));
            return Ok(snapshot.evaluation.clone());
        }
        self.evaluate(x)
    }

    /// Marks the most recent evaluation as the starting point of a new step and forgets
    /// the lowest point of the previous one.
    pub fn begin_step(&mut self) {
        self.best = None;
        self.origin = match (&self.last, self.forces.cached()) {
            (Some((at, evaluation)), Some((system, output))) => Some(Snapshot {
                at: at.clone(),
                evaluation: evaluation.clone(),
                system: system.clone(),
                output: output.clone(),
            }),
            _ => None,
        };
    }

    /// Returns the number of force evaluations since the last call and resets it.
    pub fn take_evaluation_count(&mut self) -> usize {
        std::mem::take(&mut self.evaluations)
    }

    /// The configuration of the most recent evaluation.
    pub fn working_system(&self) -> &PeriodicSystem {
        &self.system
    }

    pub fn working_forces(&self) -> &ForceProvider<E> {
        &self.forces
    }

    /// Volume of the lattice captured at bind.
    pub fn reference_volume(&self) -> f64 {
        self.reference_volume
    }
}

impl<E: ForceEvaluator> Objective for AugmentedStateMapper<E> {
    type Error = EngineError;

    fn evaluate(&mut self, x: &DVector<f64>) -> Result<Evaluation, EngineError> {
        let dimension = self.dimension();
        if x.len() != dimension {
            return Err(EngineError::CoordinateLength {
                expected: dimension,
                found: x.len(),
            });
        }
        let natoms = self.atom_count();

        let strain = CellVector::from_iterator(x.rows(3 * natoms, CELL_COMPONENTS).iter().copied());
        let deformation = Matrix3::identity() + geometry::unflatten(&strain);
        let cell = Cell::new(deformation * self.reference);
        if cell.is_degenerate() {
            return Err(EngineError::DegenerateCell {
                volume: cell.volume(),
            });
        }
        let positions = (0..natoms)
            .map(|i| deformation * Vector3::new(x[3 * i], x[3 * i + 1], x[3 * i + 2]))
            .collect();
        self.system
            .set_configuration(positions, cell)
            .map_err(|positions| EngineError::CoordinateLength {
                expected: dimension,
                found: 3 * positions.len() + CELL_COMPONENTS,
            })?;

        let output = self
            .forces
            .evaluate(&self.system)
            .map_err(EngineError::evaluation)?;
        self.evaluations += 1;
        if output.forces.len() != natoms {
            return Err(EngineError::ForceShape {
                expected: natoms,
                found: output.forces.len(),
            });
        }

        let volume = cell.volume();
        let value = output.potential + self.external_pressure * volume;
        let mut gradient = DVector::zeros(dimension);
        let deformation_transpose = deformation.transpose();
        for (i, force) in output.forces.iter().enumerate() {
            gradient
                .fixed_rows_mut::<3>(3 * i)
                .copy_from(&(-(deformation_transpose * force)));
        }
        let cell_gradient = geometry::stress_to_cell_gradient(
            &output.virial,
            self.external_pressure,
            volume,
            &strain,
        )
        .ok_or(EngineError::DegenerateCell { volume })?;
        gradient
            .fixed_rows_mut::<CELL_COMPONENTS>(3 * natoms)
            .copy_from(&cell_gradient);

        let pressure_tensor = geometry::tensor_to_voigt(&(output.virial / volume));
        let lengths = cell.lengths();
        trace!(
            potential = output.potential,
            volume,
            pressure = output.pressure(volume),
            pressure_tensor = ?pressure_tensor,
            lengths = ?lengths.as_slice(),
            "Evaluated augmented state"
        );

        let evaluation = Evaluation::new(value, gradient);
        let lowest = match &self.best {
            Some(best) => value < best.evaluation.value,
            None => true,
        };
        if lowest {
            self.best = Some(Snapshot {
                at: x.clone(),
                evaluation: evaluation.clone(),
                system: self.system.clone(),
                output: output.clone(),
            });
        }
        self.last = Some((x.clone(), evaluation.clone()));
        Ok(evaluation)
    }
}
