use super::{ForceEvaluator, ForceOutput};
use crate::core::models::system::PeriodicSystem;
use nalgebra::{Matrix3, Vector3};
use std::convert::Infallible;
use thiserror::Error;

/// Anisotropic harmonic tether of every atom to a fixed point in space.
///
/// `E = ½ Σᵢ Σ_d k_d (r_id − c_d)²`. The well is anchored in Cartesian space rather than
/// in the lattice, so it reports a zero virial; under zero external pressure the cell is
/// left untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonicWell {
    stiffness: Vector3<f64>,
    center: Vector3<f64>,
}

impl HarmonicWell {
    pub fn new(stiffness: Vector3<f64>, center: Vector3<f64>) -> Self {
        Self { stiffness, center }
    }

    /// Isotropic well `½k|r|²` centered at the origin.
    pub fn isotropic(k: f64) -> Self {
        Self::new(Vector3::repeat(k), Vector3::zeros())
    }
}

impl ForceEvaluator for HarmonicWell {
    type Error = Infallible;

    fn compute(&mut self, system: &PeriodicSystem) -> Result<ForceOutput, Self::Error> {
        let mut potential = 0.0;
        let forces = system
            .positions()
            .iter()
            .map(|r| {
                let offset = r - self.center;
                potential += 0.5 * self.stiffness.dot(&offset.component_mul(&offset));
                -self.stiffness.component_mul(&offset)
            })
            .collect();
        Ok(ForceOutput::new(potential, forces, Matrix3::zeros()))
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CrystalModelError {
    #[error("Model has {sites} lattice sites but the system has {atoms} atoms")]
    SiteCountMismatch { sites: usize, atoms: usize },
}

/// Atoms tied to lattice sites plus a bulk-modulus volume term.
///
/// `E = ½k Σᵢ |rᵢ − h·sᵢ|² + ½B (V − V₀)² / V₀` with fractional sites `sᵢ`. Both terms
/// follow the cell under deformation, so the virial is
/// `W = −k Σᵢ uᵢ⊗uᵢ − B (V − V₀) V / V₀ · I` with `uᵢ = rᵢ − h·sᵢ`.
/// At zero displacement and external pressure `p` the equilibrium volume is `V₀(1 − p/B)`.
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonicCrystal {
    sites: Vec<Vector3<f64>>,
    spring: f64,
    bulk_modulus: f64,
    equilibrium_volume: f64,
}

impl HarmonicCrystal {
    pub fn new(
        sites: Vec<Vector3<f64>>,
        spring: f64,
        bulk_modulus: f64,
        equilibrium_volume: f64,
    ) -> Self {
        Self {
            sites,
            spring,
            bulk_modulus,
            equilibrium_volume,
        }
    }

    pub fn equilibrium_volume_at(&self, pressure: f64) -> f64 {
        self.equilibrium_volume * (1.0 - pressure / self.bulk_modulus)
    }
}

impl ForceEvaluator for HarmonicCrystal {
    type Error = CrystalModelError;

    fn compute(&mut self, system: &PeriodicSystem) -> Result<ForceOutput, Self::Error> {
        if self.sites.len() != system.natoms() {
            return Err(CrystalModelError::SiteCountMismatch {
                sites: self.sites.len(),
                atoms: system.natoms(),
            });
        }

        let cell = system.cell();
        let mut potential = 0.0;
        let mut virial = Matrix3::zeros();
        let forces = system
            .positions()
            .iter()
            .zip(&self.sites)
            .map(|(r, s)| {
                let u = r - cell.to_absolute(s);
                potential += 0.5 * self.spring * u.norm_squared();
                virial -= self.spring * u * u.transpose();
                -self.spring * u
            })
            .collect();

        let volume = system.cell().volume();
        let excess = volume - self.equilibrium_volume;
        potential += 0.5 * self.bulk_modulus * excess * excess / self.equilibrium_volume;
        virial -= Matrix3::identity()
            * (self.bulk_modulus * excess * volume / self.equilibrium_volume);

        Ok(ForceOutput::new(potential, forces, virial))
    }
}
