//! # cellopt Core Library
//!
//! Joint optimization of atomic positions and lattice vectors for periodic systems,
//! minimizing the enthalpy-like potential `U + p_ext·V` under a chosen external pressure.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`PeriodicSystem`, `Cell`),
//!   pure tensor geometry (strain, metric, virial-to-gradient conversion), the
//!   force-evaluation interface, and the generic minimization algorithms
//!   (steepest descent, conjugate gradient, BFGS, L-BFGS, trust-region BFGS).
//!
//! - **[`engine`]: The Logic Core.** The stateful optimizer: configuration and validation,
//!   the augmented-coordinate mapper that couples forces and stress into one gradient,
//!   persisted cross-step optimizer state, the per-step driver, and the convergence gate.
//!
//! - **[`workflows`]: The Public API.** High-level procedures such as a complete
//!   relaxation run, tying the `engine` and `core` layers together.

pub mod core;
pub mod engine;
pub mod workflows;
