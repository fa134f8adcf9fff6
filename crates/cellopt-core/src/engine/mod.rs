//! # Engine Module
//!
//! The stateful side of cell optimization: everything that lives across steps of a run.
//!
//! ## Overview
//!
//! An [`OptimizerDriver`](driver::OptimizerDriver) is bound once to a
//! [`SimulationContext`](context::SimulationContext) and then stepped by an outer loop.
//! Each step evaluates the effective potential `U + p·V` through an
//! [`AugmentedStateMapper`](mapper::AugmentedStateMapper), hands one update to the
//! minimization library, commits the accepted configuration and asks the convergence
//! gate whether the run is over.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Algorithm choice, tolerances, line-search and L-BFGS options
//! - **Error Handling** ([`error`]) - Runtime failures of binding and stepping
//! - **Progress Monitoring** ([`progress`]) - Per-step events and convergence records
//! - **Simulation Context** ([`context`]) - The committed configuration and its force cache
//! - **Coordinate Mapping** ([`mapper`]) - Augmented coordinates to energies and gradients
//! - **Persistent State** ([`state`]) - Serializable per-algorithm state carried across steps
//! - **Exit Criteria** ([`convergence`]) - Convergence and stagnation detection
//! - **Driver** ([`driver`]) - The bind/step lifecycle

pub mod config;
pub mod context;
pub mod convergence;
pub mod driver;
pub mod error;
pub mod mapper;
pub mod progress;
pub mod state;
