//! # Core Module
//!
//! Stateless building blocks for periodic geometry optimization.
//!
//! ## Architecture
//!
//! - **Periodic Representation** ([`models`]) - Atomic configurations and lattice cells
//! - **Tensor Geometry** ([`geometry`]) - Strain, metric and stress-to-gradient transformations
//! - **Force Evaluation** ([`forcefield`]) - The evaluator interface, cached outputs and model potentials
//! - **Minimization** ([`minimize`]) - Line searches and quasi-Newton step functions over flat vectors
//!
//! Nothing in this layer knows about optimizer lifecycles; every function either is pure
//! or mutates only the state handed to it explicitly.

pub mod forcefield;
pub mod geometry;
pub mod minimize;
pub mod models;
