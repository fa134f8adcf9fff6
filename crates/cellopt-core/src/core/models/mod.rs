//! # Core Models Module
//!
//! Data structures describing a periodic atomic configuration.
//!
//! ## Key Components
//!
//! - [`cell`] - The lattice matrix `h` whose columns are the lattice vectors
//! - [`system`] - Atomic positions together with the enclosing cell
//!
//! ## Usage
//!
//! ```ignore
//! use cellopt::core::models::{cell::Cell, system::PeriodicSystem};
//! use nalgebra::Vector3;
//!
//! let cell = Cell::cubic(10.0);
//! let system = PeriodicSystem::new(vec![Vector3::new(1.0, 0.0, 0.0)], cell);
//! assert_eq!(system.natoms(), 1);
//! ```

pub mod cell;
pub mod system;
