//! # Workflows Module
//!
//! High-level entry points that run a complete optimization.
//!
//! - **Relaxation Workflow** ([`relax`]) - Binds a driver once and steps it until the run
//!   converges, stalls or exhausts its step budget.

pub mod relax;
