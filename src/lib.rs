// Copyright 2026 Pulseopt Contributors
// SPDX-License-Identifier: Apache-2.0

//! Optimal quantum control pulses via master-equation simulation with
//! exact discrete adjoints.
//!
//! The engine computes time-dependent control pulses that drive a
//! coupled system of quantum oscillators toward a target state or gate
//! by minimizing terminal infidelity plus running-cost penalties. The
//! state evolves under the Lindblad master equation (or, for closed
//! systems, the Schrödinger equation); the gradient of the objective is
//! the exact algorithmic adjoint of the discrete time stepping.
//!
//! # Architecture
//!
//! ```text
//! design vector x
//!   │  (per oscillator: spline × carrier coefficients)
//!   ▼
//! ┌───────────────┐   p_k(t), q_k(t)   ┌──────────────────────┐
//! │ ControlBasis  ├───────────────────►│ MasterEq assembler   │
//! │ (controls)    │                    │ A(t) = A_c + Σ pP+qQ │
//! └───────────────┘                    └──────────┬───────────┘
//!                                                 │ sparse A(t)
//!                    ┌───────────────┐            ▼
//!                    │ LinearSolver  │◄──┌──────────────────┐
//!                    │ Neumann/GMRES │   │ TimeStepper      │
//!                    └───────────────┘   │ Euler | midpoint │
//!                                        │ | compositions   │
//!                                        └────────┬─────────┘
//!                                                 │ ρ(t), adjoint
//!                                                 ▼
//!                                        ┌──────────────────┐
//!                                        │ Objective        │
//!                                        │ J(x), ∂J/∂x      │
//!                                        └──────────────────┘
//! ```
//!
//! The outer optimizer, gate algebra, file parsing and process
//! bootstrap are external collaborators; each evaluation owns one
//! assembler, one stepper and its own buffers, and no instance is
//! shared between threads.
//!
//! # Modules
//!
//! - [`config`]: typed configuration and the flat key → value interface
//! - [`sparse`]: real CSR matrices with frozen structure
//! - [`controls`]: B-spline × carrier control basis, transfer functions
//! - [`oscillator`]: per-oscillator model and ladder operators
//! - [`mastereq`]: the system operator assembler
//! - [`linsolve`]: Neumann and GMRES solvers for the implicit stages
//! - [`stepper`]: integrators and their discrete adjoints
//! - [`objective`]: penalties, Tikhonov term and gradient orchestration
//! - [`target`]: terminal-cost collaborator interface
//! - [`output`]: fixed-width ASCII writers
//! - [`error`]: error types

pub mod config;
pub mod controls;
pub mod error;
pub mod linsolve;
pub mod mastereq;
pub mod objective;
pub mod oscillator;
pub mod output;
pub mod sparse;
pub mod stepper;
pub mod target;

pub use config::{Config, IntegratorType, LindbladType, LinearSolverType};
pub use error::{Error, Result};
pub use mastereq::MasterEq;
pub use objective::{Objective, ObjectiveValue};
pub use oscillator::Oscillator;
pub use stepper::{Scheme, TimeStepper};
pub use target::{OptimTarget, PureStateTarget};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
