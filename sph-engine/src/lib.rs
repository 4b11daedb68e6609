// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! # SPH Engine
//!
//! Core physics engine for smoothed-particle hydrodynamics with
//! self-gravity, intended for asteroid impacts, rotational fission, cliff
//! collapse and similar astrophysical and geophysical problems.
//!
//! ## Architecture
//!
//! - **Storage**: heterogeneous, materially-segmented container of typed
//!   multi-order particle quantities with structural operations that keep
//!   dependent storages aligned
//! - **Equations**: composable physical laws declaring the pairwise
//!   derivatives they need; accumulators are merged safely across threads
//! - **Solvers**: parallel pair-interaction engines over tree or grid
//!   neighbor searches, with Newton's-third-law symmetric evaluation
//! - **Time stepping**: multi-order integrators with adaptive timestep
//!   criteria and per-quantity range clamping
//! - **Gravity**: brute-force reference and Barnes-Hut multipole tree
//!
//! ## Example
//!
//! ```no_run
//! use sph_engine::boundary::NullBoundaryCondition;
//! use sph_engine::equations::{make_term, ContinuityEquation, PressureForce, StandardAV};
//! use sph_engine::settings::RunSettings;
//! use sph_engine::scheduler::create_scheduler;
//! use sph_engine::solvers::SymmetricSolver;
//! use std::sync::Arc;
//!
//! let settings = RunSettings::new();
//! let scheduler: Arc<dyn sph_engine::scheduler::Scheduler> =
//!     create_scheduler(&settings).unwrap().into();
//! let equations = make_term(PressureForce::new())
//!     + make_term(ContinuityEquation::new(&settings).unwrap())
//!     + make_term(StandardAV::new());
//! let solver = SymmetricSolver::<3>::new(
//!     scheduler,
//!     &settings,
//!     equations,
//!     Box::new(NullBoundaryCondition),
//! )
//! .unwrap();
//! # let _ = solver;
//! ```

#![warn(missing_docs)]

/// Boundary conditions and computational domains
pub mod boundary;

/// Equation terms, derivatives and accumulators
pub mod equations;

/// Engine error taxonomy
pub mod error;

/// Neighbor search structures
pub mod finders;

/// Self-gravity solvers
pub mod gravity;

/// Initial particle configurations
pub mod initial;

/// Dump input and output
pub mod io;

/// SPH smoothing kernels and gravity kernels
pub mod kernel;

/// Dense math types
pub mod math;

/// Equations of state, rheologies and materials
pub mod physics;

/// Particle quantities and storage
pub mod quantities;

/// Work scheduling and thread-local scratch
pub mod scheduler;

/// Run and body configuration
pub mod settings;

/// SPH solvers
pub mod solvers;

/// Per-step run statistics
pub mod statistics;

/// Time integration
pub mod timestepping;

pub use error::{Error, Result};
pub use quantities::{QuantityId, SharedStorage, Storage};
