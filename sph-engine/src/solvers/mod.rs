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
//! SPH solvers
//!
//! A solver owns the composed equation set and evaluates all pairwise
//! derivatives once per [`Solver::integrate`] call. The symmetric solver
//! visits each unordered pair exactly once, accumulating into both sides
//! through thread-local buffers; the asymmetric solver visits every
//! ordered pair and writes only to the queried particle, which permits
//! gradient-corrected derivatives.

mod asymmetric;
mod symmetric;

pub use asymmetric::AsymmetricSolver;
pub use symmetric::SymmetricSolver;

use crate::error::Result;
use crate::physics::materials::Material;
use crate::quantities::Storage;
use crate::statistics::Statistics;

/// Driver of one derivative evaluation per step
pub trait Solver: Send {
    /// Evaluates all derivatives of the current state into the highest
    /// derivative buffers of the storage
    fn integrate(&mut self, storage: &mut Storage, stats: &mut Statistics) -> Result<()>;

    /// Hook for collision handling between position updates
    ///
    /// No-op by default; time-stepping schemes call it at the documented
    /// points of their update sequence.
    fn collide(&mut self, storage: &mut Storage, stats: &mut Statistics, dt: f64) -> Result<()> {
        let _ = (storage, stats, dt);
        Ok(())
    }

    /// Declares and initializes the quantities of all composed equations
    /// for a new body
    fn create(&mut self, storage: &mut Storage, material: &mut dyn Material) -> Result<()>;
}
