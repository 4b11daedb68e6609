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
//! Equation terms
//!
//! Physical laws are composable [`EquationTerm`] objects. A term declares
//! the pairwise [`Derivative`]s it needs, performs pre-loop work in
//! `initialize`, post-loop per-particle corrections in `finalize`, and
//! creates the quantities it owns in `create`. Terms compose into an
//! [`EquationHolder`] with the `+` operator; requiring the same derivative
//! from several terms is deduplicated by the holder.

mod accumulated;
mod artificial_stress;
mod av;
mod conductivity;
mod continuity;
mod delta_sph;
mod derivative;
mod fluids;
mod heat;
mod momentum;
mod smoothing_length;
mod velocity;
mod xsph;

pub use accumulated::{Accumulated, AccumulatedValue, BufferSource};
pub use artificial_stress::StressAV;
pub use av::{AvAcceleration, AvEval, AvPhysics, AvTerm, BalsaraSwitch, MorrisMonaghanAV, StandardAV};
pub use conductivity::ArtificialConductivity;
pub use continuity::ContinuityEquation;
pub use delta_sph::{DensityDiffusion, VelocityDiffusion};
pub use derivative::{
    resolve_flags, AccelerationDerivative, BoundAcceleration, Derivative, DerivativeEval,
    DerivativeFlags, DerivativeHolder, DerivativePhase, GradCorrection, PairAcceleration,
    PairFilter,
};
pub use fluids::CohesionTerm;
pub use heat::HeatDiffusionEquation;
pub use momentum::{PressureForce, SolidStressForce};
pub use smoothing_length::{AdaptiveSmoothingLength, ConstSmoothingLength};
pub use velocity::{
    CorrectionTensor, VelocityDivergence, VelocityGradient, VelocityRotation, VelocityTemplate,
    VelocityTrait,
};
pub use xsph::XSph;

use crate::error::Result;
use crate::physics::materials::Material;
use crate::quantities::Storage;
use crate::scheduler::Scheduler;
use crate::settings::RunSettings;
use std::ops::Add;
use std::sync::Arc;

/// A composable physical law
pub trait EquationTerm: Send + Sync {
    /// Declares the derivatives required by this term
    ///
    /// Idempotent: repeated declarations of equal derivatives coalesce in
    /// the holder.
    fn set_derivatives(&self, holder: &mut DerivativeHolder, settings: &RunSettings) -> Result<()>;

    /// Pre-loop per-step work (clamping inputs, resetting auxiliaries)
    fn initialize(&self, scheduler: &dyn Scheduler, storage: &mut Storage, t: f64) -> Result<()>;

    /// Post-loop per-step work (per-particle corrections from summed fields)
    fn finalize(&self, scheduler: &dyn Scheduler, storage: &mut Storage, t: f64) -> Result<()>;

    /// Declares and initializes the quantities owned by this term
    fn create(&self, storage: &mut Storage, material: &mut dyn Material) -> Result<()>;
}

/// An ordered set of equation terms
#[derive(Clone, Default)]
pub struct EquationHolder {
    terms: Vec<Arc<dyn EquationTerm>>,
}

impl EquationHolder {
    /// Creates an empty holder
    pub fn new() -> Self {
        EquationHolder::default()
    }

    /// Wraps a single term
    pub fn of<T: EquationTerm + 'static>(term: T) -> Self {
        EquationHolder {
            terms: vec![Arc::new(term)],
        }
    }

    /// Appends a term
    pub fn push<T: EquationTerm + 'static>(&mut self, term: T) {
        self.terms.push(Arc::new(term));
    }

    /// The composed terms, in composition order
    pub fn terms(&self) -> &[Arc<dyn EquationTerm>] {
        &self.terms
    }

    /// Number of composed terms
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// True when no term is composed
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl Add for EquationHolder {
    type Output = EquationHolder;

    fn add(mut self, other: EquationHolder) -> EquationHolder {
        self.terms.extend(other.terms);
        self
    }
}

/// Shorthand for wrapping a term into a holder
pub fn make_term<T: EquationTerm + 'static>(term: T) -> EquationHolder {
    EquationHolder::of(term)
}
