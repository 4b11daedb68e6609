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
//! Artificial viscosity
//!
//! The standard Monaghan-Gingold viscosity uses the pairwise convergence
//! measure mu = h (v . r) / (|r|^2 + eps h^2) and applies only in
//! convergent flow. The Morris-Monaghan variant evolves the linear
//! coefficient per particle, decaying toward its floor in quiescent flow
//! and growing in compressions. The Balsara switch scales any wrapped
//! viscosity by a shear-flow detector built from div v and rot v.
//!
//! # References
//!
//! - Monaghan, J. J. & Gingold, R. A. (1983). Shock simulation by the
//!   particle method SPH. J. Comput. Phys. 52.
//! - Morris, J. P. & Monaghan, J. J. (1997). A switch to reduce SPH
//!   viscosity. J. Comput. Phys. 136.
//! - Balsara, D. S. (1995). Von Neumann stability analysis of smoothed
//!   particle hydrodynamics. J. Comput. Phys. 121.

use super::accumulated::Accumulated;
use super::derivative::{
    AccelerationDerivative, BoundAcceleration, DerivativeHolder, PairAcceleration,
};
use super::velocity::{VelocityDivergence, VelocityRotation};
use super::EquationTerm;
use crate::error::Result;
use crate::math::{Vector, H};
use crate::physics::materials::Material;
use crate::quantities::{BufferSlot, OrderEnum, QuantityId, Storage};
use crate::scheduler::{parallel_for_each, Scheduler};
use crate::settings::{BodySettingsId, RunSettings, RunSettingsId};

/// Physics of an artificial viscosity usable standalone or under the
/// Balsara switch
pub trait AvPhysics: Send + Sync + Clone + PartialEq + 'static {
    /// Bound evaluator type
    type Bound<'a>: AvEval
    where
        Self: 'a;

    /// Collects input views for the step
    fn bind<'a>(&'a self, input: &'a Storage, results: &'a Accumulated) -> Result<Self::Bound<'a>>;
}

/// Bound artificial-viscosity evaluator
pub trait AvEval {
    /// Scalar viscosity Pi of one pair; zero in divergent flow
    fn eval_av(&mut self, i: usize, j: usize) -> f64;

    /// Heating of one pair given its viscosity and the kernel gradient
    fn heating(&self, i: usize, j: usize, av: f64, grad: Vector) -> f64;
}

/// Adapter evaluating an [`AvPhysics`] as an acceleration
#[derive(Clone, PartialEq)]
pub struct AvAcceleration<P: AvPhysics> {
    physics: P,
}

/// Bound adapter of [`AvAcceleration`]
pub struct BoundAvAcceleration<B> {
    inner: B,
}

impl<B: AvEval> BoundAcceleration for BoundAvAcceleration<B> {
    #[inline]
    fn eval(&mut self, i: usize, j: usize, grad: Vector) -> (Vector, f64) {
        let av = self.inner.eval_av(i, j);
        debug_assert!(av >= 0.0);
        let heating = self.inner.heating(i, j, av, grad);
        (grad * (-av), heating)
    }
}

impl<P: AvPhysics> PairAcceleration for AvAcceleration<P> {
    type Bound<'a> = BoundAvAcceleration<P::Bound<'a>> where Self: 'a;

    fn bind<'a>(&'a self, input: &'a Storage, results: &'a Accumulated) -> Result<Self::Bound<'a>> {
        Ok(BoundAvAcceleration {
            inner: self.physics.bind(input, results)?,
        })
    }
}

/// Standard scalar artificial viscosity with constant coefficients
#[derive(Clone, PartialEq)]
pub struct StandardAvPhysics {
    alpha: f64,
    beta: f64,
}

impl StandardAvPhysics {
    const EPS: f64 = 1e-2;

    fn new(settings: &RunSettings) -> Result<Self> {
        Ok(StandardAvPhysics {
            alpha: settings.get(RunSettingsId::SphAvAlpha)?,
            beta: settings.get(RunSettingsId::SphAvBeta)?,
        })
    }
}

/// Bound standard artificial viscosity
pub struct BoundStandardAv<'a> {
    r: &'a [Vector],
    v: &'a [Vector],
    rho: &'a [f64],
    cs: &'a [f64],
    alpha: f64,
    beta: f64,
}

impl AvEval for BoundStandardAv<'_> {
    #[inline]
    fn eval_av(&mut self, i: usize, j: usize) -> f64 {
        let dv = self.v[i] - self.v[j];
        let dr = self.r[i] - self.r[j];
        let dvdr = dv.dot(dr);
        if dvdr >= 0.0 {
            return 0.0;
        }
        let h_bar = 0.5 * (self.r[i][H] + self.r[j][H]);
        let rho_bar = 0.5 * (self.rho[i] + self.rho[j]);
        let cs_bar = 0.5 * (self.cs[i] + self.cs[j]);
        let mu = h_bar * dvdr / (dr.sqr_length() + StandardAvPhysics::EPS * h_bar * h_bar);
        (-self.alpha * cs_bar * mu + self.beta * mu * mu) / rho_bar
    }

    #[inline]
    fn heating(&self, i: usize, j: usize, av: f64, grad: Vector) -> f64 {
        0.5 * av * (self.v[i] - self.v[j]).dot(grad)
    }
}

impl AvPhysics for StandardAvPhysics {
    type Bound<'a> = BoundStandardAv<'a> where Self: 'a;

    fn bind<'a>(&'a self, input: &'a Storage, _results: &'a Accumulated) -> Result<Self::Bound<'a>> {
        Ok(BoundStandardAv {
            r: input.value::<Vector>(QuantityId::Position)?,
            v: input.dt::<Vector>(QuantityId::Position)?,
            rho: input.value::<f64>(QuantityId::Density)?,
            cs: input.value::<f64>(QuantityId::SoundSpeed)?,
            alpha: self.alpha,
            beta: self.beta,
        })
    }
}

/// Equation terms providing an artificial viscosity that the Balsara switch
/// can wrap
pub trait AvTerm: EquationTerm + Sized {
    /// The pairwise physics of the viscosity
    type Physics: AvPhysics;

    /// Builds the physics from the settings
    fn physics(&self, settings: &RunSettings) -> Result<Self::Physics>;
}

/// Standard Monaghan-Gingold artificial viscosity term
pub struct StandardAV;

impl StandardAV {
    /// Creates the term
    pub fn new() -> Self {
        StandardAV
    }
}

impl Default for StandardAV {
    fn default() -> Self {
        Self::new()
    }
}

impl EquationTerm for StandardAV {
    fn set_derivatives(&self, holder: &mut DerivativeHolder, settings: &RunSettings) -> Result<()> {
        holder.require(Box::new(AccelerationDerivative::new(
            AvAcceleration {
                physics: StandardAvPhysics::new(settings)?,
            },
            settings,
        )?))
    }

    fn initialize(&self, _scheduler: &dyn Scheduler, _storage: &mut Storage, _t: f64) -> Result<()> {
        Ok(())
    }

    fn finalize(&self, _scheduler: &dyn Scheduler, _storage: &mut Storage, _t: f64) -> Result<()> {
        Ok(())
    }

    fn create(&self, _storage: &mut Storage, _material: &mut dyn Material) -> Result<()> {
        Ok(())
    }
}

impl AvTerm for StandardAV {
    type Physics = StandardAvPhysics;

    fn physics(&self, settings: &RunSettings) -> Result<Self::Physics> {
        StandardAvPhysics::new(settings)
    }
}

/// Time-dependent artificial viscosity with per-particle coefficients
#[derive(Clone, PartialEq)]
pub struct MorrisMonaghanPhysics;

/// Bound Morris-Monaghan viscosity
pub struct BoundMorrisMonaghanAv<'a> {
    r: &'a [Vector],
    v: &'a [Vector],
    rho: &'a [f64],
    cs: &'a [f64],
    alpha: &'a [f64],
}

impl AvEval for BoundMorrisMonaghanAv<'_> {
    #[inline]
    fn eval_av(&mut self, i: usize, j: usize) -> f64 {
        let dv = self.v[i] - self.v[j];
        let dr = self.r[i] - self.r[j];
        let dvdr = dv.dot(dr);
        if dvdr >= 0.0 {
            return 0.0;
        }
        let h_bar = 0.5 * (self.r[i][H] + self.r[j][H]);
        let rho_bar = 0.5 * (self.rho[i] + self.rho[j]);
        let cs_bar = 0.5 * (self.cs[i] + self.cs[j]);
        let alpha_bar = 0.5 * (self.alpha[i] + self.alpha[j]);
        let beta_bar = 2.0 * alpha_bar;
        let mu = h_bar * dvdr / (dr.sqr_length() + 1e-2 * h_bar * h_bar);
        (-alpha_bar * cs_bar * mu + beta_bar * mu * mu) / rho_bar
    }

    #[inline]
    fn heating(&self, i: usize, j: usize, av: f64, grad: Vector) -> f64 {
        0.5 * av * (self.v[i] - self.v[j]).dot(grad)
    }
}

impl AvPhysics for MorrisMonaghanPhysics {
    type Bound<'a> = BoundMorrisMonaghanAv<'a> where Self: 'a;

    fn bind<'a>(&'a self, input: &'a Storage, _results: &'a Accumulated) -> Result<Self::Bound<'a>> {
        Ok(BoundMorrisMonaghanAv {
            r: input.value::<Vector>(QuantityId::Position)?,
            v: input.dt::<Vector>(QuantityId::Position)?,
            rho: input.value::<f64>(QuantityId::Density)?,
            cs: input.value::<f64>(QuantityId::SoundSpeed)?,
            alpha: input.value::<f64>(QuantityId::AvAlpha)?,
        })
    }
}

/// Morris-Monaghan time-dependent artificial viscosity term
pub struct MorrisMonaghanAV;

impl MorrisMonaghanAV {
    /// Decay timescale coefficient; tau = h / (eps cs)
    const EPS: f64 = 0.1;

    /// Creates the term
    pub fn new() -> Self {
        MorrisMonaghanAV
    }
}

impl Default for MorrisMonaghanAV {
    fn default() -> Self {
        Self::new()
    }
}

impl EquationTerm for MorrisMonaghanAV {
    fn set_derivatives(&self, holder: &mut DerivativeHolder, settings: &RunSettings) -> Result<()> {
        holder.require(Box::new(VelocityDivergence::new(settings)?))?;
        holder.require(Box::new(AccelerationDerivative::new(
            AvAcceleration {
                physics: MorrisMonaghanPhysics,
            },
            settings,
        )?))
    }

    fn initialize(&self, _scheduler: &dyn Scheduler, _storage: &mut Storage, _t: f64) -> Result<()> {
        Ok(())
    }

    fn finalize(&self, _scheduler: &dyn Scheduler, storage: &mut Storage, _t: f64) -> Result<()> {
        let partitions = storage.material_partitions();
        storage.with_buffer_mut::<f64, _, _>(QuantityId::AvAlpha, BufferSlot::Dt, |s, dalpha| {
            let alpha = s.value::<f64>(QuantityId::AvAlpha)?;
            let divv = s.value::<f64>(QuantityId::VelocityDivergence)?;
            let cs = s.value::<f64>(QuantityId::SoundSpeed)?;
            let r = s.value::<Vector>(QuantityId::Position)?;
            for view in &partitions {
                let material = view.material().read().expect("material lock poisoned");
                let bounds: crate::math::Interval =
                    material.params().get(BodySettingsId::AvAlphaRange)?;
                let sequence = view.sequence();
                let offset = sequence.start;
                parallel_for_each(&mut dalpha[sequence], |local, dalpha_i| {
                    let i = offset + local;
                    let tau = r[i][H] / (Self::EPS * cs[i]);
                    let decay = -(alpha[i] - bounds.lower()) / tau;
                    let source = (-(bounds.upper() - alpha[i]) * divv[i]).max(0.0);
                    *dalpha_i = decay + source;
                });
            }
            Ok(())
        })?
    }

    fn create(&self, storage: &mut Storage, material: &mut dyn Material) -> Result<()> {
        let alpha0: f64 = material.params().get(BodySettingsId::AvAlpha)?;
        storage.insert(QuantityId::AvAlpha, OrderEnum::First, alpha0)?;
        let range: crate::math::Interval = material.params().get(BodySettingsId::AvAlphaRange)?;
        material.set_range(QuantityId::AvAlpha, range, 0.0);
        storage.insert(QuantityId::VelocityDivergence, OrderEnum::Zero, 0.0_f64)?;
        Ok(())
    }
}

impl AvTerm for MorrisMonaghanAV {
    type Physics = MorrisMonaghanPhysics;

    fn physics(&self, _settings: &RunSettings) -> Result<Self::Physics> {
        Ok(MorrisMonaghanPhysics)
    }
}

/// Shear-flow factor of the Balsara switch
#[inline]
fn balsara_factor(divv: f64, rotv: Vector, cs: f64, h: f64) -> f64 {
    const EPS: f64 = 1e-4;
    let dv = divv.abs();
    let rv = rotv.length();
    dv / (dv + rv + EPS * cs / h)
}

/// Physics of a Balsara-limited artificial viscosity
#[derive(Clone, PartialEq)]
pub struct BalsaraPhysics<P: AvPhysics> {
    inner: P,
}

/// Bound Balsara-limited viscosity
pub struct BoundBalsaraAv<'a, B> {
    inner: B,
    r: &'a [Vector],
    v: &'a [Vector],
    cs: &'a [f64],
    divv: &'a [f64],
    rotv: &'a [Vector],
}

impl<B: AvEval> AvEval for BoundBalsaraAv<'_, B> {
    #[inline]
    fn eval_av(&mut self, i: usize, j: usize) -> f64 {
        let factor_i = balsara_factor(self.divv[i], self.rotv[i], self.cs[i], self.r[i][H]);
        let factor_j = balsara_factor(self.divv[j], self.rotv[j], self.cs[j], self.r[j][H]);
        // symmetrized over the pair to conserve momentum
        0.5 * (factor_i + factor_j) * self.inner.eval_av(i, j)
    }

    #[inline]
    fn heating(&self, i: usize, j: usize, av: f64, grad: Vector) -> f64 {
        let _ = (i, j);
        0.5 * av * (self.v[i] - self.v[j]).dot(grad)
    }
}

impl<P: AvPhysics> AvPhysics for BalsaraPhysics<P> {
    type Bound<'a> = BoundBalsaraAv<'a, P::Bound<'a>> where Self: 'a;

    fn bind<'a>(&'a self, input: &'a Storage, results: &'a Accumulated) -> Result<Self::Bound<'a>> {
        Ok(BoundBalsaraAv {
            inner: self.inner.bind(input, results)?,
            r: input.value::<Vector>(QuantityId::Position)?,
            v: input.dt::<Vector>(QuantityId::Position)?,
            cs: input.value::<f64>(QuantityId::SoundSpeed)?,
            divv: input.value::<f64>(QuantityId::VelocityDivergence)?,
            rotv: input.value::<Vector>(QuantityId::VelocityRotation)?,
        })
    }
}

/// Balsara switch wrapping another artificial viscosity term
pub struct BalsaraSwitch<Term: AvTerm> {
    av: Term,
    store_factor: bool,
}

impl<Term: AvTerm> BalsaraSwitch<Term> {
    /// Wraps the given viscosity term
    pub fn new(av: Term, settings: &RunSettings) -> Result<Self> {
        Ok(BalsaraSwitch {
            av,
            store_factor: settings.get(RunSettingsId::SphAvBalsaraStore)?,
        })
    }
}

impl<Term: AvTerm> EquationTerm for BalsaraSwitch<Term> {
    fn set_derivatives(&self, holder: &mut DerivativeHolder, settings: &RunSettings) -> Result<()> {
        // the gradient correction is pointless here; the velocity
        // derivatives only feed an ad-hoc limiter
        holder.require(Box::new(VelocityDivergence::new(settings)?))?;
        holder.require(Box::new(VelocityRotation::new(settings)?))?;
        holder.require(Box::new(AccelerationDerivative::new(
            AvAcceleration {
                physics: BalsaraPhysics {
                    inner: self.av.physics(settings)?,
                },
            },
            settings,
        )?))
    }

    fn initialize(&self, scheduler: &dyn Scheduler, storage: &mut Storage, t: f64) -> Result<()> {
        self.av.initialize(scheduler, storage, t)
    }

    fn finalize(&self, scheduler: &dyn Scheduler, storage: &mut Storage, t: f64) -> Result<()> {
        self.av.finalize(scheduler, storage, t)?;
        if self.store_factor {
            storage.with_buffer_mut::<f64, _, _>(
                QuantityId::AvBalsara,
                BufferSlot::Value,
                |s, factor| {
                    let divv = s.value::<f64>(QuantityId::VelocityDivergence)?;
                    let rotv = s.value::<Vector>(QuantityId::VelocityRotation)?;
                    let cs = s.value::<f64>(QuantityId::SoundSpeed)?;
                    let r = s.value::<Vector>(QuantityId::Position)?;
                    parallel_for_each(factor, |i, factor_i| {
                        *factor_i = balsara_factor(divv[i], rotv[i], cs[i], r[i][H]);
                    });
                    Ok::<(), crate::error::Error>(())
                },
            )??;
        }
        Ok(())
    }

    fn create(&self, storage: &mut Storage, material: &mut dyn Material) -> Result<()> {
        storage.insert(QuantityId::VelocityDivergence, OrderEnum::Zero, 0.0_f64)?;
        storage.insert(QuantityId::VelocityRotation, OrderEnum::Zero, Vector::zero())?;
        if self.store_factor {
            storage.insert(QuantityId::AvBalsara, OrderEnum::Zero, 0.0_f64)?;
        }
        self.av.create(storage, material)
    }
}
