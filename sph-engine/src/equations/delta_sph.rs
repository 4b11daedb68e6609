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
//! Delta-SPH diffusion
//!
//! Numerical diffusion of density and velocity smoothing out the spurious
//! high-frequency noise of weakly compressible runs; see Marrone et al.
//! (2011). The sign of the mirrored contribution in symmetric evaluation
//! is not settled in the literature for the renormalized form; it is
//! exposed as a run setting and the terms default to asymmetric
//! evaluation, where the contract is unambiguous.

use super::accumulated::{Accumulated, BufferSource};
use super::derivative::{
    resolve_flags, Derivative, DerivativeEval, DerivativeFlags, DerivativeHolder, PairFilter,
};
use super::EquationTerm;
use crate::error::Result;
use crate::math::{Vector, H};
use crate::physics::materials::Material;
use crate::quantities::{OrderEnum, QuantityId, Storage};
use crate::scheduler::Scheduler;
use crate::settings::{RunSettings, RunSettingsId};
use std::any::Any;
use std::cell::Cell;

/// Renormalized density gradient feeding the density diffusion
#[derive(Clone, PartialEq)]
struct RenormalizedDensityGradient {
    sum_only_undamaged: bool,
}

struct BoundDensityGradient<'a> {
    rho: &'a [f64],
    m: &'a [f64],
    grad_rho: &'a [Cell<Vector>],
    filter: PairFilter<'a>,
}

impl DerivativeEval for BoundDensityGradient<'_> {
    fn eval_neighs(&mut self, i: usize, neighs: &[usize], grads: &[Vector]) {
        for (&j, &grad) in neighs.iter().zip(grads) {
            if !self.filter.allows(i, j) {
                continue;
            }
            let f = grad * (self.rho[j] - self.rho[i]);
            self.grad_rho[i].set(self.grad_rho[i].get() + f * (self.m[j] / self.rho[j]));
        }
    }

    fn eval_symmetric(&mut self, i: usize, neighs: &[usize], grads: &[Vector]) {
        for (&j, &grad) in neighs.iter().zip(grads) {
            if !self.filter.allows(i, j) {
                continue;
            }
            let f = grad * (self.rho[j] - self.rho[i]);
            self.grad_rho[i].set(self.grad_rho[i].get() + f * (self.m[j] / self.rho[j]));
            self.grad_rho[j].set(self.grad_rho[j].get() + f * (self.m[i] / self.rho[i]));
        }
    }
}

impl Derivative for RenormalizedDensityGradient {
    fn create(&self, results: &mut Accumulated) -> Result<()> {
        results.insert::<Vector>(
            QuantityId::DeltaSphDensityGradient,
            OrderEnum::Zero,
            BufferSource::Unique,
        )
    }

    fn bind<'a>(
        &'a self,
        input: &'a Storage,
        results: &'a Accumulated,
    ) -> Result<Box<dyn DerivativeEval + 'a>> {
        Ok(Box::new(BoundDensityGradient {
            rho: input.value::<f64>(QuantityId::Density)?,
            m: input.value::<f64>(QuantityId::Mass)?,
            grad_rho: results
                .get_buffer::<Vector>(QuantityId::DeltaSphDensityGradient, OrderEnum::Zero)?,
            filter: PairFilter::bind(input, self.sum_only_undamaged)?,
        }))
    }

    fn equal_to(&self, other: &dyn Derivative) -> bool {
        other
            .as_any()
            .downcast_ref::<RenormalizedDensityGradient>()
            .map_or(false, |o| o == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn Derivative> {
        Box::new(self.clone())
    }
}

/// Density diffusion derivative
#[derive(Clone, PartialEq)]
struct DensityDiffusionDerivative {
    delta: f64,
    symmetrized_sign: f64,
    sum_only_undamaged: bool,
}

struct BoundDensityDiffusion<'a> {
    r: &'a [Vector],
    grad_rho: &'a [Vector],
    m: &'a [f64],
    rho: &'a [f64],
    cs: &'a [f64],
    drho: &'a [Cell<f64>],
    filter: PairFilter<'a>,
    delta: f64,
    symmetrized_sign: f64,
}

impl BoundDensityDiffusion<'_> {
    #[inline]
    fn pair_term(&self, i: usize, j: usize, grad: Vector) -> f64 {
        let dr = self.r[j] - self.r[i];
        let psi = dr * (2.0 * (self.rho[j] - self.rho[i]) / dr.sqr_length())
            - (self.grad_rho[i] + self.grad_rho[j]);
        let h_bar = 0.5 * (self.r[i][H] + self.r[j][H]);
        let cs_bar = 0.5 * (self.cs[i] + self.cs[j]);
        self.delta * h_bar * cs_bar * psi.dot(grad)
    }
}

impl DerivativeEval for BoundDensityDiffusion<'_> {
    fn eval_neighs(&mut self, i: usize, neighs: &[usize], grads: &[Vector]) {
        for (&j, &grad) in neighs.iter().zip(grads) {
            if !self.filter.allows(i, j) {
                continue;
            }
            let f = self.pair_term(i, j, grad);
            self.drho[i].set(self.drho[i].get() + self.m[j] / self.rho[j] * f);
        }
    }

    fn eval_symmetric(&mut self, i: usize, neighs: &[usize], grads: &[Vector]) {
        for (&j, &grad) in neighs.iter().zip(grads) {
            if !self.filter.allows(i, j) {
                continue;
            }
            let f = self.pair_term(i, j, grad);
            self.drho[i].set(self.drho[i].get() + self.m[j] / self.rho[j] * f);
            self.drho[j].set(
                self.drho[j].get() + self.symmetrized_sign * self.m[i] / self.rho[i] * f,
            );
        }
    }
}

impl Derivative for DensityDiffusionDerivative {
    fn create(&self, results: &mut Accumulated) -> Result<()> {
        results.insert::<f64>(QuantityId::Density, OrderEnum::First, BufferSource::Shared)
    }

    fn bind<'a>(
        &'a self,
        input: &'a Storage,
        results: &'a Accumulated,
    ) -> Result<Box<dyn DerivativeEval + 'a>> {
        Ok(Box::new(BoundDensityDiffusion {
            r: input.value::<Vector>(QuantityId::Position)?,
            grad_rho: input.value::<Vector>(QuantityId::DeltaSphDensityGradient)?,
            m: input.value::<f64>(QuantityId::Mass)?,
            rho: input.value::<f64>(QuantityId::Density)?,
            cs: input.value::<f64>(QuantityId::SoundSpeed)?,
            drho: results.get_buffer::<f64>(QuantityId::Density, OrderEnum::First)?,
            filter: PairFilter::bind(input, self.sum_only_undamaged)?,
            delta: self.delta,
            symmetrized_sign: self.symmetrized_sign,
        }))
    }

    fn equal_to(&self, other: &dyn Derivative) -> bool {
        other
            .as_any()
            .downcast_ref::<DensityDiffusionDerivative>()
            .map_or(false, |o| o == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn Derivative> {
        Box::new(self.clone())
    }
}

/// Delta-SPH density diffusion term
pub struct DensityDiffusion;

impl DensityDiffusion {
    /// Creates the term
    pub fn new() -> Self {
        DensityDiffusion
    }
}

impl Default for DensityDiffusion {
    fn default() -> Self {
        Self::new()
    }
}

impl EquationTerm for DensityDiffusion {
    fn set_derivatives(&self, holder: &mut DerivativeHolder, settings: &RunSettings) -> Result<()> {
        let flags = resolve_flags(settings, DerivativeFlags::SUM_ONLY_UNDAMAGED)?;
        let sum_only_undamaged = flags.contains(DerivativeFlags::SUM_ONLY_UNDAMAGED);
        holder.require(Box::new(RenormalizedDensityGradient { sum_only_undamaged }))?;
        holder.require(Box::new(DensityDiffusionDerivative {
            delta: settings.get(RunSettingsId::SphDensityDiffusionDelta)?,
            symmetrized_sign: settings.get(RunSettingsId::SphDeltaSphSymmetrizedSign)?,
            sum_only_undamaged,
        }))
    }

    fn initialize(&self, _scheduler: &dyn Scheduler, _storage: &mut Storage, _t: f64) -> Result<()> {
        Ok(())
    }

    fn finalize(&self, _scheduler: &dyn Scheduler, _storage: &mut Storage, _t: f64) -> Result<()> {
        Ok(())
    }

    fn create(&self, storage: &mut Storage, _material: &mut dyn Material) -> Result<()> {
        storage.insert(
            QuantityId::DeltaSphDensityGradient,
            OrderEnum::Zero,
            Vector::zero(),
        )?;
        Ok(())
    }
}

/// Velocity diffusion derivative
#[derive(Clone, PartialEq)]
struct VelocityDiffusionDerivative {
    alpha: f64,
    symmetrized_sign: f64,
    sum_only_undamaged: bool,
}

struct BoundVelocityDiffusion<'a> {
    r: &'a [Vector],
    v: &'a [Vector],
    m: &'a [f64],
    rho: &'a [f64],
    cs: &'a [f64],
    dv: &'a [Cell<Vector>],
    filter: PairFilter<'a>,
    alpha: f64,
    symmetrized_sign: f64,
}

impl BoundVelocityDiffusion<'_> {
    #[inline]
    fn pair_term(&self, i: usize, j: usize, grad: Vector) -> Vector {
        let dr = self.r[j] - self.r[i];
        let pi = (self.v[j] - self.v[i]).dot(dr) / dr.sqr_length();
        let h_bar = 0.5 * (self.r[i][H] + self.r[j][H]);
        let cs_bar = 0.5 * (self.cs[i] + self.cs[j]);
        grad * (self.alpha * h_bar * cs_bar * pi)
    }

    #[inline]
    fn add(&self, target: &Cell<Vector>, contribution: Vector) {
        // the acceleration must not disturb the evolved smoothing length
        let mut updated = target.get() + contribution;
        updated[H] = target.get()[H];
        target.set(updated);
    }
}

impl DerivativeEval for BoundVelocityDiffusion<'_> {
    fn eval_neighs(&mut self, i: usize, neighs: &[usize], grads: &[Vector]) {
        for (&j, &grad) in neighs.iter().zip(grads) {
            if !self.filter.allows(i, j) {
                continue;
            }
            let f = self.pair_term(i, j, grad);
            self.add(&self.dv[i], f * (self.m[j] / self.rho[j]));
        }
    }

    fn eval_symmetric(&mut self, i: usize, neighs: &[usize], grads: &[Vector]) {
        for (&j, &grad) in neighs.iter().zip(grads) {
            if !self.filter.allows(i, j) {
                continue;
            }
            let f = self.pair_term(i, j, grad);
            self.add(&self.dv[i], f * (self.m[j] / self.rho[j]));
            self.add(
                &self.dv[j],
                f * (-self.symmetrized_sign * self.m[i] / self.rho[i]),
            );
        }
    }
}

impl Derivative for VelocityDiffusionDerivative {
    fn create(&self, results: &mut Accumulated) -> Result<()> {
        results.insert::<Vector>(QuantityId::Position, OrderEnum::Second, BufferSource::Shared)
    }

    fn bind<'a>(
        &'a self,
        input: &'a Storage,
        results: &'a Accumulated,
    ) -> Result<Box<dyn DerivativeEval + 'a>> {
        Ok(Box::new(BoundVelocityDiffusion {
            r: input.value::<Vector>(QuantityId::Position)?,
            v: input.dt::<Vector>(QuantityId::Position)?,
            m: input.value::<f64>(QuantityId::Mass)?,
            rho: input.value::<f64>(QuantityId::Density)?,
            cs: input.value::<f64>(QuantityId::SoundSpeed)?,
            dv: results.get_buffer::<Vector>(QuantityId::Position, OrderEnum::Second)?,
            filter: PairFilter::bind(input, self.sum_only_undamaged)?,
            alpha: self.alpha,
            symmetrized_sign: self.symmetrized_sign,
        }))
    }

    fn equal_to(&self, other: &dyn Derivative) -> bool {
        other
            .as_any()
            .downcast_ref::<VelocityDiffusionDerivative>()
            .map_or(false, |o| o == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn Derivative> {
        Box::new(self.clone())
    }
}

/// Delta-SPH velocity diffusion term
pub struct VelocityDiffusion;

impl VelocityDiffusion {
    /// Creates the term
    pub fn new() -> Self {
        VelocityDiffusion
    }
}

impl Default for VelocityDiffusion {
    fn default() -> Self {
        Self::new()
    }
}

impl EquationTerm for VelocityDiffusion {
    fn set_derivatives(&self, holder: &mut DerivativeHolder, settings: &RunSettings) -> Result<()> {
        let flags = resolve_flags(settings, DerivativeFlags::SUM_ONLY_UNDAMAGED)?;
        holder.require(Box::new(VelocityDiffusionDerivative {
            alpha: settings.get(RunSettingsId::SphVelocityDiffusionAlpha)?,
            symmetrized_sign: settings.get(RunSettingsId::SphDeltaSphSymmetrizedSign)?,
            sum_only_undamaged: flags.contains(DerivativeFlags::SUM_ONLY_UNDAMAGED),
        }))
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

#[cfg(test)]
mod tests {
    use super::*;

    fn diffusion_storage(rho0: f64, rho1: f64) -> Storage {
        let mut storage = Storage::new();
        storage
            .insert_values(
                QuantityId::Position,
                OrderEnum::Second,
                vec![
                    Vector::with_h(0.0, 0.0, 0.0, 1.0),
                    Vector::with_h(1.0, 0.0, 0.0, 1.0),
                ],
            )
            .unwrap();
        storage.insert(QuantityId::Mass, OrderEnum::Zero, 1.0_f64).unwrap();
        storage
            .insert_values(QuantityId::Density, OrderEnum::First, vec![rho0, rho1])
            .unwrap();
        storage
            .insert(QuantityId::SoundSpeed, OrderEnum::Zero, 10.0_f64)
            .unwrap();
        storage
            .insert(
                QuantityId::DeltaSphDensityGradient,
                OrderEnum::Zero,
                Vector::zero(),
            )
            .unwrap();
        storage
    }

    #[test]
    fn test_density_diffusion_smooths_contrast() {
        let settings = RunSettings::new();
        let term = DensityDiffusion::new();
        let mut holder = DerivativeHolder::new();
        term.set_derivatives(&mut holder, &settings).unwrap();
        assert_eq!(holder.len(), 2);
        holder.initialize(2);

        let storage = diffusion_storage(2.0, 1.0);
        let kernel =
            crate::kernel::SymmetrizeSmoothingLengths::new(crate::kernel::CubicSpline::<3>::new());
        let r = storage.value::<Vector>(QuantityId::Position).unwrap().to_vec();
        let grads = vec![kernel.grad(r[0], r[1])];
        let mut evals = holder.bind_all(&storage).unwrap();
        for eval in &mut evals {
            eval.eval_neighs(0, &[1], &grads);
        }
        drop(evals);

        let mut out = diffusion_storage(2.0, 1.0);
        holder.accumulated().store_into(&mut out).unwrap();
        let drho = out.dt::<f64>(QuantityId::Density).unwrap();
        // the dense particle diffuses density away
        assert!(drho[0] < 0.0, "drho = {:?}", drho);
    }

    #[test]
    fn test_velocity_diffusion_preserves_smoothing_rate() {
        let settings = RunSettings::new();
        let term = VelocityDiffusion::new();
        let mut holder = DerivativeHolder::new();
        term.set_derivatives(&mut holder, &settings).unwrap();
        holder.initialize(2);

        let mut storage = diffusion_storage(1.0, 1.0);
        let v = storage.dt_mut::<Vector>(QuantityId::Position).unwrap();
        v[0] = Vector::new(1.0, 0.0, 0.0);
        v[1] = Vector::new(-1.0, 0.0, 0.0);

        let kernel =
            crate::kernel::SymmetrizeSmoothingLengths::new(crate::kernel::CubicSpline::<3>::new());
        let r = storage.value::<Vector>(QuantityId::Position).unwrap().to_vec();
        let grads = vec![kernel.grad(r[0], r[1])];
        let mut evals = holder.bind_all(&storage).unwrap();
        // seed the dh lane to verify it survives the update
        holder
            .accumulated()
            .get_buffer::<Vector>(QuantityId::Position, OrderEnum::Second)
            .unwrap()[0]
            .set(Vector::with_h(0.0, 0.0, 0.0, 0.25));
        for eval in &mut evals {
            eval.eval_neighs(0, &[1], &grads);
        }
        drop(evals);

        let dv = holder
            .accumulated()
            .get_buffer::<Vector>(QuantityId::Position, OrderEnum::Second)
            .unwrap();
        assert_eq!(dv[0].get()[H], 0.25);
        assert!(dv[0].get().x != 0.0);
    }
}
