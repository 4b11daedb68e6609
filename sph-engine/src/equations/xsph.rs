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
//! XSPH velocity correction
//!
//! Partially averages particle velocities over their neighborhood, keeping
//! the particle field ordered in the absence of viscosity; see Monaghan
//! (1992). The correction is applied as a velocity shift before the
//! derivatives are evaluated and reverted afterwards, so the evolved
//! velocities stay untouched.

use super::accumulated::{Accumulated, BufferSource};
use super::derivative::{Derivative, DerivativeEval, DerivativeHolder, PairFilter};
use super::EquationTerm;
use crate::error::Result;
use crate::kernel::{create_kernel, LutKernel, SymmetrizeSmoothingLengths};
use crate::math::Vector;
use crate::physics::materials::Material;
use crate::quantities::{BufferSlot, OrderEnum, QuantityId, Storage};
use crate::scheduler::{parallel_for_each, Scheduler};
use crate::settings::{RunSettings, RunSettingsId};
use std::any::Any;
use std::cell::Cell;
use std::sync::Arc;

#[derive(Clone)]
struct XSphDerivative {
    kernel: Arc<SymmetrizeSmoothingLengths<LutKernel<3>>>,
    epsilon: f64,
}

struct BoundXSph<'a> {
    kernel: &'a SymmetrizeSmoothingLengths<LutKernel<3>>,
    r: &'a [Vector],
    v: &'a [Vector],
    rho: &'a [f64],
    m: &'a [f64],
    dr: &'a [Cell<Vector>],
    filter: PairFilter<'a>,
    epsilon: f64,
}

impl DerivativeEval for BoundXSph<'_> {
    fn eval_neighs(&mut self, i: usize, neighs: &[usize], grads: &[Vector]) {
        for &j in neighs {
            if !self.filter.allows(i, j) {
                continue;
            }
            // depends on v_j - v_i, so the self-contribution vanishes
            let f = (self.v[j] - self.v[i])
                * (self.epsilon / (0.5 * (self.rho[i] + self.rho[j]))
                    * self.kernel.value(self.r[i], self.r[j]));
            self.dr[i].set(self.dr[i].get() + f * self.m[j]);
        }
        let _ = grads;
    }

    fn eval_symmetric(&mut self, i: usize, neighs: &[usize], grads: &[Vector]) {
        for &j in neighs {
            if !self.filter.allows(i, j) {
                continue;
            }
            let f = (self.v[j] - self.v[i])
                * (self.epsilon / (0.5 * (self.rho[i] + self.rho[j]))
                    * self.kernel.value(self.r[i], self.r[j]));
            self.dr[i].set(self.dr[i].get() + f * self.m[j]);
            self.dr[j].set(self.dr[j].get() - f * self.m[i]);
        }
        let _ = grads;
    }
}

impl Derivative for XSphDerivative {
    fn create(&self, results: &mut Accumulated) -> Result<()> {
        results.insert::<Vector>(
            QuantityId::XsphVelocities,
            OrderEnum::Zero,
            BufferSource::Unique,
        )
    }

    fn bind<'a>(
        &'a self,
        input: &'a Storage,
        results: &'a Accumulated,
    ) -> Result<Box<dyn DerivativeEval + 'a>> {
        Ok(Box::new(BoundXSph {
            kernel: &self.kernel,
            r: input.value::<Vector>(QuantityId::Position)?,
            v: input.dt::<Vector>(QuantityId::Position)?,
            rho: input.value::<f64>(QuantityId::Density)?,
            m: input.value::<f64>(QuantityId::Mass)?,
            dr: results.get_buffer::<Vector>(QuantityId::XsphVelocities, OrderEnum::Zero)?,
            filter: PairFilter::bind(input, false)?,
            epsilon: self.epsilon,
        }))
    }

    fn equal_to(&self, other: &dyn Derivative) -> bool {
        other
            .as_any()
            .downcast_ref::<XSphDerivative>()
            .map_or(false, |o| o.epsilon == self.epsilon)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn Derivative> {
        Box::new(self.clone())
    }
}

/// XSPH velocity-averaging term
pub struct XSph {
    kernel: Arc<SymmetrizeSmoothingLengths<LutKernel<3>>>,
}

impl XSph {
    /// Creates the term with the kernel selected by the settings
    pub fn new(settings: &RunSettings) -> Result<Self> {
        Ok(XSph {
            kernel: Arc::new(SymmetrizeSmoothingLengths::new(create_kernel::<3>(settings)?)),
        })
    }
}

impl EquationTerm for XSph {
    fn set_derivatives(&self, holder: &mut DerivativeHolder, settings: &RunSettings) -> Result<()> {
        holder.require(Box::new(XSphDerivative {
            kernel: self.kernel.clone(),
            epsilon: settings.get(RunSettingsId::SphXsphEpsilon)?,
        }))
    }

    fn initialize(&self, _scheduler: &dyn Scheduler, storage: &mut Storage, _t: f64) -> Result<()> {
        // revert the velocity shift of the previous step before derivatives
        // are evaluated from the physical velocities
        storage.with_buffer_mut::<Vector, _, _>(QuantityId::Position, BufferSlot::Dt, |s, v| {
            let dr = s.value::<Vector>(QuantityId::XsphVelocities)?;
            parallel_for_each(v, |i, v_i| {
                *v_i -= dr[i];
            });
            Ok(())
        })?
    }

    fn finalize(&self, _scheduler: &dyn Scheduler, storage: &mut Storage, _t: f64) -> Result<()> {
        storage.with_buffer_mut::<Vector, _, _>(QuantityId::Position, BufferSlot::Dt, |s, v| {
            let dr = s.value::<Vector>(QuantityId::XsphVelocities)?;
            parallel_for_each(v, |i, v_i| {
                *v_i += dr[i];
            });
            Ok(())
        })?
    }

    fn create(&self, storage: &mut Storage, _material: &mut dyn Material) -> Result<()> {
        storage.insert(QuantityId::XsphVelocities, OrderEnum::Zero, Vector::zero())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SequentialScheduler;

    #[test]
    fn test_velocity_shift_round_trip() {
        let settings = RunSettings::new();
        let term = XSph::new(&settings).unwrap();
        let mut storage = Storage::new();
        storage
            .insert_values(
                QuantityId::Position,
                OrderEnum::Second,
                vec![Vector::with_h(0.0, 0.0, 0.0, 1.0); 2],
            )
            .unwrap();
        storage.dt_mut::<Vector>(QuantityId::Position).unwrap()[0] = Vector::new(1.0, 0.0, 0.0);
        storage
            .insert_values(
                QuantityId::XsphVelocities,
                OrderEnum::Zero,
                vec![Vector::new(0.25, 0.0, 0.0), Vector::zero()],
            )
            .unwrap();

        term.initialize(&SequentialScheduler, &mut storage, 0.0).unwrap();
        assert_eq!(
            storage.dt::<Vector>(QuantityId::Position).unwrap()[0].x,
            0.75
        );
        term.finalize(&SequentialScheduler, &mut storage, 0.0).unwrap();
        assert_eq!(storage.dt::<Vector>(QuantityId::Position).unwrap()[0].x, 1.0);
    }

    #[test]
    fn test_correction_averages_toward_neighbors() {
        let settings = RunSettings::new();
        let term = XSph::new(&settings).unwrap();
        let mut storage = Storage::new();
        storage
            .insert_values(
                QuantityId::Position,
                OrderEnum::Second,
                vec![
                    Vector::with_h(0.0, 0.0, 0.0, 1.0),
                    Vector::with_h(0.5, 0.0, 0.0, 1.0),
                ],
            )
            .unwrap();
        let v = storage.dt_mut::<Vector>(QuantityId::Position).unwrap();
        v[0] = Vector::new(1.0, 0.0, 0.0);
        v[1] = Vector::new(-1.0, 0.0, 0.0);
        storage.insert(QuantityId::Mass, OrderEnum::Zero, 1.0_f64).unwrap();
        storage
            .insert(QuantityId::Density, OrderEnum::First, 1.0_f64)
            .unwrap();

        let mut holder = DerivativeHolder::new();
        term.set_derivatives(&mut holder, &settings).unwrap();
        holder.initialize(2);
        let mut evals = holder.bind_all(&storage).unwrap();
        evals[0].eval_symmetric(0, &[1], &[Vector::zero()]);
        drop(evals);

        let dr = holder
            .accumulated()
            .get_buffer::<Vector>(QuantityId::XsphVelocities, OrderEnum::Zero)
            .unwrap();
        // each particle is dragged toward the other's velocity
        assert!(dr[0].get().x < 0.0);
        assert!(dr[1].get().x > 0.0);
        assert!((dr[0].get().x + dr[1].get().x).abs() < 1e-12);
    }
}
