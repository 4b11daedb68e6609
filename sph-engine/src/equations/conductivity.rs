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
//! Artificial thermal conductivity
//!
//! Transports internal energy between particles with a signal speed built
//! either from the pressure difference or from the projected velocity
//! difference; see Price (2008). The pressure-based signal speed is only
//! consistent with runs where the pressure gradient is the sole force.

use super::accumulated::{Accumulated, BufferSource};
use super::derivative::{Derivative, DerivativeEval, DerivativeHolder, PairFilter};
use super::EquationTerm;
use crate::error::{Error, Result};
use crate::math::Vector;
use crate::physics::materials::Material;
use crate::quantities::{OrderEnum, QuantityId, Storage};
use crate::scheduler::Scheduler;
use crate::settings::{ForceFlags, RunSettings, RunSettingsId, SignalSpeedEnum};
use std::any::Any;
use std::cell::Cell;

#[derive(Clone, PartialEq)]
struct ConductivityDerivative {
    alpha: f64,
    signal_speed: SignalSpeedEnum,
}

struct BoundConductivity<'a> {
    r: &'a [Vector],
    v: &'a [Vector],
    m: &'a [f64],
    rho: &'a [f64],
    u: &'a [f64],
    p: &'a [f64],
    du: &'a [Cell<f64>],
    filter: PairFilter<'a>,
    alpha: f64,
    signal_speed: SignalSpeedEnum,
}

impl BoundConductivity<'_> {
    #[inline]
    fn pair_heat(&self, i: usize, j: usize, grad: Vector) -> f64 {
        const EPS: f64 = 1e-6;
        let dr = self.r[i] - self.r[j];
        let e = dr / (dr.length() + EPS);
        let rho_bar = 0.5 * (self.rho[i] + self.rho[j]);
        let vu_sig = match self.signal_speed {
            SignalSpeedEnum::PressureDifference => {
                let sign = ((self.p[i] - self.p[j]) * (self.u[i] - self.u[j])).signum();
                sign * ((self.p[i] - self.p[j]).abs() / rho_bar).sqrt()
            }
            SignalSpeedEnum::VelocityDifference => (self.v[i] - self.v[j]).dot(e).abs(),
        };
        self.alpha * vu_sig * (self.u[i] - self.u[j]) * e.dot(grad) / rho_bar
    }
}

impl DerivativeEval for BoundConductivity<'_> {
    fn eval_neighs(&mut self, i: usize, neighs: &[usize], grads: &[Vector]) {
        for (&j, &grad) in neighs.iter().zip(grads) {
            if !self.filter.allows(i, j) {
                continue;
            }
            let heat = self.pair_heat(i, j, grad);
            self.du[i].set(self.du[i].get() + self.m[j] * heat);
        }
    }

    fn eval_symmetric(&mut self, i: usize, neighs: &[usize], grads: &[Vector]) {
        for (&j, &grad) in neighs.iter().zip(grads) {
            if !self.filter.allows(i, j) {
                continue;
            }
            let heat = self.pair_heat(i, j, grad);
            self.du[i].set(self.du[i].get() + self.m[j] * heat);
            self.du[j].set(self.du[j].get() - self.m[i] * heat);
        }
    }
}

impl Derivative for ConductivityDerivative {
    fn create(&self, results: &mut Accumulated) -> Result<()> {
        results.insert::<f64>(QuantityId::Energy, OrderEnum::First, BufferSource::Shared)
    }

    fn bind<'a>(
        &'a self,
        input: &'a Storage,
        results: &'a Accumulated,
    ) -> Result<Box<dyn DerivativeEval + 'a>> {
        Ok(Box::new(BoundConductivity {
            r: input.value::<Vector>(QuantityId::Position)?,
            v: input.dt::<Vector>(QuantityId::Position)?,
            m: input.value::<f64>(QuantityId::Mass)?,
            rho: input.value::<f64>(QuantityId::Density)?,
            u: input.value::<f64>(QuantityId::Energy)?,
            p: input.value::<f64>(QuantityId::Pressure)?,
            du: results.get_buffer::<f64>(QuantityId::Energy, OrderEnum::First)?,
            filter: PairFilter::bind(input, false)?,
            alpha: self.alpha,
            signal_speed: self.signal_speed,
        }))
    }

    fn equal_to(&self, other: &dyn Derivative) -> bool {
        other
            .as_any()
            .downcast_ref::<ConductivityDerivative>()
            .map_or(false, |o| o == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn Derivative> {
        Box::new(self.clone())
    }
}

/// Artificial conductivity equation term
pub struct ArtificialConductivity;

impl ArtificialConductivity {
    /// Creates the term, validating the signal-speed configuration
    pub fn new(settings: &RunSettings) -> Result<Self> {
        let signal_speed: SignalSpeedEnum = settings.get(RunSettingsId::SphAcSignalSpeed)?;
        let forces: ForceFlags = settings.get_flags(RunSettingsId::SphSolverForces)?;
        if signal_speed == SignalSpeedEnum::PressureDifference && forces != ForceFlags::PRESSURE {
            return Err(Error::InvalidSetup(
                "artificial conductivity with pressure-based signal speed cannot be used with \
                 forces other than the pressure gradient; use the velocity-based signal speed"
                    .into(),
            ));
        }
        Ok(ArtificialConductivity)
    }
}

impl EquationTerm for ArtificialConductivity {
    fn set_derivatives(&self, holder: &mut DerivativeHolder, settings: &RunSettings) -> Result<()> {
        holder.require(Box::new(ConductivityDerivative {
            alpha: settings.get(RunSettingsId::SphAcAlpha)?,
            signal_speed: settings.get(RunSettingsId::SphAcSignalSpeed)?,
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

    #[test]
    fn test_pressure_signal_requires_pure_pressure_forces() {
        let settings = RunSettings::new()
            .with(
                RunSettingsId::SphAcSignalSpeed,
                SignalSpeedEnum::PressureDifference,
            )
            .with(
                RunSettingsId::SphSolverForces,
                (ForceFlags::PRESSURE | ForceFlags::SOLID_STRESS).bits() as i64,
            );
        assert!(ArtificialConductivity::new(&settings).is_err());

        let settings = settings.with(
            RunSettingsId::SphSolverForces,
            ForceFlags::PRESSURE.bits() as i64,
        );
        assert!(ArtificialConductivity::new(&settings).is_ok());
    }

    #[test]
    fn test_energy_flows_from_hot_to_cold() {
        let settings = RunSettings::new();
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
        let v = storage.dt_mut::<Vector>(QuantityId::Position).unwrap();
        v[0] = Vector::new(1.0, 0.0, 0.0);
        storage.insert(QuantityId::Mass, OrderEnum::Zero, 1.0_f64).unwrap();
        storage
            .insert(QuantityId::Density, OrderEnum::First, 1.0_f64)
            .unwrap();
        storage
            .insert_values(QuantityId::Energy, OrderEnum::First, vec![10.0, 1.0])
            .unwrap();
        storage
            .insert(QuantityId::Pressure, OrderEnum::Zero, 1.0_f64)
            .unwrap();

        let term = ArtificialConductivity::new(&settings).unwrap();
        let mut holder = DerivativeHolder::new();
        term.set_derivatives(&mut holder, &settings).unwrap();
        holder.initialize(2);

        let kernel =
            crate::kernel::SymmetrizeSmoothingLengths::new(crate::kernel::CubicSpline::<3>::new());
        let r = storage.value::<Vector>(QuantityId::Position).unwrap().to_vec();
        let grads = vec![kernel.grad(r[0], r[1])];
        let mut evals = holder.bind_all(&storage).unwrap();
        evals[0].eval_symmetric(0, &[1], &grads);
        drop(evals);

        let mut out = Storage::new();
        out.insert_values(QuantityId::Energy, OrderEnum::First, vec![0.0; 2])
            .unwrap();
        holder.accumulated().store_into(&mut out).unwrap();
        let du = out.dt::<f64>(QuantityId::Energy).unwrap();
        // hot particle loses energy, cold one gains, symmetric in magnitude
        assert!(du[0] < 0.0);
        assert!(du[1] > 0.0);
        assert!((du[0] + du[1]).abs() < 1e-12);
    }
}
