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
//! Artificial stress
//!
//! Suppresses the tensile instability of SPH solids by adding a repulsive
//! term along the tensile principal directions of the total stress tensor,
//! weighted by a power of the kernel value relative to its value at the
//! mean interparticle spacing; see Monaghan (2000) and Gray, Monaghan &
//! Swift (2001).

use super::accumulated::Accumulated;
use super::derivative::{
    AccelerationDerivative, BoundAcceleration, DerivativeHolder, PairAcceleration,
};
use super::EquationTerm;
use crate::error::Result;
use crate::kernel::{create_kernel, LutKernel, SphKernel, SymmetrizeSmoothingLengths};
use crate::math::{SymmetricTensor, TracelessTensor, Vector, H};
use crate::physics::materials::Material;
use crate::quantities::{BufferSlot, OrderEnum, QuantityId, Storage};
use crate::scheduler::{parallel_for_each, Scheduler};
use crate::settings::{DiscretizationEnum, RunSettings, RunSettingsId};
use std::sync::Arc;

#[derive(Clone)]
struct StressAvPhysics {
    kernel: Arc<SymmetrizeSmoothingLengths<LutKernel<3>>>,
    exponent: f64,
    factor: f64,
    discretization: DiscretizationEnum,
}

impl PartialEq for StressAvPhysics {
    fn eq(&self, other: &Self) -> bool {
        // the kernel is determined by the same settings as the parameters
        self.exponent == other.exponent
            && self.factor == other.factor
            && self.discretization == other.discretization
    }
}

struct BoundStressAv<'a> {
    physics: &'a StressAvPhysics,
    wp: &'a [f64],
    stress: &'a [SymmetricTensor],
    rho: &'a [f64],
    r: &'a [Vector],
    v: &'a [Vector],
}

impl BoundAcceleration for BoundStressAv<'_> {
    #[inline]
    fn eval(&mut self, i: usize, j: usize, grad: Vector) -> (Vector, f64) {
        let w = self.physics.kernel.value(self.r[i], self.r[j]);
        // weighting function grows as particles approach each other
        let phi = self.physics.factor * (w / self.wp[i]).powf(self.physics.exponent);
        let pi = match self.physics.discretization {
            DiscretizationEnum::Standard => {
                self.stress[i] * (phi / (self.rho[i] * self.rho[i]))
                    + self.stress[j] * (phi / (self.rho[j] * self.rho[j]))
            }
            DiscretizationEnum::BenzAsphaug => {
                (self.stress[i] + self.stress[j]) * (phi / (self.rho[i] * self.rho[j]))
            }
        };
        let f = pi * grad;
        let heating = 0.5 * (pi * (self.v[i] - self.v[j])).dot(grad);
        (f, heating)
    }
}

impl PairAcceleration for StressAvPhysics {
    type Bound<'a> = BoundStressAv<'a> where Self: 'a;

    fn sum_only_undamaged(&self) -> bool {
        true
    }

    fn bind<'a>(&'a self, input: &'a Storage, _results: &'a Accumulated) -> Result<Self::Bound<'a>> {
        Ok(BoundStressAv {
            physics: self,
            wp: input.value::<f64>(QuantityId::InterparticleSpacingKernel)?,
            stress: input.value::<SymmetricTensor>(QuantityId::AvStress)?,
            rho: input.value::<f64>(QuantityId::Density)?,
            r: input.value::<Vector>(QuantityId::Position)?,
            v: input.dt::<Vector>(QuantityId::Position)?,
        })
    }
}

/// Artificial stress suppressing the tensile instability
pub struct StressAV {
    kernel: Arc<SymmetrizeSmoothingLengths<LutKernel<3>>>,
}

impl StressAV {
    /// Creates the term with the kernel selected by the settings
    pub fn new(settings: &RunSettings) -> Result<Self> {
        Ok(StressAV {
            kernel: Arc::new(SymmetrizeSmoothingLengths::new(create_kernel::<3>(settings)?)),
        })
    }
}

impl EquationTerm for StressAV {
    fn set_derivatives(&self, holder: &mut DerivativeHolder, settings: &RunSettings) -> Result<()> {
        holder.require(Box::new(AccelerationDerivative::new(
            StressAvPhysics {
                kernel: self.kernel.clone(),
                exponent: settings.get(RunSettingsId::SphAvStressExponent)?,
                factor: settings.get(RunSettingsId::SphAvStressFactor)?,
                discretization: settings.get(RunSettingsId::SphDiscretization)?,
            },
            settings,
        )?))
    }

    fn initialize(&self, _scheduler: &dyn Scheduler, storage: &mut Storage, _t: f64) -> Result<()> {
        // build the artificial stress from the tensile principal components
        // of the total stress
        storage.with_buffer_mut::<SymmetricTensor, _, _>(
            QuantityId::AvStress,
            BufferSlot::Value,
            |s, av_stress| {
                let deviatoric = s.value::<TracelessTensor>(QuantityId::DeviatoricStress)?;
                let p = s.value::<f64>(QuantityId::Pressure)?;
                parallel_for_each(av_stress, |i, as_i| {
                    let sigma =
                        deviatoric[i].to_symmetric() - SymmetricTensor::identity() * p[i];
                    let eigen = sigma.eigen_decomposition();
                    // only positive (tensile) principal stresses are countered
                    let repulsive = Vector::new(
                        -eigen.values.x.max(0.0),
                        -eigen.values.y.max(0.0),
                        -eigen.values.z.max(0.0),
                    );
                    *as_i = SymmetricTensor::from_eigen(repulsive, &eigen.vectors);
                });
                Ok(())
            },
        )?
    }

    fn finalize(&self, _scheduler: &dyn Scheduler, _storage: &mut Storage, _t: f64) -> Result<()> {
        Ok(())
    }

    fn create(&self, storage: &mut Storage, _material: &mut dyn Material) -> Result<()> {
        // the kernel value at the mean interparticle spacing, here assumed
        // equal to the smoothing length
        let wp: Vec<f64> = {
            let r = storage.value::<Vector>(QuantityId::Position)?;
            r.iter()
                .map(|pos| {
                    // evaluate the kernel at a separation of one smoothing
                    // length from the particle
                    let shifted = Vector::with_h(pos.x + pos[H], pos.y, pos.z, pos[H]);
                    self.kernel.value(shifted, *pos)
                })
                .collect()
        };
        storage.insert_values(QuantityId::InterparticleSpacingKernel, OrderEnum::Zero, wp)?;
        storage.insert(
            QuantityId::AvStress,
            OrderEnum::Zero,
            SymmetricTensor::null(),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::materials::NullMaterial;
    use crate::scheduler::SequentialScheduler;

    fn stress_storage() -> Storage {
        let mut storage = Storage::new();
        storage
            .insert_values(
                QuantityId::Position,
                OrderEnum::Second,
                vec![Vector::with_h(0.0, 0.0, 0.0, 1.0); 2],
            )
            .unwrap();
        storage.insert(QuantityId::Mass, OrderEnum::Zero, 1.0_f64).unwrap();
        storage
            .insert(QuantityId::Density, OrderEnum::First, 1.0_f64)
            .unwrap();
        storage
            .insert(
                QuantityId::DeviatoricStress,
                OrderEnum::First,
                TracelessTensor::null(),
            )
            .unwrap();
        storage
            .insert(QuantityId::Pressure, OrderEnum::Zero, 0.0_f64)
            .unwrap();
        storage
    }

    #[test]
    fn test_artificial_stress_counters_tension_only() {
        let settings = RunSettings::new();
        let term = StressAV::new(&settings).unwrap();
        let mut storage = stress_storage();
        let mut material = NullMaterial::new();
        term.create(&mut storage, &mut material).unwrap();

        // tensile (negative) pressure produces a repulsive artificial stress
        storage.value_mut::<f64>(QuantityId::Pressure).unwrap().fill(-1e5);
        term.initialize(&SequentialScheduler, &mut storage, 0.0).unwrap();
        let av = storage.value::<SymmetricTensor>(QuantityId::AvStress).unwrap();
        assert!(av[0].diag.x < 0.0);

        // compression leaves it zero
        storage.value_mut::<f64>(QuantityId::Pressure).unwrap().fill(1e5);
        term.initialize(&SequentialScheduler, &mut storage, 0.0).unwrap();
        let av = storage.value::<SymmetricTensor>(QuantityId::AvStress).unwrap();
        assert_eq!(av[0], SymmetricTensor::null());
    }

    #[test]
    fn test_spacing_kernel_positive() {
        let settings = RunSettings::new();
        let term = StressAV::new(&settings).unwrap();
        let mut storage = stress_storage();
        let mut material = NullMaterial::new();
        term.create(&mut storage, &mut material).unwrap();
        let wp = storage
            .value::<f64>(QuantityId::InterparticleSpacingKernel)
            .unwrap();
        assert!(wp.iter().all(|&w| w > 0.0));
    }
}
