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
//! Momentum equation terms
//!
//! [`PressureForce`] evaluates the pressure-gradient acceleration and
//! integrates internal energy from the velocity divergence;
//! [`SolidStressForce`] adds the divergence of the deviatoric stress and
//! evolves the stress by Hooke's law from the velocity gradient. Both
//! support the standard and the Benz-Asphaug discretizations.

use super::accumulated::Accumulated;
use super::derivative::{
    AccelerationDerivative, BoundAcceleration, DerivativeFlags, DerivativeHolder, PairAcceleration,
};
use super::velocity::{CorrectionTensor, VelocityDivergence, VelocityGradient};
use super::EquationTerm;
use crate::error::{Error, Result};
use crate::math::{SymmetricTensor, TracelessTensor, Vector};
use crate::physics::materials::Material;
use crate::quantities::{BufferSlot, OrderEnum, QuantityId, Storage};
use crate::scheduler::{parallel_for_each, parallel_for_each_zip, Scheduler};
use crate::settings::{
    BodySettingsId, DiscretizationEnum, RunSettings, RunSettingsId, YieldingEnum,
};

/// Pressure-term discretization shared by the force derivatives
#[inline]
fn discretize(
    discretization: DiscretizationEnum,
    vi: f64,
    vj: f64,
    rho_i: f64,
    rho_j: f64,
) -> f64 {
    match discretization {
        DiscretizationEnum::Standard => vi / (rho_i * rho_i) + vj / (rho_j * rho_j),
        DiscretizationEnum::BenzAsphaug => (vi + vj) / (rho_i * rho_j),
    }
}

#[inline]
fn discretize_stress(
    discretization: DiscretizationEnum,
    si: TracelessTensor,
    sj: TracelessTensor,
    rho_i: f64,
    rho_j: f64,
) -> TracelessTensor {
    match discretization {
        DiscretizationEnum::Standard => si * (1.0 / (rho_i * rho_i)) + sj * (1.0 / (rho_j * rho_j)),
        DiscretizationEnum::BenzAsphaug => (si + sj) * (1.0 / (rho_i * rho_j)),
    }
}

/// Acceleration from the pressure gradient
#[derive(Clone, PartialEq)]
struct PressureGradient {
    discretization: DiscretizationEnum,
}

struct BoundPressureGradient<'a> {
    p: &'a [f64],
    rho: &'a [f64],
    discretization: DiscretizationEnum,
}

impl BoundAcceleration for BoundPressureGradient<'_> {
    #[inline]
    fn eval(&mut self, i: usize, j: usize, grad: Vector) -> (Vector, f64) {
        let f = grad
            * discretize(
                self.discretization,
                self.p[i],
                self.p[j],
                self.rho[i],
                self.rho[j],
            );
        (-f, 0.0)
    }
}

impl PairAcceleration for PressureGradient {
    type Bound<'a> = BoundPressureGradient<'a> where Self: 'a;

    fn bind<'a>(&'a self, input: &'a Storage, _results: &'a Accumulated) -> Result<Self::Bound<'a>> {
        Ok(BoundPressureGradient {
            p: input.value::<f64>(QuantityId::Pressure)?,
            rho: input.value::<f64>(QuantityId::Density)?,
            discretization: self.discretization,
        })
    }
}

/// Acceleration from the divergence of the deviatoric stress
#[derive(Clone, PartialEq)]
struct StressDivergence {
    discretization: DiscretizationEnum,
}

struct BoundStressDivergence<'a> {
    s: &'a [TracelessTensor],
    rho: &'a [f64],
    discretization: DiscretizationEnum,
}

impl BoundAcceleration for BoundStressDivergence<'_> {
    #[inline]
    fn eval(&mut self, i: usize, j: usize, grad: Vector) -> (Vector, f64) {
        let f = discretize_stress(
            self.discretization,
            self.s[i],
            self.s[j],
            self.rho[i],
            self.rho[j],
        ) * grad;
        (f, 0.0)
    }
}

impl PairAcceleration for StressDivergence {
    type Bound<'a> = BoundStressDivergence<'a> where Self: 'a;

    fn sum_only_undamaged(&self) -> bool {
        true
    }

    fn bind<'a>(&'a self, input: &'a Storage, _results: &'a Accumulated) -> Result<Self::Bound<'a>> {
        Ok(BoundStressDivergence {
            s: input.value::<TracelessTensor>(QuantityId::DeviatoricStress)?,
            rho: input.value::<f64>(QuantityId::Density)?,
            discretization: self.discretization,
        })
    }
}

/// Pressure gradient force and energy equation
///
/// The acceleration is accumulated pairwise; the energy derivative is
/// closed in finalize as du = -p / rho div v.
pub struct PressureForce;

impl PressureForce {
    /// Creates the term
    pub fn new() -> Self {
        PressureForce
    }
}

impl Default for PressureForce {
    fn default() -> Self {
        Self::new()
    }
}

impl EquationTerm for PressureForce {
    fn set_derivatives(&self, holder: &mut DerivativeHolder, settings: &RunSettings) -> Result<()> {
        let discretization: DiscretizationEnum = settings.get(RunSettingsId::SphDiscretization)?;
        holder.require(Box::new(VelocityDivergence::new(settings)?))?;
        holder.require(Box::new(AccelerationDerivative::new(
            PressureGradient { discretization },
            settings,
        )?))
    }

    fn initialize(&self, _scheduler: &dyn Scheduler, _storage: &mut Storage, _t: f64) -> Result<()> {
        Ok(())
    }

    fn finalize(&self, _scheduler: &dyn Scheduler, storage: &mut Storage, _t: f64) -> Result<()> {
        storage.with_buffer_mut::<f64, _, _>(QuantityId::Energy, BufferSlot::Dt, |s, du| {
            let p = s.value::<f64>(QuantityId::Pressure)?;
            let rho = s.value::<f64>(QuantityId::Density)?;
            let divv = s.value::<f64>(QuantityId::VelocityDivergence)?;
            parallel_for_each(du, |i, du_i| {
                *du_i -= p[i] / rho[i] * divv[i];
            });
            Ok(())
        })?
    }

    fn create(&self, storage: &mut Storage, material: &mut dyn Material) -> Result<()> {
        if material.eos().is_none() {
            return Err(Error::InvalidSetup(
                "PressureForce needs to be used with a material carrying an equation of state"
                    .into(),
            ));
        }
        let u0: f64 = material.params().get(BodySettingsId::Energy)?;
        storage.insert(QuantityId::Energy, OrderEnum::First, u0)?;
        let range = material.params().get(BodySettingsId::EnergyRange)?;
        let minimal: f64 = material.params().get(BodySettingsId::EnergyMin)?;
        material.set_range(QuantityId::Energy, range, minimal);
        // the divergence must live in the storage so the accumulator can be
        // merged into it
        storage.insert(QuantityId::VelocityDivergence, OrderEnum::Zero, 0.0_f64)?;
        Ok(())
    }
}

/// Deviatoric stress force and Hooke's law
pub struct SolidStressForce {
    use_correction_tensor: bool,
}

impl SolidStressForce {
    /// Creates the term; the correction tensor is attached when enabled in
    /// the settings
    pub fn new(settings: &RunSettings) -> Result<Self> {
        Ok(SolidStressForce {
            use_correction_tensor: settings.get(RunSettingsId::SphStrainRateCorrectionTensor)?,
        })
    }
}

impl EquationTerm for SolidStressForce {
    fn set_derivatives(&self, holder: &mut DerivativeHolder, settings: &RunSettings) -> Result<()> {
        holder.require(Box::new(VelocityGradient::with_flags(
            settings,
            DerivativeFlags::CORRECTED | DerivativeFlags::SUM_ONLY_UNDAMAGED,
        )?))?;
        if self.use_correction_tensor {
            holder.require(Box::new(CorrectionTensor::new(settings)?))?;
        }
        let discretization: DiscretizationEnum = settings.get(RunSettingsId::SphDiscretization)?;
        holder.require(Box::new(AccelerationDerivative::new(
            StressDivergence { discretization },
            settings,
        )?))
    }

    fn initialize(&self, _scheduler: &dyn Scheduler, _storage: &mut Storage, _t: f64) -> Result<()> {
        Ok(())
    }

    fn finalize(&self, _scheduler: &dyn Scheduler, storage: &mut Storage, _t: f64) -> Result<()> {
        let partitions = storage.material_partitions();
        storage.with_buffers_mut2::<f64, TracelessTensor, _, _>(
            (QuantityId::Energy, BufferSlot::Dt),
            (QuantityId::DeviatoricStress, BufferSlot::Dt),
            |s, du, ds| {
                let rho = s.value::<f64>(QuantityId::Density)?;
                let stress = s.value::<TracelessTensor>(QuantityId::DeviatoricStress)?;
                let gradv = s.value::<SymmetricTensor>(QuantityId::VelocityGradient)?;
                for view in &partitions {
                    let material = view.material().read().expect("material lock poisoned");
                    let yielding: YieldingEnum =
                        material.params().get(BodySettingsId::RheologyYielding)?;
                    if yielding == YieldingEnum::None {
                        // no rheology, the stress tensor is not integrated
                        continue;
                    }
                    let mu: f64 = material.params().get(BodySettingsId::ShearModulus)?;
                    let sequence = view.sequence();
                    let offset = sequence.start;
                    parallel_for_each_zip(
                        &mut du[sequence.clone()],
                        &mut ds[sequence],
                        |local, du_i, ds_i| {
                            let i = offset + local;
                            *du_i += stress[i].ddot(gradv[i]) / rho[i];
                            // Hooke's law
                            let dev = TracelessTensor::from_symmetric(gradv[i]);
                            *ds_i += dev * (2.0 * mu);
                        },
                    );
                }
                Ok(())
            },
        )?
    }

    fn create(&self, storage: &mut Storage, material: &mut dyn Material) -> Result<()> {
        storage.insert(
            QuantityId::DeviatoricStress,
            OrderEnum::First,
            TracelessTensor::null(),
        )?;
        let s_min: f64 = material.params().get(BodySettingsId::StressTensorMin)?;
        material.set_range(
            QuantityId::DeviatoricStress,
            crate::math::Interval::unbounded(),
            s_min,
        );
        storage.insert(
            QuantityId::VelocityGradient,
            OrderEnum::Zero,
            SymmetricTensor::null(),
        )?;
        if self.use_correction_tensor {
            storage.insert(
                QuantityId::StrainRateCorrectionTensor,
                OrderEnum::Zero,
                SymmetricTensor::identity(),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::materials::{EosMaterial, MaterialInitialContext, NullMaterial};
    use crate::settings::EosEnum;

    #[test]
    fn test_pressure_force_requires_eos() {
        let mut storage = Storage::new();
        storage
            .insert_values(QuantityId::Mass, OrderEnum::Zero, vec![1.0; 2])
            .unwrap();
        let mut material = NullMaterial::new();
        assert!(PressureForce::new()
            .create(&mut storage, &mut material)
            .is_err());

        let params = crate::settings::BodySettings::new().with(BodySettingsId::Eos, EosEnum::IdealGas);
        let mut eos_material = EosMaterial::new(params).unwrap();
        eos_material
            .create(&mut storage, &MaterialInitialContext::default())
            .unwrap();
        PressureForce::new()
            .create(&mut storage, &mut eos_material)
            .unwrap();
        assert!(storage.has(QuantityId::Energy));
        assert!(storage.has(QuantityId::VelocityDivergence));
        assert_eq!(eos_material.range(QuantityId::Energy).lower(), 0.0);
    }

    #[test]
    fn test_pressure_discretizations() {
        // both forms agree for equal densities
        let standard = discretize(DiscretizationEnum::Standard, 2.0, 3.0, 1.0, 1.0);
        let benz = discretize(DiscretizationEnum::BenzAsphaug, 2.0, 3.0, 1.0, 1.0);
        assert_eq!(standard, 5.0);
        assert_eq!(benz, 5.0);
        // and differ for unequal ones
        let standard = discretize(DiscretizationEnum::Standard, 2.0, 3.0, 1.0, 2.0);
        let benz = discretize(DiscretizationEnum::BenzAsphaug, 2.0, 3.0, 1.0, 2.0);
        assert!((standard - 2.75).abs() < 1e-12);
        assert!((benz - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_pressure_finalize_integrates_energy() {
        let settings = RunSettings::new();
        let _ = &settings;
        let mut storage = Storage::new();
        storage
            .insert_values(QuantityId::Energy, OrderEnum::First, vec![1.0; 3])
            .unwrap();
        storage
            .insert(QuantityId::Pressure, OrderEnum::Zero, 4.0_f64)
            .unwrap();
        storage
            .insert(QuantityId::Density, OrderEnum::First, 2.0_f64)
            .unwrap();
        storage
            .insert(QuantityId::VelocityDivergence, OrderEnum::Zero, 0.5_f64)
            .unwrap();
        PressureForce::new()
            .finalize(&crate::scheduler::SequentialScheduler, &mut storage, 0.0)
            .unwrap();
        // du = -p / rho div v = -4 / 2 * 0.5 = -1
        assert_eq!(storage.dt::<f64>(QuantityId::Energy).unwrap(), &[-1.0; 3]);
    }

    #[test]
    fn test_hooke_law_in_finalize() {
        let settings = RunSettings::new();
        // single material storage with a pure shear velocity gradient
        let material = std::sync::Arc::new(std::sync::RwLock::new(NullMaterial::with_params(
            crate::settings::BodySettings::new()
                .with(BodySettingsId::RheologyYielding, YieldingEnum::VonMises)
                .with(BodySettingsId::ShearModulus, 10.0),
        )));
        let mut storage = Storage::with_material(material);
        storage
            .insert_values(QuantityId::Energy, OrderEnum::First, vec![0.0; 2])
            .unwrap();
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
        let shear = SymmetricTensor::new(Vector::zero(), Vector::new(0.5, 0.0, 0.0));
        storage
            .insert(QuantityId::VelocityGradient, OrderEnum::Zero, shear)
            .unwrap();

        let term = SolidStressForce::new(&settings).unwrap();
        term.finalize(&crate::scheduler::SequentialScheduler, &mut storage, 0.0)
            .unwrap();
        let ds = storage.dt::<TracelessTensor>(QuantityId::DeviatoricStress).unwrap();
        // ds = 2 mu dev(grad v); the shear component survives
        assert_eq!(ds[0].xy, 2.0 * 10.0 * 0.5);
        assert_eq!(ds[0].xx, 0.0);
    }
}
