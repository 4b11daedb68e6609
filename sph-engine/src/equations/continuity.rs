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
//! Continuity equation
//!
//! Closes the density evolution as drho = -rho div v. In the
//! sum-only-undamaged mode, intact particles use the trace of the corrected
//! velocity gradient instead of the plain divergence, so that density does
//! not spuriously grow across damaged interfaces.

use super::derivative::{DerivativeFlags, DerivativeHolder};
use super::velocity::{VelocityDivergence, VelocityGradient};
use super::EquationTerm;
use crate::error::{Error, Result};
use crate::kernel::{create_kernel, SphKernel};
use crate::math::{Interval, SymmetricTensor, Vector, H, LARGE};
use crate::physics::materials::Material;
use crate::quantities::{BufferSlot, OrderEnum, QuantityId, Storage};
use crate::scheduler::{parallel_for_each, Scheduler};
use crate::settings::{
    BodySettingsId, ContinuityEnum, ForceFlags, RunSettings, RunSettingsId,
};

/// Density evolution from the velocity divergence
pub struct ContinuityEquation {
    mode: ContinuityEnum,
    /// Central value of the smoothing kernel, used for the density floor
    w0: f64,
}

impl ContinuityEquation {
    /// Creates the term from the run settings
    pub fn new(settings: &RunSettings) -> Result<Self> {
        let kernel = create_kernel::<3>(settings)?;
        Ok(ContinuityEquation {
            mode: settings.get(RunSettingsId::SphContinuityMode)?,
            w0: kernel.value_impl(0.0),
        })
    }
}

impl EquationTerm for ContinuityEquation {
    fn set_derivatives(&self, holder: &mut DerivativeHolder, settings: &RunSettings) -> Result<()> {
        let forces: ForceFlags = settings.get_flags(RunSettingsId::SphSolverForces)?;
        if forces.contains(ForceFlags::SOLID_STRESS) {
            holder.require(Box::new(VelocityGradient::with_flags(
                settings,
                DerivativeFlags::CORRECTED | DerivativeFlags::SUM_ONLY_UNDAMAGED,
            )?))?;
        } else if self.mode == ContinuityEnum::SumOnlyUndamaged {
            return Err(Error::InvalidSetup(
                "this mode of the continuity equation requires the stress tensor".into(),
            ));
        }
        holder.require(Box::new(VelocityDivergence::new(settings)?))
    }

    fn initialize(&self, _scheduler: &dyn Scheduler, _storage: &mut Storage, _t: f64) -> Result<()> {
        Ok(())
    }

    fn finalize(&self, _scheduler: &dyn Scheduler, storage: &mut Storage, _t: f64) -> Result<()> {
        match self.mode {
            ContinuityEnum::Standard => {
                storage.with_buffer_mut::<f64, _, _>(QuantityId::Density, BufferSlot::Dt, |s, drho| {
                    let rho = s.value::<f64>(QuantityId::Density)?;
                    let divv = s.value::<f64>(QuantityId::VelocityDivergence)?;
                    parallel_for_each(drho, |i, drho_i| {
                        *drho_i += -rho[i] * divv[i];
                    });
                    Ok(())
                })?
            }
            ContinuityEnum::SumOnlyUndamaged => {
                storage.with_buffer_mut::<f64, _, _>(QuantityId::Density, BufferSlot::Dt, |s, drho| {
                    let rho = s.value::<f64>(QuantityId::Density)?;
                    let divv = s.value::<f64>(QuantityId::VelocityDivergence)?;
                    let reduce = s.value::<f64>(QuantityId::StressReducing)?;
                    let gradv = s.value::<SymmetricTensor>(QuantityId::VelocityGradient)?;
                    parallel_for_each(drho, |i, drho_i| {
                        if reduce[i] > 0.0 {
                            *drho_i += -rho[i] * gradv[i].trace();
                        } else {
                            *drho_i += -rho[i] * divv[i];
                        }
                    });
                    Ok(())
                })?
            }
        }
    }

    fn create(&self, storage: &mut Storage, material: &mut dyn Material) -> Result<()> {
        let rho0: f64 = material.params().get(BodySettingsId::Density)?;
        storage.insert(QuantityId::Density, OrderEnum::First, rho0)?;

        // the density floor follows from the central kernel contribution of
        // an isolated particle
        let r = storage.value::<Vector>(QuantityId::Position)?;
        let m = storage.value::<f64>(QuantityId::Mass)?;
        let mut rho_limit = LARGE;
        for i in 0..r.len() {
            rho_limit = rho_limit.min(m[i] * self.w0 / (r[i][H] * r[i][H] * r[i][H]));
        }
        let range: Interval = material.params().get(BodySettingsId::DensityRange)?;
        let minimal: f64 = material.params().get(BodySettingsId::DensityMin)?;
        material.set_range(
            QuantityId::Density,
            Interval::new(rho_limit.max(range.lower()).min(range.upper()), range.upper()),
            minimal,
        );

        storage.insert(QuantityId::VelocityDivergence, OrderEnum::Zero, 0.0_f64)?;
        Ok(())
    }
}
