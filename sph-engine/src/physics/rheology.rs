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
//! Rheologies of solid materials
//!
//! A rheology clamps the deviatoric stress onto the yield surface before the
//! solver evaluates forces and fills the STRESS_REDUCING quantity consumed
//! by the damaged-interface pair filter. Yield clamping is idempotent:
//! applying it twice to the same stress state changes nothing.
//!
//! # References
//!
//! - Benz, W. & Asphaug, E. (1994). Impact simulations with fracture.
//!   Icarus 107.
//! - Collins, G. S., Melosh, H. J. & Ivanov, B. A. (2004). Modeling damage
//!   and deformation in impact simulations. MAPS 39.

use crate::error::Result;
use crate::math::EPS;
use crate::quantities::{OrderEnum, QuantityId, Storage};
use crate::settings::{BodySettings, BodySettingsId};
use std::ops::Range;

/// Constitutive model limiting the deviatoric stress of a solid
pub trait Rheology: Send + Sync {
    /// Declares the auxiliary quantities of the rheology
    fn create(&self, storage: &mut Storage, settings: &BodySettings) -> Result<()>;

    /// Applies the yield criterion to the particles of one material
    ///
    /// Runs each step before the solver loop; the clamped stress is what the
    /// force terms consume.
    fn initialize(
        &self,
        storage: &mut Storage,
        sequence: Range<usize>,
        settings: &BodySettings,
    ) -> Result<()>;
}

/// Unlimited elastic response; stress is never clamped
pub struct ElasticRheology;

impl Rheology for ElasticRheology {
    fn create(&self, storage: &mut Storage, _settings: &BodySettings) -> Result<()> {
        storage.insert(QuantityId::StressReducing, OrderEnum::Zero, 1.0_f64)?;
        Ok(())
    }

    fn initialize(
        &self,
        storage: &mut Storage,
        sequence: Range<usize>,
        _settings: &BodySettings,
    ) -> Result<()> {
        let reduce = storage.value_mut::<f64>(QuantityId::StressReducing)?;
        for i in sequence {
            reduce[i] = 1.0;
        }
        Ok(())
    }
}

/// Shared yield-clamp loop of the pressure-independent and
/// pressure-dependent criteria
fn apply_yield<F>(storage: &mut Storage, sequence: Range<usize>, yield_stress: F) -> Result<()>
where
    F: Fn(f64, f64) -> f64, // (pressure, energy) -> yield limit
{
    let u: Vec<f64> = storage.value::<f64>(QuantityId::Energy)?[sequence.clone()].to_vec();
    let p: Vec<f64> = storage.value::<f64>(QuantityId::Pressure)?[sequence.clone()].to_vec();
    let damage: Option<Vec<f64>> = if storage.has(QuantityId::Damage) {
        Some(storage.value::<f64>(QuantityId::Damage)?[sequence.clone()].to_vec())
    } else {
        None
    };

    storage.with_buffers_mut2::<crate::math::TracelessTensor, f64, _, _>(
        (QuantityId::DeviatoricStress, crate::quantities::BufferSlot::Value),
        (QuantityId::StressReducing, crate::quantities::BufferSlot::Value),
        |_storage, s, reduce| {
            for (local, i) in sequence.clone().enumerate() {
                let y = yield_stress(p[local], u[local]).max(0.0);
                let j2 = s[i].second_invariant();
                let ratio = if j2 > EPS {
                    (y / (3.0 * j2).sqrt()).min(1.0)
                } else {
                    1.0
                };
                if ratio < 1.0 {
                    s[i] = s[i] * ratio;
                }
                let intact = damage.as_ref().map_or(1.0, |d| 1.0 - d[local].min(1.0));
                if intact == 0.0 {
                    s[i] = crate::math::TracelessTensor::null();
                }
                reduce[i] = ratio * intact;
            }
        },
    )?;
    Ok(())
}

/// Scalar von Mises yield criterion with thermal softening
///
/// The yield limit decreases linearly with specific energy and vanishes at
/// the melt energy.
pub struct VonMisesRheology;

impl Rheology for VonMisesRheology {
    fn create(&self, storage: &mut Storage, _settings: &BodySettings) -> Result<()> {
        storage.insert(QuantityId::StressReducing, OrderEnum::Zero, 1.0_f64)?;
        Ok(())
    }

    fn initialize(
        &self,
        storage: &mut Storage,
        sequence: Range<usize>,
        settings: &BodySettings,
    ) -> Result<()> {
        let limit: f64 = settings.get(BodySettingsId::ElasticityLimit)?;
        let u_melt: f64 = settings.get(BodySettingsId::MeltEnergy)?;
        apply_yield(storage, sequence, |_p, u| {
            limit * (1.0 - u / u_melt).max(0.0)
        })
    }
}

/// Drucker-Prager yield envelope with cohesion and internal friction
///
/// The yield limit grows linearly with (compressive) pressure; the cohesion
/// softens with energy the same way the von Mises limit does.
pub struct DruckerPragerRheology;

impl Rheology for DruckerPragerRheology {
    fn create(&self, storage: &mut Storage, _settings: &BodySettings) -> Result<()> {
        storage.insert(QuantityId::StressReducing, OrderEnum::Zero, 1.0_f64)?;
        Ok(())
    }

    fn initialize(
        &self,
        storage: &mut Storage,
        sequence: Range<usize>,
        settings: &BodySettings,
    ) -> Result<()> {
        let cohesion: f64 = settings.get(BodySettingsId::Cohesion)?;
        let friction: f64 = settings.get(BodySettingsId::InternalFriction)?;
        let u_melt: f64 = settings.get(BodySettingsId::MeltEnergy)?;
        apply_yield(storage, sequence, |p, u| {
            let softening = (1.0 - u / u_melt).max(0.0);
            (cohesion * softening + friction * p.max(0.0)).max(0.0)
        })
    }
}
