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
//! Fracture models
//!
//! The scalar Grady-Kipp model activates pre-sampled Weibull-distributed
//! flaws once the local tensile strain exceeds their activation threshold
//! and grows the damage with the crack-propagation speed. Damage is an
//! evolved first-order quantity clamped to [0, 1] by its material range.
//!
//! The per-particle flaw thresholds are sampled at setup and kept inside
//! the model instance; the flaw distribution of a body is immutable for the
//! lifetime of its material.
//!
//! # References
//!
//! - Grady, D. E. & Kipp, M. E. (1980). Continuum modelling of explosive
//!   fracture in oil shale. Int. J. Rock Mech. 17.
//! - Benz, W. & Asphaug, E. (1995). Simulations of brittle solids using
//!   smooth particle hydrodynamics. Comput. Phys. Commun. 87.

use crate::error::Result;
use crate::math::{SymmetricTensor, H};
use crate::quantities::{BufferSlot, OrderEnum, QuantityId, Storage};
use crate::settings::{BodySettings, BodySettingsId};
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Weibull};
use std::ops::Range;
use std::sync::Mutex;

/// Fracture model of a solid material
pub trait Damage: Send + Sync {
    /// Creates the damage quantity and samples the flaw distribution
    fn setup(
        &self,
        storage: &mut Storage,
        sequence: Range<usize>,
        settings: &BodySettings,
    ) -> Result<()>;

    /// Computes the damage growth rate of the particles of one material
    ///
    /// Runs in the equation finalize phase, after stress derivatives are
    /// evaluated.
    fn integrate(
        &self,
        storage: &mut Storage,
        sequence: Range<usize>,
        settings: &BodySettings,
    ) -> Result<()>;
}

/// No fracture; damage stays zero
pub struct NullDamage;

impl Damage for NullDamage {
    fn setup(
        &self,
        _storage: &mut Storage,
        _sequence: Range<usize>,
        _settings: &BodySettings,
    ) -> Result<()> {
        Ok(())
    }

    fn integrate(
        &self,
        _storage: &mut Storage,
        _sequence: Range<usize>,
        _settings: &BodySettings,
    ) -> Result<()> {
        Ok(())
    }
}

/// Per-particle flaw state of one material body
struct FlawState {
    /// First particle of the material sequence at setup time
    offset: usize,
    /// Minimal activation strain of each particle
    eps_min: Vec<f64>,
    /// Weibull flaw-density coefficient scaled by particle volume
    kv: Vec<f64>,
}

/// Scalar Grady-Kipp fracture with Weibull-distributed flaws
///
/// The minimum of the k V candidate flaw thresholds of a particle of volume
/// V is Weibull-distributed with scale (k V)^(-1/m); sampling that minimum
/// directly avoids materializing individual flaws.
pub struct ScalarGradyKippDamage {
    state: Mutex<Option<FlawState>>,
}

impl ScalarGradyKippDamage {
    /// Creates the model with no sampled flaws
    pub fn new() -> Self {
        ScalarGradyKippDamage {
            state: Mutex::new(None),
        }
    }
}

impl Default for ScalarGradyKippDamage {
    fn default() -> Self {
        Self::new()
    }
}

impl Damage for ScalarGradyKippDamage {
    fn setup(
        &self,
        storage: &mut Storage,
        sequence: Range<usize>,
        settings: &BodySettings,
    ) -> Result<()> {
        storage.insert(QuantityId::Damage, OrderEnum::First, 0.0_f64)?;

        let k: f64 = settings.get(BodySettingsId::WeibullCoefficient)?;
        let m: f64 = settings.get(BodySettingsId::WeibullExponent)?;
        let seed: i64 = settings.get(BodySettingsId::DamageSeed)?;
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed as u64);

        let masses = storage.value::<f64>(QuantityId::Mass)?;
        let densities = storage.value::<f64>(QuantityId::Density)?;
        let mut eps_min = Vec::with_capacity(sequence.len());
        let mut kv = Vec::with_capacity(sequence.len());
        for i in sequence.clone() {
            let volume = masses[i] / densities[i];
            let scale = (k * volume).powf(-1.0 / m);
            let weibull = Weibull::new(scale, m)
                .map_err(|e| crate::error::Error::Numeric(format!("flaw sampling failed: {}", e)))?;
            let sample: f64 = weibull.sample(&mut rng);
            // a particle carries at least one flaw
            eps_min.push(sample.max(scale * rng.gen_range(1e-3..1.0)));
            kv.push(k * volume);
        }
        *self.state.lock().expect("flaw state lock poisoned") = Some(FlawState {
            offset: sequence.start,
            eps_min,
            kv,
        });
        Ok(())
    }

    fn integrate(
        &self,
        storage: &mut Storage,
        sequence: Range<usize>,
        settings: &BodySettings,
    ) -> Result<()> {
        let guard = self.state.lock().expect("flaw state lock poisoned");
        let state = match guard.as_ref() {
            Some(state) => state,
            None => return Ok(()),
        };
        let m: f64 = settings.get(BodySettingsId::WeibullExponent)?;
        let bulk: f64 = settings.get(BodySettingsId::BulkModulus)?;
        let shear: f64 = settings.get(BodySettingsId::ShearModulus)?;
        let young = 9.0 * bulk * shear / (3.0 * bulk + shear);

        let p: Vec<f64> = storage.value::<f64>(QuantityId::Pressure)?[sequence.clone()].to_vec();
        let s: Vec<crate::math::TracelessTensor> =
            storage.value(QuantityId::DeviatoricStress)?[sequence.clone()].to_vec();
        let cs: Vec<f64> = storage.value::<f64>(QuantityId::SoundSpeed)?[sequence.clone()].to_vec();
        let r: Vec<f64> = storage.value::<crate::math::Vector>(QuantityId::Position)?
            [sequence.clone()]
        .iter()
        .map(|v| v[H])
        .collect();

        storage.with_buffers_mut2::<f64, f64, _, _>(
            (QuantityId::Damage, BufferSlot::Value),
            (QuantityId::Damage, BufferSlot::Dt),
            |_storage, damage, ddamage| {
                for (local, i) in sequence.clone().enumerate() {
                    let state_idx = i - state.offset;
                    if state_idx >= state.eps_min.len() {
                        continue;
                    }
                    // largest principal stress of the total stress tensor
                    let sigma =
                        s[local].to_symmetric() - SymmetricTensor::identity() * p[local];
                    let eigen = sigma.eigen_decomposition();
                    let sigma_max = eigen
                        .values
                        .max_element();
                    let intact = (1.0 - damage[i]).max(0.0);
                    let strain = sigma_max.max(0.0) / (young * intact.max(1e-10));

                    if strain <= state.eps_min[state_idx] {
                        ddamage[i] = 0.0;
                        continue;
                    }
                    // number of activated flaws at the current strain
                    let n_act = (state.kv[state_idx] * strain.powf(m)).max(1.0);
                    let growth_speed = 0.4 * cs[local];
                    let radius = r[local];
                    let d_cbrt_dt = n_act.cbrt() * growth_speed / radius;
                    let d_cbrt = damage[i].max(0.0).cbrt();
                    ddamage[i] = 3.0 * d_cbrt * d_cbrt * d_cbrt_dt;
                    // a pristine particle has zero d^(2/3); seed the growth
                    // with the derivative of the cube root form itself
                    if ddamage[i] == 0.0 {
                        ddamage[i] = d_cbrt_dt;
                    }
                }
            },
        )?;
        Ok(())
    }
}

/// Instantiates the damage model selected by the material parameters
pub fn create_damage(settings: &BodySettings) -> Result<Box<dyn Damage>> {
    use crate::settings::DamageEnum;
    let selected: DamageEnum = settings.get(BodySettingsId::RheologyDamage)?;
    Ok(match selected {
        DamageEnum::None => Box::new(NullDamage),
        DamageEnum::ScalarGradyKipp => Box::new(ScalarGradyKippDamage::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{TracelessTensor, Vector};

    fn damage_storage(cnt: usize) -> Storage {
        let mut storage = Storage::new();
        storage
            .insert_values(
                QuantityId::Position,
                OrderEnum::Second,
                vec![Vector::with_h(0.0, 0.0, 0.0, 0.1); cnt],
            )
            .unwrap();
        storage.insert(QuantityId::Mass, OrderEnum::Zero, 1.0_f64).unwrap();
        storage
            .insert(QuantityId::Density, OrderEnum::First, 2700.0_f64)
            .unwrap();
        storage
            .insert(QuantityId::Pressure, OrderEnum::Zero, 0.0_f64)
            .unwrap();
        storage
            .insert(QuantityId::SoundSpeed, OrderEnum::Zero, 3000.0_f64)
            .unwrap();
        storage
            .insert(
                QuantityId::DeviatoricStress,
                OrderEnum::First,
                TracelessTensor::null(),
            )
            .unwrap();
        storage
    }

    #[test]
    fn test_setup_creates_damage_quantity() {
        let mut storage = damage_storage(10);
        let model = ScalarGradyKippDamage::new();
        model.setup(&mut storage, 0..10, &BodySettings::new()).unwrap();
        assert!(storage.has(QuantityId::Damage));
        assert_eq!(storage.value::<f64>(QuantityId::Damage).unwrap(), &[0.0; 10]);
    }

    #[test]
    fn test_flaw_sampling_is_deterministic() {
        let settings = BodySettings::new();
        let mut s1 = damage_storage(5);
        let m1 = ScalarGradyKippDamage::new();
        m1.setup(&mut s1, 0..5, &settings).unwrap();
        let mut s2 = damage_storage(5);
        let m2 = ScalarGradyKippDamage::new();
        m2.setup(&mut s2, 0..5, &settings).unwrap();
        let f1 = m1.state.lock().unwrap();
        let f2 = m2.state.lock().unwrap();
        assert_eq!(f1.as_ref().unwrap().eps_min, f2.as_ref().unwrap().eps_min);
    }

    #[test]
    fn test_no_growth_without_tension() {
        let mut storage = damage_storage(5);
        let model = ScalarGradyKippDamage::new();
        let settings = BodySettings::new();
        model.setup(&mut storage, 0..5, &settings).unwrap();
        // compressive pressure, zero deviatoric stress
        storage.value_mut::<f64>(QuantityId::Pressure).unwrap().fill(1e8);
        model.integrate(&mut storage, 0..5, &settings).unwrap();
        assert_eq!(storage.dt::<f64>(QuantityId::Damage).unwrap(), &[0.0; 5]);
    }

    #[test]
    fn test_growth_under_strong_tension() {
        let mut storage = damage_storage(5);
        let model = ScalarGradyKippDamage::new();
        let settings = BodySettings::new();
        model.setup(&mut storage, 0..5, &settings).unwrap();
        // strong tensile pressure activates flaws
        storage.value_mut::<f64>(QuantityId::Pressure).unwrap().fill(-1e10);
        model.integrate(&mut storage, 0..5, &settings).unwrap();
        let rate = storage.dt::<f64>(QuantityId::Damage).unwrap();
        assert!(rate.iter().all(|&d| d > 0.0));
    }
}
