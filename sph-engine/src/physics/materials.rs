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
//! Materials
//!
//! A material owns a parameter block, the allowed interval and minimal
//! scale of each quantity it governs, and hooks run around every solver
//! step: `initialize` evaluates the equation of state before the pair loop,
//! `finalize` evolves rheology-driven quantities after it. Two composable
//! variants are provided: [`EosMaterial`] for fluids and gases, and
//! [`SolidMaterial`] adding yielding and fracture.

use super::damage::{create_damage, Damage};
use super::eos::{create_eos, Eos};
use super::rheology::{DruckerPragerRheology, ElasticRheology, Rheology, VonMisesRheology};
use crate::error::{Error, Result};
use crate::math::{Interval, TracelessTensor};
use crate::quantities::{OrderEnum, QuantityId, Storage};
use crate::settings::{BodySettings, BodySettingsId, YieldingEnum};
use std::collections::HashMap;
use std::ops::Range;

/// Context passed to [`Material::create`]
#[derive(Debug, Clone, Default)]
pub struct MaterialInitialContext {
    /// Seed of stochastic initialization (flaw sampling, random distributions)
    pub rng_seed: u64,
}

/// Per-material parameters, quantity bounds and per-step hooks
pub trait Material: Send + Sync {
    /// The parameter block of the material
    fn params(&self) -> &BodySettings;

    /// The parameter block, mutable
    fn params_mut(&mut self) -> &mut BodySettings;

    /// Declares the allowed interval and minimal scale of a quantity
    fn set_range(&mut self, id: QuantityId, range: Interval, minimal: f64);

    /// Allowed interval of a quantity; unbounded when never declared
    fn range(&self, id: QuantityId) -> Interval;

    /// Scale below which differences of the quantity are ignored by the
    /// adaptive timestep; zero when never declared
    fn minimal(&self, id: QuantityId) -> f64;

    /// All declared ranges and minimal scales, for serialization
    fn declared_ranges(&self) -> Vec<(QuantityId, Interval, f64)>;

    /// Appends material-specific quantities to the storage and initializes
    /// their values from the parameter block
    fn create(&mut self, storage: &mut Storage, context: &MaterialInitialContext) -> Result<()>;

    /// Per-step work before the solver loop (EOS evaluation, yield clamping)
    fn initialize(&mut self, storage: &mut Storage, sequence: Range<usize>) -> Result<()>;

    /// Per-step work after the equation finalization (damage evolution)
    fn finalize(&mut self, storage: &mut Storage, sequence: Range<usize>) -> Result<()>;

    /// The equation of state, when the material has one
    fn eos(&self) -> Option<&dyn Eos> {
        None
    }
}

/// Common parameter and range bookkeeping shared by the material variants
struct MaterialData {
    params: BodySettings,
    ranges: HashMap<QuantityId, (Interval, f64)>,
}

impl MaterialData {
    fn new(params: BodySettings) -> Self {
        MaterialData {
            params,
            ranges: HashMap::new(),
        }
    }

    fn range(&self, id: QuantityId) -> Interval {
        self.ranges
            .get(&id)
            .map_or_else(Interval::unbounded, |&(range, _)| range)
    }

    fn minimal(&self, id: QuantityId) -> f64 {
        self.ranges.get(&id).map_or(0.0, |&(_, minimal)| minimal)
    }

    fn declared_ranges(&self) -> Vec<(QuantityId, Interval, f64)> {
        let mut ranges: Vec<(QuantityId, Interval, f64)> = self
            .ranges
            .iter()
            .map(|(&id, &(range, minimal))| (id, range, minimal))
            .collect();
        ranges.sort_by_key(|(id, _, _)| id.code());
        ranges
    }
}

/// Material with no equation of state
///
/// Useful for test setups and passive particles; all hooks are no-ops.
pub struct NullMaterial {
    data: MaterialData,
}

impl NullMaterial {
    /// Creates the material with default parameters
    pub fn new() -> Self {
        NullMaterial {
            data: MaterialData::new(BodySettings::new()),
        }
    }

    /// Creates the material with the given parameters
    pub fn with_params(params: BodySettings) -> Self {
        NullMaterial {
            data: MaterialData::new(params),
        }
    }
}

impl Default for NullMaterial {
    fn default() -> Self {
        Self::new()
    }
}

impl Material for NullMaterial {
    fn params(&self) -> &BodySettings {
        &self.data.params
    }

    fn params_mut(&mut self) -> &mut BodySettings {
        &mut self.data.params
    }

    fn set_range(&mut self, id: QuantityId, range: Interval, minimal: f64) {
        self.data.ranges.insert(id, (range, minimal));
    }

    fn range(&self, id: QuantityId) -> Interval {
        self.data.range(id)
    }

    fn minimal(&self, id: QuantityId) -> f64 {
        self.data.minimal(id)
    }

    fn declared_ranges(&self) -> Vec<(QuantityId, Interval, f64)> {
        self.data.declared_ranges()
    }

    fn create(&mut self, _storage: &mut Storage, _context: &MaterialInitialContext) -> Result<()> {
        Ok(())
    }

    fn initialize(&mut self, _storage: &mut Storage, _sequence: Range<usize>) -> Result<()> {
        Ok(())
    }

    fn finalize(&mut self, _storage: &mut Storage, _sequence: Range<usize>) -> Result<()> {
        Ok(())
    }
}

/// Material deriving pressure and sound speed from an equation of state
pub struct EosMaterial {
    data: MaterialData,
    eos: Box<dyn Eos>,
}

impl EosMaterial {
    /// Creates the material, instantiating the EOS selected by the parameters
    pub fn new(params: BodySettings) -> Result<Self> {
        let eos = create_eos(&params)?.ok_or_else(|| {
            Error::InvalidSetup("EosMaterial requires an equation of state".into())
        })?;
        Ok(EosMaterial {
            data: MaterialData::new(params),
            eos,
        })
    }

    /// Creates the material with an explicit EOS
    pub fn with_eos(params: BodySettings, eos: Box<dyn Eos>) -> Self {
        EosMaterial {
            data: MaterialData::new(params),
            eos,
        }
    }

    fn evaluate_eos(&self, storage: &mut Storage, sequence: Range<usize>) -> Result<()> {
        let rho: Vec<f64> = storage.value::<f64>(QuantityId::Density)?[sequence.clone()].to_vec();
        let u: Vec<f64> = storage.value::<f64>(QuantityId::Energy)?[sequence.clone()].to_vec();
        let damage: Option<Vec<f64>> = if storage.has(QuantityId::Damage) {
            Some(storage.value::<f64>(QuantityId::Damage)?[sequence.clone()].to_vec())
        } else {
            None
        };
        storage.with_buffers_mut2::<f64, f64, _, _>(
            (QuantityId::Pressure, crate::quantities::BufferSlot::Value),
            (QuantityId::SoundSpeed, crate::quantities::BufferSlot::Value),
            |_storage, p, cs| {
                for (local, i) in sequence.clone().enumerate() {
                    let (pressure, sound_speed) = self.eos.evaluate(rho[local], u[local]);
                    // tension does not transmit through fractured material
                    let intact = damage.as_ref().map_or(1.0, |d| 1.0 - d[local].min(1.0));
                    p[i] = if pressure < 0.0 {
                        pressure * intact
                    } else {
                        pressure
                    };
                    cs[i] = sound_speed;
                }
            },
        )?;
        Ok(())
    }
}

impl Material for EosMaterial {
    fn params(&self) -> &BodySettings {
        &self.data.params
    }

    fn params_mut(&mut self) -> &mut BodySettings {
        &mut self.data.params
    }

    fn set_range(&mut self, id: QuantityId, range: Interval, minimal: f64) {
        self.data.ranges.insert(id, (range, minimal));
    }

    fn range(&self, id: QuantityId) -> Interval {
        self.data.range(id)
    }

    fn minimal(&self, id: QuantityId) -> f64 {
        self.data.minimal(id)
    }

    fn declared_ranges(&self) -> Vec<(QuantityId, Interval, f64)> {
        self.data.declared_ranges()
    }

    fn create(&mut self, storage: &mut Storage, _context: &MaterialInitialContext) -> Result<()> {
        let rho0: f64 = self.data.params.get(BodySettingsId::Density)?;
        let u0: f64 = self.data.params.get(BodySettingsId::Energy)?;
        let (p0, cs0) = self.eos.evaluate(rho0, u0);
        storage.insert(QuantityId::Pressure, OrderEnum::Zero, p0)?;
        storage.insert(QuantityId::SoundSpeed, OrderEnum::Zero, cs0)?;
        Ok(())
    }

    fn initialize(&mut self, storage: &mut Storage, sequence: Range<usize>) -> Result<()> {
        self.evaluate_eos(storage, sequence)
    }

    fn finalize(&mut self, _storage: &mut Storage, _sequence: Range<usize>) -> Result<()> {
        Ok(())
    }

    fn eos(&self) -> Option<&dyn Eos> {
        Some(self.eos.as_ref())
    }
}

/// Solid material: equation of state plus rheology and fracture
pub struct SolidMaterial {
    eos_part: EosMaterial,
    rheology: Box<dyn Rheology>,
    damage: Box<dyn Damage>,
}

impl SolidMaterial {
    /// Creates the material, instantiating EOS, rheology and damage from the
    /// parameters
    pub fn new(params: BodySettings) -> Result<Self> {
        let yielding: YieldingEnum = params.get(BodySettingsId::RheologyYielding)?;
        let rheology: Box<dyn Rheology> = match yielding {
            YieldingEnum::None | YieldingEnum::Elastic => Box::new(ElasticRheology),
            YieldingEnum::VonMises => Box::new(VonMisesRheology),
            YieldingEnum::DruckerPrager => Box::new(DruckerPragerRheology),
        };
        let damage = create_damage(&params)?;
        Ok(SolidMaterial {
            eos_part: EosMaterial::new(params)?,
            rheology,
            damage,
        })
    }
}

impl Material for SolidMaterial {
    fn params(&self) -> &BodySettings {
        self.eos_part.params()
    }

    fn params_mut(&mut self) -> &mut BodySettings {
        self.eos_part.params_mut()
    }

    fn set_range(&mut self, id: QuantityId, range: Interval, minimal: f64) {
        self.eos_part.set_range(id, range, minimal);
    }

    fn range(&self, id: QuantityId) -> Interval {
        self.eos_part.range(id)
    }

    fn minimal(&self, id: QuantityId) -> f64 {
        self.eos_part.minimal(id)
    }

    fn declared_ranges(&self) -> Vec<(QuantityId, Interval, f64)> {
        self.eos_part.declared_ranges()
    }

    fn create(&mut self, storage: &mut Storage, context: &MaterialInitialContext) -> Result<()> {
        self.eos_part.create(storage, context)?;
        storage.insert(
            QuantityId::DeviatoricStress,
            OrderEnum::First,
            TracelessTensor::null(),
        )?;
        let s_min: f64 = self.params().get(BodySettingsId::StressTensorMin)?;
        self.set_range(QuantityId::DeviatoricStress, Interval::unbounded(), s_min);

        self.rheology.create(storage, self.eos_part.params())?;

        let sequence = 0..storage.particle_cnt();
        self.damage.setup(storage, sequence, self.eos_part.params())?;
        if storage.has(QuantityId::Damage) {
            let damage_range: Interval = self.params().get(BodySettingsId::DamageRange)?;
            let damage_min: f64 = self.params().get(BodySettingsId::DamageMin)?;
            self.set_range(QuantityId::Damage, damage_range, damage_min);
        }
        Ok(())
    }

    fn initialize(&mut self, storage: &mut Storage, sequence: Range<usize>) -> Result<()> {
        self.eos_part.initialize(storage, sequence.clone())?;
        self.rheology
            .initialize(storage, sequence, self.eos_part.params())
    }

    fn finalize(&mut self, storage: &mut Storage, sequence: Range<usize>) -> Result<()> {
        self.damage
            .integrate(storage, sequence, self.eos_part.params())
    }

    fn eos(&self) -> Option<&dyn Eos> {
        self.eos_part.eos()
    }
}

/// Instantiates the material variant implied by the parameter block
///
/// No equation of state yields a [`NullMaterial`]; an EOS with a rheology
/// yields a [`SolidMaterial`], otherwise an [`EosMaterial`].
pub fn create_material(params: BodySettings) -> Result<crate::quantities::SharedMaterial> {
    use crate::settings::EosEnum;
    let eos: EosEnum = params.get(BodySettingsId::Eos)?;
    if eos == EosEnum::None {
        return Ok(std::sync::Arc::new(std::sync::RwLock::new(
            NullMaterial::with_params(params),
        )));
    }
    let yielding: YieldingEnum = params.get(BodySettingsId::RheologyYielding)?;
    if yielding == YieldingEnum::None {
        Ok(std::sync::Arc::new(std::sync::RwLock::new(EosMaterial::new(
            params,
        )?)))
    } else {
        Ok(std::sync::Arc::new(std::sync::RwLock::new(SolidMaterial::new(
            params,
        )?)))
    }
}
