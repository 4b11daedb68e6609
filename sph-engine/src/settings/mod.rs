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
//! Typed configuration key spaces
//!
//! Two settings maps drive the engine: [`RunSettings`] (solver, kernel,
//! artificial viscosity, finder, timestep control) and [`BodySettings`]
//! (per-material equation of state, rheology, damage, initial sampling).
//! Both are typed key-value maps with complete default tables, and both
//! serialize to a stable YAML form that parses back to identical values.

mod ids;
mod value;

pub use ids::{BodySettingsId, RunSettingsId};
pub use value::{
    ContinuityEnum, DamageEnum, DiscretizationEnum, DistributionEnum, EosEnum, FinderEnum,
    GravityKernelEnum, KernelEnum, SettingsEnum, SettingsType, SettingsValue, SignalSpeedEnum,
    TimesteppingEnum, YieldingEnum,
};

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

bitflags::bitflags! {
    /// Forces evaluated by the SPH solver
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ForceFlags: u32 {
        /// Pressure gradient force
        const PRESSURE = 1 << 0;
        /// Divergence of the deviatoric stress tensor
        const SOLID_STRESS = 1 << 1;
        /// Self-gravity of the particle system
        const SELF_GRAVITY = 1 << 2;
        /// Surface tension of fluids
        const SURFACE_TENSION = 1 << 3;
    }
}

bitflags::bitflags! {
    /// Adaptive smoothing-length options
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SmoothingLengthFlags: u32 {
        /// Evolve h using the continuity equation for smoothing lengths
        const CONTINUITY_EQUATION = 1 << 0;
        /// Additionally enforce the target neighbor-count window
        const SOUND_SPEED_ENFORCING = 1 << 1;
    }
}

bitflags::bitflags! {
    /// Adaptive timestep criteria to evaluate
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CriterionFlags: u32 {
        /// CFL condition on the sound-crossing time of the kernel support
        const COURANT = 1 << 0;
        /// Bound from the current acceleration
        const ACCELERATION = 1 << 1;
        /// Bound from relative change of evolved quantities
        const DERIVATIVES = 1 << 2;
    }
}

/// Marker trait of settings key enums
pub trait SettingsKey:
    Copy + Ord + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The complete default table of this key space
    fn defaults() -> Vec<(Self, SettingsValue)>;
}

/// A typed key-value settings map
#[derive(Debug, Clone, PartialEq)]
pub struct Settings<K: SettingsKey> {
    values: BTreeMap<K, SettingsValue>,
}

impl<K: SettingsKey> Settings<K> {
    /// Creates settings populated with the full default table
    pub fn new() -> Self {
        Settings {
            values: K::defaults().into_iter().collect(),
        }
    }

    /// Creates an empty settings map
    ///
    /// Reading a key that was never set fails; prefer [`Settings::new`]
    /// unless the map is being deserialized.
    pub fn empty() -> Self {
        Settings {
            values: BTreeMap::new(),
        }
    }

    /// Stores a value under the given key
    pub fn set<T: SettingsType>(&mut self, key: K, value: T) -> &mut Self {
        self.values.insert(key, value.into_value());
        self
    }

    /// Builder-style variant of [`Settings::set`]
    pub fn with<T: SettingsType>(mut self, key: K, value: T) -> Self {
        self.set(key, value);
        self
    }

    /// Retrieves a value, failing on missing key or mismatched type
    pub fn get<T: SettingsType>(&self, key: K) -> Result<T> {
        let value = self
            .values
            .get(&key)
            .ok_or_else(|| Error::InvalidSetup(format!("settings key {:?} not set", key)))?;
        T::from_value(value)
            .ok_or_else(|| Error::InvalidSetup(format!("settings key {:?} has unexpected type", key)))
    }

    /// Retrieves a bitflag set stored as an integer
    pub fn get_flags<F: bitflags::Flags<Bits = u32>>(&self, key: K) -> Result<F> {
        let bits: i64 = self.get(key)?;
        Ok(F::from_bits_truncate(bits as u32))
    }

    /// Stores a bitflag set as an integer
    pub fn set_flags<F: bitflags::Flags<Bits = u32>>(&mut self, key: K, flags: F) -> &mut Self {
        self.set(key, flags.bits() as i64)
    }

    /// Checks whether the key has a stored value
    pub fn has(&self, key: K) -> bool {
        self.values.contains_key(&key)
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no key is stored
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Serializes the map to its stable YAML text form
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| Error::Corrupt(format!("settings serialization failed: {}", e)))
    }

    /// Parses settings from the YAML text form produced by [`Settings::to_yaml`]
    pub fn from_yaml(text: &str) -> Result<Self> {
        let values: BTreeMap<K, SettingsValue> = serde_yaml::from_str(text)
            .map_err(|e| Error::Corrupt(format!("settings deserialization failed: {}", e)))?;
        Ok(Settings { values })
    }
}

impl<K: SettingsKey> Default for Settings<K> {
    fn default() -> Self {
        Settings::new()
    }
}

/// Global run configuration
pub type RunSettings = Settings<RunSettingsId>;

/// Per-material configuration
pub type BodySettings = Settings<BodySettingsId>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Interval;

    #[test]
    fn test_defaults_cover_lookup() {
        let run = RunSettings::new();
        let courant: f64 = run.get(RunSettingsId::TimesteppingCourant).unwrap();
        assert!(courant > 0.0 && courant < 1.0);
        let body = BodySettings::new();
        let rho0: f64 = body.get(BodySettingsId::Density).unwrap();
        assert!(rho0 > 0.0);
    }

    #[test]
    fn test_type_mismatch_fails() {
        let run = RunSettings::new();
        assert!(run.get::<bool>(RunSettingsId::TimesteppingCourant).is_err());
    }

    #[test]
    fn test_missing_key_fails() {
        let run = RunSettings::empty();
        assert!(run.get::<f64>(RunSettingsId::TimesteppingCourant).is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut body = BodySettings::new();
        body.set(BodySettingsId::Density, 2700.0)
            .set(BodySettingsId::DensityRange, Interval::new(100.0, 1e7))
            .set(BodySettingsId::ParticleCount, 12345_i64)
            .set(BodySettingsId::Eos, super::value::EosEnum::Tillotson);
        let text = body.to_yaml().unwrap();
        let parsed = BodySettings::from_yaml(&text).unwrap();
        assert_eq!(body, parsed);
    }

    #[test]
    fn test_yaml_preserves_full_float_precision() {
        let mut run = RunSettings::new();
        run.set(RunSettingsId::TimesteppingInitialTimestep, 0.1 + 1e-17);
        let text = run.to_yaml().unwrap();
        let parsed = RunSettings::from_yaml(&text).unwrap();
        assert_eq!(run, parsed);
    }

    #[test]
    fn test_flags_round_trip() {
        let mut run = RunSettings::new();
        run.set_flags(
            RunSettingsId::SphSolverForces,
            ForceFlags::PRESSURE | ForceFlags::SOLID_STRESS,
        );
        let flags: ForceFlags = run.get_flags(RunSettingsId::SphSolverForces).unwrap();
        assert!(flags.contains(ForceFlags::PRESSURE));
        assert!(!flags.contains(ForceFlags::SELF_GRAVITY));
    }
}
