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
//! Smoothing-length evolution
//!
//! The H lane of the position buffer carries the per-particle smoothing
//! length and its velocity lane carries dH/dt. [`AdaptiveSmoothingLength`]
//! evolves h by the continuity relation dh/dt = h/d div v and optionally
//! nudges it toward a target neighbor-count window;
//! [`ConstSmoothingLength`] pins h by zeroing its rates. Exactly one of the
//! two must be part of every equation set, as accelerations accumulate
//! garbage into the H lane that these terms overwrite.

use super::derivative::DerivativeHolder;
use super::velocity::VelocityDivergence;
use super::EquationTerm;
use crate::error::Result;
use crate::math::{Interval, Vector, H};
use crate::physics::materials::Material;
use crate::quantities::{BufferSlot, OrderEnum, QuantityId, Storage};
use crate::scheduler::{parallel_for_each, parallel_for_each_zip, Scheduler};
use crate::settings::{RunSettings, RunSettingsId, SmoothingLengthFlags};

/// Evolves the smoothing length with the local expansion rate
pub struct AdaptiveSmoothingLength {
    dimensions: usize,
    range: Interval,
    enforcing: Option<Enforcing>,
}

struct Enforcing {
    strength: f64,
    range: Interval,
}

impl AdaptiveSmoothingLength {
    /// Creates the term for the given spatial dimension
    pub fn new(settings: &RunSettings, dimensions: usize) -> Result<Self> {
        let flags: SmoothingLengthFlags =
            settings.get_flags(RunSettingsId::SphAdaptiveSmoothingLength)?;
        let enforcing = if flags.contains(SmoothingLengthFlags::SOUND_SPEED_ENFORCING) {
            Some(Enforcing {
                strength: settings.get(RunSettingsId::SphNeighborEnforcing)?,
                range: settings.get(RunSettingsId::SphNeighborRange)?,
            })
        } else {
            None
        };
        Ok(AdaptiveSmoothingLength {
            dimensions,
            range: settings.get(RunSettingsId::SphSmoothingLengthRange)?,
            enforcing,
        })
    }

    fn enforce(&self, v_h: &mut f64, cs: f64, neigh_cnt: u32) {
        let enforcing = match &self.enforcing {
            Some(enforcing) => enforcing,
            None => return,
        };
        // the sound speed gives the term correct dimensions; the exponent
        // is capped to keep the rate finite for extreme neighbor counts
        let over = neigh_cnt as f64 - enforcing.range.upper();
        if over > 0.0 {
            *v_h -= (enforcing.strength * over).min(70.0).exp() * cs;
            return;
        }
        let under = enforcing.range.lower() - neigh_cnt as f64;
        if under > 0.0 {
            *v_h += (enforcing.strength * under).min(70.0).exp() * cs;
        }
    }
}

impl EquationTerm for AdaptiveSmoothingLength {
    fn set_derivatives(&self, holder: &mut DerivativeHolder, settings: &RunSettings) -> Result<()> {
        holder.require(Box::new(VelocityDivergence::new(settings)?))
    }

    fn initialize(&self, _scheduler: &dyn Scheduler, storage: &mut Storage, _t: f64) -> Result<()> {
        let r = storage.value_mut::<Vector>(QuantityId::Position)?;
        let range = self.range;
        parallel_for_each(r, |_i, r_i| {
            r_i[H] = range.clamp(r_i[H]);
        });
        Ok(())
    }

    fn finalize(&self, _scheduler: &dyn Scheduler, storage: &mut Storage, _t: f64) -> Result<()> {
        let divv: Vec<f64> = storage.value::<f64>(QuantityId::VelocityDivergence)?.to_vec();
        let cs: Vec<f64> = storage.value::<f64>(QuantityId::SoundSpeed)?.to_vec();
        let neigh_cnt: Vec<u32> = storage.value::<u32>(QuantityId::NeighborCnt)?.to_vec();
        let r: Vec<f64> = storage
            .value::<Vector>(QuantityId::Position)?
            .iter()
            .map(|p| p[H])
            .collect();
        let lower = self.range.lower();
        storage.with_buffers_mut2::<Vector, Vector, _, _>(
            (QuantityId::Position, BufferSlot::Dt),
            (QuantityId::Position, BufferSlot::D2t),
            |_s, v, dv| {
                parallel_for_each_zip(v, dv, |i, v_i, dv_i| {
                    // continuity equation for the smoothing length
                    if r[i] > 2.0 * lower {
                        v_i[H] = r[i] / self.dimensions as f64 * divv[i];
                    } else {
                        v_i[H] = 0.0;
                    }
                    // h evolves as a first-order quantity
                    dv_i[H] = 0.0;
                    self.enforce(&mut v_i[H], cs[i], neigh_cnt[i]);
                });
            },
        )?;
        Ok(())
    }

    fn create(&self, storage: &mut Storage, _material: &mut dyn Material) -> Result<()> {
        storage.insert(QuantityId::VelocityDivergence, OrderEnum::Zero, 0.0_f64)?;
        Ok(())
    }
}

/// Pins the smoothing length by zeroing its evolution rates
pub struct ConstSmoothingLength;

impl ConstSmoothingLength {
    /// Creates the term
    pub fn new() -> Self {
        ConstSmoothingLength
    }
}

impl Default for ConstSmoothingLength {
    fn default() -> Self {
        Self::new()
    }
}

impl EquationTerm for ConstSmoothingLength {
    fn set_derivatives(&self, _holder: &mut DerivativeHolder, _settings: &RunSettings) -> Result<()> {
        Ok(())
    }

    fn initialize(&self, _scheduler: &dyn Scheduler, _storage: &mut Storage, _t: f64) -> Result<()> {
        Ok(())
    }

    fn finalize(&self, _scheduler: &dyn Scheduler, storage: &mut Storage, _t: f64) -> Result<()> {
        storage.with_buffers_mut2::<Vector, Vector, _, _>(
            (QuantityId::Position, BufferSlot::Dt),
            (QuantityId::Position, BufferSlot::D2t),
            |_s, v, dv| {
                parallel_for_each_zip(v, dv, |_i, v_i, dv_i| {
                    v_i[H] = 0.0;
                    dv_i[H] = 0.0;
                });
            },
        )?;
        Ok(())
    }

    fn create(&self, _storage: &mut Storage, _material: &mut dyn Material) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SequentialScheduler;

    fn smoothing_storage(h: f64, divv: f64) -> Storage {
        let mut storage = Storage::new();
        storage
            .insert_values(
                QuantityId::Position,
                OrderEnum::Second,
                vec![Vector::with_h(0.0, 0.0, 0.0, h); 1],
            )
            .unwrap();
        storage
            .insert(QuantityId::VelocityDivergence, OrderEnum::Zero, divv)
            .unwrap();
        storage
            .insert(QuantityId::SoundSpeed, OrderEnum::Zero, 1.0_f64)
            .unwrap();
        storage
            .insert(QuantityId::NeighborCnt, OrderEnum::Zero, 50_u32)
            .unwrap();
        storage
    }

    #[test]
    fn test_const_smoothing_length_zeroes_rates() {
        let mut storage = smoothing_storage(1.0, 0.5);
        storage.dt_mut::<Vector>(QuantityId::Position).unwrap()[0][H] = 3.0;
        storage.d2t_mut::<Vector>(QuantityId::Position).unwrap()[0][H] = 4.0;
        ConstSmoothingLength::new()
            .finalize(&SequentialScheduler, &mut storage, 0.0)
            .unwrap();
        assert_eq!(storage.dt::<Vector>(QuantityId::Position).unwrap()[0][H], 0.0);
        assert_eq!(storage.d2t::<Vector>(QuantityId::Position).unwrap()[0][H], 0.0);
    }

    #[test]
    fn test_adaptive_h_grows_in_expansion() {
        let settings = RunSettings::new();
        let term = AdaptiveSmoothingLength::new(&settings, 3).unwrap();
        let mut storage = smoothing_storage(1.0, 0.6);
        term.finalize(&SequentialScheduler, &mut storage, 0.0).unwrap();
        let dh = storage.dt::<Vector>(QuantityId::Position).unwrap()[0][H];
        assert!((dh - 0.2).abs() < 1e-12, "dh/dt = {}", dh);
    }

    #[test]
    fn test_neighbor_enforcement_shrinks_overcrowded() {
        let mut settings = RunSettings::new();
        settings.set_flags(
            RunSettingsId::SphAdaptiveSmoothingLength,
            SmoothingLengthFlags::CONTINUITY_EQUATION | SmoothingLengthFlags::SOUND_SPEED_ENFORCING,
        );
        let term = AdaptiveSmoothingLength::new(&settings, 3).unwrap();
        let mut storage = smoothing_storage(1.0, 0.0);
        // far above the neighbor window
        storage.value_mut::<u32>(QuantityId::NeighborCnt).unwrap()[0] = 500;
        term.finalize(&SequentialScheduler, &mut storage, 0.0).unwrap();
        let dh = storage.dt::<Vector>(QuantityId::Position).unwrap()[0][H];
        assert!(dh < 0.0, "dh/dt = {}", dh);
    }
}
