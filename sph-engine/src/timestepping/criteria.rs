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
//! Adaptive timestep criteria
//!
//! Each criterion computes the minimum allowed timestep over all particles;
//! [`MultiCriterion`] takes the minimum of the enabled ones and reports
//! which criterion bound the step. Per-particle values can optionally be
//! recorded for diagnostics.

use crate::error::Result;
use crate::math::{Vector, EPS, H, LARGE};
use crate::physics::materials::Material;
use crate::quantities::{ArithmeticValue, OrderEnum, QuantityId, Storage, ValueEnum};
use crate::scheduler::Scheduler;
use crate::settings::{CriterionFlags, RunSettings, RunSettingsId};
use crate::statistics::Statistics;

/// Identifier of a timestep criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CriterionId {
    /// The initial timestep of the run
    InitialValue,
    /// The maximal allowed timestep
    MaximalValue,
    /// The CFL condition
    Courant,
    /// The acceleration bound
    Acceleration,
    /// The relative-change bound of evolved quantities
    Derivative,
}

impl CriterionId {
    /// Stable numeric code persisted into the TIME_STEP_CRITERION quantity
    pub fn code(self) -> u32 {
        match self {
            CriterionId::InitialValue => 0,
            CriterionId::MaximalValue => 1,
            CriterionId::Courant => 2,
            CriterionId::Acceleration => 3,
            CriterionId::Derivative => 4,
        }
    }
}

/// A timestep bound together with the criterion that produced it
#[derive(Debug, Clone, Copy)]
pub struct TimeStep {
    /// Allowed timestep
    pub value: f64,
    /// Criterion that bound the value
    pub id: CriterionId,
}

impl TimeStep {
    fn min(self, other: TimeStep) -> TimeStep {
        if other.value < self.value {
            other
        } else {
            self
        }
    }
}

/// Computes the allowed timestep of the current state
pub trait TimeStepCriterion: Send + Sync {
    /// Computes the minimum allowed timestep
    ///
    /// When `per_particle` is provided, it holds one entry per particle and
    /// records the per-particle bound and its criterion.
    fn compute(
        &self,
        scheduler: &dyn Scheduler,
        storage: &Storage,
        max_step: f64,
        stats: &mut Statistics,
        per_particle: Option<&mut [TimeStep]>,
    ) -> Result<TimeStep>;
}

fn record(per_particle: &mut Option<&mut [TimeStep]>, i: usize, candidate: TimeStep) {
    if let Some(values) = per_particle {
        values[i] = values[i].min(candidate);
    }
}

/// CFL condition on the sound-crossing time of the kernel support
pub struct CourantCriterion {
    courant: f64,
}

impl CourantCriterion {
    /// Creates the criterion from the run settings
    pub fn new(settings: &RunSettings) -> Result<Self> {
        Ok(CourantCriterion {
            courant: settings.get(RunSettingsId::TimesteppingCourant)?,
        })
    }
}

impl TimeStepCriterion for CourantCriterion {
    fn compute(
        &self,
        _scheduler: &dyn Scheduler,
        storage: &Storage,
        max_step: f64,
        _stats: &mut Statistics,
        mut per_particle: Option<&mut [TimeStep]>,
    ) -> Result<TimeStep> {
        let r = storage.value::<Vector>(QuantityId::Position)?;
        let cs = storage.value::<f64>(QuantityId::SoundSpeed)?;
        let mut result = TimeStep {
            value: max_step,
            id: CriterionId::MaximalValue,
        };
        for i in 0..r.len() {
            if cs[i] <= 0.0 {
                continue;
            }
            let candidate = TimeStep {
                value: self.courant * r[i][H] / cs[i],
                id: CriterionId::Courant,
            };
            record(&mut per_particle, i, candidate);
            result = result.min(candidate);
        }
        Ok(result)
    }
}

/// Bound from the current acceleration, sqrt(h / |a|)
pub struct AccelerationCriterion;

impl TimeStepCriterion for AccelerationCriterion {
    fn compute(
        &self,
        _scheduler: &dyn Scheduler,
        storage: &Storage,
        max_step: f64,
        _stats: &mut Statistics,
        mut per_particle: Option<&mut [TimeStep]>,
    ) -> Result<TimeStep> {
        let r = storage.value::<Vector>(QuantityId::Position)?;
        let dv = storage.d2t::<Vector>(QuantityId::Position)?;
        let mut result = TimeStep {
            value: max_step,
            id: CriterionId::MaximalValue,
        };
        for i in 0..r.len() {
            let acceleration = dv[i].length();
            if acceleration <= EPS {
                continue;
            }
            let candidate = TimeStep {
                value: (r[i][H] / acceleration).sqrt(),
                id: CriterionId::Acceleration,
            };
            record(&mut per_particle, i, candidate);
            result = result.min(candidate);
        }
        Ok(result)
    }
}

/// Bound from the relative change of every evolved quantity
///
/// For each first-order quantity q with material minimal scale q_min, the
/// allowed step is factor max(|q|, q_min) / max(|dq|, eps), minimized over
/// particles and materials.
pub struct DerivativeCriterion {
    factor: f64,
}

impl DerivativeCriterion {
    /// Creates the criterion from the run settings
    pub fn new(settings: &RunSettings) -> Result<Self> {
        Ok(DerivativeCriterion {
            factor: settings.get(RunSettingsId::TimesteppingDerivativeFactor)?,
        })
    }

    fn process<T: ArithmeticValue>(
        &self,
        storage: &Storage,
        id: QuantityId,
        values: &[T],
        derivatives: &[T],
        result: &mut TimeStep,
        per_particle: &mut Option<&mut [TimeStep]>,
    ) {
        for view in storage.material_partitions() {
            let minimal = view
                .material()
                .read()
                .expect("material lock poisoned")
                .minimal(id);
            for i in view.sequence() {
                let rate = derivatives[i].norm();
                if rate <= EPS {
                    continue;
                }
                let magnitude = values[i].norm().max(minimal);
                let candidate = TimeStep {
                    value: self.factor * magnitude / rate,
                    id: CriterionId::Derivative,
                };
                record(per_particle, i, candidate);
                *result = result.min(candidate);
            }
        }
        // storages without materials use a zero minimal scale
        if storage.material_cnt() == 0 {
            for i in 0..values.len() {
                let rate = derivatives[i].norm();
                if rate <= EPS {
                    continue;
                }
                let candidate = TimeStep {
                    value: self.factor * values[i].norm() / rate,
                    id: CriterionId::Derivative,
                };
                record(per_particle, i, candidate);
                *result = result.min(candidate);
            }
        }
    }
}

impl TimeStepCriterion for DerivativeCriterion {
    fn compute(
        &self,
        _scheduler: &dyn Scheduler,
        storage: &Storage,
        max_step: f64,
        _stats: &mut Statistics,
        mut per_particle: Option<&mut [TimeStep]>,
    ) -> Result<TimeStep> {
        let mut result = TimeStep {
            value: max_step,
            id: CriterionId::MaximalValue,
        };
        for id in storage.quantity_ids().collect::<Vec<_>>() {
            let quantity = storage.quantity(id)?;
            if quantity.order() != OrderEnum::First {
                continue;
            }
            match quantity.value_type() {
                ValueEnum::Scalar => self.process::<f64>(
                    storage,
                    id,
                    quantity.values().expect("type checked"),
                    quantity.dt().expect("order checked"),
                    &mut result,
                    &mut per_particle,
                ),
                ValueEnum::Vector => self.process::<Vector>(
                    storage,
                    id,
                    quantity.values().expect("type checked"),
                    quantity.dt().expect("order checked"),
                    &mut result,
                    &mut per_particle,
                ),
                ValueEnum::SymmetricTensor => self.process::<crate::math::SymmetricTensor>(
                    storage,
                    id,
                    quantity.values().expect("type checked"),
                    quantity.dt().expect("order checked"),
                    &mut result,
                    &mut per_particle,
                ),
                ValueEnum::TracelessTensor => self.process::<crate::math::TracelessTensor>(
                    storage,
                    id,
                    quantity.values().expect("type checked"),
                    quantity.dt().expect("order checked"),
                    &mut result,
                    &mut per_particle,
                ),
                ValueEnum::Index => {}
            }
        }
        Ok(result)
    }
}

/// Minimum over a set of enabled criteria
pub struct MultiCriterion {
    criteria: Vec<Box<dyn TimeStepCriterion>>,
}

impl MultiCriterion {
    /// Builds the criteria enabled by the run settings
    pub fn new(settings: &RunSettings) -> Result<Self> {
        let flags: CriterionFlags = settings.get_flags(RunSettingsId::TimesteppingCriteria)?;
        let mut criteria: Vec<Box<dyn TimeStepCriterion>> = Vec::new();
        if flags.contains(CriterionFlags::COURANT) {
            criteria.push(Box::new(CourantCriterion::new(settings)?));
        }
        if flags.contains(CriterionFlags::ACCELERATION) {
            criteria.push(Box::new(AccelerationCriterion));
        }
        if flags.contains(CriterionFlags::DERIVATIVES) {
            criteria.push(Box::new(DerivativeCriterion::new(settings)?));
        }
        Ok(MultiCriterion { criteria })
    }

    /// True when no criterion is enabled
    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}

impl TimeStepCriterion for MultiCriterion {
    fn compute(
        &self,
        scheduler: &dyn Scheduler,
        storage: &Storage,
        max_step: f64,
        stats: &mut Statistics,
        mut per_particle: Option<&mut [TimeStep]>,
    ) -> Result<TimeStep> {
        let mut result = TimeStep {
            value: max_step,
            id: CriterionId::MaximalValue,
        };
        for criterion in &self.criteria {
            let partial = criterion.compute(
                scheduler,
                storage,
                max_step,
                stats,
                per_particle.as_deref_mut(),
            )?;
            result = result.min(partial);
        }
        // never hand the integrators a degenerate step
        result.value = result.value.clamp(1.0 / LARGE, max_step);
        Ok(result)
    }
}
