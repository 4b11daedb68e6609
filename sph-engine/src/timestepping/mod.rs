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
//! Time integration
//!
//! All integrators share one contract: second-order quantities advance
//! their value with the first derivative and the first derivative with the
//! second; first-order quantities advance with their derivative;
//! zero-order quantities are untouched. After every substep each quantity
//! is clamped to the interval declared by its material, and the companion
//! derivative is zeroed when the clamp binds, so the quantity cannot drift
//! back into the forbidden region on the next step.
//!
//! Auxiliary integrator storages (predictions, Runge-Kutta stages, the
//! midpoint buffer) are registered as dependents of the main storage, so
//! structural changes of the particle count propagate automatically.
//!
//! # Integrators
//!
//! | Scheme | Order | Auxiliary storage |
//! |---|---|---|
//! | [`EulerExplicit`] | 1 | none |
//! | [`PredictorCorrector`] | 2 | highest derivatives |
//! | [`LeapFrog`] | 2 | none |
//! | [`RungeKutta`] | 4 | four full stages |
//! | [`ModifiedMidpointMethod`] | 2 (substepped) | one full stage |
//! | [`BulirschStoer`] | adaptive | tables only; evaluator not provided |

mod criteria;

pub use criteria::{
    AccelerationCriterion, CourantCriterion, CriterionId, DerivativeCriterion, MultiCriterion,
    TimeStep, TimeStepCriterion,
};

use crate::error::{Error, Result};
use crate::math::{Interval, LARGE};
use crate::physics::materials::Material;
use crate::quantities::{
    iterate_first_order, iterate_pair_first_order, iterate_pair_second_order, iterate_second_order,
    ArithmeticValue, FirstOrderVisitor, OrderEnum, PairFirstOrderVisitor, PairSecondOrderVisitor,
    QuantityId, SecondOrderVisitor, SharedMaterial, SharedStorage, Storage, VisitorEnum,
};
use crate::scheduler::Scheduler;
use crate::settings::{RunSettings, RunSettingsId, TimesteppingEnum};
use crate::solvers::Solver;
use crate::statistics::{Statistics, StatisticsId};
use std::ops::Range;
use std::sync::{Arc, RwLock};

/// Advances the simulation state in time
pub trait TimeStepping: Send {
    /// Performs one step: advances attractors and particles and updates the
    /// adaptive timestep
    fn step(
        &mut self,
        scheduler: &dyn Scheduler,
        solver: &mut dyn Solver,
        stats: &mut Statistics,
    ) -> Result<()>;

    /// The current timestep
    fn time_step(&self) -> f64;
}

/// State shared by all integrators
struct Stepper {
    storage: SharedStorage,
    criterion: Option<MultiCriterion>,
    time_step: f64,
    max_time_step: f64,
    save_particle_timesteps: bool,
}

impl Stepper {
    fn new(storage: SharedStorage, settings: &RunSettings) -> Result<Self> {
        let criterion = MultiCriterion::new(settings)?;
        let save_particle_timesteps: bool = settings.get(RunSettingsId::SaveParticleTimesteps)?;
        if save_particle_timesteps {
            let mut guard = storage.write().expect("storage lock poisoned");
            guard.insert(QuantityId::TimeStep, OrderEnum::Zero, LARGE)?;
            guard.insert(QuantityId::TimeStepCriterion, OrderEnum::Zero, 0_u32)?;
        }
        Ok(Stepper {
            storage,
            criterion: if criterion.is_empty() {
                None
            } else {
                Some(criterion)
            },
            time_step: settings.get(RunSettingsId::TimesteppingInitialTimestep)?,
            max_time_step: settings.get(RunSettingsId::TimesteppingMaxTimestep)?,
            save_particle_timesteps,
        })
    }

    /// Runs the attractor drift-kick bracket and timestep update around the
    /// particle stepping
    fn step_with(
        &mut self,
        scheduler: &dyn Scheduler,
        solver: &mut dyn Solver,
        stats: &mut Statistics,
        step_particles: impl FnOnce(&mut Self, &dyn Scheduler, &mut dyn Solver, &mut Statistics) -> Result<()>,
    ) -> Result<()> {
        let dt = self.time_step;
        {
            let mut storage = self.storage.write().expect("storage lock poisoned");
            for attractor in storage.attractors_mut() {
                attractor.position += attractor.velocity * (0.5 * dt);
            }
        }

        step_particles(self, scheduler, solver, stats)?;

        {
            let mut storage = self.storage.write().expect("storage lock poisoned");
            for attractor in storage.attractors_mut() {
                attractor.velocity += attractor.acceleration * dt;
                attractor.position += attractor.velocity * (0.5 * dt);
            }
        }

        let mut criterion_id = CriterionId::InitialValue;
        if let Some(criterion) = &self.criterion {
            let mut storage = self.storage.write().expect("storage lock poisoned");
            let mut per_particle = if self.save_particle_timesteps {
                vec![
                    TimeStep {
                        value: LARGE,
                        id: CriterionId::MaximalValue,
                    };
                    storage.particle_cnt()
                ]
            } else {
                Vec::new()
            };
            let result = criterion.compute(
                scheduler,
                &storage,
                self.max_time_step,
                stats,
                if self.save_particle_timesteps {
                    Some(&mut per_particle)
                } else {
                    None
                },
            )?;
            self.time_step = result.value;
            criterion_id = result.id;
            if self.save_particle_timesteps {
                let values = storage.value_mut::<f64>(QuantityId::TimeStep)?;
                for (target, step) in values.iter_mut().zip(&per_particle) {
                    *target = step.value;
                }
                let ids = storage.value_mut::<u32>(QuantityId::TimeStepCriterion)?;
                for (target, step) in ids.iter_mut().zip(&per_particle) {
                    *target = step.id.code();
                }
            }
        }
        stats.set_float(StatisticsId::TimestepValue, self.time_step);
        stats.set_criterion(StatisticsId::TimestepCriterion, criterion_id);
        Ok(())
    }
}

/// Cached material partitions used to clamp quantities to their ranges
struct MaterialRanges {
    partitions: Vec<(Range<usize>, SharedMaterial)>,
}

impl MaterialRanges {
    fn new(storage: &Storage) -> Self {
        MaterialRanges {
            partitions: storage
                .material_partitions()
                .into_iter()
                .map(|view| (view.sequence(), view.material().clone()))
                .collect(),
        }
    }

    /// Clamps the values of one quantity, zeroing the paired derivative
    /// where the clamp binds
    fn clamp<T: ArithmeticValue>(&self, id: QuantityId, x: &mut [T], dx: &mut [T]) {
        for (sequence, material) in &self.partitions {
            let range: Interval = material
                .read()
                .expect("material lock poisoned")
                .range(id);
            if range.is_unbounded() {
                continue;
            }
            for i in sequence.clone() {
                let (value, deriv) = T::clamp_with_derivative(x[i], dx[i], range);
                x[i] = value;
                dx[i] = deriv;
            }
        }
    }
}

// --- Shared stepper visitors ---------------------------------------------

/// x += dx dt for first-order quantities
struct FirstOrderEuler<'a> {
    dt: f64,
    ranges: &'a MaterialRanges,
}

impl FirstOrderVisitor for FirstOrderEuler<'_> {
    fn visit<T: ArithmeticValue>(&mut self, id: QuantityId, x: &mut [T], dx: &mut [T]) {
        for i in 0..x.len() {
            x[i] = x[i] + dx[i] * self.dt;
        }
        self.ranges.clamp(id, x, dx);
    }
}

/// v += dv dt for second-order quantities (kick)
struct SecondOrderKick<'a> {
    dt: f64,
    ranges: &'a MaterialRanges,
}

impl SecondOrderVisitor for SecondOrderKick<'_> {
    fn visit<T: ArithmeticValue>(&mut self, id: QuantityId, x: &mut [T], dx: &mut [T], d2x: &mut [T]) {
        for i in 0..x.len() {
            dx[i] = dx[i] + d2x[i] * self.dt;
        }
        self.ranges.clamp(id, x, dx);
    }
}

/// r += v dt for second-order quantities (drift)
struct SecondOrderDrift<'a> {
    dt: f64,
    ranges: &'a MaterialRanges,
}

impl SecondOrderVisitor for SecondOrderDrift<'_> {
    fn visit<T: ArithmeticValue>(&mut self, id: QuantityId, x: &mut [T], dx: &mut [T], _d2x: &mut [T]) {
        for i in 0..x.len() {
            x[i] = x[i] + dx[i] * self.dt;
        }
        self.ranges.clamp(id, x, dx);
    }
}

// --- Explicit Euler -------------------------------------------------------

/// First-order explicit Euler integrator
pub struct EulerExplicit {
    stepper: Stepper,
}

impl EulerExplicit {
    /// Creates the integrator
    pub fn new(storage: SharedStorage, settings: &RunSettings) -> Result<Self> {
        Ok(EulerExplicit {
            stepper: Stepper::new(storage, settings)?,
        })
    }
}

impl TimeStepping for EulerExplicit {
    fn step(
        &mut self,
        scheduler: &dyn Scheduler,
        solver: &mut dyn Solver,
        stats: &mut Statistics,
    ) -> Result<()> {
        self.stepper
            .step_with(scheduler, solver, stats, |stepper, _scheduler, solver, stats| {
                let dt = stepper.time_step;
                let mut storage = stepper.storage.write().expect("storage lock poisoned");
                storage.zero_highest_derivatives();
                solver.integrate(&mut storage, stats)?;

                let ranges = MaterialRanges::new(&storage);
                iterate_second_order(&mut storage, &mut SecondOrderKick { dt, ranges: &ranges });
                drop(ranges);
                solver.collide(&mut storage, stats, dt)?;
                let ranges = MaterialRanges::new(&storage);
                iterate_second_order(&mut storage, &mut SecondOrderDrift { dt, ranges: &ranges });
                iterate_first_order(&mut storage, &mut FirstOrderEuler { dt, ranges: &ranges });
                Ok(())
            })
    }

    fn time_step(&self) -> f64 {
        self.stepper.time_step
    }
}

// --- Predictor-corrector --------------------------------------------------

/// Second-order predictor-corrector integrator
///
/// Keeps a copy of the highest derivatives (the predictions) in a
/// dependent storage; corrections after the re-evaluation are
/// -1/3 (dv_c - dv_p) dt^2 / 2 on positions and -1/2 (dv_c - dv_p) dt on
/// velocities.
pub struct PredictorCorrector {
    stepper: Stepper,
    predictions: SharedStorage,
}

impl PredictorCorrector {
    /// Creates the integrator; quantities must already be created
    pub fn new(storage: SharedStorage, settings: &RunSettings) -> Result<Self> {
        let predictions = {
            let mut guard = storage.write().expect("storage lock poisoned");
            debug_assert!(guard.quantity_cnt() > 0, "quantities must be created first");
            let clone = guard.clone_buffers(VisitorEnum::HighestDerivatives);
            let shared = Arc::new(RwLock::new(clone));
            guard.add_dependent(&shared);
            guard.zero_highest_derivatives();
            shared
        };
        Ok(PredictorCorrector {
            stepper: Stepper::new(storage, settings)?,
            predictions,
        })
    }
}

struct Predict<'a> {
    dt: f64,
    ranges: &'a MaterialRanges,
}

impl SecondOrderVisitor for Predict<'_> {
    fn visit<T: ArithmeticValue>(&mut self, id: QuantityId, x: &mut [T], dx: &mut [T], d2x: &mut [T]) {
        let dt2 = 0.5 * self.dt * self.dt;
        for i in 0..x.len() {
            x[i] = x[i] + dx[i] * self.dt + d2x[i] * dt2;
            dx[i] = dx[i] + d2x[i] * self.dt;
        }
        self.ranges.clamp(id, x, dx);
    }
}

struct CorrectSecond<'a> {
    dt: f64,
    ranges: &'a MaterialRanges,
}

impl PairSecondOrderVisitor for CorrectSecond<'_> {
    fn visit<T: ArithmeticValue>(
        &mut self,
        id: QuantityId,
        x: &mut [T],
        dx: &mut [T],
        d2x: &mut [T],
        _px: &mut [T],
        _pdx: &mut [T],
        pd2x: &mut [T],
    ) {
        let a = 1.0 / 3.0;
        let b = 0.5;
        let dt2 = 0.5 * self.dt * self.dt;
        for i in 0..x.len() {
            // the prediction storage holds the derivatives used to predict;
            // the correction moves toward the re-evaluated ones
            let delta = d2x[i] - pd2x[i];
            x[i] = x[i] + delta * (a * dt2);
            dx[i] = dx[i] + delta * (b * self.dt);
        }
        self.ranges.clamp(id, x, dx);
    }
}

struct CorrectFirst<'a> {
    dt: f64,
    ranges: &'a MaterialRanges,
}

impl PairFirstOrderVisitor for CorrectFirst<'_> {
    fn visit<T: ArithmeticValue>(
        &mut self,
        id: QuantityId,
        x: &mut [T],
        dx: &mut [T],
        _px: &mut [T],
        pdx: &mut [T],
    ) {
        for i in 0..x.len() {
            x[i] = x[i] + (dx[i] - pdx[i]) * (0.5 * self.dt);
        }
        self.ranges.clamp(id, x, dx);
    }
}

impl TimeStepping for PredictorCorrector {
    fn step(
        &mut self,
        scheduler: &dyn Scheduler,
        solver: &mut dyn Solver,
        stats: &mut Statistics,
    ) -> Result<()> {
        let predictions = self.predictions.clone();
        self.stepper
            .step_with(scheduler, solver, stats, |stepper, _scheduler, solver, stats| {
                let dt = stepper.time_step;
                let mut storage = stepper.storage.write().expect("storage lock poisoned");

                // predict
                {
                    let ranges = MaterialRanges::new(&storage);
                    iterate_second_order(&mut storage, &mut Predict { dt, ranges: &ranges });
                    iterate_first_order(&mut storage, &mut FirstOrderEuler { dt, ranges: &ranges });
                }

                // save derivatives of the prediction and re-evaluate; the
                // predictions lock must not be held during integrate, where
                // structural changes propagate into dependents
                {
                    let mut predictions = predictions.write().expect("predictions lock poisoned");
                    storage.swap_buffers(&mut predictions, VisitorEnum::HighestDerivatives);
                }
                storage.zero_highest_derivatives();
                solver.integrate(&mut storage, stats)?;

                // correct
                let mut predictions = predictions.write().expect("predictions lock poisoned");
                debug_assert_eq!(storage.particle_cnt(), predictions.particle_cnt());
                let ranges = MaterialRanges::new(&storage);
                iterate_pair_second_order(
                    &mut storage,
                    &mut predictions,
                    &mut CorrectSecond { dt, ranges: &ranges },
                );
                iterate_pair_first_order(
                    &mut storage,
                    &mut predictions,
                    &mut CorrectFirst { dt, ranges: &ranges },
                );
                Ok(())
            })
    }

    fn time_step(&self) -> f64 {
        self.stepper.time_step
    }
}

// --- Leapfrog -------------------------------------------------------------

/// Symplectic drift-kick-drift leapfrog
pub struct LeapFrog {
    stepper: Stepper,
}

impl LeapFrog {
    /// Creates the integrator
    pub fn new(storage: SharedStorage, settings: &RunSettings) -> Result<Self> {
        Ok(LeapFrog {
            stepper: Stepper::new(storage, settings)?,
        })
    }
}

impl TimeStepping for LeapFrog {
    fn step(
        &mut self,
        scheduler: &dyn Scheduler,
        solver: &mut dyn Solver,
        stats: &mut Statistics,
    ) -> Result<()> {
        self.stepper
            .step_with(scheduler, solver, stats, |stepper, _scheduler, solver, stats| {
                let dt = stepper.time_step;
                let mut storage = stepper.storage.write().expect("storage lock poisoned");

                // first half drift
                solver.collide(&mut storage, stats, 0.5 * dt)?;
                let ranges = MaterialRanges::new(&storage);
                iterate_second_order(
                    &mut storage,
                    &mut SecondOrderDrift { dt: 0.5 * dt, ranges: &ranges },
                );
                drop(ranges);

                // kick from re-evaluated derivatives
                storage.zero_highest_derivatives();
                solver.integrate(&mut storage, stats)?;
                let ranges = MaterialRanges::new(&storage);
                iterate_first_order(&mut storage, &mut FirstOrderEuler { dt, ranges: &ranges });
                iterate_second_order(&mut storage, &mut SecondOrderKick { dt, ranges: &ranges });
                drop(ranges);

                // second half drift
                solver.collide(&mut storage, stats, 0.5 * dt)?;
                let ranges = MaterialRanges::new(&storage);
                iterate_second_order(
                    &mut storage,
                    &mut SecondOrderDrift { dt: 0.5 * dt, ranges: &ranges },
                );
                Ok(())
            })
    }

    fn time_step(&self) -> f64 {
        self.stepper.time_step
    }
}

// --- Runge-Kutta 4 --------------------------------------------------------

/// Classic fourth-order Runge-Kutta integrator
///
/// Keeps four full stage storages registered as dependents; the stages
/// advance with midpoint factors 1/2, 1/2, 1 and accumulate into the main
/// state with weights 1/6, 1/3, 1/3, 1/6.
pub struct RungeKutta {
    stepper: Stepper,
    stages: [SharedStorage; 4],
}

impl RungeKutta {
    /// Creates the integrator; quantities must already be created
    pub fn new(storage: SharedStorage, settings: &RunSettings) -> Result<Self> {
        let stages = {
            let mut guard = storage.write().expect("storage lock poisoned");
            debug_assert!(guard.quantity_cnt() > 0, "quantities must be created first");
            let make = |guard: &Storage| {
                Arc::new(RwLock::new(guard.clone_buffers(VisitorEnum::AllBuffers)))
            };
            let stages = [make(&guard), make(&guard), make(&guard), make(&guard)];
            for stage in &stages {
                guard.add_dependent(stage);
            }
            guard.zero_highest_derivatives();
            stages
        };
        Ok(RungeKutta {
            stepper: Stepper::new(storage, settings)?,
            stages,
        })
    }
}

/// Advances stage state by m dt and accumulates n dt into the main state
struct RkAdvanceFirst {
    m_dt: f64,
    n_dt: f64,
}

impl PairFirstOrderVisitor for RkAdvanceFirst {
    fn visit<T: ArithmeticValue>(
        &mut self,
        _id: QuantityId,
        kx: &mut [T],
        kdx: &mut [T],
        x: &mut [T],
        _dx: &mut [T],
    ) {
        for i in 0..kx.len() {
            kx[i] = kx[i] + kdx[i] * self.m_dt;
            x[i] = x[i] + kdx[i] * self.n_dt;
        }
    }
}

struct RkAdvanceSecond {
    m_dt: f64,
    n_dt: f64,
}

impl PairSecondOrderVisitor for RkAdvanceSecond {
    fn visit<T: ArithmeticValue>(
        &mut self,
        _id: QuantityId,
        kx: &mut [T],
        kdx: &mut [T],
        kd2x: &mut [T],
        x: &mut [T],
        dx: &mut [T],
        _d2x: &mut [T],
    ) {
        for i in 0..kx.len() {
            kx[i] = kx[i] + kdx[i] * self.m_dt;
            kdx[i] = kdx[i] + kd2x[i] * self.m_dt;
            x[i] = x[i] + kdx[i] * self.n_dt;
            dx[i] = dx[i] + kd2x[i] * self.n_dt;
        }
    }
}

impl TimeStepping for RungeKutta {
    fn step(
        &mut self,
        scheduler: &dyn Scheduler,
        solver: &mut dyn Solver,
        stats: &mut Statistics,
    ) -> Result<()> {
        let stages = self.stages.clone();
        self.stepper
            .step_with(scheduler, solver, stats, |stepper, _scheduler, solver, stats| {
                let dt = stepper.time_step;
                let mut storage = stepper.storage.write().expect("storage lock poisoned");

                // stage 1 starts from the current state
                {
                    let mut k1 = stages[0].write().expect("stage lock poisoned");
                    let mut state = storage.clone_buffers(VisitorEnum::StateValues);
                    k1.swap_buffers(&mut state, VisitorEnum::StateValues);
                }

                let factors = [(0.5, 1.0 / 6.0), (0.5, 1.0 / 3.0), (1.0, 1.0 / 3.0)];
                for (stage_idx, &(m, n)) in factors.iter().enumerate() {
                    let mut k = stages[stage_idx].write().expect("stage lock poisoned");
                    k.zero_highest_derivatives();
                    solver.integrate(&mut k, stats)?;
                    iterate_pair_first_order(
                        &mut k,
                        &mut storage,
                        &mut RkAdvanceFirst { m_dt: m * dt, n_dt: n * dt },
                    );
                    iterate_pair_second_order(
                        &mut k,
                        &mut storage,
                        &mut RkAdvanceSecond { m_dt: m * dt, n_dt: n * dt },
                    );
                    // the advanced stage state seeds the next stage
                    let mut next = stages[stage_idx + 1].write().expect("stage lock poisoned");
                    k.swap_buffers(&mut next, VisitorEnum::StateValues);
                }

                // final stage only contributes its derivatives
                {
                    let mut k4 = stages[3].write().expect("stage lock poisoned");
                    k4.zero_highest_derivatives();
                    solver.integrate(&mut k4, stats)?;
                    let sixth = dt / 6.0;
                    iterate_pair_first_order(
                        &mut storage,
                        &mut k4,
                        &mut RkFinalFirst { n_dt: sixth },
                    );
                    iterate_pair_second_order(
                        &mut storage,
                        &mut k4,
                        &mut RkFinalSecond { n_dt: sixth },
                    );
                }

                // clamp the composed state
                let ranges = MaterialRanges::new(&storage);
                iterate_second_order(&mut storage, &mut SecondOrderKick { dt: 0.0, ranges: &ranges });
                iterate_first_order(&mut storage, &mut FirstOrderEuler { dt: 0.0, ranges: &ranges });
                Ok(())
            })
    }

    fn time_step(&self) -> f64 {
        self.stepper.time_step
    }
}

struct RkFinalFirst {
    n_dt: f64,
}

impl PairFirstOrderVisitor for RkFinalFirst {
    fn visit<T: ArithmeticValue>(
        &mut self,
        _id: QuantityId,
        x: &mut [T],
        _dx: &mut [T],
        _kx: &mut [T],
        kdx: &mut [T],
    ) {
        for i in 0..x.len() {
            x[i] = x[i] + kdx[i] * self.n_dt;
        }
    }
}

struct RkFinalSecond {
    n_dt: f64,
}

impl PairSecondOrderVisitor for RkFinalSecond {
    fn visit<T: ArithmeticValue>(
        &mut self,
        _id: QuantityId,
        x: &mut [T],
        dx: &mut [T],
        _d2x: &mut [T],
        _kx: &mut [T],
        kdx: &mut [T],
        kd2x: &mut [T],
    ) {
        for i in 0..x.len() {
            x[i] = x[i] + kdx[i] * self.n_dt;
            dx[i] = dx[i] + kd2x[i] * self.n_dt;
        }
    }
}

// --- Modified midpoint ----------------------------------------------------

/// Modified midpoint method with n substeps
pub struct ModifiedMidpointMethod {
    stepper: Stepper,
    mid: SharedStorage,
    substeps: usize,
}

impl ModifiedMidpointMethod {
    /// Creates the integrator; quantities must already be created
    pub fn new(storage: SharedStorage, settings: &RunSettings) -> Result<Self> {
        let substeps: i64 = settings.get(RunSettingsId::TimesteppingMidpointCount)?;
        let mid = {
            let mut guard = storage.write().expect("storage lock poisoned");
            let shared = Arc::new(RwLock::new(guard.clone_buffers(VisitorEnum::AllBuffers)));
            // the solver is called with mid, so the propagation goes the
            // other way around
            shared
                .write()
                .expect("midpoint lock poisoned")
                .add_dependent(&storage);
            guard.zero_highest_derivatives();
            shared
        };
        Ok(ModifiedMidpointMethod {
            stepper: Stepper::new(storage, settings)?,
            mid,
            substeps: substeps.max(1) as usize,
        })
    }
}

struct MidpointSeedSecond {
    h: f64,
}

impl PairSecondOrderVisitor for MidpointSeedSecond {
    fn visit<T: ArithmeticValue>(
        &mut self,
        _id: QuantityId,
        mx: &mut [T],
        mdx: &mut [T],
        _md2x: &mut [T],
        x: &mut [T],
        dx: &mut [T],
        d2x: &mut [T],
    ) {
        for i in 0..mx.len() {
            mdx[i] = dx[i] + d2x[i] * self.h;
            mx[i] = x[i] + dx[i] * self.h;
        }
    }
}

struct MidpointSeedFirst {
    h: f64,
}

impl PairFirstOrderVisitor for MidpointSeedFirst {
    fn visit<T: ArithmeticValue>(
        &mut self,
        _id: QuantityId,
        mx: &mut [T],
        _mdx: &mut [T],
        x: &mut [T],
        dx: &mut [T],
    ) {
        for i in 0..mx.len() {
            mx[i] = x[i] + dx[i] * self.h;
        }
    }
}

struct MidpointLeapSecond {
    two_h: f64,
}

impl PairSecondOrderVisitor for MidpointLeapSecond {
    fn visit<T: ArithmeticValue>(
        &mut self,
        _id: QuantityId,
        x: &mut [T],
        dx: &mut [T],
        _d2x: &mut [T],
        _mx: &mut [T],
        mdx: &mut [T],
        md2x: &mut [T],
    ) {
        for i in 0..x.len() {
            dx[i] = dx[i] + md2x[i] * self.two_h;
            x[i] = x[i] + mdx[i] * self.two_h;
        }
    }
}

struct MidpointLeapFirst {
    two_h: f64,
}

impl PairFirstOrderVisitor for MidpointLeapFirst {
    fn visit<T: ArithmeticValue>(
        &mut self,
        _id: QuantityId,
        x: &mut [T],
        _dx: &mut [T],
        _mx: &mut [T],
        mdx: &mut [T],
    ) {
        for i in 0..x.len() {
            x[i] = x[i] + mdx[i] * self.two_h;
        }
    }
}

struct MidpointCloseSecond {
    h: f64,
}

impl PairSecondOrderVisitor for MidpointCloseSecond {
    fn visit<T: ArithmeticValue>(
        &mut self,
        _id: QuantityId,
        x: &mut [T],
        dx: &mut [T],
        _d2x: &mut [T],
        mx: &mut [T],
        mdx: &mut [T],
        md2x: &mut [T],
    ) {
        for i in 0..x.len() {
            dx[i] = (dx[i] + mdx[i] + md2x[i] * self.h) * 0.5;
            x[i] = (x[i] + mx[i] + mdx[i] * self.h) * 0.5;
        }
    }
}

struct MidpointCloseFirst {
    h: f64,
}

impl PairFirstOrderVisitor for MidpointCloseFirst {
    fn visit<T: ArithmeticValue>(
        &mut self,
        _id: QuantityId,
        x: &mut [T],
        _dx: &mut [T],
        mx: &mut [T],
        mdx: &mut [T],
    ) {
        for i in 0..x.len() {
            x[i] = (x[i] + mx[i] + mdx[i] * self.h) * 0.5;
        }
    }
}

impl TimeStepping for ModifiedMidpointMethod {
    fn step(
        &mut self,
        scheduler: &dyn Scheduler,
        solver: &mut dyn Solver,
        stats: &mut Statistics,
    ) -> Result<()> {
        let mid_shared = self.mid.clone();
        let substeps = self.substeps;
        self.stepper
            .step_with(scheduler, solver, stats, |stepper, _scheduler, solver, stats| {
                let h = stepper.time_step / substeps as f64;

                // the storage is a dependent of mid, so its lock must be
                // released whenever the solver runs on mid
                let integrate_mid = |solver: &mut dyn Solver, stats: &mut Statistics| -> Result<()> {
                    let mut mid = mid_shared.write().expect("midpoint lock poisoned");
                    mid.zero_highest_derivatives();
                    solver.integrate(&mut mid, stats)
                };

                // seed mid half a substep ahead of the storage
                {
                    let mut storage = stepper.storage.write().expect("storage lock poisoned");
                    let mut mid = mid_shared.write().expect("midpoint lock poisoned");
                    solver.collide(&mut storage, stats, h)?;
                    iterate_pair_second_order(&mut mid, &mut storage, &mut MidpointSeedSecond { h });
                    iterate_pair_first_order(&mut mid, &mut storage, &mut MidpointSeedFirst { h });
                }
                integrate_mid(solver, stats)?;

                // leapfrog, keeping mid half a substep ahead
                for _ in 0..substeps - 1 {
                    {
                        let mut storage = stepper.storage.write().expect("storage lock poisoned");
                        let mut mid = mid_shared.write().expect("midpoint lock poisoned");
                        solver.collide(&mut storage, stats, 2.0 * h)?;
                        iterate_pair_second_order(
                            &mut storage,
                            &mut mid,
                            &mut MidpointLeapSecond { two_h: 2.0 * h },
                        );
                        iterate_pair_first_order(
                            &mut storage,
                            &mut mid,
                            &mut MidpointLeapFirst { two_h: 2.0 * h },
                        );
                        storage.swap_buffers(&mut mid, VisitorEnum::AllBuffers);
                    }
                    integrate_mid(solver, stats)?;
                }

                // close with the averaging step
                let mut storage = stepper.storage.write().expect("storage lock poisoned");
                let mut mid = mid_shared.write().expect("midpoint lock poisoned");
                solver.collide(&mut storage, stats, h)?;
                iterate_pair_second_order(&mut storage, &mut mid, &mut MidpointCloseSecond { h });
                iterate_pair_first_order(&mut storage, &mut mid, &mut MidpointCloseFirst { h });

                let ranges = MaterialRanges::new(&storage);
                iterate_second_order(&mut storage, &mut SecondOrderKick { dt: 0.0, ranges: &ranges });
                iterate_first_order(&mut storage, &mut FirstOrderEuler { dt: 0.0, ranges: &ranges });
                Ok(())
            })
    }

    fn time_step(&self) -> f64 {
        self.stepper.time_step
    }
}

// --- Bulirsch-Stoer -------------------------------------------------------

/// Richardson-extrapolated integrator
///
/// Builds the work coefficients and correction-factor tables at
/// construction; the step evaluator itself is not provided and stepping
/// fails with a setup error.
pub struct BulirschStoer {
    stepper: Stepper,
    #[allow(dead_code)]
    work: Vec<f64>,
    #[allow(dead_code)]
    alpha: Vec<Vec<f64>>,
}

impl BulirschStoer {
    const STEPS: [usize; 9] = [2, 4, 6, 8, 10, 12, 14, 16, 18];

    /// Creates the integrator tables
    pub fn new(storage: SharedStorage, settings: &RunSettings) -> Result<Self> {
        let eps: f64 = settings.get(RunSettingsId::TimesteppingBsAccuracy)?;
        let size = Self::STEPS.len();

        // work coefficients A_i: the cost of reaching extrapolation order i
        let mut work = Vec::with_capacity(size + 1);
        work.push(Self::STEPS[0] as f64 + 1.0);
        for i in 1..=size {
            let last = *work.last().expect("non-empty");
            work.push(last + Self::STEPS[i.min(size - 1)] as f64);
        }

        // correction factors alpha(k, q)
        let mut alpha = vec![vec![0.0; size]; size];
        for q in 0..size {
            alpha[q][q] = 1.0;
            for k in 0..q {
                let exponent = (2 * k + 1) as f64 * (work[q + 1] - work[0] + 1.0);
                alpha[k][q] = (work[k + 1] - work[q + 1]) / eps.powf(exponent);
            }
        }

        Ok(BulirschStoer {
            stepper: Stepper::new(storage, settings)?,
            work,
            alpha,
        })
    }
}

impl TimeStepping for BulirschStoer {
    fn step(
        &mut self,
        _scheduler: &dyn Scheduler,
        _solver: &mut dyn Solver,
        _stats: &mut Statistics,
    ) -> Result<()> {
        Err(Error::InvalidSetup(
            "the Bulirsch-Stoer step evaluator is not implemented".into(),
        ))
    }

    fn time_step(&self) -> f64 {
        self.stepper.time_step
    }
}

/// Builds the integrator selected by the run settings
pub fn create_timestepping(
    storage: SharedStorage,
    settings: &RunSettings,
) -> Result<Box<dyn TimeStepping>> {
    let selected: TimesteppingEnum = settings.get(RunSettingsId::Timestepping)?;
    Ok(match selected {
        TimesteppingEnum::EulerExplicit => Box::new(EulerExplicit::new(storage, settings)?),
        TimesteppingEnum::PredictorCorrector => {
            Box::new(PredictorCorrector::new(storage, settings)?)
        }
        TimesteppingEnum::LeapFrog => Box::new(LeapFrog::new(storage, settings)?),
        TimesteppingEnum::RungeKutta4 => Box::new(RungeKutta::new(storage, settings)?),
        TimesteppingEnum::ModifiedMidpoint => {
            Box::new(ModifiedMidpointMethod::new(storage, settings)?)
        }
        TimesteppingEnum::BulirschStoer => Box::new(BulirschStoer::new(storage, settings)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vector;
    use crate::physics::materials::Material;
    use crate::quantities::OrderEnum;
    use crate::scheduler::SequentialScheduler;

    /// Solver applying a constant acceleration g = (0, 0, 1)
    struct UniformField;

    impl Solver for UniformField {
        fn integrate(&mut self, storage: &mut Storage, _stats: &mut Statistics) -> Result<()> {
            storage.zero_highest_derivatives();
            let dv = storage.d2t_mut::<Vector>(QuantityId::Position)?;
            for a in dv.iter_mut() {
                *a = Vector::new(0.0, 0.0, 1.0);
            }
            Ok(())
        }

        fn create(&mut self, _storage: &mut Storage, _material: &mut dyn Material) -> Result<()> {
            Ok(())
        }
    }

    fn single_particle() -> SharedStorage {
        let mut storage = Storage::new();
        storage
            .insert_values(
                QuantityId::Position,
                OrderEnum::Second,
                vec![Vector::with_h(0.0, 0.0, 0.0, 1.0)],
            )
            .unwrap();
        Arc::new(RwLock::new(storage))
    }

    fn fixed_step_settings(dt: f64) -> RunSettings {
        let mut settings = RunSettings::new();
        settings
            .set(RunSettingsId::TimesteppingInitialTimestep, dt)
            .set(RunSettingsId::TimesteppingMaxTimestep, dt);
        settings.set_flags(RunSettingsId::TimesteppingCriteria, crate::settings::CriterionFlags::empty());
        settings
    }

    fn run_free_fall(integrator: &mut dyn TimeStepping, t_end: f64, dt: f64) -> (f64, f64) {
        let mut solver = UniformField;
        let mut stats = Statistics::new();
        let steps = (t_end / dt).round() as usize;
        for _ in 0..steps {
            integrator
                .step(&SequentialScheduler, &mut solver, &mut stats)
                .unwrap();
        }
        (steps as f64 * dt, 0.0)
    }

    #[test]
    fn test_euler_free_fall() {
        let dt = 0.01;
        let storage = single_particle();
        let settings = fixed_step_settings(dt);
        let mut integrator = EulerExplicit::new(storage.clone(), &settings).unwrap();
        run_free_fall(&mut integrator, 1.0, dt);

        let guard = storage.read().unwrap();
        let r = guard.value::<Vector>(QuantityId::Position).unwrap()[0];
        let v = guard.dt::<Vector>(QuantityId::Position).unwrap()[0];
        // r = t^2/2 within O(dt), v = t within O(dt)
        assert!((r.z - 0.5).abs() < 2.0 * dt, "r_z = {}", r.z);
        assert!((v.z - 1.0).abs() < dt, "v_z = {}", v.z);
    }

    #[test]
    fn test_predictor_corrector_free_fall_is_exact_for_constant_force() {
        let dt = 0.01;
        let storage = single_particle();
        let settings = fixed_step_settings(dt);
        let mut integrator = PredictorCorrector::new(storage.clone(), &settings).unwrap();
        // warm start: the run driver evaluates derivatives of the initial
        // state before the first step
        {
            let mut guard = storage.write().unwrap();
            let mut stats = Statistics::new();
            UniformField.integrate(&mut guard, &mut stats).unwrap();
        }
        run_free_fall(&mut integrator, 1.0, dt);
        let guard = storage.read().unwrap();
        let r = guard.value::<Vector>(QuantityId::Position).unwrap()[0];
        assert!((r.z - 0.5).abs() < 1e-4, "r_z = {}", r.z);
    }

    #[test]
    fn test_leapfrog_free_fall() {
        let dt = 0.01;
        let storage = single_particle();
        let settings = fixed_step_settings(dt);
        let mut integrator = LeapFrog::new(storage.clone(), &settings).unwrap();
        run_free_fall(&mut integrator, 1.0, dt);
        let guard = storage.read().unwrap();
        let r = guard.value::<Vector>(QuantityId::Position).unwrap()[0];
        assert!((r.z - 0.5).abs() < 1e-10, "r_z = {}", r.z);
    }

    #[test]
    fn test_clamping_zeroes_derivative() {
        use crate::physics::materials::NullMaterial;
        let material = Arc::new(RwLock::new(NullMaterial::new()));
        material.write().unwrap().set_range(
            QuantityId::Energy,
            crate::math::Interval::at_least(0.0),
            0.0,
        );
        let mut inner = Storage::with_material(material);
        inner
            .insert_values(
                QuantityId::Position,
                OrderEnum::Second,
                vec![Vector::with_h(0.0, 0.0, 0.0, 1.0)],
            )
            .unwrap();
        inner
            .insert_values(QuantityId::Energy, OrderEnum::First, vec![0.1])
            .unwrap();
        inner.dt_mut::<f64>(QuantityId::Energy).unwrap()[0] = -100.0;
        let storage = Arc::new(RwLock::new(inner));

        struct NoForces;
        impl Solver for NoForces {
            fn integrate(&mut self, storage: &mut Storage, _stats: &mut Statistics) -> Result<()> {
                // keep the negative energy derivative set by the test
                let du = storage.dt_mut::<f64>(QuantityId::Energy)?;
                du[0] = -100.0;
                Ok(())
            }
            fn create(&mut self, _s: &mut Storage, _m: &mut dyn Material) -> Result<()> {
                Ok(())
            }
        }

        let settings = fixed_step_settings(0.01);
        let mut integrator = EulerExplicit::new(storage.clone(), &settings).unwrap();
        let mut solver = NoForces;
        let mut stats = Statistics::new();
        integrator
            .step(&SequentialScheduler, &mut solver, &mut stats)
            .unwrap();
        let guard = storage.read().unwrap();
        assert_eq!(guard.value::<f64>(QuantityId::Energy).unwrap()[0], 0.0);
        assert_eq!(guard.dt::<f64>(QuantityId::Energy).unwrap()[0], 0.0);
    }

    #[test]
    fn test_adaptive_step_updates_statistics() {
        let storage = single_particle();
        {
            let mut guard = storage.write().unwrap();
            guard
                .insert(QuantityId::SoundSpeed, OrderEnum::Zero, 10.0_f64)
                .unwrap();
        }
        let mut settings = RunSettings::new();
        settings
            .set(RunSettingsId::TimesteppingInitialTimestep, 1e-3)
            .set(RunSettingsId::TimesteppingMaxTimestep, 1.0)
            .set(RunSettingsId::TimesteppingCourant, 0.5);
        settings.set_flags(
            RunSettingsId::TimesteppingCriteria,
            crate::settings::CriterionFlags::COURANT,
        );
        let mut integrator = EulerExplicit::new(storage, &settings).unwrap();
        let mut solver = UniformField;
        let mut stats = Statistics::new();
        integrator
            .step(&SequentialScheduler, &mut solver, &mut stats)
            .unwrap();
        // courant: 0.5 * 1 / 10
        assert!((integrator.time_step() - 0.05).abs() < 1e-12);
        assert_eq!(
            stats.get_criterion(StatisticsId::TimestepCriterion),
            Some(CriterionId::Courant)
        );
    }

    #[test]
    fn test_factory_selects_configured_scheme() {
        use crate::settings::TimesteppingEnum;
        for scheme in [
            TimesteppingEnum::EulerExplicit,
            TimesteppingEnum::PredictorCorrector,
            TimesteppingEnum::LeapFrog,
            TimesteppingEnum::RungeKutta4,
            TimesteppingEnum::ModifiedMidpoint,
        ] {
            let storage = single_particle();
            let settings = fixed_step_settings(0.01).with(RunSettingsId::Timestepping, scheme);
            let mut integrator = create_timestepping(storage.clone(), &settings).unwrap();
            let mut solver = UniformField;
            let mut stats = Statistics::new();
            integrator
                .step(&SequentialScheduler, &mut solver, &mut stats)
                .unwrap();
            assert_eq!(integrator.time_step(), 0.01);
        }
    }

    #[test]
    fn test_bulirsch_stoer_step_not_provided() {
        let storage = single_particle();
        let settings = fixed_step_settings(0.01);
        let mut integrator = BulirschStoer::new(storage, &settings).unwrap();
        let mut solver = UniformField;
        let mut stats = Statistics::new();
        assert!(integrator
            .step(&SequentialScheduler, &mut solver, &mut stats)
            .is_err());
    }
}
