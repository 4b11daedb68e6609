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
//! Two-body orbit driven by the gravity solver

use sph_engine::error::Result;
use sph_engine::gravity::{BruteForceGravity, GravitySolver};
use sph_engine::math::Vector;
use sph_engine::physics::materials::Material;
use sph_engine::quantities::{OrderEnum, QuantityId, Storage};
use sph_engine::scheduler::SequentialScheduler;
use sph_engine::settings::{CriterionFlags, RunSettings, RunSettingsId};
use sph_engine::solvers::Solver;
use sph_engine::statistics::Statistics;
use sph_engine::timestepping::{LeapFrog, TimeStepping};
use std::sync::{Arc, RwLock};

/// Inner solver with no hydrodynamic forces
struct NoHydro;

impl Solver for NoHydro {
    fn integrate(&mut self, storage: &mut Storage, _stats: &mut Statistics) -> Result<()> {
        storage.zero_highest_derivatives();
        Ok(())
    }

    fn create(&mut self, _storage: &mut Storage, _material: &mut dyn Material) -> Result<()> {
        Ok(())
    }
}

#[test]
fn circular_two_body_orbit_is_stable() {
    // equal unit masses at unit separation; circular orbit speed follows
    // from a = G m / d^2 = v^2 / (d / 2)
    let speed = (0.5_f64).sqrt();
    let mut storage = Storage::new();
    storage
        .insert_values(
            QuantityId::Position,
            OrderEnum::Second,
            vec![
                Vector::with_h(0.5, 0.0, 0.0, 0.01),
                Vector::with_h(-0.5, 0.0, 0.0, 0.01),
            ],
        )
        .unwrap();
    {
        let v = storage.dt_mut::<Vector>(QuantityId::Position).unwrap();
        v[0] = Vector::new(0.0, speed, 0.0);
        v[1] = Vector::new(0.0, -speed, 0.0);
    }
    storage.insert(QuantityId::Mass, OrderEnum::Zero, 1.0_f64).unwrap();
    let shared = Arc::new(RwLock::new(storage));

    let dt = 1e-3;
    let mut settings = RunSettings::new();
    settings
        .set(RunSettingsId::TimesteppingInitialTimestep, dt)
        .set(RunSettingsId::TimesteppingMaxTimestep, dt);
    settings.set_flags(RunSettingsId::TimesteppingCriteria, CriterionFlags::empty());

    let mut solver = GravitySolver::new(NoHydro, Box::new(BruteForceGravity::new(1.0)), 1.0);
    let mut integrator = LeapFrog::new(shared.clone(), &settings).unwrap();
    let mut stats = Statistics::new();

    // one full period T = 2 pi r / v
    let period = 2.0 * std::f64::consts::PI * 0.5 / speed;
    let steps = (period / dt).round() as usize;
    for _ in 0..steps {
        integrator
            .step(&SequentialScheduler, &mut solver, &mut stats)
            .unwrap();
        // the separation stays close to the initial one throughout
        let guard = shared.read().unwrap();
        let r = guard.value::<Vector>(QuantityId::Position).unwrap();
        let separation = (r[0] - r[1]).length();
        assert!(
            (separation - 1.0).abs() < 0.05,
            "orbit degraded: separation {}",
            separation
        );
    }

    let guard = shared.read().unwrap();
    let r = guard.value::<Vector>(QuantityId::Position).unwrap();
    // back near the starting configuration after one period
    assert!((r[0] - Vector::new(0.5, 0.0, 0.0)).length() < 0.05, "r0 = {:?}", r[0]);
    assert!((r[1] - Vector::new(-0.5, 0.0, 0.0)).length() < 0.05, "r1 = {:?}", r[1]);
}
