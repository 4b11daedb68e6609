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
//! Accuracy of the time integrators on problems with known solutions

use sph_engine::error::Result;
use sph_engine::math::Vector;
use sph_engine::physics::materials::Material;
use sph_engine::quantities::{OrderEnum, QuantityId, SharedStorage, Storage};
use sph_engine::scheduler::SequentialScheduler;
use sph_engine::settings::{CriterionFlags, RunSettings, RunSettingsId};
use sph_engine::solvers::Solver;
use sph_engine::statistics::Statistics;
use sph_engine::timestepping::{EulerExplicit, LeapFrog, PredictorCorrector, TimeStepping};
use std::sync::{Arc, RwLock};

const DT: f64 = 0.01;

/// Acceleration field defined by a closure of position and velocity
struct FieldSolver<F: Fn(Vector, Vector) -> Vector + Send> {
    field: F,
}

impl<F: Fn(Vector, Vector) -> Vector + Send> Solver for FieldSolver<F> {
    fn integrate(&mut self, storage: &mut Storage, _stats: &mut Statistics) -> Result<()> {
        storage.zero_highest_derivatives();
        let r: Vec<Vector> = storage.value::<Vector>(QuantityId::Position)?.to_vec();
        let v: Vec<Vector> = storage.dt::<Vector>(QuantityId::Position)?.to_vec();
        let dv = storage.d2t_mut::<Vector>(QuantityId::Position)?;
        for i in 0..dv.len() {
            dv[i] = (self.field)(r[i], v[i]);
        }
        Ok(())
    }

    fn create(&mut self, _storage: &mut Storage, _material: &mut dyn Material) -> Result<()> {
        Ok(())
    }
}

fn particle_at(position: Vector, velocity: Vector) -> SharedStorage {
    let mut storage = Storage::new();
    storage
        .insert_values(
            QuantityId::Position,
            OrderEnum::Second,
            vec![Vector::with_h(position.x, position.y, position.z, 1.0)],
        )
        .unwrap();
    storage.dt_mut::<Vector>(QuantityId::Position).unwrap()[0] = velocity;
    Arc::new(RwLock::new(storage))
}

fn fixed_step_settings() -> RunSettings {
    let mut settings = RunSettings::new();
    settings
        .set(RunSettingsId::TimesteppingInitialTimestep, DT)
        .set(RunSettingsId::TimesteppingMaxTimestep, DT);
    settings.set_flags(RunSettingsId::TimesteppingCriteria, CriterionFlags::empty());
    settings
}

fn run<F: Fn(Vector, Vector) -> Vector + Send>(
    integrator: &mut dyn TimeStepping,
    storage: &SharedStorage,
    field: F,
    t_end: f64,
) {
    let mut solver = FieldSolver { field };
    // warm start: evaluate the derivatives of the initial state, as the run
    // driver does before the first step
    {
        let mut guard = storage.write().unwrap();
        let mut stats = Statistics::new();
        solver.integrate(&mut guard, &mut stats).unwrap();
    }
    let mut stats = Statistics::new();
    let steps = (t_end / DT).round() as usize;
    for _ in 0..steps {
        integrator
            .step(&SequentialScheduler, &mut solver, &mut stats)
            .unwrap();
    }
}

fn state(storage: &SharedStorage) -> (Vector, Vector) {
    let guard = storage.read().unwrap();
    let r = guard.value::<Vector>(QuantityId::Position).unwrap()[0];
    let v = guard.dt::<Vector>(QuantityId::Position).unwrap()[0];
    (r, v)
}

#[test]
fn free_fall_euler() {
    let gravity = |_r: Vector, _v: Vector| Vector::new(0.0, 0.0, 1.0);
    for t_end in [0.5, 1.0] {
        let storage = particle_at(Vector::zero(), Vector::zero());
        let settings = fixed_step_settings();
        let mut integrator = EulerExplicit::new(storage.clone(), &settings).unwrap();
        run(&mut integrator, &storage, gravity, t_end);
        let (r, v) = state(&storage);
        assert!(
            (r.z - 0.5 * t_end * t_end).abs() < 2.0 * DT,
            "t = {}: r_z = {}",
            t_end,
            r.z
        );
        assert!((v.z - t_end).abs() < DT, "t = {}: v_z = {}", t_end, v.z);
    }
}

#[test]
fn free_fall_predictor_corrector() {
    let gravity = |_r: Vector, _v: Vector| Vector::new(0.0, 0.0, 1.0);
    for t_end in [0.5, 1.0] {
        let storage = particle_at(Vector::zero(), Vector::zero());
        let settings = fixed_step_settings();
        let mut integrator = PredictorCorrector::new(storage.clone(), &settings).unwrap();
        run(&mut integrator, &storage, gravity, t_end);
        let (r, v) = state(&storage);
        assert!(
            (r.z - 0.5 * t_end * t_end).abs() < 1e-4,
            "t = {}: r_z = {}",
            t_end,
            r.z
        );
        assert!((v.z - t_end).abs() < DT, "t = {}: v_z = {}", t_end, v.z);
    }
}

#[test]
fn harmonic_oscillator_predictor_corrector() {
    let omega = 2.0 * std::f64::consts::PI;
    let spring = move |r: Vector, _v: Vector| r * (-omega * omega);
    let storage = particle_at(Vector::new(1.0, 0.0, 0.0), Vector::zero());
    let settings = fixed_step_settings();
    let mut integrator = PredictorCorrector::new(storage.clone(), &settings).unwrap();
    run(&mut integrator, &storage, spring, 1.0);
    let (r, v) = state(&storage);
    // after one full period the particle returns to its initial state
    assert!((r.x - 1.0).abs() < omega * DT, "r = {:?}", r);
    assert!(r.y.abs() < omega * DT && r.z.abs() < omega * DT);
    assert!(v.length() < omega * omega * DT, "v = {:?}", v);
}

#[test]
fn harmonic_oscillator_leapfrog_energy() {
    let omega = 2.0 * std::f64::consts::PI;
    let spring = move |r: Vector, _v: Vector| r * (-omega * omega);
    let storage = particle_at(Vector::new(1.0, 0.0, 0.0), Vector::zero());
    let settings = fixed_step_settings();
    let mut integrator = LeapFrog::new(storage.clone(), &settings).unwrap();
    run(&mut integrator, &storage, spring, 10.0);
    let (r, v) = state(&storage);
    // the symplectic integrator keeps the energy bounded over many periods
    let energy = 0.5 * v.sqr_length() + 0.5 * omega * omega * r.sqr_length();
    let initial = 0.5 * omega * omega;
    assert!(
        (energy - initial).abs() < 0.05 * initial,
        "energy drifted: {} vs {}",
        energy,
        initial
    );
}

#[test]
fn gyroscopic_motion() {
    // magnetic-type force: a = v x B with B = (0, 0, 1)
    let lorentz = |_r: Vector, v: Vector| v.cross(Vector::new(0.0, 0.0, 1.0));
    let storage = particle_at(Vector::new(1.0, 0.0, 0.0), Vector::new(0.0, -1.0, 0.5));
    let settings = fixed_step_settings();
    let mut integrator = PredictorCorrector::new(storage.clone(), &settings).unwrap();
    let t_end = std::f64::consts::PI;
    run(&mut integrator, &storage, lorentz, t_end);
    let (r, v) = state(&storage);
    // half a gyration: the perpendicular components reverse, the parallel
    // component drifts linearly
    let expected_r = Vector::new(t_end.cos(), -t_end.sin(), 0.5 * t_end);
    let expected_v = Vector::new(-t_end.sin(), -t_end.cos(), 0.5);
    assert!((r - expected_r).length() < 3.0 * DT, "r = {:?}", r);
    assert!((v - expected_v).length() < 3.0 * DT, "v = {:?}", v);
}

#[test]
fn attractor_drifts_with_constant_velocity() {
    let storage = particle_at(Vector::zero(), Vector::zero());
    storage.write().unwrap().add_attractor(sph_engine::quantities::Attractor::new(
        Vector::new(0.0, 0.0, 0.0),
        Vector::new(1.0, 0.0, 0.0),
        0.0,
        0.1,
    ));
    let settings = fixed_step_settings();
    let mut integrator = EulerExplicit::new(storage.clone(), &settings).unwrap();
    run(&mut integrator, &storage, |_r, _v| Vector::zero(), 1.0);
    let guard = storage.read().unwrap();
    let attractor = guard.attractors()[0];
    assert!((attractor.position.x - 1.0).abs() < 1e-10);
}
