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
//! Sod shock tube
//!
//! One-dimensional Riemann problem with the classic initial state
//! (rho, p) = (1, 1) on the left and (0.125, 0.1) on the right, gamma 1.4.
//! After t = 0.2 the numerical density around the origin must match the
//! star-region value of the exact solution to a few percent.

use sph_engine::boundary::Projection1D;
use sph_engine::equations::{make_term, ContinuityEquation, PressureForce, StandardAV};
use sph_engine::math::{Interval, Vector};
use sph_engine::physics::materials::{EosMaterial, Material, MaterialInitialContext};
use sph_engine::quantities::{OrderEnum, QuantityId, SharedStorage, Storage};
use sph_engine::scheduler::{Scheduler, SequentialScheduler};
use sph_engine::settings::{
    BodySettings, BodySettingsId, EosEnum, RunSettings, RunSettingsId, YieldingEnum,
};
use sph_engine::solvers::{Solver, SymmetricSolver};
use sph_engine::statistics::Statistics;
use sph_engine::timestepping::{PredictorCorrector, TimeStepping};
use std::sync::{Arc, RwLock};

const GAMMA: f64 = 1.4;
const RHO_L: f64 = 1.0;
const P_L: f64 = 1.0;
const RHO_R: f64 = 0.125;
const P_R: f64 = 0.1;

/// Exact Riemann solution of the ideal-gas shock tube
///
/// Solves the pressure equation of the star region by Newton iteration and
/// samples the self-similar solution at xi = x / t.
struct RiemannSolution {
    p_star: f64,
    u_star: f64,
    rho_star_left: f64,
    rho_star_right: f64,
}

impl RiemannSolution {
    fn solve() -> Self {
        let cs_left = (GAMMA * P_L / RHO_L).sqrt();
        let cs_right = (GAMMA * P_R / RHO_R).sqrt();

        // f_K(p): velocity change across the left/right wave
        let wave = |p: f64, p_k: f64, rho_k: f64, cs_k: f64| -> (f64, f64) {
            if p > p_k {
                // shock
                let a = 2.0 / ((GAMMA + 1.0) * rho_k);
                let b = (GAMMA - 1.0) / (GAMMA + 1.0) * p_k;
                let f = (p - p_k) * (a / (p + b)).sqrt();
                let df = (a / (b + p)).sqrt() * (1.0 - 0.5 * (p - p_k) / (b + p));
                (f, df)
            } else {
                // rarefaction
                let exponent = (GAMMA - 1.0) / (2.0 * GAMMA);
                let f = 2.0 * cs_k / (GAMMA - 1.0) * ((p / p_k).powf(exponent) - 1.0);
                let df = 1.0 / (rho_k * cs_k) * (p / p_k).powf(-(GAMMA + 1.0) / (2.0 * GAMMA));
                (f, df)
            }
        };

        let mut p = 0.5 * (P_L + P_R);
        for _ in 0..50 {
            let (f_left, df_left) = wave(p, P_L, RHO_L, cs_left);
            let (f_right, df_right) = wave(p, P_R, RHO_R, cs_right);
            let f = f_left + f_right;
            let step = f / (df_left + df_right);
            p = (p - step).max(1e-10);
            if step.abs() < 1e-14 {
                break;
            }
        }
        let (f_left, _) = wave(p, P_L, RHO_L, cs_left);
        let (f_right, _) = wave(p, P_R, RHO_R, cs_right);
        let u_star = 0.5 * (f_right - f_left);

        // densities across the left rarefaction and the right shock
        let rho_star_left = RHO_L * (p / P_L).powf(1.0 / GAMMA);
        let ratio = p / P_R;
        let g = (GAMMA - 1.0) / (GAMMA + 1.0);
        let rho_star_right = RHO_R * (ratio + g) / (g * ratio + 1.0);

        RiemannSolution {
            p_star: p,
            u_star,
            rho_star_left,
            rho_star_right,
        }
    }

    /// Density of the exact solution at xi = x / t
    fn density(&self, xi: f64) -> f64 {
        let cs_left = (GAMMA * P_L / RHO_L).sqrt();
        let cs_star_left = (GAMMA * self.p_star / self.rho_star_left).sqrt();
        let head = -cs_left;
        let tail = self.u_star - cs_star_left;
        let shock_speed = {
            let cs_right = (GAMMA * P_R / RHO_R).sqrt();
            let ratio = self.p_star / P_R;
            cs_right * ((GAMMA + 1.0) / (2.0 * GAMMA) * ratio + (GAMMA - 1.0) / (2.0 * GAMMA)).sqrt()
        };
        if xi < head {
            RHO_L
        } else if xi < tail {
            // inside the rarefaction fan
            let u = 2.0 / (GAMMA + 1.0) * (cs_left + xi);
            let cs = cs_left - 0.5 * (GAMMA - 1.0) * u;
            RHO_L * (cs / cs_left).powf(2.0 / (GAMMA - 1.0))
        } else if xi < self.u_star {
            self.rho_star_left
        } else if xi < shock_speed {
            self.rho_star_right
        } else {
            RHO_R
        }
    }
}

fn sod_setup(settings: &RunSettings) -> (SharedStorage, SymmetricSolver<1>) {
    let scheduler: Arc<dyn Scheduler> = Arc::new(SequentialScheduler);
    let equations = make_term(PressureForce::new())
        + make_term(ContinuityEquation::new(settings).unwrap())
        + make_term(StandardAV::new());
    let mut solver = SymmetricSolver::<1>::new(
        scheduler,
        settings,
        equations,
        Box::new(Projection1D::new(Interval::new(-0.5, 0.5))),
    )
    .unwrap();

    // equal-mass particles; the spacing encodes the density jump
    let total_particles = 1000_usize;
    let total_mass = 0.5 * RHO_L + 0.5 * RHO_R;
    let particle_mass = total_mass / total_particles as f64;
    let left_cnt = (0.5 * RHO_L / particle_mass).round() as usize;
    let right_cnt = total_particles - left_cnt;
    let spacing_left = 0.5 / left_cnt as f64;
    let spacing_right = 0.5 / right_cnt as f64;
    let eta = 1.5;

    let mut positions = Vec::with_capacity(total_particles);
    let mut densities = Vec::with_capacity(total_particles);
    let mut energies = Vec::with_capacity(total_particles);
    for i in 0..left_cnt {
        let x = -0.5 + (i as f64 + 0.5) * spacing_left;
        positions.push(Vector::with_h(x, 0.0, 0.0, eta * spacing_left));
        densities.push(RHO_L);
        energies.push(P_L / ((GAMMA - 1.0) * RHO_L));
    }
    for i in 0..right_cnt {
        let x = (i as f64 + 0.5) * spacing_right;
        positions.push(Vector::with_h(x, 0.0, 0.0, eta * spacing_right));
        densities.push(RHO_R);
        energies.push(P_R / ((GAMMA - 1.0) * RHO_R));
    }

    let params = BodySettings::new()
        .with(BodySettingsId::Eos, EosEnum::IdealGas)
        .with(BodySettingsId::RheologyYielding, YieldingEnum::None)
        .with(BodySettingsId::AdiabaticIndex, GAMMA)
        .with(BodySettingsId::Density, RHO_L)
        .with(BodySettingsId::DensityRange, Interval::at_least(0.01))
        .with(BodySettingsId::DensityMin, 0.01)
        .with(BodySettingsId::Energy, P_L / ((GAMMA - 1.0) * RHO_L))
        .with(BodySettingsId::EnergyMin, 0.1);
    let material = Arc::new(RwLock::new(EosMaterial::new(params).unwrap()));
    let mut storage = Storage::with_material(material.clone());
    storage
        .insert_values(QuantityId::Position, OrderEnum::Second, positions)
        .unwrap();
    storage
        .insert(QuantityId::Mass, OrderEnum::Zero, particle_mass)
        .unwrap();
    {
        let mut guard = material.write().unwrap();
        solver.create(&mut storage, &mut *guard).unwrap();
        guard
            .create(&mut storage, &MaterialInitialContext::default())
            .unwrap();
    }
    storage
        .insert_values(QuantityId::Density, OrderEnum::First, densities)
        .unwrap();
    storage
        .insert_values(QuantityId::Energy, OrderEnum::First, energies)
        .unwrap();
    (Arc::new(RwLock::new(storage)), solver)
}

#[test]
fn sod_shock_tube_matches_riemann_solution() {
    let mut settings = RunSettings::new();
    settings
        .set(RunSettingsId::TimesteppingInitialTimestep, 1e-5)
        .set(RunSettingsId::TimesteppingMaxTimestep, 5e-4)
        .set(RunSettingsId::TimesteppingCourant, 0.2);

    let (storage, mut solver) = sod_setup(&settings);
    {
        // warm start the derivatives for the predictor step
        let mut guard = storage.write().unwrap();
        let mut stats = Statistics::new();
        solver.integrate(&mut guard, &mut stats).unwrap();
    }
    let mut integrator = PredictorCorrector::new(storage.clone(), &settings).unwrap();
    let mut stats = Statistics::new();

    let t_end = 0.2;
    let mut t = 0.0;
    let mut steps = 0;
    while t < t_end {
        integrator
            .step(&SequentialScheduler, &mut solver, &mut stats)
            .unwrap();
        t += integrator.time_step();
        steps += 1;
        assert!(steps < 200_000, "timestep collapsed; t = {}", t);
    }

    let exact = RiemannSolution::solve();
    // sanity of the exact solver against the standard Sod values
    assert!((exact.p_star - 0.30313).abs() < 1e-3);
    assert!((exact.u_star - 0.92745).abs() < 1e-3);
    assert!((exact.rho_star_left - 0.42632).abs() < 1e-3);

    // numerical density around the origin lies in the left star region
    let guard = storage.read().unwrap();
    let r = guard.value::<Vector>(QuantityId::Position).unwrap();
    let rho = guard.value::<f64>(QuantityId::Density).unwrap();
    let mut sum = 0.0;
    let mut cnt = 0;
    for i in 0..r.len() {
        if r[i].x.abs() <= 0.01 {
            sum += rho[i];
            cnt += 1;
        }
    }
    assert!(cnt > 3, "too few particles near the origin");
    let measured = sum / cnt as f64;
    let expected = exact.density(0.0);
    assert!(
        (measured - expected).abs() <= 0.05 * expected,
        "density at x = 0: {} vs {} ({} samples after {} steps)",
        measured,
        expected,
        cnt,
        steps
    );
}
