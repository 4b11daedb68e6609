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
//! Self-gravity
//!
//! Two interchangeable solvers: an O(N^2) brute-force reference and a
//! Barnes-Hut octree with quadrupole moments. Both smooth close encounters
//! with a gravity kernel matched to the SPH kernel, so the acceleration
//! transitions smoothly into the non-singular interior potential within
//! kernel support. [`GravitySolver`] wraps any SPH solver and adds the
//! gravitational accelerations and particle-attractor interactions after
//! the hydrodynamic pass.

mod barnes_hut;
mod brute_force;

pub use barnes_hut::BarnesHut;
pub use brute_force::BruteForceGravity;

use crate::error::Result;
use crate::math::{Vector, H};
use crate::physics::materials::Material;
use crate::quantities::{Attractor, QuantityId, Storage};
use crate::scheduler::Scheduler;
use crate::solvers::Solver;
use crate::statistics::Statistics;

/// Newtonian constant of gravitation in SI units (m^3 kg^-1 s^-2)
pub const GRAVITATIONAL_CONSTANT: f64 = 6.674e-11;

/// Evaluator of gravitational accelerations
pub trait Gravity: Send + Sync {
    /// Indexes the current particle state
    fn build(&mut self, scheduler: &dyn Scheduler, storage: &Storage) -> Result<()>;

    /// Adds the gravitational acceleration of every particle into `dv`
    fn eval_all(
        &self,
        scheduler: &dyn Scheduler,
        dv: &mut [Vector],
        stats: &mut Statistics,
    ) -> Result<()>;

    /// Acceleration at an arbitrary position (attractors, diagnostics)
    fn eval_at(&self, pos: Vector) -> Vector;
}

/// Solver decorator adding self-gravity and attractor interactions
pub struct GravitySolver<S: Solver> {
    inner: S,
    gravity: Box<dyn Gravity>,
    constant: f64,
}

impl<S: Solver> GravitySolver<S> {
    /// Wraps an SPH solver with the given gravity implementation
    pub fn new(inner: S, gravity: Box<dyn Gravity>, constant: f64) -> Self {
        GravitySolver {
            inner,
            gravity,
            constant,
        }
    }

    fn eval_attractors(&self, storage: &mut Storage) -> Result<()> {
        if storage.attractor_cnt() == 0 {
            return Ok(());
        }
        let attractors: Vec<Attractor> = storage.attractors().to_vec();
        let masses: Vec<f64> = storage.value::<f64>(QuantityId::Mass)?.to_vec();
        let positions: Vec<Vector> = storage.value::<Vector>(QuantityId::Position)?.to_vec();

        // pull of the attractors on every particle
        {
            let dv = storage.d2t_mut::<Vector>(QuantityId::Position)?;
            let constant = self.constant;
            crate::scheduler::parallel_for_each(dv, |i, dv_i| {
                let mut total = Vector::zero();
                for attractor in &attractors {
                    let delta = positions[i] - attractor.position;
                    let dist_sqr = delta.sqr_length().max(attractor.radius * attractor.radius);
                    let dist = dist_sqr.sqrt();
                    total -= delta * (constant * attractor.mass / (dist_sqr * dist));
                }
                let dh = dv_i[H];
                *dv_i += total;
                dv_i[H] = dh;
            });
        }

        // reaction of the particles on every attractor
        for attractor in storage.attractors_mut() {
            let mut total = Vector::zero();
            for (pos, mass) in positions.iter().zip(&masses) {
                let delta = attractor.position - *pos;
                let dist_sqr = delta.sqr_length().max(attractor.radius * attractor.radius);
                let dist = dist_sqr.sqrt();
                total -= delta * (self.constant * mass / (dist_sqr * dist));
            }
            attractor.acceleration = total;
        }
        Ok(())
    }
}

impl<S: Solver> Solver for GravitySolver<S> {
    fn integrate(&mut self, storage: &mut Storage, stats: &mut Statistics) -> Result<()> {
        self.inner.integrate(storage, stats)?;

        self.gravity.build(&crate::scheduler::SequentialScheduler, storage)?;
        // accumulate into a scratch buffer, then merge preserving the
        // smoothing-length rate lane
        let mut accelerations = vec![Vector::zero(); storage.particle_cnt()];
        self.gravity.eval_all(
            &crate::scheduler::SequentialScheduler,
            &mut accelerations,
            stats,
        )?;
        {
            let dv = storage.d2t_mut::<Vector>(QuantityId::Position)?;
            for (dv_i, a) in dv.iter_mut().zip(&accelerations) {
                let dh = dv_i[H];
                *dv_i += *a;
                dv_i[H] = dh;
            }
        }
        self.eval_attractors(storage)
    }

    fn collide(&mut self, storage: &mut Storage, stats: &mut Statistics, dt: f64) -> Result<()> {
        self.inner.collide(storage, stats, dt)
    }

    fn create(&mut self, storage: &mut Storage, material: &mut dyn Material) -> Result<()> {
        self.inner.create(storage, material)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::quantities::OrderEnum;
    use rand::{Rng, SeedableRng};

    /// Uniformly filled sphere of equal-mass particles
    pub(crate) fn uniform_sphere(cnt: usize, seed: u64) -> Storage {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut positions = Vec::with_capacity(cnt);
        while positions.len() < cnt {
            let candidate = Vector::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            if candidate.sqr_length() <= 1.0 {
                positions.push(Vector::with_h(candidate.x, candidate.y, candidate.z, 0.05));
            }
        }
        let mut storage = Storage::new();
        storage
            .insert_values(QuantityId::Position, OrderEnum::Second, positions)
            .unwrap();
        storage
            .insert(QuantityId::Mass, OrderEnum::Zero, 1.0 / cnt as f64)
            .unwrap();
        storage
    }

    #[test]
    fn test_attractor_pulls_particles() {
        struct NoOp;
        impl Solver for NoOp {
            fn integrate(&mut self, storage: &mut Storage, _stats: &mut Statistics) -> Result<()> {
                storage.zero_highest_derivatives();
                Ok(())
            }
            fn create(&mut self, _s: &mut Storage, _m: &mut dyn Material) -> Result<()> {
                Ok(())
            }
        }

        let mut storage = uniform_sphere(10, 3);
        storage.add_attractor(Attractor::new(
            Vector::new(10.0, 0.0, 0.0),
            Vector::zero(),
            1e3,
            0.1,
        ));
        let mut solver = GravitySolver::new(NoOp, Box::new(BruteForceGravity::new(1.0)), 1.0);
        let mut stats = Statistics::new();
        solver.integrate(&mut storage, &mut stats).unwrap();

        // all particles accelerate toward the attractor at +x
        let dv = storage.d2t::<Vector>(QuantityId::Position).unwrap();
        assert!(dv.iter().all(|a| a.x > 0.0));
        // and the attractor feels the opposite pull
        let attractor = storage.attractors()[0];
        assert!(attractor.acceleration.x < 0.0);
    }
}
