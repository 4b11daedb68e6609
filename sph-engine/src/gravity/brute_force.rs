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
//! O(N^2) gravity reference
//!
//! Sums every pair directly with the smoothed gravity kernel. The per-pair
//! accelerations obey Newton's third law to machine precision, making this
//! the correctness reference for the tree solver.

use super::Gravity;
use crate::error::Result;
use crate::kernel::{associated_gravity_kernel, GravityLutKernel};
use crate::math::{Vector, H};
use crate::quantities::{QuantityId, Storage};
use crate::scheduler::Scheduler;
use crate::settings::GravityKernelEnum;
use crate::statistics::{Statistics, StatisticsId};

/// Direct-summation gravity
pub struct BruteForceGravity {
    kernel: GravityLutKernel,
    constant: f64,
    r: Vec<Vector>,
    m: Vec<f64>,
}

impl BruteForceGravity {
    /// Creates the solver with SPH-kernel smoothing
    pub fn new(constant: f64) -> Self {
        BruteForceGravity {
            kernel: associated_gravity_kernel(GravityKernelEnum::SphKernel),
            constant,
            r: Vec::new(),
            m: Vec::new(),
        }
    }

    /// Creates the solver with an explicit gravity kernel
    pub fn with_kernel(kernel: GravityLutKernel, constant: f64) -> Self {
        BruteForceGravity {
            kernel,
            constant,
            r: Vec::new(),
            m: Vec::new(),
        }
    }

    #[inline]
    fn pair_acceleration(&self, target: Vector, source: Vector, source_mass: f64) -> Vector {
        let delta = target - source;
        if delta.sqr_length() == 0.0 {
            return Vector::zero();
        }
        // the H lane of the source carries the smoothing length of the pair
        let h = source[H].max(target[H]).max(1e-12);
        -self.kernel.grad(delta, h) * (self.constant * source_mass)
    }
}

impl Gravity for BruteForceGravity {
    fn build(&mut self, _scheduler: &dyn Scheduler, storage: &Storage) -> Result<()> {
        self.r = storage.value::<Vector>(QuantityId::Position)?.to_vec();
        self.m = storage.value::<f64>(QuantityId::Mass)?.to_vec();
        Ok(())
    }

    fn eval_all(
        &self,
        _scheduler: &dyn Scheduler,
        dv: &mut [Vector],
        stats: &mut Statistics,
    ) -> Result<()> {
        debug_assert_eq!(dv.len(), self.r.len());
        let r = &self.r;
        let m = &self.m;
        crate::scheduler::parallel_for_each(dv, |i, dv_i| {
            let mut total = Vector::zero();
            for j in 0..r.len() {
                if j == i {
                    continue;
                }
                total += self.pair_acceleration(r[i], r[j], m[j]);
            }
            let dh = dv_i[H];
            *dv_i += total;
            dv_i[H] = dh;
        });
        let n = self.r.len() as i64;
        stats.increment(StatisticsId::GravityNodesExact, n * (n - 1));
        Ok(())
    }

    fn eval_at(&self, pos: Vector) -> Vector {
        let mut total = Vector::zero();
        for (r, m) in self.r.iter().zip(&self.m) {
            total += self.pair_acceleration(pos, *r, *m);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gravity::tests::uniform_sphere;
    use crate::scheduler::SequentialScheduler;

    #[test]
    fn test_newtons_third_law() {
        let storage = uniform_sphere(50, 1);
        let mut gravity = BruteForceGravity::new(1.0);
        gravity.build(&SequentialScheduler, &storage).unwrap();

        let m = storage.value::<f64>(QuantityId::Mass).unwrap();
        let r = storage.value::<Vector>(QuantityId::Position).unwrap();
        for i in 0..10 {
            for j in (i + 1)..10 {
                let f_ij = gravity.pair_acceleration(r[i], r[j], m[j]) * m[i];
                let f_ji = gravity.pair_acceleration(r[j], r[i], m[i]) * m[j];
                assert_eq!(f_ij.x, -f_ji.x);
                assert_eq!(f_ij.y, -f_ji.y);
                assert_eq!(f_ij.z, -f_ji.z);
            }
        }
    }

    #[test]
    fn test_two_body_acceleration() {
        let mut storage = crate::quantities::Storage::new();
        storage
            .insert_values(
                QuantityId::Position,
                crate::quantities::OrderEnum::Second,
                vec![
                    Vector::with_h(0.0, 0.0, 0.0, 0.1),
                    Vector::with_h(10.0, 0.0, 0.0, 0.1),
                ],
            )
            .unwrap();
        storage
            .insert(QuantityId::Mass, crate::quantities::OrderEnum::Zero, 4.0_f64)
            .unwrap();
        let mut gravity = BruteForceGravity::new(1.0);
        gravity.build(&SequentialScheduler, &storage).unwrap();
        let mut dv = vec![Vector::zero(); 2];
        let mut stats = Statistics::new();
        gravity.eval_all(&SequentialScheduler, &mut dv, &mut stats).unwrap();
        // a = G m / d^2 = 4 / 100, toward the other body
        assert!((dv[0].x - 0.04).abs() < 1e-10);
        assert!((dv[1].x + 0.04).abs() < 1e-10);
    }

    #[test]
    fn test_total_momentum_conserved() {
        let storage = uniform_sphere(100, 9);
        let mut gravity = BruteForceGravity::new(1.0);
        gravity.build(&SequentialScheduler, &storage).unwrap();
        let mut dv = vec![Vector::zero(); 100];
        let mut stats = Statistics::new();
        gravity.eval_all(&SequentialScheduler, &mut dv, &mut stats).unwrap();
        let m = storage.value::<f64>(QuantityId::Mass).unwrap();
        let mut momentum_rate = Vector::zero();
        for (a, &mass) in dv.iter().zip(m) {
            momentum_rate += *a * mass;
        }
        assert!(momentum_rate.length() < 1e-12, "net force {:?}", momentum_rate);
    }
}
