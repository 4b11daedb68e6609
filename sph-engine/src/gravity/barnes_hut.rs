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
//! Barnes-Hut tree gravity
//!
//! Octree with per-node monopole and trace-free quadrupole moments. A node
//! is accepted when its size over the distance to its center of mass stays
//! below the opening angle; otherwise the walk descends, down to direct
//! kernel-smoothed summation in the leaves. Every evaluation tallies the
//! number of exactly and approximately evaluated nodes.
//!
//! # References
//!
//! - Barnes, J. & Hut, P. (1986). A hierarchical O(N log N)
//!   force-calculation algorithm. Nature 324.
//! - Stadel, J. (2001). Cosmological N-body simulations and their
//!   analysis. PhD thesis, University of Washington.

use super::Gravity;
use crate::error::Result;
use crate::kernel::{associated_gravity_kernel, GravityLutKernel};
use crate::math::{SymmetricTensor, Vector, H};
use crate::quantities::{QuantityId, Storage};
use crate::scheduler::Scheduler;
use crate::settings::GravityKernelEnum;
use crate::statistics::{Statistics, StatisticsId};
use std::sync::atomic::{AtomicI64, Ordering};

enum Node {
    Inner {
        children: Vec<usize>,
        mass: f64,
        com: Vector,
        /// Trace-free quadrupole moment around the center of mass
        quadrupole: SymmetricTensor,
        /// Side length of the node's cube
        size: f64,
    },
    Leaf {
        from: usize,
        to: usize,
    },
}

/// Tree gravity with quadrupole multipoles
pub struct BarnesHut {
    kernel: GravityLutKernel,
    constant: f64,
    opening_angle: f64,
    leaf_size: usize,
    nodes: Vec<Node>,
    order: Vec<usize>,
    r: Vec<Vector>,
    m: Vec<f64>,
}

impl BarnesHut {
    /// Creates the solver
    pub fn new(constant: f64, opening_angle: f64, leaf_size: usize) -> Self {
        BarnesHut {
            kernel: associated_gravity_kernel(GravityKernelEnum::SphKernel),
            constant,
            opening_angle,
            leaf_size: leaf_size.max(1),
            nodes: Vec::new(),
            order: Vec::new(),
            r: Vec::new(),
            m: Vec::new(),
        }
    }

    fn build_node(&mut self, from: usize, to: usize, center: Vector, size: f64) -> usize {
        let node_idx = self.nodes.len();
        if to - from <= self.leaf_size {
            self.nodes.push(Node::Leaf { from, to });
            return node_idx;
        }
        self.nodes.push(Node::Leaf { from: 0, to: 0 }); // placeholder

        // partition the particles into octants around the node center
        let mut octants: Vec<Vec<usize>> = vec![Vec::new(); 8];
        for &i in &self.order[from..to] {
            let mut octant = 0;
            for axis in 0..3 {
                if self.r[i][axis] >= center[axis] {
                    octant |= 1 << axis;
                }
            }
            octants[octant].push(i);
        }
        let mut children = Vec::new();
        let mut write = from;
        for (octant, indices) in octants.iter().enumerate() {
            if indices.is_empty() {
                continue;
            }
            let child_from = write;
            for &i in indices {
                self.order[write] = i;
                write += 1;
            }
            let mut child_center = center;
            for axis in 0..3 {
                let offset = if octant & (1 << axis) != 0 { 0.25 } else { -0.25 };
                child_center[axis] += offset * size;
            }
            // a degenerate split keeps everything in one octant; fall back
            // to a leaf to guarantee progress
            let child = if indices.len() == to - from {
                let leaf_idx = self.nodes.len();
                self.nodes.push(Node::Leaf {
                    from: child_from,
                    to: write,
                });
                leaf_idx
            } else {
                self.build_node(child_from, write, child_center, 0.5 * size)
            };
            children.push(child);
        }
        debug_assert_eq!(write, to);

        // moments from the particles of the subtree
        let mut mass = 0.0;
        let mut com = Vector::zero();
        for &i in &self.order[from..to] {
            mass += self.m[i];
            com += self.r[i] * self.m[i];
        }
        com = com / mass.max(1e-300);
        com[H] = 0.0;
        let mut quadrupole = SymmetricTensor::null();
        for &i in &self.order[from..to] {
            let x = self.r[i] - com;
            let outer = SymmetricTensor::symmetric_outer(x, x);
            quadrupole +=
                (outer * 3.0 - SymmetricTensor::identity() * x.sqr_length()) * self.m[i];
        }

        self.nodes[node_idx] = Node::Inner {
            children,
            mass,
            com,
            quadrupole,
            size,
        };
        node_idx
    }

    #[inline]
    fn pair_acceleration(&self, target: Vector, source: Vector, source_mass: f64) -> Vector {
        let delta = target - source;
        if delta.sqr_length() == 0.0 {
            return Vector::zero();
        }
        let h = source[H].max(target[H]).max(1e-12);
        -self.kernel.grad(delta, h) * (self.constant * source_mass)
    }

    fn multipole_acceleration(
        &self,
        target: Vector,
        mass: f64,
        com: Vector,
        quadrupole: &SymmetricTensor,
    ) -> Vector {
        let d = target - com;
        let dist_sqr = d.sqr_length();
        let dist = dist_sqr.sqrt();
        let inv3 = 1.0 / (dist_sqr * dist);
        let monopole = d * (-self.constant * mass * inv3);
        // quadrupole correction of the trace-free moment
        let inv5 = inv3 / dist_sqr;
        let inv7 = inv5 / dist_sqr;
        let qd = *quadrupole * d;
        let dqd = d.dot(qd);
        monopole + (qd * inv5 - d * (2.5 * dqd * inv7)) * self.constant
    }

    fn eval(&self, pos: Vector, skip: Option<usize>, exact: &mut i64, approx: &mut i64) -> Vector {
        let mut total = Vector::zero();
        if self.nodes.is_empty() {
            return total;
        }
        let mut stack = vec![0_usize];
        while let Some(node_idx) = stack.pop() {
            match &self.nodes[node_idx] {
                Node::Leaf { from, to } => {
                    *exact += 1;
                    for &j in &self.order[*from..*to] {
                        if skip == Some(j) {
                            continue;
                        }
                        total += self.pair_acceleration(pos, self.r[j], self.m[j]);
                    }
                }
                Node::Inner {
                    children,
                    mass,
                    com,
                    quadrupole,
                    size,
                } => {
                    let dist_sqr = (pos - *com).sqr_length();
                    if dist_sqr > 0.0
                        && size * size < self.opening_angle * self.opening_angle * dist_sqr
                    {
                        *approx += 1;
                        total += self.multipole_acceleration(pos, *mass, *com, quadrupole);
                    } else {
                        stack.extend_from_slice(children);
                    }
                }
            }
        }
        total
    }
}

impl Gravity for BarnesHut {
    fn build(&mut self, _scheduler: &dyn Scheduler, storage: &Storage) -> Result<()> {
        self.r = storage.value::<Vector>(QuantityId::Position)?.to_vec();
        self.m = storage.value::<f64>(QuantityId::Mass)?.to_vec();
        self.nodes.clear();
        self.order = (0..self.r.len()).collect();
        if self.r.is_empty() {
            return Ok(());
        }
        let mut lower = self.r[0];
        let mut upper = self.r[0];
        for p in &self.r {
            lower = lower.min(*p);
            upper = upper.max(*p);
        }
        let extent = upper - lower;
        let size = extent.max_element().max(1e-12);
        let center = Vector::new(
            0.5 * (lower.x + upper.x),
            0.5 * (lower.y + upper.y),
            0.5 * (lower.z + upper.z),
        );
        self.build_node(0, self.r.len(), center, size);
        Ok(())
    }

    fn eval_all(
        &self,
        _scheduler: &dyn Scheduler,
        dv: &mut [Vector],
        stats: &mut Statistics,
    ) -> Result<()> {
        debug_assert_eq!(dv.len(), self.r.len());
        let exact_total = AtomicI64::new(0);
        let approx_total = AtomicI64::new(0);
        let r = &self.r;
        crate::scheduler::parallel_for_each(dv, |i, dv_i| {
            let mut exact = 0;
            let mut approx = 0;
            let acceleration = self.eval(r[i], Some(i), &mut exact, &mut approx);
            exact_total.fetch_add(exact, Ordering::Relaxed);
            approx_total.fetch_add(approx, Ordering::Relaxed);
            let dh = dv_i[H];
            *dv_i += acceleration;
            dv_i[H] = dh;
        });
        stats.increment(
            StatisticsId::GravityNodesExact,
            exact_total.load(Ordering::Relaxed),
        );
        stats.increment(
            StatisticsId::GravityNodesApprox,
            approx_total.load(Ordering::Relaxed),
        );
        Ok(())
    }

    fn eval_at(&self, pos: Vector) -> Vector {
        let mut exact = 0;
        let mut approx = 0;
        self.eval(pos, None, &mut exact, &mut approx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gravity::tests::uniform_sphere;
    use crate::gravity::BruteForceGravity;
    use crate::scheduler::SequentialScheduler;

    #[test]
    fn test_matches_brute_force_on_uniform_sphere() {
        let storage = uniform_sphere(1000, 42);
        let cnt = storage.particle_cnt();

        let mut reference = BruteForceGravity::new(1.0);
        reference.build(&SequentialScheduler, &storage).unwrap();
        let mut dv_ref = vec![Vector::zero(); cnt];
        let mut stats = Statistics::new();
        reference
            .eval_all(&SequentialScheduler, &mut dv_ref, &mut stats)
            .unwrap();

        let mut tree = BarnesHut::new(1.0, 0.5, 20);
        tree.build(&SequentialScheduler, &storage).unwrap();
        let mut dv_tree = vec![Vector::zero(); cnt];
        tree.eval_all(&SequentialScheduler, &mut dv_tree, &mut stats)
            .unwrap();

        let r = storage.value::<Vector>(QuantityId::Position).unwrap();
        for i in 0..cnt {
            // near the origin the acceleration vanishes and the relative
            // error is ill-defined
            if r[i].length() < 0.2 {
                continue;
            }
            let exact = dv_ref[i];
            let approx = dv_tree[i];
            let error = (exact - approx).length() / exact.length().max(1e-12);
            assert!(
                error < 0.04,
                "particle {} at {:?}: error {:.3}",
                i,
                r[i],
                error
            );
        }
        assert!(stats.get_int(StatisticsId::GravityNodesApprox).unwrap_or(0) > 0);
    }

    #[test]
    fn test_opening_angle_zero_is_exact() {
        let storage = uniform_sphere(200, 7);
        let cnt = storage.particle_cnt();

        let mut reference = BruteForceGravity::new(1.0);
        reference.build(&SequentialScheduler, &storage).unwrap();
        let mut dv_ref = vec![Vector::zero(); cnt];
        let mut stats = Statistics::new();
        reference
            .eval_all(&SequentialScheduler, &mut dv_ref, &mut stats)
            .unwrap();

        let mut tree = BarnesHut::new(1.0, 0.0, 20);
        tree.build(&SequentialScheduler, &storage).unwrap();
        let mut dv_tree = vec![Vector::zero(); cnt];
        tree.eval_all(&SequentialScheduler, &mut dv_tree, &mut stats)
            .unwrap();

        for (exact, approx) in dv_ref.iter().zip(&dv_tree) {
            assert!((*exact - *approx).length() <= 1e-10 * exact.length().max(1e-12));
        }
    }

    #[test]
    fn test_eval_at_far_field_is_point_mass() {
        let storage = uniform_sphere(300, 11);
        let mut tree = BarnesHut::new(1.0, 0.5, 20);
        tree.build(&SequentialScheduler, &storage).unwrap();
        // total mass is 1, so far away a = 1 / d^2
        let a = tree.eval_at(Vector::new(100.0, 0.0, 0.0));
        assert!((a.x + 1e-4).abs() < 1e-6, "a = {:?}", a);
        assert!(a.y.abs() < 1e-6);
    }
}
