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
//! O(N^2) reference finder
//!
//! Checks every particle on every query. Used as the correctness reference
//! for the accelerated finders and acceptable for very small particle
//! counts.

use super::{FinderBase, FinderFlags, NeighborFinder, NeighborRecord};
use crate::math::Vector;
use crate::scheduler::Scheduler;

/// Reference finder scanning all points per query
#[derive(Default)]
pub struct BruteForceFinder {
    base: FinderBase,
}

impl BruteForceFinder {
    /// Creates an empty finder
    pub fn new() -> Self {
        BruteForceFinder::default()
    }

    fn find(
        &self,
        pos: Vector,
        radius: f64,
        query_rank: Option<usize>,
        out: &mut Vec<NeighborRecord>,
    ) -> usize {
        out.clear();
        let radius_sqr = radius * radius;
        for (j, point) in self.base.points.iter().enumerate() {
            if !self.base.passes(j, query_rank) {
                continue;
            }
            let distance_sqr = (*point - pos).sqr_length();
            if distance_sqr < radius_sqr {
                out.push(NeighborRecord {
                    index: j,
                    distance_sqr,
                });
            }
        }
        out.len()
    }
}

impl NeighborFinder for BruteForceFinder {
    fn build(&mut self, _scheduler: &dyn Scheduler, points: &[Vector], flags: FinderFlags) {
        self.base.set_points(points, flags);
    }

    fn find_all(&self, index: usize, radius: f64, out: &mut Vec<NeighborRecord>) -> usize {
        self.find(self.base.points[index], radius, None, out)
    }

    fn find_all_at(&self, pos: Vector, radius: f64, out: &mut Vec<NeighborRecord>) -> usize {
        self.find(pos, radius, None, out)
    }

    fn find_lower_rank(&self, index: usize, radius: f64, out: &mut Vec<NeighborRecord>) -> usize {
        self.find(
            self.base.points[index],
            radius,
            Some(self.base.rank_of(index)),
            out,
        )
    }
}
