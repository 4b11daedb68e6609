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
//! Uniform cell grid finder
//!
//! Hashes particles into a regular grid over their bounding box, with the
//! cell size chosen from the mean particle volume. Queries visit only the
//! cells overlapping the search sphere. Best suited for roughly homogeneous
//! particle distributions.

use super::{FinderBase, FinderFlags, NeighborFinder, NeighborRecord};
use crate::math::Vector;
use crate::scheduler::Scheduler;

/// Grid-hashing finder for homogeneous distributions
#[derive(Default)]
pub struct UniformGridFinder {
    base: FinderBase,
    cells: Vec<Vec<usize>>,
    dims: [usize; 3],
    origin: Vector,
    cell_size: f64,
}

impl UniformGridFinder {
    /// Creates an empty finder
    pub fn new() -> Self {
        UniformGridFinder::default()
    }

    #[inline]
    fn cell_coord(&self, pos: Vector, axis: usize) -> i64 {
        ((pos[axis] - self.origin[axis]) / self.cell_size).floor() as i64
    }

    #[inline]
    fn clamp_coord(&self, coord: i64, axis: usize) -> usize {
        coord.clamp(0, self.dims[axis] as i64 - 1) as usize
    }

    #[inline]
    fn cell_index(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.dims[1] + y) * self.dims[0] + x
    }

    fn find(
        &self,
        pos: Vector,
        radius: f64,
        query_rank: Option<usize>,
        out: &mut Vec<NeighborRecord>,
    ) -> usize {
        out.clear();
        if self.base.points.is_empty() {
            return 0;
        }
        let radius_sqr = radius * radius;
        let lo: Vec<usize> = (0..3)
            .map(|axis| self.clamp_coord(self.cell_coord(pos - Vector::splat(radius), axis), axis))
            .collect();
        let hi: Vec<usize> = (0..3)
            .map(|axis| self.clamp_coord(self.cell_coord(pos + Vector::splat(radius), axis), axis))
            .collect();
        for z in lo[2]..=hi[2] {
            for y in lo[1]..=hi[1] {
                for x in lo[0]..=hi[0] {
                    for &j in &self.cells[self.cell_index(x, y, z)] {
                        if !self.base.passes(j, query_rank) {
                            continue;
                        }
                        let distance_sqr = (self.base.points[j] - pos).sqr_length();
                        if distance_sqr < radius_sqr {
                            out.push(NeighborRecord {
                                index: j,
                                distance_sqr,
                            });
                        }
                    }
                }
            }
        }
        out.len()
    }
}

impl NeighborFinder for UniformGridFinder {
    fn build(&mut self, _scheduler: &dyn Scheduler, points: &[Vector], flags: FinderFlags) {
        self.base.set_points(points, flags);
        self.cells.clear();
        if points.is_empty() {
            self.dims = [1, 1, 1];
            self.cell_size = 1.0;
            return;
        }
        let mut lower = points[0];
        let mut upper = points[0];
        for p in points {
            lower = lower.min(*p);
            upper = upper.max(*p);
        }
        self.origin = lower;
        let extent = upper - lower;
        let volume = (extent.x.max(1e-12)) * (extent.y.max(1e-12)) * (extent.z.max(1e-12));
        // aim for a handful of particles per cell
        self.cell_size = (volume / points.len() as f64).cbrt().max(1e-12) * 2.0;
        for axis in 0..3 {
            self.dims[axis] = ((extent[axis] / self.cell_size).floor() as usize + 1).max(1);
        }
        self.cells = vec![Vec::new(); self.dims[0] * self.dims[1] * self.dims[2]];
        for (i, p) in points.iter().enumerate() {
            let x = self.clamp_coord(self.cell_coord(*p, 0), 0);
            let y = self.clamp_coord(self.cell_coord(*p, 1), 1);
            let z = self.clamp_coord(self.cell_coord(*p, 2), 2);
            let idx = self.cell_index(x, y, z);
            self.cells[idx].push(i);
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finders::tests::{check_against_bruteforce, random_points};

    #[test]
    fn test_matches_bruteforce() {
        let points = random_points(200, 1234);
        check_against_bruteforce(&mut UniformGridFinder::new(), &points);
    }

    #[test]
    fn test_degenerate_planar_distribution() {
        // all points in a plane; the grid must not collapse to zero cells
        let mut points = random_points(50, 5);
        for p in &mut points {
            p.z = 0.0;
        }
        check_against_bruteforce(&mut UniformGridFinder::new(), &points);
    }

    #[test]
    fn test_empty_build() {
        let mut finder = UniformGridFinder::new();
        finder.build(&crate::scheduler::SequentialScheduler, &[], FinderFlags::empty());
        let mut out = Vec::new();
        assert_eq!(finder.find_all_at(Vector::zero(), 1.0, &mut out), 0);
    }
}
