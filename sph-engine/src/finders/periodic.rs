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
//! Periodic boundary wrapper
//!
//! Wraps any finder and repeats every query in the up to 27 periodic image
//! offsets of a rectangular domain, aggregating the hits. A particle can be
//! reported at most once per query; the closest image distance wins.

use super::{make_rank, FinderFlags, NeighborFinder, NeighborRecord};
use crate::math::Vector;
use crate::scheduler::Scheduler;

/// Rectangular periodic domain extents
#[derive(Debug, Clone, Copy)]
pub struct PeriodicBox {
    /// Lower corner of the domain
    pub lower: Vector,
    /// Upper corner of the domain
    pub upper: Vector,
}

impl PeriodicBox {
    /// Creates the box from its corners
    pub fn new(lower: Vector, upper: Vector) -> Self {
        PeriodicBox { lower, upper }
    }

    fn size(&self) -> Vector {
        self.upper - self.lower
    }
}

/// Finder decorator adding periodic images
pub struct PeriodicFinder<F: NeighborFinder> {
    inner: F,
    domain: PeriodicBox,
    points: Vec<Vector>,
    rank: Vec<usize>,
}

impl<F: NeighborFinder> PeriodicFinder<F> {
    /// Wraps a finder over the given periodic domain
    pub fn new(inner: F, domain: PeriodicBox) -> Self {
        PeriodicFinder {
            inner,
            domain,
            points: Vec::new(),
            rank: Vec::new(),
        }
    }

    fn find_periodic(
        &self,
        pos: Vector,
        radius: f64,
        query_rank: Option<usize>,
        out: &mut Vec<NeighborRecord>,
    ) -> usize {
        out.clear();
        let size = self.domain.size();
        let mut image = Vec::new();
        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let offset = Vector::new(
                        dx as f64 * size.x,
                        dy as f64 * size.y,
                        dz as f64 * size.z,
                    );
                    let shifted = pos + offset;
                    // skip images whose search sphere cannot reach the domain
                    if shifted.x + radius < self.domain.lower.x
                        || shifted.x - radius > self.domain.upper.x
                        || shifted.y + radius < self.domain.lower.y
                        || shifted.y - radius > self.domain.upper.y
                        || shifted.z + radius < self.domain.lower.z
                        || shifted.z - radius > self.domain.upper.z
                    {
                        continue;
                    }
                    self.inner.find_all_at(shifted, radius, &mut image);
                    for record in &image {
                        if let Some(rank_i) = query_rank {
                            if self.rank[record.index] >= rank_i {
                                continue;
                            }
                        }
                        match out.iter_mut().find(|r| r.index == record.index) {
                            Some(existing) => {
                                existing.distance_sqr =
                                    existing.distance_sqr.min(record.distance_sqr)
                            }
                            None => out.push(*record),
                        }
                    }
                }
            }
        }
        out.len()
    }
}

impl<F: NeighborFinder> NeighborFinder for PeriodicFinder<F> {
    fn build(&mut self, scheduler: &dyn Scheduler, points: &[Vector], flags: FinderFlags) {
        self.points.clear();
        self.points.extend_from_slice(points);
        if flags.contains(FinderFlags::MAKE_RANK) {
            self.rank = make_rank(points);
        } else {
            self.rank.clear();
        }
        // the rank filter is applied by the wrapper; the inner finder only
        // answers position queries
        self.inner.build(scheduler, points, FinderFlags::empty());
    }

    fn find_all(&self, index: usize, radius: f64, out: &mut Vec<NeighborRecord>) -> usize {
        self.find_periodic(self.points[index], radius, None, out)
    }

    fn find_all_at(&self, pos: Vector, radius: f64, out: &mut Vec<NeighborRecord>) -> usize {
        self.find_periodic(pos, radius, None, out)
    }

    fn find_lower_rank(&self, index: usize, radius: f64, out: &mut Vec<NeighborRecord>) -> usize {
        debug_assert!(!self.rank.is_empty());
        self.find_periodic(self.points[index], radius, Some(self.rank[index]), out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finders::BruteForceFinder;
    use crate::scheduler::SequentialScheduler;

    fn unit_box() -> PeriodicBox {
        PeriodicBox::new(Vector::zero(), Vector::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_wraps_across_boundary() {
        let points = vec![
            Vector::with_h(0.05, 0.5, 0.5, 0.1),
            Vector::with_h(0.95, 0.5, 0.5, 0.1),
        ];
        let mut finder = PeriodicFinder::new(BruteForceFinder::new(), unit_box());
        finder.build(&SequentialScheduler, &points, FinderFlags::empty());
        let mut out = Vec::new();
        finder.find_all(0, 0.2, &mut out);
        assert_eq!(out.len(), 2);
        let wrapped = out.iter().find(|r| r.index == 1).unwrap();
        // the image distance is 0.1, not 0.9
        assert!((wrapped.distance_sqr - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_no_duplicates_for_interior_query() {
        let points = vec![
            Vector::with_h(0.5, 0.5, 0.5, 0.1),
            Vector::with_h(0.6, 0.5, 0.5, 0.1),
        ];
        let mut finder = PeriodicFinder::new(BruteForceFinder::new(), unit_box());
        finder.build(&SequentialScheduler, &points, FinderFlags::empty());
        let mut out = Vec::new();
        finder.find_all(0, 0.3, &mut out);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_lower_rank_filter_applies_to_images() {
        let points = vec![
            Vector::with_h(0.05, 0.5, 0.5, 0.1),
            Vector::with_h(0.95, 0.5, 0.5, 0.2),
        ];
        let mut finder = PeriodicFinder::new(BruteForceFinder::new(), unit_box());
        finder.build(&SequentialScheduler, &points, FinderFlags::MAKE_RANK);
        let mut out = Vec::new();
        // particle 1 has the larger h, so it sees particle 0 across the wall
        finder.find_lower_rank(1, 0.2, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].index, 0);
        // and particle 0 sees nothing
        finder.find_lower_rank(0, 0.2, &mut out);
        assert!(out.is_empty());
    }
}
