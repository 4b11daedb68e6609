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
//! Neighbor search
//!
//! A finder indexes the current particle positions and answers
//! fixed-radius queries. `find_all` returns every particle within the
//! radius including the queried one; `find_lower_rank` returns only
//! particles of strictly lower smoothing-length rank, which guarantees the
//! symmetric solver visits each unordered pair exactly once. Ties in
//! smoothing length break deterministically by index.

mod bruteforce;
mod kdtree;
mod periodic;
mod uniform_grid;

pub use bruteforce::BruteForceFinder;
pub use kdtree::KdTree;
pub use periodic::PeriodicFinder;
pub use uniform_grid::UniformGridFinder;

use crate::error::Result;
use crate::math::{Vector, H};
use crate::scheduler::Scheduler;
use crate::settings::{FinderEnum, RunSettings, RunSettingsId};

bitflags::bitflags! {
    /// Options of [`NeighborFinder::build`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FinderFlags: u32 {
        /// Build the smoothing-length rank, enabling `find_lower_rank`
        const MAKE_RANK = 1 << 0;
    }
}

/// One neighbor returned by a query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborRecord {
    /// Index of the neighbor in the built point set
    pub index: usize,
    /// Squared distance from the queried particle or position
    pub distance_sqr: f64,
}

/// Interface of neighbor-searching structures
pub trait NeighborFinder: Send + Sync {
    /// Indexes the given points; must be called before any query
    fn build(&mut self, scheduler: &dyn Scheduler, points: &[Vector], flags: FinderFlags);

    /// Finds all points within `radius` of the point with the given index,
    /// including the point itself
    ///
    /// The output array is cleared first. Returns the number of neighbors.
    fn find_all(&self, index: usize, radius: f64, out: &mut Vec<NeighborRecord>) -> usize;

    /// Finds all points within `radius` of an arbitrary position
    fn find_all_at(&self, pos: Vector, radius: f64, out: &mut Vec<NeighborRecord>) -> usize;

    /// Finds points within `radius` whose smoothing-length rank is strictly
    /// lower than the rank of the queried point
    ///
    /// Requires the finder to have been built with
    /// [`FinderFlags::MAKE_RANK`]. The queried point itself is never
    /// returned.
    fn find_lower_rank(&self, index: usize, radius: f64, out: &mut Vec<NeighborRecord>) -> usize;
}

/// Position copy and smoothing-length rank shared by finder implementations
#[derive(Default)]
pub(crate) struct FinderBase {
    pub(crate) points: Vec<Vector>,
    pub(crate) rank: Vec<usize>,
}

impl FinderBase {
    /// Stores the points and rebuilds the rank when requested
    pub(crate) fn set_points(&mut self, points: &[Vector], flags: FinderFlags) {
        self.points.clear();
        self.points.extend_from_slice(points);
        if flags.contains(FinderFlags::MAKE_RANK) {
            self.rank = make_rank(points);
        } else {
            self.rank.clear();
        }
    }

    /// Decides whether neighbor `j` passes the rank filter of query `i`
    ///
    /// Without a filter (`query_rank` = None) the point always passes.
    #[inline]
    pub(crate) fn passes(&self, j: usize, query_rank: Option<usize>) -> bool {
        match query_rank {
            None => true,
            Some(rank_i) => self.rank[j] < rank_i,
        }
    }

    /// Rank of the point used by `find_lower_rank` queries
    #[inline]
    pub(crate) fn rank_of(&self, index: usize) -> usize {
        debug_assert!(
            !self.rank.is_empty(),
            "finder was built without FinderFlags::MAKE_RANK"
        );
        self.rank[index]
    }
}

/// Builds the smoothing-length rank of the given points
///
/// The rank is the inverse of the permutation sorting particles by H
/// ascending; equal smoothing lengths are ordered by index, making the rank
/// deterministic.
pub fn make_rank(points: &[Vector]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_unstable_by(|&a, &b| {
        points[a][H]
            .partial_cmp(&points[b][H])
            .expect("smoothing lengths must not be NaN")
            .then(a.cmp(&b))
    });
    let mut rank = vec![0; points.len()];
    for (position, &index) in order.iter().enumerate() {
        rank[index] = position;
    }
    rank
}

/// Instantiates the neighbor finder selected by the run settings
pub fn create_finder(settings: &RunSettings) -> Result<Box<dyn NeighborFinder>> {
    let selected: FinderEnum = settings.get(RunSettingsId::Finder)?;
    Ok(match selected {
        FinderEnum::BruteForce => Box::new(BruteForceFinder::new()),
        FinderEnum::UniformGrid => Box::new(UniformGridFinder::new()),
        FinderEnum::KdTree => {
            let leaf_size: i64 = settings.get(RunSettingsId::FinderLeafSize)?;
            Box::new(KdTree::new(leaf_size as usize))
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::scheduler::SequentialScheduler;
    use rand::{Rng, SeedableRng};

    pub(crate) fn random_points(cnt: usize, seed: u64) -> Vec<Vector> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        (0..cnt)
            .map(|_| {
                Vector::with_h(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(0.1..0.5),
                )
            })
            .collect()
    }

    /// Checks that a finder returns exactly the same neighbor sets as the
    /// brute-force reference
    pub(crate) fn check_against_bruteforce(finder: &mut dyn NeighborFinder, points: &[Vector]) {
        let scheduler = SequentialScheduler;
        let mut reference = BruteForceFinder::new();
        reference.build(&scheduler, points, FinderFlags::MAKE_RANK);
        finder.build(&scheduler, points, FinderFlags::MAKE_RANK);

        let mut expected = Vec::new();
        let mut actual = Vec::new();
        for radius in [0.2, 0.5, 1.5] {
            for i in 0..points.len() {
                reference.find_all(i, radius, &mut expected);
                finder.find_all(i, radius, &mut actual);
                sort(&mut expected);
                sort(&mut actual);
                assert_eq!(expected, actual, "find_all mismatch at {} r = {}", i, radius);

                reference.find_lower_rank(i, radius, &mut expected);
                finder.find_lower_rank(i, radius, &mut actual);
                sort(&mut expected);
                sort(&mut actual);
                assert_eq!(expected, actual, "find_lower_rank mismatch at {}", i);
            }
        }
    }

    fn sort(records: &mut [NeighborRecord]) {
        records.sort_by_key(|r| r.index);
    }

    #[test]
    fn test_rank_is_deterministic_permutation() {
        let mut points = random_points(64, 42);
        points[10][H] = points[20][H]; // tie broken by index
        let rank = make_rank(&points);
        let mut sorted = rank.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..64).collect::<Vec<_>>());
        assert!(rank[10] < rank[20]);
    }

    #[test]
    fn test_symmetric_pairs_visited_once() {
        // every unordered pair within the radius appears exactly once in the
        // union of lower-rank neighbor lists
        let points = random_points(100, 7);
        let scheduler = SequentialScheduler;
        let mut finder = BruteForceFinder::new();
        finder.build(&scheduler, &points, FinderFlags::MAKE_RANK);
        let radius = 0.6;

        let mut pair_counts = std::collections::HashMap::new();
        let mut neighbors = Vec::new();
        for i in 0..points.len() {
            finder.find_lower_rank(i, radius, &mut neighbors);
            for record in &neighbors {
                let key = (i.min(record.index), i.max(record.index));
                *pair_counts.entry(key).or_insert(0) += 1;
            }
        }
        for ((a, b), cnt) in pair_counts {
            assert_eq!(cnt, 1, "pair ({}, {}) visited {} times", a, b, cnt);
            assert!((points[a] - points[b]).sqr_length() < radius * radius);
        }
    }
}
