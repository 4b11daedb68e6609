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
//! Balanced k-d tree finder
//!
//! Splits recursively at the median of the longest bounding-box axis until
//! leaves hold at most `leaf_size` particles. Queries prune subtrees whose
//! bounding box lies outside the search sphere.

use super::{FinderBase, FinderFlags, NeighborFinder, NeighborRecord};
use crate::math::Vector;
use crate::scheduler::Scheduler;

enum Node {
    Inner {
        axis: usize,
        split: f64,
        /// Index of the right child; the left child directly follows the node
        right: usize,
    },
    Leaf {
        /// Range into the permutation array
        from: usize,
        to: usize,
    },
}

/// Median-split k-d tree
pub struct KdTree {
    base: FinderBase,
    nodes: Vec<Node>,
    /// Permutation of particle indices, leaves own contiguous ranges
    order: Vec<usize>,
    leaf_size: usize,
}

impl KdTree {
    /// Default maximal number of particles per leaf
    pub const DEFAULT_LEAF_SIZE: usize = 20;

    /// Creates a tree with the given leaf size
    pub fn new(leaf_size: usize) -> Self {
        KdTree {
            base: FinderBase::default(),
            nodes: Vec::new(),
            order: Vec::new(),
            leaf_size: leaf_size.max(1),
        }
    }

    fn build_node(&mut self, from: usize, to: usize) -> usize {
        let node_idx = self.nodes.len();
        if to - from <= self.leaf_size {
            self.nodes.push(Node::Leaf { from, to });
            return node_idx;
        }
        // select the longest axis of the bounding box
        let mut lower = self.base.points[self.order[from]];
        let mut upper = lower;
        for &i in &self.order[from..to] {
            lower = lower.min(self.base.points[i]);
            upper = upper.max(self.base.points[i]);
        }
        let extent = upper - lower;
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };
        let mid = (from + to) / 2;
        let points = &self.base.points;
        self.order[from..to].select_nth_unstable_by(mid - from, |&a, &b| {
            points[a][axis]
                .partial_cmp(&points[b][axis])
                .expect("positions must not be NaN")
        });
        let split = self.base.points[self.order[mid]][axis];

        self.nodes.push(Node::Leaf { from: 0, to: 0 }); // placeholder
        let left = self.build_node(from, mid);
        debug_assert_eq!(left, node_idx + 1);
        let right = self.build_node(mid, to);
        self.nodes[node_idx] = Node::Inner { axis, split, right };
        node_idx
    }

    fn find(
        &self,
        pos: Vector,
        radius: f64,
        query_rank: Option<usize>,
        out: &mut Vec<NeighborRecord>,
    ) -> usize {
        out.clear();
        if self.nodes.is_empty() {
            return 0;
        }
        let radius_sqr = radius * radius;
        let mut stack = vec![0_usize];
        while let Some(node_idx) = stack.pop() {
            match &self.nodes[node_idx] {
                Node::Leaf { from, to } => {
                    for &j in &self.order[*from..*to] {
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
                Node::Inner { axis, split, right } => {
                    let delta = pos[*axis] - split;
                    // the median point itself lives in the right subtree, so
                    // both sides must be visited when the sphere touches the
                    // splitting plane
                    if delta - radius < 0.0 {
                        stack.push(node_idx + 1);
                    }
                    if delta + radius >= 0.0 {
                        stack.push(*right);
                    }
                }
            }
        }
        out.len()
    }
}

impl Default for KdTree {
    fn default() -> Self {
        KdTree::new(Self::DEFAULT_LEAF_SIZE)
    }
}

impl NeighborFinder for KdTree {
    fn build(&mut self, _scheduler: &dyn Scheduler, points: &[Vector], flags: FinderFlags) {
        self.base.set_points(points, flags);
        self.nodes.clear();
        self.order = (0..points.len()).collect();
        if !points.is_empty() {
            self.build_node(0, points.len());
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
