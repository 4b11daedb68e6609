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
//! Computational domains
//!
//! A domain answers inside/outside queries, distances to its boundary, the
//! outward normal, projection onto the boundary and reflection across it.
//! Boundary conditions use these primitives to place ghost particles and
//! constrain escapees.

use crate::math::{Vector, H};

/// Region of space bounding a simulation
pub trait Domain: Send + Sync {
    /// Checks whether the point lies inside the domain
    fn contains(&self, pos: Vector) -> bool;

    /// Distance to the nearest boundary; positive inside, negative outside
    fn boundary_distance(&self, pos: Vector) -> f64;

    /// Outward unit normal of the boundary nearest to the point
    fn normal(&self, pos: Vector) -> Vector;

    /// Projects the point onto the nearest boundary, preserving the H lane
    fn project(&self, pos: Vector) -> Vector;

    /// Bounding box of the domain, when it is bounded
    fn bounds(&self) -> Option<(Vector, Vector)> {
        None
    }

    /// Volume of the domain, when it is bounded
    fn volume(&self) -> Option<f64> {
        None
    }

    /// Mirrors the point across the nearest boundary, preserving the H lane
    fn reflect(&self, pos: Vector) -> Vector {
        // reflection moves the point to the same distance on the other side
        let mut mirrored = pos + self.normal(pos) * (2.0 * self.boundary_distance(pos));
        mirrored[H] = pos[H];
        mirrored
    }
}

/// Half space bounded by an axis-aligned plane; the interior lies on the
/// positive side
pub struct HalfSpaceDomain {
    axis: usize,
    level: f64,
}

impl HalfSpaceDomain {
    /// Creates the half space { pos[axis] >= level }
    pub fn new(axis: usize, level: f64) -> Self {
        debug_assert!(axis < 3);
        HalfSpaceDomain { axis, level }
    }
}

impl Domain for HalfSpaceDomain {
    fn contains(&self, pos: Vector) -> bool {
        pos[self.axis] >= self.level
    }

    fn boundary_distance(&self, pos: Vector) -> f64 {
        pos[self.axis] - self.level
    }

    fn normal(&self, _pos: Vector) -> Vector {
        -Vector::unit(self.axis)
    }

    fn project(&self, pos: Vector) -> Vector {
        let mut projected = pos;
        projected[self.axis] = self.level;
        projected
    }
}

/// Axis-aligned box domain
pub struct BlockDomain {
    lower: Vector,
    upper: Vector,
}

impl BlockDomain {
    /// Creates the box from its corners
    pub fn new(lower: Vector, upper: Vector) -> Self {
        BlockDomain { lower, upper }
    }

    /// Axis and signed distance of the face nearest to the point
    fn nearest_face(&self, pos: Vector) -> (usize, f64) {
        let mut best_axis = 0;
        let mut best_distance = f64::INFINITY;
        for axis in 0..3 {
            let to_lower = pos[axis] - self.lower[axis];
            let to_upper = self.upper[axis] - pos[axis];
            if to_lower.abs() < best_distance.abs() {
                best_distance = to_lower;
                best_axis = axis;
            }
            if to_upper.abs() < best_distance.abs() {
                best_distance = to_upper;
                best_axis = axis;
            }
        }
        (best_axis, best_distance)
    }
}

impl Domain for BlockDomain {
    fn contains(&self, pos: Vector) -> bool {
        (0..3).all(|axis| pos[axis] >= self.lower[axis] && pos[axis] <= self.upper[axis])
    }

    fn boundary_distance(&self, pos: Vector) -> f64 {
        if self.contains(pos) {
            (0..3)
                .map(|axis| {
                    (pos[axis] - self.lower[axis]).min(self.upper[axis] - pos[axis])
                })
                .fold(f64::INFINITY, f64::min)
        } else {
            // negative distance to the clamped surface point
            let clamped = self.project(pos);
            -(clamped - pos).length()
        }
    }

    fn normal(&self, pos: Vector) -> Vector {
        let (axis, _) = self.nearest_face(pos);
        let center = (self.lower[axis] + self.upper[axis]) * 0.5;
        if pos[axis] >= center {
            Vector::unit(axis)
        } else {
            -Vector::unit(axis)
        }
    }

    fn project(&self, pos: Vector) -> Vector {
        let mut projected = pos;
        if self.contains(pos) {
            let (axis, _) = self.nearest_face(pos);
            let to_lower = pos[axis] - self.lower[axis];
            let to_upper = self.upper[axis] - pos[axis];
            projected[axis] = if to_lower < to_upper {
                self.lower[axis]
            } else {
                self.upper[axis]
            };
        } else {
            for axis in 0..3 {
                projected[axis] = projected[axis].clamp(self.lower[axis], self.upper[axis]);
            }
        }
        projected
    }

    fn bounds(&self) -> Option<(Vector, Vector)> {
        Some((self.lower, self.upper))
    }

    fn volume(&self) -> Option<f64> {
        let extent = self.upper - self.lower;
        Some(extent.x * extent.y * extent.z)
    }
}

/// Spherical domain
pub struct SphericalDomain {
    center: Vector,
    radius: f64,
}

impl SphericalDomain {
    /// Creates the sphere from its center and radius
    pub fn new(center: Vector, radius: f64) -> Self {
        debug_assert!(radius > 0.0);
        SphericalDomain { center, radius }
    }
}

impl Domain for SphericalDomain {
    fn contains(&self, pos: Vector) -> bool {
        (pos - self.center).sqr_length() <= self.radius * self.radius
    }

    fn boundary_distance(&self, pos: Vector) -> f64 {
        self.radius - (pos - self.center).length()
    }

    fn normal(&self, pos: Vector) -> Vector {
        let delta = pos - self.center;
        if delta.sqr_length() == 0.0 {
            Vector::unit(0)
        } else {
            delta.normalized()
        }
    }

    fn project(&self, pos: Vector) -> Vector {
        let mut projected = self.center + self.normal(pos) * self.radius;
        projected[H] = pos[H];
        projected
    }

    fn bounds(&self) -> Option<(Vector, Vector)> {
        let extent = Vector::splat(self.radius);
        Some((self.center - extent, self.center + extent))
    }

    fn volume(&self) -> Option<f64> {
        Some(4.0 / 3.0 * std::f64::consts::PI * self.radius * self.radius * self.radius)
    }
}
