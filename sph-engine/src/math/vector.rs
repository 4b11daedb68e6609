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
//! Four-lane particle vector
//!
//! Particle positions carry their smoothing length in a fourth lane, so a
//! single buffer stores both the spatial coordinates and the kernel scale.
//! Component-wise arithmetic applies to all four lanes; geometric operations
//! (`dot`, `cross`, `length`) use only the spatial lanes. Code that must
//! preserve the smoothing length across a vector update restores the H lane
//! explicitly.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Div, DivAssign, Index, IndexMut, Mul, MulAssign, Neg, Sub, SubAssign};

/// Index of the x component
pub const X: usize = 0;
/// Index of the y component
pub const Y: usize = 1;
/// Index of the z component
pub const Z: usize = 2;
/// Index of the smoothing-length lane
pub const H: usize = 3;

/// 3D vector with an additional smoothing-length lane
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector {
    /// X component
    pub x: f64,
    /// Y component
    pub y: f64,
    /// Z component
    pub z: f64,
    /// Smoothing length lane; zero for plain geometric vectors
    pub h: f64,
}

impl Vector {
    /// Creates a vector with a zero smoothing-length lane
    #[inline]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Vector { x, y, z, h: 0.0 }
    }

    /// Creates a vector with an explicit smoothing length
    #[inline]
    pub fn with_h(x: f64, y: f64, z: f64, h: f64) -> Self {
        Vector { x, y, z, h }
    }

    /// Creates a vector with all spatial components set to the same value
    #[inline]
    pub fn splat(v: f64) -> Self {
        Vector::new(v, v, v)
    }

    /// The zero vector
    #[inline]
    pub fn zero() -> Self {
        Vector::new(0.0, 0.0, 0.0)
    }

    /// Unit vector along the given axis
    #[inline]
    pub fn unit(axis: usize) -> Self {
        let mut v = Vector::zero();
        v[axis] = 1.0;
        v
    }

    /// Dot product over the spatial lanes
    #[inline]
    pub fn dot(&self, other: Vector) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Cross product over the spatial lanes; the H lane of the result is zero
    #[inline]
    pub fn cross(&self, other: Vector) -> Vector {
        Vector::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Squared Euclidean norm of the spatial lanes
    #[inline]
    pub fn sqr_length(&self) -> f64 {
        self.dot(*self)
    }

    /// Euclidean norm of the spatial lanes
    #[inline]
    pub fn length(&self) -> f64 {
        self.sqr_length().sqrt()
    }

    /// Returns the unit vector in the direction of self
    ///
    /// The caller must ensure the vector is non-zero.
    #[inline]
    pub fn normalized(&self) -> Vector {
        let len = self.length();
        debug_assert!(len > 0.0);
        Vector::new(self.x / len, self.y / len, self.z / len)
    }

    /// Largest absolute spatial component
    #[inline]
    pub fn max_element(&self) -> f64 {
        self.x.max(self.y).max(self.z)
    }

    /// Smallest spatial component
    #[inline]
    pub fn min_element(&self) -> f64 {
        self.x.min(self.y).min(self.z)
    }

    /// Component-wise minimum over spatial lanes
    #[inline]
    pub fn min(&self, other: Vector) -> Vector {
        Vector::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    /// Component-wise maximum over spatial lanes
    #[inline]
    pub fn max(&self, other: Vector) -> Vector {
        Vector::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }

    /// Checks that all four lanes are finite
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.h.is_finite()
    }
}

impl Index<usize> for Vector {
    type Output = f64;

    #[inline]
    fn index(&self, idx: usize) -> &f64 {
        match idx {
            X => &self.x,
            Y => &self.y,
            Z => &self.z,
            H => &self.h,
            _ => panic!("vector index out of range: {}", idx),
        }
    }
}

impl IndexMut<usize> for Vector {
    #[inline]
    fn index_mut(&mut self, idx: usize) -> &mut f64 {
        match idx {
            X => &mut self.x,
            Y => &mut self.y,
            Z => &mut self.z,
            H => &mut self.h,
            _ => panic!("vector index out of range: {}", idx),
        }
    }
}

impl Add for Vector {
    type Output = Vector;

    #[inline]
    fn add(self, other: Vector) -> Vector {
        Vector::with_h(
            self.x + other.x,
            self.y + other.y,
            self.z + other.z,
            self.h + other.h,
        )
    }
}

impl Sub for Vector {
    type Output = Vector;

    #[inline]
    fn sub(self, other: Vector) -> Vector {
        Vector::with_h(
            self.x - other.x,
            self.y - other.y,
            self.z - other.z,
            self.h - other.h,
        )
    }
}

impl Neg for Vector {
    type Output = Vector;

    #[inline]
    fn neg(self) -> Vector {
        Vector::with_h(-self.x, -self.y, -self.z, -self.h)
    }
}

impl Mul<f64> for Vector {
    type Output = Vector;

    #[inline]
    fn mul(self, f: f64) -> Vector {
        Vector::with_h(self.x * f, self.y * f, self.z * f, self.h * f)
    }
}

impl Mul<Vector> for f64 {
    type Output = Vector;

    #[inline]
    fn mul(self, v: Vector) -> Vector {
        v * self
    }
}

impl Div<f64> for Vector {
    type Output = Vector;

    #[inline]
    fn div(self, f: f64) -> Vector {
        debug_assert!(f != 0.0);
        self * (1.0 / f)
    }
}

impl AddAssign for Vector {
    #[inline]
    fn add_assign(&mut self, other: Vector) {
        *self = *self + other;
    }
}

impl SubAssign for Vector {
    #[inline]
    fn sub_assign(&mut self, other: Vector) {
        *self = *self - other;
    }
}

impl MulAssign<f64> for Vector {
    #[inline]
    fn mul_assign(&mut self, f: f64) {
        *self = *self * f;
    }
}

impl DivAssign<f64> for Vector {
    #[inline]
    fn div_assign(&mut self, f: f64) {
        *self = *self / f;
    }
}
