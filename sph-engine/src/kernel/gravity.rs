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
//! Gravity smoothing kernels
//!
//! A gravity kernel is the potential associated with an SPH density kernel,
//! solving the radial Poisson equation d/dr(r^2 dphi/dr) = 4 pi r^2 W.
//! Outside the kernel support the potential reduces exactly to the point
//! mass, phi = -1/r; the gradient form is again divided by q so that the
//! acceleration stays finite at the origin.

use crate::math::Vector;
use crate::settings::GravityKernelEnum;

const ENTRIES: usize = 40_000;

/// Potential kernel associated with an SPH kernel
pub trait GravityKernel: Send + Sync {
    /// Dimensionless support radius of the associated density kernel
    fn radius(&self) -> f64;

    /// Dimensionless potential as a function of q^2
    fn value_impl(&self, q_sqr: f64) -> f64;

    /// Dimensionless radial derivative of the potential divided by q
    fn grad_impl(&self, q_sqr: f64) -> f64;
}

/// Closed-form potential of the M4 cubic spline kernel
pub struct M4GravityKernel;

impl GravityKernel for M4GravityKernel {
    fn radius(&self) -> f64 {
        2.0
    }

    fn value_impl(&self, q_sqr: f64) -> f64 {
        let q = q_sqr.sqrt();
        if q < 1.0 {
            2.0 / 3.0 * q_sqr - 0.3 * q_sqr * q_sqr + 0.1 * q_sqr * q_sqr * q - 1.4
        } else if q < 2.0 {
            4.0 / 3.0 * q_sqr - q_sqr * q + 0.3 * q_sqr * q_sqr - q_sqr * q_sqr * q / 30.0 - 1.6
                + 1.0 / (15.0 * q)
        } else {
            -1.0 / q
        }
    }

    fn grad_impl(&self, q_sqr: f64) -> f64 {
        let q = q_sqr.sqrt();
        if q < 1.0 {
            4.0 / 3.0 - 1.2 * q_sqr + 0.5 * q_sqr * q
        } else if q < 2.0 {
            8.0 / 3.0 - 3.0 * q + 1.2 * q_sqr - q_sqr * q / 6.0 - 1.0 / (15.0 * q_sqr * q)
        } else {
            1.0 / (q_sqr * q)
        }
    }
}

/// Potential of a homogeneous solid sphere
pub struct SolidSphereKernel;

impl GravityKernel for SolidSphereKernel {
    fn radius(&self) -> f64 {
        1.0
    }

    fn value_impl(&self, q_sqr: f64) -> f64 {
        let q = q_sqr.sqrt();
        if q < 1.0 {
            -0.5 * (3.0 - q_sqr)
        } else {
            -1.0 / q
        }
    }

    fn grad_impl(&self, q_sqr: f64) -> f64 {
        let q = q_sqr.sqrt();
        if q < 1.0 {
            1.0
        } else {
            1.0 / (q_sqr * q)
        }
    }
}

/// Look-up table form of a gravity kernel
///
/// The default kernel has zero support radius and is exactly the point-mass
/// potential everywhere.
#[derive(Clone)]
pub struct GravityLutKernel {
    values: Vec<f64>,
    grads: Vec<f64>,
    rad: f64,
    q_sqr_to_idx: f64,
}

impl GravityLutKernel {
    /// Point-mass kernel with no smoothing
    pub fn point_mass() -> Self {
        GravityLutKernel {
            values: Vec::new(),
            grads: Vec::new(),
            rad: 0.0,
            q_sqr_to_idx: 0.0,
        }
    }

    /// Samples the given kernel into a table
    pub fn new(source: &dyn GravityKernel) -> Self {
        let rad = source.radius();
        debug_assert!(rad > 0.0);
        let q_sqr_to_idx = ENTRIES as f64 / (rad * rad);
        let mut values = Vec::with_capacity(ENTRIES + 1);
        let mut grads = Vec::with_capacity(ENTRIES + 1);
        for i in 0..=ENTRIES {
            let q_sqr = i as f64 / q_sqr_to_idx;
            values.push(source.value_impl(q_sqr));
            grads.push(source.grad_impl(q_sqr));
        }
        GravityLutKernel {
            values,
            grads,
            rad,
            q_sqr_to_idx,
        }
    }

    /// Support radius of the associated density kernel
    pub fn radius(&self) -> f64 {
        self.rad
    }

    #[inline]
    fn interpolate(&self, table: &[f64], q_sqr: f64) -> f64 {
        let float_idx = self.q_sqr_to_idx * q_sqr;
        let idx = float_idx as usize;
        debug_assert!(idx < ENTRIES);
        let ratio = float_idx - idx as f64;
        table[idx] * (1.0 - ratio) + table[idx + 1] * ratio
    }

    /// Potential at separation `r` with smoothing length `h`
    ///
    /// Outside the support the value is the exact point-mass potential.
    pub fn value(&self, r: Vector, h: f64) -> f64 {
        let length = r.length();
        debug_assert!(length > 0.0);
        if length >= self.rad * h {
            -1.0 / length
        } else {
            let h_inv = 1.0 / h;
            h_inv * self.interpolate(&self.values, r.sqr_length() * h_inv * h_inv)
        }
    }

    /// Gradient of the potential at separation `r`
    ///
    /// Multiplying by G m yields the attraction toward the source; the
    /// gradient is zero at r = 0.
    pub fn grad(&self, r: Vector, h: f64) -> Vector {
        let length_sqr = r.sqr_length();
        if length_sqr == 0.0 {
            return Vector::zero();
        }
        if length_sqr >= self.rad * self.rad * h * h {
            r / (length_sqr * length_sqr.sqrt())
        } else {
            let h_inv = 1.0 / h;
            r * (h_inv * h_inv * h_inv * self.interpolate(&self.grads, length_sqr * h_inv * h_inv))
        }
    }
}

/// The gravity kernel associated with the given selection
pub fn associated_gravity_kernel(selected: GravityKernelEnum) -> GravityLutKernel {
    match selected {
        GravityKernelEnum::PointParticles => GravityLutKernel::point_mass(),
        GravityKernelEnum::SphKernel => GravityLutKernel::new(&M4GravityKernel),
        GravityKernelEnum::SolidSpheres => GravityLutKernel::new(&SolidSphereKernel),
    }
}
