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
//! Look-up table kernel
//!
//! Precomputes the dimensionless kernel forms on a uniform grid in q^2 and
//! evaluates them by linear interpolation. Faster than any non-trivial
//! analytic kernel and accurate to about 1e-6.

use super::SphKernel;

const ENTRIES: usize = 40_000;

/// Look-up table approximation of an SPH kernel
#[derive(Clone)]
pub struct LutKernel<const D: usize> {
    values: Vec<f64>,
    grads: Vec<f64>,
    rad: f64,
    q_sqr_to_idx: f64,
}

impl<const D: usize> LutKernel<D> {
    /// Samples the given kernel into a table
    ///
    /// The source kernel must be normalized for the same dimension `D`.
    pub fn new(source: &dyn SphKernel) -> Self {
        debug_assert_eq!(source.dim(), D);
        let rad = source.radius();
        debug_assert!(rad > 0.0);
        let q_sqr_to_idx = ENTRIES as f64 / (rad * rad);
        // one entry past the end for interpolation of the last value
        let mut values = Vec::with_capacity(ENTRIES + 1);
        let mut grads = Vec::with_capacity(ENTRIES + 1);
        for i in 0..=ENTRIES {
            let q_sqr = i as f64 / q_sqr_to_idx;
            values.push(source.value_impl(q_sqr));
            grads.push(source.grad_impl(q_sqr));
        }
        LutKernel {
            values,
            grads,
            rad,
            q_sqr_to_idx,
        }
    }

    #[inline]
    fn interpolate(&self, table: &[f64], q_sqr: f64) -> f64 {
        debug_assert!(q_sqr >= 0.0);
        if q_sqr >= self.rad * self.rad {
            // outside of kernel support
            return 0.0;
        }
        let float_idx = self.q_sqr_to_idx * q_sqr;
        let idx = float_idx as usize;
        debug_assert!(idx < ENTRIES);
        let ratio = float_idx - idx as f64;
        table[idx] * (1.0 - ratio) + table[idx + 1] * ratio
    }
}

impl<const D: usize> SphKernel for LutKernel<D> {
    fn radius(&self) -> f64 {
        self.rad
    }

    fn dim(&self) -> usize {
        D
    }

    fn value_impl(&self, q_sqr: f64) -> f64 {
        self.interpolate(&self.values, q_sqr)
    }

    fn grad_impl(&self, q_sqr: f64) -> f64 {
        self.interpolate(&self.grads, q_sqr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{CubicSpline, Gaussian, TriangleKernel, WendlandC4};
    use crate::math::Vector;

    fn check_lut_accuracy(source: &dyn SphKernel, tolerance: f64) {
        let lut = LutKernel::<3>::new(source);
        assert_eq!(lut.radius(), source.radius());
        let mut q = 0.0;
        while q < source.radius() * 1.1 {
            let r = Vector::new(q, 0.0, 0.0);
            let exact = source.value(r, 1.0);
            let approx = lut.value(r, 1.0);
            assert!(
                (exact - approx).abs() <= tolerance,
                "value off at q = {}: {} vs {}",
                q,
                exact,
                approx
            );
            let exact_g = source.grad(r, 1.0).x;
            let approx_g = lut.grad(r, 1.0).x;
            assert!(
                (exact_g - approx_g).abs() <= tolerance * 10.0,
                "gradient off at q = {}: {} vs {}",
                q,
                exact_g,
                approx_g
            );
            q += 0.001;
        }
    }

    #[test]
    fn test_lut_matches_cubic_spline() {
        check_lut_accuracy(&CubicSpline::<3>::new(), 1e-5);
    }

    #[test]
    fn test_lut_matches_wendland() {
        check_lut_accuracy(&WendlandC4, 1e-5);
    }

    #[test]
    fn test_lut_matches_gaussian() {
        check_lut_accuracy(&Gaussian::<3>, 1e-5);
    }

    #[test]
    fn test_lut_zero_outside_support() {
        let lut = LutKernel::<3>::new(&CubicSpline::<3>::new());
        assert_eq!(lut.value(Vector::new(2.0, 0.0, 0.0), 1.0), 0.0);
        assert_eq!(lut.grad(Vector::new(5.0, 0.0, 0.0), 1.0), Vector::zero());
    }

    #[test]
    fn test_lut_of_triangle_kernel_values() {
        // the triangle kernel has a discontinuous gradient at the origin;
        // only the values are expected to interpolate accurately
        let source = TriangleKernel::<3>;
        let lut = LutKernel::<3>::new(&source);
        let mut q: f64 = 0.05;
        while q < 1.0 {
            let r = Vector::new(q, 0.0, 0.0);
            assert!((source.value(r, 1.0) - lut.value(r, 1.0)).abs() < 1e-4);
            q += 0.01;
        }
    }
}
