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
//! Symmetric 3x3 tensors
//!
//! The engine stores velocity gradients, gradient correction matrices and
//! artificial stress as [`SymmetricTensor`] and deviatoric stress as
//! [`TracelessTensor`]. Both are plain `Copy` data with component-wise
//! arithmetic; the symmetric tensor additionally supports inversion and an
//! eigen-decomposition used by the artificial stress term.

use super::vector::Vector;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// Symmetric 3x3 tensor stored as diagonal and off-diagonal triples
///
/// The off-diagonal triple is ordered (xy, xz, yz).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SymmetricTensor {
    /// Diagonal components (xx, yy, zz)
    pub diag: Vector,
    /// Off-diagonal components (xy, xz, yz)
    pub offdiag: Vector,
}

impl SymmetricTensor {
    /// Creates a tensor from its diagonal and off-diagonal triples
    #[inline]
    pub fn new(diag: Vector, offdiag: Vector) -> Self {
        SymmetricTensor { diag, offdiag }
    }

    /// The zero tensor
    #[inline]
    pub fn null() -> Self {
        SymmetricTensor::new(Vector::zero(), Vector::zero())
    }

    /// The identity tensor
    #[inline]
    pub fn identity() -> Self {
        SymmetricTensor::new(Vector::splat(1.0), Vector::zero())
    }

    /// Symmetrized outer product 0.5 (v w^T + w v^T)
    #[inline]
    pub fn symmetric_outer(v: Vector, w: Vector) -> Self {
        SymmetricTensor::new(
            Vector::new(v.x * w.x, v.y * w.y, v.z * w.z),
            Vector::new(
                0.5 * (v.x * w.y + v.y * w.x),
                0.5 * (v.x * w.z + v.z * w.x),
                0.5 * (v.y * w.z + v.z * w.y),
            ),
        )
    }

    /// Component accessor by row and column
    #[inline]
    pub fn at(&self, r: usize, c: usize) -> f64 {
        debug_assert!(r < 3 && c < 3);
        if r == c {
            self.diag[r]
        } else {
            // map (0,1)->xy, (0,2)->xz, (1,2)->yz
            self.offdiag[r + c - 1]
        }
    }

    /// Trace of the tensor
    #[inline]
    pub fn trace(&self) -> f64 {
        self.diag.x + self.diag.y + self.diag.z
    }

    /// Determinant of the tensor
    pub fn determinant(&self) -> f64 {
        let d = self.diag;
        let o = self.offdiag;
        d.x * (d.y * d.z - o.z * o.z) - o.x * (o.x * d.z - o.z * o.y)
            + o.y * (o.x * o.z - d.y * o.y)
    }

    /// Inverse of the tensor
    ///
    /// Returns `None` when the tensor is singular.
    pub fn inverse(&self) -> Option<SymmetricTensor> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let d = self.diag;
        let o = self.offdiag;
        let inv_det = 1.0 / det;
        // cofactors of a symmetric matrix are again symmetric
        let c_diag = Vector::new(
            d.y * d.z - o.z * o.z,
            d.x * d.z - o.y * o.y,
            d.x * d.y - o.x * o.x,
        );
        let c_off = Vector::new(
            o.y * o.z - o.x * d.z,
            o.x * o.z - o.y * d.y,
            o.x * o.y - d.x * o.z,
        );
        Some(SymmetricTensor::new(c_diag * inv_det, c_off * inv_det))
    }

    /// Double-dot product (full contraction) with another tensor
    #[inline]
    pub fn ddot(&self, other: SymmetricTensor) -> f64 {
        self.diag.dot(other.diag) + 2.0 * self.offdiag.dot(other.offdiag)
    }

    /// Frobenius norm
    #[inline]
    pub fn norm(&self) -> f64 {
        self.ddot(*self).sqrt()
    }

    /// Largest absolute component
    pub fn max_abs_element(&self) -> f64 {
        let d = self.diag;
        let o = self.offdiag;
        d.x.abs()
            .max(d.y.abs())
            .max(d.z.abs())
            .max(o.x.abs())
            .max(o.y.abs())
            .max(o.z.abs())
    }

    /// Checks that all components are finite
    pub fn is_finite(&self) -> bool {
        self.diag.is_finite() && self.offdiag.is_finite()
    }

    /// Eigen-decomposition by cyclic Jacobi rotations
    ///
    /// Converges quadratically for symmetric matrices; 32 sweeps are far more
    /// than needed for f64 precision.
    pub fn eigen_decomposition(&self) -> Eigen {
        let mut a = [
            [self.diag.x, self.offdiag.x, self.offdiag.y],
            [self.offdiag.x, self.diag.y, self.offdiag.z],
            [self.offdiag.y, self.offdiag.z, self.diag.z],
        ];
        let mut v = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

        for _ in 0..32 {
            let off = a[0][1] * a[0][1] + a[0][2] * a[0][2] + a[1][2] * a[1][2];
            if off < 1e-28 {
                break;
            }
            for p in 0..2 {
                for q in (p + 1)..3 {
                    if a[p][q].abs() < 1e-30 {
                        continue;
                    }
                    let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                    let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                    let c = 1.0 / (t * t + 1.0).sqrt();
                    let s = t * c;
                    for k in 0..3 {
                        let akp = a[k][p];
                        let akq = a[k][q];
                        a[k][p] = c * akp - s * akq;
                        a[k][q] = s * akp + c * akq;
                    }
                    for k in 0..3 {
                        let apk = a[p][k];
                        let aqk = a[q][k];
                        a[p][k] = c * apk - s * aqk;
                        a[q][k] = s * apk + c * aqk;
                    }
                    for k in 0..3 {
                        let vkp = v[k][p];
                        let vkq = v[k][q];
                        v[k][p] = c * vkp - s * vkq;
                        v[k][q] = s * vkp + c * vkq;
                    }
                }
            }
        }

        Eigen {
            values: Vector::new(a[0][0], a[1][1], a[2][2]),
            vectors: [
                Vector::new(v[0][0], v[1][0], v[2][0]),
                Vector::new(v[0][1], v[1][1], v[2][1]),
                Vector::new(v[0][2], v[1][2], v[2][2]),
            ],
        }
    }

    /// Reconstructs a tensor from eigenvalues and an orthonormal eigenbasis
    ///
    /// Computes R diag(values) R^T where R has the given vectors as columns.
    pub fn from_eigen(values: Vector, vectors: &[Vector; 3]) -> SymmetricTensor {
        let mut result = SymmetricTensor::null();
        for (k, e) in vectors.iter().enumerate() {
            let lambda = values[k];
            result = result + SymmetricTensor::symmetric_outer(*e, *e) * lambda;
        }
        result
    }
}

/// Result of a symmetric eigen-decomposition
#[derive(Debug, Clone, Copy)]
pub struct Eigen {
    /// Eigenvalues, in no particular order
    pub values: Vector,
    /// Corresponding orthonormal eigenvectors
    pub vectors: [Vector; 3],
}

impl Add for SymmetricTensor {
    type Output = SymmetricTensor;

    #[inline]
    fn add(self, other: SymmetricTensor) -> SymmetricTensor {
        SymmetricTensor::new(self.diag + other.diag, self.offdiag + other.offdiag)
    }
}

impl Sub for SymmetricTensor {
    type Output = SymmetricTensor;

    #[inline]
    fn sub(self, other: SymmetricTensor) -> SymmetricTensor {
        SymmetricTensor::new(self.diag - other.diag, self.offdiag - other.offdiag)
    }
}

impl Neg for SymmetricTensor {
    type Output = SymmetricTensor;

    #[inline]
    fn neg(self) -> SymmetricTensor {
        SymmetricTensor::new(-self.diag, -self.offdiag)
    }
}

impl Mul<f64> for SymmetricTensor {
    type Output = SymmetricTensor;

    #[inline]
    fn mul(self, f: f64) -> SymmetricTensor {
        SymmetricTensor::new(self.diag * f, self.offdiag * f)
    }
}

impl Mul<SymmetricTensor> for f64 {
    type Output = SymmetricTensor;

    #[inline]
    fn mul(self, t: SymmetricTensor) -> SymmetricTensor {
        t * self
    }
}

impl Mul<Vector> for SymmetricTensor {
    type Output = Vector;

    /// Matrix-vector product; the H lane of the result is zero
    #[inline]
    fn mul(self, v: Vector) -> Vector {
        let d = self.diag;
        let o = self.offdiag;
        Vector::new(
            d.x * v.x + o.x * v.y + o.y * v.z,
            o.x * v.x + d.y * v.y + o.z * v.z,
            o.y * v.x + o.z * v.y + d.z * v.z,
        )
    }
}

impl AddAssign for SymmetricTensor {
    #[inline]
    fn add_assign(&mut self, other: SymmetricTensor) {
        *self = *self + other;
    }
}

impl SubAssign for SymmetricTensor {
    #[inline]
    fn sub_assign(&mut self, other: SymmetricTensor) {
        *self = *self - other;
    }
}

/// Traceless symmetric 3x3 tensor stored as five independent components
///
/// The zz component is implied by zz = -(xx + yy). Deviatoric stress is
/// traceless by construction, so storing the redundant component would only
/// invite drift.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TracelessTensor {
    /// xx component
    pub xx: f64,
    /// yy component
    pub yy: f64,
    /// xy component
    pub xy: f64,
    /// xz component
    pub xz: f64,
    /// yz component
    pub yz: f64,
}

impl TracelessTensor {
    /// Creates a tensor from its five independent components
    #[inline]
    pub fn new(xx: f64, yy: f64, xy: f64, xz: f64, yz: f64) -> Self {
        TracelessTensor { xx, yy, xy, xz, yz }
    }

    /// The zero tensor
    #[inline]
    pub fn null() -> Self {
        TracelessTensor::default()
    }

    /// The implied zz component
    #[inline]
    pub fn zz(&self) -> f64 {
        -(self.xx + self.yy)
    }

    /// Projects a symmetric tensor onto its traceless part
    pub fn from_symmetric(t: SymmetricTensor) -> Self {
        let third = t.trace() / 3.0;
        TracelessTensor::new(
            t.diag.x - third,
            t.diag.y - third,
            t.offdiag.x,
            t.offdiag.y,
            t.offdiag.z,
        )
    }

    /// Converts to a full symmetric tensor
    #[inline]
    pub fn to_symmetric(&self) -> SymmetricTensor {
        SymmetricTensor::new(
            Vector::new(self.xx, self.yy, self.zz()),
            Vector::new(self.xy, self.xz, self.yz),
        )
    }

    /// Double-dot product with a symmetric tensor
    #[inline]
    pub fn ddot(&self, other: SymmetricTensor) -> f64 {
        self.to_symmetric().ddot(other)
    }

    /// Frobenius norm
    #[inline]
    pub fn norm(&self) -> f64 {
        self.to_symmetric().norm()
    }

    /// Second invariant J2 = 0.5 s:s, used by yield criteria
    #[inline]
    pub fn second_invariant(&self) -> f64 {
        0.5 * self.to_symmetric().ddot(self.to_symmetric())
    }

    /// Largest absolute component
    pub fn max_abs_element(&self) -> f64 {
        self.xx
            .abs()
            .max(self.yy.abs())
            .max(self.zz().abs())
            .max(self.xy.abs())
            .max(self.xz.abs())
            .max(self.yz.abs())
    }

    /// Checks that all components are finite
    pub fn is_finite(&self) -> bool {
        self.xx.is_finite()
            && self.yy.is_finite()
            && self.xy.is_finite()
            && self.xz.is_finite()
            && self.yz.is_finite()
    }
}

impl Add for TracelessTensor {
    type Output = TracelessTensor;

    #[inline]
    fn add(self, other: TracelessTensor) -> TracelessTensor {
        TracelessTensor::new(
            self.xx + other.xx,
            self.yy + other.yy,
            self.xy + other.xy,
            self.xz + other.xz,
            self.yz + other.yz,
        )
    }
}

impl Sub for TracelessTensor {
    type Output = TracelessTensor;

    #[inline]
    fn sub(self, other: TracelessTensor) -> TracelessTensor {
        TracelessTensor::new(
            self.xx - other.xx,
            self.yy - other.yy,
            self.xy - other.xy,
            self.xz - other.xz,
            self.yz - other.yz,
        )
    }
}

impl Neg for TracelessTensor {
    type Output = TracelessTensor;

    #[inline]
    fn neg(self) -> TracelessTensor {
        TracelessTensor::new(-self.xx, -self.yy, -self.xy, -self.xz, -self.yz)
    }
}

impl Mul<f64> for TracelessTensor {
    type Output = TracelessTensor;

    #[inline]
    fn mul(self, f: f64) -> TracelessTensor {
        TracelessTensor::new(self.xx * f, self.yy * f, self.xy * f, self.xz * f, self.yz * f)
    }
}

impl Mul<TracelessTensor> for f64 {
    type Output = TracelessTensor;

    #[inline]
    fn mul(self, t: TracelessTensor) -> TracelessTensor {
        t * self
    }
}

impl Mul<Vector> for TracelessTensor {
    type Output = Vector;

    #[inline]
    fn mul(self, v: Vector) -> Vector {
        self.to_symmetric() * v
    }
}

impl AddAssign for TracelessTensor {
    #[inline]
    fn add_assign(&mut self, other: TracelessTensor) {
        *self = *self + other;
    }
}

impl SubAssign for TracelessTensor {
    #[inline]
    fn sub_assign(&mut self, other: TracelessTensor) {
        *self = *self - other;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_outer() {
        let t = SymmetricTensor::symmetric_outer(Vector::new(1.0, 2.0, 3.0), Vector::new(1.0, 2.0, 3.0));
        assert_eq!(t.diag, Vector::new(1.0, 4.0, 9.0));
        assert_eq!(t.offdiag, Vector::new(2.0, 3.0, 6.0));
        assert_eq!(t.trace(), 14.0);
    }

    #[test]
    fn test_inverse() {
        let t = SymmetricTensor::new(Vector::new(2.0, 3.0, 4.0), Vector::new(0.5, 0.25, 0.75));
        let inv = t.inverse().unwrap();
        // t * inv must be identity
        for axis in 0..3 {
            let col = inv * Vector::unit(axis);
            let back = t * col;
            for k in 0..3 {
                let expected = if k == axis { 1.0 } else { 0.0 };
                assert!((back[k] - expected).abs() < 1e-12, "axis {} lane {}", axis, k);
            }
        }
        assert!(SymmetricTensor::null().inverse().is_none());
    }

    #[test]
    fn test_eigen_decomposition_diagonal() {
        let t = SymmetricTensor::new(Vector::new(3.0, -1.0, 2.0), Vector::zero());
        let eigen = t.eigen_decomposition();
        let mut values = [eigen.values.x, eigen.values.y, eigen.values.z];
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert!((values[0] + 1.0).abs() < 1e-10);
        assert!((values[1] - 2.0).abs() < 1e-10);
        assert!((values[2] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn test_eigen_reconstruction() {
        let t = SymmetricTensor::new(Vector::new(2.0, 1.0, 3.0), Vector::new(0.4, -0.2, 0.7));
        let eigen = t.eigen_decomposition();
        let back = SymmetricTensor::from_eigen(eigen.values, &eigen.vectors);
        assert!((back.diag - t.diag).length() < 1e-9);
        assert!((back.offdiag - t.offdiag).length() < 1e-9);
    }

    #[test]
    fn test_traceless_round_trip() {
        let s = SymmetricTensor::new(Vector::new(1.0, 2.0, -3.0), Vector::new(0.1, 0.2, 0.3));
        let t = TracelessTensor::from_symmetric(s);
        assert!((t.to_symmetric().trace()).abs() < 1e-12);
        // already traceless input is preserved exactly
        let back = TracelessTensor::from_symmetric(t.to_symmetric());
        assert_eq!(t, back);
    }

    #[test]
    fn test_ddot() {
        let a = SymmetricTensor::identity();
        let b = SymmetricTensor::new(Vector::new(1.0, 2.0, 3.0), Vector::new(5.0, 6.0, 7.0));
        assert_eq!(a.ddot(b), 6.0);
    }
}
