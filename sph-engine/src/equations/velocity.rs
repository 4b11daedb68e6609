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
//! Velocity-field derivatives
//!
//! Divergence, rotation and symmetrized gradient of the velocity field,
//! discretized either with the central density (m_j / rho_i) or the
//! neighbor density (m_j / rho_j), and the strain-rate correction tensor
//! restoring first-order consistency of corrected gradients.

use super::accumulated::{Accumulated, BufferSource};
use super::derivative::{
    resolve_flags, Derivative, DerivativeEval, DerivativeFlags, DerivativePhase, GradCorrection,
    PairFilter,
};
use crate::error::Result;
use crate::math::{SymmetricTensor, Vector};
use crate::quantities::{OrderEnum, QuantityId, Storage};
use crate::settings::{DiscretizationEnum, RunSettings, RunSettingsId};
use std::any::Any;
use std::cell::Cell;

/// Output shape of one velocity derivative
pub trait VelocityTrait: Clone + PartialEq + Send + Sync + 'static {
    /// Accumulated output type
    type Output: super::accumulated::AccumulatedValue;

    /// Target quantity of the accumulated output
    const ID: QuantityId;

    /// Combines the velocity difference v_j - v_i with the kernel gradient
    fn eval(dv: Vector, grad: Vector) -> Self::Output;
}

/// div v = sum m/rho (v_j - v_i) . grad W
#[derive(Clone, PartialEq)]
pub struct DivergenceTrait;

impl VelocityTrait for DivergenceTrait {
    type Output = f64;
    const ID: QuantityId = QuantityId::VelocityDivergence;

    #[inline]
    fn eval(dv: Vector, grad: Vector) -> f64 {
        dv.dot(grad)
    }
}

/// rot v = sum m/rho grad W x (v_j - v_i)
#[derive(Clone, PartialEq)]
pub struct RotationTrait;

impl VelocityTrait for RotationTrait {
    type Output = Vector;
    const ID: QuantityId = QuantityId::VelocityRotation;

    #[inline]
    fn eval(dv: Vector, grad: Vector) -> Vector {
        grad.cross(dv)
    }
}

/// grad v = sum m/rho sym((v_j - v_i) (x) grad W)
#[derive(Clone, PartialEq)]
pub struct GradientTrait;

impl VelocityTrait for GradientTrait {
    type Output = SymmetricTensor;
    const ID: QuantityId = QuantityId::VelocityGradient;

    #[inline]
    fn eval(dv: Vector, grad: Vector) -> SymmetricTensor {
        SymmetricTensor::symmetric_outer(dv, grad)
    }
}

/// Generic velocity derivative over an output shape
pub struct VelocityTemplate<Tr: VelocityTrait> {
    discretization: DiscretizationEnum,
    flags: DerivativeFlags,
    marker: std::marker::PhantomData<Tr>,
}

impl<Tr: VelocityTrait> VelocityTemplate<Tr> {
    /// Creates the derivative with no extra flags
    pub fn new(settings: &RunSettings) -> Result<Self> {
        Self::with_flags(settings, DerivativeFlags::empty())
    }

    /// Creates the derivative with the requested flags, subject to the
    /// global setting overrides
    pub fn with_flags(settings: &RunSettings, flags: DerivativeFlags) -> Result<Self> {
        Ok(VelocityTemplate {
            discretization: settings.get(RunSettingsId::SphDiscretization)?,
            flags: resolve_flags(settings, flags)?,
            marker: std::marker::PhantomData,
        })
    }
}

struct BoundVelocity<'a, Tr: VelocityTrait> {
    v: &'a [Vector],
    rho: &'a [f64],
    m: &'a [f64],
    deriv: &'a [Cell<Tr::Output>],
    filter: PairFilter<'a>,
    correction: GradCorrection<'a>,
    discretization: DiscretizationEnum,
}

impl<Tr: VelocityTrait> BoundVelocity<'_, Tr> {
    #[inline]
    fn weight(&self, center: usize, neighbor: usize) -> f64 {
        match self.discretization {
            DiscretizationEnum::Standard => self.m[neighbor] / self.rho[center],
            DiscretizationEnum::BenzAsphaug => self.m[neighbor] / self.rho[neighbor],
        }
    }
}

impl<Tr: VelocityTrait> DerivativeEval for BoundVelocity<'_, Tr> {
    fn eval_neighs(&mut self, i: usize, neighs: &[usize], grads: &[Vector]) {
        for (&j, &grad) in neighs.iter().zip(grads) {
            if !self.filter.allows(i, j) {
                continue;
            }
            let value = Tr::eval(self.v[j] - self.v[i], self.correction.apply(i, grad));
            self.deriv[i].set(self.deriv[i].get() + value * self.weight(i, j));
        }
    }

    fn eval_symmetric(&mut self, i: usize, neighs: &[usize], grads: &[Vector]) {
        for (&j, &grad) in neighs.iter().zip(grads) {
            if !self.filter.allows(i, j) {
                continue;
            }
            // the pair value is invariant under swapping i and j; only the
            // discretization weight differs
            let value = Tr::eval(self.v[j] - self.v[i], grad);
            self.deriv[i].set(self.deriv[i].get() + value * self.weight(i, j));
            self.deriv[j].set(self.deriv[j].get() + value * self.weight(j, i));
        }
    }
}

impl<Tr: VelocityTrait> Derivative for VelocityTemplate<Tr> {
    fn is_symmetric(&self) -> bool {
        !self.flags.contains(DerivativeFlags::CORRECTED)
    }

    fn create(&self, results: &mut Accumulated) -> Result<()> {
        results.insert::<Tr::Output>(Tr::ID, OrderEnum::Zero, BufferSource::Unique)
    }

    fn bind<'a>(
        &'a self,
        input: &'a Storage,
        results: &'a Accumulated,
    ) -> Result<Box<dyn DerivativeEval + 'a>> {
        Ok(Box::new(BoundVelocity::<Tr> {
            v: input.dt::<Vector>(QuantityId::Position)?,
            rho: input.value::<f64>(QuantityId::Density)?,
            m: input.value::<f64>(QuantityId::Mass)?,
            deriv: results.get_buffer::<Tr::Output>(Tr::ID, OrderEnum::Zero)?,
            filter: PairFilter::bind(
                input,
                self.flags.contains(DerivativeFlags::SUM_ONLY_UNDAMAGED),
            )?,
            correction: GradCorrection::bind(
                results,
                self.flags.contains(DerivativeFlags::CORRECTED),
            )?,
            discretization: self.discretization,
        }))
    }

    fn equal_to(&self, other: &dyn Derivative) -> bool {
        other
            .as_any()
            .downcast_ref::<VelocityTemplate<Tr>>()
            .map_or(false, |o| {
                o.discretization == self.discretization && o.flags == self.flags
            })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn Derivative> {
        Box::new(VelocityTemplate::<Tr> {
            discretization: self.discretization,
            flags: self.flags,
            marker: std::marker::PhantomData,
        })
    }
}

/// Divergence of the velocity field
pub type VelocityDivergence = VelocityTemplate<DivergenceTrait>;

/// Rotation of the velocity field
pub type VelocityRotation = VelocityTemplate<RotationTrait>;

/// Symmetrized gradient of the velocity field
pub type VelocityGradient = VelocityTemplate<GradientTrait>;

/// Strain-rate correction tensor
///
/// Precomputation pass accumulating the kernel-gradient moment
/// sum m_j/rho_j sym((r_j - r_i) (x) grad W) and storing its inverse per
/// particle. Consumers with the CORRECTED flag read the result from the
/// thread-local accumulator, so this derivative must run before them;
/// it only supports asymmetric evaluation, where all pairs of a particle
/// arrive in a single call.
pub struct CorrectionTensor {
    sum_only_undamaged: bool,
}

impl CorrectionTensor {
    /// Creates the derivative
    pub fn new(settings: &RunSettings) -> Result<Self> {
        // the correction tensor is only meaningful for undamaged particles
        let flags = resolve_flags(settings, DerivativeFlags::SUM_ONLY_UNDAMAGED)?;
        Ok(CorrectionTensor {
            sum_only_undamaged: flags.contains(DerivativeFlags::SUM_ONLY_UNDAMAGED),
        })
    }
}

struct BoundCorrectionTensor<'a> {
    r: &'a [Vector],
    rho: &'a [f64],
    m: &'a [f64],
    c: &'a [Cell<SymmetricTensor>],
    filter: PairFilter<'a>,
}

impl DerivativeEval for BoundCorrectionTensor<'_> {
    fn eval_neighs(&mut self, i: usize, neighs: &[usize], grads: &[Vector]) {
        let mut moment = SymmetricTensor::null();
        for (&j, &grad) in neighs.iter().zip(grads) {
            if !self.filter.allows(i, j) {
                continue;
            }
            moment += SymmetricTensor::symmetric_outer(self.r[j] - self.r[i], grad)
                * (self.m[j] / self.rho[j]);
        }
        // an isolated or degenerate neighborhood keeps the uncorrected
        // gradient
        let correction = moment
            .inverse()
            .filter(|inv| inv.is_finite())
            .unwrap_or_else(SymmetricTensor::identity);
        self.c[i].set(correction);
    }

    fn eval_symmetric(&mut self, _i: usize, _neighs: &[usize], _grads: &[Vector]) {
        unreachable!("the correction tensor requires asymmetric evaluation");
    }
}

impl Derivative for CorrectionTensor {
    fn phase(&self) -> DerivativePhase {
        DerivativePhase::Precomputation
    }

    fn is_symmetric(&self) -> bool {
        false
    }

    fn create(&self, results: &mut Accumulated) -> Result<()> {
        results.insert::<SymmetricTensor>(
            QuantityId::StrainRateCorrectionTensor,
            OrderEnum::Zero,
            BufferSource::Unique,
        )
    }

    fn bind<'a>(
        &'a self,
        input: &'a Storage,
        results: &'a Accumulated,
    ) -> Result<Box<dyn DerivativeEval + 'a>> {
        Ok(Box::new(BoundCorrectionTensor {
            r: input.value::<Vector>(QuantityId::Position)?,
            rho: input.value::<f64>(QuantityId::Density)?,
            m: input.value::<f64>(QuantityId::Mass)?,
            c: results.get_buffer::<SymmetricTensor>(
                QuantityId::StrainRateCorrectionTensor,
                OrderEnum::Zero,
            )?,
            filter: PairFilter::bind(input, self.sum_only_undamaged)?,
        }))
    }

    fn equal_to(&self, other: &dyn Derivative) -> bool {
        other
            .as_any()
            .downcast_ref::<CorrectionTensor>()
            .map_or(false, |o| o.sum_only_undamaged == self.sum_only_undamaged)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn Derivative> {
        Box::new(CorrectionTensor {
            sum_only_undamaged: self.sum_only_undamaged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equations::derivative::DerivativeHolder;
    use crate::kernel::{CubicSpline, SphKernel, SymmetrizeSmoothingLengths};

    fn shear_flow_storage() -> Storage {
        // velocity v = (y, 0, 0): div v = 0, rot v = (0, 0, -1)
        let mut storage = Storage::new();
        let mut r = Vec::new();
        let mut v = Vec::new();
        for x in -2..=2 {
            for y in -2..=2 {
                for z in -2..=2 {
                    let pos = Vector::with_h(x as f64 * 0.5, y as f64 * 0.5, z as f64 * 0.5, 0.6);
                    r.push(pos);
                    v.push(Vector::new(pos.y, 0.0, 0.0));
                }
            }
        }
        storage
            .insert_values(QuantityId::Position, OrderEnum::Second, r)
            .unwrap();
        storage
            .dt_mut::<Vector>(QuantityId::Position)
            .unwrap()
            .copy_from_slice(&v);
        storage.insert(QuantityId::Mass, OrderEnum::Zero, 0.125_f64).unwrap();
        storage
            .insert(QuantityId::Density, OrderEnum::First, 1.0_f64)
            .unwrap();
        storage
    }

    fn eval_center_particle(storage: &Storage, holder: &mut DerivativeHolder) {
        let r = storage.value::<Vector>(QuantityId::Position).unwrap().to_vec();
        holder.initialize(storage.particle_cnt());
        let kernel = SymmetrizeSmoothingLengths::new(CubicSpline::<3>::new());
        // center particle of the 5x5x5 lattice
        let center = r
            .iter()
            .position(|p| p.sqr_length() < 1e-12)
            .unwrap();
        let mut neighs = Vec::new();
        let mut grads = Vec::new();
        for (j, pos) in r.iter().enumerate() {
            if j == center {
                continue;
            }
            let dist = (*pos - r[center]).length();
            if dist < kernel.radius() * 0.6 {
                neighs.push(j);
                grads.push(kernel.grad(r[center], *pos));
            }
        }
        let mut evals = holder.bind_all(storage).unwrap();
        for eval in &mut evals {
            eval.eval_neighs(center, &neighs, &grads);
        }
    }

    #[test]
    fn test_divergence_free_shear_flow() {
        let settings = RunSettings::new();
        let storage = shear_flow_storage();
        let mut holder = DerivativeHolder::new();
        holder
            .require(Box::new(VelocityDivergence::new(&settings).unwrap()))
            .unwrap();
        holder
            .require(Box::new(VelocityRotation::new(&settings).unwrap()))
            .unwrap();
        eval_center_particle(&storage, &mut holder);

        let mut out = Storage::new();
        out.insert_values(
            QuantityId::VelocityDivergence,
            OrderEnum::Zero,
            vec![0.0; storage.particle_cnt()],
        )
        .unwrap();
        out.insert(QuantityId::VelocityRotation, OrderEnum::Zero, Vector::zero())
            .unwrap();
        holder.accumulated().store_into(&mut out).unwrap();

        let center = storage
            .value::<Vector>(QuantityId::Position)
            .unwrap()
            .iter()
            .position(|p| p.sqr_length() < 1e-12)
            .unwrap();
        let divv = out.value::<f64>(QuantityId::VelocityDivergence).unwrap();
        assert!(divv[center].abs() < 1e-2, "div v = {}", divv[center]);
        let rotv = out.value::<Vector>(QuantityId::VelocityRotation).unwrap();
        assert!(rotv[center].z < -0.5, "rot v = {:?}", rotv[center]);
        assert!(rotv[center].x.abs() < 1e-2);
    }

    #[test]
    fn test_correction_tensor_is_near_identity_on_lattice() {
        let settings = RunSettings::new()
            .with(RunSettingsId::SphStrainRateCorrectionTensor, true)
            .with(RunSettingsId::SphSumOnlyUndamaged, false);
        let storage = shear_flow_storage();
        let mut holder = DerivativeHolder::new();
        holder
            .require(Box::new(CorrectionTensor::new(&settings).unwrap()))
            .unwrap();
        eval_center_particle(&storage, &mut holder);

        let center = storage
            .value::<Vector>(QuantityId::Position)
            .unwrap()
            .iter()
            .position(|p| p.sqr_length() < 1e-12)
            .unwrap();
        let c = holder
            .accumulated()
            .get_buffer::<SymmetricTensor>(QuantityId::StrainRateCorrectionTensor, OrderEnum::Zero)
            .unwrap()[center]
            .get();
        // on a symmetric lattice the gradient moment is close to identity
        for axis in 0..3 {
            assert!((c.diag[axis] - 1.0).abs() < 0.15, "C = {:?}", c);
        }
        assert!(c.offdiag.length() < 0.05);
    }

    #[test]
    fn test_equal_requirements_coalesce() {
        let settings = RunSettings::new();
        let mut holder = DerivativeHolder::new();
        holder
            .require(Box::new(VelocityDivergence::new(&settings).unwrap()))
            .unwrap();
        holder
            .require(Box::new(VelocityDivergence::new(&settings).unwrap()))
            .unwrap();
        assert_eq!(holder.len(), 1);
    }
}
