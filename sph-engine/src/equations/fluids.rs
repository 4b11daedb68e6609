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
//! Surface tension of fluids
//!
//! Implements the cohesion model of Akinci et al. (2013): a lens-shaped
//! pair kernel provides short-range repulsion and mid-range attraction, and
//! a color-field surface normal adds the area-minimizing term.

use super::accumulated::{Accumulated, BufferSource};
use super::derivative::{
    AccelerationDerivative, BoundAcceleration, Derivative, DerivativeEval, DerivativeHolder,
    PairAcceleration, PairFilter,
};
use super::EquationTerm;
use crate::error::Result;
use crate::kernel::{LutKernel, SphKernel, SymmetrizeSmoothingLengths};
use crate::math::{Vector, H};
use crate::physics::materials::Material;
use crate::quantities::{OrderEnum, QuantityId, Storage};
use crate::scheduler::Scheduler;
use crate::settings::{BodySettingsId, RunSettings};
use std::any::Any;
use std::cell::Cell;
use std::f64::consts::PI;
use std::sync::Arc;

/// Lens-shaped cohesion kernel of Akinci et al. (2013)
///
/// Not an SPH kernel; it only uses the kernel interface so that the
/// look-up table machinery applies. The normalization shifts practical
/// surface-tension coefficients to order unity.
struct CohesionKernel;

impl SphKernel for CohesionKernel {
    fn radius(&self) -> f64 {
        1.0
    }

    fn dim(&self) -> usize {
        3
    }

    fn value_impl(&self, q_sqr: f64) -> f64 {
        const NORMALIZATION: f64 = 32.0 / PI;
        let q = q_sqr.sqrt();
        let cube = |x: f64| x * x * x;
        if q < 0.5 {
            NORMALIZATION * (2.0 * cube(1.0 - q) * cube(q) - 1.0 / 64.0)
        } else if q < 1.0 {
            NORMALIZATION * cube(1.0 - q) * cube(q)
        } else {
            0.0
        }
    }

    fn grad_impl(&self, _q_sqr: f64) -> f64 {
        // sampled by the look-up table, never consumed
        0.0
    }
}

/// Cohesive acceleration between fluid particles
#[derive(Clone)]
struct CohesionDerivative {
    kernel: Arc<SymmetrizeSmoothingLengths<LutKernel<3>>>,
}

impl PartialEq for CohesionDerivative {
    fn eq(&self, _other: &Self) -> bool {
        // the kernel is a fixed function; all instances are equal
        true
    }
}

struct BoundCohesion<'a> {
    kernel: &'a SymmetrizeSmoothingLengths<LutKernel<3>>,
    r: &'a [Vector],
    n: &'a [Vector],
    gamma: f64,
}

impl BoundAcceleration for BoundCohesion<'_> {
    #[inline]
    fn eval(&mut self, i: usize, j: usize, _grad: Vector) -> (Vector, f64) {
        if self.r[i] - self.r[j] == Vector::zero() {
            return (Vector::zero(), 0.0);
        }
        let dr = (self.r[i] - self.r[j]).normalized();
        let c = self.kernel.value(self.r[i], self.r[j]);
        // cohesive term plus the surface-area minimizing term
        let f = dr * (-self.gamma * c) - (self.n[i] - self.n[j]) * self.gamma;
        (f, 0.0)
    }
}

impl PairAcceleration for CohesionDerivative {
    type Bound<'a> = BoundCohesion<'a> where Self: 'a;

    fn bind<'a>(&'a self, input: &'a Storage, _results: &'a Accumulated) -> Result<Self::Bound<'a>> {
        // homogeneous surface tension of the first material
        let gamma: f64 = input
            .material(0)
            .material()
            .read()
            .expect("material lock poisoned")
            .params()
            .get(BodySettingsId::SurfaceTension)?;
        Ok(BoundCohesion {
            kernel: &self.kernel,
            r: input.value::<Vector>(QuantityId::Position)?,
            n: input.value::<Vector>(QuantityId::SurfaceNormal)?,
            gamma,
        })
    }
}

/// Color-field estimate of surface normals
#[derive(Clone, PartialEq)]
struct ColorFieldDerivative;

struct BoundColorField<'a> {
    r: &'a [Vector],
    m: &'a [f64],
    rho: &'a [f64],
    n: &'a [Cell<Vector>],
    filter: PairFilter<'a>,
}

impl DerivativeEval for BoundColorField<'_> {
    fn eval_neighs(&mut self, i: usize, neighs: &[usize], grads: &[Vector]) {
        for (&j, &grad) in neighs.iter().zip(grads) {
            if !self.filter.allows(i, j) {
                continue;
            }
            self.n[i].set(
                self.n[i].get() + grad * (self.r[i][H] * self.m[j] / self.rho[j]),
            );
        }
    }

    fn eval_symmetric(&mut self, i: usize, neighs: &[usize], grads: &[Vector]) {
        for (&j, &grad) in neighs.iter().zip(grads) {
            if !self.filter.allows(i, j) {
                continue;
            }
            self.n[i].set(
                self.n[i].get() + grad * (self.r[i][H] * self.m[j] / self.rho[j]),
            );
            self.n[j].set(
                self.n[j].get() - grad * (self.r[j][H] * self.m[i] / self.rho[i]),
            );
        }
    }
}

impl Derivative for ColorFieldDerivative {
    fn create(&self, results: &mut Accumulated) -> Result<()> {
        results.insert::<Vector>(
            QuantityId::SurfaceNormal,
            OrderEnum::Zero,
            BufferSource::Unique,
        )
    }

    fn bind<'a>(
        &'a self,
        input: &'a Storage,
        results: &'a Accumulated,
    ) -> Result<Box<dyn DerivativeEval + 'a>> {
        Ok(Box::new(BoundColorField {
            r: input.value::<Vector>(QuantityId::Position)?,
            m: input.value::<f64>(QuantityId::Mass)?,
            rho: input.value::<f64>(QuantityId::Density)?,
            n: results.get_buffer::<Vector>(QuantityId::SurfaceNormal, OrderEnum::Zero)?,
            filter: PairFilter::bind(input, false)?,
        }))
    }

    fn equal_to(&self, other: &dyn Derivative) -> bool {
        other.as_any().downcast_ref::<ColorFieldDerivative>().is_some()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn Derivative> {
        Box::new(self.clone())
    }
}

/// Surface tension term for fluids
pub struct CohesionTerm {
    kernel: Arc<SymmetrizeSmoothingLengths<LutKernel<3>>>,
}

impl CohesionTerm {
    /// Creates the term
    pub fn new() -> Self {
        CohesionTerm {
            kernel: Arc::new(SymmetrizeSmoothingLengths::new(LutKernel::new(&CohesionKernel))),
        }
    }
}

impl Default for CohesionTerm {
    fn default() -> Self {
        Self::new()
    }
}

impl EquationTerm for CohesionTerm {
    fn set_derivatives(&self, holder: &mut DerivativeHolder, settings: &RunSettings) -> Result<()> {
        holder.require(Box::new(AccelerationDerivative::new(
            CohesionDerivative {
                kernel: self.kernel.clone(),
            },
            settings,
        )?))?;
        holder.require(Box::new(ColorFieldDerivative))
    }

    fn initialize(&self, _scheduler: &dyn Scheduler, _storage: &mut Storage, _t: f64) -> Result<()> {
        Ok(())
    }

    fn finalize(&self, _scheduler: &dyn Scheduler, _storage: &mut Storage, _t: f64) -> Result<()> {
        Ok(())
    }

    fn create(&self, storage: &mut Storage, _material: &mut dyn Material) -> Result<()> {
        storage.insert(QuantityId::SurfaceNormal, OrderEnum::Zero, Vector::zero())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cohesion_kernel_shape() {
        let kernel = CohesionKernel;
        // repulsive at very short range (negative values), attractive at
        // mid range (positive values), zero outside the support
        assert!(kernel.value_impl(0.0) < 0.0);
        assert!(kernel.value_impl(0.5 * 0.5) > 0.0);
        assert_eq!(kernel.value_impl(1.1), 0.0);
    }

    #[test]
    fn test_cohesion_attracts_separated_particles() {
        use crate::physics::materials::NullMaterial;
        use crate::settings::BodySettings;
        let material = std::sync::Arc::new(std::sync::RwLock::new(NullMaterial::with_params(
            BodySettings::new().with(BodySettingsId::SurfaceTension, 1.0),
        )));
        let mut storage = Storage::with_material(material);
        storage
            .insert_values(
                QuantityId::Position,
                OrderEnum::Second,
                vec![
                    Vector::with_h(0.0, 0.0, 0.0, 1.0),
                    Vector::with_h(0.5, 0.0, 0.0, 1.0),
                ],
            )
            .unwrap();
        storage
            .insert(QuantityId::SurfaceNormal, OrderEnum::Zero, Vector::zero())
            .unwrap();

        let term = CohesionTerm::new();
        let derivative = CohesionDerivative {
            kernel: term.kernel.clone(),
        };
        let acc = Accumulated::new();
        let mut bound = derivative.bind(&storage, &acc).unwrap();
        let (f, _) = bound.eval(0, 1, Vector::zero());
        // at half the smoothing length the lens kernel pulls particle 0
        // toward its neighbor at positive x
        assert!(f.x > 0.0, "force = {:?}", f);
    }
}
