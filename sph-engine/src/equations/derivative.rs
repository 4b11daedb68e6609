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
//! Pairwise derivatives
//!
//! A [`Derivative`] declares its output buffers in an [`Accumulated`] set
//! and, once bound to a storage for the current step, evaluates pairwise
//! kernel contributions. Two evaluation contracts exist: the asymmetric
//! form writes only to the queried particle, the symmetric form writes to
//! both sides of the pair and requires the loop to visit every unordered
//! pair at most once.
//!
//! Binding replaces the view-caching initialization of the evaluation
//! phase: a bound evaluator borrows its input slices from the storage and
//! its output cells from the thread-local accumulator, so the borrow
//! checker pins the evaluation to the lifetime of both.

use super::accumulated::{Accumulated, BufferSource};
use crate::error::{Error, Result};
use crate::math::Vector;
use crate::quantities::{OrderEnum, QuantityId, Storage};
use crate::settings::{RunSettings, RunSettingsId};
use std::any::Any;
use std::cell::Cell;

bitflags::bitflags! {
    /// Modifiers of derivative evaluation
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DerivativeFlags: u32 {
        /// Left-multiply the kernel gradient by the strain-rate correction
        /// tensor; restores first-order consistency on irregular particle
        /// distributions. Only usable with asymmetric evaluation, and never
        /// with accelerations (it would break momentum conservation).
        const CORRECTED = 1 << 0;

        /// A pair contributes only when both particles belong to the same
        /// body and neither is fully damaged.
        const SUM_ONLY_UNDAMAGED = 1 << 1;
    }
}

/// Applies the global setting overrides to the flags requested by a
/// derivative
pub fn resolve_flags(settings: &RunSettings, mut flags: DerivativeFlags) -> Result<DerivativeFlags> {
    let use_correction: bool = settings.get(RunSettingsId::SphStrainRateCorrectionTensor)?;
    if !use_correction {
        flags.remove(DerivativeFlags::CORRECTED);
    }
    let sum_only_undamaged: bool = settings.get(RunSettingsId::SphSumOnlyUndamaged)?;
    if !sum_only_undamaged {
        flags.remove(DerivativeFlags::SUM_ONLY_UNDAMAGED);
    }
    Ok(flags)
}

/// Evaluation order of derivatives within one particle visit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DerivativePhase {
    /// Runs before all evaluation derivatives; used by the correction
    /// tensor, which consumers of corrected gradients read
    Precomputation,
    /// Ordinary derivative evaluation
    Evaluation,
}

/// A derivative bound to the current storage and accumulator
pub trait DerivativeEval {
    /// Evaluates all pairs of particle `i`, writing only to `i`
    fn eval_neighs(&mut self, i: usize, neighs: &[usize], grads: &[Vector]);

    /// Evaluates all pairs of particle `i`, writing to both sides
    ///
    /// The loop must deliver each unordered pair at most once.
    fn eval_symmetric(&mut self, i: usize, neighs: &[usize], grads: &[Vector]);
}

/// A pairwise derivative declared by equation terms
pub trait Derivative: Send + Sync {
    /// Evaluation phase; precomputation derivatives run first
    fn phase(&self) -> DerivativePhase {
        DerivativePhase::Evaluation
    }

    /// Whether the derivative supports the symmetric contract
    fn is_symmetric(&self) -> bool {
        true
    }

    /// Declares the output buffers
    fn create(&self, results: &mut Accumulated) -> Result<()>;

    /// Binds the derivative to the step inputs and thread-local outputs
    fn bind<'a>(
        &'a self,
        input: &'a Storage,
        results: &'a Accumulated,
    ) -> Result<Box<dyn DerivativeEval + 'a>>;

    /// Structural equality used to deduplicate repeated requirements
    fn equal_to(&self, other: &dyn Derivative) -> bool;

    /// Downcast support for [`Derivative::equal_to`]
    fn as_any(&self) -> &dyn Any;

    /// Clones the derivative for per-thread holders
    fn clone_boxed(&self) -> Box<dyn Derivative>;
}

/// Pair filter implementing the SUM_ONLY_UNDAMAGED contract
///
/// A pair (i, j) passes only when both particles carry the same body flag
/// and both have a positive stress-reduction factor. Without the flag, or
/// when the storage lacks the needed quantities, every pair passes.
pub struct PairFilter<'a> {
    filter: Option<(&'a [u32], &'a [f64])>,
}

impl<'a> PairFilter<'a> {
    /// Binds the filter to the storage
    pub fn bind(input: &'a Storage, enabled: bool) -> Result<Self> {
        let filter = if enabled
            && input.has(QuantityId::StressReducing)
            && input.has(QuantityId::Flag)
        {
            Some((
                input.value::<u32>(QuantityId::Flag)?,
                input.value::<f64>(QuantityId::StressReducing)?,
            ))
        } else {
            None
        };
        Ok(PairFilter { filter })
    }

    /// Whether the pair contributes
    #[inline]
    pub fn allows(&self, i: usize, j: usize) -> bool {
        match self.filter {
            None => true,
            Some((flag, reduce)) => flag[i] == flag[j] && reduce[i] > 0.0 && reduce[j] > 0.0,
        }
    }
}

/// Kernel-gradient correction implementing the CORRECTED contract
///
/// Reads the correction tensor from the thread-local accumulator, where the
/// precomputation pass left it, and left-multiplies gradients before they
/// reach the consumer.
pub struct GradCorrection<'a> {
    correction: Option<&'a [Cell<crate::math::SymmetricTensor>]>,
}

impl<'a> GradCorrection<'a> {
    /// Binds the correction to the accumulator
    pub fn bind(results: &'a Accumulated, enabled: bool) -> Result<Self> {
        let correction = if enabled {
            Some(results.get_buffer::<crate::math::SymmetricTensor>(
                QuantityId::StrainRateCorrectionTensor,
                OrderEnum::Zero,
            )?)
        } else {
            None
        };
        Ok(GradCorrection { correction })
    }

    /// Applies the correction of particle `i` to a gradient
    #[inline]
    pub fn apply(&self, i: usize, grad: Vector) -> Vector {
        match self.correction {
            None => grad,
            Some(c) => c[i].get() * grad,
        }
    }
}

/// Physics of an acceleration-type derivative
///
/// Implementors provide the per-pair force and heating; the generic
/// [`AccelerationDerivative`] adapter supplies the mass weighting, the
/// Newton's-third-law symmetrization and the damaged-interface filter.
/// Accelerations are never gradient-corrected.
pub trait PairAcceleration: Send + Sync + Clone + PartialEq + 'static {
    /// The bound evaluator type
    type Bound<'a>: BoundAcceleration
    where
        Self: 'a;

    /// Whether the damaged-interface filter applies
    fn sum_only_undamaged(&self) -> bool {
        false
    }

    /// Declares buffers beyond the shared acceleration and heating
    fn create_additional(&self, results: &mut Accumulated) -> Result<()> {
        let _ = results;
        Ok(())
    }

    /// Collects the input views of the step
    fn bind<'a>(&'a self, input: &'a Storage, results: &'a Accumulated) -> Result<Self::Bound<'a>>;
}

/// Bound evaluator of a [`PairAcceleration`]
pub trait BoundAcceleration {
    /// Force contribution (per unit neighbor mass) and heating of one pair
    fn eval(&mut self, i: usize, j: usize, grad: Vector) -> (Vector, f64);
}

/// Adapter turning a [`PairAcceleration`] into a [`Derivative`]
///
/// Declares the shared acceleration and energy-derivative buffers and
/// accumulates `dv_i += m_j f`, `du_i += m_j de` (resp. the mirrored terms
/// in symmetric evaluation).
pub struct AccelerationDerivative<T> {
    inner: T,
    sum_only_undamaged: bool,
}

impl<T: PairAcceleration> AccelerationDerivative<T> {
    /// Wraps the physics, resolving the global filter override
    pub fn new(inner: T, settings: &RunSettings) -> Result<Self> {
        let globally_enabled: bool = settings.get(RunSettingsId::SphSumOnlyUndamaged)?;
        let sum_only_undamaged = inner.sum_only_undamaged() && globally_enabled;
        Ok(AccelerationDerivative {
            inner,
            sum_only_undamaged,
        })
    }
}

struct BoundAccelerationEval<'a, B> {
    dv: &'a [Cell<Vector>],
    du: &'a [Cell<f64>],
    m: &'a [f64],
    filter: PairFilter<'a>,
    inner: B,
}

impl<B: BoundAcceleration> DerivativeEval for BoundAccelerationEval<'_, B> {
    fn eval_neighs(&mut self, i: usize, neighs: &[usize], grads: &[Vector]) {
        debug_assert_eq!(neighs.len(), grads.len());
        for (&j, &grad) in neighs.iter().zip(grads) {
            if !self.filter.allows(i, j) {
                continue;
            }
            let (f, de) = self.inner.eval(i, j, grad);
            self.dv[i].set(self.dv[i].get() + f * self.m[j]);
            self.du[i].set(self.du[i].get() + de * self.m[j]);
        }
    }

    fn eval_symmetric(&mut self, i: usize, neighs: &[usize], grads: &[Vector]) {
        debug_assert_eq!(neighs.len(), grads.len());
        for (&j, &grad) in neighs.iter().zip(grads) {
            if !self.filter.allows(i, j) {
                continue;
            }
            let (f, de) = self.inner.eval(i, j, grad);
            self.dv[i].set(self.dv[i].get() + f * self.m[j]);
            self.dv[j].set(self.dv[j].get() - f * self.m[i]);
            self.du[i].set(self.du[i].get() + de * self.m[j]);
            self.du[j].set(self.du[j].get() + de * self.m[i]);
        }
    }
}

impl<T: PairAcceleration> Derivative for AccelerationDerivative<T> {
    fn create(&self, results: &mut Accumulated) -> Result<()> {
        results.insert::<Vector>(QuantityId::Position, OrderEnum::Second, BufferSource::Shared)?;
        results.insert::<f64>(QuantityId::Energy, OrderEnum::First, BufferSource::Shared)?;
        self.inner.create_additional(results)
    }

    fn bind<'a>(
        &'a self,
        input: &'a Storage,
        results: &'a Accumulated,
    ) -> Result<Box<dyn DerivativeEval + 'a>> {
        Ok(Box::new(BoundAccelerationEval {
            dv: results.get_buffer::<Vector>(QuantityId::Position, OrderEnum::Second)?,
            du: results.get_buffer::<f64>(QuantityId::Energy, OrderEnum::First)?,
            m: input.value::<f64>(QuantityId::Mass)?,
            filter: PairFilter::bind(input, self.sum_only_undamaged)?,
            inner: self.inner.bind(input, results)?,
        }))
    }

    fn equal_to(&self, other: &dyn Derivative) -> bool {
        other
            .as_any()
            .downcast_ref::<AccelerationDerivative<T>>()
            .map_or(false, |o| {
                o.inner == self.inner && o.sum_only_undamaged == self.sum_only_undamaged
            })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn Derivative> {
        Box::new(AccelerationDerivative {
            inner: self.inner.clone(),
            sum_only_undamaged: self.sum_only_undamaged,
        })
    }
}

/// Registry of the derivatives required by the composed equation terms
///
/// Repeated requirements of an equal derivative coalesce; conflicting
/// UNIQUE buffer declarations surface here, at equation-set construction.
#[derive(Default)]
pub struct DerivativeHolder {
    derivatives: Vec<Box<dyn Derivative>>,
    accumulated: Accumulated,
}

impl DerivativeHolder {
    /// Creates an empty holder
    pub fn new() -> Self {
        DerivativeHolder::default()
    }

    /// Requires a derivative, deduplicating equal requirements
    pub fn require(&mut self, derivative: Box<dyn Derivative>) -> Result<()> {
        if self
            .derivatives
            .iter()
            .any(|existing| existing.equal_to(derivative.as_ref()))
        {
            return Ok(());
        }
        derivative.create(&mut self.accumulated)?;
        self.derivatives.push(derivative);
        // precomputation derivatives evaluate first
        self.derivatives.sort_by_key(|d| d.phase());
        Ok(())
    }

    /// Resizes and zeroes the accumulator buffers
    pub fn initialize(&mut self, particle_cnt: usize) {
        self.accumulated.initialize(particle_cnt);
    }

    /// The accumulator of this holder
    pub fn accumulated(&self) -> &Accumulated {
        &self.accumulated
    }

    /// The accumulator of this holder, mutable
    pub fn accumulated_mut(&mut self) -> &mut Accumulated {
        &mut self.accumulated
    }

    /// Binds all derivatives for the current step, in evaluation order
    pub fn bind_all<'a>(&'a self, input: &'a Storage) -> Result<Vec<Box<dyn DerivativeEval + 'a>>> {
        self.derivatives
            .iter()
            .map(|d| d.bind(input, &self.accumulated))
            .collect()
    }

    /// Whether any derivative requires asymmetric evaluation
    pub fn has_asymmetric_only(&self) -> bool {
        self.derivatives.iter().any(|d| !d.is_symmetric())
    }

    /// Number of required derivatives
    pub fn len(&self) -> usize {
        self.derivatives.len()
    }

    /// True when no derivative is required
    pub fn is_empty(&self) -> bool {
        self.derivatives.is_empty()
    }
}

impl Clone for DerivativeHolder {
    fn clone(&self) -> Self {
        let mut clone = DerivativeHolder::new();
        for derivative in &self.derivatives {
            clone
                .require(derivative.clone_boxed())
                .expect("re-requiring validated derivatives cannot fail");
        }
        clone
    }
}
