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
//! Symmetric pair solver
//!
//! Evaluates all derivatives symmetrically: the lower-rank neighbor query
//! delivers each unordered pair exactly once, and every derivative writes
//! both sides of the pair into thread-local accumulators, which are summed
//! into the storage after the loop. Faster than asymmetric evaluation at
//! the cost of per-thread buffer memory; incompatible with derivatives
//! that need more than one pass (gradient correction).

use super::Solver;
use crate::boundary::BoundaryCondition;
use crate::equations::{
    AdaptiveSmoothingLength, ConstSmoothingLength, DerivativeEval, DerivativeHolder,
    EquationHolder, EquationTerm,
};
use crate::error::{Error, Result};
use crate::finders::{create_finder, FinderFlags, NeighborFinder, NeighborRecord};
use crate::kernel::{create_kernel, LutKernel, SymmetrizeSmoothingLengths};
use crate::math::{Vector, H};
use crate::physics::materials::Material;
use crate::quantities::{OrderEnum, QuantityId, Storage};
use crate::scheduler::{Scheduler, ThreadLocal};
use crate::settings::{RunSettings, RunSettingsId, SmoothingLengthFlags};
use crate::statistics::{Statistics, StatisticsId};
use std::sync::Arc;

/// Per-worker scratch of the pair loop
pub(crate) struct ThreadData {
    /// Each worker evaluates its own derivative set into its own buffers
    pub(crate) holder: DerivativeHolder,
    /// Cached neighbor query output
    pub(crate) neighs: Vec<NeighborRecord>,
    /// Indices of neighbors passing the pair-radius filter
    pub(crate) idxs: Vec<usize>,
    /// Kernel gradients of the accepted pairs
    pub(crate) grads: Vec<Vector>,
    /// Pair-count contribution to NEIGHBOR_CNT
    pub(crate) neigh_cnts: Vec<u32>,
}

impl ThreadData {
    pub(crate) fn reset(&mut self, particle_cnt: usize) {
        self.holder.initialize(particle_cnt);
        self.neigh_cnts.clear();
        self.neigh_cnts.resize(particle_cnt, 0);
    }
}

/// Builds the per-worker derivative holder from the composed equations
pub(crate) fn build_holder(
    equations: &EquationHolder,
    settings: &RunSettings,
) -> Result<DerivativeHolder> {
    let mut holder = DerivativeHolder::new();
    for term in equations.terms() {
        term.set_derivatives(&mut holder, settings)?;
    }
    Ok(holder)
}

/// Appends the smoothing-length handling selected by the settings
pub(crate) fn with_smoothing_length_term(
    mut equations: EquationHolder,
    settings: &RunSettings,
    dimensions: usize,
) -> Result<EquationHolder> {
    let flags: SmoothingLengthFlags =
        settings.get_flags(RunSettingsId::SphAdaptiveSmoothingLength)?;
    if flags.contains(SmoothingLengthFlags::CONTINUITY_EQUATION) {
        equations.push(AdaptiveSmoothingLength::new(settings, dimensions)?);
    } else {
        equations.push(ConstSmoothingLength::new());
    }
    Ok(equations)
}

/// Basic SPH solver evaluating all pair interactions symmetrically
pub struct SymmetricSolver<const D: usize> {
    scheduler: Arc<dyn Scheduler>,
    thread_data: ThreadLocal<ThreadData>,
    equations: EquationHolder,
    /// Validated derivative set; used to reset accumulator targets per step
    template: DerivativeHolder,
    bc: Box<dyn BoundaryCondition>,
    finder: Box<dyn NeighborFinder>,
    kernel: SymmetrizeSmoothingLengths<LutKernel<D>>,
    granularity: usize,
}

impl<const D: usize> SymmetricSolver<D> {
    /// Creates the solver from the composed equations
    ///
    /// Fails when the equation set requires asymmetric-only derivatives or
    /// declares conflicting unique accumulators.
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        settings: &RunSettings,
        equations: EquationHolder,
        bc: Box<dyn BoundaryCondition>,
    ) -> Result<Self> {
        let equations = with_smoothing_length_term(equations, settings, D)?;
        // validate the derivative set once; per-worker holders are clones of
        // this construction
        let template = build_holder(&equations, settings)?;
        if template.has_asymmetric_only() {
            return Err(Error::InvalidSetup(
                "the symmetric solver requires all derivatives to support symmetric evaluation; \
                 use AsymmetricSolver for gradient-corrected configurations"
                    .into(),
            ));
        }

        let factory_equations = equations.clone();
        let factory_settings = settings.clone();
        let thread_data = ThreadLocal::new(scheduler.as_ref(), move || ThreadData {
            holder: build_holder(&factory_equations, &factory_settings)
                .expect("derivative set was validated at solver construction"),
            neighs: Vec::new(),
            idxs: Vec::new(),
            grads: Vec::new(),
            neigh_cnts: Vec::new(),
        });

        Ok(SymmetricSolver {
            scheduler,
            thread_data,
            equations,
            template,
            bc,
            finder: create_finder(settings)?,
            kernel: SymmetrizeSmoothingLengths::new(create_kernel::<D>(settings)?),
            granularity: settings.get::<i64>(RunSettingsId::RunThreadGranularity)?.max(1) as usize,
        })
    }

    fn before_loop(&mut self, storage: &mut Storage) -> Result<()> {
        storage.zero_highest_derivatives();
        storage.insert(QuantityId::NeighborCnt, OrderEnum::Zero, 0_u32)?;
        storage.value_mut::<u32>(QuantityId::NeighborCnt)?.fill(0);

        for view in storage.material_partitions() {
            let mut material = view.material().write().expect("material lock poisoned");
            material.initialize(storage, view.sequence())?;
        }
        for term in self.equations.terms() {
            term.initialize(self.scheduler.as_ref(), storage, 0.0)?;
        }
        // accumulator targets are zeroed only after the terms initialized:
        // some of them consume the previous step's sums
        self.template.accumulated().zero_targets(storage)?;

        let particle_cnt = storage.particle_cnt();
        self.thread_data.for_each(|data| data.reset(particle_cnt));
        Ok(())
    }

    fn pair_loop(&mut self, storage: &Storage) -> Result<()> {
        let particle_cnt = storage.particle_cnt();
        let r = storage.value::<Vector>(QuantityId::Position)?;
        self.finder
            .build(self.scheduler.as_ref(), r, FinderFlags::MAKE_RANK);

        let finder = self.finder.as_ref();
        let kernel = &self.kernel;
        let radius = kernel.radius();
        let thread_data = &self.thread_data;
        let scheduler = self.scheduler.as_ref();

        scheduler.parallel_for(0..particle_cnt, self.granularity, &|range| {
            let mut local = thread_data.local(scheduler);
            let data = &mut *local;
            if data.neigh_cnts.len() != particle_cnt {
                // slot created lazily inside the loop
                data.reset(particle_cnt);
            }
            let ThreadData {
                holder,
                neighs,
                idxs,
                grads,
                neigh_cnts,
            } = data;
            let mut evals = holder
                .bind_all(storage)
                .expect("equation quantities exist; created by Solver::create");
            for i in range {
                finder.find_lower_rank(i, radius * r[i][H], neighs);
                idxs.clear();
                grads.clear();
                for record in neighs.iter() {
                    let j = record.index;
                    // true pair interaction radius from the symmetrized
                    // smoothing length
                    let pair_radius = 0.5 * (r[i][H] + r[j][H]) * radius;
                    if record.distance_sqr >= pair_radius * pair_radius {
                        continue;
                    }
                    idxs.push(j);
                    let mut grad = kernel.grad(r[i], r[j]);
                    grad[H] = 0.0;
                    grads.push(grad);
                }
                neigh_cnts[i] += idxs.len() as u32;
                for &j in idxs.iter() {
                    neigh_cnts[j] += 1;
                }
                for eval in &mut evals {
                    eval.eval_symmetric(i, idxs, grads);
                }
            }
        });
        Ok(())
    }

    fn after_loop(&mut self, storage: &mut Storage, stats: &mut Statistics) -> Result<()> {
        let mut merge_result = Ok(());
        {
            let mut counts: Vec<u64> = vec![0; storage.particle_cnt()];
            self.thread_data.for_each(|data| {
                if merge_result.is_err() {
                    return;
                }
                merge_result = data.holder.accumulated().store_into(storage);
                for (total, &local) in counts.iter_mut().zip(&data.neigh_cnts) {
                    *total += local as u64;
                }
            });
            merge_result?;
            let neighbor_cnt = storage.value_mut::<u32>(QuantityId::NeighborCnt)?;
            for (target, &total) in neighbor_cnt.iter_mut().zip(&counts) {
                *target = total as u32;
                stats.accumulate(StatisticsId::NeighborCount, total as f64);
            }
        }

        for term in self.equations.terms() {
            term.finalize(self.scheduler.as_ref(), storage, 0.0)?;
        }
        for view in storage.material_partitions() {
            let mut material = view.material().write().expect("material lock poisoned");
            material.finalize(storage, view.sequence())?;
        }
        Ok(())
    }
}

impl<const D: usize> Solver for SymmetricSolver<D> {
    fn integrate(&mut self, storage: &mut Storage, stats: &mut Statistics) -> Result<()> {
        self.bc.initialize(storage)?;
        self.before_loop(storage)?;
        self.pair_loop(storage)?;
        self.after_loop(storage, stats)?;
        self.bc.finalize(storage)?;
        debug_assert!(storage.is_valid(false).is_ok());
        Ok(())
    }

    fn create(&mut self, storage: &mut Storage, material: &mut dyn Material) -> Result<()> {
        debug_assert!(storage.has(QuantityId::Position));
        storage.insert(QuantityId::NeighborCnt, OrderEnum::Zero, 0_u32)?;
        for term in self.equations.terms() {
            term.create(storage, material)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::NullBoundaryCondition;
    use crate::equations::{make_term, ContinuityEquation, PressureForce, StandardAV};
    use crate::physics::materials::{EosMaterial, MaterialInitialContext};
    use crate::scheduler::SequentialScheduler;
    use crate::settings::{BodySettings, BodySettingsId, EosEnum};

    pub(crate) fn gas_sphere(n_side: usize, settings: &RunSettings) -> (Storage, SymmetricSolver<3>) {
        let scheduler: Arc<dyn Scheduler> = Arc::new(SequentialScheduler);
        let equations = make_term(PressureForce::new())
            + make_term(ContinuityEquation::new(settings).unwrap())
            + make_term(StandardAV::new());
        let mut solver = SymmetricSolver::<3>::new(
            scheduler,
            settings,
            equations,
            Box::new(NullBoundaryCondition),
        )
        .unwrap();

        let params = BodySettings::new()
            .with(BodySettingsId::Eos, EosEnum::IdealGas)
            .with(BodySettingsId::Density, 1.0)
            .with(BodySettingsId::Energy, 1.0);
        let material = Arc::new(std::sync::RwLock::new(EosMaterial::new(params).unwrap()));
        let mut storage = Storage::with_material(material.clone());

        let spacing = 1.0 / n_side as f64;
        let mut positions = Vec::new();
        for x in 0..n_side {
            for y in 0..n_side {
                for z in 0..n_side {
                    positions.push(Vector::with_h(
                        x as f64 * spacing,
                        y as f64 * spacing,
                        z as f64 * spacing,
                        1.3 * spacing,
                    ));
                }
            }
        }
        let cnt = positions.len();
        storage
            .insert_values(QuantityId::Position, OrderEnum::Second, positions)
            .unwrap();
        storage
            .insert(QuantityId::Mass, OrderEnum::Zero, 1.0 / cnt as f64)
            .unwrap();
        {
            let mut guard = material.write().unwrap();
            guard
                .create(&mut storage, &MaterialInitialContext::default())
                .unwrap();
            solver.create(&mut storage, &mut *guard).unwrap();
        }
        (storage, solver)
    }

    #[test]
    fn test_integrate_fills_derivatives() {
        let settings = RunSettings::new();
        let (mut storage, mut solver) = gas_sphere(5, &settings);
        let mut stats = Statistics::new();
        solver.integrate(&mut storage, &mut stats).unwrap();
        storage.is_valid(true).unwrap();

        // interior particles see neighbors
        let neigh = storage.value::<u32>(QuantityId::NeighborCnt).unwrap();
        assert!(neigh.iter().any(|&n| n > 10));
        assert!(stats.get_means(StatisticsId::NeighborCount).is_some());

        // a uniform box with pressure develops edge accelerations but no
        // NaNs anywhere
        let dv = storage.d2t::<Vector>(QuantityId::Position).unwrap();
        assert!(dv.iter().all(|a| a.is_finite()));
        assert!(dv.iter().any(|a| a.length() > 0.0));

        // the continuity equation produced density derivatives
        let drho = storage.dt::<f64>(QuantityId::Density).unwrap();
        assert!(drho.iter().all(|d| d.is_finite()));
    }

    #[test]
    fn test_interior_of_uniform_lattice_is_balanced() {
        let settings = RunSettings::new();
        let (mut storage, mut solver) = gas_sphere(7, &settings);
        let mut stats = Statistics::new();
        solver.integrate(&mut storage, &mut stats).unwrap();

        // the center particle of a uniform lattice feels no net force
        let r = storage.value::<Vector>(QuantityId::Position).unwrap();
        let center_pos = Vector::new(3.0 / 7.0, 3.0 / 7.0, 3.0 / 7.0);
        let center = (0..r.len())
            .min_by(|&a, &b| {
                let da = (r[a] - center_pos).sqr_length();
                let db = (r[b] - center_pos).sqr_length();
                da.partial_cmp(&db).unwrap()
            })
            .unwrap();
        let dv = storage.d2t::<Vector>(QuantityId::Position).unwrap();
        let typical = dv.iter().map(|a| a.length()).fold(0.0, f64::max);
        assert!(
            dv[center].length() < 0.05 * typical.max(1e-12),
            "net force on the center particle: {:?}",
            dv[center]
        );
    }

    #[test]
    fn test_symmetric_solver_rejects_corrected_derivatives() {
        let settings = RunSettings::new().with(RunSettingsId::SphStrainRateCorrectionTensor, true);
        let scheduler: Arc<dyn Scheduler> = Arc::new(SequentialScheduler);
        let equations = make_term(crate::equations::SolidStressForce::new(&settings).unwrap());
        let result = SymmetricSolver::<3>::new(
            scheduler,
            &settings,
            equations,
            Box::new(NullBoundaryCondition),
        );
        assert!(result.is_err());
    }
}
