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
//! Asymmetric pair solver
//!
//! Visits every ordered pair; each particle writes only its own slot, so
//! no cross-particle hazards exist and derivatives that need the full
//! neighborhood in one call (the gradient correction pre-pass) are
//! supported. Roughly twice the pair evaluations of the symmetric solver.

use super::symmetric::{build_holder, with_smoothing_length_term, ThreadData};
use super::Solver;
use crate::boundary::BoundaryCondition;
use crate::equations::{DerivativeEval, DerivativeHolder, EquationHolder, EquationTerm};
use crate::error::Result;
use crate::finders::{create_finder, FinderFlags, NeighborFinder};
use crate::kernel::{create_kernel, LutKernel, SymmetrizeSmoothingLengths};
use crate::math::{Vector, H};
use crate::physics::materials::Material;
use crate::quantities::{OrderEnum, QuantityId, Storage};
use crate::scheduler::{Scheduler, ThreadLocal};
use crate::settings::{RunSettings, RunSettingsId};
use crate::statistics::{Statistics, StatisticsId};
use std::sync::Arc;

/// SPH solver evaluating each ordered pair, writing one side at a time
pub struct AsymmetricSolver<const D: usize> {
    scheduler: Arc<dyn Scheduler>,
    thread_data: ThreadLocal<ThreadData>,
    equations: EquationHolder,
    template: DerivativeHolder,
    bc: Box<dyn BoundaryCondition>,
    finder: Box<dyn NeighborFinder>,
    kernel: SymmetrizeSmoothingLengths<LutKernel<D>>,
    granularity: usize,
}

impl<const D: usize> AsymmetricSolver<D> {
    /// Creates the solver from the composed equations
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        settings: &RunSettings,
        equations: EquationHolder,
        bc: Box<dyn BoundaryCondition>,
    ) -> Result<Self> {
        let equations = with_smoothing_length_term(equations, settings, D)?;
        let template = build_holder(&equations, settings)?;

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

        Ok(AsymmetricSolver {
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
            .build(self.scheduler.as_ref(), r, FinderFlags::empty());

        // the largest smoothing length bounds the interaction radius of any
        // pair involving the queried particle
        let max_h = r.iter().map(|p| p[H]).fold(0.0_f64, f64::max);

        let finder = self.finder.as_ref();
        let kernel = &self.kernel;
        let radius = kernel.radius();
        let thread_data = &self.thread_data;
        let scheduler = self.scheduler.as_ref();

        scheduler.parallel_for(0..particle_cnt, self.granularity, &|range| {
            let mut local = thread_data.local(scheduler);
            let data = &mut *local;
            if data.neigh_cnts.len() != particle_cnt {
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
                let search_radius = radius * 0.5 * (r[i][H] + max_h);
                finder.find_all(i, search_radius, neighs);
                idxs.clear();
                grads.clear();
                for record in neighs.iter() {
                    let j = record.index;
                    if j == i {
                        continue;
                    }
                    let pair_radius = 0.5 * (r[i][H] + r[j][H]) * radius;
                    if record.distance_sqr >= pair_radius * pair_radius {
                        continue;
                    }
                    idxs.push(j);
                    let mut grad = kernel.grad(r[i], r[j]);
                    grad[H] = 0.0;
                    grads.push(grad);
                }
                neigh_cnts[i] = idxs.len() as u32;
                for eval in &mut evals {
                    eval.eval_neighs(i, idxs, grads);
                }
            }
        });
        Ok(())
    }

    fn after_loop(&mut self, storage: &mut Storage, stats: &mut Statistics) -> Result<()> {
        let mut merge_result = Ok(());
        {
            let mut counts: Vec<u32> = vec![0; storage.particle_cnt()];
            self.thread_data.for_each(|data| {
                if merge_result.is_err() {
                    return;
                }
                merge_result = data.holder.accumulated().store_into(storage);
                for (total, &local) in counts.iter_mut().zip(&data.neigh_cnts) {
                    *total += local;
                }
            });
            merge_result?;
            let neighbor_cnt = storage.value_mut::<u32>(QuantityId::NeighborCnt)?;
            for (target, &total) in neighbor_cnt.iter_mut().zip(&counts) {
                *target = total;
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

impl<const D: usize> Solver for AsymmetricSolver<D> {
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
