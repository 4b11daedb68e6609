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
//! One symmetric solver step over a gas lattice

use criterion::{criterion_group, criterion_main, Criterion};
use sph_engine::boundary::NullBoundaryCondition;
use sph_engine::equations::{make_term, ContinuityEquation, PressureForce, StandardAV};
use sph_engine::math::Vector;
use sph_engine::physics::materials::{EosMaterial, Material, MaterialInitialContext};
use sph_engine::quantities::{OrderEnum, QuantityId, Storage, VisitorEnum};
use sph_engine::scheduler::{create_scheduler, Scheduler};
use sph_engine::settings::{BodySettings, BodySettingsId, EosEnum, RunSettings};
use sph_engine::solvers::{Solver, SymmetricSolver};
use sph_engine::statistics::Statistics;
use std::sync::{Arc, RwLock};

fn gas_lattice(n_side: usize, solver: &mut dyn Solver) -> Storage {
    let params = BodySettings::new()
        .with(BodySettingsId::Eos, EosEnum::IdealGas)
        .with(BodySettingsId::Density, 1.0)
        .with(BodySettingsId::Energy, 1.0);
    let material = Arc::new(RwLock::new(EosMaterial::new(params).unwrap()));
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
        solver.create(&mut storage, &mut *guard).unwrap();
        guard
            .create(&mut storage, &MaterialInitialContext::default())
            .unwrap();
    }
    storage
}

fn solver_step(c: &mut Criterion) {
    let settings = RunSettings::new();
    let scheduler: Arc<dyn Scheduler> = create_scheduler(&settings).unwrap().into();
    let equations = make_term(PressureForce::new())
        + make_term(ContinuityEquation::new(&settings).unwrap())
        + make_term(StandardAV::new());
    let mut solver = SymmetricSolver::<3>::new(
        scheduler,
        &settings,
        equations,
        Box::new(NullBoundaryCondition),
    )
    .unwrap();
    let storage = gas_lattice(22, &mut solver);

    let mut group = c.benchmark_group("symmetric_solver");
    group.sample_size(10);
    group.bench_function("integrate_10k", |b| {
        b.iter(|| {
            let mut state = storage.clone_buffers(VisitorEnum::AllBuffers);
            let mut stats = Statistics::new();
            solver.integrate(&mut state, &mut stats).unwrap();
        })
    });
    group.finish();
}

criterion_group!(benches, solver_step);
criterion_main!(benches);
