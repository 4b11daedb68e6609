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
//! Boundary conditions
//!
//! A boundary condition hooks into the solver twice per step: `initialize`
//! runs before any derivative is evaluated (ghost creation), `finalize`
//! after the equation terms closed their sums (ghost removal, derivative
//! zeroing). Between the hooks, other stages see only the augmented
//! particle set.

mod domain;

pub use domain::{BlockDomain, Domain, HalfSpaceDomain, SphericalDomain};

use crate::error::Result;
use crate::math::{Vector, H};
use crate::quantities::{
    iterate_first_order, iterate_second_order, ArithmeticValue, FirstOrderVisitor, QuantityId,
    SecondOrderVisitor, Storage, ValueEnum,
};
use crate::settings::{RunSettings, RunSettingsId};

/// Hooks applied around the solver loop
pub trait BoundaryCondition: Send {
    /// Runs before derivatives are evaluated
    fn initialize(&mut self, storage: &mut Storage) -> Result<()>;

    /// Runs after the equation terms finalized
    fn finalize(&mut self, storage: &mut Storage) -> Result<()>;
}

/// No boundary handling
pub struct NullBoundaryCondition;

impl BoundaryCondition for NullBoundaryCondition {
    fn initialize(&mut self, _storage: &mut Storage) -> Result<()> {
        Ok(())
    }

    fn finalize(&mut self, _storage: &mut Storage) -> Result<()> {
        Ok(())
    }
}

/// Reflective boundary imposed by mirror particles
///
/// Before each step, every particle within kernel support of the boundary
/// gets a ghost mirrored across it. Scalar and tensor quantities are copied
/// onto the ghost; vector quantities have the component perpendicular to
/// the source-ghost direction negated and the parallel component
/// preserved. Ghosts are removed again once the equations finalized, so
/// integrators never advance them.
pub struct GhostParticles {
    domain: Box<dyn Domain>,
    /// Kernel support radius in units of h
    search_radius: f64,
    /// Minimal distance of a ghost from the boundary
    min_ghost_dist: f64,
    ghost_idxs: Vec<usize>,
    source_idxs: Vec<usize>,
}

impl GhostParticles {
    /// Creates the condition for the given domain
    pub fn new(domain: Box<dyn Domain>, settings: &RunSettings) -> Result<Self> {
        let kernel = crate::kernel::create_kernel::<3>(settings)?;
        use crate::kernel::SphKernel;
        Ok(GhostParticles {
            domain,
            search_radius: kernel.radius(),
            min_ghost_dist: settings.get(RunSettingsId::DomainGhostMinDist)?,
            ghost_idxs: Vec::new(),
            source_idxs: Vec::new(),
        })
    }

    /// Number of ghosts active in the current step
    pub fn ghost_cnt(&self) -> usize {
        self.ghost_idxs.len()
    }

    fn ghost_position(&self, source: Vector) -> Vector {
        let mirrored = self.domain.reflect(source);
        // a source sitting on (or numerically at) the boundary would get a
        // ghost on top of itself; push it out to the minimal offset
        if self.domain.boundary_distance(mirrored) > -self.min_ghost_dist {
            let mut nudged = self.domain.project(source) + self.domain.normal(source) * self.min_ghost_dist;
            nudged[H] = source[H];
            nudged
        } else {
            mirrored
        }
    }
}

impl BoundaryCondition for GhostParticles {
    fn initialize(&mut self, storage: &mut Storage) -> Result<()> {
        debug_assert!(self.ghost_idxs.is_empty(), "ghosts of the previous step not removed");

        // project escaped particles back onto the boundary
        {
            let r = storage.value_mut::<Vector>(QuantityId::Position)?;
            for pos in r.iter_mut() {
                if !self.domain.contains(*pos) {
                    let h = pos[H];
                    *pos = self.domain.project(*pos);
                    pos[H] = h;
                }
            }
        }

        // sources: particles whose kernel support overlaps the boundary
        self.source_idxs.clear();
        let mut ghost_positions = Vec::new();
        {
            let r = storage.value::<Vector>(QuantityId::Position)?;
            for (i, pos) in r.iter().enumerate() {
                if self.domain.boundary_distance(*pos) < pos[H] * self.search_radius {
                    self.source_idxs.push(i);
                    ghost_positions.push(self.ghost_position(*pos));
                }
            }
        }

        // duplication copies every quantity and keeps the partitions
        // contiguous; dependents mirror the change
        self.ghost_idxs = storage.duplicate(&self.source_idxs);

        // fix up positions and mirror all vector buffers
        let mut normals = Vec::with_capacity(self.ghost_idxs.len());
        {
            let r = storage.value_mut::<Vector>(QuantityId::Position)?;
            for ((&ghost, &source), &pos) in self
                .ghost_idxs
                .iter()
                .zip(&self.source_idxs)
                .zip(&ghost_positions)
            {
                r[ghost] = pos;
                let delta = r[source] - pos;
                normals.push(if delta.sqr_length() > 0.0 {
                    delta.normalized()
                } else {
                    self.domain.normal(pos)
                });
            }
        }
        for (id, quantity) in storage.quantities_mut() {
            if quantity.value_type() != ValueEnum::Vector {
                continue;
            }
            let order = quantity.order();
            let set = quantity.buffers_mut::<Vector>().expect("type checked");
            for slot in 0..order.buffer_cnt() {
                if id == QuantityId::Position && slot == 0 {
                    continue;
                }
                let buffer = match slot {
                    0 => &mut set.values,
                    1 => &mut set.dt,
                    _ => &mut set.d2t,
                };
                if buffer.is_empty() {
                    continue;
                }
                for ((&ghost, &source), normal) in
                    self.ghost_idxs.iter().zip(&self.source_idxs).zip(&normals)
                {
                    let value = buffer[source];
                    let perpendicular = normal.dot(value);
                    let mut mirrored = value - *normal * (2.0 * perpendicular);
                    mirrored[H] = value[H];
                    buffer[ghost] = mirrored;
                }
            }
        }
        Ok(())
    }

    fn finalize(&mut self, storage: &mut Storage) -> Result<()> {
        if !self.ghost_idxs.is_empty() {
            storage.remove(&self.ghost_idxs);
            self.ghost_idxs.clear();
        }
        Ok(())
    }
}

/// Zeroes derivatives of particles near the boundary or of frozen bodies
///
/// Frozen particles keep their velocity but never accelerate; escapees are
/// projected back inside the domain.
pub struct FrozenParticles {
    domain: Option<Box<dyn Domain>>,
    /// Search distance from the boundary, in units of h
    radius: f64,
    frozen_flags: Vec<u32>,
}

impl FrozenParticles {
    /// Freezes particles within `radius` smoothing lengths of the boundary
    pub fn new(domain: Box<dyn Domain>, radius: f64) -> Self {
        FrozenParticles {
            domain: Some(domain),
            radius,
            frozen_flags: Vec::new(),
        }
    }

    /// Additionally freezes all particles carrying one of the given flags
    pub fn with_frozen_flags(mut self, flags: Vec<u32>) -> Self {
        self.frozen_flags = flags;
        self
    }

    /// Freezes only flagged bodies, with no domain
    pub fn for_flags(flags: Vec<u32>) -> Self {
        FrozenParticles {
            domain: None,
            radius: 0.0,
            frozen_flags: flags,
        }
    }

    fn is_frozen(&self, pos: Vector, flag: Option<u32>) -> bool {
        if let Some(flag) = flag {
            if self.frozen_flags.contains(&flag) {
                return true;
            }
        }
        if let Some(domain) = &self.domain {
            return domain.boundary_distance(pos) < self.radius * pos[H];
        }
        false
    }
}

impl BoundaryCondition for FrozenParticles {
    fn initialize(&mut self, _storage: &mut Storage) -> Result<()> {
        Ok(())
    }

    fn finalize(&mut self, storage: &mut Storage) -> Result<()> {
        let frozen: Vec<bool> = {
            let r = storage.value::<Vector>(QuantityId::Position)?;
            let flags = storage.value::<u32>(QuantityId::Flag).ok().map(|f| f.to_vec());
            r.iter()
                .enumerate()
                .map(|(i, pos)| self.is_frozen(*pos, flags.as_ref().map(|f| f[i])))
                .collect()
        };

        // zero the accelerations and energy derivatives of frozen particles
        {
            let dv = storage.d2t_mut::<Vector>(QuantityId::Position)?;
            for (a, &is_frozen) in dv.iter_mut().zip(&frozen) {
                if is_frozen {
                    *a = Vector::zero();
                }
            }
        }
        if storage.has(QuantityId::Energy) {
            let du = storage.dt_mut::<f64>(QuantityId::Energy)?;
            for (du_i, &is_frozen) in du.iter_mut().zip(&frozen) {
                if is_frozen {
                    *du_i = 0.0;
                }
            }
        }

        // escapees keep their velocity but are moved back inside
        if let Some(domain) = &self.domain {
            let r = storage.value_mut::<Vector>(QuantityId::Position)?;
            for pos in r.iter_mut() {
                if !domain.contains(*pos) {
                    let h = pos[H];
                    *pos = domain.project(*pos);
                    pos[H] = h;
                }
            }
        }
        Ok(())
    }
}

/// Immovable dummy particles surrounding the domain
///
/// The fixed particles participate as neighbors during the loop but are
/// removed before the integrator advances anything.
pub struct FixedParticles {
    fixed: Storage,
    added_idxs: Vec<usize>,
}

impl FixedParticles {
    /// Creates the condition from a storage of dummy particles
    pub fn new(fixed: Storage) -> Self {
        FixedParticles {
            fixed,
            added_idxs: Vec::new(),
        }
    }
}

impl BoundaryCondition for FixedParticles {
    fn initialize(&mut self, storage: &mut Storage) -> Result<()> {
        let first = storage.particle_cnt();
        let dummy = self.fixed.clone_buffers(crate::quantities::VisitorEnum::AllBuffers);
        storage.merge(dummy)?;
        self.added_idxs = (first..storage.particle_cnt()).collect();
        Ok(())
    }

    fn finalize(&mut self, storage: &mut Storage) -> Result<()> {
        if !self.added_idxs.is_empty() {
            storage.remove(&self.added_idxs);
            self.added_idxs.clear();
        }
        Ok(())
    }
}

/// Constrains the run to a line, for 1D problems
///
/// Positions keep only the x component (and the smoothing length);
/// transverse velocity components are dropped. Derivatives of the few
/// outermost particles on both ends are zeroed, fixing the boundary; the
/// particle layout is assumed ordered along the line.
pub struct Projection1D {
    domain: crate::math::Interval,
}

impl Projection1D {
    /// Number of pinned particles at each end of the line
    const PINNED: usize = 4;

    /// Creates the projection onto the given x interval
    pub fn new(domain: crate::math::Interval) -> Self {
        Projection1D { domain }
    }
}

struct ZeroEnds {
    cnt: usize,
}

impl ZeroEnds {
    fn pinned(&self, i: usize) -> bool {
        i < Projection1D::PINNED || i + Projection1D::PINNED >= self.cnt
    }
}

impl FirstOrderVisitor for ZeroEnds {
    fn visit<T: ArithmeticValue>(&mut self, _id: QuantityId, _x: &mut [T], dx: &mut [T]) {
        for i in 0..dx.len() {
            if self.pinned(i) {
                dx[i] = T::default();
            }
        }
    }
}

impl SecondOrderVisitor for ZeroEnds {
    fn visit<T: ArithmeticValue>(&mut self, _id: QuantityId, _x: &mut [T], dx: &mut [T], d2x: &mut [T]) {
        for i in 0..dx.len() {
            if self.pinned(i) {
                dx[i] = T::default();
                d2x[i] = T::default();
            }
        }
    }
}

impl BoundaryCondition for Projection1D {
    fn initialize(&mut self, _storage: &mut Storage) -> Result<()> {
        Ok(())
    }

    fn finalize(&mut self, storage: &mut Storage) -> Result<()> {
        {
            let r = storage.value_mut::<Vector>(QuantityId::Position)?;
            for pos in r.iter_mut() {
                *pos = Vector::with_h(self.domain.clamp(pos.x), 0.0, 0.0, pos[H]);
            }
        }
        {
            let v = storage.dt_mut::<Vector>(QuantityId::Position)?;
            for vel in v.iter_mut() {
                *vel = Vector::new(vel.x, 0.0, 0.0);
            }
        }
        let cnt = storage.particle_cnt();
        if cnt > 2 * Self::PINNED {
            let mut visitor = ZeroEnds { cnt };
            iterate_first_order(storage, &mut visitor);
            iterate_second_order(storage, &mut visitor);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantities::OrderEnum;

    fn wall_storage(xs: &[f64], scalar: &[f64]) -> Storage {
        let mut storage = Storage::new();
        storage
            .insert_values(
                QuantityId::Position,
                OrderEnum::Second,
                xs.iter().map(|&x| Vector::with_h(x, 0.0, 0.0, 1.0)).collect(),
            )
            .unwrap();
        storage
            .insert_values(QuantityId::Energy, OrderEnum::First, scalar.to_vec())
            .unwrap();
        storage
    }

    #[test]
    fn test_ghost_wall_scenario() {
        // wall at x = 0, interior x > 0; kernel radius 2, h = 1
        let settings = RunSettings::new();
        let eps: f64 = settings.get(RunSettingsId::DomainGhostMinDist).unwrap();
        let mut bc =
            GhostParticles::new(Box::new(HalfSpaceDomain::new(0, 0.0)), &settings).unwrap();
        let mut storage = wall_storage(
            &[1.5, 0.5, -1.0, 0.0, 5.0, 1.0, 2.5],
            &[3.0, 5.0, 2.0, 1.0, 3.0, 4.0, 10.0],
        );
        bc.initialize(&mut storage).unwrap();

        // particles at x = 1.5, 0.5, 0 (projected from -1), 0, 1 get ghosts;
        // x = 5 and x = 2.5 are beyond the support
        assert_eq!(bc.ghost_cnt(), 5);
        assert_eq!(storage.particle_cnt(), 12);

        let r = storage.value::<Vector>(QuantityId::Position).unwrap();
        let mut ghost_xs: Vec<f64> = bc.ghost_idxs.iter().map(|&g| r[g].x).collect();
        ghost_xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mut expected = vec![-1.5, -1.0, -0.5, -eps, -eps];
        expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
        for (ghost, want) in ghost_xs.iter().zip(&expected) {
            assert!((ghost - want).abs() < 1e-10, "ghosts at {:?}", ghost_xs);
        }

        // scalar quantities are copied onto ghosts
        let u = storage.value::<f64>(QuantityId::Energy).unwrap();
        let mut ghost_values: Vec<f64> = bc.ghost_idxs.iter().map(|&g| u[g]).collect();
        ghost_values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(ghost_values, vec![1.0, 2.0, 3.0, 4.0, 5.0]);

        // removal restores the original particle set
        bc.finalize(&mut storage).unwrap();
        assert_eq!(storage.particle_cnt(), 7);
        storage.is_valid(true).unwrap();
    }

    #[test]
    fn test_ghost_velocity_mirroring() {
        let settings = RunSettings::new();
        let mut bc =
            GhostParticles::new(Box::new(HalfSpaceDomain::new(0, 0.0)), &settings).unwrap();
        let mut storage = wall_storage(&[0.5], &[1.0]);
        // velocity with parallel (y) and perpendicular (x) components
        storage.dt_mut::<Vector>(QuantityId::Position).unwrap()[0] = Vector::new(2.0, 3.0, 0.0);
        bc.initialize(&mut storage).unwrap();
        assert_eq!(bc.ghost_cnt(), 1);
        let v = storage.dt::<Vector>(QuantityId::Position).unwrap();
        let ghost_v = v[1];
        assert!((ghost_v.x + 2.0).abs() < 1e-5, "perpendicular flipped: {:?}", ghost_v);
        assert!((ghost_v.y - 3.0).abs() < 1e-5, "parallel preserved: {:?}", ghost_v);
    }

    #[test]
    fn test_frozen_particles_zero_derivatives() {
        let domain = Box::new(HalfSpaceDomain::new(0, 0.0));
        let mut bc = FrozenParticles::new(domain, 1.0);
        let mut storage = wall_storage(&[0.5, 5.0], &[1.0, 1.0]);
        storage.dt_mut::<Vector>(QuantityId::Position).unwrap()[0] = Vector::new(1.0, 0.0, 0.0);
        storage
            .d2t_mut::<Vector>(QuantityId::Position)
            .unwrap()
            .fill(Vector::new(0.0, 0.0, -9.0));
        storage.dt_mut::<f64>(QuantityId::Energy).unwrap().fill(2.0);

        bc.finalize(&mut storage).unwrap();
        let dv = storage.d2t::<Vector>(QuantityId::Position).unwrap();
        let du = storage.dt::<f64>(QuantityId::Energy).unwrap();
        let v = storage.dt::<Vector>(QuantityId::Position).unwrap();
        // the near-boundary particle is frozen, the far one keeps its rates
        assert_eq!(dv[0], Vector::zero());
        assert_eq!(du[0], 0.0);
        assert_eq!(v[0], Vector::new(1.0, 0.0, 0.0));
        assert_eq!(dv[1], Vector::new(0.0, 0.0, -9.0));
        assert_eq!(du[1], 2.0);
    }

    #[test]
    fn test_fixed_particles_round_trip() {
        let mut fixed = Storage::new();
        fixed
            .insert_values(
                QuantityId::Position,
                OrderEnum::Second,
                vec![Vector::with_h(-1.0, 0.0, 0.0, 1.0); 3],
            )
            .unwrap();
        fixed
            .insert(QuantityId::Energy, OrderEnum::First, 0.0_f64)
            .unwrap();
        let mut bc = FixedParticles::new(fixed);
        let mut storage = wall_storage(&[1.0, 2.0], &[1.0, 2.0]);
        bc.initialize(&mut storage).unwrap();
        assert_eq!(storage.particle_cnt(), 5);
        bc.finalize(&mut storage).unwrap();
        assert_eq!(storage.particle_cnt(), 2);
        assert_eq!(
            storage.value::<f64>(QuantityId::Energy).unwrap(),
            &[1.0, 2.0]
        );
    }

    #[test]
    fn test_projection_1d() {
        let mut bc = Projection1D::new(crate::math::Interval::new(-1.0, 1.0));
        let xs: Vec<f64> = (0..12).map(|i| -1.0 + i as f64 * 0.18).collect();
        let scalars = vec![0.0; 12];
        let mut storage = wall_storage(&xs, &scalars);
        {
            let v = storage.dt_mut::<Vector>(QuantityId::Position).unwrap();
            for vel in v.iter_mut() {
                *vel = Vector::new(0.5, 0.7, -0.2);
            }
        }
        storage.dt_mut::<f64>(QuantityId::Energy).unwrap().fill(3.0);
        bc.finalize(&mut storage).unwrap();
        let v = storage.dt::<Vector>(QuantityId::Position).unwrap();
        // transverse components dropped everywhere
        assert!(v.iter().all(|vel| vel.y == 0.0 && vel.z == 0.0));
        // end particles pinned
        let du = storage.dt::<f64>(QuantityId::Energy).unwrap();
        assert_eq!(du[0], 0.0);
        assert_eq!(du[11], 0.0);
        assert_eq!(du[6], 3.0);
    }
}
