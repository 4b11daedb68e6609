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
//! Initial conditions
//!
//! Samples particle positions inside a domain, assigns masses and
//! smoothing lengths from the particle volume, instantiates the material
//! and the solver quantities and merges the new body into the target
//! storage, preserving all storage invariants. Deliberately minimal: the
//! construction of complex initial states lives outside the core engine.

use crate::boundary::Domain;
use crate::error::{Error, Result};
use crate::math::Vector;
use crate::physics::materials::{create_material, Material, MaterialInitialContext};
use crate::quantities::{OrderEnum, QuantityId, Storage};
use crate::settings::{BodySettings, BodySettingsId, DistributionEnum};
use crate::solvers::Solver;
use rand::{Rng, SeedableRng};

/// Sampler of particle positions inside a domain
pub trait Distribution {
    /// Generates approximately `cnt` positions with smoothing lengths set
    fn generate(&self, cnt: usize, domain: &dyn Domain, eta: f64) -> Result<Vec<Vector>>;
}

fn bounded(domain: &dyn Domain) -> Result<((Vector, Vector), f64)> {
    let bounds = domain
        .bounds()
        .ok_or_else(|| Error::InvalidSetup("cannot sample an unbounded domain".into()))?;
    let volume = domain
        .volume()
        .ok_or_else(|| Error::InvalidSetup("cannot sample an unbounded domain".into()))?;
    Ok((bounds, volume))
}

/// Hexagonal close packing
pub struct HexagonalPacking;

impl Distribution for HexagonalPacking {
    fn generate(&self, cnt: usize, domain: &dyn Domain, eta: f64) -> Result<Vec<Vector>> {
        let ((lower, upper), volume) = bounded(domain)?;
        // lattice spacing of an HCP arrangement with the target count
        let spacing = (std::f64::consts::SQRT_2 * volume / cnt as f64).cbrt();
        let h = eta * spacing;
        let dx = spacing;
        let dy = spacing * (3.0_f64).sqrt() * 0.5;
        let dz = spacing * (6.0_f64).sqrt() / 3.0;

        let mut positions = Vec::with_capacity(cnt);
        let mut iz = 0;
        let mut z = lower.z;
        while z <= upper.z {
            let mut iy = 0;
            let mut y = lower.y;
            while y <= upper.y {
                let x_offset = match (iy % 2, iz % 3) {
                    (1, _) => 0.5 * dx,
                    (_, 1) => 0.5 * dx,
                    _ => 0.0,
                };
                let mut x = lower.x + x_offset;
                while x <= upper.x {
                    let candidate = Vector::with_h(x, y, z, h);
                    if domain.contains(candidate) {
                        positions.push(candidate);
                    }
                    x += dx;
                }
                iy += 1;
                y += dy;
            }
            iz += 1;
            z += dz;
        }
        Ok(positions)
    }
}

/// Cubic lattice packing
pub struct CubicPacking;

impl Distribution for CubicPacking {
    fn generate(&self, cnt: usize, domain: &dyn Domain, eta: f64) -> Result<Vec<Vector>> {
        let ((lower, upper), volume) = bounded(domain)?;
        let spacing = (volume / cnt as f64).cbrt();
        let h = eta * spacing;
        let mut positions = Vec::with_capacity(cnt);
        let mut z = lower.z + 0.5 * spacing;
        while z <= upper.z {
            let mut y = lower.y + 0.5 * spacing;
            while y <= upper.y {
                let mut x = lower.x + 0.5 * spacing;
                while x <= upper.x {
                    let candidate = Vector::with_h(x, y, z, h);
                    if domain.contains(candidate) {
                        positions.push(candidate);
                    }
                    x += spacing;
                }
                y += spacing;
            }
            z += spacing;
        }
        Ok(positions)
    }
}

/// Uniform random sampling
pub struct RandomDistribution {
    seed: u64,
}

impl RandomDistribution {
    /// Creates the sampler with a deterministic seed
    pub fn new(seed: u64) -> Self {
        RandomDistribution { seed }
    }
}

impl Distribution for RandomDistribution {
    fn generate(&self, cnt: usize, domain: &dyn Domain, eta: f64) -> Result<Vec<Vector>> {
        let ((lower, upper), volume) = bounded(domain)?;
        let h = eta * (volume / cnt as f64).cbrt();
        let mut rng = rand::rngs::StdRng::seed_from_u64(self.seed);
        let mut positions = Vec::with_capacity(cnt);
        // rejection sampling against the domain; the bounding box of any
        // sane domain keeps the acceptance rate reasonable
        let mut attempts = 0_usize;
        while positions.len() < cnt {
            attempts += 1;
            if attempts > 1000 * cnt {
                return Err(Error::Numeric(
                    "rejection sampling failed to fill the domain".into(),
                ));
            }
            let candidate = Vector::with_h(
                rng.gen_range(lower.x..upper.x),
                rng.gen_range(lower.y..upper.y),
                rng.gen_range(lower.z..upper.z),
                h,
            );
            if domain.contains(candidate) {
                positions.push(candidate);
            }
        }
        Ok(positions)
    }
}

/// Builder of initial particle configurations
pub struct InitialConditions<'a> {
    solver: &'a mut dyn Solver,
    body_index: u32,
}

impl<'a> InitialConditions<'a> {
    /// Creates the builder around the solver of the run
    pub fn new(solver: &'a mut dyn Solver) -> Self {
        InitialConditions {
            solver,
            body_index: 0,
        }
    }

    /// Samples a single-material body into the domain and merges it into
    /// the target storage
    pub fn add_monolithic_body(
        &mut self,
        target: &mut Storage,
        domain: &dyn Domain,
        body: BodySettings,
    ) -> Result<()> {
        let cnt: i64 = body.get(BodySettingsId::ParticleCount)?;
        let eta: f64 = body.get(BodySettingsId::SmoothingLengthEta)?;
        let rho0: f64 = body.get(BodySettingsId::Density)?;
        let selected: DistributionEnum = body.get(BodySettingsId::InitialDistribution)?;
        let seed: i64 = body.get(BodySettingsId::DamageSeed)?;

        let distribution: Box<dyn Distribution> = match selected {
            DistributionEnum::HexagonalPacking => Box::new(HexagonalPacking),
            DistributionEnum::CubicPacking => Box::new(CubicPacking),
            DistributionEnum::Random => Box::new(RandomDistribution::new(seed as u64)),
        };
        let positions = distribution.generate(cnt.max(1) as usize, domain, eta)?;
        if positions.is_empty() {
            return Err(Error::InvalidSetup("no particles sampled into the domain".into()));
        }
        let volume = domain.volume().expect("checked by the distribution");
        let particle_mass = rho0 * volume / positions.len() as f64;

        let material = create_material(body)?;
        let mut storage = Storage::with_material(material.clone());
        storage.insert_values(QuantityId::Position, OrderEnum::Second, positions)?;
        storage.insert(QuantityId::Mass, OrderEnum::Zero, particle_mass)?;
        storage.insert(QuantityId::Flag, OrderEnum::Zero, self.body_index)?;

        {
            let mut guard = material.write().expect("material lock poisoned");
            let context = MaterialInitialContext {
                rng_seed: seed as u64,
            };
            // the solver creates the evolved quantities (density, energy)
            // that material-specific setup reads
            self.solver.create(&mut storage, &mut *guard)?;
            guard.create(&mut storage, &context)?;
        }
        storage.is_valid(false)?;

        if target.is_empty() && target.material_cnt() == 0 && target.quantity_cnt() == 0 {
            *target = storage;
        } else {
            target.merge(storage)?;
        }
        self.body_index += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{BlockDomain, SphericalDomain};
    use crate::math::H;

    #[test]
    fn test_hexagonal_packing_fills_block() {
        let domain = BlockDomain::new(Vector::zero(), Vector::new(1.0, 1.0, 1.0));
        let positions = HexagonalPacking.generate(1000, &domain, 1.3).unwrap();
        // lattice sampling lands within ~20% of the requested count
        assert!(positions.len() > 700 && positions.len() < 1400, "{}", positions.len());
        assert!(positions.iter().all(|p| domain.contains(*p)));
        assert!(positions.iter().all(|p| p[H] > 0.0));
    }

    #[test]
    fn test_random_distribution_in_sphere() {
        let domain = SphericalDomain::new(Vector::zero(), 1.0);
        let positions = RandomDistribution::new(42).generate(500, &domain, 1.3).unwrap();
        assert_eq!(positions.len(), 500);
        assert!(positions.iter().all(|p| p.length() <= 1.0));
    }

    #[test]
    fn test_monolithic_body_setup() {
        use crate::physics::materials::Material;
        struct MinimalSolver;
        impl Solver for MinimalSolver {
            fn integrate(
                &mut self,
                _storage: &mut Storage,
                _stats: &mut crate::statistics::Statistics,
            ) -> Result<()> {
                Ok(())
            }
            fn create(&mut self, storage: &mut Storage, material: &mut dyn Material) -> Result<()> {
                let rho0: f64 = material.params().get(BodySettingsId::Density)?;
                storage.insert(QuantityId::Density, OrderEnum::First, rho0)?;
                Ok(())
            }
        }

        let mut solver = MinimalSolver;
        let mut ic = InitialConditions::new(&mut solver);
        let mut storage = Storage::new();
        let domain = SphericalDomain::new(Vector::zero(), 1.0);
        let body = BodySettings::new()
            .with(BodySettingsId::ParticleCount, 300_i64)
            .with(BodySettingsId::Density, 2700.0);
        ic.add_monolithic_body(&mut storage, &domain, body.clone()).unwrap();
        storage.is_valid(true).unwrap();
        assert!(storage.particle_cnt() > 0);
        assert!(storage.has(QuantityId::Density));
        assert!(storage.has(QuantityId::Pressure));

        // total mass equals density times volume
        let total: f64 = storage.value::<f64>(QuantityId::Mass).unwrap().iter().sum();
        let expected = 2700.0 * 4.0 / 3.0 * std::f64::consts::PI;
        assert!((total - expected).abs() < 1e-6 * expected);

        // a second body gets a distinct flag and its own partition
        let second = SphericalDomain::new(Vector::new(5.0, 0.0, 0.0), 1.0);
        ic.add_monolithic_body(&mut storage, &second, body).unwrap();
        assert_eq!(storage.material_cnt(), 2);
        let flags = storage.value::<u32>(QuantityId::Flag).unwrap();
        assert_eq!(*flags.first().unwrap(), 0);
        assert_eq!(*flags.last().unwrap(), 1);
    }
}
