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
//! Equations of state
//!
//! An equation of state maps density and specific internal energy to
//! pressure and sound speed. All provided forms are piecewise continuous in
//! both arguments. Inverse queries (density from pressure, energy from
//! pressure) are analytic where possible and fall back to bisection
//! otherwise; a failed inversion is a [`Error::Numeric`] the caller may
//! retry with wider bounds or absorb into statistics.
//!
//! # Provided forms
//!
//! - Ideal gas: p = (gamma - 1) rho u
//! - Polytrope: p = K rho^gamma
//! - Tait: weakly compressible fluid with constant sound speed
//! - Mie-Grueneisen: Hugoniot-based compressed branch plus thermal term
//! - Tillotson: piecewise in (rho, u) with blended intermediate phase
//! - Simplified Tillotson: c rho u + A mu
//! - Murnaghan: p = cs^2 (rho - rho0)
//!
//! # References
//!
//! - Tillotson, J. H. (1962). Metallic equations of state for hypervelocity
//!   impact. General Atomic Report GA-3216.
//! - Melosh, H. J. (1989). Impact Cratering: A Geologic Process.
//! - Benz, W. & Asphaug, E. (1999). Catastrophic disruptions revisited.
//!   Icarus 142.

use crate::error::{Error, Result};
use crate::math::{get_root, Interval};
use crate::settings::{BodySettings, BodySettingsId, EosEnum};

/// Universal gas constant in SI units (J/(mol K))
const GAS_CONSTANT: f64 = 8.3145;

/// Equation of state, mapping (density, specific energy) to (pressure, sound speed)
pub trait Eos: Send + Sync {
    /// Evaluates pressure and sound speed
    fn evaluate(&self, rho: f64, u: f64) -> (f64, f64);

    /// Inverts the EOS for specific energy given density and pressure
    fn internal_energy(&self, rho: f64, p: f64) -> Result<f64> {
        let _ = (rho, p);
        Err(Error::Numeric("energy inversion not supported by this EOS".into()))
    }

    /// Inverts the EOS for density given pressure and specific energy
    fn density(&self, p: f64, u: f64) -> Result<f64> {
        let _ = (p, u);
        Err(Error::Numeric("density inversion not supported by this EOS".into()))
    }

    /// Temperature estimate from the heat capacity
    fn temperature(&self, rho: f64, u: f64) -> Result<f64> {
        let _ = (rho, u);
        Err(Error::Numeric("temperature not supported by this EOS".into()))
    }
}

/// Inverts an EOS for density by bracketing and bisection
///
/// Brackets the root by repeated doubling/halving from the reference
/// density, limited to six orders of magnitude in either direction.
fn bisect_density(eos: &dyn Eos, p: f64, u: f64, rho0: f64) -> Result<f64> {
    let mut rho_max = rho0;
    while rho_max < 1e6 * rho0 {
        rho_max *= 2.0;
        if eos.evaluate(rho_max, u).0 > p {
            break;
        }
    }
    let mut rho_min = rho0;
    while rho_min > 1e-6 * rho0 {
        rho_min *= 0.5;
        if eos.evaluate(rho_min, u).0 < p {
            break;
        }
    }
    get_root(Interval::new(rho_min, rho_max), 1e-12, |rho| {
        p - eos.evaluate(rho, u).0
    })
    .ok_or_else(|| Error::Numeric(format!("density inversion diverged for p = {}, u = {}", p, u)))
}

/// Ideal gas EOS
pub struct IdealGasEos {
    gamma: f64,
}

impl IdealGasEos {
    /// Creates the EOS from the adiabatic index
    pub fn new(gamma: f64) -> Self {
        IdealGasEos { gamma }
    }
}

impl Eos for IdealGasEos {
    fn evaluate(&self, rho: f64, u: f64) -> (f64, f64) {
        let p = (self.gamma - 1.0) * u * rho;
        (p, (self.gamma * p / rho).sqrt())
    }

    fn internal_energy(&self, rho: f64, p: f64) -> Result<f64> {
        Ok(p / ((self.gamma - 1.0) * rho))
    }

    fn density(&self, p: f64, u: f64) -> Result<f64> {
        Ok(p / ((self.gamma - 1.0) * u))
    }

    fn temperature(&self, _rho: f64, u: f64) -> Result<f64> {
        Ok(u / GAS_CONSTANT)
    }
}

/// Polytropic EOS, p = K rho^gamma
pub struct PolytropicEos {
    k: f64,
    gamma: f64,
}

impl PolytropicEos {
    /// Creates the EOS from the proportionality constant and exponent
    pub fn new(k: f64, gamma: f64) -> Self {
        PolytropicEos { k, gamma }
    }
}

impl Eos for PolytropicEos {
    fn evaluate(&self, rho: f64, _u: f64) -> (f64, f64) {
        let p = self.k * rho.powf(self.gamma);
        (p, (self.gamma * p / rho).sqrt())
    }

    fn density(&self, p: f64, _u: f64) -> Result<f64> {
        Ok((p / self.k).powf(1.0 / self.gamma))
    }
}

/// Tait EOS of weakly compressible fluids
pub struct TaitEos {
    c0: f64,
    rho0: f64,
    gamma: f64,
    c_p: f64,
}

impl TaitEos {
    /// Creates the EOS from material parameters
    pub fn new(settings: &BodySettings) -> Result<Self> {
        Ok(TaitEos {
            c0: settings.get(BodySettingsId::TaitSoundSpeed)?,
            rho0: settings.get(BodySettingsId::Density)?,
            gamma: settings.get(BodySettingsId::TaitGamma)?,
            c_p: settings.get(BodySettingsId::HeatCapacity)?,
        })
    }
}

impl Eos for TaitEos {
    fn evaluate(&self, rho: f64, _u: f64) -> (f64, f64) {
        let p = self.c0 * self.c0 * self.rho0 / self.gamma
            * ((rho / self.rho0).powf(self.gamma) - 1.0);
        (p, self.c0)
    }

    fn temperature(&self, _rho: f64, u: f64) -> Result<f64> {
        Ok(u / self.c_p)
    }
}

/// Mie-Grueneisen EOS with a linear-Hugoniot reference curve
pub struct MieGruneisenEos {
    c0: f64,
    rho0: f64,
    gamma: f64,
    s: f64,
    c_p: f64,
}

impl MieGruneisenEos {
    /// Creates the EOS from material parameters
    pub fn new(settings: &BodySettings) -> Result<Self> {
        Ok(MieGruneisenEos {
            c0: settings.get(BodySettingsId::BulkSoundSpeed)?,
            rho0: settings.get(BodySettingsId::Density)?,
            gamma: settings.get(BodySettingsId::GruneisenGamma)?,
            s: settings.get(BodySettingsId::HugoniotSlope)?,
            c_p: settings.get(BodySettingsId::HeatCapacity)?,
        })
    }
}

impl Eos for MieGruneisenEos {
    fn evaluate(&self, rho: f64, u: f64) -> (f64, f64) {
        let chi = 1.0 - self.rho0 / rho;
        let num = self.rho0 * self.c0 * self.c0 * chi * (1.0 - 0.5 * self.gamma * chi);
        let denom = (1.0 - self.s * chi) * (1.0 - self.s * chi);
        debug_assert!(denom != 0.0);
        (num / denom + self.gamma * u * rho, self.c0)
    }

    fn temperature(&self, _rho: f64, u: f64) -> Result<f64> {
        Ok(u / self.c_p)
    }
}

/// Tillotson EOS for impact simulations
///
/// Compressed branch is polynomial in mu = rho/rho0 - 1; the expanded branch
/// damps the compression terms with double exponentials; for sub-reference
/// densities with energy between the incipient and complete vaporization
/// thresholds the two branches blend linearly in energy.
pub struct TillotsonEos {
    u0: f64,
    uiv: f64,
    ucv: f64,
    a: f64,
    b: f64,
    rho0: f64,
    big_a: f64,
    big_b: f64,
    alpha: f64,
    beta: f64,
    c_p: f64,
}

impl TillotsonEos {
    /// Creates the EOS from material parameters
    pub fn new(settings: &BodySettings) -> Result<Self> {
        Ok(TillotsonEos {
            u0: settings.get(BodySettingsId::TillotsonSublimation)?,
            uiv: settings.get(BodySettingsId::TillotsonEnergyIv)?,
            ucv: settings.get(BodySettingsId::TillotsonEnergyCv)?,
            a: settings.get(BodySettingsId::TillotsonSmallA)?,
            b: settings.get(BodySettingsId::TillotsonSmallB)?,
            rho0: settings.get(BodySettingsId::Density)?,
            big_a: settings.get(BodySettingsId::BulkModulus)?,
            big_b: settings.get(BodySettingsId::TillotsonNonlinearB)?,
            alpha: settings.get(BodySettingsId::TillotsonAlpha)?,
            beta: settings.get(BodySettingsId::TillotsonBeta)?,
            c_p: settings.get(BodySettingsId::HeatCapacity)?,
        })
    }
}

impl Eos for TillotsonEos {
    fn evaluate(&self, rho: f64, u: f64) -> (f64, f64) {
        let eta = rho / self.rho0;
        let mu = eta - 1.0;
        let denom = u / (self.u0 * eta * eta) + 1.0;

        // compressed phase; cs accumulates the squared sound speed
        let pc = (self.a + self.b / denom) * rho * u + self.big_a * mu + self.big_b * mu * mu;
        let dpdu = self.a * rho + self.b * rho / (denom * denom);
        let dpdrho = self.a * u
            + self.b * u * (3.0 * denom - 2.0) / (denom * denom)
            + self.big_a / self.rho0
            + 2.0 * self.big_b * mu / self.rho0;
        let csc = dpdrho + dpdu * pc / (rho * rho);

        // expanded phase
        let rho_exp = self.rho0 / rho - 1.0;
        let beta_exp = (-(self.beta * rho_exp).min(70.0)).exp();
        let alpha_exp = (-(self.alpha * rho_exp * rho_exp).min(70.0)).exp();
        let pe = self.a * rho * u
            + (self.b * rho * u / denom + self.big_a * mu * beta_exp) * alpha_exp;
        let dpdu = self.a * rho + alpha_exp * self.b * rho / (denom * denom);
        let dpdrho = self.a * u
            + alpha_exp * (self.b * u * (3.0 * denom - 2.0) / (denom * denom))
            + alpha_exp * (self.b * u * rho / denom) * self.rho0 * (2.0 * self.alpha * rho_exp)
                / (rho * rho)
            + alpha_exp
                * self.big_a
                * beta_exp
                * (1.0 / self.rho0
                    + self.rho0 * mu / (rho * rho) * (2.0 * self.alpha * rho_exp + self.beta));
        let cse = (dpdrho + dpdu * pe / (rho * rho)).max(0.0);

        // select the phase from density and energy
        let (mut p, mut cs_sqr) = (pc, csc);
        if rho <= self.rho0 && u > self.ucv {
            p = pe;
            cs_sqr = cse;
        } else if rho <= self.rho0 && u > self.uiv {
            let t = (u - self.uiv) / (self.ucv - self.uiv);
            p = t * pe + (1.0 - t) * pc;
            cs_sqr = t * cse + (1.0 - t) * csc;
        }
        cs_sqr = cs_sqr.max(0.25 * self.big_a / self.rho0);
        (p, cs_sqr.sqrt())
    }

    fn internal_energy(&self, rho: f64, p: f64) -> Result<f64> {
        // compressed phase solves a quadratic in u
        let eta = rho / self.rho0;
        let mu = eta - 1.0;
        let x = (p - self.big_a * mu - self.big_b * mu * mu) / rho;
        let l = self.a;
        let m = self.u0 * eta * eta * (self.a + self.b) - x;
        let n = -x * self.u0 * eta * eta;
        let disc = m * m - 4.0 * l * n;
        if disc < 0.0 {
            return Err(Error::Numeric("Tillotson energy inversion has no real root".into()));
        }
        let u = (-m + disc.sqrt()) / (2.0 * l);

        if rho <= self.rho0 && u > self.uiv {
            // actually in the expanded regime; bisect on energy
            let root = get_root(Interval::new(0.0, self.u0), 1e-12, |u| {
                p - self.evaluate(rho, u).0
            });
            // without a bracketed root, fall back to the compressed solution
            Ok(root.unwrap_or(u))
        } else {
            Ok(u)
        }
    }

    fn density(&self, p: f64, u: f64) -> Result<f64> {
        bisect_density(self, p, u, self.rho0)
    }

    fn temperature(&self, _rho: f64, u: f64) -> Result<f64> {
        Ok(u / self.c_p)
    }
}

/// Simplified (linearized) Tillotson EOS
pub struct SimplifiedTillotsonEos {
    c: f64,
    rho0: f64,
    big_a: f64,
    c_p: f64,
}

impl SimplifiedTillotsonEos {
    /// Creates the EOS from material parameters
    pub fn new(settings: &BodySettings) -> Result<Self> {
        let a: f64 = settings.get(BodySettingsId::TillotsonSmallA)?;
        let b: f64 = settings.get(BodySettingsId::TillotsonSmallB)?;
        Ok(SimplifiedTillotsonEos {
            c: a + b,
            rho0: settings.get(BodySettingsId::Density)?,
            big_a: settings.get(BodySettingsId::BulkModulus)?,
            c_p: settings.get(BodySettingsId::HeatCapacity)?,
        })
    }
}

impl Eos for SimplifiedTillotsonEos {
    fn evaluate(&self, rho: f64, u: f64) -> (f64, f64) {
        let mu = rho / self.rho0 - 1.0;
        let p = self.c * rho * u + self.big_a * mu;
        (p, (self.big_a / self.rho0).sqrt())
    }

    fn temperature(&self, _rho: f64, u: f64) -> Result<f64> {
        Ok(u / self.c_p)
    }
}

/// Murnaghan EOS, linear in density
pub struct MurnaghanEos {
    rho0: f64,
    big_a: f64,
    c_p: f64,
}

impl MurnaghanEos {
    /// Creates the EOS from material parameters
    pub fn new(settings: &BodySettings) -> Result<Self> {
        Ok(MurnaghanEos {
            rho0: settings.get(BodySettingsId::Density)?,
            big_a: settings.get(BodySettingsId::BulkModulus)?,
            c_p: settings.get(BodySettingsId::HeatCapacity)?,
        })
    }
}

impl Eos for MurnaghanEos {
    fn evaluate(&self, rho: f64, _u: f64) -> (f64, f64) {
        let cs = (self.big_a / self.rho0).sqrt();
        (cs * cs * (rho - self.rho0), cs)
    }

    fn density(&self, p: f64, _u: f64) -> Result<f64> {
        Ok(self.rho0 + p * self.rho0 / self.big_a)
    }

    fn temperature(&self, _rho: f64, u: f64) -> Result<f64> {
        Ok(u / self.c_p)
    }
}

/// Instantiates the EOS selected by the material parameters
///
/// Returns `None` for [`EosEnum::None`].
pub fn create_eos(settings: &BodySettings) -> Result<Option<Box<dyn Eos>>> {
    let selected: EosEnum = settings.get(BodySettingsId::Eos)?;
    let eos: Box<dyn Eos> = match selected {
        EosEnum::None => return Ok(None),
        EosEnum::IdealGas => Box::new(IdealGasEos::new(settings.get(BodySettingsId::AdiabaticIndex)?)),
        EosEnum::Polytropic => Box::new(PolytropicEos::new(
            settings.get(BodySettingsId::PolytropicConstant)?,
            settings.get(BodySettingsId::AdiabaticIndex)?,
        )),
        EosEnum::Tait => Box::new(TaitEos::new(settings)?),
        EosEnum::MieGruneisen => Box::new(MieGruneisenEos::new(settings)?),
        EosEnum::Tillotson => Box::new(TillotsonEos::new(settings)?),
        EosEnum::SimplifiedTillotson => Box::new(SimplifiedTillotsonEos::new(settings)?),
        EosEnum::Murnaghan => Box::new(MurnaghanEos::new(settings)?),
    };
    Ok(Some(eos))
}

/// Integrates an adiabat u(rho) of the given EOS into a sampled table
///
/// Along an adiabat du/drho = p / rho^2; negative pressures are clamped so
/// the energy stays monotonic.
pub fn compute_adiabat(eos: &dyn Eos, range: Interval, u0: f64, resolution: usize) -> Vec<(f64, f64)> {
    let mut u = u0;
    let drho = range.size() / resolution as f64;
    let mut table = Vec::with_capacity(resolution);
    let mut rho = range.lower();
    while rho < range.upper() {
        let p = eos.evaluate(rho, u).0;
        u += p.max(0.0) / (rho * rho) * drho;
        table.push((rho, u));
        rho += drho;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basalt() -> BodySettings {
        BodySettings::new().with(BodySettingsId::Density, 2700.0)
    }

    #[test]
    fn test_ideal_gas() {
        let eos = IdealGasEos::new(1.4);
        let (p, cs) = eos.evaluate(1.0, 2.5);
        assert!((p - 1.0).abs() < 1e-12);
        assert!((cs - (1.4_f64).sqrt()).abs() < 1e-12);
        assert!((eos.internal_energy(1.0, p).unwrap() - 2.5).abs() < 1e-12);
        assert!((eos.density(p, 2.5).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_polytropic_inverse() {
        let eos = PolytropicEos::new(2.0, 5.0 / 3.0);
        let (p, _) = eos.evaluate(3.0, 0.0);
        assert!((eos.density(p, 0.0).unwrap() - 3.0).abs() < 1e-10);
    }

    #[test]
    fn test_tait_reference_density_is_zero_pressure() {
        let eos = TaitEos::new(&basalt().with(BodySettingsId::TaitSoundSpeed, 1480.0)).unwrap();
        let (p, cs) = eos.evaluate(2700.0, 0.0);
        assert!(p.abs() < 1e-6);
        assert_eq!(cs, 1480.0);
        // compression increases pressure
        assert!(eos.evaluate(2800.0, 0.0).0 > 0.0);
        assert!(eos.evaluate(2600.0, 0.0).0 < 0.0);
    }

    #[test]
    fn test_murnaghan() {
        let eos = MurnaghanEos::new(&basalt()).unwrap();
        let (p0, cs) = eos.evaluate(2700.0, 0.0);
        assert_eq!(p0, 0.0);
        assert!((cs - (2.67e10_f64 / 2700.0).sqrt()).abs() < 1e-6);
        let (p, _) = eos.evaluate(3000.0, 0.0);
        assert!((eos.density(p, 0.0).unwrap() - 3000.0).abs() < 1e-6);
    }

    #[test]
    fn test_tillotson_compressed_matches_bulk_modulus() {
        let eos = TillotsonEos::new(&basalt()).unwrap();
        // small compression at zero energy behaves like p = A mu
        let mu = 1e-4;
        let (p, _) = eos.evaluate(2700.0 * (1.0 + mu), 0.0);
        assert!((p / (2.67e10 * mu) - 1.0).abs() < 1e-2);
    }

    #[test]
    fn test_tillotson_continuity_in_energy() {
        let eos = TillotsonEos::new(&basalt()).unwrap();
        // scan across the blended interval at sub-reference density
        let rho = 2500.0;
        let mut prev = eos.evaluate(rho, 0.0);
        let mut u = 1e4;
        while u < 1e8 {
            let curr = eos.evaluate(rho, u);
            assert!(
                (curr.0 - prev.0).abs() < 1e5 + 0.5 * (curr.0.abs() + prev.0.abs()),
                "pressure jump at u = {}: {} -> {}",
                u,
                prev.0,
                curr.0
            );
            prev = curr;
            u *= 1.05;
        }
    }

    #[test]
    fn test_tillotson_continuity_in_density() {
        let eos = TillotsonEos::new(&basalt()).unwrap();
        let u = 1e6;
        let mut rho = 1000.0;
        let mut prev = eos.evaluate(rho, u);
        while rho < 8000.0 {
            let curr = eos.evaluate(rho, u);
            assert!(
                (curr.0 - prev.0).abs() < 1e5 + 0.02 * (curr.0.abs() + prev.0.abs()),
                "pressure jump at rho = {}",
                rho
            );
            prev = curr;
            rho *= 1.001;
        }
    }

    #[test]
    fn test_tillotson_inverse_round_trips() {
        let eos = TillotsonEos::new(&basalt()).unwrap();
        for rho in [2000.0, 2700.0, 3500.0] {
            for u in [1e4, 1e5, 1e6] {
                let (p, _) = eos.evaluate(rho, u);
                let rho_back = eos.density(p, u).unwrap();
                let (p_back, _) = eos.evaluate(rho_back, u);
                assert!(
                    (p_back - p).abs() <= 1e-6 * p.abs().max(1.0),
                    "density inversion off at rho = {}, u = {}",
                    rho,
                    u
                );
                // energy inversion in the compressed phase
                if rho > 2700.0 {
                    let u_back = eos.internal_energy(rho, p).unwrap();
                    assert!((u_back - u).abs() <= 1e-6 * u, "energy inversion off at rho = {}", rho);
                }
            }
        }
    }

    #[test]
    fn test_simplified_tillotson() {
        let eos = SimplifiedTillotsonEos::new(&basalt()).unwrap();
        let (p, cs) = eos.evaluate(2700.0, 0.0);
        assert_eq!(p, 0.0);
        assert!(cs > 0.0);
    }

    #[test]
    fn test_mie_gruneisen_reference_state() {
        let eos = MieGruneisenEos::new(&basalt()).unwrap();
        let (p, cs) = eos.evaluate(2700.0, 0.0);
        assert!(p.abs() < 1e-6);
        assert_eq!(cs, 5.9e3);
        assert!(eos.evaluate(3000.0, 0.0).0 > 0.0);
    }

    #[test]
    fn test_factory() {
        let settings = basalt().with(BodySettingsId::Eos, EosEnum::None);
        assert!(create_eos(&settings).unwrap().is_none());
        let settings = basalt().with(BodySettingsId::Eos, EosEnum::Tillotson);
        assert!(create_eos(&settings).unwrap().is_some());
    }

    #[test]
    fn test_adiabat_monotonic() {
        let eos = IdealGasEos::new(1.4);
        let table = compute_adiabat(&eos, Interval::new(0.5, 2.0), 1.0, 100);
        for pair in table.windows(2) {
            assert!(pair[1].1 >= pair[0].1);
        }
    }
}
