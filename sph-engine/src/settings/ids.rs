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
//! Settings keys and their default tables

use super::value::{
    ContinuityEnum, DamageEnum, DiscretizationEnum, DistributionEnum, EosEnum, FinderEnum,
    GravityKernelEnum, KernelEnum, SettingsType, SettingsValue, SignalSpeedEnum, TimesteppingEnum,
    YieldingEnum,
};
use super::{CriterionFlags, ForceFlags, SettingsKey, SmoothingLengthFlags};
use crate::math::Interval;
use serde::{Deserialize, Serialize};

/// Keys of the global run configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum RunSettingsId {
    /// Human-readable name of the run, written into text dumps
    RunName,
    /// Number of worker threads; zero selects the hardware parallelism
    RunThreadCnt,
    /// Particle batch size of the parallel pair loop
    RunThreadGranularity,

    /// Selected SPH smoothing kernel
    SphKernel,
    /// Discretization of gradient terms
    SphDiscretization,
    /// Linear coefficient of the standard artificial viscosity
    SphAvAlpha,
    /// Quadratic coefficient of the standard artificial viscosity
    SphAvBeta,
    /// Store the Balsara factor into a quantity for inspection
    SphAvBalsaraStore,
    /// Artificial conductivity coefficient of the energy-difference term
    SphAcAlpha,
    /// Artificial conductivity coefficient of the velocity term
    SphAcBeta,
    /// Signal speed used by artificial conductivity
    SphAcSignalSpeed,
    /// Exponent of the artificial stress weighting function
    SphAvStressExponent,
    /// Multiplicative factor of the artificial stress
    SphAvStressFactor,
    /// Strength of the XSPH velocity averaging
    SphXsphEpsilon,
    /// Delta-SPH density diffusion coefficient
    SphDensityDiffusionDelta,
    /// Delta-SPH velocity diffusion coefficient
    SphVelocityDiffusionAlpha,
    /// Sign applied to the delta-SPH contribution of the second particle when
    /// evaluated symmetrically; the default solver evaluates asymmetrically
    SphDeltaSphSymmetrizedSign,
    /// Evaluate the strain-rate correction tensor and correct gradients
    SphStrainRateCorrectionTensor,
    /// Skip pair contributions across damaged or foreign-body interfaces
    SphSumOnlyUndamaged,
    /// Evaluation mode of the continuity equation
    SphContinuityMode,
    /// Adaptive smoothing-length options
    SphAdaptiveSmoothingLength,
    /// Allowed neighbor-count window of the enforcement term
    SphNeighborRange,
    /// Strength of the neighbor-count enforcement
    SphNeighborEnforcing,
    /// Allowed interval of smoothing lengths
    SphSmoothingLengthRange,
    /// Forces evaluated by the solver
    SphSolverForces,

    /// Selected neighbor finder
    Finder,
    /// Maximal number of particles in a k-d tree leaf
    FinderLeafSize,

    /// Time-integration scheme
    Timestepping,
    /// Initial timestep of the run
    TimesteppingInitialTimestep,
    /// Upper bound of the adaptive timestep
    TimesteppingMaxTimestep,
    /// Courant number of the CFL criterion
    TimesteppingCourant,
    /// Multiplier of the derivative criterion
    TimesteppingDerivativeFactor,
    /// Enabled adaptive timestep criteria
    TimesteppingCriteria,
    /// Number of substeps of the modified midpoint method
    TimesteppingMidpointCount,
    /// Target accuracy of the Bulirsch-Stoer extrapolation
    TimesteppingBsAccuracy,
    /// Persist per-particle timesteps and binding criteria into quantities
    SaveParticleTimesteps,

    /// Gravity smoothing kernel
    GravityKernel,
    /// Opening angle of the Barnes-Hut multipole acceptance criterion
    GravityOpeningAngle,
    /// Maximal number of particles in a gravity tree leaf
    GravityLeafSize,

    /// Minimal distance of a ghost from the boundary, in units of h
    DomainGhostMinDist,
    /// Search radius of frozen boundary particles, in units of h
    DomainFrozenDist,
}

impl SettingsKey for RunSettingsId {
    fn defaults() -> Vec<(Self, SettingsValue)> {
        use RunSettingsId::*;
        vec![
            (RunName, String::from("unnamed run").into_value()),
            (RunThreadCnt, 0_i64.into_value()),
            (RunThreadGranularity, 1000_i64.into_value()),
            (SphKernel, KernelEnum::CubicSpline.into_value()),
            (SphDiscretization, DiscretizationEnum::Standard.into_value()),
            (SphAvAlpha, 1.5.into_value()),
            (SphAvBeta, 3.0.into_value()),
            (SphAvBalsaraStore, false.into_value()),
            (SphAcAlpha, 1.0.into_value()),
            (SphAcBeta, 1.5.into_value()),
            (
                SphAcSignalSpeed,
                SignalSpeedEnum::VelocityDifference.into_value(),
            ),
            (SphAvStressExponent, 4.0.into_value()),
            (SphAvStressFactor, 0.04.into_value()),
            (SphXsphEpsilon, 1.0.into_value()),
            (SphDensityDiffusionDelta, 0.1.into_value()),
            (SphVelocityDiffusionAlpha, 0.1.into_value()),
            (SphDeltaSphSymmetrizedSign, 1.0.into_value()),
            (SphStrainRateCorrectionTensor, false.into_value()),
            (SphSumOnlyUndamaged, true.into_value()),
            (SphContinuityMode, ContinuityEnum::Standard.into_value()),
            (
                SphAdaptiveSmoothingLength,
                (SmoothingLengthFlags::CONTINUITY_EQUATION.bits() as i64).into_value(),
            ),
            (SphNeighborRange, Interval::new(25.0, 100.0).into_value()),
            (SphNeighborEnforcing, 0.2.into_value()),
            (
                SphSmoothingLengthRange,
                Interval::new(1e-10, f64::INFINITY).into_value(),
            ),
            (
                SphSolverForces,
                (ForceFlags::PRESSURE.bits() as i64).into_value(),
            ),
            (Finder, FinderEnum::KdTree.into_value()),
            (FinderLeafSize, 20_i64.into_value()),
            (Timestepping, TimesteppingEnum::PredictorCorrector.into_value()),
            (TimesteppingInitialTimestep, 0.03.into_value()),
            (TimesteppingMaxTimestep, 10.0.into_value()),
            (TimesteppingCourant, 0.25.into_value()),
            (TimesteppingDerivativeFactor, 0.2.into_value()),
            (
                TimesteppingCriteria,
                ((CriterionFlags::COURANT | CriterionFlags::DERIVATIVES).bits() as i64).into_value(),
            ),
            (TimesteppingMidpointCount, 8_i64.into_value()),
            (TimesteppingBsAccuracy, 1e-6.into_value()),
            (SaveParticleTimesteps, false.into_value()),
            (GravityKernel, GravityKernelEnum::SphKernel.into_value()),
            (GravityOpeningAngle, 0.5.into_value()),
            (GravityLeafSize, 25_i64.into_value()),
            (DomainGhostMinDist, 1e-3.into_value()),
            (DomainFrozenDist, 2.5.into_value()),
        ]
    }
}

/// Keys of the per-material configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum BodySettingsId {
    /// Equation of state selection
    Eos,
    /// Reference (zero-pressure) density
    Density,
    /// Allowed interval of density
    DensityRange,
    /// Scale below which density differences are ignored by the derivative criterion
    DensityMin,
    /// Initial specific internal energy
    Energy,
    /// Allowed interval of specific energy
    EnergyRange,
    /// Scale below which energy differences are ignored by the derivative criterion
    EnergyMin,
    /// Adiabatic index of ideal gas and polytropic EOS
    AdiabaticIndex,
    /// Polytropic proportionality constant
    PolytropicConstant,
    /// Sound speed of the Tait EOS
    TaitSoundSpeed,
    /// Exponent of the Tait EOS
    TaitGamma,
    /// Bulk modulus (Tillotson A, Murnaghan compressibility)
    BulkModulus,
    /// Bulk sound speed of the Mie-Grueneisen EOS
    BulkSoundSpeed,
    /// Grueneisen gamma
    GruneisenGamma,
    /// Linear Hugoniot slope coefficient
    HugoniotSlope,
    /// Specific heat capacity at constant pressure
    HeatCapacity,
    /// Tillotson sublimation energy
    TillotsonSublimation,
    /// Tillotson energy of incipient vaporization
    TillotsonEnergyIv,
    /// Tillotson energy of complete vaporization
    TillotsonEnergyCv,
    /// Tillotson parameter a
    TillotsonSmallA,
    /// Tillotson parameter b
    TillotsonSmallB,
    /// Tillotson nonlinear compression coefficient B
    TillotsonNonlinearB,
    /// Tillotson expanded-phase exponent alpha
    TillotsonAlpha,
    /// Tillotson expanded-phase exponent beta
    TillotsonBeta,

    /// Yield criterion of the rheology
    RheologyYielding,
    /// Damage model
    RheologyDamage,
    /// Shear modulus
    ShearModulus,
    /// von Mises elasticity limit
    ElasticityLimit,
    /// Specific energy of melting, softens the yield limit
    MeltEnergy,
    /// Cohesion of the Drucker-Prager envelope
    Cohesion,
    /// Slope of the Drucker-Prager envelope (internal friction)
    InternalFriction,
    /// Scale below which stress differences are ignored by the derivative criterion
    StressTensorMin,
    /// Weibull coefficient (flaw density) of the Grady-Kipp model
    WeibullCoefficient,
    /// Weibull exponent of the Grady-Kipp model
    WeibullExponent,
    /// Seed of the flaw sampling
    DamageSeed,
    /// Allowed interval of damage
    DamageRange,
    /// Scale below which damage differences are ignored by the derivative criterion
    DamageMin,

    /// Initial coefficient of the Morris-Monaghan artificial viscosity
    AvAlpha,
    /// Allowed interval of the Morris-Monaghan coefficient
    AvAlphaRange,
    /// Surface tension coefficient of fluids
    SurfaceTension,
    /// Heat diffusivity
    Diffusivity,

    /// Number of particles sampled into the body
    ParticleCount,
    /// Initial particle distribution
    InitialDistribution,
    /// Ratio of the smoothing length to the interparticle spacing
    SmoothingLengthEta,
}

impl SettingsKey for BodySettingsId {
    fn defaults() -> Vec<(Self, SettingsValue)> {
        use BodySettingsId::*;
        vec![
            (Eos, EosEnum::IdealGas.into_value()),
            (Density, 2700.0.into_value()),
            (DensityRange, Interval::at_least(10.0).into_value()),
            (DensityMin, 50.0.into_value()),
            (Energy, 0.0.into_value()),
            (EnergyRange, Interval::at_least(0.0).into_value()),
            (EnergyMin, 10.0.into_value()),
            (AdiabaticIndex, 1.4.into_value()),
            (PolytropicConstant, 1.0.into_value()),
            (TaitSoundSpeed, 1484.0.into_value()),
            (TaitGamma, 7.0.into_value()),
            (BulkModulus, 2.67e10.into_value()),
            (BulkSoundSpeed, 5.9e3.into_value()),
            (GruneisenGamma, 2.0.into_value()),
            (HugoniotSlope, 1.49.into_value()),
            (HeatCapacity, 700.0.into_value()),
            (TillotsonSublimation, 4.87e8.into_value()),
            (TillotsonEnergyIv, 4.72e6.into_value()),
            (TillotsonEnergyCv, 1.82e7.into_value()),
            (TillotsonSmallA, 0.5.into_value()),
            (TillotsonSmallB, 1.5.into_value()),
            (TillotsonNonlinearB, 2.67e10.into_value()),
            (TillotsonAlpha, 5.0.into_value()),
            (TillotsonBeta, 5.0.into_value()),
            (RheologyYielding, YieldingEnum::VonMises.into_value()),
            (RheologyDamage, DamageEnum::ScalarGradyKipp.into_value()),
            (ShearModulus, 2.27e10.into_value()),
            (ElasticityLimit, 3.5e9.into_value()),
            (MeltEnergy, 3.4e6.into_value()),
            (Cohesion, 9e7.into_value()),
            (InternalFriction, 2.0.into_value()),
            (StressTensorMin, 1e5.into_value()),
            (WeibullCoefficient, 4e35.into_value()),
            (WeibullExponent, 9.0.into_value()),
            (DamageSeed, 1234_i64.into_value()),
            (DamageRange, Interval::new(0.0, 1.0).into_value()),
            (DamageMin, 0.03.into_value()),
            (AvAlpha, 1.5.into_value()),
            (AvAlphaRange, Interval::new(0.05, 1.5).into_value()),
            (SurfaceTension, 0.0.into_value()),
            (Diffusivity, 0.0.into_value()),
            (ParticleCount, 10000_i64.into_value()),
            (InitialDistribution, DistributionEnum::HexagonalPacking.into_value()),
            (SmoothingLengthEta, 1.3.into_value()),
        ]
    }
}
