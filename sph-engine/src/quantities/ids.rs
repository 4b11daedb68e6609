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
//! Closed set of quantity identifiers
//!
//! Each identifier carries a stable numeric code used by the binary dump
//! format and a display name used by text output. Codes are append-only;
//! removing or renumbering one would break dump compatibility.

macro_rules! quantity_ids {
    ($($(#[$meta:meta])* $variant:ident => ($code:literal, $name:literal)),+ $(,)?) => {
        /// Identifier of a quantity stored in [`Storage`](crate::quantities::Storage)
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum QuantityId {
            $($(#[$meta])* $variant,)+
        }

        impl QuantityId {
            /// Stable numeric code used by the binary dump format
            pub fn code(self) -> u32 {
                match self {
                    $(QuantityId::$variant => $code,)+
                }
            }

            /// Looks up an identifier by its numeric code
            pub fn from_code(code: u32) -> Option<Self> {
                match code {
                    $($code => Some(QuantityId::$variant),)+
                    _ => None,
                }
            }

            /// Display name used by text output column headers
            pub fn name(self) -> &'static str {
                match self {
                    $(QuantityId::$variant => $name,)+
                }
            }
        }
    };
}

quantity_ids! {
    /// Particle positions; the H lane carries the smoothing length
    Position => (0, "Position"),
    /// Particle masses
    Mass => (1, "Mass"),
    /// Mass density
    Density => (2, "Density"),
    /// Specific internal energy
    Energy => (3, "Energy"),
    /// Pressure from the equation of state
    Pressure => (4, "Pressure"),
    /// Local sound speed from the equation of state
    SoundSpeed => (5, "Sound speed"),
    /// Traceless deviatoric part of the stress tensor
    DeviatoricStress => (6, "Deviatoric stress"),
    /// Scalar damage of the Grady-Kipp model
    Damage => (7, "Damage"),
    /// Body flag distinguishing particles of different origin
    Flag => (8, "Flag"),
    /// Cached index of the material partition of each particle
    MaterialId => (9, "Material ID"),
    /// Number of neighbors within the kernel support
    NeighborCnt => (10, "Neighbor count"),
    /// Divergence of the velocity field
    VelocityDivergence => (11, "Velocity divergence"),
    /// Symmetrized gradient of the velocity field
    VelocityGradient => (12, "Velocity gradient"),
    /// Rotation (curl) of the velocity field
    VelocityRotation => (13, "Velocity rotation"),
    /// Inverse of the kernel-gradient moment, restoring first-order consistency
    StrainRateCorrectionTensor => (14, "Correction tensor"),
    /// Per-particle coefficient of the Morris-Monaghan artificial viscosity
    AvAlpha => (15, "AV alpha"),
    /// Artificial stress tensor
    AvStress => (16, "AV stress"),
    /// Balsara factor reducing artificial viscosity in shear flows
    AvBalsara => (17, "AV Balsara"),
    /// XSPH velocity corrections
    XsphVelocities => (18, "XSPH velocities"),
    /// Surface normal estimated from the color field
    SurfaceNormal => (19, "Surface normal"),
    /// SPH approximation of the energy laplacian
    EnergyLaplacian => (20, "Energy laplacian"),
    /// Renormalized density gradient of the delta-SPH diffusion
    DeltaSphDensityGradient => (21, "Delta-SPH density gradient"),
    /// Yield and damage stress-reduction factor
    StressReducing => (22, "Stress reducing"),
    /// Per-particle timestep of the last evaluated criterion
    TimeStep => (23, "Time step"),
    /// Identifier of the criterion that bound the per-particle timestep
    TimeStepCriterion => (24, "Time step criterion"),
    /// Phase angle of rotating frames
    PhaseAngle => (25, "Phase angle"),
    /// Angular velocity of rotating frames
    AngularVelocity => (26, "Angular velocity"),
    /// Index surviving structural changes, identifying particles across a run
    PersistentIndex => (27, "Persistent index"),
    /// Texture mapping coordinates
    Uvw => (28, "UVW"),
    /// Position at the start of the run
    InitialPosition => (29, "Initial position"),
    /// Generalized pressure of density-independent formulations
    GeneralizedPressure => (30, "Generalized pressure"),
    /// Generalized energy of density-independent formulations
    GeneralizedEnergy => (31, "Generalized energy"),
    /// Kernel value at the mean interparticle spacing, used by artificial stress
    InterparticleSpacingKernel => (32, "Interparticle spacing kernel"),
}
