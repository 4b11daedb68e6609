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
//! Settings value union and typed conversions
//!
//! Settings hold a closed union of value types. Engine enums (kernel
//! choice, EOS choice, ...) are stored in their text form so that the
//! serialized settings stay readable and stable across versions.

use crate::math::{Interval, Vector};
use serde::{Deserialize, Serialize};

/// Closed union of types storable in a settings map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SettingsValue {
    /// Boolean switch
    Bool(bool),
    /// Integer parameter (also carries bitflag sets)
    Int(i64),
    /// Scalar parameter
    Float(f64),
    /// Free-form or enum-tag text
    Text(String),
    /// 3D vector parameter
    Vector(Vector),
    /// Interval parameter (quantity ranges)
    Interval(Interval),
}

/// Conversion between Rust types and [`SettingsValue`]
pub trait SettingsType: Sized {
    /// Wraps the value into the union
    fn into_value(self) -> SettingsValue;

    /// Extracts the value from the union, `None` on type mismatch
    fn from_value(value: &SettingsValue) -> Option<Self>;
}

impl SettingsType for bool {
    fn into_value(self) -> SettingsValue {
        SettingsValue::Bool(self)
    }

    fn from_value(value: &SettingsValue) -> Option<Self> {
        match value {
            SettingsValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl SettingsType for i64 {
    fn into_value(self) -> SettingsValue {
        SettingsValue::Int(self)
    }

    fn from_value(value: &SettingsValue) -> Option<Self> {
        match value {
            SettingsValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl SettingsType for f64 {
    fn into_value(self) -> SettingsValue {
        SettingsValue::Float(self)
    }

    fn from_value(value: &SettingsValue) -> Option<Self> {
        match value {
            SettingsValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl SettingsType for String {
    fn into_value(self) -> SettingsValue {
        SettingsValue::Text(self)
    }

    fn from_value(value: &SettingsValue) -> Option<Self> {
        match value {
            SettingsValue::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl SettingsType for Vector {
    fn into_value(self) -> SettingsValue {
        SettingsValue::Vector(self)
    }

    fn from_value(value: &SettingsValue) -> Option<Self> {
        match value {
            SettingsValue::Vector(v) => Some(*v),
            _ => None,
        }
    }
}

impl SettingsType for Interval {
    fn into_value(self) -> SettingsValue {
        SettingsValue::Interval(self)
    }

    fn from_value(value: &SettingsValue) -> Option<Self> {
        match value {
            SettingsValue::Interval(i) => Some(*i),
            _ => None,
        }
    }
}

/// Enum stored in settings via its stable text tag
pub trait SettingsEnum: Sized + Copy {
    /// Stable text tag of the variant
    fn tag(&self) -> &'static str;

    /// Parses the variant from its text tag
    fn from_tag(tag: &str) -> Option<Self>;
}

macro_rules! settings_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $tag:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl SettingsEnum for $name {
            fn tag(&self) -> &'static str {
                match self {
                    $($name::$variant => $tag,)+
                }
            }

            fn from_tag(tag: &str) -> Option<Self> {
                match tag {
                    $($tag => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl SettingsType for $name {
            fn into_value(self) -> SettingsValue {
                SettingsValue::Text(self.tag().to_string())
            }

            fn from_value(value: &SettingsValue) -> Option<Self> {
                match value {
                    SettingsValue::Text(s) => Self::from_tag(s),
                    _ => None,
                }
            }
        }
    };
}

settings_enum! {
    /// Selection of the SPH smoothing kernel
    KernelEnum {
        /// M4 cubic spline
        CubicSpline => "cubic_spline",
        /// M5 quartic spline
        FourthOrderSpline => "fourth_order_spline",
        /// Wendland C2
        WendlandC2 => "wendland_c2",
        /// Wendland C4
        WendlandC4 => "wendland_c4",
        /// Wendland C6
        WendlandC6 => "wendland_c6",
        /// Gaussian clamped at q = 5
        Gaussian => "gaussian",
        /// M4 value with the Thomas-Couchman anti-clumping gradient
        ThomasCouchman => "thomas_couchman",
        /// Core-triangle kernel of Read et al. (2010)
        CoreTriangle => "core_triangle",
    }
}

settings_enum! {
    /// Selection of the neighbor finder
    FinderEnum {
        /// O(N^2) reference finder
        BruteForce => "brute_force",
        /// Uniform cell grid
        UniformGrid => "uniform_grid",
        /// Balanced k-d tree
        KdTree => "kd_tree",
    }
}

settings_enum! {
    /// SPH discretization of gradient terms
    DiscretizationEnum {
        /// v_i / rho_i^2 + v_j / rho_j^2
        Standard => "standard",
        /// (v_i + v_j) / (rho_i rho_j), as used in the SPH5 code
        BenzAsphaug => "benz_asphaug",
    }
}

settings_enum! {
    /// Evaluation mode of the continuity equation
    ContinuityEnum {
        /// Density derivative from plain velocity divergence
        Standard => "standard",
        /// Undamaged particles use the trace of the corrected velocity gradient
        SumOnlyUndamaged => "sum_only_undamaged",
    }
}

settings_enum! {
    /// Equation of state selection
    EosEnum {
        /// No EOS; material carries state quantities only
        None => "none",
        /// Ideal gas
        IdealGas => "ideal_gas",
        /// Polytrope p = K rho^gamma
        Polytropic => "polytropic",
        /// Weakly compressible Tait fluid
        Tait => "tait",
        /// Mie-Grueneisen Hugoniot form
        MieGruneisen => "mie_gruneisen",
        /// Full Tillotson with expanded-phase blending
        Tillotson => "tillotson",
        /// Linearized Tillotson
        SimplifiedTillotson => "simplified_tillotson",
        /// Murnaghan linear-compressibility form
        Murnaghan => "murnaghan",
    }
}

settings_enum! {
    /// Yield criterion of the rheology
    YieldingEnum {
        /// No stress evolution
        None => "none",
        /// Stress evolves elastically without a yield limit
        Elastic => "elastic",
        /// Scalar von Mises yield with thermal softening
        VonMises => "von_mises",
        /// Pressure-dependent Drucker-Prager envelope
        DruckerPrager => "drucker_prager",
    }
}

settings_enum! {
    /// Damage model selection
    DamageEnum {
        /// No damage evolution
        None => "none",
        /// Scalar Grady-Kipp model with Weibull-distributed flaws
        ScalarGradyKipp => "scalar_grady_kipp",
    }
}

settings_enum! {
    /// Signal speed used by artificial conductivity
    SignalSpeedEnum {
        /// sqrt(|p_i - p_j| / rho_bar), only consistent with pure pressure forces
        PressureDifference => "pressure_difference",
        /// Projected velocity difference
        VelocityDifference => "velocity_difference",
    }
}

settings_enum! {
    /// Initial particle distribution inside a domain
    DistributionEnum {
        /// Hexagonal close packing
        HexagonalPacking => "hexagonal_packing",
        /// Cubic lattice
        CubicPacking => "cubic_packing",
        /// Uniform random sampling
        Random => "random",
    }
}

settings_enum! {
    /// Gravity smoothing kernel selection
    GravityKernelEnum {
        /// Point particles, no smoothing
        PointParticles => "point_particles",
        /// Potential kernel associated with the selected SPH kernel
        SphKernel => "sph_kernel",
        /// Homogeneous solid spheres
        SolidSpheres => "solid_spheres",
    }
}

settings_enum! {
    /// Time-integration scheme
    TimesteppingEnum {
        /// First-order explicit Euler
        EulerExplicit => "euler_explicit",
        /// Second-order predictor-corrector
        PredictorCorrector => "predictor_corrector",
        /// Symplectic leapfrog
        LeapFrog => "leap_frog",
        /// Classic fourth-order Runge-Kutta
        RungeKutta4 => "runge_kutta_4",
        /// Modified midpoint method with substepping
        ModifiedMidpoint => "modified_midpoint",
        /// Bulirsch-Stoer extrapolation (step evaluator not provided)
        BulirschStoer => "bulirsch_stoer",
    }
}
