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
//! Material models
//!
//! Equations of state mapping (density, energy) to (pressure, sound speed),
//! rheologies limiting the deviatoric stress of solids, fracture models and
//! the [`Material`](materials::Material) trait tying them together with
//! per-quantity bounds.

pub mod damage;
pub mod eos;
pub mod materials;
pub mod rheology;

pub use damage::{Damage, NullDamage, ScalarGradyKippDamage};
pub use eos::{
    compute_adiabat, create_eos, Eos, IdealGasEos, MieGruneisenEos, MurnaghanEos, PolytropicEos,
    SimplifiedTillotsonEos, TaitEos, TillotsonEos,
};
pub use materials::{
    create_material, EosMaterial, Material, MaterialInitialContext, NullMaterial, SolidMaterial,
};
pub use rheology::{DruckerPragerRheology, ElasticRheology, Rheology, VonMisesRheology};
