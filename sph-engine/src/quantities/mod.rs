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
//! Particle quantities and their container
//!
//! The data model of the engine: typed multi-order [`Quantity`] buffers,
//! identified by the closed [`QuantityId`] set and held by a [`Storage`]
//! together with material partitions, attractors and dependent storages.

mod ids;
mod iterate;
mod quantity;
mod storage;

pub use ids::QuantityId;
pub use iterate::{
    iterate_buffers, iterate_first_order, iterate_pair_first_order, iterate_pair_second_order,
    iterate_second_order, BufferVisitor, FirstOrderVisitor, PairFirstOrderVisitor,
    PairSecondOrderVisitor, SecondOrderVisitor,
};
pub use quantity::{
    ArithmeticValue, BufferSet, BufferSlot, OrderEnum, Quantity, QuantityData, QuantityValue,
    ValueEnum, VisitorEnum,
};
pub use storage::{Attractor, MaterialView, SharedMaterial, SharedStorage, Storage};
