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
//! Thread-local derivative accumulators
//!
//! Every worker thread owns an [`Accumulated`] buffer set; derivatives add
//! pairwise contributions into it during the loop and the solver sums all
//! thread-local sets into the storage afterwards. Buffers are declared as
//! SHARED (several derivatives add into the same buffer, e.g. the
//! acceleration) or UNIQUE (exactly one derivative owns it); declaring a
//! UNIQUE buffer twice is a configuration error detected when the equation
//! set is built, never at step time.
//!
//! Buffers are exposed as `&[Cell<T>]` so that several bound derivative
//! evaluators can hold views of the same shared buffer at once. The cells
//! live in thread-local data and are only touched by the owning worker.

use crate::error::{Error, Result};
use crate::math::{SymmetricTensor, TracelessTensor, Vector};
use crate::quantities::{OrderEnum, QuantityId, Storage};
use std::cell::Cell;

/// Ownership mode of an accumulator buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSource {
    /// Multiple derivatives may add into the buffer
    Shared,
    /// Exactly one derivative declares and writes the buffer
    Unique,
}

/// Closed union over accumulator buffer types
#[doc(hidden)]
pub enum AccData {
    Scalar(Vec<Cell<f64>>),
    Vector(Vec<Cell<Vector>>),
    SymmetricTensor(Vec<Cell<SymmetricTensor>>),
    TracelessTensor(Vec<Cell<TracelessTensor>>),
}

/// Types storable in an accumulator
pub trait AccumulatedValue:
    Copy + Default + std::ops::Add<Output = Self> + std::ops::Mul<f64, Output = Self> + Send + 'static
{
    #[doc(hidden)]
    fn make(cnt: usize) -> AccData;
    #[doc(hidden)]
    fn cells(data: &AccData) -> Option<&[Cell<Self>]>;
    #[doc(hidden)]
    fn cells_mut(data: &mut AccData) -> Option<&mut Vec<Cell<Self>>>;
    #[doc(hidden)]
    fn add_to_storage(
        data: &AccData,
        storage: &mut Storage,
        id: QuantityId,
        order: OrderEnum,
    ) -> Result<()>;
}

macro_rules! impl_accumulated_value {
    ($ty:ty, $variant:ident) => {
        impl AccumulatedValue for $ty {
            fn make(cnt: usize) -> AccData {
                AccData::$variant(vec![Cell::new(<$ty>::default()); cnt])
            }

            fn cells(data: &AccData) -> Option<&[Cell<Self>]> {
                match data {
                    AccData::$variant(cells) => Some(cells),
                    _ => None,
                }
            }

            fn cells_mut(data: &mut AccData) -> Option<&mut Vec<Cell<Self>>> {
                match data {
                    AccData::$variant(cells) => Some(cells),
                    _ => None,
                }
            }

            fn add_to_storage(
                data: &AccData,
                storage: &mut Storage,
                id: QuantityId,
                order: OrderEnum,
            ) -> Result<()> {
                let cells = Self::cells(data).expect("type checked by caller");
                let target: &mut [$ty] = match order {
                    OrderEnum::Zero => storage.value_mut(id)?,
                    OrderEnum::First => storage.dt_mut(id)?,
                    OrderEnum::Second => storage.d2t_mut(id)?,
                };
                if target.len() != cells.len() {
                    return Err(Error::storage(id, "accumulator size mismatch on merge"));
                }
                for (value, cell) in target.iter_mut().zip(cells) {
                    *value = *value + cell.get();
                }
                Ok(())
            }
        }
    };
}

impl_accumulated_value!(f64, Scalar);
impl_accumulated_value!(Vector, Vector);
impl_accumulated_value!(SymmetricTensor, SymmetricTensor);
impl_accumulated_value!(TracelessTensor, TracelessTensor);

struct AccBuffer {
    id: QuantityId,
    order: OrderEnum,
    source: BufferSource,
    data: AccData,
}

/// Set of accumulator buffers owned by one worker thread
#[derive(Default)]
pub struct Accumulated {
    buffers: Vec<AccBuffer>,
}

impl Accumulated {
    /// Creates an empty accumulator set
    pub fn new() -> Self {
        Accumulated::default()
    }

    /// Declares a buffer written by a derivative
    ///
    /// Repeated SHARED declarations of the same buffer coalesce; any UNIQUE
    /// collision (or a SHARED/UNIQUE mix) fails with
    /// [`Error::InvalidSetup`]. A declaration with a different value type
    /// under the same identifier and order also fails.
    pub fn insert<T: AccumulatedValue>(
        &mut self,
        id: QuantityId,
        order: OrderEnum,
        source: BufferSource,
    ) -> Result<()> {
        if let Some(existing) = self
            .buffers
            .iter()
            .find(|b| b.id == id && b.order == order)
        {
            if T::cells(&existing.data).is_none() {
                return Err(Error::storage(id, "accumulator value type conflict"));
            }
            if existing.source == BufferSource::Unique || source == BufferSource::Unique {
                return Err(Error::InvalidSetup(format!(
                    "accumulator buffer {:?} declared twice with unique ownership",
                    id
                )));
            }
            return Ok(());
        }
        self.buffers.push(AccBuffer {
            id,
            order,
            source,
            data: T::make(0),
        });
        Ok(())
    }

    /// Resizes all buffers to the particle count and zeroes them
    pub fn initialize(&mut self, cnt: usize) {
        for buffer in &mut self.buffers {
            match &mut buffer.data {
                AccData::Scalar(cells) => reset(cells, cnt),
                AccData::Vector(cells) => reset(cells, cnt),
                AccData::SymmetricTensor(cells) => reset(cells, cnt),
                AccData::TracelessTensor(cells) => reset(cells, cnt),
            }
        }
    }

    /// View of a declared buffer
    ///
    /// The cell slice allows multiple evaluators to add into a shared
    /// buffer; the accumulator is thread-local, so the interior mutability
    /// never crosses threads.
    pub fn get_buffer<T: AccumulatedValue>(
        &self,
        id: QuantityId,
        order: OrderEnum,
    ) -> Result<&[Cell<T>]> {
        let buffer = self
            .buffers
            .iter()
            .find(|b| b.id == id && b.order == order)
            .ok_or_else(|| Error::storage(id, "accumulator buffer not declared"))?;
        T::cells(&buffer.data).ok_or_else(|| Error::storage(id, "accumulator value type conflict"))
    }

    /// Sums the contents into the matching storage buffers
    ///
    /// The storage buffer of order ZERO is the value buffer, FIRST the
    /// first derivative and SECOND the second derivative; all must exist
    /// (created by the owning equation terms).
    pub fn store_into(&self, storage: &mut Storage) -> Result<()> {
        for buffer in &self.buffers {
            match &buffer.data {
                AccData::Scalar(_) => {
                    f64::add_to_storage(&buffer.data, storage, buffer.id, buffer.order)?
                }
                AccData::Vector(_) => {
                    Vector::add_to_storage(&buffer.data, storage, buffer.id, buffer.order)?
                }
                AccData::SymmetricTensor(_) => SymmetricTensor::add_to_storage(
                    &buffer.data,
                    storage,
                    buffer.id,
                    buffer.order,
                )?,
                AccData::TracelessTensor(_) => TracelessTensor::add_to_storage(
                    &buffer.data,
                    storage,
                    buffer.id,
                    buffer.order,
                )?,
            }
        }
        Ok(())
    }

    /// Zeroes the storage buffers targeted by the declared accumulators
    ///
    /// Ran once per step before merging, so that summed contributions start
    /// from zero; zero-order targets are not covered by the highest
    /// derivative zeroing of the storage.
    pub fn zero_targets(&self, storage: &mut Storage) -> Result<()> {
        for buffer in &self.buffers {
            match &buffer.data {
                AccData::Scalar(_) => zero_target::<f64>(storage, buffer.id, buffer.order)?,
                AccData::Vector(_) => zero_target::<Vector>(storage, buffer.id, buffer.order)?,
                AccData::SymmetricTensor(_) => {
                    zero_target::<SymmetricTensor>(storage, buffer.id, buffer.order)?
                }
                AccData::TracelessTensor(_) => {
                    zero_target::<TracelessTensor>(storage, buffer.id, buffer.order)?
                }
            }
        }
        Ok(())
    }

    /// Identifiers and orders of all declared buffers
    pub fn buffer_ids(&self) -> impl Iterator<Item = (QuantityId, OrderEnum)> + '_ {
        self.buffers.iter().map(|b| (b.id, b.order))
    }

    /// Number of declared buffers
    pub fn buffer_cnt(&self) -> usize {
        self.buffers.len()
    }
}

fn reset<T: Copy + Default>(cells: &mut Vec<Cell<T>>, cnt: usize) {
    cells.clear();
    cells.resize(cnt, Cell::new(T::default()));
}

fn zero_target<T: crate::quantities::QuantityValue>(
    storage: &mut Storage,
    id: QuantityId,
    order: OrderEnum,
) -> Result<()> {
    let target: &mut [T] = match order {
        OrderEnum::Zero => storage.value_mut(id)?,
        OrderEnum::First => storage.dt_mut(id)?,
        OrderEnum::Second => storage.d2t_mut(id)?,
    };
    target.fill(T::default());
    Ok(())
}
