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
//! Typed multi-order per-particle quantity
//!
//! A [`Quantity`] bundles a value buffer with up to two derivative buffers,
//! depending on its [`OrderEnum`]. The value type is drawn from a closed set
//! (scalar, 4-lane vector, symmetric tensor, traceless tensor, index);
//! generic code dispatches over the [`QuantityData`] union through the
//! sealed [`QuantityValue`] trait or through visitor traits with generic
//! methods.

use crate::math::{clamp_with_derivative, Interval, SymmetricTensor, TracelessTensor, Vector};
use std::ops::{Add, Mul, Sub};

/// Number of stored derivative buffers of a quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OrderEnum {
    /// Value only; not advanced by integrators
    Zero = 0,
    /// Value and first derivative
    First = 1,
    /// Value, first and second derivative
    Second = 2,
}

impl OrderEnum {
    /// Number of buffers (value plus derivatives) of this order
    #[inline]
    pub fn buffer_cnt(self) -> usize {
        self as usize + 1
    }

    /// Stable numeric tag used by the dump format
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Parses the dump tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(OrderEnum::Zero),
            1 => Some(OrderEnum::First),
            2 => Some(OrderEnum::Second),
            _ => None,
        }
    }
}

/// Value type of a quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueEnum {
    /// `f64`
    Scalar,
    /// 4-lane vector with a smoothing-length slot
    Vector,
    /// Symmetric 3x3 tensor
    SymmetricTensor,
    /// Traceless symmetric 3x3 tensor
    TracelessTensor,
    /// `u32` index
    Index,
}

impl ValueEnum {
    /// Stable numeric tag used by the dump format
    pub fn tag(self) -> u8 {
        match self {
            ValueEnum::Scalar => 0,
            ValueEnum::Vector => 1,
            ValueEnum::SymmetricTensor => 2,
            ValueEnum::TracelessTensor => 3,
            ValueEnum::Index => 4,
        }
    }

    /// Parses the dump tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ValueEnum::Scalar),
            1 => Some(ValueEnum::Vector),
            2 => Some(ValueEnum::SymmetricTensor),
            3 => Some(ValueEnum::TracelessTensor),
            4 => Some(ValueEnum::Index),
            _ => None,
        }
    }
}

/// Buffer slot of a quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSlot {
    /// The values themselves
    Value,
    /// First derivative
    Dt,
    /// Second derivative
    D2t,
}

impl BufferSlot {
    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            BufferSlot::Value => 0,
            BufferSlot::Dt => 1,
            BufferSlot::D2t => 2,
        }
    }
}

/// Buffer subsets selected by structural operations (swap, clone, zeroing)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitorEnum {
    /// Every buffer of every quantity
    AllBuffers,
    /// Values of all quantities plus first derivatives of second-order ones;
    /// the complement of the highest derivatives
    StateValues,
    /// Second derivatives of second-order quantities and first derivatives of
    /// first-order ones
    HighestDerivatives,
    /// All buffers of first-order quantities
    FirstOrder,
    /// All buffers of second-order quantities
    SecondOrder,
    /// Values of zero-order quantities
    ZeroOrder,
}

impl VisitorEnum {
    /// Decides whether a buffer slot of a quantity with the given order is
    /// part of this subset
    pub fn selects(self, order: OrderEnum, slot: usize) -> bool {
        if slot >= order.buffer_cnt() {
            return false;
        }
        match self {
            VisitorEnum::AllBuffers => true,
            VisitorEnum::StateValues => slot == 0 || (order == OrderEnum::Second && slot == 1),
            VisitorEnum::HighestDerivatives => order != OrderEnum::Zero && slot == order as usize,
            VisitorEnum::FirstOrder => order == OrderEnum::First,
            VisitorEnum::SecondOrder => order == OrderEnum::Second,
            VisitorEnum::ZeroOrder => order == OrderEnum::Zero && slot == 0,
        }
    }
}

/// Value buffer and derivative buffers of a single quantity
///
/// Buffers beyond the declared order stay empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferSet<T> {
    /// Quantity values
    pub values: Vec<T>,
    /// First derivatives
    pub dt: Vec<T>,
    /// Second derivatives
    pub d2t: Vec<T>,
}

impl<T: Copy + Default> BufferSet<T> {
    fn filled(order: OrderEnum, default: T, cnt: usize) -> Self {
        BufferSet {
            values: vec![default; cnt],
            dt: if order >= OrderEnum::First {
                vec![T::default(); cnt]
            } else {
                Vec::new()
            },
            d2t: if order >= OrderEnum::Second {
                vec![T::default(); cnt]
            } else {
                Vec::new()
            },
        }
    }

    fn from_values(order: OrderEnum, values: Vec<T>) -> Self {
        let cnt = values.len();
        let mut set = BufferSet {
            values,
            dt: Vec::new(),
            d2t: Vec::new(),
        };
        if order >= OrderEnum::First {
            set.dt = vec![T::default(); cnt];
        }
        if order >= OrderEnum::Second {
            set.d2t = vec![T::default(); cnt];
        }
        set
    }

    /// Slot accessor
    pub fn slot(&self, slot: BufferSlot) -> &Vec<T> {
        match slot {
            BufferSlot::Value => &self.values,
            BufferSlot::Dt => &self.dt,
            BufferSlot::D2t => &self.d2t,
        }
    }

    /// Mutable slot accessor
    pub fn slot_mut(&mut self, slot: BufferSlot) -> &mut Vec<T> {
        match slot {
            BufferSlot::Value => &mut self.values,
            BufferSlot::Dt => &mut self.dt,
            BufferSlot::D2t => &mut self.d2t,
        }
    }

    fn buffers_mut(&mut self) -> [&mut Vec<T>; 3] {
        [&mut self.values, &mut self.dt, &mut self.d2t]
    }
}

/// Closed union over the buffer sets of all supported value types
#[derive(Debug, Clone, PartialEq)]
pub enum QuantityData {
    /// Scalar buffers
    Scalar(BufferSet<f64>),
    /// Vector buffers
    Vector(BufferSet<Vector>),
    /// Symmetric tensor buffers
    SymmetricTensor(BufferSet<SymmetricTensor>),
    /// Traceless tensor buffers
    TracelessTensor(BufferSet<TracelessTensor>),
    /// Index buffers
    Index(BufferSet<u32>),
}

/// Dispatches a generic expression over all variants of [`QuantityData`]
macro_rules! dispatch_data {
    ($data:expr, $set:ident => $body:expr) => {
        match $data {
            QuantityData::Scalar($set) => $body,
            QuantityData::Vector($set) => $body,
            QuantityData::SymmetricTensor($set) => $body,
            QuantityData::TracelessTensor($set) => $body,
            QuantityData::Index($set) => $body,
        }
    };
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for f64 {}
    impl Sealed for crate::math::Vector {}
    impl Sealed for crate::math::SymmetricTensor {}
    impl Sealed for crate::math::TracelessTensor {}
    impl Sealed for u32 {}
}

/// Types storable as quantity values
///
/// Sealed; exactly the five members of the closed value-type set implement
/// the trait.
pub trait QuantityValue:
    sealed::Sealed + Copy + PartialEq + Default + Send + Sync + 'static
{
    /// The corresponding type tag
    const VALUE_TYPE: ValueEnum;

    /// Extracts the typed buffer set from the union
    fn buffer_set(data: &QuantityData) -> Option<&BufferSet<Self>>;

    /// Extracts the typed buffer set mutably
    fn buffer_set_mut(data: &mut QuantityData) -> Option<&mut BufferSet<Self>>;

    /// Wraps a typed buffer set into the union
    fn wrap(set: BufferSet<Self>) -> QuantityData;
}

macro_rules! impl_quantity_value {
    ($ty:ty, $variant:ident) => {
        impl QuantityValue for $ty {
            const VALUE_TYPE: ValueEnum = ValueEnum::$variant;

            fn buffer_set(data: &QuantityData) -> Option<&BufferSet<Self>> {
                match data {
                    QuantityData::$variant(set) => Some(set),
                    _ => None,
                }
            }

            fn buffer_set_mut(data: &mut QuantityData) -> Option<&mut BufferSet<Self>> {
                match data {
                    QuantityData::$variant(set) => Some(set),
                    _ => None,
                }
            }

            fn wrap(set: BufferSet<Self>) -> QuantityData {
                QuantityData::$variant(set)
            }
        }
    };
}

impl_quantity_value!(f64, Scalar);
impl_quantity_value!(Vector, Vector);
impl_quantity_value!(SymmetricTensor, SymmetricTensor);
impl_quantity_value!(TracelessTensor, TracelessTensor);
impl_quantity_value!(u32, Index);

/// Quantity values advanced by integrators
///
/// Index quantities are excluded; they carry labels, not evolved state.
pub trait ArithmeticValue:
    QuantityValue + Add<Output = Self> + Sub<Output = Self> + Mul<f64, Output = Self>
{
    /// Norm used by the adaptive-timestep derivative criterion
    fn norm(&self) -> f64;

    /// Component-wise clamp into the interval, zeroing the matching
    /// derivative components when the clamp binds
    fn clamp_with_derivative(value: Self, deriv: Self, range: Interval) -> (Self, Self);

    /// Checks that all components are finite
    fn is_finite_value(&self) -> bool;
}

impl ArithmeticValue for f64 {
    fn norm(&self) -> f64 {
        self.abs()
    }

    fn clamp_with_derivative(value: Self, deriv: Self, range: Interval) -> (Self, Self) {
        clamp_with_derivative(value, deriv, range)
    }

    fn is_finite_value(&self) -> bool {
        self.is_finite()
    }
}

impl ArithmeticValue for Vector {
    fn norm(&self) -> f64 {
        self.length()
    }

    fn clamp_with_derivative(mut value: Self, mut deriv: Self, range: Interval) -> (Self, Self) {
        for lane in 0..4 {
            let (v, d) = clamp_with_derivative(value[lane], deriv[lane], range);
            value[lane] = v;
            deriv[lane] = d;
        }
        (value, deriv)
    }

    fn is_finite_value(&self) -> bool {
        self.is_finite()
    }
}

impl ArithmeticValue for SymmetricTensor {
    fn norm(&self) -> f64 {
        self.max_abs_element()
    }

    fn clamp_with_derivative(value: Self, deriv: Self, range: Interval) -> (Self, Self) {
        let (dx, ddx) = Vector::clamp_with_derivative(value.diag, deriv.diag, range);
        let (ox, dox) = Vector::clamp_with_derivative(value.offdiag, deriv.offdiag, range);
        (SymmetricTensor::new(dx, ox), SymmetricTensor::new(ddx, dox))
    }

    fn is_finite_value(&self) -> bool {
        self.is_finite()
    }
}

impl ArithmeticValue for TracelessTensor {
    fn norm(&self) -> f64 {
        self.max_abs_element()
    }

    fn clamp_with_derivative(value: Self, deriv: Self, range: Interval) -> (Self, Self) {
        let (xx, dxx) = clamp_with_derivative(value.xx, deriv.xx, range);
        let (yy, dyy) = clamp_with_derivative(value.yy, deriv.yy, range);
        let (xy, dxy) = clamp_with_derivative(value.xy, deriv.xy, range);
        let (xz, dxz) = clamp_with_derivative(value.xz, deriv.xz, range);
        let (yz, dyz) = clamp_with_derivative(value.yz, deriv.yz, range);
        (
            TracelessTensor::new(xx, yy, xy, xz, yz),
            TracelessTensor::new(dxx, dyy, dxy, dxz, dyz),
        )
    }

    fn is_finite_value(&self) -> bool {
        self.is_finite()
    }
}

/// A typed, multi-order bundle of per-particle values
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    order: OrderEnum,
    data: QuantityData,
}

impl Quantity {
    /// Creates a quantity filled with a default value
    pub fn filled<T: QuantityValue>(order: OrderEnum, default: T, cnt: usize) -> Self {
        Quantity {
            order,
            data: T::wrap(BufferSet::filled(order, default, cnt)),
        }
    }

    /// Creates a quantity from an existing value buffer; derivatives are
    /// zero-filled
    pub fn from_values<T: QuantityValue>(order: OrderEnum, values: Vec<T>) -> Self {
        Quantity {
            order,
            data: T::wrap(BufferSet::from_values(order, values)),
        }
    }

    /// Creates a zero-filled quantity with the same type and order as a
    /// template
    pub fn zero_like(template: &Quantity, cnt: usize) -> Quantity {
        let order = template.order();
        match template.value_type() {
            ValueEnum::Scalar => Quantity::filled(order, 0.0_f64, cnt),
            ValueEnum::Vector => Quantity::filled(order, Vector::zero(), cnt),
            ValueEnum::SymmetricTensor => Quantity::filled(order, SymmetricTensor::null(), cnt),
            ValueEnum::TracelessTensor => Quantity::filled(order, TracelessTensor::null(), cnt),
            ValueEnum::Index => Quantity::filled(order, 0_u32, cnt),
        }
    }

    /// Declared order of the quantity
    #[inline]
    pub fn order(&self) -> OrderEnum {
        self.order
    }

    /// Value type of the quantity
    pub fn value_type(&self) -> ValueEnum {
        match &self.data {
            QuantityData::Scalar(_) => ValueEnum::Scalar,
            QuantityData::Vector(_) => ValueEnum::Vector,
            QuantityData::SymmetricTensor(_) => ValueEnum::SymmetricTensor,
            QuantityData::TracelessTensor(_) => ValueEnum::TracelessTensor,
            QuantityData::Index(_) => ValueEnum::Index,
        }
    }

    /// Number of particles in the quantity
    pub fn particle_cnt(&self) -> usize {
        dispatch_data!(&self.data, set => set.values.len())
    }

    /// Raises the order, zero-filling the newly created derivative buffers
    ///
    /// Lowering the order is a no-op.
    pub fn upgrade_order(&mut self, order: OrderEnum) {
        if order <= self.order {
            return;
        }
        let cnt = self.particle_cnt();
        self.order = order;
        dispatch_data!(&mut self.data, set => {
            if order >= OrderEnum::First && set.dt.is_empty() {
                set.dt = vec![Default::default(); cnt];
            }
            if order >= OrderEnum::Second && set.d2t.is_empty() {
                set.d2t = vec![Default::default(); cnt];
            }
        });
    }

    /// Typed buffer set accessor
    pub fn buffers<T: QuantityValue>(&self) -> Option<&BufferSet<T>> {
        T::buffer_set(&self.data)
    }

    /// Typed mutable buffer set accessor
    pub fn buffers_mut<T: QuantityValue>(&mut self) -> Option<&mut BufferSet<T>> {
        T::buffer_set_mut(&mut self.data)
    }

    /// Typed value slice
    pub fn values<T: QuantityValue>(&self) -> Option<&[T]> {
        self.buffers::<T>().map(|set| set.values.as_slice())
    }

    /// Typed mutable value slice
    pub fn values_mut<T: QuantityValue>(&mut self) -> Option<&mut [T]> {
        self.buffers_mut::<T>().map(|set| set.values.as_mut_slice())
    }

    /// Typed first-derivative slice; requires at least first order
    pub fn dt<T: QuantityValue>(&self) -> Option<&[T]> {
        if self.order < OrderEnum::First {
            return None;
        }
        self.buffers::<T>().map(|set| set.dt.as_slice())
    }

    /// Typed mutable first-derivative slice
    pub fn dt_mut<T: QuantityValue>(&mut self) -> Option<&mut [T]> {
        if self.order < OrderEnum::First {
            return None;
        }
        self.buffers_mut::<T>().map(|set| set.dt.as_mut_slice())
    }

    /// Typed second-derivative slice; requires second order
    pub fn d2t<T: QuantityValue>(&self) -> Option<&[T]> {
        if self.order < OrderEnum::Second {
            return None;
        }
        self.buffers::<T>().map(|set| set.d2t.as_slice())
    }

    /// Typed mutable second-derivative slice
    pub fn d2t_mut<T: QuantityValue>(&mut self) -> Option<&mut [T]> {
        if self.order < OrderEnum::Second {
            return None;
        }
        self.buffers_mut::<T>().map(|set| set.d2t.as_mut_slice())
    }

    /// Zeroes the highest stored derivative; values are untouched
    pub fn zero_highest_derivative(&mut self) {
        let order = self.order;
        dispatch_data!(&mut self.data, set => {
            match order {
                OrderEnum::Zero => {}
                OrderEnum::First => set.dt.fill(Default::default()),
                OrderEnum::Second => set.d2t.fill(Default::default()),
            }
        });
    }

    /// Resizes all non-empty buffers, zero-filling new slots
    ///
    /// With `keep_empty` set, buffers that are currently empty stay empty.
    pub fn resize(&mut self, cnt: usize, keep_empty: bool) {
        let order = self.order;
        dispatch_data!(&mut self.data, set => {
            for (slot, buffer) in set.buffers_mut().into_iter().enumerate() {
                if slot >= order.buffer_cnt() {
                    continue;
                }
                if keep_empty && buffer.is_empty() {
                    continue;
                }
                buffer.resize(cnt, Default::default());
            }
        });
    }

    /// Removes particles at the given indices; indices must be sorted in
    /// increasing order
    pub fn remove(&mut self, sorted_idxs: &[usize]) {
        dispatch_data!(&mut self.data, set => {
            for buffer in set.buffers_mut() {
                if buffer.is_empty() {
                    continue;
                }
                let mut kept = 0;
                let mut removal = sorted_idxs.iter().peekable();
                for i in 0..buffer.len() {
                    if removal.peek() == Some(&&i) {
                        removal.next();
                        continue;
                    }
                    buffer[kept] = buffer[i];
                    kept += 1;
                }
                buffer.truncate(kept);
            }
        });
    }

    /// Inserts copies of the given source particles at `position`
    pub fn insert_clones(&mut self, position: usize, sources: &[usize]) {
        dispatch_data!(&mut self.data, set => {
            for buffer in set.buffers_mut() {
                if buffer.is_empty() {
                    continue;
                }
                let clones: Vec<_> = sources.iter().map(|&i| buffer[i]).collect();
                buffer.splice(position..position, clones);
            }
        });
    }

    /// Appends the buffers of another quantity of the same type
    ///
    /// The order of `self` must be at least the order of `other`; missing
    /// derivative buffers of either side are zero-filled first.
    pub fn append(&mut self, mut other: Quantity) {
        debug_assert_eq!(self.value_type(), other.value_type());
        let self_cnt = self.particle_cnt();
        let other_cnt = other.particle_cnt();
        let order = self.order.max(other.order);
        self.upgrade_order(order);
        other.upgrade_order(order);
        // re-fill empty buffers so that both sides have the same shape
        self.resize(self_cnt, false);
        other.resize(other_cnt, false);
        match (&mut self.data, other.data) {
            (QuantityData::Scalar(a), QuantityData::Scalar(b)) => append_sets(a, b),
            (QuantityData::Vector(a), QuantityData::Vector(b)) => append_sets(a, b),
            (QuantityData::SymmetricTensor(a), QuantityData::SymmetricTensor(b)) => {
                append_sets(a, b)
            }
            (QuantityData::TracelessTensor(a), QuantityData::TracelessTensor(b)) => {
                append_sets(a, b)
            }
            (QuantityData::Index(a), QuantityData::Index(b)) => append_sets(a, b),
            _ => unreachable!("type checked above"),
        }
    }

    /// Clones the quantity, copying only buffers selected by the visitor;
    /// unselected buffers are left empty
    pub fn clone_selected(&self, visitor: VisitorEnum) -> Quantity {
        let order = self.order;
        let data = match &self.data {
            QuantityData::Scalar(set) => QuantityData::Scalar(clone_set(set, order, visitor)),
            QuantityData::Vector(set) => QuantityData::Vector(clone_set(set, order, visitor)),
            QuantityData::SymmetricTensor(set) => {
                QuantityData::SymmetricTensor(clone_set(set, order, visitor))
            }
            QuantityData::TracelessTensor(set) => {
                QuantityData::TracelessTensor(clone_set(set, order, visitor))
            }
            QuantityData::Index(set) => QuantityData::Index(clone_set(set, order, visitor)),
        };
        Quantity { order, data }
    }

    /// Swaps buffers selected by the visitor with another quantity of the
    /// same type and order
    pub fn swap_selected(&mut self, other: &mut Quantity, visitor: VisitorEnum) {
        debug_assert_eq!(self.value_type(), other.value_type());
        debug_assert_eq!(self.order, other.order);
        let order = self.order;
        match (&mut self.data, &mut other.data) {
            (QuantityData::Scalar(a), QuantityData::Scalar(b)) => swap_sets(a, b, order, visitor),
            (QuantityData::Vector(a), QuantityData::Vector(b)) => swap_sets(a, b, order, visitor),
            (QuantityData::SymmetricTensor(a), QuantityData::SymmetricTensor(b)) => {
                swap_sets(a, b, order, visitor)
            }
            (QuantityData::TracelessTensor(a), QuantityData::TracelessTensor(b)) => {
                swap_sets(a, b, order, visitor)
            }
            (QuantityData::Index(a), QuantityData::Index(b)) => swap_sets(a, b, order, visitor),
            _ => unreachable!("type checked above"),
        }
    }

    /// Extracts the sub-range of particles into a new quantity
    pub fn sliced(&self, range: std::ops::Range<usize>) -> Quantity {
        let order = self.order;
        let data = match &self.data {
            QuantityData::Scalar(set) => QuantityData::Scalar(slice_buffers(set, &range)),
            QuantityData::Vector(set) => QuantityData::Vector(slice_buffers(set, &range)),
            QuantityData::SymmetricTensor(set) => {
                QuantityData::SymmetricTensor(slice_buffers(set, &range))
            }
            QuantityData::TracelessTensor(set) => {
                QuantityData::TracelessTensor(slice_buffers(set, &range))
            }
            QuantityData::Index(set) => QuantityData::Index(slice_buffers(set, &range)),
        };
        Quantity { order, data }
    }

    /// Checks that all non-empty buffers have the given length and that
    /// empty buffers are allowed by the `complete` flag
    pub fn check_valid(&self, cnt: usize, complete: bool) -> bool {
        let order = self.order;
        let mut ok = true;
        dispatch_data!(&self.data, set => {
            for slot in 0..order.buffer_cnt() {
                let buffer = match slot {
                    0 => &set.values,
                    1 => &set.dt,
                    _ => &set.d2t,
                };
                if buffer.is_empty() {
                    ok &= !complete;
                } else {
                    ok &= buffer.len() == cnt;
                }
            }
        });
        ok
    }
}

fn append_sets<T: Copy>(a: &mut BufferSet<T>, b: BufferSet<T>) {
    a.values.extend(b.values);
    a.dt.extend(b.dt);
    a.d2t.extend(b.d2t);
}

fn swap_sets<T>(a: &mut BufferSet<T>, b: &mut BufferSet<T>, order: OrderEnum, visitor: VisitorEnum) {
    if visitor.selects(order, 0) {
        std::mem::swap(&mut a.values, &mut b.values);
    }
    if visitor.selects(order, 1) {
        std::mem::swap(&mut a.dt, &mut b.dt);
    }
    if visitor.selects(order, 2) {
        std::mem::swap(&mut a.d2t, &mut b.d2t);
    }
}

fn slice_buffers<T: Clone>(set: &BufferSet<T>, range: &std::ops::Range<usize>) -> BufferSet<T> {
    let slice = |buffer: &Vec<T>| -> Vec<T> {
        if buffer.is_empty() {
            Vec::new()
        } else {
            buffer[range.clone()].to_vec()
        }
    };
    BufferSet {
        values: slice(&set.values),
        dt: slice(&set.dt),
        d2t: slice(&set.d2t),
    }
}

fn clone_set<T: Clone>(set: &BufferSet<T>, order: OrderEnum, visitor: VisitorEnum) -> BufferSet<T> {
    BufferSet {
        values: if visitor.selects(order, 0) {
            set.values.clone()
        } else {
            Vec::new()
        },
        dt: if visitor.selects(order, 1) {
            set.dt.clone()
        } else {
            Vec::new()
        },
        d2t: if visitor.selects(order, 2) {
            set.d2t.clone()
        } else {
            Vec::new()
        },
    }
}
