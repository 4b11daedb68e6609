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
//! Generic iteration over storage buffers
//!
//! Quantities carry a closed union of value types; visitors with generic
//! methods let integrators and boundary conditions run one templated body
//! over every evolved quantity regardless of its concrete type. Index
//! quantities never carry derivatives and are skipped by the order-based
//! visitors.

use super::ids::QuantityId;
use super::quantity::{
    ArithmeticValue, BufferSlot, OrderEnum, Quantity, QuantityValue, ValueEnum, VisitorEnum,
};
use super::storage::Storage;
use crate::math::{SymmetricTensor, TracelessTensor, Vector};

/// Visitor over first-order quantities of a single storage
pub trait FirstOrderVisitor {
    /// Visits one quantity's values and first derivatives
    fn visit<T: ArithmeticValue>(&mut self, id: QuantityId, x: &mut [T], dx: &mut [T]);
}

/// Visitor over second-order quantities of a single storage
pub trait SecondOrderVisitor {
    /// Visits one quantity's values and both derivatives
    fn visit<T: ArithmeticValue>(&mut self, id: QuantityId, x: &mut [T], dx: &mut [T], d2x: &mut [T]);
}

/// Visitor over first-order quantities of two aligned storages
pub trait PairFirstOrderVisitor {
    /// Visits the buffers of one quantity in both storages; buffers excluded
    /// from a clone are passed as empty slices
    fn visit<T: ArithmeticValue>(
        &mut self,
        id: QuantityId,
        ax: &mut [T],
        adx: &mut [T],
        bx: &mut [T],
        bdx: &mut [T],
    );
}

/// Visitor over second-order quantities of two aligned storages
pub trait PairSecondOrderVisitor {
    /// Visits the buffers of one quantity in both storages; buffers excluded
    /// from a clone are passed as empty slices
    #[allow(clippy::too_many_arguments)]
    fn visit<T: ArithmeticValue>(
        &mut self,
        id: QuantityId,
        ax: &mut [T],
        adx: &mut [T],
        ad2x: &mut [T],
        bx: &mut [T],
        bdx: &mut [T],
        bd2x: &mut [T],
    );
}

/// Visitor over individual buffers selected by a [`VisitorEnum`] subset
pub trait BufferVisitor {
    /// Visits one buffer of one quantity
    fn visit<T: QuantityValue>(&mut self, id: QuantityId, slot: BufferSlot, buffer: &mut Vec<T>);
}

macro_rules! dispatch_arithmetic {
    ($q:expr, $set:ident => $body:expr) => {
        match $q.value_type() {
            ValueEnum::Scalar => {
                let $set = $q.buffers_mut::<f64>().expect("type checked");
                $body
            }
            ValueEnum::Vector => {
                let $set = $q.buffers_mut::<Vector>().expect("type checked");
                $body
            }
            ValueEnum::SymmetricTensor => {
                let $set = $q.buffers_mut::<SymmetricTensor>().expect("type checked");
                $body
            }
            ValueEnum::TracelessTensor => {
                let $set = $q.buffers_mut::<TracelessTensor>().expect("type checked");
                $body
            }
            // index quantities carry no derivatives
            ValueEnum::Index => {}
        }
    };
}

/// Applies a visitor to every first-order quantity of the storage
pub fn iterate_first_order<V: FirstOrderVisitor>(storage: &mut Storage, visitor: &mut V) {
    for (id, q) in storage.quantities_mut() {
        if q.order() != OrderEnum::First {
            continue;
        }
        dispatch_arithmetic!(q, set => visitor.visit(id, &mut set.values, &mut set.dt));
    }
}

/// Applies a visitor to every second-order quantity of the storage
pub fn iterate_second_order<V: SecondOrderVisitor>(storage: &mut Storage, visitor: &mut V) {
    for (id, q) in storage.quantities_mut() {
        if q.order() != OrderEnum::Second {
            continue;
        }
        dispatch_arithmetic!(q, set => {
            visitor.visit(id, &mut set.values, &mut set.dt, &mut set.d2t)
        });
    }
}

fn aligned_pair<'a>(
    a: &'a mut Storage,
    b: &'a mut Storage,
    id: QuantityId,
) -> (&'a mut Quantity, &'a mut Quantity) {
    let qa = a.quantity_mut(id).expect("paired storages must hold the same quantities");
    let qb = b.quantity_mut(id).expect("paired storages must hold the same quantities");
    debug_assert_eq!(qa.value_type(), qb.value_type());
    (qa, qb)
}

macro_rules! dispatch_arithmetic_pair {
    ($qa:expr, $qb:expr, $sa:ident, $sb:ident => $body:expr) => {
        match $qa.value_type() {
            ValueEnum::Scalar => {
                let $sa = $qa.buffers_mut::<f64>().expect("type checked");
                let $sb = $qb.buffers_mut::<f64>().expect("type checked");
                $body
            }
            ValueEnum::Vector => {
                let $sa = $qa.buffers_mut::<Vector>().expect("type checked");
                let $sb = $qb.buffers_mut::<Vector>().expect("type checked");
                $body
            }
            ValueEnum::SymmetricTensor => {
                let $sa = $qa.buffers_mut::<SymmetricTensor>().expect("type checked");
                let $sb = $qb.buffers_mut::<SymmetricTensor>().expect("type checked");
                $body
            }
            ValueEnum::TracelessTensor => {
                let $sa = $qa.buffers_mut::<TracelessTensor>().expect("type checked");
                let $sb = $qb.buffers_mut::<TracelessTensor>().expect("type checked");
                $body
            }
            ValueEnum::Index => {}
        }
    };
}

/// Applies a visitor to every first-order quantity of two aligned storages
pub fn iterate_pair_first_order<V: PairFirstOrderVisitor>(
    a: &mut Storage,
    b: &mut Storage,
    visitor: &mut V,
) {
    let ids: Vec<QuantityId> = a.quantity_ids().collect();
    for id in ids {
        {
            let qa = a.quantity_mut(id).expect("listed above");
            if qa.order() != OrderEnum::First {
                continue;
            }
        }
        let (qa, qb) = aligned_pair(a, b, id);
        dispatch_arithmetic_pair!(qa, qb, sa, sb => {
            visitor.visit(id, &mut sa.values, &mut sa.dt, &mut sb.values, &mut sb.dt)
        });
    }
}

/// Applies a visitor to every second-order quantity of two aligned storages
pub fn iterate_pair_second_order<V: PairSecondOrderVisitor>(
    a: &mut Storage,
    b: &mut Storage,
    visitor: &mut V,
) {
    let ids: Vec<QuantityId> = a.quantity_ids().collect();
    for id in ids {
        {
            let qa = a.quantity_mut(id).expect("listed above");
            if qa.order() != OrderEnum::Second {
                continue;
            }
        }
        let (qa, qb) = aligned_pair(a, b, id);
        dispatch_arithmetic_pair!(qa, qb, sa, sb => {
            visitor.visit(
                id,
                &mut sa.values,
                &mut sa.dt,
                &mut sa.d2t,
                &mut sb.values,
                &mut sb.dt,
                &mut sb.d2t,
            )
        });
    }
}

/// Applies a visitor to every buffer selected by the given subset
pub fn iterate_buffers<V: BufferVisitor>(
    storage: &mut Storage,
    subset: VisitorEnum,
    visitor: &mut V,
) {
    for (id, q) in storage.quantities_mut() {
        let order = q.order();
        for slot in [BufferSlot::Value, BufferSlot::Dt, BufferSlot::D2t] {
            if !subset.selects(order, slot.index()) {
                continue;
            }
            match q.value_type() {
                ValueEnum::Scalar => {
                    let set = q.buffers_mut::<f64>().expect("type checked");
                    visitor.visit(id, slot, set.slot_mut(slot));
                }
                ValueEnum::Vector => {
                    let set = q.buffers_mut::<Vector>().expect("type checked");
                    visitor.visit(id, slot, set.slot_mut(slot));
                }
                ValueEnum::SymmetricTensor => {
                    let set = q.buffers_mut::<SymmetricTensor>().expect("type checked");
                    visitor.visit(id, slot, set.slot_mut(slot));
                }
                ValueEnum::TracelessTensor => {
                    let set = q.buffers_mut::<TracelessTensor>().expect("type checked");
                    visitor.visit(id, slot, set.slot_mut(slot));
                }
                ValueEnum::Index => {
                    let set = q.buffers_mut::<u32>().expect("type checked");
                    visitor.visit(id, slot, set.slot_mut(slot));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantities::OrderEnum;

    struct EulerStep {
        dt: f64,
    }

    impl FirstOrderVisitor for EulerStep {
        fn visit<T: ArithmeticValue>(&mut self, _id: QuantityId, x: &mut [T], dx: &mut [T]) {
            for (value, deriv) in x.iter_mut().zip(dx.iter()) {
                *value = *value + *deriv * self.dt;
            }
        }
    }

    #[test]
    fn test_iterate_first_order() {
        let mut storage = Storage::new();
        storage
            .insert_values(QuantityId::Density, OrderEnum::First, vec![1.0, 2.0])
            .unwrap();
        storage.dt_mut::<f64>(QuantityId::Density).unwrap().fill(10.0);
        storage
            .insert(QuantityId::Mass, OrderEnum::Zero, 1.0_f64)
            .unwrap();
        iterate_first_order(&mut storage, &mut EulerStep { dt: 0.1 });
        assert_eq!(storage.value::<f64>(QuantityId::Density).unwrap(), &[2.0, 3.0]);
        // zero-order quantities are untouched
        assert_eq!(storage.value::<f64>(QuantityId::Mass).unwrap(), &[1.0, 1.0]);
    }

    struct CountBuffers {
        cnt: usize,
    }

    impl BufferVisitor for CountBuffers {
        fn visit<T: QuantityValue>(&mut self, _id: QuantityId, _slot: BufferSlot, _buffer: &mut Vec<T>) {
            self.cnt += 1;
        }
    }

    #[test]
    fn test_iterate_buffers_selection() {
        let mut storage = Storage::new();
        storage
            .insert_values(
                QuantityId::Position,
                OrderEnum::Second,
                vec![Vector::zero(); 3],
            )
            .unwrap();
        storage
            .insert(QuantityId::Energy, OrderEnum::First, 0.0_f64)
            .unwrap();
        storage
            .insert(QuantityId::Flag, OrderEnum::Zero, 0_u32)
            .unwrap();

        let mut all = CountBuffers { cnt: 0 };
        iterate_buffers(&mut storage, VisitorEnum::AllBuffers, &mut all);
        assert_eq!(all.cnt, 3 + 2 + 1);

        let mut highest = CountBuffers { cnt: 0 };
        iterate_buffers(&mut storage, VisitorEnum::HighestDerivatives, &mut highest);
        assert_eq!(highest.cnt, 2);
    }
}
