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
//! Container of particle quantities and materials
//!
//! [`Storage`] maps quantity identifiers to typed multi-order buffers and
//! owns the material partitions covering the particle range. Particle counts
//! change only through the explicit structural operations (`merge`,
//! `duplicate`, `remove`, `resize`); every such operation propagates to
//! dependent storages so that auxiliary integrator buffers stay aligned
//! without explicit synchronization.
//!
//! Storage is not thread-safe for writes. During the solver pair loop only
//! shared references are handed out; all mutation happens on a single thread
//! between parallel sections.

use super::ids::QuantityId;
use super::quantity::{BufferSlot, OrderEnum, Quantity, QuantityValue, ValueEnum, VisitorEnum};
use crate::error::{Error, Result};
use crate::math::Vector;
use crate::physics::materials::Material;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::{Arc, RwLock, Weak};

/// Shared handle to a storage; dependents hold weak references
pub type SharedStorage = Arc<RwLock<Storage>>;

/// Shared handle to a material
///
/// Materials are shared between a storage and its clones, so that boundary
/// condition storages observe updated parameters automatically.
pub type SharedMaterial = Arc<RwLock<dyn Material>>;

/// A point mass interacting with particles only gravitationally
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attractor {
    /// Position of the attractor
    pub position: Vector,
    /// Velocity of the attractor
    pub velocity: Vector,
    /// Mass of the attractor
    pub mass: f64,
    /// Interaction radius of the attractor
    pub radius: f64,
    /// Acceleration accumulated by the gravity solver
    pub acceleration: Vector,
}

impl Attractor {
    /// Creates an attractor at rest
    pub fn new(position: Vector, velocity: Vector, mass: f64, radius: f64) -> Self {
        Attractor {
            position,
            velocity,
            mass,
            radius,
            acceleration: Vector::zero(),
        }
    }
}

/// A material and the contiguous particle index range it owns
#[derive(Clone)]
struct MatRange {
    material: SharedMaterial,
    from: usize,
    to: usize,
}

/// View of one material partition of a storage
#[derive(Clone)]
pub struct MaterialView {
    material: SharedMaterial,
    from: usize,
    to: usize,
}

impl MaterialView {
    /// The shared material handle
    pub fn material(&self) -> &SharedMaterial {
        &self.material
    }

    /// Index range of particles owned by this material
    pub fn sequence(&self) -> Range<usize> {
        self.from..self.to
    }
}

/// Heterogeneous, materially-segmented container of per-particle quantities
#[derive(Default)]
pub struct Storage {
    quantities: BTreeMap<QuantityId, Quantity>,
    mats: Vec<MatRange>,
    attractors: Vec<Attractor>,
    dependent: Vec<Weak<RwLock<Storage>>>,
}

impl Storage {
    /// Creates a storage with no material
    pub fn new() -> Self {
        Storage::default()
    }

    /// Creates a storage whose particles all share the given material
    ///
    /// Heterogeneous storages are built by merging single-material storages.
    pub fn with_material(material: SharedMaterial) -> Self {
        Storage {
            quantities: BTreeMap::new(),
            mats: vec![MatRange {
                material,
                from: 0,
                to: 0,
            }],
            attractors: Vec::new(),
            dependent: Vec::new(),
        }
    }

    /// Number of particles; identical across all stored quantities
    pub fn particle_cnt(&self) -> usize {
        self.quantities
            .values()
            .next()
            .map_or(0, Quantity::particle_cnt)
    }

    /// Number of stored quantities
    pub fn quantity_cnt(&self) -> usize {
        self.quantities.len()
    }

    /// Number of material partitions
    pub fn material_cnt(&self) -> usize {
        self.mats.len()
    }

    /// Number of attractors
    pub fn attractor_cnt(&self) -> usize {
        self.attractors.len()
    }

    /// True when no particles are stored
    pub fn is_empty(&self) -> bool {
        self.particle_cnt() == 0
    }

    /// Checks whether a quantity with the given identifier is stored
    pub fn has(&self, id: QuantityId) -> bool {
        self.quantities.contains_key(&id)
    }

    /// Checks for a quantity with the given identifier, type and order
    pub fn has_type<T: QuantityValue>(&self, id: QuantityId, order: OrderEnum) -> bool {
        self.quantities
            .get(&id)
            .map_or(false, |q| q.order() == order && q.value_type() == T::VALUE_TYPE)
    }

    /// Identifiers of all stored quantities, in stable key order
    pub fn quantity_ids(&self) -> impl Iterator<Item = QuantityId> + '_ {
        self.quantities.keys().copied()
    }

    /// Retrieves a stored quantity
    pub fn quantity(&self, id: QuantityId) -> Result<&Quantity> {
        self.quantities
            .get(&id)
            .ok_or_else(|| Error::storage(id, "quantity not stored"))
    }

    /// Retrieves a stored quantity mutably
    pub fn quantity_mut(&mut self, id: QuantityId) -> Result<&mut Quantity> {
        self.quantities
            .get_mut(&id)
            .ok_or_else(|| Error::storage(id, "quantity not stored"))
    }

    /// Iterates over all stored quantities mutably
    pub fn quantities_mut(&mut self) -> impl Iterator<Item = (QuantityId, &mut Quantity)> {
        self.quantities.iter_mut().map(|(id, q)| (*id, q))
    }

    /// Typed value buffer of a quantity
    pub fn value<T: QuantityValue>(&self, id: QuantityId) -> Result<&[T]> {
        self.quantity(id)?
            .values::<T>()
            .ok_or_else(|| Error::storage(id, "value type mismatch"))
    }

    /// Typed mutable value buffer of a quantity
    pub fn value_mut<T: QuantityValue>(&mut self, id: QuantityId) -> Result<&mut [T]> {
        self.quantity_mut(id)?
            .values_mut::<T>()
            .ok_or_else(|| Error::storage(id, "value type mismatch"))
    }

    /// Typed first-derivative buffer of a quantity
    pub fn dt<T: QuantityValue>(&self, id: QuantityId) -> Result<&[T]> {
        let q = self.quantity(id)?;
        if q.order() < OrderEnum::First {
            return Err(Error::storage(id, "quantity has no first derivative"));
        }
        q.dt::<T>()
            .ok_or_else(|| Error::storage(id, "value type mismatch"))
    }

    /// Typed mutable first-derivative buffer of a quantity
    pub fn dt_mut<T: QuantityValue>(&mut self, id: QuantityId) -> Result<&mut [T]> {
        let q = self.quantity_mut(id)?;
        if q.order() < OrderEnum::First {
            return Err(Error::storage(id, "quantity has no first derivative"));
        }
        q.dt_mut::<T>()
            .ok_or_else(|| Error::storage(id, "value type mismatch"))
    }

    /// Typed second-derivative buffer of a quantity
    pub fn d2t<T: QuantityValue>(&self, id: QuantityId) -> Result<&[T]> {
        let q = self.quantity(id)?;
        if q.order() < OrderEnum::Second {
            return Err(Error::storage(id, "quantity has no second derivative"));
        }
        q.d2t::<T>()
            .ok_or_else(|| Error::storage(id, "value type mismatch"))
    }

    /// Typed mutable second-derivative buffer of a quantity
    pub fn d2t_mut<T: QuantityValue>(&mut self, id: QuantityId) -> Result<&mut [T]> {
        let q = self.quantity_mut(id)?;
        if q.order() < OrderEnum::Second {
            return Err(Error::storage(id, "quantity has no second derivative"));
        }
        q.d2t_mut::<T>()
            .ok_or_else(|| Error::storage(id, "value type mismatch"))
    }

    /// Runs a closure with shared access to the storage and exclusive access
    /// to one buffer
    ///
    /// The buffer is detached for the duration of the closure; reading the
    /// same buffer through the storage inside the closure sees it empty.
    pub fn with_buffer_mut<T, R, F>(&mut self, id: QuantityId, slot: BufferSlot, f: F) -> Result<R>
    where
        T: QuantityValue,
        F: FnOnce(&Storage, &mut [T]) -> R,
    {
        let mut buffer = self.take_buffer::<T>(id, slot)?;
        let result = f(self, &mut buffer);
        self.put_buffer(id, slot, buffer);
        Ok(result)
    }

    /// Like [`Storage::with_buffer_mut`] for two distinct buffers
    pub fn with_buffers_mut2<T1, T2, R, F>(
        &mut self,
        first: (QuantityId, BufferSlot),
        second: (QuantityId, BufferSlot),
        f: F,
    ) -> Result<R>
    where
        T1: QuantityValue,
        T2: QuantityValue,
        F: FnOnce(&Storage, &mut [T1], &mut [T2]) -> R,
    {
        debug_assert!(first != second);
        let mut a = self.take_buffer::<T1>(first.0, first.1)?;
        let b = self.take_buffer::<T2>(second.0, second.1);
        let mut b = match b {
            Ok(b) => b,
            Err(e) => {
                self.put_buffer(first.0, first.1, a);
                return Err(e);
            }
        };
        let result = f(self, &mut a, &mut b);
        self.put_buffer(second.0, second.1, b);
        self.put_buffer(first.0, first.1, a);
        Ok(result)
    }

    fn take_buffer<T: QuantityValue>(&mut self, id: QuantityId, slot: BufferSlot) -> Result<Vec<T>> {
        let q = self.quantity_mut(id)?;
        if slot.index() >= q.order().buffer_cnt() {
            return Err(Error::storage(id, "requested order exceeds declared order"));
        }
        let set = q
            .buffers_mut::<T>()
            .ok_or_else(|| Error::storage(id, "value type mismatch"))?;
        Ok(std::mem::take(set.slot_mut(slot)))
    }

    fn put_buffer<T: QuantityValue>(&mut self, id: QuantityId, slot: BufferSlot, buffer: Vec<T>) {
        let set = self
            .quantities
            .get_mut(&id)
            .and_then(|q| q.buffers_mut::<T>())
            .expect("buffer was just taken");
        *set.slot_mut(slot) = buffer;
    }

    /// Creates a quantity filled with a default value, or upgrades the order
    /// of an existing one
    ///
    /// Existing values are untouched; newly created derivative buffers are
    /// zero-filled. Fails when a quantity with the same identifier but a
    /// different value type is already stored.
    pub fn insert<T: QuantityValue>(
        &mut self,
        id: QuantityId,
        order: OrderEnum,
        default: T,
    ) -> Result<&mut Quantity> {
        if T::VALUE_TYPE == ValueEnum::Index && order != OrderEnum::Zero {
            return Err(Error::storage(id, "index quantities cannot carry derivatives"));
        }
        let cnt = self.particle_cnt();
        let first = self.quantities.is_empty();
        match self.quantities.get_mut(&id) {
            Some(existing) => {
                if existing.value_type() != T::VALUE_TYPE {
                    return Err(Error::storage(id, "value type mismatch on insert"));
                }
                existing.upgrade_order(order);
            }
            None => {
                self.quantities.insert(id, Quantity::filled(order, default, cnt));
            }
        }
        if first {
            self.after_first_quantity();
        }
        Ok(self.quantities.get_mut(&id).expect("just inserted"))
    }

    /// Creates or replaces a quantity from an existing value buffer
    ///
    /// The buffer size must match the particle count, except when this is
    /// the first quantity of the storage, in which case it defines the
    /// count. Replacing an existing quantity keeps its derivatives.
    pub fn insert_values<T: QuantityValue>(
        &mut self,
        id: QuantityId,
        order: OrderEnum,
        values: Vec<T>,
    ) -> Result<&mut Quantity> {
        if T::VALUE_TYPE == ValueEnum::Index && order != OrderEnum::Zero {
            return Err(Error::storage(id, "index quantities cannot carry derivatives"));
        }
        let first = self.quantities.is_empty();
        if !first && values.len() != self.particle_cnt() {
            return Err(Error::storage(
                id,
                format!(
                    "buffer size {} does not match particle count {}",
                    values.len(),
                    self.particle_cnt()
                ),
            ));
        }
        match self.quantities.get_mut(&id) {
            Some(existing) => {
                let set = existing
                    .buffers_mut::<T>()
                    .ok_or_else(|| Error::storage(id, "value type mismatch on insert"))?;
                set.values = values;
                existing.upgrade_order(order);
            }
            None => {
                self.quantities.insert(id, Quantity::from_values(order, values));
            }
        }
        if first {
            self.after_first_quantity();
        }
        Ok(self.quantities.get_mut(&id).expect("just inserted"))
    }

    /// Inserts an already-built quantity, as read from a dump
    pub fn insert_quantity(&mut self, id: QuantityId, quantity: Quantity) -> Result<()> {
        let first = self.quantities.is_empty();
        if !first && quantity.particle_cnt() != self.particle_cnt() {
            return Err(Error::storage(id, "quantity size mismatch"));
        }
        self.quantities.insert(id, quantity);
        if first {
            self.after_first_quantity();
        }
        Ok(())
    }

    fn after_first_quantity(&mut self) {
        let cnt = self.particle_cnt();
        if let [single] = self.mats.as_mut_slice() {
            if single.from == 0 && single.to == 0 {
                single.to = cnt;
            }
        }
        self.update_material_ids();
    }

    /// Adds a point-mass attractor
    pub fn add_attractor(&mut self, attractor: Attractor) {
        self.attractors.push(attractor);
    }

    /// Stored attractors
    pub fn attractors(&self) -> &[Attractor] {
        &self.attractors
    }

    /// Stored attractors, mutable
    pub fn attractors_mut(&mut self) -> &mut [Attractor] {
        &mut self.attractors
    }

    /// Registers a dependent storage
    ///
    /// Dependents mirror structural changes of the particle count; value
    /// changes do not propagate. The handle is stored weakly and pruned once
    /// the dependent is dropped.
    pub fn add_dependent(&mut self, other: &SharedStorage) {
        self.dependent.push(Arc::downgrade(other));
    }

    /// Applies a function to all dependent storages, recursively
    ///
    /// Expired dependents are pruned during the traversal.
    pub fn propagate(&mut self, f: &mut dyn FnMut(&mut Storage)) {
        self.dependent.retain(|weak| match weak.upgrade() {
            Some(strong) => {
                let mut guard = strong.write().expect("dependent storage lock poisoned");
                f(&mut guard);
                guard.propagate(f);
                true
            }
            None => false,
        });
    }

    /// View of the given material partition
    pub fn material(&self, mat_idx: usize) -> MaterialView {
        let range = &self.mats[mat_idx];
        MaterialView {
            material: range.material.clone(),
            from: range.from,
            to: range.to,
        }
    }

    /// View of the material partition owning the given particle
    pub fn material_of_particle(&self, idx: usize) -> MaterialView {
        let mat_idx = self
            .mats
            .iter()
            .position(|m| idx >= m.from && idx < m.to)
            .expect("particle index outside all material partitions");
        self.material(mat_idx)
    }

    /// Replaces the material of a partition
    pub fn set_material(&mut self, mat_idx: usize, material: SharedMaterial) {
        self.mats[mat_idx].material = material;
    }

    /// Views of all material partitions
    pub fn material_partitions(&self) -> Vec<MaterialView> {
        (0..self.mats.len()).map(|i| self.material(i)).collect()
    }

    /// Merges another storage into this one
    ///
    /// Particles and attractors are appended; material partitions are
    /// appended with shifted index ranges. Both storages must have materials
    /// or both must lack them. Quantity sets may differ; quantities missing
    /// on either side are zero-filled before appending.
    pub fn merge(&mut self, mut other: Storage) -> Result<()> {
        if self.mats.is_empty() != other.mats.is_empty() {
            return Err(Error::InvalidSetup(
                "cannot merge a storage with materials into one without (or vice versa)".into(),
            ));
        }
        let self_cnt = self.particle_cnt();
        let other_cnt = other.particle_cnt();

        // align quantity sets by zero-filling missing quantities on both sides
        let missing_in_self: Vec<QuantityId> = other
            .quantities
            .keys()
            .filter(|id| !self.quantities.contains_key(id))
            .copied()
            .collect();
        for id in missing_in_self {
            let template = &other.quantities[&id];
            self.quantities.insert(id, Quantity::zero_like(template, self_cnt));
        }
        let missing_in_other: Vec<QuantityId> = self
            .quantities
            .keys()
            .filter(|id| !other.quantities.contains_key(id))
            .copied()
            .collect();
        for id in missing_in_other {
            let template = &self.quantities[&id];
            other
                .quantities
                .insert(id, Quantity::zero_like(template, other_cnt));
        }

        for (id, quantity) in other.quantities {
            let target = self.quantities.get_mut(&id).expect("aligned above");
            if target.value_type() != quantity.value_type() {
                return Err(Error::storage(id, "value type mismatch on merge"));
            }
            target.append(quantity);
        }

        for mat in other.mats {
            self.mats.push(MatRange {
                material: mat.material,
                from: mat.from + self_cnt,
                to: mat.to + self_cnt,
            });
        }
        self.attractors.extend(other.attractors);
        self.update_material_ids();

        let new_cnt = self.particle_cnt();
        self.propagate(&mut |dep| {
            for (_, q) in dep.quantities_mut() {
                q.resize(new_cnt, true);
            }
        });
        Ok(())
    }

    /// Duplicates the given particles
    ///
    /// Each duplicate is inserted at the end of the material partition of its
    /// source, so partitions stay contiguous. Returns the indices of the
    /// created particles in the modified storage.
    pub fn duplicate(&mut self, idxs: &[usize]) -> Vec<usize> {
        // group sources by material partition; a storage without materials
        // behaves as a single partition ending at the particle count
        let partition_of = |idx: usize| -> usize {
            self.mats
                .iter()
                .position(|m| idx >= m.from && idx < m.to)
                .unwrap_or(0)
        };
        let partition_cnt = self.mats.len().max(1);
        let mut grouped: Vec<Vec<usize>> = vec![Vec::new(); partition_cnt];
        for &idx in idxs {
            grouped[partition_of(idx)].push(idx);
        }

        let mut created: Vec<(usize, usize)> = Vec::new(); // (position, count)
        // insert from the last partition so that positions of earlier
        // insertions are not shifted
        for mat_idx in (0..partition_cnt).rev() {
            let sources = &grouped[mat_idx];
            if sources.is_empty() {
                continue;
            }
            let position = self
                .mats
                .get(mat_idx)
                .map_or(self.particle_cnt(), |m| m.to);
            for q in self.quantities.values_mut() {
                q.insert_clones(position, sources);
            }
            let added = sources.len();
            if !self.mats.is_empty() {
                self.mats[mat_idx].to += added;
                for m in &mut self.mats[mat_idx + 1..] {
                    m.from += added;
                    m.to += added;
                }
            }
            created.push((position, added));
            self.propagate(&mut |dep| {
                for (_, q) in dep.quantities_mut() {
                    q.insert_clones(position, sources);
                }
            });
        }
        self.update_material_ids();

        // turn insertion records into final indices; later insertions in the
        // list happened at strictly lower positions and shift earlier ones
        let mut result = Vec::new();
        for (record, &(position, count)) in created.iter().enumerate() {
            let shift: usize = created[record + 1..].iter().map(|&(_, c)| c).sum();
            for k in 0..count {
                result.push(position + shift + k);
            }
        }
        result.sort_unstable();
        result
    }

    /// Removes the given particles
    ///
    /// Material partitions emptied by the removal are dropped; dependent
    /// storages are resized identically. A stored PERSISTENT_INDEX keeps the
    /// identity of surviving particles.
    pub fn remove(&mut self, idxs: &[usize]) {
        if idxs.is_empty() {
            return;
        }
        let mut sorted: Vec<usize> = idxs.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        for q in self.quantities.values_mut() {
            q.remove(&sorted);
        }
        // recompute the contiguous partition layout from per-partition
        // removal counts
        if !self.mats.is_empty() {
            let sizes: Vec<usize> = self
                .mats
                .iter()
                .map(|mat| {
                    let removed_before = sorted.partition_point(|&i| i < mat.from);
                    let removed_inside = sorted.partition_point(|&i| i < mat.to) - removed_before;
                    mat.to - mat.from - removed_inside
                })
                .collect();
            let mut from = 0;
            for (mat, &size) in self.mats.iter_mut().zip(&sizes) {
                mat.from = from;
                mat.to = from + size;
                from += size;
            }
            self.mats.retain(|m| m.to > m.from);
        }
        self.update_material_ids();

        self.propagate(&mut |dep| {
            for (_, q) in dep.quantities_mut() {
                q.remove(&sorted);
            }
        });
    }

    /// Removes all particles, quantities and materials
    pub fn remove_all(&mut self) {
        self.quantities.clear();
        self.mats.clear();
        self.attractors.clear();
        self.propagate(&mut |dep| {
            dep.quantities.clear();
            dep.mats.clear();
            dep.attractors.clear();
        });
    }

    /// Changes the particle count of all quantities
    ///
    /// New slots are zeroed in every buffer; with `keep_empty` set, buffers
    /// that are currently empty stay empty. Only storages with a single
    /// material or none can be resized.
    pub fn resize(&mut self, new_cnt: usize, keep_empty: bool) -> Result<()> {
        if self.mats.len() > 1 {
            return Err(Error::InvalidSetup(
                "cannot resize a storage with multiple materials".into(),
            ));
        }
        for q in self.quantities.values_mut() {
            q.resize(new_cnt, keep_empty);
        }
        if let [single] = self.mats.as_mut_slice() {
            single.from = 0;
            single.to = new_cnt;
        }
        self.update_material_ids();
        self.propagate(&mut |dep| {
            for (_, q) in dep.quantities_mut() {
                q.resize(new_cnt, keep_empty);
            }
        });
        Ok(())
    }

    /// Swaps the selected buffer subset with another storage
    ///
    /// Materials are untouched. Both storages must hold the same quantity
    /// set with identical types and orders.
    pub fn swap_buffers(&mut self, other: &mut Storage, visitor: VisitorEnum) {
        debug_assert_eq!(self.quantities.len(), other.quantities.len());
        for (id, q) in self.quantities.iter_mut() {
            let other_q = other
                .quantities
                .get_mut(id)
                .expect("swapped storages must hold the same quantities");
            q.swap_selected(other_q, visitor);
        }
    }

    /// Clones the selected buffer subset into a new storage
    ///
    /// Unselected buffers are left empty. Materials are shared with this
    /// storage, not deep-copied; the clone is not registered as a dependent.
    pub fn clone_buffers(&self, visitor: VisitorEnum) -> Storage {
        Storage {
            quantities: self
                .quantities
                .iter()
                .map(|(id, q)| (*id, q.clone_selected(visitor)))
                .collect(),
            mats: self.mats.clone(),
            attractors: self.attractors.clone(),
            dependent: Vec::new(),
        }
    }

    /// Zeroes the highest derivative of every evolved quantity
    pub fn zero_highest_derivatives(&mut self) {
        for q in self.quantities.values_mut() {
            q.zero_highest_derivative();
        }
    }

    /// Checks the storage invariants
    ///
    /// All buffers must have the same particle count (empty buffers are
    /// allowed when `complete` is unset) and material partitions must be
    /// contiguous, disjoint and cover the particle range, with a consistent
    /// cached MATERIAL_ID quantity.
    pub fn is_valid(&self, complete: bool) -> Result<()> {
        let cnt = self.particle_cnt();
        for (id, q) in &self.quantities {
            if !q.check_valid(cnt, complete) {
                return Err(Error::storage(
                    *id,
                    format!("buffer sizes inconsistent with particle count {}", cnt),
                ));
            }
        }
        if !self.mats.is_empty() {
            let mut expected_from = 0;
            for (mat_idx, mat) in self.mats.iter().enumerate() {
                if mat.from != expected_from || mat.to <= mat.from {
                    return Err(Error::InvalidSetup(format!(
                        "material partition {} is not contiguous",
                        mat_idx
                    )));
                }
                expected_from = mat.to;
            }
            if expected_from != cnt {
                return Err(Error::InvalidSetup(format!(
                    "material partitions cover {} particles out of {}",
                    expected_from, cnt
                )));
            }
            if cnt > 0 {
                let ids = self.value::<u32>(QuantityId::MaterialId)?;
                for (mat_idx, mat) in self.mats.iter().enumerate() {
                    for i in mat.from..mat.to {
                        if ids[i] != mat_idx as u32 {
                            return Err(Error::storage(
                                QuantityId::MaterialId,
                                format!("cached material ID of particle {} is stale", i),
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn update_material_ids(&mut self) {
        if self.mats.is_empty() {
            return;
        }
        let cnt = self.particle_cnt();
        let mut ids = vec![0_u32; cnt];
        for (mat_idx, mat) in self.mats.iter().enumerate() {
            for id in ids.iter_mut().take(mat.to.min(cnt)).skip(mat.from) {
                *id = mat_idx as u32;
            }
        }
        // bypass insert_values: the material ID cache must not trigger the
        // first-quantity hook recursively
        match self.quantities.get_mut(&QuantityId::MaterialId) {
            Some(q) => {
                if let Some(set) = q.buffers_mut::<u32>() {
                    set.values = ids;
                }
            }
            None => {
                if cnt > 0 {
                    self.quantities.insert(
                        QuantityId::MaterialId,
                        Quantity::from_values(OrderEnum::Zero, ids),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::materials::NullMaterial;
    use crate::quantities::OrderEnum;

    fn test_material() -> SharedMaterial {
        Arc::new(RwLock::new(NullMaterial::new()))
    }

    fn make_storage(cnt: usize, value: f64) -> Storage {
        let mut storage = Storage::with_material(test_material());
        storage
            .insert_values(
                QuantityId::Position,
                OrderEnum::Second,
                vec![Vector::with_h(value, 0.0, 0.0, 1.0); cnt],
            )
            .unwrap();
        storage
            .insert_values(QuantityId::Mass, OrderEnum::Zero, vec![value; cnt])
            .unwrap();
        storage
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut storage = make_storage(4, 1.0);
        assert_eq!(storage.particle_cnt(), 4);
        assert!(storage.has(QuantityId::Position));
        assert!(storage.value::<Vector>(QuantityId::Position).is_ok());
        assert!(storage.value::<f64>(QuantityId::Position).is_err());
        assert!(storage.dt::<Vector>(QuantityId::Position).is_ok());
        assert!(storage.d2t::<Vector>(QuantityId::Position).is_ok());
        assert!(storage.dt::<f64>(QuantityId::Mass).is_err());
        storage.is_valid(true).unwrap();
    }

    #[test]
    fn test_insert_size_mismatch_fails() {
        let mut storage = make_storage(4, 1.0);
        let result = storage.insert_values(QuantityId::Density, OrderEnum::First, vec![1.0; 3]);
        assert!(result.is_err());
    }

    #[test]
    fn test_insert_upgrades_order() {
        let mut storage = make_storage(4, 1.0);
        storage
            .insert(QuantityId::Density, OrderEnum::Zero, 2.0_f64)
            .unwrap();
        assert!(storage.dt::<f64>(QuantityId::Density).is_err());
        storage
            .insert(QuantityId::Density, OrderEnum::First, 0.0_f64)
            .unwrap();
        // values untouched, derivative added
        assert_eq!(storage.value::<f64>(QuantityId::Density).unwrap()[0], 2.0);
        assert_eq!(storage.dt::<f64>(QuantityId::Density).unwrap()[0], 0.0);
    }

    #[test]
    fn test_merge() {
        let mut a = make_storage(3, 1.0);
        let mut b = make_storage(2, 2.0);
        // quantity present only in b; must be zero-filled in a after merge
        b.insert(QuantityId::Damage, OrderEnum::First, 0.5_f64).unwrap();
        a.merge(b).unwrap();
        assert_eq!(a.particle_cnt(), 5);
        assert_eq!(a.material_cnt(), 2);
        let damage = a.value::<f64>(QuantityId::Damage).unwrap();
        assert_eq!(damage, &[0.0, 0.0, 0.0, 0.5, 0.5]);
        let ids = a.value::<u32>(QuantityId::MaterialId).unwrap();
        assert_eq!(ids, &[0, 0, 0, 1, 1]);
        a.is_valid(false).unwrap();
        assert_eq!(a.material(1).sequence(), 3..5);
    }

    #[test]
    fn test_merge_material_policy() {
        let mut a = Storage::new();
        a.insert_values(QuantityId::Mass, OrderEnum::Zero, vec![1.0; 3])
            .unwrap();
        let b = make_storage(2, 2.0);
        assert!(a.merge(b).is_err());
    }

    #[test]
    fn test_duplicate_stays_in_partition() {
        let mut a = make_storage(3, 1.0);
        let b = make_storage(2, 2.0);
        a.merge(b).unwrap();
        let created = a.duplicate(&[0, 4]);
        assert_eq!(created.len(), 2);
        assert_eq!(a.particle_cnt(), 7);
        a.is_valid(true).unwrap();
        // first duplicate extends the first partition, second the second
        assert_eq!(a.material(0).sequence(), 0..4);
        assert_eq!(a.material(1).sequence(), 4..7);
        let masses = a.value::<f64>(QuantityId::Mass).unwrap();
        // copies carry the source values
        for &idx in &created {
            assert!(masses[idx] == 1.0 || masses[idx] == 2.0);
        }
        let ids = a.value::<u32>(QuantityId::MaterialId).unwrap();
        assert_eq!(ids, &[0, 0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_remove_drops_empty_partitions() {
        let mut a = make_storage(3, 1.0);
        let b = make_storage(2, 2.0);
        a.merge(b).unwrap();
        a.remove(&[3, 4]);
        assert_eq!(a.particle_cnt(), 3);
        assert_eq!(a.material_cnt(), 1);
        a.is_valid(true).unwrap();
    }

    #[test]
    fn test_remove_keeps_materials_of_survivors() {
        let mut a = make_storage(3, 1.0);
        let b = make_storage(3, 2.0);
        a.merge(b).unwrap();
        a.remove(&[1]);
        assert_eq!(a.material(0).sequence(), 0..2);
        assert_eq!(a.material(1).sequence(), 2..5);
        let masses = a.value::<f64>(QuantityId::Mass).unwrap();
        assert_eq!(masses, &[1.0, 1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_dependents_mirror_structural_ops() {
        let mut owner = make_storage(4, 1.0);
        let dependent: SharedStorage = Arc::new(RwLock::new(
            owner.clone_buffers(VisitorEnum::HighestDerivatives),
        ));
        owner.add_dependent(&dependent);
        owner.remove(&[0, 2]);
        assert_eq!(dependent.read().unwrap().particle_cnt(), 2);
        owner.duplicate(&[0]);
        assert_eq!(dependent.read().unwrap().particle_cnt(), 3);

        // dropped dependents are pruned lazily
        drop(dependent);
        owner.remove(&[0]);
        assert_eq!(owner.particle_cnt(), 2);
    }

    #[test]
    fn test_clone_shares_materials() {
        let storage = make_storage(3, 1.0);
        let clone = storage.clone_buffers(VisitorEnum::AllBuffers);
        assert!(Arc::ptr_eq(
            storage.material(0).material(),
            clone.material(0).material()
        ));
        assert_eq!(clone.particle_cnt(), 3);
    }

    #[test]
    fn test_resize_zero_fills() {
        let mut storage = make_storage(2, 3.0);
        storage.resize(4, false).unwrap();
        let masses = storage.value::<f64>(QuantityId::Mass).unwrap();
        assert_eq!(masses, &[3.0, 3.0, 0.0, 0.0]);
        storage.is_valid(true).unwrap();
    }

    #[test]
    fn test_resize_multiple_materials_fails() {
        let mut a = make_storage(2, 1.0);
        let b = make_storage(2, 2.0);
        a.merge(b).unwrap();
        assert!(a.resize(10, false).is_err());
    }

    #[test]
    fn test_swap_buffers() {
        let mut a = make_storage(2, 1.0);
        let mut b = make_storage(2, 5.0);
        a.swap_buffers(&mut b, VisitorEnum::StateValues);
        assert_eq!(a.value::<f64>(QuantityId::Mass).unwrap(), &[5.0, 5.0]);
        assert_eq!(b.value::<f64>(QuantityId::Mass).unwrap(), &[1.0, 1.0]);
    }

    #[test]
    fn test_with_buffer_mut() {
        let mut storage = make_storage(3, 2.0);
        storage
            .insert(QuantityId::Density, OrderEnum::First, 1.0_f64)
            .unwrap();
        let sum = storage
            .with_buffer_mut::<f64, _, _>(QuantityId::Density, BufferSlot::Dt, |s, drho| {
                let m = s.value::<f64>(QuantityId::Mass).unwrap();
                for (d, &mass) in drho.iter_mut().zip(m) {
                    *d += mass;
                }
                drho.iter().sum::<f64>()
            })
            .unwrap();
        assert_eq!(sum, 6.0);
        assert_eq!(storage.dt::<f64>(QuantityId::Density).unwrap(), &[2.0; 3]);
    }

    #[test]
    fn test_attractors() {
        let mut storage = make_storage(1, 1.0);
        storage.add_attractor(Attractor::new(Vector::new(1.0, 0.0, 0.0), Vector::zero(), 5.0, 0.1));
        assert_eq!(storage.attractor_cnt(), 1);
        let b = make_storage(1, 1.0);
        storage.merge(b).unwrap();
        assert_eq!(storage.attractor_cnt(), 1);
    }
}
