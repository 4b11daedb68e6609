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
//! Per-step run statistics
//!
//! A typed key-value store filled by solvers, integrators and gravity during
//! each step: the current timestep and its binding criterion, neighbor count
//! summaries, tree-walk node counts and numeric-failure counters. The store
//! is cleared and refilled every step by convention, except for counters
//! which accumulate over the run.

use crate::timestepping::CriterionId;
use std::collections::HashMap;

/// Keys of the statistics store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatisticsId {
    /// Value of the current timestep
    TimestepValue,
    /// Criterion that bound the current timestep
    TimestepCriterion,
    /// Summary of neighbor counts over all particles
    NeighborCount,
    /// Number of tree nodes evaluated with the exact pairwise formula
    GravityNodesExact,
    /// Number of tree nodes evaluated with the multipole approximation
    GravityNodesApprox,
    /// Number of per-particle numeric failures skipped during the run
    NumericFailures,
    /// Number of ghost particles active in the current step
    GhostCount,
}

/// A value stored in the statistics map
#[derive(Debug, Clone)]
pub enum StatsValue {
    /// Plain scalar
    Float(f64),
    /// Plain integer
    Int(i64),
    /// Binding timestep criterion
    Criterion(CriterionId),
    /// Running min/max/mean summary
    Means(MinMaxMean),
}

/// Incrementally built min/max/mean summary
#[derive(Debug, Clone, Copy, Default)]
pub struct MinMaxMean {
    min: f64,
    max: f64,
    sum: f64,
    count: usize,
}

impl MinMaxMean {
    /// Accumulates one sample
    pub fn accumulate(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum += value;
        self.count += 1;
    }

    /// Smallest accumulated sample
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Largest accumulated sample
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Mean of accumulated samples, zero when empty
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Number of accumulated samples
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Typed statistics map
#[derive(Debug, Default)]
pub struct Statistics {
    entries: HashMap<StatisticsId, StatsValue>,
}

impl Statistics {
    /// Creates an empty statistics store
    pub fn new() -> Self {
        Statistics::default()
    }

    /// Stores a scalar value, replacing any previous entry
    pub fn set_float(&mut self, id: StatisticsId, value: f64) {
        self.entries.insert(id, StatsValue::Float(value));
    }

    /// Stores an integer value, replacing any previous entry
    pub fn set_int(&mut self, id: StatisticsId, value: i64) {
        self.entries.insert(id, StatsValue::Int(value));
    }

    /// Stores the binding timestep criterion
    pub fn set_criterion(&mut self, id: StatisticsId, value: CriterionId) {
        self.entries.insert(id, StatsValue::Criterion(value));
    }

    /// Increments an integer counter, creating it at zero if absent
    pub fn increment(&mut self, id: StatisticsId, delta: i64) {
        match self.entries.entry(id).or_insert(StatsValue::Int(0)) {
            StatsValue::Int(value) => *value += delta,
            other => *other = StatsValue::Int(delta),
        }
    }

    /// Accumulates a sample into a min/max/mean summary
    pub fn accumulate(&mut self, id: StatisticsId, sample: f64) {
        match self
            .entries
            .entry(id)
            .or_insert(StatsValue::Means(MinMaxMean::default()))
        {
            StatsValue::Means(means) => means.accumulate(sample),
            other => {
                let mut means = MinMaxMean::default();
                means.accumulate(sample);
                *other = StatsValue::Means(means);
            }
        }
    }

    /// Retrieves a scalar entry
    pub fn get_float(&self, id: StatisticsId) -> Option<f64> {
        match self.entries.get(&id) {
            Some(StatsValue::Float(value)) => Some(*value),
            _ => None,
        }
    }

    /// Retrieves an integer entry
    pub fn get_int(&self, id: StatisticsId) -> Option<i64> {
        match self.entries.get(&id) {
            Some(StatsValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    /// Retrieves the binding timestep criterion
    pub fn get_criterion(&self, id: StatisticsId) -> Option<CriterionId> {
        match self.entries.get(&id) {
            Some(StatsValue::Criterion(value)) => Some(*value),
            _ => None,
        }
    }

    /// Retrieves a min/max/mean summary
    pub fn get_means(&self, id: StatisticsId) -> Option<MinMaxMean> {
        match self.entries.get(&id) {
            Some(StatsValue::Means(means)) => Some(*means),
            _ => None,
        }
    }

    /// Checks whether an entry exists
    pub fn has(&self, id: StatisticsId) -> bool {
        self.entries.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut stats = Statistics::new();
        stats.set_float(StatisticsId::TimestepValue, 0.25);
        assert_eq!(stats.get_float(StatisticsId::TimestepValue), Some(0.25));
        assert_eq!(stats.get_int(StatisticsId::TimestepValue), None);
    }

    #[test]
    fn test_increment() {
        let mut stats = Statistics::new();
        stats.increment(StatisticsId::NumericFailures, 1);
        stats.increment(StatisticsId::NumericFailures, 2);
        assert_eq!(stats.get_int(StatisticsId::NumericFailures), Some(3));
    }

    #[test]
    fn test_means() {
        let mut stats = Statistics::new();
        for sample in [4.0, 8.0, 6.0] {
            stats.accumulate(StatisticsId::NeighborCount, sample);
        }
        let means = stats.get_means(StatisticsId::NeighborCount).unwrap();
        assert_eq!(means.min(), 4.0);
        assert_eq!(means.max(), 8.0);
        assert_eq!(means.mean(), 6.0);
        assert_eq!(means.count(), 3);
    }
}
