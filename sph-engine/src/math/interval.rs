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
//! Closed interval of reals
//!
//! Quantity ranges declared by materials are intervals, possibly unbounded
//! on either side. Infinite endpoints are ordinary `f64` infinities so that
//! the common case (no clamping) needs no branching beyond the comparison.

use serde::{Deserialize, Serialize};

/// A closed interval of `f64` values, possibly unbounded
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    lower: f64,
    upper: f64,
}

impl Interval {
    /// Creates an interval from its endpoints
    ///
    /// # Panics
    ///
    /// Panics if `lower > upper` or either endpoint is NaN.
    pub fn new(lower: f64, upper: f64) -> Self {
        assert!(!lower.is_nan() && !upper.is_nan(), "Interval endpoints must not be NaN");
        assert!(lower <= upper, "Interval endpoints must be ordered");
        Interval { lower, upper }
    }

    /// The interval (-inf, inf)
    #[inline]
    pub fn unbounded() -> Self {
        Interval {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }
    }

    /// Interval bounded from below only
    #[inline]
    pub fn at_least(lower: f64) -> Self {
        Interval::new(lower, f64::INFINITY)
    }

    /// Lower endpoint
    #[inline]
    pub fn lower(&self) -> f64 {
        self.lower
    }

    /// Upper endpoint
    #[inline]
    pub fn upper(&self) -> f64 {
        self.upper
    }

    /// Length of the interval
    #[inline]
    pub fn size(&self) -> f64 {
        self.upper - self.lower
    }

    /// Checks whether the value lies inside the interval
    #[inline]
    pub fn contains(&self, x: f64) -> bool {
        x >= self.lower && x <= self.upper
    }

    /// Clamps the value into the interval
    #[inline]
    pub fn clamp(&self, x: f64) -> f64 {
        x.max(self.lower).min(self.upper)
    }

    /// True when both endpoints are infinite
    #[inline]
    pub fn is_unbounded(&self) -> bool {
        self.lower == f64::NEG_INFINITY && self.upper == f64::INFINITY
    }

    /// Midpoint; only meaningful for bounded intervals
    #[inline]
    pub fn center(&self) -> f64 {
        0.5 * (self.lower + self.upper)
    }
}

impl Default for Interval {
    fn default() -> Self {
        Interval::unbounded()
    }
}
