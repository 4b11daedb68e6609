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
//! Engine error taxonomy
//!
//! Structural contract violations (wrong quantity type, conflicting
//! accumulators, invalid material composition) fail fast and surface at the
//! API call site. Numerical failures inside per-particle loops are recorded
//! in [`Statistics`](crate::statistics::Statistics) and the offending
//! particle is skipped; only setup-time numeric failures propagate as
//! errors.

use crate::quantities::QuantityId;
use thiserror::Error;

/// All errors produced by the engine
#[derive(Debug, Error)]
pub enum Error {
    /// Requesting a quantity that does not exist, casting to the wrong value
    /// type, or requesting a higher derivative order than declared
    #[error("invalid storage access of {id:?}: {message}")]
    InvalidStorageAccess {
        /// The quantity that was accessed
        id: QuantityId,
        /// Reason of the failure
        message: String,
    },

    /// Equation term composed with an incompatible material or conflicting
    /// derivative configuration
    #[error("invalid setup: {0}")]
    InvalidSetup(String),

    /// Underlying I/O error while reading or writing a dump
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Corrupt or truncated dump content
    #[error("corrupt dump: {0}")]
    Corrupt(String),

    /// Dump written by an unknown format version
    #[error("unknown dump version {0}")]
    UnknownVersion(u32),

    /// Root finding or inversion failed to converge within bounds
    #[error("numeric failure: {0}")]
    Numeric(String),
}

impl Error {
    /// Shorthand for a storage-access failure
    pub fn storage(id: QuantityId, message: impl Into<String>) -> Self {
        Error::InvalidStorageAccess {
            id,
            message: message.into(),
        }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;
