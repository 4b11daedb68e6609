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
//! Text dumps
//!
//! Human-readable tables: a header line with the run name, a comment line
//! listing column names, then whitespace-separated numeric rows, one per
//! particle. The column set is configurable with a selector flag set.

use crate::error::Result;
use crate::math::{Vector, H};
use crate::quantities::{QuantityId, Storage};
use std::io::Write;

bitflags::bitflags! {
    /// Columns written by [`TextOutput`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OutputColumns: u32 {
        /// Particle index
        const INDEX = 1 << 0;
        /// Position components
        const POSITION = 1 << 1;
        /// Velocity components
        const VELOCITY = 1 << 2;
        /// Smoothing length
        const SMOOTHING_LENGTH = 1 << 3;
        /// Particle mass
        const MASS = 1 << 4;
        /// Density
        const DENSITY = 1 << 5;
        /// Specific internal energy
        const ENERGY = 1 << 6;
        /// Pressure
        const PRESSURE = 1 << 7;
        /// Damage
        const DAMAGE = 1 << 8;
    }
}

/// Writer of text dumps
pub struct TextOutput {
    run_name: String,
    columns: OutputColumns,
}

impl TextOutput {
    /// Creates the writer with the selected column set
    pub fn new(run_name: impl Into<String>, columns: OutputColumns) -> Self {
        TextOutput {
            run_name: run_name.into(),
            columns,
        }
    }

    /// Names of the selected columns, in output order
    fn column_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.columns.contains(OutputColumns::INDEX) {
            names.push("index");
        }
        if self.columns.contains(OutputColumns::POSITION) {
            names.extend(["x", "y", "z"]);
        }
        if self.columns.contains(OutputColumns::VELOCITY) {
            names.extend(["vx", "vy", "vz"]);
        }
        if self.columns.contains(OutputColumns::SMOOTHING_LENGTH) {
            names.push("h");
        }
        if self.columns.contains(OutputColumns::MASS) {
            names.push("mass");
        }
        if self.columns.contains(OutputColumns::DENSITY) {
            names.push("density");
        }
        if self.columns.contains(OutputColumns::ENERGY) {
            names.push("energy");
        }
        if self.columns.contains(OutputColumns::PRESSURE) {
            names.push("pressure");
        }
        if self.columns.contains(OutputColumns::DAMAGE) {
            names.push("damage");
        }
        names
    }

    /// Writes the table
    pub fn save<W: Write>(&self, writer: &mut W, storage: &Storage) -> Result<()> {
        writeln!(writer, "# Run: {}", self.run_name)?;
        writeln!(writer, "# {}", self.column_names().join(" "))?;

        let cnt = storage.particle_cnt();
        let positions = if self
            .columns
            .intersects(OutputColumns::POSITION | OutputColumns::SMOOTHING_LENGTH)
        {
            Some(storage.value::<Vector>(QuantityId::Position)?)
        } else {
            None
        };
        let velocities = if self.columns.contains(OutputColumns::VELOCITY) {
            Some(storage.dt::<Vector>(QuantityId::Position)?)
        } else {
            None
        };
        fn scalar<'a>(
            storage: &'a Storage,
            id: QuantityId,
            selected: bool,
        ) -> Result<Option<&'a [f64]>> {
            if selected {
                Ok(Some(storage.value::<f64>(id)?))
            } else {
                Ok(None)
            }
        }
        let masses = scalar(storage, QuantityId::Mass, self.columns.contains(OutputColumns::MASS))?;
        let densities = scalar(
            storage,
            QuantityId::Density,
            self.columns.contains(OutputColumns::DENSITY),
        )?;
        let energies = scalar(
            storage,
            QuantityId::Energy,
            self.columns.contains(OutputColumns::ENERGY),
        )?;
        let pressures = scalar(
            storage,
            QuantityId::Pressure,
            self.columns.contains(OutputColumns::PRESSURE),
        )?;
        let damages = scalar(
            storage,
            QuantityId::Damage,
            self.columns.contains(OutputColumns::DAMAGE),
        )?;

        for i in 0..cnt {
            let mut fields: Vec<String> = Vec::new();
            if self.columns.contains(OutputColumns::INDEX) {
                fields.push(i.to_string());
            }
            if self.columns.contains(OutputColumns::POSITION) {
                let r = positions.expect("fetched above")[i];
                fields.extend([r.x.to_string(), r.y.to_string(), r.z.to_string()]);
            }
            if self.columns.contains(OutputColumns::VELOCITY) {
                let v = velocities.expect("fetched above")[i];
                fields.extend([v.x.to_string(), v.y.to_string(), v.z.to_string()]);
            }
            if self.columns.contains(OutputColumns::SMOOTHING_LENGTH) {
                fields.push(positions.expect("fetched above")[i][H].to_string());
            }
            for buffer in [masses, densities, energies, pressures, damages]
                .into_iter()
                .flatten()
            {
                fields.push(buffer[i].to_string());
            }
            writeln!(writer, "{}", fields.join(" "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantities::OrderEnum;

    fn text_storage() -> Storage {
        let mut storage = Storage::new();
        storage
            .insert_values(
                QuantityId::Position,
                OrderEnum::Second,
                vec![
                    Vector::with_h(1.0, 2.0, 3.0, 0.5),
                    Vector::with_h(4.0, 5.0, 6.0, 0.5),
                ],
            )
            .unwrap();
        storage
            .insert_values(QuantityId::Mass, OrderEnum::Zero, vec![10.0, 20.0])
            .unwrap();
        storage
            .insert_values(QuantityId::Density, OrderEnum::First, vec![1000.0, 2000.0])
            .unwrap();
        storage
    }

    #[test]
    fn test_header_and_rows() {
        let output = TextOutput::new(
            "impact run",
            OutputColumns::INDEX | OutputColumns::POSITION | OutputColumns::MASS,
        );
        let mut bytes = Vec::new();
        output.save(&mut bytes, &text_storage()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# Run: impact run");
        assert_eq!(lines[1], "# index x y z mass");
        assert_eq!(lines[2], "0 1 2 3 10");
        assert_eq!(lines[3], "1 4 5 6 20");
    }

    #[test]
    fn test_column_selection() {
        let output = TextOutput::new("x", OutputColumns::DENSITY | OutputColumns::SMOOTHING_LENGTH);
        let mut bytes = Vec::new();
        output.save(&mut bytes, &text_storage()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "# h density");
        assert_eq!(lines[2], "0.5 1000");
    }

    #[test]
    fn test_missing_quantity_fails() {
        let output = TextOutput::new("x", OutputColumns::ENERGY);
        let mut bytes = Vec::new();
        assert!(output.save(&mut bytes, &text_storage()).is_err());
    }
}
