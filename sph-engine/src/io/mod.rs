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
//! Dump input and output
//!
//! Three dump flavors: the exact versioned [`binary`] container, the
//! [`compressed`] variant with quantized floats and run-length encoding,
//! and the human-readable [`text`] table. A small CSV writer for benchmark
//! baselines completes the set.

pub mod binary;
pub mod compressed;
pub mod text;

pub use binary::{BinaryInput, BinaryOutput, DumpInfo, DUMP_VERSION};
pub use compressed::{CompressedInput, CompressedOutput};
pub use text::{OutputColumns, TextOutput};

use crate::error::Result;
use std::io::{Read, Write};

pub(crate) fn write_u8<W: Write>(writer: &mut W, value: u8) -> Result<()> {
    writer.write_all(&[value])?;
    Ok(())
}

pub(crate) fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_f32<W: Write>(writer: &mut W, value: f32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_f64<W: Write>(writer: &mut W, value: f64) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut bytes = [0u8; 1];
    reader.read_exact(&mut bytes)?;
    Ok(bytes[0])
}

pub(crate) fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

pub(crate) fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

pub(crate) fn read_f32<R: Read>(reader: &mut R) -> Result<f32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(f32::from_le_bytes(bytes))
}

pub(crate) fn read_f64<R: Read>(reader: &mut R) -> Result<f64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(f64::from_le_bytes(bytes))
}

pub(crate) fn read_exact_vec<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// One benchmark baseline record
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkRecord {
    /// Name of the benchmark
    pub name: String,
    /// Total duration in milliseconds
    pub duration_ms: f64,
    /// Number of iterations
    pub iterations: u64,
    /// Mean iteration time
    pub mean: f64,
    /// Variance of iteration times
    pub variance: f64,
    /// Fastest iteration
    pub min: f64,
    /// Slowest iteration
    pub max: f64,
}

/// Writes benchmark baselines as CSV, one row per benchmark
pub fn write_benchmark_csv<W: Write>(writer: &mut W, records: &[BenchmarkRecord]) -> Result<()> {
    writeln!(writer, "name,duration_ms,iterations,mean,variance,min,max")?;
    for record in records {
        writeln!(
            writer,
            "{},{},{},{},{},{},{}",
            record.name,
            record.duration_ms,
            record.iterations,
            record.mean,
            record.variance,
            record.min,
            record.max
        )?;
    }
    Ok(())
}

/// Parses benchmark baselines written by [`write_benchmark_csv`]
pub fn read_benchmark_csv<R: Read>(reader: &mut R) -> Result<Vec<BenchmarkRecord>> {
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    let mut records = Vec::new();
    for (line_idx, line) in content.lines().enumerate() {
        if line_idx == 0 || line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 7 {
            return Err(crate::error::Error::Corrupt(format!(
                "benchmark CSV row has {} fields",
                fields.len()
            )));
        }
        let parse = |s: &str| -> Result<f64> {
            s.trim()
                .parse()
                .map_err(|_| crate::error::Error::Corrupt(format!("bad number '{}'", s)))
        };
        records.push(BenchmarkRecord {
            name: fields[0].trim().to_string(),
            duration_ms: parse(fields[1])?,
            iterations: fields[2]
                .trim()
                .parse()
                .map_err(|_| crate::error::Error::Corrupt("bad iteration count".into()))?,
            mean: parse(fields[3])?,
            variance: parse(fields[4])?,
            min: parse(fields[5])?,
            max: parse(fields[6])?,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benchmark_csv_round_trip() {
        let records = vec![
            BenchmarkRecord {
                name: "kernel_evaluation".into(),
                duration_ms: 1250.0,
                iterations: 10000,
                mean: 0.125,
                variance: 0.001,
                min: 0.12,
                max: 0.2,
            },
            BenchmarkRecord {
                name: "finder_build".into(),
                duration_ms: 80.5,
                iterations: 50,
                mean: 1.61,
                variance: 0.02,
                min: 1.5,
                max: 1.9,
            },
        ];
        let mut bytes = Vec::new();
        write_benchmark_csv(&mut bytes, &records).unwrap();
        let parsed = read_benchmark_csv(&mut bytes.as_slice()).unwrap();
        assert_eq!(records, parsed);
    }
}
