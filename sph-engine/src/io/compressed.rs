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
//! Compressed dumps
//!
//! The same logical content as the binary dump with floats quantized to
//! single precision and buffers run-length encoded when that wins. The
//! quantization error of 2^-24 keeps the round trip within 1e-6 relative
//! error for all state quantities; attractors stay in full precision.

use super::{
    read_exact_vec, read_f32, read_f64, read_u32, read_u64, read_u8, write_f32, write_f64,
    write_u32, write_u64, write_u8,
};
use super::binary::DumpInfo;
use crate::error::{Error, Result};
use crate::math::{Interval, SymmetricTensor, TracelessTensor, Vector};
use crate::physics::materials::{create_material, Material};
use crate::quantities::{
    Attractor, OrderEnum, Quantity, QuantityId, QuantityValue, Storage, ValueEnum,
};
use crate::settings::BodySettings;
use std::io::{Read, Write};

const MAGIC: [u8; 4] = *b"SPHC";
const VERSION: u32 = 1;

const ENCODING_RAW: u8 = 0;
const ENCODING_RLE: u8 = 1;

/// Writes a stream of f32 samples, choosing raw or run-length encoding by
/// size
fn write_f32_stream<W: Write>(writer: &mut W, samples: &[f32]) -> Result<()> {
    // count the runs of bit-identical values
    let mut runs = 0_usize;
    let mut idx = 0;
    while idx < samples.len() {
        let mut end = idx + 1;
        while end < samples.len() && samples[end].to_bits() == samples[idx].to_bits() {
            end += 1;
        }
        runs += 1;
        idx = end;
    }
    let rle_size = runs * 8;
    let raw_size = samples.len() * 4;
    if rle_size < raw_size {
        write_u8(writer, ENCODING_RLE)?;
        write_u32(writer, runs as u32)?;
        let mut idx = 0;
        while idx < samples.len() {
            let mut end = idx + 1;
            while end < samples.len() && samples[end].to_bits() == samples[idx].to_bits() {
                end += 1;
            }
            write_u32(writer, (end - idx) as u32)?;
            write_f32(writer, samples[idx])?;
            idx = end;
        }
    } else {
        write_u8(writer, ENCODING_RAW)?;
        for &sample in samples {
            write_f32(writer, sample)?;
        }
    }
    Ok(())
}

fn read_f32_stream<R: Read>(reader: &mut R, cnt: usize) -> Result<Vec<f32>> {
    let encoding = read_u8(reader)?;
    let mut samples = Vec::with_capacity(cnt);
    match encoding {
        ENCODING_RAW => {
            for _ in 0..cnt {
                samples.push(read_f32(reader)?);
            }
        }
        ENCODING_RLE => {
            let runs = read_u32(reader)? as usize;
            for _ in 0..runs {
                let length = read_u32(reader)? as usize;
                let value = read_f32(reader)?;
                samples.extend(std::iter::repeat(value).take(length));
            }
            if samples.len() != cnt {
                return Err(Error::Corrupt("run-length stream size mismatch".into()));
            }
        }
        other => return Err(Error::Corrupt(format!("unknown stream encoding {}", other))),
    }
    Ok(samples)
}

/// Flattens a typed buffer into f32 components
trait Quantize: QuantityValue {
    const COMPONENTS: usize;
    fn push_components(&self, out: &mut Vec<f32>);
    fn from_components(components: &[f32]) -> Self;
}

impl Quantize for f64 {
    const COMPONENTS: usize = 1;

    fn push_components(&self, out: &mut Vec<f32>) {
        out.push(*self as f32);
    }

    fn from_components(components: &[f32]) -> Self {
        components[0] as f64
    }
}

impl Quantize for Vector {
    const COMPONENTS: usize = 4;

    fn push_components(&self, out: &mut Vec<f32>) {
        out.extend([self.x as f32, self.y as f32, self.z as f32, self.h as f32]);
    }

    fn from_components(components: &[f32]) -> Self {
        Vector::with_h(
            components[0] as f64,
            components[1] as f64,
            components[2] as f64,
            components[3] as f64,
        )
    }
}

impl Quantize for SymmetricTensor {
    const COMPONENTS: usize = 8;

    fn push_components(&self, out: &mut Vec<f32>) {
        self.diag.push_components(out);
        self.offdiag.push_components(out);
    }

    fn from_components(components: &[f32]) -> Self {
        SymmetricTensor::new(
            Vector::from_components(&components[0..4]),
            Vector::from_components(&components[4..8]),
        )
    }
}

impl Quantize for TracelessTensor {
    const COMPONENTS: usize = 5;

    fn push_components(&self, out: &mut Vec<f32>) {
        out.extend([
            self.xx as f32,
            self.yy as f32,
            self.xy as f32,
            self.xz as f32,
            self.yz as f32,
        ]);
    }

    fn from_components(components: &[f32]) -> Self {
        TracelessTensor::new(
            components[0] as f64,
            components[1] as f64,
            components[2] as f64,
            components[3] as f64,
            components[4] as f64,
        )
    }
}

fn write_quantized<W: Write, T: Quantize>(writer: &mut W, quantity: &Quantity) -> Result<()> {
    let set = quantity.buffers::<T>().expect("type matched by caller");
    let buffers = [&set.values, &set.dt, &set.d2t];
    for buffer in buffers.iter().take(quantity.order().buffer_cnt()) {
        let mut samples = Vec::with_capacity(buffer.len() * T::COMPONENTS);
        for value in buffer.iter() {
            value.push_components(&mut samples);
        }
        write_f32_stream(writer, &samples)?;
    }
    Ok(())
}

fn read_quantized<R: Read, T: Quantize>(
    reader: &mut R,
    order: OrderEnum,
    cnt: usize,
) -> Result<Quantity> {
    let mut read_buffer = |reader: &mut R| -> Result<Vec<T>> {
        let samples = read_f32_stream(reader, cnt * T::COMPONENTS)?;
        Ok(samples
            .chunks_exact(T::COMPONENTS)
            .map(T::from_components)
            .collect())
    };
    let values = read_buffer(reader)?;
    let mut quantity = Quantity::from_values(order, values);
    let set = quantity.buffers_mut::<T>().expect("just constructed");
    if order >= OrderEnum::First {
        set.dt = read_buffer(reader)?;
    }
    if order >= OrderEnum::Second {
        set.d2t = read_buffer(reader)?;
    }
    Ok(quantity)
}

/// Writer of compressed dumps
pub struct CompressedOutput;

impl CompressedOutput {
    /// Serializes the storage with quantized floats
    pub fn save<W: Write>(writer: &mut W, storage: &Storage, info: &DumpInfo) -> Result<()> {
        writer.write_all(&MAGIC)?;
        write_u32(writer, VERSION)?;
        write_u64(writer, storage.particle_cnt() as u64)?;
        write_u32(writer, storage.material_cnt() as u32)?;
        write_u32(writer, storage.quantity_cnt() as u32)?;
        write_f64(writer, info.run_time)?;
        write_f64(writer, info.time_step)?;
        write_f64(writer, info.wallclock_time)?;
        write_u32(writer, info.run_type)?;

        for mat_idx in 0..storage.material_cnt() {
            let view = storage.material(mat_idx);
            let material = view.material().read().expect("material lock poisoned");
            let yaml = material.params().to_yaml()?;
            write_u32(writer, yaml.len() as u32)?;
            writer.write_all(yaml.as_bytes())?;
            write_u64(writer, view.sequence().start as u64)?;
            write_u64(writer, view.sequence().end as u64)?;
            let ranges = material.declared_ranges();
            write_u32(writer, ranges.len() as u32)?;
            for (id, range, minimal) in ranges {
                write_u32(writer, id.code())?;
                write_f64(writer, range.lower())?;
                write_f64(writer, range.upper())?;
                write_f64(writer, minimal)?;
            }
        }

        for id in storage.quantity_ids().collect::<Vec<_>>() {
            let quantity = storage.quantity(id)?;
            write_u32(writer, id.code())?;
            write_u8(writer, quantity.value_type().tag())?;
            write_u8(writer, quantity.order().tag())?;
            match quantity.value_type() {
                ValueEnum::Scalar => write_quantized::<W, f64>(writer, quantity)?,
                ValueEnum::Vector => write_quantized::<W, Vector>(writer, quantity)?,
                ValueEnum::SymmetricTensor => {
                    write_quantized::<W, SymmetricTensor>(writer, quantity)?
                }
                ValueEnum::TracelessTensor => {
                    write_quantized::<W, TracelessTensor>(writer, quantity)?
                }
                ValueEnum::Index => {
                    let set = quantity.buffers::<u32>().expect("type checked");
                    for value in &set.values {
                        write_u32(writer, *value)?;
                    }
                }
            }
        }

        // attractors keep full precision
        write_u32(writer, storage.attractor_cnt() as u32)?;
        for attractor in storage.attractors() {
            for lane in [
                attractor.position.x,
                attractor.position.y,
                attractor.position.z,
                attractor.position.h,
                attractor.velocity.x,
                attractor.velocity.y,
                attractor.velocity.z,
                attractor.velocity.h,
                attractor.mass,
                attractor.radius,
            ] {
                write_f64(writer, lane)?;
            }
        }
        Ok(())
    }
}

/// Reader of compressed dumps
pub struct CompressedInput;

impl CompressedInput {
    /// Parses a compressed dump
    pub fn load<R: Read>(reader: &mut R) -> Result<(Storage, DumpInfo)> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::Corrupt("bad magic of compressed dump".into()));
        }
        let version = read_u32(reader)?;
        if version != VERSION {
            return Err(Error::UnknownVersion(version));
        }
        let particle_cnt = read_u64(reader)? as usize;
        let material_cnt = read_u32(reader)? as usize;
        let quantity_cnt = read_u32(reader)? as usize;
        let info = DumpInfo {
            run_time: read_f64(reader)?,
            time_step: read_f64(reader)?,
            wallclock_time: read_f64(reader)?,
            run_type: read_u32(reader)?,
        };

        struct MaterialBlock {
            params: BodySettings,
            from: usize,
            to: usize,
            ranges: Vec<(QuantityId, Interval, f64)>,
        }
        let mut materials = Vec::with_capacity(material_cnt);
        for _ in 0..material_cnt {
            let yaml_len = read_u32(reader)? as usize;
            let yaml = String::from_utf8(read_exact_vec(reader, yaml_len)?)
                .map_err(|_| Error::Corrupt("material parameters are not valid UTF-8".into()))?;
            let params = BodySettings::from_yaml(&yaml)?;
            let from = read_u64(reader)? as usize;
            let to = read_u64(reader)? as usize;
            let range_cnt = read_u32(reader)? as usize;
            let mut ranges = Vec::with_capacity(range_cnt);
            for _ in 0..range_cnt {
                let code = read_u32(reader)?;
                let id = QuantityId::from_code(code)
                    .ok_or_else(|| Error::Corrupt(format!("unknown quantity code {}", code)))?;
                ranges.push((
                    id,
                    Interval::new(read_f64(reader)?, read_f64(reader)?),
                    read_f64(reader)?,
                ));
            }
            materials.push(MaterialBlock {
                params,
                from,
                to,
                ranges,
            });
        }

        let mut quantities: Vec<(QuantityId, Quantity)> = Vec::with_capacity(quantity_cnt);
        for _ in 0..quantity_cnt {
            let code = read_u32(reader)?;
            let id = QuantityId::from_code(code)
                .ok_or_else(|| Error::Corrupt(format!("unknown quantity code {}", code)))?;
            let value_type = ValueEnum::from_tag(read_u8(reader)?)
                .ok_or_else(|| Error::Corrupt("unknown value type tag".into()))?;
            let order = OrderEnum::from_tag(read_u8(reader)?)
                .ok_or_else(|| Error::Corrupt("unknown order tag".into()))?;
            let quantity = match value_type {
                ValueEnum::Scalar => read_quantized::<R, f64>(reader, order, particle_cnt)?,
                ValueEnum::Vector => read_quantized::<R, Vector>(reader, order, particle_cnt)?,
                ValueEnum::SymmetricTensor => {
                    read_quantized::<R, SymmetricTensor>(reader, order, particle_cnt)?
                }
                ValueEnum::TracelessTensor => {
                    read_quantized::<R, TracelessTensor>(reader, order, particle_cnt)?
                }
                ValueEnum::Index => {
                    let mut values = Vec::with_capacity(particle_cnt);
                    for _ in 0..particle_cnt {
                        values.push(read_u32(reader)?);
                    }
                    Quantity::from_values(order, values)
                }
            };
            quantities.push((id, quantity));
        }

        let attractor_cnt = read_u32(reader)? as usize;
        let mut attractors = Vec::with_capacity(attractor_cnt);
        for _ in 0..attractor_cnt {
            let mut lanes = [0.0_f64; 10];
            for lane in &mut lanes {
                *lane = read_f64(reader)?;
            }
            attractors.push(Attractor::new(
                Vector::with_h(lanes[0], lanes[1], lanes[2], lanes[3]),
                Vector::with_h(lanes[4], lanes[5], lanes[6], lanes[7]),
                lanes[8],
                lanes[9],
            ));
        }

        let mut storage = if materials.is_empty() {
            let mut storage = Storage::new();
            for (id, quantity) in quantities {
                storage.insert_quantity(id, quantity)?;
            }
            storage
        } else {
            let mut assembled: Option<Storage> = None;
            for block in materials {
                let material = create_material(block.params)?;
                {
                    let mut guard = material.write().expect("material lock poisoned");
                    for (id, range, minimal) in &block.ranges {
                        guard.set_range(*id, *range, *minimal);
                    }
                }
                let mut partial = Storage::with_material(material);
                for (id, quantity) in &quantities {
                    if *id == QuantityId::MaterialId {
                        continue;
                    }
                    partial.insert_quantity(*id, quantity.sliced(block.from..block.to))?;
                }
                assembled = Some(match assembled {
                    None => partial,
                    Some(mut merged) => {
                        merged.merge(partial)?;
                        merged
                    }
                });
            }
            assembled.expect("at least one material block")
        };
        for attractor in attractors {
            storage.add_attractor(attractor);
        }
        storage.is_valid(false)?;
        Ok((storage, info))
    }
}
