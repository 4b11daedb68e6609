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
//! Versioned binary dumps
//!
//! Self-describing container: a header with counts and run metadata, the
//! serialized parameter block and particle range of every material, the
//! typed buffers of every quantity in stable key order, and the
//! attractors. All scalars are little-endian; parameter blocks are stored
//! in their stable YAML text form.
//!
//! Backward compatibility is mandatory: the reader accepts every
//! historical version code (version 1 lacked the wall-clock field and the
//! attractor section) and upgrades in memory. A dump written and reloaded
//! with the current version is byte-identical.

use super::{read_exact_vec, read_f64, read_u32, read_u64, read_u8, write_f64, write_u32, write_u64, write_u8};
use crate::error::{Error, Result};
use crate::math::{Interval, SymmetricTensor, TracelessTensor, Vector};
use crate::physics::materials::{create_material, Material};
use crate::quantities::{
    Attractor, OrderEnum, Quantity, QuantityId, QuantityValue, Storage, ValueEnum,
};
use crate::settings::BodySettings;
use std::io::{Read, Write};

const MAGIC: [u8; 4] = *b"SPHD";

/// Latest version of the dump format
pub const DUMP_VERSION: u32 = 2;

/// Version that introduced the wall-clock field and the attractor section
const VERSION_WITH_ATTRACTORS: u32 = 2;

/// Run metadata carried in the dump header
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DumpInfo {
    /// Simulation time of the dump
    pub run_time: f64,
    /// Timestep at the time of the dump
    pub time_step: f64,
    /// Wall-clock duration of the run so far, in seconds
    pub wallclock_time: f64,
    /// Application-defined run type tag
    pub run_type: u32,
}

impl Default for DumpInfo {
    fn default() -> Self {
        DumpInfo {
            run_time: 0.0,
            time_step: 0.0,
            wallclock_time: 0.0,
            run_type: 0,
        }
    }
}

/// Writer of binary dumps
pub struct BinaryOutput;

impl BinaryOutput {
    /// Serializes the storage into the latest dump version
    pub fn save<W: Write>(writer: &mut W, storage: &Storage, info: &DumpInfo) -> Result<()> {
        writer.write_all(&MAGIC)?;
        write_u32(writer, DUMP_VERSION)?;
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
            write_quantity_buffers(writer, quantity)?;
        }

        write_u32(writer, storage.attractor_cnt() as u32)?;
        for attractor in storage.attractors() {
            write_vector(writer, attractor.position)?;
            write_vector(writer, attractor.velocity)?;
            write_f64(writer, attractor.mass)?;
            write_f64(writer, attractor.radius)?;
        }
        Ok(())
    }
}

/// Reader of binary dumps
pub struct BinaryInput;

impl BinaryInput {
    /// Parses a dump of any supported version
    pub fn load<R: Read>(reader: &mut R) -> Result<(Storage, DumpInfo)> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::Corrupt("bad magic of binary dump".into()));
        }
        let version = read_u32(reader)?;
        if version == 0 || version > DUMP_VERSION {
            return Err(Error::UnknownVersion(version));
        }
        let particle_cnt = read_u64(reader)? as usize;
        let material_cnt = read_u32(reader)? as usize;
        let quantity_cnt = read_u32(reader)? as usize;
        let run_time = read_f64(reader)?;
        let time_step = read_f64(reader)?;
        let wallclock_time = if version >= VERSION_WITH_ATTRACTORS {
            read_f64(reader)?
        } else {
            0.0
        };
        let run_type = read_u32(reader)?;

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
                let lower = read_f64(reader)?;
                let upper = read_f64(reader)?;
                let minimal = read_f64(reader)?;
                ranges.push((id, Interval::new(lower, upper), minimal));
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
            let quantity = read_quantity_buffers(reader, value_type, order, particle_cnt)?;
            quantities.push((id, quantity));
        }

        let mut attractors = Vec::new();
        if version >= VERSION_WITH_ATTRACTORS {
            let attractor_cnt = read_u32(reader)? as usize;
            for _ in 0..attractor_cnt {
                let position = read_vector(reader)?;
                let velocity = read_vector(reader)?;
                let mass = read_f64(reader)?;
                let radius = read_f64(reader)?;
                attractors.push(Attractor::new(position, velocity, mass, radius));
            }
        }

        // assemble the storage, slicing quantities into their material
        // partitions; the material ID cache is rebuilt during the merge
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
        Ok((
            storage,
            DumpInfo {
                run_time,
                time_step,
                wallclock_time,
                run_type,
            },
        ))
    }
}

fn write_vector<W: Write>(writer: &mut W, v: Vector) -> Result<()> {
    write_f64(writer, v.x)?;
    write_f64(writer, v.y)?;
    write_f64(writer, v.z)?;
    write_f64(writer, v.h)
}

fn read_vector<R: Read>(reader: &mut R) -> Result<Vector> {
    Ok(Vector::with_h(
        read_f64(reader)?,
        read_f64(reader)?,
        read_f64(reader)?,
        read_f64(reader)?,
    ))
}

fn write_quantity_buffers<W: Write>(writer: &mut W, quantity: &Quantity) -> Result<()> {
    match quantity.value_type() {
        ValueEnum::Scalar => write_typed_buffers::<W, f64>(writer, quantity, &|w, v| {
            write_f64(w, *v)
        }),
        ValueEnum::Vector => write_typed_buffers::<W, Vector>(writer, quantity, &|w, v| {
            write_vector(w, *v)
        }),
        ValueEnum::SymmetricTensor => {
            write_typed_buffers::<W, SymmetricTensor>(writer, quantity, &|w, v| {
                write_vector(w, v.diag)?;
                write_vector(w, v.offdiag)
            })
        }
        ValueEnum::TracelessTensor => {
            write_typed_buffers::<W, TracelessTensor>(writer, quantity, &|w, v| {
                write_f64(w, v.xx)?;
                write_f64(w, v.yy)?;
                write_f64(w, v.xy)?;
                write_f64(w, v.xz)?;
                write_f64(w, v.yz)
            })
        }
        ValueEnum::Index => write_typed_buffers::<W, u32>(writer, quantity, &|w, v| {
            write_u32(w, *v)
        }),
    }
}

fn write_typed_buffers<W: Write, T: QuantityValue>(
    writer: &mut W,
    quantity: &Quantity,
    element: &dyn Fn(&mut W, &T) -> Result<()>,
) -> Result<()> {
    let set = quantity.buffers::<T>().expect("type matched by caller");
    let buffers = [&set.values, &set.dt, &set.d2t];
    for buffer in buffers.iter().take(quantity.order().buffer_cnt()) {
        for value in buffer.iter() {
            element(writer, value)?;
        }
    }
    Ok(())
}

fn read_quantity_buffers<R: Read>(
    reader: &mut R,
    value_type: ValueEnum,
    order: OrderEnum,
    cnt: usize,
) -> Result<Quantity> {
    match value_type {
        ValueEnum::Scalar => read_typed_buffers::<R, f64>(reader, order, cnt, &read_f64),
        ValueEnum::Vector => read_typed_buffers::<R, Vector>(reader, order, cnt, &read_vector),
        ValueEnum::SymmetricTensor => {
            read_typed_buffers::<R, SymmetricTensor>(reader, order, cnt, &|r| {
                Ok(SymmetricTensor::new(read_vector(r)?, read_vector(r)?))
            })
        }
        ValueEnum::TracelessTensor => {
            read_typed_buffers::<R, TracelessTensor>(reader, order, cnt, &|r| {
                Ok(TracelessTensor::new(
                    read_f64(r)?,
                    read_f64(r)?,
                    read_f64(r)?,
                    read_f64(r)?,
                    read_f64(r)?,
                ))
            })
        }
        ValueEnum::Index => read_typed_buffers::<R, u32>(reader, order, cnt, &read_u32),
    }
}

fn read_typed_buffers<R: Read, T: QuantityValue>(
    reader: &mut R,
    order: OrderEnum,
    cnt: usize,
    element: &dyn Fn(&mut R) -> Result<T>,
) -> Result<Quantity> {
    let mut read_buffer = || -> Result<Vec<T>> {
        let mut buffer = Vec::with_capacity(cnt);
        for _ in 0..cnt {
            buffer.push(element(reader)?);
        }
        Ok(buffer)
    };
    let values = read_buffer()?;
    let mut quantity = Quantity::from_values(order, values);
    let set = quantity.buffers_mut::<T>().expect("just constructed");
    if order >= OrderEnum::First {
        set.dt = read_buffer()?;
    }
    if order >= OrderEnum::Second {
        set.d2t = read_buffer()?;
    }
    Ok(quantity)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::settings::{BodySettingsId, EosEnum, YieldingEnum};

    pub(crate) fn reference_storage() -> Storage {
        let tillotson = BodySettings::new()
            .with(BodySettingsId::Eos, EosEnum::Tillotson)
            .with(BodySettingsId::Density, 2700.0);
        let ideal_gas = BodySettings::new()
            .with(BodySettingsId::Eos, EosEnum::IdealGas)
            .with(BodySettingsId::RheologyYielding, YieldingEnum::None);
        let murnaghan = BodySettings::new()
            .with(BodySettingsId::Eos, EosEnum::Murnaghan)
            .with(BodySettingsId::RheologyYielding, YieldingEnum::None);

        let make_body = |params: BodySettings, cnt: usize, offset: f64| -> Storage {
            let material = create_material(params).unwrap();
            {
                let mut guard = material.write().unwrap();
                guard.set_range(QuantityId::Density, Interval::new(10.0, 1e8), 25.0);
            }
            let mut storage = Storage::with_material(material);
            let positions: Vec<Vector> = (0..cnt)
                .map(|i| Vector::with_h(offset + i as f64 * 0.1, 0.5, -0.25, 0.08))
                .collect();
            storage
                .insert_values(QuantityId::Position, OrderEnum::Second, positions)
                .unwrap();
            {
                let v = storage.dt_mut::<Vector>(QuantityId::Position).unwrap();
                for (i, vel) in v.iter_mut().enumerate() {
                    *vel = Vector::new(i as f64, -1.0, 0.5);
                }
            }
            storage
                .insert(QuantityId::Mass, OrderEnum::Zero, 2.5_f64)
                .unwrap();
            storage
                .insert(QuantityId::Density, OrderEnum::First, 2700.0_f64)
                .unwrap();
            storage
                .insert(
                    QuantityId::DeviatoricStress,
                    OrderEnum::First,
                    TracelessTensor::new(1.0, -2.0, 0.5, 0.25, -0.125),
                )
                .unwrap();
            storage
        };

        let mut storage = make_body(tillotson, 10, 0.0);
        storage.merge(make_body(ideal_gas, 20, 10.0)).unwrap();
        storage.merge(make_body(murnaghan, 5, 20.0)).unwrap();
        storage.add_attractor(Attractor::new(
            Vector::new(5.0, 5.0, 5.0),
            Vector::new(0.0, 1.0, 0.0),
            1e10,
            0.5,
        ));
        storage.add_attractor(Attractor::new(
            Vector::new(-5.0, 0.0, 0.0),
            Vector::zero(),
            2e10,
            1.5,
        ));
        storage
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let storage = reference_storage();
        let info = DumpInfo {
            run_time: 12.5,
            time_step: 1e-3,
            wallclock_time: 3600.0,
            run_type: 1,
        };
        let mut first = Vec::new();
        BinaryOutput::save(&mut first, &storage, &info).unwrap();

        let (loaded, loaded_info) = BinaryInput::load(&mut first.as_slice()).unwrap();
        assert_eq!(loaded_info, info);
        assert_eq!(loaded.particle_cnt(), 35);
        assert_eq!(loaded.material_cnt(), 3);
        assert_eq!(loaded.attractor_cnt(), 2);
        loaded.is_valid(false).unwrap();

        let mut second = Vec::new();
        BinaryOutput::save(&mut second, &loaded, &info).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_round_trip_preserves_buffers_and_ranges() {
        let storage = reference_storage();
        let mut bytes = Vec::new();
        BinaryOutput::save(&mut bytes, &storage, &DumpInfo::default()).unwrap();
        let (loaded, _) = BinaryInput::load(&mut bytes.as_slice()).unwrap();

        for id in storage.quantity_ids() {
            assert_eq!(
                storage.quantity(id).unwrap(),
                loaded.quantity(id).unwrap(),
                "quantity {:?} differs",
                id
            );
        }
        for mat_idx in 0..3 {
            let original = storage.material(mat_idx);
            let reloaded = loaded.material(mat_idx);
            assert_eq!(original.sequence(), reloaded.sequence());
            let original = original.material().read().unwrap();
            let reloaded = reloaded.material().read().unwrap();
            assert_eq!(
                original.range(QuantityId::Density),
                reloaded.range(QuantityId::Density)
            );
            assert_eq!(
                original.minimal(QuantityId::Density),
                reloaded.minimal(QuantityId::Density)
            );
        }
        assert_eq!(storage.attractors(), loaded.attractors());
    }

    #[test]
    fn test_truncated_dump_fails() {
        let storage = reference_storage();
        let mut bytes = Vec::new();
        BinaryOutput::save(&mut bytes, &storage, &DumpInfo::default()).unwrap();
        bytes.truncate(bytes.len() / 2);
        assert!(BinaryInput::load(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn test_unknown_version_fails() {
        let storage = reference_storage();
        let mut bytes = Vec::new();
        BinaryOutput::save(&mut bytes, &storage, &DumpInfo::default()).unwrap();
        bytes[4..8].copy_from_slice(&999_u32.to_le_bytes());
        match BinaryInput::load(&mut bytes.as_slice()) {
            Err(Error::UnknownVersion(999)) => {}
            other => panic!("expected UnknownVersion, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_storage_without_materials() {
        let mut storage = Storage::new();
        storage
            .insert_values(QuantityId::Mass, OrderEnum::Zero, vec![1.0, 2.0, 3.0])
            .unwrap();
        let mut bytes = Vec::new();
        BinaryOutput::save(&mut bytes, &storage, &DumpInfo::default()).unwrap();
        let (loaded, _) = BinaryInput::load(&mut bytes.as_slice()).unwrap();
        assert_eq!(loaded.value::<f64>(QuantityId::Mass).unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(loaded.material_cnt(), 0);
    }
}
