// SPDX-License-Identifier: MIT OR Apache-2.0

//! The register map (spec.md §3/§4.4): a typed overlay over the four flat
//! Modbus address tables, plus the point-to-register binding that lets a
//! value flowing in either direction be serialized/parsed consistently.
//!
//! Grounded on `petar-dambovaliev-s7::field::Field`'s one-type-per-wire-shape
//! pattern (`data_block`/`offset`/byte-width), generalized here from a flat
//! byte buffer to the four disjoint Modbus tables, and on
//! `EvanL1-VoltageEMS::modbus::types::ModbusPoint` for point naming/default
//! conventions.

pub mod point;
pub mod value;

use std::time::Duration;

use crate::error::{Error, Result};
use crate::frame::{Address, Word};

pub use point::{PeerConfig, Point, PointBinding, PointId};
pub use value::Endianness;

/// The four disjoint Modbus address spaces (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Coils,
    DiscreteInputs,
    HoldingRegisters,
    InputRegisters,
}

impl Table {
    pub fn is_bit_table(self) -> bool {
        matches!(self, Table::Coils | Table::DiscreteInputs)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Table::Coils | Table::HoldingRegisters)
    }
}

/// The typed variant a [`Register`] presents over its underlying addresses
/// (spec.md §3 "Register").
#[derive(Debug, Clone)]
pub enum RegisterKind {
    Word { signed: bool },
    Integer { signed: bool, middle_endian: bool },
    Long { middle_endian: bool },
    Float { middle_endian: bool },
    Double { middle_endian: bool },
    Discrete,
    Bits { owned_mask: Word },
    Masked { mask: Word },
    WordArray { len: u16 },
    DiscreteArray { len: u16 },
    Sequence,
    Stamp,
    Time,
}

impl RegisterKind {
    /// Width in registers (holding/input) or bits (coils/discrete inputs).
    pub fn width(&self) -> u16 {
        match self {
            RegisterKind::Word { .. }
            | RegisterKind::Bits { .. }
            | RegisterKind::Masked { .. }
            | RegisterKind::Sequence
            | RegisterKind::Discrete => 1,
            RegisterKind::Integer { .. } | RegisterKind::Float { .. } | RegisterKind::Stamp => 2,
            RegisterKind::Long { .. } | RegisterKind::Double { .. } | RegisterKind::Time => 4,
            RegisterKind::WordArray { len } | RegisterKind::DiscreteArray { len } => *len,
        }
    }
}

/// A typed view over one or more contiguous addresses in one table (spec.md
/// §3 "Register").
#[derive(Debug, Clone)]
pub struct Register {
    pub table: Table,
    pub address: Address,
    pub read_only: bool,
    pub point: Option<PointId>,
    pub kind: RegisterKind,
}

impl Register {
    pub fn width(&self) -> u16 {
        self.kind.width()
    }

    pub fn covers(&self, address: Address) -> bool {
        let width = self.width();
        address >= self.address && u32::from(address) < u32::from(self.address) + u32::from(width)
    }
}

/// The decoded result of a write, handed to the host's value sink (spec.md
/// §4.6).
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    Word(u16),
    SignedWord(i16),
    Integer(i64),
    Long(i64),
    Float(f32),
    Double(f64),
    Discrete(bool),
    Bits(u16),
    Masked(u16),
    WordArray(Vec<u16>),
    DiscreteArray(Vec<bool>),
    Sequence(u16),
    Stamp(Duration),
    Time(value::Time),
}

/// Per-peer typed overlay on the four address tables: the sorted
/// address→register index, plus the endianness flags applied when
/// splitting/joining multi-word views (spec.md §4.4).
#[derive(Debug, Default)]
pub struct RegisterMap {
    registers: Vec<Register>,
    endianness: Endianness,
    sequence: std::collections::HashMap<(Table, Address), u16>,
}

impl RegisterMap {
    pub fn new(endianness: Endianness) -> Self {
        Self {
            registers: Vec::new(),
            endianness,
            sequence: std::collections::HashMap::new(),
        }
    }

    /// Inserts a register, keeping the index sorted by `(table, address)`
    /// for the binary search in [`Self::find`].
    pub fn insert(&mut self, register: Register) {
        let pos = self
            .registers
            .partition_point(|r| (r.table as u8, r.address) < (register.table as u8, register.address));
        self.registers.insert(pos, register);
    }

    fn find(&self, table: Table, address: Address) -> Option<&Register> {
        self.registers
            .iter()
            .find(|r| r.table == table && r.covers(address))
    }

    fn find_mut(&mut self, table: Table, address: Address) -> Option<usize> {
        self.registers
            .iter()
            .position(|r| r.table == table && r.covers(address))
    }

    /// Read path for coils/discrete inputs (spec.md §4.4 "Read path").
    /// Overlays the register map's bookkeeping onto `values`, already
    /// fetched from the host's `Responder`: unconfigured addresses are
    /// zeroed and logged. No bit-table register kind owns state the map
    /// itself must reconstruct, so a configured address is left untouched.
    pub fn read_bits(&self, table: Table, start: Address, values: &mut [bool]) {
        for (i, value) in values.iter_mut().enumerate() {
            let address = start.wrapping_add(i as u16);
            if self.find(table, address).is_none() {
                log::warn!("Read of unconfigured {table:?} address {address} defaults to 0");
                *value = false;
            }
        }
    }

    /// Read path for holding/input registers (spec.md §4.4 "Read path").
    /// Overlays the register map's bookkeeping onto `values`, already
    /// fetched from the host's `Responder`: a `Sequence` register ignores
    /// the fetched word and returns its own post-incrementing counter
    /// (spec.md §4.4 "after read/write"); unconfigured addresses are
    /// zeroed and logged; every other kind's live word is owned by the
    /// host and passed through unchanged.
    pub fn read_words(&mut self, table: Table, start: Address, values: &mut [Word]) {
        for (i, value) in values.iter_mut().enumerate() {
            let address = start.wrapping_add(i as u16);
            let is_sequence = self.find(table, address).map(|reg| matches!(reg.kind, RegisterKind::Sequence));
            match is_sequence {
                Some(true) => {
                    let next = self.sequence.entry((table, address)).or_insert(0);
                    *value = *next;
                    *next = next.wrapping_add(1);
                }
                Some(false) => {}
                None => {
                    log::warn!("Read of unconfigured {table:?} address {address} defaults to 0");
                    *value = 0;
                }
            }
        }
    }

    /// Write path for holding registers (spec.md §4.4 "Write path").
    /// Rejects a write that only partially covers a multi-register view.
    /// `current` supplies the live word at a given address, consulted only
    /// for `Bits`/`Masked` registers so the write preserves bits the
    /// request does not own; callers with no live storage may pass a
    /// closure that always returns `0`.
    pub fn write_words(
        &mut self,
        table: Table,
        start: Address,
        words: &[Word],
        current: &dyn Fn(Table, Address) -> Word,
    ) -> Result<Vec<(Option<PointId>, PointValue)>> {
        if !table.is_writable() || table.is_bit_table() {
            return Err(Error::address(format!("{table:?} is not word-writable")));
        }
        let mut values = Vec::new();
        let mut offset = 0usize;
        while offset < words.len() {
            let address = start.wrapping_add(offset as u16);
            let Some(idx) = self.find_mut(table, address) else {
                log::warn!("Write to unconfigured {table:?} address {address}");
                return Err(Error::address(format!(
                    "no register configured at {table:?} address {address}"
                )));
            };
            let reg = &self.registers[idx];
            let width = usize::from(reg.width());
            if reg.address != address || offset + width > words.len() {
                return Err(Error::value(format!(
                    "write does not fully cover the {width}-word view at {table:?} address {address}"
                )));
            }
            if reg.read_only {
                return Err(Error::address(format!(
                    "register at {table:?} address {address} is read-only"
                )));
            }
            let point = reg.point;
            let slice = &words[offset..offset + width];
            let value = self.decode_write(idx, slice, current)?;
            values.push((point, value));
            offset += width;
        }
        Ok(values)
    }

    fn decode_write(
        &mut self,
        idx: usize,
        words: &[Word],
        current: &dyn Fn(Table, Address) -> Word,
    ) -> Result<PointValue> {
        let endian = self.endianness;
        let reg = &self.registers[idx];
        let value = match &reg.kind {
            RegisterKind::Word { signed } => {
                if *signed {
                    PointValue::SignedWord(words[0] as i16)
                } else {
                    PointValue::Word(words[0])
                }
            }
            RegisterKind::Integer { signed, middle_endian } => {
                let e = Endianness { middle_endian: *middle_endian, little_endian: endian.little_endian };
                let raw = value::decode_integer([words[0], words[1]], *signed, e);
                PointValue::Integer(raw)
            }
            RegisterKind::Long { middle_endian } => {
                let e = Endianness { middle_endian: *middle_endian, little_endian: endian.little_endian };
                PointValue::Long(value::decode_long([words[0], words[1], words[2], words[3]], e))
            }
            RegisterKind::Float { middle_endian } => {
                let e = Endianness { middle_endian: *middle_endian, little_endian: endian.little_endian };
                PointValue::Float(value::decode_float([words[0], words[1]], e))
            }
            RegisterKind::Double { middle_endian } => {
                let e = Endianness { middle_endian: *middle_endian, little_endian: endian.little_endian };
                PointValue::Double(value::decode_double([words[0], words[1], words[2], words[3]], e))
            }
            RegisterKind::Discrete => return Err(Error::address("Discrete is not word-addressable")),
            RegisterKind::Bits { owned_mask } => {
                let live = current(reg.table, reg.address);
                PointValue::Bits(value::merge_bits(live, words[0], *owned_mask))
            }
            RegisterKind::Masked { mask } => {
                let live = current(reg.table, reg.address);
                PointValue::Masked(value::merge_masked(live, words[0], *mask))
            }
            RegisterKind::WordArray { .. } => PointValue::WordArray(words.to_vec()),
            RegisterKind::DiscreteArray { .. } => return Err(Error::address("DiscreteArray is not word-addressable")),
            RegisterKind::Sequence => {
                let key = (reg.table, reg.address);
                let next = self.sequence.entry(key).or_insert(0);
                let value = *next;
                *next = next.wrapping_add(1);
                PointValue::Sequence(value)
            }
            RegisterKind::Stamp => {
                let stamp = value::Stamp::decode([words[0], words[1]]);
                PointValue::Stamp(stamp.as_duration())
            }
            RegisterKind::Time => {
                PointValue::Time(value::Time::decode([words[0], words[1], words[2], words[3]]))
            }
        };
        Ok(value)
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// The point bound to the register covering `address`, if any (used by
    /// the server façade to route a read result to a [`PointValue`]).
    pub fn point_at(&self, table: Table, address: Address) -> Option<PointId> {
        self.find(table, address).and_then(|reg| reg.point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(kind: RegisterKind) -> RegisterMap {
        let mut map = RegisterMap::new(Endianness::default());
        map.insert(Register {
            table: Table::HoldingRegisters,
            address: 0,
            read_only: false,
            point: None,
            kind,
        });
        map
    }

    #[test]
    fn partial_write_to_multi_register_view_is_rejected() {
        let mut map = map_with(RegisterKind::Float { middle_endian: false });
        let err = map.write_words(Table::HoldingRegisters, 0, &[0x40A0], &|_, _| 0).unwrap_err();
        assert!(matches!(err, Error::Value(_)));
    }

    #[test]
    fn full_width_write_to_multi_register_view_is_accepted() {
        let mut map = map_with(RegisterKind::Float { middle_endian: false });
        let values = map.write_words(Table::HoldingRegisters, 0, &[0x40A0, 0x0000], &|_, _| 0).unwrap();
        assert_eq!(values, vec![(None, PointValue::Float(5.0))]);
    }

    #[test]
    fn write_to_unconfigured_address_is_address_error() {
        let mut map = RegisterMap::new(Endianness::default());
        let err = map.write_words(Table::HoldingRegisters, 99, &[1], &|_, _| 0).unwrap_err();
        assert!(matches!(err, Error::Address(_)));
    }

    #[test]
    fn sequence_register_post_increments() {
        let mut map = map_with(RegisterKind::Sequence);
        let first = map.write_words(Table::HoldingRegisters, 0, &[0], &|_, _| 0).unwrap();
        let second = map.write_words(Table::HoldingRegisters, 0, &[0], &|_, _| 0).unwrap();
        assert_eq!(first, vec![(None, PointValue::Sequence(0))]);
        assert_eq!(second, vec![(None, PointValue::Sequence(1))]);
    }

    #[test]
    fn read_of_unconfigured_coil_defaults_to_zero() {
        let map = RegisterMap::new(Endianness::default());
        let mut bits = vec![true, true, true];
        map.read_bits(Table::Coils, 0, &mut bits);
        assert_eq!(bits, vec![false, false, false]);
    }

    #[test]
    fn sequence_register_post_increments_on_read() {
        let mut map = map_with(RegisterKind::Sequence);
        let mut first = vec![0xFFFF];
        map.read_words(Table::HoldingRegisters, 0, &mut first);
        let mut second = vec![0xFFFF];
        map.read_words(Table::HoldingRegisters, 0, &mut second);
        assert_eq!(first, vec![0]);
        assert_eq!(second, vec![1]);
    }

    #[test]
    fn read_of_unconfigured_holding_register_defaults_to_zero() {
        let mut map = RegisterMap::new(Endianness::default());
        let mut words = vec![0xFFFF];
        map.read_words(Table::HoldingRegisters, 0, &mut words);
        assert_eq!(words, vec![0]);
    }
}
