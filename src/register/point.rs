// SPDX-License-Identifier: MIT OR Apache-2.0

//! Point identity and peer configuration (spec.md §6): the external name a
//! host application uses for a value, bound to exactly one [`super::Register`].
//! Plain structs, no serde — configuration loading is a host concern
//! (spec.md Non-goals).

use std::net::SocketAddr;
use std::time::Duration;

use super::{Endianness, Register, RegisterKind, RegisterMap, Table};
use crate::slave::SlaveId;

/// Stable identity for a point, independent of its register binding.
pub type PointId = u32;

/// A named external value, bound to exactly one register (spec.md §3
/// "Point").
#[derive(Debug, Clone)]
pub struct Point {
    pub id: PointId,
    pub name: String,
}

/// The binding of a [`Point`] to the [`Register`] that stores it.
#[derive(Debug, Clone)]
pub struct PointBinding {
    pub point: Point,
    pub register: Register,
}

/// Which serial framing a peer speaks on the wire (spec.md §2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialMode {
    Rtu,
    Ascii,
}

/// Per-peer configuration (spec.md §6 "Configuration"): how to reach the
/// peer, the retry/timeout policy, the endianness applied to its registers,
/// and the point bindings it exposes.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub unit_identifier: SlaveId,

    /// TCP peers dial each address in order until one connects.
    pub socket_addresses: Vec<SocketAddr>,

    pub serial_port: Option<String>,
    pub serial_mode: Option<SerialMode>,
    pub serial_baud_rate: u32,
    #[cfg(any(feature = "rtu", feature = "ascii"))]
    pub serial_data_bits: tokio_serial::DataBits,
    #[cfg(any(feature = "rtu", feature = "ascii"))]
    pub serial_parity: tokio_serial::Parity,
    #[cfg(any(feature = "rtu", feature = "ascii"))]
    pub serial_stop_bits: tokio_serial::StopBits,

    pub endianness: Endianness,

    /// `0` means "effectively unlimited" (spec.md §5).
    pub batch_size: usize,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub request_retries: u32,
    pub request_retry_interval: Duration,

    /// Wall-clock tick applied when reconstructing a `Stamp` write.
    pub stamp_tick: Duration,
    pub stamp_address: Option<super::Address>,
    pub sequence_address: Option<super::Address>,
    pub time_address: Option<super::Address>,

    pub points: Vec<PointBinding>,
}

impl PeerConfig {
    pub fn new(unit_identifier: SlaveId) -> Self {
        Self {
            unit_identifier,
            socket_addresses: Vec::new(),
            serial_port: None,
            serial_mode: None,
            serial_baud_rate: 19200,
            #[cfg(any(feature = "rtu", feature = "ascii"))]
            serial_data_bits: tokio_serial::DataBits::Eight,
            #[cfg(any(feature = "rtu", feature = "ascii"))]
            serial_parity: tokio_serial::Parity::None,
            #[cfg(any(feature = "rtu", feature = "ascii"))]
            serial_stop_bits: tokio_serial::StopBits::One,
            endianness: Endianness::default(),
            batch_size: 1,
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(60),
            request_retries: 0,
            request_retry_interval: Duration::from_secs(3),
            stamp_tick: Duration::from_millis(100),
            stamp_address: None,
            sequence_address: None,
            time_address: None,
            points: Vec::new(),
        }
    }

    pub fn retry_policy(&self) -> crate::engine::RetryPolicy {
        crate::engine::RetryPolicy {
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            request_retries: self.request_retries,
            retry_interval: self.request_retry_interval,
            batch_size: self.batch_size,
        }
    }

    pub fn find_point(&self, id: PointId) -> Option<&PointBinding> {
        self.points.iter().find(|binding| binding.point.id == id)
    }

    /// Materializes the peer's `RegisterMap` (spec.md §6 "Bound point
    /// lifecycle to the core"): every configured point's register, plus the
    /// three special registers (`stamp_address`/`sequence_address`/
    /// `time_address`) the server's time discipline and sequence counter
    /// need present in the map even though no point is bound to them.
    pub fn build_register_map(&self) -> RegisterMap {
        let mut map = RegisterMap::new(self.endianness);
        for binding in &self.points {
            map.insert(binding.register.clone());
        }
        for (address, kind) in [
            (self.stamp_address, RegisterKind::Stamp),
            (self.sequence_address, RegisterKind::Sequence),
            (self.time_address, RegisterKind::Time),
        ] {
            if let Some(address) = address {
                map.insert(Register {
                    table: Table::HoldingRegisters,
                    address,
                    read_only: false,
                    point: None,
                    kind,
                });
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_peer_config_carries_spec_defaults() {
        let cfg = PeerConfig::new(1);
        assert_eq!(cfg.connect_timeout, Duration::from_secs(1));
        assert_eq!(cfg.request_retries, 0);
        assert_eq!(cfg.request_retry_interval, Duration::from_secs(3));
        assert_eq!(cfg.request_timeout, Duration::from_secs(60));
        assert_eq!(cfg.batch_size, 1);
    }

    #[test]
    fn build_register_map_inserts_special_registers() {
        let mut cfg = PeerConfig::new(1);
        cfg.stamp_address = Some(10);
        cfg.sequence_address = Some(20);
        cfg.time_address = Some(30);
        cfg.points.push(PointBinding {
            point: Point { id: 1, name: "p1".to_owned() },
            register: Register {
                table: Table::HoldingRegisters,
                address: 0,
                read_only: false,
                point: Some(1),
                kind: RegisterKind::Word { signed: false },
            },
        });

        let mut map = cfg.build_register_map();

        assert_eq!(map.point_at(Table::HoldingRegisters, 0), Some(1));
        assert!(map.write_words(Table::HoldingRegisters, 10, &[0, 0], &|_, _| 0).is_ok());
        assert!(map.write_words(Table::HoldingRegisters, 20, &[0], &|_, _| 0).is_ok());
        assert!(map.write_words(Table::HoldingRegisters, 30, &[0, 0, 0, 0], &|_, _| 0).is_ok());
    }

    #[test]
    fn retry_policy_mirrors_peer_config() {
        let mut cfg = PeerConfig::new(1);
        cfg.request_retries = 2;
        cfg.connect_timeout = Duration::from_millis(250);
        let policy = cfg.retry_policy();
        assert_eq!(policy.request_retries, 2);
        assert_eq!(policy.request_timeout, cfg.request_timeout);
        assert_eq!(policy.connect_timeout, cfg.connect_timeout);
    }
}
