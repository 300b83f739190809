// SPDX-License-Identifier: MIT OR Apache-2.0

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "ascii")]
pub mod ascii;

pub(crate) mod pdu;

pub use pdu::mask_write;
