// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport-level concerns that sit below the codec: anything the codec
//! itself does not express, such as the RTU inter-frame silence timing.
//!
//! A transport is simply "anything `AsyncRead + AsyncWrite + Unpin`" — the
//! teacher never introduces a dedicated trait for it, and neither do we;
//! `tokio_util::codec::Framed` is built directly on top of the raw I/O
//! handle in `client`/`server`.

#[cfg(feature = "rtu")]
pub mod rtu;
