// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io;

/// Errors that can occur while framing, decoding, dispatching or
/// transacting a Modbus request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A framing or checksum violation (bad CRC/LRC, bad protocol-id,
    /// wrong unit-id on a response, truncated read).
    #[error("frame error: {0}")]
    Frame(String),

    /// A syntactically valid frame whose contents are illegal for the
    /// function code it carries.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The referenced address is outside a registered view, or a write
    /// crosses two incompatible views.
    #[error("address error: {0}")]
    Address(String),

    /// A value outside the allowed domain for its field (e.g. a coil
    /// value other than 0x0000/0xFF00).
    #[error("value error: {0}")]
    Value(String),

    /// The underlying transport failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A transaction's deadline expired before a matching response
    /// arrived.
    #[error("request timed out")]
    Timeout,

    /// No transport could be established for a peer.
    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    /// A request ended in a Modbus exception reply after dispatch.
    #[error("request failed: {0}")]
    RequestFailed(#[from] crate::frame::ExceptionResponse),

    /// A transaction exhausted its configured retries.
    #[error("request failed after exhausting retries")]
    RetriesExhausted,
}

impl Error {
    pub(crate) fn frame(msg: impl Into<String>) -> Self {
        Self::Frame(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub(crate) fn address(msg: impl Into<String>) -> Self {
        Self::Address(msg.into())
    }

    pub(crate) fn value(msg: impl Into<String>) -> Self {
        Self::Value(msg.into())
    }
}

/// The exception codes a server may return alongside `function | 0x80`.
pub type Result<T> = std::result::Result<T, Error>;
