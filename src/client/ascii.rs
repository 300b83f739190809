// SPDX-License-Identifier: MIT OR Apache-2.0

//! ASCII client connections (spec.md §4.1/§4.5). Structurally identical to
//! [`super::rtu`]; the only difference is which codec/engine the `Context`
//! is backed by.

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::engine::RetryPolicy;
use crate::error::Result;
use crate::frame::{Request, Response};
use crate::slave::{Slave, SlaveContext};

use super::{Client, Context};

/// Connect to no particular Modbus slave device, for sending broadcast
/// messages.
pub fn attach<T>(transport: T, baud_rate: u32, policy: RetryPolicy) -> Context
where
    T: AsyncRead + AsyncWrite + fmt::Debug + Unpin + Send + 'static,
{
    attach_slave(transport, Slave::broadcast(), baud_rate, policy)
}

/// Connect to any kind of Modbus slave device over a serial line framed
/// for ASCII (`:` + hex + CRLF).
pub fn attach_slave<T>(transport: T, slave: Slave, baud_rate: u32, policy: RetryPolicy) -> Context
where
    T: AsyncRead + AsyncWrite + fmt::Debug + Unpin + Send + 'static,
{
    Context::new(Box::new(AsciiClient {
        engine: crate::engine::rtu::AsciiEngine::new(transport, slave, policy, Some(baud_rate)),
    }))
}

struct AsciiClient<T> {
    engine: crate::engine::rtu::AsciiEngine<T>,
}

impl<T> fmt::Debug for AsciiClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsciiClient").finish_non_exhaustive()
    }
}

#[async_trait]
impl<T> Client for AsciiClient<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn call(&self, request: Request) -> Result<Response> {
        self.engine.call(request).await
    }

    fn counters(&self) -> Option<&crate::observability::Counters> {
        Some(self.engine.counters())
    }
}

impl<T> SlaveContext for AsciiClient<T> {
    fn set_slave(&mut self, slave: Slave) {
        self.engine.set_slave(slave);
    }
}
