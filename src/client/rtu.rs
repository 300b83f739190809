// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU client connections (spec.md §4.1/§4.5).

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

/// Connect to any kind of Modbus slave device over a serial line already
/// framed for RTU. `baud_rate` sizes the inter-frame silence (spec.md §4.1
/// "Silence / turn-around").
pub fn attach_slave<T>(transport: T, slave: Slave, baud_rate: u32, policy: RetryPolicy) -> Context
where
    T: AsyncRead + AsyncWrite + fmt::Debug + Unpin + Send + 'static,
{
    Context::new(Box::new(RtuClient {
        engine: crate::engine::rtu::RtuEngine::new(transport, slave, policy, Some(baud_rate)),
    }))
}

struct RtuClient<T> {
    engine: crate::engine::rtu::RtuEngine<T>,
}

impl<T> fmt::Debug for RtuClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtuClient").finish_non_exhaustive()
    }
}

#[async_trait]
impl<T> Client for RtuClient<T>
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

impl<T> SlaveContext for RtuClient<T> {
    fn set_slave(&mut self, slave: Slave) {
        self.engine.set_slave(slave);
    }
}
