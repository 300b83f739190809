// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP client connections (spec.md §4.5 "Connect"). Generalizes the
//! teacher's single-address `connect`/`connect_slave` into multi-address
//! fallback with a per-attempt connect timeout.

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::engine::RetryPolicy;
use crate::error::{Error, Result};
use crate::frame::{Request, Response};
use crate::slave::{Slave, SlaveContext};

use super::{Client, Context};

/// Establish a direct connection to a Modbus TCP coupler.
pub async fn connect(socket_addr: SocketAddr) -> Result<Context> {
    connect_slave(socket_addr, Slave::tcp_device(), RetryPolicy::default()).await
}

/// Connect to a physical, broadcast, or custom Modbus device, probably
/// through a Modbus TCP gateway forwarding messages to/from the
/// corresponding slave device.
pub async fn connect_slave(socket_addr: SocketAddr, slave: Slave, policy: RetryPolicy) -> Result<Context> {
    connect_any(&[socket_addr], slave, policy).await
}

/// Dials each address in order until one connects, applying `policy`'s
/// `connect_timeout` as the per-attempt connect timeout (spec.md §4.5
/// "Connect", §5/§6). Returns `ConnectFailed` only once every address has
/// failed.
pub async fn connect_any(addresses: &[SocketAddr], slave: Slave, policy: RetryPolicy) -> Result<Context> {
    let mut last_err = None;
    for addr in addresses {
        match tokio::time::timeout(policy.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok(attach_slave(stream, slave, policy)),
            Ok(Err(err)) => last_err = Some(err.to_string()),
            Err(_) => last_err = Some(format!("connect to {addr} timed out")),
        }
    }
    Err(Error::ConnectFailed(
        last_err.unwrap_or_else(|| "no addresses given".to_owned()),
    ))
}

/// Attach a new client context to a direct transport connection.
pub fn attach<T>(transport: T, policy: RetryPolicy) -> Context
where
    T: AsyncRead + AsyncWrite + Send + fmt::Debug + Unpin + 'static,
{
    attach_slave(transport, Slave::tcp_device(), policy)
}

/// Attach a new client context to a transport connection, addressing
/// `slave` on every request.
pub fn attach_slave<T>(transport: T, slave: Slave, policy: RetryPolicy) -> Context
where
    T: AsyncRead + AsyncWrite + Send + fmt::Debug + Unpin + 'static,
{
    Context::new(Box::new(TcpClient {
        engine: crate::engine::tcp::Engine::new(transport, slave, policy),
    }))
}

struct TcpClient<T> {
    engine: crate::engine::tcp::Engine<T>,
}

impl<T> fmt::Debug for TcpClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpClient").finish_non_exhaustive()
    }
}

#[async_trait]
impl<T> Client for TcpClient<T>
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

impl<T> SlaveContext for TcpClient<T> {
    fn set_slave(&mut self, slave: Slave) {
        self.engine.set_slave(slave);
    }
}
