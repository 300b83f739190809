// SPDX-FileCopyrightText: Copyright (c) 2017-2022 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus TCP server: one [`ModbusService`](super::ModbusService) instance
//! per accepted connection, generalized from the teacher's
//! `Service`/`NewService`/`process()` loop to dispatch through
//! [`super::dispatch`] (spec.md §4.6 "Unit-id 0").

use std::io::{self, Error};
use std::net::SocketAddr;
use std::sync::Arc;

use futures::Future;
use futures_util::{future::FutureExt as _, sink::SinkExt as _, stream::StreamExt as _};
use log::{error, trace};
use socket2::{Domain, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use crate::codec;
use crate::frame::{Request, Response, ResponsePdu};

use super::service::NewService;
use super::{dispatch, AdaptService, Service};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    socket_addr: SocketAddr,
}

impl Server {
    #[must_use]
    pub fn new(socket_addr: SocketAddr) -> Self {
        Self { socket_addr }
    }

    /// Runs the accept loop, spawning one [`process`] task per connection.
    pub async fn serve<S>(&self, service: S) -> Result<(), Error>
    where
        S: NewService<Request = Request, Response = Response> + Send + Sync + 'static,
        S::Error: Into<crate::frame::ExceptionResponse>,
        S::Instance: Service<Request = Request, Response = Response> + Send + Sync + 'static,
        <S::Instance as Service>::Error: Into<crate::frame::ExceptionResponse>,
    {
        let service = Arc::new(service);
        let listener = TcpListener::bind(self.socket_addr).await?;

        loop {
            let (stream, _) = listener.accept().await?;
            let framed = Framed::new(stream, codec::tcp::ServerCodec::default());
            let new_service = Arc::clone(&service);

            tokio::spawn(async move {
                let service = match new_service.new_service() {
                    Ok(service) => service,
                    Err(err) => {
                        error!("Failed to build a new connection service: {err}");
                        return;
                    }
                };
                if let Err(err) = process(framed, service).await {
                    error!("Connection terminated: {err}");
                }
            });
        }
    }

    /// Blocks the current thread, serving until `shutdown_signal` resolves.
    pub fn serve_until<S, Sd>(self, service: S, shutdown_signal: Sd)
    where
        S: NewService<Request = Request, Response = Response> + Send + Sync + 'static,
        Sd: Future<Output = ()> + Sync + Send + Unpin + 'static,
        S::Error: Into<crate::frame::ExceptionResponse>,
        S::Instance: Service<Request = Request, Response = Response> + Send + Sync + 'static,
        <S::Instance as Service>::Error: Into<crate::frame::ExceptionResponse>,
    {
        let shutdown_signal = shutdown_signal.fuse();
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_io()
            .build()
            .expect("failed to build the Tokio runtime");

        rt.block_on(async {
            tokio::select! {
                res = self.serve(service) => if let Err(err) = res { error!("error: {err}") },
                () = shutdown_signal => trace!("Shutdown signal received"),
            }
        });
    }

    pub fn serve_forever<S>(self, service: S)
    where
        S: NewService<Request = Request, Response = Response> + Send + Sync + 'static,
        S::Error: Into<crate::frame::ExceptionResponse>,
        S::Instance: Service<Request = Request, Response = Response> + Send + Sync + 'static,
        <S::Instance as Service>::Error: Into<crate::frame::ExceptionResponse>,
    {
        self.serve_until(service, futures::future::pending());
    }
}

/// The per-connection request-response loop. A `None` from [`dispatch`]
/// (broadcast write, spec.md §4.6) skips the reply without closing the
/// connection.
async fn process<S>(mut framed: Framed<TcpStream, codec::tcp::ServerCodec>, service: S) -> io::Result<()>
where
    S: Service<Request = Request, Response = Response> + Send + Sync + 'static,
    S::Error: Into<crate::frame::ExceptionResponse>,
{
    loop {
        let Some(request) = framed.next().await else {
            break;
        };
        let request = request?;
        let hdr = request.hdr;

        let pdu = match request.pdu.0 {
            Ok(req) => match dispatch(&AdaptService(&service), hdr.unit_id, req).await {
                Some(result) => result,
                None => continue,
            },
            Err(exc) => Err(exc),
        };

        framed
            .send(crate::frame::tcp::ResponseAdu {
                hdr,
                pdu: ResponsePdu(pdu),
            })
            .await?;
    }
    Ok(())
}

/// Start TCP listener - configure and open TCP socket
#[allow(unused)]
fn listener(addr: SocketAddr, workers: usize) -> io::Result<TcpListener> {
    let listener = match addr {
        SocketAddr::V4(_) => Socket::new(Domain::IPV4, Type::STREAM, None)?,
        SocketAddr::V6(_) => Socket::new(Domain::IPV6, Type::STREAM, None)?,
    };
    configure_tcp(workers, &listener)?;
    listener.set_reuse_address(true)?;
    listener.bind(&addr.into())?;
    listener.listen(1024)?;
    TcpListener::from_std(listener.into())
}

#[cfg(unix)]
#[allow(unused)]
fn configure_tcp(workers: usize, tcp: &Socket) -> io::Result<()> {
    if workers > 1 {
        tcp.set_reuse_port(true)?;
    }
    Ok(())
}

#[cfg(windows)]
#[allow(unused)]
fn configure_tcp(_workers: usize, _tcp: &Socket) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future;

    #[derive(Clone)]
    struct DummyService {
        response: Response,
    }

    impl Service for DummyService {
        type Request = Request;
        type Response = Response;
        type Error = crate::frame::ExceptionResponse;
        type Future = future::Ready<Result<Response, crate::frame::ExceptionResponse>>;

        fn call(&self, _: Request) -> Self::Future {
            future::ready(Ok(self.response.clone()))
        }
    }

    #[tokio::test]
    async fn service_wrapper() {
        let service = DummyService {
            response: Response::ReadInputRegisters(vec![0x33]),
        };

        let pdu = Request::ReadInputRegisters(0, 1);
        let rsp = service.call(pdu).await.unwrap();

        assert_eq!(rsp, service.response);
    }

    #[tokio::test]
    async fn broadcast_write_is_dispatched_without_a_reply() {
        let service = DummyService {
            response: Response::WriteSingleRegister(0, 0),
        };
        let adapted = AdaptService(&service);
        let reply = dispatch(&adapted, 0, Request::WriteSingleRegister(1, 7)).await;
        assert!(reply.is_none());
    }
}
