// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus ASCII server: identical in shape to [`super::rtu`], swapping in
//! the `:`-delimited hex/LRC framing (spec.md §2, §4.6).

use std::io::Error;
use std::path::Path;

use futures::{select, Future, FutureExt as _};
use futures_util::{SinkExt as _, StreamExt as _};
use tokio_serial::SerialStream;
use tokio_util::codec::Framed;

use crate::codec;
use crate::frame::{Request, Response, ResponsePdu};

use super::service::NewService;
use super::{dispatch, AdaptService, Service};

#[derive(Debug)]
pub struct Server {
    serial: SerialStream,
}

impl Server {
    pub fn new_from_path<P: AsRef<Path>>(path: P, baud_rate: u32) -> Result<Self, Error> {
        let serial = SerialStream::open(&tokio_serial::new(path.as_ref().to_string_lossy(), baud_rate))?;
        Ok(Self { serial })
    }

    #[must_use]
    pub fn new(serial: SerialStream) -> Self {
        Self { serial }
    }

    pub async fn serve_forever<S>(self, new_service: S)
    where
        S: NewService<Request = Request, Response = Response> + Send + Sync + 'static,
        S::Error: Into<crate::frame::ExceptionResponse>,
        S::Instance: Service<Request = Request, Response = Response> + Send + Sync + 'static,
        <S::Instance as Service>::Error: Into<crate::frame::ExceptionResponse>,
    {
        self.serve_until(new_service, futures::future::pending()).await;
    }

    pub async fn serve_until<S, Sd>(self, new_service: S, shutdown_signal: Sd)
    where
        S: NewService<Request = Request, Response = Response> + Send + Sync + 'static,
        Sd: Future<Output = ()> + Sync + Send + Unpin + 'static,
        S::Error: Into<crate::frame::ExceptionResponse>,
        S::Instance: Service<Request = Request, Response = Response> + Send + Sync + 'static,
        <S::Instance as Service>::Error: Into<crate::frame::ExceptionResponse>,
    {
        let framed = Framed::new(self.serial, codec::ascii::ServerCodec::default());
        let service = match new_service.new_service() {
            Ok(service) => service,
            Err(err) => {
                log::error!("Failed to build the ASCII connection service: {err}");
                return;
            }
        };

        let mut server = Box::pin(process(framed, service)).fuse();
        let mut shutdown = shutdown_signal.fuse();

        select! {
            res = server => if let Err(err) = res {
                log::error!("Serial server terminated: {err}");
            },
            () = shutdown => log::trace!("Shutdown signal received"),
        }
    }
}

async fn process<S>(mut framed: Framed<SerialStream, codec::ascii::ServerCodec>, service: S) -> Result<(), Error>
where
    S: Service<Request = Request, Response = Response> + Send + Sync + 'static,
    S::Error: Into<crate::frame::ExceptionResponse>,
{
    let adapted = AdaptService(&service);
    loop {
        let Some(request) = framed.next().await else {
            break;
        };
        let request = request?;
        let hdr = request.hdr;

        let pdu = match request.pdu.0 {
            Ok(req) => match dispatch(&adapted, hdr.slave_id, req).await {
                Some(result) => result,
                None => continue,
            },
            Err(exc) => Err(exc),
        };

        framed
            .send(crate::frame::ascii::ResponseAdu {
                hdr,
                pdu: ResponsePdu(pdu),
            })
            .await?;
    }
    Ok(())
}
