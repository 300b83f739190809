// SPDX-License-Identifier: MIT OR Apache-2.0

//! The server façade (spec.md §4.6): one [`Responder`]/[`Sink`] pair per
//! peer answers reads/writes against a register map, dispatched through the
//! teacher's existing `Service`/`NewService` blanket-impl pattern
//! (`server::service`) generalized from "one service call" to "one
//! responder call plus one sink call" per request.

#[cfg(feature = "ascii")]
pub mod ascii;

#[cfg(feature = "rtu")]
pub mod rtu;

mod responder;

mod service;

#[cfg(feature = "tcp")]
pub mod tcp;

pub use responder::{ModbusService, Responder, Sink};
pub use service::{NewService, Service};

use crate::frame::{ExceptionResponse, Request};
use crate::slave::{Slave, SlaveId};

/// Whether a request only ever produces data rather than mutating state
/// (spec.md §4.6 "Unit-id 0"): `ReadWriteMultipleRegisters` counts as a
/// read for this purpose since it always returns a response.
fn is_read_like(request: &Request) -> bool {
    matches!(
        request,
        Request::ReadCoils(..)
            | Request::ReadDiscreteInputs(..)
            | Request::ReadInputRegisters(..)
            | Request::ReadHoldingRegisters(..)
            | Request::ReadWriteMultipleRegisters(..)
    )
}

/// Applies the broadcast (unit-id `0`) rule resolved for the spec's unit-id
/// Open Question: illegal on reads (so a gateway still gets a well-formed
/// exception to relay), accepted-but-unanswered on writes.
///
/// Returns `None` when no reply should be sent at all.
pub(crate) async fn dispatch<S>(
    service: &S,
    unit_id: SlaveId,
    request: Request,
) -> Option<Result<crate::frame::Response, ExceptionResponse>>
where
    S: Service<Request = Request, Response = crate::frame::Response, Error = ExceptionResponse>,
{
    let function = request.function_code();
    if Slave::from(unit_id).is_broadcast() {
        if is_read_like(&request) {
            return Some(Err(ExceptionResponse {
                function,
                exception: crate::frame::Exception::IllegalFunction,
            }));
        }
        // Broadcast write: still executed against the register map, but no
        // reply is transmitted.
        let _ = service.call(request).await;
        return None;
    }
    Some(service.call(request).await)
}

/// Adapts a [`Service`] whose `Error` merely converts `Into<ExceptionResponse>`
/// to one whose `Error` IS `ExceptionResponse`, as [`dispatch`] requires.
/// [`ModbusService`] already satisfies this directly; this exists for a host's
/// own `Service` implementations that prefer a narrower error type.
pub(crate) struct AdaptService<'a, S>(pub(crate) &'a S);

impl<S> Service for AdaptService<'_, S>
where
    S: Service<Request = Request, Response = crate::frame::Response> + Send + Sync,
    S::Error: Into<ExceptionResponse>,
{
    type Request = Request;
    type Response = crate::frame::Response;
    type Error = ExceptionResponse;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<crate::frame::Response, ExceptionResponse>> + Send + Sync>,
    >;

    fn call(&self, req: Request) -> Self::Future {
        let fut = self.0.call(req);
        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Exception, Response};
    use futures::future;

    #[derive(Clone)]
    struct EchoService;

    impl Service for EchoService {
        type Request = Request;
        type Response = Response;
        type Error = ExceptionResponse;
        type Future = future::Ready<Result<Response, ExceptionResponse>>;

        fn call(&self, request: Request) -> Self::Future {
            future::ready(match request {
                Request::ReadHoldingRegisters(_, qty) => Ok(Response::ReadHoldingRegisters(vec![0; qty as usize])),
                Request::WriteSingleRegister(addr, word) => Ok(Response::WriteSingleRegister(addr, word)),
                other => Err(ExceptionResponse {
                    function: other.function_code(),
                    exception: Exception::IllegalFunction,
                }),
            })
        }
    }

    #[tokio::test]
    async fn broadcast_read_is_illegal() {
        let service = EchoService;
        let reply = dispatch(&service, 0, Request::ReadHoldingRegisters(0, 1)).await;
        assert!(matches!(
            reply,
            Some(Err(ExceptionResponse {
                exception: Exception::IllegalFunction,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn broadcast_write_produces_no_reply() {
        let service = EchoService;
        let reply = dispatch(&service, 0, Request::WriteSingleRegister(1, 42)).await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn addressed_write_replies_normally() {
        let service = EchoService;
        let reply = dispatch(&service, 1, Request::WriteSingleRegister(1, 42)).await;
        assert_eq!(reply, Some(Ok(Response::WriteSingleRegister(1, 42))));
    }
}
