// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};

use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::error::{Error, Result};
use crate::frame::{Request, Response, ResponsePdu};
use crate::observability::Counters;
use crate::slave::{Slave, SlaveContext, SlaveId};
use crate::transport::rtu::SilenceGuard;

use super::{RetryPolicy, SerialRequestAdu, SerialResponseAdu};

/// Transaction engine shared by the RTU and ASCII framings: strict FIFO,
/// one outstanding request at a time (spec.md §4.1 "Concurrency"), with
/// retry/timeout on top of the teacher's single-attempt
/// `service::rtu::Client::call`.
pub(crate) struct SerialEngine<T, C, ReqAdu> {
    framed: Mutex<Framed<T, C>>,
    slave: AtomicU8,
    policy: RetryPolicy,
    silence: Option<Mutex<SilenceGuard>>,
    counters: Counters,
    _request: PhantomData<fn() -> ReqAdu>,
}

impl<T, C, ReqAdu> SerialEngine<T, C, ReqAdu>
where
    T: AsyncRead + AsyncWrite + Unpin,
    C: Decoder<Error = io::Error> + Encoder<ReqAdu, Error = io::Error> + Default,
    C::Item: SerialResponseAdu,
    ReqAdu: SerialRequestAdu,
{
    pub(crate) fn new(
        transport: T,
        slave: Slave,
        policy: RetryPolicy,
        baud_rate: Option<u32>,
    ) -> Self {
        Self {
            framed: Mutex::new(Framed::new(transport, C::default())),
            slave: AtomicU8::new(slave.into()),
            policy,
            silence: baud_rate.map(|baud| Mutex::new(SilenceGuard::new(baud))),
            counters: Counters::default(),
            _request: PhantomData,
        }
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.counters
    }

    pub(crate) async fn call(&self, req: Request) -> Result<Response> {
        let disconnect = req == Request::Disconnect;
        let slave_id = self.slave.load(Ordering::Relaxed);
        self.counters.record_submitted();

        let mut attempts_left = self.policy.request_retries;
        loop {
            let req_adu = ReqAdu::new(slave_id, req.clone().into(), disconnect);
            match self.attempt(slave_id, req_adu).await {
                Ok(response) => {
                    self.counters.record_succeeded();
                    return Ok(response);
                }
                Err(AttemptError::Exception(exc)) => {
                    self.counters.record_failed();
                    return Err(Error::RequestFailed(exc));
                }
                Err(err) => {
                    if attempts_left == 0 {
                        log::warn!("Request failed after exhausting retries: {err}");
                        self.counters.record_failed();
                        return Err(Error::RetriesExhausted);
                    }
                    attempts_left -= 1;
                    self.counters.record_retry();
                    log::debug!(
                        "Request failed ({err}), retrying in {:?} ({} attempt(s) left)",
                        self.policy.retry_interval,
                        attempts_left
                    );
                    tokio::time::sleep(self.policy.retry_interval).await;
                }
            }
        }
    }

    async fn attempt(
        &self,
        slave_id: SlaveId,
        req_adu: ReqAdu,
    ) -> std::result::Result<Response, AttemptError> {
        if let Some(silence) = &self.silence {
            silence.lock().await.wait().await;
        }

        let mut framed = self.framed.lock().await;
        framed.read_buffer_mut().clear();
        framed
            .send(req_adu)
            .await
            .map_err(|err| AttemptError::Io(err.to_string()))?;
        if let Some(silence) = &self.silence {
            silence.lock().await.mark_activity();
        }

        let receive = async {
            let resp_adu = framed
                .next()
                .await
                .ok_or_else(|| "connection closed".to_owned())?
                .map_err(|err| err.to_string())?;
            if resp_adu.slave_id() != slave_id {
                // A mismatch on a strictly half-duplex serial line is fatal
                // to the current transaction (spec.md §4.3 point 4).
                return Err(format!(
                    "mismatched slave id in response: expected {slave_id}, got {}",
                    resp_adu.slave_id()
                ));
            }
            Ok(resp_adu.into_pdu())
        };

        let outcome = tokio::time::timeout(self.policy.request_timeout, receive).await;
        if let Some(silence) = &self.silence {
            silence.lock().await.mark_activity();
        }

        match outcome {
            Ok(Ok(ResponsePdu(Ok(resp)))) => Ok(resp),
            Ok(Ok(ResponsePdu(Err(exc)))) => Err(AttemptError::Exception(exc)),
            Ok(Err(msg)) => Err(AttemptError::Io(msg)),
            Err(_) => Err(AttemptError::Timeout),
        }
    }
}

impl<T, C, ReqAdu> SlaveContext for SerialEngine<T, C, ReqAdu> {
    fn set_slave(&mut self, slave: Slave) {
        *self.slave.get_mut() = slave.into();
    }
}

enum AttemptError {
    Io(String),
    Timeout,
    Exception(crate::frame::ExceptionResponse),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Io(msg) => write!(f, "{msg}"),
            AttemptError::Timeout => write!(f, "request timed out"),
            AttemptError::Exception(exc) => write!(f, "{exc}"),
        }
    }
}

#[cfg(feature = "rtu")]
impl SerialRequestAdu for crate::frame::rtu::RequestAdu {
    fn new(slave_id: SlaveId, pdu: crate::frame::RequestPdu, disconnect: bool) -> Self {
        Self {
            hdr: crate::frame::rtu::Header { slave_id },
            pdu,
            disconnect,
        }
    }
}

#[cfg(feature = "rtu")]
impl SerialResponseAdu for crate::frame::rtu::ResponseAdu {
    fn slave_id(&self) -> SlaveId {
        self.hdr.slave_id
    }

    fn into_pdu(self) -> ResponsePdu {
        self.pdu
    }
}

#[cfg(feature = "ascii")]
impl SerialRequestAdu for crate::frame::ascii::RequestAdu {
    fn new(slave_id: SlaveId, pdu: crate::frame::RequestPdu, disconnect: bool) -> Self {
        Self {
            hdr: crate::frame::ascii::Header { slave_id },
            pdu,
            disconnect,
        }
    }
}

#[cfg(feature = "ascii")]
impl SerialResponseAdu for crate::frame::ascii::ResponseAdu {
    fn slave_id(&self) -> SlaveId {
        self.hdr.slave_id
    }

    fn into_pdu(self) -> ResponsePdu {
        self.pdu
    }
}

#[cfg(feature = "rtu")]
pub(crate) type RtuEngine<T> =
    SerialEngine<T, crate::codec::rtu::ClientCodec, crate::frame::rtu::RequestAdu>;

#[cfg(feature = "ascii")]
pub(crate) type AsciiEngine<T> =
    SerialEngine<T, crate::codec::ascii::ClientCodec, crate::frame::ascii::RequestAdu>;
