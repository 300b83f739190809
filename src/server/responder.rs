// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `Responder`/`Sink` seam (spec.md §4.6): a peer's live process values
//! live entirely in the host application, not in this crate. [`Responder`]
//! pulls the current value for a read (or for the Bits/Masked merge rule on
//! a write); [`Sink`] pushes a decoded write out and a [`PointValue`] to any
//! bound point.
//!
//! Grounded on the teacher's `server::service::{Service, NewService}`
//! blanket-impl plumbing, generalized here from "one service call" into
//! "one responder pull plus one sink push" per request.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::frame::{Address, Coil, Exception, ExceptionResponse, FunctionCode, Quantity, Request, Response, Word};
use crate::register::value::{self, merge_masked};
use crate::register::{PointId, PointValue, RegisterMap, Table};

use super::service::Service;

/// Pulls the live value backing a register (spec.md §4.6).
#[async_trait]
pub trait Responder: Send + Sync {
    async fn read_coils(&self, addr: Address, qty: Quantity) -> Result<Vec<Coil>, Exception>;
    async fn read_discrete_inputs(&self, addr: Address, qty: Quantity) -> Result<Vec<Coil>, Exception>;
    async fn read_holding_registers(&self, addr: Address, qty: Quantity) -> Result<Vec<Word>, Exception>;
    async fn read_input_registers(&self, addr: Address, qty: Quantity) -> Result<Vec<Word>, Exception>;
}

/// Pushes a decoded write to the host, both as raw wire words/coils and as
/// the [`PointValue`] bound to the affected register, if any (spec.md §4.6).
/// `publish`'s `timestamp` is either the peer's client-supplied stamp
/// register, reconstructed against the server clock, or the server clock
/// itself when no fresh stamp is available (spec.md §4.6 "Time discipline").
#[async_trait]
pub trait Sink: Send + Sync {
    async fn write_coils(&self, addr: Address, values: &[Coil]) -> Result<(), Exception>;
    async fn write_registers(&self, addr: Address, values: &[Word]) -> Result<(), Exception>;
    async fn publish(&self, point: PointId, value: PointValue, timestamp: SystemTime);
}

/// Tracks stamp-register freshness and derives the timestamp attached to
/// each published point value (spec.md §4.6 "Time discipline"). Absent a
/// configured `stamp_address`, every timestamp is simply the server clock.
#[derive(Debug)]
struct TimeDiscipline {
    stamp_tick: Duration,
    stamp_address: Option<Address>,
    last_stamp: Mutex<Option<(value::Stamp, Instant)>>,
}

impl TimeDiscipline {
    fn new(stamp_tick: Duration, stamp_address: Option<Address>) -> Self {
        Self {
            stamp_tick,
            stamp_address,
            last_stamp: Mutex::new(None),
        }
    }

    /// Records a write landing on the configured stamp register so its
    /// value can anchor subsequent timestamps.
    async fn observe_write(&self, addr: Address, words: &[Word]) {
        if self.stamp_address != Some(addr) || words.len() < 2 {
            return;
        }
        let stamp = value::Stamp::decode([words[0], words[1]]);
        *self.last_stamp.lock().await = Some((stamp, Instant::now()));
    }

    /// The timestamp to attach to a point value published right now.
    async fn timestamp(&self) -> SystemTime {
        let now = SystemTime::now();
        if self.stamp_address.is_none() {
            return now;
        }
        match *self.last_stamp.lock().await {
            Some((stamp, received_at)) if received_at.elapsed() <= self.stamp_tick => {
                let now_since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or_default();
                UNIX_EPOCH + stamp.reconstruct(now_since_epoch)
            }
            Some(_) => {
                log::warn!("Stamp register update is older than stamp_tick; falling back to server clock");
                now
            }
            None => now,
        }
    }
}

/// The per-peer [`Service`] that answers every function code this crate
/// supports against a [`Responder`]/[`Sink`] pair and a shared
/// [`RegisterMap`] (spec.md §4.6).
pub struct ModbusService<R, S> {
    responder: Arc<R>,
    sink: Arc<S>,
    registers: Arc<Mutex<RegisterMap>>,
    time: Arc<TimeDiscipline>,
}

impl<R, S> Clone for ModbusService<R, S> {
    fn clone(&self) -> Self {
        Self {
            responder: Arc::clone(&self.responder),
            sink: Arc::clone(&self.sink),
            registers: Arc::clone(&self.registers),
            time: Arc::clone(&self.time),
        }
    }
}

impl<R, S> ModbusService<R, S>
where
    R: Responder + 'static,
    S: Sink + 'static,
{
    pub fn new(responder: Arc<R>, sink: Arc<S>, registers: Arc<Mutex<RegisterMap>>) -> Self {
        Self::with_time_discipline(responder, sink, registers, Duration::from_millis(100), None)
    }

    /// Like [`Self::new`], but also configuring the stamp-register freshness
    /// window that governs each published value's timestamp (spec.md §4.6
    /// "Time discipline", §6 `stamp_tick`/`stamp_address`).
    pub fn with_time_discipline(
        responder: Arc<R>,
        sink: Arc<S>,
        registers: Arc<Mutex<RegisterMap>>,
        stamp_tick: Duration,
        stamp_address: Option<Address>,
    ) -> Self {
        Self {
            responder,
            sink,
            registers,
            time: Arc::new(TimeDiscipline::new(stamp_tick, stamp_address)),
        }
    }

    async fn handle(&self, request: Request) -> Result<Response, ExceptionResponse> {
        let function = request.function_code();
        let exception = |exception: Exception| ExceptionResponse { function, exception };

        match request {
            Request::ReadCoils(addr, qty) => {
                let mut values = self.responder.read_coils(addr, qty).await.map_err(exception)?;
                self.registers.lock().await.read_bits(Table::Coils, addr, &mut values);
                Ok(Response::ReadCoils(values))
            }
            Request::ReadDiscreteInputs(addr, qty) => {
                let mut values = self
                    .responder
                    .read_discrete_inputs(addr, qty)
                    .await
                    .map_err(exception)?;
                self.registers.lock().await.read_bits(Table::DiscreteInputs, addr, &mut values);
                Ok(Response::ReadDiscreteInputs(values))
            }
            Request::ReadHoldingRegisters(addr, qty) => {
                let mut values = self
                    .responder
                    .read_holding_registers(addr, qty)
                    .await
                    .map_err(exception)?;
                self.registers
                    .lock()
                    .await
                    .read_words(Table::HoldingRegisters, addr, &mut values);
                Ok(Response::ReadHoldingRegisters(values))
            }
            Request::ReadInputRegisters(addr, qty) => {
                let mut values = self
                    .responder
                    .read_input_registers(addr, qty)
                    .await
                    .map_err(exception)?;
                self.registers
                    .lock()
                    .await
                    .read_words(Table::InputRegisters, addr, &mut values);
                Ok(Response::ReadInputRegisters(values))
            }
            Request::WriteSingleCoil(addr, coil) => {
                self.sink.write_coils(addr, &[coil]).await.map_err(exception)?;
                self.publish_coil(addr, coil).await;
                Ok(Response::WriteSingleCoil(addr, coil))
            }
            Request::WriteMultipleCoils(addr, coils) => {
                let qty = coils.len() as Quantity;
                self.sink.write_coils(addr, &coils).await.map_err(exception)?;
                for (offset, coil) in coils.iter().enumerate() {
                    self.publish_coil(addr.wrapping_add(offset as u16), *coil).await;
                }
                Ok(Response::WriteMultipleCoils(addr, qty))
            }
            Request::WriteSingleRegister(addr, word) => {
                self.write_registers(addr, &[word], function).await?;
                Ok(Response::WriteSingleRegister(addr, word))
            }
            Request::WriteMultipleRegisters(addr, words) => {
                let qty = words.len() as Quantity;
                self.write_registers(addr, &words, function).await?;
                Ok(Response::WriteMultipleRegisters(addr, qty))
            }
            Request::MaskWriteRegister(addr, and_mask, or_mask) => {
                let current = self
                    .responder
                    .read_holding_registers(addr, 1)
                    .await
                    .map_err(exception)?;
                let merged = merge_masked(current[0], or_mask, !and_mask);
                self.write_registers(addr, &[merged], function).await?;
                Ok(Response::MaskWriteRegister(addr, and_mask, or_mask))
            }
            Request::ReadWriteMultipleRegisters(read_addr, read_qty, write_addr, write_data) => {
                self.write_registers(write_addr, &write_data, function).await?;
                let mut values = self
                    .responder
                    .read_holding_registers(read_addr, read_qty)
                    .await
                    .map_err(exception)?;
                self.registers
                    .lock()
                    .await
                    .read_words(Table::HoldingRegisters, read_addr, &mut values);
                Ok(Response::ReadWriteMultipleRegisters(values))
            }
            Request::Custom(code, _) => Err(ExceptionResponse {
                function: code,
                exception: Exception::IllegalFunction,
            }),
            Request::Disconnect => Err(exception(Exception::IllegalFunction)),
        }
    }

    /// Writes a span of holding registers: pre-fetches the live word at every
    /// touched address (consumed only by `Bits`/`Masked` registers, spec.md
    /// §4.4 "Bit-level updates"), applies the write to the register map, then
    /// pushes the raw words and every affected point to the sink.
    async fn write_registers(
        &self,
        addr: Address,
        words: &[Word],
        function: FunctionCode,
    ) -> Result<(), ExceptionResponse> {
        let exception = |exception: Exception| ExceptionResponse { function, exception };

        let mut live = HashMap::with_capacity(words.len());
        for offset in 0..words.len() {
            let address = addr.wrapping_add(offset as u16);
            let word = self
                .responder
                .read_holding_registers(address, 1)
                .await
                .map_err(exception)?;
            live.insert(address, word[0]);
        }
        let current = |_: Table, address: Address| live.get(&address).copied().unwrap_or(0);

        let decoded = {
            let mut registers = self.registers.lock().await;
            registers
                .write_words(Table::HoldingRegisters, addr, words, &current)
                .map_err(|err| match err {
                    crate::error::Error::Value(_) => exception(Exception::IllegalDataValue),
                    _ => exception(Exception::IllegalDataAddress),
                })?
        };

        self.sink.write_registers(addr, words).await.map_err(exception)?;
        self.time.observe_write(addr, words).await;

        if !decoded.is_empty() {
            let timestamp = self.time.timestamp().await;
            for (point, value) in decoded {
                if let Some(point) = point {
                    self.sink.publish(point, value, timestamp).await;
                }
            }
        }
        Ok(())
    }

    async fn publish_coil(&self, address: Address, coil: Coil) {
        let point = {
            let registers = self.registers.lock().await;
            registers.point_at(Table::Coils, address)
        };
        if let Some(point) = point {
            let timestamp = self.time.timestamp().await;
            self.sink.publish(point, PointValue::Discrete(coil), timestamp).await;
        }
    }
}

impl<R, S> Service for ModbusService<R, S>
where
    R: Responder + 'static,
    S: Sink + 'static,
{
    type Request = Request;
    type Response = Response;
    type Error = ExceptionResponse;
    type Future = Pin<Box<dyn Future<Output = Result<Response, ExceptionResponse>> + Send + Sync>>;

    fn call(&self, req: Request) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.handle(req).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::{Register, RegisterKind};
    use std::sync::Mutex as StdMutex;

    struct MemoryPeer {
        coils: StdMutex<Vec<bool>>,
        holding: StdMutex<Vec<Word>>,
        published: StdMutex<Vec<(PointId, PointValue, std::time::SystemTime)>>,
    }

    impl MemoryPeer {
        fn new(holding: Vec<Word>) -> Self {
            Self {
                coils: StdMutex::new(vec![false; 16]),
                holding: StdMutex::new(holding),
                published: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Responder for MemoryPeer {
        async fn read_coils(&self, addr: Address, qty: Quantity) -> Result<Vec<Coil>, Exception> {
            let coils = self.coils.lock().unwrap();
            Ok((0..qty)
                .map(|i| coils[(addr + i) as usize])
                .collect())
        }

        async fn read_discrete_inputs(&self, addr: Address, qty: Quantity) -> Result<Vec<Coil>, Exception> {
            self.read_coils(addr, qty).await
        }

        async fn read_holding_registers(&self, addr: Address, qty: Quantity) -> Result<Vec<Word>, Exception> {
            let holding = self.holding.lock().unwrap();
            Ok((0..qty)
                .map(|i| *holding.get((addr + i) as usize).unwrap_or(&0))
                .collect())
        }

        async fn read_input_registers(&self, addr: Address, qty: Quantity) -> Result<Vec<Word>, Exception> {
            self.read_holding_registers(addr, qty).await
        }
    }

    #[async_trait]
    impl Sink for MemoryPeer {
        async fn write_coils(&self, addr: Address, values: &[Coil]) -> Result<(), Exception> {
            let mut coils = self.coils.lock().unwrap();
            for (i, value) in values.iter().enumerate() {
                coils[(addr as usize) + i] = *value;
            }
            Ok(())
        }

        async fn write_registers(&self, addr: Address, values: &[Word]) -> Result<(), Exception> {
            let mut holding = self.holding.lock().unwrap();
            for (i, value) in values.iter().enumerate() {
                holding[(addr as usize) + i] = *value;
            }
            Ok(())
        }

        async fn publish(&self, point: PointId, value: PointValue, timestamp: std::time::SystemTime) {
            self.published.lock().unwrap().push((point, value, timestamp));
        }
    }

    fn service_with(peer: Arc<MemoryPeer>, registers: RegisterMap) -> ModbusService<MemoryPeer, MemoryPeer> {
        ModbusService::new(Arc::clone(&peer), peer, Arc::new(Mutex::new(registers)))
    }

    #[tokio::test]
    async fn mask_write_register_preserves_unowned_bits() {
        let peer = Arc::new(MemoryPeer::new(vec![0x1234]));
        let mut registers = RegisterMap::new(Default::default());
        registers.insert(Register {
            table: Table::HoldingRegisters,
            address: 0,
            read_only: false,
            point: Some(7),
            kind: RegisterKind::Word { signed: false },
        });
        let service = service_with(Arc::clone(&peer), registers);

        let response = service
            .handle(Request::MaskWriteRegister(0, 0xFF0F, 0x00A0))
            .await
            .unwrap();

        assert_eq!(response, Response::MaskWriteRegister(0, 0xFF0F, 0x00A0));
        assert_eq!(peer.holding.lock().unwrap()[0], 0x12A4);
        let published = peer.published.lock().unwrap();
        assert_eq!((published[0].0, published[0].1.clone()), (7, PointValue::Word(0x12A4)));
    }

    #[tokio::test]
    async fn write_to_unconfigured_register_is_illegal_address() {
        let peer = Arc::new(MemoryPeer::new(vec![0; 4]));
        let registers = RegisterMap::new(Default::default());
        let service = service_with(Arc::clone(&peer), registers);

        let err = service
            .handle(Request::WriteSingleRegister(0, 42))
            .await
            .unwrap_err();

        assert_eq!(err.exception, Exception::IllegalDataAddress);
    }

    #[tokio::test]
    async fn partial_multi_register_write_is_illegal_data_value() {
        let peer = Arc::new(MemoryPeer::new(vec![0, 0]));
        let mut registers = RegisterMap::new(Default::default());
        registers.insert(Register {
            table: Table::HoldingRegisters,
            address: 0,
            read_only: false,
            point: None,
            kind: RegisterKind::Float { middle_endian: false },
        });
        let service = service_with(Arc::clone(&peer), registers);

        let err = service
            .handle(Request::WriteSingleRegister(0, 0x40A0))
            .await
            .unwrap_err();

        assert_eq!(err.exception, Exception::IllegalDataValue);
    }

    #[tokio::test]
    async fn read_holding_registers_round_trips_through_responder() {
        let peer = Arc::new(MemoryPeer::new(vec![1, 2, 3]));
        let registers = RegisterMap::new(Default::default());
        let service = service_with(Arc::clone(&peer), registers);

        let response = service
            .handle(Request::ReadHoldingRegisters(0, 3))
            .await
            .unwrap();

        assert_eq!(response, Response::ReadHoldingRegisters(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn sequence_register_post_increments_on_read_through_service() {
        let peer = Arc::new(MemoryPeer::new(vec![0xFFFF]));
        let mut registers = RegisterMap::new(Default::default());
        registers.insert(Register {
            table: Table::HoldingRegisters,
            address: 0,
            read_only: true,
            point: None,
            kind: RegisterKind::Sequence,
        });
        let service = service_with(Arc::clone(&peer), registers);

        let first = service.handle(Request::ReadHoldingRegisters(0, 1)).await.unwrap();
        let second = service.handle(Request::ReadHoldingRegisters(0, 1)).await.unwrap();

        assert_eq!(first, Response::ReadHoldingRegisters(vec![0]));
        assert_eq!(second, Response::ReadHoldingRegisters(vec![1]));
    }

    #[tokio::test]
    async fn stale_stamp_falls_back_to_server_clock() {
        let peer = Arc::new(MemoryPeer::new(vec![0; 4]));
        let mut registers = RegisterMap::new(Default::default());
        registers.insert(Register {
            table: Table::HoldingRegisters,
            address: 0,
            read_only: false,
            point: None,
            kind: RegisterKind::Stamp,
        });
        registers.insert(Register {
            table: Table::HoldingRegisters,
            address: 2,
            read_only: false,
            point: Some(1),
            kind: RegisterKind::Word { signed: false },
        });
        let service = ModbusService::with_time_discipline(
            Arc::clone(&peer),
            Arc::clone(&peer),
            Arc::new(Mutex::new(registers)),
            Duration::from_millis(0),
            Some(0),
        );

        service
            .handle(Request::WriteMultipleRegisters(0, vec![90, 0]))
            .await
            .unwrap();
        service
            .handle(Request::WriteSingleRegister(2, 42))
            .await
            .unwrap();

        let published = peer.published.lock().unwrap();
        let (_, _, timestamp) = published.last().unwrap();
        let drift = SystemTime::now().duration_since(*timestamp).unwrap_or_default();
        assert!(drift < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn fresh_stamp_anchors_published_timestamp() {
        let peer = Arc::new(MemoryPeer::new(vec![0; 4]));
        let mut registers = RegisterMap::new(Default::default());
        registers.insert(Register {
            table: Table::HoldingRegisters,
            address: 0,
            read_only: false,
            point: None,
            kind: RegisterKind::Stamp,
        });
        registers.insert(Register {
            table: Table::HoldingRegisters,
            address: 2,
            read_only: false,
            point: Some(1),
            kind: RegisterKind::Word { signed: false },
        });
        let service = ModbusService::with_time_discipline(
            Arc::clone(&peer),
            Arc::clone(&peer),
            Arc::new(Mutex::new(registers)),
            Duration::from_secs(30),
            Some(0),
        );

        service
            .handle(Request::WriteMultipleRegisters(0, vec![90, 0]))
            .await
            .unwrap();
        service
            .handle(Request::WriteSingleRegister(2, 42))
            .await
            .unwrap();

        let published = peer.published.lock().unwrap();
        let (_, _, timestamp) = published.last().unwrap();
        let since_epoch = timestamp.duration_since(UNIX_EPOCH).unwrap();
        assert_eq!(since_epoch.as_secs() % 3600, 90);
    }
}
