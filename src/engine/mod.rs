// SPDX-License-Identifier: MIT OR Apache-2.0

//! The transaction engine (spec.md §4.3): pairs outgoing requests with
//! incoming responses, honoring per-peer timeouts, retries and a batch-size
//! concurrency cap. [`engine::tcp`] and [`engine::rtu`] each wrap a
//! `Framed<T, Codec>` the way the teacher's `service::tcp::Client`/
//! `service::rtu::Client` already do, generalized with the retry/timeout/
//! batch machinery those teacher types lack.

#[cfg(feature = "tcp")]
pub(crate) mod tcp;

#[cfg(any(feature = "rtu", feature = "ascii"))]
pub(crate) mod rtu;

use std::time::Duration;

/// Per-peer engine tuning (spec.md §4.3/§5/§6). Defaults match the spec's
/// stated defaults exactly.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Per-attempt timeout while dialing a transport (spec.md §5/§6).
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub request_retries: u32,
    pub retry_interval: Duration,
    /// Maximum outstanding requests per peer. `0` means "effectively
    /// unlimited".
    pub batch_size: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(60),
            request_retries: 0,
            retry_interval: Duration::from_secs(3),
            batch_size: 1,
        }
    }
}

impl RetryPolicy {
    pub(crate) fn batch_permits(&self) -> usize {
        if self.batch_size == 0 {
            tokio::sync::Semaphore::MAX_PERMITS
        } else {
            self.batch_size
        }
    }
}

/// Constructs the per-framing request ADU for a serial transport (RTU or
/// ASCII). Both framings share the same strict-FIFO, single-slot
/// correlation rule (spec.md §4.1/§4.3), so one generic engine
/// (`engine::rtu::SerialEngine`) serves both, parameterized over this trait
/// rather than duplicating the whole transaction loop per framing.
#[cfg(any(feature = "rtu", feature = "ascii"))]
pub(crate) trait SerialRequestAdu: Send + 'static {
    fn new(
        slave_id: crate::slave::SlaveId,
        pdu: crate::frame::RequestPdu,
        disconnect: bool,
    ) -> Self;
}

#[cfg(any(feature = "rtu", feature = "ascii"))]
pub(crate) trait SerialResponseAdu: Send + 'static {
    fn slave_id(&self) -> crate::slave::SlaveId;
    fn into_pdu(self) -> crate::frame::ResponsePdu;
}
