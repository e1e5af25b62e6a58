//! In-memory bearer harness
//!
//! [`SimTransport`] stands in for the GATT proxy layer and records what the
//! bearer asked of it. [`RecordingCallbacks`] collects link events.
//! [`Simulation`] ties a bearer to a [`ManualClock`] so timeouts can be
//! driven deterministically.

use crate::config::{BearerConfig, MAX_PROV_PDU_LEN};
use crate::prov::bearer::{
    BearerError, BearerType, LinkEvent, LinkStatus, ProvBearer, ProvBearerCallbacks,
};
use crate::prov::pb_gatt::PbGatt;
use crate::prov::timer::{ManualClock, ManualTimer};
use crate::prov::transport::{ConnHandle, ProxyMsgType, ProxyTransport, TransportError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Something the bearer asked of the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportAction {
    Sent {
        conn: ConnHandle,
        msg_type: ProxyMsgType,
        payload: Vec<u8>,
    },
    Disconnected(ConnHandle),
    VisibilityEnabled,
    AdvertisingRefreshed,
}

impl fmt::Display for TransportAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportAction::Sent {
                conn,
                msg_type,
                payload,
            } => write!(
                f,
                "send conn {} type {:#04x}: {}",
                conn,
                msg_type.value(),
                hex::encode(payload)
            ),
            TransportAction::Disconnected(conn) => write!(f, "disconnect conn {}", conn),
            TransportAction::VisibilityEnabled => write!(f, "provisioning visibility enabled"),
            TransportAction::AdvertisingRefreshed => write!(f, "advertising refreshed"),
        }
    }
}

#[derive(Debug, Default)]
struct TransportLog {
    actions: Vec<TransportAction>,
    buffers_allocated: usize,
    fail_sends: bool,
}

/// Proxy transport that records every request
#[derive(Debug, Clone)]
pub struct SimTransport {
    log: Arc<Mutex<TransportLog>>,
    rx_buf_size: usize,
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new(MAX_PROV_PDU_LEN)
    }
}

impl SimTransport {
    /// Create a transport handing out receive buffers of `rx_buf_size` bytes
    pub fn new(rx_buf_size: usize) -> Self {
        Self {
            log: Arc::new(Mutex::new(TransportLog::default())),
            rx_buf_size,
        }
    }

    /// Recorded actions, oldest first
    pub fn actions(&self) -> Vec<TransportAction> {
        self.log.lock().actions.clone()
    }

    /// Remove and return recorded actions
    pub fn take_actions(&self) -> Vec<TransportAction> {
        std::mem::take(&mut self.log.lock().actions)
    }

    /// Payloads sent on `conn`
    pub fn sent_to(&self, conn: ConnHandle) -> Vec<Vec<u8>> {
        self.log
            .lock()
            .actions
            .iter()
            .filter_map(|action| match action {
                TransportAction::Sent {
                    conn: sent_conn,
                    payload,
                    ..
                } if *sent_conn == conn => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of receive buffers taken from the pool
    pub fn buffers_allocated(&self) -> usize {
        self.log.lock().buffers_allocated
    }

    /// Make subsequent sends fail
    pub fn set_fail_sends(&self, fail: bool) {
        self.log.lock().fail_sends = fail;
    }
}

impl ProxyTransport for SimTransport {
    fn send(
        &mut self,
        conn: ConnHandle,
        msg_type: ProxyMsgType,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut log = self.log.lock();
        if log.fail_sends {
            return Err(TransportError::SendFailed(format!("conn {}", conn)));
        }
        log.actions.push(TransportAction::Sent {
            conn,
            msg_type,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn disconnect(&mut self, conn: ConnHandle) -> Result<(), TransportError> {
        self.log
            .lock()
            .actions
            .push(TransportAction::Disconnected(conn));
        Ok(())
    }

    fn enable_prov_visibility(&mut self) {
        self.log
            .lock()
            .actions
            .push(TransportAction::VisibilityEnabled);
    }

    fn refresh_advertising(&mut self) {
        self.log
            .lock()
            .actions
            .push(TransportAction::AdvertisingRefreshed);
    }

    fn alloc_rx_buf(&mut self) -> Vec<u8> {
        self.log.lock().buffers_allocated += 1;
        Vec::with_capacity(self.rx_buf_size)
    }
}

/// Callback set that records link events into a shared log
#[derive(Debug, Clone, Default)]
pub struct RecordingCallbacks {
    events: Arc<Mutex<Vec<LinkEvent>>>,
}

impl RecordingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events, oldest first
    pub fn events(&self) -> Vec<LinkEvent> {
        self.events.lock().clone()
    }

    /// Remove and return recorded events
    pub fn take_events(&self) -> Vec<LinkEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Whether a bearer still holds this set
    pub fn is_attached(&self) -> bool {
        Arc::strong_count(&self.events) > 1
    }

    /// Number of close notifications seen
    pub fn closed_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, LinkEvent::Closed { .. }))
            .count()
    }
}

impl ProvBearerCallbacks for RecordingCallbacks {
    fn link_opened(&mut self, bearer: BearerType) {
        self.events.lock().push(LinkEvent::Opened { bearer });
    }

    fn link_closed(&mut self, bearer: BearerType, status: LinkStatus) {
        self.events.lock().push(LinkEvent::Closed { bearer, status });
    }

    fn recv(&mut self, bearer: BearerType, pdu: &[u8]) {
        self.events.lock().push(LinkEvent::Received {
            bearer,
            pdu: pdu.to_vec(),
        });
    }
}

/// A PB-GATT bearer on simulated time
pub struct Simulation {
    bearer: PbGatt<SimTransport, ManualTimer>,
    transport: SimTransport,
    clock: ManualClock,
}

impl Simulation {
    /// Create a simulation with an idle bearer
    pub fn new(config: BearerConfig, transport: SimTransport) -> Result<Self, BearerError> {
        let timer = ManualTimer::new();
        let clock = timer.clock();
        let bearer = PbGatt::new(config, transport.clone(), timer)?;
        Ok(Self {
            bearer,
            transport,
            clock,
        })
    }

    /// The bearer under simulation
    pub fn bearer(&self) -> &PbGatt<SimTransport, ManualTimer> {
        &self.bearer
    }

    /// Mutable access to the bearer
    pub fn bearer_mut(&mut self) -> &mut PbGatt<SimTransport, ManualTimer> {
        &mut self.bearer
    }

    /// Transport log shared with the bearer
    pub fn transport(&self) -> &SimTransport {
        &self.transport
    }

    /// Simulated clock
    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Install a fresh recording callback set, returning it for inspection
    pub fn accept(&mut self) -> Result<RecordingCallbacks, BearerError> {
        let callbacks = RecordingCallbacks::new();
        self.bearer.link_accept(Box::new(callbacks.clone()))?;
        Ok(callbacks)
    }

    /// Advance simulated time, dispatching an expiry to the bearer.
    ///
    /// Returns true if the protocol timer fired.
    pub fn advance(&mut self, by: Duration) -> bool {
        match self.clock.advance(by) {
            Some(id) => {
                self.bearer.on_timeout(id);
                true
            }
            None => false,
        }
    }
}
