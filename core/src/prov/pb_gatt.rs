//! PB-GATT provisioning bearer
//!
//! Carries provisioning PDUs over a GATT connection that the proxy layer has
//! already established. There is a single link: it is IDLE until the proxy
//! reports a connection and ACTIVE until the link is closed, the peer
//! disconnects or the protocol timer expires after a period of silence.
//!
//! While ACTIVE exactly one protocol timeout is armed; traffic in either
//! direction re-arms it. Every path back to IDLE cancels the timer before
//! dropping the callbacks and replaces the receive buffer.

use crate::config::BearerConfig;
use crate::prov::bearer::{BearerError, BearerType, LinkStatus, ProvBearer, ProvBearerCallbacks};
use crate::prov::rx::RxAssembly;
use crate::prov::timer::{ProtocolTimer, TimerId};
use crate::prov::transport::{ConnHandle, ProxyMsgType, ProxyTransport};
use tracing::{debug, error, warn};

/// Owned handle for the armed protocol timeout
#[derive(Debug, PartialEq, Eq)]
pub struct TimeoutHandle {
    id: TimerId,
}

impl TimeoutHandle {
    /// Timer id this handle names
    pub fn id(&self) -> TimerId {
        self.id
    }
}

/// The provisioning link record
pub struct Link {
    conn: Option<ConnHandle>,
    callbacks: Option<Box<dyn ProvBearerCallbacks>>,
    rx: RxAssembly,
    timeout: Option<TimeoutHandle>,
}

impl Link {
    fn new(rx_buf: Vec<u8>) -> Self {
        Self {
            conn: None,
            callbacks: None,
            rx: RxAssembly::new(rx_buf),
            timeout: None,
        }
    }

    /// Connection the link is bound to, `None` when idle
    pub fn conn(&self) -> Option<ConnHandle> {
        self.conn
    }

    /// Check if the link is active
    pub fn is_active(&self) -> bool {
        self.conn.is_some()
    }

    /// Check if a callback set is installed
    pub fn has_callbacks(&self) -> bool {
        self.callbacks.is_some()
    }

    /// Receive-assembly bookkeeping
    pub fn rx(&self) -> &RxAssembly {
        &self.rx
    }

    /// Armed protocol timeout, if any
    pub fn timeout(&self) -> Option<&TimeoutHandle> {
        self.timeout.as_ref()
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("conn", &self.conn)
            .field("callbacks", &self.callbacks.is_some())
            .field("rx", &self.rx)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// PB-GATT bearer over a proxy transport and a protocol timer
pub struct PbGatt<T: ProxyTransport, S: ProtocolTimer> {
    config: BearerConfig,
    transport: T,
    timer: S,
    link: Link,
    next_timer_id: u64,
}

impl<T: ProxyTransport, S: ProtocolTimer> PbGatt<T, S> {
    /// Create an idle bearer bound to `timer`
    pub fn new(config: BearerConfig, mut transport: T, timer: S) -> Result<Self, BearerError> {
        config.validate()?;
        let link = Link::new(transport.alloc_rx_buf());
        Ok(Self {
            config,
            transport,
            timer,
            link,
            next_timer_id: 0,
        })
    }

    /// Get bearer configuration
    pub fn config(&self) -> &BearerConfig {
        &self.config
    }

    /// Current link record
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Underlying proxy transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the proxy transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Protocol timer
    pub fn timer(&self) -> &S {
        &self.timer
    }

    /// The proxy layer established a connection to a provisioner
    pub fn open(&mut self, conn: ConnHandle) -> Result<(), BearerError> {
        debug!("conn {}", conn);

        if self.link.conn.is_some() {
            return Err(BearerError::Busy);
        }
        if self.link.callbacks.is_none() {
            warn!("Connection {} before link accept", conn);
            return Err(BearerError::NotAccepted);
        }

        self.link.conn = Some(conn);
        self.arm_timeout();

        if let Some(callbacks) = self.link.callbacks.as_mut() {
            callbacks.link_opened(BearerType::Gatt);
        }

        Ok(())
    }

    /// The proxy layer delivered a provisioning PDU
    pub fn recv(&mut self, conn: ConnHandle, pdu: &[u8]) -> Result<(), BearerError> {
        debug!("{} bytes: {}", pdu.len(), hex::encode(pdu));

        if self.link.conn != Some(conn) || self.link.callbacks.is_none() {
            warn!("Data for unexpected connection");
            return Err(BearerError::NotConnected);
        }

        if pdu.len() < self.config.min_pdu_len {
            warn!("Too short provisioning packet (len {})", pdu.len());
            return Err(BearerError::InvalidInput {
                len: pdu.len(),
                min: self.config.min_pdu_len,
            });
        }

        self.arm_timeout();

        if let Some(callbacks) = self.link.callbacks.as_mut() {
            callbacks.recv(BearerType::Gatt, pdu);
        }

        Ok(())
    }

    /// The connection carrying the link went away
    pub fn close(&mut self, conn: ConnHandle) -> Result<(), BearerError> {
        debug!("conn {}", conn);

        if self.link.conn != Some(conn) {
            error!("Not connected");
            return Err(BearerError::NotConnected);
        }

        if let Some(callbacks) = self.link.callbacks.as_mut() {
            callbacks.link_closed(BearerType::Gatt, LinkStatus::Success);
        }

        self.reset_state();

        Ok(())
    }

    /// The protocol timer expired.
    ///
    /// Fires for any id other than the one currently armed are stale and
    /// ignored.
    pub fn on_timeout(&mut self, id: TimerId) {
        match self.link.timeout {
            Some(ref handle) if handle.id == id => {}
            _ => {
                debug!("Ignoring stale protocol timer {}", id);
                return;
            }
        }

        debug!("Protocol timeout");

        // Taken before the reset clears the link
        let callbacks = self.link.callbacks.take();

        if let Some(conn) = self.link.conn {
            if let Err(e) = self.transport.disconnect(conn) {
                warn!("Failed to disconnect {} on timeout: {}", conn, e);
            }
        }

        self.reset_state();

        if let Some(mut callbacks) = callbacks {
            callbacks.link_closed(BearerType::Gatt, LinkStatus::Timeout);
        }
    }

    fn arm_timeout(&mut self) {
        self.next_timer_id = self.next_timer_id.wrapping_add(1);
        let id = TimerId(self.next_timer_id);
        self.timer.arm(id, self.config.protocol_timeout());
        self.link.timeout = Some(TimeoutHandle { id });
    }

    fn reset_state(&mut self) {
        if let Some(handle) = self.link.timeout.take() {
            self.timer.cancel(handle.id);
        }

        self.link.conn = None;
        self.link.callbacks = None;
        self.link.rx = RxAssembly::new(self.transport.alloc_rx_buf());
    }
}

impl<T: ProxyTransport, S: ProtocolTimer> ProvBearer for PbGatt<T, S> {
    fn bearer_type(&self) -> BearerType {
        BearerType::Gatt
    }

    fn link_accept(&mut self, callbacks: Box<dyn ProvBearerCallbacks>) -> Result<(), BearerError> {
        self.transport.enable_prov_visibility();
        self.transport.refresh_advertising();

        if self.link.callbacks.is_some() {
            debug!("Replacing link callbacks");
        }
        self.link.callbacks = Some(callbacks);

        Ok(())
    }

    fn send(&mut self, pdu: &[u8]) -> Result<(), BearerError> {
        let conn = self.link.conn.ok_or(BearerError::NotConnected)?;

        self.arm_timeout();

        self.transport.send(conn, ProxyMsgType::Prov, pdu)?;
        Ok(())
    }

    fn clear_tx(&mut self) {
        // Sends go straight to the proxy; nothing is queued here
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prov::timer::{ManualClock, ManualTimer};
    use crate::prov::transport::{MockProxyTransport, TransportError};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Counters {
        opened: Arc<Mutex<u32>>,
        closed: Arc<Mutex<Vec<LinkStatus>>>,
        received: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl ProvBearerCallbacks for Counters {
        fn link_opened(&mut self, _bearer: BearerType) {
            *self.opened.lock() += 1;
        }

        fn link_closed(&mut self, _bearer: BearerType, status: LinkStatus) {
            self.closed.lock().push(status);
        }

        fn recv(&mut self, _bearer: BearerType, pdu: &[u8]) {
            self.received.lock().push(pdu.to_vec());
        }
    }

    fn permissive_transport() -> MockProxyTransport {
        let mut transport = MockProxyTransport::new();
        transport
            .expect_alloc_rx_buf()
            .returning(|| Vec::with_capacity(65));
        transport.expect_enable_prov_visibility().return_const(());
        transport.expect_refresh_advertising().return_const(());
        transport
    }

    fn bearer_with(
        transport: MockProxyTransport,
    ) -> (PbGatt<MockProxyTransport, ManualTimer>, ManualClock) {
        let timer = ManualTimer::new();
        let clock = timer.clock();
        let bearer =
            PbGatt::new(BearerConfig::default(), transport, timer).expect("Valid bearer");
        (bearer, clock)
    }

    #[test]
    fn test_accept_enables_visibility_and_advertising() {
        let mut transport = MockProxyTransport::new();
        transport
            .expect_alloc_rx_buf()
            .times(1)
            .returning(|| Vec::with_capacity(65));
        transport
            .expect_enable_prov_visibility()
            .times(1)
            .return_const(());
        transport
            .expect_refresh_advertising()
            .times(1)
            .return_const(());

        let (mut bearer, _clock) = bearer_with(transport);
        bearer
            .link_accept(Box::new(Counters::default()))
            .expect("Accept");

        assert!(bearer.link().has_callbacks());
        assert!(!bearer.link().is_active());
        assert_eq!(bearer.bearer_type(), BearerType::Gatt);
    }

    #[test]
    fn test_open_without_accept_rejected() {
        let (mut bearer, clock) = bearer_with(permissive_transport());

        assert_eq!(bearer.open(ConnHandle(1)), Err(BearerError::NotAccepted));
        assert!(!bearer.link().is_active());
        assert_eq!(clock.outstanding(), 0);
    }

    #[test]
    fn test_send_forwards_as_provisioning_pdu() {
        let mut transport = permissive_transport();
        transport
            .expect_send()
            .withf(|conn, msg_type, payload| {
                *conn == ConnHandle(5) && *msg_type == ProxyMsgType::Prov && payload.to_vec() == vec![0x03, 0x00]
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let (mut bearer, _clock) = bearer_with(transport);
        bearer
            .link_accept(Box::new(Counters::default()))
            .expect("Accept");
        bearer.open(ConnHandle(5)).expect("Open");

        bearer.send(&[0x03, 0x00]).expect("Send");
    }

    #[test]
    fn test_send_when_idle_does_not_touch_transport_or_timer() {
        let (mut bearer, clock) = bearer_with(permissive_transport());

        assert_eq!(bearer.send(&[0x01]), Err(BearerError::NotConnected));
        assert_eq!(clock.outstanding(), 0);
    }

    #[test]
    fn test_send_failure_surfaced_without_retry() {
        let mut transport = permissive_transport();
        transport
            .expect_send()
            .times(1)
            .returning(|_, _, _| Err(TransportError::SendFailed("no buffers".to_string())));

        let (mut bearer, _clock) = bearer_with(transport);
        bearer
            .link_accept(Box::new(Counters::default()))
            .expect("Accept");
        bearer.open(ConnHandle(2)).expect("Open");

        let result = bearer.send(&[0x01]);
        assert_eq!(
            result,
            Err(BearerError::Transport(TransportError::SendFailed(
                "no buffers".to_string()
            )))
        );
        assert!(bearer.link().is_active());
    }

    #[test]
    fn test_timeout_disconnects_then_reports() {
        let mut transport = permissive_transport();
        transport
            .expect_disconnect()
            .withf(|conn| *conn == ConnHandle(5))
            .times(1)
            .returning(|_| Err(TransportError::DisconnectFailed("gone".to_string())));

        let (mut bearer, clock) = bearer_with(transport);
        let counters = Counters::default();
        bearer
            .link_accept(Box::new(counters.clone()))
            .expect("Accept");
        bearer.open(ConnHandle(5)).expect("Open");

        let id = clock
            .advance(Duration::from_secs(60))
            .expect("Timer should expire");
        bearer.on_timeout(id);

        assert!(!bearer.link().is_active());
        assert!(!bearer.link().has_callbacks());
        assert_eq!(*counters.closed.lock(), vec![LinkStatus::Timeout]);
    }

    #[test]
    fn test_stale_timer_id_ignored() {
        let (mut bearer, clock) = bearer_with(permissive_transport());
        let counters = Counters::default();
        bearer
            .link_accept(Box::new(counters.clone()))
            .expect("Accept");
        bearer.open(ConnHandle(5)).expect("Open");

        let first = bearer.link().timeout().map(|h| h.id()).expect("Armed");
        bearer.recv(ConnHandle(5), &[0x00]).expect("Recv");

        bearer.on_timeout(first);

        assert!(bearer.link().is_active());
        assert!(counters.closed.lock().is_empty());
        assert_eq!(clock.outstanding(), 1);
    }

    #[test]
    fn test_close_cancels_timer_and_replaces_buffer() {
        let mut transport = MockProxyTransport::new();
        transport
            .expect_alloc_rx_buf()
            .times(2)
            .returning(|| Vec::with_capacity(65));
        transport.expect_enable_prov_visibility().return_const(());
        transport.expect_refresh_advertising().return_const(());

        let (mut bearer, clock) = bearer_with(transport);
        let counters = Counters::default();
        bearer
            .link_accept(Box::new(counters.clone()))
            .expect("Accept");
        bearer.open(ConnHandle(9)).expect("Open");
        assert_eq!(clock.outstanding(), 1);

        bearer.close(ConnHandle(9)).expect("Close");

        assert_eq!(clock.outstanding(), 0);
        assert!(bearer.link().timeout().is_none());
        assert!(bearer.link().rx().is_idle());
        assert_eq!(*counters.closed.lock(), vec![LinkStatus::Success]);
    }

    #[test]
    fn test_clear_tx_is_noop() {
        let (mut bearer, clock) = bearer_with(permissive_transport());
        bearer
            .link_accept(Box::new(Counters::default()))
            .expect("Accept");
        bearer.open(ConnHandle(1)).expect("Open");

        bearer.clear_tx();

        assert_eq!(bearer.link().conn(), Some(ConnHandle(1)));
        assert_eq!(clock.outstanding(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let transport = MockProxyTransport::new();
        let result = PbGatt::new(
            BearerConfig::default().with_timeout(0),
            transport,
            ManualTimer::new(),
        );
        assert!(matches!(result, Err(BearerError::Config(_))));
    }
}
