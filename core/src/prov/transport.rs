//! Transport collaborator boundary
//!
//! The GATT proxy layer below the bearer owns the physical connection. It
//! reports connect, data and disconnect to the bearer and offers send,
//! disconnect, visibility and receive-buffer primitives in return.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Handle of an established GATT connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnHandle(pub u16);

impl From<u16> for ConnHandle {
    fn from(handle: u16) -> Self {
        Self(handle)
    }
}

impl fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Proxy PDU message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyMsgType {
    /// Network PDU (0x00)
    Network = 0x00,
    /// Mesh beacon (0x01)
    Beacon = 0x01,
    /// Proxy configuration (0x02)
    Config = 0x02,
    /// Provisioning PDU (0x03)
    Prov = 0x03,
}

impl ProxyMsgType {
    /// Get the numeric message type
    pub fn value(&self) -> u8 {
        *self as u8
    }
}

/// Errors reported by the transport collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),
    #[error("Unknown connection {0}")]
    UnknownConnection(ConnHandle),
}

/// Primitives the bearer consumes from the GATT proxy layer
#[cfg_attr(test, mockall::automock)]
pub trait ProxyTransport: Send {
    /// Send a proxy PDU of the given type on a connection
    fn send(
        &mut self,
        conn: ConnHandle,
        msg_type: ProxyMsgType,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Tear down a connection
    fn disconnect(&mut self, conn: ConnHandle) -> Result<(), TransportError>;

    /// Expose the provisioning service so a provisioner can connect
    fn enable_prov_visibility(&mut self);

    /// Restart advertising with the current visibility settings
    fn refresh_advertising(&mut self);

    /// Take a fresh receive buffer from the proxy buffer pool
    fn alloc_rx_buf(&mut self) -> Vec<u8>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_msg_type_values() {
        assert_eq!(ProxyMsgType::Network.value(), 0x00);
        assert_eq!(ProxyMsgType::Beacon.value(), 0x01);
        assert_eq!(ProxyMsgType::Config.value(), 0x02);
        assert_eq!(ProxyMsgType::Prov.value(), 0x03);
    }

    #[test]
    fn test_conn_handle_zero_is_a_handle() {
        let conn = ConnHandle::from(0);
        assert_eq!(conn, ConnHandle(0));
        assert_eq!(conn.to_string(), "0");
    }
}
