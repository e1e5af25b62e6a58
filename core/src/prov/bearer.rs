//! Provisioning bearer contract
//!
//! Every provisioning bearer kind (advertising, GATT) exposes the same four
//! capabilities to the provisioning layer: a type tag, link acceptance, PDU
//! send and pending-send cancellation. Link lifecycle and inbound data flow
//! back up through a [`ProvBearerCallbacks`] set handed over on accept.

use crate::config::ConfigError;
use crate::prov::transport::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Provisioning bearer kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BearerType {
    /// PB-ADV, advertising based
    Adv,
    /// PB-GATT, connection based
    Gatt,
}

impl BearerType {
    /// Bit value used in provisioning bearer masks
    pub fn value(&self) -> u16 {
        match self {
            BearerType::Adv => 1 << 0,
            BearerType::Gatt => 1 << 1,
        }
    }
}

impl fmt::Display for BearerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BearerType::Adv => write!(f, "PB-ADV"),
            BearerType::Gatt => write!(f, "PB-GATT"),
        }
    }
}

/// Reason reported when a link closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    /// Closed on request
    Success,
    /// Closed by the protocol timeout
    Timeout,
    /// Closed after a failure
    Fail,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Success => write!(f, "success"),
            LinkStatus::Timeout => write!(f, "timeout"),
            LinkStatus::Fail => write!(f, "fail"),
        }
    }
}

/// Link activity as seen by the provisioning layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkEvent {
    Opened {
        bearer: BearerType,
    },
    Closed {
        bearer: BearerType,
        status: LinkStatus,
    },
    Received {
        bearer: BearerType,
        pdu: Vec<u8>,
    },
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::Opened { bearer } => write!(f, "{} link opened", bearer),
            LinkEvent::Closed { bearer, status } => {
                write!(f, "{} link closed ({})", bearer, status)
            }
            LinkEvent::Received { bearer, pdu } => {
                write!(f, "{} received {}", bearer, hex::encode(pdu))
            }
        }
    }
}

/// Errors for bearer operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BearerError {
    #[error("Link busy")]
    Busy,
    #[error("Not connected")]
    NotConnected,
    #[error("Too short provisioning packet (len {len}, min {min})")]
    InvalidInput { len: usize, min: usize },
    #[error("No link accepted")]
    NotAccepted,
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Event sink installed by the provisioning layer on link accept.
///
/// The bearer owns the set from `link_accept` until the link resets, so
/// nothing can reach it once the link it belonged to is gone.
pub trait ProvBearerCallbacks: Send {
    /// The peer opened a link
    fn link_opened(&mut self, bearer: BearerType);

    /// The link closed, either on request or by timeout
    fn link_closed(&mut self, bearer: BearerType, status: LinkStatus);

    /// A provisioning PDU arrived on the link
    fn recv(&mut self, bearer: BearerType, pdu: &[u8]);
}

/// Capabilities shared by all provisioning bearers
pub trait ProvBearer {
    /// Bearer type tag
    fn bearer_type(&self) -> BearerType;

    /// Make the bearer available for an incoming link and install the callbacks for it
    fn link_accept(&mut self, callbacks: Box<dyn ProvBearerCallbacks>) -> Result<(), BearerError>;

    /// Send a provisioning PDU on the active link
    fn send(&mut self, pdu: &[u8]) -> Result<(), BearerError>;

    /// Drop any in-flight send
    fn clear_tx(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_type_values_are_distinct_bits() {
        assert_eq!(BearerType::Adv.value(), 0x0001);
        assert_eq!(BearerType::Gatt.value(), 0x0002);
        assert_eq!(BearerType::Adv.value() & BearerType::Gatt.value(), 0);
    }

    #[test]
    fn test_link_event_display() {
        let event = LinkEvent::Received {
            bearer: BearerType::Gatt,
            pdu: vec![0x00, 0x05],
        };
        assert_eq!(event.to_string(), "PB-GATT received 0005");

        let closed = LinkEvent::Closed {
            bearer: BearerType::Gatt,
            status: LinkStatus::Timeout,
        };
        assert_eq!(closed.to_string(), "PB-GATT link closed (timeout)");
    }

    #[test]
    fn test_transport_error_converts() {
        let err: BearerError = TransportError::SendFailed("queue full".to_string()).into();
        assert!(matches!(err, BearerError::Transport(_)));
        assert_eq!(err.to_string(), "Transport error: Send failed: queue full");
    }
}
