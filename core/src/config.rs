//! Bearer configuration
//!
//! Tunables for the PB-GATT link: the protocol timeout that tears down a
//! silent link and the minimum length of an inbound provisioning packet.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default protocol timeout in seconds
pub const PROTOCOL_TIMEOUT_SECS: u64 = 60;

/// Longest protocol timeout accepted, one day
pub const MAX_PROTOCOL_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Shortest provisioning packet accepted from the peer (the PDU type octet)
pub const MIN_PDU_LEN: usize = 1;

/// Largest provisioning PDU (Public Key: type octet + 64-byte key)
pub const MAX_PROV_PDU_LEN: usize = 65;

/// Errors for bearer configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid protocol timeout")]
    InvalidTimeout,
    #[error("Invalid minimum PDU length: {0}")]
    InvalidMinPduLen(usize),
}

/// PB-GATT bearer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BearerConfig {
    /// Link is torn down after this many seconds without traffic (default 60)
    pub protocol_timeout_secs: u64,
    /// Inbound packets shorter than this are rejected (default 1)
    pub min_pdu_len: usize,
}

impl Default for BearerConfig {
    fn default() -> Self {
        Self {
            protocol_timeout_secs: PROTOCOL_TIMEOUT_SECS,
            min_pdu_len: MIN_PDU_LEN,
        }
    }
}

impl BearerConfig {
    /// Set the protocol timeout in seconds
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.protocol_timeout_secs = secs;
        self
    }

    /// Set the minimum inbound packet length
    pub fn with_min_pdu_len(mut self, len: usize) -> Self {
        self.min_pdu_len = len;
        self
    }

    /// Protocol timeout as a duration
    pub fn protocol_timeout(&self) -> Duration {
        Duration::from_secs(self.protocol_timeout_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol_timeout_secs == 0
            || self.protocol_timeout_secs > MAX_PROTOCOL_TIMEOUT_SECS
        {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.min_pdu_len == 0 || self.min_pdu_len > MAX_PROV_PDU_LEN {
            return Err(ConfigError::InvalidMinPduLen(self.min_pdu_len));
        }
        Ok(())
    }
}
