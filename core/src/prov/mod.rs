//! Provisioning bearers
//!
//! This module provides the PB-GATT provisioning bearer and the contract it
//! shares with other bearer kinds. It includes:
//!
//! - **bearer**: bearer type tags, link status, callbacks and the bearer trait
//! - **transport**: the GATT proxy primitives the bearer consumes
//! - **timer**: the protocol timer service (simulated and tokio backed)
//! - **rx**: receive assembly for segmented provisioning PDUs
//! - **pb_gatt**: the link record and its state machine
//! - **service**: a tokio task driving one bearer through a cloneable handle
//! - **sim**: an in-memory transport and clock for deterministic runs

pub mod bearer;
pub mod pb_gatt;
pub mod rx;
pub mod service;
pub mod sim;
pub mod timer;
pub mod transport;

// Re-export commonly used types
pub use bearer::{
    BearerError, BearerType, LinkEvent, LinkStatus, ProvBearer, ProvBearerCallbacks,
};

pub use pb_gatt::{Link, PbGatt, TimeoutHandle};

pub use rx::{fcs_calc, fcs_check, RxAssembly, RxError, RxProgress};

pub use service::{start_bearer, BearerCommand, BearerHandle, ChannelCallbacks, ServiceError};

pub use sim::{RecordingCallbacks, SimTransport, Simulation, TransportAction};

pub use timer::{ManualClock, ManualTimer, ProtocolTimer, TimerId, TokioTimer};

pub use transport::{ConnHandle, ProxyMsgType, ProxyTransport, TransportError};
