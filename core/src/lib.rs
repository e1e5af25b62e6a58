// PB-GATT — Bluetooth Mesh provisioning over GATT
//
// A single-link provisioning bearer riding on a GATT connection that the
// proxy layer has already set up. The provisioning protocol above it and the
// proxy/GATT plumbing below it are collaborators reached through traits.

pub mod config;
pub mod prov;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::{
    BearerConfig, ConfigError, MAX_PROTOCOL_TIMEOUT_SECS, MAX_PROV_PDU_LEN, MIN_PDU_LEN,
    PROTOCOL_TIMEOUT_SECS,
};

pub use prov::{
    start_bearer, BearerError, BearerHandle, BearerType, ChannelCallbacks, ConnHandle, LinkEvent,
    LinkStatus, ManualClock, ManualTimer, PbGatt, ProtocolTimer, ProvBearer, ProvBearerCallbacks,
    ProxyMsgType, ProxyTransport, RecordingCallbacks, ServiceError, SimTransport, Simulation,
    TimerId, TokioTimer, TransportAction, TransportError,
};
