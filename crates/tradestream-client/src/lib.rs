/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public trade stream client crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod config;
pub mod error;
pub mod types;
pub mod ws;

pub use config::{ListCaps, StreamConfig};
pub use error::{Result, StreamError};

// Re-export all types
pub use types::*;

// Re-export commonly used types from ws
pub use ws::{
    BoundedList,
    ConnectionStatus,
    Connector,
    Endpoint,
    Envelope,
    EventKind,
    HandlerRef,
    InboundEvent,
    StreamPath,
    StreamState,
    StreamStats,
    TradeStream,
};
