/*
[INPUT]:  Stream configuration, bearer token, channel subscriptions
[OUTPUT]: Reconnecting real-time stream with typed routing and reconciled state
[POS]:    WebSocket layer - real-time data streams
[UPDATE]: When adding new event types or changing connection logic
*/

pub mod bounded;
pub mod client;
pub mod connection;
pub mod endpoint;
mod logging;
pub mod message;
pub mod router;
pub mod state;
pub mod stats;
pub mod transport;

pub use bounded::{BoundedList, Identified, Upsert};
pub use client::TradeStream;
pub use connection::ConnectionStatus;
pub use endpoint::{Endpoint, StreamPath};
pub use message::{Envelope, EventKind, InboundEvent};
pub use router::{DispatchReport, HandlerError, HandlerRef, HandlerResult, MessageRouter};
pub use state::{ApplyOutcome, StateReconciler, StreamState};
pub use stats::StreamStats;
pub use transport::{Connector, Link, OutboundFrame, TransportEvent, TungsteniteConnector};
