//! Connection handling, protocol dispatch, business logic and the durable
//! outbound worker for the charging-pile gateway.
//!
//! `gw-protocol` turns bytes into frames; `gw-repo` and `gw-session` persist
//! state; this crate is the layer that wires the two together around a live
//! TCP connection (see [`conn::ConnHandler`], [`router::ProtoRouter`],
//! [`handlers::BusinessHandlers`], [`outbound_worker::OutboundWorker`]).

pub mod conn;
mod dedup;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod outbound_worker;
pub mod registry;
pub mod router;

pub use conn::{ConnConfig, ConnHandler, ConnState};
pub use error::{ConnError, OutboundError};
pub use handlers::BusinessHandlers;
pub use metrics::Metrics;
pub use outbound_worker::{OutboundConfig, OutboundWorker};
pub use registry::ConnRegistry;
pub use router::ProtoRouter;
