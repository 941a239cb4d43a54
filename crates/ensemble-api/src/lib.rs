//! Async client for Ensemble IoT mesh brokers.
//!
//! - **[`Transport`]** -- one persistent websocket connection with
//!   immediate-fail sends and an observable [`ConnectivityState`].
//! - **[`CommandBroker`]** -- turns the unordered inbound frame stream into
//!   awaitable request/reply pairs keyed by correlation id, tracks the
//!   proxy-assigned identity, and reaps expired requests.
//! - **[`wire`]** -- the JSON [`Command`] frame and its typed [`Inbound`]
//!   classification.

pub mod broker;
pub mod connectivity;
pub mod error;
pub mod transport;
pub mod wire;

pub use broker::{BrokerConfig, CommandBroker, ReplyHandle};
pub use connectivity::ConnectivityState;
pub use error::Error;
pub use transport::{FrameHandler, Transport, TransportConfig};
pub use wire::{Args, Command, Follows, Inbound};
