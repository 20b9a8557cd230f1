//! Real-time relay: tracks which users hold a live socket, routes typed
//! frames between them and pushes server-side notifications.
//!
//! Delivery is best-effort. A frame for a user without a live connection is
//! dropped; durable storage belongs to the [`store::MessageStore`]
//! collaborator, not to the relay.

pub mod config;
pub mod connection;
pub mod delivery;
pub mod handshake;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod router;
pub mod session;
pub mod store;

pub use config::GatewayConfig;
pub use delivery::{Delivery, DeliveryEngine};
pub use handshake::{Identity, TokenVerifier};
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use relay::Relay;
pub use store::{MemoryStore, MessageStore};
