//! Pivot Hub Liaison
//!
//! Bridges the shared state to a home-automation hub over a
//! publish/subscribe channel:
//!
//! - [`topics`] - topic layout under a configurable prefix
//! - [`payload`] - JSON status payloads
//! - [`transport`] - the broker-agnostic transport contract
//! - [`bridge`] - the publish loop and inbound command dispatch
//!
//! The bridge is read-mostly: it copies [`pivot_common::shared`]
//! snapshots at its own cadence and pushes an immediate status on every
//! state transition. Inbound messages map onto the shared-state command
//! surface; the wire-level client behind [`transport::HubTransport`] is
//! supplied by the embedding binary.

pub mod bridge;
pub mod payload;
pub mod topics;
pub mod transport;

pub use bridge::HubBridge;
pub use payload::AxisStatusPayload;
pub use topics::{TopicKind, TopicSet};
pub use transport::{BridgeError, HubTransport, InboundMessage, MemoryTransport, TraceTransport};
