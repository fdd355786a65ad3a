//! Broker-agnostic transport contract.
//!
//! The bridge never talks to a wire-level client directly; the embedding
//! binary supplies whatever transport fits the deployment. Discovery and
//! auto-registration metadata belong to that client, not here.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

/// One inbound message from the hub.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Bridge-side errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The publish/subscribe channel as the bridge sees it.
pub trait HubTransport: Send {
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), BridgeError>;

    /// Wait up to `timeout` for one inbound message. `Ok(None)` on a
    /// quiet channel; the bridge polls again on its next pass.
    fn poll(&mut self, timeout: Duration) -> Result<Option<InboundMessage>, BridgeError>;
}

/// Logs outbound traffic and never receives; lets the daemon run without
/// a broker while keeping the publish path exercised.
pub struct TraceTransport;

impl HubTransport for TraceTransport {
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), BridgeError> {
        info!(topic, retain, payload = %String::from_utf8_lossy(payload), "publish");
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<InboundMessage>, BridgeError> {
        std::thread::sleep(timeout);
        Ok(None)
    }
}

#[derive(Default)]
struct MemoryInner {
    published: Vec<(String, Vec<u8>, bool)>,
    inbound: VecDeque<InboundMessage>,
}

/// In-memory transport for tests: cloneable handle, shared buffers.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an inbound message as if the hub had published it.
    pub fn inject(&self, topic: &str, payload: &[u8]) {
        self.inner.lock().inbound.push_back(InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
    }

    /// Everything published so far: `(topic, payload, retain)`.
    pub fn published(&self) -> Vec<(String, Vec<u8>, bool)> {
        self.inner.lock().published.clone()
    }

    pub fn clear_published(&self) {
        self.inner.lock().published.clear();
    }
}

impl HubTransport for MemoryTransport {
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), BridgeError> {
        self.inner
            .lock()
            .published
            .push((topic.to_string(), payload.to_vec(), retain));
        Ok(())
    }

    fn poll(&mut self, _timeout: Duration) -> Result<Option<InboundMessage>, BridgeError> {
        Ok(self.inner.lock().inbound.pop_front())
    }
}
