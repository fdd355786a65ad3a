//! The bridge loop: inbound command dispatch and status publishing.
//!
//! Runs on its own thread at a low cadence. Three duties per pass:
//! drain inbound messages into the shared-state command surface, push an
//! immediate status for every state transition, and publish all axis
//! statuses when the periodic interval elapses. Rejected and malformed
//! commands are logged, never silently swallowed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use pivot_common::shared::{SharedState, StateEvent};
use pivot_common::state::AxisId;
use tracing::{debug, info, warn};

use crate::payload::AxisStatusPayload;
use crate::topics::{TopicKind, TopicSet};
use crate::transport::{HubTransport, InboundMessage};

/// How long one pass waits on the transport before handling events.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

pub struct HubBridge<T: HubTransport> {
    transport: T,
    topics: TopicSet,
    shared: Arc<SharedState>,
    events: Receiver<StateEvent>,
    publish_interval: Duration,
    last_full_publish: Option<Instant>,
}

impl<T: HubTransport> HubBridge<T> {
    pub fn new(
        transport: T,
        topics: TopicSet,
        shared: Arc<SharedState>,
        publish_interval: Duration,
    ) -> Self {
        let events = shared.subscribe_events();
        Self {
            transport,
            topics,
            shared,
            events,
            publish_interval,
            last_full_publish: None,
        }
    }

    /// Run until the flag drops. Announces availability on entry and
    /// retracts it on the way out.
    pub fn run(&mut self, running: &AtomicBool) {
        info!("hub bridge started");
        self.publish_availability("online");
        self.publish_all();

        while running.load(Ordering::SeqCst) {
            self.service();
        }

        self.publish_availability("offline");
        info!("hub bridge stopped");
    }

    /// One bridge pass; extracted so tests can drive it synchronously.
    pub fn service(&mut self) {
        match self.transport.poll(POLL_TIMEOUT) {
            Ok(Some(msg)) => self.dispatch(msg),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "transport poll failed"),
        }

        // Immediate pushes, independent of the periodic cadence.
        while let Ok(event) = self.events.try_recv() {
            let axis = match event {
                StateEvent::Transition { axis, .. } => axis,
                StateEvent::CalibrationStored { axis, .. } => axis,
            };
            self.publish_axis(axis);
        }

        let due = self
            .last_full_publish
            .is_none_or(|t| t.elapsed() >= self.publish_interval);
        if due {
            self.publish_all();
        }
    }

    fn dispatch(&mut self, msg: InboundMessage) {
        match self.topics.parse(&msg.topic) {
            Some(TopicKind::Set(name)) => {
                let Some(axis) = self.shared.axis_by_name(name) else {
                    warn!(axis = name, "target for unknown axis");
                    return;
                };
                let text = String::from_utf8_lossy(&msg.payload);
                match text.trim().parse::<f64>() {
                    Ok(percent) => match self.shared.set_target(axis, percent) {
                        Ok(target) => {
                            info!(axis = name, percent = target.position_percent, "target accepted")
                        }
                        Err(e) => warn!(axis = name, error = %e, "target rejected"),
                    },
                    Err(_) => warn!(axis = name, payload = %text, "unparseable target"),
                }
            }
            Some(TopicKind::Calibrate(name)) => {
                let Some(axis) = self.shared.axis_by_name(name) else {
                    warn!(axis = name, "calibration for unknown axis");
                    return;
                };
                match self.shared.request_calibration(axis) {
                    Ok(()) => info!(axis = name, "calibration requested"),
                    Err(e) => warn!(axis = name, error = %e, "calibration rejected"),
                }
            }
            Some(TopicKind::Stop) => {
                self.shared.emergency_stop();
            }
            None => debug!(topic = %msg.topic, "ignoring unrelated topic"),
        }
    }

    fn publish_axis(&mut self, axis: AxisId) {
        let Some(snapshot) = self.shared.snapshot(axis) else {
            return;
        };
        let Some(name) = self.shared.axis_name(axis).map(str::to_string) else {
            return;
        };
        let payload = AxisStatusPayload::from_snapshot(&name, &snapshot);
        match payload.to_json() {
            Ok(bytes) => {
                if let Err(e) = self.transport.publish(&self.topics.axis_state(&name), &bytes, true)
                {
                    warn!(axis = %name, error = %e, "status publish failed");
                }
            }
            Err(e) => warn!(axis = %name, error = %e, "status encoding failed"),
        }
    }

    fn publish_all(&mut self) {
        for axis in 0..self.shared.axis_count() as AxisId {
            self.publish_axis(axis);
        }
        self.last_full_publish = Some(Instant::now());
    }

    fn publish_availability(&mut self, status: &str) {
        if let Err(e) =
            self.transport
                .publish(&self.topics.availability(), status.as_bytes(), true)
        {
            warn!(error = %e, "availability publish failed");
        }
    }
}
