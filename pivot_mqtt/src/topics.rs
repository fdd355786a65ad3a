//! Topic layout.
//!
//! All topics live under one configurable prefix:
//!
//! | Topic                        | Direction | Payload                 |
//! |------------------------------|-----------|-------------------------|
//! | `{prefix}/{axis}/set`        | inbound   | target percent, as text |
//! | `{prefix}/{axis}/calibrate`  | inbound   | any                     |
//! | `{prefix}/stop`              | inbound   | any (emergency stop)    |
//! | `{prefix}/{axis}/state`      | outbound  | JSON status, retained   |
//! | `{prefix}/availability`      | outbound  | `online` / `offline`    |

/// Topic builder and parser for one prefix.
#[derive(Debug, Clone)]
pub struct TopicSet {
    prefix: String,
}

/// A recognized inbound topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind<'a> {
    /// Target position for the named axis.
    Set(&'a str),
    /// Calibration trigger for the named axis.
    Calibrate(&'a str),
    /// Emergency stop for all axes.
    Stop,
}

impl TopicSet {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn axis_state(&self, axis: &str) -> String {
        format!("{}/{axis}/state", self.prefix)
    }

    pub fn axis_set(&self, axis: &str) -> String {
        format!("{}/{axis}/set", self.prefix)
    }

    pub fn axis_calibrate(&self, axis: &str) -> String {
        format!("{}/{axis}/calibrate", self.prefix)
    }

    pub fn stop(&self) -> String {
        format!("{}/stop", self.prefix)
    }

    pub fn availability(&self) -> String {
        format!("{}/availability", self.prefix)
    }

    /// Every topic the bridge subscribes to for the given axes.
    pub fn subscriptions(&self, axis_names: &[&str]) -> Vec<String> {
        let mut topics = vec![self.stop()];
        for name in axis_names {
            topics.push(self.axis_set(name));
            topics.push(self.axis_calibrate(name));
        }
        topics
    }

    /// Classify an inbound topic. Returns `None` for topics outside the
    /// prefix or with an unknown shape.
    pub fn parse<'a>(&self, topic: &'a str) -> Option<TopicKind<'a>> {
        let rest = topic.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?;
        if rest == "stop" {
            return Some(TopicKind::Stop);
        }
        let (axis, action) = rest.split_once('/')?;
        if axis.is_empty() {
            return None;
        }
        match action {
            "set" => Some(TopicKind::Set(axis)),
            "calibrate" => Some(TopicKind::Calibrate(axis)),
            _ => None,
        }
    }
}
