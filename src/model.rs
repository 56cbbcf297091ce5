//! Core data model: node identity, leadership records, and the events
//! broadcast between peer engines.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque identifier for a controller instance.
///
/// Backed by a `String` rather than a `Uuid` because peer-supplied ids
/// must round-trip byte-for-byte through the wire codec regardless of
/// which identity scheme the surrounding controller uses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A controller instance known to this process.
///
/// Equality and hashing are derived from `id` alone; `address` is
/// carried for observability only and has no bearing on node identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerNode {
    pub id: NodeId,
    pub address: Option<String>,
}

impl ControllerNode {
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            address: None,
        }
    }

    pub fn with_address(id: impl Into<NodeId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: Some(address.into()),
        }
    }
}

impl PartialEq for ControllerNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for ControllerNode {}

impl std::hash::Hash for ControllerNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ControllerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// A leadership claim for one topic.
///
/// `epoch` is always `0` in the core; it exists so that a future lock
/// implementation can carry a fencing token without changing the wire
/// shape of this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leadership {
    pub topic: String,
    pub leader: ControllerNode,
    pub epoch: u64,
}

impl Leadership {
    pub fn new(topic: impl Into<String>, leader: ControllerNode) -> Self {
        Self {
            topic: topic.into(),
            leader,
            epoch: 0,
        }
    }
}

/// The kind of leadership change an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadershipEventType {
    LeaderElected,
    LeaderReelected,
    LeaderBooted,
}

/// An event describing a leadership change, broadcast to peers and
/// delivered to local listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadershipEvent {
    pub event_type: LeadershipEventType,
    pub subject: Leadership,
    pub timestamp_millis: u64,
}

impl LeadershipEvent {
    pub fn new(event_type: LeadershipEventType, subject: Leadership) -> Self {
        Self {
            event_type,
            subject,
            timestamp_millis: now_millis(),
        }
    }
}

/// Wall-clock millis, used only for the wire timestamp. Staleness
/// detection uses `std::time::Instant` internally so that clock
/// adjustments cannot make a remote leader appear fresher than it is.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
