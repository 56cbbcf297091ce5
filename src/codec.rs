//! Serialization of [`LeadershipEvent`] to/from the opaque bytes carried
//! by the ordered broadcast topic.
//!
//! The only contract a codec must honor is round-trip equality of
//! `{event_type, subject.topic, subject.leader.id, subject.epoch,
//! timestamp_millis}`. Bit-exact compatibility with any prior wire
//! format is not a goal.

use crate::error::CodecError;
use crate::model::LeadershipEvent;

/// Pluggable wire codec for leadership events.
pub trait EventCodec: Send + Sync {
    fn encode(&self, event: &LeadershipEvent) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<LeadershipEvent, CodecError>;
}

/// Default codec: `serde_json`, matching the serialization choice used
/// throughout this crate's config and state types.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEventCodec;

impl EventCodec for JsonEventCodec {
    fn encode(&self, event: &LeadershipEvent) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(event).map_err(|e| CodecError::Serialization(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<LeadershipEvent, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ControllerNode, Leadership, LeadershipEventType};

    #[test]
    fn round_trips_through_json() {
        let codec = JsonEventCodec;
        let event = LeadershipEvent::new(
            LeadershipEventType::LeaderElected,
            Leadership::new("sdn", ControllerNode::new("node-a")),
        );

        let bytes = codec.encode(&event).expect("encode");
        let decoded = codec.decode(&bytes).expect("decode");

        assert_eq!(decoded, event);
    }

    #[test]
    fn decode_of_garbage_is_an_error_not_a_panic() {
        let codec = JsonEventCodec;
        assert!(codec.decode(b"not json").is_err());
    }
}
