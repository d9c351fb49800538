use crate::partition::{Partition, PartitionState};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

/// A message consumed from a FluxMQ partition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Topic the message belongs to
    pub topic: String,

    /// Message ID assigned by the broker
    pub id: u64,

    /// Byte position of the message frame within its partition
    pub offset: u64,

    /// Frame flags
    pub flag: u32,

    /// Optional attribute string carried in the frame
    pub attribute: Option<String>,

    /// Message payload
    pub payload: Bytes,

    /// Partition the message was fetched from
    pub partition: Option<Partition>,
}

impl Message {
    /// Get message as JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Create message from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Get message payload as string (UTF-8)
    pub fn payload_as_string(&self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.payload.to_vec())
    }

    /// Payload size in bytes
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// A delivered message together with the handle the consumer callback
/// uses to ack or roll back against the originating partition.
///
/// The partition reference is weak: it only tags which partition the
/// decision applies to and never keeps partition state alive.
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub message: Message,
    partition_state: Weak<PartitionState>,
}

impl ConsumerMessage {
    pub(crate) fn new(message: Message, partition_state: &Arc<PartitionState>) -> Self {
        Self {
            message,
            partition_state: Arc::downgrade(partition_state),
        }
    }

    /// Commit the open consumption transaction up to this message
    pub fn ack(&self) {
        if let Some(state) = self.partition_state.upgrade() {
            state.ack();
        }
    }

    /// Roll back the open consumption transaction
    pub fn rollback(&self) {
        if let Some(state) = self.partition_state.upgrade() {
            state.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::AckDecision;

    fn sample_message() -> Message {
        Message {
            topic: "orders".to_string(),
            id: 42,
            offset: 1000,
            flag: 0,
            attribute: None,
            payload: Bytes::from_static(b"hello"),
            partition: Some(Partition::new(0, 1)),
        }
    }

    #[test]
    fn test_message_json_round_trip() {
        let message = sample_message();
        let json = message.to_json().unwrap();
        let parsed = Message::from_json(&json).unwrap();
        assert_eq!(parsed.topic, "orders");
        assert_eq!(parsed.id, 42);
        assert_eq!(parsed.offset, 1000);
        assert_eq!(parsed.payload, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_consumer_message_tags_partition_state() {
        let state = Arc::new(PartitionState::new(false));
        let delivered = ConsumerMessage::new(sample_message(), &state);

        delivered.ack();
        assert_eq!(state.take_decision(), AckDecision::Ack);

        delivered.rollback();
        assert_eq!(state.take_decision(), AckDecision::Rollback);
    }

    #[test]
    fn test_ack_after_partition_dropped_is_noop() {
        let state = Arc::new(PartitionState::new(false));
        let delivered = ConsumerMessage::new(sample_message(), &state);
        drop(state);
        // The weak back-reference is not an ownership edge.
        delivered.ack();
        delivered.rollback();
    }
}
