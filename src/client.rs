use crate::error::Result;
use crate::listener::ListenerKind;
use crate::message::Message;
use crate::partition::Partition;
use async_trait::async_trait;
use bytes::Bytes;

/// Broker-facing collaborator of the fetch engine.
///
/// Implementations own the transport, offset persistence, and
/// subscription registry; the fetch engine only pulls raw bytes,
/// resynchronizes offsets, and routes poison messages through this
/// interface.
#[async_trait]
pub trait FetchClient: Send + Sync {
    /// Fetch raw message-stream bytes for a partition starting at
    /// `offset`, bounded by the `max_size` hint.
    ///
    /// `Ok(None)` means the broker had no data for the position at all;
    /// `Ok(Some(_))` may still contain no complete frame when a message
    /// is larger than `max_size`.
    async fn fetch(
        &self,
        topic: &str,
        partition: Partition,
        offset: u64,
        max_size: usize,
    ) -> Result<Option<Bytes>>;

    /// Authoritative consumption offset for a partition, used to
    /// resynchronize after malformed data.
    async fn query_offset(&self, topic: &str, partition: Partition) -> Result<u64>;

    /// Dead-letter sink for messages skipped after too many failed
    /// delivery attempts. Fire and forget.
    async fn append_could_not_process_message(&self, message: Message);

    /// Listener registered for a topic, if any
    fn message_listener(&self, topic: &str) -> Option<ListenerKind>;
}
