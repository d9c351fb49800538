use crate::partition::{Partition, PartitionState};
use std::sync::Arc;
use std::time::Duration;

/// Ceiling for the max-fetch-size hint when it is grown
const MAX_FETCH_SIZE_CEILING: usize = 64 * 1024 * 1024;

/// Per-topic-partition fetch state.
///
/// One request exists per subscribed topic-partition, created at
/// subscription time. It is owned by the request queue or by exactly
/// one fetch worker at any moment, never both. `pending_offset` is the
/// speculative consumption frontier inside an open manual-ack
/// transaction and never falls below `offset`.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    topic: String,
    partition: Partition,
    partition_state: Arc<PartitionState>,
    offset: u64,
    pending_offset: u64,
    last_message_id: Option<u64>,
    retries: u32,
    delay: Duration,
    max_fetch_size: usize,
}

impl FetchRequest {
    pub fn new(
        topic: impl Into<String>,
        partition: Partition,
        partition_state: Arc<PartitionState>,
        offset: u64,
        max_fetch_size: usize,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            partition_state,
            offset,
            pending_offset: offset,
            last_message_id: None,
            retries: 0,
            delay: Duration::ZERO,
            max_fetch_size,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn partition_state(&self) -> &Arc<PartitionState> {
        &self.partition_state
    }

    /// Last confirmed-consumed byte position
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Speculative consumption frontier; equals `offset` outside an
    /// open manual-ack transaction
    pub fn pending_offset(&self) -> u64 {
        self.pending_offset
    }

    /// Position the next fetch is issued at. Uncommitted messages are
    /// refetched only after an explicit rollback.
    pub fn fetch_offset(&self) -> u64 {
        self.pending_offset
    }

    pub fn last_message_id(&self) -> Option<u64> {
        self.last_message_id
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    pub fn max_fetch_size(&self) -> usize {
        self.max_fetch_size
    }

    pub fn increment_retries(&mut self) -> u32 {
        self.retries += 1;
        self.retries
    }

    pub fn reset_retries(&mut self) {
        self.retries = 0;
    }

    /// Advance the speculative frontier past a delivered but
    /// uncommitted message
    pub fn advance_pending(&mut self, frame_len: u64, message_id: u64) {
        self.pending_offset += frame_len;
        self.last_message_id = Some(message_id);
        debug_assert!(self.pending_offset >= self.offset);
    }

    /// Commit consumption through the given frame, folding in any
    /// speculative advance of the open transaction
    pub fn commit(&mut self, frame_len: u64, message_id: u64) {
        self.offset = self.pending_offset + frame_len;
        self.pending_offset = self.offset;
        self.last_message_id = Some(message_id);
    }

    /// Discard the speculative advance accumulated since the
    /// transaction began
    pub fn rollback(&mut self) {
        self.pending_offset = self.offset;
    }

    /// Reset both positions to an authoritative offset reported by the
    /// broker
    pub fn reset_to(&mut self, offset: u64) {
        self.offset = offset;
        self.pending_offset = offset;
    }

    /// Grow the max-fetch-size hint when a message does not fit the
    /// current fetch buffer
    pub fn increase_max_fetch_size(&mut self) {
        self.max_fetch_size = self
            .max_fetch_size
            .saturating_mul(2)
            .min(MAX_FETCH_SIZE_CEILING);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> FetchRequest {
        FetchRequest::new(
            "orders",
            Partition::new(0, 0),
            Arc::new(PartitionState::new(false)),
            100,
            1024,
        )
    }

    #[test]
    fn test_new_request_starts_aligned() {
        let request = request();
        assert_eq!(request.offset(), 100);
        assert_eq!(request.pending_offset(), 100);
        assert_eq!(request.fetch_offset(), 100);
        assert_eq!(request.last_message_id(), None);
        assert_eq!(request.retries(), 0);
        assert_eq!(request.delay(), Duration::ZERO);
    }

    #[test]
    fn test_commit_advances_both_positions() {
        let mut request = request();
        request.commit(30, 7);
        assert_eq!(request.offset(), 130);
        assert_eq!(request.pending_offset(), 130);
        assert_eq!(request.last_message_id(), Some(7));
    }

    #[test]
    fn test_pending_accumulates_and_commit_folds() {
        let mut request = request();
        request.advance_pending(10, 1);
        request.advance_pending(20, 2);
        assert_eq!(request.offset(), 100);
        assert_eq!(request.pending_offset(), 130);

        // Committing the third message folds in the speculative advance.
        request.commit(5, 3);
        assert_eq!(request.offset(), 135);
        assert_eq!(request.pending_offset(), 135);
    }

    #[test]
    fn test_rollback_restores_pending_to_offset() {
        let mut request = request();
        request.advance_pending(10, 1);
        request.advance_pending(20, 2);
        request.rollback();
        assert_eq!(request.offset(), 100);
        assert_eq!(request.pending_offset(), 100);
        assert_eq!(request.fetch_offset(), 100);
    }

    #[test]
    fn test_reset_to_authoritative_offset() {
        let mut request = request();
        request.advance_pending(10, 1);
        request.reset_to(777);
        assert_eq!(request.offset(), 777);
        assert_eq!(request.pending_offset(), 777);
    }

    #[test]
    fn test_retry_counting() {
        let mut request = request();
        assert_eq!(request.increment_retries(), 1);
        assert_eq!(request.increment_retries(), 2);
        request.reset_retries();
        assert_eq!(request.retries(), 0);
    }

    #[test]
    fn test_increase_max_fetch_size_doubles_and_caps() {
        let mut request = request();
        request.increase_max_fetch_size();
        assert_eq!(request.max_fetch_size(), 2048);

        for _ in 0..32 {
            request.increase_max_fetch_size();
        }
        assert_eq!(request.max_fetch_size(), MAX_FETCH_SIZE_CEILING);
    }
}
