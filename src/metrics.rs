use std::sync::atomic::AtomicU64;
use std::sync::Arc;

/// Consumer performance metrics shared between the fetch workers and
/// the embedding application
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    /// Messages handed to listeners
    pub messages_received: Arc<AtomicU64>,
    /// Messages that advanced the consumption position
    pub messages_consumed: Arc<AtomicU64>,
    /// Poison messages skipped to the dead-letter sink
    pub messages_skipped: Arc<AtomicU64>,
    /// Structurally invalid messages encountered while decoding
    pub invalid_messages: Arc<AtomicU64>,
    /// Failed fetch calls
    pub fetch_failures: Arc<AtomicU64>,
    /// Fetch calls that returned no data at all
    pub empty_fetches: Arc<AtomicU64>,
    /// Raw bytes received from fetch calls
    pub bytes_received: Arc<AtomicU64>,
}
