use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Consumer ID
    pub consumer_id: Option<String>,

    /// Consumer group
    pub group: String,

    /// Number of fetch runner tasks sharing the request queue
    pub fetch_runner_count: usize,

    /// Ceiling for the per-request fetch backoff delay
    pub max_delay_fetch_time: Duration,

    /// Retries after which a message is skipped to the dead-letter sink
    pub max_fetch_retries: u32,

    /// Retries after which a non-empty but undecodable fetch result
    /// grows the max-fetch-size hint
    pub max_increase_fetch_data_retries: u32,

    /// Initial max-fetch-size hint passed to the broker, in bytes
    pub max_fetch_size: usize,

    /// Timeout hint for a single fetch call
    pub fetch_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            consumer_id: None,
            group: "default-group".to_string(),
            fetch_runner_count: 4,
            max_delay_fetch_time: Duration::from_secs(5),
            max_fetch_retries: 5,
            max_increase_fetch_data_retries: 5,
            max_fetch_size: 1024 * 1024,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

impl ConsumerConfig {
    /// Validate the consumer configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.group.is_empty() {
            return Err("Consumer group must not be empty".to_string());
        }
        if self.fetch_runner_count == 0 {
            return Err("At least one fetch runner is required".to_string());
        }
        if self.max_fetch_size == 0 {
            return Err("Max fetch size must be greater than zero".to_string());
        }
        if self.max_delay_fetch_time.is_zero() {
            return Err("Max delay fetch time must be greater than zero".to_string());
        }
        Ok(())
    }
}
