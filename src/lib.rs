//! FluxMQ Client Library
//!
//! Consumer-side pull engine for the FluxMQ message queue. A fixed pool
//! of fetch runners shares one deadline-ordered request queue, pulls
//! packed message streams per topic-partition through a narrow broker
//! interface, decodes them, and advances consumption position under
//! auto-ack, manual ack/rollback, and poison-skip modes.

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod listener;
pub mod manager;
pub mod message;
pub mod metrics;
pub mod partition;
pub mod queue;
pub mod request;

pub use client::FetchClient;
pub use codec::{encode_message, MessageDecoder, FLAG_ATTRIBUTE, HEADER_LEN};
pub use config::ConsumerConfig;
pub use error::{ClientError, Result};
pub use listener::{
    BatchMessageListener, ListenerExecutor, ListenerKind, ListenerRegistry, MessageListener,
};
pub use manager::FetchManager;
pub use message::{ConsumerMessage, Message};
pub use metrics::ConsumerMetrics;
pub use partition::{AckDecision, Partition, PartitionState};
pub use queue::FetchRequestQueue;
pub use request::FetchRequest;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_consumer_config_is_usable() {
        let config = ConsumerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.fetch_runner_count > 0);
        assert!(config.max_fetch_retries > 0);
    }
}
