use crate::error::{ClientError, Result};
use crate::message::ConsumerMessage;
use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Receives messages for a subscription one at a time.
///
/// Offset bookkeeping is applied from the partition ack-state observed
/// immediately after each call returns. An error return stops the
/// current batch and redelivers the failing message next cycle.
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn receive_message(&self, message: ConsumerMessage) -> Result<()>;

    /// Execution context fetch cycles for this listener are handed off
    /// to. `None` runs delivery on the fetch worker itself.
    fn executor(&self) -> Option<Arc<ListenerExecutor>> {
        None
    }
}

/// Receives every decodable message of one fetch response as a single
/// ordered batch. Ack and rollback apply to the batch as a whole.
#[async_trait]
pub trait BatchMessageListener: Send + Sync {
    async fn receive_batch(&self, messages: Vec<ConsumerMessage>) -> Result<()>;

    fn executor(&self) -> Option<Arc<ListenerExecutor>> {
        None
    }
}

/// The two listener shapes a topic can register, dispatched once per
/// fetch cycle.
#[derive(Clone)]
pub enum ListenerKind {
    PerMessage(Arc<dyn MessageListener>),
    Batch(Arc<dyn BatchMessageListener>),
}

impl ListenerKind {
    pub fn executor(&self) -> Option<Arc<ListenerExecutor>> {
        match self {
            ListenerKind::PerMessage(listener) => listener.executor(),
            ListenerKind::Batch(listener) => listener.executor(),
        }
    }
}

/// Bounded execution context for listener delivery.
///
/// At most `capacity` fetch cycles run on it concurrently; a handoff
/// beyond that is rejected instead of queued, and the caller re-enqueues
/// the fetch request untouched.
pub struct ListenerExecutor {
    permits: Arc<Semaphore>,
}

impl ListenerExecutor {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Spawn `task` if a slot is free, otherwise fail with
    /// `ExecutorSaturated` without running it.
    pub fn try_execute<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| ClientError::ExecutorSaturated)?;
        tokio::spawn(async move {
            task.await;
            drop(permit);
        });
        Ok(())
    }

    /// Free slots remaining
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Topic to listener registry for `FetchClient` implementations
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: DashMap<String, ListenerKind>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, topic: impl Into<String>, listener: ListenerKind) {
        self.listeners.insert(topic.into(), listener);
    }

    pub fn get(&self, topic: &str) -> Option<ListenerKind> {
        self.listeners.get(topic).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, topic: &str) {
        self.listeners.remove(topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::oneshot;

    struct NoopListener;

    #[async_trait]
    impl MessageListener for NoopListener {
        async fn receive_message(&self, _message: ConsumerMessage) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_register_get_remove() {
        let registry = ListenerRegistry::new();
        assert!(registry.get("orders").is_none());

        registry.register("orders", ListenerKind::PerMessage(Arc::new(NoopListener)));
        assert!(registry.get("orders").is_some());

        registry.remove("orders");
        assert!(registry.get("orders").is_none());
    }

    #[tokio::test]
    async fn test_executor_runs_tasks_up_to_capacity() {
        let executor = ListenerExecutor::new(2);
        let ran = Arc::new(AtomicU64::new(0));

        for _ in 0..2 {
            let ran = ran.clone();
            executor
                .try_execute(async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        tokio::task::yield_now().await;
        assert_eq!(ran.load(Ordering::SeqCst), 2);
        assert_eq!(executor.available(), 2);
    }

    #[tokio::test]
    async fn test_saturated_executor_rejects_handoff() {
        let executor = ListenerExecutor::new(1);
        let (release, released) = oneshot::channel::<()>();

        executor
            .try_execute(async move {
                let _ = released.await;
            })
            .unwrap();

        let rejected = executor.try_execute(async {});
        assert!(matches!(rejected, Err(ClientError::ExecutorSaturated)));

        release.send(()).ok();
        tokio::task::yield_now().await;
        assert_eq!(executor.available(), 1);
    }
}
