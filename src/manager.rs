use crate::client::FetchClient;
use crate::codec::MessageDecoder;
use crate::config::ConsumerConfig;
use crate::error::ClientError;
use crate::listener::{BatchMessageListener, ListenerKind, MessageListener};
use crate::message::ConsumerMessage;
use crate::metrics::ConsumerMetrics;
use crate::partition::AckDecision;
use crate::queue::FetchRequestQueue;
use crate::request::FetchRequest;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Number of linear steps the backoff delay takes to its ceiling
const DELAY_NPARTS: u32 = 10;

/// How long to wait for each runner to finish its current cycle on stop
const RUNNER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while in-flight cycles drain back into the queue
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Window for the rate-limited no-connections fetch error log
const NO_CONNECTION_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Schedules and executes fetch cycles for all subscribed
/// topic-partitions.
///
/// A fixed pool of runner tasks shares one deadline-ordered request
/// queue. Each runner repeatedly takes a ready request, fetches raw
/// bytes through the [`FetchClient`], decodes and delivers messages,
/// advances the request's consumption position, and re-enqueues it with
/// an updated backoff delay. A request is owned by exactly one runner
/// while in flight, so a topic-partition is never processed
/// concurrently.
///
/// Lifecycle: `reset_fetch_state` prepares a fresh queue and shutdown
/// token, `start_fetch_runner` spawns the runners, `stop_fetch_runner`
/// drains them. Call `reset_fetch_state` again before restarting, e.g.
/// on a rebalance.
pub struct FetchManager {
    consumer_id: String,
    config: Arc<ConsumerConfig>,
    client: Arc<dyn FetchClient>,
    metrics: Arc<ConsumerMetrics>,
    shutdown: Arc<AtomicBool>,
    queue: Arc<FetchRequestQueue>,
    cancel: CancellationToken,
    runners: Vec<JoinHandle<()>>,
    fetch_request_count: usize,
}

impl FetchManager {
    pub fn new(
        config: Arc<ConsumerConfig>,
        client: Arc<dyn FetchClient>,
        metrics: Arc<ConsumerMetrics>,
    ) -> Self {
        let consumer_id = config
            .consumer_id
            .clone()
            .unwrap_or_else(|| format!("consumer-{}", Uuid::new_v4()));
        Self {
            consumer_id,
            config,
            client,
            metrics,
            shutdown: Arc::new(AtomicBool::new(false)),
            queue: Arc::new(FetchRequestQueue::new()),
            cancel: CancellationToken::new(),
            runners: Vec::new(),
            fetch_request_count: 0,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Register a topic-partition for fetching
    pub fn add_fetch_request(&self, request: FetchRequest) {
        self.queue.offer(request);
    }

    /// Requests currently resident in the queue (in-flight ones are
    /// excluded)
    pub fn queued_requests(&self) -> usize {
        self.queue.size()
    }

    /// Rebuild the request queue and shutdown token. Must be called
    /// while stopped, before requests are re-added on a rebalance.
    pub fn reset_fetch_state(&mut self) {
        self.queue = Arc::new(FetchRequestQueue::new());
        self.cancel = CancellationToken::new();
        self.runners.clear();
        self.fetch_request_count = 0;
    }

    /// Record the outstanding-request count and spawn the runner pool
    pub fn start_fetch_runner(&mut self) {
        self.fetch_request_count = self.queue.size();
        self.shutdown.store(false, Ordering::Release);

        let ctx = RunnerContext {
            config: self.config.clone(),
            client: self.client.clone(),
            metrics: self.metrics.clone(),
            queue: self.queue.clone(),
        };
        for i in 0..self.config.fetch_runner_count {
            let runner = FetchRunner {
                name: format!("{}-fetch-runner-{}", self.config.group, i),
                ctx: ctx.clone(),
                shutdown: self.shutdown.clone(),
                cancel: self.cancel.clone(),
                last_no_connection_log: None,
            };
            self.runners.push(tokio::spawn(runner.run()));
        }
        info!(
            consumer = %self.consumer_id,
            runners = self.config.fetch_runner_count,
            outstanding = self.fetch_request_count,
            "fetch runners started"
        );
    }

    /// Stop the runner pool and wait until every in-flight fetch cycle
    /// has finished and returned its request to the queue.
    pub async fn stop_fetch_runner(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.cancel.cancel();

        let handles: Vec<_> = self.runners.drain(..).collect();
        if !handles.is_empty()
            && timeout(RUNNER_JOIN_TIMEOUT, join_all(handles))
                .await
                .is_err()
        {
            warn!(
                consumer = %self.consumer_id,
                "fetch runners did not stop in time, waiting for in-flight cycles to drain"
            );
        }

        self.queue.shutdown();
        while self.queue.size() != self.fetch_request_count {
            sleep(DRAIN_POLL_INTERVAL).await;
        }
        info!(consumer = %self.consumer_id, "fetch runners stopped");
    }
}

/// Shared state a runner needs to execute fetch cycles. Cloned into
/// listener executors when a cycle is handed off.
#[derive(Clone)]
struct RunnerContext {
    config: Arc<ConsumerConfig>,
    client: Arc<dyn FetchClient>,
    metrics: Arc<ConsumerMetrics>,
    queue: Arc<FetchRequestQueue>,
}

struct FetchRunner {
    name: String,
    ctx: RunnerContext,
    shutdown: Arc<AtomicBool>,
    cancel: CancellationToken,
    last_no_connection_log: Option<Instant>,
}

impl FetchRunner {
    async fn run(mut self) {
        debug!(runner = %self.name, "fetch runner started");
        while !self.shutdown.load(Ordering::Acquire) {
            let taken = tokio::select! {
                taken = self.ctx.queue.take() => taken,
                _ = self.cancel.cancelled() => break,
            };
            match taken {
                Ok(request) => self.execute_request(request).await,
                // The queue was shut down while waiting; the loop
                // condition decides whether to exit.
                Err(_) => {}
            }
        }
        debug!(runner = %self.name, "fetch runner stopped");
    }

    /// One fetch cycle for one request. Every path re-enqueues the
    /// request; no failure here is allowed to stall the partition.
    async fn execute_request(&mut self, mut request: FetchRequest) {
        let fetched = self
            .ctx
            .client
            .fetch(
                request.topic(),
                request.partition(),
                request.fetch_offset(),
                request.max_fetch_size(),
            )
            .await;

        match fetched {
            Ok(Some(data)) => {
                self.ctx
                    .metrics
                    .bytes_received
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
                let decoder = MessageDecoder::new(request.topic(), data)
                    .with_base_offset(request.fetch_offset());
                match self.ctx.client.message_listener(request.topic()) {
                    Some(listener) => self.notify_listener(request, decoder, listener).await,
                    None => {
                        warn!(
                            topic = request.topic(),
                            partition = %request.partition(),
                            "no listener registered for topic, delaying fetch"
                        );
                        self.ctx.update_delay(&mut request);
                        self.ctx.queue.offer(request);
                    }
                }
            }
            Ok(None) => {
                self.ctx.metrics.empty_fetches.fetch_add(1, Ordering::Relaxed);
                self.ctx.update_delay(&mut request);
                self.ctx.queue.offer(request);
            }
            Err(error) => {
                self.ctx.metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
                self.ctx.update_delay(&mut request);
                self.log_fetch_failure(&request, &error);
                self.ctx.queue.offer(request);
            }
        }
    }

    /// The no-connections condition can persist for a while and would
    /// otherwise flood the log on every backoff expiry.
    fn log_fetch_failure(&mut self, request: &FetchRequest, error: &ClientError) {
        if matches!(error, ClientError::NoConnectionsAvailable) {
            let now = Instant::now();
            let due = self
                .last_no_connection_log
                .map_or(true, |last| now.duration_since(last) > NO_CONNECTION_LOG_INTERVAL);
            if due {
                error!(
                    topic = request.topic(),
                    partition = %request.partition(),
                    %error,
                    "failed to fetch messages"
                );
                self.last_no_connection_log = Some(now);
            }
        } else {
            error!(
                topic = request.topic(),
                partition = %request.partition(),
                %error,
                "failed to fetch messages"
            );
        }
    }

    /// Run the receive protocol inline, or hand the whole cycle off to
    /// the listener's execution context. A rejected handoff abandons
    /// the batch and re-enqueues the request untouched.
    async fn notify_listener(
        &self,
        request: FetchRequest,
        decoder: MessageDecoder,
        listener: ListenerKind,
    ) {
        match listener.executor() {
            Some(executor) => {
                let ctx = self.ctx.clone();
                let task_request = request.clone();
                let task_listener = listener.clone();
                let task = async move {
                    ctx.receive_messages(task_request, decoder, task_listener).await;
                };
                if executor.try_execute(task).is_err() {
                    error!(
                        topic = request.topic(),
                        partition = %request.partition(),
                        "listener executor saturated, re-queuing fetch request"
                    );
                    self.ctx.queue.offer(request);
                }
            }
            None => self.ctx.receive_messages(request, decoder, listener).await,
        }
    }
}

impl RunnerContext {
    async fn receive_messages(
        &self,
        mut request: FetchRequest,
        mut decoder: MessageDecoder,
        listener: ListenerKind,
    ) {
        if !decoder.has_next() {
            // A non-empty result that holds no complete frame means the
            // next message does not fit the current fetch size.
            if self.retry_too_many_for_increase(&request) && decoder.data_len() > 0 {
                request.increase_max_fetch_size();
                warn!(
                    topic = request.topic(),
                    partition = %request.partition(),
                    retries = request.retries(),
                    max_fetch_size = request.max_fetch_size(),
                    "fetched data contained no decodable message, growing max fetch size"
                );
            }
            request.increment_retries();
            self.update_delay(&mut request);
            self.queue.offer(request);
            return;
        }

        let request = match self.process_when_retry_too_many(request, &mut decoder).await {
            Some(request) => request,
            None => return,
        };

        match listener {
            ListenerKind::PerMessage(listener) => {
                self.process_messages(request, decoder, listener).await
            }
            ListenerKind::Batch(listener) => self.process_batch(request, decoder, listener).await,
        }
    }

    /// Poison check: a request that failed to make progress too many
    /// times skips exactly one message to the dead-letter sink and
    /// retries immediately. Returns the request back when the check did
    /// not fire.
    async fn process_when_retry_too_many(
        &self,
        mut request: FetchRequest,
        decoder: &mut MessageDecoder,
    ) -> Option<FetchRequest> {
        if request.retries() <= self.config.max_fetch_retries {
            return Some(request);
        }

        let frame_start = decoder.position();
        match decoder.next() {
            Ok(mut message) => {
                message.partition = Some(request.partition());
                let frame_len = (decoder.position() - frame_start) as u64;
                let message_id = message.id;
                warn!(
                    topic = request.topic(),
                    partition = %request.partition(),
                    id = message_id,
                    retries = request.retries(),
                    "skipping message that could not be processed, appending to dead-letter sink"
                );
                self.metrics.messages_skipped.fetch_add(1, Ordering::Relaxed);
                self.client.append_could_not_process_message(message).await;

                request.reset_retries();
                request.commit(frame_len, message_id);
                request.set_delay(Duration::ZERO);
                self.queue.offer(request);
            }
            Err(error) => {
                self.metrics.invalid_messages.fetch_add(1, Ordering::Relaxed);
                warn!(
                    topic = request.topic(),
                    partition = %request.partition(),
                    %error,
                    "message to skip is malformed, resynchronizing offset"
                );
                self.resync_offset(request).await;
            }
        }
        None
    }

    /// Deliver decoded messages one at a time, applying offset rules
    /// from the ack-state observed right after each callback returns.
    async fn process_messages(
        &self,
        mut request: FetchRequest,
        mut decoder: MessageDecoder,
        listener: Arc<dyn MessageListener>,
    ) {
        let state = request.partition_state().clone();
        let mut consumed = 0u64;

        while decoder.has_next() {
            let frame_start = decoder.position();
            let message = match decoder.next() {
                Ok(mut message) => {
                    message.partition = Some(request.partition());
                    message
                }
                Err(error) => {
                    self.metrics.invalid_messages.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        topic = request.topic(),
                        partition = %request.partition(),
                        %error,
                        "malformed message, resynchronizing offset"
                    );
                    self.resync_offset(request).await;
                    return;
                }
            };
            let frame_len = (decoder.position() - frame_start) as u64;
            let message_id = message.id;

            self.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
            if let Err(error) = listener
                .receive_message(ConsumerMessage::new(message, &state))
                .await
            {
                // Rewind to the frame boundary so exactly this message
                // is redelivered next cycle.
                decoder.set_position(frame_start);
                error!(
                    topic = request.topic(),
                    partition = %request.partition(),
                    id = message_id,
                    %error,
                    "message listener failed, stopping batch for redelivery"
                );
                break;
            }

            if state.is_auto_ack() {
                request.commit(frame_len, message_id);
                consumed += 1;
            } else {
                match state.take_decision() {
                    AckDecision::Ack => {
                        request.commit(frame_len, message_id);
                        consumed += 1;
                    }
                    AckDecision::Rollback => {
                        request.rollback();
                        break;
                    }
                    AckDecision::None => {
                        request.advance_pending(frame_len, message_id);
                        consumed += 1;
                    }
                }
            }
        }

        self.finish_cycle(request, consumed).await;
    }

    /// Deliver every decodable message of the response as one ordered
    /// batch; ack rules then apply to the batch's full byte extent.
    async fn process_batch(
        &self,
        mut request: FetchRequest,
        mut decoder: MessageDecoder,
        listener: Arc<dyn BatchMessageListener>,
    ) {
        let state = request.partition_state().clone();
        let batch_start = decoder.position();
        let mut messages = Vec::new();
        let mut last_message_id = None;

        while decoder.has_next() {
            match decoder.next() {
                Ok(mut message) => {
                    message.partition = Some(request.partition());
                    last_message_id = Some(message.id);
                    messages.push(ConsumerMessage::new(message, &state));
                }
                Err(error) => {
                    self.metrics.invalid_messages.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        topic = request.topic(),
                        partition = %request.partition(),
                        %error,
                        "malformed message in batch, resynchronizing offset"
                    );
                    self.resync_offset(request).await;
                    return;
                }
            }
        }

        let mut consumed = 0u64;
        if let Some(message_id) = last_message_id {
            let batch_len = (decoder.position() - batch_start) as u64;
            let count = messages.len() as u64;
            self.metrics.messages_received.fetch_add(count, Ordering::Relaxed);

            match listener.receive_batch(messages).await {
                Ok(()) => {
                    if state.is_auto_ack() {
                        request.commit(batch_len, message_id);
                        consumed = count;
                    } else {
                        match state.take_decision() {
                            AckDecision::Ack => {
                                request.commit(batch_len, message_id);
                                consumed = count;
                            }
                            AckDecision::Rollback => request.rollback(),
                            AckDecision::None => {
                                request.advance_pending(batch_len, message_id);
                                consumed = count;
                            }
                        }
                    }
                }
                Err(error) => {
                    decoder.set_position(batch_start);
                    error!(
                        topic = request.topic(),
                        partition = %request.partition(),
                        %error,
                        "batch listener failed, batch will be redelivered"
                    );
                }
            }
        }

        self.finish_cycle(request, consumed).await;
    }

    /// Cycle bookkeeping: a cycle with no advance of the consumption
    /// position counts as a retry; any advance resets the counter.
    async fn finish_cycle(&self, mut request: FetchRequest, consumed: u64) {
        if consumed == 0 {
            request.increment_retries();
        } else {
            request.reset_retries();
            self.metrics.messages_consumed.fetch_add(consumed, Ordering::Relaxed);
        }
        let delay = self.retry_delay(&request);
        request.set_delay(delay);
        self.queue.offer(request);
    }

    /// Reset the request to the broker's authoritative offset after
    /// malformed data. The request re-enters the queue even when the
    /// query fails, so the partition never stalls.
    async fn resync_offset(&self, mut request: FetchRequest) {
        match self
            .client
            .query_offset(request.topic(), request.partition())
            .await
        {
            Ok(offset) => {
                request.reset_retries();
                info!(
                    topic = request.topic(),
                    partition = %request.partition(),
                    offset,
                    "offset resynchronized from broker"
                );
                request.reset_to(offset);
            }
            Err(error) => {
                error!(
                    topic = request.topic(),
                    partition = %request.partition(),
                    %error,
                    "failed to query offset for resynchronization"
                );
            }
        }
        self.queue.offer(request);
    }

    fn retry_too_many_for_increase(&self, request: &FetchRequest) -> bool {
        request.retries() > self.config.max_increase_fetch_data_retries
    }

    /// Backoff after a failed or empty cycle: one more linear step
    /// toward the ceiling.
    fn update_delay(&self, request: &mut FetchRequest) {
        let max_delay = self.config.max_delay_fetch_time;
        let step = max_delay / DELAY_NPARTS;
        request.set_delay((request.delay() + step).min(max_delay));
    }

    /// Delay after a consumption cycle, proportional to the retry count
    fn retry_delay(&self, request: &FetchRequest) -> Duration {
        let max_delay = self.config.max_delay_fetch_time;
        let step = max_delay / DELAY_NPARTS;
        (step * request.retries()).min(max_delay)
    }
}
