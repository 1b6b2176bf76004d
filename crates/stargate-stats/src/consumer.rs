use crate::aggregator::StatsAggregator;
use crate::backoff::BackoffPolicy;
use crate::error::StatsError;
use crate::{STATS_GROUP, STATS_STREAM};
use parking_lot::Mutex;
use stargate_core::{QueueBroker, StatsEvent, StreamMessage, CLAIM_START};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use typed_builder::TypedBuilder;

/// Offset new groups start reading from: the beginning of the stream.
const GROUP_ORIGIN: &str = "0";

#[derive(Debug, Clone, TypedBuilder)]
pub struct ConsumerSettings {
    #[builder(default = STATS_STREAM.to_string(), setter(into))]
    pub stream: String,
    #[builder(default = STATS_GROUP.to_string(), setter(into))]
    pub group: String,
    /// Unique per process; see [`crate::consumer_name`].
    #[builder(setter(into))]
    pub consumer: String,
    #[builder(default = 10)]
    pub batch_size: usize,
    /// How long a read waits for new messages.
    #[builder(default = Duration::from_millis(1000))]
    pub block: Duration,
    /// Pending messages idle this long are claimed from whichever consumer
    /// held them.
    #[builder(default = Duration::from_secs(60))]
    pub claim_min_idle: Duration,
    #[builder(default)]
    pub backoff: BackoffPolicy,
}

/// What a single poll did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub delivered: usize,
    pub processed: usize,
    pub failed: usize,
}

/// Reads the stats stream through a consumer group and aggregates every
/// event.
///
/// Processed ids are acknowledged in batches: once `batch_size` of them
/// have accumulated, whenever a read comes back short (the stream is
/// drained) and on shutdown. Messages that fail are never acknowledged and
/// come back through the idle claim, which walks the pending list a page
/// per poll so a run of failing messages cannot hide the ones behind it.
pub struct StatsConsumer {
    broker: Arc<dyn QueueBroker>,
    aggregator: StatsAggregator,
    settings: ConsumerSettings,
    pending_acks: Mutex<Vec<String>>,
    claim_cursor: Mutex<String>,
}

impl StatsConsumer {
    pub fn new(
        broker: Arc<dyn QueueBroker>,
        aggregator: StatsAggregator,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            broker,
            aggregator,
            settings,
            pending_acks: Mutex::new(Vec::new()),
            claim_cursor: Mutex::new(CLAIM_START.to_string()),
        }
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    /// Where the next idle claim resumes its scan.
    pub fn claim_cursor(&self) -> String {
        self.claim_cursor.lock().clone()
    }

    /// Processed ids not yet acknowledged.
    pub fn pending_ack_count(&self) -> usize {
        self.pending_acks.lock().len()
    }

    /// Creates the consumer group unless it already exists.
    pub async fn ensure_group(&self) -> Result<(), StatsError> {
        let s = &self.settings;
        let created = self
            .broker
            .create_group(&s.stream, &s.group, GROUP_ORIGIN)
            .await?;
        if created {
            info!(stream = %s.stream, group = %s.group, "created stats consumer group");
        } else {
            debug!(stream = %s.stream, group = %s.group, "stats consumer group already exists");
        }
        Ok(())
    }

    /// Fetches one batch, processes it and acknowledges what is due.
    pub async fn poll_once(&self) -> Result<PollOutcome, StatsError> {
        let messages = self.fetch().await?;
        self.handle(messages).await
    }

    /// Acknowledges every processed id still held.
    pub async fn flush_acks(&self) -> Result<u64, StatsError> {
        let ids = std::mem::take(&mut *self.pending_acks.lock());
        if ids.is_empty() {
            return Ok(0);
        }

        let s = &self.settings;
        match self.broker.ack(&s.stream, &s.group, &ids).await {
            Ok(acked) => {
                trace!(acked, "acknowledged stats batch");
                Ok(acked)
            }
            Err(err) => {
                // Put them back in front of anything processed since.
                let mut pending = self.pending_acks.lock();
                let newer = std::mem::replace(&mut *pending, ids);
                pending.extend(newer);
                Err(err.into())
            }
        }
    }

    /// Idle messages from crashed consumers take priority over new ones.
    async fn fetch(&self) -> Result<Vec<StreamMessage>, StatsError> {
        let s = &self.settings;
        let cursor = self.claim_cursor();
        let claimed = self
            .broker
            .claim_stale(&s.stream, &s.group, &s.consumer, s.claim_min_idle, &cursor, s.batch_size)
            .await?;
        *self.claim_cursor.lock() = claimed.next_cursor;
        if !claimed.messages.is_empty() {
            debug!(count = claimed.messages.len(), %cursor, "claimed idle stats messages");
            return Ok(claimed.messages);
        }

        Ok(self
            .broker
            .read_group(&s.stream, &s.group, &s.consumer, s.batch_size, s.block)
            .await?)
    }

    async fn handle(&self, messages: Vec<StreamMessage>) -> Result<PollOutcome, StatsError> {
        let mut outcome = PollOutcome {
            delivered: messages.len(),
            ..PollOutcome::default()
        };

        for message in messages {
            match self.process(&message).await {
                Ok(()) => {
                    outcome.processed += 1;
                    self.pending_acks.lock().push(message.id);
                }
                Err(err) => {
                    outcome.failed += 1;
                    warn!(id = %message.id, error = %err, "stats message left pending");
                }
            }
        }

        let drained = outcome.delivered < self.settings.batch_size;
        if drained || self.pending_ack_count() >= self.settings.batch_size {
            self.flush_acks().await?;
        }
        Ok(outcome)
    }

    async fn process(&self, message: &StreamMessage) -> Result<(), StatsError> {
        let event = StatsEvent::from_fields(&message.fields)?;
        self.aggregator.process(&event).await
    }

    /// Runs until `shutdown` is cancelled, then flushes pending acks.
    ///
    /// Broker errors and failed messages back off according to the
    /// configured policy; the loop never gives up on its own.
    pub async fn run(&self, shutdown: CancellationToken) {
        let s = &self.settings;
        info!(stream = %s.stream, group = %s.group, consumer = %s.consumer, "stats consumer starting");

        if self.start(&shutdown).await {
            self.poll_until_cancelled(&shutdown).await;
        }

        match self.flush_acks().await {
            Ok(acked) => info!(acked, "stats consumer stopped"),
            Err(err) => error!(
                error = %err,
                unacked = self.pending_ack_count(),
                "stats consumer stopped without acknowledging its last batch"
            ),
        }
    }

    /// Retries group creation until it succeeds. Returns `false` if
    /// cancelled first.
    async fn start(&self, shutdown: &CancellationToken) -> bool {
        let mut backoff = self.settings.backoff.start();
        loop {
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return false,
                result = self.ensure_group() => result,
            };
            let Err(err) = result else {
                return true;
            };
            let delay = backoff.next_delay();
            warn!(error = %err, attempt = backoff.failures(), ?delay, "could not create consumer group");
            if sleep_or_cancel(shutdown, delay).await {
                return false;
            }
        }
    }

    async fn poll_until_cancelled(&self, shutdown: &CancellationToken) {
        let mut backoff = self.settings.backoff.start();
        loop {
            // Only the fetch is cancellable; a fetched batch is always
            // processed so its acks can be flushed on exit.
            let fetched = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                fetched = self.fetch() => fetched,
            };

            let result = match fetched {
                Ok(messages) => self.handle(messages).await,
                Err(err) => Err(err),
            };

            let delay = match result {
                Ok(outcome) if outcome.failed == 0 => {
                    backoff.reset();
                    continue;
                }
                Ok(outcome) => {
                    let delay = backoff.next_delay();
                    warn!(failed = outcome.failed, attempt = backoff.failures(), ?delay, "stats batch had failures");
                    delay
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    warn!(error = %err, attempt = backoff.failures(), ?delay, "stats poll failed");
                    delay
                }
            };
            if sleep_or_cancel(shutdown, delay).await {
                return;
            }
        }
    }
}

/// Returns `true` if cancelled before `delay` elapsed.
async fn sleep_or_cancel(shutdown: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;
    use crate::producer::StatsProducer;
    use async_trait::async_trait;
    use jiff::Timestamp;
    use stargate_cache::InMemoryVisitorTracker;
    use stargate_core::queue::Result as QueueResult;
    use stargate_core::{
        ClaimedBatch, FirstVisit, FullShortUrl, LinkRecord, LinkRepository, QueueError, ShortCode,
        ValidDate,
    };
    use stargate_storage::{InMemoryLinkStore, ShardRouter};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        broker: Arc<InMemoryBroker>,
        store: Arc<InMemoryLinkStore>,
        producer: StatsProducer,
        url: FullShortUrl,
    }

    impl Harness {
        async fn new() -> Self {
            let broker = Arc::new(InMemoryBroker::new());
            let store = Arc::new(InMemoryLinkStore::new(ShardRouter::new(4).unwrap()));
            let code = ShortCode::new_unchecked("abc123");
            let now = Timestamp::now();
            let link = LinkRecord {
                id: 1,
                gid: "g1".to_string(),
                domain: "nurl.ink".to_string(),
                full_short_url: FullShortUrl::new("nurl.ink", &code),
                short_code: code,
                origin_url: "https://example.com/a".to_string(),
                favicon: None,
                description: None,
                disabled: false,
                deleted: false,
                deleted_at: None,
                valid_date: ValidDate::Permanent,
                total_pv: 0,
                total_uv: 0,
                total_uip: 0,
                created_at: now,
                updated_at: now,
            };
            store.insert(&link, &link.goto(2)).await.unwrap();
            Self {
                producer: StatsProducer::new(broker.clone()),
                broker,
                store,
                url: link.full_short_url,
            }
        }

        fn consumer(&self, name: &str, claim_min_idle: Duration) -> StatsConsumer {
            self.consumer_on(self.broker.clone(), name, claim_min_idle)
        }

        fn consumer_on(
            &self,
            broker: Arc<dyn QueueBroker>,
            name: &str,
            claim_min_idle: Duration,
        ) -> StatsConsumer {
            let aggregator =
                StatsAggregator::new(self.store.clone(), Arc::new(InMemoryVisitorTracker::new()));
            let settings = ConsumerSettings::builder()
                .consumer(name)
                .block(Duration::from_millis(20))
                .claim_min_idle(claim_min_idle)
                .backoff(
                    BackoffPolicy::builder()
                        .base_delay(Duration::from_millis(5))
                        .max_delay(Duration::from_millis(20))
                        .long_wait(Duration::from_millis(50))
                        .jitter(false)
                        .build(),
                )
                .build();
            StatsConsumer::new(broker, aggregator, settings)
        }

        fn event(&self, visitor: &str) -> StatsEvent {
            StatsEvent {
                full_short_url: self.url.clone(),
                gid: "g1".to_string(),
                visitor_id: visitor.to_string(),
                first_visit: FirstVisit::default(),
                ip: format!("ip-{visitor}"),
                browser: "Chrome".to_string(),
                os: "Windows".to_string(),
                device: "PC".to_string(),
                network: "WIFI".to_string(),
                locale: String::new(),
                event_time: Timestamp::now(),
            }
        }

        async fn totals(&self) -> (u64, u64) {
            let link = self.store.find_link("g1", &self.url).await.unwrap().unwrap();
            (link.total_pv, link.total_uv)
        }

        fn pending(&self) -> usize {
            self.broker.pending_count(STATS_STREAM, STATS_GROUP)
        }
    }

    /// Fails the first `failures` reads with a transient error.
    struct FlakyBroker {
        inner: Arc<InMemoryBroker>,
        failures: AtomicUsize,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl QueueBroker for FlakyBroker {
        async fn append(&self, stream: &str, fields: &[(&str, String)]) -> QueueResult<String> {
            self.inner.append(stream, fields).await
        }

        async fn create_group(&self, stream: &str, group: &str, start: &str) -> QueueResult<bool> {
            self.inner.create_group(stream, group, start).await
        }

        async fn read_group(
            &self,
            stream: &str,
            group: &str,
            consumer: &str,
            count: usize,
            block: Duration,
        ) -> QueueResult<Vec<StreamMessage>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(QueueError::Unavailable("circuit open".to_string()));
            }
            self.inner
                .read_group(stream, group, consumer, count, block)
                .await
        }

        async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> QueueResult<u64> {
            self.inner.ack(stream, group, ids).await
        }

        async fn claim_stale(
            &self,
            stream: &str,
            group: &str,
            consumer: &str,
            min_idle: Duration,
            cursor: &str,
            count: usize,
        ) -> QueueResult<ClaimedBatch> {
            self.inner
                .claim_stale(stream, group, consumer, min_idle, cursor, count)
                .await
        }
    }

    #[tokio::test]
    async fn ensure_group_tolerates_an_existing_group() {
        let harness = Harness::new().await;
        let consumer = harness.consumer("c1", Duration::from_secs(60));
        consumer.ensure_group().await.unwrap();
        consumer.ensure_group().await.unwrap();
    }

    #[tokio::test]
    async fn hundred_first_visits_add_a_hundred() {
        let harness = Harness::new().await;
        let consumer = harness.consumer("c1", Duration::from_secs(60));
        consumer.ensure_group().await.unwrap();

        for n in 0..100 {
            harness.producer.publish(&harness.event(&format!("v{n}"))).await.unwrap();
        }

        let mut processed = 0;
        while processed < 100 {
            processed += consumer.poll_once().await.unwrap().processed;
        }
        consumer.poll_once().await.unwrap();

        assert_eq!(harness.totals().await, (100, 100));
        assert_eq!(harness.pending(), 0);
    }

    #[tokio::test]
    async fn redelivered_event_is_counted_twice() {
        let harness = Harness::new().await;
        let consumer = harness.consumer("c1", Duration::from_secs(60));
        consumer.ensure_group().await.unwrap();

        let event = harness.event("v1");
        harness.producer.publish(&event).await.unwrap();
        harness.producer.publish(&event).await.unwrap();
        let outcome = consumer.poll_once().await.unwrap();

        assert_eq!(outcome.processed, 2);
        assert_eq!(harness.totals().await, (2, 1));
    }

    #[tokio::test]
    async fn crashed_consumer_batch_is_claimed_by_another() {
        let harness = Harness::new().await;
        let rescuer = harness.consumer("rescuer", Duration::ZERO);
        rescuer.ensure_group().await.unwrap();
        for n in 0..5 {
            harness.producer.publish(&harness.event(&format!("v{n}"))).await.unwrap();
        }

        // The crashed consumer read the batch and died before processing or
        // acknowledging it.
        let taken = harness
            .broker
            .read_group(STATS_STREAM, STATS_GROUP, "crashed", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(taken.len(), 5);
        assert_eq!(harness.pending(), 5);

        let outcome = rescuer.poll_once().await.unwrap();

        assert_eq!(outcome.processed, 5);
        assert_eq!(harness.totals().await, (5, 5));
        assert_eq!(harness.pending(), 0);
    }

    #[tokio::test]
    async fn claims_page_past_messages_that_keep_failing() {
        let harness = Harness::new().await;
        let rescuer = harness.consumer("rescuer", Duration::ZERO);
        rescuer.ensure_group().await.unwrap();
        for _ in 0..10 {
            harness
                .broker
                .append(STATS_STREAM, &[("gid", "g1".to_string())])
                .await
                .unwrap();
        }
        for n in 0..5 {
            harness.producer.publish(&harness.event(&format!("v{n}"))).await.unwrap();
        }
        harness
            .broker
            .read_group(STATS_STREAM, STATS_GROUP, "crashed", 20, Duration::from_millis(10))
            .await
            .unwrap();

        let first = rescuer.poll_once().await.unwrap();
        assert_eq!(first.failed, 10);
        assert_ne!(rescuer.claim_cursor(), CLAIM_START);

        let second = rescuer.poll_once().await.unwrap();
        assert_eq!(second.processed, 5);
        assert_eq!(harness.totals().await, (5, 5));
        assert_eq!(rescuer.claim_cursor(), CLAIM_START);
        assert_eq!(harness.pending(), 10);
    }

    #[tokio::test]
    async fn malformed_messages_stay_pending() {
        let harness = Harness::new().await;
        let consumer = harness.consumer("c1", Duration::from_secs(60));
        consumer.ensure_group().await.unwrap();
        harness
            .broker
            .append(STATS_STREAM, &[("gid", "g1".to_string())])
            .await
            .unwrap();
        harness.producer.publish(&harness.event("v1")).await.unwrap();

        let outcome = consumer.poll_once().await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome {
                delivered: 2,
                processed: 1,
                failed: 1
            }
        );
        assert_eq!(harness.pending(), 1);
        assert_eq!(harness.totals().await, (1, 1));
    }

    #[tokio::test]
    async fn full_batches_are_acknowledged_without_draining() {
        let harness = Harness::new().await;
        let consumer = harness.consumer("c1", Duration::from_secs(60));
        consumer.ensure_group().await.unwrap();
        for n in 0..25 {
            harness.producer.publish(&harness.event(&format!("v{n}"))).await.unwrap();
        }

        let outcome = consumer.poll_once().await.unwrap();
        assert_eq!(outcome.processed, 10);
        assert_eq!(consumer.pending_ack_count(), 0);
        assert_eq!(harness.pending(), 0);
        assert_eq!(harness.totals().await.0, 10);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_recovers_from_broker_failures() {
        let harness = Harness::new().await;
        let flaky = Arc::new(FlakyBroker {
            inner: harness.broker.clone(),
            failures: AtomicUsize::new(5),
            reads: AtomicUsize::new(0),
        });
        let consumer = Arc::new(harness.consumer_on(flaky.clone(), "c1", Duration::from_secs(60)));
        for n in 0..3 {
            harness.producer.publish(&harness.event(&format!("v{n}"))).await.unwrap();
        }

        let shutdown = CancellationToken::new();
        let task = {
            let consumer = consumer.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { consumer.run(shutdown).await })
        };

        awaitility::at_most(Duration::from_secs(5))
            .poll_interval(Duration::from_millis(20))
            .until_async(|| async { harness.totals().await.0 == 3 })
            .await;
        assert!(flaky.reads.load(Ordering::SeqCst) > 5);

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(harness.pending(), 0);
    }

    #[tokio::test]
    async fn shutdown_flushes_outstanding_acks() {
        let harness = Harness::new().await;
        let consumer = harness.consumer("c1", Duration::from_secs(60));
        consumer.ensure_group().await.unwrap();
        for n in 0..10 {
            harness.producer.publish(&harness.event(&format!("v{n}"))).await.unwrap();
        }
        let messages = consumer.fetch().await.unwrap();
        assert_eq!(messages.len(), 10);
        for message in &messages {
            consumer.process(message).await.unwrap();
            consumer.pending_acks.lock().push(message.id.clone());
        }
        assert_eq!(harness.pending(), 10);

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        consumer.run(shutdown).await;

        assert_eq!(consumer.pending_ack_count(), 0);
        assert_eq!(harness.pending(), 0);
    }
}
