use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use slacklog_core::config::SinkConfig;
use slacklog_core::error::{Result, SlacklogError};
use slacklog_core::format::format_message;
use slacklog_core::model::record::LogRecord;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::webhook::WebhookClient;

/// Buffers log records and ships them to the webhook from one background task.
///
/// A batch is flushed when it reaches `batch_size` records or when
/// `flush_interval` has passed since the previous flush. Every record becomes
/// its own POST; failed posts are logged and dropped.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    tx: mpsc::UnboundedSender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
    config: Arc<SinkConfig>,
    shared: Arc<Shared>,
}

enum Command {
    Record(LogRecord),
    Shutdown,
}

#[derive(Default)]
struct Shared {
    pending: AtomicUsize,
    batches: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub batches: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl Dispatcher {
    /// Validates `config` and starts the flush task. Must run inside a tokio runtime.
    pub fn new(config: SinkConfig) -> Result<Self> {
        config.validate()?;
        let client = WebhookClient::new(&config.webhook_url, config.request_timeout)?;
        let config = Arc::new(config);
        let shared = Arc::new(Shared::default());
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = tokio::spawn(run_dispatcher(
            rx,
            client,
            config.clone(),
            shared.clone(),
        ));
        debug!(
            batch_size = config.batch_size,
            flush_interval = ?config.flush_interval,
            "webhook dispatcher started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                tx,
                worker: Mutex::new(Some(worker)),
                config,
                shared,
            }),
        })
    }

    pub fn config(&self) -> &SinkConfig {
        &self.inner.config
    }

    /// Queues a record for the next flush. Never blocks.
    pub fn emit(&self, record: LogRecord) {
        let shared = &self.inner.shared;
        let queued = shared.pending.fetch_add(1, Ordering::AcqRel);
        if self
            .inner
            .config
            .queue_limit
            .is_some_and(|limit| queued >= limit)
        {
            shared.pending.fetch_sub(1, Ordering::AcqRel);
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if self.inner.tx.send(Command::Record(record)).is_err() {
            shared.pending.fetch_sub(1, Ordering::AcqRel);
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("webhook dispatcher dropped record: dispatcher is shut down");
        }
    }

    pub fn stats(&self) -> DispatchStats {
        let shared = &self.inner.shared;
        DispatchStats {
            batches: shared.batches.load(Ordering::Relaxed),
            delivered: shared.delivered.load(Ordering::Relaxed),
            failed: shared.failed.load(Ordering::Relaxed),
            dropped: shared.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stops the timer, flushes whatever is buffered and waits for the task.
    ///
    /// Every caller returns only once the final flush is done; calls after
    /// that return immediately.
    pub async fn shutdown(&self) -> Result<()> {
        // Held across the join so concurrent callers wait for the same flush.
        let mut worker = self.inner.worker.lock().await;
        let Some(handle) = worker.take() else {
            return Ok(());
        };

        let _ = self.inner.tx.send(Command::Shutdown);
        handle
            .await
            .map_err(|e| SlacklogError::Internal(format!("dispatcher task join failed: {e}")))
    }
}

async fn run_dispatcher(
    mut rx: mpsc::UnboundedReceiver<Command>,
    client: WebhookClient,
    config: Arc<SinkConfig>,
    shared: Arc<Shared>,
) {
    let period = config.flush_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buffer = Vec::with_capacity(config.batch_size);

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::Record(record)) => {
                    buffer.push(record);
                    if buffer.len() >= config.batch_size {
                        flush(&client, &config, &shared, &mut buffer).await;
                        ticker.reset();
                    }
                }
                Some(Command::Shutdown) | None => break,
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(&client, &config, &shared, &mut buffer).await;
                }
            }
        }
    }

    // Anything sent before shutdown still goes out with the final flush.
    rx.close();
    while let Ok(cmd) = rx.try_recv() {
        if let Command::Record(record) = cmd {
            buffer.push(record);
        }
    }
    if !buffer.is_empty() {
        flush(&client, &config, &shared, &mut buffer).await;
    }
    debug!("webhook dispatcher stopped");
}

async fn flush(
    client: &WebhookClient,
    config: &SinkConfig,
    shared: &Shared,
    buffer: &mut Vec<LogRecord>,
) {
    let batch = std::mem::take(buffer);
    shared.pending.fetch_sub(batch.len(), Ordering::AcqRel);
    shared.batches.fetch_add(1, Ordering::Relaxed);
    debug!(count = batch.len(), "flushing log batch to webhook");

    for record in &batch {
        let message = format_message(record, config);
        match client.post(&message).await {
            Ok(()) => {
                shared.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, level = %record.level, "dropped log event after failed webhook delivery");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use slacklog_core::level::Level;
    use testkit::MockWebhook;

    use super::*;

    fn config(hook: &MockWebhook, batch_size: usize, flush_interval: Duration) -> SinkConfig {
        SinkConfig {
            batch_size,
            flush_interval,
            ..SinkConfig::new(hook.url())
        }
    }

    fn texts(hook: &MockWebhook) -> Vec<String> {
        hook.requests()
            .iter()
            .map(|r| r.body["text"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn blank_webhook_fails_before_spawning() {
        // No runtime here: reaching tokio::spawn would panic.
        let err = Dispatcher::new(SinkConfig::new("  ")).err().unwrap();
        assert!(matches!(err, SlacklogError::Config(_)));
    }

    #[tokio::test]
    async fn flushes_on_batch_size() {
        let hook = MockWebhook::start().await;
        let dispatcher = Dispatcher::new(config(&hook, 50, Duration::from_secs(60))).unwrap();

        for i in 0..50 {
            dispatcher.emit(testkit::sample_record(Level::Information, &format!("event-{i}")));
        }

        assert!(hook.wait_for(50, Duration::from_secs(5)).await);
        assert_eq!(dispatcher.stats().batches, 1);
        dispatcher.shutdown().await.unwrap();

        let stats = dispatcher.stats();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.delivered, 50);
        let expected: Vec<String> = (0..50).map(|i| format!("event-{i}")).collect();
        assert_eq!(texts(&hook), expected);
    }

    #[tokio::test]
    async fn flushes_on_interval() {
        let hook = MockWebhook::start().await;
        let dispatcher = Dispatcher::new(config(&hook, 50, Duration::from_millis(100))).unwrap();

        dispatcher.emit(testkit::sample_record(Level::Warning, "lonely"));
        assert!(hook.requests().is_empty());

        assert!(hook.wait_for(1, Duration::from_secs(5)).await);
        tokio::time::sleep(Duration::from_millis(300)).await;
        dispatcher.shutdown().await.unwrap();

        let stats = dispatcher.stats();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(texts(&hook), vec!["lonely".to_string()]);
    }

    #[tokio::test]
    async fn failed_post_does_not_stop_batch() {
        let hook = MockWebhook::start().await;
        hook.fail_requests([2]);
        let dispatcher = Dispatcher::new(config(&hook, 5, Duration::from_secs(60))).unwrap();

        for i in 0..5 {
            dispatcher.emit(testkit::sample_record(Level::Error, &format!("event-{i}")));
        }

        assert!(hook.wait_for(5, Duration::from_secs(5)).await);
        dispatcher.shutdown().await.unwrap();

        assert_eq!(
            texts(&hook),
            vec!["event-0", "event-1", "event-2", "event-3", "event-4"]
        );
        let stats = dispatcher.stats();
        assert_eq!(stats.delivered, 4);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.batches, 1);
    }

    #[tokio::test]
    async fn failed_batch_does_not_stop_later_flushes() {
        let hook = MockWebhook::start().await;
        hook.fail_requests([0, 1]);
        let dispatcher = Dispatcher::new(config(&hook, 2, Duration::from_secs(60))).unwrap();

        for i in 0..4 {
            dispatcher.emit(testkit::sample_record(Level::Error, &format!("event-{i}")));
        }

        assert!(hook.wait_for(4, Duration::from_secs(5)).await);
        dispatcher.shutdown().await.unwrap();
        let stats = dispatcher.stats();
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.delivered, 2);
    }

    #[tokio::test]
    async fn shutdown_flushes_remaining_records() {
        let hook = MockWebhook::start().await;
        let dispatcher = Dispatcher::new(config(&hook, 50, Duration::from_secs(60))).unwrap();

        for i in 0..3 {
            dispatcher.emit(testkit::sample_record(Level::Debug, &format!("event-{i}")));
        }
        dispatcher.shutdown().await.unwrap();

        assert_eq!(texts(&hook), vec!["event-0", "event-1", "event-2"]);
        assert_eq!(dispatcher.stats().batches, 1);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_drops_late_records() {
        let hook = MockWebhook::start().await;
        let dispatcher = Dispatcher::new(config(&hook, 50, Duration::from_secs(60))).unwrap();

        dispatcher.shutdown().await.unwrap();
        dispatcher.shutdown().await.unwrap();
        dispatcher.emit(testkit::sample_record(Level::Fatal, "too late"));

        let stats = dispatcher.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.batches, 0);
        assert!(hook.requests().is_empty());
    }

    #[tokio::test]
    async fn concurrent_shutdowns_both_wait_for_final_flush() {
        let hook = MockWebhook::start().await;
        hook.delay_requests(0..3, Duration::from_millis(100));
        let dispatcher = Dispatcher::new(config(&hook, 50, Duration::from_secs(60))).unwrap();

        for i in 0..3 {
            dispatcher.emit(testkit::sample_record(Level::Information, &format!("event-{i}")));
        }

        let first = dispatcher.clone();
        let second = dispatcher.clone();
        let (first_result, seen_by_second) = tokio::join!(first.shutdown(), async move {
            second.shutdown().await.unwrap();
            second.stats().delivered
        });

        first_result.unwrap();
        assert_eq!(seen_by_second, 3);
    }

    #[tokio::test]
    async fn timed_out_post_does_not_stop_batch() {
        let hook = MockWebhook::start().await;
        hook.delay_requests([1], Duration::from_secs(5));
        let cfg = SinkConfig {
            request_timeout: Duration::from_millis(200),
            ..config(&hook, 3, Duration::from_secs(60))
        };
        let dispatcher = Dispatcher::new(cfg).unwrap();

        for i in 0..3 {
            dispatcher.emit(testkit::sample_record(Level::Error, &format!("event-{i}")));
        }

        assert!(hook.wait_for(3, Duration::from_secs(3)).await);
        dispatcher.shutdown().await.unwrap();

        assert_eq!(texts(&hook), vec!["event-0", "event-1", "event-2"]);
        let stats = dispatcher.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.batches, 1);
    }

    #[tokio::test]
    async fn formats_with_sink_config() {
        let hook = MockWebhook::start().await;
        let cfg = SinkConfig {
            channel: Some("#incidents".to_string()),
            properties: vec!["request_id".to_string()],
            tidy_stack_traces: true,
            ..config(&hook, 50, Duration::from_secs(60))
        };
        let dispatcher = Dispatcher::new(cfg).unwrap();

        dispatcher.emit(testkit::sample_error_record("order sync failed"));
        dispatcher.shutdown().await.unwrap();

        let requests = hook.requests();
        assert_eq!(requests.len(), 1);
        let body = &requests[0].body;
        assert_eq!(body["channel"], "#incidents");
        assert_eq!(body["attachments"][0]["fields"][2]["value"], "req-7");
        assert_eq!(
            body["attachments"][1]["fields"][2]["value"],
            "```   at Api.Client.SendAsync()\n -- (async)\r\n   at Api.Orders.PlaceAsync()```"
        );
    }

    #[tokio::test]
    async fn queue_limit_drops_newest() {
        let hook = MockWebhook::start().await;
        let cfg = SinkConfig {
            queue_limit: Some(2),
            ..config(&hook, 50, Duration::from_secs(60))
        };
        let dispatcher = Dispatcher::new(cfg).unwrap();

        for i in 0..5 {
            dispatcher.emit(testkit::sample_record(Level::Information, &format!("event-{i}")));
        }
        dispatcher.shutdown().await.unwrap();

        assert_eq!(texts(&hook), vec!["event-0", "event-1"]);
        let stats = dispatcher.stats();
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.delivered, 2);
    }

    #[tokio::test]
    async fn emit_from_many_threads() {
        let hook = MockWebhook::start().await;
        let dispatcher = Dispatcher::new(config(&hook, 50, Duration::from_millis(50))).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let dispatcher = dispatcher.clone();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        dispatcher
                            .emit(testkit::sample_record(Level::Information, &format!("t{t}-{i}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        dispatcher.shutdown().await.unwrap();

        let mut received = texts(&hook);
        received.sort();
        received.dedup();
        assert_eq!(received.len(), 40);
        assert_eq!(dispatcher.stats().delivered, 40);
    }
}
