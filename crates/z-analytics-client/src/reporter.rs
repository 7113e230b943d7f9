//! Perturbing, capped, batching reporter.
//!
//! Every increment is sanitized, perturbed with k-ary randomized response and
//! checked against the local contribution cap before it is queued. A
//! background task flushes the queue when it reaches the size cap or when the
//! debounce window since the first pending increment elapses. A flush swaps
//! the whole queue out under the lock, so each increment is sent at most once
//! and none is lost to a race with enqueueing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::{CryptoRng, RngCore};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use z_analytics_core::privacy::{DEFAULT_CLIENT_EPSILON, DEFAULT_MAX_DAILY_CONTRIBUTIONS};
use z_analytics_core::{
    entropy, perturb_metric, ClientId, Dimensions, Increment, IngestBatch, Metric, PrivacyError,
    RrParams,
};

use crate::error::ClientError;
use crate::tracker::ContributionTracker;

/// Destination for flushed batches.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Deliver one batch.
    async fn send(&self, batch: IngestBatch) -> Result<(), ClientError>;
}

/// Reporter settings.
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// ε for randomized response.
    pub epsilon: f64,
    /// Local cap per (day, metric).
    pub max_daily_contributions: u32,
    /// Time from the first pending increment to the flush.
    pub debounce: Duration,
    /// Pending increments that trigger an immediate flush.
    pub max_batch: usize,
    /// Pending increments beyond which new ones are dropped.
    pub max_queue: usize,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_CLIENT_EPSILON,
            max_daily_contributions: DEFAULT_MAX_DAILY_CONTRIBUTIONS,
            debounce: Duration::from_secs(2),
            max_batch: 50,
            max_queue: 500,
        }
    }
}

/// Generate a random per-installation client identifier.
///
/// # Errors
///
/// Returns `PrivacyError::EntropyUnavailable` if the generator fails.
pub fn generate_client_id<R>(rng: &mut R) -> Result<ClientId, ClientError>
where
    R: RngCore + CryptoRng + ?Sized,
{
    let token = entropy::hex_token(rng, 16)?;
    token
        .parse()
        .map_err(|e| ClientError::Privacy(PrivacyError::from(e)))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    sink: Arc<dyn BatchSink>,
    client_id: ClientId,
    params: RrParams,
    config: ReporterConfig,
    tracker: Mutex<ContributionTracker>,
    queue: Mutex<Vec<Increment>>,
    wake: Notify,
    closed: AtomicBool,
}

impl Shared {
    fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn flush(&self) -> Result<usize, ClientError> {
        let increments = std::mem::take(&mut *lock(&self.queue));
        if increments.is_empty() {
            return Ok(0);
        }
        let sent = increments.len();
        self.sink
            .send(IngestBatch {
                client_id: self.client_id.clone(),
                increments,
            })
            .await?;
        tracing::debug!(sent, "Analytics batch sent");
        Ok(sent)
    }

    async fn run(self: Arc<Self>) {
        loop {
            self.wake.notified().await;
            if self.is_closed() {
                break;
            }

            let window = tokio::time::sleep(self.config.debounce);
            tokio::pin!(window);
            while self.pending() < self.config.max_batch && !self.is_closed() {
                tokio::select! {
                    () = &mut window => break,
                    () = self.wake.notified() => {}
                }
            }
            if self.is_closed() {
                break;
            }

            if let Err(e) = self.flush().await {
                tracing::warn!(error = %e, "Failed to send analytics batch");
            }
        }
    }
}

/// Client-side reporter: sanitize, perturb, cap, batch, send.
pub struct Reporter {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Reporter {
    /// Reporter with a freshly generated client identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if `config.epsilon` is invalid or no identifier can
    /// be generated.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(sink: Arc<dyn BatchSink>, config: ReporterConfig) -> Result<Self, ClientError> {
        let client_id = generate_client_id(&mut rand::rngs::OsRng)?;
        Self::with_client_id(sink, client_id, config)
    }

    /// Reporter with a persisted client identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn with_client_id(
        sink: Arc<dyn BatchSink>,
        client_id: ClientId,
        config: ReporterConfig,
    ) -> Result<Self, ClientError> {
        if config.max_batch == 0 || config.max_queue < config.max_batch {
            return Err(ClientError::Configuration(
                "max_batch must be positive and at most max_queue".into(),
            ));
        }
        if config.max_daily_contributions == 0 {
            return Err(ClientError::Configuration(
                "max_daily_contributions must be positive".into(),
            ));
        }
        let params = RrParams::for_metrics(config.epsilon)?;

        let shared = Arc::new(Shared {
            sink,
            client_id,
            params,
            tracker: Mutex::new(ContributionTracker::new(config.max_daily_contributions)),
            queue: Mutex::new(Vec::with_capacity(config.max_batch)),
            config,
            wake: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let task = tokio::spawn(Arc::clone(&shared).run());

        Ok(Self {
            shared,
            task: Mutex::new(Some(task)),
        })
    }

    /// This installation's identifier.
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.shared.client_id
    }

    /// Record one occurrence of `metric`, using the OS generator.
    ///
    /// # Errors
    ///
    /// See [`Reporter::increment_with_rng`].
    pub fn increment<'a, I>(&self, metric: Metric, dimensions: I) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.increment_with_rng(metric, dimensions, &mut rand::rngs::OsRng)
    }

    /// Record one occurrence of `metric`.
    ///
    /// Increments over the daily cap, over the queue limit, or after
    /// shutdown are dropped silently.
    ///
    /// # Errors
    ///
    /// - `ClientError::Dimension` if a dimension is not whitelisted
    /// - `ClientError::Privacy` if `rng` fails
    ///
    /// Nothing is queued on error.
    pub fn increment_with_rng<'a, I, R>(
        &self,
        metric: Metric,
        dimensions: I,
        rng: &mut R,
    ) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
        R: RngCore + CryptoRng + ?Sized,
    {
        let dimensions = Dimensions::sanitize(dimensions)?;
        let reported = perturb_metric(&self.shared.params, metric, rng)?;

        if self.shared.is_closed() {
            return Ok(());
        }
        if !lock(&self.shared.tracker).try_admit(Utc::now().date_naive(), metric) {
            return Ok(());
        }

        {
            let mut queue = lock(&self.shared.queue);
            if queue.len() >= self.shared.config.max_queue {
                tracing::debug!("Analytics queue full, dropping increment");
                return Ok(());
            }
            queue.push(Increment::new(reported, dimensions));
        }
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Increments waiting to be sent.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.pending()
    }

    /// Send everything pending now. Returns the number sent.
    ///
    /// # Errors
    ///
    /// Returns the sink's error. The drained batch is not re-queued.
    pub async fn flush(&self) -> Result<usize, ClientError> {
        self.shared.flush().await
    }

    /// Stop the background task and send whatever is pending.
    ///
    /// Later increments are dropped.
    ///
    /// # Errors
    ///
    /// Returns the sink's error for the final batch.
    pub async fn shutdown(&self) -> Result<usize, ClientError> {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.wake.notify_one();

        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Analytics flush task failed");
            }
        }
        self.shared.flush().await
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use z_analytics_core::DimensionError;

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<IngestBatch>>,
    }

    impl RecordingSink {
        fn sizes(&self) -> Vec<usize> {
            lock(&self.batches).iter().map(|b| b.increments.len()).collect()
        }
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn send(&self, batch: IngestBatch) -> Result<(), ClientError> {
            lock(&self.batches).push(batch);
            Ok(())
        }
    }

    struct FailingSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BatchSink for FailingSink {
        async fn send(&self, _batch: IngestBatch) -> Result<(), ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::Configuration("offline".into()))
        }
    }

    struct FailingRng;

    impl RngCore for FailingRng {
        fn next_u32(&mut self) -> u32 {
            0
        }
        fn next_u64(&mut self) -> u64 {
            0
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }
        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new(std::io::Error::other("no entropy")))
        }
    }

    impl CryptoRng for FailingRng {}

    fn config() -> ReporterConfig {
        ReporterConfig {
            epsilon: 10.0,
            max_daily_contributions: 1000,
            debounce: Duration::from_secs(2),
            max_batch: 5,
            max_queue: 100,
        }
    }

    fn reporter(sink: &Arc<RecordingSink>, config: ReporterConfig) -> Reporter {
        let client_id: ClientId = "test-client-0000000001".parse().unwrap();
        let sink: Arc<dyn BatchSink> = Arc::clone(sink) as Arc<dyn BatchSink>;
        Reporter::with_client_id(sink, client_id, config).unwrap()
    }

    const CA: [(&str, &str); 1] = [("jurisdiction", "CA")];

    #[tokio::test(start_paused = true)]
    async fn flushes_after_debounce_window() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = reporter(&sink, config());

        for _ in 0..3 {
            reporter.increment(Metric::TemplateView, CA).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(sink.sizes().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.sizes(), vec![3]);
        assert_eq!(reporter.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_when_size_cap_is_reached() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = reporter(&sink, config());

        for _ in 0..5 {
            reporter.increment(Metric::MessageSent, CA).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sink.sizes(), vec![5]);
    }

    #[tokio::test(start_paused = true)]
    async fn local_cap_drops_silently() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = reporter(
            &sink,
            ReporterConfig {
                max_daily_contributions: 3,
                max_batch: 50,
                ..config()
            },
        );

        for _ in 0..10 {
            reporter.increment(Metric::OauthStarted, CA).unwrap();
        }
        assert_eq!(reporter.pending(), 3);
        reporter.increment(Metric::OauthCompleted, CA).unwrap();
        assert_eq!(reporter.pending(), 4);
    }

    #[tokio::test]
    async fn invalid_dimensions_are_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = reporter(&sink, config());

        let err = reporter
            .increment(Metric::TemplateView, [("email", "someone@example.com")])
            .unwrap_err();
        assert!(matches!(err, ClientError::Dimension(DimensionError::UnknownField)));
        assert!(!err.to_string().contains("someone@example.com"));
        assert_eq!(reporter.pending(), 0);
    }

    #[tokio::test]
    async fn entropy_failure_aborts_increment() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = reporter(&sink, config());

        let err = reporter
            .increment_with_rng(Metric::TemplateView, CA, &mut FailingRng)
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Privacy(PrivacyError::EntropyUnavailable)
        ));
        assert_eq!(reporter.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_queue() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = reporter(
            &sink,
            ReporterConfig {
                debounce: Duration::from_secs(3600),
                max_batch: 50,
                ..config()
            },
        );

        reporter.increment(Metric::TemplateShare, CA).unwrap();
        reporter.increment(Metric::TemplateShare, CA).unwrap();
        assert_eq!(reporter.shutdown().await.unwrap(), 2);
        assert_eq!(sink.sizes(), vec![2]);

        reporter.increment(Metric::TemplateShare, CA).unwrap();
        assert_eq!(reporter.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_is_not_retried() {
        let sink = Arc::new(FailingSink {
            calls: AtomicUsize::new(0),
        });
        let client_id: ClientId = "test-client-0000000002".parse().unwrap();
        let reporter = Reporter::with_client_id(
            Arc::clone(&sink) as Arc<dyn BatchSink>,
            client_id,
            config(),
        )
        .unwrap();

        for _ in 0..5 {
            reporter.increment(Metric::ErrorReported, CA).unwrap();
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert_eq!(reporter.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_enqueue_loses_and_duplicates_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = Arc::new(reporter(
            &sink,
            ReporterConfig {
                debounce: Duration::from_millis(5),
                max_batch: 50,
                max_queue: 10_000,
                max_daily_contributions: 10_000,
                ..config()
            },
        ));

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let reporter = Arc::clone(&reporter);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        reporter.increment(Metric::MessageGenerated, CA).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        reporter.shutdown().await.unwrap();
        assert_eq!(sink.sizes().iter().sum::<usize>(), 1000);
    }

    #[test]
    fn generated_client_ids_are_valid_and_distinct() {
        let mut rng = rand::rngs::OsRng;
        let a = generate_client_id(&mut rng).unwrap();
        let b = generate_client_id(&mut rng).unwrap();
        assert_eq!(a.as_str().len(), 32);
        assert_ne!(a, b);
        assert!(generate_client_id(&mut FailingRng).is_err());
    }
}
