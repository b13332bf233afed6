use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use domain::dns::entity::{DnsAnswer, RecordKind};
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::upstream_resolver_port::UpstreamResolverPort;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tokio_util::time::delay_queue::{DelayQueue, Key};

/// Per-query timeout for upstream DNS requests.
const DNS_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Capacity of the due-name channel feeding the worker pool.
const DUE_CHANNEL_CAPACITY: usize = 64;

/// Consumer of proactive query results. Implemented by the FQDN policy
/// service, which merges the answers with no waiting packet attached.
pub trait QueryResultSink: Send + Sync {
    fn on_resolved(&self, fqdn: &str, answers: Vec<DnsAnswer>);
}

#[derive(Debug, Clone)]
pub struct QuerySchedulerConfig {
    pub workers: usize,
    pub ipv4_enabled: bool,
    pub ipv6_enabled: bool,
    /// Initial retry delay after a failed query.
    pub min_retry_delay: Duration,
    /// Upper bound for the exponential retry backoff.
    pub max_retry_delay: Duration,
}

#[derive(Debug)]
pub(crate) enum SchedulerInput {
    Schedule { fqdn: String, delay: Duration },
    Outcome { fqdn: String, failed: bool },
}

/// Handle for enqueueing names into the re-query delay queue.
///
/// Names are deduplicated: scheduling a name that is already pending
/// collapses to a single entry, keeping the earlier deadline.
#[derive(Clone)]
pub struct QueryScheduler {
    input_tx: mpsc::UnboundedSender<SchedulerInput>,
}

impl QueryScheduler {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<SchedulerInput>) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        (Self { input_tx }, input_rx)
    }

    /// Ask for `fqdn` to be (re-)resolved after `delay`.
    pub fn schedule(&self, fqdn: String, delay: Duration) {
        if self
            .input_tx
            .send(SchedulerInput::Schedule { fqdn, delay })
            .is_err()
        {
            tracing::debug!("query scheduler stopped, dropping schedule request");
        }
    }

    fn report_outcome(&self, fqdn: String, failed: bool) {
        let _ = self.input_tx.send(SchedulerInput::Outcome { fqdn, failed });
    }
}

/// Run the delay queue and its worker pool until cancelled.
///
/// A single core task owns the queue, the name → entry dedup map, and
/// the per-name failure counters; workers receive due names over a
/// bounded channel and report outcomes back through the input channel.
pub(crate) async fn run_scheduler(
    config: QuerySchedulerConfig,
    handle: QueryScheduler,
    mut input_rx: mpsc::UnboundedReceiver<SchedulerInput>,
    resolver: Arc<dyn UpstreamResolverPort>,
    sink: Arc<dyn QueryResultSink>,
    metrics: Arc<dyn MetricsPort>,
    cancel: CancellationToken,
) {
    let mut kinds = Vec::new();
    if config.ipv4_enabled {
        kinds.push(RecordKind::A);
    }
    if config.ipv6_enabled {
        kinds.push(RecordKind::Aaaa);
    }

    let (due_tx, due_rx) = mpsc::channel::<String>(DUE_CHANNEL_CAPACITY);
    let due_rx = Arc::new(tokio::sync::Mutex::new(due_rx));
    for worker_id in 0..config.workers.max(1) {
        tokio::spawn(run_worker(
            worker_id,
            Arc::clone(&due_rx),
            Arc::clone(&resolver),
            Arc::clone(&sink),
            handle.clone(),
            Arc::clone(&metrics),
            kinds.clone(),
            cancel.clone(),
        ));
    }

    let mut queue: DelayQueue<String> = DelayQueue::new();
    let mut pending: HashMap<String, (Key, Instant)> = HashMap::new();
    let mut failures: HashMap<String, u32> = HashMap::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            input = input_rx.recv() => match input {
                Some(SchedulerInput::Schedule { fqdn, delay }) => {
                    enqueue(&mut queue, &mut pending, fqdn, delay);
                }
                Some(SchedulerInput::Outcome { fqdn, failed }) => {
                    if failed {
                        let count = failures.entry(fqdn.clone()).or_insert(0);
                        let delay =
                            backoff_delay(config.min_retry_delay, config.max_retry_delay, *count);
                        *count = count.saturating_add(1);
                        tracing::debug!(
                            fqdn = %fqdn,
                            retry_in_secs = delay.as_secs(),
                            "re-queueing failed DNS query"
                        );
                        enqueue(&mut queue, &mut pending, fqdn, delay);
                    } else {
                        failures.remove(&fqdn);
                    }
                }
                None => break,
            },
            Some(expired) = queue.next(), if !queue.is_empty() => {
                let fqdn = expired.into_inner();
                pending.remove(&fqdn);
                if due_tx.send(fqdn).await.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("query scheduler stopped");
}

fn enqueue(
    queue: &mut DelayQueue<String>,
    pending: &mut HashMap<String, (Key, Instant)>,
    fqdn: String,
    delay: Duration,
) {
    let deadline = Instant::now() + delay;
    match pending.get_mut(&fqdn) {
        Some((key, existing)) => {
            if deadline < *existing {
                queue.reset_at(key, deadline);
                *existing = deadline;
            }
        }
        None => {
            let key = queue.insert_at(fqdn.clone(), deadline);
            pending.insert(fqdn, (key, deadline));
        }
    }
}

fn backoff_delay(min: Duration, max: Duration, failures: u32) -> Duration {
    let factor = 1u32 << failures.min(16);
    min.saturating_mul(factor).min(max)
}

#[allow(clippy::too_many_arguments)] // worker wiring is inherently wide
async fn run_worker(
    worker_id: usize,
    due_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    resolver: Arc<dyn UpstreamResolverPort>,
    sink: Arc<dyn QueryResultSink>,
    scheduler: QueryScheduler,
    metrics: Arc<dyn MetricsPort>,
    kinds: Vec<RecordKind>,
    cancel: CancellationToken,
) {
    loop {
        let fqdn = {
            let mut rx = due_rx.lock().await;
            tokio::select! {
                () = cancel.cancelled() => return,
                maybe = rx.recv() => match maybe {
                    Some(fqdn) => fqdn,
                    None => return,
                },
            }
        };

        // A family that answers is merged even when the other family
        // fails; any failure still re-queues the name with backoff.
        let mut failed = false;
        for kind in &kinds {
            match tokio::time::timeout(DNS_QUERY_TIMEOUT, resolver.resolve(&fqdn, *kind)).await {
                Ok(Ok(answers)) => {
                    metrics.record_dns_query(kind.family(), "ok");
                    tracing::debug!(
                        worker_id,
                        fqdn = %fqdn,
                        kind = %kind,
                        answers = answers.len(),
                        "proactive DNS query answered"
                    );
                    sink.on_resolved(&fqdn, answers);
                }
                Ok(Err(err)) => {
                    metrics.record_dns_query(kind.family(), "error");
                    tracing::warn!(
                        worker_id,
                        fqdn = %fqdn,
                        kind = %kind,
                        error = %err,
                        "proactive DNS query failed, will retry"
                    );
                    failed = true;
                }
                Err(_elapsed) => {
                    metrics.record_dns_query(kind.family(), "timeout");
                    tracing::warn!(
                        worker_id,
                        fqdn = %fqdn,
                        kind = %kind,
                        timeout_secs = DNS_QUERY_TIMEOUT.as_secs(),
                        "proactive DNS query timed out, will retry"
                    );
                    failed = true;
                }
            }
        }
        scheduler.report_outcome(fqdn, failed);
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use domain::dns::error::DnsError;
    use ports::test_utils::NoopMetrics;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Resolver that records the (paused-clock) time of every query and
    /// can be switched between failing and answering.
    struct ScriptedResolver {
        calls: StdMutex<Vec<(String, RecordKind, Instant)>>,
        fail: AtomicBool,
    }

    impl ScriptedResolver {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: StdMutex::new(Vec::new()),
                fail: AtomicBool::new(fail),
            })
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|c| c.2).collect()
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl UpstreamResolverPort for ScriptedResolver {
        fn resolve<'a>(
            &'a self,
            fqdn: &'a str,
            kind: RecordKind,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<DnsAnswer>, DnsError>> + Send + 'a>> {
            self.calls
                .lock()
                .unwrap()
                .push((fqdn.to_string(), kind, Instant::now()));
            let fail = self.fail.load(Ordering::SeqCst);
            Box::pin(async move {
                if fail {
                    Err(DnsError::Transport("connection refused".to_string()))
                } else {
                    Ok(vec![DnsAnswer {
                        ip: "10.0.0.1".parse().unwrap(),
                        ttl_secs: 60,
                    }])
                }
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        resolved: StdMutex<Vec<(String, usize)>>,
    }

    impl QueryResultSink for RecordingSink {
        fn on_resolved(&self, fqdn: &str, answers: Vec<DnsAnswer>) {
            self.resolved
                .lock()
                .unwrap()
                .push((fqdn.to_string(), answers.len()));
        }
    }

    fn test_config() -> QuerySchedulerConfig {
        QuerySchedulerConfig {
            workers: 2,
            ipv4_enabled: true,
            ipv6_enabled: false,
            min_retry_delay: Duration::from_secs(5),
            max_retry_delay: Duration::from_secs(300),
        }
    }

    fn start(
        config: QuerySchedulerConfig,
        resolver: Arc<ScriptedResolver>,
        sink: Arc<RecordingSink>,
    ) -> (QueryScheduler, CancellationToken) {
        let (handle, input_rx) = QueryScheduler::channel();
        let cancel = CancellationToken::new();
        tokio::spawn(run_scheduler(
            config,
            handle.clone(),
            input_rx,
            resolver,
            sink,
            Arc::new(NoopMetrics),
            cancel.clone(),
        ));
        (handle, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_schedule_resolves_and_feeds_sink() {
        let resolver = ScriptedResolver::new(false);
        let sink = Arc::new(RecordingSink::default());
        let (handle, _cancel) = start(test_config(), Arc::clone(&resolver), Arc::clone(&sink));

        handle.schedule("api.example.com".to_string(), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(resolver.call_count(), 1);
        assert_eq!(
            sink.resolved.lock().unwrap().as_slice(),
            &[("api.example.com".to_string(), 1)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dual_family_queries_both_kinds() {
        let mut config = test_config();
        config.ipv6_enabled = true;
        let resolver = ScriptedResolver::new(false);
        let sink = Arc::new(RecordingSink::default());
        let (handle, _cancel) = start(config, Arc::clone(&resolver), Arc::clone(&sink));

        handle.schedule("api.example.com".to_string(), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let calls = resolver.calls.lock().unwrap();
        let kinds: Vec<RecordKind> = calls.iter().map(|c| c.1).collect();
        assert_eq!(kinds, vec![RecordKind::A, RecordKind::Aaaa]);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_names_are_deduplicated() {
        let resolver = ScriptedResolver::new(false);
        let sink = Arc::new(RecordingSink::default());
        let (handle, _cancel) = start(test_config(), Arc::clone(&resolver), Arc::clone(&sink));

        handle.schedule("api.example.com".to_string(), Duration::from_secs(30));
        handle.schedule("api.example.com".to_string(), Duration::from_secs(30));
        handle.schedule("api.example.com".to_string(), Duration::from_secs(40));
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(resolver.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_deadline_wins() {
        let resolver = ScriptedResolver::new(false);
        let sink = Arc::new(RecordingSink::default());
        let (handle, _cancel) = start(test_config(), Arc::clone(&resolver), Arc::clone(&sink));

        let t0 = Instant::now();
        handle.schedule("api.example.com".to_string(), Duration::from_secs(60));
        handle.schedule("api.example.com".to_string(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(5)).await;

        let times = resolver.call_times();
        assert_eq!(times.len(), 1);
        assert!(times[0] - t0 < Duration::from_secs(2), "fired too late");
    }

    #[tokio::test(start_paused = true)]
    async fn failures_back_off_exponentially() {
        let resolver = ScriptedResolver::new(true);
        let sink = Arc::new(RecordingSink::default());
        let (handle, _cancel) = start(test_config(), Arc::clone(&resolver), Arc::clone(&sink));

        let t0 = Instant::now();
        handle.schedule("api.example.com".to_string(), Duration::ZERO);
        tokio::time::sleep(Duration::from_secs(40)).await;

        // Attempt at 0, retries after 5s, 10s, 20s → 4 calls by T+40.
        let times = resolver.call_times();
        assert_eq!(times.len(), 4);
        let deltas: Vec<u64> = times.iter().map(|t| (*t - t0).as_secs()).collect();
        assert_eq!(deltas, vec![0, 5, 15, 35]);
        assert!(sink.resolved.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn success_clears_backoff() {
        let resolver = ScriptedResolver::new(true);
        let sink = Arc::new(RecordingSink::default());
        let (handle, _cancel) = start(test_config(), Arc::clone(&resolver), Arc::clone(&sink));

        handle.schedule("api.example.com".to_string(), Duration::ZERO);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(resolver.call_count(), 2); // initial + one retry

        resolver.fail.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(20)).await;
        let after_success = resolver.call_count();
        assert_eq!(after_success, 3); // the 10s retry succeeded, no more

        // A fresh schedule after success fires immediately, proving the
        // failure counter was reset.
        let t1 = Instant::now();
        handle.schedule("api.example.com".to_string(), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let times = resolver.call_times();
        assert_eq!(times.len(), 4);
        assert!(times[3] - t1 < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_capped() {
        let min = Duration::from_secs(5);
        let max = Duration::from_secs(300);
        assert_eq!(backoff_delay(min, max, 0), Duration::from_secs(5));
        assert_eq!(backoff_delay(min, max, 1), Duration::from_secs(10));
        assert_eq!(backoff_delay(min, max, 5), Duration::from_secs(160));
        assert_eq!(backoff_delay(min, max, 6), max);
        assert_eq!(backoff_delay(min, max, 60), max);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_queries() {
        let resolver = ScriptedResolver::new(false);
        let sink = Arc::new(RecordingSink::default());
        let (handle, cancel) = start(test_config(), Arc::clone(&resolver), Arc::clone(&sink));

        handle.schedule("api.example.com".to_string(), Duration::from_secs(10));
        cancel.cancel();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(resolver.call_count(), 0);
    }
}
