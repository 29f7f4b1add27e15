use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use shared::types::{ServiceDefinition, StatusSummary};
use crate::config::SweepMode;
use crate::probe::executor::ProbeExecutor;
use crate::store::StatusStore;

/// Handle for requesting an out-of-schedule sweep
#[derive(Clone)]
pub struct SweepTrigger {
    tx: mpsc::Sender<()>,
}

impl SweepTrigger {
    /// Queue a sweep. Requests made while one is already queued coalesce.
    /// Returns false once the scheduler has stopped.
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }
}

/// Capacity one: at most one manual sweep waits behind the running one.
pub fn trigger_channel() -> (SweepTrigger, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (SweepTrigger { tx }, rx)
}

pub struct Scheduler {
    services: Arc<[ServiceDefinition]>,
    executor: ProbeExecutor,
    store: StatusStore,
    interval: Duration,
    spacing: Duration,
    mode: SweepMode,
}

impl Scheduler {
    pub fn new(
        services: Arc<[ServiceDefinition]>,
        executor: ProbeExecutor,
        store: StatusStore,
        interval: Duration,
        spacing: Duration,
        mode: SweepMode,
    ) -> Self {
        Self {
            services,
            executor,
            store,
            interval,
            spacing,
            mode,
        }
    }

    /// Probe every service once and record the sweep completion time.
    pub async fn sweep(&self) -> StatusSummary {
        tracing::info!("Checking {} services", self.services.len());
        let started = Instant::now();

        let records = match self.mode {
            SweepMode::Concurrent => {
                join_all(self.services.iter().map(|service| self.executor.probe(service))).await
            }
            SweepMode::Serialized => {
                let mut records = Vec::with_capacity(self.services.len());
                for (index, service) in self.services.iter().enumerate() {
                    records.push(self.executor.probe(service).await);
                    if index + 1 < self.services.len() {
                        tokio::time::sleep(self.spacing).await;
                    }
                }
                records
            }
        };

        self.store.mark_sweep_completed(Utc::now());

        let summary = StatusSummary::tally(&records);
        tracing::info!(
            "All services checked in {}ms: {} up, {} slow, {} down",
            started.elapsed().as_millis(),
            summary.up,
            summary.slow,
            summary.down
        );
        summary
    }

    /// Sweep immediately, then every `interval` measured from sweep start.
    /// Ticks that fall due while a sweep is running are skipped, and sweeps
    /// never overlap.
    pub async fn run(self, mut triggers: mpsc::Receiver<()>, cancel: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep_until_cancelled(&cancel).await;
                }
                Some(()) = triggers.recv() => {
                    tracing::info!("Manual check requested");
                    self.sweep_until_cancelled(&cancel).await;
                }
            }
        }

        Ok(())
    }

    // Shutdown abandons an in-flight sweep; nothing else interrupts one.
    async fn sweep_until_cancelled(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = self.sweep() => {}
            _ = cancel.cancelled() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use async_trait::async_trait;
    use shared::types::{CheckStrategy, StatusState};
    use crate::probe::resolver::Resolver;
    use crate::probe::transport::fake::{FakeReply, FakeTransport};
    use crate::probe::transport::{FetchResponse, Transport, TransportError};
    use crate::publisher::SnapshotPublisher;

    fn definitions(names: &[&str]) -> Arc<[ServiceDefinition]> {
        names
            .iter()
            .map(|name| ServiceDefinition {
                name: name.to_string(),
                description: None,
                addresses: vec![format!("https://{}.test", name)],
                check_strategy: CheckStrategy::Direct,
            })
            .collect()
    }

    fn scheduler(transport: Arc<dyn Transport>, services: Arc<[ServiceDefinition]>, mode: SweepMode) -> (Scheduler, StatusStore) {
        let store = StatusStore::new(services.iter().map(|s| s.name.as_str()));
        let resolver = Arc::new(Resolver::new(transport, Vec::new(), Duration::from_secs(10)));
        let executor = ProbeExecutor::new(resolver, store.clone(), Duration::from_millis(5000));
        let scheduler = Scheduler::new(
            services,
            executor,
            store.clone(),
            Duration::from_secs(30),
            Duration::from_millis(500),
            mode,
        );
        (scheduler, store)
    }

    fn three_services() -> FakeTransport {
        FakeTransport::new()
            .reply("https://fast.test", FakeReply::ok(100))
            .reply("https://sluggish.test", FakeReply::ok(6000))
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_sweep_classifies_all_services() {
        let services = definitions(&["fast", "sluggish", "gone"]);
        let (scheduler, store) = scheduler(Arc::new(three_services()), services.clone(), SweepMode::Concurrent);

        let summary = scheduler.sweep().await;
        assert_eq!(summary, StatusSummary { up: 1, slow: 1, down: 1, unknown: 0 });

        let snapshot = SnapshotPublisher::new(services, store, 30_000).snapshot();
        assert_eq!(snapshot.summary.up, 1);
        assert_eq!(snapshot.summary.slow, 1);
        assert_eq!(snapshot.summary.down, 1);
        assert!(snapshot.last_sweep_completed_at.is_some());
        assert!(snapshot.services.iter().all(|s| s.status.last_checked_at.is_some()));
        assert!(snapshot.services.iter().all(|s| s.status.is_consistent()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sweep_overlaps_probes() {
        let services = definitions(&["fast", "sluggish", "gone"]);
        let (scheduler, _) = scheduler(Arc::new(three_services()), services, SweepMode::Concurrent);

        let started = Instant::now();
        scheduler.sweep().await;
        // Bounded by the slowest probe, not the sum
        assert!(started.elapsed() < Duration::from_millis(6500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_serialized_sweep_spaces_probes() {
        let services = definitions(&["fast", "sluggish", "gone"]);
        let (scheduler, store) = scheduler(Arc::new(three_services()), services, SweepMode::Serialized);

        let started = Instant::now();
        scheduler.sweep().await;
        // 100 + 500 + 6000 + 500 + 0
        assert!(started.elapsed() >= Duration::from_millis(7100));
        assert_eq!(store.get("gone").state, StatusState::Down);
    }

    /// Counts how many requests are in flight at once.
    struct GaugeTransport {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for GaugeTransport {
        async fn get(&self, _url: &str, _read_body: bool) -> Result<FetchResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(FetchResponse { status: 200, body: None })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_serialized_sweep_runs_one_probe_at_a_time() {
        let transport = Arc::new(GaugeTransport {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let (scheduler, _) = scheduler(transport.clone(), definitions(&["a", "b", "c"]), SweepMode::Serialized);

        scheduler.sweep().await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(transport.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweeps_immediately_then_on_interval() {
        let transport = Arc::new(GaugeTransport {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let (scheduler, store) = scheduler(transport.clone(), definitions(&["a"]), SweepMode::Concurrent);
        let (_trigger, triggers) = trigger_channel();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(triggers, cancel.clone()));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get("a").state, StatusState::Up);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_trigger_runs_extra_sweep() {
        let transport = Arc::new(GaugeTransport {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let (scheduler, _) = scheduler(transport.clone(), definitions(&["a"]), SweepMode::Concurrent);
        let (trigger, triggers) = trigger_channel();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(triggers, cancel.clone()));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(trigger.request());
        // Coalesces with the queued request
        assert!(trigger.request());
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert_eq!(transport.peak.load(Ordering::SeqCst), 1);

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(!trigger.request());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_sweeps_never_overlap() {
        // Each probe outlasts the interval
        let transport = Arc::new(FakeTransport::new().reply("https://a.test", FakeReply::ok(9000)));
        let store = StatusStore::new(["a"]);
        let resolver = Arc::new(Resolver::new(transport.clone(), Vec::new(), Duration::from_secs(10)));
        let executor = ProbeExecutor::new(resolver, store.clone(), Duration::from_millis(5000));
        let scheduler = Scheduler::new(
            definitions(&["a"]),
            executor,
            store,
            Duration::from_secs(5),
            Duration::from_millis(500),
            SweepMode::Concurrent,
        );
        let (_trigger, triggers) = trigger_channel();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(triggers, cancel.clone()));

        tokio::time::sleep(Duration::from_millis(20_500)).await;
        // Sweeps run back to back at 0, 9 and 18 seconds; missed ticks collapse into one
        assert_eq!(transport.calls().len(), 3);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
