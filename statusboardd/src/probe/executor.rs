use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tokio::time::Instant;
use shared::types::{ServiceDefinition, StatusRecord, StatusState};
use crate::store::StatusStore;
use super::resolver::Resolver;

/// Classify a successful probe. The threshold itself still counts as `up`.
pub fn classify(elapsed_ms: u64, slow_threshold_ms: u64) -> StatusState {
    if elapsed_ms > slow_threshold_ms {
        StatusState::Slow
    } else {
        StatusState::Up
    }
}

/// Times one resolution, classifies it and writes the record to the store.
#[derive(Clone)]
pub struct ProbeExecutor {
    resolver: Arc<Resolver>,
    store: StatusStore,
    slow_threshold_ms: u64,
}

impl ProbeExecutor {
    pub fn new(resolver: Arc<Resolver>, store: StatusStore, slow_threshold: Duration) -> Self {
        Self {
            resolver,
            store,
            slow_threshold_ms: slow_threshold.as_millis() as u64,
        }
    }

    /// Probe one service. Failures end up in the record, never as an error.
    pub async fn probe(&self, service: &ServiceDefinition) -> StatusRecord {
        let started = Instant::now();
        let outcome = self.resolver.resolve(service).await;
        let checked_at = Utc::now();

        let record = match outcome {
            Ok(resolution) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                let state = classify(elapsed_ms, self.slow_threshold_ms);
                match &resolution.intermediary {
                    Some(relay) => tracing::info!(
                        "{}: {} ({}ms) via {} through {}",
                        service.name,
                        state,
                        elapsed_ms,
                        resolution.address,
                        relay
                    ),
                    None => tracing::info!(
                        "{}: {} ({}ms) via {}",
                        service.name,
                        state,
                        elapsed_ms,
                        resolution.address
                    ),
                }
                StatusRecord::reachable(
                    state,
                    elapsed_ms,
                    checked_at,
                    resolution.address,
                    resolution.intermediary,
                )
            }
            Err(failure) => {
                tracing::warn!(
                    "{}: down after {} attempts - {}",
                    service.name,
                    failure.attempts().len(),
                    failure
                );
                StatusRecord::down(failure.to_string(), checked_at)
            }
        };

        self.store.set(&service.name, record.clone());
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use shared::types::CheckStrategy;
    use crate::config::IntermediaryConfig;
    use crate::probe::transport::fake::{FakeReply, FakeTransport};

    fn service(name: &str, strategy: CheckStrategy) -> ServiceDefinition {
        ServiceDefinition {
            name: name.to_string(),
            description: None,
            addresses: vec![format!("https://{}.test", name)],
            check_strategy: strategy,
        }
    }

    fn executor(transport: FakeTransport, relays: Vec<IntermediaryConfig>, names: &[&str]) -> ProbeExecutor {
        let resolver = Resolver::new(Arc::new(transport), relays, Duration::from_secs(10));
        let store = StatusStore::new(names.iter().copied());
        ProbeExecutor::new(Arc::new(resolver), store, Duration::from_millis(5000))
    }

    #[test]
    fn test_classify_boundary() {
        assert_eq!(classify(0, 5000), StatusState::Up);
        assert_eq!(classify(5000, 5000), StatusState::Up);
        assert_eq!(classify(5001, 5000), StatusState::Slow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_response_is_up() {
        let executor = executor(
            FakeTransport::new().reply("https://api.test", FakeReply::ok(100)),
            Vec::new(),
            &["api"],
        );

        let record = executor.probe(&service("api", CheckStrategy::Direct)).await;
        assert_eq!(record.state, StatusState::Up);
        assert!(record.response_time_millis.unwrap() >= 100);
        assert_eq!(record.resolved_address.as_deref(), Some("https://api.test"));
        assert!(!record.via_fallback);
        assert!(record.is_consistent());
        assert_eq!(executor.store.get("api"), record);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_response_is_slow() {
        let executor = executor(
            FakeTransport::new().reply("https://api.test", FakeReply::ok(6000)),
            Vec::new(),
            &["api"],
        );

        let record = executor.probe(&service("api", CheckStrategy::Direct)).await;
        assert_eq!(record.state, StatusState::Slow);
        assert!(record.response_time_millis.unwrap() >= 6000);
    }

    #[tokio::test]
    async fn test_unreachable_is_down() {
        let executor = executor(FakeTransport::new(), Vec::new(), &["api"]);

        let record = executor.probe(&service("api", CheckStrategy::Direct)).await;
        assert_eq!(record.state, StatusState::Down);
        assert_eq!(record.response_time_millis, None);
        assert!(record.error_detail.unwrap().contains("all direct connections failed"));
        assert!(record.last_checked_at.is_some());
        assert_eq!(executor.store.get("api").state, StatusState::Down);
    }

    #[tokio::test]
    async fn test_fallback_success_is_flagged() {
        let relay = "https://relay.test/fetch/";
        let executor = executor(
            FakeTransport::new().reply(&format!("{}https://api.test", relay), FakeReply::ok(0)),
            vec![IntermediaryConfig::from_url(relay)],
            &["api"],
        );

        let record = executor.probe(&service("api", CheckStrategy::Mixed)).await;
        assert!(matches!(record.state, StatusState::Up | StatusState::Slow));
        assert!(record.via_fallback);
        assert_eq!(record.intermediary.as_deref(), Some(relay));
        assert_eq!(record.resolved_address.as_deref(), Some("https://api.test"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn concurrent_probes_keep_records_isolated(
            outcomes in prop::collection::vec((0u64..9000, any::<bool>()), 1..12)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            runtime.block_on(async {
                let names: Vec<String> = (0..outcomes.len()).map(|i| format!("svc{}", i)).collect();
                let mut transport = FakeTransport::new();
                for (name, (delay_ms, reachable)) in names.iter().zip(&outcomes) {
                    let reply = if *reachable {
                        FakeReply::ok(*delay_ms)
                    } else {
                        FakeReply::Fail { delay_ms: *delay_ms, message: format!("{} refused", name) }
                    };
                    transport = transport.reply(&format!("https://{}.test", name), reply);
                }
                let executor = executor(transport, Vec::new(), &names.iter().map(String::as_str).collect::<Vec<_>>());

                let handles: Vec<_> = names
                    .iter()
                    .map(|name| {
                        let executor = executor.clone();
                        let service = service(name, CheckStrategy::Direct);
                        tokio::spawn(async move { executor.probe(&service).await })
                    })
                    .collect();
                for handle in handles {
                    handle.await.unwrap();
                }

                for (name, (delay_ms, reachable)) in names.iter().zip(&outcomes) {
                    let record = executor.store.get(name);
                    assert!(record.is_consistent());
                    if *reachable {
                        let elapsed = record.response_time_millis.unwrap();
                        assert!(elapsed >= *delay_ms);
                        assert_eq!(record.state, classify(elapsed, 5000));
                        assert_eq!(record.resolved_address, Some(format!("https://{}.test", name)));
                    } else {
                        assert_eq!(record.state, StatusState::Down);
                        assert!(record.error_detail.unwrap().contains(&format!("{} refused", name)));
                    }
                }
            });
        }
    }
}
