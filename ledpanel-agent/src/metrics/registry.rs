//! One-shot backend resolution
//!
//! Each signal's candidates are tried in order at startup; the first one that
//! yields a finite reading stays bound for the life of the process. Signals with
//! no working candidate read 0 forever.

use chrono::Utc;
use futures::future::join_all;
use std::collections::BTreeMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::probe::{Candidates, MetricProbe};
use super::{MetricsSnapshot, Signal};

/// Winning backend per signal. Read-only after `resolve`.
pub struct MetricsRegistry {
    bound: BTreeMap<Signal, Box<dyn MetricProbe>>,
    initial: MetricsSnapshot,
    resolved_at: Instant,
}

impl MetricsRegistry {
    /// Try every signal's candidates in priority order and keep the first that works
    pub async fn resolve(candidates: Candidates) -> Self {
        debug!("Resolving metrics backends...");

        let mut bound = BTreeMap::new();
        let mut initial = MetricsSnapshot::zeroed(Utc::now());

        for (signal, probes) in candidates {
            match Self::resolve_signal(signal, probes).await {
                Some((probe, value)) => {
                    info!("{} bound to {} (initial reading {})", signal, probe.name(), value);
                    initial.set(signal, value);
                    bound.insert(signal, probe);
                }
                None => warn!("No suitable backend found for {}, reporting 0", signal),
            }
        }

        initial.computed_at = Utc::now();
        Self {
            bound,
            initial,
            resolved_at: Instant::now(),
        }
    }

    async fn resolve_signal(
        signal: Signal,
        probes: Vec<Box<dyn MetricProbe>>,
    ) -> Option<(Box<dyn MetricProbe>, i32)> {
        for probe in probes {
            match probe.read().await {
                Ok(Some(value)) if value.is_finite() => return Some((probe, to_reading(value))),
                Ok(_) => debug!("{}: {} has no value", signal, probe.name()),
                Err(e) => debug!("{}: {} unavailable: {}", signal, probe.name(), e),
            }
        }
        None
    }

    pub fn is_bound(&self, signal: Signal) -> bool {
        self.bound.contains_key(&signal)
    }

    pub fn backend_name(&self, signal: Signal) -> Option<&str> {
        self.bound.get(&signal).map(|probe| probe.name())
    }

    /// Readings taken while resolving
    pub fn initial_snapshot(&self) -> &MetricsSnapshot {
        &self.initial
    }

    pub(crate) fn resolved_at(&self) -> Instant {
        self.resolved_at
    }

    /// Poll every bound backend concurrently. A failing probe reads 0 for this poll only.
    pub async fn poll(&self) -> MetricsSnapshot {
        let readings = join_all(
            Signal::ALL
                .into_iter()
                .map(|signal| async move { (signal, self.poll_signal(signal).await) }),
        )
        .await;

        let mut snapshot = MetricsSnapshot::zeroed(Utc::now());
        for (signal, value) in readings {
            snapshot.set(signal, value);
        }
        snapshot
    }

    async fn poll_signal(&self, signal: Signal) -> i32 {
        let Some(probe) = self.bound.get(&signal) else {
            return 0;
        };
        match probe.read().await {
            Ok(Some(value)) if value.is_finite() => to_reading(value),
            Ok(_) => {
                debug!("{}: {} returned no value this poll", signal, probe.name());
                0
            }
            Err(e) => {
                warn!("Error getting {} from {}: {}", signal, probe.name(), e);
                0
            }
        }
    }
}

/// Readings are truncated toward zero
fn to_reading(value: f64) -> i32 {
    value.trunc() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testing::{boxed, Reply, StubProbe};
    use std::sync::atomic::Ordering;

    fn only(signal: Signal, probes: Vec<Box<dyn MetricProbe>>) -> Candidates {
        let mut candidates = Candidates::new();
        candidates.insert(signal, probes);
        candidates
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let failing = StubProbe::failing("always-fails");
        let first = StubProbe::value("returns-42", 42.0);
        let second = StubProbe::value("returns-7", 7.0);
        let (failing_calls, first_calls, second_calls) = (failing.calls(), first.calls(), second.calls());

        let registry = MetricsRegistry::resolve(only(
            Signal::CpuTemp,
            vec![boxed(failing), boxed(first), boxed(second)],
        ))
        .await;

        assert_eq!(registry.backend_name(Signal::CpuTemp), Some("returns-42"));
        assert_eq!(registry.initial_snapshot().cpu_temp, 42);
        assert_eq!(failing_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_and_non_finite_readings_are_skipped() {
        let registry = MetricsRegistry::resolve(only(
            Signal::GpuUsage,
            vec![
                boxed(StubProbe::new("empty", vec![Reply::Empty])),
                boxed(StubProbe::value("nan", f64::NAN)),
                boxed(StubProbe::value("ok", 12.9)),
            ],
        ))
        .await;

        assert_eq!(registry.backend_name(Signal::GpuUsage), Some("ok"));
        assert_eq!(registry.initial_snapshot().gpu_usage, 12);
    }

    #[tokio::test]
    async fn test_unresolved_signal_reads_zero() {
        let registry = MetricsRegistry::resolve(only(
            Signal::GpuTemp,
            vec![boxed(StubProbe::failing("a")), boxed(StubProbe::failing("b"))],
        ))
        .await;

        assert!(!registry.is_bound(Signal::GpuTemp));
        assert_eq!(registry.poll().await.gpu_temp, 0);
        assert_eq!(registry.poll().await.gpu_temp, 0);
    }

    #[tokio::test]
    async fn test_failure_in_one_signal_does_not_affect_others() {
        let mut candidates = Candidates::new();
        candidates.insert(Signal::CpuTemp, vec![boxed(StubProbe::failing("broken"))]);
        candidates.insert(Signal::CpuUsage, vec![boxed(StubProbe::value("usage", 55.0))]);

        let registry = MetricsRegistry::resolve(candidates).await;
        assert!(!registry.is_bound(Signal::CpuTemp));
        assert_eq!(registry.backend_name(Signal::CpuUsage), Some("usage"));
        assert_eq!(registry.poll().await.cpu_usage, 55);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_binding() {
        let flaky = StubProbe::new(
            "flaky",
            vec![Reply::Value(60.0), Reply::Fail, Reply::Value(61.0)],
        );
        let calls = flaky.calls();
        let registry = MetricsRegistry::resolve(only(Signal::CpuTemp, vec![boxed(flaky)])).await;

        assert_eq!(registry.poll().await.cpu_temp, 0);
        assert_eq!(registry.backend_name(Signal::CpuTemp), Some("flaky"));
        assert_eq!(registry.poll().await.cpu_temp, 61);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
